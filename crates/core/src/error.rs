//! Error types for hubflow

use thiserror::Error;

/// Main error type for hubflow operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("band index {index} out of range for '{name}' with {bands} band(s)")]
    BandIndexOutOfRange {
        name: String,
        index: usize,
        bands: usize,
    },

    #[error("attribute '{attribute}' not found in layer '{layer}'")]
    MissingAttribute { attribute: String, layer: String },

    #[error("Projection mismatch: {0} vs {1}")]
    ProjectionMismatch(String, String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("output '{0}' already exists and overwrite is disabled")]
    OutputExists(String),

    #[error("TIFF error: {0}")]
    #[cfg(feature = "gtiff")]
    Tiff(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("processing canceled")]
    Canceled,

    #[error("input '{name}': {source}")]
    Input {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("tile {index} (row {row}, col {col}): {source}")]
    Tile {
        index: usize,
        row: usize,
        col: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a dataset error.
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// Attach the name of the input being resolved.
    pub fn in_input(self, name: &str) -> Self {
        match self {
            Error::Canceled => Error::Canceled,
            other => Error::Input {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error, or any error it wraps, is a cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled => true,
            Error::Input { source, .. } | Error::Tile { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Whether this error, or any error it wraps, is a configuration problem.
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Configuration(_)
            | Error::InvalidParameter { .. }
            | Error::BandIndexOutOfRange { .. } => true,
            Error::Input { source, .. } | Error::Tile { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

#[cfg(feature = "gtiff")]
impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::Tiff(e.to_string())
    }
}

/// Result type alias for hubflow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_is_not_wrapped() {
        let err = Error::Canceled.in_input("raster");
        assert!(matches!(err, Error::Canceled));
    }

    #[test]
    fn test_context_is_transparent() {
        let err = Error::Tile {
            index: 3,
            row: 1,
            col: 0,
            source: Box::new(Error::BandIndexOutOfRange {
                name: "raster".into(),
                index: 4,
                bands: 2,
            }
            .in_input("raster")),
        };
        assert!(err.is_configuration());
        assert!(!err.is_canceled());
        assert!(err.to_string().contains("tile 3"));
    }
}
