//! Output drivers and their creation options

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Prefix of filenames that live in the in-memory filesystem
pub const MEM_PREFIX: &str = "/vsimem/";

/// Raster format of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Driver {
    /// In-memory dataset owned by the [`Storage`](crate::io::Storage)
    Mem,
    /// GeoTIFF file, one IFD per band
    GTiff,
}

impl Driver {
    /// Driver implied by a filename: `/vsimem/...` or no extension -> MEM,
    /// `.tif`/`.tiff` -> GTiff.
    pub fn from_filename(filename: &str) -> Result<Self> {
        if filename.starts_with(MEM_PREFIX) {
            return Ok(Driver::Mem);
        }
        match Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        {
            None => Ok(Driver::Mem),
            Some(ext) if ext == "tif" || ext == "tiff" => Ok(Driver::GTiff),
            Some(ext) => Err(Error::configuration(format!(
                "no raster driver for extension '.{}' of '{}'",
                ext, filename
            ))),
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MEM" => Ok(Driver::Mem),
            "GTIFF" => Ok(Driver::GTiff),
            other => Err(Error::configuration(format!("unknown raster driver '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Driver::Mem => "MEM",
            Driver::GTiff => "GTiff",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// TIFF compression requested through the `COMPRESS=` creation option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Lzw,
}

/// Driver plus GDAL-style `KEY=VALUE` creation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub driver: Driver,
    #[serde(default)]
    pub creation_options: Vec<String>,
}

impl DriverSpec {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            creation_options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.creation_options.push(option.into());
        self
    }

    /// Value of creation option `key` (case-insensitive)
    pub fn option(&self, key: &str) -> Option<&str> {
        self.creation_options.iter().find_map(|opt| {
            let (k, v) = opt.split_once('=')?;
            k.trim().eq_ignore_ascii_case(key).then_some(v.trim())
        })
    }

    pub fn compression(&self) -> Result<Compression> {
        match self.option("COMPRESS").map(|v| v.to_ascii_uppercase()) {
            None => Ok(Compression::None),
            Some(v) if v == "NONE" => Ok(Compression::None),
            Some(v) if v == "DEFLATE" => Ok(Compression::Deflate),
            Some(v) if v == "LZW" => Ok(Compression::Lzw),
            Some(v) => Err(Error::InvalidParameter {
                name: "COMPRESS",
                value: v,
                reason: "expected NONE, DEFLATE or LZW".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_filename() {
        assert_eq!(Driver::from_filename("/vsimem/a.tif").unwrap(), Driver::Mem);
        assert_eq!(Driver::from_filename("out/classification.TIF").unwrap(), Driver::GTiff);
        assert_eq!(Driver::from_filename("fraction").unwrap(), Driver::Mem);
        assert!(Driver::from_filename("x.bsq").unwrap_err().is_configuration());
    }

    #[test]
    fn test_creation_options() {
        let spec = DriverSpec::new(Driver::GTiff).with_option("compress=deflate");
        assert_eq!(spec.option("COMPRESS"), Some("deflate"));
        assert_eq!(spec.compression().unwrap(), Compression::Deflate);
        let bad = DriverSpec::new(Driver::GTiff).with_option("COMPRESS=JPEG");
        assert!(bad.compression().is_err());
    }
}
