//! Rasters interpreted as boolean masks

use serde::{Deserialize, Serialize};

/// Parameters of a raster mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskParams {
    /// Per-band no-data values marking invalid pixels; `None` takes them
    /// from the dataset, which then must define them
    pub no_data_values: Option<Vec<f64>>,
    /// 0-based bands used; `None` uses all bands
    pub indices: Option<Vec<usize>>,
    /// Minimum share of a resampled pixel's footprint that must be valid
    pub min_overall_coverage: f64,
    pub invert: bool,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            no_data_values: None,
            indices: None,
            min_overall_coverage: 0.5,
            invert: false,
        }
    }
}

/// A raster whose no-data pixels are masked out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub filename: String,
    pub params: MaskParams,
}

impl Mask {
    pub fn new(filename: impl Into<String>) -> Self {
        Self::with_params(filename, MaskParams::default())
    }

    pub fn with_params(filename: impl Into<String>, params: MaskParams) -> Self {
        Self {
            filename: filename.into(),
            params,
        }
    }

    /// Same mask with the valid and invalid pixels swapped
    pub fn inverted(&self) -> Self {
        let mut mask = self.clone();
        mask.params.invert = !mask.params.invert;
        mask
    }
}

/// How per-band validity is reduced to one band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskAggregation {
    /// Valid where every band is valid
    #[default]
    All,
    /// Valid where any band is valid
    Any,
}
