//! Raster-backed flow objects without class semantics

use hubflow_core::{Error, ResampleAlg, Result};
use serde::{Deserialize, Serialize};

/// Handle to a raster dataset; owns no pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    pub filename: String,
    /// Resampling used when the raster is read into a foreign grid
    pub resample_alg: ResampleAlg,
}

impl Raster {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            resample_alg: ResampleAlg::Nearest,
        }
    }

    pub fn with_resample_alg(mut self, alg: ResampleAlg) -> Self {
        self.resample_alg = alg;
        self
    }
}

/// Several rasters concatenated along the band axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStack {
    rasters: Vec<Raster>,
}

impl RasterStack {
    pub fn new(rasters: Vec<Raster>) -> Result<Self> {
        if rasters.is_empty() {
            return Err(Error::configuration("a raster stack needs at least one raster"));
        }
        Ok(Self { rasters })
    }

    pub fn rasters(&self) -> &[Raster] {
        &self.rasters
    }

    /// Filename of the first member
    pub fn filename(&self) -> &str {
        &self.rasters[0].filename
    }
}

/// Parameters of a regression map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionParams {
    /// Per-band no-data values; `None` takes them from the dataset
    pub no_data_values: Option<Vec<f64>>,
    /// Band names; `None` takes them from the dataset
    pub output_names: Option<Vec<String>>,
    /// Minimum share of a resampled pixel's footprint holding valid data
    pub min_overall_coverage: f64,
}

impl Default for RegressionParams {
    fn default() -> Self {
        Self {
            no_data_values: None,
            output_names: None,
            min_overall_coverage: 0.5,
        }
    }
}

/// Multi-band continuous map with per-band no-data values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub filename: String,
    pub params: RegressionParams,
}

impl Regression {
    pub fn new(filename: impl Into<String>) -> Self {
        Self::with_params(filename, RegressionParams::default())
    }

    pub fn with_params(filename: impl Into<String>, params: RegressionParams) -> Self {
        Self {
            filename: filename.into(),
            params,
        }
    }
}
