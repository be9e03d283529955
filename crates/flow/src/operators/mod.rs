//! Concrete operators
//!
//! Each operator reads named flow arrays of the current tile, computes a
//! per-tile result and either writes it to a named output or returns a
//! partial result for aggregation. The convenience methods on the flow
//! objects (`Raster::resample`, `Classification::performance`, ...) set up an
//! applier with the input and output names below and run one operator.

mod classification;
mod estimator;
mod mask;
mod raster;

pub use classification::{
    ClassificationFromFraction, ClassificationPerformance, ClassificationReclassify, ClassificationResample,
    ClassificationStatistics, FractionFromClassification, PerformanceReport,
};
pub use estimator::{extract_sample, predict, EstimatorPredict, ExtractSample, PredictTarget, Sample};
pub use mask::{MaskFromRaster, MaskFromRasterParams, MaskValue};
pub use raster::{BandAccumulator, BandStatistics, ExtractPixels, RasterApplyMask, RasterConvolve, RasterResample, RasterStatistics};

use crate::applier::{Applier, ApplierConfig};
use crate::objects::FlowObject;
use hubflow_core::io::Storage;
use hubflow_core::{Grid, Result};
use ndarray::{Array2, ArrayView3, Axis};
use std::sync::Arc;

/// Name of the primary raster input
pub const RASTER: &str = "raster";
/// Name of the mask input
pub const MASK: &str = "mask";
pub const CLASSIFICATION: &str = "classification";
pub const FRACTION: &str = "fraction";
pub const REFERENCE: &str = "reference";
pub const FEATURES: &str = "features";
pub const LABELS: &str = "labels";
/// Name of the output raster
pub const OUTPUT: &str = "output";

/// Applier over `grid` with `masks` registered under [`MASK`]
fn applier_with_masks(
    storage: &Arc<Storage>,
    grid: &Grid,
    masks: Option<FlowObject>,
    config: ApplierConfig,
) -> Result<Applier> {
    let mut applier = Applier::new(Arc::clone(storage), grid.clone(), config)?;
    applier.set_flow_masks(MASK, masks.into_iter().collect())?;
    Ok(applier)
}

/// Grid of the dataset behind `filename`
fn native_grid(storage: &Storage, filename: &str) -> Result<Grid> {
    Ok(storage.open_raster(filename)?.grid().clone())
}

/// Profiles of the pixels where `valid` is set, (pixels, bands), row-major
fn profiles(array: ArrayView3<f64>, valid: &Array2<bool>) -> Array2<f64> {
    let bands = array.dim().0;
    let pixels: Vec<(usize, usize)> = valid
        .indexed_iter()
        .filter(|(_, &v)| v)
        .map(|(index, _)| index)
        .collect();
    Array2::from_shape_fn((pixels.len(), bands), |(i, b)| {
        let (r, c) = pixels[i];
        array[(b, r, c)]
    })
}

/// Row-wise concatenation of tile results
fn stack_rows(blocks: Vec<Array2<f64>>, columns: usize) -> Result<Array2<f64>> {
    let views: Vec<_> = blocks.iter().map(|b| b.view()).filter(|b| b.nrows() > 0).collect();
    if views.is_empty() {
        return Ok(Array2::zeros((0, columns)));
    }
    ndarray::concatenate(Axis(0), &views).map_err(|e| hubflow_core::Error::dataset(e.to_string()))
}
