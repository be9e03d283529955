//! Flow-array resolution
//!
//! Turns a registered flow object into the array it contributes to one tile.
//! Every resolver returns arrays with the full padded tile shape; pixels of
//! the overlap border lying outside the processing grid are never read and
//! carry the resolver's fill value (no data, `false`, label 0 or -1). Raster
//! bands without a no-data value are filled with NaN.

use crate::applier::inputs::{mask_no_data_values, regression_no_data_values, Input, Source};
use crate::objects::{
    ClassificationParams, FlowObject, Fraction, MaskAggregation, MaskParams, Vector, VectorClassification,
};
use hubflow_core::grid::PaddedSubgrid;
use hubflow_core::io::{read_band, read_category_fractions, read_footprint_mean, read_valid_fraction, RasterDataset};
use hubflow_core::raster::resample::is_no_data;
use hubflow_core::vector::{FeatureFilter, RasterizeOptions, VectorDataset};
use hubflow_core::{Error, Grid, PixelWindow, ResampleAlg, Result};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};

/// Upper bound applied to every coverage threshold, so that a threshold of
/// 1.0 still accepts fully covered pixels despite rounding.
pub const COVERAGE_CEILING: f64 = 0.9999;

/// Threshold a coverage must strictly exceed
pub fn coverage_threshold(min_coverage: f64) -> f64 {
    min_coverage.min(COVERAGE_CEILING)
}

/// Per-pixel validity of class fractions (bands, rows, cols): the summed
/// membership must exceed the overall threshold and the largest membership
/// the dominant threshold.
pub fn mask_from_fraction_array(fractions: ArrayView3<f64>, min_overall: f64, min_dominant: f64) -> Array2<bool> {
    let overall = coverage_threshold(min_overall);
    let dominant = coverage_threshold(min_dominant);
    let (_, rows, cols) = fractions.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let pixel = fractions.slice(s![.., r, c]);
        let sum: f64 = pixel.sum();
        let max = pixel.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        sum > overall && max > dominant
    })
}

/// Set every band of pixels failing the thresholds to -1.
pub fn apply_fraction_thresholds(fractions: &mut Array3<f64>, min_overall: f64, min_dominant: f64) {
    let valid = mask_from_fraction_array(fractions.view(), min_overall, min_dominant);
    for mut band in fractions.outer_iter_mut() {
        Zip::from(&mut band).and(&valid).for_each(|v, &ok| {
            if !ok {
                *v = Fraction::NO_DATA;
            }
        });
    }
}

/// Hard labels from class fractions: index of the largest fraction + 1, or 0
/// where every band is -1.
pub fn classification_from_fraction_array(fractions: ArrayView3<f64>) -> Array2<u32> {
    let (_, rows, cols) = fractions.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let pixel = fractions.slice(s![.., r, c]);
        if pixel.iter().all(|&v| v == Fraction::NO_DATA) {
            return 0;
        }
        let mut best = 0;
        for (k, &v) in pixel.iter().enumerate() {
            if v > pixel[best] {
                best = k;
            }
        }
        best as u32 + 1
    })
}

/// Mean of every `factor` x `factor` block
pub fn block_mean(fine: ArrayView2<f64>, factor: usize) -> Result<Array2<f64>> {
    let (rows, cols) = fine.dim();
    if factor == 0 || rows % factor != 0 || cols % factor != 0 {
        return Err(Error::InvalidParameter {
            name: "oversampling",
            value: factor.to_string(),
            reason: format!("does not divide a {}x{} array", rows, cols),
        });
    }
    let n = (factor * factor) as f64;
    Ok(Array2::from_shape_fn((rows / factor, cols / factor), |(r, c)| {
        fine.slice(s![r * factor..(r + 1) * factor, c * factor..(c + 1) * factor]).sum() / n
    }))
}

/// Part of the padded tile inside the processing grid, `None` if that is all of it
fn inner_grid(padded: &PaddedSubgrid) -> Result<Option<Grid>> {
    let (rows, cols) = padded.grid.shape();
    let v = padded.valid;
    if v == PixelWindow::full(rows, cols) {
        return Ok(None);
    }
    Ok(Some(padded.grid.subgrid(v.row_off, v.col_off, v.rows, v.cols)?))
}

/// Resolve bands for the inner part of the padded tile and place them into
/// a full-size array; `read` returns the bands and one fill value per band.
fn padded_bands<F>(padded: &PaddedSubgrid, read: F) -> Result<Array3<f64>>
where
    F: FnOnce(&Grid) -> Result<(Array3<f64>, Vec<f64>)>,
{
    let Some(inner) = inner_grid(padded)? else {
        return Ok(read(&padded.grid)?.0);
    };
    let (data, fills) = read(&inner)?;
    let (rows, cols) = padded.grid.shape();
    let mut out = Array3::zeros((data.dim().0, rows, cols));
    for (mut band, fill) in out.outer_iter_mut().zip(fills) {
        band.fill(fill);
    }
    let v = padded.valid;
    let (r0, c0) = (v.row_off as usize, v.col_off as usize);
    out.slice_mut(s![.., r0..r0 + v.rows, c0..c0 + v.cols]).assign(&data);
    Ok(out)
}

fn padded_plane<T, F>(padded: &PaddedSubgrid, fill: T, read: F) -> Result<Array2<T>>
where
    T: Clone,
    F: FnOnce(&Grid) -> Result<Array2<T>>,
{
    let Some(inner) = inner_grid(padded)? else {
        return read(&padded.grid);
    };
    let data = read(&inner)?;
    let mut out = Array2::from_elem(padded.grid.shape(), fill);
    let v = padded.valid;
    let (r0, c0) = (v.row_off as usize, v.col_off as usize);
    out.slice_mut(s![r0..r0 + v.rows, c0..c0 + v.cols]).assign(&data);
    Ok(out)
}

fn stack(bands: Vec<Array2<f64>>, shape: (usize, usize)) -> Array3<f64> {
    let mut out = Array3::zeros((bands.len(), shape.0, shape.1));
    for (i, band) in bands.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&band);
    }
    out
}

fn select_bands(array: Array3<f64>, indices: Option<&[usize]>, name: &str) -> Result<Array3<f64>> {
    let Some(indices) = indices else {
        return Ok(array);
    };
    let bands = array.dim().0;
    if let Some(&index) = indices.iter().find(|&&i| i >= bands) {
        return Err(Error::BandIndexOutOfRange {
            name: name.to_string(),
            index,
            bands,
        });
    }
    Ok(array.select(Axis(0), indices))
}

fn read_bands(ds: &dyn RasterDataset, indices: &[usize], alg: ResampleAlg, grid: &Grid) -> Result<(Array3<f64>, Vec<f64>)> {
    let no_data = ds.no_data_values();
    let bands = indices
        .iter()
        .map(|&i| read_band(ds, i, grid, alg))
        .collect::<Result<Vec<_>>>()?;
    let fills = indices.iter().map(|&i| no_data.get(i).copied().flatten().unwrap_or(f64::NAN)).collect();
    Ok((stack(bands, grid.shape()), fills))
}

fn labels_as_band(labels: Array2<u32>) -> Array3<f64> {
    labels.mapv(f64::from).insert_axis(Axis(0))
}

fn unsupported(input: &Input, what: &str) -> Error {
    Error::configuration(format!(
        "input '{}' is a {} and cannot be read as {}",
        input.name,
        input.object.kind(),
        what
    ))
}

/// Bands of any raster-like input
pub(crate) fn raster_array(input: &Input, indices: Option<&[usize]>, padded: &PaddedSubgrid) -> Result<Array3<f64>> {
    match &input.object {
        FlowObject::Regression(_) => select_bands(regression_array(input, padded)?, indices, &input.name),
        FlowObject::Classification(_) => {
            select_bands(labels_as_band(classification_array(input, padded)?), indices, &input.name)
        }
        FlowObject::Fraction(_) => select_bands(fraction_array(input, padded)?, indices, &input.name),
        FlowObject::Mask(_) => {
            let mask = mask_array(input, MaskAggregation::All, padded)?;
            select_bands(mask.mapv(|v| if v { 1.0 } else { 0.0 }).insert_axis(Axis(0)), indices, &input.name)
        }
        FlowObject::Raster(raster) => {
            let ds = input.raster()?;
            let all: Vec<usize>;
            let indices = match indices {
                Some(indices) => {
                    indices.iter().try_for_each(|&i| ds.check_band(i))?;
                    indices
                }
                None => {
                    all = (0..ds.band_count()).collect();
                    &all
                }
            };
            padded_bands(padded, |grid| read_bands(ds.as_ref(), indices, raster.resample_alg, grid))
        }
        FlowObject::RasterStack(_) => {
            let Source::Stack(members) = &input.source else {
                return Err(unsupported(input, "a raster stack"));
            };
            let array = padded_bands(padded, |grid| {
                let mut bands = Vec::new();
                let mut fills = Vec::new();
                for (raster, ds) in members {
                    let all: Vec<usize> = (0..ds.band_count()).collect();
                    let (data, member_fills) = read_bands(ds.as_ref(), &all, raster.resample_alg, grid)?;
                    bands.extend(data.outer_iter().map(|b| b.to_owned()));
                    fills.extend(member_fills);
                }
                Ok((stack(bands, grid.shape()), fills))
            })?;
            select_bands(array, indices, &input.name)
        }
        FlowObject::Vector(_) | FlowObject::VectorMask(_) | FlowObject::VectorClassification(_) => {
            Err(unsupported(input, "a raster"))
        }
    }
}

/// Rasterized vector input, one band
pub(crate) fn vector_array(input: &Input, padded: &PaddedSubgrid) -> Result<Array3<f64>> {
    let vector = match &input.object {
        FlowObject::VectorClassification(_) => return Ok(labels_as_band(classification_array(input, padded)?)),
        FlowObject::Vector(vector) => vector,
        FlowObject::VectorMask(mask) => &mask.vector,
        _ => return Err(unsupported(input, "a vector")),
    };
    let ds = input.vector()?;
    let params = &vector.params;
    let fill = params.no_data_value.unwrap_or(params.init_value);
    padded_bands(padded, |grid| {
        let burned = ds.rasterize(grid, &params.rasterize_options())?;
        let data_type = params.data_type;
        Ok((burned.mapv(|v| data_type.cast(v)).insert_axis(Axis(0)), vec![fill]))
    })
}

pub(crate) fn reduce(masks: Vec<Array2<bool>>, aggregation: MaskAggregation, shape: (usize, usize)) -> Array2<bool> {
    let init = matches!(aggregation, MaskAggregation::All);
    masks.into_iter().fold(Array2::from_elem(shape, init), |mut acc, mask| {
        Zip::from(&mut acc).and(&mask).for_each(|a, &m| {
            *a = match aggregation {
                MaskAggregation::All => *a && m,
                MaskAggregation::Any => *a || m,
            }
        });
        acc
    })
}

/// Per-band "enough valid data" masks reduced to one band
fn coverage_mask(
    ds: &dyn RasterDataset,
    bands: &[(usize, Option<f64>)],
    min_overall: f64,
    invert: bool,
    aggregation: MaskAggregation,
    grid: &Grid,
) -> Result<Array2<bool>> {
    let threshold = coverage_threshold(min_overall);
    let masks = bands
        .iter()
        .map(|&(band, no_data)| {
            let valid = read_valid_fraction(ds, band, grid, no_data)?;
            Ok(valid.mapv(|f| (f > threshold) != invert))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(reduce(masks, aggregation, grid.shape()))
}

/// Boolean validity of any input used as a mask
pub(crate) fn mask_array(input: &Input, aggregation: MaskAggregation, padded: &PaddedSubgrid) -> Result<Array2<bool>> {
    match &input.object {
        FlowObject::Mask(mask) => {
            let ds = input.raster()?;
            let no_data = mask_no_data_values(mask, ds.as_ref())?;
            let indices: Vec<usize> = match &mask.params.indices {
                Some(indices) => indices.clone(),
                None => (0..ds.band_count()).collect(),
            };
            let bands: Vec<(usize, Option<f64>)> = indices.into_iter().zip(no_data.into_iter().map(Some)).collect();
            // the border is invalid, so an inverted mask covers it
            padded_plane(padded, mask.params.invert, |grid| {
                coverage_mask(
                    ds.as_ref(),
                    &bands,
                    mask.params.min_overall_coverage,
                    mask.params.invert,
                    aggregation,
                    grid,
                )
            })
        }
        FlowObject::Raster(_) => {
            let ds = input.raster()?;
            let bands: Vec<(usize, Option<f64>)> = ds.no_data_values().into_iter().enumerate().collect();
            padded_plane(padded, false, |grid| {
                coverage_mask(
                    ds.as_ref(),
                    &bands,
                    MaskParams::default().min_overall_coverage,
                    false,
                    aggregation,
                    grid,
                )
            })
        }
        FlowObject::Regression(regression) => {
            let ds = input.raster()?;
            let no_data = regression_no_data_values(regression, ds.as_ref())?;
            let bands: Vec<(usize, Option<f64>)> = no_data.into_iter().map(Some).enumerate().collect();
            padded_plane(padded, false, |grid| {
                coverage_mask(
                    ds.as_ref(),
                    &bands,
                    regression.params.min_overall_coverage,
                    false,
                    aggregation,
                    grid,
                )
            })
        }
        FlowObject::Classification(_) | FlowObject::Fraction(_) | FlowObject::VectorClassification(_) => {
            Ok(classification_array(input, padded)?.mapv(|label| label != 0))
        }
        FlowObject::Vector(vector) => vector_membership(input, vector, false, padded),
        FlowObject::VectorMask(mask) => vector_membership(input, &mask.vector, mask.invert, padded),
        FlowObject::RasterStack(_) => Err(unsupported(input, "a mask")),
    }
}

fn vector_membership(input: &Input, vector: &Vector, invert: bool, padded: &PaddedSubgrid) -> Result<Array2<bool>> {
    let ds = input.vector()?;
    let options = RasterizeOptions {
        init_value: 0.0,
        burn_value: 1.0,
        burn_attribute: None,
        ..vector.params.rasterize_options()
    };
    // outside the grid nothing is inside a feature
    padded_plane(padded, invert, |grid| {
        Ok(ds.rasterize(grid, &options)?.mapv(|v| (v != 0.0) != invert))
    })
}

/// Hard labels of a categorical input
pub(crate) fn classification_array(input: &Input, padded: &PaddedSubgrid) -> Result<Array2<u32>> {
    Ok(classification_from_fraction_array(fraction_array(input, padded)?.view()))
}

/// Class fractions of a categorical input, thresholds applied
pub(crate) fn fraction_array(input: &Input, padded: &PaddedSubgrid) -> Result<Array3<f64>> {
    match &input.object {
        FlowObject::Fraction(fraction) => {
            let ds = input.raster()?;
            let no_data = ds.no_data_values();
            let params = fraction.params;
            padded_bands(padded, |grid| {
                let bands = (0..ds.band_count())
                    .map(|band| {
                        let nd = no_data.get(band).copied().flatten();
                        read_footprint_mean(ds.as_ref(), band, grid, |v| {
                            if is_no_data(v, nd) || v < 0.0 {
                                0.0
                            } else {
                                v
                            }
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut fractions = stack(bands, grid.shape());
                apply_thresholds(&mut fractions, params);
                let fills = vec![Fraction::NO_DATA; fractions.dim().0];
                Ok((fractions, fills))
            })
        }
        FlowObject::Classification(classification) => {
            let ds = input.raster()?;
            let classes = classification.class_definition.classes();
            let labels: Vec<f64> = (1..=classes).map(|label| label as f64).collect();
            let params = classification.params;
            padded_bands(padded, |grid| {
                let mut fractions = read_category_fractions(ds.as_ref(), 0, grid, &labels)?;
                apply_thresholds(&mut fractions, params);
                Ok((fractions, vec![Fraction::NO_DATA; classes]))
            })
        }
        FlowObject::VectorClassification(classification) => {
            let ds = input.vector()?;
            let classes = classification.class_definition.classes();
            padded_bands(padded, |grid| {
                let fractions = vector_class_fractions(classification, ds.as_ref(), grid)?;
                Ok((fractions, vec![Fraction::NO_DATA; classes]))
            })
        }
        _ => Err(unsupported(input, "class fractions")),
    }
}

fn apply_thresholds(fractions: &mut Array3<f64>, params: ClassificationParams) {
    apply_fraction_thresholds(fractions, params.min_overall_coverage, params.min_dominant_coverage);
}

/// Class fractions of a vector classification: only classes present in the
/// tile are rasterized, at `oversampling` times the resolution.
fn vector_class_fractions(vc: &VectorClassification, ds: &dyn VectorDataset, grid: &Grid) -> Result<Array3<f64>> {
    let classes = vc.class_definition.classes();
    let (rows, cols) = grid.shape();
    let present: Vec<usize> = ds
        .unique_values(&vc.class_attribute, Some(grid.extent()))?
        .into_iter()
        .filter(|v| v.fract() == 0.0 && *v >= 1.0 && *v <= classes as f64)
        .map(|v| v as usize)
        .collect();
    if present.is_empty() {
        return Ok(Array3::from_elem((classes, rows, cols), Fraction::NO_DATA));
    }

    let factor = vc.params.oversampling;
    let fine = if factor == 1 {
        grid.clone()
    } else {
        grid.with_resolution(grid.resolution().oversampled(factor))?
    };
    let mut fractions = Array3::zeros((classes, rows, cols));
    for label in present {
        let options = RasterizeOptions {
            init_value: 0.0,
            burn_value: 1.0,
            burn_attribute: None,
            all_touched: vc.vector.params.all_touched,
            filter: Some(FeatureFilter::equals(vc.class_attribute.clone(), label as f64)),
        };
        let membership = ds.rasterize(&fine, &options)?;
        fractions
            .index_axis_mut(Axis(0), label - 1)
            .assign(&block_mean(membership.view(), factor)?);
    }
    apply_fraction_thresholds(
        &mut fractions,
        vc.params.min_overall_coverage,
        vc.params.min_dominant_coverage,
    );
    Ok(fractions)
}

/// Average-resampled regression bands. A pixel where any band's valid
/// coverage does not exceed the threshold gets no data in all bands.
pub(crate) fn regression_array(input: &Input, padded: &PaddedSubgrid) -> Result<Array3<f64>> {
    let FlowObject::Regression(regression) = &input.object else {
        return Err(unsupported(input, "a regression"));
    };
    let ds = input.raster()?;
    let no_data = regression_no_data_values(regression, ds.as_ref())?;
    let threshold = coverage_threshold(regression.params.min_overall_coverage);
    padded_bands(padded, |grid| {
        let mut bands = Vec::with_capacity(no_data.len());
        let mut valid = Array2::from_elem(grid.shape(), true);
        for (band, &nd) in no_data.iter().enumerate() {
            let coverage = read_valid_fraction(ds.as_ref(), band, grid, Some(nd))?;
            let sum = read_footprint_mean(ds.as_ref(), band, grid, |v| if is_no_data(v, Some(nd)) { 0.0 } else { v })?;
            Zip::from(&mut valid).and(&coverage).for_each(|ok, &f| *ok &= f > threshold);
            bands.push(Zip::from(&sum).and(&coverage).map_collect(|&s, &f| if f > 0.0 { s / f } else { nd }));
        }
        let mut array = stack(bands, grid.shape());
        for (mut band, &nd) in array.outer_iter_mut().zip(&no_data) {
            Zip::from(&mut band).and(&valid).for_each(|v, &ok| {
                if !ok {
                    *v = nd;
                }
            });
        }
        Ok((array, no_data.clone()))
    })
}
