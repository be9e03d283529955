//! Read side of the raster backend
//!
//! A dataset only has to hand out in-bounds windows of its bands at native
//! resolution. Placing those windows into a foreign grid (offsets, other
//! resolutions, pixels outside the dataset) is done once, here, for every
//! backend.

use crate::error::{Error, Result};
use crate::grid::{Grid, PixelWindow};
use crate::io::RasterMetadata;
use crate::raster::resample::{self, is_no_data, ResampleAlg};
use crate::raster::DataType;
use ndarray::{Array2, Array3};
use std::fmt::Debug;

/// An opened, read-only raster dataset
pub trait RasterDataset: Debug + Send + Sync {
    fn filename(&self) -> &str;

    fn grid(&self) -> &Grid;

    fn band_count(&self) -> usize;

    fn data_type(&self) -> DataType;

    fn metadata(&self) -> &RasterMetadata;

    /// Per-band no-data values
    fn no_data_values(&self) -> Vec<Option<f64>> {
        let mut values = self.metadata().no_data_values();
        values.resize(self.band_count(), None);
        values
    }

    /// Read a window of band `band` (0-based). The window must lie inside
    /// the dataset.
    fn read_band_window(&self, band: usize, window: PixelWindow) -> Result<Array2<f64>>;

    /// Fail unless `band` is a valid 0-based band index.
    fn check_band(&self, band: usize) -> Result<()> {
        if band >= self.band_count() {
            return Err(Error::BandIndexOutOfRange {
                name: self.filename().to_string(),
                index: band,
                bands: self.band_count(),
            });
        }
        Ok(())
    }
}

/// Native pixels of `band` covering `dst`, with the grid describing them.
/// `None` if `dst` does not touch the dataset.
fn source_window(ds: &dyn RasterDataset, band: usize, dst: &Grid) -> Result<Option<(Array2<f64>, Grid)>> {
    ds.check_band(band)?;
    let grid = ds.grid();
    grid.extent().check_projection(dst.projection())?;
    let (rows, cols) = grid.shape();
    let window = match grid.window_covering(dst.extent()).clip(rows, cols) {
        Some(window) => window,
        None => return Ok(None),
    };
    let data = ds.read_band_window(band, window)?;
    let window_grid = grid.subgrid(window.row_off, window.col_off, window.rows, window.cols)?;
    Ok(Some((data, window_grid)))
}

/// Band `band` of `ds` resampled into `dst`.
///
/// Pixels without source data receive the band's no-data value, or 0 if the
/// band has none.
pub fn read_band(ds: &dyn RasterDataset, band: usize, dst: &Grid, alg: ResampleAlg) -> Result<Array2<f64>> {
    let no_data = ds.no_data_values().get(band).copied().flatten();
    let fill = no_data.unwrap_or(0.0);
    let Some((src, src_grid)) = source_window(ds, band, dst)? else {
        return Ok(Array2::from_elem(dst.shape(), fill));
    };
    Ok(match alg {
        ResampleAlg::Nearest => resample::nearest(src.view(), &src_grid, dst, fill),
        ResampleAlg::Average => resample::average(src.view(), &src_grid, dst, no_data, fill),
    })
}

/// Share of every `dst` pixel's footprint covered by valid (not `no_data`)
/// pixels of `band`; area outside the dataset counts as invalid.
pub fn read_valid_fraction(
    ds: &dyn RasterDataset,
    band: usize,
    dst: &Grid,
    no_data: Option<f64>,
) -> Result<Array2<f64>> {
    let Some((src, src_grid)) = source_window(ds, band, dst)? else {
        return Ok(Array2::zeros(dst.shape()));
    };
    Ok(resample::coverage(src.view(), &src_grid, dst, |v| {
        !is_no_data(v, no_data)
    }))
}

/// One band per category holding the share of every `dst` pixel's footprint
/// covered by source pixels of that category.
pub fn read_category_fractions(
    ds: &dyn RasterDataset,
    band: usize,
    dst: &Grid,
    categories: &[f64],
) -> Result<Array3<f64>> {
    let Some((src, src_grid)) = source_window(ds, band, dst)? else {
        let (rows, cols) = dst.shape();
        return Ok(Array3::zeros((categories.len(), rows, cols)));
    };
    Ok(resample::category_fractions(src.view(), &src_grid, dst, categories))
}

/// Area-weighted mean of `value(pixel)` of `band` over every `dst` pixel's
/// whole footprint; area outside the dataset contributes zero.
pub fn read_footprint_mean<F>(ds: &dyn RasterDataset, band: usize, dst: &Grid, value: F) -> Result<Array2<f64>>
where
    F: Fn(f64) -> f64,
{
    let Some((src, src_grid)) = source_window(ds, band, dst)? else {
        return Ok(Array2::zeros(dst.shape()));
    };
    Ok(resample::footprint_mean(src.view(), &src_grid, dst, value))
}
