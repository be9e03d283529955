//! In-memory raster datasets

use crate::error::{Error, Result};
use crate::grid::{Grid, PixelWindow};
use crate::io::{RasterDataset, RasterMetadata};
use crate::raster::{BandBuffer, DataType, RasterElement};
use ndarray::{Array2, Array3};

/// A raster held entirely in memory as (bands, rows, cols), in its own data
/// type
#[derive(Debug, Clone)]
pub struct MemRaster {
    filename: String,
    grid: Grid,
    data: BandBuffer,
    metadata: RasterMetadata,
}

impl MemRaster {
    /// Store `data` as `data_type`; its (rows, cols) must match `grid`
    pub fn new(grid: Grid, data: Array3<f64>, data_type: DataType) -> Result<Self> {
        Self::from_buffer(grid, BandBuffer::from_f64(data_type, data.view()))
    }

    pub fn from_buffer(grid: Grid, data: BandBuffer) -> Result<Self> {
        let (bands, rows, cols) = data.dim();
        if (rows, cols) != grid.shape() || bands == 0 {
            return Err(Error::dataset(format!(
                "array of shape ({}, {}, {}) does not fit a {}x{} grid",
                bands,
                rows,
                cols,
                grid.height(),
                grid.width()
            )));
        }
        Ok(Self {
            filename: String::new(),
            grid,
            data,
            metadata: RasterMetadata::with_bands(bands),
        })
    }

    /// Typed array; the data type follows the element type
    pub fn from_array<T: RasterElement>(grid: Grid, data: Array3<T>) -> Result<Self> {
        Self::from_buffer(grid, T::into_buffer(data))
    }

    /// Single band from a 2D array
    pub fn from_band<T: RasterElement>(grid: Grid, band: Array2<T>) -> Result<Self> {
        Self::from_array(grid, band.insert_axis(ndarray::Axis(0)))
    }

    /// Same no-data value for every band
    pub fn with_no_data_value(mut self, value: Option<f64>) -> Self {
        for band in 0..self.data.band_count() {
            self.metadata.band_mut(band).no_data_value = value;
        }
        self
    }

    pub fn with_no_data_values(mut self, values: &[Option<f64>]) -> Self {
        for (band, value) in values.iter().enumerate() {
            self.metadata.band_mut(band).no_data_value = *value;
        }
        self
    }

    pub fn with_metadata(mut self, metadata: RasterMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn set_filename(&mut self, filename: &str) {
        self.filename = filename.to_string();
    }

    pub fn buffer(&self) -> &BandBuffer {
        &self.data
    }

    pub fn metadata_mut(&mut self) -> &mut RasterMetadata {
        &mut self.metadata
    }
}

impl RasterDataset for MemRaster {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn band_count(&self) -> usize {
        self.data.band_count()
    }

    fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_band_window(&self, band: usize, window: PixelWindow) -> Result<Array2<f64>> {
        self.check_band(band)?;
        let (rows, cols) = self.grid.shape();
        if window.clip(rows, cols) != Some(window) {
            return Err(Error::dataset(format!(
                "window {:?} exceeds {}x{} raster '{}'",
                window, rows, cols, self.filename
            )));
        }
        Ok(self.data.read_window(
            band,
            window.row_off as usize,
            window.col_off as usize,
            window.rows,
            window.cols,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::Resolution;
    use crate::io::{read_band, read_category_fractions, read_valid_fraction};
    use crate::raster::ResampleAlg;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn raster() -> MemRaster {
        let grid = Grid::from_origin(0.0, 40.0, Resolution::square(10.0), 4, 4, Projection::from_epsg(32633))
            .unwrap();
        let band = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c + 1) as i16);
        MemRaster::from_band(grid, band).unwrap().with_no_data_value(Some(16.0))
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let grid = raster().grid().clone();
        assert!(MemRaster::new(grid, Array3::zeros((1, 3, 4)), DataType::F32).is_err());
    }

    #[test]
    fn test_typed_arrays_keep_their_type() {
        let grid = raster().grid().clone();
        let mask = MemRaster::from_band(grid.clone(), Array2::<u8>::ones((4, 4))).unwrap();
        assert_eq!(mask.data_type(), DataType::U8);
        assert_eq!(mask.buffer().byte_size(), 16);
        let wide = MemRaster::new(grid, Array3::from_elem((1, 4, 4), 2.7), DataType::I16).unwrap();
        assert_eq!(wide.buffer(), &BandBuffer::I16(Array3::from_elem((1, 4, 4), 3)));
    }

    #[test]
    fn test_window_bounds() {
        let r = raster();
        let w = r.read_band_window(0, PixelWindow::new(1, 2, 2, 2)).unwrap();
        assert_eq!(w, array![[7.0, 8.0], [11.0, 12.0]]);
        assert!(r.read_band_window(0, PixelWindow::new(3, 3, 2, 2)).is_err());
        assert!(matches!(
            r.read_band_window(1, PixelWindow::full(1, 1)),
            Err(Error::BandIndexOutOfRange { index: 1, bands: 1, .. })
        ));
    }

    #[test]
    fn test_read_band_outside_gets_no_data() {
        let r = raster();
        let dst = r.grid().subgrid(-1, 3, 2, 2).unwrap();
        let out = read_band(&r, 0, &dst, ResampleAlg::Nearest).unwrap();
        assert_eq!(out, array![[16.0, 16.0], [4.0, 16.0]]);
    }

    #[test]
    fn test_read_band_average_skips_no_data() {
        let r = raster();
        let coarse = r.grid().with_resolution(Resolution::square(20.0)).unwrap();
        let out = read_band(&r, 0, &coarse, ResampleAlg::Average).unwrap();
        assert_relative_eq!(out[(0, 0)], (1.0 + 2.0 + 5.0 + 6.0) / 4.0);
        assert_relative_eq!(out[(1, 1)], (11.0 + 12.0 + 15.0) / 3.0);
    }

    #[test]
    fn test_valid_fraction() {
        let r = raster();
        let coarse = r.grid().with_resolution(Resolution::square(20.0)).unwrap();
        let out = read_valid_fraction(&r, 0, &coarse, Some(16.0)).unwrap();
        assert_relative_eq!(out[(0, 0)], 1.0);
        assert_relative_eq!(out[(1, 1)], 0.75);
    }

    #[test]
    fn test_category_fractions_outside_is_empty() {
        let r = raster();
        let far = r.grid().subgrid(10, 10, 2, 2).unwrap();
        let out = read_category_fractions(&r, 0, &far, &[1.0, 2.0]).unwrap();
        assert_eq!(out.dim(), (2, 2, 2));
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
