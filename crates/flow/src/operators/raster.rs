//! Raster operators: resampling, convolution, statistics, masking and pixel
//! extraction

use super::{applier_with_masks, profiles, stack_rows, MASK, OUTPUT, RASTER};
use crate::applier::{Aggregate, Applier, ApplierConfig, Operator, TileContext};
use crate::objects::{FlowObject, Raster};
use hubflow_core::io::Storage;
use hubflow_core::raster::resample::is_no_data;
use hubflow_core::{DataType, Error, Grid, Result};
use ndarray::{s, Array2, Array3, Zip};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Copy all bands of [`RASTER`] into [`OUTPUT`] on the processing grid
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterResample;

impl Operator for RasterResample {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let array = ctx.flow_raster_array(RASTER, None, 0)?;
        let data_type = ctx.flow_data_type(RASTER)?;
        ctx.set_output_array(OUTPUT, array.view(), data_type, 0)?;
        ctx.set_flow_metadata_no_data_values(OUTPUT, &ctx.flow_no_data_values(RASTER)?)
    }
}

/// 2-D convolution of every band of [`RASTER`] with `kernel`.
///
/// A pixel whose kernel footprint touches a no-data value (including the
/// fill outside the grid) becomes no-data. Output is `F32`.
#[derive(Debug, Clone)]
pub struct RasterConvolve {
    kernel: Array2<f64>,
}

impl RasterConvolve {
    /// `kernel` needs odd, non-zero dimensions
    pub fn new(kernel: Array2<f64>) -> Result<Self> {
        let (rows, cols) = kernel.dim();
        if rows % 2 == 0 || cols % 2 == 0 {
            return Err(Error::InvalidParameter {
                name: "kernel",
                value: format!("{}x{}", rows, cols),
                reason: "kernel dimensions must be odd".into(),
            });
        }
        Ok(Self { kernel })
    }

    /// Normalized `size`x`size` box kernel
    pub fn mean(size: usize) -> Result<Self> {
        let n = (size * size) as f64;
        Self::new(Array2::from_elem((size, size), 1.0 / n))
    }

    pub fn kernel(&self) -> &Array2<f64> {
        &self.kernel
    }

    /// Pixels of context needed around a tile
    pub fn overlap(&self) -> usize {
        let (rows, cols) = self.kernel.dim();
        (rows / 2).max(cols / 2)
    }
}

impl Operator for RasterConvolve {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let overlap = self.overlap();
        let array = ctx.flow_raster_array(RASTER, None, overlap)?;
        let no_data = ctx.flow_no_data_values(RASTER)?;
        let (rows, cols) = ctx.subgrid().shape();
        let (kr, kc) = self.kernel.dim();
        let (r_off, c_off) = (overlap - kr / 2, overlap - kc / 2);
        let flipped = self.kernel.slice(s![..;-1, ..;-1]);

        let mut out = Array3::<f64>::zeros((array.dim().0, rows, cols));
        for (b, (band, mut target)) in array.outer_iter().zip(out.outer_iter_mut()).enumerate() {
            let nd = no_data.get(b).copied().flatten();
            let fill = nd.unwrap_or(f64::NAN);
            for ((r, c), value) in target.indexed_iter_mut() {
                let window = band.slice(s![r + r_off..r + r_off + kr, c + c_off..c + c_off + kc]);
                *value = if window.iter().any(|&v| is_no_data(v, nd)) {
                    fill
                } else {
                    Zip::from(&window).and(&flipped).fold(0.0, |acc, &v, &k| acc + v * k)
                };
            }
            ctx.check_canceled()?;
        }
        let no_data: Vec<Option<f64>> = no_data.iter().map(|nd| Some(nd.unwrap_or(f64::NAN))).collect();
        ctx.set_output_array(OUTPUT, out.view(), DataType::F32, 0)?;
        ctx.set_flow_metadata_no_data_values(OUTPUT, &no_data)
    }
}

/// Running moments of one band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Default for BandAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl BandAccumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &BandAccumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Statistics of one band over its valid, unmasked pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl From<BandAccumulator> for BandStatistics {
    fn from(acc: BandAccumulator) -> Self {
        if acc.count == 0 {
            return Self {
                count: 0,
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                std_dev: f64::NAN,
            };
        }
        let n = acc.count as f64;
        let mean = acc.sum / n;
        let variance = (acc.sum_sq / n - mean * mean).max(0.0);
        Self {
            count: acc.count,
            min: acc.min,
            max: acc.max,
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

/// Per-band statistics of [`RASTER`] where [`MASK`] is valid
#[derive(Debug, Clone, Default)]
pub struct RasterStatistics {
    /// 0-based bands; all if `None`
    pub indices: Option<Vec<usize>>,
}

impl Operator for RasterStatistics {
    type Block = Vec<BandAccumulator>;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<Vec<BandAccumulator>> {
        let array = ctx.flow_raster_array(RASTER, self.indices.as_deref(), 0)?;
        let native = ctx.flow_no_data_values(RASTER)?;
        let no_data: Vec<Option<f64>> = match &self.indices {
            Some(indices) => indices.iter().map(|&i| native.get(i).copied().flatten()).collect(),
            None => native,
        };
        let valid = ctx.flow_mask_array(MASK, 0)?;
        Ok(array
            .outer_iter()
            .enumerate()
            .map(|(b, band)| {
                let nd = no_data.get(b).copied().flatten();
                let mut acc = BandAccumulator::default();
                Zip::from(&band).and(&valid).for_each(|&v, &ok| {
                    if ok && !is_no_data(v, nd) {
                        acc.push(v);
                    }
                });
                acc
            })
            .collect())
    }
}

impl Aggregate for RasterStatistics {
    type Output = Vec<BandStatistics>;

    fn aggregate(&self, blocks: Vec<Vec<BandAccumulator>>, _grid: &Grid) -> Result<Vec<BandStatistics>> {
        let mut total: Vec<BandAccumulator> = Vec::new();
        for block in &blocks {
            total.resize(block.len().max(total.len()), BandAccumulator::default());
            for (acc, tile) in total.iter_mut().zip(block) {
                acc.merge(tile);
            }
        }
        Ok(total.into_iter().map(BandStatistics::from).collect())
    }
}

/// [`RASTER`] with pixels outside [`MASK`] set to no-data
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterApplyMask {
    /// Value for masked pixels; the band no-data value if `None`
    pub fill_value: Option<f64>,
}

impl Operator for RasterApplyMask {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let mut array = ctx.flow_raster_array(RASTER, None, 0)?;
        let no_data = ctx.flow_no_data_values(RASTER)?;
        let fills = no_data
            .iter()
            .enumerate()
            .map(|(b, nd)| {
                self.fill_value.or(*nd).ok_or_else(|| {
                    Error::configuration(format!(
                        "band {} of '{}' has no no-data value and no fill value is given",
                        b + 1,
                        RASTER
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        let valid = ctx.flow_mask_array(MASK, 0)?;
        for (mut band, &fill) in array.outer_iter_mut().zip(&fills) {
            Zip::from(&mut band).and(&valid).for_each(|v, &ok| {
                if !ok {
                    *v = fill;
                }
            });
        }
        let data_type = ctx.flow_data_type(RASTER)?;
        ctx.set_output_array(OUTPUT, array.view(), data_type, 0)?;
        let fills: Vec<Option<f64>> = fills.into_iter().map(Some).collect();
        ctx.set_flow_metadata_no_data_values(OUTPUT, &fills)
    }
}

/// Band profiles of the [`RASTER`] pixels selected by [`MASK`], in
/// row-major order within each tile and tile order across tiles
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractPixels;

impl Operator for ExtractPixels {
    type Block = Array2<f64>;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<Array2<f64>> {
        let array = ctx.flow_raster_array(RASTER, None, 0)?;
        let valid = ctx.flow_mask_array(MASK, 0)?;
        Ok(profiles(array.view(), &valid))
    }
}

impl Aggregate for ExtractPixels {
    type Output = Array2<f64>;

    /// (pixels, bands)
    fn aggregate(&self, blocks: Vec<Array2<f64>>, _grid: &Grid) -> Result<Array2<f64>> {
        let columns = blocks.first().map(|b| b.ncols()).unwrap_or(0);
        stack_rows(blocks, columns)
    }
}

fn raster_applier(
    raster: &Raster,
    storage: &Arc<Storage>,
    grid: &Grid,
    mask: Option<FlowObject>,
    config: ApplierConfig,
) -> Result<Applier> {
    let mut applier = applier_with_masks(storage, grid, mask, config)?;
    applier.set_flow_raster(RASTER, raster.clone())?;
    Ok(applier)
}

impl Raster {
    /// Resample into `grid` and write the result to `filename`.
    pub fn resample(&self, storage: &Arc<Storage>, filename: &str, grid: &Grid, config: ApplierConfig) -> Result<Raster> {
        let mut applier = raster_applier(self, storage, grid, None, config)?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&RasterResample)?;
        Ok(Raster::new(filename).with_resample_alg(self.resample_alg))
    }

    /// Convolve every band with `kernel` on the raster's own grid.
    pub fn convolve(
        &self,
        storage: &Arc<Storage>,
        filename: &str,
        kernel: Array2<f64>,
        config: ApplierConfig,
    ) -> Result<Raster> {
        let operator = RasterConvolve::new(kernel)?;
        let grid = super::native_grid(storage, &self.filename)?;
        let mut applier = raster_applier(self, storage, &grid, None, config)?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&operator)?;
        Ok(Raster::new(filename))
    }

    /// Per-band statistics over the raster's own grid, restricted to `mask`.
    pub fn statistics(
        &self,
        storage: &Arc<Storage>,
        mask: Option<FlowObject>,
        config: ApplierConfig,
    ) -> Result<Vec<BandStatistics>> {
        let grid = super::native_grid(storage, &self.filename)?;
        let applier = raster_applier(self, storage, &grid, mask, config)?;
        applier.apply_aggregate(&RasterStatistics::default())
    }

    /// Copy of the raster with pixels outside `mask` set to no-data.
    pub fn apply_mask(
        &self,
        storage: &Arc<Storage>,
        filename: &str,
        mask: FlowObject,
        fill_value: Option<f64>,
        config: ApplierConfig,
    ) -> Result<Raster> {
        let grid = super::native_grid(storage, &self.filename)?;
        let mut applier = raster_applier(self, storage, &grid, Some(mask), config)?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&RasterApplyMask { fill_value })?;
        Ok(Raster::new(filename).with_resample_alg(self.resample_alg))
    }

    /// Profiles (pixels, bands) of the pixels selected by `mask` on `grid`.
    pub fn extract_pixels(
        &self,
        storage: &Arc<Storage>,
        grid: &Grid,
        mask: FlowObject,
        config: ApplierConfig,
    ) -> Result<Array2<f64>> {
        let applier = raster_applier(self, storage, grid, Some(mask), config)?;
        applier.apply_aggregate(&ExtractPixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Mask;
    use approx::assert_relative_eq;
    use hubflow_core::io::MemRaster;
    use hubflow_core::{BlockSize, PixelWindow, Projection, Resolution};
    use ndarray::array;

    fn grid(size: usize) -> Grid {
        Grid::from_origin(0.0, size as f64, Resolution::square(1.0), size, size, Projection::from_epsg(3035)).unwrap()
    }

    fn storage_with(name: &str, band: Array2<f64>, no_data: Option<f64>) -> Arc<Storage> {
        let storage = Storage::shared();
        let size = band.nrows();
        let raster = MemRaster::from_band(grid(size), band).unwrap().with_no_data_value(no_data);
        storage.insert_raster(name, raster).unwrap();
        storage
    }

    fn small_tiles() -> ApplierConfig {
        ApplierConfig::default().with_block_size(BlockSize::new(2, 3))
    }

    #[test]
    fn test_statistics_skip_no_data() {
        let band = array![[1.0, 2.0, 3.0], [4.0, -9.0, 6.0], [7.0, 8.0, 9.0]];
        let storage = storage_with("/vsimem/r", band, Some(-9.0));
        let stats = Raster::new("/vsimem/r").statistics(&storage, None, small_tiles()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 8);
        assert_relative_eq!(stats[0].mean, 5.0);
        assert_relative_eq!(stats[0].min, 1.0);
        assert_relative_eq!(stats[0].max, 9.0);
        assert_relative_eq!(stats[0].std_dev, 7.5f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_convolve_box_kernel() {
        let band = Array2::from_elem((5, 5), 2.0);
        let storage = storage_with("/vsimem/r", band, Some(-1.0));
        let out = Raster::new("/vsimem/r")
            .convolve(&storage, "/vsimem/out", Array2::from_elem((3, 3), 1.0 / 9.0), small_tiles())
            .unwrap();
        let ds = storage.open_raster(&out.filename).unwrap();
        let values = ds.read_band_window(0, PixelWindow::full(5, 5)).unwrap();
        assert_relative_eq!(values[(2, 2)], 2.0, epsilon = 1e-6);
        // edge pixels see the no-data fill outside the grid
        assert_eq!(values[(0, 0)], -1.0);
        assert_eq!(ds.no_data_values(), vec![Some(-1.0)]);
    }

    #[test]
    fn test_convolve_edges_without_no_data_value() {
        let band = Array2::from_elem((5, 5), 2.0);
        let storage = storage_with("/vsimem/r", band, None);
        let out = Raster::new("/vsimem/r")
            .convolve(&storage, "/vsimem/out", Array2::from_elem((3, 3), 1.0 / 9.0), small_tiles())
            .unwrap();
        let ds = storage.open_raster(&out.filename).unwrap();
        let values = ds.read_band_window(0, PixelWindow::full(5, 5)).unwrap();
        assert_relative_eq!(values[(1, 1)], 2.0, epsilon = 1e-6);
        assert!(values[(0, 0)].is_nan());
        assert!(values[(4, 2)].is_nan());
        assert!(ds.no_data_values()[0].is_some_and(f64::is_nan));
    }

    #[test]
    fn test_convolve_rejects_even_kernel() {
        assert!(RasterConvolve::new(Array2::zeros((2, 3))).is_err());
        assert_eq!(RasterConvolve::mean(5).unwrap().overlap(), 2);
    }

    #[test]
    fn test_extract_pixels_in_tile_order() {
        let band = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        let storage = storage_with("/vsimem/r", band, None);
        let mask = MemRaster::from_band(grid(4), Array2::from_elem((4, 4), 1u8)).unwrap().with_no_data_value(Some(0.0));
        storage.insert_raster("/vsimem/m", mask).unwrap();
        let config = ApplierConfig::default().with_block_size(BlockSize::new(2, 2));
        let pixels = Raster::new("/vsimem/r")
            .extract_pixels(&storage, &grid(4), Mask::new("/vsimem/m").into(), config)
            .unwrap();
        assert_eq!(pixels.dim(), (16, 1));
        let order: Vec<f64> = pixels.column(0).to_vec();
        assert_eq!(&order[..4], &[0.0, 1.0, 4.0, 5.0]);
        assert_eq!(&order[4..8], &[2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn test_apply_mask_fills() {
        let band = array![[1.0, 2.0], [3.0, 4.0]];
        let storage = storage_with("/vsimem/r", band, Some(0.0));
        let mask = MemRaster::from_band(grid(2), array![[1u8, 0], [1, 1]]).unwrap().with_no_data_value(Some(0.0));
        storage.insert_raster("/vsimem/m", mask).unwrap();
        let out = Raster::new("/vsimem/r")
            .apply_mask(&storage, "/vsimem/out", Mask::new("/vsimem/m").into(), None, ApplierConfig::default())
            .unwrap();
        let values = storage.open_raster(&out.filename).unwrap().read_band_window(0, PixelWindow::full(2, 2)).unwrap();
        assert_eq!(values, array![[1.0, 0.0], [3.0, 4.0]]);
    }
}
