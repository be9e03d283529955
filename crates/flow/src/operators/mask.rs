//! Deriving masks from raster values

use super::{native_grid, OUTPUT, RASTER};
use crate::applier::{Applier, ApplierConfig, Operator, TileContext};
use crate::objects::{Mask, MaskAggregation, Raster};
use crate::resolve::reduce;
use hubflow_core::io::Storage;
use hubflow_core::raster::resample::is_no_data;
use hubflow_core::{DataType, Result};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A value or a half-open value range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaskValue {
    Value(f64),
    Range(f64, f64),
}

impl MaskValue {
    pub fn matches(&self, value: f64) -> bool {
        match *self {
            MaskValue::Value(v) => value == v,
            MaskValue::Range(start, end) => value >= start && value < end,
        }
    }
}

/// Which raster values make a mask pixel valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskFromRasterParams {
    /// Values that set a pixel
    pub true_values: Vec<MaskValue>,
    /// Values that clear a pixel; applied after `true_values`
    pub false_values: Vec<MaskValue>,
    /// State of pixels matching neither list
    pub init_value: bool,
    /// Reduction of per-band masks
    pub aggregate: MaskAggregation,
}

impl Default for MaskFromRasterParams {
    fn default() -> Self {
        Self {
            true_values: Vec::new(),
            false_values: Vec::new(),
            init_value: false,
            aggregate: MaskAggregation::All,
        }
    }
}

/// Single-band `U8` mask (1 valid, 0 invalid, no-data 0) from the values of
/// [`RASTER`]. Native no-data pixels are always invalid.
#[derive(Debug, Clone, Default)]
pub struct MaskFromRaster {
    pub params: MaskFromRasterParams,
}

impl Operator for MaskFromRaster {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let array = ctx.flow_raster_array(RASTER, None, 0)?;
        let no_data = ctx.flow_no_data_values(RASTER)?;
        let shape = ctx.subgrid().shape();
        let params = &self.params;
        let masks = array
            .outer_iter()
            .enumerate()
            .map(|(b, band)| {
                let nd = no_data.get(b).copied().flatten();
                let mut mask = Array2::from_elem(shape, params.init_value);
                Zip::from(&mut mask).and(&band).for_each(|m, &v| {
                    if params.true_values.iter().any(|t| t.matches(v)) {
                        *m = true;
                    }
                    if params.false_values.iter().any(|f| f.matches(v)) {
                        *m = false;
                    }
                    if is_no_data(v, nd) {
                        *m = false;
                    }
                });
                mask
            })
            .collect();
        let mask = reduce(masks, params.aggregate, shape);
        ctx.set_output_band(OUTPUT, &mask.mapv(u8::from), DataType::U8, 0)?;
        ctx.set_output_no_data_value(OUTPUT, Some(0.0), 1)
    }
}

impl Mask {
    /// Write a mask derived from the values of `raster` to `filename`, on
    /// the raster's grid unless `config` overrides it.
    pub fn from_raster(
        storage: &Arc<Storage>,
        filename: &str,
        raster: &Raster,
        params: MaskFromRasterParams,
        config: ApplierConfig,
    ) -> Result<Mask> {
        let grid = native_grid(storage, &raster.filename)?;
        let mut applier = Applier::new(Arc::clone(storage), grid, config)?;
        applier.set_flow_raster(RASTER, raster.clone())?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&MaskFromRaster { params })?;
        Ok(Mask::new(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_and_ranges() {
        assert!(MaskValue::Value(3.0).matches(3.0));
        assert!(!MaskValue::Value(3.0).matches(3.5));
        assert!(MaskValue::Range(1.0, 16.0).matches(1.0));
        assert!(MaskValue::Range(1.0, 16.0).matches(15.9));
        assert!(!MaskValue::Range(1.0, 16.0).matches(16.0));
    }
}
