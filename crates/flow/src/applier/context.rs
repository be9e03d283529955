//! Per-tile view of the applier handed to `Operator::ufunc`

use super::inputs::{self, Input, Source};
use super::{Applier, Outputs};
use crate::class_definition::ClassDefinition;
use crate::metadata;
use crate::objects::{FlowObject, MaskAggregation};
use crate::resolve;
use hubflow_core::grid::{PaddedSubgrid, Subgrid};
use hubflow_core::io::{DriverSpec, RasterMetadata, RasterWriter};
use hubflow_core::{DataType, Error, Grid, Result};
use ndarray::{s, Array2, Array3, ArrayView3};

/// Inputs and outputs of the tile being processed.
///
/// Every flow array has the shape of the tile grown by the requested
/// `overlap` on every side, including at the processing grid boundary where
/// the border carries fill values rather than data.
pub struct TileContext<'a> {
    applier: &'a Applier,
    grid: &'a Grid,
    subgrid: &'a Subgrid,
    outputs: &'a Outputs,
}

impl<'a> TileContext<'a> {
    pub(super) fn new(applier: &'a Applier, grid: &'a Grid, subgrid: &'a Subgrid, outputs: &'a Outputs) -> Self {
        Self {
            applier,
            grid,
            subgrid,
            outputs,
        }
    }

    /// The tile
    pub fn subgrid(&self) -> &Subgrid {
        self.subgrid
    }

    /// The processing grid the tile belongs to
    pub fn grid(&self) -> &Grid {
        self.grid
    }

    /// The tile grown by `overlap` pixels
    pub fn padded(&self, overlap: usize) -> Result<PaddedSubgrid> {
        self.subgrid.padded(overlap, self.grid)
    }

    /// Flow object registered under `name`
    pub fn flow_object(&self, name: &str) -> Result<&FlowObject> {
        Ok(&self.input(name)?.object)
    }

    /// Native no-data values of a raster-backed input
    pub fn flow_no_data_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let input = self.input(name)?;
        match &input.source {
            Source::Raster(ds) => Ok(ds.no_data_values()),
            Source::Stack(members) => Ok(members.iter().flat_map(|(_, ds)| ds.no_data_values()).collect()),
            Source::Vector(_) => Err(Error::configuration(format!("input '{}' is not a raster", name))),
        }
    }

    /// Native data type of a raster-backed input; the widest member type
    /// for a raster stack
    pub fn flow_data_type(&self, name: &str) -> Result<DataType> {
        let input = self.input(name)?;
        match &input.source {
            Source::Raster(ds) => Ok(ds.data_type()),
            Source::Stack(members) => Ok(members
                .iter()
                .map(|(_, ds)| ds.data_type())
                .max_by(|a, b| a.max_value().total_cmp(&b.max_value()))
                .unwrap_or(DataType::F64)),
            Source::Vector(_) => Err(Error::configuration(format!("input '{}' is not a raster", name))),
        }
    }

    /// Per-band no-data values of a regression input
    pub fn flow_regression_no_data_values(&self, name: &str) -> Result<Vec<f64>> {
        let input = self.input(name)?;
        match (&input.object, &input.source) {
            (FlowObject::Regression(regression), Source::Raster(ds)) => {
                inputs::regression_no_data_values(regression, ds.as_ref())
            }
            _ => Err(Error::configuration(format!(
                "input '{}' ({}) is not a regression",
                name,
                input.object.kind()
            ))),
        }
    }

    /// Fail with [`Error::Canceled`] if the caller asked to stop.
    pub fn check_canceled(&self) -> Result<()> {
        match self.applier.progress() {
            Some(progress) if progress.is_canceled() => Err(Error::Canceled),
            _ => Ok(()),
        }
    }

    fn input(&self, name: &str) -> Result<&'a Input> {
        self.applier
            .inputs
            .get(name)
            .ok_or_else(|| Error::configuration(format!("no input named '{}'", name)))
    }

    fn resolve<T, F>(&self, name: &str, overlap: usize, f: F) -> Result<T>
    where
        F: FnOnce(&Input, &PaddedSubgrid) -> Result<T>,
    {
        let input = self.input(name)?;
        let padded = self.padded(overlap)?;
        f(input, &padded).map_err(|e| e.in_input(name))
    }

    /// Bands `indices` (0-based, all if `None`) of any raster-like input.
    /// Categorical inputs resolve to their labels, masks to 0/1.
    pub fn flow_raster_array(&self, name: &str, indices: Option<&[usize]>, overlap: usize) -> Result<Array3<f64>> {
        self.resolve(name, overlap, |input, padded| resolve::raster_array(input, indices, padded))
    }

    /// A vector input rasterized with its burn parameters, one band
    pub fn flow_vector_array(&self, name: &str, overlap: usize) -> Result<Array3<f64>> {
        self.resolve(name, overlap, resolve::vector_array)
    }

    /// Validity of the masks registered under `name`, bands of each mask
    /// combined with a logical and
    pub fn flow_mask_array(&self, name: &str, overlap: usize) -> Result<Array2<bool>> {
        self.flow_mask_array_with(name, MaskAggregation::All, overlap)
    }

    /// Validity of the masks registered under `name`.
    ///
    /// `aggregation` combines the bands of a multi-band mask; separate masks
    /// are always combined with a logical and, and no masks means nothing is
    /// masked. Inputs registered with `set_flow_input` and friends can be
    /// used as masks too.
    pub fn flow_mask_array_with(&self, name: &str, aggregation: MaskAggregation, overlap: usize) -> Result<Array2<bool>> {
        let padded = self.padded(overlap)?;
        let masks: Vec<&Input> = match self.applier.masks.get(name) {
            Some(masks) => masks.iter().collect(),
            None => vec![self.input(name)?],
        };
        let mut valid = Array2::from_elem(padded.grid.shape(), true);
        for input in masks {
            let mask = resolve::mask_array(input, aggregation, &padded).map_err(|e| e.in_input(name))?;
            valid.zip_mut_with(&mask, |v, &m| *v = *v && m);
        }
        Ok(valid)
    }

    /// Hard labels, 0 = unclassified
    pub fn flow_classification_array(&self, name: &str, overlap: usize) -> Result<Array2<u32>> {
        self.resolve(name, overlap, resolve::classification_array)
    }

    /// Class fractions, one band per class, -1 where coverage is too low
    pub fn flow_fraction_array(&self, name: &str, overlap: usize) -> Result<Array3<f64>> {
        self.resolve(name, overlap, resolve::fraction_array)
    }

    pub fn flow_regression_array(&self, name: &str, overlap: usize) -> Result<Array3<f64>> {
        self.resolve(name, overlap, resolve::regression_array)
    }

    /// Write `array` (bands, rows + 2 * overlap, cols + 2 * overlap) into
    /// output `name`. The overlap border is dropped. The first write decides
    /// band count and data type of the output.
    pub fn set_output_array(&self, name: &str, array: ArrayView3<f64>, data_type: DataType, overlap: usize) -> Result<()> {
        let (rows, cols) = self.subgrid.shape();
        let (bands, total_rows, total_cols) = array.dim();
        if total_rows != rows + 2 * overlap || total_cols != cols + 2 * overlap {
            return Err(Error::configuration(format!(
                "array of {}x{} pixels written to output '{}' for a {}x{} tile with overlap {}",
                total_rows, total_cols, name, rows, cols, overlap
            )));
        }
        let block = array.slice(s![.., overlap..overlap + rows, overlap..overlap + cols]);
        let slot = self.outputs.slot(name)?;
        let mut state = slot.lock()?;
        if state.writer.is_none() {
            state.writer = Some(self.create_writer(&slot.spec.filename, slot.spec.spec.clone(), bands, data_type)?);
        }
        match state.writer.as_mut() {
            Some(writer) => writer.write_window(block, self.subgrid.row_offset, self.subgrid.col_offset),
            None => Err(Error::dataset(format!("output '{}' has no writer", name))),
        }
    }

    /// Single-band convenience for [`set_output_array`](Self::set_output_array)
    pub fn set_output_band<T>(&self, name: &str, band: &Array2<T>, data_type: DataType, overlap: usize) -> Result<()>
    where
        T: Copy + Into<f64>,
    {
        let array = band.mapv(Into::into).insert_axis(ndarray::Axis(0));
        self.set_output_array(name, array.view(), data_type, overlap)
    }

    fn create_writer(&self, filename: &str, spec: DriverSpec, bands: usize, data_type: DataType) -> Result<RasterWriter> {
        tracing::debug!("Creating {} ({} band(s), {}, {})", filename, bands, data_type, spec.driver);
        RasterWriter::new(filename, spec, self.grid.clone(), bands, data_type)
    }

    fn with_metadata(&self, name: &str, f: impl FnOnce(&mut RasterMetadata)) -> Result<()> {
        let slot = self.outputs.slot(name)?;
        let mut state = slot.lock()?;
        f(&mut state.metadata);
        Ok(())
    }

    /// Same no-data value for every band of output `name`
    pub fn set_output_no_data_value(&self, name: &str, value: Option<f64>, bands: usize) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_no_data_values(m, &vec![value; bands]))
    }

    pub fn set_metadata_item(&self, name: &str, key: &str, value: &str, domain: &str) -> Result<()> {
        self.with_metadata(name, |m| m.set_item(key, value, domain))
    }

    pub fn set_flow_metadata_class_definition(&self, name: &str, definition: &ClassDefinition) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_class_definition(m, definition))
    }

    pub fn set_flow_metadata_fraction_definition(&self, name: &str, definition: &ClassDefinition) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_fraction_definition(m, definition))
    }

    pub fn set_flow_metadata_regression_definition(
        &self,
        name: &str,
        no_data_values: &[f64],
        output_names: &[String],
    ) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_regression_definition(m, no_data_values, output_names))
    }

    pub fn set_flow_metadata_band_names(&self, name: &str, names: &[String]) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_band_names(m, names))
    }

    pub fn set_flow_metadata_no_data_values(&self, name: &str, values: &[Option<f64>]) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_no_data_values(m, values))
    }

    /// Wavelengths and FWHMs in nanometers
    pub fn set_flow_metadata_sensor_definition(
        &self,
        name: &str,
        wavelengths: &[f64],
        fwhms: Option<&[f64]>,
    ) -> Result<()> {
        self.with_metadata(name, |m| metadata::stamp_sensor_definition(m, wavelengths, fwhms, "Nanometers"))
    }
}
