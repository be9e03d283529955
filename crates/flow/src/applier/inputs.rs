//! Opening and validating registered inputs

use crate::objects::{FlowObject, Mask, Raster, Regression};
use hubflow_core::io::{RasterDataset, Storage};
use hubflow_core::vector::VectorDataset;
use hubflow_core::{Error, Result};
use std::sync::Arc;

/// Datasets behind a registered flow object
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Raster(Arc<dyn RasterDataset>),
    Stack(Vec<(Raster, Arc<dyn RasterDataset>)>),
    Vector(Arc<dyn VectorDataset>),
}

/// A flow object registered under a name, with its datasets opened
#[derive(Debug, Clone)]
pub(crate) struct Input {
    pub name: String,
    pub object: FlowObject,
    pub source: Source,
}

impl Input {
    pub fn raster(&self) -> Result<&Arc<dyn RasterDataset>> {
        match &self.source {
            Source::Raster(ds) => Ok(ds),
            _ => Err(Error::configuration(format!(
                "input '{}' ({}) is not backed by a single raster",
                self.name,
                self.object.kind()
            ))),
        }
    }

    pub fn vector(&self) -> Result<&Arc<dyn VectorDataset>> {
        match &self.source {
            Source::Vector(ds) => Ok(ds),
            _ => Err(Error::configuration(format!(
                "input '{}' ({}) is not backed by a vector layer",
                self.name,
                self.object.kind()
            ))),
        }
    }
}

fn check_indices(ds: &dyn RasterDataset, indices: &[usize]) -> Result<()> {
    indices.iter().try_for_each(|&i| ds.check_band(i))
}

fn check_no_data_count(ds: &dyn RasterDataset, values: &[f64]) -> Result<()> {
    if values.len() != ds.band_count() {
        return Err(Error::configuration(format!(
            "{} no-data value(s) given for {} band(s) of '{}'",
            values.len(),
            ds.band_count(),
            ds.filename()
        )));
    }
    Ok(())
}

/// No-data values of a mask's selected bands; every selected band needs one.
pub(crate) fn mask_no_data_values(mask: &Mask, ds: &dyn RasterDataset) -> Result<Vec<f64>> {
    let values: Vec<Option<f64>> = match &mask.params.no_data_values {
        Some(values) => values.iter().copied().map(Some).collect(),
        None => ds.no_data_values(),
    };
    let indices: Vec<usize> = match &mask.params.indices {
        Some(indices) => indices.clone(),
        None => (0..ds.band_count()).collect(),
    };
    indices
        .iter()
        .map(|&i| {
            values.get(i).copied().flatten().ok_or_else(|| {
                Error::configuration(format!(
                    "mask '{}' has no no-data value for band {}",
                    mask.filename,
                    i + 1
                ))
            })
        })
        .collect()
}

/// Per-band no-data values of a regression; every band needs one.
pub(crate) fn regression_no_data_values(regression: &Regression, ds: &dyn RasterDataset) -> Result<Vec<f64>> {
    match &regression.params.no_data_values {
        Some(values) => Ok(values.clone()),
        None => ds
            .no_data_values()
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    Error::configuration(format!(
                        "regression '{}' has no no-data value for band {}",
                        regression.filename,
                        i + 1
                    ))
                })
            })
            .collect(),
    }
}

fn check_vector_fields(ds: &dyn VectorDataset, params: &crate::objects::VectorParams) -> Result<()> {
    if let Some(attribute) = &params.burn_attribute {
        ds.check_field(attribute)?;
    }
    if let Some(filter) = &params.filter {
        ds.check_field(filter.attribute())?;
    }
    Ok(())
}

/// Open the datasets of `object` and check its variant-specific invariants.
pub(crate) fn open(storage: &Storage, name: &str, object: FlowObject) -> Result<Input> {
    let source = open_source(storage, &object).map_err(|e| e.in_input(name))?;
    Ok(Input {
        name: name.to_string(),
        object,
        source,
    })
}

fn open_source(storage: &Storage, object: &FlowObject) -> Result<Source> {
    match object {
        FlowObject::Raster(raster) => Ok(Source::Raster(storage.open_raster(&raster.filename)?)),
        FlowObject::Mask(mask) => {
            let ds = storage.open_raster(&mask.filename)?;
            if let Some(indices) = &mask.params.indices {
                check_indices(ds.as_ref(), indices)?;
            }
            if let Some(values) = &mask.params.no_data_values {
                check_no_data_count(ds.as_ref(), values)?;
            }
            mask_no_data_values(mask, ds.as_ref())?;
            Ok(Source::Raster(ds))
        }
        FlowObject::Classification(classification) => {
            let ds = storage.open_raster(&classification.filename)?;
            if ds.band_count() != 1 {
                return Err(Error::configuration(format!(
                    "classification '{}' has {} bands, expected 1",
                    classification.filename,
                    ds.band_count()
                )));
            }
            Ok(Source::Raster(ds))
        }
        FlowObject::Fraction(fraction) => {
            let ds = storage.open_raster(&fraction.filename)?;
            let classes = fraction.class_definition.classes();
            if ds.band_count() != classes {
                return Err(Error::configuration(format!(
                    "fraction '{}' has {} bands but {} classes",
                    fraction.filename,
                    ds.band_count(),
                    classes
                )));
            }
            Ok(Source::Raster(ds))
        }
        FlowObject::Regression(regression) => {
            let ds = storage.open_raster(&regression.filename)?;
            if let Some(values) = &regression.params.no_data_values {
                check_no_data_count(ds.as_ref(), values)?;
            }
            regression_no_data_values(regression, ds.as_ref())?;
            if let Some(names) = &regression.params.output_names {
                if names.len() != ds.band_count() {
                    return Err(Error::configuration(format!(
                        "{} output name(s) given for {} band(s) of '{}'",
                        names.len(),
                        ds.band_count(),
                        regression.filename
                    )));
                }
            }
            Ok(Source::Raster(ds))
        }
        FlowObject::RasterStack(stack) => {
            let members = stack
                .rasters()
                .iter()
                .map(|raster| Ok((raster.clone(), storage.open_raster(&raster.filename)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Source::Stack(members))
        }
        FlowObject::Vector(vector) => {
            let ds = storage.open_vector(&vector.filename)?;
            check_vector_fields(ds.as_ref(), &vector.params)?;
            Ok(Source::Vector(ds))
        }
        FlowObject::VectorMask(mask) => {
            let ds = storage.open_vector(&mask.vector.filename)?;
            check_vector_fields(ds.as_ref(), &mask.vector.params)?;
            Ok(Source::Vector(ds))
        }
        FlowObject::VectorClassification(classification) => {
            let ds = storage.open_vector(&classification.vector.filename)?;
            ds.check_field(&classification.class_attribute)?;
            if classification.params.oversampling == 0 {
                return Err(Error::InvalidParameter {
                    name: "oversampling",
                    value: "0".into(),
                    reason: "must be at least 1".into(),
                });
            }
            Ok(Source::Vector(ds))
        }
    }
}
