//! Vector-backed flow objects, rasterized on demand

use crate::class_definition::ClassDefinition;
use hubflow_core::vector::{FeatureFilter, RasterizeOptions};
use hubflow_core::DataType;
use serde::{Deserialize, Serialize};

/// Rasterization parameters of a vector layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    pub init_value: f64,
    pub burn_value: f64,
    pub burn_attribute: Option<String>,
    pub all_touched: bool,
    pub filter: Option<FeatureFilter>,
    /// Data type values are cast to after rasterization
    pub data_type: DataType,
    pub no_data_value: Option<f64>,
}

impl Default for VectorParams {
    fn default() -> Self {
        Self {
            init_value: 0.0,
            burn_value: 1.0,
            burn_attribute: None,
            all_touched: false,
            filter: None,
            data_type: DataType::U8,
            no_data_value: None,
        }
    }
}

impl VectorParams {
    pub(crate) fn rasterize_options(&self) -> RasterizeOptions {
        RasterizeOptions {
            init_value: self.init_value,
            burn_value: self.burn_value,
            burn_attribute: self.burn_attribute.clone(),
            all_touched: self.all_touched,
            filter: self.filter.clone(),
        }
    }
}

/// Handle to a vector layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub filename: String,
    pub params: VectorParams,
}

impl Vector {
    pub fn new(filename: impl Into<String>) -> Self {
        Self::with_params(filename, VectorParams::default())
    }

    pub fn with_params(filename: impl Into<String>, params: VectorParams) -> Self {
        Self {
            filename: filename.into(),
            params,
        }
    }
}

/// A vector layer used as a mask: valid inside the features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMask {
    pub vector: Vector,
    /// Valid outside the features instead
    pub invert: bool,
}

impl VectorMask {
    pub fn new(filename: impl Into<String>, invert: bool) -> Self {
        Self {
            vector: Vector::new(filename),
            invert,
        }
    }
}

/// Parameters of a vector classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorClassificationParams {
    pub min_overall_coverage: f64,
    pub min_dominant_coverage: f64,
    /// Supersampling factor used to derive class fractions
    pub oversampling: usize,
}

impl Default for VectorClassificationParams {
    fn default() -> Self {
        Self {
            min_overall_coverage: 0.5,
            min_dominant_coverage: 0.5,
            oversampling: 1,
        }
    }
}

/// A vector layer whose `class_attribute` holds class labels 1..=classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorClassification {
    pub vector: Vector,
    pub class_attribute: String,
    pub class_definition: ClassDefinition,
    pub params: VectorClassificationParams,
}

impl VectorClassification {
    pub fn new(filename: impl Into<String>, class_attribute: impl Into<String>, class_definition: ClassDefinition) -> Self {
        let class_attribute = class_attribute.into();
        let vector = Vector::with_params(
            filename,
            VectorParams {
                burn_attribute: Some(class_attribute.clone()),
                ..VectorParams::default()
            },
        );
        Self {
            vector,
            class_attribute,
            class_definition,
            params: VectorClassificationParams::default(),
        }
    }

    pub fn with_params(mut self, params: VectorClassificationParams) -> Self {
        self.params = params;
        self
    }
}
