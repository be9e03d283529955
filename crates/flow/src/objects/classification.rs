//! Categorical and soft-categorical maps

use crate::class_definition::ClassDefinition;
use serde::{Deserialize, Serialize};

/// Coverage thresholds applied when a categorical map is resampled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationParams {
    /// Minimum summed class membership of a pixel
    pub min_overall_coverage: f64,
    /// Minimum membership of the dominant class of a pixel
    pub min_dominant_coverage: f64,
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            min_overall_coverage: 0.5,
            min_dominant_coverage: 0.5,
        }
    }
}

/// Single-band map of class labels 1..=classes, 0 = unclassified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub filename: String,
    pub class_definition: ClassDefinition,
    pub params: ClassificationParams,
}

impl Classification {
    pub fn new(filename: impl Into<String>, class_definition: ClassDefinition) -> Self {
        Self {
            filename: filename.into(),
            class_definition,
            params: ClassificationParams::default(),
        }
    }

    pub fn with_params(mut self, params: ClassificationParams) -> Self {
        self.params = params;
        self
    }
}

/// Band `i` holds the membership (0..1) of class `i + 1`; -1 is no data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fraction {
    pub filename: String,
    pub class_definition: ClassDefinition,
    pub params: ClassificationParams,
}

impl Fraction {
    /// No-data value of every fraction band
    pub const NO_DATA: f64 = -1.0;

    pub fn new(filename: impl Into<String>, class_definition: ClassDefinition) -> Self {
        Self {
            filename: filename.into(),
            class_definition,
            params: ClassificationParams::default(),
        }
    }

    pub fn with_params(mut self, params: ClassificationParams) -> Self {
        self.params = params;
        self
    }
}
