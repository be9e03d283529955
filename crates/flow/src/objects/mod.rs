//! Flow objects: typed handles to maps the applier reads and writes
//!
//! A flow object never holds pixels. It names a dataset and says how its
//! values are to be interpreted (no-data values, coverage thresholds,
//! rasterization parameters). The closed [`FlowObject`] sum type is what the
//! applier dispatches on when resolving an input for a tile.

mod classification;
mod mask;
mod raster;
mod vector;

pub use classification::{Classification, ClassificationParams, Fraction};
pub use mask::{Mask, MaskAggregation, MaskParams};
pub use raster::{Raster, RasterStack, Regression, RegressionParams};
pub use vector::{Vector, VectorClassification, VectorClassificationParams, VectorMask, VectorParams};

use crate::class_definition::ClassDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Variant tag of a [`FlowObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    Raster,
    Mask,
    Classification,
    Fraction,
    Regression,
    RasterStack,
    Vector,
    VectorMask,
    VectorClassification,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Any map the applier can resolve into tile arrays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowObject {
    Raster(Raster),
    Mask(Mask),
    Classification(Classification),
    Fraction(Fraction),
    Regression(Regression),
    RasterStack(RasterStack),
    Vector(Vector),
    VectorMask(VectorMask),
    VectorClassification(VectorClassification),
}

impl FlowObject {
    /// Dataset filename; the first member's for a raster stack
    pub fn filename(&self) -> &str {
        match self {
            FlowObject::Raster(r) => &r.filename,
            FlowObject::Mask(m) => &m.filename,
            FlowObject::Classification(c) => &c.filename,
            FlowObject::Fraction(f) => &f.filename,
            FlowObject::Regression(r) => &r.filename,
            FlowObject::RasterStack(s) => s.filename(),
            FlowObject::Vector(v) => &v.filename,
            FlowObject::VectorMask(v) => &v.vector.filename,
            FlowObject::VectorClassification(v) => &v.vector.filename,
        }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            FlowObject::Raster(_) => FlowKind::Raster,
            FlowObject::Mask(_) => FlowKind::Mask,
            FlowObject::Classification(_) => FlowKind::Classification,
            FlowObject::Fraction(_) => FlowKind::Fraction,
            FlowObject::Regression(_) => FlowKind::Regression,
            FlowObject::RasterStack(_) => FlowKind::RasterStack,
            FlowObject::Vector(_) => FlowKind::Vector,
            FlowObject::VectorMask(_) => FlowKind::VectorMask,
            FlowObject::VectorClassification(_) => FlowKind::VectorClassification,
        }
    }

    /// Class definition of categorical variants
    pub fn class_definition(&self) -> Option<&ClassDefinition> {
        match self {
            FlowObject::Classification(c) => Some(&c.class_definition),
            FlowObject::Fraction(f) => Some(&f.class_definition),
            FlowObject::VectorClassification(v) => Some(&v.class_definition),
            _ => None,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            FlowObject::Vector(_) | FlowObject::VectorMask(_) | FlowObject::VectorClassification(_)
        )
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for FlowObject {
                fn from(value: $variant) -> Self {
                    FlowObject::$variant(value)
                }
            }
        )*
    };
}

impl_from_variant!(
    Raster,
    Mask,
    Classification,
    Fraction,
    Regression,
    RasterStack,
    Vector,
    VectorMask,
    VectorClassification,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_filename() {
        let def = ClassDefinition::from_classes(2).unwrap();
        let objects: Vec<FlowObject> = vec![
            Raster::new("/vsimem/r").into(),
            Mask::new("/vsimem/m").into(),
            Fraction::new("/vsimem/f", def.clone()).into(),
            VectorClassification::new("/vsimem/v", "id", def).into(),
        ];
        let kinds: Vec<FlowKind> = objects.iter().map(FlowObject::kind).collect();
        assert_eq!(
            kinds,
            vec![FlowKind::Raster, FlowKind::Mask, FlowKind::Fraction, FlowKind::VectorClassification]
        );
        assert_eq!(objects[3].filename(), "/vsimem/v");
        assert!(objects[3].is_vector());
        assert_eq!(objects[2].class_definition().map(ClassDefinition::classes), Some(2));
    }

    #[test]
    fn test_vector_classification_burns_class_attribute() {
        let vc = VectorClassification::new("a.geojson", "level_2", ClassDefinition::from_classes(5).unwrap());
        assert_eq!(vc.vector.params.burn_attribute.as_deref(), Some("level_2"));
        assert_eq!(vc.params.oversampling, 1);
    }

    #[test]
    fn test_mask_inverted() {
        let mask = Mask::new("m");
        assert!(mask.inverted().params.invert);
        assert!(!mask.inverted().inverted().params.invert);
    }

    #[test]
    fn test_empty_stack_rejected() {
        assert!(RasterStack::new(vec![]).unwrap_err().is_configuration());
    }
}
