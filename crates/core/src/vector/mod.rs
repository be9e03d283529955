//! Vector layers: features with attributes, rasterized on demand

mod rasterize;

#[cfg(feature = "geojson")]
pub mod geojson_io;

pub use rasterize::{rasterize, RasterizeOptions};

use crate::crs::Projection;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use geo::{BoundingRect, Intersects};
use geo_types::Geometry;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Numeric view of the value; strings are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Null => None,
            AttributeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse().ok(),
        }
    }

    fn matches(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            (AttributeValue::Null, _) | (_, AttributeValue::Null) => false,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: BTreeMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }
}

/// Attribute filter applied before rasterization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureFilter {
    Equals { attribute: String, value: AttributeValue },
    In { attribute: String, values: Vec<AttributeValue> },
}

impl FeatureFilter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        FeatureFilter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            FeatureFilter::Equals { attribute, .. } | FeatureFilter::In { attribute, .. } => attribute,
        }
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        let Some(actual) = feature.property(self.attribute()) else {
            return false;
        };
        match self {
            FeatureFilter::Equals { value, .. } => actual.matches(value),
            FeatureFilter::In { values, .. } => values.iter().any(|v| actual.matches(v)),
        }
    }
}

/// An opened vector layer
pub trait VectorDataset: Debug + Send + Sync {
    fn filename(&self) -> &str;

    fn layer_name(&self) -> &str;

    fn projection(&self) -> &Projection;

    fn features(&self) -> &[Feature];

    /// Attribute names present on any feature, sorted
    fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .features()
            .iter()
            .flat_map(|f| f.properties.keys().cloned())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Fail with `MissingAttribute` unless the layer has `attribute`.
    fn check_field(&self, attribute: &str) -> Result<()> {
        if self.fields().iter().any(|f| f == attribute) {
            Ok(())
        } else {
            Err(Error::MissingAttribute {
                attribute: attribute.to_string(),
                layer: self.layer_name().to_string(),
            })
        }
    }

    fn rasterize(&self, grid: &Grid, options: &RasterizeOptions) -> Result<Array2<f64>> {
        rasterize(self, grid, options)
    }

    /// Distinct numeric values of `attribute`, ascending, optionally
    /// restricted to features intersecting `extent`
    fn unique_values(&self, attribute: &str, extent: Option<&Extent>) -> Result<Vec<f64>> {
        self.check_field(attribute)?;
        let area = match extent {
            Some(extent) => {
                extent.check_projection(self.projection())?;
                Some(extent.to_rect())
            }
            None => None,
        };
        let mut values: Vec<f64> = self
            .features()
            .iter()
            .filter(|f| match (&area, &f.geometry) {
                (None, _) => true,
                (Some(rect), Some(geometry)) => {
                    geometry.bounding_rect().is_some_and(|b| b.intersects(rect)) && geometry.intersects(rect)
                }
                (Some(_), None) => false,
            })
            .filter_map(|f| f.property(attribute)?.as_f64())
            .collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(values)
    }
}

/// A vector layer held in memory
#[derive(Debug, Clone)]
pub struct MemVector {
    filename: String,
    layer_name: String,
    projection: Projection,
    features: Vec<Feature>,
}

impl MemVector {
    pub fn new(layer_name: impl Into<String>, projection: Projection, features: Vec<Feature>) -> Self {
        Self {
            filename: String::new(),
            layer_name: layer_name.into(),
            projection,
            features,
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub(crate) fn set_filename(&mut self, filename: &str) {
        self.filename = filename.to_string();
    }
}

impl VectorDataset for MemVector {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn layer_name(&self) -> &str {
        &self.layer_name
    }

    fn projection(&self) -> &Projection {
        &self.projection
    }

    fn features(&self) -> &[Feature] {
        &self.features
    }
}
