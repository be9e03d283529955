//! GeoJSON vector files

use super::{AttributeValue, Feature, MemVector};
use crate::crs::Projection;
use crate::error::{Error, Result};
use geo_types::Geometry;
use geojson::{FeatureCollection, GeoJson};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

fn attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Int(i),
            None => n.as_f64().map_or(AttributeValue::Null, AttributeValue::Float),
        },
        Value::String(s) => AttributeValue::String(s.clone()),
        other => AttributeValue::String(other.to_string()),
    }
}

/// Projection from the legacy `crs` member (`{"type": "name", "properties":
/// {"name": "EPSG:32633"}}` or an OGC URN); WGS84 when absent.
fn projection(collection: &FeatureCollection) -> Projection {
    let name = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(Value::as_str);
    match name {
        None => Projection::wgs84(),
        Some(name) if name.contains("CRS84") => Projection::wgs84(),
        Some(name) if name.to_ascii_uppercase().contains("EPSG") => name
            .rsplit(':')
            .next()
            .and_then(|code| code.trim().parse().ok())
            .map_or_else(|| Projection::parse(name), Projection::from_epsg),
        Some(name) => Projection::parse(name),
    }
}

/// Parse a GeoJSON document into a layer named `layer_name`.
pub fn parse_geojson(text: &str, layer_name: &str) -> Result<MemVector> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| Error::dataset(format!("invalid GeoJSON in layer '{}': {}", layer_name, e)))?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(f) => FeatureCollection {
            bbox: None,
            features: vec![f],
            foreign_members: None,
        },
        GeoJson::Geometry(g) => FeatureCollection {
            bbox: None,
            features: vec![geojson::Feature::from(g)],
            foreign_members: None,
        },
    };
    let projection = projection(&collection);

    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let geometry = match feature.geometry {
            Some(g) => Some(Geometry::<f64>::try_from(g.value).map_err(|e| {
                Error::dataset(format!("unsupported geometry in layer '{}': {}", layer_name, e))
            })?),
            None => None,
        };
        let properties: BTreeMap<String, AttributeValue> = feature
            .properties
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), attribute(v)))
            .collect();
        features.push(Feature { geometry, properties });
    }
    Ok(MemVector::new(layer_name, projection, features))
}

/// Read a `.geojson`/`.json` file; the layer is named after the file stem.
pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<MemVector> {
    let path = path.as_ref();
    let layer_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_string();
    let mut text = String::new();
    std::io::Read::read_to_string(&mut BufReader::new(File::open(path)?), &mut text)?;
    let mut layer = parse_geojson(&text, &layer_name)?;
    layer.set_filename(&path.to_string_lossy());
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorDataset;
    use std::io::Write;

    const DOC: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32633"}},
        "features": [
            {"type": "Feature", "properties": {"level_2_id": 3, "name": "forest"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,0]]]}},
            {"type": "Feature", "properties": {"level_2_id": 1.5}, "geometry": null}
        ]
    }"#;

    #[test]
    fn test_parse_collection() {
        let layer = parse_geojson(DOC, "landcover").unwrap();
        assert_eq!(layer.projection().epsg(), Some(32633));
        assert_eq!(layer.features().len(), 2);
        assert_eq!(layer.fields(), vec!["level_2_id".to_string(), "name".to_string()]);
        assert_eq!(layer.features()[0].property("level_2_id"), Some(&AttributeValue::Int(3)));
        assert!(layer.features()[1].geometry.is_none());
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landcover.geojson");
        File::create(&path).unwrap().write_all(DOC.as_bytes()).unwrap();
        let layer = read_geojson(&path).unwrap();
        assert_eq!(layer.layer_name(), "landcover");
        assert_eq!(layer.unique_values("level_2_id", None).unwrap(), vec![1.5, 3.0]);
    }

    #[test]
    fn test_default_projection() {
        let layer = parse_geojson(r#"{"type": "FeatureCollection", "features": []}"#, "empty").unwrap();
        assert!(layer.projection().is_equivalent(&Projection::wgs84()));
    }

    #[test]
    fn test_invalid_document() {
        assert!(parse_geojson("{\"type\": \"Nope\"}", "bad").is_err());
    }
}
