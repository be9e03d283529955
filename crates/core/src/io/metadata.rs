//! Descriptive raster metadata: domains of key/value items plus per-band
//! descriptions, no-data values, category names and color tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the default metadata domain
pub const DEFAULT_DOMAIN: &str = "";

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Metadata of one band
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_table: Option<Vec<Color>>,
}

/// Metadata of a raster dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    /// domain -> key -> value
    #[serde(default)]
    pub domains: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub bands: Vec<BandMetadata>,
}

impl RasterMetadata {
    pub fn with_bands(bands: usize) -> Self {
        Self {
            domains: BTreeMap::new(),
            bands: vec![BandMetadata::default(); bands],
        }
    }

    pub fn item(&self, key: &str, domain: &str) -> Option<&str> {
        self.domains.get(domain)?.get(key).map(String::as_str)
    }

    pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<String>, domain: &str) {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Band metadata, growing the band list when needed
    pub fn band_mut(&mut self, band: usize) -> &mut BandMetadata {
        if self.bands.len() <= band {
            self.bands.resize(band + 1, BandMetadata::default());
        }
        &mut self.bands[band]
    }

    pub fn no_data_values(&self) -> Vec<Option<f64>> {
        self.bands.iter().map(|b| b.no_data_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex() {
        let c = Color::from_hex("#ff8000").unwrap();
        assert_eq!(c, Color::new(255, 128, 0));
        assert_eq!(c.to_hex(), "#ff8000");
        assert!(Color::from_hex("#fff").is_none());
    }

    #[test]
    fn test_items_and_bands() {
        let mut md = RasterMetadata::with_bands(1);
        md.set_item("wavelength units", "nanometers", "ENVI");
        assert_eq!(md.item("wavelength units", "ENVI"), Some("nanometers"));
        assert_eq!(md.item("wavelength units", DEFAULT_DOMAIN), None);
        md.band_mut(2).no_data_value = Some(-1.0);
        assert_eq!(md.no_data_values(), vec![None, None, Some(-1.0)]);
    }
}
