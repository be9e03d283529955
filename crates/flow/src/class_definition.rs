//! Class definitions: ordered class names and colors
//!
//! Labels run from 1 to `classes()`; label 0 is reserved for unclassified
//! pixels and is written as `unclassified` / black.

use hubflow_core::io::{Color, RasterMetadata};
use hubflow_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Metadata domain of the ENVI-style class items
pub const ENVI_DOMAIN: &str = "ENVI";

/// Name written for label 0
pub const UNCLASSIFIED: &str = "unclassified";

/// Ordered class names and colors of a categorical map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    names: Vec<String>,
    colors: Vec<Color>,
}

/// Deterministic, well-spread color for class `label` (1-based)
fn default_color(label: usize) -> Color {
    // golden-angle hue steps, alternating value to separate neighbours
    let hue = (label as f64 * 137.507_764).rem_euclid(360.0);
    let value = if label % 2 == 0 { 0.75 } else { 0.95 };
    hsv_to_rgb(hue, 0.7, value)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Color {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let channel = |v: f64| ((v + m) * 255.0).round() as u8;
    Color::new(channel(r), channel(g), channel(b))
}

impl ClassDefinition {
    /// Class definition with explicit names and colors.
    pub fn new(names: Vec<String>, colors: Vec<Color>) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::configuration("a class definition needs at least one class"));
        }
        if names.len() != colors.len() {
            return Err(Error::configuration(format!(
                "{} class names but {} class colors",
                names.len(),
                colors.len()
            )));
        }
        Ok(Self { names, colors })
    }

    /// `classes` classes named `class 1`.. with default colors
    pub fn from_classes(classes: usize) -> Result<Self> {
        Self::from_names((1..=classes).map(|i| format!("class {}", i)).collect())
    }

    /// Named classes with default colors
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        let colors = (1..=names.len()).map(default_color).collect();
        Self::new(names, colors)
    }

    pub fn classes(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// Name of `label`; `unclassified` for 0
    pub fn name(&self, label: usize) -> Option<&str> {
        match label {
            0 => Some(UNCLASSIFIED),
            l => self.names.get(l - 1).map(String::as_str),
        }
    }

    pub fn color(&self, label: usize) -> Option<Color> {
        match label {
            0 => Some(Color::BLACK),
            l => self.colors.get(l - 1).copied(),
        }
    }

    /// Same classes, names and colors
    pub fn equal(&self, other: &ClassDefinition) -> bool {
        self == other
    }

    /// Category names including label 0
    pub fn category_names(&self) -> Vec<String> {
        std::iter::once(UNCLASSIFIED.to_string())
            .chain(self.names.iter().cloned())
            .collect()
    }

    /// Color table including label 0
    pub fn color_table(&self) -> Vec<Color> {
        std::iter::once(Color::BLACK).chain(self.colors.iter().copied()).collect()
    }

    /// `{a, b, c}` list items used by the ENVI domain
    pub(crate) fn envi_items(&self) -> Vec<(&'static str, String)> {
        let names = self.category_names().join(", ");
        let lookup = self
            .color_table()
            .iter()
            .map(|c| format!("{}, {}, {}", c.r, c.g, c.b))
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            ("classes", (self.classes() + 1).to_string()),
            ("class names", format!("{{{}}}", names)),
            ("class lookup", format!("{{{}}}", lookup)),
        ]
    }

    /// Read a class definition from raster metadata: band 1 category names
    /// and color table first, then the ENVI class items.
    pub fn from_metadata(metadata: &RasterMetadata) -> Option<Self> {
        if let Some(band) = metadata.bands.first() {
            if let Some(names) = &band.category_names {
                let names: Vec<String> = names.iter().skip(1).cloned().collect();
                let colors = band
                    .color_table
                    .as_ref()
                    .filter(|table| table.len() > names.len())
                    .map(|table| table[1..=names.len()].to_vec());
                return match colors {
                    Some(colors) => Self::new(names, colors).ok(),
                    None => Self::from_names(names).ok(),
                };
            }
        }
        let names: Vec<String> = parse_envi_list(metadata.item("class names", ENVI_DOMAIN)?)
            .into_iter()
            .skip(1)
            .collect();
        let lookup: Option<Vec<u8>> = metadata
            .item("class lookup", ENVI_DOMAIN)
            .map(parse_envi_list)
            .and_then(|values| values.iter().map(|v| v.parse().ok()).collect());
        match lookup {
            Some(lookup) if lookup.len() == 3 * (names.len() + 1) => {
                let colors = lookup[3..]
                    .chunks_exact(3)
                    .map(|c| Color::new(c[0], c[1], c[2]))
                    .collect();
                Self::new(names, colors).ok()
            }
            _ => Self::from_names(names).ok(),
        }
    }
}

fn parse_envi_list(text: &str) -> Vec<String> {
    text.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
