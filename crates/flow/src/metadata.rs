//! Descriptive metadata stamped onto output rasters
//!
//! Everything here edits a pending [`RasterMetadata`]; none of it touches
//! pixel values. Items are written twice where readers differ: as band
//! properties (descriptions, category names, color tables) and as ENVI
//! domain items.

use crate::class_definition::{ClassDefinition, ENVI_DOMAIN};
use hubflow_core::io::RasterMetadata;

fn envi_list<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    format!("{{{}}}", items.join(", "))
}

/// Single-band classification: category names and colors including label 0,
/// no-data 0.
pub(crate) fn stamp_class_definition(metadata: &mut RasterMetadata, definition: &ClassDefinition) {
    let band = metadata.band_mut(0);
    band.category_names = Some(definition.category_names());
    band.color_table = Some(definition.color_table());
    band.no_data_value = Some(0.0);
    metadata.set_item("file type", "ENVI Classification", ENVI_DOMAIN);
    for (key, value) in definition.envi_items() {
        metadata.set_item(key, value, ENVI_DOMAIN);
    }
}

/// One band per class named after it, no-data -1.
pub(crate) fn stamp_fraction_definition(metadata: &mut RasterMetadata, definition: &ClassDefinition) {
    stamp_band_names(metadata, definition.names());
    for band in 0..definition.classes() {
        metadata.band_mut(band).no_data_value = Some(-1.0);
    }
    for (key, value) in definition.envi_items() {
        metadata.set_item(key, value, ENVI_DOMAIN);
    }
    metadata.set_item("data ignore value", "-1", ENVI_DOMAIN);
}

pub(crate) fn stamp_regression_definition(metadata: &mut RasterMetadata, no_data_values: &[f64], names: &[String]) {
    stamp_band_names(metadata, names);
    for (band, &value) in no_data_values.iter().enumerate() {
        metadata.band_mut(band).no_data_value = Some(value);
    }
    if let Some(&first) = no_data_values.first() {
        if no_data_values.iter().all(|&v| v == first) {
            metadata.set_item("data ignore value", first.to_string(), ENVI_DOMAIN);
        }
    }
}

pub(crate) fn stamp_band_names(metadata: &mut RasterMetadata, names: &[String]) {
    for (band, name) in names.iter().enumerate() {
        metadata.band_mut(band).description = Some(name.clone());
    }
    metadata.set_item("band names", envi_list(names), ENVI_DOMAIN);
}

pub(crate) fn stamp_no_data_values(metadata: &mut RasterMetadata, values: &[Option<f64>]) {
    for (band, &value) in values.iter().enumerate() {
        metadata.band_mut(band).no_data_value = value;
    }
}

/// Band center wavelengths and optional full widths at half maximum.
pub(crate) fn stamp_sensor_definition(
    metadata: &mut RasterMetadata,
    wavelengths: &[f64],
    fwhms: Option<&[f64]>,
    units: &str,
) {
    metadata.set_item("wavelength", envi_list(wavelengths), ENVI_DOMAIN);
    if let Some(fwhms) = fwhms {
        metadata.set_item("fwhm", envi_list(fwhms), ENVI_DOMAIN);
    }
    metadata.set_item("wavelength units", units, ENVI_DOMAIN);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_definition_roundtrips_through_metadata() {
        let definition = ClassDefinition::from_names(vec!["water".into(), "forest".into()]).unwrap();
        let mut metadata = RasterMetadata::default();
        stamp_class_definition(&mut metadata, &definition);
        assert_eq!(metadata.bands[0].no_data_value, Some(0.0));
        assert_eq!(metadata.item("classes", ENVI_DOMAIN), Some("3"));
        assert_eq!(ClassDefinition::from_metadata(&metadata), Some(definition));
    }

    #[test]
    fn test_fraction_bands() {
        let definition = ClassDefinition::from_classes(3).unwrap();
        let mut metadata = RasterMetadata::default();
        stamp_fraction_definition(&mut metadata, &definition);
        assert_eq!(metadata.bands.len(), 3);
        assert_eq!(metadata.bands[2].description.as_deref(), Some("class 3"));
        assert_eq!(metadata.no_data_values(), vec![Some(-1.0); 3]);
        assert_eq!(metadata.item("band names", ENVI_DOMAIN), Some("{class 1, class 2, class 3}"));
    }

    #[test]
    fn test_sensor_definition() {
        let mut metadata = RasterMetadata::default();
        stamp_sensor_definition(&mut metadata, &[450.0, 550.5], None, "Nanometers");
        assert_eq!(metadata.item("wavelength", ENVI_DOMAIN), Some("{450, 550.5}"));
        assert_eq!(metadata.item("fwhm", ENVI_DOMAIN), None);
    }

    #[test]
    fn test_regression_shared_no_data() {
        let mut metadata = RasterMetadata::default();
        stamp_regression_definition(&mut metadata, &[-9999.0, -9999.0], &["a".into(), "b".into()]);
        assert_eq!(metadata.item("data ignore value", ENVI_DOMAIN), Some("-9999"));
        assert_eq!(metadata.bands[1].description.as_deref(), Some("b"));
    }
}
