//! Buffered raster output
//!
//! A writer accumulates tile blocks in memory, in the output's data type.
//! Finishing it takes two steps: [`RasterWriter::stage`] does everything
//! that can fail (encoding, temporary files) and [`StagedRaster::publish`]
//! makes the result visible under its filename. Nothing is visible in
//! [`Storage`] before the publish.

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::io::{Color, Driver, DriverSpec, MemRaster, RasterMetadata, Storage};
use crate::raster::{BandBuffer, DataType};
use ndarray::ArrayView3;
#[cfg(feature = "gtiff")]
use std::path::Path;
use tracing::debug;

/// Raster under construction
#[derive(Debug)]
pub struct RasterWriter {
    filename: String,
    spec: DriverSpec,
    grid: Grid,
    data: BandBuffer,
    metadata: RasterMetadata,
}

impl RasterWriter {
    pub fn new(filename: &str, spec: DriverSpec, grid: Grid, bands: usize, data_type: DataType) -> Result<Self> {
        if bands == 0 {
            return Err(Error::configuration(format!("output '{}' needs at least one band", filename)));
        }
        // creation options are checked up front, not at finalize
        spec.compression()?;
        let (rows, cols) = grid.shape();
        Ok(Self {
            filename: filename.to_string(),
            spec,
            grid,
            data: BandBuffer::zeros(data_type, (bands, rows, cols)),
            metadata: RasterMetadata::with_bands(bands),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn band_count(&self) -> usize {
        self.data.band_count()
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Store `block` (bands, rows, cols) with its upper-left pixel at
    /// (`row_off`, `col_off`). Values are cast to the output data type.
    pub fn write_window(&mut self, block: ArrayView3<f64>, row_off: usize, col_off: usize) -> Result<()> {
        let (bands, rows, cols) = block.dim();
        let (total_bands, total_rows, total_cols) = self.data.dim();
        if bands != total_bands || row_off + rows > total_rows || col_off + cols > total_cols {
            return Err(Error::dataset(format!(
                "block ({}, {}, {}) at ({}, {}) does not fit output '{}' of shape ({}, {}, {})",
                bands, rows, cols, row_off, col_off, self.filename, total_bands, total_rows, total_cols
            )));
        }
        self.data.write_window(block, row_off, col_off);
        Ok(())
    }

    pub fn set_metadata_item(&mut self, key: &str, value: &str, domain: &str) {
        self.metadata.set_item(key, value, domain);
    }

    pub fn set_no_data_value(&mut self, value: Option<f64>) {
        for band in 0..self.band_count() {
            self.metadata.band_mut(band).no_data_value = value;
        }
    }

    pub fn set_band_no_data_value(&mut self, band: usize, value: Option<f64>) {
        self.metadata.band_mut(band).no_data_value = value;
    }

    pub fn set_band_description(&mut self, band: usize, description: &str) {
        self.metadata.band_mut(band).description = Some(description.to_string());
    }

    pub fn set_category_names(&mut self, band: usize, names: Vec<String>) {
        self.metadata.band_mut(band).category_names = Some(names);
    }

    pub fn set_color_table(&mut self, band: usize, colors: Vec<Color>) {
        self.metadata.band_mut(band).color_table = Some(colors);
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    /// Overlay `other`: its domain items replace existing ones, its band
    /// entries replace the fields they set. Bands beyond the output's band
    /// count are an error.
    pub fn merge_metadata(&mut self, other: RasterMetadata) -> Result<()> {
        if other.bands.len() > self.band_count() {
            return Err(Error::configuration(format!(
                "metadata for {} band(s) given to output '{}' with {} band(s)",
                other.bands.len(),
                self.filename,
                self.band_count()
            )));
        }
        for (domain, items) in other.domains {
            for (key, value) in items {
                self.metadata.set_item(key, value, &domain);
            }
        }
        for (index, band) in other.bands.into_iter().enumerate() {
            let target = self.metadata.band_mut(index);
            if band.description.is_some() {
                target.description = band.description;
            }
            if band.no_data_value.is_some() {
                target.no_data_value = band.no_data_value;
            }
            if band.category_names.is_some() {
                target.category_names = band.category_names;
            }
            if band.color_table.is_some() {
                target.color_table = band.color_table;
            }
        }
        Ok(())
    }

    /// Stage and publish in one go.
    pub fn finalize(self, storage: &Storage) -> Result<()> {
        self.stage()?.publish(storage)
    }

    /// Do all fallible work of finishing the raster without making it
    /// visible. GeoTIFFs are encoded into temporary files next to their
    /// destination.
    pub fn stage(self) -> Result<StagedRaster> {
        debug!(
            "Staging {} ({} band(s), {}x{}, {}, {} bytes)",
            self.filename,
            self.band_count(),
            self.grid.height(),
            self.grid.width(),
            self.data_type(),
            self.data.byte_size()
        );
        let content = match self.spec.driver {
            Driver::Mem => Staged::Mem(MemRaster::from_buffer(self.grid, self.data)?.with_metadata(self.metadata)),
            #[cfg(feature = "gtiff")]
            Driver::GTiff => Staged::GTiff(crate::io::gtiff::stage_gtiff(
                Path::new(&self.filename),
                &self.grid,
                &self.data,
                &self.metadata,
                self.spec.compression()?,
            )?),
            #[cfg(not(feature = "gtiff"))]
            Driver::GTiff => return Err(Error::configuration("GTiff support is not compiled in")),
        };
        Ok(StagedRaster {
            filename: self.filename,
            content,
        })
    }
}

#[derive(Debug)]
enum Staged {
    Mem(MemRaster),
    #[cfg(feature = "gtiff")]
    GTiff(crate::io::gtiff::StagedGtiff),
}

/// A finished raster waiting to be published; dropping it discards it
#[derive(Debug)]
pub struct StagedRaster {
    filename: String,
    content: Staged,
}

impl StagedRaster {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Make the raster visible under its filename, replacing any previous
    /// dataset of that name.
    pub fn publish(self, storage: &Storage) -> Result<()> {
        match self.content {
            Staged::Mem(raster) => storage.insert_raster(&self.filename, raster),
            #[cfg(feature = "gtiff")]
            Staged::GTiff(files) => {
                files.persist(Path::new(&self.filename))?;
                storage.forget(&self.filename)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::Resolution;
    use ndarray::Array3;

    fn grid() -> Grid {
        Grid::from_origin(0.0, 3.0, Resolution::square(1.0), 3, 3, Projection::from_epsg(3035)).unwrap()
    }

    #[test]
    fn test_blocks_assemble_and_cast() {
        let storage = Storage::new();
        let mut writer = RasterWriter::new("/vsimem/out", DriverSpec::new(Driver::Mem), grid(), 1, DataType::U8)
            .unwrap();
        writer.write_window(Array3::from_elem((1, 2, 3), 1.6).view(), 0, 0).unwrap();
        writer.write_window(Array3::from_elem((1, 1, 3), 300.0).view(), 2, 0).unwrap();
        writer.set_no_data_value(Some(0.0));
        assert!(!storage.exists("/vsimem/out"));
        writer.finalize(&storage).unwrap();

        let ds = storage.open_raster("/vsimem/out").unwrap();
        assert_eq!(ds.data_type(), DataType::U8);
        assert_eq!(ds.no_data_values(), vec![Some(0.0)]);
        let band = ds.read_band_window(0, crate::grid::PixelWindow::full(3, 3)).unwrap();
        assert_eq!(band[(0, 0)], 2.0);
        assert_eq!(band[(2, 2)], 255.0);
    }

    #[test]
    fn test_block_out_of_bounds() {
        let mut writer = RasterWriter::new("/vsimem/x", DriverSpec::new(Driver::Mem), grid(), 2, DataType::F32)
            .unwrap();
        assert!(writer.write_window(Array3::zeros((2, 2, 2)).view(), 2, 2).is_err());
        assert!(writer.write_window(Array3::zeros((1, 1, 1)).view(), 0, 0).is_err());
    }

    #[test]
    fn test_bad_compression_rejected_early() {
        let spec = DriverSpec::new(Driver::GTiff).with_option("COMPRESS=JPEG");
        assert!(RasterWriter::new("a.tif", spec, grid(), 1, DataType::U8).is_err());
    }

    #[test]
    fn test_merge_metadata_keeps_unset_fields() {
        let mut writer = RasterWriter::new("/vsimem/m", DriverSpec::new(Driver::Mem), grid(), 2, DataType::F32)
            .unwrap();
        writer.set_band_description(0, "red");
        writer.set_no_data_value(Some(-1.0));
        let mut pending = RasterMetadata::default();
        pending.band_mut(1).description = Some("nir".into());
        pending.set_item("sensor", "demo", "ENVI");
        writer.merge_metadata(pending).unwrap();
        let metadata = writer.metadata();
        assert_eq!(metadata.bands[0].description.as_deref(), Some("red"));
        assert_eq!(metadata.bands[1].description.as_deref(), Some("nir"));
        assert_eq!(metadata.bands[1].no_data_value, Some(-1.0));
        assert_eq!(metadata.item("sensor", "ENVI"), Some("demo"));

        let mut too_many = RasterMetadata::default();
        too_many.band_mut(2).description = Some("swir".into());
        assert!(writer.merge_metadata(too_many).is_err());
    }

    #[test]
    fn test_category_band_metadata_is_published() {
        let storage = Storage::new();
        let mut writer = RasterWriter::new("/vsimem/c", DriverSpec::new(Driver::Mem), grid(), 1, DataType::U8)
            .unwrap();
        writer.set_band_no_data_value(0, Some(0.0));
        writer.set_category_names(0, vec!["unclassified".into(), "water".into()]);
        writer.set_color_table(0, vec![Color::new(0, 0, 0), Color::new(0, 0, 255)]);
        writer.finalize(&storage).unwrap();

        let ds = storage.open_raster("/vsimem/c").unwrap();
        let band = &ds.metadata().bands[0];
        assert_eq!(band.no_data_value, Some(0.0));
        assert_eq!(band.category_names.as_ref().map(|n| n.len()), Some(2));
        assert_eq!(band.color_table.as_ref().map(|c| c[1]), Some(Color::new(0, 0, 255)));
    }

    #[test]
    fn test_staged_raster_is_invisible_until_published() {
        let storage = Storage::new();
        let mut writer = RasterWriter::new("/vsimem/s", DriverSpec::new(Driver::Mem), grid(), 1, DataType::I16)
            .unwrap();
        writer.write_window(Array3::from_elem((1, 3, 3), -7.0).view(), 0, 0).unwrap();
        let staged = writer.stage().unwrap();
        assert_eq!(staged.filename(), "/vsimem/s");
        assert!(!storage.exists("/vsimem/s"));
        staged.publish(&storage).unwrap();
        let ds = storage.open_raster("/vsimem/s").unwrap();
        assert_eq!(ds.read_band_window(0, crate::grid::PixelWindow::full(3, 3)).unwrap()[(1, 1)], -7.0);

        let writer = RasterWriter::new("/vsimem/d", DriverSpec::new(Driver::Mem), grid(), 1, DataType::U8).unwrap();
        drop(writer.stage().unwrap());
        assert!(!storage.exists("/vsimem/d"));
    }
}
