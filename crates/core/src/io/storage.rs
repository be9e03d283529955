//! Dataset storage: the `/vsimem/` in-memory filesystem plus files on disk

use crate::error::{Error, Result};
use crate::io::{Driver, MemRaster, RasterDataset};
use crate::vector::{MemVector, VectorDataset};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Opens datasets by filename and keeps in-memory ones alive.
///
/// Opened datasets are shared as `Arc`s; they are read-only, so the same
/// handle may be read from any number of tiles at once.
#[derive(Debug, Default)]
pub struct Storage {
    rasters: RwLock<HashMap<String, Arc<dyn RasterDataset>>>,
    vectors: RwLock<HashMap<String, Arc<dyn VectorDataset>>>,
}

fn poisoned<T>(_: T) -> Error {
    Error::dataset("storage lock poisoned")
}

fn is_vector_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"))
}

#[cfg(feature = "geojson")]
fn read_vector_file(filename: &str) -> Result<MemVector> {
    crate::vector::geojson_io::read_geojson(filename)
}

#[cfg(not(feature = "geojson"))]
fn read_vector_file(_filename: &str) -> Result<MemVector> {
    Err(Error::configuration("GeoJSON support is not compiled in"))
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, for operators that create outputs themselves
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register an in-memory raster under `filename`, replacing any previous one.
    pub fn insert_raster(&self, filename: &str, mut raster: MemRaster) -> Result<()> {
        raster.set_filename(filename);
        self.rasters
            .write()
            .map_err(poisoned)?
            .insert(filename.to_string(), Arc::new(raster));
        Ok(())
    }

    pub fn insert_vector(&self, filename: &str, mut vector: MemVector) -> Result<()> {
        vector.set_filename(filename);
        self.vectors
            .write()
            .map_err(poisoned)?
            .insert(filename.to_string(), Arc::new(vector));
        Ok(())
    }

    /// Open a raster: in-memory datasets first, then GeoTIFF files on disk.
    pub fn open_raster(&self, filename: &str) -> Result<Arc<dyn RasterDataset>> {
        if let Some(ds) = self.rasters.read().map_err(poisoned)?.get(filename) {
            return Ok(Arc::clone(ds));
        }
        match Driver::from_filename(filename)? {
            Driver::Mem => Err(Error::dataset(format!("no in-memory raster named '{}'", filename))),
            #[cfg(feature = "gtiff")]
            Driver::GTiff => {
                debug!("Opening GeoTIFF {}", filename);
                let raster = crate::io::gtiff::read_gtiff(filename)?;
                Ok(Arc::new(raster))
            }
            #[cfg(not(feature = "gtiff"))]
            Driver::GTiff => Err(Error::configuration("GTiff support is not compiled in")),
        }
    }

    /// Open a vector layer: in-memory layers first, then GeoJSON files on disk.
    pub fn open_vector(&self, filename: &str) -> Result<Arc<dyn VectorDataset>> {
        if let Some(ds) = self.vectors.read().map_err(poisoned)?.get(filename) {
            return Ok(Arc::clone(ds));
        }
        if !is_vector_file(filename) {
            return Err(Error::dataset(format!("no vector layer named '{}'", filename)));
        }
        debug!("Opening GeoJSON {}", filename);
        Ok(Arc::new(read_vector_file(filename)?))
    }

    /// Whether a dataset with this name exists, in memory or on disk.
    pub fn exists(&self, filename: &str) -> bool {
        let in_memory = self.rasters.read().map(|m| m.contains_key(filename)).unwrap_or(false)
            || self.vectors.read().map(|m| m.contains_key(filename)).unwrap_or(false);
        in_memory || (!filename.starts_with(crate::io::MEM_PREFIX) && Path::new(filename).is_file())
    }

    /// Delete a dataset, including GeoTIFF files and their sidecars.
    pub fn remove(&self, filename: &str) -> Result<()> {
        self.forget(filename)?;
        self.vectors.write().map_err(poisoned)?.remove(filename);
        if !filename.starts_with(crate::io::MEM_PREFIX) && Path::new(filename).is_file() {
            debug!("Removing {}", filename);
            std::fs::remove_file(filename)?;
            let sidecar = format!("{}.aux.json", filename);
            if Path::new(&sidecar).is_file() {
                std::fs::remove_file(sidecar)?;
            }
        }
        Ok(())
    }

    /// Drop an in-memory raster entry without touching disk.
    pub(crate) fn forget(&self, filename: &str) -> Result<()> {
        self.rasters.write().map_err(poisoned)?.remove(filename);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::{Grid, Resolution};
    use ndarray::Array2;

    fn raster() -> MemRaster {
        let grid = Grid::from_origin(0.0, 2.0, Resolution::square(1.0), 2, 2, Projection::from_epsg(4326)).unwrap();
        MemRaster::from_band(grid, Array2::<u8>::ones((2, 2))).unwrap()
    }

    #[test]
    fn test_insert_open_remove() {
        let storage = Storage::new();
        assert!(!storage.exists("/vsimem/a"));
        storage.insert_raster("/vsimem/a", raster()).unwrap();
        assert!(storage.exists("/vsimem/a"));
        assert_eq!(storage.open_raster("/vsimem/a").unwrap().filename(), "/vsimem/a");
        storage.remove("/vsimem/a").unwrap();
        assert!(storage.open_raster("/vsimem/a").is_err());
    }

    #[test]
    fn test_vector_lookup() {
        let storage = Storage::new();
        storage
            .insert_vector("/vsimem/roads", MemVector::new("roads", Projection::wgs84(), vec![]))
            .unwrap();
        assert_eq!(storage.open_vector("/vsimem/roads").unwrap().layer_name(), "roads");
        assert!(storage.open_vector("/vsimem/rivers").is_err());
    }

    #[test]
    fn test_unknown_extension() {
        let storage = Storage::new();
        assert!(storage.open_raster("image.jp2").unwrap_err().is_configuration());
    }
}
