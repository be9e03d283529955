//! # hubflow core
//!
//! Grid model, data types and raster/vector I/O shared by the hubflow crates.
//!
//! This crate provides:
//! - `Grid`: extent + resolution + projection, and its tiling into subgrids
//! - `RasterDataset` / `VectorDataset`: read side of the I/O backends
//! - `RasterWriter`: typed output buffer, staged then published
//! - `Storage`: in-memory (`/vsimem/`) filesystem and on-disk GeoTIFF/GeoJSON
//! - Resampling kernels and vector rasterization

pub mod crs;
pub mod error;
pub mod grid;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::Projection;
pub use error::{Error, Result};
pub use grid::{BlockSize, Extent, Grid, PixelWindow, Resolution, SPATIAL_TOLERANCE};
pub use raster::{BandBuffer, DataType, GeoTransform, RasterElement, ResampleAlg};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Projection;
    pub use crate::error::{Error, Result};
    pub use crate::grid::{BlockSize, Extent, Grid, PixelWindow, Resolution};
    pub use crate::io::{
        Driver, DriverSpec, MemRaster, RasterDataset, RasterMetadata, RasterWriter, Storage,
    };
    pub use crate::raster::{DataType, ResampleAlg};
    pub use crate::vector::{Feature, FeatureFilter, MemVector, RasterizeOptions, VectorDataset};
}
