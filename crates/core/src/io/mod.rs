//! Raster I/O: dataset traits, the in-memory and GeoTIFF backends, and the
//! [`Storage`] routing filenames to them.

mod dataset;
mod driver;
#[cfg(feature = "gtiff")]
pub mod gtiff;
mod memory;
mod metadata;
mod storage;
mod writer;

pub use dataset::{
    read_band, read_category_fractions, read_footprint_mean, read_valid_fraction, RasterDataset,
};
pub use driver::{Compression, Driver, DriverSpec, MEM_PREFIX};
pub use memory::MemRaster;
pub use metadata::{BandMetadata, Color, RasterMetadata, DEFAULT_DOMAIN};
pub use storage::Storage;
pub use writer::{RasterWriter, StagedRaster};
