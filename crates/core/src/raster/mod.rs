//! Pixel-level building blocks: data types, typed pixel buffers, affine transforms, resampling

mod buffer;
mod element;
mod geotransform;
pub mod resample;

pub use buffer::BandBuffer;
pub use element::{DataType, RasterElement};
pub use geotransform::GeoTransform;
pub use resample::ResampleAlg;
