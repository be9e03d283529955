//! Pixel data types
//!
//! Arrays flowing through the applier are `f64`; the data type decides how
//! values are stored, see [`BandBuffer`].

use super::BandBuffer;
use ndarray::Array3;
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl DataType {
    pub fn min_value(self) -> f64 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 0.0,
            DataType::I16 => i16::MIN as f64,
            DataType::I32 => i32::MIN as f64,
            DataType::F32 => f32::MIN as f64,
            DataType::F64 => f64::MIN,
        }
    }

    pub fn max_value(self) -> f64 {
        match self {
            DataType::U8 => u8::MAX as f64,
            DataType::U16 => u16::MAX as f64,
            DataType::I16 => i16::MAX as f64,
            DataType::U32 => u32::MAX as f64,
            DataType::I32 => i32::MAX as f64,
            DataType::F32 => f32::MAX as f64,
            DataType::F64 => f64::MAX,
        }
    }

    /// Value as it will be stored: integers are rounded and saturated,
    /// `F32` loses precision, NaN becomes 0 for integer types.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DataType::F64 => value,
            DataType::F32 => value as f32 as f64,
            _ if value.is_nan() => 0.0,
            _ => value.round().clamp(self.min_value(), self.max_value()),
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Smallest type holding integer labels up to `max_label`
    pub fn for_labels(max_label: usize) -> Self {
        if max_label <= u8::MAX as usize {
            DataType::U8
        } else if max_label <= u16::MAX as usize {
            DataType::U16
        } else {
            DataType::U32
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::U8 => "Byte",
            DataType::U16 => "UInt16",
            DataType::I16 => "Int16",
            DataType::U32 => "UInt32",
            DataType::I32 => "Int32",
            DataType::F32 => "Float32",
            DataType::F64 => "Float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust types that can be stored in a raster band.
pub trait RasterElement: Copy + NumCast + Default + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Wrap an array of this type without converting it
    fn into_buffer(data: Array3<Self>) -> BandBuffer;
}

macro_rules! impl_raster_element {
    ($t:ty, $variant:ident) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_buffer(data: Array3<Self>) -> BandBuffer {
                BandBuffer::$variant(data)
            }
        }
    };
}

impl_raster_element!(u8, U8);
impl_raster_element!(u16, U16);
impl_raster_element!(i16, I16);
impl_raster_element!(u32, U32);
impl_raster_element!(i32, I32);
impl_raster_element!(f32, F32);
impl_raster_element!(f64, F64);
