//! Pixel storage in the band's own data type
//!
//! Values enter and leave as `f64`; in between they are kept in the narrowest
//! type the data type allows, so a byte mask costs one byte per pixel.

use super::DataType;
use ndarray::{s, Array2, Array3, ArrayView3, ArrayViewMut3};
use num_traits::{NumCast, ToPrimitive};

/// Pixels of all bands of a raster, (bands, rows, cols)
#[derive(Debug, Clone, PartialEq)]
pub enum BandBuffer {
    U8(Array3<u8>),
    U16(Array3<u16>),
    I16(Array3<i16>),
    U32(Array3<u32>),
    I32(Array3<i32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

macro_rules! each_variant {
    ($buffer:expr, $array:ident => $body:expr) => {
        match $buffer {
            BandBuffer::U8($array) => $body,
            BandBuffer::U16($array) => $body,
            BandBuffer::I16($array) => $body,
            BandBuffer::U32($array) => $body,
            BandBuffer::I32($array) => $body,
            BandBuffer::F32($array) => $body,
            BandBuffer::F64($array) => $body,
        }
    };
}

fn store<T: NumCast + Default>(mut dst: ArrayViewMut3<T>, src: ArrayView3<f64>, data_type: DataType) {
    dst.zip_mut_with(&src, |d, &v| *d = NumCast::from(data_type.cast(v)).unwrap_or_default());
}

fn widen<T: ToPrimitive>(value: T) -> f64 {
    ToPrimitive::to_f64(&value).unwrap_or(f64::NAN)
}

impl BandBuffer {
    pub fn zeros(data_type: DataType, shape: (usize, usize, usize)) -> Self {
        match data_type {
            DataType::U8 => BandBuffer::U8(Array3::zeros(shape)),
            DataType::U16 => BandBuffer::U16(Array3::zeros(shape)),
            DataType::I16 => BandBuffer::I16(Array3::zeros(shape)),
            DataType::U32 => BandBuffer::U32(Array3::zeros(shape)),
            DataType::I32 => BandBuffer::I32(Array3::zeros(shape)),
            DataType::F32 => BandBuffer::F32(Array3::zeros(shape)),
            DataType::F64 => BandBuffer::F64(Array3::zeros(shape)),
        }
    }

    /// Values cast to `data_type` as by [`DataType::cast`]
    pub fn from_f64(data_type: DataType, data: ArrayView3<f64>) -> Self {
        let mut buffer = Self::zeros(data_type, data.dim());
        buffer.write_window(data, 0, 0);
        buffer
    }

    pub fn data_type(&self) -> DataType {
        match self {
            BandBuffer::U8(_) => DataType::U8,
            BandBuffer::U16(_) => DataType::U16,
            BandBuffer::I16(_) => DataType::I16,
            BandBuffer::U32(_) => DataType::U32,
            BandBuffer::I32(_) => DataType::I32,
            BandBuffer::F32(_) => DataType::F32,
            BandBuffer::F64(_) => DataType::F64,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        each_variant!(self, a => a.dim())
    }

    pub fn band_count(&self) -> usize {
        self.dim().0
    }

    /// Bytes held by the pixel values
    pub fn byte_size(&self) -> usize {
        let len = each_variant!(self, a => a.len());
        len * self.data_type().size_in_bytes()
    }

    /// Store `block` with its upper-left pixel at (`row_off`, `col_off`).
    /// The block must fit.
    pub fn write_window(&mut self, block: ArrayView3<f64>, row_off: usize, col_off: usize) {
        let data_type = self.data_type();
        let (_, rows, cols) = block.dim();
        each_variant!(self, a => store(
            a.slice_mut(s![.., row_off..row_off + rows, col_off..col_off + cols]),
            block,
            data_type
        ))
    }

    /// Window of one band as `f64`. The window must lie inside the buffer.
    pub fn read_window(&self, band: usize, row_off: usize, col_off: usize, rows: usize, cols: usize) -> Array2<f64> {
        each_variant!(self, a => a
            .slice(s![band, row_off..row_off + rows, col_off..col_off + cols])
            .mapv(widen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_values_are_stored_as_cast() {
        let mut buffer = BandBuffer::zeros(DataType::U8, (1, 2, 2));
        buffer.write_window(array![[[1.6, -4.0], [300.0, f64::NAN]]].view(), 0, 0);
        assert_eq!(buffer, BandBuffer::U8(array![[[2, 0], [255, 0]]]));
        assert_eq!(buffer.read_window(0, 1, 0, 1, 2), array![[255.0, 0.0]]);
    }

    #[test]
    fn test_narrow_types_stay_narrow() {
        let mask = BandBuffer::zeros(DataType::U8, (1, 100, 100));
        assert_eq!(mask.byte_size(), 10_000);
        let wide = BandBuffer::zeros(DataType::F64, (1, 100, 100));
        assert_eq!(wide.byte_size(), 80_000);
    }

    #[test]
    fn test_window_offsets() {
        let data = Array3::from_shape_fn((2, 3, 3), |(b, r, c)| (b * 9 + r * 3 + c) as f64);
        let mut buffer = BandBuffer::zeros(DataType::I16, (2, 3, 3));
        buffer.write_window(data.slice(s![.., 1.., 1..]), 1, 1);
        assert_eq!(buffer.read_window(1, 1, 1, 2, 2), array![[13.0, 14.0], [16.0, 17.0]]);
        assert_eq!(buffer.read_window(0, 0, 0, 1, 1), array![[0.0]]);
    }
}
