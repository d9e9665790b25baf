//! Uncompressed image buffers handed to and produced by the tile engine.
//!
//! Pixels are held as big-endian bytes, the on-disk FITS representation, so
//! tile views can slice them without knowing the element type.

use alloc::vec::Vec;

use bytemuck::pod_collect_to_vec;

use crate::error::{Error, Result};

/// Pixel element type, keyed by the FITS BITPIX value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ElementType {
    /// Map a BITPIX value to an element type.
    pub fn from_bitpix(bitpix: i64) -> Result<Self> {
        match bitpix {
            8 => Ok(ElementType::U8),
            16 => Ok(ElementType::I16),
            32 => Ok(ElementType::I32),
            64 => Ok(ElementType::I64),
            -32 => Ok(ElementType::F32),
            -64 => Ok(ElementType::F64),
            other => Err(Error::InvalidBitpix(other)),
        }
    }

    pub fn bitpix(self) -> i64 {
        match self {
            ElementType::U8 => 8,
            ElementType::I16 => 16,
            ElementType::I32 => 32,
            ElementType::I64 => 64,
            ElementType::F32 => -32,
            ElementType::F64 => -64,
        }
    }

    /// Bytes per pixel.
    pub fn size(self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }

    pub fn is_integer(self) -> bool {
        self.bitpix() > 0
    }
}

/// Typed pixel arrays in native byte order.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ImageData {
    pub fn element_type(&self) -> ElementType {
        match self {
            ImageData::U8(_) => ElementType::U8,
            ImageData::I16(_) => ElementType::I16,
            ImageData::I32(_) => ElementType::I32,
            ImageData::I64(_) => ElementType::I64,
            ImageData::F32(_) => ElementType::F32,
            ImageData::F64(_) => ElementType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ImageData::U8(v) => v.len(),
            ImageData::I16(v) => v.len(),
            ImageData::I32(v) => v.len(),
            ImageData::I64(v) => v.len(),
            ImageData::F32(v) => v.len(),
            ImageData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Swap every `width`-byte element of `buf` between native and big-endian.
fn swap_native_be(buf: &mut [u8], width: usize) {
    if cfg!(target_endian = "big") || width == 1 {
        return;
    }
    for chunk in buf.chunks_exact_mut(width) {
        chunk.reverse();
    }
}

/// A complete decompressed image: element type, axis lengths (NAXIS1
/// first) and big-endian pixel bytes.
///
/// Shape and element type are fixed at construction; the tile engine only
/// ever borrows the pixel bytes immutably.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    element: ElementType,
    axes: Vec<usize>,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Wrap big-endian pixel bytes.
    pub fn from_be_bytes(element: ElementType, axes: &[usize], data: Vec<u8>) -> Result<Self> {
        let pixels = pixel_count(axes);
        if data.len() != pixels * element.size() {
            return Err(Error::InvalidInput(
                "pixel byte length does not match image shape",
            ));
        }
        Ok(ImageBuffer {
            element,
            axes: axes.to_vec(),
            data,
        })
    }

    /// An all-zero image.
    pub fn zeroed(element: ElementType, axes: &[usize]) -> Self {
        let len = pixel_count(axes) * element.size();
        ImageBuffer {
            element,
            axes: axes.to_vec(),
            data: alloc::vec![0u8; len],
        }
    }

    /// Ingest typed pixels, converting to big-endian bytes.
    pub fn from_image_data(data: &ImageData, axes: &[usize]) -> Result<Self> {
        if data.len() != pixel_count(axes) {
            return Err(Error::InvalidInput(
                "pixel count does not match image shape",
            ));
        }
        let element = data.element_type();
        let mut bytes: Vec<u8> = match data {
            ImageData::U8(v) => v.clone(),
            ImageData::I16(v) => pod_collect_to_vec(v.as_slice()),
            ImageData::I32(v) => pod_collect_to_vec(v.as_slice()),
            ImageData::I64(v) => pod_collect_to_vec(v.as_slice()),
            ImageData::F32(v) => pod_collect_to_vec(v.as_slice()),
            ImageData::F64(v) => pod_collect_to_vec(v.as_slice()),
        };
        swap_native_be(&mut bytes, element.size());
        Ok(ImageBuffer {
            element,
            axes: axes.to_vec(),
            data: bytes,
        })
    }

    /// Convert back to typed native-endian pixels.
    pub fn to_image_data(&self) -> ImageData {
        let mut raw = self.data.clone();
        swap_native_be(&mut raw, self.element.size());
        match self.element {
            ElementType::U8 => ImageData::U8(raw),
            ElementType::I16 => ImageData::I16(pod_collect_to_vec(raw.as_slice())),
            ElementType::I32 => ImageData::I32(pod_collect_to_vec(raw.as_slice())),
            ElementType::I64 => ImageData::I64(pod_collect_to_vec(raw.as_slice())),
            ElementType::F32 => ImageData::F32(pod_collect_to_vec(raw.as_slice())),
            ElementType::F64 => ImageData::F64(pod_collect_to_vec(raw.as_slice())),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn pixel_count(&self) -> usize {
        pixel_count(&self.axes)
    }

    /// Big-endian pixel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Product of the axis lengths; zero axes means an empty image.
pub fn pixel_count(axes: &[usize]) -> usize {
    if axes.is_empty() {
        0
    } else {
        axes.iter().product()
    }
}
