//! Memory owned by external libraries.
//!
//! An [`ExternalArray`] is a host-resident typed array whose storage belongs to
//! another library, such as a decoded raster from the `image` crate or a mesh
//! library's point-data buffer. Wrapping it with [`Memory::from_external`]
//! shares its bytes without copying; the library keeps ownership.
//!
//! Wrapped arrays are read-only from this crate's side. Writing through a data
//! array first replaces the wrapped bytes with a native host copy.

use crate::core::convert::{read_component, write_component};
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::scalar::{Element, ScalarType};
use crate::memory::Memory;
use image::{ColorType, DynamicImage};
use std::sync::Arc;

/// Element types of the external type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalType {
    /// Signed 8-bit integer
    I8,
    /// Unsigned 8-bit integer
    U8,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl ExternalType {
    /// Storage layout of this type as a scalar type.
    pub fn storage_type(self) -> ScalarType {
        match self {
            ExternalType::I8 => ScalarType::I8,
            ExternalType::U8 => ScalarType::U8,
            ExternalType::I16 => ScalarType::I16,
            ExternalType::U16 => ScalarType::U16,
            ExternalType::I32 => ScalarType::I32,
            ExternalType::U32 => ScalarType::U32,
            ExternalType::I64 => ScalarType::I64,
            ExternalType::U64 => ScalarType::U64,
            ExternalType::F32 => ScalarType::F32,
            ExternalType::F64 => ScalarType::F64,
        }
    }

    /// Scalar type a wrapped array of this type is exposed as.
    ///
    /// Only 8, 16 and 32-bit integers and 32/64-bit floats can be wrapped.
    pub fn scalar_type(self) -> ArrayResult<ScalarType> {
        match self {
            ExternalType::I64 | ExternalType::U64 => Err(ArrayError::unsupported_type(
                self.storage_type(),
                "by the external array adaptor",
            )),
            other => Ok(other.storage_type()),
        }
    }

    /// Map a scalar type back to the external registry.
    pub fn from_scalar(ty: ScalarType) -> ArrayResult<Self> {
        Ok(match ty {
            ScalarType::I8 => ExternalType::I8,
            ScalarType::U8 => ExternalType::U8,
            ScalarType::I16 => ExternalType::I16,
            ScalarType::U16 => ExternalType::U16,
            ScalarType::I32 => ExternalType::I32,
            ScalarType::U32 => ExternalType::U32,
            ScalarType::I64 => ExternalType::I64,
            ScalarType::U64 => ExternalType::U64,
            ScalarType::F32 => ExternalType::F32,
            ScalarType::F64 => ExternalType::F64,
            other => {
                return Err(ArrayError::unsupported_type(
                    other,
                    "in the external type registry",
                ))
            }
        })
    }

    /// Byte size of one element.
    pub fn size(self) -> usize {
        self.storage_type().size()
    }
}

/// A host array owned by another library.
pub trait ExternalArray: Send + Sync {
    /// Element type in the external type registry.
    fn external_type(&self) -> ArrayResult<ExternalType>;

    /// Number of tuples.
    fn tuples(&self) -> usize;

    /// Components per tuple.
    fn components(&self) -> usize;

    /// Packed element bytes, `tuples * components` elements.
    fn as_bytes(&self) -> &[u8];
}

/// Library-side typed array: packed tuples of one external element type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedBuffer {
    ty: ExternalType,
    components: usize,
    bytes: Vec<u8>,
}

impl TypedBuffer {
    /// Create a zeroed buffer.
    pub fn new(ty: ExternalType, tuples: usize, components: usize) -> Self {
        Self {
            ty,
            components,
            bytes: vec![0; tuples * components * ty.size()],
        }
    }

    /// Copy Rust elements into a buffer of `components` per tuple.
    pub fn from_slice<T: Element>(data: &[T], components: usize) -> ArrayResult<Self> {
        let ty = ExternalType::from_scalar(T::TYPE)?;
        if components == 0 || data.len() % components != 0 {
            return Err(ArrayError::SizeMismatch(format!(
                "{} values do not form tuples of {} components",
                data.len(),
                components
            )));
        }
        Ok(Self {
            ty,
            components,
            bytes: bytemuck::cast_slice::<T, u8>(data).to_vec(),
        })
    }

    /// Read one component.
    pub fn get(&self, tuple: usize, component: usize) -> f64 {
        let offset = (tuple * self.components + component) * self.ty.size();
        read_component(self.ty.storage_type(), &self.bytes[offset..]).to_f64()
    }

    /// Write one component, saturating to the element type.
    pub fn set(&mut self, tuple: usize, component: usize, value: f64) {
        let offset = (tuple * self.components + component) * self.ty.size();
        write_component(
            self.ty.storage_type(),
            &mut self.bytes[offset..],
            crate::core::convert::Num::Real(value),
        )
    }

    /// Allocate a buffer of type `ty` with the shape of `src` and convert it
    /// tuple by tuple.
    pub fn cast_from(src: &dyn ExternalArray, ty: ExternalType) -> ArrayResult<Self> {
        let from = src.external_type()?.storage_type();
        let to = ty.storage_type();
        let (tuples, components) = (src.tuples(), src.components());
        let mut out = TypedBuffer::new(ty, tuples, components);
        let bytes = src.as_bytes();
        for t in 0..tuples {
            for c in 0..components {
                let index = t * components + c;
                let value = read_component(from, &bytes[index * from.size()..]);
                write_component(to, &mut out.bytes[index * to.size()..], value);
            }
        }
        Ok(out)
    }
}

impl ExternalArray for TypedBuffer {
    fn external_type(&self) -> ArrayResult<ExternalType> {
        Ok(self.ty)
    }

    fn tuples(&self) -> usize {
        if self.components == 0 {
            0
        } else {
            self.bytes.len() / (self.components * self.ty.size())
        }
    }

    fn components(&self) -> usize {
        self.components
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ExternalArray for DynamicImage {
    fn external_type(&self) -> ArrayResult<ExternalType> {
        match self.color() {
            ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
                Ok(ExternalType::U8)
            }
            ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
                Ok(ExternalType::U16)
            }
            ColorType::Rgb32F | ColorType::Rgba32F => Ok(ExternalType::F32),
            other => Err(ArrayError::unsupported_type(
                ScalarType::Rgba,
                format!("for raster layout {:?}", other),
            )),
        }
    }

    fn tuples(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    fn components(&self) -> usize {
        self.color().channel_count() as usize
    }

    fn as_bytes(&self) -> &[u8] {
        DynamicImage::as_bytes(self)
    }
}

impl Memory {
    /// Cast, producing the result in the external library's type system.
    ///
    /// For wrapped external memory this allocates a new [`TypedBuffer`] and
    /// wraps it; other memory is cast natively.
    pub fn cast_external(&self, ty: ExternalType) -> ArrayResult<Memory> {
        match self.external_array() {
            Some(array) => {
                let converted = TypedBuffer::cast_from(array.as_ref(), ty)?;
                Memory::from_external(Arc::new(converted))
            }
            None => self.cast(ty.scalar_type()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::{Location, Platform};
    use image::{GrayImage, Luma};

    #[test]
    fn test_wrap_without_copy() {
        let buffer = Arc::new(TypedBuffer::from_slice(&[1i16, -2, 3, 4], 2).unwrap());
        let memory = Memory::from_external(buffer.clone()).unwrap();
        assert!(memory.is_external());
        assert!(!memory.is_owner());
        assert_eq!(memory.location(), Location::HOST);
        assert_eq!(memory.scalar_type(), ScalarType::I16);
        assert_eq!(memory.len(), 4);
        let bytes = memory.host_bytes().unwrap();
        assert_eq!(bytes.as_ptr(), buffer.as_bytes().as_ptr());
    }

    #[test]
    fn test_rejects_64bit_integers() {
        let buffer = Arc::new(TypedBuffer::from_slice(&[1u64, 2], 1).unwrap());
        assert!(matches!(
            Memory::from_external(buffer),
            Err(ArrayError::UnsupportedType {
                ty: ScalarType::U64,
                ..
            })
        ));
    }

    #[test]
    fn test_copy_and_free_leave_library_array() {
        let buffer = Arc::new(TypedBuffer::from_slice(&[5u8, 6, 7], 1).unwrap());
        let mut memory = Memory::from_external(buffer.clone()).unwrap();
        let copy = memory.copy_to(Platform::Cpu, 0).unwrap();
        assert!(!copy.is_external());
        assert_eq!(copy.to_vec::<u8>().unwrap(), vec![5, 6, 7]);

        assert_eq!(Arc::strong_count(&buffer), 2);
        memory.free();
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_write_makes_native() {
        let buffer = Arc::new(TypedBuffer::from_slice(&[1.0f32, 2.0], 1).unwrap());
        let mut memory = Memory::from_external(buffer.clone()).unwrap();
        memory.fill(9.0).unwrap();
        assert!(!memory.is_external());
        assert_eq!(memory.to_vec::<f32>().unwrap(), vec![9.0, 9.0]);
        assert_eq!(buffer.get(0, 0), 1.0);
    }

    #[test]
    fn test_library_cast_walks_tuples() {
        let buffer = Arc::new(TypedBuffer::from_slice(&[-1.5f32, 300.0, 12.7, 0.0], 2).unwrap());
        let memory = Memory::from_external(buffer).unwrap();
        let cast = memory.cast_external(ExternalType::U8).unwrap();
        assert!(cast.is_external());
        assert_eq!(cast.to_vec::<u8>().unwrap(), vec![0, 255, 12, 0]);

        let native = Memory::from_slice(&[1.0f64]).cast_external(ExternalType::I32).unwrap();
        assert!(!native.is_external());
        assert_eq!(native.to_vec::<i32>().unwrap(), vec![1]);
    }

    #[test]
    fn test_wrap_raster() {
        let raster = GrayImage::from_fn(3, 2, |x, y| Luma([(x + 10 * y) as u8]));
        let image = Arc::new(DynamicImage::ImageLuma8(raster));
        assert_eq!(image.components(), 1);
        assert_eq!(ExternalArray::tuples(image.as_ref()), 6);
        let memory = Memory::from_external(image).unwrap();
        assert_eq!(memory.to_vec::<u8>().unwrap(), vec![0, 1, 2, 10, 11, 12]);
    }
}
