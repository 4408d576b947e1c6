//! Scalar type descriptors and the per-tuple status flag.
//!
//! [`ScalarType`] is a closed enumeration of every element type a memory
//! object can hold: plain integral and real scalars, complex numbers, packed
//! colours, and small fixed-width vectors and matrices. Each composite type is
//! described by its component type and dimension, which is all the conversion
//! layer in [`crate::core::convert`] needs.

use crate::core::error::ArrayError;
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Element type of a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 0/1 byte
    Binary,
    /// Signed-byte tuple status (see [`Status`])
    Status,
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
    /// Complex with 32-bit float parts
    C32,
    /// Complex with 64-bit float parts
    C64,
    /// Packed 8-bit RGB
    Rgb,
    /// Packed 8-bit RGBA
    Rgba,
    /// 1-vector of 32-bit floats
    F32x1,
    /// 2-vector of 32-bit floats
    F32x2,
    /// 3-vector of 32-bit floats
    F32x3,
    /// 4-vector of 32-bit floats
    F32x4,
    /// 1-vector of 64-bit floats
    F64x1,
    /// 2-vector of 64-bit floats
    F64x2,
    /// 3-vector of 64-bit floats
    F64x3,
    /// 4-vector of 64-bit floats
    F64x4,
    /// 2x2 matrix of 32-bit floats
    F32x2x2,
    /// 3x3 matrix of 32-bit floats
    F32x3x3,
    /// 3x4 matrix of 32-bit floats
    F32x3x4,
    /// 4x4 matrix of 32-bit floats
    F32x4x4,
    /// 2x2 matrix of 64-bit floats
    F64x2x2,
    /// 3x3 matrix of 64-bit floats
    F64x3x3,
    /// 3x4 matrix of 64-bit floats
    F64x3x4,
    /// 4x4 matrix of 64-bit floats
    F64x4x4,
}

impl ScalarType {
    /// Every scalar type, in declaration order.
    pub const ALL: [ScalarType; 32] = [
        ScalarType::Binary,
        ScalarType::Status,
        ScalarType::I8,
        ScalarType::U8,
        ScalarType::I16,
        ScalarType::U16,
        ScalarType::I32,
        ScalarType::U32,
        ScalarType::I64,
        ScalarType::U64,
        ScalarType::F32,
        ScalarType::F64,
        ScalarType::C32,
        ScalarType::C64,
        ScalarType::Rgb,
        ScalarType::Rgba,
        ScalarType::F32x1,
        ScalarType::F32x2,
        ScalarType::F32x3,
        ScalarType::F32x4,
        ScalarType::F64x1,
        ScalarType::F64x2,
        ScalarType::F64x3,
        ScalarType::F64x4,
        ScalarType::F32x2x2,
        ScalarType::F32x3x3,
        ScalarType::F32x3x4,
        ScalarType::F32x4x4,
        ScalarType::F64x2x2,
        ScalarType::F64x3x3,
        ScalarType::F64x3x4,
        ScalarType::F64x4x4,
    ];

    /// Floating point type the `real` alias resolves to.
    #[cfg(not(feature = "float-by-default"))]
    pub const REAL: ScalarType = ScalarType::F64;
    /// Floating point type the `real` alias resolves to.
    #[cfg(feature = "float-by-default")]
    pub const REAL: ScalarType = ScalarType::F32;

    /// Complex type the `complex` alias resolves to.
    #[cfg(not(feature = "float-by-default"))]
    pub const COMPLEX: ScalarType = ScalarType::C64;
    /// Complex type the `complex` alias resolves to.
    #[cfg(feature = "float-by-default")]
    pub const COMPLEX: ScalarType = ScalarType::C32;

    /// Get the scalar type of a single component.
    ///
    /// Plain scalars are their own component type.
    pub fn component_type(&self) -> ScalarType {
        use ScalarType::*;
        match self {
            C32 | F32x1 | F32x2 | F32x3 | F32x4 | F32x2x2 | F32x3x3 | F32x3x4 | F32x4x4 => F32,
            C64 | F64x1 | F64x2 | F64x3 | F64x4 | F64x2x2 | F64x3x3 | F64x3x4 | F64x4x4 => F64,
            Rgb | Rgba => U8,
            other => *other,
        }
    }

    /// Number of scalar components in one element.
    pub fn dimension(&self) -> usize {
        use ScalarType::*;
        match self {
            C32 | C64 | F32x2 | F64x2 => 2,
            Rgb | F32x3 | F64x3 => 3,
            Rgba | F32x4 | F64x4 | F32x2x2 | F64x2x2 => 4,
            F32x3x3 | F64x3x3 => 9,
            F32x3x4 | F64x3x4 => 12,
            F32x4x4 | F64x4x4 => 16,
            _ => 1,
        }
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        use ScalarType::*;
        let component = match self.component_type() {
            Binary | Status | I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 => 8,
            _ => unreachable!("component types are plain scalars"),
        };
        component * self.dimension()
    }

    /// Whether this is a plain integral or real scalar.
    pub fn is_scalar(&self) -> bool {
        self.component_type() == *self
    }

    /// Whether this is a plain integral scalar (including binary and status).
    pub fn is_integral(&self) -> bool {
        use ScalarType::*;
        matches!(self, Binary | Status | I8 | U8 | I16 | U16 | I32 | U32 | I64 | U64)
    }

    /// Whether this is a plain floating point scalar.
    pub fn is_floating(&self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Whether this is a complex type.
    pub fn is_complex(&self) -> bool {
        matches!(self, ScalarType::C32 | ScalarType::C64)
    }

    /// Whether this is a composite (vector, matrix, colour or complex) type.
    pub fn is_vector(&self) -> bool {
        !self.is_scalar()
    }

    /// Get the canonical lexicon name of this type.
    pub fn name(&self) -> &'static str {
        use ScalarType::*;
        match self {
            Binary => "binary",
            Status => "status",
            I8 => "char",
            U8 => "uchar",
            I16 => "short",
            U16 => "ushort",
            I32 => "int",
            U32 => "uint",
            I64 => "int64",
            U64 => "uint64",
            F32 => "float",
            F64 => "double",
            C32 => "cfloat",
            C64 => "cdouble",
            Rgb => "rgb",
            Rgba => "rgba",
            F32x1 => "float1",
            F32x2 => "float2",
            F32x3 => "float3",
            F32x4 => "float4",
            F64x1 => "double1",
            F64x2 => "double2",
            F64x3 => "double3",
            F64x4 => "double4",
            F32x2x2 => "float2x2",
            F32x3x3 => "float3x3",
            F32x3x4 => "float3x4",
            F32x4x4 => "float4x4",
            F64x2x2 => "double2x2",
            F64x3x3 => "double3x3",
            F64x3x4 => "double3x4",
            F64x4x4 => "double4x4",
        }
    }

    /// Smallest value of the component type.
    pub fn min_value(&self) -> f64 {
        use ScalarType::*;
        match self.component_type() {
            Binary | Status | U8 | U16 | U32 | U64 => 0.0,
            I8 => i8::MIN as f64,
            I16 => i16::MIN as f64,
            I32 => i32::MIN as f64,
            I64 => i64::MIN as f64,
            F32 => f32::MIN as f64,
            _ => f64::MIN,
        }
    }

    /// Largest value of the component type.
    pub fn max_value(&self) -> f64 {
        use ScalarType::*;
        match self.component_type() {
            Binary | Status => 1.0,
            I8 => i8::MAX as f64,
            U8 => u8::MAX as f64,
            I16 => i16::MAX as f64,
            U16 => u16::MAX as f64,
            I32 => i32::MAX as f64,
            U32 => u32::MAX as f64,
            I64 => i64::MAX as f64,
            U64 => u64::MAX as f64,
            F32 => f32::MAX as f64,
            _ => f64::MAX,
        }
    }

    /// Integral range of the component type, if it is integral.
    pub(crate) fn integral_range(&self) -> Option<(i128, i128)> {
        use ScalarType::*;
        match self.component_type() {
            Binary | Status => Some((0, 1)),
            I8 => Some((i8::MIN as i128, i8::MAX as i128)),
            U8 => Some((0, u8::MAX as i128)),
            I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            U16 => Some((0, u16::MAX as i128)),
            I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            U32 => Some((0, u32::MAX as i128)),
            I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            U64 => Some((0, u64::MAX as i128)),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarType {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let ty = match lower.as_str() {
            "bool" | "boolean" | "bit" | "binaryvalue" => ScalarType::Binary,
            "grey" | "greyvalue" => ScalarType::I16,
            "byte" | "unsigned char" => ScalarType::U8,
            "signed char" => ScalarType::I8,
            "unsigned short" => ScalarType::U16,
            "unsigned int" => ScalarType::U32,
            "longlong" | "long long" => ScalarType::I64,
            "ulonglong" | "unsigned long long" => ScalarType::U64,
            "real" => ScalarType::REAL,
            "complex" => ScalarType::COMPLEX,
            "color" | "colour" => ScalarType::Rgba,
            other => ScalarType::ALL
                .iter()
                .copied()
                .find(|ty| ty.name() == other)
                .ok_or_else(|| ArrayError::Parse {
                    what: "scalar type",
                    input: s.to_string(),
                })?,
        };
        Ok(ty)
    }
}

impl Serialize for ScalarType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ScalarType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-tuple flag controlling whether filters process a tuple.
///
/// Stored as one byte per tuple; zeroed status memory is all [`Status::Active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Processed by filters
    #[default]
    Active = 0,
    /// Skipped by filters
    Passive = 1,
}

impl Status {
    /// Decode a status byte. Any non-zero byte is Passive.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        if byte == 0 {
            Status::Active
        } else {
            Status::Passive
        }
    }

    /// Encode as a status byte.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether the tuple participates in filtering.
    #[inline]
    pub fn is_active(self) -> bool {
        self == Status::Active
    }

    /// Flip Active and Passive.
    #[inline]
    pub fn negate(self) -> Self {
        match self {
            Status::Active => Status::Passive,
            Status::Passive => Status::Active,
        }
    }
}

/// Rust element types with a fixed [`ScalarType`].
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    /// Scalar type of this element.
    const TYPE: ScalarType;
}

macro_rules! impl_element {
    ($($t:ty => $st:ident),* $(,)?) => {
        $(impl Element for $t {
            const TYPE: ScalarType = ScalarType::$st;
        })*
    };
}

impl_element!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Complex32 => C32,
    Complex64 => C64,
);
