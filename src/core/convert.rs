//! Saturating element conversion.
//!
//! Every integral or real component converts to every other one by clamping
//! into the destination range and then converting straight (truncating
//! towards zero for real to integral). NaN converts to 0 for integral
//! destinations. Conversion to `binary` and `status` maps non-zero to 1.
//!
//! Composite types convert component-wise when their dimensions agree. A
//! one-component source broadcasts into every component of a composite
//! destination, except for complex destinations where it sets the real part.

use crate::core::error::{ArrayError, ArrayResult};
use crate::core::scalar::ScalarType;

/// An exact intermediate value read from a component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    /// Integral component, wide enough for every integer type
    Int(i128),
    /// Floating component
    Real(f64),
}

impl Num {
    /// Convert to `f64`. 64-bit integers may lose precision.
    #[inline]
    pub fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Real(r) => r,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Real(r) => r == 0.0 || r.is_nan(),
        }
    }
}

/// Clamp a value into the range of the component type `to`.
pub fn saturate(value: Num, to: ScalarType) -> Num {
    let to = to.component_type();
    if matches!(to, ScalarType::Binary | ScalarType::Status) {
        return Num::Int(if value.is_zero() { 0 } else { 1 });
    }
    match (to.integral_range(), value) {
        (Some((lo, hi)), Num::Int(i)) => Num::Int(i.clamp(lo, hi)),
        (Some((lo, hi)), Num::Real(r)) => {
            if r.is_nan() {
                Num::Int(0)
            } else {
                // `as` saturates at the i128 limits, which enclose every type range
                Num::Int((r as i128).clamp(lo, hi))
            }
        }
        (None, v) => {
            let r = v.to_f64();
            if to == ScalarType::F32 && !r.is_nan() {
                Num::Real(r.clamp(f32::MIN as f64, f32::MAX as f64))
            } else {
                Num::Real(r)
            }
        }
    }
}

/// Saturating conversion of an `f64` into the range of `to`, returned as `f64`.
pub fn saturate_f64(value: f64, to: ScalarType) -> f64 {
    saturate(Num::Real(value), to).to_f64()
}

/// Read one component of plain scalar type `ty` from the front of `bytes`.
#[inline]
pub fn read_component(ty: ScalarType, bytes: &[u8]) -> Num {
    use bytemuck::pod_read_unaligned as read;
    use ScalarType::*;
    match ty.component_type() {
        Binary | Status | U8 => Num::Int(bytes[0] as i128),
        I8 => Num::Int(bytes[0] as i8 as i128),
        I16 => Num::Int(read::<i16>(&bytes[..2]) as i128),
        U16 => Num::Int(read::<u16>(&bytes[..2]) as i128),
        I32 => Num::Int(read::<i32>(&bytes[..4]) as i128),
        U32 => Num::Int(read::<u32>(&bytes[..4]) as i128),
        I64 => Num::Int(read::<i64>(&bytes[..8]) as i128),
        U64 => Num::Int(read::<u64>(&bytes[..8]) as i128),
        F32 => Num::Real(read::<f32>(&bytes[..4]) as f64),
        _ => Num::Real(read::<f64>(&bytes[..8])),
    }
}

/// Write one component of plain scalar type `ty` to the front of `bytes`,
/// saturating the value first.
#[inline]
pub fn write_component(ty: ScalarType, bytes: &mut [u8], value: Num) {
    use ScalarType::*;
    let ty = ty.component_type();
    let value = saturate(value, ty);
    match (ty, value) {
        (Binary | Status | U8, Num::Int(i)) => bytes[0] = i as u8,
        (I8, Num::Int(i)) => bytes[0] = (i as i8) as u8,
        (I16, Num::Int(i)) => bytes[..2].copy_from_slice(&(i as i16).to_ne_bytes()),
        (U16, Num::Int(i)) => bytes[..2].copy_from_slice(&(i as u16).to_ne_bytes()),
        (I32, Num::Int(i)) => bytes[..4].copy_from_slice(&(i as i32).to_ne_bytes()),
        (U32, Num::Int(i)) => bytes[..4].copy_from_slice(&(i as u32).to_ne_bytes()),
        (I64, Num::Int(i)) => bytes[..8].copy_from_slice(&(i as i64).to_ne_bytes()),
        (U64, Num::Int(i)) => bytes[..8].copy_from_slice(&(i as u64).to_ne_bytes()),
        (F32, v) => bytes[..4].copy_from_slice(&(v.to_f64() as f32).to_ne_bytes()),
        (_, v) => bytes[..8].copy_from_slice(&v.to_f64().to_ne_bytes()),
    }
}

/// Read one plain scalar element as `f64`.
#[inline]
pub fn read_f64(ty: ScalarType, bytes: &[u8]) -> f64 {
    read_component(ty, bytes).to_f64()
}

/// Write one plain scalar element from `f64`, saturating.
#[inline]
pub fn write_f64(ty: ScalarType, bytes: &mut [u8], value: f64) {
    write_component(ty, bytes, Num::Real(value))
}

/// Check that elements of type `from` can be converted to type `to`.
pub fn check_cast(from: ScalarType, to: ScalarType) -> ArrayResult<()> {
    if from.dimension() == to.dimension() || from.dimension() == 1 {
        Ok(())
    } else {
        Err(ArrayError::InvalidConversion { from, to })
    }
}

/// Convert one element of type `from` in `src` to type `to` in `dst`.
pub fn cast_element(
    from: ScalarType,
    src: &[u8],
    to: ScalarType,
    dst: &mut [u8],
) -> ArrayResult<()> {
    check_cast(from, to)?;
    let from_comp = from.component_type();
    let to_comp = to.component_type();
    let from_step = from_comp.size();
    let to_step = to_comp.size();

    if from.dimension() == to.dimension() {
        for c in 0..to.dimension() {
            let value = read_component(from_comp, &src[c * from_step..]);
            write_component(to_comp, &mut dst[c * to_step..], value);
        }
    } else if to.is_complex() {
        let value = read_component(from_comp, src);
        write_component(to_comp, dst, value);
        write_component(to_comp, &mut dst[to_step..], Num::Real(0.0));
    } else {
        let value = read_component(from_comp, src);
        for c in 0..to.dimension() {
            write_component(to_comp, &mut dst[c * to_step..], value);
        }
    }
    Ok(())
}

/// Convert a packed run of elements. `src` and `dst` must hold the same count.
pub fn cast_slice(from: ScalarType, src: &[u8], to: ScalarType, dst: &mut [u8]) -> ArrayResult<()> {
    check_cast(from, to)?;
    let count = src.len() / from.size();
    if dst.len() != count * to.size() {
        return Err(ArrayError::SizeMismatch(format!(
            "cast of {} elements into a buffer of {} bytes",
            count,
            dst.len()
        )));
    }
    if from == to {
        dst.copy_from_slice(src);
        return Ok(());
    }
    for (s, d) in src.chunks_exact(from.size()).zip(dst.chunks_exact_mut(to.size())) {
        cast_element(from, s, to, d)?;
    }
    Ok(())
}

/// Encode a scalar value into one element of any type, broadcasting into
/// composite types the way [`cast_element`] does.
pub fn encode_element(ty: ScalarType, value: f64) -> Vec<u8> {
    let mut bytes = vec![0u8; ty.size()];
    let src = value.to_ne_bytes();
    // a one-component source always passes `check_cast`
    let _ = cast_element(ScalarType::F64, &src, ty, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn convert(value: f64, to: ScalarType) -> f64 {
        let bytes = encode_element(to, value);
        read_f64(to, &bytes)
    }

    #[test]
    fn test_saturating_boundaries() {
        assert_eq!(convert(300.0, ScalarType::I8), 127.0);
        assert_eq!(convert(-5.0, ScalarType::U8), 0.0);
        assert_eq!(convert(-1e12, ScalarType::I32), i32::MIN as f64);
        assert_eq!(convert(2.9, ScalarType::U16), 2.0);
        assert_eq!(convert(-2.9, ScalarType::I16), -2.0);
        assert_eq!(convert(f64::NAN, ScalarType::I32), 0.0);
        assert_eq!(convert(1e300, ScalarType::F32), f32::MAX as f64);
        assert_eq!(convert(0.25, ScalarType::Binary), 1.0);
        assert_eq!(convert(0.0, ScalarType::Binary), 0.0);
    }

    #[test]
    fn test_u8_to_i8() {
        let src = [0u8, 127, 255];
        let mut dst = [0u8; 3];
        cast_slice(ScalarType::U8, &src, ScalarType::I8, &mut dst).unwrap();
        assert_eq!(dst.map(|b| b as i8), [0, 127, 127]);
    }

    #[test]
    fn test_exact_64bit_integers() {
        let big = u64::MAX - 1;
        let src = big.to_ne_bytes();
        let mut dst = [0u8; 8];
        cast_slice(ScalarType::U64, &src, ScalarType::I64, &mut dst).unwrap();
        assert_eq!(i64::from_ne_bytes(dst), i64::MAX);
        cast_slice(ScalarType::U64, &src, ScalarType::U64, &mut dst).unwrap();
        assert_eq!(u64::from_ne_bytes(dst), big);
    }

    #[test]
    fn test_vector_rules() {
        assert!(check_cast(ScalarType::F32, ScalarType::F64x3).is_ok());
        assert!(check_cast(ScalarType::F32x3, ScalarType::F64x3).is_ok());
        assert!(check_cast(ScalarType::F64x1, ScalarType::I16).is_ok());
        assert!(matches!(
            check_cast(ScalarType::F32x3, ScalarType::F32),
            Err(ArrayError::InvalidConversion { .. })
        ));
        assert!(check_cast(ScalarType::F32x3, ScalarType::F32x4).is_err());
        assert!(check_cast(ScalarType::C64, ScalarType::F64).is_err());
    }

    #[test]
    fn test_broadcast_and_complex() {
        let v = encode_element(ScalarType::F32x3, 2.5);
        let parts: &[f32] = bytemuck::cast_slice(&v);
        assert_eq!(parts, &[2.5, 2.5, 2.5]);

        let c = encode_element(ScalarType::C64, 4.0);
        let parts: &[f64] = bytemuck::cast_slice(&c);
        assert_eq!(parts, &[4.0, 0.0]);

        let rgb = encode_element(ScalarType::Rgb, 300.0);
        assert_eq!(rgb, vec![255, 255, 255]);
    }

    proptest! {
        #[test]
        fn prop_integral_saturation(x in any::<i64>()) {
            let expected = (x as i128).clamp(i16::MIN as i128, i16::MAX as i128) as f64;
            let mut dst = [0u8; 2];
            cast_slice(ScalarType::I64, &x.to_ne_bytes(), ScalarType::I16, &mut dst).unwrap();
            prop_assert_eq!(i16::from_ne_bytes(dst) as f64, expected);
        }

        #[test]
        fn prop_real_saturation(x in -1e6f64..1e6f64) {
            let got = convert(x, ScalarType::U8);
            let expected = x.trunc().clamp(0.0, 255.0);
            prop_assert_eq!(got, expected);
        }
    }
}
