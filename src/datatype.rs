//! Element types for typed-buffer transfers.
//!
//! This module provides the [`Datatype`] trait, a sealed trait that maps Rust
//! primitive types to the tags carried in typed-buffer frames. Typed buffers
//! move their elements as raw little-endian bytes and never go through the
//! generic value codec.
//!
//! # Supported Types
//!
//! | Rust Type | Tag Value | Width |
//! |-----------|-----------|-------|
//! | `f32`     | 0         | 4     |
//! | `f64`     | 1         | 8     |
//! | `i32`     | 2         | 4     |
//! | `i64`     | 3         | 8     |
//! | `u8`      | 4         | 1     |
//! | `u32`     | 5         | 4     |
//! | `u64`     | 6         | 8     |

use serde::{Deserialize, Serialize};

/// Seals [`Datatype`] against outside implementations.
mod sealed {
    pub trait Sealed {}
}

/// Tag identifying the element type of a typed buffer.
///
/// The discriminants are written into every typed-buffer frame and must not
/// be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
}

impl DatatypeTag {
    /// Width of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DatatypeTag::U8 => 1,
            DatatypeTag::F32 | DatatypeTag::I32 | DatatypeTag::U32 => 4,
            DatatypeTag::F64 | DatatypeTag::I64 | DatatypeTag::U64 => 8,
        }
    }

    /// Decode a tag byte read from a frame.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(DatatypeTag::F32),
            1 => Some(DatatypeTag::F64),
            2 => Some(DatatypeTag::I32),
            3 => Some(DatatypeTag::I64),
            4 => Some(DatatypeTag::U8),
            5 => Some(DatatypeTag::U32),
            6 => Some(DatatypeTag::U64),
            _ => None,
        }
    }
}

/// Trait for types that can travel in typed buffers.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
/// Supported types: [`f32`], [`f64`], [`i32`], [`i64`], [`u8`], [`u32`], [`u64`].
///
/// # Example
///
/// ```
/// use ferrogroup::{local, Result};
///
/// let sums = local::run(2, |world| -> Result<i64> {
///     let mut data = vec![0i64; 4];
///     if world.rank() == 0 {
///         data = vec![1, 2, 3, 4];
///     }
///     world.broadcast(&mut data, 0)?;
///     Ok(data.iter().sum())
/// })
/// .unwrap();
/// assert_eq!(sums, vec![10, 10]);
/// ```
pub trait Datatype:
    sealed::Sealed + Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// Tag written into typed-buffer frames.
    const TAG: DatatypeTag;

    /// Append this element's little-endian bytes.
    fn write_le(self, out: &mut Vec<u8>);

    /// Read one element from exactly `TAG.size_bytes()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_datatype {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Datatype for $ty {
            const TAG: DatatypeTag = $tag;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_datatype!(f32, DatatypeTag::F32);
impl_datatype!(f64, DatatypeTag::F64);
impl_datatype!(i32, DatatypeTag::I32);
impl_datatype!(i64, DatatypeTag::I64);
impl_datatype!(u8, DatatypeTag::U8);
impl_datatype!(u32, DatatypeTag::U32);
impl_datatype!(u64, DatatypeTag::U64);

/// Append the raw bytes of `data` to `out`.
pub(crate) fn write_elements<T: Datatype>(data: &[T], out: &mut Vec<u8>) {
    out.reserve(data.len() * T::TAG.size_bytes());
    for &value in data {
        value.write_le(out);
    }
}

/// Fill `out` from raw bytes. The caller has checked `bytes.len()`.
pub(crate) fn read_elements<T: Datatype>(bytes: &[u8], out: &mut [T]) {
    let width = T::TAG.size_bytes();
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(width)) {
        *slot = T::read_le(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(DatatypeTag::F32 as u8, 0);
        assert_eq!(DatatypeTag::F64 as u8, 1);
        assert_eq!(DatatypeTag::I32 as u8, 2);
        assert_eq!(DatatypeTag::I64 as u8, 3);
        assert_eq!(DatatypeTag::U8 as u8, 4);
        assert_eq!(DatatypeTag::U32 as u8, 5);
        assert_eq!(DatatypeTag::U64 as u8, 6);
    }

    #[test]
    fn from_u8_inverts_discriminant() {
        let tags = [
            DatatypeTag::F32,
            DatatypeTag::F64,
            DatatypeTag::I32,
            DatatypeTag::I64,
            DatatypeTag::U8,
            DatatypeTag::U32,
            DatatypeTag::U64,
        ];
        for tag in tags {
            assert_eq!(DatatypeTag::from_u8(tag as u8), Some(tag));
        }
        assert_eq!(DatatypeTag::from_u8(7), None);
        assert_eq!(DatatypeTag::from_u8(255), None);
    }

    #[test]
    fn size_matches_rust_width() {
        assert_eq!(f32::TAG.size_bytes(), std::mem::size_of::<f32>());
        assert_eq!(f64::TAG.size_bytes(), std::mem::size_of::<f64>());
        assert_eq!(i32::TAG.size_bytes(), std::mem::size_of::<i32>());
        assert_eq!(i64::TAG.size_bytes(), std::mem::size_of::<i64>());
        assert_eq!(u8::TAG.size_bytes(), std::mem::size_of::<u8>());
        assert_eq!(u32::TAG.size_bytes(), std::mem::size_of::<u32>());
        assert_eq!(u64::TAG.size_bytes(), std::mem::size_of::<u64>());
    }

    #[test]
    fn elements_survive_raw_bytes() {
        let data = [1.5f64, -0.0, f64::MAX, 3.25];
        let mut bytes = Vec::new();
        write_elements(&data, &mut bytes);
        assert_eq!(bytes.len(), 32);

        let mut back = [0.0f64; 4];
        read_elements(&bytes, &mut back);
        assert_eq!(back, data);
    }

    #[test]
    fn bytes_are_little_endian() {
        let mut bytes = Vec::new();
        0x0102_0304u32.write_le(&mut bytes);
        assert_eq!(bytes, vec![4, 3, 2, 1]);
    }
}
