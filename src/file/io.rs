//! Big-endian byte order helpers for class-file reading and writing.
//!
//! The class-file format stores every multi-byte quantity in big-endian order. This module
//! provides the [`crate::file::io::ClassIO`] trait, implemented for all primitive integer and
//! floating point types, together with bounds-checked free functions that read from a slice
//! at a tracked offset or append to a growing output buffer.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jarscope::file::io::{read_be_at, write_be};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x32];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! let major: u16 = read_be_at(&data, &mut offset)?;
//! assert_eq!(magic, 0xCAFE_BABE);
//! assert_eq!(major, 50);
//!
//! let mut out = Vec::new();
//! write_be(&mut out, 0xCAFE_BABEu32);
//! assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), jarscope::Error>(())
//! ```

use crate::Result;

/// Trait for types that can be read from and written to big-endian byte sequences.
pub trait ClassIO: Sized {
    /// Fixed-size byte array representation of the type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Converts big-endian bytes into the value.
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Converts the value into big-endian bytes.
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $len];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Reads a big-endian value from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the value.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Reads a big-endian value at `offset` and advances the offset past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value would extend past the end of `data`.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends a big-endian value to `out`.
pub fn write_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}
