//! Cursor-based reader over a byte slice.
//!
//! [`Parser`] keeps a position into borrowed data and exposes bounds-checked, big-endian
//! reads used by the class-file decoder. Every read either succeeds and advances or fails
//! with [`crate::Error::OutOfBounds`] and leaves the position where it was.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jarscope::Parser;
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x32];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
//! assert_eq!(parser.read_be::<u16>()?, 0);
//! assert_eq!(parser.read_be::<u16>()?, 50);
//! # Ok::<(), jarscope::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, ClassIO},
    Result,
};

/// A positioned reader over a borrowed byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there are unread bytes left.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Moves the cursor to an absolute position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skips `step` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Advances to the next multiple of `alignment`, measured from `base`.
    ///
    /// Switch instructions align their operands relative to the start of the code array
    /// rather than the start of the class file, so the base is explicit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the padding would cross the end of the data.
    pub fn align_from(&mut self, base: usize, alignment: usize) -> Result<()> {
        let relative = self.position.saturating_sub(base);
        let padding = (alignment - (relative % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Returns the current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the underlying data.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Reads a big-endian value and advances.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_be<T: ClassIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Reads `len` raw bytes and advances.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..start + len])
    }

    /// Reads a class-file "modified UTF-8" string prefixed by its `u2` byte length.
    ///
    /// Embedded NULs are encoded as `C0 80` and supplementary characters as surrogate
    /// pairs of three-byte sequences; both are decoded back into a Rust `String`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the string is truncated, or
    /// [`crate::Error::Malformed`] if the bytes are not valid modified UTF-8.
    pub fn read_modified_utf8(&mut self) -> Result<String> {
        let length = self.read_be::<u16>()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;
        decode_modified_utf8(bytes).ok_or_else(|| {
            malformed_error!(
                "Invalid modified UTF-8 string at offset {}-{}",
                start,
                start + length
            )
        })
    }
}

/// Decodes modified UTF-8 into a `String`, returning `None` on malformed input.
#[must_use]
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        if !s.contains('\0') {
            return Some(s.to_string());
        }
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = u16::from(bytes[i]);
        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = u16::from(*bytes.get(i + 1)?);
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = u16::from(*bytes.get(i + 1)?);
            let b2 = u16::from(*bytes.get(i + 2)?);
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            return None;
        }
    }

    String::from_utf16(&units).ok()
}

/// Encodes a string as modified UTF-8 (without the length prefix).
#[must_use]
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push((0xC0 | ((unit >> 6) & 0x1F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
            _ => {
                out.push((0xE0 | ((unit >> 12) & 0x0F)) as u8);
                out.push((0x80 | ((unit >> 6) & 0x3F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
        }
    }
    out
}
