//! Input files and the jar container.
//!
//! This module abstracts over where archive bytes come from and turns a jar into a
//! [`crate::model::ClassGroup`] plus the resources that travel with it.
//!
//! # Key Components
//!
//! - [`Backend`] - read-only byte source, implemented by [`Physical`] (memory-mapped file)
//!   and [`Memory`] (owned buffer)
//! - [`JarArchive`] - decoded classes, verbatim resources and the input digest
//! - [`parser::Parser`] - bounds-checked big-endian cursor used by the class file decoder
//! - [`io`] - big-endian read/write helpers
//!
//! # Examples
//!
//! ```rust,no_run
//! use jarscope::file::JarArchive;
//! use std::path::Path;
//!
//! let mut jar = JarArchive::open(Path::new("gamepack.jar"))?;
//! println!("{} classes, sha1 {}", jar.group().len(), jar.sha1());
//! jar.write(Path::new("gamepack.deob.jar"))?;
//! # Ok::<(), jarscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod jar;
mod memory;
mod physical;

pub use jar::{JarArchive, Resource};
pub use memory::Memory;
pub use physical::Physical;

use crate::Result;

/// A read-only source of input bytes.
///
/// Implementations must be thread-safe; class entries are decoded on rayon workers.
pub trait Backend: Send + Sync {
    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range extends past the end of the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };
        self.data().get(offset..end).ok_or(out_of_bounds_error!())
    }

    /// Returns the whole buffer.
    fn data(&self) -> &[u8];

    /// Returns the length of the buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
