//! Memory-mapped file backend.
//!
//! Jars are read through a read-only shared mapping, so only the pages the zip reader
//! actually touches (central directory, then each entry once) are loaded.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error, Result};

/// A file on disk, mapped into memory.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Maps the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] for an empty file.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        Self::from_std_file(&file)
    }

    /// Maps an already opened file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if mapping fails and [`crate::Error::Empty`] for an
    /// empty file.
    pub fn from_std_file(file: &fs::File) -> Result<Physical> {
        if file.metadata()?.len() == 0 {
            return Err(Error::Empty);
        }

        // SAFETY: the mapping is read-only; concurrent truncation by another process is
        // outside what this tool guards against.
        let data = unsafe { Mmap::map(file) }?;
        Ok(Physical { data })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_maps_file() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let physical = Physical::new(&path).unwrap();
        assert_eq!(physical.data(), fs::read(&path).unwrap().as_slice());
        assert_eq!(&physical.data_slice(0, 9).unwrap()[..], b"[package]");
    }

    #[test]
    fn test_missing_file() {
        let result = Physical::new("/nonexistent/jarscope/input.jar");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
