//! Jar archives.
//!
//! A [`JarArchive`] is the decoded form of one input jar: every `*.class` entry decoded
//! into a [`ClassGroup`], every other entry kept byte for byte as a [`Resource`], and the
//! SHA-1 of the input for reporting. Writing encodes the (possibly transformed) group again
//! and stores classes and resources deflated.

use std::{
    fmt::Write as _,
    io::{Cursor, Read, Write},
    path::Path,
};

use rayon::prelude::*;
use sha1::{Digest, Sha1};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    classfile::{ClassCodec, JvmCodec},
    file::{Backend, Memory, Physical},
    model::ClassGroup,
    Error, Result,
};

/// A non-class archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Path inside the archive.
    pub name: String,
    /// Uncompressed contents.
    pub data: Vec<u8>,
}

/// Classes and resources of one jar.
#[derive(Debug)]
pub struct JarArchive {
    group: ClassGroup,
    resources: Vec<Resource>,
    sha1: String,
}

fn with_entry(entry: &str, error: Error) -> Error {
    match error {
        Error::Malformed {
            message,
            file,
            line,
        } => Error::Malformed {
            message: format!("{entry}: {message}"),
            file,
            line,
        },
        Error::NotSupported(message) => Error::NotSupported(format!("{entry}: {message}")),
        other => other,
    }
}

impl JarArchive {
    /// Opens and decodes the jar at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] or [`crate::Error::Zip`] if the archive cannot be read,
    /// and any class decoding error, prefixed with the entry name. A single undecodable
    /// class fails the whole load.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(&Physical::new(path)?, &JvmCodec::new())
    }

    /// Decodes a jar held in memory.
    ///
    /// # Errors
    ///
    /// See [`JarArchive::open`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::load(&Memory::new(data), &JvmCodec::new())
    }

    /// Decodes the jar in `backend` with `codec`.
    ///
    /// # Errors
    ///
    /// See [`JarArchive::open`].
    pub fn load(backend: &dyn Backend, codec: &dyn ClassCodec) -> Result<Self> {
        if backend.is_empty() {
            return Err(Error::Empty);
        }

        let mut archive = ZipArchive::new(Cursor::new(backend.data()))?;
        let mut entries = Vec::new();
        let mut resources = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            if name.ends_with(".class") {
                entries.push((name, data));
            } else {
                resources.push(Resource { name, data });
            }
        }

        let classes = entries
            .par_iter()
            .map(|(name, data)| codec.decode(data).map_err(|error| with_entry(name, error)))
            .collect::<Result<Vec<_>>>()?;
        let group = ClassGroup::from_classes(classes)?;

        let mut sha1 = String::with_capacity(40);
        for byte in Sha1::digest(backend.data()) {
            let _ = write!(sha1, "{byte:02x}");
        }

        log::info!(
            "Loaded {} classes and {} resources (sha1 {}).",
            group.len(),
            resources.len(),
            sha1
        );

        Ok(JarArchive {
            group,
            resources,
            sha1,
        })
    }

    /// The decoded classes.
    #[must_use]
    pub fn group(&self) -> &ClassGroup {
        &self.group
    }

    /// The decoded classes, for transformation.
    pub fn group_mut(&mut self) -> &mut ClassGroup {
        &mut self.group
    }

    /// Consumes the archive and returns its classes.
    #[must_use]
    pub fn into_group(self) -> ClassGroup {
        self.group
    }

    /// Non-class entries, in archive order.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Lower-case hex SHA-1 of the input bytes.
    #[must_use]
    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    /// Encodes the classes and builds a jar in memory.
    ///
    /// Classes are written in group order, followed by the resources in archive order.
    ///
    /// # Errors
    ///
    /// Returns any class encoding error, prefixed with the class name, and
    /// [`crate::Error::Zip`] if the archive cannot be written.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(&JvmCodec::new())
    }

    /// Like [`JarArchive::to_bytes`] with an explicit codec.
    ///
    /// # Errors
    ///
    /// See [`JarArchive::to_bytes`].
    pub fn to_bytes_with(&self, codec: &dyn ClassCodec) -> Result<Vec<u8>> {
        let classes = self
            .group
            .par_iter()
            .map(|class| {
                codec
                    .encode(class)
                    .map(|bytes| (format!("{}.class", class.name), bytes))
                    .map_err(|error| with_entry(&class.name, error))
            })
            .collect::<Result<Vec<_>>>()?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in &classes {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(bytes)?;
        }
        for resource in &self.resources {
            writer.start_file(resource.name.as_str(), options)?;
            writer.write_all(&resource.data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Encodes the classes and writes the jar to `path`.
    ///
    /// # Errors
    ///
    /// See [`JarArchive::to_bytes`]; additionally [`crate::Error::Io`] if the file cannot
    /// be written.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), &bytes)?;
        log::info!(
            "Wrote {} classes to {}.",
            self.group.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        model::{ClassEntry, MethodAccessFlags, MethodEntry},
    };

    fn sample_jar() -> Vec<u8> {
        let codec = JvmCodec::new();
        let mut class = ClassEntry::new("pkg/a");
        class.methods.push(
            MethodEntry::new("m", "()V", MethodAccessFlags::STATIC)
                .with_code(InsnBuilder::new().return_().build().unwrap()),
        );

        let options = SimpleFileOptions::default();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("pkg/", options).unwrap();
        writer.start_file("pkg/a.class", options).unwrap();
        writer.write_all(&codec.encode(&class).unwrap()).unwrap();
        writer.start_file("META-INF/MANIFEST.MF", options).unwrap();
        writer.write_all(b"Manifest-Version: 1.0\r\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_load_and_rewrite() {
        let jar = JarArchive::from_bytes(sample_jar()).unwrap();
        assert_eq!(jar.group().len(), 1);
        assert!(jar.group().class("pkg/a").is_some());
        assert_eq!(jar.resources().len(), 1);
        assert_eq!(jar.resources()[0].name, "META-INF/MANIFEST.MF");
        assert_eq!(jar.sha1().len(), 40);

        let again = JarArchive::from_bytes(jar.to_bytes().unwrap()).unwrap();
        assert_eq!(again.group().len(), 1);
        assert_eq!(again.resources(), jar.resources());
    }

    #[test]
    fn test_bad_class_names_entry() {
        let options = SimpleFileOptions::default();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("broken.class", options).unwrap();
        writer.write_all(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00]).unwrap();
        let data = writer.finish().unwrap().into_inner();

        match JarArchive::from_bytes(data) {
            Err(Error::OutOfBounds { .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            JarArchive::from_bytes(b"not a zip".to_vec()),
            Err(Error::Zip(_))
        ));
    }
}
