//! Class file codec.
//!
//! Translates between the binary class file format (JVMS §4) and the in-memory
//! [`ClassEntry`] model. The codec is a seam: the deobfuscation passes never see bytes,
//! and anything that can produce a [`ClassEntry`] can feed the pipeline.
//!
//! # Decoding
//!
//! The constant pool, the class header, fields and methods are parsed. The
//! `ConstantValue`, `Signature`, `Exceptions`, `Code`, `SourceFile` and `BootstrapMethods`
//! attributes are understood. `LineNumberTable` entries become [`crate::assembly::Insn::Line`]
//! markers. Local variable tables, stack map frames and every other attribute are dropped.
//!
//! # Encoding
//!
//! The constant pool is rebuilt from scratch and deduplicated. Method bodies are laid out
//! with label resolution, `max_stack` and `max_locals` are recomputed, and the class is
//! written as version 50 at most unless it relies on `invokedynamic`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jarscope::classfile::{ClassCodec, JvmCodec};
//!
//! let codec = JvmCodec::new();
//! let class = codec.decode(&std::fs::read("client.class")?)?;
//! let bytes = codec.encode(&class)?;
//! ```

mod constpool;
mod reader;
mod writer;

pub use constpool::{ConstantPool, MemberRef, PoolBuilder, PoolEntry};

use crate::{analysis::DEFAULT_MAX_ITERATIONS, model::ClassEntry, Result};

/// `0xCAFEBABE`.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Major version of Java 6, the newest format that verifies without stack map frames.
pub const JAVA_6: u16 = 50;

/// Converts between class file bytes and [`ClassEntry`].
pub trait ClassCodec: Send + Sync {
    /// Decodes one class file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`], [`crate::Error::OutOfBounds`] or
    /// [`crate::Error::Empty`] if the bytes are not a valid class file, and
    /// [`crate::Error::NotSupported`] for constructs the model cannot hold.
    fn decode(&self, data: &[u8]) -> Result<ClassEntry>;

    /// Encodes one class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] if the class exceeds a format limit, and
    /// [`crate::Error::Malformed`] if a body references a label it does not anchor.
    fn encode(&self, class: &ClassEntry) -> Result<Vec<u8>>;
}

/// The class file codec.
#[derive(Debug, Clone, Copy)]
pub struct JvmCodec {
    max_iterations: usize,
}

impl Default for JvmCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JvmCodec {
    /// Creates a codec with the default analysis budget.
    #[must_use]
    pub fn new() -> Self {
        JvmCodec {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Sets the iteration budget used when recomputing `max_stack`.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl ClassCodec for JvmCodec {
    fn decode(&self, data: &[u8]) -> Result<ClassEntry> {
        reader::read_class(data)
    }

    fn encode(&self, class: &ClassEntry) -> Result<Vec<u8>> {
        writer::write_class(class, self.max_iterations)
    }
}
