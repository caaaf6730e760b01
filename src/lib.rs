// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # jarscope
//!
//! A framework for undoing the transformations a commercial obfuscator applies to JVM
//! class archives. `jarscope` decodes a jar into a mutable class model, runs an ordered
//! pipeline of data-flow driven passes over it, and writes a loadable jar back.
//!
//! ## Features
//!
//! - **Class file codec** - constant pool, attributes and bytecode decoded into a
//!   label-based instruction list, re-encoded with recomputed stack sizes
//! - **Frame analysis** - ASM-style abstract interpretation over pluggable interpreters
//! - **Arithmetic recovery** - modular-inverse field multipliers cancelled, constant
//!   products folded
//! - **Cleanup passes** - dead code, decoy handlers, opaque predicates, throwing
//!   constructors, redundant jumps and unused fields
//! - **Renaming** - hierarchy-consistent placeholder names for short identifiers
//! - **Structured diagnostics** - every change recorded in a lock-free event log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jarscope::{
//!     deobfuscation::{DeobfuscationEngine, EngineConfig},
//!     file::JarArchive,
//! };
//! use std::path::Path;
//!
//! let mut jar = JarArchive::open(Path::new("gamepack.jar"))?;
//! let engine = DeobfuscationEngine::new(EngineConfig::default().with_rename(true));
//! let result = engine.run(jar.group_mut());
//! println!("{}", result.summary());
//! jar.write(Path::new("gamepack.deob.jar"))?;
//! # Ok::<(), jarscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - jar container and byte sources
//! - [`classfile`] - class file decoding and encoding
//! - [`model`] - the [`model::ClassGroup`] arena and its entities
//! - [`assembly`] - instructions, the linked instruction list and the assembler
//! - [`analysis`] - frame analysis, interpreters and basic blocks
//! - [`deobfuscation`] - the engine, its configuration and the passes
//! - [`utils`] - graphs and modular arithmetic
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`]. Load and encode failures end a run; a method
//! that cannot be analyzed is skipped by the pass that hit it and reported as a warning
//! event instead.
//!
//! ## Fuzzing
//!
//! ```bash
//! cargo +nightly fuzz run classfile --release
//! ```

#[macro_use]
pub(crate) mod error;

/// Frame analysis of method bodies.
///
/// The [`analysis::Analyzer`] runs an [`analysis::Interpreter`] to a fixpoint over a
/// method's control flow graph and returns one frame per instruction. Two interpreters
/// ship with the crate: [`analysis::ReachabilityInterpreter`] tracks only value types and
/// finds dead code, [`analysis::ConstantInterpreter`] tracks constant products for the
/// multiplier passes. [`analysis::BlockAnalyzer`] splits a body into basic blocks and
/// computes a depth-first placement.
pub mod analysis;

/// JVM instructions and method bodies.
///
/// # Examples
///
/// ```rust,ignore
/// use jarscope::assembly::InsnBuilder;
///
/// let code = InsnBuilder::new()
///     .iload(0)
///     .ifeq("zero")
///     .iconst(1)
///     .ireturn()
///     .label("zero")
///     .iconst(0)
///     .ireturn()
///     .build()?;
/// ```
pub mod assembly;

/// Class file decoding and encoding.
pub mod classfile;

/// Deobfuscation engine and passes.
pub mod deobfuscation;

/// Jar archives and input backends.
pub mod file;

/// In-memory class model.
pub mod model;

/// Graphs and arithmetic helpers.
pub mod utils;

/// `jarscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `jarscope` Error type
///
/// Variants follow the fault taxonomy of the pipeline: load faults, per-method analysis
/// faults and encoding limits.
pub use error::Error;

/// Bounds-checked big-endian cursor used by the class file decoder.
pub use file::parser::Parser;
