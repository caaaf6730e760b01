//! JVM instruction model and editing.
//!
//! Method bodies are held as [`Code`]: an [`InsnList`] of [`Insn`] nodes plus the exception
//! table. The list is an arena-backed doubly-linked list whose [`InsnId`] handles stay valid
//! across unrelated edits, and whose [`Label`] anchors are what jumps, switches and
//! try/catch ranges point at.
//!
//! # Key Components
//!
//! - [`opcodes`] - opcode constants and mnemonics
//! - [`Insn`] - one node of the stream (real instruction, label or line marker)
//! - [`InsnList`] - the linked node arena
//! - [`Code`] - body plus exception table, with consistency-preserving edits
//! - [`Cursor`] - edit-while-iterating
//! - [`InsnBuilder`] - fluent assembler with named labels

mod builder;
mod code;
mod instruction;
mod list;
pub mod opcodes;

pub use builder::InsnBuilder;
pub use code::{Code, Cursor, TryCatchBlock};
pub use instruction::{Constant, FlowType, Handle, Insn, Label};
pub use list::{InsnId, InsnList, Iter};
