//! In-memory class model.
//!
//! A [`ClassGroup`] owns the [`ClassEntry`]s of one input. Each class owns its
//! [`MethodEntry`]s and [`FieldEntry`]s; a method owns its [`crate::assembly::Code`]. Passes
//! mutate the group in place.
//!
//! # Key Components
//!
//! - [`ClassGroup`] - arena of classes with a name index and generation counter
//! - [`ClassEntry`], [`MethodEntry`], [`FieldEntry`] - the entities
//! - [`ClassAccessFlags`], [`MethodAccessFlags`], [`FieldAccessFlags`] - access flags
//! - [`descriptor`] - descriptor parsing and class-name rewriting
//! - [`MatchRef`] - opaque cross-group link set by matching tools

mod class;
pub mod descriptor;
mod field;
mod flags;
mod group;
mod method;

pub use class::ClassEntry;
pub use field::FieldEntry;
pub use flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use group::{ClassGroup, ClassId, GroupId, MatchRef, MemberRef};
pub use method::MethodEntry;
