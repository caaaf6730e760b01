//! Built-in deobfuscation passes.
//!
//! Every pass implements [`Transformer`](crate::deobfuscation::Transformer) and runs once
//! over the whole [`ClassGroup`](crate::model::ClassGroup). The
//! [`DeobfuscationEngine`](crate::deobfuscation::DeobfuscationEngine) orders them by
//! priority; lower runs first.
//!
//! # Cleanup
//!
//! | Pass | Priority | Description |
//! |------|----------|-------------|
//! | [`DeadCodeRemover`] | 2 | Removes instructions no execution path reaches |
//! | [`TryCatchBlockRemover`] | 4 | Drops handlers for the decoy exception |
//! | [`ErrorConstructorRemover`] | 6 | Deletes constructors that only throw |
//!
//! # Predicates and arithmetic
//!
//! | Pass | Priority | Description |
//! |------|----------|-------------|
//! | [`OpaquePredicateRemover`] | 8 | Replaces guard-value checks with a jump |
//! | [`MultiplierRemover`] | 10 | Cancels field multipliers, folds constant products |
//!
//! # Layout
//!
//! | Pass | Priority | Description |
//! |------|----------|-------------|
//! | [`ControlFlowStraightener`] | 12 | Depth-first block placement |
//! | [`GotoRemover`] | 14 | Removes jumps to the next label |
//!
//! # Members
//!
//! | Pass | Priority | Description |
//! |------|----------|-------------|
//! | [`FieldOwnerResolver`] | 16 | Points field references at the declaring class |
//! | [`UnusedFieldRemover`] | 18 | Removes unreferenced `final` fields |
//! | [`MemberSorter`] | 20 | Source-like member order |
//! | [`Renamer`] | 30 | Hierarchy-consistent placeholder names |

mod control_flow;
mod dead_code;
mod error_ctor;
mod field_owner;
mod goto;
mod multipliers;
mod opaque;
mod renamer;
mod sorting;
mod try_catch;
mod unused_fields;

pub use control_flow::ControlFlowStraightener;
pub use dead_code::DeadCodeRemover;
pub use error_ctor::ErrorConstructorRemover;
pub use field_owner::FieldOwnerResolver;
pub use goto::GotoRemover;
pub use multipliers::{MultiplierFinder, MultiplierRemover, Multipliers};
pub use opaque::OpaquePredicateRemover;
pub use renamer::{hierarchy, Mappings, Renamer};
pub use sorting::MemberSorter;
pub use try_catch::TryCatchBlockRemover;
pub use unused_fields::UnusedFieldRemover;
