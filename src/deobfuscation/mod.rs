//! Deobfuscation framework for JVM class groups.
//!
//! A run takes one decoded [`ClassGroup`](crate::model::ClassGroup) and pushes it through
//! an ordered list of passes. Each pass sees the whole group and leaves it in a state the
//! next one relies on: dead code is gone before predicates are matched, predicates are
//! collapsed before multipliers are folded, and the hierarchy is stable before renaming.
//!
//! ```text
//! ClassGroup ──► DeadCodeRemover ──► TryCatchBlockRemover ──► ErrorConstructorRemover
//!            ──► OpaquePredicateRemover ──► MultiplierRemover ──► ControlFlowStraightener
//!            ──► GotoRemover ──► FieldOwnerResolver ──► UnusedFieldRemover
//!            ──► MemberSorter ──► Renamer ──► DeobfuscationResult
//! ```
//!
//! # Key Components
//!
//! - [`DeobfuscationEngine`] - owns the pass list and runs it
//! - [`EngineConfig`] - pass switches and pattern parameters
//! - [`Transformer`] / [`PassContext`] - the pass contract and what a pass may touch
//! - [`EventLog`] - lock-free record of every change and diagnostic
//! - [`DeobfuscationResult`] - events, derived statistics and per-pass timings
//!
//! Passes never return counts. What they did is read back from the [`EventLog`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use jarscope::deobfuscation::{DeobfuscationEngine, EngineConfig};
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default().with_rename(true));
//! let result = engine.run(&mut group);
//! println!("{}", result.summary());
//! ```

mod config;
mod engine;
mod events;
mod pass;
mod result;

pub mod passes;

pub use config::{EngineConfig, PassKind};
pub use engine::DeobfuscationEngine;
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog, EventLogIter};
pub use pass::{for_each_method, PassContext, Transformer};
pub use result::{DeobfuscationResult, PassTiming};
