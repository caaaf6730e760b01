//! Graph algorithms over the [`crate::utils::graph::Successors`] abstraction.

mod traversal;

pub use traversal::{dfs, DfsIterator};
