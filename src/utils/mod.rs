//! Shared helpers: wrapping modular arithmetic and graph primitives.

pub mod graph;
mod math;

pub use math::{inverse_i32, inverse_i64, is_invertible};
