//! Program analysis infrastructure for JVM method bodies.
//!
//! The core is a generic abstract interpreter in the style of a data-flow framework: an
//! [`Analyzer`] iterates [`Frame`]s to a fixpoint over the control-flow edges of a method,
//! and an [`Interpreter`] decides what an abstract value is. Two domains are provided.
//!
//! # Architecture
//!
//! - [`Analyzer`] / [`Frames`] - worklist fixpoint, per-instruction frames, edge reporting
//! - [`Frame`] - locals and operand stack, per-opcode simulation
//! - [`Interpreter`] / [`Value`] - the abstract domain plug-in
//! - [`ReachabilityInterpreter`] - type-only values, finds dead code
//! - [`ConstantInterpreter`] - symbolic constants, products and sums for multiplier folding
//! - [`BlockAnalyzer`] - basic blocks from followed edges, plus straightening
//!
//! # Usage
//!
//! ```rust,ignore
//! use jarscope::analysis::{Analyzer, ReachabilityInterpreter};
//!
//! let frames = Analyzer::new(ReachabilityInterpreter).analyze(&class.name, method)?;
//! for dead in frames.unreachable() {
//!     println!("unreachable: {}", method.code.as_ref().unwrap().insns[dead]);
//! }
//! ```

mod analyzer;
mod blocks;
mod constants;
mod frame;
mod interpreter;
mod reachability;

pub use analyzer::{Analyzer, Frames, DEFAULT_MAX_ITERATIONS};
pub use blocks::{Block, BlockAnalyzer};
pub use constants::{fold_multiplication, unit_for, ConstantInterpreter, Expr, Number};
pub use frame::Frame;
pub use interpreter::{result_type, Interpreter, Value};
pub use reachability::{BasicValue, ReachabilityInterpreter};

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{Analyzer, BlockAnalyzer, ReachabilityInterpreter},
        assembly::InsnBuilder,
        model::{MethodAccessFlags, MethodEntry},
    };

    #[test]
    fn test_switch_targets_are_reached() {
        let code = InsnBuilder::new()
            .iload(0)
            .tableswitch(0, "default", &["zero", "one"])
            .label("zero")
            .iconst(10)
            .ireturn()
            .label("one")
            .iconst(11)
            .ireturn()
            .label("default")
            .iconst(-1)
            .ireturn()
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);

        let frames = Analyzer::new(ReachabilityInterpreter)
            .analyze("a", &method)
            .unwrap();
        assert_eq!(frames.unreachable().count(), 0);

        let blocks = BlockAnalyzer::analyze("a", &method, 100).unwrap();
        assert_eq!(blocks.len(), 4);
        let mut branches = blocks.blocks()[0].branches.clone();
        branches.sort_unstable();
        // the first case label directly follows the switch and counts as fall-through
        assert_eq!(blocks.blocks()[0].next, Some(1));
        assert_eq!(branches, vec![2, 3]);
    }
}
