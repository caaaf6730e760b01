//! Block straightening.

use crate::{
    analysis::BlockAnalyzer,
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::{ClassGroup, MethodEntry},
    Result,
};

/// Re-lays method bodies out in depth-first block order.
///
/// Obfuscated bodies scatter their basic blocks and chain them with `GOTO`s. After
/// straightening, blocks only reached by such a jump follow the block that jumps to them,
/// and [`super::GotoRemover`] can drop the jump. Bodies with an exception table are left
/// alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlFlowStraightener;

impl ControlFlowStraightener {
    /// Straightens one method. Returns `true` if the block order changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the body cannot be analyzed; it is left as is.
    pub fn straighten(owner: &str, method: &mut MethodEntry, max_iterations: usize) -> Result<bool> {
        let Some(code) = method.code.as_ref() else {
            return Ok(false);
        };
        if !code.try_catch_blocks.is_empty() {
            return Ok(false);
        }

        let blocks = BlockAnalyzer::analyze(owner, method, max_iterations)?;
        let identity = blocks.placement().into_iter().eq(0..blocks.len());
        if identity {
            return Ok(false);
        }
        let straightened = blocks.straighten(code);
        method.code = Some(straightened);
        Ok(true)
    }
}

impl Transformer for ControlFlowStraightener {
    fn name(&self) -> &'static str {
        "ControlFlowStraightener"
    }

    fn kind(&self) -> PassKind {
        PassKind::ControlFlow
    }

    fn priority(&self) -> u32 {
        12
    }

    fn description(&self) -> &'static str {
        "Reorders basic blocks along their control flow"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let max_iterations = ctx.config.max_analysis_iterations;
        for_each_method(group, ctx, |owner, method| {
            match Self::straighten(owner, method, max_iterations) {
                Ok(true) => {
                    ctx.record_in(self, EventKind::ControlFlowRestructured, owner, method);
                }
                Ok(false) => {}
                Err(error) => ctx.fault(self, owner, method, &error),
            }
        });

        log::info!(
            "Straightened {} method bodies.",
            ctx.events.filter_pass(self.name()).count()
        );
    }
}
