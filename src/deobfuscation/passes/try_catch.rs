//! Decoy exception handler removal.

use crate::{
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::ClassGroup,
};

/// Removes exception table entries catching the configured decoy exception.
///
/// The obfuscator wraps method bodies in handlers for
/// [`crate::deobfuscation::EngineConfig::decoy_exception`] that only rethrow. The handler
/// code itself is left in place; once nothing covers it, dead code removal can take it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TryCatchBlockRemover;

impl Transformer for TryCatchBlockRemover {
    fn name(&self) -> &'static str {
        "TryCatchBlockRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::TryCatch
    }

    fn priority(&self) -> u32 {
        4
    }

    fn description(&self) -> &'static str {
        "Removes try/catch entries for the decoy exception type"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let decoy = ctx.config.decoy_exception.as_str();
        for_each_method(group, ctx, |owner, method| {
            let Some(code) = method.code.as_mut() else {
                return;
            };
            let before = code.try_catch_blocks.len();
            code.try_catch_blocks
                .retain(|tcb| tcb.catch_type.as_deref() != Some(decoy));
            let removed = before - code.try_catch_blocks.len();
            for _ in 0..removed {
                ctx.record_in(self, EventKind::TryCatchRemoved, owner, method)
                    .message(format!("catch {decoy}"));
            }
        });

        let simple = decoy.rsplit('/').next().unwrap_or(decoy);
        log::info!(
            "Removed {} {} try-catch blocks.",
            ctx.events.filter_pass(self.name()).count(),
            simple
        );
    }
}
