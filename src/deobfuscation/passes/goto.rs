//! Redundant jump removal.

use crate::{
    assembly::{opcodes::GOTO, Code, Insn},
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::ClassGroup,
};

/// Removes `GOTO L` when label `L` is the next node, line markers aside.
#[derive(Debug, Default, Clone, Copy)]
pub struct GotoRemover;

impl GotoRemover {
    /// Removes every jump to the label directly after it. Returns how many were removed.
    pub fn remove_redundant(code: &mut Code) -> usize {
        let mut removed = 0;
        let mut cursor = code.cursor();
        while let Some(id) = cursor.move_next() {
            let redundant = match cursor.insn() {
                Some(Insn::Jump {
                    opcode: GOTO,
                    target,
                }) => {
                    let insns = &cursor.code().insns;
                    insns
                        .next_insn(id)
                        .is_some_and(|next| insns[next].as_label() == Some(*target))
                }
                _ => false,
            };
            if redundant {
                cursor.remove_current_and_advance();
                removed += 1;
            }
        }
        removed
    }
}

impl Transformer for GotoRemover {
    fn name(&self) -> &'static str {
        "GotoRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::Goto
    }

    fn priority(&self) -> u32 {
        14
    }

    fn description(&self) -> &'static str {
        "Removes jumps to the immediately following label"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        for_each_method(group, ctx, |owner, method| {
            let removed = method.code.as_mut().map_or(0, Self::remove_redundant);
            for _ in 0..removed {
                ctx.record_in(self, EventKind::GotoRemoved, owner, method);
            }
        });

        log::info!(
            "Removed {} GOTO instruction jumps.",
            ctx.events.filter_pass(self.name()).count()
        );
    }
}
