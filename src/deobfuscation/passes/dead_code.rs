//! Dead code removal.
//!
//! Runs the reachability analysis on every method and unlinks each instruction no path
//! reaches. Labels that were unreached and are no longer referenced go with them, and
//! exception table entries whose handler is gone or whose range became empty are dropped.

use std::collections::HashSet;

use crate::{
    analysis::{Analyzer, ReachabilityInterpreter},
    assembly::{Code, InsnId, Label},
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::{ClassGroup, MethodEntry},
    Result,
};

/// Removes instructions that are never reached from the method entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeRemover;

/// What one method lost.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Removed {
    pub(crate) instructions: Vec<usize>,
    pub(crate) try_catch_blocks: usize,
}

impl DeadCodeRemover {
    /// Removes the dead code of one method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the body cannot be analyzed; the body is left
    /// untouched in that case.
    pub(crate) fn remove_dead_code(
        owner: &str,
        method: &mut MethodEntry,
        max_iterations: usize,
    ) -> Result<Removed> {
        let frames = Analyzer::new(ReachabilityInterpreter)
            .with_max_iterations(max_iterations)
            .analyze(owner, method)?;
        let Some(code) = method.code.as_mut() else {
            return Ok(Removed::default());
        };

        let mut removed = Removed::default();
        let mut dead_labels = Vec::new();
        for (position, &id) in frames.ids().iter().enumerate() {
            if frames.at(position).is_some() {
                continue;
            }
            let insn = &code.insns[id];
            if insn.as_label().is_some() {
                dead_labels.push(id);
                continue;
            }
            let real = insn.is_real();
            code.remove(id);
            if real {
                removed.instructions.push(position);
            }
        }

        let unreached: HashSet<InsnId> = dead_labels.iter().copied().collect();
        removed.try_catch_blocks = prune_try_catch_blocks(code, &unreached);

        for id in dead_labels {
            let referenced = code.insns[id]
                .as_label()
                .is_some_and(|label| code.is_label_referenced(label));
            if !referenced {
                code.remove(id);
            }
        }
        Ok(removed)
    }
}

/// Drops exception entries whose handler was unreached or whose range holds no
/// instruction. Returns how many were dropped.
fn prune_try_catch_blocks(code: &mut Code, unreached: &HashSet<InsnId>) -> usize {
    let before = code.try_catch_blocks.len();
    let keep: Vec<bool> = code
        .try_catch_blocks
        .iter()
        .map(|tcb| {
            let handler_live = code
                .insns
                .find_label(tcb.handler)
                .is_some_and(|id| !unreached.contains(&id));
            handler_live && range_has_instruction(code, tcb.start, tcb.end)
        })
        .collect();
    let mut flags = keep.into_iter();
    code.try_catch_blocks.retain(|_| flags.next().unwrap_or(true));
    before - code.try_catch_blocks.len()
}

fn range_has_instruction(code: &Code, start: Label, end: Label) -> bool {
    let Some(mut current) = code.insns.find_label(start) else {
        return false;
    };
    loop {
        let insn = &code.insns[current];
        if insn.as_label() == Some(end) {
            return false;
        }
        if insn.is_real() {
            return true;
        }
        match code.insns.next(current) {
            Some(next) => current = next,
            None => return false,
        }
    }
}

impl Transformer for DeadCodeRemover {
    fn name(&self) -> &'static str {
        "DeadCodeRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::DeadCode
    }

    fn priority(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Removes instructions unreachable from the method entry"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let max_iterations = ctx.config.max_analysis_iterations;
        for_each_method(group, ctx, |owner, method| {
            match Self::remove_dead_code(owner, method, max_iterations) {
                Ok(removed) => {
                    for position in &removed.instructions {
                        ctx.record_in(self, EventKind::InstructionRemoved, owner, method)
                            .location(*position);
                    }
                    for _ in 0..removed.try_catch_blocks {
                        ctx.record_in(self, EventKind::TryCatchRemoved, owner, method)
                            .message("handler unreachable or range empty");
                    }
                    if !removed.instructions.is_empty() {
                        log::debug!(
                            "Removed {} dead instructions from {}",
                            removed.instructions.len(),
                            method.display_name(owner)
                        );
                    }
                }
                Err(error) => ctx.fault(self, owner, method, &error),
            }
        });

        log::info!(
            "Removed {} dead code frames.",
            ctx.events
                .filter_pass(self.name())
                .filter(|e| e.kind == EventKind::InstructionRemoved)
                .count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{ClassEntry, MethodAccessFlags},
    };

    fn method(code: Code) -> MethodEntry {
        MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code)
    }

    fn dead_tail() -> Code {
        InsnBuilder::new()
            .iload(0)
            .ireturn()
            .label("dead")
            .iconst(1)
            .iconst(2)
            .iadd()
            .ireturn()
            .build()
            .unwrap()
    }

    #[test]
    fn test_removes_unreachable_tail() {
        let mut m = method(dead_tail());
        let removed = DeadCodeRemover::remove_dead_code("a", &mut m, 1000).unwrap();
        assert_eq!(removed.instructions, vec![3, 4, 5, 6]);
        let code = m.code.as_ref().unwrap();
        assert_eq!(code.insns.len(), 2);
        assert_eq!(code.real_len(), 2);
    }

    #[test]
    fn test_second_run_removes_nothing() {
        let mut m = method(dead_tail());
        DeadCodeRemover::remove_dead_code("a", &mut m, 1000).unwrap();
        let again = DeadCodeRemover::remove_dead_code("a", &mut m, 1000).unwrap();
        assert_eq!(again, Removed::default());
    }

    #[test]
    fn test_referenced_dead_label_is_kept() {
        // the try range ends at a label nothing jumps to
        let code = InsnBuilder::new()
            .label("start")
            .iload(0)
            .ireturn()
            .label("end")
            .label("handler")
            .pop()
            .iconst(0)
            .ireturn()
            .try_catch("start", "end", "handler", Some("java/lang/Exception"))
            .build()
            .unwrap();
        let mut m = method(code);
        let removed = DeadCodeRemover::remove_dead_code("a", &mut m, 1000).unwrap();
        assert!(removed.instructions.is_empty());
        assert_eq!(removed.try_catch_blocks, 0);
        assert_eq!(m.code.as_ref().unwrap().try_catch_blocks.len(), 1);
    }

    #[test]
    fn test_empty_range_drops_entry() {
        let code = InsnBuilder::new()
            .iload(0)
            .ireturn()
            .label("start")
            .iconst(1)
            .label("end")
            .ireturn()
            .label("handler")
            .pop()
            .iconst(0)
            .ireturn()
            .try_catch("start", "end", "handler", None)
            .build()
            .unwrap();
        let mut m = method(code);
        let removed = DeadCodeRemover::remove_dead_code("a", &mut m, 1000).unwrap();
        assert_eq!(removed.try_catch_blocks, 1);
        let code = m.code.as_ref().unwrap();
        assert!(code.try_catch_blocks.is_empty());
        assert_eq!(code.insns.len(), 2);
    }

    #[test]
    fn test_transform_records_events_and_faults() {
        let mut class = ClassEntry::new("a");
        class.methods.push(method(dead_tail()));
        // falls off the end
        class.methods.push(
            MethodEntry::new("bad", "()V", MethodAccessFlags::STATIC)
                .with_code(InsnBuilder::new().iconst(1).pop().build().unwrap()),
        );
        let mut group = ClassGroup::from_classes([class]).unwrap();

        let config = EngineConfig::default();
        let events = EventLog::new();
        DeadCodeRemover.transform(&mut group, &PassContext::new(&config, &events));

        assert_eq!(events.count_kind(EventKind::InstructionRemoved), 4);
        assert_eq!(events.count_kind(EventKind::Warning), 1);
        let bad = group.class("a").unwrap().method("bad", "()V").unwrap();
        assert_eq!(bad.code.as_ref().unwrap().insns.len(), 2);
    }
}
