//! Guard-value opaque predicate removal.
//!
//! Obfuscated methods take an extra trailing parameter that callers always pass one
//! specific constant for. The method checks it on entry and bails out on a mismatch:
//!
//! ```text
//! iload <last param>          iload <last param>
//! <push int>                  <push int>
//! if_icmpXX L                 if_icmpXX L
//! new <guard exception>       return
//! dup
//! invokespecial <guard>.<init>
//! athrow
//! ```
//!
//! Both shapes are replaced by `goto L`, always taking the guard-satisfied edge. Line
//! markers inside a match are skipped over and left where they are.

use crate::{
    assembly::{
        opcodes::{self, ATHROW, DUP, GOTO, IF_ICMPEQ, IF_ICMPLE, ILOAD, INVOKESPECIAL, NEW},
        Code, Insn, InsnId, Label,
    },
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::ClassGroup,
};

/// Replaces guard-value checks on the last parameter with an unconditional jump.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaquePredicateRemover;

/// One matched guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GuardCheck {
    nodes: Vec<InsnId>,
    target: Label,
}

impl GuardCheck {
    /// Matches a guard check starting at `start`.
    fn match_at(code: &Code, start: InsnId, param: u16, guard_exception: &str) -> Option<Self> {
        let insns = &code.insns;
        let next = |id: InsnId| insns.next_insn(id);

        if insns[start] != Insn::var(ILOAD, param) {
            return None;
        }
        let push = next(start)?;
        insns[push].int_value()?;
        let branch = next(push)?;
        let Insn::Jump { opcode, target } = insns[branch] else {
            return None;
        };
        if !(IF_ICMPEQ..=IF_ICMPLE).contains(&opcode) {
            return None;
        }

        let after = next(branch)?;
        let mut nodes = vec![start, push, branch, after];
        match &insns[after] {
            Insn::Op(op) if opcodes::is_return(*op) => {}
            Insn::Type { opcode: NEW, .. } => {
                let dup = next(after)?;
                let init = next(dup)?;
                let throw = next(init)?;
                if insns[dup] != Insn::op(DUP) || insns[throw] != Insn::op(ATHROW) {
                    return None;
                }
                match &insns[init] {
                    Insn::Method {
                        opcode: INVOKESPECIAL,
                        owner,
                        ..
                    } if owner == guard_exception => {}
                    _ => return None,
                }
                nodes.extend([dup, init, throw]);
            }
            _ => return None,
        }
        Some(GuardCheck { nodes, target })
    }

    /// Number of instructions in the check: 4 for the return shape, 7 for the throw shape.
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl OpaquePredicateRemover {
    /// Replaces every guard check in `code` that tests local `param` with `goto` to its
    /// satisfied edge, and returns the checks removed.
    pub(crate) fn remove_checks(
        code: &mut Code,
        param: u16,
        guard_exception: &str,
    ) -> Vec<GuardCheck> {
        let mut removed = Vec::new();
        let mut cursor = code.cursor();
        while let Some(start) = cursor.move_next() {
            if !matches!(cursor.insn(), Some(Insn::Var { opcode: ILOAD, .. })) {
                continue;
            }
            let Some(check) = GuardCheck::match_at(cursor.code(), start, param, guard_exception)
            else {
                continue;
            };

            cursor.insert_before_current([Insn::jump(GOTO, check.target)]);
            let mut remaining = check.len();
            let mut at = Some(start);
            while let Some(node) = at {
                if check.nodes.contains(&node) {
                    cursor.remove_current_and_advance();
                    remaining -= 1;
                    if remaining == 0 {
                        break;
                    }
                }
                at = cursor.move_next();
            }
            removed.push(check);
        }
        removed
    }
}

impl Transformer for OpaquePredicateRemover {
    fn name(&self) -> &'static str {
        "OpaquePredicateRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::OpaquePredicates
    }

    fn priority(&self) -> u32 {
        8
    }

    fn description(&self) -> &'static str {
        "Removes guard-value checks on the last parameter"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let guard = ctx.config.guard_exception.as_str();
        for_each_method(group, ctx, |owner, method| {
            let Some(param) = method.last_param_index() else {
                return;
            };
            let Some(code) = method.code.as_mut() else {
                return;
            };
            let checks = Self::remove_checks(code, param, guard);
            for check in &checks {
                ctx.record_in(self, EventKind::OpaquePredicateRemoved, owner, method)
                    .message(format!("{} instructions, goto {}", check.len(), check.target));
            }
        });

        log::info!(
            "Removed {} opaque predicate garbage value checks.",
            ctx.events.filter_pass(self.name()).count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{ClassEntry, MethodAccessFlags, MethodEntry},
    };

    const ISE: &str = "java/lang/IllegalStateException";

    fn run(method: MethodEntry) -> (MethodEntry, usize) {
        let mut class = ClassEntry::new("a");
        class.methods.push(method);
        let mut group = ClassGroup::from_classes([class]).unwrap();
        let config = EngineConfig::default();
        let events = EventLog::new();
        OpaquePredicateRemover.transform(&mut group, &PassContext::new(&config, &events));
        let method = group.class("a").unwrap().methods[0].clone();
        (method, events.count_kind(EventKind::OpaquePredicateRemoved))
    }

    fn rendered(method: &MethodEntry) -> Vec<String> {
        method
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .map(|(_, insn)| insn.to_string())
            .collect()
    }

    #[test]
    fn test_exception_guard_becomes_goto() {
        let code = InsnBuilder::new()
            .iload(0)
            .iconst(5)
            .if_icmpeq("ok")
            .new_(ISE)
            .dup()
            .invokespecial(ISE, "<init>", "()V")
            .athrow()
            .label("ok")
            .ireturn()
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);
        let (method, count) = run(method);
        assert_eq!(count, 1);
        assert_eq!(rendered(&method), vec!["goto L0", "L0:", "ireturn"]);
    }

    #[test]
    fn test_return_guard_on_instance_method() {
        let code = InsnBuilder::new()
            .line(7)
            .iload(2)
            .iconst(-1)
            .line(8)
            .if_icmpne("ok")
            .return_()
            .label("ok")
            .return_()
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(JI)V", MethodAccessFlags::empty()).with_code(code);
        // receiver in 0, long in 1-2, guard in 3
        let (unchanged, count) = run(method.clone());
        assert_eq!(count, 0);
        assert_eq!(rendered(&unchanged), rendered(&method));

        let method = MethodEntry::new("m", "(II)V", MethodAccessFlags::empty())
            .with_code(method.code.clone().unwrap());
        let (method, count) = run(method);
        assert_eq!(count, 1);
        assert_eq!(
            rendered(&method),
            vec![".line 7", "goto L0", ".line 8", "L0:", "return"]
        );
    }

    #[test]
    fn test_back_to_back_checks_removed() {
        let code = InsnBuilder::new()
            .iload(0)
            .iconst(5)
            .if_icmpeq("first")
            .return_()
            .label("first")
            .iload(0)
            .iconst(6)
            .if_icmpne("second")
            .return_()
            .label("second")
            .return_()
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(I)V", MethodAccessFlags::STATIC).with_code(code);
        let (method, count) = run(method);
        assert_eq!(count, 2);
        assert_eq!(
            rendered(&method),
            vec!["goto L0", "L0:", "goto L1", "L1:", "return"]
        );
    }

    #[test]
    fn test_other_exception_is_not_a_guard() {
        let code = InsnBuilder::new()
            .iload(0)
            .iconst(5)
            .if_icmpeq("ok")
            .new_("java/lang/RuntimeException")
            .dup()
            .invokespecial("java/lang/RuntimeException", "<init>", "()V")
            .athrow()
            .label("ok")
            .return_()
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(I)V", MethodAccessFlags::STATIC).with_code(code);
        let (_, count) = run(method);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_method_without_params_is_skipped() {
        let code = InsnBuilder::new().iconst(0).ireturn().build().unwrap();
        let method = MethodEntry::new("m", "()I", MethodAccessFlags::STATIC).with_code(code);
        let (_, count) = run(method);
        assert_eq!(count, 0);
    }
}
