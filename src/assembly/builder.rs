//! Fluent assembler for method bodies.
//!
//! [`InsnBuilder`] appends instructions in order and lets jumps, switches and try/catch
//! ranges refer to labels by name before they are placed. [`InsnBuilder::build`] resolves
//! the names and fails if one was referenced but never placed.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jarscope::assembly::InsnBuilder;
//!
//! let code = InsnBuilder::new()
//!     .iload(2)
//!     .iconst(5)
//!     .if_icmpeq("ok")
//!     .new_("java/lang/IllegalStateException")
//!     .dup()
//!     .invokespecial("java/lang/IllegalStateException", "<init>", "()V")
//!     .athrow()
//!     .label("ok")
//!     .iload(1)
//!     .ireturn()
//!     .build()?;
//! # Ok::<(), jarscope::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    assembly::{
        code::{Code, TryCatchBlock},
        instruction::{Constant, Insn, Label},
        opcodes::*,
    },
    Result,
};

/// Builds a [`Code`] body instruction by instruction.
#[derive(Debug, Default)]
pub struct InsnBuilder {
    code: Code,
    names: HashMap<String, Label>,
    placed: HashSet<Label>,
}

impl InsnBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&mut self, name: &str) -> Label {
        if let Some(&label) = self.names.get(name) {
            return label;
        }
        let label = self.code.insns.new_label();
        self.names.insert(name.to_string(), label);
        label
    }

    /// Appends an arbitrary node.
    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.code.insns.push(insn);
        self
    }

    /// Places the label `name` at the current position.
    pub fn label(&mut self, name: &str) -> &mut Self {
        let label = self.resolve(name);
        self.placed.insert(label);
        self.insn(Insn::Label(label))
    }

    /// Appends a line number marker.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.insn(Insn::Line(line))
    }

    /// Appends an operand-less instruction.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.insn(Insn::op(opcode))
    }

    /// Pushes an `int` constant using the shortest encoding.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        self.insn(Insn::load_int(value))
    }

    /// Pushes a `long` constant using the shortest encoding.
    pub fn lconst(&mut self, value: i64) -> &mut Self {
        self.insn(Insn::load_long(value))
    }

    /// Pushes a constant through `LDC`.
    pub fn ldc(&mut self, constant: Constant) -> &mut Self {
        self.insn(Insn::Ldc(constant))
    }

    /// Appends a local variable instruction.
    pub fn var(&mut self, opcode: u8, var: u16) -> &mut Self {
        self.insn(Insn::var(opcode, var))
    }

    /// `ILOAD var`
    pub fn iload(&mut self, var: u16) -> &mut Self {
        self.var(ILOAD, var)
    }

    /// `LLOAD var`
    pub fn lload(&mut self, var: u16) -> &mut Self {
        self.var(LLOAD, var)
    }

    /// `ALOAD var`
    pub fn aload(&mut self, var: u16) -> &mut Self {
        self.var(ALOAD, var)
    }

    /// `ISTORE var`
    pub fn istore(&mut self, var: u16) -> &mut Self {
        self.var(ISTORE, var)
    }

    /// `LSTORE var`
    pub fn lstore(&mut self, var: u16) -> &mut Self {
        self.var(LSTORE, var)
    }

    /// `ASTORE var`
    pub fn astore(&mut self, var: u16) -> &mut Self {
        self.var(ASTORE, var)
    }

    /// `IINC var incr`
    pub fn iinc(&mut self, var: u16, incr: i16) -> &mut Self {
        self.insn(Insn::Iinc { var, incr })
    }

    /// `NEW desc`
    pub fn new_(&mut self, desc: &str) -> &mut Self {
        self.insn(Insn::type_insn(NEW, desc))
    }

    /// `DUP`
    pub fn dup(&mut self) -> &mut Self {
        self.op(DUP)
    }

    /// `POP`
    pub fn pop(&mut self) -> &mut Self {
        self.op(POP)
    }

    /// `IADD`
    pub fn iadd(&mut self) -> &mut Self {
        self.op(IADD)
    }

    /// `IMUL`
    pub fn imul(&mut self) -> &mut Self {
        self.op(IMUL)
    }

    /// `LMUL`
    pub fn lmul(&mut self) -> &mut Self {
        self.op(LMUL)
    }

    /// `ATHROW`
    pub fn athrow(&mut self) -> &mut Self {
        self.op(ATHROW)
    }

    /// `IRETURN`
    pub fn ireturn(&mut self) -> &mut Self {
        self.op(IRETURN)
    }

    /// `LRETURN`
    pub fn lreturn(&mut self) -> &mut Self {
        self.op(LRETURN)
    }

    /// `ARETURN`
    pub fn areturn(&mut self) -> &mut Self {
        self.op(ARETURN)
    }

    /// `RETURN`
    pub fn return_(&mut self) -> &mut Self {
        self.op(RETURN)
    }

    /// `GETFIELD owner.name desc`
    pub fn getfield(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::field(GETFIELD, owner, name, desc))
    }

    /// `PUTFIELD owner.name desc`
    pub fn putfield(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::field(PUTFIELD, owner, name, desc))
    }

    /// `GETSTATIC owner.name desc`
    pub fn getstatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::field(GETSTATIC, owner, name, desc))
    }

    /// `PUTSTATIC owner.name desc`
    pub fn putstatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::field(PUTSTATIC, owner, name, desc))
    }

    /// `INVOKESPECIAL owner.name desc`
    pub fn invokespecial(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::method(INVOKESPECIAL, owner, name, desc))
    }

    /// `INVOKEVIRTUAL owner.name desc`
    pub fn invokevirtual(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::method(INVOKEVIRTUAL, owner, name, desc))
    }

    /// `INVOKESTATIC owner.name desc`
    pub fn invokestatic(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.insn(Insn::method(INVOKESTATIC, owner, name, desc))
    }

    /// Appends a jump to the label `target`.
    pub fn jump(&mut self, opcode: u8, target: &str) -> &mut Self {
        let label = self.resolve(target);
        self.insn(Insn::jump(opcode, label))
    }

    /// `GOTO target`
    pub fn goto(&mut self, target: &str) -> &mut Self {
        self.jump(GOTO, target)
    }

    /// `IFEQ target`
    pub fn ifeq(&mut self, target: &str) -> &mut Self {
        self.jump(IFEQ, target)
    }

    /// `IFNE target`
    pub fn ifne(&mut self, target: &str) -> &mut Self {
        self.jump(IFNE, target)
    }

    /// `IF_ICMPEQ target`
    pub fn if_icmpeq(&mut self, target: &str) -> &mut Self {
        self.jump(IF_ICMPEQ, target)
    }

    /// `IF_ICMPNE target`
    pub fn if_icmpne(&mut self, target: &str) -> &mut Self {
        self.jump(IF_ICMPNE, target)
    }

    /// `TABLESWITCH` over `min..` with one target per key.
    pub fn tableswitch(&mut self, min: i32, default: &str, targets: &[&str]) -> &mut Self {
        let default = self.resolve(default);
        let targets: Vec<Label> = targets.iter().map(|t| self.resolve(t)).collect();
        let max = min.wrapping_add(i32::try_from(targets.len()).unwrap_or(i32::MAX) - 1);
        self.insn(Insn::TableSwitch {
            min,
            max,
            default,
            targets,
        })
    }

    /// `LOOKUPSWITCH` with `(key, target)` pairs.
    pub fn lookupswitch(&mut self, default: &str, cases: &[(i32, &str)]) -> &mut Self {
        let default = self.resolve(default);
        let mut cases: Vec<(i32, Label)> =
            cases.iter().map(|&(k, t)| (k, self.resolve(t))).collect();
        cases.sort_by_key(|&(k, _)| k);
        self.insn(Insn::LookupSwitch {
            default,
            keys: cases.iter().map(|&(k, _)| k).collect(),
            targets: cases.iter().map(|&(_, t)| t).collect(),
        })
    }

    /// Adds an exception table entry.
    pub fn try_catch(
        &mut self,
        start: &str,
        end: &str,
        handler: &str,
        catch_type: Option<&str>,
    ) -> &mut Self {
        let block = TryCatchBlock {
            start: self.resolve(start),
            end: self.resolve(end),
            handler: self.resolve(handler),
            catch_type: catch_type.map(str::to_string),
        };
        self.code.try_catch_blocks.push(block);
        self
    }

    /// Sets the stack and locals hints.
    pub fn maxs(&mut self, max_stack: u16, max_locals: u16) -> &mut Self {
        self.code.max_stack = max_stack;
        self.code.max_locals = max_locals;
        self
    }

    /// Finishes the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a label was referenced but never placed.
    pub fn build(&mut self) -> Result<Code> {
        let mut missing: Vec<&String> = self
            .names
            .iter()
            .filter(|(_, label)| !self.placed.contains(label))
            .map(|(name, _)| name)
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(malformed_error!("Undefined labels: {:?}", missing));
        }

        self.names.clear();
        self.placed.clear();
        Ok(std::mem::take(&mut self.code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_resolves_forward_labels() {
        let code = InsnBuilder::new()
            .iload(0)
            .ifeq("zero")
            .iconst(1)
            .ireturn()
            .label("zero")
            .iconst(0)
            .ireturn()
            .build()
            .unwrap();

        let rendered: Vec<String> = code.insns.iter().map(|(_, i)| i.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["iload 0", "ifeq L0", "iconst_1", "ireturn", "L0:", "iconst_0", "ireturn"]
        );
    }

    #[test]
    fn test_builder_rejects_unplaced_label() {
        let result = InsnBuilder::new().goto("nowhere").build();
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_builder_try_catch_and_switch() {
        let code = InsnBuilder::new()
            .label("start")
            .iload(1)
            .lookupswitch("end", &[(9, "end"), (2, "start")])
            .label("end")
            .return_()
            .label("handler")
            .athrow()
            .try_catch("start", "end", "handler", Some("java/lang/RuntimeException"))
            .build()
            .unwrap();

        assert_eq!(code.try_catch_blocks.len(), 1);
        let switch = code.insns.iter().nth(2).unwrap().1;
        match switch {
            Insn::LookupSwitch { keys, .. } => assert_eq!(keys, &vec![2, 9]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
