//! Abstract execution state at one program point.
//!
//! A [`Frame`] holds one abstract value per local variable slot and a value stack.
//! [`Frame::execute`] simulates a single instruction: it pops operands, asks the
//! [`Interpreter`] for the produced value and pushes it. Two-slot values (`long`, `double`)
//! occupy one stack entry and two local slots; the second local slot holds the
//! interpreter's empty value.

use crate::{
    analysis::interpreter::{Interpreter, Value},
    assembly::{opcodes::*, Insn, InsnId},
    model::descriptor::MethodDescriptor,
    Error, Result,
};

/// Locals and operand stack at one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<V> {
    locals: Vec<V>,
    stack: Vec<V>,
}

fn fault(message: impl Into<String>) -> Error {
    Error::Analysis {
        method: String::new(),
        message: message.into(),
    }
}

impl<V: Value> Frame<V> {
    /// Creates a frame with the given locals and an empty stack.
    #[must_use]
    pub fn new(locals: Vec<V>) -> Self {
        Frame {
            locals,
            stack: Vec::new(),
        }
    }

    /// Number of local slots.
    #[must_use]
    pub fn locals_len(&self) -> usize {
        self.locals.len()
    }

    /// Current stack depth in entries (a `long` counts once).
    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Current stack depth in slots (a `long` counts twice).
    #[must_use]
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(|v| usize::from(v.size())).sum()
    }

    /// Value in local slot `index`.
    #[must_use]
    pub fn local(&self, index: usize) -> Option<&V> {
        self.locals.get(index)
    }

    /// Stack entry `index`, counted from the bottom.
    #[must_use]
    pub fn stack(&self, index: usize) -> Option<&V> {
        self.stack.get(index)
    }

    /// Stack entry `depth` positions below the top (`0` is the top).
    #[must_use]
    pub fn peek(&self, depth: usize) -> Option<&V> {
        self.stack.iter().rev().nth(depth)
    }

    /// Removes all stack entries.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Pushes a value.
    pub fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    /// Pops a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] on stack underflow.
    pub fn pop(&mut self) -> Result<V> {
        self.stack
            .pop()
            .ok_or_else(|| fault("stack underflow"))
    }

    fn pop_sized(&mut self, size: u8) -> Result<V> {
        let value = self.pop()?;
        if value.size() != size {
            return Err(fault(format!(
                "expected a category {} value, found {:?}",
                size, value
            )));
        }
        Ok(value)
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<V>> {
        if count > self.stack.len() {
            return Err(fault("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn load(&self, var: u16) -> Result<&V> {
        self.locals
            .get(usize::from(var))
            .ok_or_else(|| fault(format!("local {var} out of range")))
    }

    /// Stores `value` into local `var`, clearing the slot pairs it overlaps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if the value does not fit into the locals.
    pub fn set_local<I: Interpreter<Value = V>>(
        &mut self,
        var: u16,
        value: V,
        interpreter: &mut I,
    ) -> Result<()> {
        let index = usize::from(var);
        let end = index + usize::from(value.size());
        if end > self.locals.len() {
            return Err(fault(format!("local {var} out of range")));
        }

        if index > 0 && self.locals[index - 1].size() == 2 {
            self.locals[index - 1] = interpreter.new_value(None);
        }
        if value.size() == 2 {
            self.locals[index + 1] = interpreter.new_value(None);
        }
        self.locals[index] = value;
        Ok(())
    }

    /// Merges `other` into this frame. Returns `true` if this frame changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if the stack heights differ.
    pub fn merge<I: Interpreter<Value = V>>(
        &mut self,
        other: &Frame<V>,
        interpreter: &mut I,
    ) -> Result<bool> {
        if self.stack.len() != other.stack.len() || self.locals.len() != other.locals.len() {
            return Err(fault("incompatible stack heights"));
        }

        let mut changed = false;
        for (mine, theirs) in self
            .locals
            .iter_mut()
            .chain(self.stack.iter_mut())
            .zip(other.locals.iter().chain(other.stack.iter()))
        {
            let merged = interpreter.merge(mine, theirs);
            if merged != *mine {
                *mine = merged;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Simulates `insn` on this frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] on stack underflow, category mismatches, locals out of
    /// range, subroutines, or a fault reported by the interpreter.
    #[allow(clippy::too_many_lines)]
    pub fn execute<I: Interpreter<Value = V>>(
        &mut self,
        id: InsnId,
        insn: &Insn,
        interpreter: &mut I,
    ) -> Result<()> {
        match insn {
            Insn::Label(_) | Insn::Line(_) => {}
            Insn::Ldc(_) => {
                let value = interpreter.new_operation(id, insn)?;
                self.push(value);
            }
            Insn::Int { opcode, .. } => {
                if *opcode == NEWARRAY {
                    let count = self.pop()?;
                    let value = interpreter.unary_operation(id, insn, &count)?;
                    self.push(value);
                } else {
                    let value = interpreter.new_operation(id, insn)?;
                    self.push(value);
                }
            }
            Insn::Var { opcode, var } => match *opcode {
                ILOAD | LLOAD | FLOAD | DLOAD | ALOAD => {
                    let local = self.load(*var)?.clone();
                    let value = interpreter.copy_operation(id, insn, &local)?;
                    self.push(value);
                }
                ISTORE | LSTORE | FSTORE | DSTORE | ASTORE => {
                    let expected = if matches!(*opcode, LSTORE | DSTORE) { 2 } else { 1 };
                    let top = self.pop_sized(expected)?;
                    let value = interpreter.copy_operation(id, insn, &top)?;
                    self.set_local(*var, value, interpreter)?;
                }
                _ => return Err(fault("subroutines (JSR/RET) are not supported")),
            },
            Insn::Iinc { var, .. } => {
                let local = self.load(*var)?.clone();
                let value = interpreter.unary_operation(id, insn, &local)?;
                self.set_local(*var, value, interpreter)?;
            }
            Insn::Type { opcode, .. } => {
                if *opcode == NEW {
                    let value = interpreter.new_operation(id, insn)?;
                    self.push(value);
                } else {
                    let operand = self.pop()?;
                    let value = interpreter.unary_operation(id, insn, &operand)?;
                    self.push(value);
                }
            }
            Insn::Field { opcode, .. } => match *opcode {
                GETSTATIC => {
                    let value = interpreter.new_operation(id, insn)?;
                    self.push(value);
                }
                PUTSTATIC => {
                    self.pop()?;
                }
                GETFIELD => {
                    let object = self.pop()?;
                    let value = interpreter.unary_operation(id, insn, &object)?;
                    self.push(value);
                }
                _ => {
                    self.pop()?;
                    self.pop()?;
                }
            },
            Insn::Method { opcode, desc, .. } => {
                let desc = MethodDescriptor::parse(desc)?;
                let receiver = usize::from(*opcode != INVOKESTATIC);
                let values = self.pop_n(desc.args.len() + receiver)?;
                if desc.return_type()?.size() > 0 {
                    let value = interpreter.nary_operation(id, insn, &values)?;
                    self.push(value);
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                let desc = MethodDescriptor::parse(desc)?;
                let values = self.pop_n(desc.args.len())?;
                if desc.return_type()?.size() > 0 {
                    let value = interpreter.nary_operation(id, insn, &values)?;
                    self.push(value);
                }
            }
            Insn::MultiANewArray { dims, .. } => {
                let values = self.pop_n(usize::from(*dims))?;
                let value = interpreter.nary_operation(id, insn, &values)?;
                self.push(value);
            }
            Insn::Jump { opcode, .. } => match *opcode {
                GOTO => {}
                IFEQ..=IFLE | IFNULL | IFNONNULL => {
                    self.pop()?;
                }
                IF_ICMPEQ..=IF_ACMPNE => {
                    self.pop()?;
                    self.pop()?;
                }
                _ => return Err(fault("subroutines (JSR/RET) are not supported")),
            },
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop()?;
            }
            Insn::Op(opcode) => self.execute_op(id, insn, *opcode, interpreter)?,
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn execute_op<I: Interpreter<Value = V>>(
        &mut self,
        id: InsnId,
        insn: &Insn,
        opcode: u8,
        interpreter: &mut I,
    ) -> Result<()> {
        match opcode {
            NOP => {}
            ACONST_NULL..=DCONST_1 => {
                let value = interpreter.new_operation(id, insn)?;
                self.push(value);
            }
            IALOAD..=SALOAD => {
                let index = self.pop()?;
                let array = self.pop()?;
                let value = interpreter.binary_operation(id, insn, &array, &index)?;
                self.push(value);
            }
            IASTORE..=SASTORE => {
                let value = self.pop()?;
                let index = self.pop()?;
                let array = self.pop()?;
                interpreter.ternary_operation(id, insn, [&array, &index, &value])?;
            }
            POP => {
                self.pop_sized(1)?;
            }
            POP2 => {
                if self.pop()?.size() == 1 {
                    self.pop_sized(1)?;
                }
            }
            DUP => {
                let v1 = self.pop_sized(1)?;
                let copy = interpreter.copy_operation(id, insn, &v1)?;
                self.push(v1);
                self.push(copy);
            }
            DUP_X1 => {
                let v1 = self.pop_sized(1)?;
                let v2 = self.pop_sized(1)?;
                let copy = interpreter.copy_operation(id, insn, &v1)?;
                self.stack.extend([copy, v2, v1]);
            }
            DUP_X2 => {
                let v1 = self.pop_sized(1)?;
                let v2 = self.pop()?;
                let copy = interpreter.copy_operation(id, insn, &v1)?;
                if v2.size() == 1 {
                    let v3 = self.pop_sized(1)?;
                    self.stack.extend([copy, v3, v2, v1]);
                } else {
                    self.stack.extend([copy, v2, v1]);
                }
            }
            DUP2 => {
                let v1 = self.pop()?;
                if v1.size() == 1 {
                    let v2 = self.pop_sized(1)?;
                    let c2 = interpreter.copy_operation(id, insn, &v2)?;
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    self.stack.extend([v2, v1, c2, c1]);
                } else {
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    self.stack.extend([v1, c1]);
                }
            }
            DUP2_X1 => {
                let v1 = self.pop()?;
                if v1.size() == 1 {
                    let v2 = self.pop_sized(1)?;
                    let v3 = self.pop_sized(1)?;
                    let c2 = interpreter.copy_operation(id, insn, &v2)?;
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    self.stack.extend([c2, c1, v3, v2, v1]);
                } else {
                    let v2 = self.pop_sized(1)?;
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    self.stack.extend([c1, v2, v1]);
                }
            }
            DUP2_X2 => {
                let v1 = self.pop()?;
                if v1.size() == 1 {
                    let v2 = self.pop_sized(1)?;
                    let v3 = self.pop()?;
                    let c2 = interpreter.copy_operation(id, insn, &v2)?;
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    if v3.size() == 1 {
                        let v4 = self.pop_sized(1)?;
                        self.stack.extend([c2, c1, v4, v3, v2, v1]);
                    } else {
                        self.stack.extend([c2, c1, v3, v2, v1]);
                    }
                } else {
                    let v2 = self.pop()?;
                    let c1 = interpreter.copy_operation(id, insn, &v1)?;
                    if v2.size() == 1 {
                        let v3 = self.pop_sized(1)?;
                        self.stack.extend([c1, v3, v2, v1]);
                    } else {
                        self.stack.extend([c1, v2, v1]);
                    }
                }
            }
            SWAP => {
                let v2 = self.pop_sized(1)?;
                let v1 = self.pop_sized(1)?;
                let c2 = interpreter.copy_operation(id, insn, &v2)?;
                let c1 = interpreter.copy_operation(id, insn, &v1)?;
                self.stack.extend([c2, c1]);
            }
            IADD..=DREM | ISHL..=LXOR | LCMP..=DCMPG => {
                let b = self.pop()?;
                let a = self.pop()?;
                let value = interpreter.binary_operation(id, insn, &a, &b)?;
                self.push(value);
            }
            INEG..=DNEG | I2L..=I2S | ARRAYLENGTH => {
                let operand = self.pop()?;
                let value = interpreter.unary_operation(id, insn, &operand)?;
                self.push(value);
            }
            IRETURN..=ARETURN => {
                let value = self.pop()?;
                interpreter.return_operation(id, insn, &value)?;
            }
            RETURN => {}
            ATHROW | MONITORENTER | MONITOREXIT => {
                self.pop()?;
            }
            other => {
                return Err(fault(format!(
                    "unsupported opcode {} ({:#04x})",
                    mnemonic(other),
                    other
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::reachability::{BasicValue, ReachabilityInterpreter};

    fn frame(locals: usize) -> Frame<BasicValue> {
        Frame::new(vec![BasicValue::Uninitialized; locals])
    }

    fn run(frame: &mut Frame<BasicValue>, insns: &[Insn]) -> Result<()> {
        let mut interpreter = ReachabilityInterpreter;
        for (i, insn) in insns.iter().enumerate() {
            frame.execute(InsnId(i as u32), insn, &mut interpreter)?;
        }
        Ok(())
    }

    #[test]
    fn test_arithmetic_and_store() {
        let mut f = frame(3);
        run(
            &mut f,
            &[
                Insn::op(ICONST_1),
                Insn::op(I2L),
                Insn::op(LCONST_1),
                Insn::op(LADD),
                Insn::var(LSTORE, 1),
            ],
        )
        .unwrap();
        assert_eq!(f.stack_len(), 0);
        assert_eq!(f.local(1), Some(&BasicValue::Long));
        assert_eq!(f.local(2), Some(&BasicValue::Uninitialized));
    }

    #[test]
    fn test_dup_x1_shape() {
        let mut f = frame(0);
        run(
            &mut f,
            &[Insn::op(ACONST_NULL), Insn::op(ICONST_0), Insn::op(DUP_X1)],
        )
        .unwrap();
        assert_eq!(f.stack_len(), 3);
        assert_eq!(f.stack(0), Some(&BasicValue::Int));
        assert_eq!(f.stack(1), Some(&BasicValue::Reference));
        assert_eq!(f.peek(0), Some(&BasicValue::Int));
    }

    #[test]
    fn test_dup2_on_long() {
        let mut f = frame(0);
        run(&mut f, &[Insn::op(LCONST_0), Insn::op(DUP2)]).unwrap();
        assert_eq!(f.stack_len(), 2);
        assert_eq!(f.stack_slots(), 4);
    }

    #[test]
    fn test_category_mismatch() {
        let mut f = frame(0);
        let result = run(&mut f, &[Insn::op(LCONST_0), Insn::op(POP)]);
        assert!(matches!(result, Err(Error::Analysis { .. })));
    }

    #[test]
    fn test_underflow() {
        let mut f = frame(0);
        let result = run(&mut f, &[Insn::op(IADD)]);
        assert!(matches!(result, Err(Error::Analysis { message, .. }) if message == "stack underflow"));
    }

    #[test]
    fn test_invoke_pops_arguments() {
        let mut f = frame(0);
        run(
            &mut f,
            &[
                Insn::op(ACONST_NULL),
                Insn::op(ICONST_0),
                Insn::op(LCONST_0),
                Insn::method(INVOKEVIRTUAL, "a", "b", "(IJ)Ljava/lang/String;"),
            ],
        )
        .unwrap();
        assert_eq!(f.stack_len(), 1);
        assert_eq!(f.peek(0), Some(&BasicValue::Reference));
    }

    #[test]
    fn test_merge_reports_change() {
        let mut interpreter = ReachabilityInterpreter;
        let mut a = Frame::new(vec![BasicValue::Int]);
        let b = Frame::new(vec![BasicValue::Float]);
        assert!(a.merge(&b, &mut interpreter).unwrap());
        assert_eq!(a.local(0), Some(&BasicValue::Uninitialized));
        assert!(!a.merge(&b, &mut interpreter).unwrap());

        let mut c = Frame::new(vec![BasicValue::Int]);
        c.push(BasicValue::Int);
        assert!(a.merge(&c, &mut interpreter).is_err());
    }
}
