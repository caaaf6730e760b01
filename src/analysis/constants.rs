//! Symbolic constant arithmetic over integer multiplications and additions.
//!
//! The [`ConstantInterpreter`] tracks, for every stack and local slot, whether the value is a
//! known constant, a product with a constant operand, a sum of such terms, or anything else.
//! After an analysis it exposes the outermost constant multiplications of the method, which
//! [`fold_multiplication`] rewrites into a single multiplication by the folded constant.
//!
//! All arithmetic wraps, matching the 32/64-bit two's complement semantics of the JVM.

use std::{collections::HashMap, fmt};

use crate::{
    analysis::interpreter::{result_type, Interpreter, Value},
    assembly::{opcodes::*, Code, Constant, Insn, InsnId},
    model::descriptor::BasicType,
    Result,
};

/// An `int` or `long` constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Number {
    /// 32-bit value.
    Int(i32),
    /// 64-bit value.
    Long(i64),
}

impl Number {
    /// The multiplicative identity of the same width.
    #[must_use]
    pub fn one(self) -> Number {
        match self {
            Number::Int(_) => Number::Int(1),
            Number::Long(_) => Number::Long(1),
        }
    }

    /// Returns `true` for `1` of either width.
    #[must_use]
    pub fn is_one(self) -> bool {
        matches!(self, Number::Int(1) | Number::Long(1))
    }

    /// Wrapping product. A mixed-width product is computed at the width of `self`.
    #[must_use]
    pub fn wrapping_mul(self, other: Number) -> Number {
        match self {
            Number::Int(a) => Number::Int(a.wrapping_mul(other.as_i32())),
            Number::Long(a) => Number::Long(a.wrapping_mul(other.as_i64())),
        }
    }

    /// Value truncated to 32 bits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i32(self) -> i32 {
        match self {
            Number::Int(v) => v,
            Number::Long(v) => v as i32,
        }
    }

    /// Value sign-extended to 64 bits.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Number::Int(v) => i64::from(v),
            Number::Long(v) => v,
        }
    }

    /// The shortest instruction pushing this constant.
    #[must_use]
    pub fn load(self) -> Insn {
        match self {
            Number::Int(v) => Insn::load_int(v),
            Number::Long(v) => Insn::load_long(v),
        }
    }

    fn size(self) -> u8 {
        match self {
            Number::Int(_) => 1,
            Number::Long(_) => 2,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Long(v) => write!(f, "{v}L"),
        }
    }
}

/// Symbolic value of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Unknown value; `insn` is the producer when there is exactly one.
    Var {
        /// Producing instruction.
        insn: Option<InsnId>,
        /// Slot size.
        size: u8,
    },
    /// A constant pushed by `insn`.
    Const {
        /// The push instruction.
        insn: InsnId,
        /// The pushed value.
        value: Number,
    },
    /// `a * b` computed by `insn`, where at least one side is a [`Expr::Const`].
    Mul {
        /// The `IMUL`/`LMUL`.
        insn: InsnId,
        /// Left operand.
        a: Box<Expr>,
        /// Right operand.
        b: Box<Expr>,
    },
    /// `a + b` or `a - b` computed by `insn`, where both sides are constants or products.
    Add {
        /// The `IADD`/`ISUB`/`LADD`/`LSUB`.
        insn: InsnId,
        /// Left operand.
        a: Box<Expr>,
        /// Right operand.
        b: Box<Expr>,
    },
}

impl Expr {
    /// Producing instruction, if the value has exactly one.
    #[must_use]
    pub fn insn(&self) -> Option<InsnId> {
        match self {
            Expr::Var { insn, .. } => *insn,
            Expr::Const { insn, .. } | Expr::Mul { insn, .. } | Expr::Add { insn, .. } => {
                Some(*insn)
            }
        }
    }

    /// For a [`Expr::Mul`], the constant operand and the other operand.
    #[must_use]
    pub fn split_mul(&self) -> Option<(InsnId, Number, &Expr)> {
        let Expr::Mul { a, b, .. } = self else {
            return None;
        };
        match (a.as_ref(), b.as_ref()) {
            (Expr::Const { insn, value }, other) | (other, Expr::Const { insn, value }) => {
                Some((*insn, *value, other))
            }
            _ => None,
        }
    }

    fn is_term(&self) -> bool {
        matches!(self, Expr::Const { .. } | Expr::Mul { .. })
    }
}

impl Value for Expr {
    fn size(&self) -> u8 {
        match self {
            Expr::Var { size, .. } => *size,
            Expr::Const { value, .. } => value.size(),
            Expr::Mul { a, .. } | Expr::Add { a, .. } => a.size(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var { insn: Some(id), .. } => write!(f, "v{}", id.index()),
            Expr::Var { insn: None, .. } => write!(f, "v?"),
            Expr::Const { value, .. } => write!(f, "{value}"),
            Expr::Mul { a, b, .. } => write!(f, "({a} * {b})"),
            Expr::Add { a, b, .. } => write!(f, "({a} +- {b})"),
        }
    }
}

fn var(insn: Option<InsnId>, size: u8) -> Expr {
    Expr::Var { insn, size }
}

fn size_of(ty: Option<BasicType>) -> u8 {
    match ty {
        Some(BasicType::Long | BasicType::Double) => 2,
        _ => 1,
    }
}

/// [`Interpreter`] building [`Expr`] trees and recording constant multiplications.
#[derive(Debug, Default)]
pub struct ConstantInterpreter {
    order: Vec<InsnId>,
    muls: HashMap<InsnId, Expr>,
}

impl ConstantInterpreter {
    /// Creates an interpreter with no recorded multiplications.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, id: InsnId, mul: Expr) {
        if self.muls.insert(id, mul).is_none() {
            self.order.push(id);
        }
    }

    fn forget(&mut self, id: InsnId) {
        if self.muls.remove(&id).is_some() {
            self.order.retain(|other| *other != id);
        }
    }

    fn produced(id: InsnId, insn: &Insn) -> Result<Expr> {
        Ok(var(Some(id), size_of(result_type(insn)?)))
    }

    /// The recorded multiplications by a constant that are not themselves an operand of a
    /// later recorded multiplication, in the order they were first seen.
    #[must_use]
    pub fn constant_multiplications(&self) -> Vec<Expr> {
        let mut result: Vec<Expr> = Vec::new();
        for id in &self.order {
            let Some(mul) = self.muls.get(id) else {
                continue;
            };
            if let Some((_, _, other)) = mul.split_mul() {
                let mut nested: Vec<&Expr> = Vec::new();
                match other {
                    Expr::Mul { .. } => nested.push(other),
                    Expr::Add { a, b, .. } => {
                        nested.extend([a.as_ref(), b.as_ref()].into_iter().filter(|e| {
                            matches!(e, Expr::Mul { .. })
                        }));
                    }
                    _ => {}
                }
                result.retain(|existing| !nested.contains(&existing));
            }
            result.retain(|existing| existing != mul);
            result.push(mul.clone());
        }
        result
    }
}

impl Interpreter for ConstantInterpreter {
    type Value = Expr;

    fn new_value(&mut self, ty: Option<BasicType>) -> Expr {
        var(None, size_of(ty))
    }

    fn new_operation(&mut self, id: InsnId, insn: &Insn) -> Result<Expr> {
        let value = match insn {
            Insn::Ldc(Constant::Int(v)) => Some(Number::Int(*v)),
            Insn::Ldc(Constant::Long(v)) => Some(Number::Long(*v)),
            Insn::Op(LCONST_0) => Some(Number::Long(0)),
            Insn::Op(LCONST_1) => Some(Number::Long(1)),
            _ => insn.int_value().map(Number::Int),
        };
        match value {
            Some(value) => Ok(Expr::Const { insn: id, value }),
            None => Self::produced(id, insn),
        }
    }

    fn copy_operation(&mut self, id: InsnId, _insn: &Insn, value: &Expr) -> Result<Expr> {
        Ok(var(Some(id), value.size()))
    }

    fn unary_operation(&mut self, id: InsnId, insn: &Insn, _value: &Expr) -> Result<Expr> {
        Self::produced(id, insn)
    }

    fn binary_operation(&mut self, id: InsnId, insn: &Insn, a: &Expr, b: &Expr) -> Result<Expr> {
        let fallback = Self::produced(id, insn)?;
        if a == b {
            self.forget(id);
            return Ok(fallback);
        }

        let result = match insn {
            Insn::Op(IMUL | LMUL)
                if matches!(a, Expr::Const { .. }) || matches!(b, Expr::Const { .. }) =>
            {
                let mul = Expr::Mul {
                    insn: id,
                    a: Box::new(a.clone()),
                    b: Box::new(b.clone()),
                };
                self.record(id, mul.clone());
                return Ok(mul);
            }
            Insn::Op(IADD | ISUB | LADD | LSUB) if a.is_term() && b.is_term() => Expr::Add {
                insn: id,
                a: Box::new(a.clone()),
                b: Box::new(b.clone()),
            },
            _ => fallback,
        };
        self.forget(id);
        Ok(result)
    }

    fn nary_operation(&mut self, id: InsnId, insn: &Insn, _values: &[Expr]) -> Result<Expr> {
        Self::produced(id, insn)
    }

    fn merge(&mut self, a: &Expr, b: &Expr) -> Expr {
        if a == b {
            return a.clone();
        }

        match (a, b) {
            (
                Expr::Mul {
                    insn,
                    a: a1,
                    b: b1,
                },
                Expr::Mul { insn: i2, a: a2, b: b2 },
            ) if insn == i2 => {
                let merged = if a1 == a2 && matches!(**a1, Expr::Const { .. }) {
                    Some(Expr::Mul {
                        insn: *insn,
                        a: a1.clone(),
                        b: Box::new(self.merge(b1, b2)),
                    })
                } else if b1 == b2 && matches!(**b1, Expr::Const { .. }) {
                    Some(Expr::Mul {
                        insn: *insn,
                        a: Box::new(self.merge(a1, a2)),
                        b: b1.clone(),
                    })
                } else {
                    None
                };
                if let Some(mul) = merged {
                    self.record(*insn, mul.clone());
                    return mul;
                }
            }
            (
                Expr::Add {
                    insn,
                    a: a1,
                    b: b1,
                },
                Expr::Add { insn: i2, a: a2, b: b2 },
            ) if insn == i2 => {
                if a1 == a2 && !matches!(**a1, Expr::Var { .. }) {
                    let merged = self.merge(b1, b2);
                    if merged.is_term() {
                        return Expr::Add {
                            insn: *insn,
                            a: a1.clone(),
                            b: Box::new(merged),
                        };
                    }
                } else if b1 == b2 && !matches!(**b1, Expr::Var { .. }) {
                    let merged = self.merge(a1, a2);
                    if merged.is_term() {
                        return Expr::Add {
                            insn: *insn,
                            a: Box::new(merged),
                            b: b1.clone(),
                        };
                    }
                }
            }
            _ => {}
        }

        for side in [a, b] {
            if let Expr::Mul { insn, .. } = side {
                self.forget(*insn);
            }
        }
        let size = if a.size() == b.size() { a.size() } else { 1 };
        var(None, size)
    }
}

/// Folds the constant multiplication `mul`, scaled by `factor`, into the instructions of
/// `code`. Returns the number of instructions removed.
///
/// A product of products collapses into one multiplication, a product of a constant into
/// that constant, and a product of a sum is distributed over both terms. A net factor of
/// one removes the multiplication entirely.
pub fn fold_multiplication(code: &mut Code, mul: &Expr, factor: Number) -> usize {
    let (Some(mul_insn), Some((const_insn, constant, other))) = (mul.insn(), mul.split_mul())
    else {
        return 0;
    };
    let n = factor.wrapping_mul(constant);

    match other {
        Expr::Mul { .. } => {
            code.remove(mul_insn);
            code.remove(const_insn);
            2 + fold_multiplication(code, other, n)
        }
        Expr::Const { insn, value } => {
            code.remove(mul_insn);
            code.remove(const_insn);
            code.replace(*insn, n.wrapping_mul(*value).load());
            2
        }
        Expr::Add { a, b, .. } => {
            code.remove(mul_insn);
            code.remove(const_insn);
            2 + distribute(code, a, n) + distribute(code, b, n)
        }
        Expr::Var { .. } if n.is_one() => {
            code.remove(mul_insn);
            code.remove(const_insn);
            2
        }
        Expr::Var { .. } => {
            code.replace(const_insn, n.load());
            0
        }
    }
}

fn distribute(code: &mut Code, term: &Expr, n: Number) -> usize {
    match term {
        Expr::Const { insn, value } => {
            code.replace(*insn, n.wrapping_mul(*value).load());
            0
        }
        Expr::Mul { .. } => fold_multiplication(code, term, n),
        _ => 0,
    }
}

/// Identity factor for the multiplication instruction `insn`.
#[must_use]
pub fn unit_for(insn: &Insn) -> Option<Number> {
    match insn {
        Insn::Op(IMUL) => Some(Number::Int(1)),
        Insn::Op(LMUL) => Some(Number::Long(1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::Analyzer,
        assembly::InsnBuilder,
        model::{MethodAccessFlags, MethodEntry},
    };

    fn analyze(code: Code, desc: &str) -> (MethodEntry, Vec<Expr>) {
        let method = MethodEntry::new("m", desc, MethodAccessFlags::STATIC).with_code(code);
        let mut analyzer = Analyzer::new(ConstantInterpreter::new());
        analyzer.analyze("a", &method).unwrap();
        let muls = analyzer.interpreter().constant_multiplications();
        (method, muls)
    }

    fn fold_all(method: &mut MethodEntry, muls: &[Expr]) {
        let code = method.code.as_mut().unwrap();
        for mul in muls {
            let unit = unit_for(&code.insns[mul.insn().unwrap()]).unwrap();
            fold_multiplication(code, mul, unit);
        }
    }

    fn real_insns(method: &MethodEntry) -> Vec<Insn> {
        method
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter(|(_, insn)| insn.is_real())
            .map(|(_, insn)| insn.clone())
            .collect()
    }

    #[test]
    fn test_nested_multiplication_cancels() {
        let code = InsnBuilder::new()
            .iload(0)
            .iconst(7)
            .imul()
            .ldc(Constant::Int(-1_227_133_513))
            .imul()
            .ireturn()
            .build()
            .unwrap();
        let (mut method, muls) = analyze(code, "(I)I");
        assert_eq!(muls.len(), 1);

        fold_all(&mut method, &muls);
        assert_eq!(
            real_insns(&method),
            vec![Insn::var(ILOAD, 0), Insn::op(IRETURN)]
        );
    }

    #[test]
    fn test_constant_operand_folds() {
        let code = InsnBuilder::new()
            .ldc(Constant::Int(1000))
            .iconst(3)
            .imul()
            .ireturn()
            .build()
            .unwrap();
        let (mut method, muls) = analyze(code, "()I");
        fold_all(&mut method, &muls);
        assert_eq!(
            real_insns(&method),
            vec![Insn::load_int(3000), Insn::op(IRETURN)]
        );
    }

    #[test]
    fn test_distribution_over_addition() {
        let code = InsnBuilder::new()
            .iload(0)
            .iconst(3)
            .imul()
            .iconst(4)
            .iadd()
            .iconst(5)
            .imul()
            .ireturn()
            .build()
            .unwrap();
        let (mut method, muls) = analyze(code, "(I)I");
        assert_eq!(muls.len(), 1);

        fold_all(&mut method, &muls);
        assert_eq!(
            real_insns(&method),
            vec![
                Insn::var(ILOAD, 0),
                Insn::load_int(15),
                Insn::op(IMUL),
                Insn::load_int(20),
                Insn::op(IADD),
                Insn::op(IRETURN),
            ]
        );
    }

    #[test]
    fn test_long_wraps() {
        let code = InsnBuilder::new()
            .lload(0)
            .lconst(3)
            .lmul()
            .ldc(Constant::Long(-6_148_914_691_236_517_205))
            .lmul()
            .lreturn()
            .build()
            .unwrap();
        let (mut method, muls) = analyze(code, "(J)J");
        fold_all(&mut method, &muls);
        assert_eq!(
            real_insns(&method),
            vec![Insn::var(LLOAD, 0), Insn::op(LRETURN)]
        );
    }

    #[test]
    fn test_merge_collapses_different_constants() {
        let mut interpreter = ConstantInterpreter::new();
        let a = Expr::Const {
            insn: InsnId(1),
            value: Number::Int(3),
        };
        let b = Expr::Const {
            insn: InsnId(2),
            value: Number::Int(5),
        };
        assert_eq!(interpreter.merge(&a, &b), var(None, 1));
        assert_eq!(interpreter.merge(&a, &a), a);
    }

    #[test]
    fn test_merge_keeps_shared_constant_factor() {
        let mut interpreter = ConstantInterpreter::new();
        let c = Box::new(Expr::Const {
            insn: InsnId(1),
            value: Number::Int(9),
        });
        let left = Expr::Mul {
            insn: InsnId(3),
            a: c.clone(),
            b: Box::new(var(Some(InsnId(0)), 1)),
        };
        let right = Expr::Mul {
            insn: InsnId(3),
            a: c.clone(),
            b: Box::new(var(Some(InsnId(2)), 1)),
        };
        let merged = interpreter.merge(&left, &right);
        assert_eq!(
            merged,
            Expr::Mul {
                insn: InsnId(3),
                a: c,
                b: Box::new(var(None, 1)),
            }
        );
        assert_eq!(interpreter.constant_multiplications().len(), 1);
    }
}
