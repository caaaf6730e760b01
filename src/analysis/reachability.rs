//! Type-level interpreter used to find unreachable code.
//!
//! Values only carry their [`BasicType`]. Running the [`crate::analysis::Analyzer`] with this
//! interpreter leaves exactly the unreachable instructions without a frame.

use crate::{
    analysis::interpreter::{result_type, Interpreter, Value},
    assembly::{Insn, InsnId},
    model::descriptor::BasicType,
    Result,
};

/// A value described only by its basic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicValue {
    /// Unused slot, or two incompatible types merged.
    Uninitialized,
    /// `int`, `short`, `char`, `byte` or `boolean`.
    Int,
    /// `float`.
    Float,
    /// `long`.
    Long,
    /// `double`.
    Double,
    /// Any object or array reference.
    Reference,
}

impl From<BasicType> for BasicValue {
    fn from(ty: BasicType) -> Self {
        match ty {
            BasicType::Void => BasicValue::Uninitialized,
            BasicType::Int => BasicValue::Int,
            BasicType::Float => BasicValue::Float,
            BasicType::Long => BasicValue::Long,
            BasicType::Double => BasicValue::Double,
            BasicType::Reference => BasicValue::Reference,
        }
    }
}

impl Value for BasicValue {
    fn size(&self) -> u8 {
        match self {
            BasicValue::Long | BasicValue::Double => 2,
            _ => 1,
        }
    }
}

/// [`Interpreter`] over [`BasicValue`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReachabilityInterpreter;

impl ReachabilityInterpreter {
    fn produce(insn: &Insn) -> Result<BasicValue> {
        Ok(result_type(insn)?.map_or(BasicValue::Uninitialized, BasicValue::from))
    }
}

impl Interpreter for ReachabilityInterpreter {
    type Value = BasicValue;

    fn new_value(&mut self, ty: Option<BasicType>) -> BasicValue {
        ty.map_or(BasicValue::Uninitialized, BasicValue::from)
    }

    fn new_operation(&mut self, _id: InsnId, insn: &Insn) -> Result<BasicValue> {
        Self::produce(insn)
    }

    fn copy_operation(&mut self, _id: InsnId, _insn: &Insn, value: &BasicValue) -> Result<BasicValue> {
        Ok(*value)
    }

    fn unary_operation(&mut self, _id: InsnId, insn: &Insn, _value: &BasicValue) -> Result<BasicValue> {
        Self::produce(insn)
    }

    fn binary_operation(
        &mut self,
        _id: InsnId,
        insn: &Insn,
        _a: &BasicValue,
        _b: &BasicValue,
    ) -> Result<BasicValue> {
        Self::produce(insn)
    }

    fn nary_operation(&mut self, _id: InsnId, insn: &Insn, _values: &[BasicValue]) -> Result<BasicValue> {
        Self::produce(insn)
    }

    fn merge(&mut self, a: &BasicValue, b: &BasicValue) -> BasicValue {
        if a == b {
            *a
        } else {
            BasicValue::Uninitialized
        }
    }
}
