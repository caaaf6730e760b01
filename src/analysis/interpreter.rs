//! The abstract domain plug-in for [`crate::analysis::Analyzer`].
//!
//! An [`Interpreter`] decides what an abstract value is and how each instruction transforms
//! values. [`crate::analysis::Frame::execute`] handles the stack and locals bookkeeping and
//! calls back into the interpreter only for the values an instruction produces, grouped by
//! how many operands it consumes.

use std::fmt::Debug;

use crate::{
    assembly::{opcodes::*, Constant, Insn, InsnId},
    model::descriptor::{BasicType, MethodDescriptor},
    Result,
};

/// An abstract value stored in a frame slot.
pub trait Value: Clone + Debug + PartialEq {
    /// Number of slots the value occupies (2 for `long`/`double`).
    fn size(&self) -> u8;
}

/// Abstract semantics of JVM instructions.
///
/// All operation callbacks receive the id and node of the instruction being executed so
/// interpreters can attribute values to the instruction that produced them.
pub trait Interpreter {
    /// The abstract value type.
    type Value: Value;

    /// A value of the given type, or the "empty" value for unused slots when `None`.
    fn new_value(&mut self, ty: Option<BasicType>) -> Self::Value;

    /// The entry value of a parameter (or receiver) in local slot `local`.
    fn new_parameter(&mut self, ty: BasicType, local: u16) -> Self::Value {
        let _ = local;
        self.new_value(Some(ty))
    }

    /// The single stack value at the entry of an exception handler.
    fn new_exception_value(&mut self, catch_type: Option<&str>) -> Self::Value {
        let _ = catch_type;
        self.new_value(Some(BasicType::Reference))
    }

    /// Instructions pushing a value without consuming any: constants, `GETSTATIC`, `NEW`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the instruction cannot be interpreted.
    fn new_operation(&mut self, id: InsnId, insn: &Insn) -> Result<Self::Value>;

    /// Loads, stores and the `DUP`/`SWAP` family: produce a copy of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the instruction cannot be interpreted.
    fn copy_operation(&mut self, id: InsnId, insn: &Insn, value: &Self::Value)
        -> Result<Self::Value>;

    /// One-operand instructions producing a value (negation, conversions, `GETFIELD`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the instruction cannot be interpreted.
    fn unary_operation(&mut self, id: InsnId, insn: &Insn, value: &Self::Value)
        -> Result<Self::Value>;

    /// Two-operand instructions producing a value (arithmetic, comparisons, array loads).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the instruction cannot be interpreted.
    fn binary_operation(
        &mut self,
        id: InsnId,
        insn: &Insn,
        a: &Self::Value,
        b: &Self::Value,
    ) -> Result<Self::Value>;

    /// Array stores. Produces nothing; the default accepts any operands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the operands are rejected.
    fn ternary_operation(
        &mut self,
        id: InsnId,
        insn: &Insn,
        values: [&Self::Value; 3],
    ) -> Result<()> {
        let _ = (id, insn, values);
        Ok(())
    }

    /// Invocations and `MULTIANEWARRAY`. Called only when a value is produced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the instruction cannot be interpreted.
    fn nary_operation(&mut self, id: InsnId, insn: &Insn, values: &[Self::Value])
        -> Result<Self::Value>;

    /// Value-returning `xRETURN`. The default accepts any value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the value is rejected.
    fn return_operation(&mut self, id: InsnId, insn: &Insn, value: &Self::Value) -> Result<()> {
        let _ = (id, insn, value);
        Ok(())
    }

    /// Joins two values reaching the same slot along different paths.
    fn merge(&mut self, a: &Self::Value, b: &Self::Value) -> Self::Value;
}

/// Basic type of the value an instruction pushes, or `None` if it pushes nothing.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a member descriptor is invalid.
pub fn result_type(insn: &Insn) -> Result<Option<BasicType>> {
    let ty = match insn {
        Insn::Label(_) | Insn::Line(_) => return Ok(None),
        Insn::Ldc(constant) => match constant {
            Constant::Int(_) => BasicType::Int,
            Constant::Float(_) => BasicType::Float,
            Constant::Long(_) => BasicType::Long,
            Constant::Double(_) => BasicType::Double,
            _ => BasicType::Reference,
        },
        Insn::Field { opcode, desc, .. } => match *opcode {
            GETSTATIC | GETFIELD => BasicType::of(desc)?,
            _ => return Ok(None),
        },
        Insn::Method { desc, .. } | Insn::InvokeDynamic { desc, .. } => {
            match MethodDescriptor::parse(desc)?.return_type()? {
                BasicType::Void => return Ok(None),
                ty => ty,
            }
        }
        Insn::Iinc { .. } => BasicType::Int,
        Insn::Type { opcode, .. } => match *opcode {
            INSTANCEOF => BasicType::Int,
            _ => BasicType::Reference,
        },
        Insn::MultiANewArray { .. } => BasicType::Reference,
        Insn::Int { opcode, .. } => match *opcode {
            NEWARRAY => BasicType::Reference,
            _ => BasicType::Int,
        },
        Insn::Var { opcode, .. } => match *opcode {
            ILOAD | ISTORE => BasicType::Int,
            LLOAD | LSTORE => BasicType::Long,
            FLOAD | FSTORE => BasicType::Float,
            DLOAD | DSTORE => BasicType::Double,
            ALOAD | ASTORE => BasicType::Reference,
            _ => return Ok(None),
        },
        Insn::Jump { .. } | Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
            return Ok(None)
        }
        Insn::Op(opcode) => match *opcode {
            ACONST_NULL | AALOAD => BasicType::Reference,
            ICONST_M1..=ICONST_5 => BasicType::Int,
            LCONST_0 | LCONST_1 => BasicType::Long,
            FCONST_0..=FCONST_2 => BasicType::Float,
            DCONST_0 | DCONST_1 => BasicType::Double,
            IALOAD | BALOAD | CALOAD | SALOAD | ARRAYLENGTH => BasicType::Int,
            LALOAD => BasicType::Long,
            FALOAD => BasicType::Float,
            DALOAD => BasicType::Double,
            op @ IADD..=DNEG => arithmetic_type((op - IADD) % 4),
            op @ ISHL..=LXOR => arithmetic_type((op - ISHL) % 2),
            I2L | F2L | D2L => BasicType::Long,
            I2F | L2F | D2F => BasicType::Float,
            I2D | L2D | F2D => BasicType::Double,
            L2I | F2I | D2I | I2B | I2C | I2S => BasicType::Int,
            LCMP | FCMPL | FCMPG | DCMPL | DCMPG => BasicType::Int,
            _ => return Ok(None),
        },
    };
    Ok(Some(ty))
}

fn arithmetic_type(lane: u8) -> BasicType {
    match lane {
        0 => BasicType::Int,
        1 => BasicType::Long,
        2 => BasicType::Float,
        _ => BasicType::Double,
    }
}
