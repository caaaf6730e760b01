//! Instruction node types for the mutable method body model.
//!
//! An instruction stream is a sequence of [`Insn`] nodes. Besides real bytecode instructions
//! it contains two kinds of pseudo nodes:
//!
//! - [`Insn::Label`] anchors that jumps, switches and try/catch ranges refer to
//! - [`Insn::Line`] markers carrying source line numbers for the following instructions
//!
//! Operands are stored in resolved form (names, descriptors, constants and labels) rather
//! than as constant-pool indices or byte offsets, so passes can freely rewrite and reorder
//! nodes. Local variable instructions are normalized: `ILOAD_2` is represented as
//! `Insn::Var { opcode: ILOAD, var: 2 }` and the encoder picks the compact form again.

use std::fmt;

use crate::assembly::opcodes::{self, *};

/// Identifier of a label inside one method's instruction list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Creates a label from its raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Label(index)
    }

    /// Returns the raw index of this label.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A method handle constant (`CONSTANT_MethodHandle`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Reference kind (1 = getField ... 9 = invokeInterface).
    pub kind: u8,
    /// Internal name of the owning class.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Member descriptor.
    pub desc: String,
    /// Whether the owner is an interface.
    pub interface: bool,
}

impl Handle {
    /// Returns `true` if this handle refers to a field rather than a method.
    #[must_use]
    pub fn is_field(&self) -> bool {
        self.kind <= 4
    }
}

/// A loadable constant, as pushed by `LDC`/`LDC_W`/`LDC2_W` or passed as a bootstrap argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 32-bit integer.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// String literal.
    String(String),
    /// Class literal, as an internal name or an array descriptor.
    Class(String),
    /// Method type, as a method descriptor.
    MethodType(String),
    /// Method handle.
    MethodHandle(Handle),
}

impl Constant {
    /// Returns `true` for `long` and `double` constants, which occupy two stack slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction.
    Sequential,
    /// May jump to its target or fall through.
    ConditionalJump,
    /// Always jumps to its target.
    UnconditionalJump,
    /// Jumps to one of several targets.
    Switch,
    /// Leaves the method normally.
    Return,
    /// Leaves via an exception.
    Throw,
    /// Subroutine call (`JSR`, `JSR_W`).
    Subroutine,
    /// Subroutine return (`RET`).
    SubroutineReturn,
}

/// A node of a method's instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Jump and exception-range anchor.
    Label(Label),
    /// Source line number marker for the following instructions.
    Line(u16),
    /// Instruction without operands.
    Op(u8),
    /// `BIPUSH`, `SIPUSH` or `NEWARRAY` with its immediate.
    Int {
        /// The opcode.
        opcode: u8,
        /// Immediate operand.
        operand: i32,
    },
    /// Local variable load/store or `RET`.
    Var {
        /// The opcode, always the indexed form (e.g. `ILOAD`, never `ILOAD_0`).
        opcode: u8,
        /// Local variable slot.
        var: u16,
    },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST` or `INSTANCEOF`.
    Type {
        /// The opcode.
        opcode: u8,
        /// Internal name or array descriptor.
        desc: String,
    },
    /// Field access.
    Field {
        /// `GETSTATIC`, `PUTSTATIC`, `GETFIELD` or `PUTFIELD`.
        opcode: u8,
        /// Internal name of the referenced class.
        owner: String,
        /// Field name.
        name: String,
        /// Field descriptor.
        desc: String,
    },
    /// Method invocation other than `INVOKEDYNAMIC`.
    Method {
        /// The invoke opcode.
        opcode: u8,
        /// Internal name of the referenced class.
        owner: String,
        /// Method name.
        name: String,
        /// Method descriptor.
        desc: String,
        /// Whether the owner is an interface.
        interface: bool,
    },
    /// `INVOKEDYNAMIC` call site.
    InvokeDynamic {
        /// Call site name.
        name: String,
        /// Call site descriptor.
        desc: String,
        /// Bootstrap method.
        bsm: Handle,
        /// Static bootstrap arguments.
        args: Vec<Constant>,
    },
    /// Conditional or unconditional jump, `JSR` included.
    Jump {
        /// The opcode, always the short form (`GOTO`, never `GOTO_W`).
        opcode: u8,
        /// Jump target.
        target: Label,
    },
    /// Constant load.
    Ldc(Constant),
    /// Local variable increment.
    Iinc {
        /// Local variable slot.
        var: u16,
        /// Signed increment.
        incr: i16,
    },
    /// Dense switch.
    TableSwitch {
        /// Lowest key.
        min: i32,
        /// Highest key.
        max: i32,
        /// Target when the key is out of range.
        default: Label,
        /// Targets for `min..=max`.
        targets: Vec<Label>,
    },
    /// Sparse switch.
    LookupSwitch {
        /// Target when no key matches.
        default: Label,
        /// Sorted keys.
        keys: Vec<i32>,
        /// Targets, parallel to `keys`.
        targets: Vec<Label>,
    },
    /// Multi-dimensional array creation.
    MultiANewArray {
        /// Array descriptor.
        desc: String,
        /// Number of dimensions to allocate.
        dims: u8,
    },
}

impl Insn {
    /// Creates an operand-less instruction.
    #[must_use]
    pub fn op(opcode: u8) -> Self {
        Insn::Op(opcode)
    }

    /// Creates a jump instruction.
    #[must_use]
    pub fn jump(opcode: u8, target: Label) -> Self {
        Insn::Jump { opcode, target }
    }

    /// Creates a local variable instruction.
    #[must_use]
    pub fn var(opcode: u8, var: u16) -> Self {
        Insn::Var { opcode, var }
    }

    /// Creates a type instruction.
    #[must_use]
    pub fn type_insn(opcode: u8, desc: impl Into<String>) -> Self {
        Insn::Type {
            opcode,
            desc: desc.into(),
        }
    }

    /// Creates a field instruction.
    #[must_use]
    pub fn field(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Field {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// Creates a method instruction; `INVOKEINTERFACE` marks the owner as an interface.
    #[must_use]
    pub fn method(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Method {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            interface: opcode == INVOKEINTERFACE,
        }
    }

    /// Creates the shortest instruction that pushes the `int` constant `n`.
    #[must_use]
    pub fn load_int(n: i32) -> Self {
        match n {
            -1..=5 => Insn::Op((n + 3) as u8),
            -128..=127 => Insn::Int {
                opcode: BIPUSH,
                operand: n,
            },
            -32768..=32767 => Insn::Int {
                opcode: SIPUSH,
                operand: n,
            },
            _ => Insn::Ldc(Constant::Int(n)),
        }
    }

    /// Creates the shortest instruction that pushes the `long` constant `n`.
    #[must_use]
    pub fn load_long(n: i64) -> Self {
        match n {
            0 => Insn::Op(LCONST_0),
            1 => Insn::Op(LCONST_1),
            _ => Insn::Ldc(Constant::Long(n)),
        }
    }

    /// Returns the opcode of a real instruction, or `None` for labels and line markers.
    ///
    /// Constant loads report `LDC` regardless of the encoded width.
    #[must_use]
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Label(_) | Insn::Line(_) => None,
            Insn::Op(opcode)
            | Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Jump { opcode, .. } => Some(*opcode),
            Insn::InvokeDynamic { .. } => Some(INVOKEDYNAMIC),
            Insn::Ldc(_) => Some(LDC),
            Insn::Iinc { .. } => Some(IINC),
            Insn::TableSwitch { .. } => Some(TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(LOOKUPSWITCH),
            Insn::MultiANewArray { .. } => Some(MULTIANEWARRAY),
        }
    }

    /// Returns `true` if this node is a real instruction (not a label or line marker).
    #[must_use]
    pub fn is_real(&self) -> bool {
        self.opcode().is_some()
    }

    /// Returns the label if this node is a label anchor.
    #[must_use]
    pub fn as_label(&self) -> Option<Label> {
        match self {
            Insn::Label(label) => Some(*label),
            _ => None,
        }
    }

    /// Returns how control leaves this instruction.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        match self {
            Insn::Jump { opcode, .. } => match *opcode {
                GOTO => FlowType::UnconditionalJump,
                JSR => FlowType::Subroutine,
                _ => FlowType::ConditionalJump,
            },
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => FlowType::Switch,
            Insn::Var { opcode: RET, .. } => FlowType::SubroutineReturn,
            Insn::Op(ATHROW) => FlowType::Throw,
            Insn::Op(opcode) if opcodes::is_return(*opcode) => FlowType::Return,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` if control never falls through to the next node.
    #[must_use]
    pub fn ends_flow(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalJump
                | FlowType::Switch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::SubroutineReturn
        )
    }

    /// Returns `true` for jumps and switches.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::ConditionalJump
                | FlowType::UnconditionalJump
                | FlowType::Switch
                | FlowType::Subroutine
        )
    }

    /// Returns every label this instruction refers to, in operand order.
    #[must_use]
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }

    /// Returns `true` if this instruction refers to `label`.
    #[must_use]
    pub fn references(&self, label: Label) -> bool {
        match self {
            Insn::Jump { target, .. } => *target == label,
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => *default == label || targets.contains(&label),
            _ => false,
        }
    }

    /// Returns a copy with every label (anchor and operand) passed through `map`.
    #[must_use]
    pub fn map_labels(&self, mut map: impl FnMut(Label) -> Label) -> Insn {
        match self {
            Insn::Label(label) => Insn::Label(map(*label)),
            Insn::Jump { opcode, target } => Insn::Jump {
                opcode: *opcode,
                target: map(*target),
            },
            Insn::TableSwitch {
                min,
                max,
                default,
                targets,
            } => Insn::TableSwitch {
                min: *min,
                max: *max,
                default: map(*default),
                targets: targets.iter().map(|l| map(*l)).collect(),
            },
            Insn::LookupSwitch {
                default,
                keys,
                targets,
            } => Insn::LookupSwitch {
                default: map(*default),
                keys: keys.clone(),
                targets: targets.iter().map(|l| map(*l)).collect(),
            },
            other => other.clone(),
        }
    }

    /// Returns the pushed value if this instruction pushes an `int` constant.
    #[must_use]
    pub fn int_value(&self) -> Option<i32> {
        match self {
            Insn::Op(opcode @ ICONST_M1..=ICONST_5) => Some(i32::from(*opcode) - 3),
            Insn::Int {
                opcode: BIPUSH | SIPUSH,
                operand,
            } => Some(*operand),
            Insn::Ldc(Constant::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the pushed value if this instruction pushes a `long` constant.
    #[must_use]
    pub fn long_value(&self) -> Option<i64> {
        match self {
            Insn::Op(LCONST_0) => Some(0),
            Insn::Op(LCONST_1) => Some(1),
            Insn::Ldc(Constant::Long(n)) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Label(label) => write!(f, "{label}:"),
            Insn::Line(line) => write!(f, ".line {line}"),
            Insn::Op(opcode) => f.write_str(mnemonic(*opcode)),
            Insn::Int { opcode, operand } => write!(f, "{} {}", mnemonic(*opcode), operand),
            Insn::Var { opcode, var } => write!(f, "{} {}", mnemonic(*opcode), var),
            Insn::Type { opcode, desc } => write!(f, "{} {}", mnemonic(*opcode), desc),
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => write!(f, "{} {}.{} {}", mnemonic(*opcode), owner, name, desc),
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } => write!(f, "{} {}.{}{}", mnemonic(*opcode), owner, name, desc),
            Insn::InvokeDynamic { name, desc, .. } => write!(f, "invokedynamic {name}{desc}"),
            Insn::Jump { opcode, target } => write!(f, "{} {}", mnemonic(*opcode), target),
            Insn::Ldc(constant) => match constant {
                Constant::Int(n) => write!(f, "ldc {n}"),
                Constant::Float(n) => write!(f, "ldc {n}f"),
                Constant::Long(n) => write!(f, "ldc {n}L"),
                Constant::Double(n) => write!(f, "ldc {n}d"),
                Constant::String(s) => write!(f, "ldc {s:?}"),
                Constant::Class(c) => write!(f, "ldc {c}.class"),
                Constant::MethodType(d) => write!(f, "ldc {d}"),
                Constant::MethodHandle(h) => write!(f, "ldc {}.{}{}", h.owner, h.name, h.desc),
            },
            Insn::Iinc { var, incr } => write!(f, "iinc {var} {incr}"),
            Insn::TableSwitch { min, max, .. } => write!(f, "tableswitch {min}..{max}"),
            Insn::LookupSwitch { keys, .. } => write!(f, "lookupswitch {} keys", keys.len()),
            Insn::MultiANewArray { desc, dims } => write!(f, "multianewarray {desc} {dims}"),
        }
    }
}
