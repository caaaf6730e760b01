//! Class file encoding.
//!
//! Encoding lowers every instruction to bytes with its pool indices resolved, then lays the
//! body out. Layout is iterated: a `GOTO` or `JSR` whose displacement no longer fits 16 bits
//! is widened to its `_W` form, which shifts everything after it, so offsets are recomputed
//! until no further jump needs widening.
//!
//! `max_stack` is recomputed from the reachability analyzer's frames and `max_locals` from
//! the descriptor and the local variable instructions. No `StackMapTable` is written; the
//! class version is lowered to 50 so the type-inferring verifier accepts the result.

use std::collections::HashMap;

use crate::{
    analysis::{Analyzer, ReachabilityInterpreter},
    assembly::{opcodes::*, Code, Constant, Handle, Insn, Label},
    classfile::{PoolBuilder, JAVA_6, MAGIC},
    file::io::write_be,
    model::{descriptor::MethodDescriptor, ClassEntry, FieldEntry, MethodEntry},
    Error, Result,
};

/// `BootstrapMethods` entries, deduplicated.
#[derive(Default)]
struct Bootstraps {
    entries: Vec<(u16, Vec<u16>)>,
    index: HashMap<(u16, Vec<u16>), u16>,
}

impl Bootstraps {
    fn add(&mut self, pool: &mut PoolBuilder, bsm: &Handle, args: &[Constant]) -> Result<u16> {
        let handle = pool.handle(bsm)?;
        let args = args
            .iter()
            .map(|arg| pool.constant(arg))
            .collect::<Result<Vec<u16>>>()?;
        let key = (handle, args);
        if let Some(&index) = self.index.get(&key) {
            return Ok(index);
        }
        let Ok(index) = u16::try_from(self.entries.len()) else {
            return Err(Error::NotSupported("too many bootstrap methods".into()));
        };
        self.index.insert(key.clone(), index);
        self.entries.push(key);
        Ok(index)
    }
}

/// Returns `true` if the class needs a version that requires stack map frames.
fn needs_java7(class: &ClassEntry) -> bool {
    class
        .methods
        .iter()
        .filter_map(|method| method.code.as_ref())
        .flat_map(|code| code.insns.iter())
        .any(|(_, insn)| {
            matches!(
                insn,
                Insn::InvokeDynamic { .. }
                    | Insn::Ldc(Constant::MethodHandle(_) | Constant::MethodType(_))
            )
        })
}

/// Encodes one class.
pub(crate) fn write_class(class: &ClassEntry, max_iterations: usize) -> Result<Vec<u8>> {
    let mut pool = PoolBuilder::new();
    let mut bootstraps = Bootstraps::default();
    let mut body = Vec::new();

    write_be(&mut body, class.access.bits());
    write_be(&mut body, pool.class(&class.name)?);
    match &class.super_name {
        Some(name) => write_be(&mut body, pool.class(name)?),
        None => write_be(&mut body, 0u16),
    }
    write_be(&mut body, count_u16(class.interfaces.len(), "interfaces")?);
    for interface in &class.interfaces {
        write_be(&mut body, pool.class(interface)?);
    }

    write_be(&mut body, count_u16(class.fields.len(), "fields")?);
    for field in &class.fields {
        write_field(&mut body, &mut pool, field)?;
    }

    write_be(&mut body, count_u16(class.methods.len(), "methods")?);
    for method in &class.methods {
        write_method(
            &mut body,
            &mut pool,
            &mut bootstraps,
            &class.name,
            method,
            max_iterations,
        )?;
    }

    let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
    if let Some(source_file) = &class.source_file {
        let mut data = Vec::new();
        write_be(&mut data, pool.utf8(source_file)?);
        attributes.push((pool.utf8("SourceFile")?, data));
    }
    if let Some(signature) = &class.signature {
        let mut data = Vec::new();
        write_be(&mut data, pool.utf8(signature)?);
        attributes.push((pool.utf8("Signature")?, data));
    }
    if !bootstraps.entries.is_empty() {
        let mut data = Vec::new();
        write_be(&mut data, count_u16(bootstraps.entries.len(), "bootstrap methods")?);
        for (handle, args) in &bootstraps.entries {
            write_be(&mut data, *handle);
            write_be(&mut data, count_u16(args.len(), "bootstrap arguments")?);
            for arg in args {
                write_be(&mut data, *arg);
            }
        }
        attributes.push((pool.utf8("BootstrapMethods")?, data));
    }
    write_attributes(&mut body, &attributes)?;

    let (major, minor) = if needs_java7(class) {
        if class.version.0 > JAVA_6 {
            log::warn!(
                "{} uses invokedynamic; written as version {} without stack map frames",
                class.name,
                class.version.0
            );
        }
        class.version
    } else if class.version.0 > JAVA_6 {
        (JAVA_6, 0)
    } else {
        class.version
    };

    let mut out = Vec::with_capacity(body.len() + 1024);
    write_be(&mut out, MAGIC);
    write_be(&mut out, minor);
    write_be(&mut out, major);
    pool.write(&mut out)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn count_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::NotSupported(format!("{len} {what} exceed 65535")))
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) -> Result<()> {
    write_be(out, count_u16(attributes.len(), "attributes")?);
    for (name, data) in attributes {
        let Ok(length) = u32::try_from(data.len()) else {
            return Err(Error::NotSupported("attribute exceeds 4 GiB".into()));
        };
        write_be(out, *name);
        write_be(out, length);
        out.extend_from_slice(data);
    }
    Ok(())
}

fn write_field(out: &mut Vec<u8>, pool: &mut PoolBuilder, field: &FieldEntry) -> Result<()> {
    write_be(out, field.access.bits());
    write_be(out, pool.utf8(&field.name)?);
    write_be(out, pool.utf8(&field.desc)?);

    let mut attributes = Vec::new();
    if let Some(constant) = &field.constant_value {
        let mut data = Vec::new();
        write_be(&mut data, pool.constant(constant)?);
        attributes.push((pool.utf8("ConstantValue")?, data));
    }
    if let Some(signature) = &field.signature {
        let mut data = Vec::new();
        write_be(&mut data, pool.utf8(signature)?);
        attributes.push((pool.utf8("Signature")?, data));
    }
    write_attributes(out, &attributes)
}

fn write_method(
    out: &mut Vec<u8>,
    pool: &mut PoolBuilder,
    bootstraps: &mut Bootstraps,
    owner: &str,
    method: &MethodEntry,
    max_iterations: usize,
) -> Result<()> {
    write_be(out, method.access.bits());
    write_be(out, pool.utf8(&method.name)?);
    write_be(out, pool.utf8(&method.desc)?);

    let mut attributes = Vec::new();
    if let Some(code) = &method.code {
        let data = CodeWriter {
            pool: &mut *pool,
            bootstraps: &mut *bootstraps,
        }
        .write(owner, method, code, max_iterations)?;
        attributes.push((pool.utf8("Code")?, data));
    }
    if !method.exceptions.is_empty() {
        let mut data = Vec::new();
        write_be(&mut data, count_u16(method.exceptions.len(), "exceptions")?);
        for exception in &method.exceptions {
            write_be(&mut data, pool.class(exception)?);
        }
        attributes.push((pool.utf8("Exceptions")?, data));
    }
    if let Some(signature) = &method.signature {
        let mut data = Vec::new();
        write_be(&mut data, pool.utf8(signature)?);
        attributes.push((pool.utf8("Signature")?, data));
    }
    write_attributes(out, &attributes)
}

/// An instruction with its pool operands resolved.
#[derive(Debug)]
enum Lowered {
    Label(Label),
    Line(u16),
    Bytes(Vec<u8>),
    Jump {
        opcode: u8,
        target: Label,
    },
    TableSwitch {
        min: i32,
        max: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        keys: Vec<i32>,
        targets: Vec<Label>,
    },
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

impl Lowered {
    fn size(&self, offset: u32, wide: bool) -> u32 {
        match self {
            Lowered::Label(_) | Lowered::Line(_) => 0,
            Lowered::Bytes(bytes) => bytes.len() as u32,
            Lowered::Jump { .. } => {
                if wide {
                    5
                } else {
                    3
                }
            }
            Lowered::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len() as u32
            }
            Lowered::LookupSwitch { targets, .. } => {
                1 + switch_padding(offset) + 8 + 8 * targets.len() as u32
            }
        }
    }
}

/// Offsets of a finished layout.
struct Layout {
    offsets: Vec<u32>,
    labels: HashMap<Label, u32>,
    wide: Vec<bool>,
    length: u32,
}

impl Layout {
    fn label(&self, label: Label) -> Result<u32> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| malformed_error!("Label {} is not anchored in the body", label))
    }

    fn relative(&self, label: Label, from: u32) -> Result<i32> {
        Ok((i64::from(self.label(label)?) - i64::from(from)) as i32)
    }
}

struct CodeWriter<'a> {
    pool: &'a mut PoolBuilder,
    bootstraps: &'a mut Bootstraps,
}

impl CodeWriter<'_> {
    fn write(
        &mut self,
        owner: &str,
        method: &MethodEntry,
        code: &Code,
        max_iterations: usize,
    ) -> Result<Vec<u8>> {
        let lowered = code
            .insns
            .iter()
            .map(|(_, insn)| self.lower(insn))
            .collect::<Result<Vec<Lowered>>>()?;
        let layout = layout(&lowered)?;
        if layout.length == 0 {
            return Err(malformed_error!(
                "{} has an empty body",
                method.display_name(owner)
            ));
        }
        if layout.length > u32::from(u16::MAX) {
            return Err(Error::NotSupported(format!(
                "{} encodes to {} bytes of code",
                method.display_name(owner),
                layout.length
            )));
        }

        let bytecode = emit(&lowered, &layout)?;

        let mut handlers = Vec::new();
        for block in &code.try_catch_blocks {
            let start = layout.label(block.start)?;
            let end = layout.label(block.end)?;
            if start >= end {
                log::debug!(
                    "{}: dropping empty exception range",
                    method.display_name(owner)
                );
                continue;
            }
            let handler = layout.label(block.handler)?;
            let catch_type = match &block.catch_type {
                Some(name) => self.pool.class(name)?,
                None => 0,
            };
            handlers.push((start as u16, end as u16, handler as u16, catch_type));
        }

        let mut lines = Vec::new();
        for (index, node) in lowered.iter().enumerate() {
            if let Lowered::Line(line) = node {
                let pc = layout.offsets[index];
                if pc < layout.length {
                    lines.push((pc as u16, *line));
                }
            }
        }

        let max_stack = match Analyzer::new(ReachabilityInterpreter)
            .with_max_iterations(max_iterations)
            .with_max_stack_enforced(false)
            .analyze(owner, method)
        {
            Ok(frames) => frames
                .frames()
                .iter()
                .flatten()
                .map(|frame| frame.stack_slots())
                .max()
                .unwrap_or(0)
                .min(usize::from(u16::MAX)) as u16,
            Err(error) => {
                log::debug!("Keeping declared max_stack: {}", error);
                code.max_stack
            }
        };
        let max_locals = max_locals(method, code)?;

        let mut out = Vec::with_capacity(bytecode.len() + 32);
        write_be(&mut out, max_stack);
        write_be(&mut out, max_locals);
        write_be(&mut out, layout.length);
        out.extend_from_slice(&bytecode);
        write_be(&mut out, count_u16(handlers.len(), "exception handlers")?);
        for (start, end, handler, catch_type) in handlers {
            write_be(&mut out, start);
            write_be(&mut out, end);
            write_be(&mut out, handler);
            write_be(&mut out, catch_type);
        }

        let mut attributes = Vec::new();
        if !lines.is_empty() {
            let mut data = Vec::with_capacity(2 + 4 * lines.len());
            write_be(&mut data, count_u16(lines.len(), "line numbers")?);
            for (pc, line) in lines {
                write_be(&mut data, pc);
                write_be(&mut data, line);
            }
            attributes.push((self.pool.utf8("LineNumberTable")?, data));
        }
        write_attributes(&mut out, &attributes)?;
        Ok(out)
    }

    fn lower(&mut self, insn: &Insn) -> Result<Lowered> {
        let mut bytes = Vec::with_capacity(5);
        match insn {
            Insn::Label(label) => return Ok(Lowered::Label(*label)),
            Insn::Line(line) => return Ok(Lowered::Line(*line)),
            Insn::Jump { opcode, target } => {
                return Ok(Lowered::Jump {
                    opcode: *opcode,
                    target: *target,
                })
            }
            Insn::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                return Ok(Lowered::TableSwitch {
                    min: *min,
                    max: *max,
                    default: *default,
                    targets: targets.clone(),
                })
            }
            Insn::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                let mut pairs: Vec<(i32, Label)> =
                    keys.iter().copied().zip(targets.iter().copied()).collect();
                pairs.sort_by_key(|(key, _)| *key);
                return Ok(Lowered::LookupSwitch {
                    default: *default,
                    keys: pairs.iter().map(|(key, _)| *key).collect(),
                    targets: pairs.iter().map(|(_, target)| *target).collect(),
                });
            }
            Insn::Op(opcode) => bytes.push(*opcode),
            Insn::Int { opcode, operand } => {
                bytes.push(*opcode);
                match *opcode {
                    SIPUSH => {
                        let value = i16::try_from(*operand)
                            .map_err(|_| malformed_error!("sipush operand {} out of range", operand))?;
                        write_be(&mut bytes, value);
                    }
                    BIPUSH => {
                        let value = i8::try_from(*operand)
                            .map_err(|_| malformed_error!("bipush operand {} out of range", operand))?;
                        write_be(&mut bytes, value);
                    }
                    _ => {
                        let value = u8::try_from(*operand).map_err(|_| {
                            malformed_error!("{} operand {} out of range", mnemonic(*opcode), operand)
                        })?;
                        bytes.push(value);
                    }
                }
            }
            Insn::Var { opcode, var } => match (*opcode, *var) {
                (ILOAD..=ALOAD, 0..=3) => bytes.push(ILOAD_0 + (opcode - ILOAD) * 4 + *var as u8),
                (ISTORE..=ASTORE, 0..=3) => {
                    bytes.push(ISTORE_0 + (opcode - ISTORE) * 4 + *var as u8);
                }
                (_, 0..=255) => {
                    bytes.push(*opcode);
                    bytes.push(*var as u8);
                }
                _ => {
                    bytes.push(WIDE);
                    bytes.push(*opcode);
                    write_be(&mut bytes, *var);
                }
            },
            Insn::Iinc { var, incr } => match (u8::try_from(*var), i8::try_from(*incr)) {
                (Ok(var), Ok(incr)) => {
                    bytes.push(IINC);
                    bytes.push(var);
                    write_be(&mut bytes, incr);
                }
                _ => {
                    bytes.push(WIDE);
                    bytes.push(IINC);
                    write_be(&mut bytes, *var);
                    write_be(&mut bytes, *incr);
                }
            },
            Insn::Type { opcode, desc } => {
                bytes.push(*opcode);
                write_be(&mut bytes, self.pool.class(desc)?);
            }
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => {
                bytes.push(*opcode);
                write_be(&mut bytes, self.pool.field_ref(owner, name, desc)?);
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                interface,
            } => {
                bytes.push(*opcode);
                write_be(
                    &mut bytes,
                    self.pool.method_ref(owner, name, desc, *interface)?,
                );
                if *opcode == INVOKEINTERFACE {
                    let count = MethodDescriptor::parse(desc)?.args_size()? + 1;
                    let Ok(count) = u8::try_from(count) else {
                        return Err(malformed_error!("{} takes too many arguments", desc));
                    };
                    bytes.push(count);
                    bytes.push(0);
                }
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bsm,
                args,
            } => {
                let bootstrap = self.bootstraps.add(self.pool, bsm, args)?;
                bytes.push(INVOKEDYNAMIC);
                write_be(&mut bytes, self.pool.invoke_dynamic(bootstrap, name, desc)?);
                write_be(&mut bytes, 0u16);
            }
            Insn::Ldc(constant) => {
                let index = self.pool.constant(constant)?;
                if constant.is_wide() {
                    bytes.push(LDC2_W);
                    write_be(&mut bytes, index);
                } else if let Ok(short) = u8::try_from(index) {
                    bytes.push(LDC);
                    bytes.push(short);
                } else {
                    bytes.push(LDC_W);
                    write_be(&mut bytes, index);
                }
            }
            Insn::MultiANewArray { desc, dims } => {
                bytes.push(MULTIANEWARRAY);
                write_be(&mut bytes, self.pool.class(desc)?);
                bytes.push(*dims);
            }
        }
        Ok(Lowered::Bytes(bytes))
    }
}

fn layout(nodes: &[Lowered]) -> Result<Layout> {
    let mut wide = vec![false; nodes.len()];
    loop {
        let mut offsets = Vec::with_capacity(nodes.len());
        let mut labels = HashMap::new();
        let mut offset = 0u32;
        for (index, node) in nodes.iter().enumerate() {
            offsets.push(offset);
            if let Lowered::Label(label) = node {
                labels.insert(*label, offset);
            }
            offset += node.size(offset, wide[index]);
        }
        let layout = Layout {
            offsets,
            labels,
            wide,
            length: offset,
        };

        let mut widen = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            let Lowered::Jump { opcode, target } = node else {
                continue;
            };
            if layout.wide[index] {
                continue;
            }
            let from = layout.offsets[index];
            let displacement = i64::from(layout.label(*target)?) - i64::from(from);
            if i16::try_from(displacement).is_ok() {
                continue;
            }
            match *opcode {
                GOTO | JSR => widen.push(index),
                other => {
                    return Err(Error::NotSupported(format!(
                        "{} displacement {} exceeds 16 bits",
                        mnemonic(other),
                        displacement
                    )))
                }
            }
        }

        if widen.is_empty() {
            return Ok(layout);
        }
        wide = layout.wide;
        for index in widen {
            wide[index] = true;
        }
    }
}

fn emit(nodes: &[Lowered], layout: &Layout) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(layout.length as usize);
    for (index, node) in nodes.iter().enumerate() {
        let offset = layout.offsets[index];
        match node {
            Lowered::Label(_) | Lowered::Line(_) => {}
            Lowered::Bytes(bytes) => out.extend_from_slice(bytes),
            Lowered::Jump { opcode, target } => {
                let displacement = layout.relative(*target, offset)?;
                if layout.wide[index] {
                    out.push(if *opcode == JSR { JSR_W } else { GOTO_W });
                    write_be(&mut out, displacement);
                } else {
                    out.push(*opcode);
                    write_be(&mut out, displacement as i16);
                }
            }
            Lowered::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                out.push(TABLESWITCH);
                out.resize(out.len() + switch_padding(offset) as usize, 0);
                write_be(&mut out, layout.relative(*default, offset)?);
                write_be(&mut out, *min);
                write_be(&mut out, *max);
                for target in targets {
                    write_be(&mut out, layout.relative(*target, offset)?);
                }
            }
            Lowered::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                out.push(LOOKUPSWITCH);
                out.resize(out.len() + switch_padding(offset) as usize, 0);
                write_be(&mut out, layout.relative(*default, offset)?);
                write_be(&mut out, keys.len() as i32);
                for (key, target) in keys.iter().zip(targets) {
                    write_be(&mut out, *key);
                    write_be(&mut out, layout.relative(*target, offset)?);
                }
            }
        }
    }

    if out.len() != layout.length as usize {
        return Err(malformed_error!(
            "Emitted {} bytes of code for a layout of {}",
            out.len(),
            layout.length
        ));
    }
    Ok(out)
}

fn max_locals(method: &MethodEntry, code: &Code) -> Result<u16> {
    let mut locals = u32::from(method.arguments_size()?);
    for (_, insn) in code.insns.iter() {
        let end = match insn {
            Insn::Var { opcode, var } => {
                let wide = matches!(*opcode, LLOAD | DLOAD | LSTORE | DSTORE);
                u32::from(*var) + if wide { 2 } else { 1 }
            }
            Insn::Iinc { var, .. } => u32::from(*var) + 1,
            _ => continue,
        };
        locals = locals.max(end);
    }
    u16::try_from(locals).map_err(|_| Error::NotSupported(format!("{locals} local slots")))
}
