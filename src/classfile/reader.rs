//! Class file decoding.
//!
//! Decoding happens in two steps. The class structure is parsed first, keeping every
//! `Code` attribute as a raw slice, because the `BootstrapMethods` attribute that
//! `invokedynamic` depends on only follows the methods. The bodies are decoded once the
//! class attributes are known.
//!
//! Bytecode decoding resolves every operand: pool indices become names and constants,
//! branch offsets become [`Label`]s, and the compact `xLOAD_n` / `xSTORE_n` forms become
//! plain [`Insn::Var`] nodes. Labels are only anchored where something refers to them.

use std::collections::BTreeMap;

use crate::{
    assembly::{opcodes::*, Code, Constant, Handle, Insn, InsnList, Label, TryCatchBlock},
    classfile::{constpool::ConstantPool, PoolEntry, MAGIC},
    file::parser::Parser,
    model::{ClassAccessFlags, ClassEntry, FieldAccessFlags, FieldEntry, MethodAccessFlags, MethodEntry},
    Error, Result,
};

struct Bootstrap {
    handle: u16,
    args: Vec<u16>,
}

struct PendingMethod<'a> {
    method: MethodEntry,
    code: Option<&'a [u8]>,
}

/// Decodes one class file.
pub(crate) fn read_class(data: &[u8]) -> Result<ClassEntry> {
    if data.is_empty() {
        return Err(Error::Empty);
    }

    let mut parser = Parser::new(data);
    let magic = parser.read_be::<u32>()?;
    if magic != MAGIC {
        return Err(malformed_error!("Invalid class file magic 0x{:08X}", magic));
    }
    let minor = parser.read_be::<u16>()?;
    let major = parser.read_be::<u16>()?;
    let pool = ConstantPool::parse(&mut parser)?;

    let access = ClassAccessFlags::from_bits_retain(parser.read_be()?);
    let name = pool.class_name(parser.read_be()?)?.to_string();
    let super_name = match parser.read_be::<u16>()? {
        0 => None,
        index => Some(pool.class_name(index)?.to_string()),
    };

    let interface_count = parser.read_be::<u16>()?;
    let mut interfaces = Vec::with_capacity(usize::from(interface_count));
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(parser.read_be()?)?.to_string());
    }

    let field_count = parser.read_be::<u16>()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    for _ in 0..field_count {
        fields.push(read_field(&mut parser, &pool)?);
    }

    let method_count = parser.read_be::<u16>()?;
    let mut pending = Vec::with_capacity(usize::from(method_count));
    for _ in 0..method_count {
        pending.push(read_method(&mut parser, &pool)?);
    }

    let mut class = ClassEntry::new(name);
    class.access = access;
    class.super_name = super_name;
    class.interfaces = interfaces;
    class.fields = fields;
    class.version = (major, minor);

    let mut bootstraps = Vec::new();
    let attribute_count = parser.read_be::<u16>()?;
    for _ in 0..attribute_count {
        let (attribute, body) = read_attribute(&mut parser, &pool)?;
        let mut body = Parser::new(body);
        match attribute {
            "SourceFile" => class.source_file = Some(pool.utf8(body.read_be()?)?.to_string()),
            "Signature" => class.signature = Some(pool.utf8(body.read_be()?)?.to_string()),
            "BootstrapMethods" => bootstraps = read_bootstraps(&mut body)?,
            _ => {}
        }
    }

    for PendingMethod { mut method, code } in pending {
        if let Some(code) = code {
            let decoder = CodeDecoder {
                pool: &pool,
                bootstraps: &bootstraps,
            };
            let body = decoder.decode(code).map_err(|error| match error {
                Error::Malformed { message, file, line } => Error::Malformed {
                    message: format!("{}: {}", method.display_name(&class.name), message),
                    file,
                    line,
                },
                other => other,
            })?;
            method.code = Some(body);
        }
        class.methods.push(method);
    }

    Ok(class)
}

fn read_attribute<'p, 'd>(
    parser: &mut Parser<'d>,
    pool: &'p ConstantPool,
) -> Result<(&'p str, &'d [u8])> {
    let name = pool.utf8(parser.read_be()?)?;
    let length = parser.read_be::<u32>()? as usize;
    Ok((name, parser.read_bytes(length)?))
}

fn read_field(parser: &mut Parser<'_>, pool: &ConstantPool) -> Result<FieldEntry> {
    let access = FieldAccessFlags::from_bits_retain(parser.read_be()?);
    let name = pool.utf8(parser.read_be()?)?;
    let desc = pool.utf8(parser.read_be()?)?;
    let mut field = FieldEntry::new(name, desc, access);

    let attribute_count = parser.read_be::<u16>()?;
    for _ in 0..attribute_count {
        let (attribute, body) = read_attribute(parser, pool)?;
        let mut body = Parser::new(body);
        match attribute {
            "ConstantValue" => field.constant_value = Some(pool.constant(body.read_be()?)?),
            "Signature" => field.signature = Some(pool.utf8(body.read_be()?)?.to_string()),
            _ => {}
        }
    }
    Ok(field)
}

fn read_method<'d>(parser: &mut Parser<'d>, pool: &ConstantPool) -> Result<PendingMethod<'d>> {
    let access = MethodAccessFlags::from_bits_retain(parser.read_be()?);
    let name = pool.utf8(parser.read_be()?)?;
    let desc = pool.utf8(parser.read_be()?)?;
    let mut method = MethodEntry::new(name, desc, access);
    let mut code = None;

    let attribute_count = parser.read_be::<u16>()?;
    for _ in 0..attribute_count {
        let (attribute, body) = read_attribute(parser, pool)?;
        let mut body = Parser::new(body);
        match attribute {
            "Code" => code = Some(body.data()),
            "Signature" => method.signature = Some(pool.utf8(body.read_be()?)?.to_string()),
            "Exceptions" => {
                let count = body.read_be::<u16>()?;
                for _ in 0..count {
                    method
                        .exceptions
                        .push(pool.class_name(body.read_be()?)?.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(PendingMethod { method, code })
}

fn read_bootstraps(parser: &mut Parser<'_>) -> Result<Vec<Bootstrap>> {
    let count = parser.read_be::<u16>()?;
    let mut bootstraps = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let handle = parser.read_be::<u16>()?;
        let arg_count = parser.read_be::<u16>()?;
        let mut args = Vec::with_capacity(usize::from(arg_count));
        for _ in 0..arg_count {
            args.push(parser.read_be::<u16>()?);
        }
        bootstraps.push(Bootstrap { handle, args });
    }
    Ok(bootstraps)
}

/// Decodes one `Code` attribute into a [`Code`].
struct CodeDecoder<'a> {
    pool: &'a ConstantPool,
    bootstraps: &'a [Bootstrap],
}

/// Label allocation keyed by bytecode offset.
struct Labels {
    insns: InsnList,
    at: BTreeMap<u32, Label>,
}

impl Labels {
    fn at(&mut self, offset: u32) -> Label {
        if let Some(label) = self.at.get(&offset) {
            return *label;
        }
        let label = self.insns.new_label();
        self.at.insert(offset, label);
        label
    }
}

impl CodeDecoder<'_> {
    fn decode(&self, data: &[u8]) -> Result<Code> {
        let mut parser = Parser::new(data);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()?;
        if code_length == 0 || code_length > u32::from(u16::MAX) {
            return Err(malformed_error!("Invalid code length {}", code_length));
        }
        let bytecode = parser.read_bytes(code_length as usize)?;

        let mut labels = Labels {
            insns: InsnList::new(),
            at: BTreeMap::new(),
        };
        let decoded = self.decode_bytecode(bytecode, &mut labels)?;

        let handler_count = parser.read_be::<u16>()?;
        let mut try_catch_blocks = Vec::with_capacity(usize::from(handler_count));
        for _ in 0..handler_count {
            let start = u32::from(parser.read_be::<u16>()?);
            let end = u32::from(parser.read_be::<u16>()?);
            let handler = u32::from(parser.read_be::<u16>()?);
            let catch_type = match parser.read_be::<u16>()? {
                0 => None,
                index => Some(self.pool.class_name(index)?.to_string()),
            };
            if start >= end || end > code_length || handler >= code_length {
                return Err(malformed_error!(
                    "Invalid exception range {}..{} -> {}",
                    start,
                    end,
                    handler
                ));
            }
            try_catch_blocks.push(TryCatchBlock {
                start: labels.at(start),
                end: labels.at(end),
                handler: labels.at(handler),
                catch_type,
            });
        }

        let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
        let attribute_count = parser.read_be::<u16>()?;
        for _ in 0..attribute_count {
            let (attribute, body) = read_attribute(&mut parser, self.pool)?;
            if attribute == "LineNumberTable" {
                let mut body = Parser::new(body);
                let count = body.read_be::<u16>()?;
                for _ in 0..count {
                    let pc = u32::from(body.read_be::<u16>()?);
                    let line = body.read_be::<u16>()?;
                    lines.entry(pc).or_default().push(line);
                }
            }
        }

        for offset in labels.at.keys() {
            if *offset != code_length && decoded.binary_search_by_key(offset, |(o, _)| *o).is_err() {
                return Err(malformed_error!(
                    "Branch or exception target {} is not an instruction boundary",
                    offset
                ));
            }
        }

        let Labels { mut insns, at } = labels;
        for (offset, insn) in decoded {
            if let Some(label) = at.get(&offset) {
                insns.push(Insn::Label(*label));
            }
            if let Some(numbers) = lines.get(&offset) {
                for line in numbers {
                    insns.push(Insn::Line(*line));
                }
            }
            insns.push(insn);
        }
        if let Some(label) = at.get(&code_length) {
            insns.push(Insn::Label(*label));
        }

        Ok(Code {
            insns,
            try_catch_blocks,
            max_stack,
            max_locals,
        })
    }

    fn decode_bytecode(&self, bytecode: &[u8], labels: &mut Labels) -> Result<Vec<(u32, Insn)>> {
        let mut parser = Parser::new(bytecode);
        let mut decoded = Vec::new();
        while parser.has_more_data() {
            let offset = parser.pos() as u32;
            let insn = self.decode_insn(&mut parser, offset, bytecode.len(), labels)?;
            decoded.push((offset, insn));
        }
        Ok(decoded)
    }

    fn decode_insn(
        &self,
        parser: &mut Parser<'_>,
        offset: u32,
        code_length: usize,
        labels: &mut Labels,
    ) -> Result<Insn> {
        let mut target = |relative: i64| -> Result<Label> {
            let absolute = i64::from(offset) + relative;
            if absolute < 0 || absolute >= code_length as i64 {
                return Err(malformed_error!(
                    "Branch at {} targets {} outside the code",
                    offset,
                    absolute
                ));
            }
            Ok(labels.at(absolute as u32))
        };

        let opcode = parser.read_be::<u8>()?;
        let insn = match opcode {
            NOP..=DCONST_1 => Insn::Op(opcode),
            BIPUSH => Insn::Int {
                opcode,
                operand: i32::from(parser.read_be::<i8>()?),
            },
            SIPUSH => Insn::Int {
                opcode,
                operand: i32::from(parser.read_be::<i16>()?),
            },
            LDC => Insn::Ldc(self.pool.constant(u16::from(parser.read_be::<u8>()?))?),
            LDC_W | LDC2_W => {
                let constant = self.pool.constant(parser.read_be()?)?;
                if (opcode == LDC2_W) != constant.is_wide() {
                    return Err(malformed_error!(
                        "{} cannot load {:?}",
                        mnemonic(opcode),
                        constant
                    ));
                }
                Insn::Ldc(constant)
            }
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                opcode,
                var: u16::from(parser.read_be::<u8>()?),
            },
            ILOAD_0..=ALOAD_3 => {
                let index = opcode - ILOAD_0;
                Insn::Var {
                    opcode: ILOAD + index / 4,
                    var: u16::from(index % 4),
                }
            }
            ISTORE_0..=ASTORE_3 => {
                let index = opcode - ISTORE_0;
                Insn::Var {
                    opcode: ISTORE + index / 4,
                    var: u16::from(index % 4),
                }
            }
            IALOAD..=SALOAD | IASTORE..=LXOR | I2L..=DCMPG => Insn::Op(opcode),
            IINC => Insn::Iinc {
                var: u16::from(parser.read_be::<u8>()?),
                incr: i16::from(parser.read_be::<i8>()?),
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => Insn::Jump {
                opcode,
                target: target(i64::from(parser.read_be::<i16>()?))?,
            },
            GOTO_W | JSR_W => Insn::Jump {
                opcode: if opcode == GOTO_W { GOTO } else { JSR },
                target: target(i64::from(parser.read_be::<i32>()?))?,
            },
            TABLESWITCH => {
                parser.align_from(0, 4)?;
                let default = target(i64::from(parser.read_be::<i32>()?))?;
                let min = parser.read_be::<i32>()?;
                let max = parser.read_be::<i32>()?;
                if max < min {
                    return Err(malformed_error!("tableswitch range {}..{} is empty", min, max));
                }
                let count = (i64::from(max) - i64::from(min) + 1) as usize;
                if count > code_length / 4 {
                    return Err(out_of_bounds_error!());
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(target(i64::from(parser.read_be::<i32>()?))?);
                }
                Insn::TableSwitch {
                    min,
                    max,
                    default,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                parser.align_from(0, 4)?;
                let default = target(i64::from(parser.read_be::<i32>()?))?;
                let pairs = parser.read_be::<i32>()?;
                let Ok(count) = usize::try_from(pairs) else {
                    return Err(malformed_error!("lookupswitch with {} pairs", pairs));
                };
                if count > code_length / 8 {
                    return Err(out_of_bounds_error!());
                }
                let mut keys = Vec::with_capacity(count);
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(parser.read_be::<i32>()?);
                    targets.push(target(i64::from(parser.read_be::<i32>()?))?);
                }
                Insn::LookupSwitch {
                    default,
                    keys,
                    targets,
                }
            }
            IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => {
                Insn::Op(opcode)
            }
            GETSTATIC..=PUTFIELD => {
                let member = self.pool.member_ref(parser.read_be()?)?;
                Insn::field(opcode, member.owner, member.name, member.desc)
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let member = self.pool.member_ref(parser.read_be()?)?;
                if opcode == INVOKEINTERFACE {
                    parser.advance_by(2)?;
                }
                Insn::Method {
                    opcode,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                    interface: member.interface,
                }
            }
            INVOKEDYNAMIC => {
                let index = parser.read_be::<u16>()?;
                parser.advance_by(2)?;
                self.invoke_dynamic(index)?
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Insn::type_insn(opcode, self.pool.class_name(parser.read_be()?)?)
            }
            NEWARRAY => Insn::Int {
                opcode,
                operand: i32::from(parser.read_be::<u8>()?),
            },
            MULTIANEWARRAY => Insn::MultiANewArray {
                desc: self.pool.class_name(parser.read_be()?)?.to_string(),
                dims: parser.read_be()?,
            },
            WIDE => {
                let widened = parser.read_be::<u8>()?;
                match widened {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                        opcode: widened,
                        var: parser.read_be()?,
                    },
                    IINC => Insn::Iinc {
                        var: parser.read_be()?,
                        incr: parser.read_be()?,
                    },
                    _ => {
                        return Err(malformed_error!(
                            "wide cannot modify {} at offset {}",
                            mnemonic(widened),
                            offset
                        ))
                    }
                }
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid opcode 0x{:02X} at offset {}",
                    opcode,
                    offset
                ))
            }
        };
        Ok(insn)
    }

    fn invoke_dynamic(&self, index: u16) -> Result<Insn> {
        let PoolEntry::InvokeDynamic {
            bootstrap,
            name_and_type,
        } = self.pool.get(index)?
        else {
            return Err(malformed_error!(
                "invokedynamic operand {} is not an InvokeDynamic entry",
                index
            ));
        };
        let Some(entry) = self.bootstraps.get(usize::from(*bootstrap)) else {
            return Err(malformed_error!("Missing bootstrap method {}", bootstrap));
        };

        let (name, desc) = self.pool.name_and_type(*name_and_type)?;
        let bsm: Handle = self.pool.handle(entry.handle)?;
        let args = entry
            .args
            .iter()
            .map(|arg| self.pool.constant(*arg))
            .collect::<Result<Vec<Constant>>>()?;
        Ok(Insn::InvokeDynamic {
            name: name.to_string(),
            desc: desc.to_string(),
            bsm,
            args,
        })
    }
}
