//! Constant pool decoding and deduplicating construction.
//!
//! [`ConstantPool`] is the read side: it parses the `constant_pool` table of a class file
//! and resolves indices into names, member references and loadable constants.
//! [`PoolBuilder`] is the write side: it hands out indices for symbolic entries and
//! reuses an existing index whenever an identical entry was already added.
//!
//! Floating point entries are kept as raw bit patterns so that `NaN` payloads and negative
//! zero survive a decode/encode cycle and can be deduplicated by equality.

use std::collections::HashMap;

use crate::{
    assembly::{Constant, Handle},
    file::{
        io::write_be,
        parser::{encode_modified_utf8, Parser},
    },
    Error, Result,
};

pub(crate) const TAG_UTF8: u8 = 1;
pub(crate) const TAG_INTEGER: u8 = 3;
pub(crate) const TAG_FLOAT: u8 = 4;
pub(crate) const TAG_LONG: u8 = 5;
pub(crate) const TAG_DOUBLE: u8 = 6;
pub(crate) const TAG_CLASS: u8 = 7;
pub(crate) const TAG_STRING: u8 = 8;
pub(crate) const TAG_FIELDREF: u8 = 9;
pub(crate) const TAG_METHODREF: u8 = 10;
pub(crate) const TAG_INTERFACE_METHODREF: u8 = 11;
pub(crate) const TAG_NAME_AND_TYPE: u8 = 12;
pub(crate) const TAG_METHOD_HANDLE: u8 = 15;
pub(crate) const TAG_METHOD_TYPE: u8 = 16;
pub(crate) const TAG_DYNAMIC: u8 = 17;
pub(crate) const TAG_INVOKE_DYNAMIC: u8 = 18;
pub(crate) const TAG_MODULE: u8 = 19;
pub(crate) const TAG_PACKAGE: u8 = 20;

/// One slot of the constant pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    /// Index 0, and the second slot taken by every `Long` and `Double`.
    Unusable,
    /// `CONSTANT_Utf8`.
    Utf8(String),
    /// `CONSTANT_Integer`.
    Integer(i32),
    /// `CONSTANT_Float`, as raw bits.
    Float(u32),
    /// `CONSTANT_Long`.
    Long(i64),
    /// `CONSTANT_Double`, as raw bits.
    Double(u64),
    /// `CONSTANT_Class` pointing at its name.
    Class(u16),
    /// `CONSTANT_String` pointing at its text.
    String(u16),
    /// `CONSTANT_Fieldref`.
    FieldRef {
        /// Owning class entry.
        class: u16,
        /// Name-and-type entry.
        name_and_type: u16,
    },
    /// `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`.
    MethodRef {
        /// Owning class entry.
        class: u16,
        /// Name-and-type entry.
        name_and_type: u16,
        /// Encoded as `CONSTANT_InterfaceMethodref`.
        interface: bool,
    },
    /// `CONSTANT_NameAndType`.
    NameAndType {
        /// Name entry.
        name: u16,
        /// Descriptor entry.
        desc: u16,
    },
    /// `CONSTANT_MethodHandle`.
    MethodHandle {
        /// Reference kind, 1 to 9.
        kind: u8,
        /// Referenced member entry.
        reference: u16,
    },
    /// `CONSTANT_MethodType` pointing at its descriptor.
    MethodType(u16),
    /// `CONSTANT_Dynamic`.
    Dynamic {
        /// Index into `BootstrapMethods`.
        bootstrap: u16,
        /// Name-and-type entry.
        name_and_type: u16,
    },
    /// `CONSTANT_InvokeDynamic`.
    InvokeDynamic {
        /// Index into `BootstrapMethods`.
        bootstrap: u16,
        /// Name-and-type entry.
        name_and_type: u16,
    },
    /// `CONSTANT_Module`.
    Module(u16),
    /// `CONSTANT_Package`.
    Package(u16),
}

impl PoolEntry {
    /// Number of pool slots the entry occupies.
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            PoolEntry::Long(_) | PoolEntry::Double(_) => 2,
            _ => 1,
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            PoolEntry::Unusable => {}
            PoolEntry::Utf8(value) => {
                let bytes = encode_modified_utf8(value);
                let Ok(len) = u16::try_from(bytes.len()) else {
                    return Err(Error::NotSupported(format!(
                        "string constant of {} bytes exceeds 65535",
                        bytes.len()
                    )));
                };
                out.push(TAG_UTF8);
                write_be(out, len);
                out.extend_from_slice(&bytes);
            }
            PoolEntry::Integer(value) => {
                out.push(TAG_INTEGER);
                write_be(out, *value);
            }
            PoolEntry::Float(bits) => {
                out.push(TAG_FLOAT);
                write_be(out, *bits);
            }
            PoolEntry::Long(value) => {
                out.push(TAG_LONG);
                write_be(out, *value);
            }
            PoolEntry::Double(bits) => {
                out.push(TAG_DOUBLE);
                write_be(out, *bits);
            }
            PoolEntry::Class(name) => {
                out.push(TAG_CLASS);
                write_be(out, *name);
            }
            PoolEntry::String(text) => {
                out.push(TAG_STRING);
                write_be(out, *text);
            }
            PoolEntry::FieldRef {
                class,
                name_and_type,
            } => {
                out.push(TAG_FIELDREF);
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            PoolEntry::MethodRef {
                class,
                name_and_type,
                interface,
            } => {
                out.push(if *interface {
                    TAG_INTERFACE_METHODREF
                } else {
                    TAG_METHODREF
                });
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            PoolEntry::NameAndType { name, desc } => {
                out.push(TAG_NAME_AND_TYPE);
                write_be(out, *name);
                write_be(out, *desc);
            }
            PoolEntry::MethodHandle { kind, reference } => {
                out.push(TAG_METHOD_HANDLE);
                out.push(*kind);
                write_be(out, *reference);
            }
            PoolEntry::MethodType(desc) => {
                out.push(TAG_METHOD_TYPE);
                write_be(out, *desc);
            }
            PoolEntry::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                out.push(TAG_DYNAMIC);
                write_be(out, *bootstrap);
                write_be(out, *name_and_type);
            }
            PoolEntry::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                out.push(TAG_INVOKE_DYNAMIC);
                write_be(out, *bootstrap);
                write_be(out, *name_and_type);
            }
            PoolEntry::Module(name) => {
                out.push(TAG_MODULE);
                write_be(out, *name);
            }
            PoolEntry::Package(name) => {
                out.push(TAG_PACKAGE);
                write_be(out, *name);
            }
        }
        Ok(())
    }
}

/// A resolved `Fieldref`, `Methodref` or `InterfaceMethodref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the owning class.
    pub owner: &'a str,
    /// Member name.
    pub name: &'a str,
    /// Member descriptor.
    pub desc: &'a str,
    /// Declared through `CONSTANT_InterfaceMethodref`.
    pub interface: bool,
}

/// A parsed constant pool.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    /// Parses `constant_pool_count` followed by the pool entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and
    /// [`crate::Error::Malformed`] for unknown tags or undecodable strings.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let count = parser.read_be::<u16>()?;
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(PoolEntry::Unusable);
        while entries.len() < usize::from(count) {
            let offset = parser.pos();
            let tag = parser.read_be::<u8>()?;
            let entry = match tag {
                TAG_UTF8 => PoolEntry::Utf8(parser.read_modified_utf8()?),
                TAG_INTEGER => PoolEntry::Integer(parser.read_be()?),
                TAG_FLOAT => PoolEntry::Float(parser.read_be()?),
                TAG_LONG => PoolEntry::Long(parser.read_be()?),
                TAG_DOUBLE => PoolEntry::Double(parser.read_be()?),
                TAG_CLASS => PoolEntry::Class(parser.read_be()?),
                TAG_STRING => PoolEntry::String(parser.read_be()?),
                TAG_FIELDREF => PoolEntry::FieldRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                TAG_METHODREF | TAG_INTERFACE_METHODREF => PoolEntry::MethodRef {
                    class: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                    interface: tag == TAG_INTERFACE_METHODREF,
                },
                TAG_NAME_AND_TYPE => PoolEntry::NameAndType {
                    name: parser.read_be()?,
                    desc: parser.read_be()?,
                },
                TAG_METHOD_HANDLE => PoolEntry::MethodHandle {
                    kind: parser.read_be()?,
                    reference: parser.read_be()?,
                },
                TAG_METHOD_TYPE => PoolEntry::MethodType(parser.read_be()?),
                TAG_DYNAMIC => PoolEntry::Dynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                TAG_INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
                    bootstrap: parser.read_be()?,
                    name_and_type: parser.read_be()?,
                },
                TAG_MODULE => PoolEntry::Module(parser.read_be()?),
                TAG_PACKAGE => PoolEntry::Package(parser.read_be()?),
                _ => {
                    return Err(malformed_error!(
                        "Unknown constant pool tag {} at offset {}",
                        tag,
                        offset
                    ))
                }
            };
            let wide = entry.slots() == 2;
            entries.push(entry);
            if wide {
                entries.push(PoolEntry::Unusable);
            }
        }

        // A trailing Long/Double may claim one slot past the declared count.
        entries.truncate(usize::from(count));
        Ok(ConstantPool { entries })
    }

    /// Number of slots, including the unusable slot 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no usable entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `index` is 0, out of range or the second half
    /// of a wide entry.
    pub fn get(&self, index: u16) -> Result<&PoolEntry> {
        match self.entries.get(usize::from(index)) {
            Some(PoolEntry::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {}",
                index
            )),
            Some(entry) => Ok(entry),
        }
    }

    /// Resolves a `CONSTANT_Utf8` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry has another type.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            PoolEntry::Utf8(value) => Ok(value),
            other => Err(malformed_error!(
                "Expected Utf8 at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `CONSTANT_Class` entry to its internal name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry has another type.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            PoolEntry::Class(name) => self.utf8(*name),
            other => Err(malformed_error!(
                "Expected Class at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `CONSTANT_NameAndType` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry has another type.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            PoolEntry::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            other => Err(malformed_error!(
                "Expected NameAndType at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a field or method reference.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (class, name_and_type, interface) = match self.get(index)? {
            PoolEntry::FieldRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            PoolEntry::MethodRef {
                class,
                name_and_type,
                interface,
            } => (*class, *name_and_type, *interface),
            other => {
                return Err(malformed_error!(
                    "Expected member reference at constant pool index {}, found {:?}",
                    index,
                    other
                ))
            }
        };
        let (name, desc) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            owner: self.class_name(class)?,
            name,
            desc,
            interface,
        })
    }

    /// Resolves a `CONSTANT_MethodHandle` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a method handle or its kind
    /// is outside 1..=9.
    pub fn handle(&self, index: u16) -> Result<Handle> {
        match self.get(index)? {
            PoolEntry::MethodHandle { kind, reference } => {
                if !(1..=9).contains(kind) {
                    return Err(malformed_error!("Invalid method handle kind {}", kind));
                }
                let member = self.member_ref(*reference)?;
                Ok(Handle {
                    kind: *kind,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                    interface: member.interface,
                })
            }
            other => Err(malformed_error!(
                "Expected MethodHandle at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a loadable constant (`LDC` operand, `ConstantValue`, bootstrap argument).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] for dynamically-computed constants and
    /// [`crate::Error::Malformed`] for entries that cannot be loaded.
    pub fn constant(&self, index: u16) -> Result<Constant> {
        Ok(match self.get(index)? {
            PoolEntry::Integer(value) => Constant::Int(*value),
            PoolEntry::Float(bits) => Constant::Float(f32::from_bits(*bits)),
            PoolEntry::Long(value) => Constant::Long(*value),
            PoolEntry::Double(bits) => Constant::Double(f64::from_bits(*bits)),
            PoolEntry::String(text) => Constant::String(self.utf8(*text)?.to_string()),
            PoolEntry::Class(name) => Constant::Class(self.utf8(*name)?.to_string()),
            PoolEntry::MethodType(desc) => Constant::MethodType(self.utf8(*desc)?.to_string()),
            PoolEntry::MethodHandle { .. } => Constant::MethodHandle(self.handle(index)?),
            PoolEntry::Dynamic { .. } => {
                return Err(Error::NotSupported(format!(
                    "dynamically-computed constant at index {index}"
                )))
            }
            other => {
                return Err(malformed_error!(
                    "Constant pool index {} is not loadable: {:?}",
                    index,
                    other
                ))
            }
        })
    }
}

/// Builds a constant pool, reusing indices for identical entries.
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    entries: Vec<PoolEntry>,
    index: HashMap<PoolEntry, u16>,
    next: u32,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    /// Creates an empty pool; the first entry gets index 1.
    #[must_use]
    pub fn new() -> Self {
        PoolBuilder {
            entries: Vec::new(),
            index: HashMap::new(),
            next: 1,
        }
    }

    /// Value of `constant_pool_count`: one more than the highest slot in use.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.next
    }

    /// Returns the index of `entry`, adding it if it is not present yet.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] once the pool exceeds 65535 slots.
    pub fn add(&mut self, entry: PoolEntry) -> Result<u16> {
        if let Some(&index) = self.index.get(&entry) {
            return Ok(index);
        }

        let next = self.next + u32::from(entry.slots());
        let Ok(index) = u16::try_from(self.next) else {
            return Err(Error::NotSupported("constant pool exceeds 65535 entries".into()));
        };
        if next > u32::from(u16::MAX) {
            return Err(Error::NotSupported("constant pool exceeds 65535 entries".into()));
        }

        self.next = next;
        self.index.insert(entry.clone(), index);
        self.entries.push(entry);
        Ok(index)
    }

    /// Adds a `CONSTANT_Utf8`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn utf8(&mut self, value: &str) -> Result<u16> {
        self.add(PoolEntry::Utf8(value.to_string()))
    }

    /// Adds a `CONSTANT_Class` and its name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn class(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        self.add(PoolEntry::Class(name))
    }

    /// Adds a `CONSTANT_NameAndType`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let desc = self.utf8(desc)?;
        self.add(PoolEntry::NameAndType { name, desc })
    }

    /// Adds a `CONSTANT_Fieldref`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, desc)?;
        self.add(PoolEntry::FieldRef {
            class,
            name_and_type,
        })
    }

    /// Adds a `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn method_ref(&mut self, owner: &str, name: &str, desc: &str, interface: bool) -> Result<u16> {
        let class = self.class(owner)?;
        let name_and_type = self.name_and_type(name, desc)?;
        self.add(PoolEntry::MethodRef {
            class,
            name_and_type,
            interface,
        })
    }

    /// Adds a `CONSTANT_MethodHandle` and the member it references.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn handle(&mut self, handle: &Handle) -> Result<u16> {
        let reference = if handle.is_field() {
            self.field_ref(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method_ref(&handle.owner, &handle.name, &handle.desc, handle.interface)?
        };
        self.add(PoolEntry::MethodHandle {
            kind: handle.kind,
            reference,
        })
    }

    /// Adds a `CONSTANT_InvokeDynamic` for bootstrap method `bootstrap`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, desc: &str) -> Result<u16> {
        let name_and_type = self.name_and_type(name, desc)?;
        self.add(PoolEntry::InvokeDynamic {
            bootstrap,
            name_and_type,
        })
    }

    /// Adds a loadable constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] when the pool is full.
    pub fn constant(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Int(value) => self.add(PoolEntry::Integer(*value)),
            Constant::Float(value) => self.add(PoolEntry::Float(value.to_bits())),
            Constant::Long(value) => self.add(PoolEntry::Long(*value)),
            Constant::Double(value) => self.add(PoolEntry::Double(value.to_bits())),
            Constant::String(text) => {
                let text = self.utf8(text)?;
                self.add(PoolEntry::String(text))
            }
            Constant::Class(name) => self.class(name),
            Constant::MethodType(desc) => {
                let desc = self.utf8(desc)?;
                self.add(PoolEntry::MethodType(desc))
            }
            Constant::MethodHandle(handle) => self.handle(handle),
        }
    }

    /// Writes `constant_pool_count` and the entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] if a string is too long to encode.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let Ok(count) = u16::try_from(self.next) else {
            return Err(Error::NotSupported("constant pool exceeds 65535 entries".into()));
        };
        write_be(out, count);
        for entry in &self.entries {
            entry.write(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_deduplicates() {
        let mut pool = PoolBuilder::new();
        let a = pool.field_ref("a", "b", "I").unwrap();
        let b = pool.field_ref("a", "b", "I").unwrap();
        assert_eq!(a, b);
        let class = pool.class("a").unwrap();
        assert_eq!(pool.class("a").unwrap(), class);
        // Utf8 "a", Class, Utf8 "b", Utf8 "I", NameAndType, Fieldref
        assert_eq!(pool.count(), 7);
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = PoolBuilder::new();
        let long = pool.constant(&Constant::Long(7)).unwrap();
        let next = pool.utf8("x").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
    }

    #[test]
    fn test_write_then_parse() {
        let mut pool = PoolBuilder::new();
        let double = pool.constant(&Constant::Double(-0.0)).unwrap();
        let method = pool
            .method_ref("java/util/List", "size", "()I", true)
            .unwrap();
        let string = pool.constant(&Constant::String("h\0i".into())).unwrap();

        let mut out = Vec::new();
        pool.write(&mut out).unwrap();
        let parsed = ConstantPool::parse(&mut Parser::new(&out)).unwrap();

        match parsed.constant(double).unwrap() {
            Constant::Double(value) => assert!(value == 0.0 && value.is_sign_negative()),
            other => panic!("unexpected {other:?}"),
        }
        let member = parsed.member_ref(method).unwrap();
        assert_eq!(member.owner, "java/util/List");
        assert_eq!(member.name, "size");
        assert!(member.interface);
        assert_eq!(
            parsed.constant(string).unwrap(),
            Constant::String("h\0i".into())
        );
        assert!(parsed.get(double + 1).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let data = [0x00, 0x02, 0x63];
        let result = ConstantPool::parse(&mut Parser::new(&data));
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
