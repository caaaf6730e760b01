//! Field and method descriptor parsing.
//!
//! Descriptors are kept as strings in the model. This module splits them into their
//! components, computes slot sizes, and rewrites the class names they mention.

use crate::Result;

/// The verifier's coarse view of a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    /// `V`
    Void,
    /// `Z`, `B`, `C`, `S`, `I`
    Int,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// Objects and arrays
    Reference,
}

impl BasicType {
    /// Classifies a field descriptor (or `V`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an empty or unknown descriptor.
    pub fn of(desc: &str) -> Result<BasicType> {
        match desc.as_bytes().first() {
            Some(b'V') => Ok(BasicType::Void),
            Some(b'Z' | b'B' | b'C' | b'S' | b'I') => Ok(BasicType::Int),
            Some(b'F') => Ok(BasicType::Float),
            Some(b'J') => Ok(BasicType::Long),
            Some(b'D') => Ok(BasicType::Double),
            Some(b'L' | b'[') => Ok(BasicType::Reference),
            _ => Err(malformed_error!("Invalid type descriptor '{}'", desc)),
        }
    }

    /// Number of local/stack slots a value of this type occupies.
    #[must_use]
    pub fn size(self) -> u16 {
        match self {
            BasicType::Void => 0,
            BasicType::Long | BasicType::Double => 2,
            _ => 1,
        }
    }
}

/// Returns the length of the field descriptor at the start of `desc`.
fn field_type_len(desc: &str) -> Result<usize> {
    let bytes = desc.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i) {
        Some(b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' | b'J' | b'D') => Ok(i + 1),
        Some(b'L') => match desc[i..].find(';') {
            Some(end) if end > 1 => Ok(i + end + 1),
            _ => Err(malformed_error!("Unterminated class type in '{}'", desc)),
        },
        _ => Err(malformed_error!("Invalid field descriptor '{}'", desc)),
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter field descriptors, in order.
    pub args: Vec<String>,
    /// Return descriptor (`V` for void).
    pub ret: String,
}

impl MethodDescriptor {
    /// Parses `(args)ret`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is not well formed.
    pub fn parse(desc: &str) -> Result<MethodDescriptor> {
        let Some(rest) = desc.strip_prefix('(') else {
            return Err(malformed_error!("Method descriptor '{}' must start with '('", desc));
        };

        let mut args = Vec::new();
        let mut pos = 0;
        loop {
            match rest.as_bytes().get(pos) {
                Some(b')') => break,
                Some(_) => {
                    let len = field_type_len(&rest[pos..])?;
                    args.push(rest[pos..pos + len].to_string());
                    pos += len;
                }
                None => return Err(malformed_error!("Unterminated method descriptor '{}'", desc)),
            }
        }

        let ret = &rest[pos + 1..];
        if ret != "V" && field_type_len(ret)? != ret.len() {
            return Err(malformed_error!("Invalid return type in '{}'", desc));
        }

        Ok(MethodDescriptor {
            args,
            ret: ret.to_string(),
        })
    }

    /// Total slot size of the parameters, excluding any receiver.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if an argument descriptor is invalid.
    pub fn args_size(&self) -> Result<u16> {
        self.args
            .iter()
            .try_fold(0u16, |acc, arg| Ok(acc + BasicType::of(arg)?.size()))
    }

    /// Basic type of the return value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the return descriptor is invalid.
    pub fn return_type(&self) -> Result<BasicType> {
        BasicType::of(&self.ret)
    }
}

/// Java source name of a field descriptor: `I` → `int`, `[Ljava/lang/String;` → `java.lang.String[]`.
#[must_use]
pub fn class_name(desc: &str) -> String {
    let dims = desc.bytes().take_while(|&b| b == b'[').count();
    let element = &desc[dims..];
    let base = match element {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "F" => "float".to_string(),
        "J" => "long".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        _ => element
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(element)
            .replace('/', "."),
    };
    base + &"[]".repeat(dims)
}

/// Rewrites every class name mentioned in a field or method descriptor.
///
/// `map` receives internal names and returns a replacement, or `None` to keep the name.
#[must_use]
pub fn map_descriptor(desc: &str, map: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..=start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(';') else {
            out.push_str(after);
            return out;
        };
        let name = &after[..end];
        match map(name) {
            Some(new) => out.push_str(&new),
            None => out.push_str(name),
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

/// Rewrites an internal name or array descriptor as used by type instructions and class
/// constants.
#[must_use]
pub fn map_type_name(name: &str, map: &impl Fn(&str) -> Option<String>) -> String {
    if name.starts_with('[') {
        map_descriptor(name, map)
    } else {
        map(name).unwrap_or_else(|| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;D)Ljava/lang/Object;").unwrap();
        assert_eq!(desc.args, vec!["I", "J", "[Ljava/lang/String;", "D"]);
        assert_eq!(desc.ret, "Ljava/lang/Object;");
        assert_eq!(desc.args_size().unwrap(), 6);
        assert_eq!(desc.return_type().unwrap(), BasicType::Reference);

        let empty = MethodDescriptor::parse("()V").unwrap();
        assert!(empty.args.is_empty());
        assert_eq!(empty.return_type().unwrap(), BasicType::Void);
    }

    #[test]
    fn test_parse_invalid_descriptor() {
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(Q)V").is_err());
        assert!(MethodDescriptor::parse("()II").is_err());
    }

    #[test]
    fn test_class_name() {
        assert_eq!(class_name("I"), "int");
        assert_eq!(class_name("[[J"), "long[][]");
        assert_eq!(class_name("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(class_name("[Lab;"), "ab[]");
    }

    #[test]
    fn test_map_descriptor() {
        let map = |name: &str| (name == "aa").then(|| "class1".to_string());
        assert_eq!(
            map_descriptor("(Laa;[Laa;Lbb;I)Laa;", &map),
            "(Lclass1;[Lclass1;Lbb;I)Lclass1;"
        );
        assert_eq!(map_descriptor("J", &map), "J");
        assert_eq!(map_type_name("aa", &map), "class1");
        assert_eq!(map_type_name("[Laa;", &map), "[Lclass1;");
    }
}
