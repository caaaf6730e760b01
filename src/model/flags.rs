//! Access flags for classes, methods and fields.
//!
//! The same bit may mean different things depending on where it appears (`0x0020` is
//! `ACC_SUPER` on a class and `ACC_SYNCHRONIZED` on a method), so each kind of member gets
//! its own flag type.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Class access and property flags
    pub struct ClassAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final; no subclasses allowed
        const FINAL = 0x0010;
        /// Treat superclass methods specially for `invokespecial`
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class
        const ENUM = 0x4000;
        /// Is a module, not a class or interface
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method access and property flags
    pub struct MethodAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final; must not be overridden
        const FINAL = 0x0010;
        /// Declared synchronized
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Declared with a variable number of arguments
        const VARARGS = 0x0080;
        /// Implemented in a language other than Java
        const NATIVE = 0x0100;
        /// Declared abstract; no implementation
        const ABSTRACT = 0x0400;
        /// Floating-point mode is FP-strict
        const STRICT = 0x0800;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field access and property flags
    pub struct FieldAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final; never assigned after construction
        const FINAL = 0x0010;
        /// Declared volatile; cannot be cached
        const VOLATILE = 0x0040;
        /// Declared transient; not serialized
        const TRANSIENT = 0x0080;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Declared as an element of an enum
        const ENUM = 0x4000;
    }
}

impl FieldAccessFlags {
    /// Java source modifiers in canonical order, e.g. `"private static final"`.
    #[must_use]
    pub fn modifiers(self) -> String {
        let mut parts = Vec::new();
        for (flag, text) in [
            (Self::PUBLIC, "public"),
            (Self::PROTECTED, "protected"),
            (Self::PRIVATE, "private"),
            (Self::STATIC, "static"),
            (Self::FINAL, "final"),
            (Self::TRANSIENT, "transient"),
            (Self::VOLATILE, "volatile"),
        ] {
            if self.contains(flag) {
                parts.push(text);
            }
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_raw() {
        let method = MethodAccessFlags::from_bits_truncate(0x0109);
        assert!(method.contains(MethodAccessFlags::PUBLIC));
        assert!(method.contains(MethodAccessFlags::STATIC));
        assert!(method.contains(MethodAccessFlags::NATIVE));

        let class = ClassAccessFlags::from_bits_retain(0x0621);
        assert!(class.contains(ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT));
        assert_eq!(class.bits(), 0x0621);
    }

    #[test]
    fn test_field_modifiers() {
        let flags = FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        assert_eq!(flags.modifiers(), "private static final");
        assert_eq!(FieldAccessFlags::empty().modifiers(), "");
    }
}
