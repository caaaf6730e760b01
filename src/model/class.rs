use crate::model::{
    field::FieldEntry, flags::ClassAccessFlags, group::MatchRef, method::MethodEntry,
};

/// A class or interface and its members.
///
/// Hierarchy links are stored by name; resolve them through
/// [`crate::model::ClassGroup::super_of`] and [`crate::model::ClassGroup::interfaces_of`].
/// Names of classes outside the group (platform classes) simply do not resolve.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    /// Internal name, e.g. `java/lang/String`.
    pub name: String,
    /// Access flags.
    pub access: ClassAccessFlags,
    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    /// Internal names of the directly implemented interfaces.
    pub interfaces: Vec<String>,
    /// Declared methods, in declaration order.
    pub methods: Vec<MethodEntry>,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldEntry>,
    /// Class file version as `(major, minor)`.
    pub version: (u16, u16),
    /// `SourceFile` attribute.
    pub source_file: Option<String>,
    /// Generic signature, if present.
    pub signature: Option<String>,
    /// Counterpart in another group, set by the mapper.
    pub matched: Option<MatchRef>,
}

impl ClassEntry {
    /// Creates an empty public class extending `java/lang/Object`, targeting Java 6.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ClassEntry {
            name: name.into(),
            access: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            version: (50, 0),
            source_file: None,
            signature: None,
            matched: None,
        }
    }

    /// Declared as an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccessFlags::INTERFACE)
    }

    /// Simple name: the part after the last `/`.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Looks up a declared method.
    #[must_use]
    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodEntry> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    /// Looks up a declared method mutably.
    pub fn method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodEntry> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str, desc: &str) -> Option<&FieldEntry> {
        self.fields.iter().find(|f| f.name == name && f.desc == desc)
    }

    /// Returns `true` if a field with this name, descriptor and static-ness is declared.
    #[must_use]
    pub fn declares_field(&self, name: &str, desc: &str, is_static: bool) -> bool {
        self.fields
            .iter()
            .any(|f| f.name == name && f.desc == desc && f.is_static() == is_static)
    }

    /// Iterator over the internal names of the superclass and interfaces.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }
}
