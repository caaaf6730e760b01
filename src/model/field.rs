use crate::{
    assembly::Constant,
    model::{descriptor::BasicType, flags::FieldAccessFlags, group::MatchRef},
};

/// A field declared by a class.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    /// Simple name.
    pub name: String,
    /// Field descriptor.
    pub desc: String,
    /// Access flags.
    pub access: FieldAccessFlags,
    /// Generic signature, if present.
    pub signature: Option<String>,
    /// `ConstantValue` attribute of static constants.
    pub constant_value: Option<Constant>,
    /// Counterpart in another group, set by the mapper.
    pub matched: Option<MatchRef>,
}

impl FieldEntry {
    /// Creates a field.
    #[must_use]
    pub fn new(name: impl Into<String>, desc: impl Into<String>, access: FieldAccessFlags) -> Self {
        FieldEntry {
            name: name.into(),
            desc: desc.into(),
            access,
            signature: None,
            constant_value: None,
            matched: None,
        }
    }

    /// Declared static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(FieldAccessFlags::STATIC)
    }

    /// Declared final.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.access.contains(FieldAccessFlags::FINAL)
    }

    /// Basic type of the stored value; `None` for a malformed descriptor.
    #[must_use]
    pub fn basic_type(&self) -> Option<BasicType> {
        BasicType::of(&self.desc).ok()
    }
}
