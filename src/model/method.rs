use crate::{
    assembly::{Code, Insn},
    model::{
        descriptor::MethodDescriptor, flags::MethodAccessFlags, group::MatchRef,
    },
    Result,
};

/// A method declared by a class.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Simple name (`<init>` and `<clinit>` included).
    pub name: String,
    /// Method descriptor.
    pub desc: String,
    /// Access flags.
    pub access: MethodAccessFlags,
    /// Generic signature, if present.
    pub signature: Option<String>,
    /// Declared checked exceptions, as internal names.
    pub exceptions: Vec<String>,
    /// Body; `None` for abstract and native methods.
    pub code: Option<Code>,
    /// Counterpart in another group, set by the mapper.
    pub matched: Option<MatchRef>,
}

impl MethodEntry {
    /// Creates a method without a body.
    #[must_use]
    pub fn new(name: impl Into<String>, desc: impl Into<String>, access: MethodAccessFlags) -> Self {
        MethodEntry {
            name: name.into(),
            desc: desc.into(),
            access,
            signature: None,
            exceptions: Vec::new(),
            code: None,
            matched: None,
        }
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    /// Declared static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccessFlags::STATIC)
    }

    /// Declared native.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access.contains(MethodAccessFlags::NATIVE)
    }

    /// Declared abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccessFlags::ABSTRACT)
    }

    /// Declared private.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.access.contains(MethodAccessFlags::PRIVATE)
    }

    /// Instance or static initializer.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    /// Parses the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn descriptor(&self) -> Result<MethodDescriptor> {
        MethodDescriptor::parse(&self.desc)
    }

    /// Local slots taken by the parameters, including the receiver of instance methods.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn arguments_size(&self) -> Result<u16> {
        let receiver = u16::from(!self.is_static());
        Ok(self.descriptor()?.args_size()? + receiver)
    }

    /// Local slot holding the last declared parameter, assuming it is one slot wide.
    ///
    /// `None` when the method declares no parameters.
    #[must_use]
    pub fn last_param_index(&self) -> Option<u16> {
        let desc = self.descriptor().ok()?;
        if desc.args.is_empty() {
            return None;
        }
        self.arguments_size().ok()?.checked_sub(1)
    }

    /// First source line recorded in the body.
    #[must_use]
    pub fn first_line(&self) -> Option<u16> {
        self.code.as_ref()?.insns.iter().find_map(|(_, insn)| match insn {
            Insn::Line(line) => Some(*line),
            _ => None,
        })
    }

    /// Renders `owner.name desc` for diagnostics.
    #[must_use]
    pub fn display_name(&self, owner: &str) -> String {
        format!("{}.{}{}", owner, self.name, self.desc)
    }
}
