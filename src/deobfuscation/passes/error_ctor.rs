//! Removal of synthetic throwing constructors.

use crate::{
    assembly::opcodes::{ALOAD, ATHROW, DUP, INVOKESPECIAL, NEW},
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{PassContext, Transformer},
    },
    model::{ClassEntry, ClassGroup, MethodEntry},
};

/// Real-opcode body of an error constructor.
const ERROR_CONSTRUCTOR_BODY: [u8; 6] = [ALOAD, INVOKESPECIAL, NEW, DUP, INVOKESPECIAL, ATHROW];

/// Deletes `<init>()V` constructors that only call `super()` and throw.
///
/// The obfuscator adds them to every class to centralize decoy exception construction.
/// Once the decoy paths are gone nothing calls them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorConstructorRemover;

impl ErrorConstructorRemover {
    /// Returns `true` if `method` has exactly the error-constructor shape.
    #[must_use]
    pub fn is_error_constructor(method: &MethodEntry, throwable: &str) -> bool {
        if method.name != "<init>" || !method.desc.starts_with("()") {
            return false;
        }
        if method.exceptions.len() != 1 || method.exceptions[0] != throwable {
            return false;
        }
        let Some(code) = method.code.as_ref() else {
            return false;
        };
        code.insns
            .iter()
            .filter_map(|(_, insn)| insn.opcode())
            .eq(ERROR_CONSTRUCTOR_BODY)
    }

    fn strip(class: &mut ClassEntry, throwable: &str) -> Vec<String> {
        let mut removed = Vec::new();
        class.methods.retain(|method| {
            let matched = Self::is_error_constructor(method, throwable);
            if matched {
                removed.push(format!("{}{}", method.name, method.desc));
            }
            !matched
        });
        removed
    }
}

impl Transformer for ErrorConstructorRemover {
    fn name(&self) -> &'static str {
        "ErrorConstructorRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::ErrorConstructors
    }

    fn priority(&self) -> u32 {
        6
    }

    fn description(&self) -> &'static str {
        "Removes constructors that exist only to throw"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let throwable = ctx.config.error_constructor_throwable.as_str();
        let mut counter = 0;
        for class in group.iter_mut() {
            for method in Self::strip(class, throwable) {
                ctx.record(self, EventKind::MethodRemoved)
                    .class(class.name.as_str())
                    .method(method)
                    .message("error constructor");
                counter += 1;
            }
        }
        log::info!("Removed {} method error constructors.", counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::MethodAccessFlags,
    };

    fn constructor(desc: &str, exceptions: &[&str]) -> MethodEntry {
        let code = InsnBuilder::new()
            .line(3)
            .aload(0)
            .invokespecial("java/lang/Object", "<init>", "()V")
            .new_("java/lang/Throwable")
            .dup()
            .invokespecial("java/lang/Throwable", "<init>", "()V")
            .athrow()
            .build()
            .unwrap();
        let mut method = MethodEntry::new("<init>", desc, MethodAccessFlags::empty()).with_code(code);
        method.exceptions = exceptions.iter().map(|e| e.to_string()).collect();
        method
    }

    #[test]
    fn test_shape_detection() {
        let throwable = "java/lang/Throwable";
        assert!(ErrorConstructorRemover::is_error_constructor(
            &constructor("()V", &[throwable]),
            throwable
        ));
        assert!(!ErrorConstructorRemover::is_error_constructor(
            &constructor("(I)V", &[throwable]),
            throwable
        ));
        assert!(!ErrorConstructorRemover::is_error_constructor(
            &constructor("()V", &[]),
            throwable
        ));

        let mut longer = constructor("()V", &[throwable]);
        let code = longer.code.as_mut().unwrap();
        let first = code.insns.first().unwrap();
        code.insert_after(first, [crate::assembly::Insn::op(crate::assembly::opcodes::NOP)]);
        assert!(!ErrorConstructorRemover::is_error_constructor(&longer, throwable));
    }

    #[test]
    fn test_transform_removes_matches() {
        let mut class = ClassEntry::new("a");
        class.methods.push(constructor("()V", &["java/lang/Throwable"]));
        class.methods.push(constructor("(I)V", &["java/lang/Throwable"]));
        let mut group = ClassGroup::from_classes([class]).unwrap();

        let config = EngineConfig::default();
        let events = EventLog::new();
        ErrorConstructorRemover.transform(&mut group, &PassContext::new(&config, &events));

        let class = group.class("a").unwrap();
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].desc, "(I)V");
        assert_eq!(events.count_kind(EventKind::MethodRemoved), 1);
    }
}
