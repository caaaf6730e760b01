//! Field reference owner resolution.

use std::collections::HashMap;

use crate::{
    assembly::{
        opcodes::{GETSTATIC, PUTSTATIC},
        Insn,
    },
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{PassContext, Transformer},
    },
    model::ClassGroup,
};

type FieldKey = (String, String, String, bool);

/// Points every field instruction at the class that actually declares the field.
///
/// Compilers emit the static type of the receiver as the owner, so `b.f` may really be the
/// inherited `a.f`. Resolution walks the superclass chain inside the group and requires
/// the declaration's static-ness to match the instruction.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldOwnerResolver;

impl FieldOwnerResolver {
    /// Resolved owners of every field reference whose owner is not the declaring class.
    fn resolutions(group: &ClassGroup) -> HashMap<FieldKey, String> {
        let mut resolved = HashMap::new();
        for (_, class) in group.iter() {
            for code in class.methods.iter().filter_map(|m| m.code.as_ref()) {
                for (_, insn) in code.insns.iter() {
                    let Insn::Field {
                        opcode,
                        owner,
                        name,
                        desc,
                    } = insn
                    else {
                        continue;
                    };
                    let is_static = matches!(*opcode, GETSTATIC | PUTSTATIC);
                    let key = (owner.clone(), name.clone(), desc.clone(), is_static);
                    if resolved.contains_key(&key) {
                        continue;
                    }
                    if let Some(actual) = group.resolve_field_owner(owner, name, desc, is_static) {
                        if actual != *owner {
                            resolved.insert(key, actual);
                        }
                    }
                }
            }
        }
        resolved
    }
}

impl Transformer for FieldOwnerResolver {
    fn name(&self) -> &'static str {
        "FieldOwnerResolver"
    }

    fn kind(&self) -> PassKind {
        PassKind::FieldOwners
    }

    fn priority(&self) -> u32 {
        16
    }

    fn description(&self) -> &'static str {
        "Rewrites field references to their declaring class"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let resolved = Self::resolutions(group);
        if resolved.is_empty() {
            log::info!("Resolved 0 field owners.");
            return;
        }

        for class in group.iter_mut() {
            let class_name = class.name.clone();
            for method in &mut class.methods {
                let Some(code) = method.code.as_mut() else {
                    continue;
                };
                let mut rewritten = Vec::new();
                code.insns.rewrite(|insn| {
                    if let Insn::Field {
                        opcode,
                        owner,
                        name,
                        desc,
                    } = insn
                    {
                        let is_static = matches!(*opcode, GETSTATIC | PUTSTATIC);
                        let key = (owner.clone(), name.clone(), desc.clone(), is_static);
                        if let Some(actual) = resolved.get(&key) {
                            rewritten.push(format!("{owner}.{name} -> {actual}.{name}"));
                            owner.clone_from(actual);
                        }
                    }
                });
                for message in rewritten {
                    ctx.record_in(self, EventKind::FieldOwnerResolved, &class_name, method)
                        .message(message);
                }
            }
        }

        log::info!(
            "Resolved {} field owners.",
            ctx.events.filter_pass(self.name()).count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{ClassEntry, FieldAccessFlags, FieldEntry, MethodAccessFlags, MethodEntry},
    };

    #[test]
    fn test_inherited_field_owner_rewritten() {
        let mut a = ClassEntry::new("a");
        a.fields.push(FieldEntry::new("f", "I", FieldAccessFlags::empty()));
        a.fields.push(FieldEntry::new("s", "I", FieldAccessFlags::STATIC));
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        let code = InsnBuilder::new()
            .aload(0)
            .getfield("b", "f", "I")
            .getstatic("b", "s", "I")
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        b.methods
            .push(MethodEntry::new("m", "()I", MethodAccessFlags::empty()).with_code(code));
        let mut group = ClassGroup::from_classes([a, b]).unwrap();

        let config = EngineConfig::default();
        let events = EventLog::new();
        FieldOwnerResolver.transform(&mut group, &PassContext::new(&config, &events));

        let owners: Vec<String> = group.class("b").unwrap().methods[0]
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter_map(|(_, insn)| match insn {
                Insn::Field { owner, .. } => Some(owner.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec!["a", "a"]);
        assert_eq!(events.count_kind(EventKind::FieldOwnerResolved), 2);
    }
}
