//! Whole-group unused field removal.

use std::collections::HashSet;

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

/// Deletes `final` fields that no field instruction in the group refers to.
///
/// Must run after every pass that can remove the last access to a field.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedFieldRemover;

impl UnusedFieldRemover {
    /// Every `owner.name` a field instruction in the group can resolve to.
    ///
    /// A reference through a subclass (`getfield b.f` with `f` declared by `b`'s
    /// superclass `a`) marks `a.f` as well, as does a static reference to a constant
    /// inherited from an interface.
    #[must_use]
    pub fn referenced_fields(group: &ClassGroup) -> HashSet<String> {
        let references: HashSet<(&str, &str, &str, bool)> = group
            .iter()
            .flat_map(|(_, class)| class.methods.iter())
            .filter_map(|method| method.code.as_ref())
            .flat_map(|code| code.insns.iter())
            .filter_map(|(_, insn)| match insn {
                Insn::Field {
                    opcode,
                    owner,
                    name,
                    desc,
                } => Some((
                    owner.as_str(),
                    name.as_str(),
                    desc.as_str(),
                    matches!(*opcode, GETSTATIC | PUTSTATIC),
                )),
                _ => None,
            })
            .collect();

        let mut used = HashSet::with_capacity(references.len());
        for (owner, name, desc, is_static) in references {
            used.insert(format!("{owner}.{name}"));
            if let Some(declaring) = group.resolve_field_owner(owner, name, desc, is_static) {
                used.insert(format!("{declaring}.{name}"));
            }
            if is_static {
                let interfaces = group
                    .id_of(owner)
                    .map(|id| group.ancestors(id))
                    .unwrap_or_default();
                for class in interfaces.into_iter().filter_map(|id| group.get(id)) {
                    if class.is_interface() && class.declares_field(name, desc, true) {
                        used.insert(format!("{}.{name}", class.name));
                    }
                }
            }
        }
        used
    }
}

impl Transformer for UnusedFieldRemover {
    fn name(&self) -> &'static str {
        "UnusedFieldRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::UnusedFields
    }

    fn priority(&self) -> u32 {
        18
    }

    fn description(&self) -> &'static str {
        "Removes final fields nothing reads or writes"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let used = Self::referenced_fields(group);
        let mut counter = 0;
        for class in group.iter_mut() {
            let owner = class.name.clone();
            let mut removed = Vec::new();
            class.fields.retain(|field| {
                let unused = field.is_final() && !used.contains(&format!("{owner}.{}", field.name));
                if unused {
                    removed.push(format!("{} {}", field.name, field.desc));
                }
                !unused
            });
            for field in removed {
                ctx.record(self, EventKind::FieldRemoved)
                    .class(owner.as_str())
                    .message(field);
                counter += 1;
            }
        }
        log::info!("Removed {} unused fields.", counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{
            ClassAccessFlags, ClassEntry, FieldAccessFlags, FieldEntry, MethodAccessFlags,
            MethodEntry,
        },
    };

    #[test]
    fn test_only_unreferenced_finals_removed() {
        let mut a = ClassEntry::new("a");
        a.fields
            .push(FieldEntry::new("used", "I", FieldAccessFlags::FINAL));
        a.fields
            .push(FieldEntry::new("dead", "I", FieldAccessFlags::FINAL));
        a.fields
            .push(FieldEntry::new("mutable", "I", FieldAccessFlags::PRIVATE));
        let mut b = ClassEntry::new("b");
        let code = InsnBuilder::new()
            .getstatic("a", "used", "I")
            .ireturn()
            .build()
            .unwrap();
        b.methods
            .push(MethodEntry::new("m", "()I", MethodAccessFlags::STATIC).with_code(code));
        let mut group = ClassGroup::from_classes([a, b]).unwrap();

        let config = EngineConfig::default();
        let events = EventLog::new();
        UnusedFieldRemover.transform(&mut group, &PassContext::new(&config, &events));

        let names: Vec<&str> = group
            .class("a")
            .unwrap()
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["used", "mutable"]);
        assert_eq!(events.count_kind(EventKind::FieldRemoved), 1);
    }

    #[test]
    fn test_inherited_references_resolve_to_declaring_class() {
        let mut constants = ClassEntry::new("i");
        constants.access |= ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        constants.fields.push(FieldEntry::new(
            "k",
            "I",
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
        ));
        let mut a = ClassEntry::new("a");
        a.fields
            .push(FieldEntry::new("f", "I", FieldAccessFlags::FINAL));
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        b.interfaces.push("i".to_string());
        let code = InsnBuilder::new()
            .aload(0)
            .getfield("b", "f", "I")
            .getstatic("b", "k", "I")
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        b.methods
            .push(MethodEntry::new("m", "()I", MethodAccessFlags::PUBLIC).with_code(code));
        let group = ClassGroup::from_classes([constants, a, b]).unwrap();

        let used = UnusedFieldRemover::referenced_fields(&group);
        assert!(used.contains("b.f"));
        assert!(used.contains("a.f"));
        assert!(used.contains("i.k"));
    }
}
