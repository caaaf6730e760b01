//! Member ordering.

use std::cmp::Ordering;

use crate::{
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{PassContext, Transformer},
    },
    model::{ClassEntry, ClassGroup, FieldEntry},
};

/// Restores a source-like member order.
///
/// Methods are ordered by their first line number, methods without one last. Fields are
/// ordered statics first, then by modifier text, descriptor and name. Both sorts are stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemberSorter;

fn compare_fields(a: &FieldEntry, b: &FieldEntry) -> Ordering {
    b.is_static()
        .cmp(&a.is_static())
        .then_with(|| a.access.modifiers().cmp(&b.access.modifiers()))
        .then_with(|| a.desc.cmp(&b.desc))
        .then_with(|| a.name.cmp(&b.name))
}

impl MemberSorter {
    /// Sorts the members of one class. Returns `true` if any order changed.
    pub fn sort(class: &mut ClassEntry) -> bool {
        let methods: Vec<String> = class
            .methods
            .iter()
            .map(|m| format!("{}{}", m.name, m.desc))
            .collect();
        let fields: Vec<String> = class.fields.iter().map(|f| f.name.clone()).collect();

        class
            .methods
            .sort_by_key(|m| m.first_line().map_or(u32::MAX, u32::from));
        class.fields.sort_by(compare_fields);

        let methods_moved = class
            .methods
            .iter()
            .map(|m| format!("{}{}", m.name, m.desc))
            .ne(methods);
        let fields_moved = class.fields.iter().map(|f| &f.name).ne(fields.iter());
        methods_moved || fields_moved
    }
}

impl Transformer for MemberSorter {
    fn name(&self) -> &'static str {
        "MemberSorter"
    }

    fn kind(&self) -> PassKind {
        PassKind::SortMembers
    }

    fn priority(&self) -> u32 {
        20
    }

    fn description(&self) -> &'static str {
        "Sorts methods by line number and fields by kind"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        for class in group.iter_mut() {
            if Self::sort(class) {
                ctx.record(self, EventKind::MembersSorted)
                    .class(class.name.as_str());
            }
        }
        log::info!(
            "Sorted members of {} classes.",
            ctx.events.filter_pass(self.name()).count()
        );
    }
}
