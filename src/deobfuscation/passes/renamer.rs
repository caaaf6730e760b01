//! Hierarchy-aware placeholder renaming.
//!
//! Renaming happens in two phases. Discovery reads the whole group and produces
//! [`Mappings`]:
//!
//! - Classes with a short simple name become `class{n}`, keeping their package.
//! - A short-named method is named `method{n}` at the class that introduces it, meaning no
//!   ancestor in the group declares the same name and descriptor. The name is then handed
//!   down to every subclass declaring the same signature, so overrides stay overrides.
//!   Introductions of one signature that share a subtype, such as a superclass and an
//!   interface both implemented by one class, get a single name.
//! - Every short-named field declaration becomes `field{n}`.
//!
//! Native methods and initializers keep their names. References are resolved the way the
//! JVM resolves them, from the referenced owner up through its ancestors, before any entry
//! changes. The second phase then rewrites every class independently.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use rayon::prelude::*;

use crate::{
    assembly::{
        opcodes::{GETSTATIC, PUTSTATIC},
        Constant, Handle, Insn,
    },
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{PassContext, Transformer},
    },
    model::{
        descriptor::{map_descriptor, map_type_name},
        ClassEntry, ClassGroup, ClassId, MethodEntry,
    },
    utils::graph::{algorithms::dfs, IndexedGraph, NodeId, Reversed},
    Result,
};

fn member_key(owner: &str, name: &str, desc: &str) -> String {
    format!("{owner}.{name} {desc}")
}

fn field_ref_key(owner: &str, name: &str, desc: &str, is_static: bool) -> String {
    format!("{owner}.{name} {desc} {is_static}")
}

/// The class hierarchy restricted to the group: one edge from every class to each of its
/// superclass and interfaces that are part of the group.
///
/// # Errors
///
/// Propagates [`crate::Error::GraphError`] from the graph.
pub fn hierarchy(group: &ClassGroup) -> Result<IndexedGraph<ClassId>> {
    let mut graph = IndexedGraph::new();
    for id in group.ids() {
        graph.add_node(id);
    }
    for id in group.ids() {
        for parent in group.super_of(id).into_iter().chain(group.interfaces_of(id)) {
            graph.add_edge(id, parent)?;
        }
    }
    Ok(graph)
}

/// A class declaring a method signature that none of its ancestors in the group declares.
struct Introduction<'g> {
    node: NodeId,
    name: &'g str,
    desc: &'g str,
}

/// Disjoint sets of introductions that must share one name.
struct Families {
    parent: Vec<usize>,
}

impl Families {
    fn new(len: usize) -> Self {
        Families {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        // the earlier introduction stays the root so numbering follows discovery order
        if a < b {
            self.parent[b] = a;
        } else {
            self.parent[a] = b;
        }
    }
}

/// Old-to-new names discovered over a group.
#[derive(Debug, Default, Clone)]
pub struct Mappings {
    classes: HashMap<String, String>,
    /// Declared methods, keyed by declaring class, name and descriptor.
    methods: HashMap<String, String>,
    /// Declared fields, keyed the same way.
    fields: HashMap<String, String>,
    /// Method and handle references, keyed by referenced owner.
    method_refs: HashMap<String, String>,
    /// Field references, keyed by referenced owner and static-ness.
    field_refs: HashMap<String, String>,
}

impl Mappings {
    /// Discovers the names for every class and member of `group`.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::Error::GraphError`] from building the hierarchy.
    pub fn discover(group: &ClassGroup, threshold: usize) -> Result<Self> {
        let graph = hierarchy(group)?;
        let mut mappings = Mappings::default();

        let mut taken: HashSet<String> = group.iter().map(|(_, c)| c.name.clone()).collect();
        let mut counter = 0;
        for (_, class) in group.iter() {
            if class.simple_name().len() > threshold {
                continue;
            }
            let package = class.name.rfind('/').map_or("", |i| &class.name[..=i]);
            let new = loop {
                counter += 1;
                let candidate = format!("{package}class{counter}");
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(new.clone());
            mappings.classes.insert(class.name.clone(), new);
        }

        mappings.discover_methods(group, &graph, threshold);

        let mut counter = 0;
        for (_, class) in group.iter() {
            for field in class.fields.iter().filter(|f| f.name.len() <= threshold) {
                counter += 1;
                mappings.fields.insert(
                    member_key(&class.name, &field.name, &field.desc),
                    format!("field{counter}"),
                );
            }
        }

        mappings.resolve_references(group);
        Ok(mappings)
    }

    fn discover_methods(
        &mut self,
        group: &ClassGroup,
        graph: &IndexedGraph<ClassId>,
        threshold: usize,
    ) {
        let mut introductions: Vec<Introduction<'_>> = Vec::new();
        for (id, class) in group.iter() {
            let Some(node) = graph.node(&id) else {
                continue;
            };
            for method in class.methods.iter().filter(|m| renameable(m, threshold)) {
                let inherited = dfs(graph.inner(), node)
                    .skip(1)
                    .filter_map(|ancestor| graph.key(ancestor))
                    .filter_map(|ancestor| group.get(*ancestor))
                    .any(|ancestor| ancestor.method(&method.name, &method.desc).is_some());
                if !inherited {
                    introductions.push(Introduction {
                        node,
                        name: &method.name,
                        desc: &method.desc,
                    });
                }
            }
        }

        // introductions of one signature with a common subtype name the same method
        let subclasses = Reversed(graph.inner());
        let mut families = Families::new(introductions.len());
        let mut first_seen: HashMap<(NodeId, &str, &str), usize> = HashMap::new();
        for (index, intro) in introductions.iter().enumerate() {
            for sub in dfs(&subclasses, intro.node) {
                match first_seen.entry((sub, intro.name, intro.desc)) {
                    Entry::Occupied(seen) => families.union(*seen.get(), index),
                    Entry::Vacant(slot) => {
                        slot.insert(index);
                    }
                }
            }
        }

        let mut names: HashMap<usize, String> = HashMap::new();
        let mut counter = 0;
        for (index, intro) in introductions.iter().enumerate() {
            let new = names
                .entry(families.find(index))
                .or_insert_with(|| {
                    counter += 1;
                    format!("method{counter}")
                })
                .clone();
            for sub in dfs(&subclasses, intro.node) {
                let Some(sub) = graph.key(sub).and_then(|id| group.get(*id)) else {
                    continue;
                };
                if sub.method(intro.name, intro.desc).is_some() {
                    self.methods
                        .entry(member_key(&sub.name, intro.name, intro.desc))
                        .or_insert_with(|| new.clone());
                }
            }
        }
    }

    /// Number of renamed classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of renamed method declarations.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of renamed field declarations.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// New name of class `name`.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&str> {
        self.classes.get(name).map(String::as_str)
    }

    /// New name of the method declared as `owner.name desc`.
    #[must_use]
    pub fn method(&self, owner: &str, name: &str, desc: &str) -> Option<&str> {
        self.methods
            .get(&member_key(owner, name, desc))
            .map(String::as_str)
    }

    /// New name of the field declared as `owner.name desc`.
    #[must_use]
    pub fn field(&self, owner: &str, name: &str, desc: &str) -> Option<&str> {
        self.fields
            .get(&member_key(owner, name, desc))
            .map(String::as_str)
    }

    fn resolve_method(&self, group: &ClassGroup, owner: &str, name: &str, desc: &str) -> Option<String> {
        let id = group.id_of(owner)?;
        std::iter::once(id)
            .chain(group.ancestors(id))
            .filter_map(|id| group.get(id))
            .find_map(|class| self.method(&class.name, name, desc))
            .map(str::to_string)
    }

    fn resolve_field(
        &self,
        group: &ClassGroup,
        owner: &str,
        name: &str,
        desc: &str,
        is_static: bool,
    ) -> Option<String> {
        let declaring = group.resolve_field_owner(owner, name, desc, is_static)?;
        self.field(&declaring, name, desc).map(str::to_string)
    }

    fn resolve_handle(&mut self, group: &ClassGroup, handle: &Handle) {
        if handle.is_field() {
            let is_static = matches!(handle.kind, 2 | 4);
            self.resolve_field_ref(group, &handle.owner, &handle.name, &handle.desc, is_static);
        } else {
            self.resolve_method_ref(group, &handle.owner, &handle.name, &handle.desc);
        }
    }

    fn resolve_method_ref(&mut self, group: &ClassGroup, owner: &str, name: &str, desc: &str) {
        let key = member_key(owner, name, desc);
        if self.method_refs.contains_key(&key) {
            return;
        }
        if let Some(new) = self.resolve_method(group, owner, name, desc) {
            self.method_refs.insert(key, new);
        }
    }

    fn resolve_field_ref(
        &mut self,
        group: &ClassGroup,
        owner: &str,
        name: &str,
        desc: &str,
        is_static: bool,
    ) {
        let key = field_ref_key(owner, name, desc, is_static);
        if self.field_refs.contains_key(&key) {
            return;
        }
        if let Some(new) = self.resolve_field(group, owner, name, desc, is_static) {
            self.field_refs.insert(key, new);
        }
    }

    fn resolve_constant(&mut self, group: &ClassGroup, constant: &Constant) {
        if let Constant::MethodHandle(handle) = constant {
            self.resolve_handle(group, handle);
        }
    }

    fn resolve_references(&mut self, group: &ClassGroup) {
        let bodies = group
            .iter()
            .flat_map(|(_, class)| class.methods.iter())
            .filter_map(|method| method.code.as_ref());
        for code in bodies {
            for (_, insn) in code.insns.iter() {
                match insn {
                    Insn::Field {
                        opcode,
                        owner,
                        name,
                        desc,
                    } => {
                        let is_static = matches!(*opcode, GETSTATIC | PUTSTATIC);
                        self.resolve_field_ref(group, owner, name, desc, is_static);
                    }
                    Insn::Method {
                        owner, name, desc, ..
                    } => self.resolve_method_ref(group, owner, name, desc),
                    Insn::InvokeDynamic { bsm, args, .. } => {
                        self.resolve_handle(group, bsm);
                        for arg in args {
                            self.resolve_constant(group, arg);
                        }
                    }
                    Insn::Ldc(constant) => self.resolve_constant(group, constant),
                    _ => {}
                }
            }
        }
    }

    fn type_name(&self, name: &str) -> String {
        map_type_name(name, &|n: &str| self.classes.get(n).cloned())
    }

    fn descriptor(&self, desc: &str) -> String {
        map_descriptor(desc, &|n: &str| self.classes.get(n).cloned())
    }

    fn rewrite_handle(&self, handle: &mut Handle) {
        let renamed = if handle.is_field() {
            let is_static = matches!(handle.kind, 2 | 4);
            self.field_refs.get(&field_ref_key(
                &handle.owner,
                &handle.name,
                &handle.desc,
                is_static,
            ))
        } else {
            self.method_refs
                .get(&member_key(&handle.owner, &handle.name, &handle.desc))
        };
        if let Some(new) = renamed {
            handle.name.clone_from(new);
        }
        handle.owner = self.type_name(&handle.owner);
        handle.desc = self.descriptor(&handle.desc);
    }

    fn rewrite_constant(&self, constant: &mut Constant) {
        match constant {
            Constant::Class(name) => *name = self.type_name(name),
            Constant::MethodType(desc) => *desc = self.descriptor(desc),
            Constant::MethodHandle(handle) => self.rewrite_handle(handle),
            _ => {}
        }
    }

    fn rewrite_insn(&self, insn: &mut Insn) {
        match insn {
            Insn::Type { desc, .. } => *desc = self.type_name(desc),
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => {
                let is_static = matches!(*opcode, GETSTATIC | PUTSTATIC);
                if let Some(new) = self.field_refs.get(&field_ref_key(owner, name, desc, is_static)) {
                    name.clone_from(new);
                }
                *owner = self.type_name(owner);
                *desc = self.descriptor(desc);
            }
            Insn::Method {
                owner, name, desc, ..
            } => {
                if let Some(new) = self.method_refs.get(&member_key(owner, name, desc)) {
                    name.clone_from(new);
                }
                *owner = self.type_name(owner);
                *desc = self.descriptor(desc);
            }
            Insn::InvokeDynamic {
                desc, bsm, args, ..
            } => {
                *desc = self.descriptor(desc);
                self.rewrite_handle(bsm);
                for arg in args {
                    self.rewrite_constant(arg);
                }
            }
            Insn::Ldc(constant) => self.rewrite_constant(constant),
            Insn::MultiANewArray { desc, .. } => *desc = self.descriptor(desc),
            _ => {}
        }
    }

    /// Applies the mappings to one class: its own names and every reference it holds.
    pub fn apply(&self, class: &mut ClassEntry) {
        let owner = class.name.clone();
        if let Some(new) = self.classes.get(&owner) {
            class.name.clone_from(new);
        }
        class.super_name = class.super_name.as_deref().map(|name| self.type_name(name));
        for interface in &mut class.interfaces {
            *interface = self.type_name(interface);
        }

        for method in &mut class.methods {
            if let Some(new) = self.methods.get(&member_key(&owner, &method.name, &method.desc)) {
                method.name.clone_from(new);
            }
            method.desc = self.descriptor(&method.desc);
            for exception in &mut method.exceptions {
                *exception = self.type_name(exception);
            }
            if let Some(code) = method.code.as_mut() {
                code.insns.rewrite(|insn| self.rewrite_insn(insn));
                for tcb in &mut code.try_catch_blocks {
                    if let Some(catch_type) = tcb.catch_type.as_mut() {
                        *catch_type = self.type_name(catch_type);
                    }
                }
            }
        }

        for field in &mut class.fields {
            if let Some(new) = self.fields.get(&member_key(&owner, &field.name, &field.desc)) {
                field.name.clone_from(new);
            }
            field.desc = self.descriptor(&field.desc);
        }
    }
}

fn renameable(method: &MethodEntry, threshold: usize) -> bool {
    !method.is_native() && !method.is_initializer() && method.name.len() <= threshold
}

/// Renames obfuscated classes and members to sequential placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct Renamer;

impl Transformer for Renamer {
    fn name(&self) -> &'static str {
        "Renamer"
    }

    fn kind(&self) -> PassKind {
        PassKind::Rename
    }

    fn priority(&self) -> u32 {
        30
    }

    fn description(&self) -> &'static str {
        "Renames short obfuscated names to class/method/field placeholders"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let mappings = match Mappings::discover(group, ctx.config.short_name_threshold) {
            Ok(mappings) => mappings,
            Err(error) => {
                log::warn!("Skipping renaming: {}", error);
                ctx.record(self, EventKind::Warning)
                    .message(format!("renaming skipped: {error}"));
                return;
            }
        };

        for (_, class) in group.iter() {
            if let Some(new) = mappings.class(&class.name) {
                ctx.record(self, EventKind::ClassRenamed)
                    .class(class.name.as_str())
                    .message(format!("{} -> {new}", class.name));
            }
            for method in &class.methods {
                if let Some(new) = mappings.method(&class.name, &method.name, &method.desc) {
                    ctx.record_in(self, EventKind::MethodRenamed, &class.name, method)
                        .message(format!("{} -> {new}", method.name));
                }
            }
            for field in &class.fields {
                if let Some(new) = mappings.field(&class.name, &field.name, &field.desc) {
                    ctx.record(self, EventKind::FieldRenamed)
                        .class(class.name.as_str())
                        .message(format!("{} -> {new}", field.name));
                }
            }
        }

        if ctx.config.parallel {
            group.par_iter_mut().for_each(|class| mappings.apply(class));
        } else {
            group.iter_mut().for_each(|class| mappings.apply(class));
        }
        group.rebuild_index();

        log::info!(
            "Renamed '{} classes', '{} methods', and '{} fields'.",
            mappings.class_count(),
            mappings.method_count(),
            mappings.field_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{ClassAccessFlags, FieldAccessFlags, FieldEntry, MethodAccessFlags},
    };

    fn empty(name: &str, desc: &str, access: MethodAccessFlags) -> MethodEntry {
        MethodEntry::new(name, desc, access)
            .with_code(InsnBuilder::new().return_().build().unwrap())
    }

    fn run(classes: Vec<ClassEntry>) -> (ClassGroup, EventLog) {
        let mut group = ClassGroup::from_classes(classes).unwrap();
        let config = EngineConfig::default().with_rename(true);
        let events = EventLog::new();
        Renamer.transform(&mut group, &PassContext::new(&config, &events));
        (group, events)
    }

    #[test]
    fn test_override_shares_name() {
        let mut a = ClassEntry::new("a");
        a.methods.push(empty("m", "()V", MethodAccessFlags::PUBLIC));
        a.methods.push(empty("<init>", "()V", MethodAccessFlags::PUBLIC));
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        b.methods.push(empty("m", "()V", MethodAccessFlags::PUBLIC));
        let call = InsnBuilder::new()
            .aload(0)
            .invokevirtual("b", "m", "()V")
            .return_()
            .build()
            .unwrap();
        b.methods
            .push(MethodEntry::new("go", "()V", MethodAccessFlags::PUBLIC).with_code(call));

        let (group, events) = run(vec![a, b]);
        assert!(group.class("a").is_none());
        let a = group.class("class1").unwrap();
        let b = group.class("class2").unwrap();
        assert_eq!(b.super_name.as_deref(), Some("class1"));
        assert_eq!(a.methods[0].name, "method1");
        assert_eq!(a.methods[1].name, "<init>");
        assert_eq!(b.methods[0].name, "method1");
        assert_eq!(b.methods[1].name, "method2");

        let rendered: Vec<String> = b.methods[1]
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .map(|(_, insn)| insn.to_string())
            .collect();
        assert_eq!(rendered[1], "invokevirtual class2.method1()V");
        assert_eq!(events.count_kind(EventKind::ClassRenamed), 2);
        assert_eq!(events.count_kind(EventKind::MethodRenamed), 3);
    }

    #[test]
    fn test_superclass_and_interface_share_name() {
        let mut a = ClassEntry::new("a");
        a.methods.push(empty("m", "()V", MethodAccessFlags::PUBLIC));
        let mut i = ClassEntry::new("i");
        i.access |= ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        i.methods.push(MethodEntry::new(
            "m",
            "()V",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        ));
        let mut c = ClassEntry::new("c");
        c.super_name = Some("a".to_string());
        c.interfaces.push("i".to_string());
        c.methods.push(empty("m", "()V", MethodAccessFlags::PUBLIC));
        // implements i through a inherited method only
        let mut d = ClassEntry::new("d");
        d.super_name = Some("a".to_string());
        d.interfaces.push("i".to_string());
        let mut x = ClassEntry::new("x");
        x.methods.push(empty("m", "()V", MethodAccessFlags::PUBLIC));

        let group = ClassGroup::from_classes([a, i, c, d, x]).unwrap();
        let mappings = Mappings::discover(&group, 2).unwrap();
        let shared = mappings.method("a", "m", "()V").unwrap();
        assert_eq!(mappings.method("i", "m", "()V"), Some(shared));
        assert_eq!(mappings.method("c", "m", "()V"), Some(shared));
        assert_ne!(mappings.method("x", "m", "()V"), Some(shared));
        assert_eq!(mappings.method_count(), 4);
    }

    #[test]
    fn test_excluded_methods_keep_names() {
        let mut a = ClassEntry::new("pkg/a");
        a.methods.push(empty("toString", "()Ljava/lang/String;", MethodAccessFlags::PUBLIC));
        let mut native = MethodEntry::new("n", "()V", MethodAccessFlags::NATIVE);
        native.code = None;
        a.methods.push(native);
        a.methods.push(empty("<clinit>", "()V", MethodAccessFlags::STATIC));

        let (group, _) = run(vec![a]);
        let a = group.class("pkg/class1").unwrap();
        let names: Vec<&str> = a.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["toString", "n", "<clinit>"]);
    }

    #[test]
    fn test_references_follow_renames() {
        let mut a = ClassEntry::new("a");
        a.fields.push(FieldEntry::new("f", "La;", FieldAccessFlags::STATIC));
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        let code = InsnBuilder::new()
            .label("start")
            .getstatic("b", "f", "La;")
            .pop()
            .ldc(Constant::Class("[La;".to_string()))
            .areturn()
            .label("end")
            .label("handler")
            .athrow()
            .try_catch("start", "end", "handler", Some("a"))
            .build()
            .unwrap();
        b.methods.push(
            MethodEntry::new("run", "(La;)Ljava/lang/Object;", MethodAccessFlags::STATIC)
                .with_code(code),
        );

        let (group, events) = run(vec![a, b]);
        assert_eq!(events.count_kind(EventKind::FieldRenamed), 1);
        let a = group.class("class1").unwrap();
        assert_eq!(a.fields[0].name, "field1");
        assert_eq!(a.fields[0].desc, "Lclass1;");

        let run = &group.class("class2").unwrap().methods[0];
        assert_eq!(run.desc, "(Lclass1;)Ljava/lang/Object;");
        let code = run.code.as_ref().unwrap();
        let rendered: Vec<String> = code.insns.iter().map(|(_, i)| i.to_string()).collect();
        assert!(rendered.contains(&"getstatic class2.field1 Lclass1;".to_string()));
        assert!(rendered.contains(&"ldc [Lclass1;.class".to_string()));
        assert_eq!(code.try_catch_blocks[0].catch_type.as_deref(), Some("class1"));
    }

    #[test]
    fn test_hierarchy_edges() {
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        b.interfaces.push("i".to_string());
        b.interfaces.push("java/lang/Runnable".to_string());
        let group =
            ClassGroup::from_classes([ClassEntry::new("a"), b, ClassEntry::new("i")]).unwrap();
        let graph = hierarchy(&group).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.inner().edge_count(), 2);
    }
}
