//! The class group arena.
//!
//! A [`ClassGroup`] owns every [`ClassEntry`] of one input. Entries live in a slot vector
//! indexed by [`ClassId`]; removed entries leave an empty slot so ids held elsewhere never
//! alias a different class. A name→id index is kept alongside and rebuilt whenever names
//! change, and every structural change bumps [`ClassGroup::generation`].
//!
//! Hierarchy queries ([`ClassGroup::super_of`], [`ClassGroup::ancestors`]) resolve names
//! through the index. Names that are not in the group, such as platform classes, resolve
//! to `None`.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use rayon::prelude::*;

use crate::{model::class::ClassEntry, Error, Result};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`ClassGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stable index of a class inside its group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

/// Which entity of a group a [`MatchRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRef {
    /// The class itself.
    Class,
    /// Method at this position in the class's method list.
    Method(usize),
    /// Field at this position in the class's field list.
    Field(usize),
}

/// A non-owning link to the counterpart of an entity in another group.
///
/// Set by cross-version matching and never read by the passes. A link may dangle after
/// the target is removed or reordered; holders must tolerate that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchRef {
    /// Group holding the counterpart.
    pub group: GroupId,
    /// Class holding (or being) the counterpart.
    pub class: ClassId,
    /// The member within that class.
    pub member: MemberRef,
}

/// The set of classes one pipeline run operates on.
#[derive(Debug)]
pub struct ClassGroup {
    id: GroupId,
    slots: Vec<Option<ClassEntry>>,
    index: HashMap<String, ClassId>,
    generation: u64,
}

impl Default for ClassGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassGroup {
    /// Creates an empty group with a fresh [`GroupId`].
    #[must_use]
    pub fn new() -> Self {
        ClassGroup {
            id: GroupId::next(),
            slots: Vec::new(),
            index: HashMap::new(),
            generation: 0,
        }
    }

    /// Builds a group from entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if two entries share a name.
    pub fn from_classes(classes: impl IntoIterator<Item = ClassEntry>) -> Result<Self> {
        let mut group = ClassGroup::new();
        for class in classes {
            group.insert(class)?;
        }
        Ok(group)
    }

    /// This group's identity.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Counter bumped by every insert, remove, rename and index rebuild.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the group holds no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Adds a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if a class with the same name is present.
    pub fn insert(&mut self, class: ClassEntry) -> Result<ClassId> {
        if self.index.contains_key(&class.name) {
            return Err(Error::DuplicateClass(class.name));
        }
        let Ok(raw) = u32::try_from(self.slots.len()) else {
            return Err(Error::Error("class group exceeds u32::MAX slots".to_string()));
        };

        let id = ClassId(raw);
        self.index.insert(class.name.clone(), id);
        self.slots.push(Some(class));
        self.generation += 1;
        Ok(id)
    }

    /// Removes a class and returns it.
    pub fn remove(&mut self, id: ClassId) -> Option<ClassEntry> {
        let class = self.slots.get_mut(id.index())?.take()?;
        self.index.remove(&class.name);
        self.generation += 1;
        Some(class)
    }

    /// Returns the class with this id.
    #[must_use]
    pub fn get(&self, id: ClassId) -> Option<&ClassEntry> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Returns the class with this id mutably.
    ///
    /// Renaming through this reference leaves the index stale; use
    /// [`ClassGroup::rename_class`] or call [`ClassGroup::rebuild_index`] afterwards.
    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut ClassEntry> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Resolves an internal name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.index.get(name).copied()
    }

    /// Looks up a class by internal name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassEntry> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    /// Looks up a class by internal name, mutably.
    pub fn class_mut(&mut self, name: &str) -> Option<&mut ClassEntry> {
        let id = self.id_of(name)?;
        self.get_mut(id)
    }

    /// Iterates over classes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassEntry)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref()
                .map(|class| (ClassId(i as u32), class))
        })
    }

    /// Iterates mutably over classes in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClassEntry> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Parallel read-only iteration, for whole-group discovery phases.
    pub fn par_iter(&self) -> impl ParallelIterator<Item = &ClassEntry> {
        self.slots.par_iter().filter_map(Option::as_ref)
    }

    /// Parallel mutable iteration, for passes without cross-class state.
    pub fn par_iter_mut(&mut self) -> impl ParallelIterator<Item = &mut ClassEntry> {
        self.slots.par_iter_mut().filter_map(Option::as_mut)
    }

    /// Ids of all classes, in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<ClassId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Renames a class and updates the index. References held by other classes are not
    /// rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] if `id` is not present and
    /// [`Error::DuplicateClass`] if `new_name` is taken.
    pub fn rename_class(&mut self, id: ClassId, new_name: &str) -> Result<()> {
        if self.index.contains_key(new_name) {
            return Err(Error::DuplicateClass(new_name.to_string()));
        }
        let Some(class) = self.slots.get_mut(id.index()).and_then(Option::as_mut) else {
            return Err(Error::ClassNotFound(format!("{id:?}")));
        };

        let old = std::mem::replace(&mut class.name, new_name.to_string());
        self.index.remove(&old);
        self.index.insert(new_name.to_string(), id);
        self.generation += 1;
        Ok(())
    }

    /// Rebuilds the name index from the entries' current names.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (c.name.clone(), ClassId(i as u32))))
            .collect();
        self.generation += 1;
    }

    /// Superclass of `id`, if it is part of the group.
    #[must_use]
    pub fn super_of(&self, id: ClassId) -> Option<ClassId> {
        let name = self.get(id)?.super_name.as_deref()?;
        self.id_of(name)
    }

    /// Directly implemented interfaces of `id` that are part of the group.
    #[must_use]
    pub fn interfaces_of(&self, id: ClassId) -> Vec<ClassId> {
        self.get(id).map_or_else(Vec::new, |class| {
            class
                .interfaces
                .iter()
                .filter_map(|name| self.id_of(name))
                .collect()
        })
    }

    /// All superclasses and superinterfaces of `id` present in the group, nearest first.
    /// `id` itself is not included.
    #[must_use]
    pub fn ancestors(&self, id: ClassId) -> Vec<ClassId> {
        let mut seen = HashSet::from([id]);
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(class) = self.get(current) else {
                continue;
            };
            for parent in class.parents().filter_map(|name| self.id_of(name)) {
                if seen.insert(parent) {
                    order.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        order
    }

    /// Finds the class that declares the field `owner.name desc` with the given
    /// static-ness, walking up the superclass chain.
    ///
    /// Returns the name of the first matching class; if the chain leaves the group first,
    /// the name of the first class outside the group is returned. Returns `None` if
    /// `owner` itself is not in the group.
    #[must_use]
    pub fn resolve_field_owner(
        &self,
        owner: &str,
        name: &str,
        desc: &str,
        is_static: bool,
    ) -> Option<String> {
        let mut class = self.class(owner)?;
        let mut steps = 0;
        loop {
            if class.declares_field(name, desc, is_static) {
                return Some(class.name.clone());
            }
            let super_name = class.super_name.as_deref()?;
            match self.class(super_name) {
                Some(parent) if steps < self.slots.len() => {
                    class = parent;
                    steps += 1;
                }
                Some(_) => return None,
                None => return Some(super_name.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{field::FieldEntry, flags::FieldAccessFlags};

    fn hierarchy() -> ClassGroup {
        let mut a = ClassEntry::new("a");
        a.fields.push(FieldEntry::new("f", "I", FieldAccessFlags::STATIC));
        let mut b = ClassEntry::new("b");
        b.super_name = Some("a".to_string());
        b.interfaces.push("i".to_string());
        let mut c = ClassEntry::new("c");
        c.super_name = Some("b".to_string());
        let i = ClassEntry::new("i");
        ClassGroup::from_classes([a, b, c, i]).unwrap()
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut group = hierarchy();
        assert_eq!(group.len(), 4);
        let b = group.id_of("b").unwrap();
        assert_eq!(group.get(b).unwrap().name, "b");

        let generation = group.generation();
        let removed = group.remove(b).unwrap();
        assert_eq!(removed.name, "b");
        assert!(group.class("b").is_none());
        assert!(group.get(b).is_none());
        assert!(group.generation() > generation);
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut group = hierarchy();
        let result = group.insert(ClassEntry::new("a"));
        assert!(matches!(result, Err(Error::DuplicateClass(name)) if name == "a"));
    }

    #[test]
    fn test_hierarchy_resolution() {
        let group = hierarchy();
        let a = group.id_of("a").unwrap();
        let b = group.id_of("b").unwrap();
        let c = group.id_of("c").unwrap();
        let i = group.id_of("i").unwrap();

        assert_eq!(group.super_of(c), Some(b));
        assert_eq!(group.super_of(a), None);
        assert_eq!(group.interfaces_of(b), vec![i]);
        assert_eq!(group.ancestors(c), vec![b, a, i]);
    }

    #[test]
    fn test_rename_updates_index() {
        let mut group = hierarchy();
        let a = group.id_of("a").unwrap();
        group.rename_class(a, "class0").unwrap();
        assert_eq!(group.id_of("class0"), Some(a));
        assert!(group.id_of("a").is_none());
        assert!(group.rename_class(a, "b").is_err());
    }

    #[test]
    fn test_resolve_field_owner() {
        let group = hierarchy();
        assert_eq!(
            group.resolve_field_owner("c", "f", "I", true),
            Some("a".to_string())
        );
        assert_eq!(
            group.resolve_field_owner("c", "f", "I", false),
            Some("java/lang/Object".to_string())
        );
        assert_eq!(group.resolve_field_owner("zz", "f", "I", true), None);
    }

    #[test]
    fn test_group_ids_unique() {
        assert_ne!(ClassGroup::new().id(), ClassGroup::new().id());
    }
}
