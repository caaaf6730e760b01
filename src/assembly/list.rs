//! Arena-backed doubly-linked instruction list.
//!
//! Nodes live in a vector of slots and are linked through `prev`/`next` indices, so an
//! [`InsnId`] stays valid for as long as its node is in the list and is never handed out
//! again after removal. Label anchors are indexed by [`Label`] for O(1) lookup.
//!
//! This type provides the raw linking primitives. Editing that must keep jump targets and
//! exception ranges consistent goes through [`crate::assembly::Code`].

use std::{collections::HashMap, fmt, ops::Index};

use crate::assembly::instruction::{Insn, Label};

/// Stable handle to a node in an [`InsnList`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(pub(crate) u32);

impl InsnId {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InsnId({})", self.0)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    live: bool,
}

/// A doubly-linked list of instruction nodes.
#[derive(Debug, Clone, Default)]
pub struct InsnList {
    slots: Vec<Slot>,
    head: Option<InsnId>,
    tail: Option<InsnId>,
    len: usize,
    labels: HashMap<Label, InsnId>,
    next_label: u32,
}

impl InsnList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently linked, pseudo nodes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no nodes are linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node.
    #[must_use]
    pub fn first(&self) -> Option<InsnId> {
        self.head
    }

    /// Last node.
    #[must_use]
    pub fn last(&self) -> Option<InsnId> {
        self.tail
    }

    /// Returns `true` if `id` refers to a node currently linked into this list.
    #[must_use]
    pub fn contains(&self, id: InsnId) -> bool {
        self.slots.get(id.index()).is_some_and(|slot| slot.live)
    }

    /// Node following `id`.
    #[must_use]
    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.slot(id).next
    }

    /// Node preceding `id`.
    #[must_use]
    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.slot(id).prev
    }

    /// Returns the node, or `None` if it is not linked.
    #[must_use]
    pub fn get(&self, id: InsnId) -> Option<&Insn> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.live)
            .map(|slot| &slot.insn)
    }

    /// Allocates a fresh label that no node of this list uses yet.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Returns the node anchoring `label`.
    #[must_use]
    pub fn find_label(&self, label: Label) -> Option<InsnId> {
        self.labels.get(&label).copied()
    }

    /// Appends a node at the end.
    ///
    /// # Panics
    ///
    /// Panics if `insn` is a label that is already anchored in this list.
    pub fn push(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        match self.tail {
            Some(tail) => self.link_after(tail, id),
            None => {
                self.slots[id.index()].live = true;
                self.head = Some(id);
                self.tail = Some(id);
                self.len += 1;
            }
        }
        id
    }

    /// Iterates over `(id, node)` pairs in list order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            current: self.head,
        }
    }

    /// Collects the ids of all nodes in list order.
    #[must_use]
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Next node after `id` that is not a line marker.
    #[must_use]
    pub fn next_insn(&self, id: InsnId) -> Option<InsnId> {
        let mut current = self.next(id);
        while let Some(node) = current {
            if !matches!(self[node], Insn::Line(_)) {
                return Some(node);
            }
            current = self.next(node);
        }
        None
    }

    /// Rewrites every non-label node in place. Label anchors are left untouched.
    pub fn rewrite(&mut self, mut f: impl FnMut(&mut Insn)) {
        let mut current = self.head;
        while let Some(id) = current {
            let slot = &mut self.slots[id.index()];
            if !matches!(slot.insn, Insn::Label(_)) {
                f(&mut slot.insn);
            }
            current = slot.next;
        }
    }

    fn slot(&self, id: InsnId) -> &Slot {
        match self.slots.get(id.index()) {
            Some(slot) if slot.live => slot,
            _ => panic!("{id:?} is not part of this instruction list"),
        }
    }

    pub(crate) fn alloc(&mut self, insn: Insn) -> InsnId {
        let Ok(index) = u32::try_from(self.slots.len()) else {
            panic!("instruction list exceeds u32::MAX nodes");
        };
        let id = InsnId(index);
        if let Insn::Label(label) = insn {
            assert!(
                !self.labels.contains_key(&label),
                "{label:?} is already anchored in this instruction list"
            );
            self.labels.insert(label, id);
            self.next_label = self.next_label.max(label.0 + 1);
        }
        self.slots.push(Slot {
            insn,
            prev: None,
            next: None,
            live: false,
        });
        id
    }

    pub(crate) fn link_after(&mut self, anchor: InsnId, id: InsnId) {
        let next = self.slot(anchor).next;
        {
            let slot = &mut self.slots[id.index()];
            slot.prev = Some(anchor);
            slot.next = next;
            slot.live = true;
        }
        self.slots[anchor.index()].next = Some(id);
        match next {
            Some(next) => self.slots[next.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    pub(crate) fn link_before(&mut self, anchor: InsnId, id: InsnId) {
        let prev = self.slot(anchor).prev;
        {
            let slot = &mut self.slots[id.index()];
            slot.prev = prev;
            slot.next = Some(anchor);
            slot.live = true;
        }
        self.slots[anchor.index()].prev = Some(id);
        match prev {
            Some(prev) => self.slots[prev.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.len += 1;
    }

    pub(crate) fn unlink(&mut self, id: InsnId) -> Insn {
        let (prev, next) = {
            let slot = self.slot(id);
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slots[prev.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next.index()].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[id.index()];
        slot.live = false;
        slot.prev = None;
        slot.next = None;
        self.len -= 1;

        let insn = std::mem::replace(&mut slot.insn, Insn::Op(crate::assembly::opcodes::NOP));
        if let Insn::Label(label) = insn {
            self.labels.remove(&label);
        }
        insn
    }
}

impl Index<InsnId> for InsnList {
    type Output = Insn;

    fn index(&self, id: InsnId) -> &Insn {
        &self.slot(id).insn
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        let mut list = InsnList::new();
        for insn in iter {
            list.push(insn);
        }
        list
    }
}

/// Iterator over the nodes of an [`InsnList`].
pub struct Iter<'a> {
    list: &'a InsnList,
    current: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let slot = &self.list.slots[id.index()];
        self.current = slot.next;
        Some((id, &slot.insn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    #[test]
    fn test_push_and_iterate() {
        let mut list = InsnList::new();
        let a = list.push(Insn::op(ICONST_1));
        let b = list.push(Insn::op(IRETURN));
        assert_eq!(list.len(), 2);
        assert_eq!(list.first(), Some(a));
        assert_eq!(list.last(), Some(b));
        assert_eq!(list.next(a), Some(b));
        assert_eq!(list.prev(b), Some(a));
        assert_eq!(list[b], Insn::op(IRETURN));
    }

    #[test]
    fn test_unlink_middle_and_ends() {
        let mut list: InsnList = [NOP, ICONST_0, POP, RETURN]
            .into_iter()
            .map(Insn::op)
            .collect();
        let ids = list.ids();

        assert_eq!(list.unlink(ids[1]), Insn::op(ICONST_0));
        assert_eq!(list.next(ids[0]), Some(ids[2]));
        assert!(!list.contains(ids[1]));

        list.unlink(ids[0]);
        list.unlink(ids[3]);
        assert_eq!(list.first(), Some(ids[2]));
        assert_eq!(list.last(), Some(ids[2]));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_labels_are_indexed() {
        let mut list = InsnList::new();
        let label = list.new_label();
        let id = list.push(Insn::Label(label));
        assert_eq!(list.find_label(label), Some(id));

        let explicit = Label::new(10);
        list.push(Insn::Label(explicit));
        assert_eq!(list.new_label(), Label::new(11));

        list.unlink(id);
        assert_eq!(list.find_label(label), None);
    }

    #[test]
    fn test_next_insn_skips_line_markers() {
        let list: InsnList = vec![Insn::op(NOP), Insn::Line(3), Insn::op(RETURN)]
            .into_iter()
            .collect();
        let ids = list.ids();
        assert_eq!(list.next_insn(ids[0]), Some(ids[2]));
        assert_eq!(list.next_insn(ids[2]), None);
    }

    #[test]
    fn test_rewrite_skips_labels() {
        let mut list: InsnList = vec![
            Insn::Label(Label::new(0)),
            Insn::field(GETSTATIC, "a", "b", "I"),
        ]
        .into_iter()
        .collect();
        let mut seen = 0;
        list.rewrite(|insn| {
            seen += 1;
            if let Insn::Field { owner, .. } = insn {
                *owner = "c".to_string();
            }
        });
        assert_eq!(seen, 1);
        assert_eq!(list.iter().nth(1).unwrap().1.to_string(), "getstatic c.b I");
    }

    #[test]
    #[should_panic(expected = "is not part of this instruction list")]
    fn test_stale_id_panics() {
        let mut list = InsnList::new();
        let id = list.push(Insn::op(NOP));
        list.unlink(id);
        let _ = list.next(id);
    }
}
