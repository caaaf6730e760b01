//! Method bodies and consistency-preserving edits.
//!
//! [`Code`] owns a method's [`InsnList`] together with its exception table. All edits
//! that can affect label references go through it:
//!
//! - [`Code::insert_after`] / [`Code::insert_before`] splice nodes around an anchor
//! - [`Code::remove`] unlinks a node
//! - [`Code::replace`] swaps a node for another
//! - [`Code::cursor`] walks the list while editing around the current position
//!
//! Addressing a node that is not in the list, or removing a label that a jump, switch or
//! try/catch range still references, is an invariant violation and panics. Passes only
//! ever address ids they just observed in the same list.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jarscope::assembly::{Code, Insn, opcodes::*};
//!
//! let mut code = Code::from_insns([Insn::op(ICONST_1), Insn::op(IRETURN)]);
//! let first = code.insns.first().unwrap();
//! code.insert_after(first, [Insn::op(ICONST_2), Insn::op(IADD)]);
//! assert_eq!(code.insns.len(), 4);
//! ```

use crate::assembly::{
    instruction::{Insn, Label},
    list::{InsnId, InsnList},
};

/// One entry of a method's exception table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// First covered node (inclusive).
    pub start: Label,
    /// End of the covered range (exclusive).
    pub end: Label,
    /// Handler entry.
    pub handler: Label,
    /// Internal name of the caught type; `None` catches everything.
    pub catch_type: Option<String>,
}

impl TryCatchBlock {
    /// Returns `true` if any of the range labels is `label`.
    #[must_use]
    pub fn references(&self, label: Label) -> bool {
        self.start == label || self.end == label || self.handler == label
    }
}

/// The body of a concrete method.
#[derive(Debug, Clone, Default)]
pub struct Code {
    /// The instruction stream.
    pub insns: InsnList,
    /// Exception table, in declaration order.
    pub try_catch_blocks: Vec<TryCatchBlock>,
    /// Maximum operand stack depth, as decoded or last computed.
    pub max_stack: u16,
    /// Number of local variable slots, as decoded or last computed.
    pub max_locals: u16,
}

impl Code {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a body from a node sequence.
    #[must_use]
    pub fn from_insns(insns: impl IntoIterator<Item = Insn>) -> Self {
        Code {
            insns: insns.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Number of jumps, switch targets and try/catch boundaries referring to `label`.
    #[must_use]
    pub fn label_references(&self, label: Label) -> usize {
        let from_insns: usize = self
            .insns
            .iter()
            .map(|(_, insn)| insn.targets().iter().filter(|&&t| t == label).count())
            .sum();
        let from_ranges: usize = self
            .try_catch_blocks
            .iter()
            .map(|tcb| {
                usize::from(tcb.start == label)
                    + usize::from(tcb.end == label)
                    + usize::from(tcb.handler == label)
            })
            .sum();
        from_insns + from_ranges
    }

    /// Returns `true` if anything refers to `label`.
    #[must_use]
    pub fn is_label_referenced(&self, label: Label) -> bool {
        self.try_catch_blocks.iter().any(|tcb| tcb.references(label))
            || self.insns.iter().any(|(_, insn)| insn.references(label))
    }

    /// Inserts `nodes` after `anchor`, preserving their order. Returns the new ids.
    ///
    /// # Panics
    ///
    /// Panics if `anchor` is not part of this body.
    pub fn insert_after(
        &mut self,
        anchor: InsnId,
        nodes: impl IntoIterator<Item = Insn>,
    ) -> Vec<InsnId> {
        self.assert_contains(anchor);
        let mut previous = anchor;
        let mut ids = Vec::new();
        for insn in nodes {
            let id = self.insns.alloc(insn);
            self.insns.link_after(previous, id);
            ids.push(id);
            previous = id;
        }
        ids
    }

    /// Inserts `nodes` before `anchor`, preserving their order. Returns the new ids.
    ///
    /// # Panics
    ///
    /// Panics if `anchor` is not part of this body.
    pub fn insert_before(
        &mut self,
        anchor: InsnId,
        nodes: impl IntoIterator<Item = Insn>,
    ) -> Vec<InsnId> {
        self.assert_contains(anchor);
        let mut ids = Vec::new();
        for insn in nodes {
            let id = self.insns.alloc(insn);
            self.insns.link_before(anchor, id);
            ids.push(id);
        }
        ids
    }

    /// Unlinks `id` and returns its node.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not part of this body, or if it is a label that is still
    /// referenced.
    pub fn remove(&mut self, id: InsnId) -> Insn {
        self.assert_contains(id);
        self.assert_unreferenced(id);
        self.insns.unlink(id)
    }

    /// Replaces `old` with `new` at the same position and returns the new id.
    ///
    /// # Panics
    ///
    /// Panics if `old` is not part of this body, or if it is a label that is still
    /// referenced.
    pub fn replace(&mut self, old: InsnId, new: Insn) -> InsnId {
        self.assert_contains(old);
        self.assert_unreferenced(old);
        let id = self.insns.alloc(new);
        self.insns.link_before(old, id);
        self.insns.unlink(old);
        id
    }

    /// Returns the label anchored directly before `id`, inserting a fresh one if needed.
    ///
    /// Line markers between the label and `id` are skipped over.
    pub fn ensure_label_before(&mut self, id: InsnId) -> Label {
        self.assert_contains(id);
        let mut current = self.insns.prev(id);
        while let Some(node) = current {
            match self.insns[node] {
                Insn::Label(label) => return label,
                Insn::Line(_) => current = self.insns.prev(node),
                _ => break,
            }
        }

        let label = self.insns.new_label();
        self.insert_before(id, [Insn::Label(label)]);
        label
    }

    /// Removes label anchors nothing refers to. Returns how many were removed.
    pub fn remove_unreferenced_labels(&mut self) -> usize {
        let mut referenced = std::collections::HashSet::new();
        for (_, insn) in self.insns.iter() {
            referenced.extend(insn.targets());
        }
        for tcb in &self.try_catch_blocks {
            referenced.extend([tcb.start, tcb.end, tcb.handler]);
        }

        let dead: Vec<InsnId> = self
            .insns
            .iter()
            .filter(|(_, insn)| insn.as_label().is_some_and(|l| !referenced.contains(&l)))
            .map(|(id, _)| id)
            .collect();
        for &id in &dead {
            self.insns.unlink(id);
        }
        dead.len()
    }

    /// Number of real instructions.
    #[must_use]
    pub fn real_len(&self) -> usize {
        self.insns.iter().filter(|(_, insn)| insn.is_real()).count()
    }

    /// Creates a cursor positioned before the first node.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor {
            code: self,
            current: None,
            started: false,
            pending: None,
        }
    }

    fn assert_contains(&self, id: InsnId) {
        assert!(
            self.insns.contains(id),
            "{id:?} is not part of this instruction list"
        );
    }

    fn assert_unreferenced(&self, id: InsnId) {
        if let Insn::Label(label) = self.insns[id] {
            assert!(
                !self.is_label_referenced(label),
                "cannot remove {label:?}: it is still referenced"
            );
        }
    }
}

/// An editing cursor over a [`Code`] body.
///
/// The cursor starts before the first node; [`Cursor::move_next`] advances it. Removing the
/// current node moves the cursor to the node that followed it, so a loop of
/// `move_next`/`remove_current_and_advance` never skips or revisits nodes.
pub struct Cursor<'a> {
    code: &'a mut Code,
    current: Option<InsnId>,
    started: bool,
    pending: Option<Option<InsnId>>,
}

impl Cursor<'_> {
    /// Advances to the next node and returns it.
    #[allow(clippy::should_implement_trait)]
    pub fn move_next(&mut self) -> Option<InsnId> {
        self.current = if let Some(pending) = self.pending.take() {
            pending
        } else if self.started {
            self.current.and_then(|id| self.code.insns.next(id))
        } else {
            self.started = true;
            self.code.insns.first()
        };
        self.current
    }

    /// The node under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<InsnId> {
        self.current
    }

    /// The node under the cursor, by value.
    #[must_use]
    pub fn insn(&self) -> Option<&Insn> {
        self.current.map(|id| &self.code.insns[id])
    }

    /// Read access to the body being edited.
    #[must_use]
    pub fn code(&self) -> &Code {
        self.code
    }

    /// Removes the current node. The next [`Cursor::move_next`] yields the node that
    /// followed it.
    ///
    /// # Panics
    ///
    /// Panics if there is no current node, or if it is a still-referenced label.
    pub fn remove_current_and_advance(&mut self) -> Insn {
        let Some(id) = self.current else {
            panic!("cursor has no current node");
        };
        let next = self.code.insns.next(id);
        let insn = self.code.remove(id);
        self.current = None;
        self.pending = Some(next);
        insn
    }

    /// Inserts nodes before the current node. The cursor does not move.
    ///
    /// # Panics
    ///
    /// Panics if there is no current node.
    pub fn insert_before_current(&mut self, nodes: impl IntoIterator<Item = Insn>) -> Vec<InsnId> {
        match self.anchor() {
            Anchor::Node(id) => self.code.insert_before(id, nodes),
            Anchor::Before(next) => self.insert_at_gap(next, nodes),
        }
    }

    /// Inserts nodes after the current node. The cursor does not move, so the inserted
    /// nodes are visited next.
    ///
    /// # Panics
    ///
    /// Panics if there is no current node.
    pub fn insert_after_current(&mut self, nodes: impl IntoIterator<Item = Insn>) -> Vec<InsnId> {
        match self.anchor() {
            Anchor::Node(id) => self.code.insert_after(id, nodes),
            Anchor::Before(next) => {
                let ids = self.insert_at_gap(next, nodes);
                if let Some(&first) = ids.first() {
                    self.pending = Some(Some(first));
                }
                ids
            }
        }
    }

    fn anchor(&self) -> Anchor {
        match (self.current, self.pending) {
            (Some(id), _) => Anchor::Node(id),
            (None, Some(next)) => Anchor::Before(next),
            (None, None) => panic!("cursor has no current node"),
        }
    }

    fn insert_at_gap(
        &mut self,
        next: Option<InsnId>,
        nodes: impl IntoIterator<Item = Insn>,
    ) -> Vec<InsnId> {
        match (next, self.code.insns.last()) {
            (Some(next), _) => self.code.insert_before(next, nodes),
            (None, Some(last)) => self.code.insert_after(last, nodes),
            (None, None) => nodes
                .into_iter()
                .map(|insn| self.code.insns.push(insn))
                .collect(),
        }
    }
}

enum Anchor {
    Node(InsnId),
    Before(Option<InsnId>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    fn sample() -> Code {
        let mut code = Code::new();
        let label = code.insns.new_label();
        code.insns.push(Insn::op(ICONST_0));
        code.insns.push(Insn::jump(IFEQ, label));
        code.insns.push(Insn::op(NOP));
        code.insns.push(Insn::Label(label));
        code.insns.push(Insn::op(RETURN));
        code
    }

    fn rendered(code: &Code) -> Vec<String> {
        code.insns.iter().map(|(_, i)| i.to_string()).collect()
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut code = sample();
        let first = code.insns.first().unwrap();
        code.insert_after(first, [Insn::op(ICONST_1), Insn::op(IADD)]);
        let last = code.insns.last().unwrap();
        code.insert_before(last, [Insn::op(NOP), Insn::op(POP)]);
        assert_eq!(
            rendered(&code),
            vec!["iconst_0", "iconst_1", "iadd", "ifeq L0", "nop", "L0:", "nop", "pop", "return"]
        );
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn test_remove_referenced_label_panics() {
        let mut code = sample();
        let label = code.insns.find_label(Label::new(0)).unwrap();
        code.remove(label);
    }

    #[test]
    #[should_panic(expected = "is not part of this instruction list")]
    fn test_remove_foreign_node_panics() {
        let mut code = sample();
        let id = code.insns.first().unwrap();
        code.remove(id);
        code.remove(id);
    }

    #[test]
    fn test_remove_label_after_unreferencing() {
        let mut code = sample();
        let jump = code.insns.iter().nth(1).unwrap().0;
        code.replace(jump, Insn::op(POP));
        assert_eq!(code.label_references(Label::new(0)), 0);
        assert_eq!(code.remove_unreferenced_labels(), 1);
        assert_eq!(rendered(&code), vec!["iconst_0", "pop", "nop", "return"]);
    }

    #[test]
    fn test_label_references_counts_ranges() {
        let mut code = sample();
        code.try_catch_blocks.push(TryCatchBlock {
            start: Label::new(0),
            end: Label::new(0),
            handler: Label::new(0),
            catch_type: None,
        });
        assert_eq!(code.label_references(Label::new(0)), 4);
    }

    #[test]
    fn test_ensure_label_before() {
        let mut code = sample();
        let ret = code.insns.last().unwrap();
        assert_eq!(code.ensure_label_before(ret), Label::new(0));

        let nop = code.insns.iter().nth(2).unwrap().0;
        let fresh = code.ensure_label_before(nop);
        assert_eq!(fresh, Label::new(1));
        assert_eq!(code.insns.prev(nop), code.insns.find_label(fresh));
    }

    #[test]
    fn test_cursor_remove_and_advance_visits_every_node() {
        let mut code = sample();
        let mut cursor = code.cursor();
        let mut visited = Vec::new();
        while let Some(id) = cursor.move_next() {
            visited.push(cursor.insn().unwrap().to_string());
            if cursor.code().insns[id] == Insn::op(NOP) {
                cursor.remove_current_and_advance();
            }
        }
        assert_eq!(visited, vec!["iconst_0", "ifeq L0", "nop", "L0:", "return"]);
        assert_eq!(rendered(&code), vec!["iconst_0", "ifeq L0", "L0:", "return"]);
    }

    #[test]
    fn test_cursor_insert_after_removal() {
        let mut code = Code::from_insns([Insn::op(NOP), Insn::op(POP), Insn::op(RETURN)]);
        let mut cursor = code.cursor();
        cursor.move_next();
        cursor.remove_current_and_advance();
        cursor.insert_after_current([Insn::op(ICONST_0)]);
        assert_eq!(cursor.move_next().map(|id| cursor.code().insns[id].clone()), Some(Insn::op(ICONST_0)));
        assert_eq!(rendered(&code), vec!["iconst_0", "pop", "return"]);
    }
}
