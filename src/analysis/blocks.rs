//! Basic blocks and control-flow straightening.
//!
//! [`BlockAnalyzer`] cuts a method body into basic blocks and connects them with the edges
//! the [`Analyzer`] actually follows. An edge from position `i` to `i + 1` links two blocks
//! into a fall-through chain (`prev`/`next`); every other edge between blocks is a branch.
//! Fall-through chains follow list order, so they never form cycles.
//!
//! [`BlockAnalyzer::straighten`] lays the blocks out again in depth-first order from the
//! entry, keeping each fall-through chain contiguous where possible. Blocks that were only
//! connected by obfuscator jumps end up next to each other.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{analyzer::Analyzer, reachability::ReachabilityInterpreter},
    assembly::{opcodes::GOTO, Code, Insn, InsnList, Label},
    model::MethodEntry,
    utils::graph::{DirectedGraph, NodeId},
    Result,
};

/// A run `[start, end)` of list positions with a single entry and exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    /// First position in the block.
    pub start: usize,
    /// One past the last position.
    pub end: usize,
    /// Block that falls through into this one.
    pub prev: Option<usize>,
    /// Block this one falls through into.
    pub next: Option<usize>,
    /// Blocks reached by a jump, switch or handler edge, without duplicates.
    pub branches: Vec<usize>,
}

impl Block {
    /// Number of nodes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the block covers no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Default)]
struct LabelMap {
    map: HashMap<Label, Label>,
    next: u32,
}

impl LabelMap {
    fn fresh(&mut self) -> Label {
        let label = Label::new(self.next);
        self.next += 1;
        label
    }

    fn get(&mut self, label: Label) -> Label {
        if let Some(mapped) = self.map.get(&label) {
            return *mapped;
        }
        let mapped = self.fresh();
        self.map.insert(label, mapped);
        mapped
    }
}

/// Basic-block partition of one method body.
#[derive(Debug, Clone, Default)]
pub struct BlockAnalyzer {
    blocks: Vec<Block>,
}

impl BlockAnalyzer {
    /// Splits `code` into blocks without any edges.
    ///
    /// A new block starts after every jump, switch, return or throw, and before every label.
    #[must_use]
    pub fn split(code: &Code) -> Self {
        let nodes: Vec<&Insn> = code.insns.iter().map(|(_, insn)| insn).collect();
        let mut blocks = Vec::new();
        let mut start = 0;
        for (index, insn) in nodes.iter().enumerate() {
            let next_is_label = matches!(nodes.get(index + 1), Some(Insn::Label(_)));
            if index + 1 == nodes.len() || next_is_label || insn.is_branch() || insn.ends_flow() {
                blocks.push(Block {
                    start,
                    end: index + 1,
                    ..Block::default()
                });
                start = index + 1;
            }
        }
        BlockAnalyzer { blocks }
    }

    /// Splits the body of `method` and records the edges found by a reachability analysis.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the body cannot be analyzed.
    pub fn analyze(owner: &str, method: &MethodEntry, max_iterations: usize) -> Result<Self> {
        let Some(code) = method.code.as_ref() else {
            return Ok(BlockAnalyzer::default());
        };
        let mut blocks = Self::split(code);
        let mut analyzer =
            Analyzer::new(ReachabilityInterpreter).with_max_iterations(max_iterations);
        analyzer.analyze_with(owner, method, &mut |from, to| blocks.record_edge(from, to))?;
        Ok(blocks)
    }

    /// All blocks, in list order. Block `0` is the entry.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if the body was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the block containing list position `index`.
    #[must_use]
    pub fn block_of(&self, index: usize) -> Option<usize> {
        let candidate = self.blocks.partition_point(|b| b.start <= index).checked_sub(1)?;
        (index < self.blocks[candidate].end).then_some(candidate)
    }

    /// Head of the fall-through chain containing `block`.
    #[must_use]
    pub fn origin(&self, block: usize) -> usize {
        let mut current = block;
        while let Some(prev) = self.blocks[current].prev {
            current = prev;
        }
        current
    }

    /// Blocks `block` passes control to: its fall-through successor, then its branches.
    pub fn successors(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        let block = &self.blocks[block];
        block.next.into_iter().chain(block.branches.iter().copied())
    }

    /// Records a control-flow edge between two list positions.
    pub fn record_edge(&mut self, from: usize, to: usize) {
        let (Some(a), Some(b)) = (self.block_of(from), self.block_of(to)) else {
            return;
        };
        if a == b {
            return;
        }
        if from + 1 == to {
            self.blocks[a].next = Some(b);
            self.blocks[b].prev = Some(a);
        } else if !self.blocks[a].branches.contains(&b) {
            self.blocks[a].branches.push(b);
        }
    }

    /// The block graph: one node per block, one edge per fall-through or branch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if an edge refers to a missing block.
    pub fn graph(&self) -> Result<DirectedGraph<usize, ()>> {
        let mut graph = DirectedGraph::with_capacity(self.blocks.len(), self.blocks.len());
        for index in 0..self.blocks.len() {
            graph.add_node(index);
        }
        for index in 0..self.blocks.len() {
            for to in self.successors(index) {
                if !graph.has_edge(NodeId(index), NodeId(to)) {
                    graph.add_edge(NodeId(index), NodeId(to), ())?;
                }
            }
        }
        Ok(graph)
    }

    /// Depth-first placement order of the reachable blocks.
    #[must_use]
    pub fn placement(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return order;
        }

        let mut placed = HashSet::new();
        let mut stack = vec![0];
        while let Some(block) = stack.pop() {
            if !placed.insert(block) {
                continue;
            }
            order.push(block);
            for branch in &self.blocks[block].branches {
                stack.push(self.origin(*branch));
            }
            if let Some(next) = self.blocks[block].next {
                stack.push(next);
            }
        }
        order
    }

    /// Rebuilds `code` with its blocks in [`BlockAnalyzer::placement`] order.
    ///
    /// Every label is replaced by a fresh one. When a block's fall-through successor is not
    /// placed right after it, a `GOTO` to the successor is appended. Blocks that are never
    /// placed are dropped. The exception table is not carried over; callers only straighten
    /// bodies without one.
    #[must_use]
    pub fn straighten(&self, code: &Code) -> Code {
        let nodes: Vec<&Insn> = code.insns.iter().map(|(_, insn)| insn).collect();
        let order = self.placement();

        let mut labels = LabelMap::default();

        // Entry labels of blocks that need one to be jumped to.
        let mut entries: HashMap<usize, Label> = HashMap::new();
        for (slot, block) in order.iter().enumerate() {
            let Some(next) = self.blocks[*block].next else {
                continue;
            };
            if order.get(slot + 1) == Some(&next) || entries.contains_key(&next) {
                continue;
            }
            let label = match nodes[self.blocks[next].start] {
                Insn::Label(label) => labels.get(*label),
                _ => labels.fresh(),
            };
            entries.insert(next, label);
        }

        let mut insns = InsnList::new();
        for (slot, block) in order.iter().enumerate() {
            let current = &self.blocks[*block];
            if let Some(label) = entries.get(block) {
                if !matches!(nodes[current.start], Insn::Label(_)) {
                    insns.push(Insn::Label(*label));
                }
            }
            for node in &nodes[current.start..current.end] {
                insns.push(node.map_labels(|label| labels.get(label)));
            }
            if let Some(next) = current.next {
                if order.get(slot + 1) != Some(&next) {
                    if let Some(label) = entries.get(&next) {
                        insns.push(Insn::jump(GOTO, *label));
                    }
                }
            }
        }

        Code {
            insns,
            try_catch_blocks: Vec::new(),
            max_stack: code.max_stack,
            max_locals: code.max_locals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::InsnBuilder, model::MethodAccessFlags};

    /// Edges between blocks, each block named by its first real instruction.
    fn named_edges(blocks: &BlockAnalyzer, code: &Code) -> HashSet<(String, String)> {
        let nodes: Vec<&Insn> = code.insns.iter().map(|(_, insn)| insn).collect();
        let name = |block: usize| {
            let block = &blocks.blocks()[block];
            nodes[block.start..block.end]
                .iter()
                .find(|insn| insn.is_real())
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        let mut edges = HashSet::new();
        for from in 0..blocks.len() {
            for to in blocks.successors(from) {
                edges.insert((name(from), name(to)));
            }
        }
        edges
    }

    fn scrambled() -> MethodEntry {
        // entry jumps over the tail to the middle, which jumps back to the tail
        let code = InsnBuilder::new()
            .iload(0)
            .goto("middle")
            .label("tail")
            .iconst(2)
            .iadd()
            .ireturn()
            .label("middle")
            .iconst(1)
            .iadd()
            .goto("tail")
            .build()
            .unwrap();
        MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code)
    }

    #[test]
    fn test_split_boundaries() {
        let method = scrambled();
        let blocks = BlockAnalyzer::split(method.code.as_ref().unwrap());
        let ranges: Vec<(usize, usize)> = blocks.blocks().iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ranges, vec![(0, 2), (2, 6), (6, 10)]);
        assert_eq!(blocks.block_of(7), Some(2));
        assert_eq!(blocks.block_of(10), None);
    }

    #[test]
    fn test_edges_and_origin() {
        let method = scrambled();
        let blocks = BlockAnalyzer::analyze("a", &method, 1000).unwrap();
        assert_eq!(blocks.blocks()[0].branches, vec![2]);
        assert_eq!(blocks.blocks()[2].branches, vec![1]);
        assert_eq!(blocks.blocks()[1].next, None);
        assert_eq!(blocks.origin(1), 1);
        assert_eq!(blocks.placement(), vec![0, 2, 1]);
    }

    #[test]
    fn test_straighten_orders_blocks() {
        let mut method = scrambled();
        let blocks = BlockAnalyzer::analyze("a", &method, 1000).unwrap();
        let straightened = blocks.straighten(method.code.as_ref().unwrap());

        let rendered: Vec<String> = straightened
            .insns
            .iter()
            .map(|(_, insn)| insn.to_string())
            .collect();
        assert_eq!(rendered[0], "iload 0");
        assert_eq!(rendered[2], "L0:");
        assert_eq!(rendered[3], "iconst_1");
        assert_eq!(rendered.last().map(String::as_str), Some("ireturn"));

        let before = named_edges(&blocks, method.code.as_ref().unwrap());
        method.code = Some(straightened);
        let again = BlockAnalyzer::analyze("a", &method, 1000).unwrap();
        assert_eq!(again.len(), blocks.len());
        assert_eq!(named_edges(&again, method.code.as_ref().unwrap()), before);
        assert_eq!(
            before,
            HashSet::from([
                ("iload 0".to_string(), "iconst_1".to_string()),
                ("iconst_1".to_string(), "iconst_2".to_string()),
            ])
        );
    }

    #[test]
    fn test_linear_layout_is_kept() {
        let code = InsnBuilder::new()
            .iload(0)
            .ifeq("other")
            .label("shared")
            .iconst(0)
            .ireturn()
            .label("other")
            .iinc(0, 1)
            .goto("shared")
            .build()
            .unwrap();
        let method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);
        let blocks = BlockAnalyzer::analyze("a", &method, 1000).unwrap();
        let straightened = blocks.straighten(method.code.as_ref().unwrap());
        assert_eq!(straightened.insns.len(), method.code.as_ref().unwrap().insns.len());
        assert!(straightened.try_catch_blocks.is_empty());
        let gotos = straightened
            .insns
            .iter()
            .filter(|(_, insn)| insn.opcode() == Some(GOTO))
            .count();
        assert_eq!(gotos, 1);
    }
}
