//! Worklist-driven fixpoint over a method body.
//!
//! The [`Analyzer`] propagates [`Frame`]s along fall-through, jump, switch and exception
//! edges until nothing changes. Frames are indexed by the position of each node in the
//! instruction list at the time of the analysis, pseudo nodes (labels, line markers)
//! included. An instruction that no path reaches keeps `None`.
//!
//! # Example
//!
//! ```rust,ignore
//! use jarscope::analysis::{Analyzer, ReachabilityInterpreter};
//!
//! let mut analyzer = Analyzer::new(ReachabilityInterpreter);
//! let frames = analyzer.analyze("pkg/Owner", &method)?;
//! let dead = frames.unreachable().count();
//! ```

use std::collections::HashMap;

use crate::{
    analysis::{frame::Frame, interpreter::Interpreter},
    assembly::{
        opcodes::{DLOAD, DSTORE, LLOAD, LSTORE},
        Code, FlowType, Insn, InsnId, Label,
    },
    model::{descriptor::BasicType, MethodEntry},
    Error, Result,
};

/// Default bound on the number of instruction visits per method.
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000_000;

/// Largest stack depth the class file format can express, used when `max_stack` is unset.
const MAX_STACK_SLOTS: usize = 0xFFFF;

/// Result of an analysis: one optional frame per node, in list order.
///
/// Each frame is the state *before* the node executes.
#[derive(Debug, Clone)]
pub struct Frames<V> {
    ids: Vec<InsnId>,
    frames: Vec<Option<Frame<V>>>,
    positions: HashMap<InsnId, usize>,
}

impl<V> Frames<V> {
    /// Number of nodes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the analyzed body was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Node ids in the order the frames are indexed.
    #[must_use]
    pub fn ids(&self) -> &[InsnId] {
        &self.ids
    }

    /// Frame at list position `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Frame<V>> {
        self.frames.get(index).and_then(Option::as_ref)
    }

    /// Frame before node `id`, or `None` if it is unreachable or unknown.
    #[must_use]
    pub fn get(&self, id: InsnId) -> Option<&Frame<V>> {
        self.positions.get(&id).and_then(|&index| self.at(index))
    }

    /// List position of node `id` at analysis time.
    #[must_use]
    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Returns `true` if node `id` was reached.
    #[must_use]
    pub fn is_reachable(&self, id: InsnId) -> bool {
        self.get(id).is_some()
    }

    /// Ids of all nodes that were never reached.
    pub fn unreachable(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.ids
            .iter()
            .zip(&self.frames)
            .filter(|(_, frame)| frame.is_none())
            .map(|(id, _)| *id)
    }

    /// All frames, indexed by list position.
    #[must_use]
    pub fn frames(&self) -> &[Option<Frame<V>>] {
        &self.frames
    }
}

struct Handler {
    start: usize,
    end: usize,
    target: usize,
    catch_type: Option<String>,
}

/// Abstract interpreter driver, generic over the value domain.
pub struct Analyzer<I: Interpreter> {
    interpreter: I,
    max_iterations: usize,
    enforce_max_stack: bool,
}

impl<I: Interpreter> Analyzer<I> {
    /// Creates an analyzer with the default iteration budget.
    pub fn new(interpreter: I) -> Self {
        Analyzer {
            interpreter,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            enforce_max_stack: true,
        }
    }

    /// Sets the bound on instruction visits per method.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Whether a declared, non-zero `max_stack` bounds the operand stack (default: on).
    ///
    /// Turned off to measure the depth a body actually needs.
    #[must_use]
    pub fn with_max_stack_enforced(mut self, enforce: bool) -> Self {
        self.enforce_max_stack = enforce;
        self
    }

    /// The interpreter, e.g. to read state it accumulated during the last run.
    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// Consumes the analyzer and returns the interpreter.
    pub fn into_interpreter(self) -> I {
        self.interpreter
    }

    /// Analyzes `method` of class `owner`.
    ///
    /// Methods without a body yield empty [`Frames`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if the body cannot be interpreted.
    pub fn analyze(&mut self, owner: &str, method: &MethodEntry) -> Result<Frames<I::Value>> {
        self.analyze_with(owner, method, &mut |_, _| {})
    }

    /// Like [`Analyzer::analyze`], reporting every followed edge `(from, to)` as list
    /// positions to `edges`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if the body cannot be interpreted.
    pub fn analyze_with(
        &mut self,
        owner: &str,
        method: &MethodEntry,
        edges: &mut dyn FnMut(usize, usize),
    ) -> Result<Frames<I::Value>> {
        let Some(code) = method.code.as_ref() else {
            return Ok(Frames {
                ids: Vec::new(),
                frames: Vec::new(),
                positions: HashMap::new(),
            });
        };

        self.run(method, code, edges).map_err(|error| match error {
            Error::Analysis { message, .. } => Error::Analysis {
                method: method.display_name(owner),
                message,
            },
            Error::Malformed { message, .. } => Error::Analysis {
                method: method.display_name(owner),
                message,
            },
            other => other,
        })
    }

    fn run(
        &mut self,
        method: &MethodEntry,
        code: &Code,
        edges: &mut dyn FnMut(usize, usize),
    ) -> Result<Frames<I::Value>> {
        let ids = code.insns.ids();
        let positions: HashMap<InsnId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let method_name = method.name.as_str();
        let position_of = |label: Label| -> Result<usize> {
            code.insns
                .find_label(label)
                .and_then(|id| positions.get(&id).copied())
                .ok_or_else(|| analysis_error!(method_name, "unknown label {}", label))
        };

        let mut handlers = Vec::with_capacity(code.try_catch_blocks.len());
        for block in &code.try_catch_blocks {
            handlers.push(Handler {
                start: position_of(block.start)?,
                end: position_of(block.end)?,
                target: position_of(block.handler)?,
                catch_type: block.catch_type.clone(),
            });
        }

        let mut frames: Vec<Option<Frame<I::Value>>> = vec![None; ids.len()];
        if ids.is_empty() {
            return Ok(Frames {
                ids,
                frames,
                positions,
            });
        }

        let max_stack = match code.max_stack {
            declared if declared > 0 && self.enforce_max_stack => usize::from(declared),
            _ => MAX_STACK_SLOTS,
        };
        let entry = self.entry_frame(method, code)?;
        let mut worklist = Vec::with_capacity(ids.len());
        let mut in_worklist = vec![false; ids.len()];
        frames[0] = Some(entry);
        worklist.push(0);
        in_worklist[0] = true;

        let mut iterations = 0usize;
        while let Some(index) = worklist.pop() {
            in_worklist[index] = false;
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(analysis_error!(
                    method_name,
                    "iteration budget of {} exceeded",
                    self.max_iterations
                ));
            }

            let Some(before) = frames[index].clone() else {
                continue;
            };
            let id = ids[index];
            let insn = &code.insns[id];

            let mut after = before.clone();
            after.execute(id, insn, &mut self.interpreter)?;
            if after.stack_slots() > max_stack {
                return Err(analysis_error!(
                    method_name,
                    "stack of {} slots exceeds max_stack {} at {:?}",
                    after.stack_slots(),
                    max_stack,
                    id
                ));
            }

            let mut successors: Vec<usize> = Vec::new();
            match insn.flow() {
                FlowType::Sequential => successors.push(index + 1),
                FlowType::ConditionalJump => {
                    for target in insn.targets() {
                        successors.push(position_of(target)?);
                    }
                    successors.push(index + 1);
                }
                FlowType::UnconditionalJump | FlowType::Switch => {
                    for target in insn.targets() {
                        successors.push(position_of(target)?);
                    }
                }
                FlowType::Return | FlowType::Throw => {}
                FlowType::Subroutine | FlowType::SubroutineReturn => {
                    return Err(analysis_error!(
                        method_name,
                        "subroutines (JSR/RET) are not supported"
                    ));
                }
            }

            for successor in successors {
                if successor >= ids.len() {
                    return Err(analysis_error!(method_name, "execution falls off the end of the code"));
                }
                edges(index, successor);
                self.merge_into(&mut frames, successor, &after, &mut worklist, &mut in_worklist)?;
            }

            if insn.is_real() {
                for handler in handlers
                    .iter()
                    .filter(|h| h.start <= index && index < h.end)
                {
                    let mut catch_frame = before.clone();
                    catch_frame.clear_stack();
                    catch_frame.push(
                        self.interpreter
                            .new_exception_value(handler.catch_type.as_deref()),
                    );
                    edges(index, handler.target);
                    self.merge_into(
                        &mut frames,
                        handler.target,
                        &catch_frame,
                        &mut worklist,
                        &mut in_worklist,
                    )?;
                }
            }
        }

        Ok(Frames {
            ids,
            frames,
            positions,
        })
    }

    fn merge_into(
        &mut self,
        frames: &mut [Option<Frame<I::Value>>],
        index: usize,
        frame: &Frame<I::Value>,
        worklist: &mut Vec<usize>,
        in_worklist: &mut [bool],
    ) -> Result<()> {
        let changed = if let Some(existing) = frames[index].as_mut() {
            existing.merge(frame, &mut self.interpreter)?
        } else {
            frames[index] = Some(frame.clone());
            true
        };
        if changed && !in_worklist[index] {
            in_worklist[index] = true;
            worklist.push(index);
        }
        Ok(())
    }

    fn entry_frame(&mut self, method: &MethodEntry, code: &Code) -> Result<Frame<I::Value>> {
        let desc = method.descriptor()?;
        let arguments = usize::from(method.arguments_size()?);
        let used = code
            .insns
            .iter()
            .filter_map(|(_, insn)| match insn {
                Insn::Var { opcode, var } => {
                    let wide = matches!(*opcode, LLOAD | DLOAD | LSTORE | DSTORE);
                    Some(usize::from(*var) + if wide { 2 } else { 1 })
                }
                Insn::Iinc { var, .. } => Some(usize::from(*var) + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let size = usize::from(code.max_locals).max(arguments).max(used);

        let mut locals = Vec::with_capacity(size);
        let mut slot: u16 = 0;
        if !method.is_static() {
            locals.push(self.interpreter.new_parameter(BasicType::Reference, slot));
            slot += 1;
        }
        for arg in &desc.args {
            let ty = BasicType::of(arg)?;
            locals.push(self.interpreter.new_parameter(ty, slot));
            slot += 1;
            if ty.size() == 2 {
                locals.push(self.interpreter.new_value(None));
                slot += 1;
            }
        }
        while locals.len() < size {
            locals.push(self.interpreter.new_value(None));
        }
        Ok(Frame::new(locals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::reachability::{BasicValue, ReachabilityInterpreter},
        assembly::InsnBuilder,
        model::MethodAccessFlags,
    };

    fn method(desc: &str, code: Code) -> MethodEntry {
        MethodEntry::new("m", desc, MethodAccessFlags::STATIC).with_code(code)
    }

    #[test]
    fn test_dead_code_has_no_frame() {
        let code = InsnBuilder::new()
            .iload(0)
            .ireturn()
            .iconst(1)
            .ireturn()
            .build()
            .unwrap();
        let m = method("(I)I", code);
        let frames = Analyzer::new(ReachabilityInterpreter)
            .analyze("a", &m)
            .unwrap();

        assert_eq!(frames.len(), 4);
        assert!(frames.at(0).is_some());
        assert!(frames.at(1).is_some());
        assert!(frames.at(2).is_none());
        assert_eq!(frames.unreachable().count(), 2);
        assert_eq!(frames.at(1).unwrap().peek(0), Some(&BasicValue::Int));
    }

    #[test]
    fn test_branch_edges_reported() {
        let code = InsnBuilder::new()
            .iload(0)
            .ifeq("zero")
            .iconst(1)
            .ireturn()
            .label("zero")
            .iconst(0)
            .ireturn()
            .build()
            .unwrap();
        let m = method("(I)I", code);
        let mut edges = Vec::new();
        let frames = Analyzer::new(ReachabilityInterpreter)
            .analyze_with("a", &m, &mut |from, to| edges.push((from, to)))
            .unwrap();

        assert_eq!(frames.unreachable().count(), 0);
        assert!(edges.contains(&(1, 2)));
        assert!(edges.contains(&(1, 4)));
        assert!(edges.contains(&(4, 5)));
    }

    #[test]
    fn test_handler_frame() {
        let code = InsnBuilder::new()
            .label("start")
            .aload(0)
            .athrow()
            .label("end")
            .label("handler")
            .astore(0)
            .return_()
            .try_catch("start", "end", "handler", Some("java/lang/Exception"))
            .build()
            .unwrap();
        let m = method("(Ljava/lang/Object;)V", code);
        let frames = Analyzer::new(ReachabilityInterpreter)
            .analyze("a", &m)
            .unwrap();

        let handler = frames.at(4).unwrap();
        assert_eq!(handler.stack_len(), 1);
        assert_eq!(handler.peek(0), Some(&BasicValue::Reference));
        assert!(frames.at(3).is_none());
    }

    #[test]
    fn test_falling_off_the_end() {
        let code = InsnBuilder::new().iconst(1).pop().build().unwrap();
        let m = method("()V", code);
        let result = Analyzer::new(ReachabilityInterpreter).analyze("a", &m);
        match result {
            Err(Error::Analysis { method, message }) => {
                assert_eq!(method, "a.m()V");
                assert!(message.contains("falls off"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_iteration_budget() {
        let code = InsnBuilder::new()
            .label("loop")
            .iinc(0, 1)
            .goto("loop")
            .build()
            .unwrap();
        let m = method("(I)V", code);
        let result = Analyzer::new(ReachabilityInterpreter)
            .with_max_iterations(2)
            .analyze("a", &m);
        assert!(matches!(result, Err(Error::Analysis { .. })));
    }

    #[test]
    fn test_declared_max_stack_is_enforced() {
        let code = InsnBuilder::new()
            .iconst(1)
            .iconst(2)
            .iadd()
            .ireturn()
            .maxs(1, 0)
            .build()
            .unwrap();
        let m = method("()I", code);
        match Analyzer::new(ReachabilityInterpreter).analyze("a", &m) {
            Err(Error::Analysis { message, .. }) => assert!(message.contains("max_stack 1")),
            other => panic!("unexpected {other:?}"),
        }

        let frames = Analyzer::new(ReachabilityInterpreter)
            .with_max_stack_enforced(false)
            .analyze("a", &m)
            .unwrap();
        assert_eq!(frames.at(2).unwrap().stack_len(), 2);

        let mut exact = m.clone();
        exact.code.as_mut().unwrap().max_stack = 2;
        assert!(Analyzer::new(ReachabilityInterpreter).analyze("a", &exact).is_ok());
    }

    #[test]
    fn test_instance_receiver_and_wide_params() {
        let code = InsnBuilder::new().lload(1).lreturn().build().unwrap();
        let m = MethodEntry::new("m", "(JI)J", MethodAccessFlags::PUBLIC).with_code(code);
        let frames = Analyzer::new(ReachabilityInterpreter)
            .analyze("a", &m)
            .unwrap();
        let entry = frames.at(0).unwrap();
        assert_eq!(entry.locals_len(), 4);
        assert_eq!(entry.local(0), Some(&BasicValue::Reference));
        assert_eq!(entry.local(1), Some(&BasicValue::Long));
        assert_eq!(entry.local(2), Some(&BasicValue::Uninitialized));
        assert_eq!(entry.local(3), Some(&BasicValue::Int));
    }
}
