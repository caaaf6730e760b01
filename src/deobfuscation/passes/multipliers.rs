//! Field multiplier cancellation and constant folding.
//!
//! The obfuscator stores `int` and `long` fields scrambled: every store multiplies the
//! value by an odd encoder `e`, and every load multiplies it back by the decoder
//! `d = e⁻¹`. The pass works in three steps:
//!
//! 1. **Discovery** (read-only, parallel): every field access followed or preceded by a
//!    multiplication with a constant votes for that field's decoder. The winner per field
//!    becomes its decoder.
//! 2. **Cancellation**: a counter-multiplication is inserted at every access, `d⁻¹` after
//!    loads and `d` before stores, so the field ends up holding the plain value.
//! 3. **Folding**: the [`ConstantInterpreter`] finds the chains of constant
//!    multiplications this produced and [`fold_multiplication`] collapses each chain into
//!    one constant, or removes it when the net factor is one.
//!
//! Cancellation is all or nothing per field: a field with any access of unexpected shape
//! keeps its multiplier everywhere. A method whose body cannot be analyzed in step 3 keeps
//! its counter-multiplications unfolded, which is correct but not simplified.

use std::collections::HashMap;

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;

use crate::{
    analysis::{fold_multiplication, unit_for, Analyzer, ConstantInterpreter, Expr},
    assembly::{
        opcodes::{
            DUP, DUP2, DUP2_X1, DUP2_X2, DUP_X1, DUP_X2, GETFIELD, GETSTATIC, I2L, IMUL, LMUL,
            PUTFIELD, PUTSTATIC,
        },
        Code, Insn, InsnId, InsnList,
    },
    deobfuscation::{
        config::PassKind,
        events::EventKind,
        pass::{for_each_method, PassContext, Transformer},
    },
    model::{ClassGroup, MethodEntry},
    utils::{inverse_i32, inverse_i64, is_invertible},
    Result,
};

/// Decoders of multiplied fields, keyed by `owner.name`.
///
/// Decoders of `int` fields are stored sign-extended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipliers {
    decoders: HashMap<String, i64>,
}

impl Multipliers {
    /// Decoder of `owner.name`.
    #[must_use]
    pub fn get(&self, owner: &str, name: &str) -> Option<i64> {
        self.decoders.get(&format!("{owner}.{name}")).copied()
    }

    /// Sets the decoder of `owner.name`.
    pub fn insert(&mut self, owner: &str, name: &str, decoder: i64) {
        self.decoders.insert(format!("{owner}.{name}"), decoder);
    }

    /// Number of fields with a decoder.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Returns `true` if no decoder was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

fn is_wide(desc: &str) -> Option<bool> {
    match desc {
        "I" => Some(false),
        "J" => Some(true),
        _ => None,
    }
}

fn constant(insn: &Insn, wide: bool) -> Option<i64> {
    if wide {
        insn.long_value()
    } else {
        insn.int_value().map(i64::from)
    }
}

fn decoder_of_encoder(encoder: i64, wide: bool) -> Option<i64> {
    if wide {
        inverse_i64(encoder)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        inverse_i32(encoder as i32).map(i64::from)
    }
}

/// Collects decoder votes over a whole group.
#[derive(Debug, Default)]
pub struct MultiplierFinder {
    votes: DashMap<String, HashMap<i64, usize>>,
}

impl MultiplierFinder {
    /// Creates a finder with no votes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn vote(&self, owner: &str, name: &str, decoder: i64) {
        if !is_invertible(decoder) || decoder == 1 || decoder == -1 {
            return;
        }
        *self
            .votes
            .entry(format!("{owner}.{name}"))
            .or_default()
            .entry(decoder)
            .or_insert(0) += 1;
    }

    fn vote_encoder(&self, owner: &str, name: &str, encoder: i64, wide: bool) {
        if !is_invertible(encoder) || encoder == 1 || encoder == -1 {
            return;
        }
        if let Some(decoder) = decoder_of_encoder(encoder, wide) {
            self.vote(owner, name, decoder);
        }
    }

    /// Records the votes of one method body.
    pub fn scan(&self, code: &Code) {
        let nodes: Vec<&Insn> = code
            .insns
            .iter()
            .map(|(_, insn)| insn)
            .filter(|insn| !matches!(insn, Insn::Line(_)))
            .collect();
        let at = |index: Option<usize>| index.and_then(|i| nodes.get(i).copied());

        for (index, insn) in nodes.iter().enumerate() {
            let Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } = insn
            else {
                continue;
            };
            let Some(wide) = is_wide(desc) else {
                continue;
            };
            let mul = Insn::op(if wide { LMUL } else { IMUL });
            let before = |n: usize| at(index.checked_sub(n));
            let after = |n: usize| at(Some(index + n));

            match *opcode {
                GETFIELD | GETSTATIC => {
                    // get; push c; mul
                    if after(2) == Some(&mul) {
                        if let Some(c) = after(1).and_then(|i| constant(i, wide)) {
                            self.vote(owner, name, c);
                        }
                    }
                    // push c; get; mul
                    if after(1) == Some(&mul) {
                        if let Some(c) = before(1).and_then(|i| constant(i, wide)) {
                            self.vote(owner, name, c);
                        }
                    }
                }
                PUTFIELD | PUTSTATIC => {
                    // push c; mul; [dup*]; put
                    let skip = usize::from(before(1).is_some_and(|i| {
                        matches!(i, Insn::Op(DUP | DUP_X1 | DUP_X2 | DUP2 | DUP2_X1 | DUP2_X2))
                    }));
                    if before(1 + skip) == Some(&mul) {
                        if let Some(c) = before(2 + skip).and_then(|i| constant(i, wide)) {
                            self.vote_encoder(owner, name, c, wide);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Picks each field's decoder: the most votes, then the smallest magnitude, then the
    /// smallest value.
    #[must_use]
    pub fn decoders(&self) -> Multipliers {
        let mut multipliers = Multipliers::default();
        for entry in &self.votes {
            let best = entry
                .value()
                .iter()
                .min_by_key(|(value, count)| (std::cmp::Reverse(**count), value.unsigned_abs(), **value))
                .map(|(value, _)| *value);
            if let Some(decoder) = best {
                multipliers.decoders.insert(entry.key().clone(), decoder);
            }
        }
        multipliers
    }

    /// Scans every method of `group` in parallel and returns the decoders.
    #[must_use]
    pub fn find(group: &ClassGroup) -> Multipliers {
        let finder = MultiplierFinder::new();
        group.par_iter().for_each(|class| {
            for code in class.methods.iter().filter_map(|m| m.code.as_ref()) {
                finder.scan(code);
            }
        });
        finder.decoders()
    }
}

fn prev_insn(insns: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut current = insns.prev(id);
    while let Some(node) = current {
        if !matches!(insns[node], Insn::Line(_)) {
            return Some(node);
        }
        current = insns.prev(node);
    }
    None
}

/// A counter-multiplication `(constant, mul)`.
fn factor(value: i64, wide: bool) -> [Insn; 2] {
    if wide {
        [Insn::load_long(value), Insn::op(LMUL)]
    } else {
        #[allow(clippy::cast_possible_truncation)]
        [Insn::load_int(value as i32), Insn::op(IMUL)]
    }
}

fn inverse(value: i64, wide: bool) -> Option<i64> {
    decoder_of_encoder(value, wide)
}

/// How one access to a multiplied field is cancelled.
enum Site {
    /// Not an access to a field with a decoder.
    Untouched,
    /// An access the pass cannot rewrite.
    Blocked,
    /// Counter-multiplication inserted after the node.
    After(InsnId, [Insn; 2]),
    /// Encoder multiplication inserted before the store.
    Before(InsnId, [Insn; 2]),
    /// Chained store: the decoder before the `dup`, its inverse after the store.
    Chained {
        dup: InsnId,
        store: InsnId,
        decoder: [Insn; 2],
        inverted: [Insn; 2],
    },
}

fn plan_site(insns: &InsnList, id: InsnId, multipliers: &Multipliers) -> Site {
    let Insn::Field {
        opcode,
        owner,
        name,
        desc,
    } = &insns[id]
    else {
        return Site::Untouched;
    };
    let Some(wide) = is_wide(desc) else {
        return Site::Untouched;
    };
    let Some(decoder) = multipliers.get(owner, name) else {
        return Site::Untouched;
    };
    let Some(inverted) = inverse(decoder, wide) else {
        return Site::Blocked;
    };

    match *opcode {
        GETFIELD | GETSTATIC => {
            let widened = insns
                .next_insn(id)
                .filter(|next| !wide && insns[*next] == Insn::op(I2L));
            match widened {
                Some(i2l) => inverse_i64(decoder)
                    .map_or(Site::Blocked, |long_inverse| {
                        Site::After(i2l, factor(long_inverse, true))
                    }),
                None => Site::After(id, factor(inverted, wide)),
            }
        }
        PUTFIELD | PUTSTATIC => {
            let chained = match (*opcode, wide) {
                (PUTFIELD, false) => DUP_X1,
                (PUTFIELD, true) => DUP2_X1,
                (_, false) => DUP,
                (_, true) => DUP2,
            };
            let prev = prev_insn(insns, id);
            let prev_op = prev.and_then(|p| match insns[p] {
                Insn::Op(op) => Some(op),
                _ => None,
            });
            match (prev, prev_op) {
                (Some(dup), Some(op)) if op == chained => Site::Chained {
                    dup,
                    store: id,
                    decoder: factor(decoder, wide),
                    inverted: factor(inverted, wide),
                },
                (_, Some(DUP | DUP_X1 | DUP_X2 | DUP2 | DUP2_X1 | DUP2_X2)) => Site::Blocked,
                _ => Site::Before(id, factor(decoder, wide)),
            }
        }
        _ => Site::Untouched,
    }
}

impl Multipliers {
    /// Drops the decoder of every field with an access [`MultiplierRemover::cancel`]
    /// would have to skip, so no field ends up cancelled at some accesses only.
    ///
    /// Returns the number of decoders dropped.
    pub fn retain_cancellable(&mut self, group: &ClassGroup) -> usize {
        let blocked: DashSet<String> = DashSet::new();
        let multipliers: &Multipliers = self;
        group.par_iter().for_each(|class| {
            for code in class.methods.iter().filter_map(|m| m.code.as_ref()) {
                for (id, insn) in code.insns.iter() {
                    if let (Site::Blocked, Insn::Field { owner, name, .. }) =
                        (plan_site(&code.insns, id, multipliers), insn)
                    {
                        blocked.insert(format!("{owner}.{name}"));
                    }
                }
            }
        });
        let blocked: Vec<String> = blocked.into_iter().collect();
        for key in &blocked {
            log::debug!("Keeping multiplier of {}: an access cannot be cancelled", key);
            self.decoders.remove(key);
        }
        blocked.len()
    }
}

impl MultiplierRemover {
    /// Inserts counter-multiplications around every access to a field with a decoder.
    /// Returns the number of access sites rewritten.
    ///
    /// Accesses with an unexpected stack shape are skipped; run
    /// [`Multipliers::retain_cancellable`] first to keep every field consistent.
    pub fn cancel(code: &mut Code, multipliers: &Multipliers) -> usize {
        let sites: Vec<Site> = code
            .insns
            .iter()
            .filter(|(_, insn)| matches!(insn, Insn::Field { .. }))
            .map(|(id, _)| plan_site(&code.insns, id, multipliers))
            .collect();

        let mut cancelled = 0;
        for site in sites {
            match site {
                Site::Untouched => continue,
                Site::Blocked => {
                    log::debug!("Skipping field access with unexpected stack shape");
                    continue;
                }
                Site::After(id, counter) => {
                    code.insert_after(id, counter);
                }
                Site::Before(id, encoder) => {
                    code.insert_before(id, encoder);
                }
                Site::Chained {
                    dup,
                    store,
                    decoder,
                    inverted,
                } => {
                    code.insert_before(dup, decoder);
                    code.insert_after(store, inverted);
                }
            }
            cancelled += 1;
        }
        // 0 stays unknown
        if cancelled > 0 && code.max_stack > 0 {
            code.max_stack = code.max_stack.saturating_add(2);
        }
        cancelled
    }

    /// Folds the constant multiplication chains of one method. Returns how many chains
    /// changed the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Analysis`] if the body cannot be analyzed; nothing is
    /// edited in that case.
    pub fn fold(owner: &str, method: &mut MethodEntry, max_iterations: usize) -> Result<usize> {
        let mut analyzer =
            Analyzer::new(ConstantInterpreter::new()).with_max_iterations(max_iterations);
        analyzer.analyze(owner, method)?;
        let multiplications = analyzer.into_interpreter().constant_multiplications();
        let Some(code) = method.code.as_mut() else {
            return Ok(0);
        };

        let mut touched: Vec<InsnId> = Vec::new();
        let mut folded = 0;
        for mul in &multiplications {
            let mut ids = Vec::new();
            collect_ids(mul, &mut ids);
            if ids
                .iter()
                .any(|id| !code.insns.contains(*id) || touched.contains(id))
            {
                continue;
            }
            let Some(unit) = mul.insn().and_then(|id| unit_for(&code.insns[id])) else {
                continue;
            };
            if fold_multiplication(code, mul, unit) > 0 {
                folded += 1;
            }
            touched.extend(ids);
        }
        Ok(folded)
    }
}

fn collect_ids(expr: &Expr, ids: &mut Vec<InsnId>) {
    match expr {
        Expr::Var { .. } => {}
        Expr::Const { insn, .. } => ids.push(*insn),
        Expr::Mul { insn, a, b } | Expr::Add { insn, a, b } => {
            ids.push(*insn);
            collect_ids(a, ids);
            collect_ids(b, ids);
        }
    }
}

/// Cancels field multipliers and folds the resulting constant arithmetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiplierRemover;

impl Transformer for MultiplierRemover {
    fn name(&self) -> &'static str {
        "MultiplierRemover"
    }

    fn kind(&self) -> PassKind {
        PassKind::Multipliers
    }

    fn priority(&self) -> u32 {
        10
    }

    fn description(&self) -> &'static str {
        "Cancels field value multipliers and folds constant multiplications"
    }

    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>) {
        let mut multipliers = MultiplierFinder::find(group);
        let dropped = multipliers.retain_cancellable(group);
        log::info!(
            "Found {} primitive field multipliers ({} left in place).",
            multipliers.len(),
            dropped
        );

        let max_iterations = ctx.config.max_analysis_iterations;
        for_each_method(group, ctx, |owner, method| {
            let cancelled = method
                .code
                .as_mut()
                .map_or(0, |code| Self::cancel(code, &multipliers));
            for _ in 0..cancelled {
                ctx.record_in(self, EventKind::MultiplierCancelled, owner, method);
            }

            // cancellation stands on its own; a failed fold leaves the products in place
            match Self::fold(owner, method, max_iterations) {
                Ok(folded) => {
                    for _ in 0..folded {
                        ctx.record_in(self, EventKind::ConstantFolded, owner, method);
                    }
                }
                Err(error) => ctx.fault(self, owner, method, &error),
            }
        });

        log::info!(
            "Completed removal of {} multipliers.",
            ctx.events
                .filter_pass(self.name())
                .filter(|e| e.kind == EventKind::MultiplierCancelled)
                .count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InsnBuilder,
        deobfuscation::{config::EngineConfig, events::EventLog},
        model::{ClassEntry, FieldAccessFlags, FieldEntry, MethodAccessFlags},
    };

    fn has_mul(method: &MethodEntry) -> bool {
        method
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .any(|(_, insn)| matches!(insn, Insn::Op(IMUL | LMUL)))
    }

    fn scrambled_class() -> ClassEntry {
        let encoder = inverse_i32(7).unwrap();
        let mut class = ClassEntry::new("a");
        class
            .fields
            .push(FieldEntry::new("a", "I", FieldAccessFlags::PRIVATE));
        class.methods.push(
            MethodEntry::new("get", "()I", MethodAccessFlags::empty()).with_code(
                InsnBuilder::new()
                    .aload(0)
                    .getfield("a", "a", "I")
                    .iconst(7)
                    .imul()
                    .ireturn()
                    .build()
                    .unwrap(),
            ),
        );
        class.methods.push(
            MethodEntry::new("set", "(I)V", MethodAccessFlags::empty()).with_code(
                InsnBuilder::new()
                    .aload(0)
                    .iload(1)
                    .iconst(encoder)
                    .imul()
                    .putfield("a", "a", "I")
                    .return_()
                    .build()
                    .unwrap(),
            ),
        );
        class
    }

    #[test]
    fn test_finder_votes() {
        let group = ClassGroup::from_classes([scrambled_class()]).unwrap();
        let multipliers = MultiplierFinder::find(&group);
        assert_eq!(multipliers.len(), 1);
        assert_eq!(multipliers.get("a", "a"), Some(7));
        assert_eq!(multipliers.get("a", "b"), None);
    }

    #[test]
    fn test_tie_prefers_smaller_magnitude() {
        let finder = MultiplierFinder::new();
        finder.vote("a", "f", -5);
        finder.vote("a", "f", 3);
        finder.vote("a", "f", 1);
        finder.vote("a", "f", 4);
        assert_eq!(finder.decoders().get("a", "f"), Some(3));
        finder.vote("a", "f", -5);
        assert_eq!(finder.decoders().get("a", "f"), Some(-5));
    }

    #[test]
    fn test_scrambled_field_access_is_unscrambled() {
        let mut group = ClassGroup::from_classes([scrambled_class()]).unwrap();
        let config = EngineConfig::default();
        let events = EventLog::new();
        MultiplierRemover.transform(&mut group, &PassContext::new(&config, &events));

        let class = group.class("a").unwrap();
        for method in &class.methods {
            assert!(!has_mul(method), "{} still multiplies", method.name);
        }
        let get = class.method("get", "()I").unwrap();
        assert_eq!(get.code.as_ref().unwrap().real_len(), 3);
        assert_eq!(events.count_kind(EventKind::MultiplierCancelled), 2);
        assert_eq!(events.count_kind(EventKind::ConstantFolded), 2);
    }

    #[test]
    fn test_uncancellable_store_keeps_multiplier() {
        let encoder = inverse_i32(7).unwrap();
        let mut class = scrambled_class();
        class.methods.push(
            MethodEntry::new("reset", "(I)I", MethodAccessFlags::empty()).with_code(
                InsnBuilder::new()
                    .aload(0)
                    .iload(1)
                    .iconst(encoder)
                    .imul()
                    .dup()
                    .putfield("a", "a", "I")
                    .ireturn()
                    .build()
                    .unwrap(),
            ),
        );
        let mut group = ClassGroup::from_classes([class]).unwrap();

        let mut multipliers = MultiplierFinder::find(&group);
        assert_eq!(multipliers.get("a", "a"), Some(7));
        assert_eq!(multipliers.retain_cancellable(&group), 1);
        assert!(multipliers.is_empty());

        let config = EngineConfig::default();
        let events = EventLog::new();
        MultiplierRemover.transform(&mut group, &PassContext::new(&config, &events));
        assert_eq!(events.count_kind(EventKind::MultiplierCancelled), 0);
        for method in &group.class("a").unwrap().methods {
            assert!(has_mul(method), "{} lost its multiplier", method.name);
        }
    }

    #[test]
    fn test_chained_static_store() {
        let decoder = 0x2F5D_3B4F_u32 as i32 | 1;
        let encoder = inverse_i32(decoder).unwrap();
        let mut code = InsnBuilder::new()
            .iload(0)
            .iconst(encoder)
            .imul()
            .dup()
            .putstatic("a", "b", "I")
            .iconst(decoder)
            .imul()
            .ireturn()
            .build()
            .unwrap();
        let mut multipliers = Multipliers::default();
        multipliers.insert("a", "b", i64::from(decoder));

        assert_eq!(MultiplierRemover::cancel(&mut code, &multipliers), 1);
        let mut method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);
        assert_eq!(MultiplierRemover::fold("a", &mut method, 10_000).unwrap(), 1);

        let rendered: Vec<String> = method
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .map(|(_, insn)| insn.to_string())
            .collect();
        assert_eq!(rendered, vec!["iload 0", "dup", "putstatic a.b I", "ireturn"]);
    }

    #[test]
    fn test_widened_load_uses_long_inverse() {
        let mut code = InsnBuilder::new()
            .getstatic("a", "b", "I")
            .op(I2L)
            .lreturn()
            .build()
            .unwrap();
        let mut multipliers = Multipliers::default();
        multipliers.insert("a", "b", 3);
        MultiplierRemover::cancel(&mut code, &multipliers);
        let nodes: Vec<&Insn> = code.insns.iter().map(|(_, insn)| insn).collect();
        assert_eq!(nodes[1], &Insn::op(I2L));
        assert_eq!(nodes[2].long_value(), inverse_i64(3));
        assert_eq!(nodes[3], &Insn::op(LMUL));
    }

    #[test]
    fn test_unexpected_dup_is_skipped() {
        let mut code = InsnBuilder::new()
            .aload(0)
            .iload(1)
            .dup()
            .putfield("a", "b", "I")
            .ireturn()
            .build()
            .unwrap();
        let mut multipliers = Multipliers::default();
        multipliers.insert("a", "b", 5);
        assert_eq!(MultiplierRemover::cancel(&mut code, &multipliers), 0);
        assert_eq!(code.insns.len(), 5);
    }
}
