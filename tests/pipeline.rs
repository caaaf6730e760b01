//! End-to-end tests of the deobfuscation engine.
//!
//! Every test builds its input with `InsnBuilder`, runs a [`DeobfuscationEngine`] over a
//! [`ClassGroup`] and checks the rewritten bodies and the recorded events.

use std::collections::BTreeSet;

use jarscope::{
    analysis::{Analyzer, BlockAnalyzer, ReachabilityInterpreter, DEFAULT_MAX_ITERATIONS},
    assembly::{
        opcodes::{IMUL, JSR, LMUL, RET},
        Code, Insn, InsnBuilder,
    },
    deobfuscation::{DeobfuscationEngine, EngineConfig, EventKind, PassKind},
    model::{ClassEntry, ClassGroup, FieldAccessFlags, FieldEntry, MethodAccessFlags, MethodEntry},
    utils::inverse_i32,
};

const ISE: &str = "java/lang/IllegalStateException";

fn group_of(methods: Vec<MethodEntry>) -> ClassGroup {
    let mut class = ClassEntry::new("a");
    class.methods = methods;
    ClassGroup::from_classes([class]).unwrap()
}

fn rendered(code: &Code) -> Vec<String> {
    code.insns.iter().map(|(_, insn)| insn.to_string()).collect()
}

fn body<'a>(group: &'a ClassGroup, class: &str, name: &str) -> &'a Code {
    group
        .class(class)
        .unwrap()
        .methods
        .iter()
        .find(|m| m.name == name)
        .and_then(|m| m.code.as_ref())
        .unwrap()
}

#[test]
fn test_dead_code_removal_is_idempotent() {
    let code = InsnBuilder::new()
        .iload(0)
        .ifeq("zero")
        .goto("end")
        .iconst(7)
        .pop()
        .label("zero")
        .iinc(0, 1)
        .label("end")
        .iload(0)
        .ireturn()
        .build()
        .unwrap();
    let mut group =
        group_of(vec![MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code)]);
    let engine = DeobfuscationEngine::new(EngineConfig::only(&[PassKind::DeadCode]));

    let first = engine.run(&mut group);
    assert_eq!(first.events.count_kind(EventKind::InstructionRemoved), 2);
    assert_eq!(body(&group, "a", "m").real_len(), 6);

    let second = engine.run(&mut group);
    assert_eq!(second.events.count_kind(EventKind::InstructionRemoved), 0);
    assert_eq!(second.total_transformations(), 0);
}

#[test]
fn test_no_live_instruction_is_removed() {
    let code = InsnBuilder::new()
        .iload(0)
        .tableswitch(0, "other", &["one", "two"])
        .label("one")
        .iconst(1)
        .ireturn()
        .label("two")
        .iconst(2)
        .ireturn()
        .label("other")
        .iconst(3)
        .ireturn()
        .iconst(4)
        .ireturn()
        .build()
        .unwrap();
    let method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);
    let mut group = group_of(vec![method]);

    let result =
        DeobfuscationEngine::new(EngineConfig::only(&[PassKind::DeadCode])).run(&mut group);
    assert_eq!(result.events.count_kind(EventKind::InstructionRemoved), 2);

    // every instruction left is reachable from the entry
    let method = &group.class("a").unwrap().methods[0];
    let frames = Analyzer::new(ReachabilityInterpreter)
        .analyze("a", method)
        .unwrap();
    assert!(frames.frames().iter().all(Option::is_some));
    assert_eq!(method.code.as_ref().unwrap().real_len(), 8);
}

#[test]
fn test_opaque_predicate_becomes_goto() {
    let code = InsnBuilder::new()
        .iload(0)
        .iconst(5)
        .if_icmpeq("ok")
        .new_(ISE)
        .dup()
        .invokespecial(ISE, "<init>", "()V")
        .athrow()
        .label("ok")
        .ireturn()
        .build()
        .unwrap();
    let mut group =
        group_of(vec![MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code)]);

    let result = DeobfuscationEngine::new(EngineConfig::only(&[PassKind::OpaquePredicates]))
        .run(&mut group);

    assert_eq!(result.events.count_kind(EventKind::OpaquePredicateRemoved), 1);
    assert_eq!(rendered(body(&group, "a", "m")), vec!["goto L0", "L0:", "ireturn"]);
}

#[test]
fn test_field_multiplier_is_cancelled() {
    assert_eq!(7_i32.wrapping_mul(inverse_i32(7).unwrap()), 1);

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
    let mut group = ClassGroup::from_classes([class]).unwrap();

    let result = DeobfuscationEngine::new(EngineConfig::default()).run(&mut group);

    assert_eq!(result.stats.multipliers_cancelled, 2);
    for method in &group.class("a").unwrap().methods {
        let code = method.code.as_ref().unwrap();
        assert!(
            !code
                .insns
                .iter()
                .any(|(_, insn)| matches!(insn, Insn::Op(IMUL | LMUL))),
            "{} still multiplies",
            method.name
        );
    }
    assert_eq!(
        rendered(body(&group, "a", "get")),
        vec!["aload 0", "getfield a.a I", "ireturn"]
    );
    assert!(group.class("a").unwrap().field("a", "I").is_some());
}

/// Net constant factor applied to the value stored by the first `putfield`.
fn stored_factor(code: &Code) -> i32 {
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| insn.is_real())
        .collect();
    let store = real
        .iter()
        .position(|insn| insn.to_string().starts_with("putfield"))
        .unwrap();
    real[..store]
        .windows(2)
        .filter(|pair| *pair[1] == Insn::op(IMUL))
        .filter_map(|pair| pair[0].int_value())
        .fold(1_i32, i32::wrapping_mul)
}

#[test]
fn test_unanalyzable_accessor_stays_consistent() {
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
    // the subroutine makes the setter unanalyzable
    class.methods.push(
        MethodEntry::new("set", "(I)V", MethodAccessFlags::empty()).with_code(
            InsnBuilder::new()
                .aload(0)
                .iload(1)
                .iconst(encoder)
                .imul()
                .putfield("a", "a", "I")
                .jump(JSR, "sub")
                .return_()
                .label("sub")
                .astore(2)
                .var(RET, 2)
                .build()
                .unwrap(),
        ),
    );
    let mut group = ClassGroup::from_classes([class]).unwrap();

    let result =
        DeobfuscationEngine::new(EngineConfig::only(&[PassKind::Multipliers])).run(&mut group);

    assert!(result.has_warnings());
    assert_eq!(
        rendered(body(&group, "a", "get")),
        vec!["aload 0", "getfield a.a I", "ireturn"]
    );
    // the getter reads the plain value, so the setter must store it unscaled
    assert_eq!(stored_factor(body(&group, "a", "set")), 1);
}

#[test]
fn test_field_read_through_subclass_is_kept() {
    let mut base = ClassEntry::new("a");
    base.fields.push(FieldEntry::new(
        "f",
        "I",
        FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
    ));
    base.fields
        .push(FieldEntry::new("g", "I", FieldAccessFlags::FINAL));
    let mut sub = ClassEntry::new("b");
    sub.super_name = Some("a".to_string());
    sub.methods.push(
        MethodEntry::new("m", "()I", MethodAccessFlags::PUBLIC).with_code(
            InsnBuilder::new()
                .aload(0)
                .getfield("b", "f", "I")
                .ireturn()
                .build()
                .unwrap(),
        ),
    );
    let mut group = ClassGroup::from_classes([base, sub]).unwrap();

    let result = DeobfuscationEngine::new(EngineConfig::default()).run(&mut group);

    let fields: Vec<&str> = group
        .class("a")
        .unwrap()
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(fields, vec!["f"]);
    assert_eq!(result.stats.fields_removed, 1);
}

#[test]
fn test_override_renamed_consistently() {
    let empty = || InsnBuilder::new().return_().build().unwrap();

    let mut base = ClassEntry::new("a");
    base.methods
        .push(MethodEntry::new("m", "()V", MethodAccessFlags::PUBLIC).with_code(empty()));
    let mut sub = ClassEntry::new("b");
    sub.super_name = Some("a".to_string());
    sub.methods
        .push(MethodEntry::new("m", "()V", MethodAccessFlags::PUBLIC).with_code(empty()));
    let mut group = ClassGroup::from_classes([base, sub]).unwrap();

    let result =
        DeobfuscationEngine::new(EngineConfig::only(&[PassKind::Rename])).run(&mut group);
    assert_eq!(result.stats.classes_renamed, 2);

    let base = group.class("class1").unwrap();
    let sub = group.class("class2").unwrap();
    assert_eq!(sub.super_name.as_deref(), Some("class1"));
    assert_eq!(base.methods[0].name, sub.methods[0].name);
    assert_ne!(base.methods[0].name, "m");
}

/// Edges between blocks, each block named by its first real instruction.
fn named_edges(blocks: &BlockAnalyzer, code: &Code) -> BTreeSet<(String, String)> {
    let nodes: Vec<&Insn> = code.insns.iter().map(|(_, insn)| insn).collect();
    let name = |block: usize| {
        let block = &blocks.blocks()[block];
        nodes[block.start..block.end]
            .iter()
            .find(|insn| insn.is_real())
            .map(ToString::to_string)
            .unwrap()
    };
    (0..blocks.len())
        .flat_map(|from| blocks.successors(from).map(move |to| (from, to)))
        .map(|(from, to)| (name(from), name(to)))
        .collect()
}

#[test]
fn test_straightening_keeps_blocks_and_edges() {
    let code = InsnBuilder::new()
        .iload(0)
        .iload(0)
        .ifeq("zero")
        .iconst(5)
        .iadd()
        .goto("middle")
        .label("tail")
        .iconst(2)
        .iadd()
        .ireturn()
        .label("middle")
        .iconst(1)
        .iadd()
        .goto("tail")
        .label("zero")
        .iconst(3)
        .iadd()
        .goto("tail")
        .build()
        .unwrap();
    let method = MethodEntry::new("m", "(I)I", MethodAccessFlags::STATIC).with_code(code);
    let before = BlockAnalyzer::analyze("a", &method, DEFAULT_MAX_ITERATIONS).unwrap();
    let edges_before = named_edges(&before, method.code.as_ref().unwrap());
    let real_before = method.code.as_ref().unwrap().real_len();
    let mut group = group_of(vec![method]);

    let result =
        DeobfuscationEngine::new(EngineConfig::only(&[PassKind::ControlFlow])).run(&mut group);
    assert_eq!(result.stats.methods_straightened, 1);

    let method = &group.class("a").unwrap().methods[0];
    let code = method.code.as_ref().unwrap();
    let after = BlockAnalyzer::analyze("a", method, DEFAULT_MAX_ITERATIONS).unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(named_edges(&after, code), edges_before);
    assert_eq!(edges_before.len(), 5);
    assert_eq!(code.real_len(), real_before);

    // middle now directly follows the block that jumps to it
    let real: Vec<String> = code
        .insns
        .iter()
        .filter(|(_, insn)| insn.is_real())
        .map(|(_, insn)| insn.to_string())
        .collect();
    let middle = real.iter().position(|r| r == "iconst_1").unwrap();
    assert_eq!(real[middle - 3], "iconst_5");
}

#[test]
fn test_faulting_method_is_isolated() {
    let falls_off = InsnBuilder::new().iconst(1).pop().build().unwrap();
    let dead_tail = InsnBuilder::new()
        .iload(0)
        .ireturn()
        .iconst(1)
        .ireturn()
        .build()
        .unwrap();
    let mut group = group_of(vec![
        MethodEntry::new("bad", "()V", MethodAccessFlags::STATIC).with_code(falls_off),
        MethodEntry::new("good", "(I)I", MethodAccessFlags::STATIC).with_code(dead_tail),
    ]);

    let result = DeobfuscationEngine::new(EngineConfig::minimal()).run(&mut group);

    assert!(result.has_warnings());
    assert_eq!(body(&group, "a", "bad").real_len(), 2);
    assert_eq!(body(&group, "a", "good").real_len(), 2);
}

#[test]
fn test_default_pipeline_cleans_guarded_accessor() {
    let code = InsnBuilder::new()
        .iload(1)
        .iconst(-3)
        .if_icmpne("ok")
        .new_(ISE)
        .dup()
        .invokespecial(ISE, "<init>", "()V")
        .athrow()
        .label("ok")
        .iload(0)
        .ireturn()
        .build()
        .unwrap();
    let mut group =
        group_of(vec![MethodEntry::new("m", "(II)I", MethodAccessFlags::STATIC).with_code(code)]);

    let result = DeobfuscationEngine::new(EngineConfig::default()).run(&mut group);

    assert_eq!(result.stats.opaque_predicates_removed, 1);
    let real: Vec<String> = body(&group, "a", "m")
        .insns
        .iter()
        .filter(|(_, insn)| insn.is_real())
        .map(|(_, insn)| insn.to_string())
        .collect();
    assert_eq!(real, vec!["iload 0", "ireturn"]);
    assert!(!result.summary().is_empty());
}
