//! Class file and jar round trips through the public API.
//!
//! Classes are assembled with `InsnBuilder`, encoded with [`JvmCodec`] and decoded again;
//! the jar tests pack them with `zip`, run the engine and write the archive back.

use std::io::{Cursor, Write};

use jarscope::{
    assembly::{Code, Constant, InsnBuilder},
    classfile::{ClassCodec, JvmCodec},
    deobfuscation::{DeobfuscationEngine, EngineConfig},
    file::JarArchive,
    model::{ClassEntry, FieldAccessFlags, FieldEntry, MethodAccessFlags, MethodEntry},
    Error,
};
use zip::{write::SimpleFileOptions, ZipWriter};

fn opcodes(code: &Code) -> Vec<u8> {
    code.insns
        .iter()
        .filter_map(|(_, insn)| insn.opcode())
        .collect()
}

fn sample_class() -> ClassEntry {
    let mut class = ClassEntry::new("pkg/client");
    class.fields.push(FieldEntry::new(
        "count",
        "I",
        FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC,
    ));
    class.methods.push(
        MethodEntry::new("<init>", "()V", MethodAccessFlags::PUBLIC).with_code(
            InsnBuilder::new()
                .aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")
                .return_()
                .build()
                .unwrap(),
        ),
    );
    class.methods.push(
        MethodEntry::new("pick", "(I)Ljava/lang/String;", MethodAccessFlags::STATIC).with_code(
            InsnBuilder::new()
                .line(12)
                .iload(0)
                .lookupswitch("other", &[(-40, "neg"), (7, "seven"), (100_000, "big")])
                .label("neg")
                .ldc(Constant::String("negative".into()))
                .areturn()
                .label("seven")
                .ldc(Constant::String("seven".into()))
                .areturn()
                .label("big")
                .getstatic("pkg/client", "count", "I")
                .iconst(1)
                .iadd()
                .putstatic("pkg/client", "count", "I")
                .ldc(Constant::String("big".into()))
                .areturn()
                .label("other")
                .ldc(Constant::String("".into()))
                .areturn()
                .build()
                .unwrap(),
        ),
    );
    class.methods.push(
        MethodEntry::new("wide", "(J)J", MethodAccessFlags::STATIC).with_code(
            InsnBuilder::new()
                .label("start")
                .lload(0)
                .lconst(0x1234_5678_9ABC)
                .lmul()
                .lreturn()
                .label("end")
                .astore(2)
                .lconst(0)
                .lreturn()
                .try_catch("start", "end", "end", Some("java/lang/ArithmeticException"))
                .build()
                .unwrap(),
        ),
    );
    class
}

fn jar_of(classes: &[ClassEntry], resources: &[(&str, &[u8])]) -> Vec<u8> {
    let codec = JvmCodec::new();
    let options = SimpleFileOptions::default();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for class in classes {
        writer
            .start_file(format!("{}.class", class.name), options)
            .unwrap();
        writer.write_all(&codec.encode(class).unwrap()).unwrap();
    }
    for (name, data) in resources {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn test_class_roundtrip_preserves_bodies() {
    let class = sample_class();
    let codec = JvmCodec::new();
    let bytes = codec.encode(&class).unwrap();
    assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

    let decoded = codec.decode(&bytes).unwrap();
    assert_eq!(decoded.name, class.name);
    assert_eq!(decoded.super_name, class.super_name);
    assert_eq!(decoded.fields.len(), 1);
    assert_eq!(decoded.methods.len(), 3);

    for (before, after) in class.methods.iter().zip(&decoded.methods) {
        assert_eq!(before.name, after.name);
        assert_eq!(before.desc, after.desc);
        let (before, after) = (before.code.as_ref().unwrap(), after.code.as_ref().unwrap());
        assert_eq!(opcodes(before), opcodes(after));
        assert_eq!(before.try_catch_blocks.len(), after.try_catch_blocks.len());
    }

    let pick = decoded.method("pick", "(I)Ljava/lang/String;").unwrap();
    assert_eq!(pick.first_line(), Some(12));
    let wide = decoded.method("wide", "(J)J").unwrap().code.as_ref().unwrap();
    assert_eq!(wide.max_stack, 4);
    assert_eq!(
        wide.try_catch_blocks[0].catch_type.as_deref(),
        Some("java/lang/ArithmeticException")
    );

    // encoding is deterministic
    assert_eq!(codec.encode(&decoded).unwrap(), bytes);
}

#[test]
fn test_unanchored_label_is_rejected() {
    let mut class = sample_class();
    let mut code = InsnBuilder::new()
        .iload(0)
        .ifeq("zero")
        .label("zero")
        .return_()
        .build()
        .unwrap();
    // drop the label the branch points at
    let label = code
        .insns
        .iter()
        .find(|(_, insn)| insn.as_label().is_some())
        .map(|(id, _)| id)
        .unwrap();
    code.remove(label);
    class
        .methods
        .push(MethodEntry::new("broken", "(I)V", MethodAccessFlags::STATIC).with_code(code));

    assert!(matches!(
        JvmCodec::new().encode(&class),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn test_jar_roundtrip_after_deobfuscation() {
    let input = jar_of(
        &[sample_class(), ClassEntry::new("pkg/a")],
        &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n"), ("data/x.bin", &[0, 1, 2])],
    );

    let mut jar = JarArchive::from_bytes(input).unwrap();
    assert_eq!(jar.group().len(), 2);
    assert_eq!(jar.resources().len(), 2);

    let result = DeobfuscationEngine::new(EngineConfig::default().with_rename(true))
        .run(jar.group_mut());
    assert_eq!(result.stats.classes_renamed, 1);
    assert!(jar.group().class("pkg/class1").is_some());
    assert!(jar.group().class("pkg/client").is_some());

    let output = jar.to_bytes().unwrap();
    let again = JarArchive::from_bytes(output).unwrap();
    assert_eq!(again.group().len(), 2);
    assert!(again.group().class("pkg/class1").is_some());
    assert_eq!(again.resources(), jar.resources());
    assert_ne!(again.sha1(), jar.sha1());
}

#[test]
fn test_empty_and_truncated_inputs() {
    assert!(matches!(JarArchive::from_bytes(Vec::new()), Err(Error::Empty)));
    assert!(JvmCodec::new().decode(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]).is_err());
    assert!(JvmCodec::new().decode(b"not a class").is_err());
}
