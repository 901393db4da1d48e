//! Fixture classes survive parse and re-encode

use hyfix_classfile::validate::check_integrity;
use hyfix_classfile::{access, disasm, ClassFile, Code, Insn, Opcode, WriteError};
use hyfix_test_utils as fixtures;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn all_fixtures() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("bed_manager", fixtures::bed_manager(true)),
        ("bed_manager_without_anchor", fixtures::bed_manager(false)),
        ("unrelated_system", fixtures::unrelated_system()),
        ("world", fixtures::world()),
        ("ticking_thread", fixtures::ticking_thread()),
        ("spawn_marker_entity", fixtures::spawn_marker_entity()),
        ("packet_handler", fixtures::packet_handler()),
        ("living_entity", fixtures::living_entity()),
        ("guarded_runner", fixtures::guarded_runner("t/Runner")),
        ("switch_dispatch", fixtures::switch_dispatch("t/Switch")),
    ]
}

#[test]
fn untouched_classes_are_byte_identical() {
    for (name, bytes) in all_fixtures() {
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.to_bytes().unwrap(), bytes, "{name}");
    }
}

#[test]
fn re_encoded_bodies_match_original_encoding() {
    for (name, bytes) in all_fixtures() {
        let mut class = ClassFile::parse(&bytes).unwrap();
        for method in &mut class.methods {
            method.code_mut();
        }
        assert_eq!(class.modified_methods().len(), class.methods.len(), "{name}");
        assert_eq!(class.to_bytes().unwrap(), bytes, "{name}");
    }
}

#[test]
fn fixtures_pass_deep_integrity_checks() {
    for (name, bytes) in all_fixtures() {
        let class = ClassFile::parse(&bytes).unwrap();
        let every: Vec<usize> = (0..class.methods.len()).collect();
        check_integrity(&class, &every).unwrap_or_else(|e| panic!("{name}: {e}"));
    }
}

#[test]
fn handler_and_frames_survive_parse() {
    let bytes = fixtures::guarded_runner("t/Runner");
    let class = ClassFile::parse(&bytes).unwrap();
    let index = class.find_method("run", "()V").unwrap();
    let code = class.methods[index].code().unwrap();

    assert_eq!(code.handlers.len(), 1);
    assert_eq!(code.frames.len(), 2);
    let handler = code.handlers[0].handler;
    assert!(code.frames.contains_key(&handler));

    let listing = disasm::disassemble(&class).unwrap();
    assert!(listing.contains("catch any"));
    assert!(listing.contains("[stack: java/lang/Throwable]"));
}

#[test]
fn wide_constants_keep_their_slots() {
    let bytes = fixtures::packet_handler();
    let listing = fixtures::listing(&bytes, "getOperationTimeoutThreshold", "()J");
    assert_eq!(
        listing,
        vec![
            "aload 0",
            "invokevirtual com/hypixel/hytale/server/core/io/PacketHandler.getAveragePing:()J",
            "l2d",
            "ldc2_w 2d",
            "dmul",
            "d2l",
            "ldc2_w 3000L",
            "ladd",
            "lreturn",
        ]
    );
}

#[test]
fn switches_and_wide_locals_decode() {
    let bytes = fixtures::switch_dispatch("t/Switch");
    assert_eq!(
        fixtures::listing(&bytes, "dispatch", "(I)I"),
        vec![
            "iload 0",
            "tableswitch {0: L0, 1: L1, 2: L2, default: L3}",
            "iload 0",
            "lookupswitch {-5: L1, 100: L2, default: L3}",
            "iload 0",
            "istore 300",
            "iinc 300 200",
            "iload 300",
            "ireturn",
            "iconst_2",
            "ireturn",
            "iconst_m1",
            "ireturn",
        ]
    );
    // wide iinc 300 by 200
    assert!(bytes.windows(6).any(|w| w == [0xc4_u8, 0x84, 0x01, 0x2c, 0x00, 0xc8]));
}

fn far_jump(op: Opcode) -> ClassFile {
    let mut class = fixtures::empty_class("t/Far");
    let mut code = Code::new(1);
    let far = code.new_label();
    code.insns = vec![Insn::jump(op, far)];
    code.insns.extend(std::iter::repeat(Insn::simple(Opcode::Nop)).take(40_000));
    code.insns.extend([Insn::Label(far), Insn::simple(Opcode::Return)]);
    class.add_method(access::PUBLIC, "far", "()V", code).unwrap();
    class
}

#[test]
fn short_branch_past_range_is_rejected() {
    let err = far_jump(Opcode::Goto).to_bytes().unwrap_err();
    assert!(matches!(err, WriteError::BranchOutOfRange { from: 0, .. }), "{err}");
}

#[test]
fn goto_w_reaches_past_short_range() {
    let bytes = far_jump(Opcode::GotoW).to_bytes().unwrap();
    let listing = fixtures::listing(&bytes, "far", "()V");
    assert_eq!(listing[0], "goto_w L0");
    assert_eq!(listing.len(), 40_002);
    assert_eq!(listing.last().map(String::as_str), Some("return"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every switch padding (0..=3 bytes) survives a shifted re-encode
    #[test]
    fn prologue_shifts_keep_switches_intact(nops in 1usize..=3) {
        let bytes = fixtures::switch_dispatch("t/Switch");
        let before = fixtures::listing(&bytes, "dispatch", "(I)I");

        let mut class = ClassFile::parse(&bytes).unwrap();
        let index = class.find_method("dispatch", "(I)I").unwrap();
        let code = class.methods[index].code_mut().unwrap();
        code.insert(0, std::iter::repeat(Insn::simple(Opcode::Nop)).take(nops));
        let shifted = class.to_bytes().unwrap();

        let mut expected = vec!["nop".to_owned(); nops];
        expected.extend(before);
        prop_assert_eq!(fixtures::listing(&shifted, "dispatch", "(I)I"), expected);

        let reparsed = ClassFile::parse(&shifted).unwrap();
        let every: Vec<usize> = (0..reparsed.methods.len()).collect();
        prop_assert!(check_integrity(&reparsed, &every).is_ok());
        prop_assert_eq!(reparsed.to_bytes().unwrap(), shifted);
    }
}
