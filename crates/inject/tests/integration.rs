//! Integration tests for the inject crate
//!
//! These exercise the materializer end to end at the instruction-stream
//! level: ordering of injected groups, marshalling shape, and behavior
//! under extreme code growth. Runtime behavior of the injected calls is
//! covered by the runtime crate's executor tests.

use std::collections::HashMap;

use inject::{materialize, DeviceGeneration, InjectionLedger, InsertPoint, MaterializeError};
use isa::{decode_function, Assembler, Instr, OperandKind, SpecialReg, WORD_BYTES};

fn exports(entries: &[(&str, u32)]) -> HashMap<String, u32> {
    entries
        .iter()
        .map(|(name, addr)| (name.to_string(), *addr))
        .collect()
}

fn two_instruction_kernel() -> Vec<u8> {
    let mut asm = Assembler::new();
    asm.s2r(0, SpecialReg::Tid);
    asm.exit();
    asm.finish()
}

/// Low 16 bits of the callee address loaded for the `callx` at `index`.
/// The call sequence ends `movi R2, lo; movk R2, hi, 1; movi R3, 0; callx`.
fn callee_lo16(decoded: &[Instr], callx_index: usize) -> i32 {
    match decoded[callx_index - 3].operands[1].kind {
        OperandKind::Imm(lo) => lo,
        other => panic!("expected immediate, got {other:?}"),
    }
}

#[test]
fn test_after_group_precedes_next_before_group() {
    let code = two_instruction_kernel();
    let instructions = decode_function(&code).unwrap();
    let mut ledger = InjectionLedger::new(instructions.len());
    ledger.insert_call(0, InsertPoint::After, "alpha").unwrap();
    ledger.insert_call(1, InsertPoint::Before, "beta").unwrap();

    let table = exports(&[("alpha", 0x0100_0000), ("beta", 0x0100_0040)]);
    let out = materialize(
        &instructions,
        &ledger,
        &table,
        DeviceGeneration::default(),
    )
    .unwrap();
    let decoded = decode_function(&out).unwrap();

    let callx_indices: Vec<usize> = decoded
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode() == "callx")
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(callx_indices.len(), 2);

    // The `After` call of instruction 0 is alpha; it must come first.
    assert_eq!(callee_lo16(&decoded, callx_indices[0]), 0x0000);
    assert_eq!(callee_lo16(&decoded, callx_indices[1]), 0x0040);

    // Strict separation: alpha's restore completes before beta's spill
    // begins, so a full save window sits between the two transfers.
    let between = &decoded[callx_indices[0] + 1..callx_indices[1]];
    let stores = between.iter().filter(|i| i.opcode() == "stl").count();
    let loads = between.iter().filter(|i| i.opcode() == "ldl").count();
    assert_eq!(stores, 13, "predicate mask + 12 window registers spilled");
    assert_eq!(loads, 13, "predicate mask + 12 window registers restored");
}

#[test]
fn test_constant_argument_marshalled_exactly() {
    let code = two_instruction_kernel();
    let instructions = decode_function(&code).unwrap();
    let mut ledger = InjectionLedger::new(instructions.len());
    ledger
        .insert_call(0, InsertPoint::Before, "probe")
        .unwrap()
        .arg_const_u32(42);

    let out = materialize(
        &instructions,
        &ledger,
        &exports(&[("probe", 0x0100_0000)]),
        DeviceGeneration::default(),
    )
    .unwrap();
    let decoded = decode_function(&out).unwrap();

    // The first parameter register receives exactly #42, via a single movi
    // (the high half is zero, so no movk is emitted for it).
    let marshal = decoded
        .iter()
        .find(|i| {
            i.opcode() == "movi" && i.operands[0].kind == OperandKind::Reg(4)
        })
        .expect("parameter marshalling instruction");
    assert_eq!(marshal.operands[1].kind, OperandKind::Imm(42));
}

#[test]
fn test_sequential_calls_keep_insertion_order_across_points() {
    let code = two_instruction_kernel();
    let instructions = decode_function(&code).unwrap();
    let mut ledger = InjectionLedger::new(instructions.len());
    ledger.insert_call(0, InsertPoint::Before, "one").unwrap();
    ledger.insert_call(0, InsertPoint::Before, "two").unwrap();
    ledger.insert_call(0, InsertPoint::After, "three").unwrap();

    let table = exports(&[
        ("one", 0x0100_0000),
        ("two", 0x0100_0010),
        ("three", 0x0100_0020),
    ]);
    let out = materialize(
        &instructions,
        &ledger,
        &table,
        DeviceGeneration::default(),
    )
    .unwrap();
    let decoded = decode_function(&out).unwrap();

    let lows: Vec<i32> = decoded
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode() == "callx")
        .map(|(idx, _)| callee_lo16(&decoded, idx))
        .collect();
    assert_eq!(lows, vec![0x0000, 0x0010, 0x0020]);

    // The original instruction sits between "two" and "three".
    let s2r_index = decoded.iter().position(|i| i.opcode() == "s2r").unwrap();
    let callx_indices: Vec<usize> = decoded
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode() == "callx")
        .map(|(idx, _)| idx)
        .collect();
    assert!(callx_indices[1] < s2r_index);
    assert!(s2r_index < callx_indices[2]);
}

#[test]
fn test_growth_overflows_relative_range() {
    // A forward branch that already spans almost the whole relative range;
    // two dozen injected calls behind it push the target out of reach.
    const SPAN: usize = 32_000;

    let mut asm = Assembler::new();
    asm.bra(SPAN as i16);
    for _ in 0..SPAN - 1 {
        asm.nop();
    }
    asm.exit();
    let code = asm.finish();

    let instructions = decode_function(&code).unwrap();
    let mut ledger = InjectionLedger::new(instructions.len());
    for _ in 0..24 {
        ledger.insert_call(1, InsertPoint::Before, "probe").unwrap();
    }

    let err = materialize(
        &instructions,
        &ledger,
        &exports(&[("probe", 0x0100_0000)]),
        DeviceGeneration::default(),
    )
    .unwrap_err();
    assert!(matches!(err, MaterializeError::OffsetRangeExceeded { .. }));
}

#[test]
fn test_moderate_growth_still_resolves() {
    const SPAN: usize = 1_000;

    let mut asm = Assembler::new();
    asm.bra(SPAN as i16);
    for _ in 0..SPAN - 1 {
        asm.nop();
    }
    asm.exit();
    let code = asm.finish();

    let instructions = decode_function(&code).unwrap();
    let mut ledger = InjectionLedger::new(instructions.len());
    for _ in 0..24 {
        ledger.insert_call(1, InsertPoint::Before, "probe").unwrap();
    }

    let out = materialize(
        &instructions,
        &ledger,
        &exports(&[("probe", 0x0100_0000)]),
        DeviceGeneration::default(),
    )
    .unwrap();
    let decoded = decode_function(&out).unwrap();

    // The branch still reaches the (relocated) exit-side target.
    let bra = decoded.iter().find(|i| i.opcode() == "bra").unwrap();
    let target = bra.direct_target().unwrap() as usize / WORD_BYTES;
    assert_eq!(decoded[target].opcode(), "exit");
}
