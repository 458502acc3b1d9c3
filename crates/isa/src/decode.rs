//! Device instruction decoding
//!
//! Decodes raw kernel code into structured [`Instr`] values. Decoding is
//! deterministic and total over the supported opcode set: every
//! malformation is a typed [`DecodeError`] naming the byte offset, and a
//! single bad word fails the whole function (a partially decoded kernel
//! cannot be instrumented safely).
//!
//! # Word layout
//!
//! One instruction per 16-byte little-endian word:
//!
//! ```text
//! byte 0      opcode id
//! byte 1      guard: bit7 present, bit6 negated, bits0..2 predicate reg
//! byte 2      bits0..1 operand count, bit7 extended, rest reserved
//! byte 3      memory access size in bytes
//! bytes 4..16 three operand slots: [descriptor, a_lo, a_hi, b]
//!             descriptor: bits0..2 kind, bit3 negated, bit4 absolute
//! ```
//!
//! Reserved bits and unused operand slots must be zero.

use crate::{
    instr::{Instr, Operand, OperandKind, Predicate, SpecialReg, MAX_OPERANDS, RZ, WORD_BYTES},
    opcode::{OpClass, OpcodeInfo},
};

/// Errors that can occur during decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("code size {size} is not a multiple of the {WORD_BYTES}-byte instruction word")]
    UnalignedCode { size: usize },

    #[error("unknown opcode {id:#04x} at offset {offset:#x}")]
    UnknownOpcode { offset: u32, id: u8 },

    #[error("reserved bits set at offset {offset:#x}")]
    ReservedBits { offset: u32 },

    #[error("{mnemonic} at offset {offset:#x} has {count} operands, expected {expected}")]
    BadOperandCount {
        offset: u32,
        mnemonic: &'static str,
        count: usize,
        expected: usize,
    },

    #[error("operand {slot} of {mnemonic} at offset {offset:#x} has an incompatible kind")]
    BadOperand {
        offset: u32,
        mnemonic: &'static str,
        slot: usize,
    },

    #[error("invalid access size {size} for {mnemonic} at offset {offset:#x}")]
    BadAccessSize {
        offset: u32,
        mnemonic: &'static str,
        size: u8,
    },

    #[error("branch at offset {offset:#x} targets {target:#x}, outside the function")]
    BranchOutOfRange { offset: u32, target: i64 },
}

/// Decode a whole function from its raw code bytes.
///
/// Offsets and sequence indices of the returned instructions strictly
/// increase; direct branch and call targets are validated to land inside
/// the function.
pub fn decode_function(code: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    if code.len() % WORD_BYTES != 0 {
        return Err(DecodeError::UnalignedCode { size: code.len() });
    }

    let mut instructions = Vec::with_capacity(code.len() / WORD_BYTES);

    for (i, chunk) in code.chunks_exact(WORD_BYTES).enumerate() {
        let offset = (i * WORD_BYTES) as u32;
        let word: [u8; WORD_BYTES] = chunk.try_into().expect("chunks_exact");
        let instr = decode_word(&word, offset, i as u32)?;

        // Direct transfer targets must stay inside the function.
        if matches!(instr.op.class, OpClass::Branch | OpClass::Call) {
            let rel = match instr.operands[0].kind {
                OperandKind::Imm(rel) => rel as i64,
                _ => unreachable!("shape validated"),
            };
            let target = offset as i64 + rel * WORD_BYTES as i64;
            if target < 0 || target >= code.len() as i64 {
                return Err(DecodeError::BranchOutOfRange { offset, target });
            }
        }

        instructions.push(instr);
    }

    Ok(instructions)
}

/// Decode a single instruction word at the given offset.
pub fn decode_word(word: &[u8; WORD_BYTES], offset: u32, index: u32) -> Result<Instr, DecodeError> {
    let op = OpcodeInfo::from_id(word[0]).ok_or(DecodeError::UnknownOpcode {
        offset,
        id: word[0],
    })?;

    let guard = decode_guard(word[1], offset)?;

    if word[2] & 0b0111_1100 != 0 {
        return Err(DecodeError::ReservedBits { offset });
    }
    let count = (word[2] & 0b11) as usize;
    let extended = word[2] & 0b1000_0000 != 0;
    let access_size = word[3];

    let mut operands = Vec::with_capacity(count);
    for slot in 0..MAX_OPERANDS {
        let bytes = &word[4 + 4 * slot..8 + 4 * slot];
        if slot >= count {
            if bytes.iter().any(|&b| b != 0) {
                return Err(DecodeError::ReservedBits { offset });
            }
            continue;
        }
        operands.push(decode_operand(bytes, op, offset, slot)?);
    }

    validate_shape(op, &operands, offset)?;
    validate_memory(op, &operands, extended, access_size, offset)?;

    Ok(Instr {
        offset,
        index,
        op,
        guard,
        operands,
        extended,
        access_size,
        raw: *word,
    })
}

fn decode_guard(byte: u8, offset: u32) -> Result<Option<Predicate>, DecodeError> {
    if byte & 0x80 == 0 {
        // No guard: the whole byte must be clear.
        if byte != 0 {
            return Err(DecodeError::ReservedBits { offset });
        }
        return Ok(None);
    }
    if byte & 0b0011_1000 != 0 {
        return Err(DecodeError::ReservedBits { offset });
    }
    Ok(Some(Predicate {
        reg: byte & 0b111,
        negated: byte & 0x40 != 0,
    }))
}

fn decode_operand(
    bytes: &[u8],
    op: &'static OpcodeInfo,
    offset: u32,
    slot: usize,
) -> Result<Operand, DecodeError> {
    let desc = bytes[0];
    if desc & 0b1110_0000 != 0 {
        return Err(DecodeError::ReservedBits { offset });
    }
    let a = u16::from_le_bytes([bytes[1], bytes[2]]);
    let b = bytes[3];

    let bad = || DecodeError::BadOperand {
        offset,
        mnemonic: op.mnemonic,
        slot,
    };

    let kind = match desc & 0b111 {
        0 => {
            if b != 0 {
                return Err(bad());
            }
            OperandKind::Imm(a as i16 as i32)
        }
        1 => {
            if a > RZ as u16 || b != 0 {
                return Err(bad());
            }
            OperandKind::Reg(a as u8)
        }
        2 => {
            if a > 7 || b != 0 {
                return Err(bad());
            }
            OperandKind::Pred(a as u8)
        }
        3 => OperandKind::CBank { bank: b, offset: a },
        4 => {
            if b != 0 {
                return Err(bad());
            }
            let sr = u8::try_from(a).ok().and_then(SpecialReg::from_id);
            OperandKind::SReg(sr.ok_or_else(bad)?)
        }
        5 => {
            // Register pair base: must be even and leave room for the pair.
            if a > 253 || a % 2 != 0 || b != 0 {
                return Err(bad());
            }
            OperandKind::BReg(a as u8)
        }
        6 => OperandKind::MRef {
            base: b,
            offset: a as i16,
        },
        _ => return Err(bad()),
    };

    let negated = desc & 0b0000_1000 != 0;
    let absolute = desc & 0b0001_0000 != 0;

    // Modifier flags only make sense on value operands.
    if (negated || absolute)
        && matches!(
            kind,
            OperandKind::Pred(_) | OperandKind::BReg(_) | OperandKind::MRef { .. }
        )
    {
        return Err(bad());
    }

    Ok(Operand {
        kind,
        negated,
        absolute,
    })
}

/// Check operand count and kinds against the opcode class.
fn validate_shape(
    op: &'static OpcodeInfo,
    operands: &[Operand],
    offset: u32,
) -> Result<(), DecodeError> {
    use OperandKind as K;

    let expected = match op.class {
        OpClass::Misc | OpClass::Exit | OpClass::Ret => 0,
        OpClass::Branch
        | OpClass::BranchIndex
        | OpClass::Call
        | OpClass::CallIndex
        | OpClass::PredRead
        | OpClass::PredWrite => 1,
        OpClass::Move
        | OpClass::MoveImm
        | OpClass::SpecialRead
        | OpClass::Load
        | OpClass::LoadConst
        | OpClass::Store => 2,
        OpClass::MoveInsert | OpClass::Alu | OpClass::Shift | OpClass::SetPred => 3,
    };
    if operands.len() != expected {
        return Err(DecodeError::BadOperandCount {
            offset,
            mnemonic: op.mnemonic,
            count: operands.len(),
            expected,
        });
    }

    let kind = |slot: usize| operands[slot].kind;
    let bad = |slot: usize| DecodeError::BadOperand {
        offset,
        mnemonic: op.mnemonic,
        slot,
    };

    let is_reg = |k: OperandKind| matches!(k, K::Reg(_));
    let is_imm = |k: OperandKind| matches!(k, K::Imm(_));

    match op.class {
        OpClass::Misc | OpClass::Exit | OpClass::Ret => {}
        OpClass::Branch | OpClass::Call => {
            if !is_imm(kind(0)) {
                return Err(bad(0));
            }
        }
        OpClass::BranchIndex | OpClass::CallIndex => {
            if !matches!(kind(0), K::BReg(_)) {
                return Err(bad(0));
            }
        }
        OpClass::Move => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !is_reg(kind(1)) && !is_imm(kind(1)) {
                return Err(bad(1));
            }
        }
        OpClass::MoveImm => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !is_imm(kind(1)) {
                return Err(bad(1));
            }
        }
        OpClass::MoveInsert => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !is_imm(kind(1)) {
                return Err(bad(1));
            }
            match kind(2) {
                K::Imm(hw) if (0..=1).contains(&hw) => {}
                _ => return Err(bad(2)),
            }
        }
        OpClass::SpecialRead => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !matches!(kind(1), K::SReg(_)) {
                return Err(bad(1));
            }
        }
        OpClass::PredRead | OpClass::PredWrite => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
        }
        OpClass::Alu => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !is_reg(kind(1)) {
                return Err(bad(1));
            }
            if !is_reg(kind(2)) && !is_imm(kind(2)) {
                return Err(bad(2));
            }
        }
        OpClass::Shift => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !is_reg(kind(1)) {
                return Err(bad(1));
            }
            match kind(2) {
                K::Imm(s) if (0..=31).contains(&s) => {}
                _ => return Err(bad(2)),
            }
        }
        OpClass::SetPred => {
            // PT is not writable.
            match kind(0) {
                K::Pred(p) if p <= 6 => {}
                _ => return Err(bad(0)),
            }
            if !is_reg(kind(1)) {
                return Err(bad(1));
            }
            if !is_reg(kind(2)) && !is_imm(kind(2)) {
                return Err(bad(2));
            }
        }
        OpClass::Load => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !matches!(kind(1), K::MRef { .. }) {
                return Err(bad(1));
            }
        }
        OpClass::LoadConst => {
            if !is_reg(kind(0)) {
                return Err(bad(0));
            }
            if !matches!(kind(1), K::CBank { .. }) {
                return Err(bad(1));
            }
        }
        OpClass::Store => {
            if !matches!(kind(0), K::MRef { .. }) {
                return Err(bad(0));
            }
            if !is_reg(kind(1)) {
                return Err(bad(1));
            }
        }
    }

    Ok(())
}

/// Check access size and the extended bit against the opcode.
fn validate_memory(
    op: &'static OpcodeInfo,
    operands: &[Operand],
    extended: bool,
    access_size: u8,
    offset: u32,
) -> Result<(), DecodeError> {
    let size_err = DecodeError::BadAccessSize {
        offset,
        mnemonic: op.mnemonic,
        size: access_size,
    };

    if !op.is_memory() {
        if access_size != 0 || extended {
            return Err(size_err);
        }
        return Ok(());
    }

    if !matches!(access_size, 1 | 2 | 4 | 8) {
        return Err(size_err);
    }
    if extended != (access_size == 8) {
        return Err(size_err);
    }

    if extended {
        // The data register of a 64-bit access is a pair base.
        let data_slot = if op.is_store() { 1 } else { 0 };
        match operands[data_slot].kind {
            OperandKind::Reg(r) if r % 2 == 0 && r <= 253 => {}
            _ => {
                return Err(DecodeError::BadOperand {
                    offset,
                    mnemonic: op.mnemonic,
                    slot: data_slot,
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode::Assembler, instr::SpecialReg};

    #[test]
    fn test_decode_nop() {
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x00;
        let instructions = decode_function(&word).unwrap();

        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].opcode(), "nop");
        assert_eq!(instructions[0].offset, 0);
        assert!(instructions[0].operands.is_empty());
    }

    #[test]
    fn test_decode_guarded_exit() {
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x01; // exit
        word[1] = 0b1100_0010; // @!P2
        let instructions = decode_function(&word).unwrap();

        let guard = instructions[0].guard.unwrap();
        assert_eq!(guard.reg, 2);
        assert!(guard.negated);
        assert!(instructions[0].is_conditional());
    }

    #[test]
    fn test_unknown_opcode() {
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0xee;
        let err = decode_function(&word).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownOpcode {
                offset: 0,
                id: 0xee
            }
        );
    }

    #[test]
    fn test_unaligned_code() {
        let code = [0u8; 20];
        let err = decode_function(&code).unwrap_err();
        assert!(matches!(err, DecodeError::UnalignedCode { size: 20 }));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        // Spare bit in byte 2
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x00;
        word[2] = 0b0000_0100;
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::ReservedBits { offset: 0 })
        ));

        // Garbage in an unused operand slot
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x00;
        word[9] = 1;
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::ReservedBits { offset: 0 })
        ));

        // Guard byte without the present bit must be clear
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x00;
        word[1] = 0b0000_0001;
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::ReservedBits { offset: 0 })
        ));
    }

    #[test]
    fn test_operand_kind_incompatible_with_class() {
        // "bra R4" — a branch with a register operand is malformed.
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x04; // bra
        word[2] = 1; // one operand
        word[4] = 1; // kind = REG
        word[5] = 4;
        let err = decode_function(&word).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadOperand {
                offset: 0,
                mnemonic: "bra",
                slot: 0
            }
        ));
    }

    #[test]
    fn test_operand_count_mismatch() {
        // "iadd R0, R1" — missing the third operand.
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x20; // iadd
        word[2] = 2;
        word[4] = 1; // REG R0
        word[8] = 1; // REG R1
        word[9] = 1;
        let err = decode_function(&word).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadOperandCount {
                mnemonic: "iadd",
                count: 2,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_branch_out_of_range() {
        // Backward branch from the first instruction.
        let mut asm = Assembler::new();
        asm.bra(-1);
        let err = decode_function(&asm.finish()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BranchOutOfRange {
                offset: 0,
                target: -16
            }
        ));
    }

    #[test]
    fn test_access_size_consistency() {
        // ldg with access size 3 is malformed.
        let mut word = [0u8; WORD_BYTES];
        word[0] = 0x31; // ldg
        word[2] = 2;
        word[3] = 3;
        word[4] = 1; // REG R0
        word[8] = 6; // MREF [R2+0]
        word[11] = 2;
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::BadAccessSize {
                mnemonic: "ldg",
                size: 3,
                ..
            })
        ));

        // Access size 8 without the extended bit is malformed.
        word[3] = 8;
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::BadAccessSize { .. })
        ));

        // Extended 64-bit access with an odd data register is malformed.
        word[2] |= 0b1000_0000;
        word[5] = 5; // R5 cannot be a pair base
        assert!(matches!(
            decode_function(&word),
            Err(DecodeError::BadOperand { slot: 0, .. })
        ));
    }

    #[test]
    fn test_offsets_and_indices_strictly_increase() {
        let mut asm = Assembler::new();
        asm.movi(0, 7);
        asm.iadd(1, 0, 0);
        asm.s2r(2, SpecialReg::Tid);
        asm.exit();
        let instructions = decode_function(&asm.finish()).unwrap();

        assert_eq!(instructions.len(), 4);
        for (i, pair) in instructions.windows(2).enumerate() {
            assert!(pair[0].offset < pair[1].offset);
            assert_eq!(instructions[i].index as usize, i);
        }
    }

    #[test]
    fn test_roundtrip_through_assembler() {
        let mut asm = Assembler::new();
        asm.guard(0, true);
        asm.ldg(4, 2, 16, 4);
        asm.stg(2, 0, 4, 4);
        asm.bra(-2);
        asm.exit();
        let code = asm.finish();
        let instructions = decode_function(&code).unwrap();

        assert_eq!(instructions[0].to_string(), "@!P0 ldg R4, [R2+0x10]");
        assert!(instructions[0].is_load());
        assert_eq!(instructions[0].access_size, 4);
        assert!(instructions[1].is_store());
        assert_eq!(instructions[2].direct_target(), Some(0));
    }
}
