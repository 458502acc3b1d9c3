//! Device instruction encoding
//!
//! The [`Assembler`] emits 16-byte instruction words in the layout the
//! decoder expects. It is used by the materializer to synthesize injected
//! call sequences and by tests to construct kernels.

use crate::{
    instr::{SpecialReg, WORD_BYTES},
    opcode::{Compare, OpcodeInfo},
};

/// Operand in its encoding form.
#[derive(Clone, Copy)]
enum Op {
    Imm(i16),
    Reg(u8),
    Pred(u8),
    CBank { bank: u8, offset: u16 },
    SReg(u8),
    BReg(u8),
    MRef { base: u8, offset: i16 },
}

impl Op {
    fn encode(self) -> [u8; 4] {
        let (kind, a, b) = match self {
            Op::Imm(v) => (0u8, v as u16, 0u8),
            Op::Reg(r) => (1, r as u16, 0),
            Op::Pred(p) => (2, p as u16, 0),
            Op::CBank { bank, offset } => (3, offset, bank),
            Op::SReg(id) => (4, id as u16, 0),
            Op::BReg(r) => (5, r as u16, 0),
            Op::MRef { base, offset } => (6, offset as u16, base),
        };
        let [a_lo, a_hi] = a.to_le_bytes();
        [kind, a_lo, a_hi, b]
    }
}

/// Incremental instruction-stream assembler.
#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    pending_guard: Option<(u8, bool)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset the next emitted instruction will have.
    pub fn cursor(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Consume the assembler and return the encoded stream.
    pub fn finish(self) -> Vec<u8> {
        debug_assert!(self.pending_guard.is_none(), "dangling guard");
        self.code
    }

    /// Guard the next emitted instruction with `@Pn` (or `@!Pn`).
    pub fn guard(&mut self, reg: u8, negated: bool) -> &mut Self {
        self.pending_guard = Some((reg, negated));
        self
    }

    /// Append an already-encoded word unchanged.
    pub fn push_word(&mut self, word: &[u8; WORD_BYTES]) {
        debug_assert!(self.pending_guard.is_none(), "guard on raw word");
        self.code.extend_from_slice(word);
    }

    fn emit(&mut self, mnemonic: &'static str, size: u8, extended: bool, ops: &[Op]) {
        let op = OpcodeInfo::from_mnemonic(mnemonic).expect("mnemonic in opcode table");
        assert!(ops.len() <= 3);

        let mut word = [0u8; WORD_BYTES];
        word[0] = op.id;
        if let Some((reg, negated)) = self.pending_guard.take() {
            word[1] = 0x80 | ((negated as u8) << 6) | (reg & 0b111);
        }
        word[2] = ops.len() as u8 | ((extended as u8) << 7);
        word[3] = size;
        for (slot, operand) in ops.iter().enumerate() {
            word[4 + 4 * slot..8 + 4 * slot].copy_from_slice(&operand.encode());
        }
        self.code.extend_from_slice(&word);
    }

    // Control

    pub fn nop(&mut self) {
        self.emit("nop", 0, false, &[]);
    }

    pub fn exit(&mut self) {
        self.emit("exit", 0, false, &[]);
    }

    pub fn ret(&mut self) {
        self.emit("ret", 0, false, &[]);
    }

    pub fn bar(&mut self) {
        self.emit("bar", 0, false, &[]);
    }

    /// Direct branch, target relative to this instruction in words.
    pub fn bra(&mut self, rel: i16) {
        self.emit("bra", 0, false, &[Op::Imm(rel)]);
    }

    /// Register-indexed branch through the pair at `r`.
    pub fn brx(&mut self, r: u8) {
        self.emit("brx", 0, false, &[Op::BReg(r)]);
    }

    /// Direct intra-module call, target relative in words.
    pub fn call(&mut self, rel: i16) {
        self.emit("call", 0, false, &[Op::Imm(rel)]);
    }

    /// Register-indexed call through the pair at `r`.
    pub fn callx(&mut self, r: u8) {
        self.emit("callx", 0, false, &[Op::BReg(r)]);
    }

    // Moves

    pub fn mov(&mut self, rd: u8, ra: u8) {
        self.emit("mov", 0, false, &[Op::Reg(rd), Op::Reg(ra)]);
    }

    /// `movi Rd, #imm16` — Rd = imm, zero-extended.
    pub fn movi(&mut self, rd: u8, imm: u16) {
        self.emit("movi", 0, false, &[Op::Reg(rd), Op::Imm(imm as i16)]);
    }

    /// `movk Rd, #imm16, #hw` — insert imm into halfword `hw`, keep rest.
    pub fn movk(&mut self, rd: u8, imm: u16, hw: u8) {
        self.emit(
            "movk",
            0,
            false,
            &[Op::Reg(rd), Op::Imm(imm as i16), Op::Imm(hw as i16)],
        );
    }

    /// Load a full 32-bit constant with `movi` (+ `movk` when needed).
    pub fn load_const32(&mut self, rd: u8, value: u32) {
        self.movi(rd, value as u16);
        let hi = (value >> 16) as u16;
        if hi != 0 {
            self.movk(rd, hi, 1);
        }
    }

    pub fn s2r(&mut self, rd: u8, sr: SpecialReg) {
        self.emit("s2r", 0, false, &[Op::Reg(rd), Op::SReg(sr.id())]);
    }

    /// Predicate mask to register.
    pub fn p2r(&mut self, rd: u8) {
        self.emit("p2r", 0, false, &[Op::Reg(rd)]);
    }

    /// Register to predicate mask.
    pub fn r2p(&mut self, ra: u8) {
        self.emit("r2p", 0, false, &[Op::Reg(ra)]);
    }

    // Integer ALU

    pub fn iadd(&mut self, rd: u8, ra: u8, rb: u8) {
        self.emit("iadd", 0, false, &[Op::Reg(rd), Op::Reg(ra), Op::Reg(rb)]);
    }

    pub fn iadd_imm(&mut self, rd: u8, ra: u8, imm: i16) {
        self.emit("iadd", 0, false, &[Op::Reg(rd), Op::Reg(ra), Op::Imm(imm)]);
    }

    pub fn imul(&mut self, rd: u8, ra: u8, rb: u8) {
        self.emit("imul", 0, false, &[Op::Reg(rd), Op::Reg(ra), Op::Reg(rb)]);
    }

    pub fn and_imm(&mut self, rd: u8, ra: u8, imm: i16) {
        self.emit("and", 0, false, &[Op::Reg(rd), Op::Reg(ra), Op::Imm(imm)]);
    }

    pub fn xor_imm(&mut self, rd: u8, ra: u8, imm: i16) {
        self.emit("xor", 0, false, &[Op::Reg(rd), Op::Reg(ra), Op::Imm(imm)]);
    }

    pub fn shl(&mut self, rd: u8, ra: u8, shift: u8) {
        self.emit(
            "shl",
            0,
            false,
            &[Op::Reg(rd), Op::Reg(ra), Op::Imm(shift as i16)],
        );
    }

    pub fn shr(&mut self, rd: u8, ra: u8, shift: u8) {
        self.emit(
            "shr",
            0,
            false,
            &[Op::Reg(rd), Op::Reg(ra), Op::Imm(shift as i16)],
        );
    }

    /// `isetp.cc Pd, Ra, Rb`
    pub fn isetp(&mut self, compare: Compare, pd: u8, ra: u8, rb: u8) {
        self.emit(
            isetp_mnemonic(compare),
            0,
            false,
            &[Op::Pred(pd), Op::Reg(ra), Op::Reg(rb)],
        );
    }

    /// `isetp.cc Pd, Ra, #imm`
    pub fn isetp_imm(&mut self, compare: Compare, pd: u8, ra: u8, imm: i16) {
        self.emit(
            isetp_mnemonic(compare),
            0,
            false,
            &[Op::Pred(pd), Op::Reg(ra), Op::Imm(imm)],
        );
    }

    // Memory

    pub fn ld(&mut self, rd: u8, base: u8, offset: i16, size: u8) {
        self.load("ld", rd, base, offset, size);
    }

    pub fn ldg(&mut self, rd: u8, base: u8, offset: i16, size: u8) {
        self.load("ldg", rd, base, offset, size);
    }

    pub fn lds(&mut self, rd: u8, base: u8, offset: i16, size: u8) {
        self.load("lds", rd, base, offset, size);
    }

    pub fn ldl(&mut self, rd: u8, base: u8, offset: i16, size: u8) {
        self.load("ldl", rd, base, offset, size);
    }

    /// `ldc Rd, c[bank][offset]`
    pub fn ldc(&mut self, rd: u8, bank: u8, offset: u16, size: u8) {
        self.emit(
            "ldc",
            size,
            size == 8,
            &[Op::Reg(rd), Op::CBank { bank, offset }],
        );
    }

    pub fn st(&mut self, base: u8, offset: i16, rs: u8, size: u8) {
        self.store("st", base, offset, rs, size);
    }

    pub fn stg(&mut self, base: u8, offset: i16, rs: u8, size: u8) {
        self.store("stg", base, offset, rs, size);
    }

    pub fn sts(&mut self, base: u8, offset: i16, rs: u8, size: u8) {
        self.store("sts", base, offset, rs, size);
    }

    pub fn stl(&mut self, base: u8, offset: i16, rs: u8, size: u8) {
        self.store("stl", base, offset, rs, size);
    }

    fn load(&mut self, mnemonic: &'static str, rd: u8, base: u8, offset: i16, size: u8) {
        self.emit(
            mnemonic,
            size,
            size == 8,
            &[Op::Reg(rd), Op::MRef { base, offset }],
        );
    }

    fn store(&mut self, mnemonic: &'static str, base: u8, offset: i16, rs: u8, size: u8) {
        self.emit(
            mnemonic,
            size,
            size == 8,
            &[Op::MRef { base, offset }, Op::Reg(rs)],
        );
    }
}

fn isetp_mnemonic(compare: Compare) -> &'static str {
    match compare {
        Compare::Eq => "isetp.eq",
        Compare::Ne => "isetp.ne",
        Compare::Lt => "isetp.lt",
        Compare::Le => "isetp.le",
        Compare::Gt => "isetp.gt",
        Compare::Ge => "isetp.ge",
    }
}

/// Rewrite the relative target of an encoded direct branch or call.
///
/// Used by the materializer's second pass; the word must already be a
/// `bra`/`call` with its immediate in operand slot 0.
pub fn patch_direct_target(word: &mut [u8; WORD_BYTES], rel: i16) {
    let [lo, hi] = rel.to_le_bytes();
    word[5] = lo;
    word[6] = hi;
}
