// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reference executor
//!
//! Interprets a [`DispatchPlan`] the way the device would run it: one
//! register file, predicate mask and local memory per thread, shared and
//! global memory across threads, constant banks wired from the plan. This
//! is the stand-in for real hardware used by the end-to-end tests and by
//! embedders that have none.
//!
//! Model notes:
//! - Threads of a launch run sequentially to completion; `bar` is a no-op
//!   under that schedule.
//! - Generic addressing resolves to global memory.
//! - The register-file intrinsics operate on the calling thread's state;
//!   for registers inside the injected-call spill window they read and
//!   write the saved slots, which is what makes `reg_write` survive the
//!   call-site restore.

use std::collections::HashMap;

use inject::abi::{spill_slot, FIRST_PARAM_REG, LAUNCH_BANK, SPILL_WINDOW};
use isa::{DecodeError, Instr, MemorySpace, OpClass, Operand, OperandKind, SpecialReg, RZ, WORD_BYTES};
use thiserror::Error;

use crate::{
    dispatch::DispatchPlan,
    exports::{EXPORT_BASE, READ_REG_ADDR, WRITE_REG_ADDR},
};

/// Launch shape: a single block of `threads` threads.
#[derive(Debug, Clone, Copy)]
pub struct LaunchGrid {
    pub threads: u32,
}

/// Execution failures. These model device faults; they abort the launch.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid code address {pc:#x}")]
    InvalidCodeAddress { pc: u32 },

    #[error("{space} access at {addr:#x} (+{size}) is out of bounds")]
    OutOfBounds {
        space: MemorySpace,
        addr: u32,
        size: u8,
    },

    #[error("constant bank {bank} is not populated")]
    MissingBank { bank: u8 },

    #[error("call stack overflow at {pc:#x}")]
    StackOverflow { pc: u32 },

    #[error("step limit {limit} exceeded")]
    StepLimit { limit: u64 },
}

const STACK_LIMIT: usize = 64;

/// Interprets dispatch plans over a flat memory model.
pub struct Executor {
    global: Vec<u8>,
    shared_size: usize,
    local_size: usize,
    cbanks: HashMap<u8, Vec<u8>>,
    step_limit: u64,
}

impl Executor {
    /// Create an executor with `global_size` bytes of zeroed global memory.
    pub fn new(global_size: usize) -> Self {
        Self {
            global: vec![0; global_size],
            shared_size: 4096,
            local_size: 4096,
            cbanks: HashMap::new(),
            step_limit: 1_000_000,
        }
    }

    /// Populate a constant bank (kernel parameters and the like). The
    /// launch bank is overwritten from the plan on every run.
    pub fn set_cbank(&mut self, bank: u8, data: Vec<u8>) {
        self.cbanks.insert(bank, data);
    }

    pub fn global(&self) -> &[u8] {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut [u8] {
        &mut self.global
    }

    /// Read back a 32-bit little-endian word of global memory.
    pub fn global_u32(&self, addr: u32) -> u32 {
        let addr = addr as usize;
        u32::from_le_bytes(self.global[addr..addr + 4].try_into().expect("in bounds"))
    }

    /// Run one launch of the plan.
    pub fn run(&mut self, plan: &DispatchPlan, grid: LaunchGrid) -> Result<(), ExecError> {
        // The launch buffer is copied in fresh on every invocation.
        self.cbanks
            .insert(LAUNCH_BANK, plan.launch_params.clone());

        let main = isa::decode_function(&plan.code)?;
        let export_code = isa::decode_function(plan.exports.region())?;

        let mut shared = vec![0u8; self.shared_size];

        for tid in 0..grid.threads {
            let mut machine = Machine {
                main: &main,
                main_bytes: plan.code.len() as u32,
                exports: &export_code,
                export_bytes: plan.exports.region().len() as u32,
                global: &mut self.global,
                shared: &mut shared,
                cbanks: &self.cbanks,
                local_size: self.local_size,
                step_limit: self.step_limit,
                tid,
                threads: grid.threads,
            };
            machine.run_thread()?;
        }

        Ok(())
    }
}

/// One launch in progress: code plus the memories every thread sees.
struct Machine<'a> {
    main: &'a [Instr],
    main_bytes: u32,
    exports: &'a [Instr],
    export_bytes: u32,
    global: &'a mut Vec<u8>,
    shared: &'a mut Vec<u8>,
    cbanks: &'a HashMap<u8, Vec<u8>>,
    local_size: usize,
    step_limit: u64,
    tid: u32,
    threads: u32,
}

/// Per-thread architectural state.
struct ThreadState {
    regs: [u32; 256],
    /// Predicate mask: bits 0..6 are P0..P6, bit 7 (PT) reads as set.
    pmask: u8,
    pc: u32,
    stack: Vec<u32>,
    local: Vec<u8>,
}

impl ThreadState {
    fn reg(&self, r: u8) -> u32 {
        if r == RZ {
            0
        } else {
            self.regs[r as usize]
        }
    }

    fn set_reg(&mut self, r: u8, value: u32) {
        if r != RZ {
            self.regs[r as usize] = value;
        }
    }

    fn pred_bit(&self, p: u8) -> bool {
        (self.pmask | 0x80) >> p & 1 == 1
    }
}

impl<'a> Machine<'a> {
    fn run_thread(&mut self) -> Result<(), ExecError> {
        let mut state = ThreadState {
            regs: [0; 256],
            pmask: 0x80,
            pc: 0,
            stack: Vec::new(),
            local: vec![0; self.local_size],
        };

        let mut steps = 0u64;
        loop {
            steps += 1;
            if steps > self.step_limit {
                return Err(ExecError::StepLimit {
                    limit: self.step_limit,
                });
            }

            let instr = self.fetch(state.pc)?;

            if let Some(guard) = instr.guard {
                let taken = state.pred_bit(guard.reg) != guard.negated;
                if !taken {
                    state.pc += WORD_BYTES as u32;
                    continue;
                }
            }

            if !self.step(instr, &mut state)? {
                return Ok(());
            }
        }
    }

    fn fetch(&self, pc: u32) -> Result<&'a Instr, ExecError> {
        if pc % WORD_BYTES as u32 != 0 {
            return Err(ExecError::InvalidCodeAddress { pc });
        }
        let (main, exports): (&'a [Instr], &'a [Instr]) = (self.main, self.exports);
        if pc < self.main_bytes {
            return Ok(&main[(pc / WORD_BYTES as u32) as usize]);
        }
        if (EXPORT_BASE..EXPORT_BASE + self.export_bytes).contains(&pc) {
            return Ok(&exports[((pc - EXPORT_BASE) / WORD_BYTES as u32) as usize]);
        }
        Err(ExecError::InvalidCodeAddress { pc })
    }

    /// Execute one instruction; `Ok(false)` ends the thread.
    fn step(&mut self, instr: &Instr, state: &mut ThreadState) -> Result<bool, ExecError> {
        let next = state.pc + WORD_BYTES as u32;

        match instr.op.class {
            OpClass::Misc => state.pc = next,
            OpClass::Exit => return Ok(false),
            OpClass::Ret => match state.stack.pop() {
                Some(ret) => state.pc = ret,
                // A return at kernel top level ends the thread.
                None => return Ok(false),
            },
            OpClass::Branch => {
                state.pc = branch_target(instr, state.pc);
            }
            OpClass::BranchIndex => {
                state.pc = self.pair_address(instr, state)?;
            }
            OpClass::Call => {
                self.push_return(state, next)?;
                state.pc = branch_target(instr, state.pc);
            }
            OpClass::CallIndex => {
                let target = self.pair_address(instr, state)?;
                match target {
                    READ_REG_ADDR => {
                        let reg = state.reg(FIRST_PARAM_REG) as u8;
                        let value = self.intrinsic_read(state, reg);
                        state.set_reg(FIRST_PARAM_REG, value);
                        state.pc = next;
                    }
                    WRITE_REG_ADDR => {
                        let reg = state.reg(FIRST_PARAM_REG) as u8;
                        let value = state.reg(FIRST_PARAM_REG + 2);
                        self.intrinsic_write(state, reg, value)?;
                        state.pc = next;
                    }
                    _ => {
                        self.push_return(state, next)?;
                        state.pc = target;
                    }
                }
            }
            OpClass::Move => {
                let value = operand_value(&instr.operands[1], state);
                state.set_reg(dst(instr), value);
                state.pc = next;
            }
            OpClass::MoveImm => {
                let imm = imm_of(&instr.operands[1]) as u32 & 0xffff;
                state.set_reg(dst(instr), imm);
                state.pc = next;
            }
            OpClass::MoveInsert => {
                let imm = imm_of(&instr.operands[1]) as u32 & 0xffff;
                let hw = imm_of(&instr.operands[2]) as u32;
                let shift = hw * 16;
                let kept = state.reg(dst(instr)) & !(0xffff << shift);
                state.set_reg(dst(instr), kept | (imm << shift));
                state.pc = next;
            }
            OpClass::SpecialRead => {
                let value = match sreg_of(&instr.operands[1]) {
                    SpecialReg::Tid => self.tid,
                    SpecialReg::NTid => self.threads,
                    SpecialReg::CtaId => 0,
                    SpecialReg::NCtaId => 1,
                    SpecialReg::LaneId => self.tid % 32,
                };
                state.set_reg(dst(instr), value);
                state.pc = next;
            }
            OpClass::PredRead => {
                state.set_reg(dst(instr), (state.pmask | 0x80) as u32);
                state.pc = next;
            }
            OpClass::PredWrite => {
                state.pmask = (state.reg(dst(instr)) as u8 & 0x7f) | 0x80;
                state.pc = next;
            }
            OpClass::Alu => {
                let a = operand_value(&instr.operands[1], state);
                let b = operand_value(&instr.operands[2], state);
                let value = match instr.op.mnemonic {
                    "iadd" => a.wrapping_add(b),
                    "imul" => a.wrapping_mul(b),
                    "and" => a & b,
                    "or" => a | b,
                    "xor" => a ^ b,
                    other => unreachable!("ALU mnemonic {other}"),
                };
                state.set_reg(dst(instr), value);
                state.pc = next;
            }
            OpClass::Shift => {
                let a = operand_value(&instr.operands[1], state);
                let s = imm_of(&instr.operands[2]) as u32;
                let value = match instr.op.mnemonic {
                    "shl" => a << s,
                    "shr" => a >> s,
                    other => unreachable!("shift mnemonic {other}"),
                };
                state.set_reg(dst(instr), value);
                state.pc = next;
            }
            OpClass::SetPred => {
                let a = operand_value(&instr.operands[1], state) as i32;
                let b = operand_value(&instr.operands[2], state) as i32;
                let result = match instr.op.compare.expect("SetPred carries a compare") {
                    isa::Compare::Eq => a == b,
                    isa::Compare::Ne => a != b,
                    isa::Compare::Lt => a < b,
                    isa::Compare::Le => a <= b,
                    isa::Compare::Gt => a > b,
                    isa::Compare::Ge => a >= b,
                };
                let pd = match instr.operands[0].kind {
                    OperandKind::Pred(p) => p,
                    _ => unreachable!("shape validated"),
                };
                if result {
                    state.pmask |= 1 << pd;
                } else {
                    state.pmask &= !(1 << pd);
                }
                state.pc = next;
            }
            OpClass::Load => {
                let (base, offset) = mref_of(&instr.operands[1]);
                let addr = state.reg(base).wrapping_add(offset as i32 as u32);
                let value =
                    self.read_mem(instr.memory_space(), state, addr, instr.access_size)?;
                let rd = dst(instr);
                state.set_reg(rd, value as u32);
                if instr.access_size == 8 {
                    state.set_reg(rd + 1, (value >> 32) as u32);
                }
                state.pc = next;
            }
            OpClass::LoadConst => {
                let (bank, offset) = match instr.operands[1].kind {
                    OperandKind::CBank { bank, offset } => (bank, offset),
                    _ => unreachable!("shape validated"),
                };
                let data = self
                    .cbanks
                    .get(&bank)
                    .ok_or(ExecError::MissingBank { bank })?;
                let value = read_bytes(data, MemorySpace::Constant, offset as u32, instr.access_size)?;
                let rd = dst(instr);
                state.set_reg(rd, value as u32);
                if instr.access_size == 8 {
                    state.set_reg(rd + 1, (value >> 32) as u32);
                }
                state.pc = next;
            }
            OpClass::Store => {
                let (base, offset) = mref_of(&instr.operands[0]);
                let addr = state.reg(base).wrapping_add(offset as i32 as u32);
                let rs = match instr.operands[1].kind {
                    OperandKind::Reg(r) => r,
                    _ => unreachable!("shape validated"),
                };
                let mut value = state.reg(rs) as u64;
                if instr.access_size == 8 {
                    value |= (state.reg(rs + 1) as u64) << 32;
                }
                self.write_mem(instr.memory_space(), state, addr, instr.access_size, value)?;
                state.pc = next;
            }
        }

        Ok(true)
    }

    fn push_return(&self, state: &mut ThreadState, ret: u32) -> Result<(), ExecError> {
        if state.stack.len() >= STACK_LIMIT {
            return Err(ExecError::StackOverflow { pc: state.pc });
        }
        state.stack.push(ret);
        Ok(())
    }

    fn pair_address(&self, instr: &Instr, state: &ThreadState) -> Result<u32, ExecError> {
        let base = match instr.operands[0].kind {
            OperandKind::BReg(r) => r,
            _ => unreachable!("shape validated"),
        };
        let lo = state.reg(base) as u64;
        let hi = state.reg(base + 1) as u64;
        let address = lo | (hi << 32);
        u32::try_from(address).map_err(|_| ExecError::InvalidCodeAddress { pc: u32::MAX })
    }

    /// `reg_read`: the application's value of a register. Inside an
    /// injected call the window registers hold marshalling temporaries, so
    /// the saved slot is authoritative for them.
    fn intrinsic_read(&self, state: &ThreadState, reg: u8) -> u32 {
        if reg < SPILL_WINDOW {
            let slot = spill_slot(reg) as usize;
            u32::from_le_bytes(state.local[slot..slot + 4].try_into().expect("spill slot"))
        } else {
            state.reg(reg)
        }
    }

    /// `reg_write`: permanent register write. Updating the saved slot as
    /// well keeps the write alive across the call-site restore.
    fn intrinsic_write(
        &self,
        state: &mut ThreadState,
        reg: u8,
        value: u32,
    ) -> Result<(), ExecError> {
        if reg == RZ {
            return Ok(());
        }
        if reg < SPILL_WINDOW {
            let slot = spill_slot(reg) as usize;
            state.local[slot..slot + 4].copy_from_slice(&value.to_le_bytes());
        }
        state.set_reg(reg, value);
        Ok(())
    }

    fn read_mem(
        &self,
        space: MemorySpace,
        state: &ThreadState,
        addr: u32,
        size: u8,
    ) -> Result<u64, ExecError> {
        let buffer: &[u8] = match space {
            MemorySpace::Local => &state.local,
            MemorySpace::Shared => self.shared,
            MemorySpace::Global | MemorySpace::Generic => self.global,
            _ => unreachable!("loads are classified by space"),
        };
        read_bytes(buffer, space, addr, size)
    }

    fn write_mem(
        &mut self,
        space: MemorySpace,
        state: &mut ThreadState,
        addr: u32,
        size: u8,
        value: u64,
    ) -> Result<(), ExecError> {
        let buffer: &mut [u8] = match space {
            MemorySpace::Local => &mut state.local,
            MemorySpace::Shared => self.shared,
            MemorySpace::Global | MemorySpace::Generic => self.global,
            _ => unreachable!("stores are classified by space"),
        };
        let (addr, size_us) = (addr as usize, size as usize);
        if addr.checked_add(size_us).map_or(true, |end| end > buffer.len()) {
            return Err(ExecError::OutOfBounds { space, addr: addr as u32, size });
        }
        buffer[addr..addr + size_us].copy_from_slice(&value.to_le_bytes()[..size_us]);
        Ok(())
    }
}

fn read_bytes(buffer: &[u8], space: MemorySpace, addr: u32, size: u8) -> Result<u64, ExecError> {
    let (addr_us, size_us) = (addr as usize, size as usize);
    if addr_us.checked_add(size_us).map_or(true, |end| end > buffer.len()) {
        return Err(ExecError::OutOfBounds { space, addr, size });
    }
    let mut bytes = [0u8; 8];
    bytes[..size_us].copy_from_slice(&buffer[addr_us..addr_us + size_us]);
    Ok(u64::from_le_bytes(bytes))
}

fn dst(instr: &Instr) -> u8 {
    match instr.operands[0].kind {
        OperandKind::Reg(r) => r,
        _ => unreachable!("shape validated"),
    }
}

fn imm_of(operand: &Operand) -> i32 {
    match operand.kind {
        OperandKind::Imm(v) => v,
        _ => unreachable!("shape validated"),
    }
}

fn sreg_of(operand: &Operand) -> SpecialReg {
    match operand.kind {
        OperandKind::SReg(sr) => sr,
        _ => unreachable!("shape validated"),
    }
}

fn mref_of(operand: &Operand) -> (u8, i16) {
    match operand.kind {
        OperandKind::MRef { base, offset } => (base, offset),
        _ => unreachable!("shape validated"),
    }
}

fn branch_target(instr: &Instr, pc: u32) -> u32 {
    let rel = imm_of(&instr.operands[0]);
    (pc as i64 + rel as i64 * WORD_BYTES as i64) as u32
}

/// Value of a source operand with its modifier flags applied (absolute
/// first, then negation).
fn operand_value(operand: &Operand, state: &ThreadState) -> u32 {
    let raw = match operand.kind {
        OperandKind::Imm(v) => v as u32,
        OperandKind::Reg(r) => state.reg(r),
        _ => unreachable!("shape validated"),
    };
    let mut value = raw as i32;
    if operand.absolute {
        value = value.wrapping_abs();
    }
    if operand.negated {
        value = value.wrapping_neg();
    }
    value as u32
}
