// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Instrumentation materializer
//!
//! Transforms a decoded instruction sequence plus its injection ledger into
//! a new, self-consistent instrumented stream. For each original
//! instruction, in original order, the output carries: injected `Before`
//! calls in insertion order, the original word unless removed, injected
//! `After` calls in insertion order. All `After` calls of instruction *i*
//! precede all `Before` calls of *i+1*.
//!
//! Branch re-resolution is two-pass: the first pass emits everything while
//! recording the old-offset → new-offset map; the second pass rewrites
//! every direct intra-function transfer through that map. Nothing is
//! mutated in place during expansion.
//!
//! An empty ledger materializes to a byte-identical copy of the original
//! stream.

use isa::{Assembler, Instr, OpClass, WORD_BYTES};
use tracing::debug;

use crate::{
    abi::{
        spill_slot, DeviceGeneration, FIRST_PARAM_REG, LAUNCH_BANK, PARAM_REG_COUNT, PRED_SPILL,
        SCRATCH_TARGET_REG, SCRATCH_TEMP_REG, SPILL_WINDOW,
    },
    error::MaterializeError,
    ledger::{CallArg, InjectedCall, InjectionLedger, InsertPoint},
};

/// Resolves exported device-function names to their code addresses.
///
/// Exported functions live outside the instrumented stream, in a code
/// region laid out by the export table, so their addresses are stable
/// across materialization.
pub trait ExportResolver {
    fn address_of(&self, name: &str) -> Option<u32>;
}

impl ExportResolver for std::collections::HashMap<String, u32> {
    fn address_of(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}

/// Build the instrumented stream for one kernel.
///
/// The instructions must be exactly the decoder's output for the original
/// code (offsets dense and strictly increasing). On error nothing is kept;
/// the caller falls back to the original code.
pub fn materialize(
    instructions: &[Instr],
    ledger: &InjectionLedger,
    exports: &dyn ExportResolver,
    generation: DeviceGeneration,
) -> Result<Vec<u8>, MaterializeError> {
    // Runtime-computed branch targets would still point into the original
    // layout after splicing; refuse rather than guess.
    if instructions
        .iter()
        .any(|i| i.op.class == OpClass::BranchIndex)
    {
        return Err(MaterializeError::IndirectFlow);
    }

    let mut asm = Assembler::new();
    // New byte offset of each original instruction (for removed
    // instructions: of the group that replaces it).
    let mut new_offsets = Vec::with_capacity(instructions.len());
    // (position in new stream, original index) of emitted direct transfers.
    let mut patches: Vec<(usize, usize)> = Vec::new();

    for (index, instr) in instructions.iter().enumerate() {
        new_offsets.push(asm.cursor());

        for call in ledger.calls_at(index, InsertPoint::Before) {
            emit_call_site(&mut asm, call, instr, exports, generation)?;
        }

        if !ledger.is_removed(index) {
            if matches!(instr.op.class, OpClass::Branch | OpClass::Call) {
                patches.push((asm.cursor(), index));
            }
            asm.push_word(&instr.raw);
        }

        for call in ledger.calls_at(index, InsertPoint::After) {
            emit_call_site(&mut asm, call, instr, exports, generation)?;
        }
    }

    let mut code = asm.finish();

    // Second pass: re-resolve direct targets against the new layout.
    for (pos, index) in patches {
        let old_target = instructions[index]
            .direct_target()
            .expect("patched instructions are direct transfers");
        let target_index = old_target as usize / WORD_BYTES;
        let new_target = new_offsets[target_index];

        let rel = (new_target as i64 - pos as i64) / WORD_BYTES as i64;
        let rel = i16::try_from(rel).map_err(|_| MaterializeError::OffsetRangeExceeded {
            offset: pos as u32,
            target: new_target as u32,
        })?;

        let word: &mut [u8; WORD_BYTES] = (&mut code[pos..pos + WORD_BYTES])
            .try_into()
            .expect("word-sized slice");
        isa::patch_direct_target(word, rel);
    }

    debug!(
        original_bytes = instructions.len() * WORD_BYTES,
        instrumented_bytes = code.len(),
        injected_calls = ledger.call_count(),
        "materialized kernel"
    );

    Ok(code)
}

/// Parameter slots consumed by an argument list (with pair alignment).
fn param_slots(args: &[CallArg]) -> usize {
    let mut used = 0;
    for arg in args {
        match arg {
            CallArg::ConstU64(_) | CallArg::LaunchU64(_) => {
                used += used % 2; // align the pair
                used += 2;
            }
            _ => used += 1,
        }
    }
    used
}

/// Expand one injected call: spill, marshal, call, restore.
///
/// The injected sequence executes unconditionally, regardless of the
/// original instruction's guard; tools that care bind `PredVal`.
fn emit_call_site(
    asm: &mut Assembler,
    call: &InjectedCall,
    instr: &Instr,
    exports: &dyn ExportResolver,
    generation: DeviceGeneration,
) -> Result<(), MaterializeError> {
    let needed = param_slots(&call.args);
    if needed > PARAM_REG_COUNT as usize {
        return Err(MaterializeError::TooManyArgs {
            name: call.target.clone(),
            needed,
            available: PARAM_REG_COUNT as usize,
        });
    }

    let address = exports
        .address_of(&call.target)
        .ok_or_else(|| MaterializeError::UnknownExport {
            name: call.target.clone(),
        })?;

    // Save the register window and predicate mask. The spill slots double
    // as the pre-call values the register-file intrinsics operate on.
    for reg in 0..SPILL_WINDOW {
        asm.stl(isa::RZ, spill_slot(reg), reg, 4);
    }
    asm.p2r(SCRATCH_TEMP_REG);
    asm.stl(isa::RZ, PRED_SPILL, SCRATCH_TEMP_REG, 4);

    // Marshal arguments into the parameter window, in parameter order.
    let mut used = 0u8;
    for arg in &call.args {
        let param = FIRST_PARAM_REG + used;
        match *arg {
            CallArg::ConstU32(value) => {
                asm.load_const32(param, value);
                used += 1;
            }
            CallArg::ConstU64(value) => {
                used += used % 2;
                let param = FIRST_PARAM_REG + used;
                asm.load_const32(param, value as u32);
                asm.load_const32(param + 1, (value >> 32) as u32);
                used += 2;
            }
            CallArg::RegVal(reg) => {
                if reg != isa::RZ && reg as u16 >= generation.registers {
                    return Err(MaterializeError::InvalidRegister {
                        reg,
                        max: generation.registers,
                    });
                }
                if reg < SPILL_WINDOW {
                    // Clobbered by this sequence: read the pre-call value.
                    asm.ldl(param, isa::RZ, spill_slot(reg), 4);
                } else {
                    asm.mov(param, reg);
                }
                used += 1;
            }
            CallArg::PredVal => {
                match instr.guard {
                    None => asm.movi(param, 1),
                    Some(guard) => {
                        asm.p2r(param);
                        asm.shr(param, param, guard.reg);
                        asm.and_imm(param, param, 1);
                        if guard.negated {
                            asm.xor_imm(param, param, 1);
                        }
                    }
                }
                used += 1;
            }
            CallArg::PredReg => {
                asm.p2r(param);
                used += 1;
            }
            CallArg::LaunchU32(offset) => {
                asm.ldc(param, LAUNCH_BANK, offset, 4);
                used += 1;
            }
            CallArg::LaunchU64(offset) => {
                used += used % 2;
                asm.ldc(FIRST_PARAM_REG + used, LAUNCH_BANK, offset, 8);
                used += 2;
            }
            CallArg::CBankVal { bank, offset } => {
                if bank >= generation.constant_banks {
                    return Err(MaterializeError::InvalidBank {
                        bank,
                        max: generation.constant_banks,
                    });
                }
                asm.ldc(param, bank, offset, 4);
                used += 1;
            }
        }
    }

    // Callee address into the scratch pair, then transfer.
    asm.load_const32(SCRATCH_TARGET_REG, address);
    asm.movi(SCRATCH_TARGET_REG + 1, 0);
    asm.callx(SCRATCH_TARGET_REG);

    // Restore predicate mask first (it needs the temp register), then the
    // window. Slots written by the `reg_write` intrinsic restore to the
    // written values, which is what makes those writes permanent.
    asm.ldl(SCRATCH_TEMP_REG, isa::RZ, PRED_SPILL, 4);
    asm.r2p(SCRATCH_TEMP_REG);
    for reg in 0..SPILL_WINDOW {
        asm.ldl(reg, isa::RZ, spill_slot(reg), 4);
    }

    Ok(())
}
