// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Calling convention for injected device calls
//!
//! Injected calls must be invisible to the original program: everything the
//! marshalling sequence touches is saved to a reserved area of per-thread
//! local memory first and restored after the callee returns. The window is
//! fixed so that the register-file intrinsics can find the saved values of
//! clobbered registers at runtime.

/// First parameter register of an injected call (`R4`).
pub const FIRST_PARAM_REG: u8 = 4;

/// Number of 32-bit parameter slots (`R4..=R11`). 64-bit arguments occupy
/// an even-aligned pair.
pub const PARAM_REG_COUNT: u8 = 8;

/// Pair base holding the callee address for the indirect call (`R2:R3`).
pub const SCRATCH_TARGET_REG: u8 = 2;

/// Temporary used while saving/restoring the predicate mask (`R0`).
pub const SCRATCH_TEMP_REG: u8 = 0;

/// Registers `R0..SPILL_WINDOW` are spilled around every injected call.
/// Covers the parameter slots and both scratch pairs.
pub const SPILL_WINDOW: u8 = 12;

/// Local-memory byte offset of the spill slot for `R0`.
pub const SPILL_BASE: i16 = 0;

/// Local-memory byte offset of the saved predicate mask.
pub const PRED_SPILL: i16 = SPILL_BASE + SPILL_WINDOW as i16 * 4;

/// Bytes of per-thread local memory reserved for the engine. Kernel code
/// must not use local addresses below this.
pub const LOCAL_RESERVED: u32 = PRED_SPILL as u32 + 16;

/// Constant bank that exposes the launch-time parameter buffer.
pub const LAUNCH_BANK: u8 = 7;

/// Spill slot address for a register inside the window.
pub fn spill_slot(reg: u8) -> i16 {
    debug_assert!(reg < SPILL_WINDOW);
    SPILL_BASE + reg as i16 * 4
}

/// Register and constant-bank limits of the device generation a context
/// is running on. Argument bindings are validated against these before
/// any code is synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGeneration {
    /// Number of addressable general registers (`R0..`); `RZ` is extra.
    pub registers: u16,
    /// Number of constant banks.
    pub constant_banks: u8,
}

impl Default for DeviceGeneration {
    fn default() -> Self {
        Self {
            registers: 255,
            constant_banks: 8,
        }
    }
}
