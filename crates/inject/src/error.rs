// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for injection and materialization.

use thiserror::Error;

/// Tool programming errors.
///
/// These are fatal to the instrumentation session for the kernel: a
/// malformed injection stream is worse than a crash, so callers surface
/// them immediately instead of degrading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// An injection referenced an instruction index outside the function.
    #[error("instruction index {index} is outside the function ({len} instructions)")]
    InstructionOutOfRange { index: usize, len: usize },

    /// The ledger was mutated after the kernel was materialized.
    #[error("injection ledger is frozen: kernel already materialized")]
    LedgerFrozen,
}

/// Materialization failures.
///
/// Recoverable: the kernel falls back to running only its original,
/// uninstrumented code, and the error is reported to the tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaterializeError {
    /// The callee was never exported for injection.
    #[error("device function '{name}' is not exported")]
    UnknownExport { name: String },

    /// The argument list does not fit the parameter register window.
    #[error("call to '{name}' needs {needed} parameter registers, only {available} exist")]
    TooManyArgs {
        name: String,
        needed: usize,
        available: usize,
    },

    /// An argument binds a register the device generation does not have.
    #[error("argument binds register R{reg}, device generation has {max} registers")]
    InvalidRegister { reg: u8, max: u16 },

    /// An argument binds a constant bank the device generation does not have.
    #[error("argument binds constant bank {bank}, device generation has {max} banks")]
    InvalidBank { bank: u8, max: u8 },

    /// Code growth pushed a rewritten branch target out of the relative
    /// immediate's range.
    #[error("rewritten branch at {offset:#x} cannot reach {target:#x}: relative field overflow")]
    OffsetRangeExceeded { offset: u32, target: u32 },

    /// Register-indexed branch targets are computed at runtime against the
    /// original layout and cannot be relocated.
    #[error("function uses register-indexed branches; targets cannot be relocated")]
    IndirectFlow,
}
