// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the runtime crate

use thiserror::Error;

use crate::registry::{CtxId, FuncId};

pub use inject::{MaterializeError, UsageError};
pub use isa::DecodeError;

/// Registry lookup failures. These fail the specific query with no side
/// effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown context {ctx:?}")]
    UnknownContext { ctx: CtxId },

    #[error("unknown function {func:?} in context {ctx:?}")]
    UnknownFunction { ctx: CtxId, func: FuncId },

    #[error("device function '{name}' is already exported")]
    DuplicateExport { name: String },
}

/// Umbrella error for engine operations
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
