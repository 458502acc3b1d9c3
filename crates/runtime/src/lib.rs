// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic binary instrumentation engine for GPU kernels
//!
//! The engine intercepts kernels on first load, exposes their decoded
//! instruction stream and CFG to a tool, lets the tool inject calls to
//! exported device functions with typed argument bindings, and selects
//! between the original and instrumented variants at every subsequent
//! dispatch.
//!
//! # Architecture
//!
//! ```text
//! driver interception (external)
//!      ↓ first load / ctx lifecycle / driver events
//! Engine (registry, tool threads, export table)
//!      ↓ decode once            isa + cfg
//!      ↓ first-load callback    FirstLoad window → InjectionLedger
//!      ↓ lazy materialization   inject::materialize
//! DispatchPlan (variant + launch buffer)
//!      ↓
//! Executor (reference device) or real hardware (external)
//! ```
//!
//! # Concurrency
//!
//! The engine runs cooperatively on whichever host thread triggered an
//! intercepted event. Registry tables sit behind a mutex; per-kernel
//! decode and materialization are once-cells, so under concurrent
//! first-use races the first caller computes and everyone else observes
//! the cached result. The injection ledger is only reachable inside the
//! first-load callback, which holds the kernel's ledger lock for its whole
//! duration: serialized per kernel, parallel across distinct kernels.

mod dispatch;
mod error;
mod events;
mod execute;
mod exports;
mod function;
mod image;
mod line_info;
mod registry;

pub use dispatch::{DispatchPlan, Variant};
pub use error::{DecodeError, EngineError, EngineResult, MaterializeError, RegistryError, UsageError};
pub use events::{Disassembler, DriverEvent, FirstLoad, Tool};
pub use execute::{ExecError, Executor, LaunchGrid};
pub use exports::{ExportTable, EXPORT_BASE, READ_REG_ADDR, READ_REG_NAME, WRITE_REG_ADDR, WRITE_REG_NAME};
pub use function::{DecodedCode, Function};
pub use image::KernelImage;
pub use line_info::{LineInfo, LineTable};
pub use registry::{CtxId, Engine, FuncId};

pub use cfg::{BlockIndex, Cfg};
pub use inject::{CallArg, DeviceGeneration, InsertPoint};
