// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Call injection and instrumentation materialization
//!
//! This crate records what a tool wants injected into a kernel (the
//! [`InjectionLedger`]) and turns the decoded stream plus the ledger into
//! a new instrumented instruction stream (the [`materialize`] pass).
//!
//! The injected code is invisible to the original program: every call site
//! spills the fixed register window and predicate mask defined in [`abi`]
//! to reserved local memory, marshals its arguments, calls the exported
//! device function, and restores state afterwards. Only explicit writes
//! through the register-file intrinsics survive the restore.

pub mod abi;
pub mod error;
pub mod ledger;
pub mod materialize;

pub use abi::DeviceGeneration;
pub use error::{MaterializeError, UsageError};
pub use ledger::{CallArg, CallBuilder, InjectedCall, InjectionLedger, InsertPoint};
pub use materialize::{materialize, ExportResolver};
