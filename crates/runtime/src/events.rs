// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tool-facing callbacks
//!
//! A tool implements [`Tool`] and hands it to the engine. The engine
//! invokes the lifecycle callbacks from whichever host thread triggered
//! the intercepted event; events on registered tool threads are
//! suppressed before dispatch.
//!
//! The first-load callback receives a [`FirstLoad`] window: the only place
//! the injection ledger can be mutated. The window borrows the kernel's
//! ledger for the duration of the callback, so mutation outside it is not
//! expressible.

use std::any::Any;

use inject::{CallBuilder, InsertPoint, InjectionLedger, MaterializeError, UsageError};
use isa::Instr;

use crate::{
    function::{DecodedCode, Function},
    line_info::LineInfo,
    registry::{CtxId, FuncId},
};

/// Callbacks the engine invokes on the tool.
///
/// All methods have empty defaults; a tool overrides what it needs.
pub trait Tool: Send + Sync {
    /// Process start, before any device work.
    fn at_init(&self) {}

    /// Process end, after all device work.
    fn at_term(&self) {}

    /// A device context came up.
    fn at_ctx_init(&self, _ctx: CtxId) {}

    /// A device context is being torn down.
    fn at_ctx_term(&self, _ctx: CtxId) {}

    /// A kernel was loaded for the first time. This is the only window in
    /// which injections can be recorded for it.
    fn at_function_first_load(&self, _load: &mut FirstLoad<'_>) {}

    /// Fires before (`is_exit == false`) and after (`is_exit == true`)
    /// every intercepted driver call.
    fn at_driver_event(&self, _event: &DriverEvent<'_>) {}

    /// Materialization of an instrumented variant failed; the kernel will
    /// keep running its original code.
    fn at_materialize_error(&self, _ctx: CtxId, _func: FuncId, _error: &MaterializeError) {}
}

/// One intercepted driver call, delivered to [`Tool::at_driver_event`].
pub struct DriverEvent<'a> {
    pub ctx: CtxId,
    /// Numeric call-site identifier assigned by the interception layer.
    pub call_id: u32,
    /// Driver call name.
    pub name: &'a str,
    /// False on entry, true on exit.
    pub is_exit: bool,
    /// Call parameter struct; cast by the tool based on `call_id`.
    pub params: &'a dyn Any,
    /// Driver status code, present on exit events.
    pub status: Option<i32>,
}

/// External disassembler hook for vendor-syntax rendering of raw words.
pub trait Disassembler: Send + Sync {
    fn render(&self, raw: &[u8; isa::WORD_BYTES]) -> Option<String>;
}

/// The first-load window for one kernel.
///
/// Grants read access to the decoded stream and CFG, and the only mutable
/// path into the injection ledger.
pub struct FirstLoad<'a> {
    pub(crate) ctx: CtxId,
    pub(crate) func: FuncId,
    pub(crate) function: &'a Function,
    pub(crate) decoded: &'a DecodedCode,
    pub(crate) ledger: &'a mut InjectionLedger,
    pub(crate) disassembler: Option<&'a dyn Disassembler>,
}

impl<'a> FirstLoad<'a> {
    pub fn ctx(&self) -> CtxId {
        self.ctx
    }

    pub fn func(&self) -> FuncId {
        self.func
    }

    pub fn name(&self) -> &'a str {
        self.function.name()
    }

    pub fn is_kernel(&self) -> bool {
        self.function.image().is_kernel()
    }

    /// Device load address of the function.
    pub fn func_addr(&self) -> u64 {
        self.function.image().device_address()
    }

    /// The decoded instruction stream, in offset order.
    ///
    /// The borrow is independent of the window itself, so instruction
    /// references stay usable while injections are recorded.
    pub fn instructions(&self) -> &'a [Instr] {
        &self.decoded.instructions
    }

    /// The control flow graph. Check [`cfg::Cfg::is_degenerate`] before
    /// relying on the edge set.
    pub fn cfg(&self) -> &'a cfg::Cfg {
        &self.decoded.cfg
    }

    /// Source location of an instruction offset, when the image carries
    /// line info.
    pub fn line_info(&self, offset: u32) -> Option<LineInfo<'a>> {
        self.function.image().line_table()?.lookup(offset)
    }

    /// Render an instruction, preferring the installed disassembler hook.
    pub fn disassemble(&self, instr: &Instr) -> String {
        self.disassembler
            .and_then(|d| d.render(&instr.raw))
            .unwrap_or_else(|| instr.to_string())
    }

    /// Inject a call to the exported device function `target` before or
    /// after `instr`. Calls at the same point run in insertion order.
    pub fn insert_call(
        &mut self,
        instr: &Instr,
        point: InsertPoint,
        target: impl Into<String>,
    ) -> Result<CallBuilder<'_>, UsageError> {
        self.ledger.insert_call(instr.index as usize, point, target)
    }

    /// Elide the original instruction from the instrumented variant. The
    /// decoded stream itself is unchanged and stays queryable.
    pub fn remove_original(&mut self, instr: &Instr) -> Result<(), UsageError> {
        self.ledger.remove_original(instr.index as usize)
    }
}
