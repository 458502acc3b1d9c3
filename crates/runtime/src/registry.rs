// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide engine registry
//!
//! Owns the table of active device contexts and their cached kernels, the
//! export table, and the set of registered tool threads. All notifications
//! from the driver-interception layer enter through [`Engine`] methods;
//! callbacks to the tool go out from here, suppressed on tool threads to
//! prevent the tool's own machinery from re-entering itself.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    thread::{self, ThreadId},
};

use inject::DeviceGeneration;
use tracing::{debug, info};

use crate::{
    error::{EngineResult, RegistryError},
    events::{Disassembler, DriverEvent, FirstLoad, Tool},
    exports::ExportTable,
    function::{DecodedCode, Function},
    image::KernelImage,
};

/// Opaque handle of a device context, assigned by the driver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxId(pub u64);

/// Opaque handle of a loaded kernel, assigned by the driver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u64);

struct ContextState {
    functions: Mutex<HashMap<FuncId, Arc<Function>>>,
}

/// The instrumentation engine.
///
/// One per process. The driver-interception layer feeds it lifecycle
/// notifications; the tool queries and controls it through the same
/// handle it received them with.
pub struct Engine {
    tool: Arc<dyn Tool>,
    generation: DeviceGeneration,
    contexts: Mutex<HashMap<CtxId, Arc<ContextState>>>,
    tool_threads: Mutex<HashSet<ThreadId>>,
    /// Copy-on-write: dispatch and materialization snapshot the current Arc.
    exports: Mutex<Arc<ExportTable>>,
    disassembler: Mutex<Option<Arc<dyn Disassembler>>>,
}

impl Engine {
    /// Create the engine for the default device generation and notify the
    /// tool that the process is up.
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self::with_generation(tool, DeviceGeneration::default())
    }

    /// Create the engine for a specific device generation.
    pub fn with_generation(tool: Arc<dyn Tool>, generation: DeviceGeneration) -> Self {
        let engine = Self {
            tool,
            generation,
            contexts: Mutex::new(HashMap::new()),
            tool_threads: Mutex::new(HashSet::new()),
            exports: Mutex::new(Arc::new(ExportTable::new())),
            disassembler: Mutex::new(None),
        };
        engine.tool.at_init();
        engine
    }

    /// Device generation of the hardware this engine serves.
    pub fn device_generation(&self) -> DeviceGeneration {
        self.generation
    }

    /// Notify the tool that the process is shutting down. No further
    /// engine calls should be made afterwards.
    pub fn shutdown(&self) {
        self.tool.at_term();
    }

    // ---- tool threads -----------------------------------------------------

    /// Register the calling thread as a tool thread: events observed on it
    /// no longer trigger callbacks. Multiple threads can be registered.
    pub fn register_tool_thread(&self) {
        let id = thread::current().id();
        self.tool_threads.lock().expect("tool threads").insert(id);
        debug!(?id, "registered tool thread");
    }

    fn on_tool_thread(&self) -> bool {
        self.tool_threads
            .lock()
            .expect("tool threads")
            .contains(&thread::current().id())
    }

    // ---- exports ----------------------------------------------------------

    /// Export a device function so injected calls can reference it by
    /// name. Must happen before a kernel using it is materialized.
    pub fn export_device_function(
        &self,
        name: impl Into<String>,
        code: Vec<u8>,
    ) -> EngineResult<u32> {
        let mut current = self.exports.lock().expect("exports lock");
        let mut table = ExportTable::clone(&current);
        let address = table.export(name, code)?;
        *current = Arc::new(table);
        Ok(address)
    }

    pub(crate) fn exports_snapshot(&self) -> Arc<ExportTable> {
        Arc::clone(&self.exports.lock().expect("exports lock"))
    }

    /// Install an external disassembler for vendor-syntax rendering.
    pub fn set_disassembler(&self, disassembler: Arc<dyn Disassembler>) {
        *self.disassembler.lock().expect("disassembler lock") = Some(disassembler);
    }

    // ---- context lifecycle ------------------------------------------------

    /// A device context came up. Creates its registry entry.
    pub fn ctx_init(&self, ctx: CtxId) {
        self.contexts.lock().expect("contexts lock").insert(
            ctx,
            Arc::new(ContextState {
                functions: Mutex::new(HashMap::new()),
            }),
        );
        info!(?ctx, "context initialized");
        if !self.on_tool_thread() {
            self.tool.at_ctx_init(ctx);
        }
    }

    /// A device context is being torn down. Releases every cached
    /// function, instruction stream, CFG and ledger of that context.
    pub fn ctx_term(&self, ctx: CtxId) {
        if !self.on_tool_thread() {
            self.tool.at_ctx_term(ctx);
        }
        self.contexts.lock().expect("contexts lock").remove(&ctx);
        info!(?ctx, "context terminated");
    }

    // ---- kernel first load ------------------------------------------------

    /// A kernel was loaded into `ctx` for the first time.
    ///
    /// Decodes it (once), builds the CFG, and runs the tool's first-load
    /// callback with the injection window open. Re-notification for an
    /// already-known kernel is a no-op. A decode failure aborts
    /// instrumentation of this kernel only: it stays dispatchable in
    /// original form, and the error is returned to the caller.
    pub fn function_first_load(
        &self,
        ctx: CtxId,
        func: FuncId,
        image: KernelImage,
    ) -> EngineResult<()> {
        let context = self.context(ctx)?;

        let function = {
            let mut functions = context.functions.lock().expect("functions lock");
            if functions.contains_key(&func) {
                return Ok(());
            }
            let function = Arc::new(Function::new(image));
            functions.insert(func, Arc::clone(&function));
            function
        };

        let decoded = function.decoded()?;
        info!(
            ?ctx,
            ?func,
            name = function.name(),
            instructions = decoded.instructions.len(),
            blocks = decoded.cfg.block_count(),
            degenerate = decoded.cfg.is_degenerate(),
            "kernel first load"
        );

        if self.on_tool_thread() {
            return Ok(());
        }

        let disassembler = self
            .disassembler
            .lock()
            .expect("disassembler lock")
            .clone();

        // Holding the ledger guard for the whole callback serializes
        // first-load handling per kernel while distinct kernels proceed in
        // parallel.
        let mut guard = function.ledger_guard();
        let ledger = guard.as_mut().expect("ledger open after decode");
        let mut load = FirstLoad {
            ctx,
            func,
            function: &*function,
            decoded: &*decoded,
            ledger,
            disassembler: disassembler.as_deref(),
        };
        self.tool.at_function_first_load(&mut load);

        Ok(())
    }

    // ---- queries ----------------------------------------------------------

    /// The cached function object for a kernel handle.
    pub fn function(&self, ctx: CtxId, func: FuncId) -> EngineResult<Arc<Function>> {
        let context = self.context(ctx)?;
        let functions = context.functions.lock().expect("functions lock");
        functions
            .get(&func)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownFunction { ctx, func }.into())
    }

    /// The decoded instruction stream and CFG of a kernel. Repeated calls
    /// return the same object identity.
    pub fn instructions(&self, ctx: CtxId, func: FuncId) -> EngineResult<Arc<DecodedCode>> {
        Ok(self.function(ctx, func)?.decoded()?)
    }

    pub fn function_name(&self, ctx: CtxId, func: FuncId) -> EngineResult<String> {
        Ok(self.function(ctx, func)?.name().to_string())
    }

    pub fn func_addr(&self, ctx: CtxId, func: FuncId) -> EngineResult<u64> {
        Ok(self.function(ctx, func)?.image().device_address())
    }

    pub fn is_kernel(&self, ctx: CtxId, func: FuncId) -> EngineResult<bool> {
        Ok(self.function(ctx, func)?.image().is_kernel())
    }

    /// Source location for an instruction offset, when available.
    pub fn line_info(
        &self,
        ctx: CtxId,
        func: FuncId,
        offset: u32,
    ) -> EngineResult<Option<(String, String, u32)>> {
        let function = self.function(ctx, func)?;
        Ok(function
            .image()
            .line_table()
            .and_then(|t| t.lookup(offset))
            .map(|info| (info.file.to_string(), info.dir.to_string(), info.line)))
    }

    // ---- control ----------------------------------------------------------

    /// Select the variant that runs from the next launch of the kernel.
    /// Idempotent; never affects an already-dispatched launch.
    pub fn enable_instrumented(&self, ctx: CtxId, func: FuncId, flag: bool) -> EngineResult<()> {
        self.function(ctx, func)?.enable_instrumented(flag);
        Ok(())
    }

    /// Copy `buf` into the kernel's launch-time parameter buffer. The
    /// buffer is re-copied into every subsequent dispatch.
    pub fn set_at_launch(&self, ctx: CtxId, func: FuncId, buf: &[u8]) -> EngineResult<()> {
        self.function(ctx, func)?.set_launch_buffer(buf);
        Ok(())
    }

    // ---- driver events ----------------------------------------------------

    /// Forward an intercepted driver call to the tool (pre or post,
    /// according to `is_exit`). Suppressed on tool threads.
    pub fn driver_event(
        &self,
        ctx: CtxId,
        call_id: u32,
        name: &str,
        is_exit: bool,
        params: &dyn Any,
        status: Option<i32>,
    ) {
        if self.on_tool_thread() {
            return;
        }
        self.tool.at_driver_event(&DriverEvent {
            ctx,
            call_id,
            name,
            is_exit,
            params,
            status,
        });
    }

    pub(crate) fn tool(&self) -> &dyn Tool {
        &*self.tool
    }

    fn context(&self, ctx: CtxId) -> EngineResult<Arc<ContextState>> {
        self.contexts
            .lock()
            .expect("contexts lock")
            .get(&ctx)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownContext { ctx }.into())
    }
}
