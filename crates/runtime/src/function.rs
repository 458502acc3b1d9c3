// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-kernel state
//!
//! A [`Function`] owns everything the engine caches for one loaded kernel:
//! the image, the lazily decoded instruction stream and CFG, the injection
//! ledger, the materialized instrumented variant, the run-mode flag and the
//! launch-time parameter buffer.
//!
//! Decode and materialization each happen at most once, even under
//! concurrent first-use races: the first caller computes, racers block on
//! the cell and observe the same cached result — including cached errors.
//! A kernel whose decode failed is never instrumentable; a kernel whose
//! materialization failed permanently falls back to its original code.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, OnceLock,
};

use inject::{DeviceGeneration, InjectionLedger, MaterializeError};
use isa::{DecodeError, Instr};

use crate::{exports::ExportTable, image::KernelImage};

/// Decoded form of a kernel: the instruction stream and its CFG.
#[derive(Debug)]
pub struct DecodedCode {
    pub instructions: Vec<Instr>,
    pub cfg: cfg::Cfg,
}

/// All engine-side state for one loaded kernel.
pub struct Function {
    image: KernelImage,
    decoded: OnceLock<Result<Arc<DecodedCode>, DecodeError>>,
    /// `Some` from first decode until materialization freezes the ledger.
    ledger: Mutex<Option<InjectionLedger>>,
    variant: OnceLock<Result<Arc<Vec<u8>>, MaterializeError>>,
    instrumented_enabled: AtomicBool,
    launch_buffer: Mutex<Vec<u8>>,
}

impl Function {
    pub(crate) fn new(image: KernelImage) -> Self {
        Self {
            image,
            decoded: OnceLock::new(),
            ledger: Mutex::new(None),
            variant: OnceLock::new(),
            instrumented_enabled: AtomicBool::new(false),
            launch_buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn image(&self) -> &KernelImage {
        &self.image
    }

    pub fn name(&self) -> &str {
        self.image.name()
    }

    /// Decode the kernel (once) and return the cached result.
    ///
    /// Repeated calls return the same `Arc` identity; a decode failure is
    /// cached as well — the kernel is then permanently uninstrumentable,
    /// though it still dispatches in original form.
    pub fn decoded(&self) -> Result<Arc<DecodedCode>, DecodeError> {
        self.decoded
            .get_or_init(|| {
                let instructions = isa::decode_function(self.image.code().as_slice())?;
                let graph = cfg::build_cfg(&instructions);
                *self.ledger.lock().expect("ledger lock") =
                    Some(InjectionLedger::new(instructions.len()));
                Ok(Arc::new(DecodedCode {
                    instructions,
                    cfg: graph,
                }))
            })
            .clone()
    }

    /// Lock the ledger for mutation during the first-load window.
    /// `None` inside the guard means the ledger is frozen (materialized).
    pub(crate) fn ledger_guard(&self) -> MutexGuard<'_, Option<InjectionLedger>> {
        self.ledger.lock().expect("ledger lock")
    }

    /// Build the instrumented variant (once) and return the cached outcome.
    ///
    /// Freezes the ledger. Must only be called after [`Function::decoded`]
    /// succeeded.
    pub(crate) fn materialize(
        &self,
        exports: &ExportTable,
        generation: DeviceGeneration,
    ) -> Result<Arc<Vec<u8>>, MaterializeError> {
        self.variant
            .get_or_init(|| {
                let decoded = self
                    .decoded()
                    .expect("materialize is only reachable after a successful decode");
                let ledger = self
                    .ledger
                    .lock()
                    .expect("ledger lock")
                    .take()
                    .unwrap_or_else(|| InjectionLedger::new(decoded.instructions.len()));
                let code =
                    inject::materialize(&decoded.instructions, &ledger, exports, generation)?;
                Ok(Arc::new(code))
            })
            .clone()
    }

    /// Whether the instrumented variant has been built (successfully or
    /// not). Once true, the ledger is frozen for good.
    pub fn is_materialized(&self) -> bool {
        self.variant.get().is_some()
    }

    /// Select which variant runs from the next launch on. Idempotent.
    pub fn enable_instrumented(&self, enabled: bool) {
        self.instrumented_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn instrumented_enabled(&self) -> bool {
        self.instrumented_enabled.load(Ordering::SeqCst)
    }

    /// Replace the launch-time parameter buffer. The whole buffer is
    /// copied; nothing of the previous contents survives.
    pub fn set_launch_buffer(&self, bytes: &[u8]) {
        let mut buffer = self.launch_buffer.lock().expect("launch buffer lock");
        buffer.clear();
        buffer.extend_from_slice(bytes);
    }

    /// Copy of the launch buffer for one dispatch. Re-copied on every
    /// invocation so stale data can never leak between dispatches.
    pub(crate) fn launch_snapshot(&self) -> Vec<u8> {
        self.launch_buffer.lock().expect("launch buffer lock").clone()
    }
}
