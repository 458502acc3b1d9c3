// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Variant selection at dispatch time
//!
//! Every kernel starts uninstrumented. After the first successful
//! materialization both variants exist and a per-kernel flag selects which
//! one a dispatch runs; there is no way back to the uninstrumented-only
//! state. Materialization happens lazily here, before the first
//! instrumented dispatch, and exactly once.

use std::sync::Arc;

use tracing::warn;

use crate::{
    error::EngineResult,
    exports::ExportTable,
    registry::{CtxId, Engine, FuncId},
};

/// Which variant a dispatch plan carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Instrumented,
}

/// Everything the executing layer needs for one kernel launch.
pub struct DispatchPlan {
    /// The code to run, entry at offset 0.
    pub code: Arc<Vec<u8>>,
    /// Which variant `code` is.
    pub variant: Variant,
    /// This dispatch's copy of the launch-time parameter buffer, exposed
    /// to the kernel as the launch constant bank.
    pub launch_params: Vec<u8>,
    /// Exported device functions (injected-call targets).
    pub exports: Arc<ExportTable>,
}

impl Engine {
    /// Build the dispatch plan for the next launch of a kernel.
    ///
    /// Selects the instrumented variant when it is enabled and available.
    /// If instrumentation was requested but the variant cannot be built,
    /// the plan degrades to the original code: the error is reported
    /// through [`crate::events::Tool::at_materialize_error`] and the launch
    /// proceeds unmodified rather than corrupted.
    ///
    /// Must not be called for a kernel from inside its own first-load
    /// callback: materialization freezes the ledger that callback holds
    /// open.
    pub fn dispatch(&self, ctx: CtxId, func: FuncId) -> EngineResult<DispatchPlan> {
        let function = self.function(ctx, func)?;
        let exports = self.exports_snapshot();
        let launch_params = function.launch_snapshot();

        if function.instrumented_enabled() {
            match function.decoded() {
                Ok(_) => {
                    match function.materialize(&exports, self.device_generation()) {
                        Ok(code) => {
                            return Ok(DispatchPlan {
                                code,
                                variant: Variant::Instrumented,
                                launch_params,
                                exports,
                            });
                        }
                        Err(error) => {
                            warn!(?ctx, ?func, %error, "materialization failed; running original");
                            self.tool().at_materialize_error(ctx, func, &error);
                        }
                    }
                }
                Err(error) => {
                    warn!(?ctx, ?func, %error, "kernel never decoded; running original");
                }
            }
        }

        Ok(DispatchPlan {
            code: Arc::clone(function.image().code()),
            variant: Variant::Original,
            launch_params,
            exports,
        })
    }
}
