// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Injection ledger
//!
//! Records, per instruction and insertion point, the ordered list of calls
//! a tool wants injected, together with each call's argument bindings.
//! Mutation happens through [`CallBuilder`] values returned by
//! [`InjectionLedger::insert_call`]: argument methods exist only on the
//! builder, so a binding can never be appended without an open call.

use std::collections::{HashMap, HashSet};

use crate::error::UsageError;

/// Where an injected call executes relative to its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertPoint {
    Before,
    After,
}

/// One argument binding of an injected call, in parameter order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallArg {
    /// Truth value (0/1) of the instruction's guard predicate.
    PredVal,
    /// The full predicate mask register.
    PredReg,
    /// Constant 32-bit value.
    ConstU32(u32),
    /// Constant 64-bit value (takes an even-aligned parameter pair).
    ConstU64(u64),
    /// Value of a general register at the insertion point.
    RegVal(u8),
    /// 32-bit launch-time value at a byte offset into the launch buffer.
    LaunchU32(u16),
    /// 64-bit launch-time value at a byte offset into the launch buffer.
    LaunchU64(u16),
    /// Value of `c[bank][offset]`.
    CBankVal { bank: u8, offset: u16 },
}

/// One pending injected call.
#[derive(Debug, Clone)]
pub struct InjectedCall {
    /// Exported name of the device function to call.
    pub target: String,
    /// Argument bindings in the callee's parameter order.
    pub args: Vec<CallArg>,
}

/// Pending injections for one kernel.
///
/// Insertion order at the same (instruction, point) pair is execution
/// order. The ledger never mutates the decoded instruction sequence;
/// removal only elides the instruction from the materialized output.
pub struct InjectionLedger {
    /// Instruction count of the owning function, for index validation.
    len: usize,
    sites: HashMap<(usize, InsertPoint), Vec<InjectedCall>>,
    removed: HashSet<usize>,
}

impl InjectionLedger {
    /// Create an empty ledger for a function of `len` instructions.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            sites: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    /// Start a new injected call at `(index, point)`, appended after any
    /// calls already pending there. Returns the builder used to bind the
    /// call's arguments.
    pub fn insert_call(
        &mut self,
        index: usize,
        point: InsertPoint,
        target: impl Into<String>,
    ) -> Result<CallBuilder<'_>, UsageError> {
        self.check_index(index)?;
        let calls = self.sites.entry((index, point)).or_default();
        calls.push(InjectedCall {
            target: target.into(),
            args: Vec::new(),
        });
        Ok(CallBuilder {
            call: calls.last_mut().expect("just pushed"),
        })
    }

    /// Mark the instruction as elided in the materialized output. The
    /// decoded sequence is unchanged and stays queryable.
    pub fn remove_original(&mut self, index: usize) -> Result<(), UsageError> {
        self.check_index(index)?;
        self.removed.insert(index);
        Ok(())
    }

    /// Calls pending at `(index, point)`, in insertion order.
    pub fn calls_at(&self, index: usize, point: InsertPoint) -> &[InjectedCall] {
        self.sites
            .get(&(index, point))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the instruction is elided from the materialized output.
    pub fn is_removed(&self, index: usize) -> bool {
        self.removed.contains(&index)
    }

    /// True when nothing was injected and nothing was removed: an empty
    /// ledger materializes to the identity transform.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty() && self.removed.is_empty()
    }

    /// Total number of pending injected calls.
    pub fn call_count(&self) -> usize {
        self.sites.values().map(Vec::len).sum()
    }

    fn check_index(&self, index: usize) -> Result<(), UsageError> {
        if index >= self.len {
            return Err(UsageError::InstructionOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }
}

/// Builder for the argument list of the call most recently started with
/// [`InjectionLedger::insert_call`]. Bindings are appended in the callee's
/// actual parameter order.
pub struct CallBuilder<'a> {
    call: &'a mut InjectedCall,
}

impl CallBuilder<'_> {
    /// Bind the truth value of the instruction's guard predicate.
    pub fn arg_pred_val(&mut self) -> &mut Self {
        self.push(CallArg::PredVal)
    }

    /// Bind the full predicate mask register.
    pub fn arg_pred_reg(&mut self) -> &mut Self {
        self.push(CallArg::PredReg)
    }

    /// Bind a constant 32-bit value.
    pub fn arg_const_u32(&mut self, value: u32) -> &mut Self {
        self.push(CallArg::ConstU32(value))
    }

    /// Bind a constant 64-bit value.
    pub fn arg_const_u64(&mut self, value: u64) -> &mut Self {
        self.push(CallArg::ConstU64(value))
    }

    /// Bind the value of register `reg` at the insertion point.
    pub fn arg_reg_val(&mut self, reg: u8) -> &mut Self {
        self.push(CallArg::RegVal(reg))
    }

    /// Bind the 32-bit launch-time value at `offset`.
    pub fn arg_launch_u32(&mut self, offset: u16) -> &mut Self {
        self.push(CallArg::LaunchU32(offset))
    }

    /// Bind the 64-bit launch-time value at `offset`.
    pub fn arg_launch_u64(&mut self, offset: u16) -> &mut Self {
        self.push(CallArg::LaunchU64(offset))
    }

    /// Bind the value of `c[bank][offset]`.
    pub fn arg_cbank_val(&mut self, bank: u8, offset: u16) -> &mut Self {
        self.push(CallArg::CBankVal { bank, offset })
    }

    fn push(&mut self, arg: CallArg) -> &mut Self {
        self.call.args.push(arg);
        self
    }
}
