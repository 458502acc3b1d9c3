// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Export table for injectable device functions
//!
//! Device functions referenced by `insert_call` must be explicitly exported
//! by name before the kernel that uses them is materialized; this is what
//! keeps them alive past the native toolchain's dead-code elimination and
//! gives the materializer an address to transfer to.
//!
//! Exported code lives in its own region of the code address space, above
//! [`EXPORT_BASE`], so export addresses are stable no matter how much a
//! kernel grows during materialization. The two register-file intrinsics
//! occupy reserved addresses and are pre-registered in every table.

use std::collections::HashMap;

use crate::error::{EngineResult, RegistryError};

/// Base code address of the export region.
pub const EXPORT_BASE: u32 = 0x0100_0000;

/// Reserved address of the `reg_read` intrinsic.
pub const READ_REG_ADDR: u32 = 0xffff_f000;

/// Reserved address of the `reg_write` intrinsic.
pub const WRITE_REG_ADDR: u32 = 0xffff_f010;

/// Export name of the register-read intrinsic.
///
/// Device-side signature: `reg_read(reg: u64) -> u32`, reading the calling
/// thread's register file. Inside an injected call the pre-call value of a
/// clobbered register is returned, not the marshalling temporary.
pub const READ_REG_NAME: &str = "reg_read";

/// Export name of the register-write intrinsic.
///
/// Device-side signature: `reg_write(reg: u64, value: u32)`. Writes are
/// permanent application state: they survive the injected call's register
/// restore.
pub const WRITE_REG_NAME: &str = "reg_write";

/// Name → address table plus the export code region.
pub struct ExportTable {
    region: Vec<u8>,
    by_name: HashMap<String, u32>,
}

impl ExportTable {
    /// Create a table with the two intrinsics pre-registered.
    pub fn new() -> Self {
        let by_name = HashMap::from([
            (READ_REG_NAME.to_string(), READ_REG_ADDR),
            (WRITE_REG_NAME.to_string(), WRITE_REG_ADDR),
        ]);
        Self {
            region: Vec::new(),
            by_name,
        }
    }

    /// Register an exported device function from its encoded instruction
    /// stream. Returns the address injected calls will transfer to.
    ///
    /// The code is validated up front: a function that cannot be decoded
    /// can never be called, and rejecting it here surfaces the mistake at
    /// export time instead of inside a launched kernel.
    pub fn export(&mut self, name: impl Into<String>, code: Vec<u8>) -> EngineResult<u32> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateExport { name }.into());
        }
        isa::decode_function(&code)?;

        let address = EXPORT_BASE + self.region.len() as u32;
        self.region.extend_from_slice(&code);
        self.by_name.insert(name, address);
        Ok(address)
    }

    /// Address of an exported function, if registered.
    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// The concatenated code of all exported functions, based at
    /// [`EXPORT_BASE`].
    pub fn region(&self) -> &[u8] {
        &self.region
    }
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ExportTable {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            by_name: self.by_name.clone(),
        }
    }
}

impl inject::ExportResolver for ExportTable {
    fn address_of(&self, name: &str) -> Option<u32> {
        ExportTable::address_of(self, name)
    }
}

#[cfg(test)]
mod tests {
    use isa::Assembler;

    use super::*;

    fn ret_only() -> Vec<u8> {
        let mut asm = Assembler::new();
        asm.ret();
        asm.finish()
    }

    #[test]
    fn test_intrinsics_preregistered() {
        let table = ExportTable::new();
        assert_eq!(table.address_of(READ_REG_NAME), Some(READ_REG_ADDR));
        assert_eq!(table.address_of(WRITE_REG_NAME), Some(WRITE_REG_ADDR));
        assert!(table.region().is_empty());
    }

    #[test]
    fn test_export_assigns_sequential_addresses() {
        let mut table = ExportTable::new();
        let a = table.export("a", ret_only()).unwrap();
        let b = table.export("b", ret_only()).unwrap();

        assert_eq!(a, EXPORT_BASE);
        assert_eq!(b, EXPORT_BASE + 16);
        assert_eq!(table.address_of("a"), Some(a));
        assert_eq!(table.region().len(), 32);
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let mut table = ExportTable::new();
        table.export("probe", ret_only()).unwrap();
        let err = table.export("probe", ret_only()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Registry(RegistryError::DuplicateExport { .. })
        ));
    }

    #[test]
    fn test_malformed_export_rejected() {
        let mut table = ExportTable::new();
        let err = table.export("broken", vec![0xff; 16]).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Decode(_)));
    }
}
