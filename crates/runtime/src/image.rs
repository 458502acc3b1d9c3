// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel image handed to the engine on first load
//!
//! The driver-interception layer owns loading; the engine receives the raw
//! code object plus the metadata it needs for tool queries. Nothing here is
//! read from disk.

use std::sync::Arc;

use crate::line_info::LineTable;

/// One loaded kernel (or device function) as delivered by the driver layer.
pub struct KernelImage {
    name: String,
    code: Arc<Vec<u8>>,
    device_address: u64,
    is_kernel: bool,
    line_table: Option<LineTable>,
}

impl KernelImage {
    /// Create an image from its raw code bytes.
    pub fn new(name: impl Into<String>, code: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            code: Arc::new(code),
            device_address: 0,
            is_kernel: true,
            line_table: None,
        }
    }

    /// Set the device load address reported by the driver.
    pub fn at_address(mut self, address: u64) -> Self {
        self.device_address = address;
        self
    }

    /// Mark this image as a non-kernel device function.
    pub fn device_function(mut self) -> Self {
        self.is_kernel = false;
        self
    }

    /// Attach a source line table (images built with line info).
    pub fn with_line_table(mut self, table: LineTable) -> Self {
        self.line_table = Some(table);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &Arc<Vec<u8>> {
        &self.code
    }

    pub fn device_address(&self) -> u64 {
        self.device_address
    }

    pub fn is_kernel(&self) -> bool {
        self.is_kernel
    }

    pub fn line_table(&self) -> Option<&LineTable> {
        self.line_table.as_ref()
    }
}
