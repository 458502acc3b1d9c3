// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source line information
//!
//! Optional per-image table mapping instruction offsets to source
//! locations. Lookup follows line-program conventions: an entry covers all
//! offsets from its own up to (not including) the next entry's.

/// One source file referenced by the table.
struct SourceFile {
    dir: String,
    file: String,
}

struct LineEntry {
    offset: u32,
    file: usize,
    line: u32,
}

/// Resolved location of one instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo<'a> {
    pub file: &'a str,
    pub dir: &'a str,
    pub line: u32,
}

/// Offset → source location table for one kernel image.
#[derive(Default)]
pub struct LineTable {
    files: Vec<SourceFile>,
    entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file; returns its index for `add_entry`.
    pub fn add_file(&mut self, dir: impl Into<String>, file: impl Into<String>) -> usize {
        self.files.push(SourceFile {
            dir: dir.into(),
            file: file.into(),
        });
        self.files.len() - 1
    }

    /// Record that instructions from `offset` onwards come from `line` of
    /// the given file. Entries must be added in ascending offset order.
    pub fn add_entry(&mut self, offset: u32, file: usize, line: u32) {
        debug_assert!(file < self.files.len(), "unregistered file index");
        debug_assert!(
            self.entries.last().map_or(true, |e| e.offset < offset),
            "entries must be in ascending offset order"
        );
        self.entries.push(LineEntry { offset, file, line });
    }

    /// Resolve an instruction offset to its source location, if covered.
    pub fn lookup(&self, offset: u32) -> Option<LineInfo<'_>> {
        let idx = self.entries.partition_point(|e| e.offset <= offset);
        let entry = self.entries[..idx].last()?;
        let source = &self.files[entry.file];
        Some(LineInfo {
            file: &source.file,
            dir: &source.dir,
            line: entry.line,
        })
    }
}
