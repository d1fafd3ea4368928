// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`DataSection`] — raw bytes with read/write flags (§3).
//!
//! Three kinds per linking unit: `rodata` (read-only), `data` (mutable,
//! initialized from the container), `bss` (mutable, zero-initialized).

/// A single rodata/data/bss section belonging to one linking unit.
#[derive(Debug, Clone)]
pub struct DataSection {
    bytes: Vec<u8>,
    readable: bool,
    writable: bool,
}

impl DataSection {
    /// Build a section from initialized bytes (`rodata`/`data`).
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, readable: bool, writable: bool) -> Self {
        Self {
            bytes,
            readable,
            writable,
        }
    }

    /// Build a zero-initialized `bss` section of the given size.
    #[must_use]
    pub fn zeroed(size: usize, readable: bool, writable: bool) -> Self {
        Self {
            bytes: vec![0u8; size],
            readable,
            writable,
        }
    }

    /// Build the empty section synthesised when a unit omits this kind
    /// (§4.1: "parallel indexing by linking-unit is preserved").
    #[must_use]
    pub fn empty(readable: bool, writable: bool) -> Self {
        Self::from_bytes(Vec::new(), readable, writable)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        self.readable
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
