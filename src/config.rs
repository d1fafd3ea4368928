// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Configuration surface: per-process ceilings.
//!
//! The source fixes register/frame counts as compile-time constants. A
//! bytecode program's register and frame-count declarations are untrusted
//! input of varying shape, so here they are runtime-configured ceilings
//! checked during preparation (§4.2) rather than fixed-size arrays.

/// Upper bound for a single accounting counter (§3, `MemoryInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Ceiling for `memPublicHeap.usage`.
    pub public_heap: u64,
    /// Ceiling for `memPrivate.usage`.
    pub private: u64,
    /// Ceiling for `memReserved.usage`.
    pub reserved: u64,
    /// Ceiling for `memTotal.usage`.
    pub total: u64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            public_heap: 256 * 1024 * 1024,
            private: 256 * 1024 * 1024,
            reserved: 256 * 1024 * 1024,
            total: 512 * 1024 * 1024,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Memory accounting ceilings.
    pub memory: MemoryLimits,
    /// Maximum number of live stack frames (`StackFrame` chain depth).
    pub max_call_depth: usize,
    /// Maximum number of registers a single frame may declare.
    pub max_registers_per_frame: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory: MemoryLimits::default(),
            max_call_depth: 8192,
            max_registers_per_frame: 4096,
        }
    }
}
