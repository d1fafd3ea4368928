// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`CodeBlock`] — the 8-byte unit of instruction and argument storage.
//!
//! The source models this as a C union of integer, unsigned, floating, and
//! tagged-pointer views. Rather than a Rust `union` (which would make every
//! read an `unsafe` reinterpretation), this stores the raw 64 bits and
//! exposes typed accessors built on `to_bits`/`from_bits`, which are safe
//! and round-trip exactly — the observable contract is identical.

/// One instruction slot, argument slot, or register value: 8 bytes,
/// interpreted differently depending on context.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct CodeBlock {
    bits: u64,
}

impl CodeBlock {
    /// The all-zero block.
    pub const ZERO: Self = Self { bits: 0 };

    /// Build a block from its signed integer view.
    #[must_use]
    pub const fn from_i64(v: i64) -> Self {
        Self { bits: v as u64 }
    }

    /// Build a block from its unsigned integer view.
    #[must_use]
    pub const fn from_u64(v: u64) -> Self {
        Self { bits: v }
    }

    /// Build a block from its floating-point view.
    #[must_use]
    pub fn from_f64(v: f64) -> Self {
        Self { bits: v.to_bits() }
    }

    /// Build a block from a raw tagged-pointer/handle view.
    #[must_use]
    pub const fn from_handle(v: u64) -> Self {
        Self { bits: v }
    }

    /// Signed integer view.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.bits as i64
    }

    /// Unsigned integer view.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.bits
    }

    /// Floating-point view.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.bits)
    }

    /// Raw tagged-pointer/handle view (a memory handle or register index).
    #[must_use]
    pub const fn as_handle(self) -> u64 {
        self.bits
    }

    /// Raw 64 bits, with no interpretation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.bits
    }
}

impl core::fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CodeBlock(0x{:016x})", self.bits)
    }
}

impl From<i64> for CodeBlock {
    fn from(v: i64) -> Self {
        Self::from_i64(v)
    }
}

impl From<u64> for CodeBlock {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl From<f64> for CodeBlock {
    fn from(v: f64) -> Self {
        Self::from_f64(v)
    }
}

#[cfg(test)]
mod block_test;
