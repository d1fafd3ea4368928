// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`MemoryInfo`] — a per-budget accounting counter (§3).

/// Usage/limit/high-water-mark counter for one memory budget
/// (`publicHeap`, `private`, `reserved`, or `total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub usage: u64,
    pub upper_limit: u64,
    pub max: u64,
}

impl MemoryInfo {
    #[must_use]
    pub fn new(upper_limit: u64) -> Self {
        Self {
            usage: 0,
            upper_limit,
            max: 0,
        }
    }

    /// Returns `false` (no mutation performed) if `n` would exceed the
    /// configured ceiling.
    #[must_use]
    pub fn try_add(&mut self, n: u64) -> bool {
        let Some(new_usage) = self.usage.checked_add(n) else {
            return false;
        };
        if new_usage > self.upper_limit {
            return false;
        }
        self.usage = new_usage;
        if self.usage > self.max {
            self.max = self.usage;
        }
        true
    }

    /// Deduct `n` from usage. Saturates at zero — callers only ever deduct
    /// amounts they previously added.
    pub fn sub(&mut self, n: u64) {
        self.usage = self.usage.saturating_sub(n);
    }
}
