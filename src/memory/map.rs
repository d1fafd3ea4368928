// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`MemoryMap`] — mapping from `u64` handle to [`MemorySlot`] (§3).
//!
//! Handles `0..=3` are reserved (`0` = null, `1`/`2`/`3` = rodata/data/bss
//! aliases for the active linking unit). User allocations start at `4`.
//! Accounting (`MemoryInfo`) is owned by `Process`, not by this map — see
//! `process::Process::public_alloc`, which orchestrates both.

use std::collections::HashMap;

use super::slot::MemorySlot;

/// Handle reserved for the null slot.
pub const NULL_HANDLE: u64 = 0;
/// Handle aliasing the active linking unit's rodata section.
pub const RODATA_HANDLE: u64 = 1;
/// Handle aliasing the active linking unit's data section.
pub const DATA_HANDLE: u64 = 2;
/// Handle aliasing the active linking unit's bss section.
pub const BSS_HANDLE: u64 = 3;
/// First handle available for user allocations.
pub const FIRST_USER_HANDLE: u64 = 4;

#[derive(Debug, Default)]
pub struct MemoryMap {
    slots: HashMap<u64, MemorySlot>,
    /// Next handle to try. Never `0..=3` (invariant, §3).
    next: u64,
}

impl MemoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next: FIRST_USER_HANDLE,
        }
    }

    #[must_use]
    pub fn get(&self, handle: u64) -> Option<&MemorySlot> {
        self.slots.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u64) -> Option<&mut MemorySlot> {
        self.slots.get_mut(&handle)
    }

    /// Find an unused handle starting from `next`, skipping the reserved
    /// range on wraparound, matching the original C
    /// `SharemindMemoryMap_find_unused_ptr` exactly: on overflow it jumps
    /// straight to `FIRST_USER_HANDLE` rather than re-scanning `1..4`
    /// (SPEC_FULL.md §11).
    fn find_unused_handle(&self) -> u64 {
        let mut index = self.next;
        loop {
            if !self.slots.contains_key(&index) {
                return index;
            }
            index = match index.checked_add(1) {
                Some(n) => n,
                None => FIRST_USER_HANDLE,
            };
        }
    }

    /// Insert `slot`, returning its freshly assigned handle, and advance the
    /// generator past it (skipping the reserved range).
    pub fn insert(&mut self, slot: MemorySlot) -> u64 {
        let handle = self.find_unused_handle();
        self.slots.insert(handle, slot);
        self.next = match handle.checked_add(1) {
            Some(n) if n >= FIRST_USER_HANDLE => n,
            _ => FIRST_USER_HANDLE,
        };
        handle
    }

    /// Insert a slot under a specific reserved handle (`1`/`2`/`3`), used
    /// when a process boots and aliases its active unit's data sections.
    pub fn insert_reserved(&mut self, handle: u64, slot: MemorySlot) {
        debug_assert!(handle < FIRST_USER_HANDLE);
        self.slots.insert(handle, slot);
    }

    /// Remove and return a slot, dropping it (running its disposal hook).
    pub fn remove(&mut self, handle: u64) -> Option<MemorySlot> {
        self.slots.remove(&handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod map_test;
