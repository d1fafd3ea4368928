// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`MemorySlot`] — a heap allocation tracked by handle and refcount (§3).

/// Delegated-disposal hook for a slot that wraps a static data section or a
/// host-owned buffer instead of an owned heap block.
pub struct Specials {
    /// Called instead of freeing `data` when the slot is destroyed.
    /// `None` means destruction is a deliberate no-op (the original C
    /// `SharemindMemorySlot_destroy` takes this path for slots it does not
    /// own: `if (specials) { if (specials.free) specials.free(); }` with no
    /// `else` — see `SPEC_FULL.md` §11).
    pub free: Option<Box<dyn FnOnce() + Send>>,
    pub readable: bool,
    pub writable: bool,
}

impl core::fmt::Debug for Specials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Specials")
            .field("has_free", &self.free.is_some())
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

/// A heap allocation, or a delegated wrapper around a data section / host
/// buffer, tracked by reference count.
#[derive(Debug)]
pub struct MemorySlot {
    data: Option<Vec<u8>>,
    size: usize,
    nrefs: u64,
    readable: bool,
    writable: bool,
    specials: Option<Specials>,
}

impl MemorySlot {
    /// A plain, owned, read-write heap block (public `alloc`, §4.4).
    #[must_use]
    pub fn owned(data: Vec<u8>) -> Self {
        Self::owned_with_flags(data, true, true)
    }

    /// An owned block with explicit read/write flags — used for a process's
    /// mutable copies of a unit's rodata/data/bss (§4.5), which are owned
    /// outright but must not all report `writable() == true`.
    #[must_use]
    pub fn owned_with_flags(data: Vec<u8>, readable: bool, writable: bool) -> Self {
        let size = data.len();
        Self {
            data: Some(data),
            size,
            nrefs: 0,
            readable,
            writable,
            specials: None,
        }
    }

    /// A slot delegating disposal to `specials` (aliases a data section or
    /// host-owned buffer).
    #[must_use]
    pub fn delegated(ptr_hint_size: usize, specials: Specials) -> Self {
        let readable = specials.readable;
        let writable = specials.writable;
        Self {
            data: None,
            size: ptr_hint_size,
            nrefs: 0,
            readable,
            writable,
            specials: Some(specials),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn nrefs(&self) -> u64 {
        self.nrefs
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        self.readable
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Bump the reference count. Returns `false` (mapped by callers to
    /// `OutOfMemory`) if it would wrap around `u64::MAX`.
    #[must_use]
    pub fn bump_ref(&mut self) -> bool {
        match self.nrefs.checked_add(1) {
            Some(n) => {
                self.nrefs = n;
                true
            }
            None => false,
        }
    }

    /// Drop one reference. Saturates at zero; callers only ever decrement
    /// references they previously bumped, so this never underflows in
    /// practice, but saturating keeps a bug from wrapping the counter.
    pub fn unbump_ref(&mut self) {
        self.nrefs = self.nrefs.saturating_sub(1);
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for MemorySlot {
    fn drop(&mut self) {
        if let Some(specials) = self.specials.take() {
            if let Some(free) = specials.free {
                free();
            }
            // else: delegated slot with no free hook — deliberate no-op.
        }
        // Plain owned slots free their `Vec<u8>` through its own `Drop`.
    }
}

#[cfg(test)]
mod slot_test;
