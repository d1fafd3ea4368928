// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`Program`] — immutable, loaded artifact (§3).
//!
//! Built by the loader, consumed by zero or more `Process`es. `Arc` gives us
//! the "destroyed only when no live Process references it" lifecycle for
//! free: a `Process` holds `Arc<Program>`, so the last drop runs the
//! destructor (§3 invariant).

use crate::code::CodeSection;
use crate::data::DataSection;
use crate::host::{PdHandle, SyscallBinding};

/// An immutable, prepared executable.
///
/// Only [`Loader::load`](crate::loader::Loader::load) constructs a `ready`
/// `Program`; there is no public way to mutate one afterward.
#[derive(Default)]
pub struct Program {
    pub(crate) code_sections: Vec<CodeSection>,
    pub(crate) rodata: Vec<DataSection>,
    pub(crate) data: Vec<DataSection>,
    pub(crate) bss: Vec<DataSection>,
    pub(crate) syscall_bindings: Vec<SyscallBinding>,
    pub(crate) pd_bindings: Vec<PdHandle>,
    pub(crate) active_unit: usize,
    pub(crate) ready: bool,
}

impl Program {
    #[must_use]
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn code_sections(&self) -> &[CodeSection] {
        &self.code_sections
    }

    #[must_use]
    pub fn code_section(&self, index: usize) -> Option<&CodeSection> {
        self.code_sections.get(index)
    }

    #[must_use]
    pub fn active_unit(&self) -> usize {
        self.active_unit
    }

    #[must_use]
    pub fn rodata(&self, unit: usize) -> Option<&DataSection> {
        self.rodata.get(unit)
    }

    #[must_use]
    pub fn data(&self, unit: usize) -> Option<&DataSection> {
        self.data.get(unit)
    }

    #[must_use]
    pub fn bss(&self, unit: usize) -> Option<&DataSection> {
        self.bss.get(unit)
    }

    #[must_use]
    pub fn syscall_binding(&self, index: usize) -> Option<&SyscallBinding> {
        self.syscall_bindings.get(index)
    }

    #[must_use]
    pub fn syscall_binding_count(&self) -> usize {
        self.syscall_bindings.len()
    }

    #[must_use]
    pub fn pd_binding(&self, index: usize) -> Option<PdHandle> {
        self.pd_bindings.get(index).copied()
    }

    #[must_use]
    pub fn pd_binding_count(&self) -> usize {
        self.pd_bindings.len()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.rodata.len()
    }
}

#[cfg(test)]
mod program_test;
