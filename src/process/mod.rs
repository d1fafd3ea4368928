// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`Process`] — a running instance of a [`Program`] (§4.5).
//!
//! The source guards every field behind one mutex so pause/query calls from
//! another thread can interrupt a running dispatcher. Rust's borrow checker
//! will not let a second thread hold `&Process` while the dispatcher holds
//! `&mut Process`, so the cross-thread slice of that contract — the pause
//! flag and the last-observed state — is split out into a small, cheaply
//! cloned [`ProcessHandle`] instead of living inline on `Process` itself.
//! Everything else (frames, heap, accounting) is driven only by the thread
//! that owns the `Process` and calls [`Process::run`]/[`Process::continue_`].

pub mod pdpi;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::block::CodeBlock;
use crate::config::VmConfig;
use crate::error::{VmError, VmProcessException};
use crate::frame::StackFrame;
use crate::memory::map::{BSS_HANDLE, DATA_HANDLE, RODATA_HANDLE};
use crate::memory::{MemoryInfo, MemoryMap, MemorySlot, PrivateMemoryMap};
use crate::program::Program;

use pdpi::PdpiCache;

/// Process lifecycle states (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Initialized,
    Running,
    Trapped,
    Finished,
    Crashed,
}

/// Cross-thread handle: the pause flag and last-observed state, cloned out
/// of a `Process` before handing the process to the thread that will run it.
#[derive(Clone)]
pub struct ProcessHandle {
    pause_flag: Arc<AtomicBool>,
    observed_state: Arc<Mutex<ProcessState>>,
}

impl ProcessHandle {
    /// Request that the dispatcher leave via `trap` at its next control-flow
    /// boundary (§5). A no-op, returning `Ok`, if the process is not running
    /// or is already trapped (testable property 6: trap idempotence).
    pub fn pause(&self) -> Result<(), VmError> {
        let state = *self.observed_state.lock().map_err(|_| VmError::LockFailure)?;
        match state {
            ProcessState::Running => {
                self.pause_flag.store(true, Ordering::SeqCst);
                Ok(())
            }
            ProcessState::Trapped => Ok(()),
            _ => Err(VmError::InvalidInputState),
        }
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.observed_state.lock().expect("process state mutex poisoned")
    }
}

pub struct Process {
    program: Arc<Program>,
    config: VmConfig,
    state: ProcessState,
    observed_state: Arc<Mutex<ProcessState>>,
    pause_flag: Arc<AtomicBool>,

    pub(crate) frames: Vec<StackFrame>,
    pub(crate) next_frame: Option<StackFrame>,

    pub(crate) memory_map: MemoryMap,
    pub(crate) private_memory_map: PrivateMemoryMap,

    pub(crate) mem_public_heap: MemoryInfo,
    pub(crate) mem_private: MemoryInfo,
    pub(crate) mem_reserved: MemoryInfo,
    pub(crate) mem_total: MemoryInfo,

    pub(crate) current_code_section: usize,
    pub(crate) current_ip: usize,
    pub(crate) return_value: CodeBlock,
    pub(crate) exception_value: VmProcessException,

    pub(crate) pdpi_cache: PdpiCache,
}

impl Process {
    /// `new(program)` (§4.5): fails unless `program` is ready.
    pub fn new(program: Arc<Program>, config: VmConfig) -> Result<Self, VmError> {
        if !program.is_ready() {
            return Err(VmError::InvalidInputState);
        }

        let mut memory_map = MemoryMap::new();
        let unit = program.active_unit();
        let rodata = program.rodata(unit).expect("active unit has rodata");
        let data = program.data(unit).expect("active unit has data");
        let bss = program.bss(unit).expect("active unit has bss");
        memory_map.insert_reserved(
            RODATA_HANDLE,
            MemorySlot::owned_with_flags(rodata.bytes().to_vec(), true, false),
        );
        memory_map.insert_reserved(
            DATA_HANDLE,
            MemorySlot::owned_with_flags(data.bytes().to_vec(), true, true),
        );
        memory_map.insert_reserved(
            BSS_HANDLE,
            MemorySlot::owned_with_flags(bss.bytes().to_vec(), true, true),
        );

        let mem = &config.memory;
        let pd_binding_count = program.pd_binding_count();

        debug!("process initialized against active unit {unit}");

        Ok(Self {
            program,
            config,
            state: ProcessState::Initialized,
            observed_state: Arc::new(Mutex::new(ProcessState::Initialized)),
            pause_flag: Arc::new(AtomicBool::new(false)),
            frames: vec![StackFrame::global(0)],
            next_frame: None,
            memory_map,
            private_memory_map: PrivateMemoryMap::new(),
            mem_public_heap: MemoryInfo::new(mem.public_heap),
            mem_private: MemoryInfo::new(mem.private),
            mem_reserved: MemoryInfo::new(mem.reserved),
            mem_total: MemoryInfo::new(mem.total),
            current_code_section: 0,
            current_ip: 0,
            return_value: CodeBlock::ZERO,
            exception_value: VmProcessException::None,
            pdpi_cache: PdpiCache::new(pd_binding_count),
        })
    }

    /// A cheaply cloned handle for pausing/observing this process from
    /// another thread (§5). Take this before calling [`Process::run`].
    #[must_use]
    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            pause_flag: Arc::clone(&self.pause_flag),
            observed_state: Arc::clone(&self.observed_state),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[must_use]
    pub fn return_value(&self) -> i64 {
        self.return_value.as_i64()
    }

    #[must_use]
    pub fn exception(&self) -> VmProcessException {
        self.exception_value
    }

    #[must_use]
    pub fn current_code_section(&self) -> usize {
        self.current_code_section
    }

    #[must_use]
    pub fn current_ip(&self) -> usize {
        self.current_ip
    }

    #[must_use]
    pub fn public_heap_usage(&self) -> MemoryInfo {
        self.mem_public_heap
    }

    #[must_use]
    pub fn total_usage(&self) -> MemoryInfo {
        self.mem_total
    }

    fn set_state(&mut self, state: ProcessState) {
        self.state = state;
        *self.observed_state.lock().expect("process state mutex poisoned") = state;
    }

    fn check_pause_requested(&self) -> bool {
        self.pause_flag.swap(false, Ordering::SeqCst)
    }

    /// `run()` (§4.5): requires `Initialized` or `Trapped`, transitions to
    /// `Running`, enters the dispatcher.
    pub fn run(&mut self) -> Result<(), VmError> {
        match self.state {
            ProcessState::Initialized | ProcessState::Trapped => {}
            _ => return Err(VmError::InvalidInputState),
        }
        self.set_state(ProcessState::Running);
        crate::dispatch::run(self)
    }

    /// `continue()` is `run()` from `Trapped` (§4.5).
    pub fn continue_(&mut self) -> Result<(), VmError> {
        if self.state != ProcessState::Trapped {
            return Err(VmError::InvalidInputState);
        }
        self.run()
    }

    pub(crate) fn finish(&mut self) {
        self.set_state(ProcessState::Finished);
    }

    pub(crate) fn crash(&mut self, exception: VmProcessException) {
        warn!("process crashed: {exception}");
        self.exception_value = exception;
        self.set_state(ProcessState::Crashed);
    }

    pub(crate) fn trap(&mut self) {
        trace!("process trapped at section {} ip {}", self.current_code_section, self.current_ip);
        self.set_state(ProcessState::Trapped);
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.check_pause_requested()
    }

    /// Public alloc procedure (§4.4).
    pub fn public_alloc(&mut self, n_bytes: u64) -> u64 {
        if n_bytes == 0 {
            return 0;
        }
        let Ok(n_usize) = usize::try_from(n_bytes) else {
            return 0;
        };
        if !self.mem_total.try_add(n_bytes) {
            return 0;
        }
        if !self.mem_public_heap.try_add(n_bytes) {
            self.mem_total.sub(n_bytes);
            return 0;
        }
        let slot = MemorySlot::owned(vec![0u8; n_usize]);
        self.memory_map.insert(slot)
    }

    /// Public free procedure (§4.4).
    pub fn public_free(&mut self, handle: u64) -> Result<(), VmProcessException> {
        let slot = self
            .memory_map
            .get(handle)
            .ok_or(VmProcessException::InvalidReference)?;
        if slot.nrefs() != 0 {
            return Err(VmProcessException::MemoryInUse);
        }
        let size = slot.size() as u64;
        self.memory_map.remove(handle);
        self.mem_public_heap.sub(size);
        self.mem_total.sub(size);
        Ok(())
    }

    /// Private alloc (host-side allocation requested by a syscall, §4.4).
    pub fn private_alloc(&mut self, n_bytes: usize) -> Option<usize> {
        let n_u64 = n_bytes as u64;
        if !self.mem_total.try_add(n_u64) {
            return None;
        }
        if !self.mem_private.try_add(n_u64) {
            self.mem_total.sub(n_u64);
            return None;
        }
        let buf = vec![0u8; n_bytes].into_boxed_slice();
        let ptr = Box::into_raw(buf) as *mut u8 as usize;
        self.private_memory_map.insert(ptr, n_bytes);
        Some(ptr)
    }

    pub fn private_free(&mut self, ptr: usize) -> bool {
        let Some(size) = self.private_memory_map.remove(ptr) else {
            return false;
        };
        // SAFETY: `ptr` was produced by `Box::into_raw` in `private_alloc` with
        // this exact size, and `private_memory_map` only yields each pointer once.
        unsafe {
            drop(Box::from_raw(std::slice::from_raw_parts_mut(ptr as *mut u8, size)));
        }
        let size = size as u64;
        self.mem_private.sub(size);
        self.mem_total.sub(size);
        true
    }

    /// Reserve/release move bytes between the `reserved` and `total`
    /// counters without allocating (§4.4).
    pub fn private_reserve(&mut self, n_bytes: u64) -> bool {
        if !self.mem_total.try_add(n_bytes) {
            return false;
        }
        if !self.mem_reserved.try_add(n_bytes) {
            self.mem_total.sub(n_bytes);
            return false;
        }
        true
    }

    pub fn private_release(&mut self, n_bytes: u64) {
        self.mem_reserved.sub(n_bytes);
        self.mem_total.sub(n_bytes);
    }
}

#[cfg(test)]
mod process_test;
