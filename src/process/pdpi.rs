// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! PDPI cache (§4.6): one started protection-domain-process-instance per
//! `pdbind`, created lazily on first use and torn down with the `Process`.

use crate::error::VmError;
use crate::host::PdHandle;

/// Host hook that actually starts/stops a protection-domain-process-instance
/// for a resolved [`PdHandle`]. The dynamic module loader behind this is out
/// of scope (§1); the core only ever calls through this trait.
pub trait PdpiStarter: Send + Sync {
    /// Start an instance, returning an opaque instance handle.
    fn start(&self, pd: PdHandle) -> Result<u64, VmError>;
    /// Stop a previously started instance.
    fn stop(&self, pdpi: u64);
}

#[derive(Debug, Clone, Copy)]
struct PdpiItem {
    pdpi: u64,
    module_handle: u64,
}

/// Parallel to `Program::pd_bindings`: `items[i]` is `Some` once the `i`-th
/// binding's instance has been started.
#[derive(Default)]
pub struct PdpiCache {
    items: Vec<Option<PdpiItem>>,
}

impl PdpiCache {
    #[must_use]
    pub fn new(pd_binding_count: usize) -> Self {
        Self {
            items: vec![None; pd_binding_count],
        }
    }

    /// Return the started instance handle for binding `index`, starting it
    /// via `starter` on first use.
    pub fn get_or_start(
        &mut self,
        index: usize,
        pd: PdHandle,
        module_handle: u64,
        starter: &dyn PdpiStarter,
    ) -> Result<u64, VmError> {
        let slot = self.items.get(index).ok_or(VmError::PdpiStartupFailed)?;
        if let Some(item) = slot {
            return Ok(item.pdpi);
        }
        let pdpi = starter.start(pd).map_err(|_| VmError::PdpiStartupFailed)?;
        self.items[index] = Some(PdpiItem { pdpi, module_handle });
        Ok(pdpi)
    }

    #[must_use]
    pub fn handle_for(&self, index: usize) -> Option<u64> {
        self.items.get(index).copied().flatten().map(|item| item.pdpi)
    }

    /// Stop every started instance. Called once, at process destruction.
    pub fn stop_all(&mut self, starter: &dyn PdpiStarter) {
        for item in self.items.iter_mut().filter_map(Option::take) {
            starter.stop(item.pdpi);
        }
    }
}

#[cfg(test)]
mod pdpi_test;
