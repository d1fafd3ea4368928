// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Floating-point trap backends (§5, §9 "Signal-based FP traps").
//!
//! Two interchangeable backends, selected by the `hardware-fp` Cargo
//! feature: [`SoftFloat`] (default, no extra dependency) inspects the
//! result of each op directly; [`HardwareFp`] installs a `SIGFPE` handler
//! via `nix` and polls a pending-exception cell the handler sets, which is
//! observably equivalent to the source's `longjmp` back to the dispatcher
//! (the dispatcher never runs another instruction between the trapping op
//! and the poll).

use crate::error::VmProcessException;

/// What the arithmetic just performed, so a backend can classify a trapped
/// or suspicious result without re-deriving the operands.
#[derive(Debug, Clone, Copy)]
pub struct FpOutcome {
    pub divisor_was_zero: bool,
    pub lhs_finite: bool,
    pub rhs_finite: bool,
    pub result: f32,
}

pub trait FpTrapBackend {
    /// Clear sticky flags before an FP op (§5).
    fn clear_sticky(&self);
    /// Inspect sticky flags / the outcome after an FP op and map to the
    /// fixed exception set (§7), if any condition fired.
    fn check(&self, outcome: FpOutcome) -> Option<VmProcessException>;
}

/// Default backend: no hardware trap installed. The dispatcher reads the
/// sticky state implied directly by the IEEE-754 result of the just-executed
/// operation (§5 "Soft-float").
#[derive(Default)]
pub struct SoftFloat;

impl FpTrapBackend for SoftFloat {
    fn clear_sticky(&self) {}

    fn check(&self, outcome: FpOutcome) -> Option<VmProcessException> {
        if outcome.result.is_nan() {
            return Some(VmProcessException::FloatingPointInvalidOperation);
        }
        if outcome.divisor_was_zero {
            return Some(VmProcessException::FloatingPointDivideByZero);
        }
        if outcome.result.is_infinite() && outcome.lhs_finite && outcome.rhs_finite {
            return Some(VmProcessException::FloatingPointOverflow);
        }
        if outcome.result == 0.0 && outcome.lhs_finite && outcome.rhs_finite {
            // Cannot distinguish "true zero" from "flushed subnormal" without
            // sticky hardware flags; soft-float mode does not raise underflow
            // on exact zero results (§1 Non-goals: soft-float does not
            // reconcile bit-exact FP behavior with the hardware backend).
            return None;
        }
        None
    }
}

#[cfg(feature = "hardware-fp")]
pub use hardware::HardwareFp;

#[cfg(feature = "hardware-fp")]
mod hardware {
    use super::{FpOutcome, FpTrapBackend};
    use crate::error::VmProcessException;
    use nix::libc::{self, c_int, c_void, siginfo_t};
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::cell::Cell;

    thread_local! {
        /// Set by the SIGFPE handler; polled by the dispatcher immediately
        /// after every FP instruction (§9 "Global SIGFPE state").
        static PENDING: Cell<Option<VmProcessException>> = Cell::new(None);
    }

    /// Maps a `siginfo_t::si_code` delivered with `SIGFPE` to the fixed
    /// exception set (§7), the same switch
    /// `_SharemindProgram_SIGFPE_handler` performs on `FPE_INTDIV` /
    /// `FPE_FLTDIV` / `FPE_FLTOVF` / `FPE_FLTUND` / `FPE_FLTRES` /
    /// `FPE_FLTINV`.
    fn exception_for_si_code(si_code: c_int) -> VmProcessException {
        match si_code {
            libc::FPE_INTDIV => VmProcessException::IntegerDivideByZero,
            libc::FPE_FLTDIV => VmProcessException::FloatingPointDivideByZero,
            libc::FPE_FLTOVF => VmProcessException::FloatingPointOverflow,
            libc::FPE_FLTUND => VmProcessException::FloatingPointUnderflow,
            libc::FPE_FLTRES => VmProcessException::FloatingPointInexactResult,
            libc::FPE_FLTINV => VmProcessException::FloatingPointInvalidOperation,
            _ => VmProcessException::UnknownFpe,
        }
    }

    extern "C" fn handle_sigfpe(_signum: c_int, info: *mut siginfo_t, _context: *mut c_void) {
        // SAFETY: the kernel hands a valid `siginfo_t` to a `SA_SIGINFO`
        // handler; `si_code` is readable for the duration of the call.
        let si_code = unsafe { (*info).si_code };
        PENDING.with(|p| p.set(Some(exception_for_si_code(si_code))));
    }

    /// Installs a process-wide `SIGFPE` handler on construction. Grounded on
    /// `tock-tock`'s `arch/posix_x86_64/src/support.rs` signal-masking
    /// pattern for the `nix::sys::signal::sigaction` call shape, and on
    /// `_SharemindProgram_SIGFPE_handler`'s `SA_SIGINFO` + `si_code` switch
    /// for the classification itself.
    pub struct HardwareFp;

    impl HardwareFp {
        /// # Safety
        /// Installs a global signal handler; must be called at most once
        /// and only from a single-threaded initialization path, matching
        /// `nix::sys::signal::sigaction`'s own safety contract.
        pub unsafe fn install() -> nix::Result<Self> {
            let action = SigAction::new(
                SigHandler::SigAction(handle_sigfpe),
                SaFlags::SA_SIGINFO,
                SigSet::empty(),
            );
            // SAFETY: `handle_sigfpe` only touches the thread-local
            // `PENDING` cell and performs no allocation or non-async-signal-
            // safe call, matching `sigaction`'s own safety contract.
            unsafe { signal::sigaction(Signal::SIGFPE, &action)? };
            Ok(Self)
        }
    }

    impl FpTrapBackend for HardwareFp {
        fn clear_sticky(&self) {
            PENDING.with(|p| p.set(None));
        }

        fn check(&self, outcome: FpOutcome) -> Option<VmProcessException> {
            if let Some(pending) = PENDING.with(Cell::take) {
                return Some(pending);
            }
            // Hardware did not trap (e.g. masked exception bit); fall back
            // to the same result-shape classification soft-float uses.
            super::SoftFloat.check(outcome)
        }
    }
}

#[cfg(test)]
mod fptrap_test;
