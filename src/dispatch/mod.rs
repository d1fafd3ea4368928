// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The dispatcher: the "one indirect jump per instruction" loop (§4.3, §9)
//! that drives a [`Process`] from `Running` to `Finished`/`Crashed`/`Trapped`.
//!
//! Pause is sampled only at control-flow instructions (`jmp`/`jz`/`jnz`/
//! `call`/`return`) rather than every instruction, matching the source's
//! "cooperative" cancellation granularity (§5) — a tight arithmetic loop
//! between two branches runs to its next branch uninterrupted.

pub mod fptrap;
mod ops;

use std::sync::Arc;

use crate::error::{VmError, VmProcessException};
use crate::program::Program;

use crate::process::Process;
use fptrap::FpTrapBackend;

#[cfg(not(feature = "hardware-fp"))]
fn fp_backend() -> Box<dyn FpTrapBackend> {
    Box::new(fptrap::SoftFloat)
}

#[cfg(feature = "hardware-fp")]
fn fp_backend() -> Box<dyn FpTrapBackend> {
    // SAFETY: called once per `run()` from the thread that owns `process`;
    // falls back to soft-float classification if installation fails.
    match unsafe { fptrap::HardwareFp::install() } {
        Ok(backend) => Box::new(backend),
        Err(_) => Box::new(fptrap::SoftFloat),
    }
}

/// Run `process` until it halts, crashes, or traps (§4.5).
///
/// `process.run()`/`continue_()` have already transitioned the process to
/// `Running` and are the only callers of this function.
pub fn run(process: &mut Process) -> Result<(), VmError> {
    let program: Arc<Program> = Arc::clone(process.program());
    let backend = fp_backend();

    loop {
        let section_idx = process.current_code_section();
        let ip = process.current_ip();

        let Some(section) = program.code_sections().get(section_idx) else {
            process.crash(VmProcessException::JumpToInvalidAddress);
            return Err(VmError::RuntimeException);
        };
        let Some(opcode_block) = section.blocks.get(ip) else {
            process.crash(VmProcessException::JumpToInvalidAddress);
            return Err(VmError::RuntimeException);
        };
        let opcode = opcode_block.as_u64() as u8;

        if ops::is_control_flow(opcode) && process.pause_requested() {
            process.trap();
            return Err(VmError::RuntimeTrap);
        }

        match ops::execute(process, &program, section_idx, ip, opcode, backend.as_ref()) {
            Ok(ops::Outcome::Advanced) => continue,
            Ok(ops::Outcome::Halted) => {
                process.finish();
                return Ok(());
            }
            Err(exception) => {
                process.crash(exception);
                return Err(VmError::RuntimeException);
            }
        }
    }
}
