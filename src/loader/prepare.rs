// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Two-pass direct-threading preparation (§4.2).
//!
//! Pass 1 discovers instruction boundaries; pass 2 validates and rewrites
//! arguments in place. The opcode byte doubles as its own implementation
//! token — [`crate::code::op`] already assigns one opcode per dispatchable
//! operation, so there is no separate numbering scheme to maintain; pass 2's
//! "replace the opcode word with an implementation token" step (§4.2) is an
//! identity rewrite here, and [`crate::dispatch`] indexes its function table
//! directly by opcode byte.

use crate::block::CodeBlock;
use crate::code::{arg_count, op, CodeSection, InstrInfo};
use crate::error::VmError;
use crate::host::SyscallBinding;
use crate::memory::map::{BSS_HANDLE, DATA_HANDLE, RODATA_HANDLE};

/// Everything pass 2 needs to validate rewrites against, besides the section
/// itself.
pub struct PrepareContext<'a> {
    pub register_count: usize,
    pub syscall_bindings: &'a [SyscallBinding],
}

/// Run both passes over `section`, mutating it in place. `section` must
/// still hold raw, unprepared blocks (i.e. come straight from
/// [`super::container`]).
pub fn prepare(section: &mut CodeSection, ctx: &PrepareContext<'_>) -> Result<(), VmError> {
    pass1(section)?;
    pass2(section, ctx)?;
    append_sentinel(section);
    Ok(())
}

fn pass1(section: &mut CodeSection) -> Result<(), VmError> {
    let len = section.blocks.len();
    let mut offset = 0usize;
    while offset < len {
        let opcode = (section.blocks[offset].as_u64() & 0xFF) as u8;
        let Some(nargs) = arg_count(opcode) else {
            return Err(VmError::InvalidInstruction(Some(offset)));
        };
        let nargs = nargs as usize;
        let end = offset
            .checked_add(1 + nargs)
            .ok_or(VmError::InvalidArguments(Some(offset)))?;
        if end > len {
            return Err(VmError::InvalidArguments(Some(offset)));
        }
        section.valid_instrs.insert(offset);
        section.address_map.insert(
            offset,
            InstrInfo {
                opcode,
                arg_count: nargs as u8,
                source_line: None,
            },
        );
        offset = end;
    }
    Ok(())
}

fn pass2(section: &mut CodeSection, ctx: &PrepareContext<'_>) -> Result<(), VmError> {
    let offsets: Vec<usize> = section.address_map.keys().copied().collect();
    for offset in offsets {
        let info = section.address_map[&offset];
        rewrite_instruction(section, offset, info.opcode, ctx)?;
    }
    Ok(())
}

fn rewrite_instruction(
    section: &mut CodeSection,
    offset: usize,
    opcode: u8,
    ctx: &PrepareContext<'_>,
) -> Result<(), VmError> {
    match opcode {
        op::PUSH_REG
        | op::PUSHREF_REG
        | op::PUSHCREF_REG
        | op::RESIZE_STACK
        | op::ARG_POP
        | op::MEM_FREE
        | op::RETURN => {
            check_register(section, offset + 1, ctx)?;
        }
        op::MOV => {
            check_register(section, offset + 1, ctx)?;
            check_register(section, offset + 2, ctx)?;
        }
        op::LDI_U64 | op::LDI_I64 => {
            // Second argument is a literal value, not a register index.
            check_register(section, offset + 1, ctx)?;
        }
        op::JMP => {
            check_jump(section, offset, offset + 1)?;
        }
        op::JZ | op::JNZ => {
            check_register(section, offset + 1, ctx)?;
            check_jump(section, offset, offset + 2)?;
        }
        op::CALL => {
            // CALL's address operand is absolute (an instruction offset into
            // this section), unlike JMP/JZ/JNZ's relative offset.
            check_absolute_target(section, offset + 1)?;
            check_register(section, offset + 2, ctx)?;
        }
        op::SYSCALL => {
            check_syscall_index(section, offset + 1, ctx)?;
            check_register(section, offset + 2, ctx)?;
        }
        op::PUSHREF_MEM | op::PUSHCREF_MEM => {
            rewrite_static_handle_if_applicable(section, offset + 1);
        }
        op::MEM_ALLOC | op::MEM_GET_SIZE => {
            check_register(section, offset + 1, ctx)?;
            check_register(section, offset + 2, ctx)?;
        }
        op::CVT_I64_TO_F32 | op::CVT_U64_TO_F32 | op::CVT_F32_TO_I64 | op::CVT_F32_TO_U64 => {
            check_register(section, offset + 1, ctx)?;
            check_register(section, offset + 2, ctx)?;
        }
        _ if crate::code::decode_int_opcode(opcode).is_some()
            || crate::code::decode_float_opcode(opcode).is_some() =>
        {
            check_register(section, offset + 1, ctx)?;
            check_register(section, offset + 2, ctx)?;
        }
        _ => {}
    }
    Ok(())
}

fn check_register(
    section: &CodeSection,
    arg_offset: usize,
    ctx: &PrepareContext<'_>,
) -> Result<(), VmError> {
    let idx = section.blocks[arg_offset].as_u64();
    if idx >= ctx.register_count as u64 {
        return Err(VmError::InvalidArguments(Some(arg_offset)));
    }
    Ok(())
}

fn check_jump(section: &CodeSection, instr_offset: usize, arg_offset: usize) -> Result<(), VmError> {
    let rel = section.blocks[arg_offset].as_i64();
    let target = instr_offset
        .try_into()
        .ok()
        .and_then(|base: i64| base.checked_add(rel))
        .and_then(|t| usize::try_from(t).ok());
    match target {
        Some(t) if section.valid_instrs.contains(t) => Ok(()),
        _ => Err(VmError::InvalidArguments(Some(arg_offset))),
    }
}

fn check_absolute_target(section: &CodeSection, arg_offset: usize) -> Result<(), VmError> {
    let addr = section.blocks[arg_offset].as_u64();
    match usize::try_from(addr) {
        Ok(t) if section.valid_instrs.contains(t) => Ok(()),
        _ => Err(VmError::InvalidArguments(Some(arg_offset))),
    }
}

fn check_syscall_index(
    section: &CodeSection,
    arg_offset: usize,
    ctx: &PrepareContext<'_>,
) -> Result<(), VmError> {
    let idx = section.blocks[arg_offset].as_u64();
    if idx >= ctx.syscall_bindings.len() as u64 {
        return Err(VmError::InvalidArguments(Some(arg_offset)));
    }
    Ok(())
}

/// A handle argument of `u64::MAX - k` for `k in {0,1,2}` names the static
/// rodata/data/bss section of the active unit; rewrite it to the matching
/// reserved handle (§4.2: "static-memory references are rewritten to the
/// reserved handles 1/2/3").
fn rewrite_static_handle_if_applicable(section: &mut CodeSection, arg_offset: usize) {
    let raw = section.blocks[arg_offset].as_u64();
    let rewritten = match raw {
        u64::MAX => Some(RODATA_HANDLE),
        v if v == u64::MAX - 1 => Some(DATA_HANDLE),
        v if v == u64::MAX - 2 => Some(BSS_HANDLE),
        _ => None,
    };
    if let Some(handle) = rewritten {
        section.blocks[arg_offset] = CodeBlock::from_u64(handle);
    }
}

/// Append the end-of-section sentinel (§3, §4.2): any off-the-end jump lands
/// here and is caught deterministically by the dispatcher's `eof` exit.
fn append_sentinel(section: &mut CodeSection) {
    let sentinel_offset = section.blocks.len();
    section
        .blocks
        .push(CodeBlock::from_u64(u64::from(op::EOF_SENTINEL)));
    section.address_map.insert(
        sentinel_offset,
        InstrInfo {
            opcode: op::EOF_SENTINEL,
            arg_count: 0,
            source_line: None,
        },
    );
    // Deliberately NOT inserted into valid_instrs: a jump landing here is an
    // off-the-end jump and must still fail InvalidArguments/JumpToInvalidAddress.
}

#[cfg(test)]
mod prepare_test;
