// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The instruction set's semantic alphabet (§4.3): one function per
//! micro-operation family, keyed by opcode byte — the opcode doubles as its
//! own implementation token (see `loader::prepare`), so dispatch is a single
//! `match` the compiler lowers to a jump table, matching the "one indirect
//! jump per instruction" contract (§9) without a thousand-line `match`.

use crate::block::CodeBlock;
use crate::code::{decode_float_opcode, decode_int_opcode, op, FloatOp, IntOp, IntWidth};
use crate::error::VmProcessException;
use crate::frame::{ReturnTarget, StackFrame};
use crate::host::SyscallBinding;
use crate::process::Process;
use crate::program::Program;
use crate::reference::{CReference, Reference};
use crate::syscall::{SyscallContext, SyscallStatus};

use super::fptrap::{FpOutcome, FpTrapBackend};

/// What happened after executing one instruction.
pub enum Outcome {
    /// `ip`/`current_code_section` already updated; keep looping.
    Advanced,
    /// `return` from the global frame, or an explicit `halt`.
    Halted,
}

/// A control-flow instruction (call, jump, conditional jump, return) is the
/// only point the dispatcher checks the pause flag (§5).
#[must_use]
pub fn is_control_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        op::JMP | op::JZ | op::JNZ | op::CALL | op::RETURN
    )
}

/// Execute the instruction at `(section_idx, ip)`, mutating `process`
/// in place (advancing `current_ip`/`current_code_section` on the
/// `Advanced` path).
pub fn execute(
    process: &mut Process,
    program: &Program,
    section_idx: usize,
    ip: usize,
    opcode: u8,
    fp_backend: &dyn FpTrapBackend,
) -> Result<Outcome, VmProcessException> {
    let section = &program.code_sections()[section_idx];
    let arg = |n: usize| section.blocks[ip + 1 + n];

    match opcode {
        op::NOP => advance(process, 1),

        op::PUSH_IMM => {
            ensure_next_frame(process);
            process.next_frame.as_mut().unwrap().stack.push(arg(0));
            advance(process, 2)
        }
        op::PUSH_REG => {
            let v = read_reg(this_frame(process), arg(0).as_u64() as usize)?;
            ensure_next_frame(process);
            process.next_frame.as_mut().unwrap().stack.push(v);
            advance(process, 2)
        }
        op::PUSHREF_REG => {
            let reg = arg(0).as_u64() as usize;
            // Aliases the register block directly; no slot is involved, so
            // there is no `nrefs` to bump.
            read_reg(this_frame(process), reg)?;
            ensure_next_frame(process);
            process
                .next_frame
                .as_mut()
                .unwrap()
                .refstack
                .push(Reference::local(std::mem::size_of::<CodeBlock>(), reg));
            advance(process, 2)
        }
        op::PUSHREF_MEM => {
            push_reference(process, arg(0).as_u64())?;
            advance(process, 2)
        }
        op::PUSHREF_REF => {
            let idx = arg(0).as_u64() as usize;
            let r = *this_frame(process)
                .refstack
                .get(idx)
                .ok_or(VmProcessException::InvalidReference)?;
            bump_ref_target(process, r.target)?;
            ensure_next_frame(process);
            process.next_frame.as_mut().unwrap().refstack.push(r);
            advance(process, 2)
        }
        op::PUSHCREF_REG => {
            let reg = arg(0).as_u64() as usize;
            read_reg(this_frame(process), reg)?;
            ensure_next_frame(process);
            process
                .next_frame
                .as_mut()
                .unwrap()
                .crefstack
                .push(CReference::local(std::mem::size_of::<CodeBlock>(), reg));
            advance(process, 2)
        }
        op::PUSHCREF_MEM => {
            push_const_reference(process, arg(0).as_u64())?;
            advance(process, 2)
        }
        op::PUSHCREF_REF => {
            let idx = arg(0).as_u64() as usize;
            let cr = *this_frame(process)
                .crefstack
                .get(idx)
                .ok_or(VmProcessException::InvalidReference)?;
            bump_ref_target(process, cr.target)?;
            ensure_next_frame(process);
            process.next_frame.as_mut().unwrap().crefstack.push(cr);
            advance(process, 2)
        }
        op::CLEAR_STACK => {
            release_next_frame(process);
            advance(process, 1)
        }
        op::RESIZE_STACK => {
            let n = arg(0).as_u64() as usize;
            this_frame_mut(process).resize(n);
            advance(process, 2)
        }
        op::LDI_U64 => {
            let (reg, v) = (arg(0).as_u64() as usize, arg(1));
            write_reg(this_frame_mut(process), reg, v)?;
            advance(process, 3)
        }
        op::LDI_I64 => {
            let (reg, v) = (arg(0).as_u64() as usize, arg(1));
            write_reg(this_frame_mut(process), reg, v)?;
            advance(process, 3)
        }
        op::MOV => {
            let (dst, src) = (arg(0).as_u64() as usize, arg(1).as_u64() as usize);
            let v = read_reg(this_frame(process), src)?;
            write_reg(this_frame_mut(process), dst, v)?;
            advance(process, 3)
        }
        op::JMP => {
            let target = jump_target(ip, arg(0).as_i64())?;
            set_ip(process, section_idx, target);
            Ok(Outcome::Advanced)
        }
        op::JZ | op::JNZ => {
            let reg = arg(0).as_u64() as usize;
            let v = read_reg(this_frame(process), reg)?;
            let take = (v.as_u64() == 0) == (opcode == op::JZ);
            if take {
                let target = jump_target(ip, arg(1).as_i64())?;
                set_ip(process, section_idx, target);
            } else {
                return advance(process, 3);
            }
            Ok(Outcome::Advanced)
        }
        op::CALL => {
            // Unlike JMP/JZ/JNZ, CALL's address operand is absolute - an
            // instruction offset into this section, not a displacement from
            // `ip` - matching SMVM_MI_CALL/SHAREMIND_MI_CALL.
            let target = arg(0).as_u64() as usize;
            let ret_reg = arg(1).as_u64() as usize;
            let nargs = arg(2).as_u64() as usize;
            do_call(process, section_idx, ip, target, ret_reg, nargs)?;
            Ok(Outcome::Advanced)
        }
        op::SYSCALL => {
            let idx = arg(0).as_u64() as usize;
            let ret_reg = arg(1).as_u64() as usize;
            let nargs = arg(2).as_u64() as usize;
            do_syscall(process, program, idx, ret_reg, nargs)?;
            advance(process, 4)
        }
        op::RETURN => {
            let reg = arg(0).as_u64() as usize;
            let v = read_reg(this_frame(process), reg)?;
            do_return(process, v)
        }
        op::HALT => Ok(Outcome::Halted),
        op::MEM_ALLOC => {
            let (dest, size_reg) = (arg(0).as_u64() as usize, arg(1).as_u64() as usize);
            let n = read_reg(this_frame(process), size_reg)?.as_u64();
            let handle = process.public_alloc(n);
            write_reg(this_frame_mut(process), dest, CodeBlock::from_u64(handle))?;
            advance(process, 3)
        }
        op::MEM_FREE => {
            let reg = arg(0).as_u64() as usize;
            let handle = read_reg(this_frame(process), reg)?.as_u64();
            process.public_free(handle)?;
            advance(process, 2)
        }
        op::MEM_GET_SIZE => {
            let (dest, handle_reg) = (arg(0).as_u64() as usize, arg(1).as_u64() as usize);
            let handle = read_reg(this_frame(process), handle_reg)?.as_u64();
            let size = process
                .memory_map
                .get(handle)
                .ok_or(VmProcessException::InvalidReference)?
                .size() as u64;
            write_reg(this_frame_mut(process), dest, CodeBlock::from_u64(size))?;
            advance(process, 3)
        }
        op::ARG_POP => {
            let dest = arg(0).as_u64() as usize;
            let v = pop_arg(process)?;
            write_reg(this_frame_mut(process), dest, v)?;
            advance(process, 2)
        }
        op::ASSERT => {
            let reg = arg(0).as_u64() as usize;
            let v = read_reg(this_frame(process), reg)?;
            if v.as_u64() == 0 {
                return Err(VmProcessException::UserAssert);
            }
            advance(process, 2)
        }
        op::CVT_I64_TO_F32 => cvt(process, arg(0), arg(1), |v| f32_to_block(v.as_i64() as f32)),
        op::CVT_U64_TO_F32 => cvt(process, arg(0), arg(1), |v| f32_to_block(v.as_u64() as f32)),
        op::CVT_F32_TO_I64 => cvt(process, arg(0), arg(1), |v| CodeBlock::from_i64(block_as_f32(v) as i64)),
        op::CVT_F32_TO_U64 => cvt(process, arg(0), arg(1), |v| CodeBlock::from_u64(block_as_f32(v) as u64)),
        op::EOF_SENTINEL => Err(VmProcessException::JumpToInvalidAddress),
        _ => {
            if let Some((int_op, width, signed)) = decode_int_opcode(opcode) {
                let (dest, src) = (arg(0).as_u64() as usize, arg(1).as_u64() as usize);
                let a = read_reg(this_frame(process), dest)?;
                let b = read_reg(this_frame(process), src)?;
                let result = int_arith(int_op, width, signed, a, b)?;
                write_reg(this_frame_mut(process), dest, result)?;
                return advance(process, 3);
            }
            if let Some(float_op) = decode_float_opcode(opcode) {
                let (dest, src) = (arg(0).as_u64() as usize, arg(1).as_u64() as usize);
                let a = block_as_f32(read_reg(this_frame(process), dest)?);
                let b = block_as_f32(read_reg(this_frame(process), src)?);
                let result = float_arith(float_op, a, b, fp_backend)?;
                write_reg(this_frame_mut(process), dest, f32_to_block(result))?;
                return advance(process, 3);
            }
            Err(VmProcessException::InvalidArgument)
        }
    }
}

fn advance(process: &mut Process, n: usize) -> Result<Outcome, VmProcessException> {
    process.current_ip += n;
    Ok(Outcome::Advanced)
}

fn set_ip(process: &mut Process, section_idx: usize, ip: usize) {
    process.current_code_section = section_idx;
    process.current_ip = ip;
}

fn this_frame(process: &Process) -> &StackFrame {
    process.frames.last().expect("global frame always present")
}

fn this_frame_mut(process: &mut Process) -> &mut StackFrame {
    process.frames.last_mut().expect("global frame always present")
}

fn read_reg(frame: &StackFrame, idx: usize) -> Result<CodeBlock, VmProcessException> {
    frame
        .stack
        .get(idx)
        .copied()
        .ok_or(VmProcessException::InvalidIndexRegister)
}

fn write_reg(frame: &mut StackFrame, idx: usize, v: CodeBlock) -> Result<(), VmProcessException> {
    let slot = frame
        .stack
        .get_mut(idx)
        .ok_or(VmProcessException::InvalidIndexRegister)?;
    *slot = v;
    Ok(())
}

fn pop_arg(process: &mut Process) -> Result<CodeBlock, VmProcessException> {
    let frame = this_frame_mut(process);
    let v = frame
        .stack
        .get(frame.arg_cursor)
        .copied()
        .ok_or(VmProcessException::InvalidIndexStack)?;
    frame.arg_cursor += 1;
    Ok(v)
}

fn ensure_next_frame(process: &mut Process) {
    if process.next_frame.is_none() {
        process.next_frame = Some(StackFrame::new(0, None));
    }
}

/// Drop `next_frame`, releasing every reference it holds (§3 invariant:
/// every bump is matched by exactly one unbump).
fn release_next_frame(process: &mut Process) {
    if let Some(frame) = process.next_frame.take() {
        release_frame_refs(process, &frame);
    }
}

fn release_frame_refs(process: &mut Process, frame: &StackFrame) {
    for r in &frame.refstack {
        if let Some(handle) = r.internal() {
            if let Some(slot) = process.memory_map.get_mut(handle) {
                slot.unbump_ref();
            }
        }
    }
    for r in &frame.crefstack {
        if let Some(handle) = r.internal() {
            if let Some(slot) = process.memory_map.get_mut(handle) {
                slot.unbump_ref();
            }
        }
    }
}

/// Bump the slot backing `target`, if any (§3 invariant: every bump is
/// matched by exactly one unbump). A no-op for a local target, which has no
/// slot.
fn bump_ref_target(
    process: &mut Process,
    target: crate::reference::RefTarget,
) -> Result<(), VmProcessException> {
    use crate::reference::RefTarget;
    if let RefTarget::Slot(handle) = target {
        let slot = process
            .memory_map
            .get_mut(handle)
            .ok_or(VmProcessException::InvalidReference)?;
        if !slot.bump_ref() {
            return Err(VmProcessException::OutOfMemory);
        }
    }
    Ok(())
}

fn push_reference(process: &mut Process, handle: u64) -> Result<(), VmProcessException> {
    let slot = process
        .memory_map
        .get_mut(handle)
        .ok_or(VmProcessException::InvalidReference)?;
    if !slot.bump_ref() {
        return Err(VmProcessException::OutOfMemory);
    }
    let size = slot.size();
    ensure_next_frame(process);
    process
        .next_frame
        .as_mut()
        .unwrap()
        .refstack
        .push(Reference::to_slot(size, handle));
    Ok(())
}

fn push_const_reference(process: &mut Process, handle: u64) -> Result<(), VmProcessException> {
    let slot = process
        .memory_map
        .get_mut(handle)
        .ok_or(VmProcessException::InvalidReference)?;
    if !slot.bump_ref() {
        return Err(VmProcessException::OutOfMemory);
    }
    let size = slot.size();
    ensure_next_frame(process);
    process
        .next_frame
        .as_mut()
        .unwrap()
        .crefstack
        .push(CReference::to_slot(size, handle));
    Ok(())
}

fn jump_target(ip: usize, rel: i64) -> Result<usize, VmProcessException> {
    let base = i64::try_from(ip).map_err(|_| VmProcessException::JumpToInvalidAddress)?;
    let target = base
        .checked_add(rel)
        .ok_or(VmProcessException::JumpToInvalidAddress)?;
    usize::try_from(target).map_err(|_| VmProcessException::JumpToInvalidAddress)
}

fn do_call(
    process: &mut Process,
    section_idx: usize,
    ip: usize,
    target: usize,
    ret_reg: usize,
    nargs: usize,
) -> Result<(), VmProcessException> {
    if process.frames.len() >= process.config().max_call_depth {
        release_next_frame(process);
        return Err(VmProcessException::OutOfMemory);
    }
    ensure_next_frame(process);
    let mut callee = process.next_frame.take().unwrap();
    if callee.stack.len() != nargs {
        release_frame_refs(process, &callee);
        return Err(VmProcessException::InvalidArgument);
    }
    callee.return_target = Some(ReturnTarget {
        section: section_idx,
        resume_offset: ip + 4,
        return_value_reg: ret_reg,
    });
    process.frames.push(callee);
    set_ip(process, section_idx, target);
    Ok(())
}

fn do_return(process: &mut Process, value: CodeBlock) -> Result<Outcome, VmProcessException> {
    release_next_frame(process);
    let finished = process.frames.pop().expect("global frame always present");
    release_frame_refs(process, &finished);

    match finished.return_target {
        None => {
            process.return_value = value;
            Ok(Outcome::Halted)
        }
        Some(target) => {
            process.return_value = value;
            write_reg(this_frame_mut(process), target.return_value_reg, value)?;
            set_ip(process, target.section, target.resume_offset);
            Ok(Outcome::Advanced)
        }
    }
}

fn do_syscall(
    process: &mut Process,
    program: &Program,
    idx: usize,
    ret_reg: usize,
    nargs: usize,
) -> Result<(), VmProcessException> {
    let binding: SyscallBinding = program
        .syscall_binding(idx)
        .cloned()
        .ok_or(VmProcessException::InvalidIndexSyscall)?;
    ensure_next_frame(process);
    let callee = process.next_frame.take().unwrap();
    if callee.stack.len() != nargs {
        release_frame_refs(process, &callee);
        return Err(VmProcessException::InvalidArgument);
    }

    let mut ret_value = CodeBlock::ZERO;
    let status = {
        let mut ctx = ProcessSyscallContext {
            process: &mut *process,
            module_handle: binding.module_handle,
        };
        (binding.callable)(
            &callee.stack,
            &callee.refstack,
            &callee.crefstack,
            Some(&mut ret_value),
            &mut ctx,
        )
    };

    release_frame_refs(process, &callee);

    match status {
        SyscallStatus::Ok => {
            write_reg(this_frame_mut(process), ret_reg, ret_value)?;
            Ok(())
        }
        SyscallStatus::OutOfMemory => Err(VmProcessException::OutOfMemory),
        SyscallStatus::InvalidCall => Err(VmProcessException::InvalidSyscallInvocation),
        SyscallStatus::GeneralFailure => Err(VmProcessException::SyscallFailure),
    }
}

struct ProcessSyscallContext<'p> {
    process: &'p mut Process,
    module_handle: u64,
}

impl SyscallContext for ProcessSyscallContext<'_> {
    fn get_pd_process_handle(&mut self, index: usize) -> Option<u64> {
        self.process.pdpi_cache.handle_for(index)
    }

    fn public_alloc(&mut self, n_bytes: u64) -> u64 {
        self.process.public_alloc(n_bytes)
    }

    fn public_free(&mut self, handle: u64) -> bool {
        self.process.public_free(handle).is_ok()
    }

    fn public_ptr_size(&mut self, handle: u64) -> Option<usize> {
        self.process.memory_map.get(handle).map(|s| s.size())
    }

    fn public_ptr_data(&mut self, handle: u64) -> Option<*mut u8> {
        self.process
            .memory_map
            .get_mut(handle)
            .map(|s| s.bytes_mut().as_mut_ptr())
    }

    fn private_alloc(&mut self, n_bytes: usize) -> Option<usize> {
        self.process.private_alloc(n_bytes)
    }

    fn private_free(&mut self, ptr: usize) -> bool {
        self.process.private_free(ptr)
    }

    fn private_reserve(&mut self, n_bytes: u64) -> bool {
        self.process.private_reserve(n_bytes)
    }

    fn private_release(&mut self, n_bytes: u64) {
        self.process.private_release(n_bytes);
    }

    fn module_handle(&self) -> u64 {
        self.module_handle
    }
}

fn int_arith(
    int_op: IntOp,
    width: IntWidth,
    signed: bool,
    a: CodeBlock,
    b: CodeBlock,
) -> Result<CodeBlock, VmProcessException> {
    let mask = width.mask();
    let av = a.as_u64() & mask;
    let bv = b.as_u64() & mask;

    if signed {
        let bits = match width {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        };
        let sign_extend = |v: u64| -> i64 {
            if bits == 64 {
                v as i64
            } else {
                let shift = 64 - bits;
                ((v << shift) as i64) >> shift
            }
        };
        let ai = sign_extend(av);
        let bi = sign_extend(bv);
        let result = match int_op {
            IntOp::Add => ai.checked_add(bi),
            IntOp::Sub => ai.checked_sub(bi),
            IntOp::Mul => ai.checked_mul(bi),
            IntOp::Div => {
                if bi == 0 {
                    return Err(VmProcessException::IntegerDivideByZero);
                }
                ai.checked_div(bi)
            }
            IntOp::Mod => {
                if bi == 0 {
                    return Err(VmProcessException::IntegerDivideByZero);
                }
                ai.checked_rem(bi)
            }
        };
        let result = result.ok_or(VmProcessException::IntegerOverflow)?;
        Ok(CodeBlock::from_u64((result as u64) & mask))
    } else {
        let result = match int_op {
            IntOp::Add => av.checked_add(bv),
            IntOp::Sub => av.checked_sub(bv),
            IntOp::Mul => av.checked_mul(bv),
            IntOp::Div => {
                if bv == 0 {
                    return Err(VmProcessException::IntegerDivideByZero);
                }
                av.checked_div(bv)
            }
            IntOp::Mod => {
                if bv == 0 {
                    return Err(VmProcessException::IntegerDivideByZero);
                }
                av.checked_rem(bv)
            }
        };
        let result = result.filter(|v| *v <= mask).ok_or(VmProcessException::IntegerOverflow)?;
        Ok(CodeBlock::from_u64(result))
    }
}

fn float_arith(
    float_op: FloatOp,
    a: f32,
    b: f32,
    backend: &dyn FpTrapBackend,
) -> Result<f32, VmProcessException> {
    backend.clear_sticky();
    let divisor_was_zero = matches!(float_op, FloatOp::Div) && b == 0.0;
    let result = match float_op {
        FloatOp::Add => a + b,
        FloatOp::Sub => a - b,
        FloatOp::Mul => a * b,
        FloatOp::Div => a / b,
    };
    let outcome = FpOutcome {
        divisor_was_zero,
        lhs_finite: a.is_finite(),
        rhs_finite: b.is_finite(),
        result,
    };
    if let Some(exception) = backend.check(outcome) {
        return Err(exception);
    }
    Ok(result)
}

fn block_as_f32(b: CodeBlock) -> f32 {
    f32::from_bits((b.as_u64() & 0xFFFF_FFFF) as u32)
}

fn f32_to_block(v: f32) -> CodeBlock {
    CodeBlock::from_u64(u64::from(v.to_bits()))
}

fn cvt(
    process: &mut Process,
    dest_arg: CodeBlock,
    src_arg: CodeBlock,
    f: impl FnOnce(CodeBlock) -> CodeBlock,
) -> Result<Outcome, VmProcessException> {
    let (dest, src) = (dest_arg.as_u64() as usize, src_arg.as_u64() as usize);
    let v = read_reg(this_frame(process), src)?;
    let converted = f(v);
    write_reg(this_frame_mut(process), dest, converted)?;
    advance(process, 3)
}

#[cfg(test)]
mod ops_test;
