use super::*;
use crate::code::{int_opcode, op, CodeSection, IntOp, IntWidth};
use crate::config::VmConfig;
use crate::data::DataSection;
use crate::dispatch::fptrap::SoftFloat;
use crate::host::SyscallBinding;
use crate::program::Program;
use crate::syscall::SyscallStatus;
use std::sync::Arc;

fn program_with_text(blocks: Vec<CodeBlock>) -> (Arc<Program>, Process) {
    let mut program = Program::empty();
    program.code_sections.push(CodeSection::from_raw_blocks(blocks));
    program.rodata.push(DataSection::empty(true, false));
    program.data.push(DataSection::empty(true, true));
    program.bss.push(DataSection::empty(true, true));
    program.active_unit = 0;
    program.ready = true;
    let program = Arc::new(program);
    let process = Process::new(Arc::clone(&program), VmConfig::default()).unwrap();
    (program, process)
}

fn words(vals: &[u64]) -> Vec<CodeBlock> {
    vals.iter().map(|v| CodeBlock::from_u64(*v)).collect()
}

fn run_one(process: &mut Process, program: &Program) -> Result<Outcome, VmProcessException> {
    let section_idx = process.current_code_section;
    let ip = process.current_ip;
    let opcode = program.code_sections()[section_idx].blocks[ip].as_u64() as u8;
    execute(process, program, section_idx, ip, opcode, &SoftFloat)
}

#[test]
fn load_immediate_then_return_yields_the_loaded_value() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        1,
        op::LDI_U64 as u64,
        0,
        42,
        op::RETURN as u64,
        0,
    ]));
    run_one(&mut process, &program).unwrap(); // resize.stack
    let outcome = run_one(&mut process, &program).unwrap(); // ldi.u64
    assert!(matches!(outcome, Outcome::Advanced));
    let outcome = run_one(&mut process, &program).unwrap(); // return r0
    assert!(matches!(outcome, Outcome::Halted));
    assert_eq!(process.return_value(), 42);
}

#[test]
fn jmp_moves_ip_by_relative_offset() {
    let (program, mut process) = program_with_text(words(&[op::JMP as u64, 4, op::NOP as u64]));
    run_one(&mut process, &program).unwrap();
    assert_eq!(process.current_ip, 4);
}

#[test]
fn jz_takes_branch_when_register_is_zero() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        1,
        op::JZ as u64,
        0,
        10,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    assert_eq!(process.current_ip, 2 + 10);
}

#[test]
fn jnz_falls_through_when_register_is_zero() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        1,
        op::JNZ as u64,
        0,
        10,
        op::NOP as u64,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    assert_eq!(process.current_ip, 5);
}

#[test]
fn call_pushes_a_new_frame_and_return_pops_it() {
    // main:   push.imm 7; call callee(@7), r0, 1; halt
    // callee (at offset 7): resize.stack 1; arg.pop r0; return r0
    let (program, mut process) = program_with_text(words(&[
        op::PUSH_IMM as u64,
        7,
        op::CALL as u64,
        7,
        0,
        1,
        op::HALT as u64,
        op::RESIZE_STACK as u64,
        1,
        op::ARG_POP as u64,
        0,
        op::RETURN as u64,
        0,
    ]));
    process.frames[0].resize(1);

    run_one(&mut process, &program).unwrap(); // push.imm 7
    run_one(&mut process, &program).unwrap(); // call -> jumps to absolute offset 7
    assert_eq!(process.frames.len(), 2);
    assert_eq!(process.current_ip, 7);
    run_one(&mut process, &program).unwrap(); // resize.stack 1
    run_one(&mut process, &program).unwrap(); // arg.pop r0
    let outcome = run_one(&mut process, &program).unwrap(); // return r0
    assert!(matches!(outcome, Outcome::Advanced));
    assert_eq!(process.frames.len(), 1);
    assert_eq!(process.current_ip, 6); // resumes at the halt after call
    assert_eq!(process.frames[0].stack[0].as_u64(), 7);
}

#[test]
fn syscall_invokes_the_bound_callable_and_writes_return_register() {
    let mut program = Program::empty();
    program.code_sections.push(CodeSection::from_raw_blocks(words(&[
        op::PUSH_IMM as u64,
        5,
        op::SYSCALL as u64,
        0,
        0,
        1,
        op::HALT as u64,
    ])));
    program.rodata.push(DataSection::empty(true, false));
    program.data.push(DataSection::empty(true, true));
    program.bss.push(DataSection::empty(true, true));
    program.syscall_bindings.push(SyscallBinding {
        callable: Arc::new(|stack, _refs, _crefs, ret, _ctx| {
            if let Some(r) = ret {
                *r = CodeBlock::from_u64(stack[0].as_u64() + 1);
            }
            SyscallStatus::Ok
        }),
        module_handle: 0,
    });
    program.active_unit = 0;
    program.ready = true;
    let program = Arc::new(program);
    let mut process = Process::new(Arc::clone(&program), VmConfig::default()).unwrap();
    process.frames[0].resize(1);

    run_one(&mut process, &program).unwrap(); // push.imm 5
    run_one(&mut process, &program).unwrap(); // syscall 0, r0, 1
    assert_eq!(process.frames[0].stack[0].as_u64(), 6);
}

#[test]
fn mem_alloc_then_mem_free_round_trips() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_U64 as u64,
        1,
        16,
        op::MEM_ALLOC as u64,
        0,
        1,
        op::MEM_FREE as u64,
        0,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let handle = process.frames[0].stack[0].as_u64();
    assert_ne!(handle, 0);
    assert!(process.memory_map.get(handle).is_some());
    run_one(&mut process, &program).unwrap();
    assert!(process.memory_map.get(handle).is_none());
}

#[test]
fn mem_free_blocked_while_referenced_reports_memory_in_use() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        1,
        op::LDI_U64 as u64,
        0,
        crate::memory::map::RODATA_HANDLE,
        op::MEM_FREE as u64,
        0,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    process.memory_map.get_mut(crate::memory::map::RODATA_HANDLE).unwrap().bump_ref();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::MemoryInUse);
}

#[test]
fn unsigned_64_add_overflow_is_integer_overflow() {
    let opcode = int_opcode(IntOp::Add, IntWidth::W64, false);
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_U64 as u64,
        0,
        u64::MAX,
        op::LDI_U64 as u64,
        1,
        1,
        opcode as u64,
        0,
        1,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::IntegerOverflow);
}

#[test]
fn unsigned_8_add_wraps_the_declared_width_not_the_host_width() {
    let opcode = int_opcode(IntOp::Add, IntWidth::W8, false);
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_U64 as u64,
        0,
        250,
        op::LDI_U64 as u64,
        1,
        10,
        opcode as u64,
        0,
        1,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::IntegerOverflow);
}

#[test]
fn integer_division_by_zero_is_reported() {
    let opcode = int_opcode(IntOp::Div, IntWidth::W64, false);
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_U64 as u64,
        0,
        10,
        op::LDI_U64 as u64,
        1,
        0,
        opcode as u64,
        0,
        1,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::IntegerDivideByZero);
}

#[test]
fn float_division_by_zero_is_reported_via_soft_float_backend() {
    let opcode = crate::code::float_opcode(crate::code::FloatOp::Div);
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_U64 as u64,
        0,
        u64::from(2.0f32.to_bits()),
        op::LDI_U64 as u64,
        1,
        u64::from(0.0f32.to_bits()),
        opcode as u64,
        0,
        1,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::FloatingPointDivideByZero);
}

#[test]
fn arg_pop_reads_successive_registers_without_shifting_them() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        4,
        op::LDI_U64 as u64,
        0,
        100,
        op::LDI_U64 as u64,
        1,
        200,
        op::ARG_POP as u64,
        2,
        op::ARG_POP as u64,
        3,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    assert_eq!(process.frames[0].stack[2].as_u64(), 100);
    assert_eq!(process.frames[0].stack[3].as_u64(), 200);
}

#[test]
fn eof_sentinel_is_a_jump_to_invalid_address_exception() {
    let (program, mut process) = program_with_text(words(&[op::EOF_SENTINEL as u64]));
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::JumpToInvalidAddress);
}

#[test]
fn assert_false_raises_user_assert() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        1,
        op::ASSERT as u64,
        0,
    ]));
    run_one(&mut process, &program).unwrap();
    let err = run_one(&mut process, &program).unwrap_err();
    assert_eq!(err, VmProcessException::UserAssert);
}

#[test]
fn cvt_i64_to_f32_round_trips_a_small_integer() {
    let (program, mut process) = program_with_text(words(&[
        op::RESIZE_STACK as u64,
        2,
        op::LDI_I64 as u64,
        0,
        (-4i64) as u64,
        op::CVT_I64_TO_F32 as u64,
        1,
        0,
    ]));
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    run_one(&mut process, &program).unwrap();
    let v = block_as_f32(process.frames[0].stack[1]);
    assert_eq!(v, -4.0);
}
