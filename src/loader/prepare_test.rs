use super::*;
use crate::block::CodeBlock;

fn blocks(words: &[u64]) -> Vec<CodeBlock> {
    words.iter().map(|&w| CodeBlock::from_u64(w)).collect()
}

fn ctx() -> PrepareContext<'static> {
    PrepareContext {
        register_count: 4,
        syscall_bindings: &[],
    }
}

#[test]
fn pass1_marks_every_instruction_start() {
    // push.imm 42; return
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::PUSH_IMM as u64, 42, op::RETURN as u64, 0]));
    prepare(&mut section, &ctx()).unwrap();
    assert!(section.valid_instrs.contains(0));
    assert!(section.valid_instrs.contains(2));
    assert!(!section.valid_instrs.contains(1));
}

#[test]
fn unknown_opcode_fails_pass1() {
    let mut section = CodeSection::from_raw_blocks(blocks(&[254]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidInstruction(Some(0)))
    );
}

#[test]
fn truncated_argument_window_fails() {
    // CALL needs 3 args, only 1 block follows
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::CALL as u64, 0]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidArguments(Some(0)))
    );
}

#[test]
fn jump_must_land_on_valid_instruction() {
    // jmp +1 (lands on the argument block of push.imm, not an instruction start)
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::JMP as u64, 1, op::PUSH_IMM as u64, 5]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidArguments(Some(1)))
    );
}

#[test]
fn jump_to_sentinel_is_rejected() {
    // jmp +2 lands exactly on the appended sentinel, one past the last real instruction
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::JMP as u64, 2, op::HALT as u64]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidArguments(Some(1)))
    );
}

#[test]
fn register_argument_out_of_declared_count_fails() {
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::PUSH_REG as u64, 99]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidArguments(Some(1)))
    );
}

#[test]
fn static_handle_sentinel_is_rewritten_to_reserved_handle() {
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::PUSHREF_MEM as u64, u64::MAX]));
    prepare(&mut section, &ctx()).unwrap();
    assert_eq!(
        section.blocks[1].as_u64(),
        crate::memory::map::RODATA_HANDLE
    );
}

#[test]
fn mem_free_register_argument_is_bounds_checked() {
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::MEM_FREE as u64, 99]));
    assert_eq!(
        prepare(&mut section, &ctx()),
        Err(VmError::InvalidArguments(Some(1)))
    );
}

#[test]
fn sentinel_is_appended_and_excluded_from_valid_instrs() {
    let mut section = CodeSection::from_raw_blocks(blocks(&[op::RETURN as u64, 0]));
    let len_before = section.blocks.len();
    prepare(&mut section, &ctx()).unwrap();
    assert_eq!(section.blocks.len(), len_before + 1);
    let sentinel_offset = len_before;
    assert!(!section.valid_instrs.contains(sentinel_offset));
    assert_eq!(
        section.blocks[sentinel_offset].as_u64(),
        op::EOF_SENTINEL as u64
    );
}
