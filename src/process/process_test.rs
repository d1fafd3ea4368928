use super::*;
use crate::data::DataSection;

fn ready_program() -> Arc<Program> {
    let mut program = Program::empty();
    program.rodata.push(DataSection::empty(true, false));
    program.data.push(DataSection::empty(true, true));
    program.bss.push(DataSection::empty(true, true));
    program.active_unit = 0;
    program.ready = true;
    Arc::new(program)
}

#[test]
fn new_rejects_a_program_that_is_not_ready() {
    let program = Arc::new(Program::empty());
    assert!(matches!(
        Process::new(program, VmConfig::default()),
        Err(VmError::InvalidInputState)
    ));
}

#[test]
fn new_seeds_reserved_handles() {
    let process = Process::new(ready_program(), VmConfig::default()).unwrap();
    assert!(process.memory_map.get(RODATA_HANDLE).is_some());
    assert!(process.memory_map.get(DATA_HANDLE).is_some());
    assert!(process.memory_map.get(BSS_HANDLE).is_some());
    assert_eq!(process.state(), ProcessState::Initialized);
}

#[test]
fn public_alloc_zero_bytes_returns_null_handle() {
    let mut process = Process::new(ready_program(), VmConfig::default()).unwrap();
    assert_eq!(process.public_alloc(0), 0);
}

#[test]
fn public_alloc_then_free_round_trips_accounting() {
    let mut process = Process::new(ready_program(), VmConfig::default()).unwrap();
    let handle = process.public_alloc(16);
    assert_ne!(handle, 0);
    assert_eq!(process.mem_public_heap.usage, 16);
    assert_eq!(process.mem_total.usage, 16);
    process.public_free(handle).unwrap();
    assert_eq!(process.mem_public_heap.usage, 0);
    assert_eq!(process.mem_total.usage, 0);
}

#[test]
fn public_free_blocked_while_referenced() {
    let mut process = Process::new(ready_program(), VmConfig::default()).unwrap();
    let handle = process.public_alloc(16);
    process.memory_map.get_mut(handle).unwrap().bump_ref();
    assert_eq!(
        process.public_free(handle),
        Err(VmProcessException::MemoryInUse)
    );
    assert_eq!(process.mem_public_heap.usage, 16);
}

#[test]
fn public_alloc_respects_configured_ceiling() {
    let mut config = VmConfig::default();
    config.memory.public_heap = 8;
    config.memory.total = 8;
    let mut process = Process::new(ready_program(), config).unwrap();
    assert_eq!(process.public_alloc(16), 0);
    assert_eq!(process.mem_total.usage, 0);
}

#[test]
fn accounting_identity_holds_across_reserve_and_release() {
    let mut process = Process::new(ready_program(), VmConfig::default()).unwrap();
    assert!(process.private_reserve(32));
    assert_eq!(
        process.mem_total.usage,
        process.mem_public_heap.usage + process.mem_private.usage + process.mem_reserved.usage
    );
    process.private_release(32);
    assert_eq!(process.mem_total.usage, 0);
}

#[test]
fn private_alloc_then_free_round_trips() {
    let mut process = Process::new(ready_program(), VmConfig::default()).unwrap();
    let ptr = process.private_alloc(8).unwrap();
    assert_eq!(process.mem_private.usage, 8);
    assert!(process.private_free(ptr));
    assert_eq!(process.mem_private.usage, 0);
    assert!(!process.private_free(ptr));
}

#[test]
fn pause_on_initialized_process_is_rejected() {
    let process = Process::new(ready_program(), VmConfig::default()).unwrap();
    let handle = process.handle();
    assert_eq!(handle.pause(), Err(VmError::InvalidInputState));
}
