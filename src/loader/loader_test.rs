use super::*;
use crate::code::op;
use crate::host::SyscallBinding;
use crate::syscall::{SyscallContext, SyscallStatus};
use std::sync::Arc;

struct StubHost;

impl HostContext for StubHost {
    fn resolve_syscall(&self, signature: &str) -> Option<SyscallBinding> {
        if signature == "echo_u64" {
            Some(SyscallBinding {
                callable: Arc::new(|_stack, _refs, _crefs, _ret, _ctx: &mut dyn SyscallContext| {
                    SyscallStatus::Ok
                }),
                module_handle: 0,
            })
        } else {
            None
        }
    }

    fn resolve_pd(&self, name: &str) -> Option<crate::host::PdHandle> {
        if name == "pd0" {
            Some(crate::host::PdHandle(42))
        } else {
            None
        }
    }
}

fn u16le(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}
fn u32le(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

struct ContainerBuilder {
    bytes: Vec<u8>,
}

impl ContainerBuilder {
    fn new(unit_count: u16, active_unit: u16) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&container::MAGIC);
        bytes.extend_from_slice(&u16le(0)); // format version
        bytes.extend_from_slice(&u16le(0)); // reserved
        bytes.extend_from_slice(&u16le(unit_count - 1));
        bytes.extend_from_slice(&u16le(active_unit));
        bytes.extend_from_slice(&[0u8; 4]);
        Self { bytes }
    }

    fn unit_header(mut self, section_count: u16) -> Self {
        self.bytes.extend_from_slice(&u16le(section_count - 1));
        self.bytes.extend_from_slice(&[0u8; 6]);
        self
    }

    fn section(mut self, tag: u32, body: &[u8]) -> Self {
        self.bytes.extend_from_slice(&u32le(tag));
        self.bytes.extend_from_slice(&u32le(body.len() as u32));
        self.bytes.extend_from_slice(body);
        let pad = (8 - (body.len() % 8)) % 8;
        self.bytes.extend(std::iter::repeat(0u8).take(pad));
        self
    }

    /// A `text` section's `length` is a `CodeBlock` count, not a byte count
    /// (§6.1), unlike every other section kind.
    fn text_section(mut self, words: &[u64]) -> Self {
        self.bytes.extend_from_slice(&u32le(0)); // SectionType::Text
        self.bytes.extend_from_slice(&u32le(words.len() as u32));
        for w in words {
            self.bytes.extend_from_slice(&w.to_le_bytes());
        }
        self
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[test]
fn loads_a_minimal_halt_42_program() {
    let bytes = ContainerBuilder::new(1, 0)
        .unit_header(1)
        .text_section(&[op::PUSH_IMM as u64, 42, op::RETURN as u64, 0])
        .finish();

    let config = VmConfig::default();
    let program = Loader::load(&bytes, &StubHost, &config).unwrap();
    assert!(program.is_ready());
    assert_eq!(program.code_sections().len(), 1);
    assert_eq!(program.active_unit(), 0);
}

#[test]
fn missing_text_section_fails_with_no_code_section() {
    let bytes = ContainerBuilder::new(1, 0)
        .unit_header(1)
        .section(1, &[1, 2, 3, 4, 0, 0, 0, 0])
        .finish();
    let config = VmConfig::default();
    assert!(matches!(
        Loader::load(&bytes, &StubHost, &config),
        Err(VmError::NoCodeSection)
    ));
}

#[test]
fn undefined_bind_is_rejected() {
    let mut body = b"nonexistent_syscall".to_vec();
    body.push(0);
    let bytes = ContainerBuilder::new(1, 0)
        .unit_header(2)
        .text_section(&[op::RETURN as u64, 0])
        .section(4, &body)
        .finish();
    let config = VmConfig::default();
    assert!(matches!(
        Loader::load(&bytes, &StubHost, &config),
        Err(VmError::UndefinedBind(_))
    ));
}

#[test]
fn resolved_bind_is_recorded_on_program() {
    let mut body = b"echo_u64".to_vec();
    body.push(0);
    let bytes = ContainerBuilder::new(1, 0)
        .unit_header(2)
        .text_section(&[op::RETURN as u64, 0])
        .section(4, &body)
        .finish();
    let config = VmConfig::default();
    let program = Loader::load(&bytes, &StubHost, &config).unwrap();
    assert_eq!(program.syscall_binding_count(), 1);
}

#[test]
fn unknown_section_type_is_skipped_not_rejected() {
    let bytes = ContainerBuilder::new(1, 0)
        .unit_header(2)
        .text_section(&[op::RETURN as u64, 0])
        .section(200, &[1, 2, 3, 4, 5, 6, 7, 8])
        .finish();
    let config = VmConfig::default();
    let program = Loader::load(&bytes, &StubHost, &config).unwrap();
    assert!(program.is_ready());
}

#[test]
fn unsupported_format_version_is_rejected() {
    let mut bytes = ContainerBuilder::new(1, 0)
        .unit_header(1)
        .text_section(&[op::RETURN as u64, 0])
        .finish();
    bytes[4..6].copy_from_slice(&u16le(9));
    let config = VmConfig::default();
    assert!(matches!(
        Loader::load(&bytes, &StubHost, &config),
        Err(VmError::InvalidInputFile(_))
    ));
}
