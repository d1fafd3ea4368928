// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Error taxonomies for the VM core.
//!
//! Two distinct enums per the propagation policy: [`VmError`] covers
//! load- and control-time failures returned directly from an API call;
//! [`VmProcessException`] is carried in a running [`crate::process::Process`]'s
//! `exceptionValue` register and surfaces only once the dispatcher leaves
//! via its `except` exit.

use core::fmt;

/// Byte offset into a container or code section where an error was detected.
///
/// `None` when no single offset is meaningful for the error.
pub type ErrorPosition = Option<usize>;

/// Load- and control-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Operation succeeded; used where callers expect a `Result` uniformly.
    Ok,
    /// Host allocator failed to satisfy a request.
    OutOfMemory,
    /// A required mutex could not be acquired (poisoned or reentered).
    LockFailure,
    /// The API was called while the process was in an incompatible state.
    InvalidInputState,
    /// The container file is malformed or uses an unsupported format version.
    InvalidInputFile(ErrorPosition),
    /// A linking unit contributed no text section.
    NoCodeSection,
    /// A header field failed validation.
    InvalidHeader(ErrorPosition),
    /// Pass 1 encountered an opcode byte with no known meaning.
    InvalidInstruction(ErrorPosition),
    /// An instruction's declared argument window runs past the section end.
    InvalidArguments(ErrorPosition),
    /// A `bind` signature could not be resolved by the host context.
    UndefinedBind(ErrorPosition),
    /// A `pdbind` name could not be resolved by the host context.
    UndefinedPdBind(ErrorPosition),
    /// The same protection domain was bound twice in one program.
    DuplicatePdBind(ErrorPosition),
    /// A protection-domain-process-instance failed to start.
    PdpiStartupFailed,
    /// The dispatcher left via `except`; see `Process::exception()`.
    RuntimeException,
    /// The dispatcher left via `trap` (an external pause was observed).
    RuntimeTrap,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::LockFailure => write!(f, "failed to acquire process lock"),
            Self::InvalidInputState => write!(f, "call invalid for current process state"),
            Self::InvalidInputFile(pos) => write!(f, "invalid input file{}", fmt_pos(*pos)),
            Self::NoCodeSection => write!(f, "linking unit has no text section"),
            Self::InvalidHeader(pos) => write!(f, "invalid container header{}", fmt_pos(*pos)),
            Self::InvalidInstruction(pos) => write!(f, "invalid instruction{}", fmt_pos(*pos)),
            Self::InvalidArguments(pos) => write!(f, "invalid instruction arguments{}", fmt_pos(*pos)),
            Self::UndefinedBind(pos) => write!(f, "undefined syscall binding{}", fmt_pos(*pos)),
            Self::UndefinedPdBind(pos) => write!(f, "undefined protection-domain binding{}", fmt_pos(*pos)),
            Self::DuplicatePdBind(pos) => write!(f, "duplicate protection-domain binding{}", fmt_pos(*pos)),
            Self::PdpiStartupFailed => write!(f, "protection-domain-process-instance failed to start"),
            Self::RuntimeException => write!(f, "runtime exception"),
            Self::RuntimeTrap => write!(f, "runtime trap"),
        }
    }
}

impl std::error::Error for VmError {}

fn fmt_pos(pos: ErrorPosition) -> String {
    match pos {
        Some(p) => format!(" at offset {p}"),
        None => String::new(),
    }
}

/// Runtime exception carried in a process's `exceptionValue` register.
///
/// `None` means no exception is pending. Every other variant transitions the
/// process to `Crashed` the moment the dispatcher observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmProcessException {
    /// No exception pending.
    #[default]
    None,
    /// A heap or reference-count allocation could not be satisfied.
    OutOfMemory,
    /// An opcode received an argument outside its valid domain.
    InvalidArgument,
    /// A syscall binding reported `InvalidCall`.
    InvalidSyscallInvocation,
    /// A syscall binding reported any status other than `Ok`/`InvalidCall`.
    SyscallFailure,
    /// A register index fell outside the current frame's register vector.
    InvalidIndexRegister,
    /// A stack index fell outside the current frame's register vector.
    InvalidIndexStack,
    /// A reference index fell outside the current frame's ref stack.
    InvalidIndexReference,
    /// A cref index fell outside the current frame's cref stack.
    InvalidIndexConstReference,
    /// A relative jump target does not land on a valid instruction offset.
    JumpToInvalidAddress,
    /// A syscall index is out of bounds of the program's syscall bindings.
    InvalidIndexSyscall,
    /// A memory handle does not name a live slot.
    InvalidReference,
    /// A free was attempted on a slot with `nrefs != 0`.
    MemoryInUse,
    /// A read through a reference/cref ran past the end of its buffer.
    OutOfBoundsRead,
    /// A write through a reference ran past the end of its buffer.
    OutOfBoundsWrite,
    /// A reference/cref index argument was itself out of bounds.
    OutOfBoundsReferenceIndex,
    /// A reference/cref size argument was itself out of bounds.
    OutOfBoundsReferenceSize,
    /// A read was attempted through a slot or section without the read flag.
    ReadDenied,
    /// A write was attempted through a slot, section, or cref without the write flag.
    WriteDenied,
    /// A floating-point trap fired with no sticky flag the VM recognizes.
    UnknownFpe,
    /// Integer division (or remainder) by zero.
    IntegerDivideByZero,
    /// Signed integer arithmetic overflowed.
    IntegerOverflow,
    /// Floating-point division by zero.
    FloatingPointDivideByZero,
    /// Floating-point operation overflowed.
    FloatingPointOverflow,
    /// Floating-point operation underflowed.
    FloatingPointUnderflow,
    /// Floating-point operation produced an inexact result (strict mode).
    FloatingPointInexactResult,
    /// Floating-point operation was invalid (e.g. 0/0, sqrt of negative).
    FloatingPointInvalidOperation,
    /// A bytecode-level `assert` instruction failed.
    UserAssert,
}

impl fmt::Display for VmProcessException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for VmProcessException {}
