// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Loader (§4.1): parses a container byte buffer into a ready [`Program`].
//!
//! The container parser (`container`) and the two-pass preparer (`prepare`)
//! are kept as separate modules because they answer different questions —
//! "what bytes are here" versus "is this bytecode well-formed" — even though
//! [`Loader::load`] always runs them back to back.

pub mod container;
pub mod prepare;

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::block::CodeBlock;
use crate::code::CodeSection;
use crate::config::VmConfig;
use crate::data::DataSection;
use crate::error::VmError;
use crate::host::HostContext;
use crate::program::Program;

use container::{Cursor, SectionType};
use prepare::PrepareContext;

pub struct Loader;

struct UnitSections {
    code_sections: Vec<CodeSection>,
    rodata: Option<DataSection>,
    data: Option<DataSection>,
    bss: Option<DataSection>,
}

impl Loader {
    /// Parse, resolve, and prepare `bytes` into a ready [`Program`] (§4.1,
    /// §4.2). Aborts at the first error; no partially-built `Program` is
    /// ever returned.
    pub fn load(bytes: &[u8], host: &dyn HostContext, config: &VmConfig) -> Result<Program, VmError> {
        let mut cursor = Cursor::new(bytes);
        cursor.read_common_header()?;
        let format_header = cursor.read_format_header()?;
        debug!(
            "loading container: {} linking unit(s), active unit {}",
            format_header.unit_count, format_header.active_linking_unit
        );

        let mut program = Program::empty();
        let mut pd_seen: HashMap<u64, usize> = HashMap::new();

        for unit_index in 0..format_header.unit_count as usize {
            let unit_header = cursor.read_unit_header()?;
            let mut unit = UnitSections {
                code_sections: Vec::new(),
                rodata: None,
                data: None,
                bss: None,
            };

            for _ in 0..unit_header.section_count {
                Self::load_section(&mut cursor, &mut unit, &mut program, host, &mut pd_seen)?;
            }

            if unit.code_sections.is_empty() {
                return Err(VmError::NoCodeSection);
            }

            program.code_sections.extend(unit.code_sections);
            program
                .rodata
                .push(unit.rodata.unwrap_or_else(|| DataSection::empty(true, false)));
            program
                .data
                .push(unit.data.unwrap_or_else(|| DataSection::empty(true, true)));
            program
                .bss
                .push(unit.bss.unwrap_or_else(|| DataSection::empty(true, true)));

            trace!("linking unit {unit_index} loaded");
        }

        let active_unit = format_header.active_linking_unit as usize;
        if active_unit >= program.unit_count() {
            return Err(VmError::InvalidHeader(None));
        }
        program.active_unit = active_unit;

        let ctx = PrepareContext {
            register_count: config.max_registers_per_frame,
            syscall_bindings: &program.syscall_bindings,
        };
        for section in &mut program.code_sections {
            prepare::prepare(section, &ctx)?;
        }

        program.ready = true;
        debug!(
            "program ready: {} code section(s), {} syscall binding(s), {} pd binding(s)",
            program.code_sections.len(),
            program.syscall_bindings.len(),
            program.pd_bindings.len()
        );
        Ok(program)
    }

    fn load_section(
        cursor: &mut Cursor<'_>,
        unit: &mut UnitSections,
        program: &mut Program,
        host: &dyn HostContext,
        pd_seen: &mut HashMap<u64, usize>,
    ) -> Result<(), VmError> {
        let section_start = cursor.position();
        let header = cursor.read_section_header()?;
        let body_start = cursor.position();
        // `length` counts `CodeBlock`s (8 bytes each) for a text section,
        // but raw bytes for every other section kind (spec §6.1).
        let byte_length = if header.section_type == SectionType::Text {
            (header.length as usize)
                .checked_mul(8)
                .ok_or(VmError::InvalidInputFile(Some(section_start)))?
        } else {
            header.length as usize
        };
        let body = cursor.read_section_body(byte_length)?;

        match header.section_type {
            SectionType::Text => {
                let blocks = body
                    .chunks_exact(8)
                    .map(|chunk| CodeBlock::from_u64(u64::from_le_bytes(chunk.try_into().unwrap())))
                    .collect();
                unit.code_sections.push(CodeSection::from_raw_blocks(blocks));
            }
            SectionType::Rodata => {
                unit.rodata = Some(DataSection::from_bytes(body.to_vec(), true, false));
            }
            SectionType::Data => {
                unit.data = Some(DataSection::from_bytes(body.to_vec(), true, true));
            }
            SectionType::Bss => {
                unit.bss = Some(DataSection::zeroed(body.len(), true, true));
            }
            SectionType::Bind => {
                for (offset, signature) in split_nul_terminated(body, body_start)? {
                    let binding = host
                        .resolve_syscall(signature)
                        .ok_or(VmError::UndefinedBind(Some(offset)))?;
                    program.syscall_bindings.push(binding);
                }
            }
            SectionType::PdBind => {
                for (offset, name) in split_nul_terminated(body, body_start)? {
                    let handle = host
                        .resolve_pd(name)
                        .ok_or(VmError::UndefinedPdBind(Some(offset)))?;
                    if let Some(&prior_offset) = pd_seen.get(&handle.0) {
                        let _ = prior_offset;
                        return Err(VmError::DuplicatePdBind(Some(offset)));
                    }
                    pd_seen.insert(handle.0, offset);
                    program.pd_bindings.push(handle);
                }
            }
            SectionType::Unknown(tag) => {
                warn!("skipping unknown section type {tag} at offset {section_start}");
            }
        }
        Ok(())
    }
}

/// Split a `bind`/`pdbind` body into its null-terminated strings, pairing
/// each with the file offset its first byte occupies. The last body byte
/// must be zero (§6.1) or the container is rejected.
fn split_nul_terminated(body: &[u8], body_start: usize) -> Result<Vec<(usize, &str)>, VmError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if *body.last().unwrap() != 0 {
        return Err(VmError::InvalidInputFile(Some(body_start)));
    }
    let mut out = Vec::new();
    let mut start = 0usize;
    for (i, &b) in body.iter().enumerate() {
        if b == 0 {
            if i > start {
                let s = std::str::from_utf8(&body[start..i])
                    .map_err(|_| VmError::InvalidInputFile(Some(body_start + start)))?;
                out.push((body_start + start, s));
            }
            start = i + 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod loader_test;
