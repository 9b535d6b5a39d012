//! Dynamic-section inspection for linked ELF executables.
//!
//! Only what the PIE check needs: find the `SHT_DYNAMIC` section and decode its
//! `(tag, value)` records in the file's own word size and byte order.

use std::path::{Path, PathBuf};

use goblin::elf::section_header::SHT_DYNAMIC;
use goblin::elf::Elf;
use thiserror::Error;

pub const DT_NULL: u64 = 0;
pub const DT_NEEDED: u64 = 1;
pub const DT_TEXTREL: u64 = 22;
pub const DT_FLAGS: u64 = 30;

/// `DT_FLAGS` bit equivalent to a `DT_TEXTREL` entry.
pub const DF_TEXTREL: u64 = 0x4;

const MEMORY_ORIGIN: &str = "<memory>";

#[derive(Debug, Error)]
pub enum ElfInspectError {
    #[error("open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: {detail}")]
    Format { origin: String, detail: String },

    #[error("{origin}: can't read SHT_DYNAMIC contents: {detail}")]
    Read { origin: String, detail: String },
}

impl ElfInspectError {
    fn at(self, path: &Path) -> Self {
        let origin = path.display().to_string();
        match self {
            ElfInspectError::Format { detail, .. } => ElfInspectError::Format { origin, detail },
            ElfInspectError::Read { detail, .. } => ElfInspectError::Read { origin, detail },
            other => other,
        }
    }
}

/// Word size of the inspected object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    /// Size of one `(tag, value)` record.
    fn dyn_entry_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 8,
            ElfClass::Elf64 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicTagSet {
    entries: Vec<(u64, u64)>,
}

impl DynamicTagSet {
    pub fn read(path: &Path) -> Result<Self, ElfInspectError> {
        let bytes = std::fs::read(path).map_err(|source| ElfInspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes).map_err(|err| err.at(path))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ElfInspectError> {
        let elf = Elf::parse(bytes).map_err(|err| ElfInspectError::Format {
            origin: MEMORY_ORIGIN.to_string(),
            detail: err.to_string(),
        })?;

        let section = elf
            .section_headers
            .iter()
            .find(|sh| sh.sh_type == SHT_DYNAMIC)
            .ok_or_else(|| ElfInspectError::Format {
                origin: MEMORY_ORIGIN.to_string(),
                detail: "no SHT_DYNAMIC section".to_string(),
            })?;

        let start = usize::try_from(section.sh_offset).ok();
        let len = usize::try_from(section.sh_size).ok();
        let data = match (start, len) {
            (Some(start), Some(len)) => start
                .checked_add(len)
                .and_then(|end| bytes.get(start..end)),
            _ => None,
        }
        .ok_or_else(|| ElfInspectError::Read {
            origin: MEMORY_ORIGIN.to_string(),
            detail: format!(
                "section range {:#x}+{:#x} exceeds file size {:#x}",
                section.sh_offset,
                section.sh_size,
                bytes.len()
            ),
        })?;

        let class = if elf.is_64 {
            ElfClass::Elf64
        } else {
            ElfClass::Elf32
        };
        let entries = decode_entries(data, class, elf.little_endian);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(u64, u64)] {
        &self.entries
    }

    pub fn contains(&self, tag: u64) -> bool {
        self.entries.iter().any(|&(t, _)| t == tag)
    }

    pub fn value(&self, tag: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|&&(t, _)| t == tag)
            .map(|&(_, v)| v)
    }

    /// True if the loader would have to patch code: a `DT_TEXTREL` entry or the
    /// `DF_TEXTREL` bit in `DT_FLAGS`.
    pub fn has_text_relocations(&self) -> bool {
        self.contains(DT_TEXTREL) || self.value(DT_FLAGS).is_some_and(|f| f & DF_TEXTREL != 0)
    }
}

fn decode_entries(data: &[u8], class: ElfClass, little_endian: bool) -> Vec<(u64, u64)> {
    let size = class.dyn_entry_size();
    let half = size / 2;
    data.chunks_exact(size)
        .map(|rec| {
            let (tag, value) = rec.split_at(half);
            (word(tag, little_endian), word(value, little_endian))
        })
        .collect()
}

fn word(bytes: &[u8], little_endian: bool) -> u64 {
    let mut buf = [0u8; 8];
    if little_endian {
        buf[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(buf)
    } else {
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        u64::from_be_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_and_big_endian_records() {
        let mut le = Vec::new();
        le.extend_from_slice(&22u64.to_le_bytes());
        le.extend_from_slice(&0u64.to_le_bytes());
        le.extend_from_slice(&1u64.to_le_bytes());
        le.extend_from_slice(&7u64.to_le_bytes());
        assert_eq!(
            decode_entries(&le, ElfClass::Elf64, true),
            vec![(22, 0), (1, 7)]
        );

        let mut be = Vec::new();
        be.extend_from_slice(&30u32.to_be_bytes());
        be.extend_from_slice(&4u32.to_be_bytes());
        assert_eq!(decode_entries(&be, ElfClass::Elf32, false), vec![(30, 4)]);
    }

    #[test]
    fn partial_trailing_record_is_ignored() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode_entries(&data, ElfClass::Elf32, true), vec![(5, 9)]);
    }
}
