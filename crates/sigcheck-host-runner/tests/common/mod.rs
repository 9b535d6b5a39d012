//! Synthetic ELF images shared by the integration tests.
#![allow(dead_code)]

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_DYNAMIC: u32 = 6;

pub struct Image {
    pub is_64: bool,
    pub little_endian: bool,
    pub section_type: u32,
    pub entries: Vec<(u64, u64)>,
}

impl Image {
    pub fn elf64(entries: &[(u64, u64)]) -> Self {
        Self {
            is_64: true,
            little_endian: true,
            section_type: SHT_DYNAMIC,
            entries: entries.to_vec(),
        }
    }

    pub fn elf32(entries: &[(u64, u64)]) -> Self {
        Self {
            is_64: false,
            ..Self::elf64(entries)
        }
    }

    fn put(&self, out: &mut Vec<u8>, v: u64, width: usize) {
        let bytes = if self.little_endian {
            v.to_le_bytes()[..width].to_vec()
        } else {
            v.to_be_bytes()[8 - width..].to_vec()
        };
        out.extend_from_slice(&bytes);
    }

    /// Header, dynamic data, then two section headers (null + dynamic). No
    /// program headers and no section name table.
    pub fn bytes(&self) -> Vec<u8> {
        let word = if self.is_64 { 8 } else { 4 };
        let ehsize: u64 = if self.is_64 { 64 } else { 52 };
        let shentsize: u64 = if self.is_64 { 64 } else { 40 };

        let mut data = Vec::new();
        for &(tag, value) in &self.entries {
            self.put(&mut data, tag, word);
            self.put(&mut data, value, word);
        }
        let shoff = ehsize + data.len() as u64;

        let mut out = vec![0x7f, b'E', b'L', b'F'];
        out.push(if self.is_64 { 2 } else { 1 });
        out.push(if self.little_endian { 1 } else { 2 });
        out.push(1);
        out.resize(16, 0);
        self.put(&mut out, 3, 2); // ET_DYN
        self.put(&mut out, if self.is_64 { 62 } else { 3 }, 2);
        self.put(&mut out, 1, 4);
        self.put(&mut out, 0, word); // entry
        self.put(&mut out, 0, word); // phoff
        self.put(&mut out, shoff, word);
        self.put(&mut out, 0, 4); // flags
        self.put(&mut out, ehsize, 2);
        self.put(&mut out, if self.is_64 { 56 } else { 32 }, 2);
        self.put(&mut out, 0, 2); // phnum
        self.put(&mut out, shentsize, 2);
        self.put(&mut out, 2, 2); // shnum
        self.put(&mut out, 0, 2); // shstrndx
        assert_eq!(out.len() as u64, ehsize);

        out.extend_from_slice(&data);

        out.resize(out.len() + shentsize as usize, 0);
        self.put(&mut out, 0, 4); // name
        self.put(&mut out, self.section_type as u64, 4);
        self.put(&mut out, 0, word); // flags
        self.put(&mut out, 0, word); // addr
        self.put(&mut out, ehsize, word); // offset
        self.put(&mut out, data.len() as u64, word); // size
        self.put(&mut out, 0, 4); // link
        self.put(&mut out, 0, 4); // info
        self.put(&mut out, word as u64, word); // addralign
        self.put(&mut out, 2 * word as u64, word); // entsize
        out
    }
}
