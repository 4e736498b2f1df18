//! ELF64 file and program header parsing.

use core::fmt;

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class byte for 64-bit objects.
const ELFCLASS64: u8 = 2;

/// ELF data-encoding byte for little-endian objects.
const ELFDATA2LSB: u8 = 1;

/// ELF identification version.
const EV_CURRENT: u8 = 1;

/// ELF type for statically linked executables.
const ET_EXEC: u16 = 2;

/// ELF machine id for x86-64.
const EM_X86_64: u16 = 62;

/// Program header type for loadable segments.
pub(crate) const PT_LOAD: u32 = 1;

/// Segment flag: executable.
pub const PF_X: u32 = 1;

/// Segment flag: writable.
pub const PF_W: u32 = 2;

/// Size of the ELF64 file header.
pub(crate) const EHDR_SIZE: usize = 64;

/// Size of one ELF64 program header entry.
pub(crate) const PHDR_SIZE: usize = 56;

/// Reads a little-endian `u16` at `off`. Callers bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

/// Reads a little-endian `u32` at `off`. Callers bounds-check first.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Reads a little-endian `u64` at `off`. Callers bounds-check first.
pub(crate) fn le_u64(data: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(bytes)
}

/// Reasons an ELF image is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not begin with `\x7fELF`.
    BadMagic,
    /// Not a 64-bit object.
    NotClass64,
    /// Not little-endian.
    NotLittleEndian,
    /// Not version 1.
    BadVersion,
    /// Not a statically linked executable (`ET_EXEC`).
    NotExecutable,
    /// Not an x86-64 object.
    WrongMachine,
    /// Input shorter than the structures it declares.
    Truncated,
    /// A declared offset or size falls outside the input.
    OutOfBounds,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "missing ELF magic"),
            Self::NotClass64 => write!(f, "not an ELFCLASS64 object"),
            Self::NotLittleEndian => write!(f, "not a little-endian object"),
            Self::BadVersion => write!(f, "unsupported ELF version"),
            Self::NotExecutable => write!(f, "not an ET_EXEC image"),
            Self::WrongMachine => write!(f, "not an x86-64 image"),
            Self::Truncated => write!(f, "file truncated"),
            Self::OutOfBounds => write!(f, "header offset out of bounds"),
        }
    }
}

/// The validated fields of an ELF64 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    /// Entry point virtual address.
    pub e_entry: u64,
    /// File offset of the program header table.
    pub e_phoff: u64,
    /// Size of one program header entry.
    pub e_phentsize: u16,
    /// Number of program header entries.
    pub e_phnum: u16,
}

impl Elf64Header {
    /// Parses and validates an ELF64 file header.
    ///
    /// Accepts exactly the images the loader can run: 64-bit,
    /// little-endian, version 1, `ET_EXEC`, `EM_X86_64`, with a program
    /// header table that lies inside `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] naming the first failed check.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < EHDR_SIZE {
            return Err(ElfError::Truncated);
        }
        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS64 {
            return Err(ElfError::NotClass64);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::BadVersion);
        }

        if le_u16(data, 16) != ET_EXEC {
            return Err(ElfError::NotExecutable);
        }
        if le_u16(data, 18) != EM_X86_64 {
            return Err(ElfError::WrongMachine);
        }
        if le_u32(data, 20) != u32::from(EV_CURRENT) {
            return Err(ElfError::BadVersion);
        }

        let e_entry = le_u64(data, 24);
        let e_phoff = le_u64(data, 32);
        let e_phentsize = le_u16(data, 54);
        let e_phnum = le_u16(data, 56);

        if e_phnum > 0 && (e_phentsize as usize) < PHDR_SIZE {
            return Err(ElfError::OutOfBounds);
        }
        let ph_end = e_phoff
            .checked_add(u64::from(e_phnum) * u64::from(e_phentsize))
            .ok_or(ElfError::OutOfBounds)?;
        if ph_end > data.len() as u64 {
            return Err(ElfError::OutOfBounds);
        }

        Ok(Self {
            e_entry,
            e_phoff,
            e_phentsize,
            e_phnum,
        })
    }
}

/// One ELF64 program header entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgramHeader {
    pub seg_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl ProgramHeader {
    /// Decodes the entry at `off`. The caller guarantees
    /// `off + PHDR_SIZE <= data.len()`.
    pub(crate) fn parse(data: &[u8], off: usize) -> Self {
        let b = &data[off..];
        Self {
            seg_type: le_u32(b, 0),
            flags: le_u32(b, 4),
            offset: le_u64(b, 8),
            vaddr: le_u64(b, 16),
            // p_paddr at 24..32 is not used
            filesz: le_u64(b, 32),
            memsz: le_u64(b, 40),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal valid ELF64 file header: `ET_EXEC`, `EM_X86_64`,
    /// entry 0x401000, phoff right after the header, no program headers.
    pub(crate) fn minimal_header() -> Vec<u8> {
        let mut buf = vec![0u8; EHDR_SIZE];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[6] = EV_CURRENT;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[24..32].copy_from_slice(&0x0040_1000u64.to_le_bytes());
        buf[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        buf[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        buf[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        buf
    }

    /// Appends one program header and bumps `e_phnum`.
    pub(crate) fn push_phdr(
        buf: &mut Vec<u8>,
        p_type: u32,
        p_flags: u32,
        p_offset: u64,
        p_vaddr: u64,
        p_filesz: u64,
        p_memsz: u64,
    ) {
        let start = buf.len();
        buf.resize(start + PHDR_SIZE, 0);
        let b = &mut buf[start..];
        b[0..4].copy_from_slice(&p_type.to_le_bytes());
        b[4..8].copy_from_slice(&p_flags.to_le_bytes());
        b[8..16].copy_from_slice(&p_offset.to_le_bytes());
        b[16..24].copy_from_slice(&p_vaddr.to_le_bytes());
        b[32..40].copy_from_slice(&p_filesz.to_le_bytes());
        b[40..48].copy_from_slice(&p_memsz.to_le_bytes());

        let phnum = le_u16(buf, 56) + 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
    }

    #[test]
    fn accepts_minimal_executable() {
        let buf = minimal_header();
        let hdr = Elf64Header::parse(&buf).expect("valid header");
        assert_eq!(hdr.e_entry, 0x0040_1000);
        assert_eq!(hdr.e_phnum, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_header();
        buf[1] = b'F';
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::BadMagic));
    }

    #[test]
    fn rejects_class32() {
        let mut buf = minimal_header();
        buf[4] = 1;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::NotClass64));
    }

    #[test]
    fn rejects_big_endian() {
        let mut buf = minimal_header();
        buf[5] = 2;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::NotLittleEndian));
    }

    #[test]
    fn rejects_shared_object() {
        let mut buf = minimal_header();
        buf[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::NotExecutable));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut buf = minimal_header();
        buf[18..20].copy_from_slice(&0xB7u16.to_le_bytes()); // EM_AARCH64
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::WrongMachine));
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = minimal_header();
        buf[20..24].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::BadVersion));
    }

    #[test]
    fn rejects_truncated_input() {
        assert_eq!(Elf64Header::parse(&[]), Err(ElfError::Truncated));
        assert_eq!(Elf64Header::parse(&[0u8; 63]), Err(ElfError::Truncated));
    }

    #[test]
    fn rejects_phdr_table_past_eof() {
        let mut buf = minimal_header();
        buf[56..58].copy_from_slice(&4u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::OutOfBounds));
    }

    #[test]
    fn rejects_phoff_overflow() {
        let mut buf = minimal_header();
        buf[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
        buf[56..58].copy_from_slice(&1u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::OutOfBounds));
    }

    #[test]
    fn error_messages_render() {
        let all = [
            ElfError::BadMagic,
            ElfError::NotClass64,
            ElfError::NotLittleEndian,
            ElfError::BadVersion,
            ElfError::NotExecutable,
            ElfError::WrongMachine,
            ElfError::Truncated,
            ElfError::OutOfBounds,
        ];
        for err in all {
            assert!(!format!("{err}").is_empty());
        }
    }
}
