//! Loadable-segment iteration over a parsed ELF64 image.

use crate::header::{Elf64Header, ElfError, PHDR_SIZE, PT_LOAD, ProgramHeader};

/// A parsed ELF64 executable: the raw bytes plus the validated header.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

/// One `PT_LOAD` segment of an [`ElfImage`].
#[derive(Debug)]
pub struct LoadSegment<'a> {
    /// Virtual address the segment must be mapped at.
    pub vaddr: u64,
    /// File-backed bytes. May be shorter than `memsz`; the remainder is
    /// the segment's zero-fill (BSS) region.
    pub data: &'a [u8],
    /// Total in-memory size of the segment.
    pub memsz: u64,
    /// Raw `p_flags` word (`PF_X` / `PF_W` / `PF_R`).
    pub flags: u32,
}

impl<'a> ElfImage<'a> {
    /// Parses an ELF64 executable from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the header fails validation.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::parse(data)?;
        Ok(Self { data, header })
    }

    /// Virtual address of the entry point.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    /// The validated file header.
    #[must_use]
    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    /// Iterates over the `PT_LOAD` segments.
    ///
    /// Segment file ranges are clamped to the input; a segment whose
    /// declared file bytes extend past the end of the image yields the
    /// bytes that exist. Header validation already guarantees the table
    /// itself is in bounds.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "segment fields fit in usize on 64-bit targets"
    )]
    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment<'a>> {
        let data = self.data;
        let phoff = self.header.e_phoff as usize;
        let phentsize = self.header.e_phentsize as usize;

        (0..self.header.e_phnum as usize).filter_map(move |i| {
            let off = phoff + i * phentsize;
            if off + PHDR_SIZE > data.len() {
                return None;
            }

            let phdr = ProgramHeader::parse(data, off);
            if phdr.seg_type != PT_LOAD {
                return None;
            }

            let start = (phdr.offset as usize).min(data.len());
            let end = phdr
                .offset
                .checked_add(phdr.filesz)
                .map_or(data.len(), |e| (e as usize).min(data.len()));

            Some(LoadSegment {
                vaddr: phdr.vaddr,
                data: &data[start..end],
                memsz: phdr.memsz,
                flags: phdr.flags,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::{minimal_header, push_phdr};
    use crate::header::{PF_W, PF_X};

    /// Builds an executable with one read+execute PT_LOAD carrying `payload`.
    fn exec_with_segment(payload: &[u8], memsz: u64) -> Vec<u8> {
        let mut buf = minimal_header();
        let data_offset = (64 + 56) as u64;
        push_phdr(&mut buf, 1, 4 | PF_X, data_offset, 0x40_0000, payload.len() as u64, memsz);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn entry_point_round_trip() {
        let buf = minimal_header();
        let image = ElfImage::parse(&buf).expect("valid image");
        assert_eq!(image.entry_point(), 0x0040_1000);
        assert_eq!(image.load_segments().count(), 0);
    }

    #[test]
    fn single_load_segment() {
        let payload = b"\x48\x31\xc0\xc3";
        let buf = exec_with_segment(payload, payload.len() as u64);
        let image = ElfImage::parse(&buf).expect("valid image");

        let segs: Vec<_> = image.load_segments().collect();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].vaddr, 0x40_0000);
        assert_eq!(segs[0].data, payload);
        assert_eq!(segs[0].flags & PF_X, PF_X);
    }

    #[test]
    fn bss_region_reported_via_memsz() {
        let payload = b"data";
        let buf = exec_with_segment(payload, 0x2000);
        let image = ElfImage::parse(&buf).expect("valid image");

        let seg = image.load_segments().next().expect("one segment");
        assert_eq!(seg.data.len(), 4);
        assert_eq!(seg.memsz, 0x2000);
    }

    #[test]
    fn non_load_segments_skipped() {
        let mut buf = minimal_header();
        let data_offset = (64 + 56 * 3) as u64;
        push_phdr(&mut buf, 1, 4, data_offset, 0x40_0000, 4, 4);
        push_phdr(&mut buf, 4, 0, 0, 0, 0, 0); // PT_NOTE
        push_phdr(&mut buf, 1, 4 | PF_W, data_offset + 4, 0x60_0000, 4, 0x1000);
        buf.extend_from_slice(&[0xAA; 4]);
        buf.extend_from_slice(&[0xBB; 4]);

        let image = ElfImage::parse(&buf).expect("valid image");
        let segs: Vec<_> = image.load_segments().collect();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].data, &[0xAA; 4]);
        assert_eq!(segs[1].data, &[0xBB; 4]);
        assert_eq!(segs[1].flags & PF_W, PF_W);
    }

    #[test]
    fn pure_bss_segment_has_no_file_bytes() {
        let mut buf = minimal_header();
        push_phdr(&mut buf, 1, 4 | PF_W, 0, 0x60_0000, 0, 0x4000);
        let image = ElfImage::parse(&buf).expect("valid image");
        let seg = image.load_segments().next().expect("one segment");
        assert!(seg.data.is_empty());
        assert_eq!(seg.memsz, 0x4000);
    }

    #[test]
    fn truncated_segment_clamped_to_input() {
        let mut buf = minimal_header();
        push_phdr(&mut buf, 1, 4, 64 + 56, 0x40_0000, 0x1000, 0x1000);
        buf.extend_from_slice(&[0xCC; 8]); // 8 of the declared 4096 bytes
        let image = ElfImage::parse(&buf).expect("valid image");
        let seg = image.load_segments().next().expect("one segment");
        assert_eq!(seg.data, &[0xCC; 8]);
    }
}
