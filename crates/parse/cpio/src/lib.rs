//! cpio `newc` archive parser.
//!
//! The `newc` format is a sequence of records, each starting with a
//! 110-byte ASCII header: the magic `070701` followed by thirteen
//! 8-digit hexadecimal fields. The entry name follows the header and the
//! file data follows the name, both padded to 4-byte boundaries. The
//! archive ends at a record named `TRAILER!!!`.
//!
//! Every field access is range-checked against the archive slice; a
//! malformed record stops enumeration with a [`CpioError`] instead of
//! reading past the input.
//!
//! ```
//! use muon_cpio::CpioArchive;
//!
//! fn names(archive: &[u8]) {
//!     for entry in CpioArchive::new(archive).entries() {
//!         let Ok(entry) = entry else { break };
//!         let _ = (entry.name, entry.data, entry.is_dir());
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

use core::fmt;

/// The six-byte magic every `newc` record starts with.
const MAGIC: &[u8; 6] = b"070701";

/// Header length: magic + 13 eight-digit hex fields.
const HEADER_SIZE: usize = 110;

/// Byte offset of the `filesize` field within a record.
const FILESIZE_OFFSET: usize = 54;

/// Byte offset of the `namesize` field within a record.
const NAMESIZE_OFFSET: usize = 94;

/// Byte offset of the `mode` field within a record.
const MODE_OFFSET: usize = 14;

/// Name of the terminating record.
const TRAILER: &str = "TRAILER!!!";

/// Upper bound on records per archive. Keeps enumeration finite even if
/// a corrupt record chain loops back on itself.
const MAX_ENTRIES: usize = 64;

/// Mode mask and value for directory entries.
const S_IFMT: u32 = 0xF000;
const S_IFDIR: u32 = 0x4000;

/// Reasons archive enumeration stops early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpioError {
    /// A record does not start with `070701`.
    BadMagic,
    /// A header, name, or data region extends past the archive.
    Truncated,
    /// A hex field contains a non-hex digit.
    BadField,
    /// An entry name is not valid UTF-8.
    BadName,
    /// More than [`MAX_ENTRIES`] records before the trailer.
    TooManyEntries,
}

impl fmt::Display for CpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad record magic"),
            Self::Truncated => write!(f, "record extends past archive end"),
            Self::BadField => write!(f, "non-hex digit in header field"),
            Self::BadName => write!(f, "entry name is not UTF-8"),
            Self::TooManyEntries => write!(f, "too many records before trailer"),
        }
    }
}

/// One archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpioEntry<'a> {
    /// Entry name (path within the archive).
    pub name: &'a str,
    /// File contents at their in-archive location.
    pub data: &'a [u8],
    /// Raw mode word from the header.
    pub mode: u32,
}

impl CpioEntry<'_> {
    /// Whether this entry describes a directory.
    ///
    /// Either the mode carries the directory type bits, or the name ends
    /// with `/` (some generators mark directories that way instead).
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR || self.name.ends_with('/')
    }
}

/// A borrowed view of a `newc` archive.
#[derive(Debug, Clone, Copy)]
pub struct CpioArchive<'a> {
    data: &'a [u8],
}

impl<'a> CpioArchive<'a> {
    /// Wraps an in-memory archive. No parsing happens until iteration.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Iterates over the archive members up to the trailer record.
    ///
    /// The iterator yields `Err` once for the first malformed record and
    /// then stops, so a corrupt archive can never drive an endless scan.
    #[must_use]
    pub fn entries(&self) -> Entries<'a> {
        Entries {
            data: self.data,
            offset: 0,
            count: 0,
            done: false,
        }
    }

    /// Looks up a member by exact name.
    pub fn find(&self, name: &str) -> Option<CpioEntry<'a>> {
        self.entries().filter_map(Result::ok).find(|e| e.name == name)
    }
}

/// Iterator over the members of a [`CpioArchive`].
pub struct Entries<'a> {
    data: &'a [u8],
    offset: usize,
    count: usize,
    done: bool,
}

/// Decodes one 8-digit hex field at `offset`.
fn hex_field(data: &[u8], offset: usize) -> Result<u32, CpioError> {
    let bytes = data.get(offset..offset + 8).ok_or(CpioError::Truncated)?;
    let mut value = 0u32;
    for &b in bytes {
        let digit = match b {
            b'0'..=b'9' => u32::from(b - b'0'),
            b'a'..=b'f' => u32::from(b - b'a') + 10,
            b'A'..=b'F' => u32::from(b - b'A') + 10,
            _ => return Err(CpioError::BadField),
        };
        value = (value << 4) | digit;
    }
    Ok(value)
}

/// Rounds `n` up to the next multiple of 4.
const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

impl<'a> Entries<'a> {
    /// Parses the record at `self.offset`, advancing past it.
    fn parse_record(&mut self) -> Result<Option<CpioEntry<'a>>, CpioError> {
        let base = self.offset;
        let header = self
            .data
            .get(base..base + HEADER_SIZE)
            .ok_or(CpioError::Truncated)?;
        if &header[..6] != MAGIC {
            return Err(CpioError::BadMagic);
        }

        let mode = hex_field(self.data, base + MODE_OFFSET)?;
        let filesize = hex_field(self.data, base + FILESIZE_OFFSET)? as usize;
        let namesize = hex_field(self.data, base + NAMESIZE_OFFSET)? as usize;

        // namesize counts the trailing NUL.
        let name_start = base + HEADER_SIZE;
        let name_end = name_start
            .checked_add(namesize)
            .ok_or(CpioError::Truncated)?;
        let name_bytes = self
            .data
            .get(name_start..name_end)
            .ok_or(CpioError::Truncated)?;
        let name_bytes = name_bytes.split_last().map_or(name_bytes, |(_, rest)| rest);
        let name = core::str::from_utf8(name_bytes).map_err(|_| CpioError::BadName)?;

        let data_start = align4(name_end);
        let data_end = data_start.checked_add(filesize).ok_or(CpioError::Truncated)?;
        if name == TRAILER {
            return Ok(None);
        }
        let data = self
            .data
            .get(data_start..data_end)
            .ok_or(CpioError::Truncated)?;

        self.offset = align4(data_end);
        Ok(Some(CpioEntry { name, data, mode }))
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<CpioEntry<'a>, CpioError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.count >= MAX_ENTRIES {
            self.done = true;
            return Some(Err(CpioError::TooManyEntries));
        }

        match self.parse_record() {
            Ok(Some(entry)) => {
                self.count += 1;
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends one newc record (header + name + padded data).
    fn push_record(buf: &mut Vec<u8>, name: &str, data: &[u8], mode: u32) {
        let mut header = Vec::new();
        header.extend_from_slice(MAGIC);
        let fields = [
            0,                      // ino
            mode,                   // mode
            0,                      // uid
            0,                      // gid
            1,                      // nlink
            0,                      // mtime
            data.len() as u32,      // filesize
            0,                      // devmajor
            0,                      // devminor
            0,                      // rdevmajor
            0,                      // rdevminor
            (name.len() + 1) as u32, // namesize, incl. NUL
            0,                      // check
        ];
        for field in fields {
            header.extend_from_slice(format!("{field:08x}").as_bytes());
        }
        assert_eq!(header.len(), HEADER_SIZE);

        buf.extend_from_slice(&header);
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        buf.extend_from_slice(data);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn archive_of(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, data, mode) in entries {
            push_record(&mut buf, name, data, *mode);
        }
        push_record(&mut buf, TRAILER, &[], 0);
        buf
    }

    #[test]
    fn single_file() {
        let buf = archive_of(&[("hello", b"hi\n", 0o100_644)]);
        let archive = CpioArchive::new(&buf);

        let entries: Vec<_> = archive.entries().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello");
        assert_eq!(entries[0].data, b"hi\n");
        assert!(!entries[0].is_dir());
    }

    #[test]
    fn trailer_only_archive_is_empty() {
        let buf = archive_of(&[]);
        assert_eq!(CpioArchive::new(&buf).entries().count(), 0);
    }

    #[test]
    fn directory_entries_flagged() {
        let buf = archive_of(&[("bin", b"", 0o040_755), ("etc/", b"", 0o100_644)]);
        let entries: Vec<_> = CpioArchive::new(&buf).entries().map(Result::unwrap).collect();
        assert!(entries[0].is_dir(), "mode-marked directory");
        assert!(entries[1].is_dir(), "slash-marked directory");
    }

    #[test]
    fn data_alignment_respected() {
        // "a" has namesize 2, forcing both name and data padding.
        let buf = archive_of(&[("a", b"12345", 0o100_644), ("b", b"xyz", 0o100_644)]);
        let entries: Vec<_> = CpioArchive::new(&buf).entries().map(Result::unwrap).collect();
        assert_eq!(entries[0].data, b"12345");
        assert_eq!(entries[1].data, b"xyz");
    }

    #[test]
    fn find_by_name() {
        let buf = archive_of(&[("one", b"1", 0o100_644), ("two", b"2", 0o100_644)]);
        let archive = CpioArchive::new(&buf);
        assert_eq!(archive.find("two").expect("present").data, b"2");
        assert!(archive.find("three").is_none());
    }

    #[test]
    fn bad_magic_stops_enumeration() {
        let mut buf = archive_of(&[("ok", b"fine", 0o100_644)]);
        // Corrupt the second record's magic (the trailer).
        let trailer_at = align4(align4(HEADER_SIZE + "ok".len() + 1) + "fine".len());
        buf[trailer_at] = b'X';

        let results: Vec<_> = CpioArchive::new(&buf).entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(CpioError::BadMagic));
    }

    #[test]
    fn truncated_header_reported() {
        let buf = archive_of(&[("file", b"data", 0o100_644)]);
        let cut = &buf[..HEADER_SIZE / 2];
        let results: Vec<_> = CpioArchive::new(cut).entries().collect();
        assert_eq!(results, vec![Err(CpioError::Truncated)]);
    }

    #[test]
    fn truncated_data_reported() {
        let mut buf = Vec::new();
        push_record(&mut buf, "big", &[0u8; 32], 0o100_644);
        buf.truncate(buf.len() - 16);
        let results: Vec<_> = CpioArchive::new(&buf).entries().collect();
        assert_eq!(results, vec![Err(CpioError::Truncated)]);
    }

    #[test]
    fn non_hex_field_reported() {
        let mut buf = archive_of(&[("f", b"", 0o100_644)]);
        buf[FILESIZE_OFFSET] = b'g';
        let results: Vec<_> = CpioArchive::new(&buf).entries().collect();
        assert_eq!(results, vec![Err(CpioError::BadField)]);
    }

    #[test]
    fn missing_trailer_ends_with_error_not_spin() {
        let mut buf = Vec::new();
        push_record(&mut buf, "only", b"data", 0o100_644);
        // No trailer: the scan runs off the end and reports truncation.
        let results: Vec<_> = CpioArchive::new(&buf).entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(CpioError::Truncated));
    }

    #[test]
    fn record_loop_bounded() {
        // A self-referencing chain: records that always parse but never
        // reach a trailer must trip the entry bound.
        let mut buf = Vec::new();
        for _ in 0..MAX_ENTRIES + 4 {
            push_record(&mut buf, "x", b"", 0o100_644);
        }
        let results: Vec<_> = CpioArchive::new(&buf).entries().collect();
        assert_eq!(results.len(), MAX_ENTRIES + 1);
        assert_eq!(results[MAX_ENTRIES], Err(CpioError::TooManyEntries));
    }

    #[test]
    fn empty_input_reports_truncated() {
        let results: Vec<_> = CpioArchive::new(&[]).entries().collect();
        assert_eq!(results, vec![Err(CpioError::Truncated)]);
    }
}
