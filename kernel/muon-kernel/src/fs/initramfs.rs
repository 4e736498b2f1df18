//! Initramfs unpacking.
//!
//! Copies a cpio `newc` archive into the writable ramfs overlay.
//! Directories are created as needed; file bytes move from the archive
//! into heap-owned buffers so the overlay can be written afterwards.
//! A malformed record stops unpacking with whatever was extracted so
//! far — boot continues with a partial overlay rather than halting.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_cpio::CpioArchive;

use super::{FsError, Inode, InodeType, Mode};

/// Well-known names the VFS probes for an embedded ext2 image.
const EXT2_IMAGE_NAMES: [&str; 2] = ["ext2.img", "disk.img"];

/// Unpacks `archive` into `root`, returning the names of the extracted
/// files (directories excluded, in archive order).
pub fn unpack(archive: &[u8], root: &Arc<dyn Inode>) -> Vec<String> {
    let mut names = Vec::new();

    for entry in CpioArchive::new(archive).entries() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                crate::kwarn!("initramfs: archive damaged ({err}); stopping extraction");
                break;
            }
        };

        let name = entry.name.trim_start_matches('/').trim_end_matches('/');
        if name.is_empty() || name == "." {
            continue;
        }

        if entry.is_dir() {
            if let Err(err) = ensure_directory(root, name) {
                crate::kwarn!("initramfs: mkdir '{name}' failed: {err}");
            }
            continue;
        }

        match extract_file(root, name, entry.data, Mode(entry.mode as u16 & 0o7777)) {
            Ok(()) => names.push(String::from(name)),
            Err(err) => crate::kwarn!("initramfs: extract '{name}' failed: {err}"),
        }
    }

    names
}

/// Scans `archive` for a well-known ext2 image name (`ext2.img`,
/// `disk.img`) and returns its bytes when present.
///
/// The returned slice points into the archive itself — boot-module
/// memory, alive for the kernel's lifetime — so the image is usable
/// without copying it through the overlay.
#[must_use]
pub fn find_ext2_image<'a>(archive: &'a [u8]) -> Option<(&'static str, &'a [u8])> {
    let cpio = CpioArchive::new(archive);
    EXT2_IMAGE_NAMES
        .iter()
        .find_map(|&name| cpio.find(name).map(|entry| (name, entry.data)))
}

/// Creates each directory of `path` that does not already exist.
fn ensure_directory(root: &Arc<dyn Inode>, path: &str) -> Result<Arc<dyn Inode>, FsError> {
    let mut current = root.clone();
    for component in super::path::components(path) {
        current = match current.lookup(component) {
            Ok(inode) => inode,
            Err(FsError::NotFound) => {
                current.create(component, InodeType::Directory, Mode::DIR_DEFAULT)?
            }
            Err(err) => return Err(err),
        };
    }
    Ok(current)
}

/// Copies one archive member into the overlay.
fn extract_file(
    root: &Arc<dyn Inode>,
    name: &str,
    data: &[u8],
    mode: Mode,
) -> Result<(), FsError> {
    let (parent, file_name) = match name.rsplit_once('/') {
        Some((dir, file)) => (ensure_directory(root, dir)?, file),
        None => (root.clone(), name),
    };

    let inode = parent.create(file_name, InodeType::File, mode)?;
    if !data.is_empty() {
        let written = inode.write(0, data)?;
        if written != data.len() {
            return Err(FsError::InvalidArgument);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;
    use crate::fs::ramfs::RamFs;

    /// Builds a newc archive in memory (same layout as the muon-cpio
    /// fixtures).
    fn build_archive(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut push = |name: &str, data: &[u8], mode: u32| {
            buf.extend_from_slice(b"070701");
            let fields = [
                0u32,
                mode,
                0,
                0,
                1,
                0,
                data.len() as u32,
                0,
                0,
                0,
                0,
                (name.len() + 1) as u32,
                0,
            ];
            for field in fields {
                buf.extend_from_slice(format!("{field:08x}").as_bytes());
            }
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
            buf.extend_from_slice(data);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };
        for (name, data, mode) in entries {
            push(name, data, *mode);
        }
        push("TRAILER!!!", &[], 0);
        buf
    }

    #[test]
    fn unpack_single_file() {
        let archive = build_archive(&[("hello", b"hi\n", 0o100_644)]);
        let fs = RamFs::new();
        let names = unpack(&archive, &fs.root());

        assert_eq!(names, ["hello"]);
        let hello = fs.root().lookup("hello").expect("extracted");
        let mut buf = [0u8; 8];
        assert_eq!(hello.read(0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"hi\n");
    }

    #[test]
    fn unpack_nested_paths_creates_directories() {
        let archive = build_archive(&[
            ("bin", b"", 0o040_755),
            ("bin/ls", b"ELF!", 0o100_755),
            ("etc/motd", b"hi", 0o100_644),
        ]);
        let fs = RamFs::new();
        let names = unpack(&archive, &fs.root());
        assert_eq!(names, ["bin/ls", "etc/motd"]);

        let bin = fs.root().lookup("bin").unwrap();
        assert_eq!(bin.kind(), InodeType::Directory);
        assert!(bin.lookup("ls").is_ok());
        // etc/ was created implicitly for the file inside it.
        assert!(fs.root().lookup("etc").unwrap().lookup("motd").is_ok());
    }

    #[test]
    fn trailer_only_archive_yields_empty_overlay() {
        let archive = build_archive(&[]);
        let fs = RamFs::new();
        let names = unpack(&archive, &fs.root());
        assert!(names.is_empty());
        assert!(fs.root().readdir().unwrap().is_empty());
    }

    #[test]
    fn damaged_archive_keeps_earlier_files() {
        let mut archive = build_archive(&[
            ("first", b"one", 0o100_644),
            ("second", b"two", 0o100_644),
        ]);
        // Corrupt the second record's magic.
        let name_end = (110 + "first".len() + 1 + 3) & !3;
        let second_at = (name_end + "one".len() + 3) & !3;
        archive[second_at] = b'X';

        let fs = RamFs::new();
        let names = unpack(&archive, &fs.root());
        assert_eq!(names, ["first"]);
    }

    #[test]
    fn ext2_image_detected_by_well_known_name() {
        let archive = build_archive(&[
            ("hello", b"hi", 0o100_644),
            ("ext2.img", b"not-really-ext2", 0o100_644),
        ]);
        let (name, data) = find_ext2_image(&archive).expect("image present");
        assert_eq!(name, "ext2.img");
        assert_eq!(data, b"not-really-ext2");

        let plain = build_archive(&[("hello", b"hi", 0o100_644)]);
        assert!(find_ext2_image(&plain).is_none());
    }

    #[test]
    fn executable_mode_preserved() {
        let archive = build_archive(&[("prog", b"\x7fELF", 0o100_755)]);
        let fs = RamFs::new();
        unpack(&archive, &fs.root());
        assert!(fs.root().lookup("prog").unwrap().mode().is_executable());
    }
}
