//! Heap-backed writable filesystem.
//!
//! `RamFs` is the initramfs overlay: archive contents are copied into
//! heap-owned buffers at mount time, after which files can be created,
//! written, and re-permissioned freely. Writes past the end of a file
//! grow it; the gap between the old end and the write offset is
//! zero-filled so reads stay deterministic.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::sync::SpinLock;

use super::{DirEntry, FileSystem, FsError, Inode, InodeType, Mode};

/// A ramfs instance.
pub struct RamFs {
    root: Arc<RamInode>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    /// Creates a ramfs with an empty root directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Arc::new(RamInode {
                kind: InodeType::Directory,
                mode: SpinLock::new(Mode::DIR_DEFAULT),
                data: SpinLock::new(Vec::new()),
                children: SpinLock::new(BTreeMap::new()),
            }),
        }
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn root(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }
}

/// A ramfs file or directory.
pub struct RamInode {
    kind: InodeType,
    mode: SpinLock<Mode>,
    /// File bytes; unused for directories.
    data: SpinLock<Vec<u8>>,
    /// Children; unused for files.
    children: SpinLock<BTreeMap<String, Arc<RamInode>>>,
}

impl Inode for RamInode {
    fn kind(&self) -> InodeType {
        self.kind
    }

    fn size(&self) -> usize {
        match self.kind {
            InodeType::File => self.data.lock().len(),
            _ => 0,
        }
    }

    fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    fn set_mode(&self, mode: Mode) -> Result<(), FsError> {
        *self.mode.lock() = mode;
        Ok(())
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.kind == InodeType::Directory {
            return Err(FsError::IsADirectory);
        }
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let available = &data[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize, FsError> {
        if self.kind == InodeType::Directory {
            return Err(FsError::IsADirectory);
        }
        let mut data = self.data.lock();
        let end = offset.checked_add(buf.len()).ok_or(FsError::InvalidArgument)?;
        if end > data.len() {
            // Vec growth doubles capacity; the gap reads as zeros.
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>, FsError> {
        if self.kind != InodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        self.children
            .lock()
            .get(name)
            .cloned()
            .map(|inode| inode as Arc<dyn Inode>)
            .ok_or(FsError::NotFound)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        if self.kind != InodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok(self
            .children
            .lock()
            .iter()
            .map(|(name, inode)| DirEntry {
                name: name.clone(),
                kind: inode.kind,
                size: inode.size(),
            })
            .collect())
    }

    fn create(&self, name: &str, kind: InodeType, mode: Mode) -> Result<Arc<dyn Inode>, FsError> {
        if self.kind != InodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let inode = Arc::new(RamInode {
            kind,
            mode: SpinLock::new(mode),
            data: SpinLock::new(Vec::new()),
            children: SpinLock::new(BTreeMap::new()),
        });
        children.insert(name.to_string(), inode.clone());
        Ok(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_in_root(fs: &RamFs, name: &str) -> Arc<dyn Inode> {
        fs.root()
            .create(name, InodeType::File, Mode::FILE_DEFAULT)
            .expect("create file")
    }

    #[test]
    fn create_write_read() {
        let fs = RamFs::new();
        let f = file_in_root(&fs, "notes");

        assert_eq!(f.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(f.size(), 5);
    }

    #[test]
    fn sparse_write_zero_fills_gap() {
        let fs = RamFs::new();
        let f = file_in_root(&fs, "sparse");

        f.write(0, b"ab").unwrap();
        f.write(6, b"cd").unwrap();

        let mut buf = [0xFFu8; 8];
        assert_eq!(f.read(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"ab\0\0\0\0cd");
    }

    #[test]
    fn read_past_end_is_eof() {
        let fs = RamFs::new();
        let f = file_in_root(&fs, "short");
        f.write(0, b"xy").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(f.read(2, &mut buf).unwrap(), 0);
        assert_eq!(f.read(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn listing_reports_kind_and_size() {
        let fs = RamFs::new();
        file_in_root(&fs, "hello").write(0, b"hi\n").unwrap();
        fs.root()
            .create("sub", InodeType::Directory, Mode::DIR_DEFAULT)
            .unwrap();

        let mut entries = fs.root().readdir().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "hello");
        assert_eq!(entries[0].kind, InodeType::File);
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[1].kind, InodeType::Directory);
    }

    #[test]
    fn duplicate_create_rejected() {
        let fs = RamFs::new();
        file_in_root(&fs, "x");
        assert_eq!(
            fs.root()
                .create("x", InodeType::File, Mode::FILE_DEFAULT)
                .err(),
            Some(FsError::AlreadyExists)
        );
    }

    #[test]
    fn chmod_round_trip() {
        let fs = RamFs::new();
        let f = file_in_root(&fs, "prog");
        assert!(!f.mode().is_executable());
        f.set_mode(Mode(0o755)).unwrap();
        assert!(f.mode().is_executable());
    }

    #[test]
    fn directory_refuses_byte_io() {
        let fs = RamFs::new();
        let root = fs.root();
        let mut buf = [0u8; 4];
        assert_eq!(root.read(0, &mut buf), Err(FsError::IsADirectory));
        assert_eq!(root.write(0, b"no"), Err(FsError::IsADirectory));
    }
}
