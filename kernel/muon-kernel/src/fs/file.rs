//! File descriptors and the per-process descriptor table.

extern crate alloc;

use alloc::sync::Arc;

use bitflags::bitflags;

use super::{FsError, Inode};

/// Number of descriptor slots per process.
pub const MAX_FDS: usize = 16;

/// Stdin descriptor number.
pub const STDIN_FD: usize = 0;
/// Stdout descriptor number.
pub const STDOUT_FD: usize = 1;
/// Stderr descriptor number.
pub const STDERR_FD: usize = 2;

bitflags! {
    /// Open-mode flags.
    #[derive(Debug, Clone, Copy)]
    pub struct OpenFlags: u32 {
        /// Readable.
        const READ  = 0b01;
        /// Writable.
        const WRITE = 0b10;
    }
}

/// One open file: the inode, a byte position, and the open flags.
pub struct OpenFile {
    /// Backing inode.
    pub inode: Arc<dyn Inode>,
    /// Current read/write offset.
    pub offset: usize,
    /// Open flags.
    pub flags: OpenFlags,
}

/// A fixed table of [`MAX_FDS`] descriptor slots.
///
/// Slots 0/1/2 are reserved for the standard streams and are populated
/// by process setup; `open` hands out slots from 3 upward.
pub struct FdTable {
    slots: [Option<OpenFile>; MAX_FDS],
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_FDS],
        }
    }

    /// Opens `inode` in the lowest free slot at or above 3.
    ///
    /// # Errors
    ///
    /// [`FsError::TableFull`] when every slot is taken.
    pub fn open(&mut self, inode: Arc<dyn Inode>, flags: OpenFlags) -> Result<usize, FsError> {
        let fd = (STDERR_FD + 1..MAX_FDS)
            .find(|&fd| self.slots[fd].is_none())
            .ok_or(FsError::TableFull)?;
        self.slots[fd] = Some(OpenFile {
            inode,
            offset: 0,
            flags,
        });
        Ok(fd)
    }

    /// Installs an inode at a specific slot (the standard streams).
    pub fn install(&mut self, fd: usize, inode: Arc<dyn Inode>, flags: OpenFlags) {
        self.slots[fd] = Some(OpenFile {
            inode,
            offset: 0,
            flags,
        });
    }

    /// Closes a descriptor, dropping its inode reference.
    ///
    /// # Errors
    ///
    /// [`FsError::BadFd`] for out-of-range or already-closed slots.
    pub fn close(&mut self, fd: usize) -> Result<(), FsError> {
        let slot = self.slots.get_mut(fd).ok_or(FsError::BadFd)?;
        slot.take().map(|_| ()).ok_or(FsError::BadFd)
    }

    /// The open file at `fd`, if any.
    #[must_use]
    pub fn get(&self, fd: usize) -> Option<&OpenFile> {
        self.slots.get(fd)?.as_ref()
    }

    /// Mutable access to the open file at `fd`.
    pub fn get_mut(&mut self, fd: usize) -> Option<&mut OpenFile> {
        self.slots.get_mut(fd)?.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;
    use crate::fs::{FileSystem, InodeType, Mode};

    fn some_inode() -> Arc<dyn Inode> {
        let fs = RamFs::new();
        fs.root()
            .create("f", InodeType::File, Mode::FILE_DEFAULT)
            .expect("create")
    }

    #[test]
    fn open_starts_above_stderr() {
        let mut table = FdTable::new();
        let fd = table.open(some_inode(), OpenFlags::READ).unwrap();
        assert_eq!(fd, 3);
    }

    #[test]
    fn close_releases_the_slot() {
        let mut table = FdTable::new();
        let fd = table.open(some_inode(), OpenFlags::READ).unwrap();
        table.close(fd).unwrap();
        assert!(table.get(fd).is_none());
        assert_eq!(table.open(some_inode(), OpenFlags::READ).unwrap(), fd);
    }

    #[test]
    fn double_close_is_bad_fd() {
        let mut table = FdTable::new();
        let fd = table.open(some_inode(), OpenFlags::READ).unwrap();
        table.close(fd).unwrap();
        assert_eq!(table.close(fd), Err(FsError::BadFd));
        assert_eq!(table.close(MAX_FDS), Err(FsError::BadFd));
    }

    #[test]
    fn table_fills_up() {
        let mut table = FdTable::new();
        for _ in STDERR_FD + 1..MAX_FDS {
            table.open(some_inode(), OpenFlags::READ).unwrap();
        }
        assert_eq!(
            table.open(some_inode(), OpenFlags::READ),
            Err(FsError::TableFull)
        );
    }
}
