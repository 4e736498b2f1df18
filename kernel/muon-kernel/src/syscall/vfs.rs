//! `open`, `close`, and `readdir`.

use crate::fs::file::OpenFlags;
use crate::fs::{self, InodeType};

use super::userptr::{UserSlice, copy_to_user, copy_user_cstr};
use super::{Dirent, SYSCALL_ERROR};

/// `open(path, flags, mode)` — returns a descriptor.
///
/// `flags` and `mode` are accepted for ABI shape but not yet
/// interpreted; files open read-write.
pub(super) fn sys_open(path_ptr: usize, _flags: usize, _mode: usize) -> isize {
    let mut path_buf = [0u8; 256];
    let Ok(len) = copy_user_cstr(path_ptr, &mut path_buf) else {
        return SYSCALL_ERROR;
    };
    let Ok(path) = core::str::from_utf8(&path_buf[..len]) else {
        return SYSCALL_ERROR;
    };

    let inode = match fs::vfs::with_vfs(|vfs| vfs.resolve(path)) {
        Ok(inode) => inode,
        Err(err) => {
            crate::kwarn!("open('{path}'): {err}");
            return SYSCALL_ERROR;
        }
    };
    if inode.kind() == InodeType::Directory {
        return SYSCALL_ERROR;
    }

    let Some(result) = crate::proc::with_current(|process| {
        let mut fd_table = process.fd_table.lock();
        match fd_table.open(inode.clone(), OpenFlags::READ | OpenFlags::WRITE) {
            Ok(fd) => fd as isize,
            Err(err) => {
                crate::kwarn!("open('{path}'): {err}");
                SYSCALL_ERROR
            }
        }
    }) else {
        return SYSCALL_ERROR;
    };
    result
}

/// `close(fd)` — returns 0.
pub(super) fn sys_close(fd: usize) -> isize {
    let Some(result) = crate::proc::with_current(|process| {
        let mut fd_table = process.fd_table.lock();
        match fd_table.close(fd) {
            Ok(()) => 0,
            Err(_) => SYSCALL_ERROR,
        }
    }) else {
        return SYSCALL_ERROR;
    };
    result
}

/// `readdir(index, buf, buf_size)` — writes one [`Dirent`] for the
/// `index`-th entry of the current directory. Returns 1 when an entry
/// was written, 0 past the end.
pub(super) fn sys_readdir(index: usize, buf: usize, buf_size: usize) -> isize {
    let record_size = core::mem::size_of::<Dirent>();
    if buf_size < record_size {
        return SYSCALL_ERROR;
    }
    let Ok(slice) = UserSlice::new(buf, record_size) else {
        return SYSCALL_ERROR;
    };

    let entries = match fs::vfs::with_vfs(|vfs| {
        vfs.resolve(".").and_then(|dir| dir.readdir())
    }) {
        Ok(entries) => entries,
        Err(err) => {
            crate::kwarn!("readdir: {err}");
            return SYSCALL_ERROR;
        }
    };

    let Some(entry) = entries.get(index) else {
        return 0;
    };

    let record = Dirent::new(&entry.name, entry.size as u64);
    match copy_to_user(&slice, record.as_bytes()) {
        Ok(copied) if copied == record_size => 1,
        _ => SYSCALL_ERROR,
    }
}
