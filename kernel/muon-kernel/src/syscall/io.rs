//! `write` and `read`.

use crate::fs::file::OpenFlags;

use super::userptr::{BOUNCE_SIZE, UserSlice, copy_from_user, copy_to_user};
use super::SYSCALL_ERROR;

/// `write(fd, buf, count)` — returns bytes written.
///
/// Transfers are clipped to one bounce buffer; user space loops for
/// more, exactly as it would after any short write.
pub(super) fn sys_write(fd: usize, buf: usize, count: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, count) else {
        return SYSCALL_ERROR;
    };

    let mut bounce = [0u8; BOUNCE_SIZE];
    let Ok(len) = copy_from_user(&slice, &mut bounce) else {
        return SYSCALL_ERROR;
    };

    let Some(result) = crate::proc::with_current(|process| {
        let mut fd_table = process.fd_table.lock();
        let Some(file) = fd_table.get_mut(fd) else {
            return SYSCALL_ERROR;
        };
        if !file.flags.contains(OpenFlags::WRITE) {
            return SYSCALL_ERROR;
        }
        match file.inode.write(file.offset, &bounce[..len]) {
            Ok(written) => {
                file.offset += written;
                written as isize
            }
            Err(err) => {
                crate::kwarn!("write(fd {fd}): {err}");
                SYSCALL_ERROR
            }
        }
    }) else {
        return SYSCALL_ERROR;
    };
    result
}

/// `read(fd, buf, count)` — returns bytes read, 0 at end-of-file.
pub(super) fn sys_read(fd: usize, buf: usize, count: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf, count) else {
        return SYSCALL_ERROR;
    };
    let want = count.min(BOUNCE_SIZE);
    // Fail before touching the device if the destination is bogus. Only
    // the clipped range matters; that is all this call will write.
    let Ok(clipped) = UserSlice::new(buf, want) else {
        return SYSCALL_ERROR;
    };
    if super::userptr::verify_mapped(&clipped, true).is_err() {
        return SYSCALL_ERROR;
    }

    let mut bounce = [0u8; BOUNCE_SIZE];

    let Some(result) = crate::proc::with_current(|process| {
        let mut fd_table = process.fd_table.lock();
        let Some(file) = fd_table.get_mut(fd) else {
            return Err(SYSCALL_ERROR);
        };
        if !file.flags.contains(OpenFlags::READ) {
            return Err(SYSCALL_ERROR);
        }
        match file.inode.read(file.offset, &mut bounce[..want]) {
            Ok(n) => {
                file.offset += n;
                Ok(n)
            }
            Err(err) => {
                crate::kwarn!("read(fd {fd}): {err}");
                Err(SYSCALL_ERROR)
            }
        }
    }) else {
        return SYSCALL_ERROR;
    };

    match result {
        Ok(n) => match copy_to_user(&slice, &bounce[..n]) {
            Ok(copied) => copied as isize,
            Err(_) => SYSCALL_ERROR,
        },
        Err(err) => err,
    }
}
