//! User-pointer validation and bounce-buffer copies.
//!
//! A pointer from ring 3 passes two gates before the kernel touches it.
//! The *range* gate is pure arithmetic: non-null, no end-of-range
//! overflow, strictly below the kernel half. The *mapping* gate walks
//! the process's page tables and demands `PRESENT | USER` (plus
//! `WRITABLE` for writes) on every page of the range.
//!
//! Actual data moves through a kernel bounce buffer of one page;
//! transfers larger than that are clipped, never split.

use core::fmt;

/// First address of the kernel half; user ranges must stay below it.
pub const USER_ADDR_MAX: usize = 0x0000_8000_0000_0000;

/// Bounce-buffer size: one page, the per-call transfer ceiling.
pub const BOUNCE_SIZE: usize = 4096;

/// Why a user pointer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPtrError {
    /// The pointer was null.
    Null,
    /// `base + len - 1` wrapped around the address space.
    Overflow,
    /// The range reaches into the kernel half.
    KernelRange,
    /// A page of the range is unmapped or lacks the required bits.
    NotMapped,
}

impl fmt::Display for UserPtrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null user pointer"),
            Self::Overflow => write!(f, "user range overflows"),
            Self::KernelRange => write!(f, "user range reaches kernel space"),
            Self::NotMapped => write!(f, "user range not mapped"),
        }
    }
}

/// A range-checked user buffer. Range-checked is *not* mapped-checked;
/// the mapping gate runs separately against the live address space.
#[derive(Debug, Clone, Copy)]
pub struct UserSlice {
    addr: usize,
    len: usize,
}

impl UserSlice {
    /// Applies the range gate.
    ///
    /// # Errors
    ///
    /// [`UserPtrError::Null`] / [`Overflow`](UserPtrError::Overflow) /
    /// [`KernelRange`](UserPtrError::KernelRange) as described above.
    /// A zero-length range at a non-null address is fine.
    pub fn new(addr: usize, len: usize) -> Result<Self, UserPtrError> {
        if addr == 0 {
            return Err(UserPtrError::Null);
        }
        if len == 0 {
            return Ok(Self { addr, len });
        }
        let last = addr.checked_add(len - 1).ok_or(UserPtrError::Overflow)?;
        if last >= USER_ADDR_MAX {
            return Err(UserPtrError::KernelRange);
        }
        Ok(Self { addr, len })
    }

    /// Base address.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(target_os = "none")]
mod checked {
    //! The mapping gate and the bounce copies. Only meaningful with a
    //! live user address space, hence kernel-only.

    use super::{BOUNCE_SIZE, UserPtrError, UserSlice};
    use crate::addr::VirtAddr;
    use crate::mm::{hhdm, mapper::PageTableMapper};

    /// Walks the current process's page tables over the slice's range.
    ///
    /// # Errors
    ///
    /// [`UserPtrError::NotMapped`] if any page lacks `PRESENT | USER`
    /// (or `WRITABLE`, when writing), or when no process is current.
    pub fn verify_mapped(slice: &UserSlice, need_write: bool) -> Result<(), UserPtrError> {
        if slice.is_empty() {
            return Ok(());
        }
        let mapper = PageTableMapper::new(hhdm::offset());
        let ok = crate::proc::with_current(|process| {
            // SAFETY: user_cr3 is the live PML4 of the current process.
            unsafe {
                mapper.user_range_mapped(
                    process.user_cr3,
                    VirtAddr::new_truncate(slice.addr() as u64),
                    slice.len(),
                    need_write,
                )
            }
        });
        match ok {
            Some(true) => Ok(()),
            _ => Err(UserPtrError::NotMapped),
        }
    }

    /// Copies user bytes into `bounce`, clipping at [`BOUNCE_SIZE`].
    /// Returns the byte count copied.
    ///
    /// # Errors
    ///
    /// Propagates the mapping gate.
    pub fn copy_from_user(
        slice: &UserSlice,
        bounce: &mut [u8; BOUNCE_SIZE],
    ) -> Result<usize, UserPtrError> {
        let len = slice.len().min(BOUNCE_SIZE);
        let clipped = UserSlice::new(slice.addr(), len).expect("clipped range shrinks");
        verify_mapped(&clipped, false)?;
        // SAFETY: The range is user-mapped readable and CR3 still holds
        // the process's address space during a syscall.
        unsafe {
            core::ptr::copy_nonoverlapping(
                slice.addr() as *const u8,
                bounce.as_mut_ptr(),
                len,
            );
        }
        Ok(len)
    }

    /// Copies kernel bytes out to the user range, clipping at
    /// [`BOUNCE_SIZE`]. Returns the byte count copied.
    ///
    /// # Errors
    ///
    /// Propagates the mapping gate (with the writable requirement).
    pub fn copy_to_user(slice: &UserSlice, data: &[u8]) -> Result<usize, UserPtrError> {
        let len = slice.len().min(data.len()).min(BOUNCE_SIZE);
        let clipped = UserSlice::new(slice.addr(), len).expect("clipped range shrinks");
        verify_mapped(&clipped, true)?;
        // SAFETY: The range is user-mapped writable and CR3 still holds
        // the process's address space during a syscall.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), slice.addr() as *mut u8, len);
        }
        Ok(len)
    }

    /// Copies a NUL-terminated user string of at most 255 bytes.
    ///
    /// # Errors
    ///
    /// The range/mapping gates, or [`UserPtrError::Overflow`] when no
    /// NUL shows up within the limit.
    pub fn copy_user_cstr(addr: usize, out: &mut [u8; 256]) -> Result<usize, UserPtrError> {
        for i in 0..out.len() {
            let byte_addr = addr.checked_add(i).ok_or(UserPtrError::Overflow)?;
            let byte_slice = UserSlice::new(byte_addr, 1)?;
            verify_mapped(&byte_slice, false)?;
            // SAFETY: The single byte is user-mapped readable.
            let byte = unsafe { *(byte_slice.addr() as *const u8) };
            if byte == 0 {
                return Ok(i);
            }
            out[i] = byte;
        }
        Err(UserPtrError::Overflow)
    }
}

#[cfg(target_os = "none")]
pub use checked::{copy_from_user, copy_to_user, copy_user_cstr, verify_mapped};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_user_range() {
        let slice = UserSlice::new(0x1000, 4096).expect("valid range");
        assert_eq!(slice.addr(), 0x1000);
        assert_eq!(slice.len(), 4096);
    }

    #[test]
    fn rejects_null() {
        assert_eq!(UserSlice::new(0, 16).err(), Some(UserPtrError::Null));
        assert_eq!(UserSlice::new(0, 0).err(), Some(UserPtrError::Null));
    }

    #[test]
    fn rejects_end_overflow() {
        assert_eq!(
            UserSlice::new(usize::MAX, 2).err(),
            Some(UserPtrError::Overflow)
        );
        assert_eq!(
            UserSlice::new(usize::MAX - 7, 16).err(),
            Some(UserPtrError::Overflow)
        );
    }

    #[test]
    fn rejects_kernel_half() {
        assert_eq!(
            UserSlice::new(USER_ADDR_MAX, 1).err(),
            Some(UserPtrError::KernelRange)
        );
        assert_eq!(
            UserSlice::new(USER_ADDR_MAX - 8, 16).err(),
            Some(UserPtrError::KernelRange)
        );
    }

    #[test]
    fn accepts_range_ending_at_boundary() {
        // The last byte sits exactly below the kernel half.
        assert!(UserSlice::new(USER_ADDR_MAX - 16, 16).is_ok());
    }

    #[test]
    fn empty_range_at_valid_address() {
        let slice = UserSlice::new(0x1000, 0).expect("empty is fine");
        assert!(slice.is_empty());
    }
}
