//! ELF loading and the user-mode round trip.
//!
//! [`spawn`] takes a VFS path and carries it all the way to ring 3:
//! validate the image, build an address space, map the segments and the
//! stack, switch CR3, and `iretq` in. Control comes back through the
//! saved-context longjmp — on `exit` or on a fault — after which every
//! frame the process touched, page tables included, goes back to the
//! frame allocator.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec;
use core::fmt;

use muon_elf::{ElfError, ElfImage, LoadSegment, PF_W, PF_X};

use crate::addr::VirtAddr;
use crate::arch::x86_64::instructions::{disable_interrupts, enable_interrupts};
use crate::arch::x86_64::registers::Cr3;
use crate::arch::x86_64::userspace::enter_user_save;
use crate::fs::{self, FsError, InodeType};
use crate::mm::address_space::AddressSpace;
use crate::mm::paging::PageTableFlags;
use crate::mm::{PAGE_SIZE, hhdm, pmm};

use super::Process;

/// Top of the user stack. The stack occupies the pages just below.
const USER_STACK_TOP: u64 = 0x8000_0000;

/// User stack size in pages.
const USER_STACK_PAGES: u64 = 8;

/// Exclusive upper bound for user mappings (start of the non-canonical
/// hole). Segments past this line are refused outright.
const USER_ADDR_MAX: u64 = 0x0000_8000_0000_0000;

/// Reasons a program cannot be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The path does not resolve to a file.
    NotFound,
    /// The path resolves to a directory.
    IsADirectory,
    /// The file lacks execute permission.
    PermissionDenied,
    /// The file is not a loadable ELF64 executable.
    Image(ElfError),
    /// A segment would fall outside the user half.
    BadSegment,
    /// Out of physical memory while building the address space.
    OutOfMemory,
    /// The VFS failed while reading the file.
    Io(FsError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Image(err) => write!(f, "invalid executable: {err}"),
            Self::BadSegment => write!(f, "segment outside user address space"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Io(err) => write!(f, "read failed: {err}"),
        }
    }
}

/// Loads and runs the executable at `path`, returning its exit status.
///
/// `privileged` (the shell's `su` state) bypasses the execute-bit
/// check. Does not return until the process exits or faults; a fault
/// reports [`FAULT_STATUS`](super::FAULT_STATUS).
///
/// # Errors
///
/// [`ExecError`] if the program cannot be loaded; nothing has entered
/// user mode in that case.
pub fn spawn(path: &str, privileged: bool) -> Result<u64, ExecError> {
    // 1. Fetch the image bytes through the VFS.
    let inode = fs::vfs::with_vfs(|vfs| vfs.resolve(path)).map_err(|err| match err {
        FsError::NotFound => ExecError::NotFound,
        other => ExecError::Io(other),
    })?;
    if inode.kind() == InodeType::Directory {
        return Err(ExecError::IsADirectory);
    }
    if !privileged && !inode.mode().is_executable() {
        return Err(ExecError::PermissionDenied);
    }

    let mut data = vec![0u8; inode.size()];
    let read = inode.read(0, &mut data).map_err(ExecError::Io)?;
    data.truncate(read);

    let image = ElfImage::parse(&data).map_err(ExecError::Image)?;
    let entry = image.entry_point();

    // 2. Build the address space: segments, then the stack.
    let hhdm_offset = hhdm::offset();
    // SAFETY: kernel_cr3 was captured at boot and the PMM hands out
    // zeroed-ownership frames.
    let space = unsafe {
        AddressSpace::new_user(super::kernel_cr3(), hhdm_offset, &mut pmm::alloc_frame)
    }
    .map_err(|_| ExecError::OutOfMemory)?;

    let result = (|| {
        for seg in image.load_segments() {
            map_segment(&space, &seg, hhdm_offset)?;
        }
        map_user_stack(&space, hhdm_offset)
    })();

    if let Err(err) = result {
        crate::kerr!("exec: loading '{path}' failed: {err}");
        // SAFETY: The space was never loaded into CR3.
        unsafe { space.destroy(&mut pmm::free_frame) };
        return Err(err);
    }

    // 3. Run it.
    let process = Arc::new(Process::new(space.root_phys()));
    super::set_current(Some(process));

    crate::kinfo!("exec: entering user mode (entry={entry:#x})");
    let user_rsp = USER_STACK_TOP - 8;

    disable_interrupts();
    // SAFETY: The address space maps the entry executable and the stack
    // writable; interrupts are off across the CR3 switch. Control
    // returns here via restore_kernel_context.
    unsafe {
        Cr3::write(space.root_phys());
        enter_user_save(entry, user_rsp, super::saved_kernel_rsp_slot());
    }
    // Back from ring 3. The exit/fault path already restored the kernel
    // CR3 before the longjmp.
    // SAFETY: Re-enabling interrupts in a plain kernel context.
    unsafe { enable_interrupts() };

    super::set_current(None);
    let status = super::exit_status();

    // 4. Return every frame: leaves, page tables, and the PML4.
    // SAFETY: The process is gone and the kernel CR3 is active.
    unsafe { space.destroy(&mut pmm::free_frame) };

    if status == super::FAULT_STATUS {
        crate::kinfo!("exec: process killed by fault");
    } else {
        crate::kinfo!("exec: process exited with status {status}");
    }
    Ok(status)
}

/// Maps one `PT_LOAD` segment: fresh zeroed frames, file bytes copied
/// in, the rest left zero (the BSS).
fn map_segment(
    space: &AddressSpace,
    seg: &LoadSegment<'_>,
    hhdm_offset: u64,
) -> Result<(), ExecError> {
    let page_mask = PAGE_SIZE as u64 - 1;
    let seg_end = seg.vaddr.checked_add(seg.memsz).ok_or(ExecError::BadSegment)?;
    if seg_end > USER_ADDR_MAX || seg.vaddr == 0 {
        return Err(ExecError::BadSegment);
    }

    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER;
    if seg.flags & PF_W != 0 {
        flags |= PageTableFlags::WRITABLE;
    }
    if seg.flags & PF_X == 0 {
        flags |= PageTableFlags::NO_EXECUTE;
    }

    let first_page = seg.vaddr & !page_mask;
    let last_page = (seg_end + page_mask) & !page_mask;

    let mut page = first_page;
    while page < last_page {
        let frame = pmm::alloc_frame().ok_or(ExecError::OutOfMemory)?;
        space
            .map_user_page(VirtAddr::new(page), frame, flags, &mut pmm::alloc_frame)
            .map_err(|_| ExecError::OutOfMemory)?;

        let frame_ptr = (hhdm_offset + frame.as_u64()) as *mut u8;
        // SAFETY: The frame was just allocated and is HHDM-reachable.
        // Zeroing first guarantees the BSS invariant for every byte the
        // file does not cover.
        unsafe { core::ptr::write_bytes(frame_ptr, 0, PAGE_SIZE) };

        // Copy the slice of file bytes that lands in this page.
        let dest_offset = seg.vaddr.saturating_sub(page) as usize;
        let src_offset = page.saturating_sub(seg.vaddr) as usize;
        if src_offset < seg.data.len() {
            let n = (seg.data.len() - src_offset).min(PAGE_SIZE - dest_offset);
            // SAFETY: dest_offset + n <= PAGE_SIZE and the source range
            // is inside seg.data.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    seg.data.as_ptr().add(src_offset),
                    frame_ptr.add(dest_offset),
                    n,
                );
            }
        }

        page += PAGE_SIZE as u64;
    }

    crate::kdebug!(
        "exec: mapped segment {:#x}..{:#x} ({:?})",
        first_page,
        last_page,
        flags
    );
    Ok(())
}

/// Maps the user stack: writable, non-executable pages ending just
/// below [`USER_STACK_TOP`].
fn map_user_stack(space: &AddressSpace, hhdm_offset: u64) -> Result<(), ExecError> {
    let flags =
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
    let bottom = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE as u64;

    for i in 0..USER_STACK_PAGES {
        let page = bottom + i * PAGE_SIZE as u64;
        let frame = pmm::alloc_frame().ok_or(ExecError::OutOfMemory)?;
        space
            .map_user_page(VirtAddr::new(page), frame, flags, &mut pmm::alloc_frame)
            .map_err(|_| ExecError::OutOfMemory)?;
        // SAFETY: Freshly allocated, HHDM-reachable frame.
        unsafe { core::ptr::write_bytes((hhdm_offset + frame.as_u64()) as *mut u8, 0, PAGE_SIZE) };
    }

    crate::kdebug!(
        "exec: mapped user stack {bottom:#x}..{USER_STACK_TOP:#x} ({USER_STACK_PAGES} pages)"
    );
    Ok(())
}
