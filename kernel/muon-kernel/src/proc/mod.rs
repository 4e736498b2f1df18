//! Process state.
//!
//! There is no process table and no scheduler: at most one user process
//! exists, and it runs until it exits or faults. What the kernel tracks
//! is the minimal context needed to get *back* from that process — the
//! kernel PML4, the kernel stack pointer saved by `enter_user_save`,
//! and the exit status the trap paths leave behind.

pub mod exec;

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::addr::PhysAddr;
use crate::arch::x86_64::registers::Cr3;
use crate::arch::x86_64::userspace::restore_kernel_context;
use crate::fs::console;
use crate::fs::file::{FdTable, OpenFlags, STDERR_FD, STDIN_FD, STDOUT_FD};
use crate::sync::SpinLock;

/// Exit status reported when a process is killed by a fault.
pub const FAULT_STATUS: u64 = u64::MAX;

/// The kernel PML4, captured at boot for fault recovery.
static KERNEL_CR3: AtomicU64 = AtomicU64::new(0);

/// Kernel RSP saved by `enter_user_save`, consumed by the longjmp paths.
static SAVED_KERNEL_RSP: AtomicU64 = AtomicU64::new(0);

/// Status left behind by `sys_exit` or the fault handler.
static EXIT_STATUS: AtomicU64 = AtomicU64::new(0);

/// The currently running user process, if any.
static CURRENT: SpinLock<Option<Arc<Process>>> = SpinLock::new(None);

/// A user process: its address-space root and its descriptor table.
pub struct Process {
    /// Physical base of the process PML4, for CR3 switches and for
    /// user-pointer validation walks.
    pub user_cr3: PhysAddr,
    /// The 16-slot descriptor table, console on 0/1/2.
    pub fd_table: SpinLock<FdTable>,
}

impl Process {
    /// Creates the process record with the standard streams wired to
    /// the console device.
    #[must_use]
    pub fn new(user_cr3: PhysAddr) -> Self {
        let mut fd_table = FdTable::new();
        fd_table.install(STDIN_FD, console::console(), OpenFlags::READ);
        fd_table.install(STDOUT_FD, console::console(), OpenFlags::WRITE);
        fd_table.install(STDERR_FD, console::console(), OpenFlags::WRITE);
        Self {
            user_cr3,
            fd_table: SpinLock::new(fd_table),
        }
    }
}

/// Captures the current CR3 as the kernel PML4.
///
/// Must run before the first address-space switch; the fault-recovery
/// path depends on this value.
pub fn save_kernel_cr3() {
    let root = Cr3::read();
    KERNEL_CR3.store(root.as_u64(), Ordering::Release);
    crate::kinfo!("VMM: Stored kernel PML4 address: {:#x}", root.as_u64());
}

/// The kernel PML4 captured by [`save_kernel_cr3`].
#[must_use]
pub fn kernel_cr3() -> PhysAddr {
    PhysAddr::new(KERNEL_CR3.load(Ordering::Acquire))
}

/// The slot `enter_user_save` writes the kernel RSP into.
///
/// `AtomicU64` shares its layout with `u64`, so the assembly side can
/// treat the pointer as a plain slot.
pub(crate) fn saved_kernel_rsp_slot() -> *mut u64 {
    (&raw const SAVED_KERNEL_RSP).cast::<u64>().cast_mut()
}

/// The kernel RSP saved on user entry.
#[must_use]
pub fn saved_kernel_rsp() -> u64 {
    SAVED_KERNEL_RSP.load(Ordering::Acquire)
}

/// Records the process exit status before a longjmp.
pub fn set_exit_status(status: u64) {
    EXIT_STATUS.store(status, Ordering::Release);
}

/// The most recent exit status.
#[must_use]
pub fn exit_status() -> u64 {
    EXIT_STATUS.load(Ordering::Acquire)
}

/// Makes `process` the current process (or clears it with `None`).
pub fn set_current(process: Option<Arc<Process>>) {
    *CURRENT.lock() = process;
}

/// Runs `f` with the current process, or returns `None` when no user
/// process is running.
pub fn with_current<R>(f: impl FnOnce(&Arc<Process>) -> R) -> Option<R> {
    let guard = CURRENT.lock();
    guard.as_ref().map(f)
}

/// Abandons the current process after a ring-3 fault.
///
/// Restores the kernel PML4 (flushing the dead process's TLB entries),
/// records the fault sentinel, and restores the saved kernel context —
/// execution resumes after `enter_user_save` inside the exec runner,
/// which cleans up and returns to the shell.
///
/// # Safety
///
/// A user process must be running, so [`SAVED_KERNEL_RSP`] holds a live
/// kernel stack pointer.
pub unsafe fn terminate_from_fault() -> ! {
    // SAFETY: The kernel upper half is present in every address space,
    // so switching roots under our own feet is safe.
    unsafe { Cr3::write(kernel_cr3()) };
    set_exit_status(FAULT_STATUS);
    crate::kerr!("User process fault. Returning to shell.");
    // SAFETY: Caller guarantees a valid saved context.
    unsafe { restore_kernel_context(saved_kernel_rsp()) }
}
