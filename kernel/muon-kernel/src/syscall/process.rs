//! `exit`.

use crate::arch::x86_64::registers::Cr3;
use crate::arch::x86_64::userspace::restore_kernel_context;

/// `exit(status)` — never returns to the caller.
///
/// Records the status, restores the kernel address space, and restores
/// the kernel context saved at user entry. Execution resumes inside the
/// exec runner, which releases the process's frames and hands control
/// back to the shell.
pub(super) fn sys_exit(status: usize) -> isize {
    crate::proc::set_exit_status(status as u64);
    // SAFETY: The kernel upper half is mapped in the dying process's
    // address space, so the root switch is safe mid-stride; the saved
    // RSP was written by enter_user_save on this very entry path.
    unsafe {
        Cr3::write(crate::proc::kernel_cr3());
        restore_kernel_context(crate::proc::saved_kernel_rsp())
    }
}
