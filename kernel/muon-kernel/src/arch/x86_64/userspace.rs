//! Ring-3 entry and the saved-context escape hatch.
//!
//! [`enter_user_save`] is the setjmp half: it saves the callee-saved
//! registers and the kernel stack pointer, then `iretq`s into ring 3.
//! [`restore_kernel_context`] is the longjmp half: the exit syscall and
//! the fault handler call it (after restoring the kernel CR3) to
//! "return" from `enter_user_save` into the process runner, which then
//! hands control back to the shell.

use super::gdt::selectors;

/// Initial user RFLAGS: IF set, reserved bit 1 set.
pub const USER_RFLAGS: u64 = 0x202;

/// Enters ring 3 at `entry` with stack `user_rsp`, saving the kernel
/// context through `saved_rsp_ptr` first.
///
/// Builds the `iretq` frame (SS = user data | 3, RSP, RFLAGS with IF=1,
/// CS = user code | 3, RIP) and zeroes every GPR before dropping
/// privilege so no kernel values leak into the process.
///
/// Returns only after [`restore_kernel_context`] runs with the saved
/// value.
///
/// # Safety
///
/// - CR3 must already hold the process's address space, with `entry`
///   mapped executable and `user_rsp` mapped writable.
/// - `saved_rsp_ptr` must stay valid until the context is restored.
/// - Interrupts must be disabled around the call.
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user_save(entry: u64, user_rsp: u64, saved_rsp_ptr: *mut u64) {
    core::arch::naked_asm!(
        // Callee-saved registers, popped again by restore_kernel_context.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Publish the kernel RSP (rdx = third argument).
        "mov [rdx], rsp",

        // iretq frame: SS, RSP, RFLAGS, CS, RIP.
        "push {user_ss}",
        "push rsi",
        "push {rflags}",
        "push {user_cs}",
        "push rdi",

        // No kernel state may reach ring 3.
        "xor rax, rax",
        "xor rbx, rbx",
        "xor rcx, rcx",
        "xor rdx, rdx",
        "xor rsi, rsi",
        "xor rdi, rdi",
        "xor rbp, rbp",
        "xor r8, r8",
        "xor r9, r9",
        "xor r10, r10",
        "xor r11, r11",
        "xor r12, r12",
        "xor r13, r13",
        "xor r14, r14",
        "xor r15, r15",

        "iretq",

        user_ss = const selectors::USER_DATA as u64,
        user_cs = const selectors::USER_CODE as u64,
        rflags = const USER_RFLAGS,
    );
}

/// Restores the kernel context saved by [`enter_user_save`].
///
/// Loads the saved RSP, pops the callee-saved registers, and returns —
/// execution continues after the `enter_user_save` call site.
///
/// # Safety
///
/// - `saved_rsp` must be the value written by `enter_user_save`, and the
///   stack it points into must be intact.
/// - Must run in ring 0 with the kernel CR3 active.
#[unsafe(naked)]
pub unsafe extern "C" fn restore_kernel_context(saved_rsp: u64) -> ! {
    core::arch::naked_asm!(
        "mov rsp, rdi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}
