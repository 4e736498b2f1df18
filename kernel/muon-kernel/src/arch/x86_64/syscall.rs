//! SYSCALL/SYSRET setup and the ring-0 entry stub.
//!
//! `syscall` loads CS/SS from `STAR[47:32]` and stashes the return RIP
//! in RCX and RFLAGS in R11; `sysret` reverses the trip using
//! `STAR[63:48] + 16` for CS and `+ 8` for SS. With the GDT laid out as
//! kernel code 0x08, kernel data 0x10, user data 0x18, user code 0x20,
//! the one value that satisfies both directions is
//! `STAR = (0x10 << 48) | (0x08 << 32)`.

use super::gdt;
use super::registers::{EFER_SCE, IA32_EFER, MSR_LSTAR, MSR_SFMASK, MSR_STAR};

/// RFLAGS bits cleared on entry: TF (0x100) + IF (0x200) + DF (0x400).
const SFMASK_VALUE: u64 = 0x700;

/// Caller stack pointer, parked here by the entry stub.
///
/// Single CPU, interrupts masked on entry, no nested syscalls — one
/// slot is enough.
#[unsafe(no_mangle)]
static mut SYSCALL_USER_RSP: u64 = 0;

/// Ring-0 stack the stub switches to. Set once at init.
#[unsafe(no_mangle)]
static mut SYSCALL_KERNEL_RSP: u64 = 0;

/// Programs EFER, STAR, LSTAR, and SFMASK.
///
/// # Safety
///
/// The GDT must be live with the selector layout documented above.
/// Must be called exactly once.
pub unsafe fn init() {
    // SAFETY: Writing these MSRs with a live GDT enables the fast-call
    // path; the stub below upholds the entry contract.
    unsafe {
        SYSCALL_KERNEL_RSP = gdt::kernel_stack_top();

        let efer = IA32_EFER.read();
        IA32_EFER.write(efer | EFER_SCE);

        let star = (u64::from(gdt::selectors::KERNEL_DATA) << 48)
            | (u64::from(gdt::selectors::KERNEL_CODE) << 32);
        MSR_STAR.write(star);
        MSR_LSTAR.write(syscall_entry as usize as u64);
        MSR_SFMASK.write(SFMASK_VALUE);
    }

    crate::kdebug!("syscall: fast-call path enabled");
}

unsafe extern "C" {
    /// The C-level dispatcher in `crate::syscall`.
    fn syscall_dispatch(nr: usize, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize)
    -> isize;
}

/// The LSTAR target.
///
/// On entry: RAX = number, RDI/RSI/RDX/R10/R8 = arguments, RCX = return
/// RIP, R11 = return RFLAGS, RSP = the *user* stack. The stub parks the
/// user RSP, switches to the ring-0 stack, preserves what `sysret`
/// needs plus the callee-saved registers, and remaps the arguments to
/// the SysV order for [`syscall_dispatch`].
///
/// The exit syscall never returns through the tail of this stub: its
/// handler restores the kernel context directly and the shell resumes.
#[unsafe(naked)]
unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        // Swap stacks through the parking slots.
        "mov [rip + SYSCALL_USER_RSP], rsp",
        "mov rsp, [rip + SYSCALL_KERNEL_RSP]",

        // Return state + callee-saved registers.
        "push rcx",
        "push r11",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Remap to SysV: nr, a0..a4. RDX must be saved before it is
        // overwritten, hence the ordering.
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "mov r9, r8",
        "mov r8, r10",

        "call {dispatch}",

        // Result is in RAX; restore and drop back to ring 3.
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r11",
        "pop rcx",

        "mov rsp, [rip + SYSCALL_USER_RSP]",
        "sysretq",

        dispatch = sym syscall_dispatch,
    );
}
