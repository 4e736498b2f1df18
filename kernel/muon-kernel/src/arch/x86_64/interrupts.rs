//! CPU exception handlers and fault recovery.
//!
//! Faults are classified into two worlds. A fault raised by ring-0 code
//! is unrecoverable: the handler dumps what the CPU saved and halts with
//! interrupts masked. A fault raised by ring-3 code kills the offending
//! process: the handler prints a short summary, switches CR3 back to the
//! kernel PML4, and long-jumps out of the dead process so the shell
//! resumes.
//!
//! For #PF the user/supervisor bit of the error code decides which world
//! the fault belongs to; for every other exception the saved CS
//! selector's RPL decides.

use crate::kfatal;
use crate::mm::paging::PageFaultErrorCode;

use super::idt::InterruptStackFrame;
use super::instructions::halt_loop;
use super::registers::Cr2;

/// Dumps the CPU-saved state of a fatal kernel fault and halts.
fn kernel_fault(name: &str, vector: u8, error_code: Option<u64>, frame: &InterruptStackFrame) -> ! {
    kfatal!("--- Kernel Fault: {name} ---");
    kfatal!(" INT: {vector:#x}");
    if let Some(code) = error_code {
        kfatal!(" ERR: {code:#x}");
    }
    kfatal!(
        " RIP: {:#x}  CS: {:#x}  RFLAGS: {:#x}",
        frame.instruction_pointer,
        frame.code_segment,
        frame.cpu_flags
    );
    kfatal!(
        " RSP: {:#x}  SS: {:#x}",
        frame.stack_pointer,
        frame.stack_segment
    );
    kfatal!("System halted.");
    halt_loop();
}

/// Reports a recoverable ring-3 fault and abandons the process.
fn user_fault(name: &str, vector: u8, error_code: Option<u64>, frame: &InterruptStackFrame) -> ! {
    crate::kerr!("--- User Mode Fault ---");
    crate::kerr!(" INT: {vector:#x} ({name})");
    if let Some(code) = error_code {
        crate::kerr!(" ERR: {code:#x}");
    }
    crate::kerr!(
        " RIP: {:#x}  RSP: {:#x}",
        frame.instruction_pointer,
        frame.stack_pointer
    );

    // SAFETY: A user process is running (CS RPL or the PF error code said
    // so), which means the saved kernel context is valid to restore.
    unsafe { crate::proc::terminate_from_fault() }
}

pub(super) extern "x86-interrupt" fn divide_error(frame: InterruptStackFrame) {
    if frame.from_user() {
        user_fault("divide error", 0x0, None, &frame);
    }
    kernel_fault("divide error", 0x0, None, &frame);
}

pub(super) extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
    crate::kwarn!("breakpoint at {:#x}", frame.instruction_pointer);
}

pub(super) extern "x86-interrupt" fn invalid_opcode(frame: InterruptStackFrame) {
    if frame.from_user() {
        user_fault("invalid opcode", 0x6, None, &frame);
    }
    kernel_fault("invalid opcode", 0x6, None, &frame);
}

pub(super) extern "x86-interrupt" fn device_not_available(frame: InterruptStackFrame) {
    if frame.from_user() {
        user_fault("device not available", 0x7, None, &frame);
    }
    kernel_fault("device not available", 0x7, None, &frame);
}

pub(super) extern "x86-interrupt" fn double_fault(
    frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    kernel_fault("double fault", 0x8, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn invalid_tss(frame: InterruptStackFrame, error_code: u64) {
    kernel_fault("invalid TSS", 0xA, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn segment_not_present(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    if frame.from_user() {
        user_fault("segment not present", 0xB, Some(error_code), &frame);
    }
    kernel_fault("segment not present", 0xB, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn stack_segment_fault(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    if frame.from_user() {
        user_fault("stack-segment fault", 0xC, Some(error_code), &frame);
    }
    kernel_fault("stack-segment fault", 0xC, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn general_protection(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    if frame.from_user() {
        user_fault("general protection", 0xD, Some(error_code), &frame);
    }
    kernel_fault("general protection", 0xD, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, error_code: u64) {
    let cr2 = Cr2::read();
    let code = PageFaultErrorCode::from_bits_truncate(error_code);

    let access = if code.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
        "instruction fetch"
    } else if code.contains(PageFaultErrorCode::WRITE) {
        "write"
    } else {
        "read"
    };
    let cause = if code.contains(PageFaultErrorCode::PRESENT) {
        "protection violation"
    } else {
        "page not present"
    };

    // The US bit of the error code — not the saved CS — decides whether
    // this was a user fault.
    if code.contains(PageFaultErrorCode::USER) {
        crate::kerr!("--- User Mode Fault ---");
        crate::kerr!(" INT: 0xe (page fault)");
        crate::kerr!(" CR2: {cr2:#x} ({cause} during {access})");
        crate::kerr!(" ERR: {error_code:#x}");
        crate::kerr!(
            " RIP: {:#x}  RSP: {:#x}",
            frame.instruction_pointer,
            frame.stack_pointer
        );
        // SAFETY: The fault came from ring 3, so a process is current and
        // its saved kernel context is valid.
        unsafe { crate::proc::terminate_from_fault() }
    }

    kfatal!("--- Kernel Fault: page fault ---");
    kfatal!(" INT: 0xe");
    kfatal!(" CR2: {cr2:#x} ({cause} during {access})");
    kfatal!(" ERR: {error_code:#x} [{code:?}]");
    kfatal!(
        " RIP: {:#x}  CS: {:#x}  RFLAGS: {:#x}",
        frame.instruction_pointer,
        frame.code_segment,
        frame.cpu_flags
    );
    kfatal!(
        " RSP: {:#x}  SS: {:#x}",
        frame.stack_pointer,
        frame.stack_segment
    );
    kfatal!("System halted.");
    halt_loop();
}

pub(super) extern "x86-interrupt" fn x87_floating_point(frame: InterruptStackFrame) {
    if frame.from_user() {
        user_fault("x87 floating point", 0x10, None, &frame);
    }
    kernel_fault("x87 floating point", 0x10, None, &frame);
}

pub(super) extern "x86-interrupt" fn alignment_check(frame: InterruptStackFrame, error_code: u64) {
    if frame.from_user() {
        user_fault("alignment check", 0x11, Some(error_code), &frame);
    }
    kernel_fault("alignment check", 0x11, Some(error_code), &frame);
}

pub(super) extern "x86-interrupt" fn simd_floating_point(frame: InterruptStackFrame) {
    if frame.from_user() {
        user_fault("SIMD floating point", 0x13, None, &frame);
    }
    kernel_fault("SIMD floating point", 0x13, None, &frame);
}
