//! Interrupt Descriptor Table.
//!
//! 256 gates, all initially absent. The exception handlers from
//! [`interrupts`](super::interrupts) are installed as DPL-0 interrupt
//! gates; everything else stays empty — the legacy PICs are fully
//! masked, so no hardware vector can fire.

use core::mem::size_of;

use crate::sync::LazyLock;

use super::gdt::{DOUBLE_FAULT_IST_INDEX, selectors};
use super::interrupts;

/// Handler for exceptions without an error code.
pub type HandlerFunc = extern "x86-interrupt" fn(InterruptStackFrame);

/// Handler for exceptions that push an error code.
pub type HandlerFuncWithErrCode = extern "x86-interrupt" fn(InterruptStackFrame, u64);

/// Diverging handler with an error code (double fault).
pub type DivergingHandlerFuncWithErrCode =
    extern "x86-interrupt" fn(InterruptStackFrame, u64) -> !;

/// The frame the CPU pushes on an interrupt or exception.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    /// Interrupted RIP.
    pub instruction_pointer: u64,
    /// Interrupted CS selector (the RPL bits tell the ring).
    pub code_segment: u64,
    /// Interrupted RFLAGS.
    pub cpu_flags: u64,
    /// Interrupted RSP.
    pub stack_pointer: u64,
    /// Interrupted SS selector.
    pub stack_segment: u64,
}

impl InterruptStackFrame {
    /// Whether the interrupted code ran in ring 3.
    #[must_use]
    pub fn from_user(&self) -> bool {
        self.code_segment & 0b11 == 3
    }
}

/// One 16-byte IDT gate.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct IdtEntry {
    offset_low: u16,
    segment_selector: u16,
    /// IST index (bits 0..2), gate type (bits 8..11), DPL (13..14),
    /// present (15).
    options: u16,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

/// Options value: present 64-bit interrupt gate, DPL 0, no IST.
const GATE_PRESENT: u16 = 0x8E00;

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            segment_selector: 0,
            options: 0x0E00,
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    fn set(&mut self, handler_addr: u64, ist: u8) {
        self.offset_low = handler_addr as u16;
        self.offset_mid = (handler_addr >> 16) as u16;
        self.offset_high = (handler_addr >> 32) as u32;
        self.segment_selector = selectors::KERNEL_CODE;
        self.options = GATE_PRESENT | u16::from(ist & 0b111);
    }
}

/// The table itself.
#[repr(C, align(16))]
struct Idt {
    entries: [IdtEntry; 256],
}

impl Idt {
    fn handler(&mut self, vector: usize, handler: HandlerFunc) {
        self.entries[vector].set(handler as u64, 0);
    }

    fn handler_with_err(&mut self, vector: usize, handler: HandlerFuncWithErrCode) {
        self.entries[vector].set(handler as u64, 0);
    }

    fn diverging_with_err(
        &mut self,
        vector: usize,
        handler: DivergingHandlerFuncWithErrCode,
        ist: u8,
    ) {
        self.entries[vector].set(handler as u64, ist);
    }
}

/// Pointer operand for `lidt`.
#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

static IDT: LazyLock<Idt> = LazyLock::new(|| {
    let mut idt = Idt {
        entries: [IdtEntry::missing(); 256],
    };

    idt.handler(0, interrupts::divide_error);
    idt.handler(3, interrupts::breakpoint);
    idt.handler(6, interrupts::invalid_opcode);
    idt.handler(7, interrupts::device_not_available);
    idt.diverging_with_err(8, interrupts::double_fault, DOUBLE_FAULT_IST_INDEX);
    idt.handler_with_err(10, interrupts::invalid_tss);
    idt.handler_with_err(11, interrupts::segment_not_present);
    idt.handler_with_err(12, interrupts::stack_segment_fault);
    idt.handler_with_err(13, interrupts::general_protection);
    idt.handler_with_err(14, interrupts::page_fault);
    idt.handler(16, interrupts::x87_floating_point);
    idt.handler_with_err(17, interrupts::alignment_check);
    idt.handler(19, interrupts::simd_floating_point);

    idt
});

/// Loads the IDT.
///
/// # Safety
///
/// The GDT must already be live (the gates reference the kernel code
/// selector).
pub unsafe fn init() {
    let pointer = IdtPointer {
        limit: (size_of::<Idt>() - 1) as u16,
        base: IDT.entries.as_ptr() as u64,
    };
    // SAFETY: The table is static and its gates point at valid handlers.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &pointer,
            options(readonly, nostack, preserves_flags));
    }
    crate::kdebug!("IDT: loaded");
}
