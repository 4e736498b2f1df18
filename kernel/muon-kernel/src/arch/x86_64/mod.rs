//! x86_64 CPU bring-up and primitives.

pub mod gdt;
pub mod idt;
pub mod instructions;
pub mod interrupts;
pub mod registers;
pub mod syscall;
pub mod userspace;

use instructions::Port;

/// Initializes CPU tables and masks legacy interrupt sources.
///
/// After this call the GDT, TSS, and IDT are live and both 8259 PICs are
/// fully masked — the kernel polls its devices, so no hardware IRQ may
/// ever reach a vector we have not installed.
pub fn cpu_init() {
    // SAFETY: Called once during early boot, before interrupts are enabled.
    unsafe {
        gdt::init();
        idt::init();
        mask_legacy_pics();
    }
}

/// Masks every line of the primary and secondary 8259 PIC.
///
/// # Safety
///
/// Must run before `sti`; assumes PC-compatible PICs at 0x20/0xA0.
unsafe fn mask_legacy_pics() {
    const PIC1_DATA: u16 = 0x21;
    const PIC2_DATA: u16 = 0xA1;
    // SAFETY: Writing 0xFF to the PIC data ports masks all IRQ lines.
    unsafe {
        Port::<u8>::new(PIC1_DATA).write(0xFF);
        Port::<u8>::new(PIC2_DATA).write(0xFF);
    }
}
