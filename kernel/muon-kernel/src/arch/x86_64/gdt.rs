//! GDT, TSS, and the ring-0 stack.
//!
//! Six descriptors: null, kernel code (0x08), kernel data (0x10), user
//! data (0x18), user code (0x20), and a 16-byte TSS descriptor. User
//! data sits *before* user code because `sysret` derives SS from
//! `STAR[63:48] + 8` and CS from `STAR[63:48] + 16`.
//!
//! The TSS's RSP0 points at a statically reserved kernel stack; the CPU
//! loads it on every ring-3 → ring-0 transition through the IDT. The
//! same stack top is used by the SYSCALL entry stub.

use core::mem::size_of;

use crate::sync::LazyLock;

/// Selector values fixed by the table layout below.
pub mod selectors {
    /// Kernel code selector.
    pub const KERNEL_CODE: u16 = 0x08;
    /// Kernel data selector.
    pub const KERNEL_DATA: u16 = 0x10;
    /// User data selector with RPL 3.
    pub const USER_DATA: u16 = 0x18 | 3;
    /// User code selector with RPL 3.
    pub const USER_CODE: u16 = 0x20 | 3;
    /// TSS selector.
    pub const TSS: u16 = 0x28;
}

/// Ring-0 stack size: 64 KiB.
const KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Dedicated double-fault stack size: 16 KiB.
const DOUBLE_FAULT_STACK_SIZE: usize = 16 * 1024;

/// IST slot used by the double-fault gate (1-indexed).
pub const DOUBLE_FAULT_IST_INDEX: u8 = 1;

#[repr(align(16))]
struct AlignedStack<const N: usize>([u8; N]);

static KERNEL_STACK: AlignedStack<KERNEL_STACK_SIZE> = AlignedStack([0; KERNEL_STACK_SIZE]);
static DOUBLE_FAULT_STACK: AlignedStack<DOUBLE_FAULT_STACK_SIZE> =
    AlignedStack([0; DOUBLE_FAULT_STACK_SIZE]);

/// Top of the statically reserved ring-0 stack.
#[must_use]
pub fn kernel_stack_top() -> u64 {
    KERNEL_STACK.0.as_ptr() as u64 + KERNEL_STACK_SIZE as u64
}

/// Task State Segment. In long mode only the stack tables matter.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    _reserved_0: u32,
    /// RSP0..RSP2: stacks loaded on privilege transitions.
    pub privilege_stack_table: [u64; 3],
    _reserved_1: u64,
    /// IST1..IST7: stacks selectable per IDT gate.
    pub interrupt_stack_table: [u64; 7],
    _reserved_2: u64,
    _reserved_3: u16,
    /// Offset to the I/O permission bitmap (unused; points past the TSS).
    pub iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            _reserved_0: 0,
            privilege_stack_table: [0; 3],
            _reserved_1: 0,
            interrupt_stack_table: [0; 7],
            _reserved_2: 0,
            _reserved_3: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

/// The TSS: RSP0 is the static ring-0 stack, IST1 the double-fault
/// stack. With a single kernel stack for the lifetime of the system,
/// nothing ever rewrites it after construction.
static TSS: LazyLock<TaskStateSegment> = LazyLock::new(|| {
    let mut tss = TaskStateSegment::new();
    tss.privilege_stack_table[0] = kernel_stack_top();
    tss.interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize] =
        DOUBLE_FAULT_STACK.0.as_ptr() as u64 + DOUBLE_FAULT_STACK_SIZE as u64;
    tss
});

/// Segment descriptor values for a flat 64-bit layout.
///
/// The four code/data descriptors are constants; only the TSS
/// descriptor depends on a runtime address.
mod descriptor {
    /// 64-bit kernel code: P=1, DPL=0, L=1, type execute/read.
    pub const KERNEL_CODE: u64 = 0x00AF_9A00_0000_FFFF;
    /// Kernel data: P=1, DPL=0, type read/write.
    pub const KERNEL_DATA: u64 = 0x00CF_9200_0000_FFFF;
    /// User data: P=1, DPL=3, type read/write.
    pub const USER_DATA: u64 = 0x00CF_F200_0000_FFFF;
    /// 64-bit user code: P=1, DPL=3, L=1, type execute/read.
    pub const USER_CODE: u64 = 0x00AF_FA00_0000_FFFF;
}

/// The GDT: null + 4 segments + 2 slots for the 16-byte TSS descriptor.
#[repr(C, align(16))]
struct Gdt {
    table: [u64; 7],
}

impl Gdt {
    /// Builds the table, embedding the TSS base address.
    fn new(tss: *const TaskStateSegment) -> Self {
        let base = tss as u64;
        let limit = (size_of::<TaskStateSegment>() - 1) as u64;

        // 64-bit available TSS (type 0x9), present, DPL 0.
        let tss_low = (limit & 0xFFFF)
            | ((base & 0xFF_FFFF) << 16)
            | (0x9u64 << 40)
            | (1u64 << 47)
            | ((limit & 0xF_0000) << 32)
            | ((base & 0xFF00_0000) << 32);
        let tss_high = base >> 32;

        Self {
            table: [
                0,
                descriptor::KERNEL_CODE,
                descriptor::KERNEL_DATA,
                descriptor::USER_DATA,
                descriptor::USER_CODE,
                tss_low,
                tss_high,
            ],
        }
    }
}

/// Pointer operand for `lgdt`.
#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u64,
}

static GDT: LazyLock<Gdt> = LazyLock::new(|| Gdt::new(&*TSS));

/// Loads the GDT, reloads the segment registers, and loads the TSS.
///
/// # Safety
///
/// Must be called exactly once, during early boot, with interrupts
/// disabled.
pub unsafe fn init() {
    // Limit counts descriptor bytes only, not the struct's tail padding.
    let pointer = GdtPointer {
        limit: (GDT.table.len() * size_of::<u64>() - 1) as u16,
        base: GDT.table.as_ptr() as u64,
    };

    // SAFETY: The table is static and its descriptors match the selector
    // constants. The far return reloads CS; `ltr` loads the TSS selector.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",

            // Reload CS via far return.
            "lea {tmp}, [rip + 2f]",
            "push {kcode}",
            "push {tmp}",
            "retfq",
            "2:",

            // Reload the data segment registers.
            "mov ds, {kdata:x}",
            "mov es, {kdata:x}",
            "mov ss, {kdata:x}",
            "xor eax, eax",
            "mov fs, ax",
            "mov gs, ax",

            // Load the task register.
            "mov ax, {tss:x}",
            "ltr ax",

            ptr = in(reg) &pointer,
            kcode = const selectors::KERNEL_CODE as u64,
            kdata = in(reg) u64::from(selectors::KERNEL_DATA),
            tss = in(reg) u64::from(selectors::TSS),
            tmp = out(reg) _,
            out("rax") _,
        );
    }

    crate::kdebug!("GDT: loaded ({} descriptors, TSS RSP0 set)", 6);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tss_is_104_bytes() {
        assert_eq!(size_of::<TaskStateSegment>(), 104);
    }

    #[test]
    fn selectors_match_table_order() {
        assert_eq!(selectors::KERNEL_CODE, 1 << 3);
        assert_eq!(selectors::KERNEL_DATA, 2 << 3);
        assert_eq!(selectors::USER_DATA, (3 << 3) | 3);
        assert_eq!(selectors::USER_CODE, (4 << 3) | 3);
        assert_eq!(selectors::TSS, 5 << 3);
    }

    #[test]
    fn code_descriptors_have_expected_bits() {
        // Present bit.
        assert_ne!(descriptor::KERNEL_CODE & (1 << 47), 0);
        assert_ne!(descriptor::USER_CODE & (1 << 47), 0);
        // Long-mode bit on code segments.
        assert_ne!(descriptor::KERNEL_CODE & (1 << 53), 0);
        assert_ne!(descriptor::USER_CODE & (1 << 53), 0);
        // DPL 0 vs DPL 3.
        assert_eq!((descriptor::KERNEL_CODE >> 45) & 0b11, 0);
        assert_eq!((descriptor::USER_CODE >> 45) & 0b11, 3);
        assert_eq!((descriptor::USER_DATA >> 45) & 0b11, 3);
    }
}
