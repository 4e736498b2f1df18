//! x86_64 page-table structures.
//!
//! Four levels (PML4 → PDPT → PD → PT), 512 eight-byte entries each.

use crate::addr::PhysAddr;

/// Physical-address bits of a page-table entry (bits 12..51).
pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

bitflags::bitflags! {
    /// Page-table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: u64 {
        /// Entry is valid.
        const PRESENT       = 1 << 0;
        /// Page is writable.
        const WRITABLE      = 1 << 1;
        /// Page is accessible from ring 3.
        const USER          = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const CACHE_DISABLE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED      = 1 << 5;
        /// Set by the CPU on write.
        const DIRTY         = 1 << 6;
        /// PS bit: 2 MiB page in a PD, 1 GiB page in a PDPT.
        const HUGE_PAGE     = 1 << 7;
        /// Survives CR3 reloads while CR4.PGE is set.
        const GLOBAL        = 1 << 8;
        /// Not executable (requires EFER.NXE).
        const NO_EXECUTE    = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Error code pushed by the CPU on a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u64 {
        /// 1 = protection violation, 0 = non-present page.
        const PRESENT           = 1 << 0;
        /// The faulting access was a write.
        const WRITE             = 1 << 1;
        /// The fault happened in ring 3.
        const USER              = 1 << 2;
        /// A reserved bit was set in a paging structure.
        const RESERVED_WRITE    = 1 << 3;
        /// The fault was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// One 64-bit page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// A zeroed (non-present) entry.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// An entry mapping `phys` with `flags`.
    #[must_use]
    pub const fn new(phys: PhysAddr, flags: PageTableFlags) -> Self {
        Self((phys.as_u64() & ADDR_MASK) | flags.bits())
    }

    /// Whether the PRESENT bit is set.
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & 1 != 0
    }

    /// The physical address in bits 12..51.
    #[must_use]
    pub const fn address(self) -> PhysAddr {
        // SAFETY: The mask keeps the value inside 52 bits.
        unsafe { PhysAddr::new_unchecked(self.0 & ADDR_MASK) }
    }

    /// The flag bits of the entry.
    #[must_use]
    pub const fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// A page table: 512 entries, 4 KiB, page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    /// The table's entries.
    pub entries: [PageTableEntry; 512],
}

impl PageTable {
    /// Clears every entry.
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_is_absent() {
        let e = PageTableEntry::empty();
        assert!(!e.is_present());
        assert_eq!(e.bits(), 0);
    }

    #[test]
    fn address_and_flags_are_disjoint() {
        let flags =
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
        let e = PageTableEntry::new(PhysAddr::new(0x0000_1234_5000), flags);

        assert_eq!(e.address().as_u64(), 0x0000_1234_5000);
        assert_eq!(e.flags(), flags);
        assert_eq!(e.address().as_u64() & !ADDR_MASK, 0);
        assert_eq!(e.flags().bits() & ADDR_MASK, 0);
    }

    #[test]
    fn present_entry_contains_aligned_base() {
        // An unaligned physical address is truncated to its frame base.
        let e = PageTableEntry::new(PhysAddr::new(0x5234), PageTableFlags::PRESENT);
        assert_eq!(e.address().as_u64(), 0x5000);
    }

    #[test]
    fn fault_code_decoding() {
        let code = PageFaultErrorCode::from_bits_truncate(0b0_0110);
        assert!(code.contains(PageFaultErrorCode::WRITE));
        assert!(code.contains(PageFaultErrorCode::USER));
        assert!(!code.contains(PageFaultErrorCode::PRESENT));
    }

    #[test]
    fn table_is_page_sized() {
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
        assert_eq!(core::mem::align_of::<PageTable>(), 4096);
    }
}
