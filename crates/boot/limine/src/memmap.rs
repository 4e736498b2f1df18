//! Memory map entries and their iterator.
//!
//! The memory map classifies every region of physical memory; the frame
//! allocator is seeded from the `Usable` regions and must avoid the rest.

use core::ptr::NonNull;

/// Classification of a physical memory region.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Usable RAM.
    Usable = 0,
    /// Reserved by firmware or hardware.
    Reserved = 1,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable = 2,
    /// ACPI non-volatile storage. Never usable.
    AcpiNvs = 3,
    /// Defective memory.
    BadMemory = 4,
    /// Bootloader structures, reclaimable once consumed.
    BootloaderReclaimable = 5,
    /// The kernel image and boot modules.
    ExecutableAndModules = 6,
    /// Framebuffer memory.
    Framebuffer = 7,
}

/// One region of the physical memory map.
#[repr(C)]
pub struct MemMapEntry {
    /// Physical base address.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
    /// Region classification.
    pub kind: EntryKind,
}

/// Iterator over the bootloader's memory map entries.
pub struct MemMapIter<'a> {
    entries: &'a [NonNull<MemMapEntry>],
    index: usize,
}

impl MemMapIter<'_> {
    pub(crate) fn new(count: usize, entries: NonNull<NonNull<MemMapEntry>>) -> MemMapIter<'static> {
        // SAFETY: The bootloader hands us a valid array of `count` pointers.
        let entries = unsafe { core::slice::from_raw_parts(entries.as_ptr(), count) };
        MemMapIter { entries, index: 0 }
    }
}

impl Iterator for MemMapIter<'_> {
    type Item = &'static MemMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.entries.get(self.index)?;
        self.index += 1;
        // SAFETY: Every pointer in the array references a bootloader-owned
        // entry that lives for the kernel's lifetime.
        Some(unsafe { ptr.as_ref() })
    }
}
