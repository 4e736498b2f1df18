//! Per-process address spaces.
//!
//! Every address space is a PML4 whose upper half (entries 256–511) is
//! copied verbatim from the kernel's PML4 at creation time, so kernel
//! code keeps running after a CR3 switch. The lower half belongs to the
//! process and starts empty.

use crate::addr::{PhysAddr, VirtAddr};
use crate::mm::mapper::{MapError, PageTableMapper, UnmapError};
use crate::mm::paging::{PageTable, PageTableEntry, PageTableFlags};
use crate::mm::VmmError;

/// PML4 entries in each half of the address space.
const HALF_ENTRIES: usize = 256;

/// A user address space: a PML4 frame plus the tables hanging off its
/// lower half.
pub struct AddressSpace {
    root_phys: PhysAddr,
    mapper: PageTableMapper,
    hhdm_offset: u64,
}

impl AddressSpace {
    /// Creates a fresh user address space.
    ///
    /// Allocates one frame for the PML4, zeroes the lower half, and
    /// copies the upper half from `kernel_root`.
    ///
    /// # Errors
    ///
    /// [`VmmError::OutOfMemory`] when no frame is available.
    ///
    /// # Safety
    ///
    /// - `kernel_root` must be the live kernel PML4.
    /// - `hhdm_offset` must map all of physical memory.
    pub unsafe fn new_user(
        kernel_root: PhysAddr,
        hhdm_offset: u64,
        alloc: &mut dyn FnMut() -> Option<PhysAddr>,
    ) -> Result<Self, VmmError> {
        let root_phys = alloc().ok_or(VmmError::OutOfMemory)?;

        // SAFETY: Both frames are HHDM-reachable; the new frame was just
        // allocated and is exclusively ours.
        unsafe {
            let new_pml4 = (hhdm_offset + root_phys.as_u64()) as *mut u64;
            let kernel_pml4 = (hhdm_offset + kernel_root.as_u64()) as *const u64;

            core::ptr::write_bytes(new_pml4, 0, HALF_ENTRIES);
            core::ptr::copy_nonoverlapping(
                kernel_pml4.add(HALF_ENTRIES),
                new_pml4.add(HALF_ENTRIES),
                HALF_ENTRIES,
            );
        }

        Ok(Self {
            root_phys,
            mapper: PageTableMapper::new(hhdm_offset),
            hhdm_offset,
        })
    }

    /// Physical base of this space's PML4, for loading into CR3.
    #[must_use]
    pub fn root_phys(&self) -> PhysAddr {
        self.root_phys
    }

    /// Maps one user page. The `USER` bit is always added.
    ///
    /// # Errors
    ///
    /// [`VmmError::OutOfMemory`] when an intermediate table cannot be
    /// allocated.
    pub fn map_user_page(
        &self,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut dyn FnMut() -> Option<PhysAddr>,
    ) -> Result<(), VmmError> {
        let flags = flags | PageTableFlags::USER;
        // SAFETY: root_phys is this space's live PML4.
        unsafe {
            self.mapper
                .map_4k(self.root_phys, virt, phys, flags, alloc)
                .map_err(|MapError::FrameExhausted| VmmError::OutOfMemory)
        }
    }

    /// Unmaps one user page, flushes its TLB entry, and returns the
    /// frame that was mapped.
    ///
    /// # Errors
    ///
    /// [`VmmError::NotMapped`] / [`VmmError::HugePage`] from the walk.
    pub fn unmap_user_page(&self, virt: VirtAddr) -> Result<PhysAddr, VmmError> {
        // SAFETY: root_phys is this space's live PML4.
        unsafe {
            self.mapper
                .unmap_4k(self.root_phys, virt)
                .map_err(|err| match err {
                    UnmapError::NotMapped => VmmError::NotMapped,
                    UnmapError::HugePage => VmmError::HugePage,
                })
        }
    }

    /// Translates a virtual address within this space.
    #[must_use]
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        // SAFETY: root_phys is this space's live PML4.
        unsafe { self.mapper.translate(self.root_phys, virt) }
    }

    /// Verifies that `[virt, virt + len)` is user-accessible (and
    /// writable, when asked) in this space.
    #[must_use]
    pub fn user_range_mapped(&self, virt: VirtAddr, len: usize, need_write: bool) -> bool {
        // SAFETY: root_phys is this space's live PML4.
        unsafe {
            self.mapper
                .user_range_mapped(self.root_phys, virt, len, need_write)
        }
    }

    /// Tears down the user half: frees every mapped leaf frame and every
    /// intermediate PT/PD/PDPT frame under PML4 entries 0–255, then
    /// clears those entries. Returns the number of frames released.
    ///
    /// The PML4 frame itself stays alive until [`destroy`](Self::destroy).
    ///
    /// # Safety
    ///
    /// This space must not be the active CR3 value, and no mapping in
    /// its lower half may still be referenced.
    pub unsafe fn release_user_half(&self, dealloc: &mut dyn FnMut(PhysAddr)) -> usize {
        let mut freed = 0;

        // SAFETY: root_phys is this space's live PML4.
        let pml4 = unsafe { self.table_at(self.root_phys) };
        for pml4e in pml4.entries.iter_mut().take(HALF_ENTRIES) {
            if !pml4e.is_present() {
                continue;
            }

            // SAFETY: Present lower-half entries reference tables this
            // space allocated and owns.
            let pdpt = unsafe { self.table_at(pml4e.address()) };
            for pdpte in &mut pdpt.entries {
                if !pdpte.is_present() || pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
                    continue;
                }

                // SAFETY: As above, one level down.
                let pd = unsafe { self.table_at(pdpte.address()) };
                for pde in &mut pd.entries {
                    if !pde.is_present() || pde.flags().contains(PageTableFlags::HUGE_PAGE) {
                        continue;
                    }

                    // SAFETY: As above, one level down.
                    let pt = unsafe { self.table_at(pde.address()) };
                    for pte in &mut pt.entries {
                        if pte.is_present() {
                            dealloc(pte.address());
                            freed += 1;
                            *pte = PageTableEntry::empty();
                        }
                    }
                    dealloc(pde.address());
                    freed += 1;
                    *pde = PageTableEntry::empty();
                }
                dealloc(pdpte.address());
                freed += 1;
                *pdpte = PageTableEntry::empty();
            }
            dealloc(pml4e.address());
            freed += 1;
            *pml4e = PageTableEntry::empty();
        }

        freed
    }

    /// Releases the whole space: the user half, then the PML4 frame.
    ///
    /// # Safety
    ///
    /// Same contract as [`release_user_half`](Self::release_user_half).
    pub unsafe fn destroy(self, dealloc: &mut dyn FnMut(PhysAddr)) {
        // SAFETY: Forwarded caller contract.
        unsafe { self.release_user_half(dealloc) };
        dealloc(self.root_phys);
    }

    /// The [`PageTable`] at `phys`, through the HHDM.
    ///
    /// # Safety
    ///
    /// `phys` must be a live page-table frame of this space.
    #[expect(clippy::mut_from_ref, reason = "HHDM aliasing, serialized by ownership")]
    unsafe fn table_at(&self, phys: PhysAddr) -> &mut PageTable {
        // SAFETY: Caller guarantees the frame holds a page table.
        unsafe { &mut *((self.hhdm_offset + phys.as_u64()) as *mut PageTable) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::mapper::tests::FrameArena;

    /// Builds a fake kernel PML4 with recognisable upper-half entries.
    fn kernel_root(arena: &FrameArena) -> PhysAddr {
        let root = arena.alloc_root();
        // SAFETY: The frame lives in the arena.
        let table =
            unsafe { &mut *((arena.hhdm_offset() + root.as_u64()) as *mut PageTable) };
        for (i, entry) in table.entries.iter_mut().enumerate().skip(256) {
            *entry = PageTableEntry::new(
                PhysAddr::new((i as u64) << 12),
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
            );
        }
        root
    }

    fn upper_half(arena: &FrameArena, root: PhysAddr) -> Vec<u64> {
        // SAFETY: The frame lives in the arena.
        let table = unsafe { &*((arena.hhdm_offset() + root.as_u64()) as *const PageTable) };
        table.entries[256..].iter().map(|e| e.bits()).collect()
    }

    fn lower_half(arena: &FrameArena, root: PhysAddr) -> Vec<u64> {
        // SAFETY: The frame lives in the arena.
        let table = unsafe { &*((arena.hhdm_offset() + root.as_u64()) as *const PageTable) };
        table.entries[..256].iter().map(|e| e.bits()).collect()
    }

    #[test]
    fn upper_half_copied_lower_half_zero() {
        let arena = FrameArena::new(8);
        let kroot = kernel_root(&arena);

        // SAFETY: All frames live in the arena.
        let space = unsafe {
            AddressSpace::new_user(kroot, arena.hhdm_offset(), &mut || arena.alloc())
        }
        .expect("address space");

        assert_eq!(
            upper_half(&arena, space.root_phys()),
            upper_half(&arena, kroot)
        );
        assert!(lower_half(&arena, space.root_phys()).iter().all(|&e| e == 0));
    }

    #[test]
    fn map_translate_unmap_duality() {
        let arena = FrameArena::new(16);
        let kroot = kernel_root(&arena);
        // SAFETY: All frames live in the arena.
        let space = unsafe {
            AddressSpace::new_user(kroot, arena.hhdm_offset(), &mut || arena.alloc())
        }
        .expect("address space");

        let frame = arena.alloc().unwrap();
        let virt = VirtAddr::new(0x40_0000);
        space
            .map_user_page(
                virt,
                frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
                &mut || arena.alloc(),
            )
            .expect("map");

        assert_eq!(space.translate(virt), Some(frame));
        assert_eq!(
            space.translate(VirtAddr::new(0x40_0FFF)),
            Some(PhysAddr::new(frame.as_u64() + 0xFFF))
        );

        assert_eq!(space.unmap_user_page(virt), Ok(frame));
        assert_eq!(space.translate(virt), None);
    }

    #[test]
    fn release_user_half_frees_leaves_and_tables() {
        let arena = FrameArena::new(32);
        let kroot = kernel_root(&arena);
        // SAFETY: All frames live in the arena.
        let space = unsafe {
            AddressSpace::new_user(kroot, arena.hhdm_offset(), &mut || arena.alloc())
        }
        .expect("address space");

        // Two pages in the same PT: 1 leaf-pair + PT + PD + PDPT = 5 frames.
        let f0 = arena.alloc().unwrap();
        let f1 = arena.alloc().unwrap();
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        space
            .map_user_page(VirtAddr::new(0x40_0000), f0, flags, &mut || arena.alloc())
            .unwrap();
        space
            .map_user_page(VirtAddr::new(0x40_1000), f1, flags, &mut || arena.alloc())
            .unwrap();

        let mut released = Vec::new();
        // SAFETY: The space is not an active CR3 in tests.
        let freed = unsafe { space.release_user_half(&mut |frame| released.push(frame)) };

        assert_eq!(freed, 5);
        assert!(released.contains(&f0));
        assert!(released.contains(&f1));
        assert!(lower_half(&arena, space.root_phys()).iter().all(|&e| e == 0));
        // The kernel half survives teardown untouched.
        assert_eq!(
            upper_half(&arena, space.root_phys()),
            upper_half(&arena, kroot)
        );
    }

    #[test]
    fn destroy_returns_the_pml4_frame() {
        let arena = FrameArena::new(8);
        let kroot = kernel_root(&arena);
        // SAFETY: All frames live in the arena.
        let space = unsafe {
            AddressSpace::new_user(kroot, arena.hhdm_offset(), &mut || arena.alloc())
        }
        .expect("address space");
        let root = space.root_phys();

        let mut released = Vec::new();
        // SAFETY: The space is not an active CR3 in tests.
        unsafe { space.destroy(&mut |frame| released.push(frame)) };
        assert_eq!(released, vec![root]);
    }
}
