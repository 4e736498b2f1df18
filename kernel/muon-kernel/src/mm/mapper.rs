//! Page-table walks through the HHDM.
//!
//! [`PageTableMapper`] builds, mutates, and queries 4-level page tables
//! given the physical address of a root table. Tables are never touched
//! through their own mappings; every access goes through the HHDM alias
//! `hhdm_offset + phys`, so the walker works on any address space, not
//! just the active one.

use crate::addr::{PhysAddr, VirtAddr};
use crate::mm::PAGE_SIZE;
use crate::mm::paging::{PageTable, PageTableEntry, PageTableFlags};

/// Byte offset mask within a 2 MiB page.
const HUGE_2M_MASK: u64 = 0x1F_FFFF;

/// Byte offset mask within a 1 GiB page.
const HUGE_1G_MASK: u64 = 0x3FFF_FFFF;

/// Errors from map operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The frame allocator ran dry while building intermediate tables.
    FrameExhausted,
}

/// Errors from unmap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapError {
    /// Nothing is mapped at the address.
    NotMapped,
    /// The walk ended at a huge-page entry.
    HugePage,
}

/// Invalidate the TLB entry for one page on the running CPU.
///
/// A no-op on the host, where there is no TLB to maintain.
#[inline]
pub fn flush_tlb(virt: VirtAddr) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    // SAFETY: `invlpg` has no side effect beyond dropping a TLB entry.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) virt.as_u64(), options(nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    let _ = virt;
}

/// Walks and edits page tables reachable through the HHDM.
#[derive(Debug, Clone, Copy)]
pub struct PageTableMapper {
    hhdm_offset: u64,
}

impl PageTableMapper {
    /// Creates a mapper for the given HHDM offset.
    #[must_use]
    pub const fn new(hhdm_offset: u64) -> Self {
        Self { hhdm_offset }
    }

    /// HHDM alias of a physical address.
    fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        (self.hhdm_offset + phys.as_u64()) as *mut u8
    }

    /// The [`PageTable`] whose frame starts at `phys`.
    ///
    /// # Safety
    ///
    /// `phys` must be the page-aligned base of a live page-table frame
    /// reachable through the HHDM.
    unsafe fn table_at(&self, phys: PhysAddr) -> &mut PageTable {
        // SAFETY: Caller guarantees the frame holds a page table.
        unsafe { &mut *self.phys_to_virt(phys).cast::<PageTable>() }
    }

    /// Makes sure `table[index]` points at a next-level table, allocating
    /// and zeroing a fresh frame when the slot is empty. Intermediate
    /// entries get `PRESENT | WRITABLE`, plus `USER` when the leaf the
    /// walk is heading for is user-accessible.
    ///
    /// # Safety
    ///
    /// `table_phys` must be a live page-table frame.
    unsafe fn ensure_table(
        &self,
        table_phys: PhysAddr,
        index: usize,
        intermediate: PageTableFlags,
        alloc: &mut dyn FnMut() -> Option<PhysAddr>,
    ) -> Result<PhysAddr, MapError> {
        // SAFETY: Caller guarantees table_phys.
        let table = unsafe { self.table_at(table_phys) };
        let entry = table.entries[index];
        if entry.is_present() {
            // Widen the flags if this subtree is newly shared with ring 3.
            let combined = entry.flags() | intermediate;
            if combined != entry.flags() {
                table.entries[index] = PageTableEntry::new(entry.address(), combined);
            }
            return Ok(entry.address());
        }

        let frame = alloc().ok_or(MapError::FrameExhausted)?;
        // SAFETY: The frame was just allocated; zeroing it prevents stale
        // bytes from reading as present entries.
        unsafe { core::ptr::write_bytes(self.phys_to_virt(frame), 0, PAGE_SIZE) };
        table.entries[index] = PageTableEntry::new(frame, intermediate);
        Ok(frame)
    }

    /// Maps one 4 KiB page, building intermediate tables as needed.
    ///
    /// The leaf receives exactly `flags` (plus the frame base).
    /// Re-mapping a present page is allowed but logged, since it usually
    /// means the caller lost track of a frame.
    ///
    /// # Errors
    ///
    /// [`MapError::FrameExhausted`] when a table frame cannot be
    /// allocated; nothing else fails.
    ///
    /// # Safety
    ///
    /// - `root` must be the physical base of a live PML4.
    /// - The caller must flush the TLB if `virt` may be cached.
    pub unsafe fn map_4k(
        &self,
        root: PhysAddr,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut dyn FnMut() -> Option<PhysAddr>,
    ) -> Result<(), MapError> {
        let intermediate = Self::intermediate_flags(flags);
        // SAFETY: Caller guarantees root; ensure_table keeps the chain valid.
        let pdpt = unsafe { self.ensure_table(root, virt.pml4_index(), intermediate, alloc)? };
        let pd = unsafe { self.ensure_table(pdpt, virt.pdpt_index(), intermediate, alloc)? };
        let pt = unsafe { self.ensure_table(pd, virt.pd_index(), intermediate, alloc)? };

        // SAFETY: pt was just ensured to be a live page table.
        let table = unsafe { self.table_at(pt) };
        let entry = &mut table.entries[virt.pt_index()];
        if entry.is_present() {
            crate::kwarn!(
                "mapper: remapping already-present page {virt} ({} -> {phys})",
                entry.address()
            );
        }
        *entry = PageTableEntry::new(phys, flags);
        Ok(())
    }

    /// Maps one 2 MiB page. Used by the boot stub to build the HHDM.
    ///
    /// # Errors
    ///
    /// [`MapError::FrameExhausted`] when a table frame cannot be allocated.
    ///
    /// # Safety
    ///
    /// Same contract as [`map_4k`](Self::map_4k); `phys` must be 2 MiB
    /// aligned.
    pub unsafe fn map_2mib(
        &self,
        root: PhysAddr,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut dyn FnMut() -> Option<PhysAddr>,
    ) -> Result<(), MapError> {
        let intermediate = Self::intermediate_flags(flags);
        // SAFETY: Caller guarantees root.
        let pdpt = unsafe { self.ensure_table(root, virt.pml4_index(), intermediate, alloc)? };
        let pd = unsafe { self.ensure_table(pdpt, virt.pdpt_index(), intermediate, alloc)? };

        // SAFETY: pd was just ensured to be a live page table.
        let table = unsafe { self.table_at(pd) };
        table.entries[virt.pd_index()] =
            PageTableEntry::new(phys, flags | PageTableFlags::HUGE_PAGE);
        Ok(())
    }

    /// Unmaps one 4 KiB page, returning the frame it mapped.
    ///
    /// Intermediate tables are left in place even when they become
    /// empty; reclaiming them is the job of
    /// [`AddressSpace::release_user_half`](crate::mm::address_space::AddressSpace::release_user_half).
    /// The TLB entry for `virt` is invalidated.
    ///
    /// # Errors
    ///
    /// [`UnmapError::NotMapped`] when the walk dead-ends;
    /// [`UnmapError::HugePage`] when it hits a 2 MiB or 1 GiB entry.
    ///
    /// # Safety
    ///
    /// `root` must be the physical base of a live PML4.
    pub unsafe fn unmap_4k(&self, root: PhysAddr, virt: VirtAddr) -> Result<PhysAddr, UnmapError> {
        // SAFETY: Caller guarantees root.
        let pml4 = unsafe { self.table_at(root) };
        let pml4e = pml4.entries[virt.pml4_index()];
        if !pml4e.is_present() {
            return Err(UnmapError::NotMapped);
        }

        // SAFETY: A present PML4 entry points at a PDPT.
        let pdpt = unsafe { self.table_at(pml4e.address()) };
        let pdpte = pdpt.entries[virt.pdpt_index()];
        if !pdpte.is_present() {
            return Err(UnmapError::NotMapped);
        }
        if pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Err(UnmapError::HugePage);
        }

        // SAFETY: A present non-huge PDPT entry points at a PD.
        let pd = unsafe { self.table_at(pdpte.address()) };
        let pde = pd.entries[virt.pd_index()];
        if !pde.is_present() {
            return Err(UnmapError::NotMapped);
        }
        if pde.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Err(UnmapError::HugePage);
        }

        // SAFETY: A present non-huge PD entry points at a PT.
        let pt = unsafe { self.table_at(pde.address()) };
        let pte = pt.entries[virt.pt_index()];
        if !pte.is_present() {
            return Err(UnmapError::NotMapped);
        }

        pt.entries[virt.pt_index()] = PageTableEntry::empty();
        flush_tlb(virt);
        Ok(pte.address())
    }

    /// Translates a virtual address, handling 4 KiB, 2 MiB, and 1 GiB
    /// mappings. `None` when any level is absent.
    ///
    /// # Safety
    ///
    /// `root` must be the physical base of a live PML4.
    pub unsafe fn translate(&self, root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
        // SAFETY: Caller guarantees root.
        let pml4 = unsafe { self.table_at(root) };
        let pml4e = pml4.entries[virt.pml4_index()];
        if !pml4e.is_present() {
            return None;
        }

        // SAFETY: A present PML4 entry points at a PDPT.
        let pdpt = unsafe { self.table_at(pml4e.address()) };
        let pdpte = pdpt.entries[virt.pdpt_index()];
        if !pdpte.is_present() {
            return None;
        }
        if pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Some(PhysAddr::new(
                pdpte.address().as_u64() + (virt.as_u64() & HUGE_1G_MASK),
            ));
        }

        // SAFETY: A present non-huge PDPT entry points at a PD.
        let pd = unsafe { self.table_at(pdpte.address()) };
        let pde = pd.entries[virt.pd_index()];
        if !pde.is_present() {
            return None;
        }
        if pde.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Some(PhysAddr::new(
                pde.address().as_u64() + (virt.as_u64() & HUGE_2M_MASK),
            ));
        }

        // SAFETY: A present non-huge PD entry points at a PT.
        let pt = unsafe { self.table_at(pde.address()) };
        let pte = pt.entries[virt.pt_index()];
        if !pte.is_present() {
            return None;
        }

        Some(PhysAddr::new(
            pte.address().as_u64() + virt.page_offset(),
        ))
    }

    /// Verifies that every page of `[virt, virt + len)` is mapped
    /// `PRESENT | USER` (plus `WRITABLE` when `need_write`) in the given
    /// address space. Huge-page entries fail the check; user memory is
    /// only ever mapped with 4 KiB pages.
    ///
    /// # Safety
    ///
    /// `root` must be the physical base of a live PML4.
    pub unsafe fn user_range_mapped(
        &self,
        root: PhysAddr,
        virt: VirtAddr,
        len: usize,
        need_write: bool,
    ) -> bool {
        let mut required = PageTableFlags::PRESENT | PageTableFlags::USER;
        if need_write {
            required |= PageTableFlags::WRITABLE;
        }

        let start = virt.align_down(PAGE_SIZE as u64).as_u64();
        let end = virt.as_u64() + len as u64;
        let mut page = start;
        while page < end {
            // SAFETY: Caller guarantees root.
            match unsafe { self.leaf_flags(root, VirtAddr::new_truncate(page)) } {
                Some(flags) if flags.contains(required) => {}
                _ => return false,
            }
            page += PAGE_SIZE as u64;
        }
        true
    }

    /// Flags of the 4 KiB leaf mapping `virt`, if one exists.
    ///
    /// # Safety
    ///
    /// `root` must be the physical base of a live PML4.
    unsafe fn leaf_flags(&self, root: PhysAddr, virt: VirtAddr) -> Option<PageTableFlags> {
        // SAFETY: Caller guarantees root.
        let pml4 = unsafe { self.table_at(root) };
        let pml4e = pml4.entries[virt.pml4_index()];
        if !pml4e.is_present() {
            return None;
        }
        // SAFETY: Present entries point at next-level tables.
        let pdpt = unsafe { self.table_at(pml4e.address()) };
        let pdpte = pdpt.entries[virt.pdpt_index()];
        if !pdpte.is_present() || pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
            return None;
        }
        // SAFETY: Present non-huge entries point at next-level tables.
        let pd = unsafe { self.table_at(pdpte.address()) };
        let pde = pd.entries[virt.pd_index()];
        if !pde.is_present() || pde.flags().contains(PageTableFlags::HUGE_PAGE) {
            return None;
        }
        // SAFETY: Present non-huge entries point at next-level tables.
        let pt = unsafe { self.table_at(pde.address()) };
        let pte = pt.entries[virt.pt_index()];
        pte.is_present().then(|| pte.flags())
    }

    /// Intermediate-entry flags for a leaf with `leaf_flags`: always
    /// `PRESENT | WRITABLE`, plus `USER` when ring 3 must be able to
    /// complete the walk.
    fn intermediate_flags(leaf_flags: PageTableFlags) -> PageTableFlags {
        let mut flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        if leaf_flags.contains(PageTableFlags::USER) {
            flags |= PageTableFlags::USER;
        }
        flags
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sync::SpinLock;

    /// A single page-aligned frame of backing memory for [`FrameArena`].
    #[repr(align(4096))]
    #[derive(Clone, Copy)]
    struct AlignedFrame([u8; PAGE_SIZE]);

    /// A fake physical memory arena for page-table tests. Frame 0 of the
    /// arena is handed out first and serves as the root table.
    pub(crate) struct FrameArena {
        mem: Box<[AlignedFrame]>,
        next: SpinLock<usize>,
    }

    impl FrameArena {
        pub(crate) fn new(frames: usize) -> Self {
            Self {
                mem: vec![AlignedFrame([0u8; PAGE_SIZE]); frames].into_boxed_slice(),
                next: SpinLock::new(0),
            }
        }

        pub(crate) fn hhdm_offset(&self) -> u64 {
            self.mem.as_ptr() as u64
        }

        pub(crate) fn mapper(&self) -> PageTableMapper {
            PageTableMapper::new(self.hhdm_offset())
        }

        /// Allocates the next zeroed frame; the arena starts zeroed.
        pub(crate) fn alloc(&self) -> Option<PhysAddr> {
            let mut next = self.next.lock();
            if *next >= self.mem.len() {
                return None;
            }
            let phys = PhysAddr::new((*next * PAGE_SIZE) as u64);
            *next += 1;
            Some(phys)
        }

        pub(crate) fn alloc_root(&self) -> PhysAddr {
            self.alloc().expect("arena has room for a root")
        }
    }

    #[test]
    fn map_translate_unmap_round_trip() {
        let arena = FrameArena::new(16);
        let mapper = arena.mapper();
        let root = arena.alloc_root();
        let frame = arena.alloc().unwrap();

        let virt = VirtAddr::new(0x40_0000);
        let flags =
            PageTableFlags::PRESENT | PageTableFlags::USER | PageTableFlags::WRITABLE;
        // SAFETY: root and frame live in the arena.
        unsafe {
            mapper
                .map_4k(root, virt, frame, flags, &mut || arena.alloc())
                .expect("map");
        }

        // Page base plus offset must both translate.
        // SAFETY: root lives in the arena.
        unsafe {
            assert_eq!(mapper.translate(root, virt), Some(frame));
            assert_eq!(
                mapper.translate(root, virt + 0x123),
                Some(PhysAddr::new(frame.as_u64() + 0x123))
            );

            assert_eq!(mapper.unmap_4k(root, virt), Ok(frame));
            assert_eq!(mapper.translate(root, virt), None);
            assert_eq!(mapper.unmap_4k(root, virt), Err(UnmapError::NotMapped));
        }
    }

    #[test]
    fn intermediate_tables_inherit_user_bit() {
        let arena = FrameArena::new(16);
        let mapper = arena.mapper();
        let root = arena.alloc_root();
        let frame = arena.alloc().unwrap();

        let virt = VirtAddr::new(0x40_0000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::USER;
        // SAFETY: root and frame live in the arena.
        unsafe {
            mapper
                .map_4k(root, virt, frame, flags, &mut || arena.alloc())
                .expect("map");

            let pml4 = mapper.table_at(root);
            let pml4e = pml4.entries[virt.pml4_index()];
            assert!(pml4e.flags().contains(PageTableFlags::USER));
            assert!(pml4e.flags().contains(PageTableFlags::WRITABLE));
        }
    }

    #[test]
    fn leaf_gets_exact_flags() {
        let arena = FrameArena::new(16);
        let mapper = arena.mapper();
        let root = arena.alloc_root();
        let frame = arena.alloc().unwrap();

        let virt = VirtAddr::new(0x7000_0000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::USER | PageTableFlags::NO_EXECUTE;
        // SAFETY: root and frame live in the arena.
        unsafe {
            mapper
                .map_4k(root, virt, frame, flags, &mut || arena.alloc())
                .expect("map");
            assert_eq!(mapper.leaf_flags(root, virt), Some(flags));
        }
    }

    #[test]
    fn map_fails_cleanly_on_exhaustion() {
        // Room for the root only: the first intermediate allocation fails.
        let arena = FrameArena::new(1);
        let mapper = arena.mapper();
        let root = arena.alloc_root();

        let virt = VirtAddr::new(0x40_0000);
        // SAFETY: root lives in the arena.
        let result = unsafe {
            mapper.map_4k(
                root,
                virt,
                PhysAddr::new(0x1000),
                PageTableFlags::PRESENT,
                &mut || arena.alloc(),
            )
        };
        assert_eq!(result, Err(MapError::FrameExhausted));
    }

    #[test]
    fn translate_2mib_huge_page() {
        let arena = FrameArena::new(16);
        let mapper = arena.mapper();
        let root = arena.alloc_root();

        let virt = VirtAddr::new(0x4000_0000);
        let phys = PhysAddr::new(0x20_0000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        // SAFETY: root lives in the arena; phys is a fictional target.
        unsafe {
            mapper
                .map_2mib(root, virt, phys, flags, &mut || arena.alloc())
                .expect("map 2 MiB");
            assert_eq!(
                mapper.translate(root, virt + 0x12_3456),
                Some(PhysAddr::new(phys.as_u64() + 0x12_3456))
            );
            // A 4 KiB unmap inside the huge page must refuse.
            assert_eq!(mapper.unmap_4k(root, virt), Err(UnmapError::HugePage));
        }
    }

    #[test]
    fn user_range_check_respects_flags_and_holes() {
        let arena = FrameArena::new(32);
        let mapper = arena.mapper();
        let root = arena.alloc_root();

        let ro = PageTableFlags::PRESENT | PageTableFlags::USER;
        let rw = ro | PageTableFlags::WRITABLE;

        let base = VirtAddr::new(0x10_0000);
        // SAFETY: all frames live in the arena.
        unsafe {
            let f0 = arena.alloc().unwrap();
            let f1 = arena.alloc().unwrap();
            mapper.map_4k(root, base, f0, rw, &mut || arena.alloc()).unwrap();
            mapper
                .map_4k(root, base + 0x1000, f1, ro, &mut || arena.alloc())
                .unwrap();

            // Writable check passes on the RW page, fails across the RO one.
            assert!(mapper.user_range_mapped(root, base, 0x1000, true));
            assert!(!mapper.user_range_mapped(root, base, 0x2000, true));
            assert!(mapper.user_range_mapped(root, base, 0x2000, false));

            // A hole fails even the read check.
            assert!(!mapper.user_range_mapped(root, base, 0x3000, false));
        }
    }
}
