//! Kernel heap.
//!
//! A fixed-size heap carved out of physically contiguous frames and
//! addressed through the HHDM, so no extra mappings are needed. Backs
//! `alloc` for the VFS overlay, path strings, and process bookkeeping.

use linked_list_allocator::LockedHeap;

use crate::mm::{PAGE_SIZE, hhdm, pmm};

/// Heap size: 1 MiB. The initramfs overlay plus shell state fit with
/// plenty of slack.
const HEAP_FRAMES: usize = 256;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Allocates and publishes the kernel heap.
///
/// # Panics
///
/// Panics if the frame allocator cannot supply a contiguous run —
/// without a heap the kernel cannot continue.
pub fn init() {
    let base = pmm::with_pmm(|pmm| pmm.alloc_contiguous(HEAP_FRAMES))
        .expect("heap: no contiguous physical region");
    let virt = hhdm::phys_to_virt(base);

    // SAFETY: The frames were just allocated, are contiguous, and are
    // reachable through the HHDM for the kernel's lifetime.
    unsafe {
        ALLOCATOR
            .lock()
            .init(virt.as_mut_ptr::<u8>(), HEAP_FRAMES * PAGE_SIZE);
    }

    crate::kinfo!(
        "Heap: {} KiB at {}",
        HEAP_FRAMES * PAGE_SIZE / 1024,
        virt
    );
}
