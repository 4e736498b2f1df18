//! The global Higher Half Direct Map offset.
//!
//! The bootloader maps all physical memory at one fixed virtual offset.
//! Storing that offset globally lets any subsystem convert between
//! physical and virtual addresses without threading it through every
//! call chain.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::addr::{PhysAddr, VirtAddr};

/// Sentinel: not yet initialized.
const HHDM_UNINIT: u64 = u64::MAX;

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(HHDM_UNINIT);

/// Records the HHDM offset. Called once, early in boot.
///
/// # Panics
///
/// Panics on a second call.
pub fn init(offset: u64) {
    let prev =
        HHDM_OFFSET.compare_exchange(HHDM_UNINIT, offset, Ordering::Release, Ordering::Relaxed);
    assert!(prev.is_ok(), "HHDM: double initialization");
}

/// The HHDM offset.
///
/// # Panics
///
/// Panics if called before [`init`].
#[inline]
#[must_use]
pub fn offset() -> u64 {
    let value = HHDM_OFFSET.load(Ordering::Acquire);
    assert!(value != HHDM_UNINIT, "HHDM: used before initialization");
    value
}

/// The kernel-virtual alias of a physical address.
#[inline]
#[must_use]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new_truncate(phys.as_u64() + offset())
}

/// The physical address behind an HHDM alias.
#[inline]
#[must_use]
pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - offset())
}
