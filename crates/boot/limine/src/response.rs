//! Response structures the bootloader fills in.
//!
//! A response is reached through the `response()` accessor of its request;
//! it lives in bootloader-reclaimable memory and stays valid until the
//! kernel recycles those regions (Muon never does).

use core::cell::UnsafeCell;
use core::ffi::c_char;
use core::ptr::NonNull;

use crate::file::{File, FileIter};
use crate::framebuffer::{FramebufferIter, RawFramebuffer};
use crate::memmap::{MemMapEntry, MemMapIter};

/// A possibly-null pointer to a bootloader-written response.
#[repr(transparent)]
pub(crate) struct Response<T> {
    inner: UnsafeCell<Option<NonNull<T>>>,
}

// SAFETY: The bootloader writes the pointer before the kernel starts; the
// kernel only ever reads it.
unsafe impl<T> Sync for Response<T> {}

impl<T> Response<T> {
    /// Creates an empty (unanswered) response slot.
    pub const fn empty() -> Self {
        Self {
            inner: UnsafeCell::new(None),
        }
    }

    /// Returns the response, if the bootloader provided one.
    pub fn get(&self) -> Option<&T> {
        // SAFETY: Single write by the bootloader before entry; read-only after.
        let inner = unsafe { &*self.inner.get() };
        // SAFETY: A non-null pointer stored here references a valid response
        // structure that lives for the kernel's lifetime.
        inner.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }
}

/// Reads a nullable, null-terminated C string, substituting a default.
fn c_str_or<'a>(ptr: *const c_char, default: &'a str) -> &'a str {
    if ptr.is_null() {
        return default;
    }
    // SAFETY: The bootloader provides valid null-terminated strings.
    unsafe { core::ffi::CStr::from_ptr(ptr) }
        .to_str()
        .unwrap_or(default)
}

/// Response carrying the bootloader's name and version.
#[repr(C)]
pub struct BootloaderInfoResponse {
    /// Response structure revision.
    pub revision: u64,
    name: *const c_char,
    version: *const c_char,
}

impl BootloaderInfoResponse {
    /// The bootloader's name, or `"unknown"`.
    #[must_use]
    pub fn name(&self) -> &str {
        c_str_or(self.name, "unknown")
    }

    /// The bootloader's version string, or `"unknown"`.
    #[must_use]
    pub fn version(&self) -> &str {
        c_str_or(self.version, "unknown")
    }
}

/// Response carrying the physical memory map.
#[repr(C)]
pub struct MemMapResponse {
    /// Response structure revision.
    pub revision: u64,
    /// Number of entries in the map.
    pub entry_count: u64,
    entries: NonNull<NonNull<MemMapEntry>>,
}

impl MemMapResponse {
    /// Iterates over the memory map entries in bootloader order.
    #[must_use]
    pub fn entries(&self) -> MemMapIter<'_> {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "entry counts fit in usize on 64-bit targets"
        )]
        MemMapIter::new(self.entry_count as usize, self.entries)
    }
}

/// Response carrying the Higher Half Direct Map offset.
///
/// Every byte of physical memory is reachable at `phys + offset`.
#[repr(C)]
pub struct HhdmResponse {
    /// Response structure revision.
    pub revision: u64,
    /// Virtual base of the direct map.
    pub offset: u64,
}

/// Response carrying the kernel image's load addresses.
#[repr(C)]
pub struct ExecutableAddressResponse {
    /// Response structure revision.
    pub revision: u64,
    /// Physical base the image was loaded at.
    pub phys_base: u64,
    /// Virtual base the image was mapped at.
    pub virt_base: u64,
}

/// Response carrying the framebuffer list.
#[repr(C)]
pub struct FramebufferResponse {
    /// Response structure revision.
    pub revision: u64,
    /// Number of framebuffers.
    pub framebuffer_count: u64,
    framebuffers: NonNull<NonNull<RawFramebuffer>>,
}

impl FramebufferResponse {
    /// Iterates over the available framebuffers.
    #[must_use]
    pub fn framebuffers(&self) -> FramebufferIter<'_> {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "framebuffer counts fit in usize on 64-bit targets"
        )]
        FramebufferIter::new(self.framebuffer_count as usize, self.framebuffers)
    }
}

/// Response carrying the boot module list.
#[repr(C)]
pub struct ModuleResponse {
    /// Response structure revision.
    pub revision: u64,
    /// Number of modules loaded.
    pub module_count: u64,
    modules: NonNull<NonNull<File>>,
}

impl ModuleResponse {
    /// Iterates over the loaded modules.
    #[must_use]
    pub fn modules(&self) -> FileIter<'_> {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "module counts fit in usize on 64-bit targets"
        )]
        FileIter::new(self.module_count as usize, self.modules)
    }
}
