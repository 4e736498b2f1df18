//! Framebuffer descriptors.
//!
//! Muon requests framebuffer revision 0: one descriptor per display with
//! the active video mode inline. Mode lists (revision 1) are not bound.

use core::ffi::c_void;
use core::ptr::NonNull;

/// A linear framebuffer as described by the bootloader.
#[repr(C)]
pub struct RawFramebuffer {
    /// Virtual address of the framebuffer (HHDM-mapped by the bootloader).
    pub address: NonNull<c_void>,
    /// Width in pixels.
    pub width: u64,
    /// Height in pixels.
    pub height: u64,
    /// Bytes per scanline.
    pub pitch: u64,
    /// Bits per pixel.
    pub bpp: u16,
    /// Memory model (1 = RGB).
    pub memory_model: u8,
    /// Bits in the red channel.
    pub red_mask_size: u8,
    /// Bit position of the red channel.
    pub red_mask_shift: u8,
    /// Bits in the green channel.
    pub green_mask_size: u8,
    /// Bit position of the green channel.
    pub green_mask_shift: u8,
    /// Bits in the blue channel.
    pub blue_mask_size: u8,
    /// Bit position of the blue channel.
    pub blue_mask_shift: u8,
    _unused: [u8; 7],
    /// Size of the EDID blob, or 0.
    pub edid_size: u64,
    /// Pointer to the EDID blob, or null.
    pub edid: *const c_void,
}

/// Iterator over the bootloader's framebuffer list.
pub struct FramebufferIter<'a> {
    framebuffers: &'a [NonNull<RawFramebuffer>],
    index: usize,
}

impl FramebufferIter<'_> {
    pub(crate) fn new(
        count: usize,
        framebuffers: NonNull<NonNull<RawFramebuffer>>,
    ) -> FramebufferIter<'static> {
        // SAFETY: The bootloader hands us a valid array of `count` pointers.
        let framebuffers = unsafe { core::slice::from_raw_parts(framebuffers.as_ptr(), count) };
        FramebufferIter {
            framebuffers,
            index: 0,
        }
    }
}

impl Iterator for FramebufferIter<'_> {
    type Item = &'static RawFramebuffer;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.framebuffers.get(self.index)?;
        self.index += 1;
        // SAFETY: Every pointer in the array references a bootloader-owned
        // framebuffer descriptor that lives for the kernel's lifetime.
        Some(unsafe { ptr.as_ref() })
    }
}
