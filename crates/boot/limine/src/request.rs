//! Request structures the kernel hands to the bootloader.
//!
//! Each request is a `#[repr(C)]` structure starting with a 256-bit ID.
//! Requests must be stored in statics placed in the `.requests` section
//! and marked `#[used]`, otherwise the linker may discard them before the
//! bootloader ever sees them. After boot, `response()` returns the
//! bootloader-written response, or `None` if the request went unanswered.

use core::cell::UnsafeCell;

use crate::response::{self as res, Response};

/// Builds a full request ID from the two request-specific words.
///
/// The first two words are the protocol-wide magic shared by every
/// Limine request.
macro_rules! limine_id {
    ($part1:expr, $part2:expr) => {
        [
            0xc7b1_dd30_df4c_8b88u64,
            0x0a82_e883_a194_f07bu64,
            $part1,
            $part2,
        ]
    };
}

/// Marker that delimits the start of the `.requests` section.
///
/// Optional in the protocol, but when present the bootloader limits its
/// request scan to the marked range. Must be paired with
/// [`RequestsEndMarker`].
#[repr(C, align(8))]
pub struct RequestsStartMarker([u64; 4]);

impl RequestsStartMarker {
    /// The Limine ID of the start marker.
    pub const ID: [u64; 4] = [
        0xf6b8_f4b3_9de7_d1ae,
        0xfab9_1a69_40fc_b9cf,
        0x785c_6ed0_15d3_e316,
        0x181e_920a_7852_b9d9,
    ];

    /// Creates a new start marker.
    #[must_use]
    pub const fn new() -> Self {
        Self(Self::ID)
    }
}

impl Default for RequestsStartMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker that delimits the end of the `.requests` section.
#[repr(C, align(8))]
pub struct RequestsEndMarker([u64; 2]);

impl RequestsEndMarker {
    /// The Limine ID of the end marker.
    pub const ID: [u64; 2] = [0xadc0_e053_1bb1_0d03, 0x9572_709f_3176_4c62];

    /// Creates a new end marker.
    #[must_use]
    pub const fn new() -> Self {
        Self(Self::ID)
    }
}

impl Default for RequestsEndMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares the protocol base revision the kernel was written against.
///
/// The bootloader overwrites the last word with 0 when it supports the
/// requested revision.
#[repr(C, align(8))]
pub struct BaseRevision(UnsafeCell<[u64; 3]>);

// SAFETY: Written once by the bootloader before the kernel gains control,
// read-only afterwards.
unsafe impl Sync for BaseRevision {}

impl BaseRevision {
    /// The Limine ID of the base revision tag.
    pub const ID: [u64; 2] = [0xf956_2b2d_5c95_a6c8, 0x6a7b_3849_4453_6bdc];

    /// Requested base revision.
    const REVISION: u64 = 3;

    /// Creates a new base revision tag.
    #[must_use]
    pub const fn new() -> Self {
        Self(UnsafeCell::new([Self::ID[0], Self::ID[1], Self::REVISION]))
    }

    /// Returns `true` if the bootloader acknowledged the requested revision.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        // SAFETY: Written by the bootloader before entry, never afterwards.
        unsafe { (*self.0.get())[2] == 0 }
    }
}

impl Default for BaseRevision {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a request struct with an ID, a revision, and a response slot.
///
/// Covers the common case of a request with no extra payload fields.
macro_rules! declare_request {
    ($(#[$doc:meta])* $name:ident, $resp:ty, $id1:expr, $id2:expr) => {
        $(#[$doc])*
        #[repr(C, align(8))]
        pub struct $name {
            id: [u64; 4],
            revision: u64,
            response: Response<$resp>,
        }

        impl $name {
            /// The Limine ID of this request.
            pub const ID: [u64; 4] = limine_id!($id1, $id2);

            /// Creates a new request (revision 0).
            #[must_use]
            pub const fn new() -> Self {
                Self {
                    id: Self::ID,
                    revision: 0,
                    response: Response::empty(),
                }
            }

            /// Returns the bootloader-filled response, if any.
            #[must_use]
            pub fn response(&self) -> Option<&$resp> {
                self.response.get()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

declare_request!(
    /// Asks for the bootloader's name and version strings.
    BootloaderInfoRequest,
    res::BootloaderInfoResponse,
    0xf550_38d8_e2a1_202f,
    0x2794_26fc_f5f5_9740
);

declare_request!(
    /// Asks for the physical memory map.
    MemMapRequest,
    res::MemMapResponse,
    0x67cf_3d9d_378a_806f,
    0xe304_acdf_c50c_3c62
);

declare_request!(
    /// Asks for the Higher Half Direct Map offset.
    HhdmRequest,
    res::HhdmResponse,
    0x48dc_f1cb_8ad2_b852,
    0x6398_4e95_9a98_244b
);

declare_request!(
    /// Asks for the physical and virtual base of the loaded kernel image.
    ExecutableAddressRequest,
    res::ExecutableAddressResponse,
    0x71ba_7686_3cc5_5f63,
    0xb264_4a48_c516_a487
);

declare_request!(
    /// Asks for the list of framebuffers.
    FramebufferRequest,
    res::FramebufferResponse,
    0x9d58_27dc_d881_dd75,
    0xa314_8604_f6fa_b11b
);

/// Asks for the list of boot modules loaded alongside the kernel.
///
/// Muon does not use internal modules; the corresponding fields are
/// always zeroed.
#[repr(C, align(8))]
pub struct ModuleRequest {
    id: [u64; 4],
    revision: u64,
    response: Response<res::ModuleResponse>,
    /// Number of internal modules requested. Always 0.
    pub internal_module_count: u64,
    /// Internal module list. Always null.
    pub internal_modules: *const core::ffi::c_void,
}

// SAFETY: The internal-module pointer is always null and the response slot
// is written only by the bootloader before the kernel gains control.
unsafe impl Sync for ModuleRequest {}

impl ModuleRequest {
    /// The Limine ID of the module request.
    pub const ID: [u64; 4] = limine_id!(0x3e7e_2797_02be_32af, 0xca1c_4f3b_d128_0cee);

    /// Creates a new module request (revision 0, no internal modules).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: Self::ID,
            revision: 0,
            response: Response::empty(),
            internal_module_count: 0,
            internal_modules: core::ptr::null(),
        }
    }

    /// Returns the bootloader-filled response, if any.
    #[must_use]
    pub fn response(&self) -> Option<&res::ModuleResponse> {
        self.response.get()
    }
}

impl Default for ModuleRequest {
    fn default() -> Self {
        Self::new()
    }
}
