//! The kernel's Limine request block.

use limine::{
    BaseRevision, BootloaderInfoRequest, ExecutableAddressRequest, FramebufferRequest,
    HhdmRequest, MemMapRequest, ModuleRequest, RequestsEndMarker, RequestsStartMarker,
};

/// Every request the stub makes, bracketed by the section markers.
#[repr(C, align(8))]
pub struct LimineRequests {
    _start_marker: RequestsStartMarker,
    pub base_revision: BaseRevision,
    pub bootloader_info: BootloaderInfoRequest,
    pub memmap: MemMapRequest,
    pub hhdm: HhdmRequest,
    pub executable_address: ExecutableAddressRequest,
    pub framebuffer: FramebufferRequest,
    pub modules: ModuleRequest,
    _end_marker: RequestsEndMarker,
}

impl LimineRequests {
    const fn new() -> Self {
        Self {
            _start_marker: RequestsStartMarker::new(),
            base_revision: BaseRevision::new(),
            bootloader_info: BootloaderInfoRequest::new(),
            memmap: MemMapRequest::new(),
            hhdm: HhdmRequest::new(),
            executable_address: ExecutableAddressRequest::new(),
            framebuffer: FramebufferRequest::new(),
            modules: ModuleRequest::new(),
            _end_marker: RequestsEndMarker::new(),
        }
    }
}

// SAFETY: The bootloader writes the response slots before the kernel
// runs; the kernel only reads afterwards.
unsafe impl Sync for LimineRequests {}

#[used]
#[unsafe(link_section = ".requests")]
pub static REQUESTS: LimineRequests = LimineRequests::new();
