//! Bindings for the Limine boot protocol.
//!
//! The protocol is request-response based: the kernel places request
//! structures in a dedicated `.requests` linker section, the bootloader
//! recognises them by their 256-bit IDs and fills in the response pointers
//! before handing over control.
//!
//! ```no_run
//! use limine::{BaseRevision, MemMapRequest};
//!
//! #[used]
//! #[unsafe(link_section = ".requests")]
//! static BASE_REVISION: BaseRevision = BaseRevision::new();
//!
//! #[used]
//! #[unsafe(link_section = ".requests")]
//! static MEMMAP: MemMapRequest = MemMapRequest::new();
//!
//! fn count_usable(max: &mut u64) {
//!     if let Some(resp) = MEMMAP.response() {
//!         for entry in resp.entries() {
//!             *max = (*max).max(entry.base + entry.length);
//!         }
//!     }
//! }
//! ```
//!
//! Only the requests the Muon kernel actually consumes are bound: the
//! memory map, the HHDM offset, the executable load addresses, the
//! framebuffer list, the module list, and bootloader identification.

#![no_std]

mod request;
mod response;

pub mod file;
pub mod framebuffer;
pub mod memmap;

pub use request::*;
pub use response::*;
