//! ELF64 executable parser.
//!
//! Parses the file header and `PT_LOAD` program headers of statically
//! linked `ET_EXEC` images from a raw byte slice. All field extraction
//! goes through `from_le_bytes`; no unsafe code, no allocation.
//!
//! ```
//! use muon_elf::ElfImage;
//!
//! fn load(data: &[u8]) {
//!     let image = ElfImage::parse(data).expect("valid executable");
//!     let _entry = image.entry_point();
//!     for seg in image.load_segments() {
//!         // Map seg.data at seg.vaddr, zero up to seg.memsz.
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod header;
pub mod image;

pub use header::{Elf64Header, ElfError, PF_W, PF_X};
pub use image::{ElfImage, LoadSegment};
