//! Muon kernel library.
//!
//! A single-CPU, cooperatively scheduled x86_64 kernel: physical and
//! virtual memory management, a cpio/ext2-backed VFS, an ELF64 loader,
//! a `syscall`/`sysret` fast-call surface, and an interactive shell.
//!
//! Modules that are pure logic (address types, page-table manipulation,
//! the frame allocator, the filesystem layer) compile for the host so
//! their unit tests run under plain `cargo test`; everything that touches
//! CPU state or I/O ports is gated on `target_os = "none"`.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]
#![warn(missing_docs)]

extern crate alloc;

// ── Pure-logic modules (host-testable) ───────────────────────────────

pub mod addr;
pub mod fs;
pub mod log;
pub mod mm;
pub mod sync;
pub mod syscall;

// ── Kernel-runtime modules (require target_os = "none") ──────────────

#[cfg(target_os = "none")]
pub mod arch;
#[cfg(target_os = "none")]
pub mod boot;
#[cfg(target_os = "none")]
pub mod drivers;
#[cfg(target_os = "none")]
pub mod logger;
#[cfg(target_os = "none")]
pub mod proc;
#[cfg(target_os = "none")]
pub mod shell;

#[cfg(target_os = "none")]
pub use boot::kernel_init;
