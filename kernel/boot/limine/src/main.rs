//! Limine boot stub for the Muon kernel.
//!
//! The real content lives in [`stub`]; it only exists for the bare
//! metal target. Host builds (`cargo test` on the workspace) see an
//! empty binary so the stub never drags kernel-runtime code into a
//! hosted compile.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod requests;
#[cfg(target_os = "none")]
mod stub;

#[cfg(not(target_os = "none"))]
fn main() {}
