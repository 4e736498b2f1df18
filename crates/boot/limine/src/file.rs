//! Boot files (modules) handed over by the bootloader.

use core::ffi::{c_char, c_void};
use core::ptr::NonNull;

/// A file the bootloader loaded into memory.
///
/// The layout is protocol-fixed; fields beyond `path` describe the boot
/// medium and are not interpreted by Muon.
#[repr(C)]
pub struct File {
    /// File structure revision.
    pub revision: u64,
    /// Address of the file contents (in the HHDM).
    pub address: *const c_void,
    /// Size of the file in bytes.
    pub size: u64,
    /// Path the file was loaded from, as a C string.
    path: *const c_char,
    /// Module string from the bootloader config, as a C string.
    string: *const c_char,
    /// Boot medium the file came from (0 generic, 1 optical, 2 TFTP).
    pub media_type: u32,
    _unused: u32,
    /// TFTP server IP, when network-booted.
    pub tftp_ip: u32,
    /// TFTP server port, when network-booted.
    pub tftp_port: u32,
    /// 1-based partition index, or 0.
    pub partition_index: u32,
    /// MBR disk id, when applicable.
    pub mbr_disk_id: u32,
    /// GPT disk UUID, when applicable.
    pub gpt_disk_uuid: [u8; 16],
    /// GPT partition UUID, when applicable.
    pub gpt_part_uuid: [u8; 16],
    /// Filesystem partition UUID, when applicable.
    pub part_uuid: [u8; 16],
}

impl File {
    /// The path this file was loaded from (empty if unavailable).
    #[must_use]
    pub fn path(&self) -> &str {
        if self.path.is_null() {
            return "";
        }
        // SAFETY: The bootloader provides valid null-terminated path strings.
        unsafe { core::ffi::CStr::from_ptr(self.path) }
            .to_str()
            .unwrap_or("")
    }

    /// The file contents as a byte slice.
    #[must_use]
    pub fn data(&self) -> &'static [u8] {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "file sizes fit in usize on 64-bit targets"
        )]
        // SAFETY: The bootloader loaded `size` contiguous bytes at `address`,
        // inside a region it marks ExecutableAndModules (never reclaimed).
        unsafe {
            core::slice::from_raw_parts(self.address.cast::<u8>(), self.size as usize)
        }
    }
}

/// Iterator over a bootloader-provided file list.
pub struct FileIter<'a> {
    files: &'a [NonNull<File>],
    index: usize,
}

impl FileIter<'_> {
    pub(crate) fn new(count: usize, files: NonNull<NonNull<File>>) -> FileIter<'static> {
        // SAFETY: The bootloader hands us a valid array of `count` pointers.
        let files = unsafe { core::slice::from_raw_parts(files.as_ptr(), count) };
        FileIter { files, index: 0 }
    }
}

impl Iterator for FileIter<'_> {
    type Item = &'static File;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.files.get(self.index)?;
        self.index += 1;
        // SAFETY: Every pointer in the array references a bootloader-owned
        // file record that lives for the kernel's lifetime.
        Some(unsafe { ptr.as_ref() })
    }
}
