//! The console device inode.
//!
//! Backs descriptors 0/1/2 of every process. Writes land on the
//! framebuffer console (and the serial log, for capture); reads poll
//! the keyboard until a newline or the buffer fills, echoing as they
//! go.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::drivers::{fbcon, i8042};
use crate::kprint;

use super::{DirEntry, FsError, Inode, InodeType, Mode};

/// The console character device.
pub struct ConsoleInode;

/// Creates a handle to the console device.
#[must_use]
pub fn console() -> Arc<dyn Inode> {
    Arc::new(ConsoleInode)
}

impl Inode for ConsoleInode {
    fn kind(&self) -> InodeType {
        InodeType::CharDevice
    }

    fn size(&self) -> usize {
        0
    }

    fn mode(&self) -> Mode {
        Mode(0o666)
    }

    fn read(&self, _offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut n = 0;
        while n < buf.len() {
            let mut ch = i8042::read_char();
            if ch == b'\r' {
                ch = b'\n';
            }
            // Echo, translating backspace into erase.
            if ch == 0x08 {
                if n > 0 {
                    n -= 1;
                    fbcon::write_str("\x08 \x08");
                }
                continue;
            }
            buf[n] = ch;
            n += 1;
            let echo = [ch];
            if let Ok(s) = core::str::from_utf8(&echo) {
                fbcon::write_str(s);
            }
            if ch == b'\n' {
                break;
            }
        }
        Ok(n)
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> Result<usize, FsError> {
        // User-visible bytes go to the terminal; kprint! also mirrors
        // them to the serial log for capture.
        match core::str::from_utf8(buf) {
            Ok(s) => kprint!("{s}"),
            Err(_) => {
                for &byte in buf {
                    let printable = [if byte.is_ascii() { byte } else { b'?' }];
                    if let Ok(s) = core::str::from_utf8(&printable) {
                        kprint!("{s}");
                    }
                }
            }
        }
        Ok(buf.len())
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn Inode>, FsError> {
        Err(FsError::NotADirectory)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }
}
