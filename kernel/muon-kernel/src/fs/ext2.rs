//! Read-only ext2 filesystem bridge.
//!
//! Wraps [`muon_ext2::Ext2Image`] behind the [`FileSystem`]/[`Inode`]
//! traits. The image bytes live in boot-module memory, which is never
//! reclaimed, so inodes borrow from it for the kernel's lifetime. Every
//! mutating operation reports [`FsError::ReadOnly`].

extern crate alloc;

use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_ext2::{Ext2Image, Inode as RawInode};

use super::{DirEntry, FileSystem, FsError, Inode, InodeType, Mode};

/// An ext2 filesystem mounted from an in-memory image.
pub struct Ext2Fs {
    image: Ext2Image<'static>,
}

impl Ext2Fs {
    /// Validates `data` as an ext2 image and mounts it.
    ///
    /// # Errors
    ///
    /// [`FsError::Corrupt`] when the superblock or root inode fail
    /// validation.
    pub fn mount(data: &'static [u8]) -> Result<Self, FsError> {
        let image = Ext2Image::open(data).map_err(|_| FsError::Corrupt)?;
        // The root must decode as a directory before we expose anything.
        image.root().map_err(|_| FsError::Corrupt)?;
        Ok(Self { image })
    }
}

impl FileSystem for Ext2Fs {
    fn name(&self) -> &'static str {
        "ext2"
    }

    fn root(&self) -> Arc<dyn Inode> {
        let raw = self.image.root().expect("root inode validated at mount");
        Arc::new(Ext2Inode {
            image: self.image,
            raw,
        })
    }
}

/// An inode of a mounted [`Ext2Fs`].
struct Ext2Inode {
    image: Ext2Image<'static>,
    raw: RawInode,
}

impl Inode for Ext2Inode {
    fn kind(&self) -> InodeType {
        if self.raw.is_dir() {
            InodeType::Directory
        } else {
            InodeType::File
        }
    }

    fn size(&self) -> usize {
        if self.raw.is_dir() {
            0
        } else {
            self.raw.size as usize
        }
    }

    fn mode(&self) -> Mode {
        Mode(self.raw.mode & 0o7777)
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.raw.is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.image
            .read_at(&self.raw, offset, buf)
            .map_err(|_| FsError::Corrupt)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>, FsError> {
        if !self.raw.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let (_, raw) = self.image.lookup(&self.raw, name).map_err(|err| {
            if err == muon_ext2::Ext2Error::NotFound {
                FsError::NotFound
            } else {
                FsError::Corrupt
            }
        })?;
        Ok(Arc::new(Ext2Inode {
            image: self.image,
            raw,
        }))
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        if !self.raw.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let mut entries = Vec::new();
        for entry in self.image.dir_entries(&self.raw) {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            // Sizes come from the target inode; skip records whose inode
            // cannot be decoded rather than aborting the listing.
            let Ok(raw) = self.image.inode(entry.inode) else {
                continue;
            };
            entries.push(DirEntry {
                name: entry.name.to_string(),
                kind: if raw.is_dir() {
                    InodeType::Directory
                } else {
                    InodeType::File
                },
                size: if raw.is_dir() { 0 } else { raw.size as usize },
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal valid image, identical in layout to the `muon-ext2`
    /// crate's fixture: `/readme` (10 bytes) and `/sub/nested`.
    fn sample_image() -> &'static [u8] {
        const BLOCK: usize = 1024;
        let mut img = vec![0u8; 16 * BLOCK];

        let put16 = |img: &mut [u8], off: usize, v: u16| {
            img[off..off + 2].copy_from_slice(&v.to_le_bytes());
        };
        let put32 = |img: &mut [u8], off: usize, v: u32| {
            img[off..off + 4].copy_from_slice(&v.to_le_bytes());
        };

        put32(&mut img, 1024, 32); // inodes_count
        put32(&mut img, 1024 + 4, 16); // blocks_count
        put32(&mut img, 1024 + 20, 1); // first_data_block
        put32(&mut img, 1024 + 40, 32); // inodes_per_group
        put16(&mut img, 1024 + 56, 0xEF53);
        put32(&mut img, 2 * BLOCK + 8, 5); // inode table at block 5

        let put_inode = |img: &mut [u8], ino: usize, mode: u16, size: u32, block0: u32| {
            let off = 5 * BLOCK + (ino - 1) * 128;
            put16(img, off, mode);
            put32(img, off + 4, size);
            put32(img, off + 40, block0);
        };
        put_inode(&mut img, 2, 0x4000 | 0o755, 1024, 6);
        put_inode(&mut img, 12, 0x8000 | 0o644, 10, 7);

        let put_dirent =
            |img: &mut [u8], at: &mut usize, ino: u32, ftype: u8, name: &str| {
                let rec_len = (8 + name.len()).div_ceil(4) * 4;
                put32(img, *at, ino);
                put16(img, *at + 4, rec_len as u16);
                img[*at + 6] = name.len() as u8;
                img[*at + 7] = ftype;
                img[*at + 8..*at + 8 + name.len()].copy_from_slice(name.as_bytes());
                *at += rec_len;
            };
        let mut at = 6 * BLOCK;
        put_dirent(&mut img, &mut at, 2, 2, ".");
        put_dirent(&mut img, &mut at, 2, 2, "..");
        put_dirent(&mut img, &mut at, 12, 1, "readme");

        img[7 * BLOCK..7 * BLOCK + 10].copy_from_slice(b"0123456789");

        img.leak()
    }

    #[test]
    fn mount_rejects_garbage() {
        assert!(Ext2Fs::mount([0u8; 4096][..].to_vec().leak()).is_err());
    }

    #[test]
    fn open_and_read_through_the_trait() {
        let fs = Ext2Fs::mount(sample_image()).expect("mount");
        let readme = fs.root().lookup("readme").expect("lookup");
        assert_eq!(readme.kind(), InodeType::File);
        assert_eq!(readme.size(), 10);

        let mut buf = [0u8; 5];
        assert_eq!(readme.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"01234");
        assert_eq!(readme.read(5, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"56789");
        assert_eq!(readme.read(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn listing_omits_dot_entries() {
        let fs = Ext2Fs::mount(sample_image()).expect("mount");
        let entries = fs.root().readdir().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["readme"]);
        assert_eq!(entries[0].size, 10);
    }

    #[test]
    fn writes_report_read_only() {
        let fs = Ext2Fs::mount(sample_image()).expect("mount");
        let readme = fs.root().lookup("readme").unwrap();
        assert_eq!(readme.write(0, b"nope"), Err(FsError::ReadOnly));
        assert_eq!(readme.set_mode(Mode(0o777)), Err(FsError::ReadOnly));
        assert_eq!(
            fs.root()
                .create("new", InodeType::File, Mode::FILE_DEFAULT)
                .err(),
            Some(FsError::ReadOnly)
        );
    }
}
