//! Read-only ext2 reader over an in-memory image.
//!
//! Interprets just enough of the on-disk format to serve the VFS: the
//! superblock, block-group descriptors, inodes, directory blocks, and
//! file data reachable through the twelve direct block pointers. No
//! journal, no extended attributes, no indirect blocks — bytes beyond
//! direct addressing read as end-of-file.
//!
//! All structure access goes through range-checked offset reads into the
//! image slice; a corrupt field surfaces as [`Ext2Error`], never as an
//! out-of-bounds access.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

use core::fmt;

/// Superblock location within the image.
const SUPERBLOCK_OFFSET: usize = 1024;

/// Superblock magic value.
const EXT2_MAGIC: u16 = 0xEF53;

/// Inode number of the root directory.
pub const ROOT_INO: u32 = 2;

/// Number of direct block pointers in an inode.
pub const DIRECT_BLOCKS: usize = 12;

/// Size of one block-group descriptor.
const GROUP_DESC_SIZE: usize = 32;

/// Inode size used by revision-0 filesystems.
const REV0_INODE_SIZE: usize = 128;

/// Mode mask and type values for the inode types we care about.
const S_IFMT: u16 = 0xF000;
const S_IFDIR: u16 = 0x4000;
const S_IFREG: u16 = 0x8000;

/// `file_type` value for directories in directory entries.
const FT_DIR: u8 = 2;

/// Reasons an ext2 operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ext2Error {
    /// The superblock magic is not `0xEF53`.
    BadMagic,
    /// The image is shorter than a structure it declares.
    Truncated,
    /// An inode number is zero or past `s_inodes_count`.
    BadInode,
    /// A block pointer or table offset lands outside the image.
    OutOfBounds,
    /// A path component was looked up in a non-directory.
    NotADirectory,
    /// A path component does not exist.
    NotFound,
}

impl fmt::Display for Ext2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad superblock magic"),
            Self::Truncated => write!(f, "image truncated"),
            Self::BadInode => write!(f, "inode number out of range"),
            Self::OutOfBounds => write!(f, "block offset outside image"),
            Self::NotADirectory => write!(f, "path component is not a directory"),
            Self::NotFound => write!(f, "no such file or directory"),
        }
    }
}

/// Reads a little-endian `u16` at `off`.
fn le_u16(data: &[u8], off: usize) -> Result<u16, Ext2Error> {
    let b = data.get(off..off + 2).ok_or(Ext2Error::Truncated)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Reads a little-endian `u32` at `off`.
fn le_u32(data: &[u8], off: usize) -> Result<u32, Ext2Error> {
    let b = data.get(off..off + 4).ok_or(Ext2Error::Truncated)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// The decoded fields of an on-disk inode.
///
/// Only the direct block pointers are retained; Muon never follows
/// indirect blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// File type and permission bits.
    pub mode: u16,
    /// Size in bytes (lower 32 bits; large-file support is out of scope).
    pub size: u32,
    /// The twelve direct block pointers.
    pub block: [u32; DIRECT_BLOCKS],
}

impl Inode {
    /// Whether the inode is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Whether the inode is a regular file.
    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

/// One directory record, borrowing its name from the image.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    /// Inode number the record points at.
    pub inode: u32,
    /// Record type byte (`FT_*`).
    pub file_type: u8,
    /// Entry name.
    pub name: &'a str,
}

impl DirEntry<'_> {
    /// Whether the record's type byte marks a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == FT_DIR
    }
}

/// A validated view over an ext2 image.
#[derive(Debug, Clone, Copy)]
pub struct Ext2Image<'a> {
    data: &'a [u8],
    block_size: usize,
    first_data_block: u32,
    inodes_count: u32,
    inodes_per_group: u32,
    inode_size: usize,
}

impl<'a> Ext2Image<'a> {
    /// Validates the superblock and builds an image view.
    ///
    /// # Errors
    ///
    /// [`Ext2Error::BadMagic`] if the magic does not match,
    /// [`Ext2Error::Truncated`] if the image cannot hold a superblock.
    pub fn open(data: &'a [u8]) -> Result<Self, Ext2Error> {
        let sb = SUPERBLOCK_OFFSET;
        if le_u16(data, sb + 56)? != EXT2_MAGIC {
            return Err(Ext2Error::BadMagic);
        }

        let log_block_size = le_u32(data, sb + 24)?;
        if log_block_size > 6 {
            return Err(Ext2Error::OutOfBounds);
        }
        let block_size = 1024usize << log_block_size;

        let rev_level = le_u32(data, sb + 76)?;
        let inode_size = if rev_level == 0 {
            REV0_INODE_SIZE
        } else {
            le_u16(data, sb + 88)? as usize
        };
        if inode_size < REV0_INODE_SIZE {
            return Err(Ext2Error::OutOfBounds);
        }

        Ok(Self {
            data,
            block_size,
            first_data_block: le_u32(data, sb + 20)?,
            inodes_count: le_u32(data, sb)?,
            inodes_per_group: le_u32(data, sb + 40)?.max(1),
            inode_size,
        })
    }

    /// The filesystem block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the byte range of block `block_id`.
    fn block(&self, block_id: u32) -> Result<&'a [u8], Ext2Error> {
        let start = block_id as usize * self.block_size;
        self.data
            .get(start..start + self.block_size)
            .ok_or(Ext2Error::OutOfBounds)
    }

    /// Reads inode `ino` (1-based) from its group's inode table.
    ///
    /// # Errors
    ///
    /// [`Ext2Error::BadInode`] for inode 0 or an inode past the count,
    /// [`Ext2Error::OutOfBounds`] if the table lies outside the image.
    pub fn inode(&self, ino: u32) -> Result<Inode, Ext2Error> {
        if ino == 0 || ino > self.inodes_count {
            return Err(Ext2Error::BadInode);
        }

        let index = ino - 1;
        let group = (index / self.inodes_per_group) as usize;
        let slot = (index % self.inodes_per_group) as usize;

        // Group descriptors start one block after the superblock's block.
        let table_base = (self.first_data_block as usize + 1) * self.block_size;
        let desc_off = table_base + group * GROUP_DESC_SIZE;
        let inode_table_block = le_u32(self.data, desc_off + 8)?;

        let inode_off = inode_table_block as usize * self.block_size + slot * self.inode_size;
        let raw = self
            .data
            .get(inode_off..inode_off + self.inode_size)
            .ok_or(Ext2Error::OutOfBounds)?;

        let mut block = [0u32; DIRECT_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = le_u32(raw, 40 + i * 4)?;
        }

        Ok(Inode {
            mode: le_u16(raw, 0)?,
            size: le_u32(raw, 4)?,
            block,
        })
    }

    /// Reads the root directory inode (inode 2).
    ///
    /// # Errors
    ///
    /// [`Ext2Error::NotADirectory`] if inode 2 lacks the directory type
    /// bit — the telltale of a non-ext2 or corrupt image.
    pub fn root(&self) -> Result<Inode, Ext2Error> {
        let root = self.inode(ROOT_INO)?;
        if !root.is_dir() {
            return Err(Ext2Error::NotADirectory);
        }
        Ok(root)
    }

    /// Iterates the records of a directory inode.
    #[must_use]
    pub fn dir_entries(&self, dir: &Inode) -> DirIter<'a> {
        DirIter {
            image: *self,
            blocks: dir.block,
            size: dir.size as usize,
            block_index: 0,
            offset: 0,
        }
    }

    /// Finds `name` in a directory. Returns the entry's inode number and
    /// the decoded inode.
    ///
    /// # Errors
    ///
    /// [`Ext2Error::NotADirectory`] if `dir` is not a directory,
    /// [`Ext2Error::NotFound`] if no record matches.
    pub fn lookup(&self, dir: &Inode, name: &str) -> Result<(u32, Inode), Ext2Error> {
        if !dir.is_dir() {
            return Err(Ext2Error::NotADirectory);
        }
        for entry in self.dir_entries(dir) {
            if entry.name == name {
                return Ok((entry.inode, self.inode(entry.inode)?));
            }
        }
        Err(Ext2Error::NotFound)
    }

    /// Resolves a `/`-separated path from the root directory.
    ///
    /// Empty components are skipped, so `/a//b/` and `a/b` resolve the
    /// same inode.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures; resolving the empty path yields root.
    pub fn resolve(&self, path: &str) -> Result<(u32, Inode), Ext2Error> {
        let mut ino = ROOT_INO;
        let mut inode = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            (ino, inode) = self.lookup(&inode, component)?;
        }
        Ok((ino, inode))
    }

    /// Reads file bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes read; 0 signals end-of-file. Only the
    /// direct blocks are addressable, so reads are additionally clamped
    /// to `DIRECT_BLOCKS * block_size`. A zero block pointer reads as
    /// zeros (sparse file hole).
    ///
    /// # Errors
    ///
    /// [`Ext2Error::OutOfBounds`] if a referenced block lies outside the
    /// image.
    pub fn read_at(
        &self,
        inode: &Inode,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Ext2Error> {
        let direct_limit = DIRECT_BLOCKS * self.block_size;
        let end = (inode.size as usize).min(direct_limit);
        if offset >= end {
            return Ok(0);
        }

        let want = buf.len().min(end - offset);
        let mut done = 0;
        while done < want {
            let pos = offset + done;
            let block_index = pos / self.block_size;
            let in_block = pos % self.block_size;
            let chunk = (self.block_size - in_block).min(want - done);

            let block_id = inode.block[block_index];
            if block_id == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                let block = self.block(block_id)?;
                buf[done..done + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }
}

/// Iterator over directory records, spanning the directory's direct blocks.
///
/// A record with `inode == 0` or `rec_len == 0` terminates the current
/// block's entries; iteration then continues with the next block.
pub struct DirIter<'a> {
    image: Ext2Image<'a>,
    blocks: [u32; DIRECT_BLOCKS],
    size: usize,
    block_index: usize,
    offset: usize,
}

impl<'a> Iterator for DirIter<'a> {
    type Item = DirEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.block_index >= DIRECT_BLOCKS
                || self.block_index * self.image.block_size >= self.size
            {
                return None;
            }

            let block_id = self.blocks[self.block_index];
            let Ok(block) = self.image.block(block_id) else {
                return None;
            };

            while self.offset + 8 <= block.len() {
                let at = self.offset;
                let Ok(inode) = le_u32(block, at) else {
                    return None;
                };
                let Ok(rec_len) = le_u16(block, at + 4) else {
                    return None;
                };
                if inode == 0 || rec_len == 0 {
                    break;
                }

                let name_len = block[at + 6] as usize;
                let file_type = block[at + 7];
                self.offset = at + rec_len as usize;

                let Some(name_bytes) = block.get(at + 8..at + 8 + name_len) else {
                    return None;
                };
                let Ok(name) = core::str::from_utf8(name_bytes) else {
                    continue;
                };

                return Some(DirEntry {
                    inode,
                    file_type,
                    name,
                });
            }

            self.block_index += 1;
            self.offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 1024;

    /// Writes `value` as little-endian u16 at `off`.
    fn put16(img: &mut [u8], off: usize, value: u16) {
        img[off..off + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes `value` as little-endian u32 at `off`.
    fn put32(img: &mut [u8], off: usize, value: u32) {
        img[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes an inode at table slot `ino - 1`.
    fn put_inode(img: &mut [u8], table_block: usize, ino: u32, mode: u16, size: u32, block0: u32) {
        let off = table_block * BLOCK + (ino as usize - 1) * REV0_INODE_SIZE;
        put16(img, off, mode);
        put32(img, off + 4, size);
        put32(img, off + 40, block0);
    }

    /// Appends a directory record at `*cursor` within `block_off`.
    fn put_dirent(img: &mut [u8], cursor: &mut usize, inode: u32, file_type: u8, name: &str) {
        let rec_len = (8 + name.len()).div_ceil(4) * 4;
        let at = *cursor;
        put32(img, at, inode);
        put16(img, at + 4, rec_len as u16);
        img[at + 6] = name.len() as u8;
        img[at + 7] = file_type;
        img[at + 8..at + 8 + name.len()].copy_from_slice(name.as_bytes());
        *cursor = at + rec_len;
    }

    /// Builds a 1024-byte-block image:
    ///
    /// ```text
    /// block 5: inode table       inode 2 = root dir   -> block 6
    /// block 6: root directory    readme (12), sub (13)
    /// block 7: "0123456789"      (inode 12, 10 bytes)
    /// block 8: sub directory     nested (14)
    /// block 9: "nested-data"     (inode 14, 11 bytes)
    /// ```
    fn sample_image() -> Vec<u8> {
        let mut img = vec![0u8; 16 * BLOCK];
        let sb = SUPERBLOCK_OFFSET;

        put32(&mut img, sb, 32); // s_inodes_count
        put32(&mut img, sb + 4, 16); // s_blocks_count
        put32(&mut img, sb + 20, 1); // s_first_data_block
        put32(&mut img, sb + 24, 0); // s_log_block_size -> 1024
        put32(&mut img, sb + 40, 32); // s_inodes_per_group
        put16(&mut img, sb + 56, EXT2_MAGIC);
        put32(&mut img, sb + 76, 0); // s_rev_level

        // Group descriptor 0 at block 2: inode table at block 5.
        put32(&mut img, 2 * BLOCK + 8, 5);

        put_inode(&mut img, 5, ROOT_INO, S_IFDIR | 0o755, BLOCK as u32, 6);
        put_inode(&mut img, 5, 12, S_IFREG | 0o644, 10, 7);
        put_inode(&mut img, 5, 13, S_IFDIR | 0o755, BLOCK as u32, 8);
        put_inode(&mut img, 5, 14, S_IFREG | 0o644, 11, 9);

        let mut at = 6 * BLOCK;
        put_dirent(&mut img, &mut at, ROOT_INO, FT_DIR, ".");
        put_dirent(&mut img, &mut at, ROOT_INO, FT_DIR, "..");
        put_dirent(&mut img, &mut at, 12, 1, "readme");
        put_dirent(&mut img, &mut at, 13, FT_DIR, "sub");

        img[7 * BLOCK..7 * BLOCK + 10].copy_from_slice(b"0123456789");

        let mut at = 8 * BLOCK;
        put_dirent(&mut img, &mut at, 13, FT_DIR, ".");
        put_dirent(&mut img, &mut at, ROOT_INO, FT_DIR, "..");
        put_dirent(&mut img, &mut at, 14, 1, "nested");

        img[9 * BLOCK..9 * BLOCK + 11].copy_from_slice(b"nested-data");

        img
    }

    #[test]
    fn rejects_bad_magic() {
        let mut img = sample_image();
        put16(&mut img, SUPERBLOCK_OFFSET + 56, 0x1234);
        assert_eq!(Ext2Image::open(&img).err(), Some(Ext2Error::BadMagic));
    }

    #[test]
    fn rejects_short_image() {
        assert_eq!(Ext2Image::open(&[0u8; 512]).err(), Some(Ext2Error::Truncated));
    }

    #[test]
    fn block_size_from_superblock() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        assert_eq!(fs.block_size(), 1024);
    }

    #[test]
    fn root_is_directory() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        assert!(fs.root().expect("root inode").is_dir());
    }

    #[test]
    fn listing_names_root() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        let root = fs.root().unwrap();
        let names: Vec<_> = fs.dir_entries(&root).map(|e| e.name.to_string()).collect();
        assert_eq!(names, [".", "..", "readme", "sub"]);
    }

    #[test]
    fn resolve_matches_manual_walk() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");

        let (ino_resolved, node_resolved) = fs.resolve("/sub/nested").expect("resolve");

        let root = fs.root().unwrap();
        let (_, sub) = fs.lookup(&root, "sub").expect("sub");
        let (ino_walked, node_walked) = fs.lookup(&sub, "nested").expect("nested");

        assert_eq!(ino_resolved, ino_walked);
        assert_eq!(node_resolved.size, node_walked.size);
        assert_eq!(node_resolved.mode, node_walked.mode);
        assert_eq!(node_resolved.block, node_walked.block);
    }

    #[test]
    fn resolve_skips_empty_components() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        let (a, _) = fs.resolve("/readme").unwrap();
        let (b, _) = fs.resolve("//readme/").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn resolve_missing_component() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        assert_eq!(fs.resolve("/absent"), Err(Ext2Error::NotFound));
        assert_eq!(fs.resolve("/readme/x"), Err(Ext2Error::NotADirectory));
    }

    #[test]
    fn sequential_reads_hit_eof() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        let (_, readme) = fs.resolve("/readme").unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(fs.read_at(&readme, 0, &mut buf[..5]).unwrap(), 5);
        assert_eq!(&buf[..5], b"01234");

        assert_eq!(fs.read_at(&readme, 5, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"56789");

        assert_eq!(fs.read_at(&readme, 10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn reads_clamped_to_direct_blocks() {
        let mut img = sample_image();
        // Pretend readme is enormous; only direct blocks stay readable.
        let off = 5 * BLOCK + 11 * REV0_INODE_SIZE + 4;
        put32(&mut img, off, u32::MAX);
        let fs = Ext2Image::open(&img).expect("valid image");
        let (_, readme) = fs.resolve("/readme").unwrap();

        let mut buf = [0u8; 4];
        let past_direct = DIRECT_BLOCKS * BLOCK;
        assert_eq!(fs.read_at(&readme, past_direct, &mut buf).unwrap(), 0);
    }

    #[test]
    fn sparse_hole_reads_zero() {
        let mut img = sample_image();
        // Clear readme's block pointer: the data becomes a hole.
        let off = 5 * BLOCK + 11 * REV0_INODE_SIZE + 40;
        put32(&mut img, off, 0);
        let fs = Ext2Image::open(&img).expect("valid image");
        let (_, readme) = fs.resolve("/readme").unwrap();

        let mut buf = [0xFFu8; 10];
        assert_eq!(fs.read_at(&readme, 0, &mut buf).unwrap(), 10);
        assert_eq!(buf, [0u8; 10]);
    }

    #[test]
    fn zero_rec_len_terminates_block() {
        let mut img = sample_image();
        // Zero the "readme" record's rec_len: listing stops after "..".
        let at = 6 * BLOCK + 12 + 12;
        put16(&mut img, at + 4, 0);
        let fs = Ext2Image::open(&img).expect("valid image");
        let root = fs.root().unwrap();
        let names: Vec<_> = fs.dir_entries(&root).map(|e| e.name).collect();
        assert_eq!(names, [".", ".."]);
    }

    #[test]
    fn out_of_range_inode_rejected() {
        let img = sample_image();
        let fs = Ext2Image::open(&img).expect("valid image");
        assert_eq!(fs.inode(0), Err(Ext2Error::BadInode));
        assert_eq!(fs.inode(33), Err(Ext2Error::BadInode));
    }

    #[test]
    fn bogus_block_pointer_is_out_of_bounds() {
        let mut img = sample_image();
        let off = 5 * BLOCK + 11 * REV0_INODE_SIZE + 40;
        put32(&mut img, off, 0xFFFF);
        let fs = Ext2Image::open(&img).expect("valid image");
        let (_, readme) = fs.resolve("/readme").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read_at(&readme, 0, &mut buf), Err(Ext2Error::OutOfBounds));
    }
}
