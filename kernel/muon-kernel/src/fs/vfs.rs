//! VFS mount table, path resolution, and the working directory.
//!
//! Paths resolve against the longest-matching mount point, then walk the
//! remaining components through [`Inode::lookup`]. Relative paths are
//! first normalized against the current directory, which the VFS owns
//! on behalf of the shell.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::sync::SpinLock;

use super::{FileSystem, FsError, Inode, InodeType, Mode, path};

static VFS: SpinLock<Option<Vfs>> = SpinLock::new(None);

/// The mount table plus the current working directory.
pub struct Vfs {
    mounts: BTreeMap<String, Arc<dyn FileSystem>>,
    cwd: String,
}

impl Vfs {
    fn new() -> Self {
        Self {
            mounts: BTreeMap::new(),
            cwd: String::from("/"),
        }
    }

    /// Mounts a filesystem at `mount_point`.
    pub fn mount(&mut self, mount_point: &str, fs: Arc<dyn FileSystem>) {
        crate::kinfo!("VFS: mounted {} at {}", fs.name(), mount_point);
        self.mounts.insert(mount_point.to_string(), fs);
    }

    /// The current working directory.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Changes the working directory.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] / [`FsError::NotADirectory`] when the
    /// target does not resolve to a directory.
    pub fn chdir(&mut self, target: &str) -> Result<(), FsError> {
        let absolute = path::normalize(&self.cwd, target);
        let inode = self.resolve_absolute(&absolute)?;
        if inode.kind() != InodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        self.cwd = absolute;
        Ok(())
    }

    /// Resolves a path (absolute or relative to the cwd) to an inode.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] when the path does not exist or no
    /// filesystem is mounted.
    pub fn resolve(&self, target: &str) -> Result<Arc<dyn Inode>, FsError> {
        self.resolve_absolute(&path::normalize(&self.cwd, target))
    }

    fn resolve_absolute(&self, absolute: &str) -> Result<Arc<dyn Inode>, FsError> {
        let mount =
            path::longest_prefix_match(absolute, self.mounts.keys().map(String::as_str))
                .ok_or(FsError::NotFound)?;
        let fs = self.mounts.get(mount).ok_or(FsError::NotFound)?;

        let mut current = fs.root();
        for component in path::components(path::strip_mount_prefix(absolute, mount)) {
            current = current.lookup(component)?;
        }
        Ok(current)
    }

    /// Resolves the parent directory of `target`, returning it together
    /// with the final path component.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] when `target` names the root;
    /// otherwise whatever the parent resolution reports.
    pub fn resolve_parent(&self, target: &str) -> Result<(Arc<dyn Inode>, String), FsError> {
        let absolute = path::normalize(&self.cwd, target);
        let (dir, name) = absolute
            .rsplit_once('/')
            .ok_or(FsError::InvalidArgument)?;
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let parent = if dir.is_empty() {
            self.resolve_absolute("/")?
        } else {
            self.resolve_absolute(dir)?
        };
        Ok((parent, String::from(name)))
    }

    /// Creates a file at `target`.
    ///
    /// # Errors
    ///
    /// Propagates parent resolution and [`Inode::create`] failures —
    /// notably [`FsError::ReadOnly`] on ext2.
    pub fn create_file(&self, target: &str) -> Result<Arc<dyn Inode>, FsError> {
        let (parent, name) = self.resolve_parent(target)?;
        parent.create(&name, InodeType::File, Mode::FILE_DEFAULT)
    }

    /// Creates a directory at `target`.
    ///
    /// # Errors
    ///
    /// As [`create_file`](Self::create_file).
    pub fn mkdir(&self, target: &str) -> Result<Arc<dyn Inode>, FsError> {
        let (parent, name) = self.resolve_parent(target)?;
        parent.create(&name, InodeType::Directory, Mode::DIR_DEFAULT)
    }

    /// Changes the mode of the file at `target`.
    ///
    /// # Errors
    ///
    /// Resolution failures, or [`FsError::ReadOnly`] on ext2.
    pub fn chmod(&self, target: &str, mode: Mode) -> Result<(), FsError> {
        self.resolve(target)?.set_mode(mode)
    }
}

/// Initializes the global VFS.
///
/// # Panics
///
/// Panics on double initialization.
pub fn init() {
    let mut vfs = VFS.lock();
    assert!(vfs.is_none(), "VFS already initialized");
    *vfs = Some(Vfs::new());
}

/// Runs `f` with the global VFS.
///
/// # Panics
///
/// Panics if the VFS has not been initialized.
pub fn with_vfs<R>(f: impl FnOnce(&Vfs) -> R) -> R {
    let guard = VFS.lock();
    f(guard.as_ref().expect("VFS not initialized"))
}

/// Runs `f` with mutable access to the global VFS.
///
/// # Panics
///
/// Panics if the VFS has not been initialized.
pub fn with_vfs_mut<R>(f: impl FnOnce(&mut Vfs) -> R) -> R {
    let mut guard = VFS.lock();
    f(guard.as_mut().expect("VFS not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    fn vfs_with_tree() -> Vfs {
        let fs = RamFs::new();
        let root = fs.root();
        let bin = root
            .create("bin", InodeType::Directory, Mode::DIR_DEFAULT)
            .unwrap();
        bin.create("ls", InodeType::File, Mode(0o755)).unwrap();
        root.create("hello", InodeType::File, Mode::FILE_DEFAULT)
            .unwrap();

        let mut vfs = Vfs::new();
        vfs.mount("/", Arc::new(fs));
        vfs
    }

    #[test]
    fn resolve_absolute_and_relative() {
        let mut vfs = vfs_with_tree();
        assert!(vfs.resolve("/bin/ls").is_ok());
        assert!(vfs.resolve("hello").is_ok());

        vfs.chdir("/bin").unwrap();
        assert!(vfs.resolve("ls").is_ok());
        assert!(vfs.resolve("../hello").is_ok());
    }

    #[test]
    fn chdir_validates_target() {
        let mut vfs = vfs_with_tree();
        assert_eq!(vfs.chdir("/hello"), Err(FsError::NotADirectory));
        assert_eq!(vfs.chdir("/nope"), Err(FsError::NotFound));
        vfs.chdir("/bin").unwrap();
        assert_eq!(vfs.cwd(), "/bin");
        vfs.chdir("..").unwrap();
        assert_eq!(vfs.cwd(), "/");
    }

    #[test]
    fn create_and_write_through_vfs() {
        let vfs = vfs_with_tree();
        let file = vfs.create_file("/notes").unwrap();
        file.write(0, b"data").unwrap();
        assert_eq!(vfs.resolve("/notes").unwrap().size(), 4);
    }

    #[test]
    fn mkdir_then_chdir() {
        let mut vfs = vfs_with_tree();
        vfs.mkdir("/work").unwrap();
        vfs.chdir("/work").unwrap();
        assert_eq!(vfs.cwd(), "/work");
    }

    #[test]
    fn chmod_via_path() {
        let vfs = vfs_with_tree();
        vfs.chmod("/hello", Mode(0o700)).unwrap();
        assert!(vfs.resolve("/hello").unwrap().mode().is_executable());
    }

    #[test]
    fn resolving_without_mounts_fails() {
        let vfs = Vfs::new();
        assert_eq!(vfs.resolve("/x").err(), Some(FsError::NotFound));
    }
}
