//! Inode Types and Operations
//!
//! This module defines the generic node every filesystem hands to the VFS,
//! the per-kind operation tables a filesystem attaches to it, and the error
//! type shared by the whole layer.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock};
use std::sync::{Arc, Weak};

use super::dentry::Dentry;
use super::env::{AllocKind, Charge, Timespec, VfsEnv, PAGE_SIZE};
use super::file::File;
use super::mapping::AddressSpace;
use super::superblock::SuperBlock;

/// File mode bits following POSIX specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct FileMode(pub u16);

impl FileMode {
    // File types
    pub const S_IFMT: u16 = 0o170000; // File type mask
    pub const S_IFREG: u16 = 0o100000; // Regular file
    pub const S_IFDIR: u16 = 0o040000; // Directory
    pub const S_IFLNK: u16 = 0o120000; // Symbolic link
    pub const S_IFCHR: u16 = 0o020000; // Character device
    pub const S_IFBLK: u16 = 0o060000; // Block device
    pub const S_IFIFO: u16 = 0o010000; // FIFO
    pub const S_IFSOCK: u16 = 0o140000; // Socket

    // Special bits
    pub const S_ISUID: u16 = 0o4000; // Set UID
    pub const S_ISGID: u16 = 0o2000; // Set GID
    pub const S_ISVTX: u16 = 0o1000; // Sticky bit

    /// rwx for user, group and other
    pub const S_IRWXUGO: u16 = 0o0777;
    /// Every permission bit including setuid, setgid and sticky
    pub const S_IALLUGO: u16 = 0o7777;

    /// Create a new FileMode
    pub const fn new(mode: u16) -> Self {
        Self(mode)
    }

    /// Get the file type
    pub const fn file_type(&self) -> u16 {
        self.0 & Self::S_IFMT
    }

    /// Get the permission bits
    pub const fn permissions(&self) -> u16 {
        self.0 & Self::S_IALLUGO
    }

    /// Same permissions, different type
    pub const fn with_type(self, file_type: u16) -> Self {
        Self((self.0 & !Self::S_IFMT) | (file_type & Self::S_IFMT))
    }

    pub const fn is_regular(&self) -> bool {
        self.file_type() == Self::S_IFREG
    }

    pub const fn is_directory(&self) -> bool {
        self.file_type() == Self::S_IFDIR
    }

    pub const fn is_symlink(&self) -> bool {
        self.file_type() == Self::S_IFLNK
    }
}

impl fmt::Octal for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Octal::fmt(&self.0, f)
    }
}

/// Device number, encoded as `(major << 32) | minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DevId(pub u64);

impl DevId {
    pub const NONE: DevId = DevId(0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self(((major as u64) << 32) | minor as u64)
    }

    pub const fn major(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn minor(&self) -> u32 {
        self.0 as u32
    }
}

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Filesystem error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// No node could be allocated
    #[error("No space left on device")]
    NoSpace,
    /// Allocation of instance state failed
    #[error("Out of memory")]
    OutOfMemory,
    /// A recognized mount option carried a bad value
    #[error("Invalid mount option")]
    InvalidOption,
    /// The content layer could not store the data
    #[error("Backing store failure")]
    BackingStore,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("No such file or directory")]
    NotFound,
    #[error("File exists")]
    AlreadyExists,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Directory not empty")]
    NotEmpty,
    #[error("Name too long")]
    NameTooLong,
    #[error("Operation not permitted")]
    NotPermitted,
    #[error("File too large")]
    FileTooLarge,
    #[error("Device or resource busy")]
    Busy,
    #[error("No such device")]
    NoDevice,
    #[error("Operation not supported")]
    NotSupported,
}

impl FsError {
    /// Allocation failures of any flavour
    pub const fn is_out_of_resources(&self) -> bool {
        matches!(self, FsError::NoSpace | FsError::OutOfMemory)
    }
}

/// Kind of a special node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl SpecialKind {
    pub const fn from_mode(mode: FileMode) -> Option<Self> {
        match mode.file_type() {
            FileMode::S_IFCHR => Some(SpecialKind::CharDevice),
            FileMode::S_IFBLK => Some(SpecialKind::BlockDevice),
            FileMode::S_IFIFO => Some(SpecialKind::Fifo),
            FileMode::S_IFSOCK => Some(SpecialKind::Socket),
            _ => None,
        }
    }
}

/// Kind of a device, fifo or socket node of type `mode`
///
/// Any other type is refused with [`FsError::InvalidArgument`].
pub fn init_special_inode(ino: u64, mode: FileMode, dev: DevId) -> FsResult<InodeKind> {
    match SpecialKind::from_mode(mode) {
        Some(kind @ (SpecialKind::CharDevice | SpecialKind::BlockDevice)) => {
            Ok(InodeKind::Special { kind, rdev: dev })
        }
        Some(kind) => Ok(InodeKind::Special {
            kind,
            rdev: DevId::NONE,
        }),
        None => {
            log::warn!("[VFS] init_special_inode: bogus mode ({:o}) for inode {}", mode, ino);
            Err(FsError::InvalidArgument)
        }
    }
}

/// Operations on an open regular file
pub trait FileOperations: Send + Sync {
    fn read(&self, file: &File, off: u64, buf: &mut [u8]) -> FsResult<usize>;

    fn write(&self, file: &File, off: u64, buf: &[u8]) -> FsResult<usize>;

    /// Change the content length
    fn truncate(&self, inode: &Inode, size: u64) -> FsResult<()>;

    fn fsync(&self, _file: &File) -> FsResult<()> {
        Ok(())
    }
}

/// Naming operations of a directory
///
/// `dir` is the parent directory; `dentry` is the binding being created or
/// removed. Creation methods receive a negative dentry and must either
/// instantiate it or leave it untouched.
pub trait DirInodeOperations: Send + Sync {
    fn create(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: FileMode, excl: bool)
        -> FsResult<()>;

    fn mkdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: FileMode) -> FsResult<()>;

    fn mknod(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: FileMode, dev: DevId)
        -> FsResult<()>;

    fn symlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &str) -> FsResult<()>;

    /// Create a node bound to no name and open it through `file`
    fn tmpfile(&self, dir: &Arc<Inode>, file: &mut File, mode: FileMode) -> FsResult<()>;

    fn link(&self, old_dentry: &Arc<Dentry>, dir: &Arc<Inode>, dentry: &Arc<Dentry>)
        -> FsResult<()>;

    fn unlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()>;

    fn rmdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()>;

    fn rename(
        &self,
        old_dir: &Arc<Inode>,
        old_dentry: &Arc<Dentry>,
        new_dir: &Arc<Inode>,
        new_dentry: &Arc<Dentry>,
        flags: RenameFlags,
    ) -> FsResult<()>;
}

bitflags::bitflags! {
    /// Rename behaviour
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RenameFlags: u32 {
        /// Fail if the target exists
        const NOREPLACE = 1 << 0;
        /// Atomically swap source and target
        const EXCHANGE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Inode state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InodeState: u32 {
        /// A node with no links that may be linked in again
        const LINKABLE = 1 << 0;
    }
}

/// Kind of a node and the operations attached to it
#[derive(Clone, Copy)]
pub enum InodeKind {
    RegularFile {
        fops: &'static dyn FileOperations,
    },
    Directory {
        iops: &'static dyn DirInodeOperations,
    },
    /// Target stored in the page mapping
    Symlink,
    Special {
        kind: SpecialKind,
        rdev: DevId,
    },
}

impl InodeKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, InodeKind::Directory { .. })
    }
}

impl fmt::Debug for InodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InodeKind::RegularFile { .. } => f.write_str("RegularFile"),
            InodeKind::Directory { .. } => f.write_str("Directory"),
            InodeKind::Symlink => f.write_str("Symlink"),
            InodeKind::Special { kind, rdev } => f
                .debug_struct("Special")
                .field("kind", kind)
                .field("rdev", rdev)
                .finish(),
        }
    }
}

/// Mutable metadata of a node
#[derive(Debug, Clone, Copy)]
pub struct InodeAttr {
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// stat(2) view of a node
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: u64,
    pub st_blksize: u32,
    pub st_blocks: u64,
    pub st_atime: Timespec,
    pub st_mtime: Timespec,
    pub st_ctime: Timespec,
}

/// Directory entry returned by readdir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    pub ino: u64,
    pub name: String,
    pub file_type: u8,
}

impl DirEnt {
    // File type constants for d_type field
    pub const DT_UNKNOWN: u8 = 0;
    pub const DT_FIFO: u8 = 1;
    pub const DT_CHR: u8 = 2;
    pub const DT_DIR: u8 = 4;
    pub const DT_BLK: u8 = 6;
    pub const DT_REG: u8 = 8;
    pub const DT_LNK: u8 = 10;
    pub const DT_SOCK: u8 = 12;

    /// Convert FileMode to d_type
    pub fn file_type_from_mode(mode: FileMode) -> u8 {
        match mode.file_type() {
            FileMode::S_IFREG => Self::DT_REG,
            FileMode::S_IFDIR => Self::DT_DIR,
            FileMode::S_IFLNK => Self::DT_LNK,
            FileMode::S_IFCHR => Self::DT_CHR,
            FileMode::S_IFBLK => Self::DT_BLK,
            FileMode::S_IFIFO => Self::DT_FIFO,
            FileMode::S_IFSOCK => Self::DT_SOCK,
            _ => Self::DT_UNKNOWN,
        }
    }
}

/// A node freshly taken from the object cache, not yet published
///
/// Filesystems fill in identity, ownership and times, then call
/// [`NewInode::finish`] with the node's kind.
pub struct NewInode {
    pub ino: u64,
    pub attr: InodeAttr,
    pub nlink: u32,
    pub mapping: AddressSpace,
    sb: Weak<SuperBlock>,
    charge: Charge,
}

/// Take a node from the object cache of `sb`
///
/// The node starts with one link and no identity. Returns `None` when the
/// environment refuses the allocation.
pub fn new_inode(sb: &Arc<SuperBlock>) -> Option<NewInode> {
    let charge = Charge::try_new(sb.env(), AllocKind::Inode)?;
    Some(NewInode {
        ino: 0,
        attr: InodeAttr {
            mode: FileMode::default(),
            uid: 0,
            gid: 0,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            ctime: Timespec::default(),
        },
        nlink: 1,
        mapping: AddressSpace::new(),
        sb: Arc::downgrade(sb),
        charge,
    })
}

impl NewInode {
    pub fn env(&self) -> &Arc<VfsEnv> {
        self.charge.env()
    }

    /// Owner from the caller, group from a setgid parent
    pub fn init_owner(&mut self, dir: Option<&Inode>, mode: FileMode) {
        let cred = self.env().current_cred();
        let mut mode = mode;
        self.attr.uid = cred.fsuid;

        match dir {
            Some(dir) if dir.mode().0 & FileMode::S_ISGID != 0 => {
                self.attr.gid = dir.gid();
                if mode.is_directory() {
                    mode.0 |= FileMode::S_ISGID;
                }
            }
            _ => self.attr.gid = cred.fsgid,
        }
        self.attr.mode = mode;
    }

    /// Current time at the superblock's granularity
    pub fn current_time(&self) -> Timespec {
        let gran = self.sb.upgrade().map_or(1, |sb| sb.time_gran());
        self.env().current_time().truncate(gran)
    }

    pub fn inc_nlink(&mut self) {
        self.nlink += 1;
    }

    /// Publish the node
    pub fn finish(self, kind: InodeKind) -> Arc<Inode> {
        Arc::new(Inode {
            ino: self.ino,
            kind,
            nlink: AtomicU32::new(self.nlink),
            state: AtomicU32::new(0),
            attr: RwLock::new(self.attr),
            mapping: self.mapping,
            dir_lock: Mutex::new(()),
            sb: self.sb,
            charge: self.charge,
        })
    }
}

/// A filesystem object
pub struct Inode {
    ino: u64,
    kind: InodeKind,
    nlink: AtomicU32,
    state: AtomicU32,
    attr: RwLock<InodeAttr>,
    mapping: AddressSpace,
    /// Serializes naming operations inside a directory
    dir_lock: Mutex<()>,
    sb: Weak<SuperBlock>,
    charge: Charge,
}

impl Inode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    pub fn mode(&self) -> FileMode {
        self.attr.read().mode
    }

    pub fn uid(&self) -> u32 {
        self.attr.read().uid
    }

    pub fn gid(&self) -> u32 {
        self.attr.read().gid
    }

    pub fn attr(&self) -> InodeAttr {
        *self.attr.read()
    }

    pub fn rdev(&self) -> DevId {
        match self.kind {
            InodeKind::Special { rdev, .. } => rdev,
            _ => DevId::NONE,
        }
    }

    pub fn size(&self) -> u64 {
        self.mapping.size()
    }

    pub fn mapping(&self) -> &AddressSpace {
        &self.mapping
    }

    pub fn env(&self) -> &Arc<VfsEnv> {
        self.charge.env()
    }

    /// Owning superblock; gone once the instance is torn down
    pub fn sb(&self) -> FsResult<Arc<SuperBlock>> {
        self.sb.upgrade().ok_or(FsError::NoDevice)
    }

    pub(crate) fn dir_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.dir_lock.lock()
    }

    // Link count

    pub fn nlink(&self) -> u32 {
        self.nlink.load(Ordering::SeqCst)
    }

    pub fn inc_nlink(&self) {
        if self.nlink.fetch_add(1, Ordering::SeqCst) == 0 {
            self.clear_state(InodeState::LINKABLE);
        }
    }

    pub fn drop_nlink(&self) {
        let prev = self
            .nlink
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if prev.is_err() {
            log::warn!("[VFS] drop_nlink on inode {} with no links", self.ino);
        }
    }

    pub fn clear_nlink(&self) {
        self.nlink.store(0, Ordering::SeqCst);
    }

    pub fn set_nlink(&self, nlink: u32) {
        self.nlink.store(nlink, Ordering::SeqCst);
    }

    // State

    pub fn state(&self) -> InodeState {
        InodeState::from_bits_truncate(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, bits: InodeState) {
        self.state.fetch_or(bits.bits(), Ordering::SeqCst);
    }

    pub fn clear_state(&self, bits: InodeState) {
        self.state.fetch_and(!bits.bits(), Ordering::SeqCst);
    }

    // Timestamps

    /// Current time at the superblock's granularity
    pub fn current_time(&self) -> Timespec {
        let gran = self.sb.upgrade().map_or(1, |sb| sb.time_gran());
        self.env().current_time().truncate(gran)
    }

    pub fn set_ctime(&self, now: Timespec) {
        self.attr.write().ctime = now;
    }

    /// Record a change of content: mtime and ctime both move to `now`
    pub fn set_mtime_ctime(&self, now: Timespec) {
        let mut attr = self.attr.write();
        attr.mtime = now;
        attr.ctime = now;
    }

    pub fn set_atime(&self, now: Timespec) {
        self.attr.write().atime = now;
    }

    pub fn stat(&self) -> Stat {
        let attr = self.attr();
        let size = self.size();
        let blksize = self.sb.upgrade().map_or(4096, |sb| sb.block_size());
        Stat {
            st_ino: self.ino,
            st_mode: attr.mode.0 as u32,
            st_nlink: self.nlink(),
            st_uid: attr.uid,
            st_gid: attr.gid,
            st_rdev: self.rdev().0,
            st_size: size,
            st_blksize: blksize,
            st_blocks: (self.mapping.nr_pages() * PAGE_SIZE) as u64 / 512,
            st_atime: attr.atime,
            st_mtime: attr.mtime,
            st_ctime: attr.ctime,
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        log::trace!("[VFS] evicting inode {}", self.ino);
        self.mapping.clear(self.charge.env());
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field("mode", &format_args!("{:o}", self.mode()))
            .field("nlink", &self.nlink())
            .finish()
    }
}
