//! Superblock and Filesystem Types
//!
//! This module defines the mounted filesystem instance, the FsType trait a
//! filesystem implements to be registered and mounted, and the per-instance
//! operation table.

use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::RwLock;
use std::sync::Arc;

use super::dentry::{d_genocide, dput, Dentry};
use super::env::{VfsEnv, PAGE_SHIFT, PAGE_SIZE};
use super::fs_context::{FsContext, FsParameterSpec};
use super::inode::FsResult;
use super::libfs::simple_statfs;

/// Longest name a binding may carry
pub const NAME_MAX: usize = 255;

/// Filesystem type trait for registration and mounting
pub trait FsType: Send + Sync {
    /// Returns the filesystem type name (e.g., "tagfs")
    fn name(&self) -> &'static str;

    fn fs_flags(&self) -> FsTypeFlags {
        FsTypeFlags::empty()
    }

    /// Mount options the type understands
    fn parameters(&self) -> &'static [FsParameterSpec] {
        &[]
    }

    /// Prepare a fresh mount context: allocate private state and install
    /// the context operations
    fn init_fs_context(&self, fc: &mut FsContext) -> FsResult<()>;

    /// Tear down an instance. Called exactly once per superblock.
    fn kill_sb(&self, sb: &Arc<SuperBlock>);
}

bitflags::bitflags! {
    /// Filesystem type flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsTypeFlags: u32 {
        /// Needs a block device to mount
        const REQUIRES_DEV = 1 << 0;
        /// Mountable inside a user namespace
        const USERNS_MOUNT = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Mount flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MountFlags: u64 {
        const MS_RDONLY = 1 << 0;
        const MS_NOSUID = 1 << 1;
        const MS_NODEV = 1 << 2;
        const MS_NOEXEC = 1 << 3;
        const MS_SYNCHRONOUS = 1 << 4;
        const MS_SILENT = 1 << 15;
    }
}

/// Filesystem statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    /// Filesystem type
    pub f_type: u64,
    /// Optimal transfer block size
    pub f_bsize: u64,
    /// Total data blocks in filesystem
    pub f_blocks: u64,
    /// Free blocks in filesystem
    pub f_bfree: u64,
    /// Free blocks available to unprivileged user
    pub f_bavail: u64,
    /// Total file nodes in filesystem
    pub f_files: u64,
    /// Free file nodes in filesystem
    pub f_ffree: u64,
    /// Maximum length of filenames
    pub f_namelen: u64,
}

/// Operations on a mounted instance
pub trait SuperOperations: Send + Sync {
    fn statfs(&self, sb: &SuperBlock) -> StatFs {
        simple_statfs(sb)
    }

    /// Append the instance's non-default options to `out`
    fn show_options(&self, _out: &mut String, _root: &Arc<Dentry>) -> FsResult<()> {
        Ok(())
    }
}

struct DefaultSuperOps;

impl SuperOperations for DefaultSuperOps {}

static DEFAULT_SUPER_OPS: DefaultSuperOps = DefaultSuperOps;

/// Geometry and limits of an instance, set by `fill_super`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperParams {
    /// Largest file size
    pub max_bytes: u64,
    pub block_size: u32,
    pub block_size_bits: u8,
    pub magic: u64,
    /// Timestamp granularity in nanoseconds
    pub time_gran: u32,
    pub flags: MountFlags,
}

impl Default for SuperParams {
    fn default() -> Self {
        Self {
            max_bytes: u64::MAX,
            block_size: PAGE_SIZE as u32,
            block_size_bits: PAGE_SHIFT as u8,
            magic: 0,
            time_gran: 1,
            flags: MountFlags::empty(),
        }
    }
}

/// A mounted filesystem instance
pub struct SuperBlock {
    fs_type: Arc<dyn FsType>,
    env: Arc<VfsEnv>,
    source: Option<String>,
    params: RwLock<SuperParams>,
    ops: RwLock<&'static dyn SuperOperations>,
    root: RwLock<Option<Arc<Dentry>>>,
    /// Filesystem private data
    fs_info: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    dying: AtomicBool,
}

impl SuperBlock {
    /// Allocate an empty instance of `fs_type`
    pub fn new(
        fs_type: Arc<dyn FsType>,
        env: Arc<VfsEnv>,
        source: Option<String>,
        flags: MountFlags,
    ) -> Arc<Self> {
        Arc::new(Self {
            fs_type,
            env,
            source,
            params: RwLock::new(SuperParams {
                flags,
                ..SuperParams::default()
            }),
            ops: RwLock::new(&DEFAULT_SUPER_OPS),
            root: RwLock::new(None),
            fs_info: RwLock::new(None),
            dying: AtomicBool::new(false),
        })
    }

    pub fn fs_type(&self) -> &Arc<dyn FsType> {
        &self.fs_type
    }

    pub fn env(&self) -> &Arc<VfsEnv> {
        &self.env
    }

    /// Source the instance was mounted from, if any
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn params(&self) -> SuperParams {
        *self.params.read()
    }

    pub fn update_params(&self, f: impl FnOnce(&mut SuperParams)) {
        let mut params = self.params.write();
        f(&mut *params);
    }

    pub fn max_bytes(&self) -> u64 {
        self.params.read().max_bytes
    }

    pub fn block_size(&self) -> u32 {
        self.params.read().block_size
    }

    pub fn block_size_bits(&self) -> u8 {
        self.params.read().block_size_bits
    }

    pub fn magic(&self) -> u64 {
        self.params.read().magic
    }

    pub fn time_gran(&self) -> u32 {
        self.params.read().time_gran
    }

    pub fn flags(&self) -> MountFlags {
        self.params.read().flags
    }

    pub fn ops(&self) -> &'static dyn SuperOperations {
        *self.ops.read()
    }

    pub fn set_ops(&self, ops: &'static dyn SuperOperations) {
        *self.ops.write() = ops;
    }

    /// Root binding; `None` before `fill_super` and after teardown
    pub fn root(&self) -> Option<Arc<Dentry>> {
        self.root.read().clone()
    }

    pub fn set_root(&self, root: Arc<Dentry>) {
        *self.root.write() = Some(root);
    }

    fn take_root(&self) -> Option<Arc<Dentry>> {
        self.root.write().take()
    }

    /// Private data of the filesystem, if it is a `T`
    pub fn fs_info<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let info = self.fs_info.read().clone()?;
        info.downcast::<T>().ok()
    }

    pub fn set_fs_info(&self, info: Arc<dyn Any + Send + Sync>) {
        *self.fs_info.write() = Some(info);
    }

    /// Detach the private data from the instance
    pub fn take_fs_info(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.fs_info.write().take()
    }

    pub fn statfs(&self) -> StatFs {
        self.ops().statfs(self)
    }

    /// Options that differ from the defaults, as `,key=value` pairs
    pub fn show_options(&self) -> FsResult<String> {
        let mut out = String::new();
        if let Some(root) = self.root() {
            self.ops().show_options(&mut out, &root)?;
        }
        Ok(out)
    }

    /// Has teardown started
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SuperBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperBlock")
            .field("type", &self.fs_type.name())
            .field("source", &self.source)
            .field("params", &self.params())
            .finish()
    }
}

/// Drop every pinned binding, then the root
///
/// For filesystems whose whole tree lives in the dentry cache.
pub fn kill_litter_super(sb: &SuperBlock) {
    if let Some(root) = sb.take_root() {
        d_genocide(&root);
        dput(&root);
    }
    log::debug!("[VFS] {} instance torn down", sb.fs_type.name());
}

/// Release an instance: runs the type's `kill_sb` the first time only
pub fn deactivate_super(sb: &Arc<SuperBlock>) {
    if sb.dying.swap(true, Ordering::SeqCst) {
        return;
    }
    log::debug!("[VFS] Deactivating {} instance", sb.fs_type.name());
    let fs_type = Arc::clone(&sb.fs_type);
    fs_type.kill_sb(sb);
}
