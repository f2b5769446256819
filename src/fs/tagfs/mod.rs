//! tagfs - Resizable In-Memory Filesystem
//!
//! A filesystem with no storage of its own: every node lives in the VFS
//! caches and every byte of content in the page mapping. tagfs supplies the
//! node factory, the directory naming operations and the mount lifecycle.
//! Features:
//! - Regular files, directories, symlinks and device/fifo/socket nodes
//! - Unnamed temporary files
//! - One mount option, `mode`, for the root directory's permissions
//! - Optional block and DAX backing devices held for the instance's lifetime

pub mod file;
pub mod inode;
pub mod super_impl;

use std::sync::Arc;

use crate::fs::vfs::fs_context::{FsContext, FsParameterSpec};
use crate::fs::vfs::inode::FsResult;
use crate::fs::vfs::registry::{register_filesystem, unregister_filesystem};
use crate::fs::vfs::superblock::{FsType, FsTypeFlags, SuperBlock};

pub use inode::tagfs_get_inode;
pub use super_impl::{
    tagfs_init_fs_context, tagfs_kill_sb, TagfsFsInfo, TagfsMountOpts, TAGFS_DEFAULT_MODE,
    TAGFS_FS_PARAMETERS,
};

/// Filesystem type name
pub const TAGFS_NAME: &str = "tagfs";

/// Magic number reported by statfs ("tagf")
pub const TAGFS_MAGIC: u64 = 0x7461_6766;

/// tagfs filesystem type
pub struct TagfsType;

impl FsType for TagfsType {
    fn name(&self) -> &'static str {
        TAGFS_NAME
    }

    fn fs_flags(&self) -> FsTypeFlags {
        FsTypeFlags::USERNS_MOUNT
    }

    fn parameters(&self) -> &'static [FsParameterSpec] {
        &TAGFS_FS_PARAMETERS
    }

    fn init_fs_context(&self, fc: &mut FsContext) -> FsResult<()> {
        tagfs_init_fs_context(fc)
    }

    fn kill_sb(&self, sb: &Arc<SuperBlock>) {
        tagfs_kill_sb(sb)
    }
}

/// Register tagfs with the filesystem registry
pub fn init_tagfs_fs() -> FsResult<()> {
    log::info!("[TAGFS] init_tagfs_fs");
    // One line per level, to see which ones reach the console.
    log::trace!("[TAGFS] init_tagfs_fs: TRACE");
    log::debug!("[TAGFS] init_tagfs_fs: DEBUG");
    log::info!("[TAGFS] init_tagfs_fs: INFO");
    log::warn!("[TAGFS] init_tagfs_fs: WARN");
    log::error!("[TAGFS] init_tagfs_fs: ERROR");

    register_filesystem(Arc::new(TagfsType))
}

/// Remove tagfs from the filesystem registry
pub fn exit_tagfs_fs() {
    log::info!("[TAGFS] exit_tagfs_fs");
    if let Err(e) = unregister_filesystem(TAGFS_NAME) {
        log::warn!("[TAGFS] exit_tagfs_fs: {}", e);
        return;
    }
    log::info!("[TAGFS] exit_tagfs_fs: unregistered");
}
