//! Filesystem Support
//!
//! This module contains the tagfs implementation and the Virtual File System
//! (VFS) layer it is built on.

pub mod block_dev;
pub mod tagfs;
pub mod vfs;

/// Register every built-in filesystem type
pub fn init() {
    log::info!("[VFS] Initializing filesystem types...");

    if let Err(e) = tagfs::init_tagfs_fs() {
        log::warn!("[VFS] Could not register tagfs: {}", e);
    }
}

/// Unregister every built-in filesystem type
pub fn exit() {
    tagfs::exit_tagfs_fs();
}
