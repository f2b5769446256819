//! Filesystem Type Registry
//!
//! This module manages registration and lookup of filesystem types, and the
//! mount/umount entry points that go through it.

use spin::Mutex;
use std::sync::Arc;

use super::env::VfsEnv;
use super::fs_context::{fs_context_for_mount, parse_monolithic, vfs_get_tree};
use super::inode::{FsError, FsResult};
use super::superblock::{deactivate_super, FsType, SuperBlock};

/// Global filesystem type registry
static FS_REGISTRY: Mutex<Vec<Arc<dyn FsType>>> = Mutex::new(Vec::new());

/// Register a filesystem type
///
/// A second type with the same name is refused with [`FsError::Busy`].
pub fn register_filesystem(fs_type: Arc<dyn FsType>) -> FsResult<()> {
    let mut registry = FS_REGISTRY.lock();

    if registry.iter().any(|existing| existing.name() == fs_type.name()) {
        log::warn!("[VFS] Filesystem type '{}' already registered", fs_type.name());
        return Err(FsError::Busy);
    }

    log::info!("[VFS] Registered filesystem type '{}'", fs_type.name());
    registry.push(fs_type);
    Ok(())
}

/// Remove a filesystem type
pub fn unregister_filesystem(name: &str) -> FsResult<()> {
    let mut registry = FS_REGISTRY.lock();

    let Some(index) = registry.iter().position(|t| t.name() == name) else {
        return Err(FsError::NotFound);
    };
    registry.remove(index);
    log::info!("[VFS] Unregistered filesystem type '{}'", name);
    Ok(())
}

/// Lookup a filesystem type by name
pub fn lookup_filesystem(name: &str) -> Option<Arc<dyn FsType>> {
    let registry = FS_REGISTRY.lock();
    registry.iter().find(|t| t.name() == name).cloned()
}

/// List all registered filesystem types
pub fn list_filesystems() -> Vec<Arc<dyn FsType>> {
    let registry = FS_REGISTRY.lock();
    registry.clone()
}

/// Mount a new instance of the type called `type_name`
///
/// `options` is a comma separated `key=value` string.
pub fn mount(env: &Arc<VfsEnv>, type_name: &str, options: &str) -> FsResult<Arc<SuperBlock>> {
    let fs_type = lookup_filesystem(type_name).ok_or(FsError::NoDevice)?;

    let mut fc = fs_context_for_mount(fs_type, Arc::clone(env))?;
    parse_monolithic(&mut fc, options)?;
    vfs_get_tree(&mut fc)?;

    let sb = fc.take_sb().ok_or(FsError::InvalidArgument)?;
    log::info!("[VFS] Mounted {} ({})", type_name, sb.source().unwrap_or("none"));
    Ok(sb)
}

/// Tear down an instance returned by [`mount`]
pub fn umount(sb: Arc<SuperBlock>) {
    log::info!("[VFS] Unmounting {}", sb.fs_type().name());
    deactivate_super(&sb);
}
