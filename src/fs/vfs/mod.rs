//! Virtual File System (VFS) Layer
//!
//! Generic machinery shared by every filesystem: nodes, bindings, page
//! storage, mount contexts and the type registry. Filesystems plug in
//! through the operation traits in [`inode`] and [`superblock`].

pub mod dentry;
pub mod env;
pub mod file;
pub mod fs_context;
pub mod inode;
pub mod libfs;
pub mod mapping;
pub mod namei;
pub mod registry;
pub mod superblock;
