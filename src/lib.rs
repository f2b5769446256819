//! tagfs - resizable in-memory filesystem
//!
//! All file data and metadata live in memory. tagfs itself only manages
//! node lifecycle, naming-structure mutations, mount options and the
//! superblock; the generic pieces (bindings, page storage, option parsing,
//! the type registry) come from the small VFS layer in [`fs::vfs`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagfs::fs::{self, vfs};
//!
//! let env = Arc::new(vfs::env::VfsEnv::new());
//! fs::init();
//! let sb = vfs::registry::mount(&env, "tagfs", "mode=0700").unwrap();
//! let root = sb.root().unwrap();
//! vfs::namei::mkdir(&root, "etc", vfs::inode::FileMode::new(0o755)).unwrap();
//! vfs::registry::umount(sb);
//! ```

pub mod fs;

pub use fs::vfs::inode::{FsError, FsResult};
