//! tagfs Regular File Operations
//!
//! File content is nothing but the node's page mapping, so every operation
//! goes straight to the generic page-cache helpers.

use crate::fs::vfs::file::File;
use crate::fs::vfs::inode::{FileOperations, FsResult, Inode};
use crate::fs::vfs::libfs::{generic_file_read, generic_file_write, simple_setsize};

/// Operations attached to every tagfs regular file
pub struct TagfsFileOps;

pub static TAGFS_FILE_OPS: TagfsFileOps = TagfsFileOps;

impl FileOperations for TagfsFileOps {
    fn read(&self, file: &File, off: u64, buf: &mut [u8]) -> FsResult<usize> {
        generic_file_read(file, off, buf)
    }

    fn write(&self, file: &File, off: u64, buf: &[u8]) -> FsResult<usize> {
        generic_file_write(file, off, buf)
    }

    fn truncate(&self, inode: &Inode, size: u64) -> FsResult<()> {
        simple_setsize(inode, size)
    }
}
