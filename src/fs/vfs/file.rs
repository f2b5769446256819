//! Open Files
//!
//! An open handle on a node. Holding a `File` keeps its node alive even
//! after the last name binding is gone.

use core::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::sync::Arc;

use super::dentry::Dentry;
use super::inode::{FsError, FsResult, Inode, InodeKind};

bitflags::bitflags! {
    /// Open flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
        /// Truncate on open
        const TRUNC = 1 << 3;
        /// With TMPFILE: the node may never be linked in
        const EXCL = 1 << 4;
        const TMPFILE = 1 << 5;
    }
}

impl OpenFlags {
    pub const RDWR: OpenFlags = OpenFlags::READ.union(OpenFlags::WRITE);
}

/// Open file handle
pub struct File {
    dentry: Arc<Dentry>,
    inode: Option<Arc<Inode>>,
    flags: OpenFlags,
    pos: AtomicU64,
}

impl File {
    /// A handle on `dentry` that has not been opened yet
    pub(crate) fn unopened(dentry: Arc<Dentry>, flags: OpenFlags) -> Self {
        Self {
            dentry,
            inode: None,
            flags,
            pos: AtomicU64::new(0),
        }
    }

    /// Finish opening: take the inode the dentry now refers to
    pub fn finish_open_simple(&mut self) -> FsResult<()> {
        let inode = self.dentry.inode().ok_or(FsError::NotFound)?;
        self.inode = Some(inode);
        Ok(())
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    pub fn inode(&self) -> FsResult<&Arc<Inode>> {
        self.inode.as_ref().ok_or(FsError::InvalidArgument)
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_open(&self) -> bool {
        self.inode.is_some()
    }

    pub fn position(&self) -> u64 {
        self.pos.load(Ordering::SeqCst)
    }

    pub fn seek(&self, pos: u64) {
        self.pos.store(pos, Ordering::SeqCst);
    }

    /// Read at the current position and advance it
    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let off = self.position();
        let n = self.read_at(off, buf)?;
        self.pos.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    /// Write at the current position (or the end with APPEND) and advance
    pub fn write(&self, buf: &[u8]) -> FsResult<usize> {
        let off = if self.flags.contains(OpenFlags::APPEND) {
            self.inode()?.size()
        } else {
            self.position()
        };
        let n = self.write_at(off, buf)?;
        self.seek(off + n as u64);
        Ok(n)
    }

    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> FsResult<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(FsError::NotPermitted);
        }
        match self.inode()?.kind() {
            InodeKind::RegularFile { fops } => fops.read(self, off, buf),
            InodeKind::Directory { .. } => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidArgument),
        }
    }

    pub fn write_at(&self, off: u64, buf: &[u8]) -> FsResult<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(FsError::NotPermitted);
        }
        match self.inode()?.kind() {
            InodeKind::RegularFile { fops } => fops.write(self, off, buf),
            InodeKind::Directory { .. } => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidArgument),
        }
    }

    pub fn set_len(&self, size: u64) -> FsResult<()> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(FsError::NotPermitted);
        }
        let inode = self.inode()?;
        match inode.kind() {
            InodeKind::RegularFile { fops } => fops.truncate(inode, size),
            InodeKind::Directory { .. } => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidArgument),
        }
    }

    pub fn fsync(&self) -> FsResult<()> {
        match self.inode()?.kind() {
            InodeKind::RegularFile { fops } => fops.fsync(self),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.dentry.name())
            .field("ino", &self.inode.as_ref().map(|i| i.ino()))
            .field("pos", &self.position())
            .field("flags", &self.flags)
            .finish()
    }
}
