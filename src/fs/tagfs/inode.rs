//! tagfs Node Factory and Directory Operations

use std::sync::Arc;

use super::file::TAGFS_FILE_OPS;
use crate::fs::vfs::dentry::{d_instantiate, d_tmpfile, dget, Dentry};
use crate::fs::vfs::file::File;
use crate::fs::vfs::inode::{
    init_special_inode, new_inode, DevId, DirInodeOperations, FileMode, FsError, FsResult, Inode,
    InodeKind, RenameFlags,
};
use crate::fs::vfs::libfs::{page_symlink, simple_link, simple_rename, simple_rmdir, simple_unlink};
use crate::fs::vfs::mapping::MappingFlags;
use crate::fs::vfs::superblock::SuperBlock;

/// Allocate and initialize a node of type `mode`
///
/// Ownership follows the caller's credentials and a setgid `dir`. All three
/// timestamps start out equal. Directories start with two links, every
/// other kind with one. Fails with [`FsError::NoSpace`] when no node can be
/// allocated.
pub fn tagfs_get_inode(
    sb: &Arc<SuperBlock>,
    dir: Option<&Inode>,
    mode: FileMode,
    dev: DevId,
) -> FsResult<Arc<Inode>> {
    let Some(mut inode) = new_inode(sb) else {
        log::debug!("[TAGFS] no inode for mode {:o}", mode);
        return Err(FsError::NoSpace);
    };

    inode.ino = sb.env().next_ino();
    inode.init_owner(dir, mode);
    inode
        .mapping
        .set_flags(MappingFlags::UNEVICTABLE | MappingFlags::GFP_HIGHUSER);
    let now = inode.current_time();
    inode.attr.atime = now;
    inode.attr.mtime = now;
    inode.attr.ctime = now;

    let kind = match mode.file_type() {
        FileMode::S_IFREG => InodeKind::RegularFile {
            fops: &TAGFS_FILE_OPS,
        },
        FileMode::S_IFDIR => {
            // "." counts as a link
            inode.inc_nlink();
            InodeKind::Directory {
                iops: &TAGFS_DIR_INODE_OPS,
            }
        }
        FileMode::S_IFLNK => {
            inode.mapping.clear_flags(MappingFlags::GFP_HIGHUSER);
            InodeKind::Symlink
        }
        _ => init_special_inode(inode.ino, mode, dev)?,
    };

    log::trace!("[TAGFS] new inode {} ({:?})", inode.ino, kind);
    Ok(inode.finish(kind))
}

/// Directory operations of tagfs
pub struct TagfsDirInodeOps;

pub static TAGFS_DIR_INODE_OPS: TagfsDirInodeOps = TagfsDirInodeOps;

/// Bind `inode` to `dentry`, pin it, and stamp the parent
fn tagfs_instantiate(dir: &Inode, dentry: &Arc<Dentry>, inode: Arc<Inode>) {
    d_instantiate(dentry, inode);
    // Extra count: the binding stays in core until unlinked
    dget(dentry);
    dir.set_mtime_ctime(dir.current_time());
}

impl DirInodeOperations for TagfsDirInodeOps {
    fn create(
        &self,
        dir: &Arc<Inode>,
        dentry: &Arc<Dentry>,
        mode: FileMode,
        _excl: bool,
    ) -> FsResult<()> {
        self.mknod(dir, dentry, mode.with_type(FileMode::S_IFREG), DevId::NONE)
    }

    fn mkdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: FileMode) -> FsResult<()> {
        self.mknod(dir, dentry, mode.with_type(FileMode::S_IFDIR), DevId::NONE)?;
        dir.inc_nlink();
        Ok(())
    }

    fn mknod(
        &self,
        dir: &Arc<Inode>,
        dentry: &Arc<Dentry>,
        mode: FileMode,
        dev: DevId,
    ) -> FsResult<()> {
        let sb = dir.sb()?;
        let inode = tagfs_get_inode(&sb, Some(dir.as_ref()), mode, dev)?;
        tagfs_instantiate(dir, dentry, inode);
        Ok(())
    }

    fn symlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &str) -> FsResult<()> {
        let sb = dir.sb()?;
        let mode = FileMode::new(FileMode::S_IFLNK | FileMode::S_IRWXUGO);
        let inode = tagfs_get_inode(&sb, Some(dir.as_ref()), mode, DevId::NONE)?;

        let mut symname = Vec::with_capacity(target.len() + 1);
        symname.extend_from_slice(target.as_bytes());
        symname.push(0);

        if let Err(e) = page_symlink(&inode, &symname) {
            log::debug!("[TAGFS] symlink {}: {}", dentry.name(), e);
            drop(inode);
            return Err(e);
        }
        tagfs_instantiate(dir, dentry, inode);
        Ok(())
    }

    fn tmpfile(&self, dir: &Arc<Inode>, file: &mut File, mode: FileMode) -> FsResult<()> {
        let sb = dir.sb()?;
        let inode = tagfs_get_inode(&sb, Some(dir.as_ref()), mode, DevId::NONE)?;
        d_tmpfile(file, inode);
        file.finish_open_simple()
    }

    fn link(
        &self,
        old_dentry: &Arc<Dentry>,
        dir: &Arc<Inode>,
        dentry: &Arc<Dentry>,
    ) -> FsResult<()> {
        simple_link(old_dentry, dir, dentry)
    }

    fn unlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()> {
        simple_unlink(dir, dentry)
    }

    fn rmdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()> {
        simple_rmdir(dir, dentry)
    }

    fn rename(
        &self,
        old_dir: &Arc<Inode>,
        old_dentry: &Arc<Dentry>,
        new_dir: &Arc<Inode>,
        new_dentry: &Arc<Dentry>,
        flags: RenameFlags,
    ) -> FsResult<()> {
        simple_rename(old_dir, old_dentry, new_dir, new_dentry, flags)
    }
}
