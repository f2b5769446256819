//! Library Routines for Simple Filesystems
//!
//! Generic link, unlink, rmdir and rename for filesystems whose whole
//! naming structure lives in the dentry cache, plus the page-backed
//! symlink and file helpers.

use std::sync::Arc;

use super::dentry::{d_drop, d_instantiate, dget, dput, Dentry};
use super::file::File;
use super::inode::{DirEnt, FsError, FsResult, Inode, RenameFlags};
use super::superblock::{StatFs, SuperBlock, NAME_MAX};

/// A directory with no bound children
pub fn simple_empty(dentry: &Dentry) -> bool {
    !dentry.has_children()
}

/// Bind `dentry` in `dir` to the node behind `old_dentry`
pub fn simple_link(
    old_dentry: &Arc<Dentry>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
) -> FsResult<()> {
    let inode = old_dentry.inode().ok_or(FsError::NotFound)?;
    let now = dir.current_time();

    inode.set_ctime(now);
    dir.set_mtime_ctime(now);
    inode.inc_nlink();
    d_instantiate(dentry, inode);
    dget(dentry);
    Ok(())
}

/// Remove the binding `dentry` from `dir`
pub fn simple_unlink(dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()> {
    let inode = dentry.inode().ok_or(FsError::NotFound)?;
    let now = dir.current_time();

    inode.set_ctime(now);
    dir.set_mtime_ctime(now);
    inode.drop_nlink();
    d_drop(dentry);
    dput(dentry);
    Ok(())
}

/// Remove the empty directory `dentry` from `dir`
pub fn simple_rmdir(dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> FsResult<()> {
    if !simple_empty(dentry) {
        return Err(FsError::NotEmpty);
    }
    let inode = dentry.inode().ok_or(FsError::NotFound)?;

    inode.drop_nlink();
    simple_unlink(dir, dentry)?;
    dir.drop_nlink();
    Ok(())
}

fn simple_rename_timestamp(
    old_dir: &Arc<Inode>,
    old_dentry: &Dentry,
    new_dir: &Arc<Inode>,
    new_dentry: &Dentry,
) {
    let now = old_dir.current_time();
    old_dir.set_mtime_ctime(now);
    if !Arc::ptr_eq(old_dir, new_dir) {
        new_dir.set_mtime_ctime(now);
    }
    if let Some(inode) = old_dentry.inode() {
        inode.set_ctime(now);
    }
    if let Some(inode) = new_dentry.inode() {
        inode.set_ctime(now);
    }
}

/// Swap two bindings, fixing up parent link counts
pub fn simple_rename_exchange(
    old_dir: &Arc<Inode>,
    old_dentry: &Arc<Dentry>,
    new_dir: &Arc<Inode>,
    new_dentry: &Arc<Dentry>,
) -> FsResult<()> {
    let old = old_dentry.inode().ok_or(FsError::NotFound)?;
    let new = new_dentry.inode().ok_or(FsError::NotFound)?;
    let old_is_dir = old.is_directory();
    let new_is_dir = new.is_directory();

    if !Arc::ptr_eq(old_dir, new_dir) && old_is_dir != new_is_dir {
        if old_is_dir {
            old_dir.drop_nlink();
            new_dir.inc_nlink();
        } else {
            new_dir.drop_nlink();
            old_dir.inc_nlink();
        }
    }
    simple_rename_timestamp(old_dir, old_dentry, new_dir, new_dentry);
    Ok(())
}

/// Move `old_dentry` to `new_dentry`, replacing whatever is bound there
///
/// The caller moves the binding itself once this returns.
pub fn simple_rename(
    old_dir: &Arc<Inode>,
    old_dentry: &Arc<Dentry>,
    new_dir: &Arc<Inode>,
    new_dentry: &Arc<Dentry>,
    flags: RenameFlags,
) -> FsResult<()> {
    if !(flags - RenameFlags::NOREPLACE - RenameFlags::EXCHANGE).is_empty() {
        return Err(FsError::InvalidArgument);
    }
    if flags.contains(RenameFlags::EXCHANGE) {
        return simple_rename_exchange(old_dir, old_dentry, new_dir, new_dentry);
    }

    let inode = old_dentry.inode().ok_or(FsError::NotFound)?;
    let they_are_dirs = inode.is_directory();

    if let Some(target) = new_dentry.inode() {
        if !simple_empty(new_dentry) {
            return Err(FsError::NotEmpty);
        }
        if they_are_dirs {
            target.drop_nlink();
            old_dir.drop_nlink();
        }
        simple_unlink(new_dir, new_dentry)?;
    } else if they_are_dirs {
        old_dir.drop_nlink();
        new_dir.inc_nlink();
    }

    simple_rename_timestamp(old_dir, old_dentry, new_dir, new_dentry);
    Ok(())
}

/// Filesystem statistics for an instance with no block accounting
pub fn simple_statfs(sb: &SuperBlock) -> StatFs {
    StatFs {
        f_type: sb.magic(),
        f_bsize: sb.block_size() as u64,
        f_blocks: 0,
        f_bfree: 0,
        f_bavail: 0,
        f_files: 0,
        f_ffree: 0,
        f_namelen: NAME_MAX as u64,
    }
}

/// Directory listing straight from the dentry cache: `.`, `..`, then
/// every bound child in name order
pub fn dcache_readdir(dentry: &Arc<Dentry>) -> FsResult<Vec<DirEnt>> {
    let inode = dentry.inode().ok_or(FsError::NotFound)?;
    if !inode.is_directory() {
        return Err(FsError::NotADirectory);
    }
    let parent_ino = dentry
        .parent()
        .and_then(|p| p.inode())
        .map_or(inode.ino(), |p| p.ino());

    let mut entries = vec![
        DirEnt {
            ino: inode.ino(),
            name: String::from("."),
            file_type: DirEnt::DT_DIR,
        },
        DirEnt {
            ino: parent_ino,
            name: String::from(".."),
            file_type: DirEnt::DT_DIR,
        },
    ];
    for child in dentry.children() {
        if let Some(child_inode) = child.inode() {
            entries.push(DirEnt {
                ino: child_inode.ino(),
                name: child.name(),
                file_type: DirEnt::file_type_from_mode(child_inode.mode()),
            });
        }
    }
    inode.set_atime(inode.current_time());
    Ok(entries)
}

/// Store a symlink target in the node's page mapping
///
/// `symname` carries its terminator; the recorded size excludes it.
pub fn page_symlink(inode: &Inode, symname: &[u8]) -> FsResult<()> {
    let len = symname.len();
    if len == 0 {
        return Err(FsError::InvalidArgument);
    }
    inode.mapping().write_at(inode.env(), 0, symname)?;
    inode.mapping().set_size((len - 1) as u64);
    Ok(())
}

/// Read back a symlink target written by [`page_symlink`]
pub fn page_get_link(inode: &Inode) -> FsResult<String> {
    let size = inode.size() as usize;
    let mut buf = vec![0u8; size];
    let n = inode.mapping().read_at(0, &mut buf);
    buf.truncate(n);
    String::from_utf8(buf).map_err(|_| FsError::InvalidArgument)
}

/// Page cache read for regular files
pub fn generic_file_read(file: &File, off: u64, buf: &mut [u8]) -> FsResult<usize> {
    let inode = file.inode()?;
    let n = inode.mapping().read_at(off, buf);
    inode.set_atime(inode.current_time());
    Ok(n)
}

/// Page cache write for regular files, bounded by the instance's maximum
/// file size
pub fn generic_file_write(file: &File, off: u64, buf: &[u8]) -> FsResult<usize> {
    let inode = file.inode()?;
    let max_bytes = inode.sb().map_or(u64::MAX, |sb| sb.max_bytes());
    let end = off.checked_add(buf.len() as u64).ok_or(FsError::FileTooLarge)?;
    if end > max_bytes {
        return Err(FsError::FileTooLarge);
    }

    let n = inode.mapping().write_at(inode.env(), off, buf)?;
    inode.set_mtime_ctime(inode.current_time());
    Ok(n)
}

/// Resize a regular file's content
pub fn simple_setsize(inode: &Inode, size: u64) -> FsResult<()> {
    let max_bytes = inode.sb().map_or(u64::MAX, |sb| sb.max_bytes());
    if size > max_bytes {
        return Err(FsError::FileTooLarge);
    }
    inode.mapping().truncate(inode.env(), size);
    inode.set_mtime_ctime(inode.current_time());
    Ok(())
}
