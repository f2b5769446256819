//! Name Resolution and Naming Syscalls
//!
//! Path walking over the dentry cache, and the checks every naming
//! operation runs before it reaches the filesystem's
//! [`DirInodeOperations`]. Each mutation holds the parent directory's lock
//! across the existence check and the filesystem call, so concurrent
//! creations in one directory are serialized.

use std::sync::Arc;

use super::dentry::{d_alloc, d_exchange, d_move, Dentry};
use super::file::{File, OpenFlags};
use super::inode::{
    DevId, DirEnt, DirInodeOperations, FileMode, FsError, FsResult, Inode, InodeKind, InodeState,
    RenameFlags,
};
use super::libfs::{dcache_readdir, page_get_link};
use super::superblock::NAME_MAX;

/// Maximum number of symlink hops allowed
const MAX_SYMLINK_HOPS: usize = 40;

/// Maximum path length
const MAX_PATH_LEN: usize = 4096;

/// Validate a single name component
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument);
    }
    if name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Directory inode behind `dentry` and its operations
fn dir_iops(dentry: &Dentry) -> FsResult<(Arc<Inode>, &'static dyn DirInodeOperations)> {
    let inode = dentry.inode().ok_or(FsError::NotFound)?;
    match inode.kind() {
        InodeKind::Directory { iops } => Ok((inode, iops)),
        _ => Err(FsError::NotADirectory),
    }
}

/// Look `name` up in `dir`
pub fn lookup(dir: &Arc<Dentry>, name: &str) -> FsResult<Arc<Dentry>> {
    let inode = dir.inode().ok_or(FsError::NotFound)?;
    if !inode.is_directory() {
        return Err(FsError::NotADirectory);
    }
    match name {
        "." => Ok(Arc::clone(dir)),
        ".." => Ok(dir.parent().unwrap_or_else(|| Arc::clone(dir))),
        _ => {
            if name.len() > NAME_MAX {
                return Err(FsError::NameTooLong);
            }
            dir.lookup_child(name).ok_or(FsError::NotFound)
        }
    }
}

/// Walk `path` from `root`
///
/// Absolute and relative paths are both taken relative to `root`, and `..`
/// never climbs above it. Symlinks met along the way are followed; the
/// final component is followed only with `follow_final`.
pub fn resolve(root: &Arc<Dentry>, path: &str, follow_final: bool) -> FsResult<Arc<Dentry>> {
    let mut hops = 0;
    walk(root, root, path, follow_final, &mut hops)
}

fn walk(
    root: &Arc<Dentry>,
    start: &Arc<Dentry>,
    path: &str,
    follow_final: bool,
    hops: &mut usize,
) -> FsResult<Arc<Dentry>> {
    if path.len() > MAX_PATH_LEN {
        return Err(FsError::NameTooLong);
    }
    if path.contains('\0') {
        return Err(FsError::InvalidArgument);
    }

    let mut cur = if path.starts_with('/') {
        Arc::clone(root)
    } else {
        Arc::clone(start)
    };
    let components: Vec<&str> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();

        let next = if *component == ".." && Arc::ptr_eq(&cur, root) {
            Arc::clone(root)
        } else {
            lookup(&cur, component)?
        };

        let is_symlink = next.inode().is_some_and(|inode| inode.mode().is_symlink());
        if is_symlink && (!is_last || follow_final) {
            *hops += 1;
            if *hops > MAX_SYMLINK_HOPS {
                return Err(FsError::InvalidArgument);
            }
            let target = readlink(&next)?;
            cur = walk(root, &cur, &target, true, hops)?;
        } else {
            cur = next;
        }
    }
    Ok(cur)
}

/// Allocate the negative binding a creation fills in
///
/// Must run under the parent's lock.
fn prepare_new(dir: &Arc<Dentry>, name: &str) -> FsResult<Arc<Dentry>> {
    if dir.lookup_child(name).is_some() {
        return Err(FsError::AlreadyExists);
    }
    d_alloc(dir, name)
}

/// Create a regular file called `name` in `dir`
pub fn create(dir: &Arc<Dentry>, name: &str, mode: FileMode) -> FsResult<Arc<Dentry>> {
    validate_name(name)?;
    let (inode, iops) = dir_iops(dir)?;
    let _guard = inode.dir_lock();

    let dentry = prepare_new(dir, name)?;
    iops.create(&inode, &dentry, mode.with_type(FileMode::S_IFREG), true)?;
    Ok(dentry)
}

/// Create a directory called `name` in `dir`
pub fn mkdir(dir: &Arc<Dentry>, name: &str, mode: FileMode) -> FsResult<Arc<Dentry>> {
    validate_name(name)?;
    let (inode, iops) = dir_iops(dir)?;
    let _guard = inode.dir_lock();

    let dentry = prepare_new(dir, name)?;
    iops.mkdir(&inode, &dentry, mode.with_type(FileMode::S_IFDIR))?;
    Ok(dentry)
}

/// Create a node of any non-directory type
///
/// A mode with no type bits creates a regular file.
pub fn mknod(dir: &Arc<Dentry>, name: &str, mode: FileMode, dev: DevId) -> FsResult<Arc<Dentry>> {
    validate_name(name)?;
    let (inode, iops) = dir_iops(dir)?;

    match mode.file_type() {
        0 | FileMode::S_IFREG => {
            let _guard = inode.dir_lock();
            let dentry = prepare_new(dir, name)?;
            iops.create(&inode, &dentry, mode.with_type(FileMode::S_IFREG), false)?;
            Ok(dentry)
        }
        FileMode::S_IFCHR | FileMode::S_IFBLK | FileMode::S_IFIFO | FileMode::S_IFSOCK => {
            let _guard = inode.dir_lock();
            let dentry = prepare_new(dir, name)?;
            iops.mknod(&inode, &dentry, mode, dev)?;
            Ok(dentry)
        }
        FileMode::S_IFDIR => Err(FsError::NotPermitted),
        _ => Err(FsError::InvalidArgument),
    }
}

/// Create a symlink called `name` pointing at `target`
pub fn symlink(dir: &Arc<Dentry>, name: &str, target: &str) -> FsResult<Arc<Dentry>> {
    validate_name(name)?;
    if target.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    let (inode, iops) = dir_iops(dir)?;
    let _guard = inode.dir_lock();

    let dentry = prepare_new(dir, name)?;
    iops.symlink(&inode, &dentry, target)?;
    Ok(dentry)
}

/// Create an unnamed regular file in `dir`, open through the returned handle
///
/// Unless `flags` has [`OpenFlags::EXCL`], the node may later be given a
/// name with [`link`].
pub fn tmpfile(dir: &Arc<Dentry>, mode: FileMode, flags: OpenFlags) -> FsResult<File> {
    let (inode, iops) = dir_iops(dir)?;
    if !flags.contains(OpenFlags::WRITE) {
        return Err(FsError::InvalidArgument);
    }

    let dentry = d_alloc(dir, "")?;
    let mut file = File::unopened(dentry, flags | OpenFlags::TMPFILE);
    iops.tmpfile(&inode, &mut file, mode.with_type(FileMode::S_IFREG))?;

    if !flags.contains(OpenFlags::EXCL) {
        file.inode()?.set_state(InodeState::LINKABLE);
    }
    Ok(file)
}

/// Give the node behind `old` a second name
pub fn link(old: &Arc<Dentry>, dir: &Arc<Dentry>, name: &str) -> FsResult<Arc<Dentry>> {
    validate_name(name)?;
    let target = old.inode().ok_or(FsError::NotFound)?;
    if target.is_directory() {
        return Err(FsError::NotPermitted);
    }
    let (inode, iops) = dir_iops(dir)?;
    if !Arc::ptr_eq(&target.sb()?, &inode.sb()?) {
        return Err(FsError::NotPermitted);
    }
    let _guard = inode.dir_lock();

    if target.nlink() == 0 && !target.state().contains(InodeState::LINKABLE) {
        return Err(FsError::NotFound);
    }
    let dentry = prepare_new(dir, name)?;
    iops.link(old, &inode, &dentry)?;
    Ok(dentry)
}

/// Remove the non-directory `name` from `dir`
pub fn unlink(dir: &Arc<Dentry>, name: &str) -> FsResult<()> {
    validate_name(name)?;
    let (inode, iops) = dir_iops(dir)?;
    let _guard = inode.dir_lock();

    let dentry = dir.lookup_child(name).ok_or(FsError::NotFound)?;
    if dentry.inode().is_some_and(|i| i.is_directory()) {
        return Err(FsError::IsADirectory);
    }
    iops.unlink(&inode, &dentry)
}

/// Remove the empty directory `name` from `dir`
pub fn rmdir(dir: &Arc<Dentry>, name: &str) -> FsResult<()> {
    match name {
        "." => return Err(FsError::InvalidArgument),
        ".." => return Err(FsError::NotEmpty),
        _ => validate_name(name)?,
    }
    let (inode, iops) = dir_iops(dir)?;
    let _guard = inode.dir_lock();

    let dentry = dir.lookup_child(name).ok_or(FsError::NotFound)?;
    if !dentry.inode().is_some_and(|i| i.is_directory()) {
        return Err(FsError::NotADirectory);
    }
    iops.rmdir(&inode, &dentry)
}

/// Move `old_name` in `old_dir` to `new_name` in `new_dir`
pub fn rename(
    old_dir: &Arc<Dentry>,
    old_name: &str,
    new_dir: &Arc<Dentry>,
    new_name: &str,
    flags: RenameFlags,
) -> FsResult<()> {
    validate_name(old_name)?;
    validate_name(new_name)?;
    if flags.contains(RenameFlags::NOREPLACE | RenameFlags::EXCHANGE) {
        return Err(FsError::InvalidArgument);
    }

    let (old_inode, iops) = dir_iops(old_dir)?;
    let (new_inode, _) = dir_iops(new_dir)?;
    if !Arc::ptr_eq(&old_inode.sb()?, &new_inode.sb()?) {
        return Err(FsError::NotPermitted);
    }

    // Lock both parents, lower inode number first.
    let same_dir = Arc::ptr_eq(&old_inode, &new_inode);
    let (_first, _second) = if same_dir {
        (old_inode.dir_lock(), None)
    } else if old_inode.ino() < new_inode.ino() {
        let first = old_inode.dir_lock();
        (first, Some(new_inode.dir_lock()))
    } else {
        let first = new_inode.dir_lock();
        (first, Some(old_inode.dir_lock()))
    };

    let old = old_dir.lookup_child(old_name).ok_or(FsError::NotFound)?;
    let target = new_dir.lookup_child(new_name);
    let source = old.inode().ok_or(FsError::NotFound)?;

    // Same binding, or two links to the same node: nothing to do.
    if let Some(t) = target.as_ref() {
        let same_node = t.inode().is_some_and(|i| Arc::ptr_eq(&i, &source));
        if Arc::ptr_eq(t, &old) || same_node {
            return Ok(());
        }
    }

    if flags.contains(RenameFlags::EXCHANGE) {
        let target = target.ok_or(FsError::NotFound)?;
        if new_dir.is_subdir_of(&old) || old_dir.is_subdir_of(&target) {
            return Err(FsError::InvalidArgument);
        }
        iops.rename(&old_inode, &old, &new_inode, &target, flags)?;
        d_exchange(&old, &target);
        return Ok(());
    }

    if source.is_directory() && new_dir.is_subdir_of(&old) {
        return Err(FsError::InvalidArgument);
    }
    let new_dentry = match target {
        Some(target) => {
            if flags.contains(RenameFlags::NOREPLACE) {
                return Err(FsError::AlreadyExists);
            }
            let target_is_dir = target.inode().is_some_and(|i| i.is_directory());
            if source.is_directory() && !target_is_dir {
                return Err(FsError::NotADirectory);
            }
            if !source.is_directory() && target_is_dir {
                return Err(FsError::IsADirectory);
            }
            target
        }
        None => d_alloc(new_dir, new_name)?,
    };

    iops.rename(&old_inode, &old, &new_inode, &new_dentry, flags)?;
    d_move(&old, new_dir, new_name);
    Ok(())
}

/// Open the node behind `dentry`
pub fn open(dentry: &Arc<Dentry>, flags: OpenFlags) -> FsResult<File> {
    let inode = dentry.inode().ok_or(FsError::NotFound)?;
    let writable = flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::TRUNC);

    match inode.kind() {
        InodeKind::Directory { .. } if writable => return Err(FsError::IsADirectory),
        InodeKind::RegularFile { fops } if flags.contains(OpenFlags::TRUNC) => {
            if !flags.contains(OpenFlags::WRITE) {
                return Err(FsError::NotPermitted);
            }
            fops.truncate(&inode, 0)?;
        }
        _ => {}
    }

    let mut file = File::unopened(Arc::clone(dentry), flags);
    file.finish_open_simple()?;
    Ok(file)
}

/// Target of the symlink behind `dentry`
pub fn readlink(dentry: &Dentry) -> FsResult<String> {
    let inode = dentry.inode().ok_or(FsError::NotFound)?;
    if !inode.mode().is_symlink() {
        return Err(FsError::InvalidArgument);
    }
    page_get_link(&inode)
}

/// List the directory behind `dentry`
pub fn readdir(dentry: &Arc<Dentry>) -> FsResult<Vec<DirEnt>> {
    dcache_readdir(dentry)
}
