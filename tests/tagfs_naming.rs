//! tagfs Naming Operation Tests
//!
//! This test suite verifies the directory naming operations.
//!
//! Test cases:
//! - mkdir/rmdir link count bookkeeping on the parent
//! - Parent mtime/ctime updates on every successful mutation
//! - Symlink round trip, including the empty target
//! - tmpfile: unnamed node, later linkable unless exclusive
//! - link/unlink link counts and node release
//! - rename: plain, over a target, NOREPLACE, EXCHANGE, into own subtree
//! - readdir ordering
//! - Name validation and path resolution
//! - Concurrent creations under one parent

#![cfg(test)]

use core::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tagfs::fs::tagfs::TagfsType;
use tagfs::fs::vfs::dentry::Dentry;
use tagfs::fs::vfs::env::{AllocKind, Clock, Timespec, Unlimited, VfsEnv};
use tagfs::fs::vfs::file::OpenFlags;
use tagfs::fs::vfs::fs_context::{fs_context_for_mount, vfs_get_tree};
use tagfs::fs::vfs::inode::{DirEnt, FileMode, FsError, RenameFlags};
use tagfs::fs::vfs::namei;
use tagfs::fs::vfs::superblock::{deactivate_super, SuperBlock};

/// Advances one second on every reading
struct TickClock(AtomicI64);

impl Clock for TickClock {
    fn now(&self) -> Timespec {
        Timespec::new(self.0.fetch_add(1, Ordering::SeqCst), 0)
    }
}

fn ticking_env() -> Arc<VfsEnv> {
    Arc::new(VfsEnv::with_parts(
        Arc::new(TickClock(AtomicI64::new(1))),
        Arc::new(Unlimited),
    ))
}

fn mount(env: &Arc<VfsEnv>) -> (Arc<SuperBlock>, Arc<Dentry>) {
    let mut fc = fs_context_for_mount(Arc::new(TagfsType), Arc::clone(env)).unwrap();
    vfs_get_tree(&mut fc).unwrap();
    let sb = fc.take_sb().unwrap();
    let root = sb.root().unwrap();
    (sb, root)
}

fn nlink(dentry: &Dentry) -> u32 {
    dentry.inode().unwrap().nlink()
}

/// Test mkdir link counts
///
/// Verifies that:
/// 1. Successful mkdir raises the parent's link count by one
/// 2. Other creations leave it unchanged
/// 3. rmdir gives the link back
#[test]
fn test_mkdir_parent_link_count() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);
    assert_eq!(nlink(&root), 2);

    namei::mkdir(&root, "a", FileMode::new(0o755)).unwrap();
    assert_eq!(nlink(&root), 3);

    namei::create(&root, "f", FileMode::new(0o644)).unwrap();
    namei::symlink(&root, "l", "f").unwrap();
    namei::mknod(&root, "p", FileMode::new(FileMode::S_IFIFO | 0o644), Default::default()).unwrap();
    assert_eq!(nlink(&root), 3);

    namei::rmdir(&root, "a").unwrap();
    assert_eq!(nlink(&root), 2);
    assert_eq!(namei::lookup(&root, "a").unwrap_err(), FsError::NotFound);

    deactivate_super(&sb);
}

/// Test parent timestamps
///
/// Verifies that:
/// 1. Every creation moves the parent's mtime and ctime forward together
/// 2. The child's own timestamps are all equal
#[test]
fn test_parent_times_updated() {
    let env = ticking_env();
    let (sb, root) = mount(&env);
    let dir = root.inode().unwrap();

    let mut last = dir.attr().mtime;
    for name in ["f", "d", "l"] {
        match name {
            "f" => drop(namei::create(&root, name, FileMode::new(0o644)).unwrap()),
            "d" => drop(namei::mkdir(&root, name, FileMode::new(0o755)).unwrap()),
            _ => drop(namei::symlink(&root, name, "f").unwrap()),
        }
        let attr = dir.attr();
        assert!(attr.mtime > last, "{}", name);
        assert_eq!(attr.mtime, attr.ctime);
        last = attr.mtime;
    }

    deactivate_super(&sb);
}

/// Test symlink round trip
///
/// Verifies that:
/// 1. The target reads back byte for byte
/// 2. The size excludes the terminator
/// 3. An empty target round trips
/// 4. Symlinks get mode 0777
#[test]
fn test_symlink_round_trip() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let target = "../some/where/else";
    let link = namei::symlink(&root, "link", target).unwrap();
    assert_eq!(namei::readlink(&link).unwrap(), target);
    let inode = link.inode().unwrap();
    assert_eq!(inode.size(), target.len() as u64);
    assert_eq!(inode.mode().permissions(), 0o777);

    let empty = namei::symlink(&root, "empty", "").unwrap();
    assert_eq!(namei::readlink(&empty).unwrap(), "");
    assert_eq!(empty.inode().unwrap().size(), 0);

    let file = namei::create(&root, "plain", FileMode::new(0o644)).unwrap();
    assert_eq!(namei::readlink(&file).unwrap_err(), FsError::InvalidArgument);

    deactivate_super(&sb);
}

/// Test path resolution through symlinks
///
/// Verifies that:
/// 1. Intermediate symlinks are followed
/// 2. The final symlink is followed only on request
/// 3. `..` never climbs above the root
/// 4. Symlink loops are cut off
#[test]
fn test_resolve() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let usr = namei::mkdir(&root, "usr", FileMode::new(0o755)).unwrap();
    let lib = namei::mkdir(&usr, "lib", FileMode::new(0o755)).unwrap();
    namei::symlink(&root, "lib", "usr/lib").unwrap();
    namei::create(&lib, "libc.so", FileMode::new(0o755)).unwrap();

    let found = namei::resolve(&root, "/lib/libc.so", true).unwrap();
    assert_eq!(found.name(), "libc.so");
    assert!(Arc::ptr_eq(&found.parent().unwrap(), &lib));

    let unfollowed = namei::resolve(&root, "/lib", false).unwrap();
    assert!(unfollowed.inode().unwrap().mode().is_symlink());
    let followed = namei::resolve(&root, "/lib", true).unwrap();
    assert!(Arc::ptr_eq(&followed, &lib));

    let up = namei::resolve(&root, "/../../usr/./lib/..", true).unwrap();
    assert!(Arc::ptr_eq(&up, &usr));

    namei::symlink(&root, "loop", "loop").unwrap();
    assert_eq!(namei::resolve(&root, "/loop", true).unwrap_err(), FsError::InvalidArgument);
    assert_eq!(namei::resolve(&root, "/missing", true).unwrap_err(), FsError::NotFound);
    assert_eq!(
        namei::resolve(&root, "/usr/lib/libc.so/x", true).unwrap_err(),
        FsError::NotADirectory
    );

    deactivate_super(&sb);
}

/// Test temporary files
///
/// Verifies that:
/// 1. The node has link count 0 and is not bound in the directory
/// 2. It stays usable through the open handle
/// 3. It can be linked in unless opened exclusive
#[test]
fn test_tmpfile() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let file = namei::tmpfile(&root, FileMode::new(0o600), OpenFlags::RDWR).unwrap();
    let inode = Arc::clone(file.inode().unwrap());
    assert_eq!(inode.nlink(), 0);
    assert!(!root.has_children());
    assert_eq!(file.write(b"scratch").unwrap(), 7);

    let named = namei::link(file.dentry(), &root, "kept").unwrap();
    assert_eq!(inode.nlink(), 1);
    assert!(Arc::ptr_eq(&named.inode().unwrap(), &inode));
    drop(file);
    drop(named);

    let reopened = namei::open(&namei::lookup(&root, "kept").unwrap(), OpenFlags::READ).unwrap();
    let mut buf = [0u8; 7];
    assert_eq!(reopened.read(&mut buf).unwrap(), 7);
    assert_eq!(&buf, b"scratch");

    let excl_flags = OpenFlags::RDWR | OpenFlags::EXCL;
    let excl = namei::tmpfile(&root, FileMode::new(0o600), excl_flags).unwrap();
    assert_eq!(
        namei::link(excl.dentry(), &root, "nope").unwrap_err(),
        FsError::NotFound
    );

    let live = env.live(AllocKind::Inode);
    drop(excl);
    assert_eq!(env.live(AllocKind::Inode), live - 1);

    deactivate_super(&sb);
}

/// Test hard links and unlink
///
/// Verifies that:
/// 1. link raises the node's link count, unlink lowers it
/// 2. The node is released once the last name and handle are gone
/// 3. Directories cannot be hard linked or unlinked
#[test]
fn test_link_unlink() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);
    let baseline = env.live(AllocKind::Inode);

    let file = namei::create(&root, "a", FileMode::new(0o644)).unwrap();
    namei::link(&file, &root, "b").unwrap();
    assert_eq!(nlink(&file), 2);
    drop(file);
    assert_eq!(env.live(AllocKind::Inode), baseline + 1);

    namei::unlink(&root, "a").unwrap();
    let b = namei::lookup(&root, "b").unwrap();
    assert_eq!(nlink(&b), 1);
    drop(b);

    namei::unlink(&root, "b").unwrap();
    assert_eq!(env.live(AllocKind::Inode), baseline);
    assert_eq!(namei::unlink(&root, "b").unwrap_err(), FsError::NotFound);

    let dir = namei::mkdir(&root, "d", FileMode::new(0o755)).unwrap();
    assert_eq!(namei::link(&dir, &root, "d2").unwrap_err(), FsError::NotPermitted);
    assert_eq!(namei::unlink(&root, "d").unwrap_err(), FsError::IsADirectory);

    deactivate_super(&sb);
}

/// Test rmdir
///
/// Verifies that:
/// 1. Non-empty directories are refused
/// 2. Non-directories are refused
/// 3. `.` and `..` are refused
#[test]
fn test_rmdir_rules() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let dir = namei::mkdir(&root, "d", FileMode::new(0o755)).unwrap();
    namei::create(&dir, "f", FileMode::new(0o644)).unwrap();
    assert_eq!(namei::rmdir(&root, "d").unwrap_err(), FsError::NotEmpty);
    assert_eq!(namei::rmdir(&dir, "f").unwrap_err(), FsError::NotADirectory);
    assert_eq!(namei::rmdir(&root, ".").unwrap_err(), FsError::InvalidArgument);
    assert_eq!(namei::rmdir(&root, "..").unwrap_err(), FsError::NotEmpty);

    namei::unlink(&dir, "f").unwrap();
    namei::rmdir(&root, "d").unwrap();
    assert_eq!(dir.inode().unwrap().nlink(), 0);
    assert_eq!(nlink(&root), 2);

    deactivate_super(&sb);
}

/// Test rename
///
/// Verifies that:
/// 1. A plain rename moves the binding
/// 2. Moving a directory across parents moves one link between them
/// 3. Replacing a file drops the old node
/// 4. NOREPLACE refuses an existing target
/// 5. A directory cannot move into its own subtree
/// 6. Type mismatches and non-empty targets are refused
/// 7. Renaming one hard link onto another link of the same node changes nothing
#[test]
fn test_rename() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let a = namei::mkdir(&root, "a", FileMode::new(0o755)).unwrap();
    let b = namei::mkdir(&root, "b", FileMode::new(0o755)).unwrap();
    let x = namei::mkdir(&a, "x", FileMode::new(0o755)).unwrap();
    assert_eq!((nlink(&a), nlink(&b)), (3, 2));

    namei::rename(&a, "x", &b, "y", RenameFlags::empty()).unwrap();
    assert_eq!((nlink(&a), nlink(&b)), (2, 3));
    assert_eq!(x.name(), "y");
    assert!(Arc::ptr_eq(&x.parent().unwrap(), &b));
    assert_eq!(namei::lookup(&a, "x").unwrap_err(), FsError::NotFound);

    assert_eq!(
        namei::rename(&root, "b", &x, "inside", RenameFlags::empty()).unwrap_err(),
        FsError::InvalidArgument
    );

    let baseline = env.live(AllocKind::Inode);
    namei::create(&root, "old", FileMode::new(0o644)).unwrap();
    namei::create(&root, "new", FileMode::new(0o644)).unwrap();
    assert_eq!(
        namei::rename(&root, "old", &root, "new", RenameFlags::NOREPLACE).unwrap_err(),
        FsError::AlreadyExists
    );
    namei::rename(&root, "old", &root, "new", RenameFlags::empty()).unwrap();
    assert_eq!(env.live(AllocKind::Inode), baseline + 1);
    assert_eq!(namei::lookup(&root, "old").unwrap_err(), FsError::NotFound);

    assert_eq!(
        namei::rename(&root, "new", &root, "a", RenameFlags::empty()).unwrap_err(),
        FsError::IsADirectory
    );
    assert_eq!(
        namei::rename(&root, "a", &root, "new", RenameFlags::empty()).unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        namei::rename(&root, "a", &root, "b", RenameFlags::empty()).unwrap_err(),
        FsError::NotEmpty
    );

    // Replacing an empty directory
    namei::rmdir(&b, "y").unwrap();
    namei::rename(&root, "a", &root, "b", RenameFlags::empty()).unwrap();
    assert_eq!(nlink(&root), 3);
    assert!(Arc::ptr_eq(&namei::lookup(&root, "b").unwrap(), &a));

    let first = namei::create(&root, "first", FileMode::new(0o644)).unwrap();
    let second = namei::link(&first, &root, "second").unwrap();
    namei::rename(&root, "first", &root, "second", RenameFlags::empty()).unwrap();
    assert!(Arc::ptr_eq(&namei::lookup(&root, "first").unwrap(), &first));
    assert!(Arc::ptr_eq(&namei::lookup(&root, "second").unwrap(), &second));
    assert_eq!(nlink(&first), 2);

    deactivate_super(&sb);
}

/// Test rename exchange
///
/// Verifies that:
/// 1. Both bindings swap
/// 2. Swapping a directory with a file across parents fixes link counts
/// 3. A missing target is refused
#[test]
fn test_rename_exchange() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    let p = namei::mkdir(&root, "p", FileMode::new(0o755)).unwrap();
    let q = namei::mkdir(&root, "q", FileMode::new(0o755)).unwrap();
    let file = namei::create(&p, "f", FileMode::new(0o644)).unwrap();
    let dir = namei::mkdir(&q, "d", FileMode::new(0o755)).unwrap();
    assert_eq!((nlink(&p), nlink(&q)), (2, 3));

    namei::rename(&p, "f", &q, "d", RenameFlags::EXCHANGE).unwrap();
    assert_eq!((nlink(&p), nlink(&q)), (3, 2));
    assert!(Arc::ptr_eq(&namei::lookup(&p, "f").unwrap(), &dir));
    assert!(Arc::ptr_eq(&namei::lookup(&q, "d").unwrap(), &file));

    assert_eq!(
        namei::rename(&p, "f", &q, "missing", RenameFlags::EXCHANGE).unwrap_err(),
        FsError::NotFound
    );
    let both = RenameFlags::EXCHANGE | RenameFlags::NOREPLACE;
    assert_eq!(
        namei::rename(&p, "f", &q, "d", both).unwrap_err(),
        FsError::InvalidArgument
    );

    deactivate_super(&sb);
}

/// Test readdir
///
/// Verifies that:
/// 1. `.` and `..` come first
/// 2. Bindings follow in name order with their types
#[test]
fn test_readdir() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    namei::create(&root, "zeta", FileMode::new(0o644)).unwrap();
    namei::mkdir(&root, "alpha", FileMode::new(0o755)).unwrap();
    namei::symlink(&root, "mid", "zeta").unwrap();

    let entries = namei::readdir(&root).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, [".", "..", "alpha", "mid", "zeta"]);
    let types: Vec<u8> = entries.iter().map(|e| e.file_type).collect();
    assert_eq!(
        types,
        [DirEnt::DT_DIR, DirEnt::DT_DIR, DirEnt::DT_DIR, DirEnt::DT_LNK, DirEnt::DT_REG]
    );

    let file = namei::lookup(&root, "zeta").unwrap();
    assert_eq!(namei::readdir(&file).unwrap_err(), FsError::NotADirectory);

    deactivate_super(&sb);
}

/// Test name validation
///
/// Verifies that:
/// 1. Empty names, `.`, `..`, slashes and NULs are refused
/// 2. Names over 255 bytes are refused
/// 3. Duplicate names are refused and nothing is created
#[test]
fn test_name_validation() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);
    let mode = FileMode::new(0o644);

    for bad in ["", ".", "..", "a/b", "nul\0"] {
        assert_eq!(namei::create(&root, bad, mode).unwrap_err(), FsError::InvalidArgument);
    }
    let long = "x".repeat(256);
    assert_eq!(namei::create(&root, &long, mode).unwrap_err(), FsError::NameTooLong);
    namei::create(&root, &"x".repeat(255), mode).unwrap();

    namei::create(&root, "dup", mode).unwrap();
    let live = env.live(AllocKind::Inode);
    assert_eq!(namei::create(&root, "dup", mode).unwrap_err(), FsError::AlreadyExists);
    assert_eq!(namei::mkdir(&root, "dup", mode).unwrap_err(), FsError::AlreadyExists);
    assert_eq!(env.live(AllocKind::Inode), live);

    assert_eq!(
        namei::mknod(&root, "dir", FileMode::new(FileMode::S_IFDIR | 0o755), Default::default())
            .unwrap_err(),
        FsError::NotPermitted
    );

    deactivate_super(&sb);
}

/// Test concurrent creation
///
/// Verifies that:
/// 1. Racing mkdir calls on one name produce exactly one directory
/// 2. Every loser sees AlreadyExists
/// 3. The parent's link count rises by exactly one per round
#[test]
fn test_concurrent_mkdir_same_name() {
    const THREADS: usize = 8;
    const ROUNDS: u32 = 50;

    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);

    for round in 0..ROUNDS {
        let name = format!("dir{}", round);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| s.spawn(|| namei::mkdir(&root, &name, FileMode::new(0o755))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {}", round);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(*err, FsError::AlreadyExists);
        }
        assert_eq!(nlink(&root), 2 + round + 1);
    }

    deactivate_super(&sb);
}

/// Test binding pins
///
/// Verifies that:
/// 1. The root and every created binding hold one pin
/// 2. Removing a binding drops its pin without going below zero
/// 3. Unmounting unpins the root
#[test]
fn test_binding_pins() {
    let env = Arc::new(VfsEnv::new());
    let (sb, root) = mount(&env);
    assert_eq!(root.pin_count(), 1);

    let file = namei::create(&root, "f", FileMode::new(0o644)).unwrap();
    let dir = namei::mkdir(&root, "d", FileMode::new(0o755)).unwrap();
    assert_eq!((file.pin_count(), dir.pin_count()), (1, 1));

    namei::unlink(&root, "f").unwrap();
    namei::rmdir(&root, "d").unwrap();
    assert_eq!((file.pin_count(), dir.pin_count()), (0, 0));

    deactivate_super(&sb);
    assert_eq!(root.pin_count(), 0);
}
