//! Dentry Cache
//!
//! A dentry binds a name inside a parent directory to an inode. Ownership
//! runs strictly parent to child: a directory dentry holds its bound
//! children, a child refers back to its parent through a `Weak`.
//!
//! A dentry is *negative* until [`d_instantiate`] gives it an inode, and
//! only an instantiated dentry is visible in its parent. A negative dentry
//! that is dropped leaves no trace.

use core::sync::atomic::{AtomicU32, Ordering};
use spin::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::env::{AllocKind, Charge, VfsEnv};
use super::file::File;
use super::inode::{FsError, FsResult, Inode};

/// Directory entry
pub struct Dentry {
    name: RwLock<String>,
    parent: RwLock<Weak<Dentry>>,
    inode: RwLock<Option<Arc<Inode>>>,
    /// Bound children, by name
    children: RwLock<BTreeMap<String, Arc<Dentry>>>,
    /// Extra references keeping the binding in core
    pinned: AtomicU32,
    charge: Charge,
}

fn d_alloc_raw(env: &Arc<VfsEnv>, parent: Weak<Dentry>, name: &str) -> Option<Arc<Dentry>> {
    let charge = Charge::try_new(env, AllocKind::Dentry)?;
    Some(Arc::new(Dentry {
        name: RwLock::new(String::from(name)),
        parent: RwLock::new(parent),
        inode: RwLock::new(None),
        children: RwLock::new(BTreeMap::new()),
        pinned: AtomicU32::new(0),
        charge,
    }))
}

/// Allocate a negative dentry for `name` under `parent`
///
/// The dentry is not visible in `parent` until it is instantiated.
pub fn d_alloc(parent: &Arc<Dentry>, name: &str) -> FsResult<Arc<Dentry>> {
    d_alloc_raw(parent.env(), Arc::downgrade(parent), name).ok_or(FsError::OutOfMemory)
}

/// Build the root dentry of an instance around `root_inode`
///
/// On failure the inode reference is dropped.
pub fn d_make_root(root_inode: Arc<Inode>) -> FsResult<Arc<Dentry>> {
    let env = Arc::clone(root_inode.env());
    let Some(root) = d_alloc_raw(&env, Weak::new(), "/") else {
        drop(root_inode);
        return Err(FsError::OutOfMemory);
    };
    *root.inode.write() = Some(root_inode);
    root.pinned.store(1, Ordering::SeqCst);
    Ok(root)
}

/// Give `dentry` its inode and bind it into its parent
pub fn d_instantiate(dentry: &Arc<Dentry>, inode: Arc<Inode>) {
    *dentry.inode.write() = Some(inode);
    if let Some(parent) = dentry.parent() {
        let name = dentry.name();
        parent.children.write().insert(name, Arc::clone(dentry));
    }
}

/// Pin `dentry` in core
pub fn dget(dentry: &Arc<Dentry>) -> Arc<Dentry> {
    dentry.pinned.fetch_add(1, Ordering::SeqCst);
    Arc::clone(dentry)
}

/// Drop one pin
pub fn dput(dentry: &Dentry) {
    let prev = dentry
        .pinned
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if prev.is_err() {
        log::warn!("[VFS] dput on unpinned dentry '{}'", dentry.name());
    }
}

/// Remove the binding of `dentry` from its parent
pub fn d_drop(dentry: &Arc<Dentry>) {
    if let Some(parent) = dentry.parent() {
        let name = dentry.name();
        let mut children = parent.children.write();
        if children.get(&name).is_some_and(|d| Arc::ptr_eq(d, dentry)) {
            children.remove(&name);
        }
    }
}

/// Attach an unlinked node to the dentry of an O_TMPFILE open
///
/// The node loses its only link; it stays reachable through `file` alone.
pub fn d_tmpfile(file: &mut File, inode: Arc<Inode>) {
    inode.drop_nlink();
    let dentry = file.dentry();
    *dentry.name.write() = format!("#{}", inode.ino());
    *dentry.inode.write() = Some(inode);
}

/// Move a bound dentry to `new_name` under `new_parent`
pub fn d_move(dentry: &Arc<Dentry>, new_parent: &Arc<Dentry>, new_name: &str) {
    d_drop(dentry);
    *dentry.name.write() = String::from(new_name);
    *dentry.parent.write() = Arc::downgrade(new_parent);
    new_parent
        .children
        .write()
        .insert(String::from(new_name), Arc::clone(dentry));
}

/// Swap the bindings of two dentries
pub fn d_exchange(a: &Arc<Dentry>, b: &Arc<Dentry>) {
    let (Some(a_parent), Some(b_parent)) = (a.parent(), b.parent()) else {
        return;
    };
    let a_name = a.name();
    let b_name = b.name();

    d_drop(a);
    d_drop(b);
    *a.name.write() = b_name.clone();
    *a.parent.write() = Arc::downgrade(&b_parent);
    *b.name.write() = a_name.clone();
    *b.parent.write() = Arc::downgrade(&a_parent);
    b_parent.children.write().insert(b_name, Arc::clone(a));
    a_parent.children.write().insert(a_name, Arc::clone(b));
}

/// Drop every pin and binding below `root`
pub fn d_genocide(root: &Arc<Dentry>) {
    let children: Vec<Arc<Dentry>> = {
        let mut map = root.children.write();
        let taken = core::mem::take(&mut *map);
        taken.into_values().collect()
    };
    for child in children {
        d_genocide(&child);
        dput(&child);
    }
}

impl Dentry {
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Parent directory; `None` for the root and for orphaned dentries
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().upgrade()
    }

    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inode.read().clone()
    }

    pub fn is_positive(&self) -> bool {
        self.inode.read().is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent.read().strong_count() == 0 && self.name.read().as_str() == "/"
    }

    /// Bound child called `name`
    pub fn lookup_child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.children.read().get(name).cloned()
    }

    /// Bound children in name order
    pub fn children(&self) -> Vec<Arc<Dentry>> {
        self.children.read().values().cloned().collect()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    pub fn pin_count(&self) -> u32 {
        self.pinned.load(Ordering::SeqCst)
    }

    pub fn env(&self) -> &Arc<VfsEnv> {
        self.charge.env()
    }

    /// Is `self` equal to or below `ancestor`
    pub fn is_subdir_of(self: &Arc<Self>, ancestor: &Arc<Dentry>) -> bool {
        let mut cur = Some(Arc::clone(self));
        while let Some(d) = cur {
            if Arc::ptr_eq(&d, ancestor) {
                return true;
            }
            cur = d.parent();
        }
        false
    }

    /// Absolute path of the binding, for diagnostics
    pub fn path(&self) -> String {
        let mut parts = vec![self.name()];
        let mut cur = self.parent();
        while let Some(d) = cur {
            if d.is_root() {
                break;
            }
            parts.push(d.name());
            cur = d.parent();
        }
        if parts.len() == 1 && parts[0] == "/" {
            return String::from("/");
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry")
            .field("name", &self.name())
            .field("ino", &self.inode().map(|i| i.ino()))
            .field("children", &self.children.read().len())
            .finish()
    }
}
