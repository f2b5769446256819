//! Host Environment
//!
//! Everything the VFS layer would otherwise pull from global kernel state:
//! the inode number counter, the clock, and the allocator. Each mounted
//! instance holds an `Arc<VfsEnv>`, so tests can build an isolated
//! environment, inject allocation failures and inspect resource counters.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Page size of the host
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Point in time with nanosecond resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Round down to a multiple of `gran` nanoseconds
    pub fn truncate(self, gran: u32) -> Self {
        if gran <= 1 {
            return self;
        }
        if gran >= 1_000_000_000 {
            return Self::new(self.sec, 0);
        }
        Self::new(self.sec, self.nsec - self.nsec % gran)
    }
}

/// Source of timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> Timespec;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timespec {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timespec::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(_) => Timespec::default(),
        }
    }
}

/// Objects handed out by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// A node
    Inode,
    /// A name binding
    Dentry,
    /// Per-instance filesystem private data
    FsInfo,
    /// One page of file content
    Page,
}

const ALLOC_KINDS: usize = 4;

impl AllocKind {
    const fn index(self) -> usize {
        match self {
            AllocKind::Inode => 0,
            AllocKind::Dentry => 1,
            AllocKind::FsInfo => 2,
            AllocKind::Page => 3,
        }
    }
}

/// Decides whether an allocation may proceed
pub trait AllocPolicy: Send + Sync {
    fn allow(&self, kind: AllocKind) -> bool;
}

/// Never refuses
pub struct Unlimited;

impl AllocPolicy for Unlimited {
    fn allow(&self, _kind: AllocKind) -> bool {
        true
    }
}

/// Refuses allocations of a kind once its budget is spent
///
/// A kind without a budget is never refused.
pub struct FaultInjector {
    budgets: Mutex<[Option<usize>; ALLOC_KINDS]>,
}

impl FaultInjector {
    pub const fn new() -> Self {
        Self {
            budgets: Mutex::new([None; ALLOC_KINDS]),
        }
    }

    /// Allow `n` more allocations of `kind`, then fail every following one
    pub fn fail_after(&self, kind: AllocKind, n: usize) {
        self.budgets.lock()[kind.index()] = Some(n);
    }

    /// Fail the next allocation of `kind` and every one after it
    pub fn fail_now(&self, kind: AllocKind) {
        self.fail_after(kind, 0);
    }

    /// Stop injecting failures for `kind`
    pub fn clear(&self, kind: AllocKind) {
        self.budgets.lock()[kind.index()] = None;
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocPolicy for FaultInjector {
    fn allow(&self, kind: AllocKind) -> bool {
        let mut budgets = self.budgets.lock();
        match budgets[kind.index()] {
            None => true,
            Some(0) => false,
            Some(n) => {
                budgets[kind.index()] = Some(n - 1);
                true
            }
        }
    }
}

/// One outstanding allocation, returned to the environment on drop
pub struct Charge {
    env: Arc<VfsEnv>,
    kind: AllocKind,
}

impl Charge {
    /// Take one allocation of `kind` from `env`; `None` if refused
    pub fn try_new(env: &Arc<VfsEnv>, kind: AllocKind) -> Option<Self> {
        if !env.try_alloc(kind) {
            return None;
        }
        Some(Self {
            env: Arc::clone(env),
            kind,
        })
    }

    pub fn env(&self) -> &Arc<VfsEnv> {
        &self.env
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        self.env.release(self.kind);
    }
}

impl core::fmt::Debug for Charge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Charge").field("kind", &self.kind).finish()
    }
}

/// Filesystem credentials of the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cred {
    pub fsuid: u32,
    pub fsgid: u32,
}

#[derive(Default)]
struct Counters {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

/// Host environment shared by every instance mounted from it
pub struct VfsEnv {
    /// Next inode number (get_next_ino)
    next_ino: AtomicU64,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn AllocPolicy>,
    cred: Mutex<Cred>,
    counters: [Counters; ALLOC_KINDS],
}

impl VfsEnv {
    /// Wall clock, unlimited memory
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), Arc::new(Unlimited))
    }

    /// Wall clock with a custom allocation policy
    pub fn with_policy(policy: Arc<dyn AllocPolicy>) -> Self {
        Self::with_parts(Arc::new(SystemClock), policy)
    }

    pub fn with_parts(clock: Arc<dyn Clock>, policy: Arc<dyn AllocPolicy>) -> Self {
        Self {
            next_ino: AtomicU64::new(1),
            clock,
            policy,
            cred: Mutex::new(Cred::default()),
            counters: core::array::from_fn(|_| Counters::default()),
        }
    }

    /// Allocate an inode number, unique across every instance of this
    /// environment. Zero is never returned.
    pub fn next_ino(&self) -> u64 {
        loop {
            let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
            if ino != 0 {
                return ino;
            }
        }
    }

    /// Restart inode numbering at `next`
    pub fn reset_ino(&self, next: u64) {
        self.next_ino.store(next, Ordering::SeqCst);
    }

    pub fn current_time(&self) -> Timespec {
        self.clock.now()
    }

    /// Credentials new nodes are owned by
    pub fn current_cred(&self) -> Cred {
        *self.cred.lock()
    }

    pub fn set_cred(&self, cred: Cred) {
        *self.cred.lock() = cred;
    }

    /// Charge one allocation of `kind`; false if the policy refuses it
    pub fn try_alloc(&self, kind: AllocKind) -> bool {
        if !self.policy.allow(kind) {
            log::debug!("[VFS] allocation of {:?} refused", kind);
            return false;
        }
        self.counters[kind.index()]
            .allocated
            .fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Return one allocation of `kind`
    pub fn release(&self, kind: AllocKind) {
        self.counters[kind.index()]
            .released
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Total allocations of `kind` so far
    pub fn allocated(&self, kind: AllocKind) -> usize {
        self.counters[kind.index()].allocated.load(Ordering::SeqCst)
    }

    /// Total releases of `kind` so far
    pub fn released(&self, kind: AllocKind) -> usize {
        self.counters[kind.index()].released.load(Ordering::SeqCst)
    }

    /// Allocations of `kind` not yet released
    pub fn live(&self, kind: AllocKind) -> usize {
        self.allocated(kind).saturating_sub(self.released(kind))
    }
}

impl Default for VfsEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Timespec);

    impl Clock for FixedClock {
        fn now(&self) -> Timespec {
            self.0
        }
    }

    #[test]
    fn test_inode_numbers_are_unique_and_resettable() {
        let env = VfsEnv::new();
        let a = env.next_ino();
        let b = env.next_ino();
        assert_ne!(a, b);

        env.reset_ino(100);
        assert_eq!(env.next_ino(), 100);
    }

    #[test]
    fn test_inode_number_skips_zero() {
        let env = VfsEnv::new();
        env.reset_ino(0);
        assert_eq!(env.next_ino(), 1);
    }

    #[test]
    fn test_fault_injector_budget() {
        let faults = Arc::new(FaultInjector::new());
        let env = VfsEnv::with_policy(faults.clone());

        faults.fail_after(AllocKind::Inode, 1);
        assert!(env.try_alloc(AllocKind::Inode));
        assert!(!env.try_alloc(AllocKind::Inode));
        assert!(env.try_alloc(AllocKind::Page));

        faults.clear(AllocKind::Inode);
        assert!(env.try_alloc(AllocKind::Inode));
        assert_eq!(env.allocated(AllocKind::Inode), 2);
    }

    #[test]
    fn test_counters() {
        let env = VfsEnv::new();
        assert!(env.try_alloc(AllocKind::FsInfo));
        assert_eq!(env.live(AllocKind::FsInfo), 1);
        env.release(AllocKind::FsInfo);
        assert_eq!(env.live(AllocKind::FsInfo), 0);
        assert_eq!(env.released(AllocKind::FsInfo), 1);
    }

    #[test]
    fn test_charge_released_on_drop() {
        let env = Arc::new(VfsEnv::new());
        let charge = Charge::try_new(&env, AllocKind::Dentry).unwrap();
        assert_eq!(env.live(AllocKind::Dentry), 1);
        drop(charge);
        assert_eq!(env.live(AllocKind::Dentry), 0);
    }

    #[test]
    fn test_custom_clock() {
        let t = Timespec::new(42, 7);
        let env = VfsEnv::with_parts(Arc::new(FixedClock(t)), Arc::new(Unlimited));
        assert_eq!(env.current_time(), t);
    }

    #[test]
    fn test_truncate() {
        let t = Timespec::new(5, 123_456_789);
        assert_eq!(t.truncate(1), t);
        assert_eq!(t.truncate(1000), Timespec::new(5, 123_456_000));
        assert_eq!(t.truncate(1_000_000_000), Timespec::new(5, 0));
    }
}
