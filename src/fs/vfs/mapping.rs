//! Page Mapping
//!
//! Content of a regular file or symlink, kept as a sparse set of
//! zero-filled pages. Pages are charged to the host environment, so a
//! refused page allocation surfaces as a backing-store failure.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;
use std::collections::BTreeMap;

use super::env::{AllocKind, VfsEnv, PAGE_SHIFT, PAGE_SIZE};
use super::inode::{FsError, FsResult};

bitflags::bitflags! {
    /// Mapping behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MappingFlags: u32 {
        /// Pages are never reclaimed under memory pressure
        const UNEVICTABLE = 1 << 0;
        /// Pages may be allocated from high memory
        const GFP_HIGHUSER = 1 << 1;
    }
}

/// Page cache of one node
#[derive(Debug, Default)]
pub struct AddressSpace {
    pages: Mutex<BTreeMap<u64, Box<[u8]>>>,
    size: AtomicU64,
    flags: MappingFlags,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> MappingFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: MappingFlags) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: MappingFlags) {
        self.flags -= flags;
    }

    pub fn is_unevictable(&self) -> bool {
        self.flags.contains(MappingFlags::UNEVICTABLE)
    }

    /// Content length in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    /// Number of pages currently held
    pub fn nr_pages(&self) -> usize {
        self.pages.lock().len()
    }

    /// Copy content at `off` into `dst`; holes read as zeroes
    pub fn read_at(&self, off: u64, dst: &mut [u8]) -> usize {
        let size = self.size();
        if off >= size {
            return 0;
        }
        let to_read = dst.len().min((size - off) as usize);
        let pages = self.pages.lock();

        let mut done = 0;
        while done < to_read {
            let pos = off + done as u64;
            let index = pos >> PAGE_SHIFT;
            let page_off = (pos as usize) & (PAGE_SIZE - 1);
            let chunk = (to_read - done).min(PAGE_SIZE - page_off);

            match pages.get(&index) {
                Some(page) => dst[done..done + chunk]
                    .copy_from_slice(&page[page_off..page_off + chunk]),
                None => dst[done..done + chunk].fill(0),
            }
            done += chunk;
        }
        done
    }

    /// Copy `src` into the mapping at `off`, growing it as needed
    ///
    /// Every page the write needs is allocated before any byte is copied;
    /// if one allocation is refused the ones already taken are returned and
    /// the mapping is left untouched.
    pub fn write_at(&self, env: &VfsEnv, off: u64, src: &[u8]) -> FsResult<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let end = off.checked_add(src.len() as u64).ok_or(FsError::FileTooLarge)?;
        let first = off >> PAGE_SHIFT;
        let last = (end - 1) >> PAGE_SHIFT;

        let mut pages = self.pages.lock();

        let mut fresh = Vec::new();
        for index in first..=last {
            if pages.contains_key(&index) {
                continue;
            }
            if !env.try_alloc(AllocKind::Page) {
                for _ in &fresh {
                    env.release(AllocKind::Page);
                }
                return Err(FsError::BackingStore);
            }
            fresh.push(index);
        }
        for index in fresh {
            pages.insert(index, vec![0u8; PAGE_SIZE].into_boxed_slice());
        }

        let mut done = 0;
        while done < src.len() {
            let pos = off + done as u64;
            let index = pos >> PAGE_SHIFT;
            let page_off = (pos as usize) & (PAGE_SIZE - 1);
            let chunk = (src.len() - done).min(PAGE_SIZE - page_off);

            if let Some(page) = pages.get_mut(&index) {
                page[page_off..page_off + chunk].copy_from_slice(&src[done..done + chunk]);
            }
            done += chunk;
        }

        if end > self.size() {
            self.set_size(end);
        }
        Ok(done)
    }

    /// Shrink or extend the content to `new_size` bytes
    pub fn truncate(&self, env: &VfsEnv, new_size: u64) {
        let mut pages = self.pages.lock();
        let keep = new_size.div_ceil(PAGE_SIZE as u64);

        let dropped = pages.split_off(&keep);
        for _ in 0..dropped.len() {
            env.release(AllocKind::Page);
        }

        let tail = (new_size as usize) & (PAGE_SIZE - 1);
        if tail != 0 {
            if let Some(page) = pages.get_mut(&(new_size >> PAGE_SHIFT)) {
                page[tail..].fill(0);
            }
        }
        self.set_size(new_size);
    }

    /// Drop every page
    pub fn clear(&self, env: &VfsEnv) {
        self.truncate(env, 0);
    }
}
