//! tagfs Superblock Implementation
//!
//! Mount context setup, option parsing, `fill_super` and teardown. The
//! per-instance [`TagfsFsInfo`] is created with the mount context, moves
//! to the superblock when the tree is built, and is released exactly once:
//! by the context if the mount never gets a superblock, by `kill_sb`
//! otherwise.

use spin::Mutex;
use std::sync::Arc;

use super::inode::tagfs_get_inode;
use super::TAGFS_MAGIC;
use crate::fs::block_dev::{BlockDevHandle, BlockDevice, DaxDevice, DaxHandle};
use crate::fs::vfs::dentry::{d_make_root, Dentry};
use crate::fs::vfs::env::{AllocKind, Charge, VfsEnv, PAGE_SHIFT, PAGE_SIZE};
use crate::fs::vfs::fs_context::{
    fs_parse, get_tree_nodev, vfs_parse_fs_param_source, FsContext, FsContextOperations,
    FsParameter, FsParameterSpec,
};
use crate::fs::vfs::inode::{DevId, FileMode, FsError, FsResult};
use crate::fs::vfs::superblock::{kill_litter_super, SuperBlock, SuperOperations};

/// Root directory permissions when no `mode` option is given
pub const TAGFS_DEFAULT_MODE: u16 = 0o755;

/// Largest file size (MAX_LFS_FILESIZE)
pub const MAX_LFS_FILESIZE: u64 = i64::MAX as u64;

const OPT_MODE: u32 = 0;

/// Mount options tagfs understands
pub static TAGFS_FS_PARAMETERS: [FsParameterSpec; 1] = [FsParameterSpec::u32oct("mode", OPT_MODE)];

/// Parsed mount options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagfsMountOpts {
    /// Permissions of the root directory
    pub mode: FileMode,
}

impl Default for TagfsMountOpts {
    fn default() -> Self {
        Self {
            mode: FileMode::new(TAGFS_DEFAULT_MODE),
        }
    }
}

#[derive(Debug, Default)]
struct TagfsDevices {
    bdev: Option<BlockDevHandle>,
    dax: Option<DaxHandle>,
}

/// Per-instance state of a tagfs mount
#[derive(Debug)]
pub struct TagfsFsInfo {
    mount_opts: TagfsMountOpts,
    /// Guards the backing device slots
    fsi_mutex: Mutex<TagfsDevices>,
    _charge: Charge,
}

impl TagfsFsInfo {
    /// Fresh state with default options; `None` if the environment refuses
    /// the allocation
    pub fn new(env: &Arc<VfsEnv>) -> Option<Self> {
        let charge = Charge::try_new(env, AllocKind::FsInfo)?;
        Some(Self {
            mount_opts: TagfsMountOpts::default(),
            fsi_mutex: Mutex::new(TagfsDevices::default()),
            _charge: charge,
        })
    }

    pub fn mount_opts(&self) -> TagfsMountOpts {
        self.mount_opts
    }

    pub fn mode(&self) -> FileMode {
        self.mount_opts.mode
    }

    /// Hold `dev` as the instance's block device
    pub fn attach_block_device(&self, dev: Arc<dyn BlockDevice>) -> FsResult<()> {
        let mut devices = self.fsi_mutex.lock();
        if devices.bdev.is_some() {
            return Err(FsError::Busy);
        }
        devices.bdev = Some(BlockDevHandle::get(dev));
        Ok(())
    }

    /// Hold `dev` as the instance's DAX device
    pub fn attach_dax_device(&self, dev: Arc<dyn DaxDevice>) -> FsResult<()> {
        let mut devices = self.fsi_mutex.lock();
        if devices.dax.is_some() {
            return Err(FsError::Busy);
        }
        devices.dax = Some(DaxHandle::get(dev));
        Ok(())
    }

    pub fn has_block_device(&self) -> bool {
        self.fsi_mutex.lock().bdev.is_some()
    }

    pub fn has_dax_device(&self) -> bool {
        self.fsi_mutex.lock().dax.is_some()
    }

    /// Put the block device, then the DAX device
    fn release_devices(&self) {
        let devices = core::mem::take(&mut *self.fsi_mutex.lock());
        drop(devices.bdev);
        drop(devices.dax);
    }
}

/// Apply one mount option
///
/// Keys tagfs does not know are offered to the generic `source` handler
/// and otherwise ignored.
pub fn tagfs_parse_param(fc: &mut FsContext, param: &FsParameter) -> FsResult<()> {
    let Some(result) = fs_parse(&TAGFS_FS_PARAMETERS, param)? else {
        if !vfs_parse_fs_param_source(fc, param)? {
            log::debug!("[TAGFS] Ignoring mount option '{}'", param.key);
        }
        return Ok(());
    };

    let fsi = fc
        .fs_private_mut::<TagfsFsInfo>()
        .ok_or(FsError::InvalidArgument)?;
    if result.opt == OPT_MODE {
        let mode = result.uint_32().ok_or(FsError::InvalidOption)?;
        fsi.mount_opts.mode = FileMode::new((mode & FileMode::S_IALLUGO as u32) as u16);
    }
    Ok(())
}

/// Set up the superblock and its root directory
pub fn tagfs_fill_super(sb: &Arc<SuperBlock>, _fc: &mut FsContext) -> FsResult<()> {
    let fsi = sb
        .fs_info::<TagfsFsInfo>()
        .ok_or(FsError::InvalidArgument)?;

    sb.update_params(|p| {
        p.max_bytes = MAX_LFS_FILESIZE;
        p.block_size = PAGE_SIZE as u32;
        p.block_size_bits = PAGE_SHIFT as u8;
        p.magic = TAGFS_MAGIC;
        p.time_gran = 1;
    });
    sb.set_ops(&TAGFS_SUPER_OPS);

    let root_mode = fsi.mode().with_type(FileMode::S_IFDIR);
    let inode =
        tagfs_get_inode(sb, None, root_mode, DevId::NONE).map_err(|_| FsError::OutOfMemory)?;
    let root = d_make_root(inode)?;
    sb.set_root(root);
    Ok(())
}

pub fn tagfs_get_tree(fc: &mut FsContext) -> FsResult<()> {
    get_tree_nodev(fc, tagfs_fill_super)
}

/// Drop the instance state if the context still owns it
pub fn tagfs_free_fc(fc: &mut FsContext) {
    if let Some(fsi) = fc.take_fs_private() {
        log::trace!("[TAGFS] Freeing unused mount state");
        drop(fsi);
    }
}

struct TagfsContextOps;

static TAGFS_CONTEXT_OPS: TagfsContextOps = TagfsContextOps;

impl FsContextOperations for TagfsContextOps {
    fn parse_param(&self, fc: &mut FsContext, param: &FsParameter) -> FsResult<()> {
        tagfs_parse_param(fc, param)
    }

    fn get_tree(&self, fc: &mut FsContext) -> FsResult<()> {
        tagfs_get_tree(fc)
    }

    fn free(&self, fc: &mut FsContext) {
        tagfs_free_fc(fc)
    }
}

/// Allocate the instance state and install the context operations
pub fn tagfs_init_fs_context(fc: &mut FsContext) -> FsResult<()> {
    let fsi = TagfsFsInfo::new(fc.env()).ok_or(FsError::OutOfMemory)?;
    fc.set_fs_private(Box::new(fsi));
    fc.set_ops(&TAGFS_CONTEXT_OPS);
    Ok(())
}

/// Tear down an instance: devices first, then the instance state, then
/// the tree
pub fn tagfs_kill_sb(sb: &Arc<SuperBlock>) {
    if let Some(info) = sb.take_fs_info() {
        match info.downcast::<TagfsFsInfo>() {
            Ok(fsi) => {
                fsi.release_devices();
                drop(fsi);
            }
            Err(_) => log::warn!("[TAGFS] kill_sb: foreign fs_info"),
        }
    }
    kill_litter_super(sb);
    log::info!("[TAGFS] Instance released");
}

/// Append `,mode=<octal>` when the root mode is not the default
pub fn tagfs_show_options(out: &mut String, root: &Arc<Dentry>) -> FsResult<()> {
    let sb = root.inode().ok_or(FsError::NotFound)?.sb()?;
    let fsi = sb
        .fs_info::<TagfsFsInfo>()
        .ok_or(FsError::InvalidArgument)?;

    if fsi.mode().0 != TAGFS_DEFAULT_MODE {
        out.push_str(&format!(",mode={:o}", fsi.mode()));
    }
    Ok(())
}

struct TagfsSuperOps;

static TAGFS_SUPER_OPS: TagfsSuperOps = TagfsSuperOps;

impl SuperOperations for TagfsSuperOps {
    fn show_options(&self, out: &mut String, root: &Arc<Dentry>) -> FsResult<()> {
        tagfs_show_options(out, root)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fs::tagfs::TagfsType;
    use crate::fs::vfs::env::FaultInjector;
    use crate::fs::vfs::fs_context::{fs_context_for_mount, parse_monolithic, vfs_get_tree};
    use crate::fs::vfs::superblock::deactivate_super;

    /// Mount a tagfs instance without going through the global registry
    pub(crate) fn mount_tagfs(env: &Arc<VfsEnv>, options: &str) -> FsResult<Arc<SuperBlock>> {
        let mut fc = fs_context_for_mount(Arc::new(TagfsType), Arc::clone(env))?;
        parse_monolithic(&mut fc, options)?;
        vfs_get_tree(&mut fc)?;
        fc.take_sb().ok_or(FsError::InvalidArgument)
    }

    fn root_mode(sb: &SuperBlock) -> u16 {
        sb.root().unwrap().inode().unwrap().mode().permissions()
    }

    #[test]
    fn test_default_mode() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "").unwrap();
        assert_eq!(root_mode(&sb), 0o755);
        assert_eq!(sb.show_options().unwrap(), "");
        deactivate_super(&sb);
    }

    #[test]
    fn test_mode_option() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "mode=0700").unwrap();
        assert_eq!(root_mode(&sb), 0o700);
        assert_eq!(sb.show_options().unwrap(), ",mode=700");
        deactivate_super(&sb);
    }

    #[test]
    fn test_mode_is_masked() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "mode=177777").unwrap();
        assert_eq!(sb.fs_info::<TagfsFsInfo>().unwrap().mode().0, 0o7777);
        deactivate_super(&sb);
    }

    #[test]
    fn test_unknown_options_are_ignored() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "mode=0700,unknown=xyz").unwrap();
        assert_eq!(root_mode(&sb), 0o700);
        deactivate_super(&sb);

        let sb = mount_tagfs(&env, "foo=bar").unwrap();
        assert_eq!(root_mode(&sb), 0o755);
        deactivate_super(&sb);
    }

    #[test]
    fn test_source_is_claimed_once() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "source=none").unwrap();
        assert_eq!(sb.source(), Some("none"));
        deactivate_super(&sb);

        assert_eq!(
            mount_tagfs(&env, "source=a,source=b").unwrap_err(),
            FsError::InvalidOption
        );
        assert_eq!(env.live(AllocKind::FsInfo), 0);
    }

    #[test]
    fn test_bad_mode_value() {
        let env = Arc::new(VfsEnv::new());
        assert_eq!(mount_tagfs(&env, "mode=rwx").unwrap_err(), FsError::InvalidOption);
        assert_eq!(env.allocated(AllocKind::FsInfo), 1);
        assert_eq!(env.released(AllocKind::FsInfo), 1);
    }

    #[test]
    fn test_superblock_parameters() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "").unwrap();
        let params = sb.params();
        assert_eq!(params.max_bytes, i64::MAX as u64);
        assert_eq!(params.block_size, 4096);
        assert_eq!(params.block_size_bits, 12);
        assert_eq!(params.magic, TAGFS_MAGIC);
        assert_eq!(params.time_gran, 1);

        let st = sb.statfs();
        assert_eq!(st.f_type, TAGFS_MAGIC);
        assert_eq!(st.f_bsize, 4096);
        assert_eq!(st.f_namelen, 255);
        deactivate_super(&sb);
    }

    #[test]
    fn test_config_released_once_on_unmount() {
        let env = Arc::new(VfsEnv::new());
        let sb = mount_tagfs(&env, "mode=0711").unwrap();
        assert_eq!(env.live(AllocKind::FsInfo), 1);
        assert!(!sb.is_dying());

        deactivate_super(&sb);
        assert!(sb.is_dying());
        deactivate_super(&sb);
        assert_eq!(env.allocated(AllocKind::FsInfo), 1);
        assert_eq!(env.released(AllocKind::FsInfo), 1);
        assert!(sb.root().is_none());
    }

    #[test]
    fn test_root_allocation_failure() {
        let faults = Arc::new(FaultInjector::new());
        let env = Arc::new(VfsEnv::with_policy(faults.clone()));

        faults.fail_now(AllocKind::Inode);
        assert_eq!(mount_tagfs(&env, "").unwrap_err(), FsError::OutOfMemory);
        assert_eq!(env.released(AllocKind::FsInfo), 1);
        faults.clear(AllocKind::Inode);

        faults.fail_now(AllocKind::Dentry);
        assert_eq!(mount_tagfs(&env, "mode=0700").unwrap_err(), FsError::OutOfMemory);
        assert_eq!(env.allocated(AllocKind::FsInfo), 2);
        assert_eq!(env.released(AllocKind::FsInfo), 2);
        assert_eq!(env.live(AllocKind::Inode), 0);
    }

    #[test]
    fn test_config_allocation_failure() {
        let faults = Arc::new(FaultInjector::new());
        let env = Arc::new(VfsEnv::with_policy(faults.clone()));

        faults.fail_now(AllocKind::FsInfo);
        assert_eq!(mount_tagfs(&env, "").unwrap_err(), FsError::OutOfMemory);
        assert_eq!(env.allocated(AllocKind::FsInfo), 0);
    }
}
