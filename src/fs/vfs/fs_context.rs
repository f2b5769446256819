//! Mount Contexts and Option Parsing
//!
//! A mount builds a [`FsContext`], feeds it options one parameter at a
//! time, then asks the filesystem for a tree. Filesystems describe the
//! options they understand with a table of [`FsParameterSpec`] entries and
//! decode each parameter through [`fs_parse`].

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use super::dentry::Dentry;
use super::env::VfsEnv;
use super::inode::{FsError, FsResult};
use super::superblock::{deactivate_super, FsType, MountFlags, SuperBlock};

/// How a parameter's value is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Unsigned 32-bit integer written in octal
    U32Oct,
    /// Unsigned 32-bit integer, decimal or `0x` hex
    U32,
    /// Key with no value
    Flag,
    String,
}

/// One entry of a filesystem's parameter table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsParameterSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Filesystem-chosen tag reported back by [`fs_parse`]
    pub opt: u32,
}

impl FsParameterSpec {
    pub const fn u32oct(name: &'static str, opt: u32) -> Self {
        Self {
            name,
            kind: ParamKind::U32Oct,
            opt,
        }
    }

    pub const fn u32(name: &'static str, opt: u32) -> Self {
        Self {
            name,
            kind: ParamKind::U32,
            opt,
        }
    }

    pub const fn flag(name: &'static str, opt: u32) -> Self {
        Self {
            name,
            kind: ParamKind::Flag,
            opt,
        }
    }

    pub const fn string(name: &'static str, opt: u32) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            opt,
        }
    }
}

/// A single `key[=value]` mount option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsParameter {
    pub key: String,
    pub value: Option<String>,
}

impl FsParameter {
    pub fn new(key: &str, value: Option<&str>) -> Self {
        Self {
            key: String::from(key),
            value: value.map(String::from),
        }
    }
}

/// Decoded parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    U32(u32),
    Flag,
    String(String),
}

/// Outcome of a successful [`fs_parse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsParseResult {
    pub opt: u32,
    pub value: ParamValue,
}

impl FsParseResult {
    pub fn uint_32(&self) -> Option<u32> {
        match self.value {
            ParamValue::U32(v) => Some(v),
            _ => None,
        }
    }
}

fn parse_u32(value: &str, radix: u32) -> Option<u32> {
    if radix == 8 {
        return u32::from_str_radix(value, 8).ok();
    }
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Match `param` against `specs`
///
/// Returns `Ok(None)` when the key is not in the table, so the caller may
/// offer it to another handler. A known key with a malformed value is
/// [`FsError::InvalidOption`].
pub fn fs_parse(specs: &[FsParameterSpec], param: &FsParameter) -> FsResult<Option<FsParseResult>> {
    let Some(spec) = specs.iter().find(|s| s.name == param.key) else {
        return Ok(None);
    };
    let value = param.value.as_deref();

    let value = match (spec.kind, value) {
        (ParamKind::Flag, None) => ParamValue::Flag,
        (ParamKind::U32Oct, Some(v)) => {
            ParamValue::U32(parse_u32(v, 8).ok_or(FsError::InvalidOption)?)
        }
        (ParamKind::U32, Some(v)) => {
            ParamValue::U32(parse_u32(v, 10).ok_or(FsError::InvalidOption)?)
        }
        (ParamKind::String, Some(v)) => ParamValue::String(String::from(v)),
        _ => {
            log::debug!("[VFS] Bad value for '{}'", param.key);
            return Err(FsError::InvalidOption);
        }
    };
    Ok(Some(FsParseResult {
        opt: spec.opt,
        value,
    }))
}

/// Operations a filesystem installs on its mount contexts
pub trait FsContextOperations: Send + Sync {
    /// Apply one mount option
    fn parse_param(&self, fc: &mut FsContext, param: &FsParameter) -> FsResult<()>;

    /// Build the instance and set [`FsContext::root`]
    fn get_tree(&self, fc: &mut FsContext) -> FsResult<()>;

    /// Release whatever private state is still owned by the context
    fn free(&self, _fc: &mut FsContext) {}
}

/// Mount context
pub struct FsContext {
    fs_type: Arc<dyn FsType>,
    env: Arc<VfsEnv>,
    ops: Option<&'static dyn FsContextOperations>,
    /// Filesystem private data; moves to the superblock in `get_tree`
    fs_private: Option<Box<dyn Any + Send + Sync>>,
    source: Option<String>,
    sb_flags: MountFlags,
    sb: Option<Arc<SuperBlock>>,
    root: Option<Arc<Dentry>>,
}

impl FsContext {
    pub fn fs_type(&self) -> &Arc<dyn FsType> {
        &self.fs_type
    }

    pub fn env(&self) -> &Arc<VfsEnv> {
        &self.env
    }

    pub fn set_ops(&mut self, ops: &'static dyn FsContextOperations) {
        self.ops = Some(ops);
    }

    pub fn set_fs_private(&mut self, info: Box<dyn Any + Send + Sync>) {
        self.fs_private = Some(info);
    }

    /// Private data, if it is still owned by the context and is a `T`
    pub fn fs_private_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.fs_private.as_mut()?.downcast_mut::<T>()
    }

    pub fn take_fs_private(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.fs_private.take()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn sb_flags(&self) -> MountFlags {
        self.sb_flags
    }

    pub fn set_sb_flags(&mut self, flags: MountFlags) {
        self.sb_flags |= flags;
    }

    pub fn root(&self) -> Option<&Arc<Dentry>> {
        self.root.as_ref()
    }

    /// Hand the built instance to the caller
    pub fn take_sb(&mut self) -> Option<Arc<SuperBlock>> {
        self.root = None;
        self.sb.take()
    }
}

impl Drop for FsContext {
    fn drop(&mut self) {
        if let Some(ops) = self.ops {
            ops.free(self);
        }
        // A built but unclaimed instance goes with the context.
        if let Some(sb) = self.sb.take() {
            self.root = None;
            deactivate_super(&sb);
        }
    }
}

impl fmt::Debug for FsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("type", &self.fs_type.name())
            .field("source", &self.source)
            .field("sb_flags", &self.sb_flags)
            .field("has_private", &self.fs_private.is_some())
            .finish()
    }
}

/// Create a mount context for `fs_type`
pub fn fs_context_for_mount(fs_type: Arc<dyn FsType>, env: Arc<VfsEnv>) -> FsResult<FsContext> {
    let mut fc = FsContext {
        fs_type: Arc::clone(&fs_type),
        env,
        ops: None,
        fs_private: None,
        source: None,
        sb_flags: MountFlags::empty(),
        sb: None,
        root: None,
    };
    fs_type.init_fs_context(&mut fc)?;
    Ok(fc)
}

/// Claim the `source` parameter
///
/// Returns `Ok(false)` for any other key. A second `source` is an
/// [`FsError::InvalidOption`].
pub fn vfs_parse_fs_param_source(fc: &mut FsContext, param: &FsParameter) -> FsResult<bool> {
    if param.key != "source" {
        return Ok(false);
    }
    if fc.source.is_some() {
        log::debug!("[VFS] Multiple sources");
        return Err(FsError::InvalidOption);
    }
    let value = param.value.as_deref().ok_or(FsError::InvalidOption)?;
    fc.source = Some(String::from(value));
    Ok(true)
}

/// Offer one parameter to the filesystem
pub fn vfs_parse_fs_param(fc: &mut FsContext, param: &FsParameter) -> FsResult<()> {
    if param.key.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    match fc.ops {
        Some(ops) => ops.parse_param(fc, param),
        None => {
            if vfs_parse_fs_param_source(fc, param)? {
                return Ok(());
            }
            Err(FsError::InvalidOption)
        }
    }
}

/// Split a comma separated `key=value` option string and apply it
pub fn parse_monolithic(fc: &mut FsContext, data: &str) -> FsResult<()> {
    for option in data.split(',').filter(|o| !o.is_empty()) {
        let param = match option.split_once('=') {
            Some((key, value)) => FsParameter::new(key, Some(value)),
            None => FsParameter::new(option, None),
        };
        vfs_parse_fs_param(fc, &param)?;
    }
    Ok(())
}

/// Ask the filesystem to build its tree
pub fn vfs_get_tree(fc: &mut FsContext) -> FsResult<()> {
    if fc.root.is_some() {
        return Err(FsError::Busy);
    }
    let ops = fc.ops.ok_or(FsError::InvalidArgument)?;
    ops.get_tree(fc)?;

    if fc.root.is_none() {
        log::warn!("[VFS] {} get_tree produced no root", fc.fs_type.name());
        return Err(FsError::InvalidArgument);
    }
    Ok(())
}

/// Build a fresh instance not backed by any device
///
/// The context's private data moves to the superblock before `fill_super`
/// runs. If `fill_super` fails the half-built instance is torn down through
/// the type's `kill_sb`.
pub fn get_tree_nodev(
    fc: &mut FsContext,
    fill_super: fn(&Arc<SuperBlock>, &mut FsContext) -> FsResult<()>,
) -> FsResult<()> {
    let sb = SuperBlock::new(
        Arc::clone(&fc.fs_type),
        Arc::clone(&fc.env),
        fc.source.clone(),
        fc.sb_flags,
    );
    if let Some(info) = fc.fs_private.take() {
        sb.set_fs_info(Arc::from(info));
    }

    if let Err(e) = fill_super(&sb, fc) {
        log::debug!("[VFS] fill_super for {} failed: {}", fc.fs_type.name(), e);
        deactivate_super(&sb);
        return Err(e);
    }

    fc.root = sb.root();
    fc.sb = Some(sb);
    Ok(())
}
