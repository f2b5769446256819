//! Backing Device Handles
//!
//! An instance may hold a block device and a DAX (direct access,
//! byte-addressable memory) device. Holding is expressed as an owned
//! handle; dropping the handle puts the device.

use spin::Mutex;
use std::fmt;
use std::sync::Arc;

/// Block device interface for filesystems
pub trait BlockDevice: Send + Sync {
    /// Get device sector size (usually 512 bytes)
    fn sector_size(&self) -> u32;

    /// Get total device size in sectors
    fn sector_count(&self) -> u64;

    /// Read sectors from device
    fn read_sectors(&self, sector: u64, count: u32, buffer: &mut [u8]) -> Result<(), BlockError>;

    /// Write sectors to device
    fn write_sectors(&self, sector: u64, count: u32, buffer: &[u8]) -> Result<(), BlockError>;

    /// Flush any pending writes
    fn flush(&self) -> Result<(), BlockError> {
        Ok(())
    }

    /// Get device name/identifier
    fn name(&self) -> &str;

    /// The last holder let go of the device
    fn put(&self) {}
}

/// Byte-addressable memory device
pub trait DaxDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Size in bytes
    fn size(&self) -> u64;

    /// The last holder let go of the device
    fn put(&self) {}
}

/// Block device errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("I/O error")]
    IoError,
    #[error("Invalid sector number")]
    InvalidSector,
    #[error("Buffer too small")]
    BufferTooSmall,
}

/// A held block device
pub struct BlockDevHandle {
    dev: Arc<dyn BlockDevice>,
}

impl BlockDevHandle {
    /// Take a hold on `dev` (blkdev_get)
    pub fn get(dev: Arc<dyn BlockDevice>) -> Self {
        log::debug!("[BLOCK] Holding block device {}", dev.name());
        Self { dev }
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.dev
    }
}

impl Drop for BlockDevHandle {
    fn drop(&mut self) {
        log::debug!("[BLOCK] Releasing block device {}", self.dev.name());
        self.dev.put();
    }
}

impl fmt::Debug for BlockDevHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDevHandle")
            .field("name", &self.dev.name())
            .finish()
    }
}

/// A held DAX device
pub struct DaxHandle {
    dev: Arc<dyn DaxDevice>,
}

impl DaxHandle {
    /// Take a hold on `dev` (fs_dax_get)
    pub fn get(dev: Arc<dyn DaxDevice>) -> Self {
        log::debug!("[DAX] Holding dax device {}", dev.name());
        Self { dev }
    }

    pub fn device(&self) -> &Arc<dyn DaxDevice> {
        &self.dev
    }
}

impl Drop for DaxHandle {
    fn drop(&mut self) {
        log::debug!("[DAX] Releasing dax device {}", self.dev.name());
        self.dev.put();
    }
}

impl fmt::Debug for DaxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaxHandle")
            .field("name", &self.dev.name())
            .finish()
    }
}

/// Block device backed by a byte vector
pub struct RamBlockDevice {
    name: String,
    sector_size: u32,
    data: Mutex<Vec<u8>>,
}

impl RamBlockDevice {
    pub fn new(name: &str, sector_count: u64) -> Self {
        let sector_size = 512;
        Self {
            name: String::from(name),
            sector_size,
            data: Mutex::new(vec![0u8; (sector_count * sector_size as u64) as usize]),
        }
    }

    fn range(
        &self,
        sector: u64,
        count: u32,
        len: usize,
    ) -> Result<core::ops::Range<usize>, BlockError> {
        let end = sector
            .checked_add(count as u64)
            .ok_or(BlockError::InvalidSector)?;
        if end > self.sector_count() {
            return Err(BlockError::InvalidSector);
        }
        let bytes = count as usize * self.sector_size as usize;
        if len < bytes {
            return Err(BlockError::BufferTooSmall);
        }
        let start = sector as usize * self.sector_size as usize;
        Ok(start..start + bytes)
    }
}

impl BlockDevice for RamBlockDevice {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.data.lock().len() as u64 / self.sector_size as u64
    }

    fn read_sectors(&self, sector: u64, count: u32, buffer: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(sector, count, buffer.len())?;
        let len = range.len();
        buffer[..len].copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_sectors(&self, sector: u64, count: u32, buffer: &[u8]) -> Result<(), BlockError> {
        let range = self.range(sector, count, buffer.len())?;
        let len = range.len();
        self.data.lock()[range].copy_from_slice(&buffer[..len]);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
