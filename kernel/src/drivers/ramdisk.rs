//! Memory-backed storage driver.
//!
//! Backs the boot RAM disk band and exercises the exact storage-driver
//! contract in the test suite. Sectors are zero-filled until first
//! written, so an unformatted disk reads as zeros rather than failing.

extern crate alloc;

use alloc::vec::Vec;

use spin::RwLock;

use super::storage::{DiskGeometry, StorageDriver};
use crate::error::{KernelError, Result};

/// A RAM-backed disk.
pub struct RamDisk {
    geometry: DiskGeometry,
    data: RwLock<Vec<u8>>,
}

impl RamDisk {
    pub fn new(bytes_per_sector: u32, sector_count: u64) -> Self {
        let capacity = (u64::from(bytes_per_sector) * sector_count) as usize;
        let mut data = Vec::new();
        data.resize(capacity, 0);
        Self {
            geometry: DiskGeometry {
                bytes_per_sector,
                sector_count,
            },
            data: RwLock::new(data),
        }
    }

    /// Build a RAM disk preloaded with an image; the tail stays zero.
    pub fn with_image(bytes_per_sector: u32, sector_count: u64, image: &[u8]) -> Self {
        let disk = Self::new(bytes_per_sector, sector_count);
        {
            let mut data = disk.data.write();
            let take = image.len().min(data.len());
            data[..take].copy_from_slice(&image[..take]);
        }
        disk
    }

    fn span(&self, sector: u64, count: u32) -> Result<(usize, usize)> {
        let end = sector
            .checked_add(u64::from(count))
            .ok_or(KernelError::BadParameter)?;
        if end > self.geometry.sector_count {
            return Err(KernelError::BadParameter);
        }
        let start = (sector * u64::from(self.geometry.bytes_per_sector)) as usize;
        let bytes = (count * self.geometry.bytes_per_sector) as usize;
        Ok((start, bytes))
    }
}

impl StorageDriver for RamDisk {
    fn name(&self) -> &str {
        "ramdisk"
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    fn read_sectors(&self, sector: u64, count: u32, buffer: &mut [u8]) -> Result<()> {
        let (start, bytes) = self.span(sector, count)?;
        let data = self.data.read();
        buffer
            .get_mut(..bytes)
            .ok_or(KernelError::BadParameter)?
            .copy_from_slice(&data[start..start + bytes]);
        Ok(())
    }

    fn write_sectors(&self, sector: u64, count: u32, data: &[u8]) -> Result<()> {
        let (start, bytes) = self.span(sector, count)?;
        let mut backing = self.data.write();
        backing[start..start + bytes]
            .copy_from_slice(data.get(..bytes).ok_or(KernelError::BadParameter)?);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn image_preload_and_tail_zero() {
        let disk = RamDisk::with_image(512, 4, &[0xAAu8; 600]);
        let mut sector = [0u8; 512];
        disk.read_sectors(0, 1, &mut sector).unwrap();
        assert!(sector.iter().all(|b| *b == 0xAA));
        disk.read_sectors(2, 1, &mut sector).unwrap();
        assert!(sector.iter().all(|b| *b == 0));
    }

    #[test]
    fn exact_transfer_or_error() {
        let disk = RamDisk::new(512, 4);
        let mut buffer = [0u8; 512];
        assert!(disk.read_sectors(4, 1, &mut buffer).is_err());
        assert!(disk.read_sectors(u64::MAX, 1, &mut buffer).is_err());
    }
}
