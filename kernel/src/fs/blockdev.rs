//! Raw block volume driver.
//!
//! Exposes a partition as a single pseudo-file through the uniform
//! filesystem contract: byte-addressed reads and writes are translated
//! to whole-sector transfers on the underlying unit. Volumes whose
//! format has no loaded parser stay usable this way.

extern crate alloc;

use alloc::vec::Vec;

use super::file::{DirEntry, OpenFlags};
use super::FileSystemDriver;
use crate::drivers::storage::{self, DiskId};
use crate::error::{KernelError, Result};

/// Name of the single pseudo-file on a raw volume.
pub const VOLUME_FILE: &str = "$volume";

const VOLUME_HANDLE: u32 = 1;

/// Driver instance bound to one partition.
pub struct RawVolumeDriver {
    disk: DiskId,
    start_sector: u64,
    sector_count: u64,
}

impl RawVolumeDriver {
    pub fn new(disk: DiskId, start_sector: u64, sector_count: u64) -> Self {
        Self {
            disk,
            start_sector,
            sector_count,
        }
    }

    fn sector_size(&self) -> Result<u64> {
        Ok(u64::from(storage::disk_info(self.disk)?.bytes_per_sector))
    }

    fn capacity(&self) -> Result<u64> {
        Ok(self.sector_count * self.sector_size()?)
    }

    /// Clamp a byte span to the volume; empty spans read nothing.
    fn clamp(&self, position: u64, wanted: usize) -> Result<u64> {
        let capacity = self.capacity()?;
        if position >= capacity {
            return Ok(0);
        }
        Ok((capacity - position).min(wanted as u64))
    }
}

impl FileSystemDriver for RawVolumeDriver {
    fn name(&self) -> &'static str {
        "rawvol"
    }

    fn open(&self, path: &str, _flags: OpenFlags) -> Result<u32> {
        if path.is_empty() || path == VOLUME_FILE {
            Ok(VOLUME_HANDLE)
        } else {
            Err(KernelError::NoDevice)
        }
    }

    fn close(&self, handle: u32) -> Result<()> {
        if handle == VOLUME_HANDLE {
            Ok(())
        } else {
            Err(KernelError::BadParameter)
        }
    }

    fn read(&self, handle: u32, position: u64, buffer: &mut [u8]) -> Result<u32> {
        if handle != VOLUME_HANDLE {
            return Err(KernelError::BadParameter);
        }
        let span = self.clamp(position, buffer.len())?;
        if span == 0 {
            return Ok(0);
        }
        let sector_size = self.sector_size()?;
        let first = position / sector_size;
        let last = (position + span - 1) / sector_size;
        let count = (last - first + 1) as u32;

        let mut bounce = alloc::vec![0u8; (u64::from(count) * sector_size) as usize];
        storage::read_sectors(self.disk, self.start_sector + first, count, &mut bounce)?;

        let offset = (position - first * sector_size) as usize;
        buffer[..span as usize].copy_from_slice(&bounce[offset..offset + span as usize]);
        Ok(span as u32)
    }

    fn write(&self, handle: u32, position: u64, data: &[u8]) -> Result<u32> {
        if handle != VOLUME_HANDLE {
            return Err(KernelError::BadParameter);
        }
        let span = self.clamp(position, data.len())?;
        if span == 0 {
            return Err(KernelError::NoSpace);
        }
        let sector_size = self.sector_size()?;
        let first = position / sector_size;
        let last = (position + span - 1) / sector_size;
        let count = (last - first + 1) as u32;

        // Read-modify-write so partial head and tail sectors survive.
        let mut bounce = alloc::vec![0u8; (u64::from(count) * sector_size) as usize];
        storage::read_sectors(self.disk, self.start_sector + first, count, &mut bounce)?;
        let offset = (position - first * sector_size) as usize;
        bounce[offset..offset + span as usize].copy_from_slice(&data[..span as usize]);
        storage::write_sectors(self.disk, self.start_sector + first, count, &bounce)?;
        Ok(span as u32)
    }

    fn size_of(&self, handle: u32) -> Result<u64> {
        if handle != VOLUME_HANDLE {
            return Err(KernelError::BadParameter);
        }
        self.capacity()
    }

    fn create_folder(&self, _path: &str) -> Result<()> {
        Err(KernelError::NotImplemented)
    }

    fn delete(&self, _path: &str) -> Result<()> {
        Err(KernelError::NotImplemented)
    }

    fn exists(&self, path: &str) -> bool {
        path.is_empty() || path == VOLUME_FILE
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        if !path.is_empty() {
            return Err(KernelError::NoDevice);
        }
        Ok(alloc::vec![DirEntry {
            name: alloc::string::String::from(VOLUME_FILE),
            directory: false,
            size: self.capacity()?,
        }])
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::drivers::storage::register_disk;

    fn volume() -> RawVolumeDriver {
        let disk = register_disk(std::sync::Arc::new(RamDisk::new(512, 64)));
        RawVolumeDriver::new(disk, 8, 16)
    }

    #[test]
    fn unaligned_write_read_round_trip() {
        let driver = volume();
        let handle = driver.open(VOLUME_FILE, OpenFlags::READ | OpenFlags::WRITE).unwrap();
        let data = b"spanning two sectors at an odd offset";
        let written = driver.write(handle, 500, data).unwrap();
        assert_eq!(written as usize, data.len());

        let mut back = std::vec![0u8; data.len()];
        let read = driver.read(handle, 500, &mut back).unwrap();
        assert_eq!(read as usize, data.len());
        assert_eq!(&back, data);

        // Bytes before the write survived the read-modify-write.
        let mut head = [0xFFu8; 4];
        driver.read(handle, 496, &mut head).unwrap();
        assert_eq!(head, [0u8; 4]);
    }

    #[test]
    fn reads_clamp_at_the_volume_end() {
        let driver = volume();
        let handle = driver.open("", OpenFlags::READ).unwrap();
        let capacity = driver.size_of(handle).unwrap();
        let mut buffer = [0u8; 64];
        assert_eq!(driver.read(handle, capacity - 16, &mut buffer).unwrap(), 16);
        assert_eq!(driver.read(handle, capacity, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn only_the_volume_file_exists() {
        let driver = volume();
        assert!(driver.exists(VOLUME_FILE));
        assert!(!driver.exists("anything/else"));
        assert!(driver.open("other", OpenFlags::READ).is_err());
        let listing = driver.list("").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, VOLUME_FILE);
    }
}
