//! Block storage: the driver trait, registered storage units, and the
//! sector I/O entry points everything above (partitions, filesystems)
//! goes through.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;

use bitflags::bitflags;

use crate::error::{KernelError, Result};
use crate::object::{KernelObject, ObjectHeader, ObjectId, ObjectKind, Registry};

/// Geometry reported by a storage device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub bytes_per_sector: u32,
    pub sector_count: u64,
}

impl DiskGeometry {
    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.bytes_per_sector) * self.sector_count
    }
}

bitflags! {
    /// Per-unit access control.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Unit is administratively offline.
        const DISABLED  = 1 << 0;
        /// Writes are refused.
        const READ_ONLY = 1 << 1;
    }
}

/// A storage device driver.
///
/// Transfers move exactly `count` sectors or fail; partial transfers do
/// not exist at this interface.
pub trait StorageDriver: Send + Sync {
    fn name(&self) -> &str;

    fn reset(&self) -> Result<()>;

    fn geometry(&self) -> DiskGeometry;

    /// Read `count` sectors starting at `sector` into `buffer`.
    fn read_sectors(&self, sector: u64, count: u32, buffer: &mut [u8]) -> Result<()>;

    /// Write `count` sectors starting at `sector` from `data`.
    fn write_sectors(&self, sector: u64, count: u32, data: &[u8]) -> Result<()>;
}

/// One registered storage unit.
pub struct StorageUnit {
    header: ObjectHeader,
    /// Logical unit name, e.g. `hd0`.
    pub name: String,
    pub driver: Arc<dyn StorageDriver>,
    pub geometry: DiskGeometry,
    pub access: AccessFlags,
}

impl KernelObject for StorageUnit {
    const KIND: ObjectKind = ObjectKind::Disk;
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

/// Storage unit id.
pub type DiskId = ObjectId<StorageUnit>;

/// All registered storage units.
pub static DISKS: Registry<StorageUnit> = Registry::new();

/// Sector transfer request as carried across the driver-call ABI.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IoControl {
    /// Raw id of the target storage unit.
    pub disk: u32,
    pub sector: u64,
    pub count: u32,
    /// Caller buffer address.
    pub buffer: u32,
    pub buffer_size: u32,
}

/// Register a unit under the next `hdN` name.
pub fn register_disk(driver: Arc<dyn StorageDriver>) -> DiskId {
    extern crate alloc;
    use alloc::format;

    let geometry = driver.geometry();
    let id = DISKS.insert(StorageUnit {
        header: ObjectHeader::new(ObjectKind::Disk),
        name: String::new(),
        driver,
        geometry,
        access: AccessFlags::empty(),
    });
    // The slot index is unique for the unit's lifetime; derive the
    // stable `hdN` name from it.
    let name = format!("hd{}", id.index());
    let _ = DISKS.with_mut(id, |unit| unit.name = name.clone());
    log::info!(
        "disk {}: {} sectors of {} bytes",
        name,
        geometry.sector_count,
        geometry.bytes_per_sector
    );
    id
}

fn check_transfer(unit: &StorageUnit, sector: u64, count: u32, len: usize, write: bool) -> Result<()> {
    if unit.access.contains(AccessFlags::DISABLED) {
        return Err(KernelError::NoDevice);
    }
    if write && unit.access.contains(AccessFlags::READ_ONLY) {
        return Err(KernelError::NoPermission);
    }
    if count == 0 {
        return Err(KernelError::BadParameter);
    }
    let span = u64::from(count);
    if sector.checked_add(span).is_none_or(|end| end > unit.geometry.sector_count) {
        return Err(KernelError::BadParameter);
    }
    if len < (count * unit.geometry.bytes_per_sector) as usize {
        return Err(KernelError::BadParameter);
    }
    Ok(())
}

/// Read sectors from a registered unit.
pub fn read_sectors(disk: DiskId, sector: u64, count: u32, buffer: &mut [u8]) -> Result<()> {
    let driver = DISKS.with(disk, |unit| {
        check_transfer(unit, sector, count, buffer.len(), false).map(|()| unit.driver.clone())
    })??;
    driver.read_sectors(sector, count, buffer)
}

/// Write sectors to a registered unit.
pub fn write_sectors(disk: DiskId, sector: u64, count: u32, data: &[u8]) -> Result<()> {
    let driver = DISKS.with(disk, |unit| {
        check_transfer(unit, sector, count, data.len(), true).map(|()| unit.driver.clone())
    })??;
    driver.write_sectors(sector, count, data)
}

/// Change a unit's access flags.
pub fn set_access(disk: DiskId, access: AccessFlags) -> Result<()> {
    DISKS.with_mut(disk, |unit| unit.access = access)
}

/// Geometry of a registered unit.
pub fn disk_info(disk: DiskId) -> Result<DiskGeometry> {
    DISKS.with(disk, |unit| unit.geometry)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;

    fn test_disk(sectors: u64) -> DiskId {
        register_disk(Arc::new(RamDisk::new(512, sectors)))
    }

    #[test]
    fn write_then_read_round_trips() {
        let disk = test_disk(64);
        let pattern: std::vec::Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        write_sectors(disk, 3, 2, &pattern).unwrap();
        let mut back = std::vec![0u8; 1024];
        read_sectors(disk, 3, 2, &mut back).unwrap();
        assert_eq!(back, pattern);
    }

    #[test]
    fn fresh_disk_reads_zero_filled() {
        let disk = test_disk(16);
        let mut sector = std::vec![0xFFu8; 512];
        read_sectors(disk, 0, 1, &mut sector).unwrap();
        assert!(sector.iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_transfers_are_rejected() {
        let disk = test_disk(16);
        let mut buffer = std::vec![0u8; 512];
        assert_eq!(
            read_sectors(disk, 16, 1, &mut buffer),
            Err(KernelError::BadParameter)
        );
        assert_eq!(
            read_sectors(disk, 15, 2, &mut buffer),
            Err(KernelError::BadParameter)
        );
        assert_eq!(
            read_sectors(disk, 0, 2, &mut buffer),
            Err(KernelError::BadParameter),
            "buffer shorter than the transfer"
        );
    }

    #[test]
    fn read_only_units_refuse_writes() {
        let disk = test_disk(16);
        set_access(disk, AccessFlags::READ_ONLY).unwrap();
        let data = std::vec![0u8; 512];
        assert_eq!(
            write_sectors(disk, 0, 1, &data),
            Err(KernelError::NoPermission)
        );
        let mut buffer = std::vec![0u8; 512];
        read_sectors(disk, 0, 1, &mut buffer).unwrap();
    }

    #[test]
    fn disabled_units_refuse_everything() {
        let disk = test_disk(16);
        set_access(disk, AccessFlags::DISABLED).unwrap();
        let mut buffer = std::vec![0u8; 512];
        assert_eq!(
            read_sectors(disk, 0, 1, &mut buffer),
            Err(KernelError::NoDevice)
        );
    }
}
