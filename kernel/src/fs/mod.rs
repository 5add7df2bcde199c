//! Filesystem layer: the uniform filesystem-driver contract, mounted and
//! unmounted volume registries, and boot-time partition discovery.

#![allow(dead_code)]

extern crate alloc;

pub mod blockdev;
pub mod file;
pub mod partition;
pub mod ramfs;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::drivers::storage::{self, DiskId};
use crate::error::{KernelError, Result};
use crate::object::{KernelObject, ObjectHeader, ObjectId, ObjectKind, Registry};
use crate::sync::mutex::KernelMutex;
use crate::sync::{MutexGuard, FILESYSTEM_MUTEX};

pub use file::{DirEntry, FileId, OpenFlags};
pub use partition::{FsFormat, PartitionScheme};

/// Filesystem driver contract.
///
/// Handles are driver-scoped; the open-file layer above owns position
/// and access bookkeeping.
pub trait FileSystemDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a file by volume-relative path.
    fn open(&self, path: &str, flags: OpenFlags) -> Result<u32>;

    fn close(&self, handle: u32) -> Result<()>;

    /// Read from an absolute position; returns bytes read.
    fn read(&self, handle: u32, position: u64, buffer: &mut [u8]) -> Result<u32>;

    /// Write at an absolute position; returns bytes written.
    fn write(&self, handle: u32, position: u64, data: &[u8]) -> Result<u32>;

    fn size_of(&self, handle: u32) -> Result<u64>;

    fn create_folder(&self, path: &str) -> Result<()>;

    fn delete(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool;

    /// Entries of a directory, for `FindFirst`/`FindNext` iteration.
    fn list(&self, path: &str) -> Result<Vec<DirEntry>>;
}

/// Where a volume sits on its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub scheme: PartitionScheme,
    pub type_byte: u8,
    pub format: FsFormat,
    pub start_sector: u64,
    pub sector_count: u64,
}

/// One discovered volume.
pub struct FileSystem {
    header: ObjectHeader,
    /// Logical name, e.g. `hd0p1`.
    pub name: String,
    pub disk: DiskId,
    pub partition: PartitionDescriptor,
    pub mounted: bool,
    pub driver: Option<Arc<dyn FileSystemDriver>>,
    /// Serializes mount-state changes on this volume.
    pub mount_mutex: KernelMutex,
}

impl KernelObject for FileSystem {
    const KIND: ObjectKind = ObjectKind::FileSystem;
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

/// Filesystem id.
pub type FsId = ObjectId<FileSystem>;

/// Every discovered volume, mounted or not.
pub static FILESYSTEMS: Registry<FileSystem> = Registry::new();

/// Ids of mounted volumes.
pub fn mounted_filesystems() -> Vec<FsId> {
    FILESYSTEMS
        .ids()
        .into_iter()
        .filter(|id| FILESYSTEMS.with(*id, |fs| fs.mounted).unwrap_or(false))
        .collect()
}

/// Ids of discovered but unmounted volumes.
pub fn unmounted_filesystems() -> Vec<FsId> {
    FILESYSTEMS
        .ids()
        .into_iter()
        .filter(|id| !FILESYSTEMS.with(*id, |fs| fs.mounted).unwrap_or(true))
        .collect()
}

/// Find a volume by logical name.
pub fn filesystem_by_name(name: &str) -> Option<FsId> {
    FILESYSTEMS
        .ids()
        .into_iter()
        .find(|id| FILESYSTEMS.with(*id, |fs| fs.name == name).unwrap_or(false))
}

/// Pick the driver for a confirmed format.
///
/// The native format gets the in-memory tree driver when the volume is
/// RAM-backed; every other recognized format is exposed through the raw
/// block driver until its parser is loaded.
fn driver_for(
    format: FsFormat,
    disk: DiskId,
    descriptor: &PartitionDescriptor,
) -> Option<Arc<dyn FileSystemDriver>> {
    match format {
        FsFormat::Unknown(_) => None,
        FsFormat::Exfs => Some(Arc::new(ramfs::RamFs::new())),
        _ => Some(Arc::new(blockdev::RawVolumeDriver::new(
            disk,
            descriptor.start_sector,
            descriptor.sector_count,
        ))),
    }
}

/// Register one discovered volume; invalid geometry is refused.
pub fn register_volume(
    disk: DiskId,
    name: String,
    descriptor: PartitionDescriptor,
) -> Result<FsId> {
    let geometry = storage::disk_info(disk)?;
    let end = descriptor
        .start_sector
        .checked_add(descriptor.sector_count)
        .ok_or(KernelError::BadParameter)?;
    if end > geometry.sector_count {
        log::warn!(
            "volume {} exceeds its unit ({} > {} sectors), refused",
            name,
            end,
            geometry.sector_count
        );
        return Err(KernelError::BadParameter);
    }

    let driver = driver_for(descriptor.format, disk, &descriptor);
    let mounted = driver.is_some();
    let id = FILESYSTEMS.insert(FileSystem {
        header: ObjectHeader::new(ObjectKind::FileSystem),
        name: name.clone(),
        disk,
        partition: descriptor,
        mounted,
        driver,
        mount_mutex: KernelMutex::new_dynamic(),
    });
    log::info!(
        "volume {}: {} at sector {}, {} sectors, {}",
        name,
        descriptor.format.name(),
        descriptor.start_sector,
        descriptor.sector_count,
        if mounted { "mounted" } else { "unmounted" }
    );
    Ok(id)
}

/// Probe one unit: read its MBR, confirm each partition's format by
/// magic, and register the volumes.
pub fn scan_disk(disk: DiskId) -> Result<Vec<FsId>> {
    let _fs = MutexGuard::lock(&FILESYSTEM_MUTEX);

    let geometry = storage::disk_info(disk)?;
    let disk_name = storage::DISKS.with(disk, |unit| unit.name.clone())?;
    let sector_size = geometry.bytes_per_sector as usize;

    let mut sector0 = alloc::vec![0u8; sector_size.max(partition::MBR_SIZE)];
    storage::read_sectors(disk, 0, 1, &mut sector0[..sector_size])?;

    let mut found = Vec::new();
    match partition::MasterBootRecord::parse(&sector0) {
        Ok(mbr) => {
            let scheme = mbr.scheme();
            for (index, entry) in mbr.partitions().iter().enumerate() {
                let candidate = FsFormat::from_type_byte(entry.type_byte);

                // Confirm against the first sectors of the volume.
                let mut volume_start = alloc::vec![0u8; sector_size * 4];
                let probe_sectors = 4u64
                    .min(geometry.sector_count.saturating_sub(u64::from(entry.start_lba)))
                    as u32;
                let format = if probe_sectors > 0
                    && storage::read_sectors(
                        disk,
                        u64::from(entry.start_lba),
                        probe_sectors,
                        &mut volume_start[..sector_size * probe_sectors as usize],
                    )
                    .is_ok()
                {
                    partition::confirm_format(candidate, &volume_start)
                } else {
                    FsFormat::Unknown(entry.type_byte)
                };

                let descriptor = PartitionDescriptor {
                    scheme,
                    type_byte: entry.type_byte,
                    format,
                    start_sector: u64::from(entry.start_lba),
                    sector_count: u64::from(entry.sector_count),
                };
                let name = alloc::format!("{}p{}", disk_name, index + 1);
                if let Ok(id) = register_volume(disk, name, descriptor) {
                    found.push(id);
                }
            }
        }
        Err(_) => {
            // No table: treat the whole unit as one virtual volume and
            // probe its start directly.
            let format = partition::confirm_format(FsFormat::Exfs, &sector0);
            let descriptor = PartitionDescriptor {
                scheme: PartitionScheme::Virtual,
                type_byte: partition::TYPE_EXOS,
                format,
                start_sector: 0,
                sector_count: geometry.sector_count,
            };
            let name = alloc::format!("{}p0", disk_name);
            if let Ok(id) = register_volume(disk, name, descriptor) {
                found.push(id);
            }
        }
    }
    Ok(found)
}

/// Boot-time pass over every registered unit.
pub fn initialize_filesystems() {
    for disk in storage::DISKS.ids() {
        match scan_disk(disk) {
            Ok(volumes) => {
                log::debug!("disk {:?}: {} volumes", disk, volumes.len());
            }
            Err(error) => {
                log::warn!("disk {:?}: partition scan failed: {}", disk, error);
            }
        }
    }
    log::info!(
        "filesystems: {} mounted, {} unmounted",
        mounted_filesystems().len(),
        unmounted_filesystems().len()
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::drivers::storage::register_disk;

    fn disk_with_fat32_partition() -> DiskId {
        let mut image = std::vec![0u8; 512 * 4096];
        // MBR with one FAT32 partition at LBA 2048.
        let at = partition::PARTITION_TABLE_OFFSET;
        image[at] = 0x80;
        image[at + 4] = partition::TYPE_FAT32_CHS;
        image[at + 8..at + 12].copy_from_slice(&2048u32.to_le_bytes());
        image[at + 12..at + 16].copy_from_slice(&2000u32.to_le_bytes());
        image[0x1FE] = 0x55;
        image[0x1FF] = 0xAA;
        // FAT32 VBR mark at the partition start.
        let vbr = 2048 * 512;
        image[vbr + 0x1FE] = 0x55;
        image[vbr + 0x1FF] = 0xAA;
        register_disk(std::sync::Arc::new(RamDisk::with_image(512, 4096, &image)))
    }

    #[test]
    fn fat32_partition_is_discovered_and_mounted() {
        let disk = disk_with_fat32_partition();
        let volumes = scan_disk(disk).unwrap();
        assert_eq!(volumes.len(), 1);
        FILESYSTEMS
            .with(volumes[0], |fs| {
                assert!(fs.name.ends_with("p1"));
                assert_eq!(fs.partition.format, FsFormat::Fat32);
                assert_eq!(fs.partition.start_sector, 2048);
                assert_eq!(fs.partition.sector_count, 2000);
                assert_eq!(fs.partition.scheme, PartitionScheme::Mbr);
                assert!(fs.mounted);
            })
            .unwrap();
    }

    #[test]
    fn oversized_partition_is_refused() {
        let disk = register_disk(std::sync::Arc::new(RamDisk::new(512, 64)));
        let descriptor = PartitionDescriptor {
            scheme: PartitionScheme::Mbr,
            type_byte: partition::TYPE_FAT32_CHS,
            format: FsFormat::Fat32,
            start_sector: 32,
            sector_count: 64,
        };
        assert!(register_volume(disk, String::from("bogus"), descriptor).is_err());
    }

    #[test]
    fn every_mounted_volume_fits_its_unit() {
        let disk = disk_with_fat32_partition();
        let _ = scan_disk(disk);
        for id in mounted_filesystems() {
            let ok = FILESYSTEMS
                .with(id, |fs| {
                    let geometry = storage::disk_info(fs.disk).unwrap();
                    fs.partition.start_sector + fs.partition.sector_count
                        <= geometry.sector_count
                })
                .unwrap();
            assert!(ok);
        }
    }

    #[test]
    fn untabled_disk_becomes_a_virtual_volume() {
        let mut image = std::vec![0u8; 512 * 16];
        image[..4].copy_from_slice(partition::magic::EXFS);
        let disk = register_disk(std::sync::Arc::new(RamDisk::with_image(512, 16, &image)));
        let volumes = scan_disk(disk).unwrap();
        assert_eq!(volumes.len(), 1);
        FILESYSTEMS
            .with(volumes[0], |fs| {
                assert_eq!(fs.partition.scheme, PartitionScheme::Virtual);
                assert_eq!(fs.partition.format, FsFormat::Exfs);
                assert!(fs.mounted);
            })
            .unwrap();
    }
}
