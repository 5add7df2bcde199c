//! End-to-end partition discovery over an in-memory disk: MBR parse,
//! magic probing, volume registration, and file traffic through the
//! mounted driver.

use std::sync::Arc;

use exos_kernel::drivers::ramdisk::RamDisk;
use exos_kernel::drivers::storage::{self, register_disk};
use exos_kernel::fs::{self, partition, FsFormat, OpenFlags, PartitionScheme};

const SECTOR: usize = 512;

fn mbr_disk() -> storage::DiskId {
    let mut image = vec![0u8; SECTOR * 8192];

    // Partition 1: FAT32 at LBA 2048, 4096 sectors.
    let at = partition::PARTITION_TABLE_OFFSET;
    image[at] = 0x80;
    image[at + 4] = partition::TYPE_FAT32_CHS;
    image[at + 8..at + 12].copy_from_slice(&2048u32.to_le_bytes());
    image[at + 12..at + 16].copy_from_slice(&4096u32.to_le_bytes());

    // Partition 2: NTFS at LBA 6144, 1024 sectors.
    let at2 = at + 16;
    image[at2 + 4] = partition::TYPE_NTFS;
    image[at2 + 8..at2 + 12].copy_from_slice(&6144u32.to_le_bytes());
    image[at2 + 12..at2 + 16].copy_from_slice(&1024u32.to_le_bytes());

    image[0x1FE] = 0x55;
    image[0x1FF] = 0xAA;

    // FAT32 VBR mark.
    let vbr = 2048 * SECTOR;
    image[vbr + 0x1FE] = 0x55;
    image[vbr + 0x1FF] = 0xAA;

    // NTFS OEM id.
    let ntfs = 6144 * SECTOR;
    image[ntfs + 3..ntfs + 7].copy_from_slice(partition::magic::NTFS_OEM);

    register_disk(Arc::new(RamDisk::with_image(SECTOR as u32, 8192, &image)))
}

#[test]
fn discovery_mounts_both_partitions_with_correct_descriptors() {
    let disk = mbr_disk();
    let disk_name = storage::DISKS.with(disk, |unit| unit.name.clone()).unwrap();
    let volumes = fs::scan_disk(disk).unwrap();
    assert_eq!(volumes.len(), 2);

    fs::FILESYSTEMS
        .with(volumes[0], |f| {
            assert_eq!(f.name, format!("{disk_name}p1"));
            assert_eq!(f.partition.format, FsFormat::Fat32);
            assert_eq!(f.partition.scheme, PartitionScheme::Mbr);
            assert_eq!(f.partition.start_sector, 2048);
            assert_eq!(f.partition.sector_count, 4096);
            assert!(f.mounted);
        })
        .unwrap();

    fs::FILESYSTEMS
        .with(volumes[1], |f| {
            assert_eq!(f.name, format!("{disk_name}p2"));
            assert_eq!(f.partition.format, FsFormat::Ntfs);
            assert_eq!(f.partition.start_sector, 6144);
            assert!(f.mounted);
        })
        .unwrap();
}

#[test]
fn every_registered_volume_fits_inside_its_unit() {
    let disk = mbr_disk();
    let _ = fs::scan_disk(disk).unwrap();
    for id in fs::FILESYSTEMS.ids() {
        let checked = fs::FILESYSTEMS
            .with(id, |f| {
                let geometry = storage::disk_info(f.disk)?;
                Ok::<bool, exos_kernel::KernelError>(
                    f.partition.start_sector + f.partition.sector_count
                        <= geometry.sector_count,
                )
            })
            .unwrap()
            .unwrap();
        assert!(checked);
    }
}

#[test]
fn raw_volume_io_round_trips_through_the_mounted_driver() {
    let disk = mbr_disk();
    let volumes = fs::scan_disk(disk).unwrap();
    let driver = fs::FILESYSTEMS
        .with(volumes[0], |f| f.driver.clone().unwrap())
        .unwrap();

    let handle = driver
        .open("$volume", OpenFlags::READ | OpenFlags::WRITE)
        .unwrap();
    let payload = b"written through the filesystem layer";
    driver.write(handle, 1000, payload).unwrap();
    let mut back = vec![0u8; payload.len()];
    driver.read(handle, 1000, &mut back).unwrap();
    assert_eq!(&back, payload);
    driver.close(handle).unwrap();

    // The bytes landed inside the partition on the unit itself.
    let mut sector = vec![0u8; SECTOR];
    storage::read_sectors(disk, 2048 + 1, 1, &mut sector).unwrap();
    assert_eq!(&sector[1000 - SECTOR..1000 - SECTOR + payload.len()], payload);
}

#[test]
fn tableless_exfs_disk_mounts_as_virtual_volume_with_file_tree() {
    let mut image = vec![0u8; SECTOR * 64];
    image[..4].copy_from_slice(partition::magic::EXFS);
    let disk = register_disk(Arc::new(RamDisk::with_image(SECTOR as u32, 64, &image)));

    let volumes = fs::scan_disk(disk).unwrap();
    assert_eq!(volumes.len(), 1);
    let name = fs::FILESYSTEMS
        .with(volumes[0], |f| {
            assert_eq!(f.partition.scheme, PartitionScheme::Virtual);
            assert_eq!(f.partition.format, FsFormat::Exfs);
            f.name.clone()
        })
        .unwrap();

    // The native volume carries a real tree.
    let path = format!("{name}/boot.cfg");
    let file = fs::file::open_file(&path, OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
    fs::file::write_file(file, b"shell=hd0p0/bin/shell").unwrap();
    fs::file::close_file(file).unwrap();

    let again = fs::file::open_file(&path, OpenFlags::READ).unwrap();
    assert_eq!(fs::file::file_size(again).unwrap(), 21);
    fs::file::close_file(again).unwrap();
}
