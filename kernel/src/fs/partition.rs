//! MBR partition tables and filesystem-format probing.
//!
//! The classic layout: four 16-byte entries at offset `0x1BE` of sector
//! zero, closed by the `0x55 0xAA` signature. Parsing and serialization
//! are byte-exact inverses so a table can round-trip untouched. The
//! partition-type byte selects the candidate format; the volume's own
//! magic confirms it.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, Result};

/// Bytes per MBR sector.
pub const MBR_SIZE: usize = 512;
/// Offset of the first partition entry.
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
/// Entries in the table.
pub const PARTITION_COUNT: usize = 4;
/// Boot signature at offset 0x1FE.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Partition-type bytes the mount scan recognizes.
pub const TYPE_NTFS: u8 = 0x07;
pub const TYPE_FAT32_CHS: u8 = 0x0B;
pub const TYPE_FAT32_LBA: u8 = 0x0C;
pub const TYPE_LINUX: u8 = 0x83;
pub const TYPE_PROTECTIVE_GPT: u8 = 0xEE;
pub const TYPE_EXOS: u8 = 0xF8;

/// Table layout found on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    Mbr,
    /// Protective-MBR disk; the real table is GPT.
    Gpt,
    /// No table: the whole unit is one virtual volume.
    Virtual,
}

/// Filesystem format of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFormat {
    Fat32,
    Ntfs,
    Ext2,
    Exfs,
    Unknown(u8),
}

impl FsFormat {
    pub fn from_type_byte(type_byte: u8) -> Self {
        match type_byte {
            TYPE_FAT32_CHS | TYPE_FAT32_LBA => FsFormat::Fat32,
            TYPE_NTFS => FsFormat::Ntfs,
            TYPE_LINUX => FsFormat::Ext2,
            TYPE_EXOS => FsFormat::Exfs,
            other => FsFormat::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FsFormat::Fat32 => "FAT32",
            FsFormat::Ntfs => "NTFS",
            FsFormat::Ext2 => "EXT2",
            FsFormat::Exfs => "EXFS",
            FsFormat::Unknown(_) => "unknown",
        }
    }
}

/// A 3-byte packed cylinder/head/sector address, kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Chs(pub [u8; 3]);

/// One partition-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    /// 0x80 boot flag.
    pub bootable: bool,
    pub first_chs: Chs,
    pub type_byte: u8,
    pub last_chs: Chs,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn is_empty(&self) -> bool {
        self.type_byte == 0 || self.sector_count == 0
    }

    fn parse(bytes: &[u8]) -> Self {
        Self {
            bootable: bytes[0] & 0x80 != 0,
            first_chs: Chs([bytes[1], bytes[2], bytes[3]]),
            type_byte: bytes[4],
            last_chs: Chs([bytes[5], bytes[6], bytes[7]]),
            start_lba: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sector_count: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    fn serialize(&self, bytes: &mut [u8]) {
        bytes[0] = if self.bootable { 0x80 } else { 0x00 };
        bytes[1..4].copy_from_slice(&self.first_chs.0);
        bytes[4] = self.type_byte;
        bytes[5..8].copy_from_slice(&self.last_chs.0);
        bytes[8..12].copy_from_slice(&self.start_lba.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.sector_count.to_le_bytes());
    }
}

/// A parsed master boot record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterBootRecord {
    /// Boot code and disk id area, preserved byte-for-byte.
    pub boot_code: [u8; PARTITION_TABLE_OFFSET],
    pub entries: [PartitionEntry; PARTITION_COUNT],
}

impl MasterBootRecord {
    /// Parse sector zero. A missing boot signature means no table.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < MBR_SIZE {
            return Err(KernelError::BadParameter);
        }
        if sector[0x1FE..0x200] != BOOT_SIGNATURE {
            return Err(KernelError::BadParameter);
        }
        let mut boot_code = [0u8; PARTITION_TABLE_OFFSET];
        boot_code.copy_from_slice(&sector[..PARTITION_TABLE_OFFSET]);
        let mut entries = [PartitionEntry::default(); PARTITION_COUNT];
        for (index, entry) in entries.iter_mut().enumerate() {
            let at = PARTITION_TABLE_OFFSET + index * 16;
            *entry = PartitionEntry::parse(&sector[at..at + 16]);
        }
        Ok(Self { boot_code, entries })
    }

    /// Serialize back to a full sector, the exact inverse of `parse`.
    pub fn serialize(&self) -> [u8; MBR_SIZE] {
        let mut sector = [0u8; MBR_SIZE];
        sector[..PARTITION_TABLE_OFFSET].copy_from_slice(&self.boot_code);
        for (index, entry) in self.entries.iter().enumerate() {
            let at = PARTITION_TABLE_OFFSET + index * 16;
            entry.serialize(&mut sector[at..at + 16]);
        }
        sector[0x1FE..0x200].copy_from_slice(&BOOT_SIGNATURE);
        sector
    }

    /// Scheme carried by this record.
    pub fn scheme(&self) -> PartitionScheme {
        if self
            .entries
            .iter()
            .any(|e| !e.is_empty() && e.type_byte == TYPE_PROTECTIVE_GPT)
        {
            PartitionScheme::Gpt
        } else {
            PartitionScheme::Mbr
        }
    }

    /// Non-empty entries in table order.
    pub fn partitions(&self) -> Vec<PartitionEntry> {
        self.entries.iter().filter(|e| !e.is_empty()).copied().collect()
    }
}

/// Magic signatures confirming a format on the volume's first sectors.
pub mod magic {
    /// FAT32/NTFS volume boot records end in the boot signature.
    pub const VBR_MARK: [u8; 2] = [0x55, 0xAA];
    /// NTFS OEM id at offset 3.
    pub const NTFS_OEM: &[u8; 4] = b"NTFS";
    /// EXT2 superblock magic at offset 56 of the superblock.
    pub const EXT2: u16 = 0xEF53;
    /// Native filesystem superblock signature.
    pub const EXFS: &[u8; 4] = b"EXOS";
}

/// Confirm a candidate format against the partition's first sector (the
/// VBR or superblock image). An unreadable or contradicting volume
/// demotes the format to `Unknown`.
pub fn confirm_format(candidate: FsFormat, volume_start: &[u8]) -> FsFormat {
    let confirmed = match candidate {
        FsFormat::Fat32 => {
            volume_start.len() >= MBR_SIZE && volume_start[0x1FE..0x200] == magic::VBR_MARK
        }
        FsFormat::Ntfs => volume_start.get(3..7) == Some(magic::NTFS_OEM.as_slice()),
        FsFormat::Ext2 => {
            // The superblock sits 1024 bytes into the volume; callers
            // hand the first four sectors.
            volume_start
                .get(1024 + 56..1024 + 58)
                .map(|m| u16::from_le_bytes([m[0], m[1]]) == magic::EXT2)
                .unwrap_or(false)
        }
        FsFormat::Exfs => volume_start.get(..4) == Some(magic::EXFS.as_slice()),
        FsFormat::Unknown(_) => false,
    };
    if confirmed {
        candidate
    } else {
        match candidate {
            FsFormat::Unknown(byte) => FsFormat::Unknown(byte),
            other => {
                log::warn!("partition type {} failed its magic probe", other.name());
                FsFormat::Unknown(0)
            }
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    pub(crate) fn sample_sector() -> [u8; MBR_SIZE] {
        let mut sector = [0u8; MBR_SIZE];
        sector[..16].copy_from_slice(b"fake boot code..");
        // One FAT32 partition: LBA 2048, 204800 sectors.
        let at = PARTITION_TABLE_OFFSET;
        sector[at] = 0x80;
        sector[at + 1..at + 4].copy_from_slice(&[0x20, 0x21, 0x00]);
        sector[at + 4] = TYPE_FAT32_CHS;
        sector[at + 5..at + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        sector[at + 8..at + 12].copy_from_slice(&2048u32.to_le_bytes());
        sector[at + 12..at + 16].copy_from_slice(&204_800u32.to_le_bytes());
        sector[0x1FE] = 0x55;
        sector[0x1FF] = 0xAA;
        sector
    }

    #[test]
    fn parse_reads_the_table() {
        let mbr = MasterBootRecord::parse(&sample_sector()).unwrap();
        assert_eq!(mbr.scheme(), PartitionScheme::Mbr);
        let parts = mbr.partitions();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].bootable);
        assert_eq!(parts[0].type_byte, TYPE_FAT32_CHS);
        assert_eq!(parts[0].start_lba, 2048);
        assert_eq!(parts[0].sector_count, 204_800);
    }

    #[test]
    fn serialize_is_byte_exact() {
        let sector = sample_sector();
        let mbr = MasterBootRecord::parse(&sector).unwrap();
        let back = mbr.serialize();
        assert_eq!(back[..], sector[..], "round trip reproduces every byte");
        let again = MasterBootRecord::parse(&back).unwrap();
        assert_eq!(again, mbr);
    }

    #[test]
    fn missing_signature_is_no_table() {
        let mut sector = sample_sector();
        sector[0x1FE] = 0;
        assert!(MasterBootRecord::parse(&sector).is_err());
    }

    #[test]
    fn protective_entry_flags_gpt() {
        let mut sector = sample_sector();
        sector[PARTITION_TABLE_OFFSET + 4] = TYPE_PROTECTIVE_GPT;
        let mbr = MasterBootRecord::parse(&sector).unwrap();
        assert_eq!(mbr.scheme(), PartitionScheme::Gpt);
    }

    #[test]
    fn type_bytes_map_to_formats() {
        assert_eq!(FsFormat::from_type_byte(0x0B), FsFormat::Fat32);
        assert_eq!(FsFormat::from_type_byte(0x0C), FsFormat::Fat32);
        assert_eq!(FsFormat::from_type_byte(0x07), FsFormat::Ntfs);
        assert_eq!(FsFormat::from_type_byte(0x83), FsFormat::Ext2);
        assert_eq!(FsFormat::from_type_byte(0xF8), FsFormat::Exfs);
        assert_eq!(FsFormat::from_type_byte(0x42), FsFormat::Unknown(0x42));
    }

    #[test]
    fn magic_probe_confirms_or_demotes() {
        let mut vbr = [0u8; MBR_SIZE];
        vbr[0x1FE] = 0x55;
        vbr[0x1FF] = 0xAA;
        assert_eq!(confirm_format(FsFormat::Fat32, &vbr), FsFormat::Fat32);
        assert_eq!(
            confirm_format(FsFormat::Ntfs, &vbr),
            FsFormat::Unknown(0),
            "FAT mark does not validate NTFS"
        );

        let mut ntfs = [0u8; MBR_SIZE];
        ntfs[3..7].copy_from_slice(magic::NTFS_OEM);
        assert_eq!(confirm_format(FsFormat::Ntfs, &ntfs), FsFormat::Ntfs);

        let mut exfs = [0u8; MBR_SIZE];
        exfs[..4].copy_from_slice(magic::EXFS);
        assert_eq!(confirm_format(FsFormat::Exfs, &exfs), FsFormat::Exfs);
    }
}
