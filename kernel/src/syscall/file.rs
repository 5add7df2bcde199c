//! File and volume syscalls.

extern crate alloc;

use super::base::status_return;
use super::{
    caller_range_valid, read_user, read_user_string, result_to_return, set_last_error,
    write_user, write_user_bytes, SYSCALL_FAILED,
};
use crate::error::KernelError;
use crate::fs::{self, file as vfs, FileId, OpenFlags};

/// Longest accepted path.
pub const MAX_PATH: u32 = 256;

/// Argument block for `OpenFile`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct OpenFileArgs {
    /// NUL-terminated volume-qualified path.
    pub path: u32,
    /// [`OpenFlags`] bits.
    pub flags: u32,
}

/// Argument block for `ReadFile`/`WriteFile`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TransferArgs {
    pub file: u32,
    pub buffer: u32,
    pub size: u32,
}

/// Argument block for `SetFilePosition`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SetPositionArgs {
    pub file: u32,
    pub position_low: u32,
    pub position_high: u32,
}

/// Argument block for `EnumVolumes`/`ListUsers`-style string lists.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct StringListArgs {
    pub buffer: u32,
    pub buffer_size: u32,
}

/// Argument block for `GetVolumeInfo`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct VolumeInfoArgs {
    /// NUL-terminated volume name.
    pub name: u32,
    pub out: u32,
}

/// Volume description returned to callers.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct VolumeInfoOut {
    /// Partition type byte.
    pub type_byte: u32,
    pub start_low: u32,
    pub start_high: u32,
    pub sectors_low: u32,
    pub sectors_high: u32,
    pub mounted: u32,
}

/// Argument block for `FindFirst`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FindFirstArgs {
    pub path: u32,
    pub out: u32,
}

/// Argument block for `FindNext`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FindNextArgs {
    pub iterator: u32,
    pub out: u32,
}

/// Directory entry returned to callers.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DirEntryOut {
    pub name: [u8; 64],
    pub directory: u32,
    pub size_low: u32,
    pub size_high: u32,
}

impl From<&fs::DirEntry> for DirEntryOut {
    fn from(entry: &fs::DirEntry) -> Self {
        let mut name = [0u8; 64];
        let take = entry.name.len().min(63);
        name[..take].copy_from_slice(&entry.name.as_bytes()[..take]);
        Self {
            name,
            directory: u32::from(entry.directory),
            size_low: entry.size as u32,
            size_high: (entry.size >> 32) as u32,
        }
    }
}

/// Write a list of names as NUL-separated strings; returns the count.
fn write_string_list(args: &StringListArgs, names: &[alloc::string::String]) -> u32 {
    let mut offset = 0u32;
    let mut written = 0u32;
    for name in names {
        let needed = name.len() as u32 + 1;
        if offset + needed > args.buffer_size {
            break;
        }
        if write_user_bytes(args.buffer + offset, name.as_bytes()).is_err()
            || write_user_bytes(args.buffer + offset + name.len() as u32, &[0]).is_err()
        {
            set_last_error(KernelError::BadParameter.code());
            return SYSCALL_FAILED;
        }
        offset += needed;
        written += 1;
    }
    written
}

pub fn sys_enum_volumes(parameter: u32) -> u32 {
    let args = match read_user::<StringListArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    let names: alloc::vec::Vec<_> = fs::FILESYSTEMS
        .ids()
        .into_iter()
        .filter_map(|id| fs::FILESYSTEMS.with(id, |f| f.name.clone()).ok())
        .collect();
    write_string_list(&args, &names)
}

pub fn sys_get_volume_info(parameter: u32) -> u32 {
    let result = read_user::<VolumeInfoArgs>(parameter).and_then(|args| {
        let name = read_user_string(args.name, MAX_PATH)?;
        let id = fs::filesystem_by_name(&name).ok_or(KernelError::NoDevice)?;
        let out = fs::FILESYSTEMS.with(id, |f| VolumeInfoOut {
            type_byte: u32::from(f.partition.type_byte),
            start_low: f.partition.start_sector as u32,
            start_high: (f.partition.start_sector >> 32) as u32,
            sectors_low: f.partition.sector_count as u32,
            sectors_high: (f.partition.sector_count >> 32) as u32,
            mounted: u32::from(f.mounted),
        })?;
        write_user(args.out, &out)
    });
    status_return(result)
}

pub fn sys_open_file(parameter: u32) -> u32 {
    let result = read_user::<OpenFileArgs>(parameter).and_then(|args| {
        let path = read_user_string(args.path, MAX_PATH)?;
        vfs::open_file(&path, OpenFlags::from_bits_truncate(args.flags))
    });
    result_to_return(result.map(|id| id.to_raw()))
}

pub fn sys_read_file(parameter: u32) -> u32 {
    let args = match read_user::<TransferArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    if !caller_range_valid(args.buffer, args.size) {
        set_last_error(KernelError::BadParameter.code());
        return SYSCALL_FAILED;
    }
    // SAFETY: the destination range was validated against the calling
    // space; this handler only runs on the bare-metal target where the
    // gate delivers real caller pointers.
    let buffer =
        unsafe { core::slice::from_raw_parts_mut(args.buffer as *mut u8, args.size as usize) };
    result_to_return(vfs::read_file(FileId::from_raw(args.file), buffer))
}

pub fn sys_write_file(parameter: u32) -> u32 {
    let args = match read_user::<TransferArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    if !caller_range_valid(args.buffer, args.size) {
        set_last_error(KernelError::BadParameter.code());
        return SYSCALL_FAILED;
    }
    // SAFETY: as in sys_read_file.
    let data =
        unsafe { core::slice::from_raw_parts(args.buffer as *const u8, args.size as usize) };
    result_to_return(vfs::write_file(FileId::from_raw(args.file), data))
}

/// Sizes above 4 GiB saturate the 32-bit return; callers needing the
/// full width use `GetVolumeInfo`-style blocks.
pub fn sys_get_file_size(parameter: u32) -> u32 {
    result_to_return(
        vfs::file_size(FileId::from_raw(parameter)).map(|size| size.min(u64::from(u32::MAX - 1)) as u32),
    )
}

pub fn sys_get_file_position(parameter: u32) -> u32 {
    result_to_return(
        vfs::get_position(FileId::from_raw(parameter))
            .map(|position| position.min(u64::from(u32::MAX - 1)) as u32),
    )
}

pub fn sys_set_file_position(parameter: u32) -> u32 {
    status_return(read_user::<SetPositionArgs>(parameter).and_then(|args| {
        let position = u64::from(args.position_low) | (u64::from(args.position_high) << 32);
        vfs::set_position(FileId::from_raw(args.file), position)
    }))
}

pub fn sys_find_first(parameter: u32) -> u32 {
    let result = read_user::<FindFirstArgs>(parameter).and_then(|args| {
        let path = read_user_string(args.path, MAX_PATH)?;
        let (iterator, first) = vfs::find_first(&path)?;
        if let Some(entry) = first {
            write_user(args.out, &DirEntryOut::from(&entry))?;
        } else {
            let _ = vfs::close_file(iterator);
            return Err(KernelError::NoDevice);
        }
        Ok(iterator.to_raw())
    });
    result_to_return(result)
}

pub fn sys_find_next(parameter: u32) -> u32 {
    let result = read_user::<FindNextArgs>(parameter).and_then(|args| {
        match vfs::find_next(FileId::from_raw(args.iterator))? {
            Some(entry) => {
                write_user(args.out, &DirEntryOut::from(&entry))?;
                Ok(1u32)
            }
            None => {
                let _ = vfs::close_file(FileId::from_raw(args.iterator));
                Ok(0u32)
            }
        }
    });
    result_to_return(result)
}
