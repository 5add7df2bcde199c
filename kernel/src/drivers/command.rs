//! The numeric driver-command surface.
//!
//! External callers reach drivers through `int 0x81` with a function id
//! and one parameter word; this module keeps that ABI bit-compatible and
//! translates it onto the trait-based driver registry. Kernel code never
//! dispatches by number.

use crate::drivers::storage::{self, AccessFlags, DiskId, IoControl};
use crate::error::{KernelError, Result};

/// Driver-command function ids.
pub const FUNC_LOAD: u32 = 1;
pub const FUNC_UNLOAD: u32 = 2;
pub const FUNC_GET_VERSION: u32 = 3;
pub const FUNC_DISK_RESET: u32 = 8;
pub const FUNC_DISK_READ: u32 = 9;
pub const FUNC_DISK_WRITE: u32 = 10;
pub const FUNC_DISK_GET_INFO: u32 = 11;
pub const FUNC_DISK_SET_ACCESS: u32 = 12;

/// Driver interface version reported through `FUNC_GET_VERSION`.
pub const DRIVER_VERSION: u32 = 0x0001_0000;

/// Geometry answer for `FUNC_DISK_GET_INFO`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskInfo {
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub access: u32,
}

/// Execute one storage command against a decoded request.
pub fn execute_io(function: u32, control: &IoControl, data: &mut [u8]) -> Result<()> {
    let disk = DiskId::from_raw(control.disk);
    let needed = storage::disk_info(disk)?
        .bytes_per_sector
        .checked_mul(control.count)
        .ok_or(KernelError::BadParameter)? as usize;
    if (control.buffer_size as usize) < needed || data.len() < needed {
        return Err(KernelError::BadParameter);
    }
    match function {
        FUNC_DISK_READ => storage::read_sectors(disk, control.sector, control.count, data),
        FUNC_DISK_WRITE => storage::write_sectors(disk, control.sector, control.count, data),
        _ => Err(KernelError::NotImplemented),
    }
}

/// Gate entry: `function` in EAX, `parameter` in EBX, result in EAX.
/// `ERROR_SUCCESS` or an error code from the kernel error space.
#[cfg(target_os = "none")]
pub fn dispatch(function: u32, parameter: u32) -> u32 {
    let result = dispatch_inner(function, parameter);
    crate::error::code_of(&result)
}

#[cfg(target_os = "none")]
fn dispatch_inner(function: u32, parameter: u32) -> Result<()> {
    match function {
        FUNC_LOAD | FUNC_UNLOAD => Ok(()),
        FUNC_GET_VERSION => Ok(()),
        FUNC_DISK_RESET => {
            let disk = DiskId::from_raw(parameter);
            let driver = storage::DISKS.with(disk, |unit| unit.driver.clone())?;
            driver.reset()
        }
        FUNC_DISK_READ | FUNC_DISK_WRITE => {
            let control = read_control(parameter)?;
            let needed = storage::disk_info(DiskId::from_raw(control.disk))?
                .bytes_per_sector
                .checked_mul(control.count)
                .ok_or(KernelError::BadParameter)? as usize;
            if !crate::syscall::caller_range_valid(control.buffer, needed as u32) {
                return Err(KernelError::BadParameter);
            }
            // SAFETY: the caller range was just validated against the
            // live page tables of the calling address space.
            let data = unsafe {
                core::slice::from_raw_parts_mut(control.buffer as *mut u8, needed)
            };
            execute_io(function, &control, data)
        }
        FUNC_DISK_GET_INFO => {
            let control = read_control(parameter)?;
            let info = storage::disk_info(DiskId::from_raw(control.disk))?;
            let access = storage::DISKS
                .with(DiskId::from_raw(control.disk), |unit| unit.access.bits())?;
            if !crate::syscall::caller_range_valid(
                control.buffer,
                core::mem::size_of::<DiskInfo>() as u32,
            ) {
                return Err(KernelError::BadParameter);
            }
            // SAFETY: validated caller buffer of sufficient size.
            unsafe {
                (control.buffer as *mut DiskInfo).write_unaligned(DiskInfo {
                    bytes_per_sector: info.bytes_per_sector,
                    sector_count: info.sector_count,
                    access,
                });
            }
            Ok(())
        }
        FUNC_DISK_SET_ACCESS => {
            let control = read_control(parameter)?;
            storage::set_access(
                DiskId::from_raw(control.disk),
                AccessFlags::from_bits_truncate(control.count),
            )
        }
        _ => Err(KernelError::NotImplemented),
    }
}

#[cfg(target_os = "none")]
fn read_control(parameter: u32) -> Result<IoControl> {
    if !crate::syscall::caller_range_valid(parameter, core::mem::size_of::<IoControl>() as u32) {
        return Err(KernelError::BadParameter);
    }
    // SAFETY: range validated against the caller's live mappings.
    Ok(unsafe { (parameter as *const IoControl).read_unaligned() })
}

/// Driver interface version word.
pub fn version_word() -> u32 {
    DRIVER_VERSION
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::sync::Arc;

    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::drivers::storage::register_disk;

    #[test]
    fn io_round_trip_through_the_command_layer() {
        let disk = register_disk(Arc::new(RamDisk::new(512, 32)));
        let control = IoControl {
            disk: disk.to_raw(),
            sector: 5,
            count: 1,
            buffer: 0,
            buffer_size: 512,
        };
        let mut data = std::vec![0x5Au8; 512];
        execute_io(FUNC_DISK_WRITE, &control, &mut data).unwrap();
        let mut back = std::vec![0u8; 512];
        execute_io(FUNC_DISK_READ, &control, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let disk = register_disk(Arc::new(RamDisk::new(512, 32)));
        let control = IoControl {
            disk: disk.to_raw(),
            sector: 0,
            count: 2,
            buffer: 0,
            buffer_size: 512,
        };
        let mut data = std::vec![0u8; 1024];
        assert_eq!(
            execute_io(FUNC_DISK_READ, &control, &mut data),
            Err(KernelError::BadParameter)
        );
    }

    #[test]
    fn unknown_functions_report_not_implemented() {
        let disk = register_disk(Arc::new(RamDisk::new(512, 8)));
        let control = IoControl {
            disk: disk.to_raw(),
            sector: 0,
            count: 1,
            buffer: 0,
            buffer_size: 512,
        };
        let mut data = std::vec![0u8; 512];
        assert_eq!(
            execute_io(0x7777, &control, &mut data),
            Err(KernelError::NotImplemented)
        );
    }
}
