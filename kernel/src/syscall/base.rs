//! Base syscalls: version, system information, last-error, debug.

use super::{result_to_return, set_last_error, write_user, SYSCALL_FAILED};
use crate::error::Result;

/// Kernel version word: major.minor.patch packed as 0x00MMmmpp.
pub const KERNEL_VERSION: u32 = 0x0004_0000;

/// Answer block for `GetSystemInfo`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SystemInfo {
    pub version: u32,
    pub memory_total: u32,
    pub memory_used: u32,
    pub page_count: u32,
    pub process_count: u32,
    pub task_count: u32,
    pub console_width: u32,
    pub console_height: u32,
}

/// Collect the live numbers.
pub fn system_info() -> SystemInfo {
    let frames = crate::mm::frame_allocator::FRAME_ALLOCATOR.get();
    SystemInfo {
        version: KERNEL_VERSION,
        memory_total: frames.map_or(0, |f| f.page_count() << crate::mm::PAGE_SHIFT),
        memory_used: frames.map_or(0, |f| f.used_bytes()),
        page_count: frames.map_or(0, |f| f.page_count()),
        process_count: crate::process::PROCESSES.len() as u32,
        task_count: crate::sched::TASKS.len() as u32,
        console_width: crate::drivers::console::CONSOLE_WIDTH as u32,
        console_height: crate::drivers::console::CONSOLE_HEIGHT as u32,
    }
}

pub fn sys_get_version(_parameter: u32) -> u32 {
    KERNEL_VERSION
}

pub fn sys_get_system_info(parameter: u32) -> u32 {
    let info = system_info();
    result_to_return(write_user(parameter, &info).map(|()| 0u32))
}

pub fn sys_get_last_error(_parameter: u32) -> u32 {
    super::last_error()
}

pub fn sys_set_last_error(parameter: u32) -> u32 {
    set_last_error(parameter);
    0
}

pub fn sys_debug(parameter: u32) -> u32 {
    log::debug!("debug syscall: {:#010x}", parameter);
    0
}

/// Shared by handlers returning plain status.
pub(super) fn status_return(result: Result<()>) -> u32 {
    match result {
        Ok(()) => 0,
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn version_is_stable() {
        assert_eq!(sys_get_version(0), KERNEL_VERSION);
    }

    #[test]
    fn system_info_reports_console_geometry() {
        let info = system_info();
        assert_eq!(info.console_width, 80);
        assert_eq!(info.console_height, 25);
        assert_eq!(info.version, KERNEL_VERSION);
    }
}
