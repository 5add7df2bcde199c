//! The system-call table and dispatcher.
//!
//! One fixed array indexed by function id; each entry carries its
//! handler and the weakest ring allowed to invoke it. The ABI is
//! `int 0x80` with the function id in EAX and a single parameter word in
//! EBX (a pointer to an argument block when more is needed); the result
//! comes back in EAX. Failed calls return [`SYSCALL_FAILED`] and leave
//! the reason in the caller's task for `GetLastError`.

#![allow(dead_code)]

extern crate alloc;

pub mod auth;
pub mod base;
pub mod console;
pub mod file;
pub mod memory;
pub mod message;
pub mod mutex;
pub mod process;
pub mod task;
pub mod time;

use crate::error::KernelError;
use crate::mm::layout::AddressRegion;
use crate::mm::Linear;
use crate::process::Privilege;
use crate::sched::TASKS;

/// Generic failure return; the cause is in `GetLastError`.
pub const SYSCALL_FAILED: u32 = u32::MAX;

// Function ids. The numbering is ABI.
pub const SYS_GET_VERSION: u32 = 0;
pub const SYS_GET_SYSTEM_INFO: u32 = 1;
pub const SYS_GET_LAST_ERROR: u32 = 2;
pub const SYS_SET_LAST_ERROR: u32 = 3;
pub const SYS_DEBUG: u32 = 4;
pub const SYS_GET_SYSTEM_TIME: u32 = 5;
pub const SYS_SET_SYSTEM_TIME: u32 = 6;
pub const SYS_GET_LOCAL_TIME: u32 = 7;
pub const SYS_SET_LOCAL_TIME: u32 = 8;
pub const SYS_CREATE_PROCESS: u32 = 9;
pub const SYS_KILL_PROCESS: u32 = 10;
pub const SYS_GET_PROCESS_INFO: u32 = 11;
pub const SYS_DELETE_OBJECT: u32 = 12;
pub const SYS_CREATE_TASK: u32 = 13;
pub const SYS_KILL_TASK: u32 = 14;
pub const SYS_EXIT: u32 = 15;
pub const SYS_SUSPEND_TASK: u32 = 16;
pub const SYS_RESUME_TASK: u32 = 17;
pub const SYS_SLEEP: u32 = 18;
pub const SYS_WAIT: u32 = 19;
pub const SYS_GET_CURRENT_TASK: u32 = 20;
pub const SYS_POST_MESSAGE: u32 = 21;
pub const SYS_SEND_MESSAGE: u32 = 22;
pub const SYS_PEEK_MESSAGE: u32 = 23;
pub const SYS_GET_MESSAGE: u32 = 24;
pub const SYS_DISPATCH_MESSAGE: u32 = 25;
pub const SYS_CREATE_MUTEX: u32 = 26;
pub const SYS_DELETE_MUTEX: u32 = 27;
pub const SYS_LOCK_MUTEX: u32 = 28;
pub const SYS_UNLOCK_MUTEX: u32 = 29;
pub const SYS_ALLOC_REGION: u32 = 30;
pub const SYS_FREE_REGION: u32 = 31;
pub const SYS_IS_MEMORY_VALID: u32 = 32;
pub const SYS_GET_PROCESS_HEAP: u32 = 33;
pub const SYS_HEAP_ALLOC: u32 = 34;
pub const SYS_HEAP_FREE: u32 = 35;
pub const SYS_HEAP_REALLOC: u32 = 36;
pub const SYS_ENUM_VOLUMES: u32 = 37;
pub const SYS_GET_VOLUME_INFO: u32 = 38;
pub const SYS_OPEN_FILE: u32 = 39;
pub const SYS_READ_FILE: u32 = 40;
pub const SYS_WRITE_FILE: u32 = 41;
pub const SYS_GET_FILE_SIZE: u32 = 42;
pub const SYS_GET_FILE_POSITION: u32 = 43;
pub const SYS_SET_FILE_POSITION: u32 = 44;
pub const SYS_FIND_FIRST: u32 = 45;
pub const SYS_FIND_NEXT: u32 = 46;
pub const SYS_CONSOLE_PEEK_KEY: u32 = 47;
pub const SYS_CONSOLE_GET_KEY: u32 = 48;
pub const SYS_CONSOLE_GET_MODIFIERS: u32 = 49;
pub const SYS_CONSOLE_PRINT: u32 = 50;
pub const SYS_CONSOLE_GET_STRING: u32 = 51;
pub const SYS_CONSOLE_GOTO_XY: u32 = 52;
pub const SYS_CONSOLE_CLEAR: u32 = 53;
pub const SYS_CONSOLE_BLIT_BUFFER: u32 = 54;
pub const SYS_LOGIN: u32 = 55;
pub const SYS_LOGOUT: u32 = 56;
pub const SYS_GET_CURRENT_USER: u32 = 57;
pub const SYS_CHANGE_PASSWORD: u32 = 58;
pub const SYS_CREATE_USER: u32 = 59;
pub const SYS_DELETE_USER: u32 = 60;
pub const SYS_LIST_USERS: u32 = 61;

/// Number of table slots.
pub const SYSCALL_COUNT: usize = 62;

/// One table entry.
#[derive(Clone, Copy)]
pub struct SyscallEntry {
    pub handler: fn(u32) -> u32,
    /// Weakest ring allowed to call: 3 admits everyone, 0 is
    /// supervisor-only.
    pub ring: u8,
}

const fn user(handler: fn(u32) -> u32) -> SyscallEntry {
    SyscallEntry { handler, ring: 3 }
}

const fn supervisor(handler: fn(u32) -> u32) -> SyscallEntry {
    SyscallEntry { handler, ring: 0 }
}

/// The table. Index equals function id.
pub static SYSCALL_TABLE: [SyscallEntry; SYSCALL_COUNT] = [
    user(base::sys_get_version),
    user(base::sys_get_system_info),
    user(base::sys_get_last_error),
    user(base::sys_set_last_error),
    user(base::sys_debug),
    user(time::sys_get_system_time),
    supervisor(time::sys_set_system_time),
    user(time::sys_get_local_time),
    supervisor(time::sys_set_local_time),
    user(process::sys_create_process),
    user(process::sys_kill_process),
    user(process::sys_get_process_info),
    user(process::sys_delete_object),
    user(task::sys_create_task),
    user(task::sys_kill_task),
    user(task::sys_exit),
    user(task::sys_suspend_task),
    user(task::sys_resume_task),
    user(task::sys_sleep),
    user(task::sys_wait),
    user(task::sys_get_current_task),
    user(message::sys_post_message),
    user(message::sys_send_message),
    user(message::sys_peek_message),
    user(message::sys_get_message),
    user(message::sys_dispatch_message),
    user(mutex::sys_create_mutex),
    user(mutex::sys_delete_mutex),
    user(mutex::sys_lock_mutex),
    user(mutex::sys_unlock_mutex),
    user(memory::sys_alloc_region),
    user(memory::sys_free_region),
    user(memory::sys_is_memory_valid),
    user(memory::sys_get_process_heap),
    user(memory::sys_heap_alloc),
    user(memory::sys_heap_free),
    user(memory::sys_heap_realloc),
    user(file::sys_enum_volumes),
    user(file::sys_get_volume_info),
    user(file::sys_open_file),
    user(file::sys_read_file),
    user(file::sys_write_file),
    user(file::sys_get_file_size),
    user(file::sys_get_file_position),
    user(file::sys_set_file_position),
    user(file::sys_find_first),
    user(file::sys_find_next),
    user(console::sys_peek_key),
    user(console::sys_get_key),
    user(console::sys_get_modifiers),
    user(console::sys_print),
    user(console::sys_get_string),
    user(console::sys_goto_xy),
    user(console::sys_clear),
    user(console::sys_blit_buffer),
    user(auth::sys_login),
    user(auth::sys_logout),
    user(auth::sys_get_current_user),
    user(auth::sys_change_password),
    user(auth::sys_create_user),
    user(auth::sys_delete_user),
    user(auth::sys_list_users),
];

/// Dispatch one call.
pub fn dispatch(function: u32, parameter: u32, caller: Privilege) -> u32 {
    let Some(entry) = SYSCALL_TABLE.get(function as usize) else {
        set_last_error(KernelError::NotImplemented.code());
        return SYSCALL_FAILED;
    };
    if caller.ring() > entry.ring {
        set_last_error(KernelError::NoPermission.code());
        return SYSCALL_FAILED;
    }
    (entry.handler)(parameter)
}

/// Record a call's failure for `GetLastError`.
pub fn set_last_error(code: u32) {
    if let Some(current) = crate::sched::current_task() {
        let _ = TASKS.with_mut(current, |task| task.last_error = code);
    }
}

/// Last error of the calling task.
pub fn last_error() -> u32 {
    crate::sched::current_task()
        .and_then(|current| TASKS.with(current, |task| task.last_error).ok())
        .unwrap_or(0)
}

/// Map a kernel result onto the syscall return convention.
pub fn result_to_return<T: Into<u32>>(result: crate::error::Result<T>) -> u32 {
    match result {
        Ok(value) => value.into(),
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

// ---------------------------------------------------------------------
// Caller-memory access
// ---------------------------------------------------------------------

/// True when `[address, address + size)` is mapped in the calling
/// address space.
pub fn caller_range_valid(address: u32, size: u32) -> bool {
    if address == 0 {
        return false;
    }
    #[cfg(target_os = "none")]
    {
        let vm = crate::mm::vmm::active();
        vm.is_valid_memory(Linear(address), size)
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = size;
        true
    }
}

/// As [`caller_range_valid`], additionally requiring the range to lie in
/// user-accessible windows; ring-3 pointer parameters go through this.
pub fn user_range_valid(address: u32, size: u32) -> bool {
    let end = match address.checked_add(size.max(1)) {
        Some(end) => end,
        None => return false,
    };
    if !AddressRegion::of(Linear(address)).user_accessible()
        || !AddressRegion::of(Linear(end - 1)).user_accessible()
    {
        return false;
    }
    caller_range_valid(address, size)
}

/// Read a `repr(C)` argument block from the caller.
#[cfg(target_os = "none")]
pub fn read_user<T: Copy>(address: u32) -> crate::error::Result<T> {
    if !caller_range_valid(address, core::mem::size_of::<T>() as u32) {
        return Err(KernelError::BadParameter);
    }
    // SAFETY: the range is mapped in the calling space; T is Copy and
    // read unaligned.
    Ok(unsafe { (address as *const T).read_unaligned() })
}

#[cfg(not(target_os = "none"))]
pub fn read_user<T: Copy>(_address: u32) -> crate::error::Result<T> {
    Err(KernelError::NotImplemented)
}

/// Write a `repr(C)` result block back to the caller.
#[cfg(target_os = "none")]
pub fn write_user<T: Copy>(address: u32, value: &T) -> crate::error::Result<()> {
    if !caller_range_valid(address, core::mem::size_of::<T>() as u32) {
        return Err(KernelError::BadParameter);
    }
    // SAFETY: as for read_user; unaligned write of a Copy value.
    unsafe { (address as *mut T).write_unaligned(*value) };
    Ok(())
}

#[cfg(not(target_os = "none"))]
pub fn write_user<T: Copy>(_address: u32, _value: &T) -> crate::error::Result<()> {
    Err(KernelError::NotImplemented)
}

/// Read a NUL-terminated caller string of at most `max` bytes.
#[cfg(target_os = "none")]
pub fn read_user_string(address: u32, max: u32) -> crate::error::Result<alloc::string::String> {
    use alloc::vec::Vec;

    if !caller_range_valid(address, 1) {
        return Err(KernelError::BadParameter);
    }
    let mut bytes: Vec<u8> = Vec::new();
    for offset in 0..max {
        if !caller_range_valid(address + offset, 1) {
            return Err(KernelError::BadParameter);
        }
        // SAFETY: the byte was just validated.
        let byte = unsafe { ((address + offset) as *const u8).read_volatile() };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    alloc::string::String::from_utf8(bytes).map_err(|_| KernelError::BadParameter)
}

#[cfg(not(target_os = "none"))]
pub fn read_user_string(
    _address: u32,
    _max: u32,
) -> crate::error::Result<alloc::string::String> {
    Err(KernelError::NotImplemented)
}

/// Copy bytes back to a caller buffer.
#[cfg(target_os = "none")]
pub fn write_user_bytes(address: u32, bytes: &[u8]) -> crate::error::Result<()> {
    if !caller_range_valid(address, bytes.len() as u32) {
        return Err(KernelError::BadParameter);
    }
    // SAFETY: range validated.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    }
    Ok(())
}

#[cfg(not(target_os = "none"))]
pub fn write_user_bytes(_address: u32, _bytes: &[u8]) -> crate::error::Result<()> {
    Err(KernelError::NotImplemented)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn table_is_dense_and_indexed_by_id() {
        assert_eq!(SYSCALL_TABLE.len(), SYSCALL_COUNT);
        // Spot checks that the numbering and the table rows line up.
        assert_eq!(SYSCALL_TABLE[SYS_GET_VERSION as usize].handler as usize,
                   base::sys_get_version as usize);
        assert_eq!(SYSCALL_TABLE[SYS_EXIT as usize].handler as usize,
                   task::sys_exit as usize);
        assert_eq!(SYSCALL_TABLE[SYS_LIST_USERS as usize].handler as usize,
                   auth::sys_list_users as usize);
    }

    #[test]
    fn out_of_range_ids_fail() {
        let result = dispatch(SYSCALL_COUNT as u32, 0, Privilege::User);
        assert_eq!(result, SYSCALL_FAILED);
        let result = dispatch(u32::MAX, 0, Privilege::User);
        assert_eq!(result, SYSCALL_FAILED);
    }

    #[test]
    fn user_callers_cannot_reach_supervisor_entries() {
        assert_eq!(
            dispatch(SYS_SET_SYSTEM_TIME, 123, Privilege::User),
            SYSCALL_FAILED
        );
        // The kernel itself may.
        let before = crate::timer::system_time();
        let result = dispatch(SYS_SET_SYSTEM_TIME, 0x10_0000, Privilege::Kernel);
        assert_ne!(result, SYSCALL_FAILED);
        assert!(crate::timer::system_time() >= 0x10_0000 || before > 0x10_0000);
    }

    #[test]
    fn get_version_works_for_everyone() {
        let version = dispatch(SYS_GET_VERSION, 0, Privilege::User);
        assert_eq!(version, base::KERNEL_VERSION);
    }

    #[test]
    fn kernel_pointers_fail_user_range_checks() {
        assert!(!user_range_valid(0xC010_0000, 16));
        assert!(!user_range_valid(0, 16));
        assert!(user_range_valid(0x0040_0000, 16));
    }
}
