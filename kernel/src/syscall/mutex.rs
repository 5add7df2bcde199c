//! Mutex syscalls.

use super::base::status_return;
use super::{read_user, result_to_return};
use crate::sync::mutex;

/// Argument block for `LockMutex`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct LockMutexArgs {
    pub mutex: u32,
    /// Milliseconds; 0 polls, `u32::MAX` blocks.
    pub timeout: u32,
}

pub fn sys_create_mutex(_parameter: u32) -> u32 {
    mutex::create_user_mutex()
}

pub fn sys_delete_mutex(parameter: u32) -> u32 {
    status_return(mutex::delete_user_mutex(parameter))
}

/// Returns the lock depth, 0 on timeout.
pub fn sys_lock_mutex(parameter: u32) -> u32 {
    result_to_return(
        read_user::<LockMutexArgs>(parameter)
            .and_then(|args| mutex::lock_user_mutex(args.mutex, args.timeout)),
    )
}

/// Returns the remaining depth.
pub fn sys_unlock_mutex(parameter: u32) -> u32 {
    result_to_return(mutex::unlock_user_mutex(parameter))
}
