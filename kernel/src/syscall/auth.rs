//! Authentication syscalls.

extern crate alloc;

use super::base::status_return;
use super::{read_user, read_user_string, set_last_error, write_user_bytes, SYSCALL_FAILED};
use crate::error::KernelError;
use crate::security;

/// Longest accepted user name or password.
pub const MAX_CREDENTIAL: u32 = 64;

/// Argument block for `Login` and `CreateUser`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CredentialArgs {
    pub user: u32,
    pub password: u32,
    /// CreateUser only: non-zero grants the admin group.
    pub admin: u32,
}

/// Argument block for `ChangePassword`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ChangePasswordArgs {
    pub user: u32,
    pub old_password: u32,
    pub new_password: u32,
}

pub fn sys_login(parameter: u32) -> u32 {
    status_return(read_user::<CredentialArgs>(parameter).and_then(|args| {
        let user = read_user_string(args.user, MAX_CREDENTIAL)?;
        let password = read_user_string(args.password, MAX_CREDENTIAL)?;
        security::login(&user, &password)
    }))
}

pub fn sys_logout(_parameter: u32) -> u32 {
    status_return(security::logout())
}

/// Writes the current user name NUL-terminated; returns its length.
pub fn sys_get_current_user(parameter: u32) -> u32 {
    let Some(user) = security::current_user() else {
        set_last_error(KernelError::NoPermission.code());
        return SYSCALL_FAILED;
    };
    let mut bytes = alloc::vec::Vec::from(user.as_bytes());
    bytes.push(0);
    match write_user_bytes(parameter, &bytes) {
        Ok(()) => bytes.len() as u32 - 1,
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

pub fn sys_change_password(parameter: u32) -> u32 {
    status_return(read_user::<ChangePasswordArgs>(parameter).and_then(|args| {
        let user = read_user_string(args.user, MAX_CREDENTIAL)?;
        let old = read_user_string(args.old_password, MAX_CREDENTIAL)?;
        let new = read_user_string(args.new_password, MAX_CREDENTIAL)?;
        security::change_password(&user, &old, &new)
    }))
}

pub fn sys_create_user(parameter: u32) -> u32 {
    status_return(read_user::<CredentialArgs>(parameter).and_then(|args| {
        let user = read_user_string(args.user, MAX_CREDENTIAL)?;
        let password = read_user_string(args.password, MAX_CREDENTIAL)?;
        security::create_user(&user, &password, args.admin != 0)
    }))
}

pub fn sys_delete_user(parameter: u32) -> u32 {
    status_return(
        read_user_string(parameter, MAX_CREDENTIAL)
            .and_then(|user| security::delete_user(&user)),
    )
}

/// Writes account names NUL-separated; returns the count written.
pub fn sys_list_users(parameter: u32) -> u32 {
    let args = match read_user::<super::file::StringListArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    let names = security::list_users();
    let mut offset = 0u32;
    let mut written = 0u32;
    for name in names {
        let needed = name.len() as u32 + 1;
        if offset + needed > args.buffer_size {
            break;
        }
        let mut bytes = alloc::vec::Vec::from(name.as_bytes());
        bytes.push(0);
        if write_user_bytes(args.buffer + offset, &bytes).is_err() {
            set_last_error(KernelError::BadParameter.code());
            return SYSCALL_FAILED;
        }
        offset += needed;
        written += 1;
    }
    written
}
