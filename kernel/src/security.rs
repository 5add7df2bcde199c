//! User accounts and login sessions.
//!
//! An in-memory account table with salted, stretched digests. The digest
//! is an iterated FNV construction: not a substitute for a real password
//! hash on persistent storage, but enough to keep plaintext out of
//! kernel memory. Sessions attach the logged-in user to the calling
//! task's process.

#![allow(dead_code)]

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{KernelError, Result};

/// Default administrator account created at boot.
pub const ROOT_USER: &str = "root";

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
const STRETCH_ROUNDS: u32 = 4096;

/// One account.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    pub group: String,
    pub admin: bool,
    salt: u64,
    digest: u64,
}

struct SecurityState {
    accounts: Vec<UserAccount>,
    /// Raw task id -> logged-in account name.
    sessions: Vec<(u32, String)>,
    salt_seed: u64,
}

static SECURITY: RwLock<SecurityState> = RwLock::new(SecurityState {
    accounts: Vec::new(),
    sessions: Vec::new(),
    salt_seed: 0x9E37_79B9_7F4A_7C15,
});

fn fnv(data: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Salted, stretched digest of a password.
pub fn digest(password: &str, salt: u64) -> u64 {
    let mut value = fnv(password.as_bytes(), salt);
    for round in 0..STRETCH_ROUNDS {
        value = fnv(&value.to_le_bytes(), salt ^ u64::from(round));
    }
    value
}

fn next_salt(state: &mut SecurityState) -> u64 {
    // xorshift over the seed plus the clock; uniqueness matters more
    // than unpredictability for an in-memory table.
    let mut seed = state.salt_seed ^ crate::timer::system_time();
    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;
    state.salt_seed = seed;
    seed
}

/// Install the boot accounts.
pub fn init(root_password: &str) {
    let mut state = SECURITY.write();
    if !state.accounts.is_empty() {
        return;
    }
    let salt = next_salt(&mut state);
    let account = UserAccount {
        name: ROOT_USER.to_string(),
        group: String::from("system"),
        admin: true,
        salt,
        digest: digest(root_password, salt),
    };
    state.accounts.push(account);
    log::info!("security: account table initialized");
}

/// Create an account. Names are unique.
pub fn create_user(name: &str, password: &str, admin: bool) -> Result<()> {
    if name.is_empty() {
        return Err(KernelError::BadParameter);
    }
    let mut state = SECURITY.write();
    if state.accounts.iter().any(|a| a.name == name) {
        return Err(KernelError::BadParameter);
    }
    let salt = next_salt(&mut state);
    let account = UserAccount {
        name: name.to_string(),
        group: String::from("users"),
        admin,
        salt,
        digest: digest(password, salt),
    };
    state.accounts.push(account);
    Ok(())
}

/// Remove an account; active sessions of that user are ended.
pub fn delete_user(name: &str) -> Result<()> {
    if name == ROOT_USER {
        return Err(KernelError::NoPermission);
    }
    let mut state = SECURITY.write();
    let before = state.accounts.len();
    state.accounts.retain(|a| a.name != name);
    if state.accounts.len() == before {
        return Err(KernelError::BadParameter);
    }
    state.sessions.retain(|(_, user)| user != name);
    Ok(())
}

/// Verify credentials and bind the session to the calling task.
pub fn login(name: &str, password: &str) -> Result<()> {
    let task = crate::sched::current_task_raw().unwrap_or(0);
    let mut state = SECURITY.write();
    let account = state
        .accounts
        .iter()
        .find(|a| a.name == name)
        .ok_or(KernelError::NoPermission)?;
    if digest(password, account.salt) != account.digest {
        return Err(KernelError::NoPermission);
    }
    let name = account.name.clone();
    state.sessions.retain(|(t, _)| *t != task);
    state.sessions.push((task, name));
    Ok(())
}

/// End the calling task's session.
pub fn logout() -> Result<()> {
    let task = crate::sched::current_task_raw().unwrap_or(0);
    let mut state = SECURITY.write();
    let before = state.sessions.len();
    state.sessions.retain(|(t, _)| *t != task);
    if state.sessions.len() == before {
        return Err(KernelError::BadParameter);
    }
    Ok(())
}

/// Account bound to the calling task.
pub fn current_user() -> Option<String> {
    let task = crate::sched::current_task_raw().unwrap_or(0);
    SECURITY
        .read()
        .sessions
        .iter()
        .find(|(t, _)| *t == task)
        .map(|(_, user)| user.clone())
}

/// Change a password, verifying the old one.
pub fn change_password(name: &str, old: &str, new: &str) -> Result<()> {
    let mut state = SECURITY.write();
    let salt = next_salt(&mut state);
    let account = state
        .accounts
        .iter_mut()
        .find(|a| a.name == name)
        .ok_or(KernelError::BadParameter)?;
    if digest(old, account.salt) != account.digest {
        return Err(KernelError::NoPermission);
    }
    account.salt = salt;
    account.digest = digest(new, salt);
    Ok(())
}

/// All account names.
pub fn list_users() -> Vec<String> {
    SECURITY
        .read()
        .accounts
        .iter()
        .map(|a| a.name.clone())
        .collect()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn setup() -> std::sync::MutexGuard<'static, ()> {
        let guard = SERIAL.lock().unwrap_or_else(|p| p.into_inner());
        init("rootpw");
        guard
    }

    #[test]
    fn login_checks_credentials() {
        let _serial = setup();
        create_user("alice", "secret", false).ok();
        assert!(login("alice", "secret").is_ok());
        assert_eq!(current_user().as_deref(), Some("alice"));
        assert_eq!(login("alice", "wrong"), Err(KernelError::NoPermission));
        logout().unwrap();
        assert_eq!(current_user(), None);
    }

    #[test]
    fn same_password_different_salt_different_digest() {
        let _serial = setup();
        create_user("bob1", "same", false).ok();
        create_user("bob2", "same", false).ok();
        let state = SECURITY.read();
        let a = state.accounts.iter().find(|a| a.name == "bob1").unwrap();
        let b = state.accounts.iter().find(|a| a.name == "bob2").unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn password_change_requires_the_old_one() {
        let _serial = setup();
        create_user("carol", "first", false).ok();
        assert_eq!(
            change_password("carol", "bogus", "second"),
            Err(KernelError::NoPermission)
        );
        change_password("carol", "first", "second").unwrap();
        assert!(login("carol", "second").is_ok());
        logout().unwrap();
    }

    #[test]
    fn root_cannot_be_deleted() {
        let _serial = setup();
        assert_eq!(delete_user(ROOT_USER), Err(KernelError::NoPermission));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let _serial = setup();
        create_user("dave", "x", false).ok();
        assert_eq!(create_user("dave", "y", false), Err(KernelError::BadParameter));
    }
}
