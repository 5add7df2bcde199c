//! Recursive kernel mutexes with a global lock-ordering discipline.
//!
//! The primitive never blocks by itself: a contended `lock` spins through
//! scheduler yields until the owner releases or the timeout expires. The
//! owning task may re-lock freely; each lock returns the recursion depth
//! and `0` signals a timeout.
//!
//! Kernel subsystems lock against a small static set of named mutexes
//! arranged in a strict order:
//!
//! `Kernel -> Memory -> Schedule -> Desktop -> Process -> Task ->
//!  FileSystem -> File -> Console`
//!
//! Acquiring out of order is a contract violation; debug builds log it and
//! the lock still proceeds.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex as SpinMutex;

/// Timeout value meaning "block until acquired".
pub const INFINITY: u32 = u32::MAX;

/// Raw task identity for ownership tracking. `BOOT_OWNER` stands in while
/// the scheduler is not running yet.
pub const BOOT_OWNER: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct MutexState {
    /// Raw id of the owning task, 0 when free.
    owner: u32,
    /// Raw id of the owning process, 0 when free.
    process: u32,
    /// Recursion depth, 0 when free.
    depth: u32,
}

/// A recursive kernel mutex.
pub struct KernelMutex {
    name: &'static str,
    /// Position in the global acquisition order; lower locks first.
    /// Dynamically created mutexes all share `RANK_DYNAMIC`.
    rank: u8,
    state: SpinMutex<MutexState>,
}

/// Rank given to user-created mutexes; they sit after every named kernel
/// mutex and carry no mutual ordering.
pub const RANK_DYNAMIC: u8 = 16;

pub static KERNEL_MUTEX: KernelMutex = KernelMutex::named("Kernel", 0);
pub static MEMORY_MUTEX: KernelMutex = KernelMutex::named("Memory", 1);
pub static SCHEDULE_MUTEX: KernelMutex = KernelMutex::named("Schedule", 2);
pub static DESKTOP_MUTEX: KernelMutex = KernelMutex::named("Desktop", 3);
pub static PROCESS_MUTEX: KernelMutex = KernelMutex::named("Process", 4);
pub static TASK_MUTEX: KernelMutex = KernelMutex::named("Task", 5);
pub static FILESYSTEM_MUTEX: KernelMutex = KernelMutex::named("FileSystem", 6);
pub static FILE_MUTEX: KernelMutex = KernelMutex::named("File", 7);
pub static CONSOLE_MUTEX: KernelMutex = KernelMutex::named("Console", 8);

static NAMED_SET: [&KernelMutex; 9] = [
    &KERNEL_MUTEX,
    &MEMORY_MUTEX,
    &SCHEDULE_MUTEX,
    &DESKTOP_MUTEX,
    &PROCESS_MUTEX,
    &TASK_MUTEX,
    &FILESYSTEM_MUTEX,
    &FILE_MUTEX,
    &CONSOLE_MUTEX,
];

/// Count of lock-order violations observed; diagnostics only.
static ORDER_VIOLATIONS: AtomicU32 = AtomicU32::new(0);

impl KernelMutex {
    pub const fn named(name: &'static str, rank: u8) -> Self {
        Self {
            name,
            rank,
            state: SpinMutex::new(MutexState {
                owner: 0,
                process: 0,
                depth: 0,
            }),
        }
    }

    /// Create a dynamic (user-visible) mutex.
    pub const fn new_dynamic() -> Self {
        Self::named("user", RANK_DYNAMIC)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// Acquire the mutex.
    ///
    /// Returns the recursion depth (>= 1) on success, `0` on timeout.
    /// `timeout_ms == 0` polls once; [`INFINITY`] blocks. Contended waits
    /// spin through scheduler yields, never with interrupts disabled.
    pub fn lock(&self, timeout_ms: u32) -> u32 {
        let me = current_owner();
        let deadline = if timeout_ms == INFINITY {
            None
        } else {
            Some(crate::timer::system_time().wrapping_add(u64::from(timeout_ms)))
        };

        loop {
            {
                let mut state = self.state.lock();
                if state.depth == 0 {
                    state.owner = me;
                    state.process = current_process_raw();
                    state.depth = 1;
                    drop(state);
                    self.check_order(me);
                    return 1;
                }
                if state.owner == me {
                    state.depth += 1;
                    return state.depth;
                }
            }

            if let Some(deadline) = deadline {
                if crate::timer::system_time() >= deadline {
                    return 0;
                }
            }
            crate::sched::yield_now();
        }
    }

    /// Release one recursion level.
    ///
    /// Returns the remaining depth; releasing a mutex the caller does not
    /// own returns `u32::MAX` and changes nothing.
    pub fn unlock(&self) -> u32 {
        let me = current_owner();
        let mut state = self.state.lock();
        if state.depth == 0 || state.owner != me {
            return u32::MAX;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = 0;
            state.process = 0;
        }
        state.depth
    }

    /// Raw owner id, 0 when free.
    pub fn owner(&self) -> u32 {
        let state = self.state.lock();
        if state.depth == 0 {
            0
        } else {
            state.owner
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().depth != 0
    }

    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// Force-release a mutex held by a task being destroyed.
    fn release_if_owned_by(&self, owner: u32) {
        let mut state = self.state.lock();
        if state.depth != 0 && state.owner == owner {
            state.owner = 0;
            state.process = 0;
            state.depth = 0;
        }
    }

    /// Ordering contract: a task locking this mutex must not already hold
    /// a named mutex of a higher rank.
    fn check_order(&self, me: u32) {
        if self.rank >= RANK_DYNAMIC {
            return;
        }
        for held in NAMED_SET.iter() {
            if held.rank > self.rank && held.owner() == me {
                ORDER_VIOLATIONS.fetch_add(1, Ordering::Relaxed);
                if cfg!(debug_assertions) {
                    log::warn!(
                        "lock-order violation: {} acquired while holding {}",
                        self.name,
                        held.name
                    );
                }
                return;
            }
        }
    }
}

// SAFETY: all interior state is behind the spin lock.
unsafe impl Sync for KernelMutex {}
unsafe impl Send for KernelMutex {}

/// RAII guard for scoped kernel-mutex sections.
pub struct MutexGuard<'a> {
    mutex: &'a KernelMutex,
}

impl<'a> MutexGuard<'a> {
    /// Lock `mutex`, blocking until acquired.
    pub fn lock(mutex: &'a KernelMutex) -> Self {
        mutex.lock(INFINITY);
        Self { mutex }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Number of ordering violations observed since boot.
pub fn order_violations() -> u32 {
    ORDER_VIOLATIONS.load(Ordering::Relaxed)
}

/// Release every named mutex held by a dying task. The scheduler calls
/// this during task reclamation; user mutexes are handled by the mutex
/// registry alongside.
pub fn release_named_owned_by(owner: u32) {
    for mutex in NAMED_SET.iter() {
        mutex.release_if_owned_by(owner);
    }
}

// ---------------------------------------------------------------------
// User-visible mutex objects
// ---------------------------------------------------------------------

/// A mutex created through the syscall interface.
pub struct MutexObject {
    header: crate::object::ObjectHeader,
    pub inner: KernelMutex,
}

impl crate::object::KernelObject for MutexObject {
    const KIND: crate::object::ObjectKind = crate::object::ObjectKind::Mutex;
    fn header(&self) -> &crate::object::ObjectHeader {
        &self.header
    }
}

/// Registry of user-created mutexes.
pub static MUTEXES: crate::object::Registry<MutexObject> = crate::object::Registry::new();

type MutexId = crate::object::ObjectId<MutexObject>;

/// Create a user mutex, returning its raw handle.
pub fn create_user_mutex() -> u32 {
    MUTEXES
        .insert(MutexObject {
            header: crate::object::ObjectHeader::new(crate::object::ObjectKind::Mutex),
            inner: KernelMutex::new_dynamic(),
        })
        .to_raw()
}

/// Delete a user mutex. Deleting a locked mutex is refused.
pub fn delete_user_mutex(raw: u32) -> crate::error::Result<()> {
    let id = MutexId::from_raw(raw);
    let locked = MUTEXES.with(id, |m| m.inner.is_locked())?;
    if locked {
        return Err(crate::error::KernelError::BadParameter);
    }
    MUTEXES
        .remove(id)
        .map(|_| ())
        .ok_or(crate::error::KernelError::BadParameter)
}

/// Lock a user mutex; returns the depth, 0 on timeout.
pub fn lock_user_mutex(raw: u32, timeout_ms: u32) -> crate::error::Result<u32> {
    let id = MutexId::from_raw(raw);
    // The registry lock is not held across the blocking wait: the mutex
    // address is stable while the object lives, and the lock loop
    // revalidates nothing worse than a stale wake.
    let mutex = MUTEXES.with(id, |m| &m.inner as *const KernelMutex)?;
    // SAFETY: objects are boxed; the pointer is valid until removal, and
    // removal refuses locked mutexes.
    Ok(unsafe { (*mutex).lock(timeout_ms) })
}

/// Unlock a user mutex; returns the remaining depth.
pub fn unlock_user_mutex(raw: u32) -> crate::error::Result<u32> {
    let id = MutexId::from_raw(raw);
    MUTEXES.with(id, |m| m.inner.unlock())
}

/// True when the mutex exists and is currently free.
pub fn user_mutex_is_free(raw: u32) -> crate::error::Result<bool> {
    let id = MutexId::from_raw(raw);
    MUTEXES.with(id, |m| !m.inner.is_locked())
}

/// Release every user mutex held by a dying task.
pub fn release_user_mutexes_owned_by(owner: u32) {
    for id in MUTEXES.ids() {
        let _ = MUTEXES.with(id, |m| m.inner.release_if_owned_by(owner));
    }
}

fn current_owner() -> u32 {
    crate::sched::current_task_raw().unwrap_or(BOOT_OWNER)
}

fn current_process_raw() -> u32 {
    crate::sched::current_process_raw().unwrap_or(0)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // Tests touching the global named set run serialized; the host test
    // harness is multi-threaded and every test thread shares BOOT_OWNER.
    static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn recursion_depth_counts_up_and_down() {
        let mutex = KernelMutex::new_dynamic();
        assert_eq!(mutex.lock(INFINITY), 1);
        assert_eq!(mutex.lock(INFINITY), 2);
        assert_eq!(mutex.lock(INFINITY), 3);
        assert_eq!(mutex.unlock(), 2);
        assert_eq!(mutex.unlock(), 1);
        assert_eq!(mutex.unlock(), 0);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn relock_by_owner_with_zero_timeout_succeeds() {
        let mutex = KernelMutex::new_dynamic();
        assert_eq!(mutex.lock(0), 1);
        // Owned by the caller: poll must report a depth, not a timeout.
        assert!(mutex.lock(0) > 0);
        mutex.unlock();
        mutex.unlock();
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        let mutex = KernelMutex::new_dynamic();
        assert_eq!(mutex.unlock(), u32::MAX);
    }

    #[test]
    fn ordered_acquisition_is_clean() {
        let _serial = SERIAL.lock().unwrap();
        let before = order_violations();
        KERNEL_MUTEX.lock(INFINITY);
        MEMORY_MUTEX.lock(INFINITY);
        CONSOLE_MUTEX.lock(INFINITY);
        CONSOLE_MUTEX.unlock();
        MEMORY_MUTEX.unlock();
        KERNEL_MUTEX.unlock();
        assert_eq!(order_violations(), before);
    }

    #[test]
    fn out_of_order_acquisition_is_flagged_but_granted() {
        let _serial = SERIAL.lock().unwrap();
        let before = order_violations();
        FILESYSTEM_MUTEX.lock(INFINITY);
        let depth = MEMORY_MUTEX.lock(INFINITY);
        assert_eq!(depth, 1, "the lock is still granted");
        assert_eq!(order_violations(), before + 1);
        MEMORY_MUTEX.unlock();
        FILESYSTEM_MUTEX.unlock();
    }

    #[test]
    fn kill_cleanup_releases_named_mutexes() {
        let _serial = SERIAL.lock().unwrap();
        TASK_MUTEX.lock(INFINITY);
        assert!(TASK_MUTEX.is_locked());
        release_named_owned_by(BOOT_OWNER);
        assert!(!TASK_MUTEX.is_locked());
    }
}
