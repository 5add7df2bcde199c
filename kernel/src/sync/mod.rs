//! Kernel synchronization primitives.
//!
//! Low-level spinlocks come from the `spin` crate; this module adds the
//! scheduler-aware recursive mutexes kernel subsystems lock against, with
//! the global acquisition-order discipline.

pub mod mutex;

pub use mutex::{
    KernelMutex, MutexGuard, CONSOLE_MUTEX, DESKTOP_MUTEX, FILESYSTEM_MUTEX, FILE_MUTEX,
    INFINITY, KERNEL_MUTEX, MEMORY_MUTEX, PROCESS_MUTEX, SCHEDULE_MUTEX, TASK_MUTEX,
};
