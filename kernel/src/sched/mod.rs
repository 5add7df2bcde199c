//! Task model and the preemptive scheduler.
//!
//! Tasks are the single unit of concurrency: software-switched contexts
//! sharing one TSS, scheduled round-robin inside strict priority classes.
//! Blocking is explicit through `sleep`, `wait`, and contended kernel
//! mutexes; the timer tick preempts whatever runs when its quantum is
//! spent.

#![allow(dead_code)]

pub mod queue;
pub mod scheduler;
pub mod task;
pub mod wait;

pub use queue::ReadyQueue;
pub use scheduler::{scheduler, yield_now};
pub use task::{Priority, Task, TaskId, TaskStatus};
pub use wait::{Message, WaitInfo, WaitObject, WaitResult};

use spin::Mutex as SpinMutex;

use crate::object::Registry;

/// Registry of all live tasks.
pub static TASKS: Registry<Task> = Registry::new();

/// Scheduler core state: the running task and the ready queue.
pub struct SchedulerState {
    pub current: Option<TaskId>,
    pub ready: ReadyQueue,
    /// Kernel idle task, picked when nothing else is runnable.
    pub idle: Option<TaskId>,
    /// Set while the scheduler is frozen (bring-up, critical sections).
    pub frozen: u32,
}

pub static SCHEDULER: SpinMutex<SchedulerState> = SpinMutex::new(SchedulerState {
    current: None,
    ready: ReadyQueue::new(),
    idle: None,
    frozen: 0,
});

/// Raw id of the running task, `None` before the scheduler starts.
pub fn current_task_raw() -> Option<u32> {
    SCHEDULER.lock().current.map(|id| id.to_raw())
}

/// Id of the running task.
pub fn current_task() -> Option<TaskId> {
    SCHEDULER.lock().current
}

/// Raw id of the running task's process.
pub fn current_process_raw() -> Option<u32> {
    let current = current_task()?;
    TASKS.with(current, |task| task.process.to_raw()).ok()
}

/// Id of the running task's process.
pub fn current_process() -> Option<crate::process::ProcessId> {
    let current = current_task()?;
    TASKS.with(current, |task| task.process).ok()
}

/// Stop scheduling decisions; nested calls stack.
pub fn freeze_scheduler() {
    SCHEDULER.lock().frozen += 1;
}

/// Resume scheduling decisions.
pub fn unfreeze_scheduler() {
    let mut state = SCHEDULER.lock();
    state.frozen = state.frozen.saturating_sub(1);
}

#[cfg(all(test, not(target_os = "none")))]
static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Serialize tests that drive the global scheduler state.
#[cfg(all(test, not(target_os = "none")))]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
