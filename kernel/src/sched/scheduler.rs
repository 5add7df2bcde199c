//! The scheduler pass and the context-switch path.
//!
//! Invoked from the timer interrupt tail, from `sleep`, `wait`, and
//! contended mutex loops, and from voluntary yields. Each pass wakes due
//! sleepers, re-evaluates parked wait descriptors, reaps dead tasks, and
//! rotates the CPU to the next runnable task in priority order.

extern crate alloc;

use alloc::vec::Vec;

use super::task::{TaskId, TaskStatus, DEFAULT_QUANTUM_MS};
use super::{SCHEDULER, TASKS};
use crate::arch::i386::context;
use crate::arch::without_interrupts;

/// Voluntarily give up the CPU: the quantum is forfeited and the next
/// runnable task in rotation gets it.
pub fn yield_now() {
    #[cfg(target_os = "none")]
    {
        if let Some(current) = super::current_task() {
            let _ = TASKS.with_mut(current, |task| task.quantum_remaining = 0);
        }
        scheduler();
    }
    #[cfg(not(target_os = "none"))]
    {
        if super::current_task().is_some() {
            scheduler();
        } else {
            std::thread::yield_now();
        }
    }
}

/// Timer-tick hook: charge the running task's quantum, then run a pass.
/// Runs in interrupt context with interrupts disabled.
pub fn on_tick() {
    if let Some(current) = super::current_task() {
        let _ = TASKS.with_mut(current, |task| {
            task.quantum_remaining = task.quantum_remaining.saturating_sub(1);
        });
    }
    scheduler();
}

/// Wake sleepers whose time came and waiters whose descriptor fired.
fn wake_due_tasks(now: u64) {
    for id in TASKS.ids() {
        let status = match TASKS.with(id, |task| task.status) {
            Ok(status) => status,
            Err(_) => continue,
        };
        match status {
            TaskStatus::Sleeping => {
                let _ = TASKS.with_mut(id, |task| {
                    if task.wake_up_time <= now {
                        task.status = TaskStatus::Running;
                        task.wake_up_time = 0;
                    }
                });
            }
            TaskStatus::Waiting => {
                let fired = TASKS
                    .with(id, |task| {
                        task.wait.as_ref().and_then(|info| info.evaluate(id, now))
                    })
                    .ok()
                    .flatten();
                if let Some(result) = fired {
                    let _ = TASKS.with_mut(id, |task| {
                        if let Some(info) = task.wait.as_mut() {
                            info.result = Some(result);
                        }
                        task.status = TaskStatus::Running;
                    });
                }
            }
            _ => {}
        }
    }
}

/// Collect dead tasks (except the one still on the CPU) and reclaim them.
fn reap_dead(current: Option<TaskId>) {
    let mut dead: Vec<TaskId> = Vec::new();
    for id in TASKS.ids() {
        if Some(id) == current {
            continue;
        }
        if TASKS.with(id, |task| task.status) == Ok(TaskStatus::Dead) {
            dead.push(id);
        }
    }
    for id in dead {
        SCHEDULER.lock().ready.remove(id);
        super::task::reap(id);
    }
}

/// One scheduling pass; switches context when the pick differs from the
/// running task.
pub fn scheduler() {
    without_interrupts(|| {
        let now = crate::timer::system_time();

        if SCHEDULER.lock().frozen > 0 {
            return;
        }

        wake_due_tasks(now);

        let current = SCHEDULER.lock().current;
        reap_dead(current);

        let current_runnable = current
            .map(|id| TASKS.with(id, |task| task.status == TaskStatus::Running).unwrap_or(false))
            .unwrap_or(false);
        let quantum_left = current
            .map(|id| TASKS.with(id, |task| task.quantum_remaining).unwrap_or(0))
            .unwrap_or(0);

        // A runnable task keeps the CPU until its quantum runs out.
        if current_runnable && quantum_left > 0 {
            return;
        }

        let mut state = SCHEDULER.lock();
        let idle = state.idle;
        let next = state
            .ready
            .pick(|id| {
                Some(id) != idle
                    && TASKS
                        .with(id, |task| task.status == TaskStatus::Running)
                        .unwrap_or(false)
            })
            .or({
                // Nothing else runnable: the current task continues if it
                // can, otherwise the idle task takes over.
                if current_runnable {
                    current
                } else {
                    idle
                }
            });

        let Some(next) = next else {
            // Pre-scheduler context with an empty queue.
            return;
        };

        if Some(next) == current {
            drop(state);
            let _ = TASKS.with_mut(next, |task| task.quantum_remaining = DEFAULT_QUANTUM_MS);
            return;
        }

        state.current = Some(next);
        drop(state);

        let _ = TASKS.with_mut(next, |task| task.quantum_remaining = DEFAULT_QUANTUM_MS);

        // SAFETY: both tasks are live (reap skipped `current`, `next` was
        // just picked), this is the only CPU, and interrupts are off, so
        // neither box can disappear under the switch.
        unsafe {
            let next_ptr = TASKS.raw_ptr(next);
            let prev_ptr = current.and_then(|id| TASKS.raw_ptr(id));
            match (prev_ptr, next_ptr) {
                (Some(prev), Some(next_task)) => {
                    context::switch(&mut (*prev).context, &mut (*next_task).context);
                }
                (None, Some(next_task)) => {
                    // First hand-off from the boot context; its state is
                    // parked in a scratch context nobody resumes.
                    let mut boot = context::CpuContext::zeroed();
                    context::switch(&mut boot, &mut (*next_task).context);
                }
                _ => {}
            }
        }
    });
}

/// Adopt the running boot flow as a task: it becomes the scheduler's
/// current task and the idle task, and its context is parked in place on
/// the first switch away.
pub fn adopt_boot_task(process: crate::process::ProcessId, name: &str) -> TaskId {
    extern crate alloc;
    use alloc::string::ToString;
    use crate::object::{ObjectHeader, ObjectKind};

    let task = super::task::Task {
        header: ObjectHeader::new(ObjectKind::Task),
        name: name.to_string(),
        process,
        privilege: crate::process::Privilege::Kernel,
        status: TaskStatus::Running,
        priority: super::task::Priority::Lowest,
        quantum_remaining: DEFAULT_QUANTUM_MS,
        context: context::CpuContext::zeroed(),
        entry: 0,
        parameter: 0,
        user_stack_base: crate::mm::Linear::NULL,
        user_stack_size: 0,
        system_stack_base: 0,
        system_stack_size: 0,
        tss_selector: crate::mm::layout::SELECTOR_TSS,
        wake_up_time: 0,
        exit_code: 0,
        last_error: 0,
        wait: None,
        messages: spin::Mutex::new(alloc::collections::VecDeque::new()),
    };
    let id = TASKS.insert(task);
    let mut state = SCHEDULER.lock();
    state.current = Some(id);
    state.idle = Some(id);
    state.ready.enqueue(super::task::Priority::Lowest, id);
    id
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process;
    use crate::process::Privilege;
    use crate::sched::task::{create_task, kill_task, Priority, TaskInfo};

    fn spawn(name: &str, priority: Priority) -> TaskId {
        create_task(TaskInfo {
            name: name.into(),
            process: process::kernel_process(),
            privilege: Privilege::Kernel,
            priority,
            entry: 0xC010_0000,
            parameter: 0,
            user_stack: None,
        })
        .unwrap()
    }

    fn reset_scheduler() {
        {
            let mut state = SCHEDULER.lock();
            state.current = None;
            state.idle = None;
        }
        for id in TASKS.ids() {
            let _ = TASKS.with_mut(id, |task| task.status = TaskStatus::Dead);
            SCHEDULER.lock().ready.remove(id);
            crate::sched::task::reap(id);
        }
    }

    #[test]
    fn picks_highest_priority_first() {
        let _serial = crate::sched::test_lock();
        reset_scheduler();
        let low = spawn("low", Priority::Low);
        let high = spawn("high", Priority::High);
        scheduler();
        assert_eq!(super::super::current_task(), Some(high));
        let _ = low;
        reset_scheduler();
    }

    #[test]
    fn round_robin_between_equals_when_quantum_expires() {
        let _serial = crate::sched::test_lock();
        reset_scheduler();
        let a = spawn("a", Priority::Medium);
        let b = spawn("b", Priority::Medium);
        scheduler();
        let first = super::super::current_task().unwrap();
        // Exhaust the quantum; the peer takes over.
        let _ = TASKS.with_mut(first, |task| task.quantum_remaining = 0);
        scheduler();
        let second = super::super::current_task().unwrap();
        assert_ne!(first, second);
        assert!(second == a || second == b);
        reset_scheduler();
    }

    #[test]
    fn sleeping_task_is_skipped_until_due() {
        let _serial = crate::sched::test_lock();
        reset_scheduler();
        let a = spawn("sleeper", Priority::High);
        let b = spawn("worker", Priority::Medium);
        let far = crate::timer::system_time() + 1_000_000;
        let _ = TASKS.with_mut(a, |task| {
            task.status = TaskStatus::Sleeping;
            task.wake_up_time = far;
        });
        scheduler();
        assert_eq!(super::super::current_task(), Some(b));
        // Due sleeper preempts the lower class on the next pass.
        let _ = TASKS.with_mut(a, |task| task.wake_up_time = 0);
        let _ = TASKS.with_mut(b, |task| task.quantum_remaining = 0);
        scheduler();
        assert_eq!(super::super::current_task(), Some(a));
        reset_scheduler();
    }

    #[test]
    fn dead_tasks_are_reaped_on_a_pass() {
        let _serial = crate::sched::test_lock();
        reset_scheduler();
        let a = spawn("doomed", Priority::Medium);
        let b = spawn("survivor", Priority::Medium);
        kill_task(a, 1).unwrap();
        scheduler();
        assert!(TASKS.with(a, |_| ()).is_err(), "dead task storage reclaimed");
        assert_eq!(super::super::current_task(), Some(b));
        reset_scheduler();
    }
}
