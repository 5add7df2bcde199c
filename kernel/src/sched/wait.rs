//! Waiting and inter-task messages.
//!
//! A waiting task parks a descriptor naming the objects it waits for;
//! every scheduler pass re-evaluates parked descriptors and wakes tasks
//! whose predicate fired, stamping which one. Messages are per-task
//! queues under the task's message lock; posting to a task blocked in
//! `WaitMessage` wakes it.

extern crate alloc;

use alloc::vec::Vec;

use super::task::{TaskId, TaskStatus};
use super::TASKS;
use crate::error::Result;

/// One inter-task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub param1: u32,
    pub param2: u32,
    /// System time at post.
    pub time: u64,
}

/// One object a task can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObject {
    /// A user mutex, by raw handle; satisfied when it is free.
    Mutex(u32),
    /// Any message in the task's queue.
    Message,
}

/// Why a wait finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Object at this index in the descriptor fired.
    Object(u32),
    /// The timeout expired.
    Timeout,
}

impl WaitResult {
    /// ABI encoding: object index, or `u32::MAX` for timeout.
    pub fn to_raw(self) -> u32 {
        match self {
            WaitResult::Object(index) => index,
            WaitResult::Timeout => u32::MAX,
        }
    }
}

/// Parked wait descriptor.
#[derive(Debug, Clone)]
pub struct WaitInfo {
    pub objects: Vec<WaitObject>,
    /// Absolute deadline in system milliseconds; `None` waits forever.
    pub deadline: Option<u64>,
    /// Stamped by the scheduler when the wait finishes.
    pub result: Option<WaitResult>,
}

impl WaitInfo {
    pub fn new(objects: Vec<WaitObject>, timeout_ms: Option<u32>) -> Self {
        Self {
            objects,
            deadline: timeout_ms.map(|ms| crate::timer::system_time() + u64::from(ms)),
            result: None,
        }
    }

    /// Evaluate the descriptor for `owner`; `Some` names the predicate
    /// that fired.
    pub fn evaluate(&self, owner: TaskId, now: u64) -> Option<WaitResult> {
        for (index, object) in self.objects.iter().enumerate() {
            let fired = match object {
                WaitObject::Mutex(handle) => {
                    crate::sync::mutex::user_mutex_is_free(*handle).unwrap_or(true)
                }
                WaitObject::Message => TASKS
                    .with(owner, |task| !task.messages.lock().is_empty())
                    .unwrap_or(false),
            };
            if fired {
                return Some(WaitResult::Object(index as u32));
            }
        }
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Some(WaitResult::Timeout);
            }
        }
        None
    }
}

/// Park the calling task on `info` and schedule away; returns the fired
/// predicate once the scheduler wakes the task.
pub fn wait(info: WaitInfo) -> WaitResult {
    let Some(current) = super::current_task() else {
        // Pre-scheduler context cannot block; report a timeout.
        return WaitResult::Timeout;
    };

    // A descriptor that is already satisfied never parks.
    if let Some(result) = info.evaluate(current, crate::timer::system_time()) {
        return result;
    }

    let _ = TASKS.with_mut(current, |task| {
        task.wait = Some(info);
        task.status = TaskStatus::Waiting;
    });
    super::scheduler::scheduler();

    TASKS
        .with_mut(current, |task| {
            let result = task
                .wait
                .take()
                .and_then(|info| info.result)
                .unwrap_or(WaitResult::Timeout);
            result
        })
        .unwrap_or(WaitResult::Timeout)
}

/// Post a message to `target`; wakes it if it sits in `WaitMessage`.
pub fn post_message(target: TaskId, id: u32, param1: u32, param2: u32) -> Result<()> {
    let message = Message {
        id,
        param1,
        param2,
        time: crate::timer::system_time(),
    };
    TASKS.with_mut(target, |task| {
        task.messages.lock().push_back(message);
        if task.status == TaskStatus::WaitMessage {
            task.status = TaskStatus::Running;
        }
    })
}

/// Pop the next message, blocking in `WaitMessage` while the queue is
/// empty.
pub fn get_message(owner: TaskId) -> Result<Option<Message>> {
    loop {
        let popped = TASKS.with(owner, |task| task.messages.lock().pop_front())?;
        if popped.is_some() {
            return Ok(popped);
        }
        if super::current_task() != Some(owner) {
            return Ok(None);
        }
        TASKS.with_mut(owner, |task| {
            if task.messages.lock().is_empty() {
                task.status = TaskStatus::WaitMessage;
            }
        })?;
        super::scheduler::scheduler();
    }
}

/// Read the next message without removing it.
pub fn peek_message(owner: TaskId) -> Result<Option<Message>> {
    TASKS.with(owner, |task| task.messages.lock().front().copied())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::object::ObjectId;

    #[test]
    fn empty_descriptor_times_out() {
        let info = WaitInfo::new(Vec::new(), Some(0));
        let owner: TaskId = ObjectId::from_parts(999, 1);
        let now = crate::timer::system_time() + 10;
        assert_eq!(info.evaluate(owner, now), Some(WaitResult::Timeout));
    }

    #[test]
    fn unexpired_deadline_keeps_waiting() {
        let info = WaitInfo::new(Vec::new(), Some(10_000));
        let owner: TaskId = ObjectId::from_parts(999, 1);
        assert_eq!(info.evaluate(owner, crate::timer::system_time()), None);
    }

    #[test]
    fn result_encoding() {
        assert_eq!(WaitResult::Object(3).to_raw(), 3);
        assert_eq!(WaitResult::Timeout.to_raw(), u32::MAX);
    }
}
