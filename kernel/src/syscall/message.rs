//! Messaging syscalls.

use super::base::status_return;
use super::{read_user, set_last_error, write_user, SYSCALL_FAILED};
use crate::sched::task::TaskId;
use crate::sched::wait;

/// Argument block for `PostMessage`/`SendMessage`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PostMessageArgs {
    pub task: u32,
    pub id: u32,
    pub param1: u32,
    pub param2: u32,
}

/// Message image handed back to callers.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MessageOut {
    pub id: u32,
    pub param1: u32,
    pub param2: u32,
    pub time_low: u32,
    pub time_high: u32,
}

impl From<wait::Message> for MessageOut {
    fn from(message: wait::Message) -> Self {
        Self {
            id: message.id,
            param1: message.param1,
            param2: message.param2,
            time_low: message.time as u32,
            time_high: (message.time >> 32) as u32,
        }
    }
}

pub fn sys_post_message(parameter: u32) -> u32 {
    status_return(read_user::<PostMessageArgs>(parameter).and_then(|args| {
        wait::post_message(TaskId::from_raw(args.task), args.id, args.param1, args.param2)
    }))
}

/// Send is post plus an immediate yield so the receiver runs promptly.
pub fn sys_send_message(parameter: u32) -> u32 {
    let result = sys_post_message(parameter);
    crate::sched::yield_now();
    result
}

pub fn sys_peek_message(parameter: u32) -> u32 {
    let Some(current) = crate::sched::current_task() else {
        return 0;
    };
    match wait::peek_message(current) {
        Ok(Some(message)) => {
            if parameter != 0 {
                let _ = write_user(parameter, &MessageOut::from(message));
            }
            1
        }
        Ok(None) => 0,
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

pub fn sys_get_message(parameter: u32) -> u32 {
    let Some(current) = crate::sched::current_task() else {
        return 0;
    };
    match wait::get_message(current) {
        Ok(Some(message)) => {
            if parameter != 0 {
                let _ = write_user(parameter, &MessageOut::from(message));
            }
            1
        }
        Ok(None) => 0,
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

/// No window procedures exist at the kernel level; dispatch reports the
/// message as handled.
pub fn sys_dispatch_message(parameter: u32) -> u32 {
    match read_user::<MessageOut>(parameter) {
        Ok(message) => {
            log::trace!("dispatch message {}", message.id);
            0
        }
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}
