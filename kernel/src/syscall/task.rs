//! Task syscalls.

extern crate alloc;

use super::base::status_return;
#[allow(unused_imports)]
use super::{read_user, result_to_return, set_last_error, SYSCALL_FAILED};
use crate::error::KernelError;
use crate::sched::task::TaskId;
use crate::sched::wait::{WaitInfo, WaitObject};

/// Argument block for `CreateTask`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CreateTaskArgs {
    pub entry: u32,
    pub parameter: u32,
    pub priority: u32,
    /// NUL-terminated task name, may be zero.
    pub name: u32,
}

/// Argument block for `Wait`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct WaitArgs {
    /// Raw user-mutex handle to wait on, zero for none.
    pub mutex: u32,
    /// Non-zero to also wait for a message.
    pub wait_message: u32,
    /// Timeout in milliseconds, `u32::MAX` for none.
    pub timeout: u32,
}

pub fn sys_create_task(parameter: u32) -> u32 {
    #[cfg(target_os = "none")]
    {
        use alloc::string::String;
        use crate::process::Privilege;
        use crate::sched::task::{create_task, Priority, TaskInfo, USER_STACK_SIZE};

        let args = match read_user::<CreateTaskArgs>(parameter) {
            Ok(args) => args,
            Err(error) => {
                set_last_error(error.code());
                return SYSCALL_FAILED;
            }
        };
        let Some(process) = crate::sched::current_process() else {
            set_last_error(KernelError::Unexpected.code());
            return SYSCALL_FAILED;
        };
        let privilege = crate::process::PROCESSES
            .with(process, |p| p.privilege)
            .unwrap_or(Privilege::Kernel);

        let name = if args.name != 0 {
            super::read_user_string(args.name, 64).unwrap_or_default()
        } else {
            String::from("task")
        };

        // Ring-3 tasks get a fresh user stack in the calling space, with
        // the trampoline bootstrap words on top.
        let user_stack = match privilege {
            Privilege::Kernel => None,
            Privilege::User => {
                use crate::mm::vmm::AllocFlags;
                let mut vm = crate::mm::vmm::active();
                let Some(base) = vm.alloc_region(
                    crate::mm::Linear::NULL,
                    crate::mm::Physical::NULL,
                    USER_STACK_SIZE,
                    AllocFlags::COMMIT | AllocFlags::READ_WRITE,
                ) else {
                    set_last_error(KernelError::NoMemory.code());
                    return SYSCALL_FAILED;
                };
                let words =
                    crate::arch::i386::context::build_user_bootstrap(args.entry, args.parameter);
                let top = base.as_u32() + USER_STACK_SIZE - 8;
                // SAFETY: the stack was just committed in this space.
                unsafe {
                    (top as *mut u32).write(words[0]);
                    ((top + 4) as *mut u32).write(words[1]);
                }
                Some((base, USER_STACK_SIZE))
            }
        };

        let result = create_task(TaskInfo {
            name,
            process,
            privilege,
            priority: Priority::from_raw(args.priority),
            entry: args.entry,
            parameter: args.parameter,
            user_stack,
        });
        result_to_return(result.map(|id| id.to_raw()))
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = parameter;
        set_last_error(KernelError::NotImplemented.code());
        SYSCALL_FAILED
    }
}

pub fn sys_kill_task(parameter: u32) -> u32 {
    status_return(crate::sched::task::kill_task(
        TaskId::from_raw(parameter),
        SYSCALL_FAILED,
    ))
}

pub fn sys_exit(parameter: u32) -> u32 {
    if let Some(current) = crate::sched::current_task() {
        let _ = crate::sched::task::kill_task(current, parameter);
    }
    0
}

pub fn sys_suspend_task(parameter: u32) -> u32 {
    status_return(crate::sched::task::suspend_task(TaskId::from_raw(parameter)))
}

pub fn sys_resume_task(parameter: u32) -> u32 {
    status_return(crate::sched::task::resume_task(TaskId::from_raw(parameter)))
}

pub fn sys_sleep(parameter: u32) -> u32 {
    crate::sched::task::sleep(parameter);
    0
}

pub fn sys_wait(parameter: u32) -> u32 {
    let args = match read_user::<WaitArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    let mut objects = alloc::vec::Vec::new();
    if args.mutex != 0 {
        objects.push(WaitObject::Mutex(args.mutex));
    }
    if args.wait_message != 0 {
        objects.push(WaitObject::Message);
    }
    let timeout = if args.timeout == u32::MAX {
        None
    } else {
        Some(args.timeout)
    };
    crate::sched::wait::wait(WaitInfo::new(objects, timeout)).to_raw()
}

pub fn sys_get_current_task(_parameter: u32) -> u32 {
    crate::sched::current_task_raw().unwrap_or(0)
}
