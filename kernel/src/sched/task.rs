//! Tasks: creation, state, stacks, and lifetime.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::string::String;

use spin::Mutex as SpinMutex;

use super::wait::{Message, WaitInfo};
use super::{SCHEDULER, TASKS};
use crate::arch::i386::context::{
    build_kernel_entry_stack, build_user_entry_stack, CpuContext,
};
use crate::error::{KernelError, Result};
use crate::mm::layout::SELECTOR_TSS;
use crate::mm::Linear;
use crate::object::{KernelObject, ObjectHeader, ObjectId, ObjectKind};
use crate::process::{Privilege, ProcessId};

/// Task id.
pub type TaskId = ObjectId<Task>;

/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Runnable; in the ready queue.
    Running,
    /// Blocked on a wait descriptor.
    Waiting,
    /// Blocked until `wake_up_time`.
    Sleeping,
    /// Blocked until a message arrives.
    WaitMessage,
    /// Suspended until explicitly resumed.
    Suspended,
    /// Terminated; storage reclaimed on the next scheduler pass.
    Dead,
}

/// Priority classes, scanned highest first; round-robin inside a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Highest = 4,
}

impl Priority {
    pub const COUNT: usize = 5;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Priority::Lowest,
            1 => Priority::Low,
            3 => Priority::High,
            4 => Priority::Highest,
            _ => Priority::Medium,
        }
    }
}

/// Time quantum granted per rotation, in milliseconds.
pub const DEFAULT_QUANTUM_MS: u32 = 20;

/// Default system (ring-0) stack size.
pub const SYSTEM_STACK_SIZE: u32 = 0x4000;

/// Default initial user stack size.
pub const USER_STACK_SIZE: u32 = 0x8000;

/// One task.
pub struct Task {
    pub(super) header: ObjectHeader,
    pub name: String,
    pub process: ProcessId,
    pub privilege: Privilege,
    pub status: TaskStatus,
    pub priority: Priority,
    /// Milliseconds left in the current quantum.
    pub quantum_remaining: u32,
    pub context: CpuContext,
    pub entry: u32,
    pub parameter: u32,
    /// User stack region in the owning process's space; zero for pure
    /// kernel tasks.
    pub user_stack_base: Linear,
    pub user_stack_size: u32,
    /// System stack in the kernel window. Held as `usize` so the host
    /// test build can carry real pointers; identical to `u32` on target.
    pub system_stack_base: usize,
    pub system_stack_size: u32,
    /// Selector of the shared TSS descriptor.
    pub tss_selector: u16,
    /// Absolute wake time for Sleeping tasks, milliseconds.
    pub wake_up_time: u64,
    pub exit_code: u32,
    /// Last syscall error, read back via `GetLastError`.
    pub last_error: u32,
    /// Pending wait descriptor for Waiting tasks.
    pub wait: Option<WaitInfo>,
    /// Message queue and its lock.
    pub messages: SpinMutex<VecDeque<Message>>,
}

impl KernelObject for Task {
    const KIND: ObjectKind = ObjectKind::Task;
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

/// Parameters for task creation.
pub struct TaskInfo {
    pub name: String,
    pub process: ProcessId,
    pub privilege: Privilege,
    pub priority: Priority,
    pub entry: u32,
    pub parameter: u32,
    /// User stack, already allocated in the target process space; kernel
    /// tasks leave it empty.
    pub user_stack: Option<(Linear, u32)>,
}

impl Task {
    fn new(info: &TaskInfo, system_stack_base: usize, system_stack_size: u32) -> Self {
        Self {
            header: ObjectHeader::new(ObjectKind::Task),
            name: info.name.clone(),
            process: info.process,
            privilege: info.privilege,
            status: TaskStatus::Running,
            priority: info.priority,
            quantum_remaining: DEFAULT_QUANTUM_MS,
            context: CpuContext::zeroed(),
            entry: info.entry,
            parameter: info.parameter,
            user_stack_base: info.user_stack.map(|s| s.0).unwrap_or(Linear::NULL),
            user_stack_size: info.user_stack.map(|s| s.1).unwrap_or(0),
            system_stack_base,
            system_stack_size,
            tss_selector: SELECTOR_TSS,
            wake_up_time: 0,
            exit_code: 0,
            last_error: 0,
            wait: None,
            messages: SpinMutex::new(VecDeque::new()),
        }
    }

    /// Top of the system stack.
    pub fn system_stack_top(&self) -> usize {
        self.system_stack_base + self.system_stack_size as usize
    }

    /// Free bytes between the task's stack pointer and the stack floor,
    /// as of the last time the context was parked.
    pub fn stack_free_bytes(&self) -> u32 {
        self.context
            .esp
            .saturating_sub(self.system_stack_base as u32)
    }
}

/// Allocate a ring-0 stack for a new task.
fn alloc_system_stack(size: u32) -> Result<usize> {
    #[cfg(target_os = "none")]
    {
        use crate::mm::vmm::AllocFlags;
        let mut vm = crate::mm::vmm::active();
        vm.alloc_region(
            Linear::NULL,
            crate::mm::Physical::NULL,
            size,
            AllocFlags::COMMIT | AllocFlags::READ_WRITE | AllocFlags::KERNEL,
        )
        .map(|base| base.as_u32() as usize)
        .ok_or(KernelError::NoMemory)
    }
    #[cfg(not(target_os = "none"))]
    {
        let storage = std::vec![0u8; size as usize].leak();
        Ok(storage.as_mut_ptr() as usize)
    }
}

#[cfg(target_os = "none")]
fn free_system_stack(base: usize, size: u32) {
    let mut vm = crate::mm::vmm::active();
    vm.free_region(Linear(base as u32), size);
}

#[cfg(not(target_os = "none"))]
fn free_system_stack(_base: usize, _size: u32) {}

/// Create a task and enqueue it.
pub fn create_task(info: TaskInfo) -> Result<TaskId> {
    let system_stack_size = SYSTEM_STACK_SIZE;
    let system_stack_base = alloc_system_stack(system_stack_size)?;

    let mut task = Task::new(&info, system_stack_base, system_stack_size);

    // Pre-bake the entry frame on the fresh system stack.
    {
        use crate::arch::i386::context;
        // SAFETY: the stack was just allocated for this task, committed
        // and exclusive.
        let words = unsafe {
            core::slice::from_raw_parts_mut(
                system_stack_base as *mut u32,
                (system_stack_size / 4) as usize,
            )
        };
        let baked = match info.privilege {
            Privilege::User => {
                let (stack_base, stack_size) =
                    info.user_stack.ok_or(KernelError::BadParameter)?;
                let user_top = stack_base.as_u32() + stack_size - 8;
                build_user_entry_stack(words, user_top, context::user_entry_thunk())
            }
            Privilege::Kernel => build_kernel_entry_stack(
                words,
                info.entry,
                info.parameter,
                context::kernel_entry_thunk(),
                context::kernel_exit_hook(),
            ),
        };
        task.context.esp = (system_stack_base + baked.esp_word_offset * 4) as u32;
    }
    task.context.esp0 = task.system_stack_top() as u32;
    task.context.cr3 = crate::process::page_directory_of(info.process)
        .unwrap_or(crate::mm::Physical::NULL)
        .as_u32();

    let priority = task.priority;
    let id = TASKS.insert(task);

    let mut state = SCHEDULER.lock();
    state.ready.enqueue(priority, id);
    drop(state);

    log::debug!("task {:?} created", id);
    Ok(id)
}

/// Mark a task dead; the scheduler reclaims it on its next pass. Killing
/// the running task does not return to it.
pub fn kill_task(id: TaskId, exit_code: u32) -> Result<()> {
    TASKS.with_mut(id, |task| {
        task.status = TaskStatus::Dead;
        task.exit_code = exit_code;
    })?;
    crate::sync::mutex::release_named_owned_by(id.to_raw());
    crate::sync::mutex::release_user_mutexes_owned_by(id.to_raw());

    if super::current_task() == Some(id) {
        super::scheduler::scheduler();
    }
    Ok(())
}

/// Terminate the calling task.
pub fn exit_current(exit_code: u32) -> ! {
    if let Some(current) = super::current_task() {
        let _ = kill_task(current, exit_code);
    }
    // Unreachable once the scheduler has passed; spin defensively while
    // the tick takes us away.
    loop {
        crate::arch::halt();
    }
}

/// Entry-function fallthrough for kernel tasks; the return value is the
/// exit code.
#[no_mangle]
pub extern "C" fn task_exit_with(code: u32) -> ! {
    exit_current(code)
}

/// Suspend a task until `resume_task`.
pub fn suspend_task(id: TaskId) -> Result<()> {
    TASKS.with_mut(id, |task| {
        if task.status == TaskStatus::Running {
            task.status = TaskStatus::Suspended;
        }
    })?;
    if super::current_task() == Some(id) {
        super::scheduler::scheduler();
    }
    Ok(())
}

/// Make a suspended task runnable again.
pub fn resume_task(id: TaskId) -> Result<()> {
    TASKS.with_mut(id, |task| {
        if task.status == TaskStatus::Suspended {
            task.status = TaskStatus::Running;
        }
    })
}

/// Block the calling task for `milliseconds`. Zero sleeps don't block;
/// they yield exactly once.
pub fn sleep(milliseconds: u32) {
    if milliseconds == 0 {
        super::scheduler::yield_now();
        return;
    }
    if let Some(current) = super::current_task() {
        let wake = crate::timer::system_time() + u64::from(milliseconds);
        let _ = TASKS.with_mut(current, |task| {
            task.status = TaskStatus::Sleeping;
            task.wake_up_time = wake;
        });
        super::scheduler::scheduler();
    }
}

/// Reclaim a dead task's storage. Called from the scheduler pass, never
/// for the running task.
pub(super) fn reap(id: TaskId) {
    let Some(task) = TASKS.remove(id) else {
        return;
    };
    crate::sync::mutex::release_named_owned_by(id.to_raw());
    crate::sync::mutex::release_user_mutexes_owned_by(id.to_raw());
    crate::fs::file::close_owned_by(id.to_raw());
    free_system_stack(task.system_stack_base, task.system_stack_size);
    if !task.user_stack_base.is_null() {
        crate::process::release_user_stack(task.process, task.user_stack_base, task.user_stack_size);
    }
    log::debug!("task {:?} reaped, exit code {:#x}", id, task.exit_code);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process;

    fn kernel_task_info(name: &str, priority: Priority) -> TaskInfo {
        TaskInfo {
            name: String::from(name),
            process: process::kernel_process(),
            privilege: Privilege::Kernel,
            priority,
            entry: 0xC010_0000,
            parameter: 0,
            user_stack: None,
        }
    }

    #[test]
    fn created_task_is_runnable_and_registered() {
        let _serial = crate::sched::test_lock();
        let id = create_task(kernel_task_info("probe", Priority::Medium)).unwrap();
        TASKS
            .with(id, |task| {
                assert_eq!(task.status, TaskStatus::Running);
                assert_eq!(task.quantum_remaining, DEFAULT_QUANTUM_MS);
                assert_eq!(task.tss_selector, SELECTOR_TSS);
                assert_ne!(task.context.esp, 0);
                assert!(task.system_stack_size > 0);
            })
            .unwrap();
        let _ = kill_task(id, 0);
    }

    #[test]
    fn killed_task_reports_dead_then_reaps() {
        let _serial = crate::sched::test_lock();
        let id = create_task(kernel_task_info("doomed", Priority::Low)).unwrap();
        kill_task(id, 0x77).unwrap();
        TASKS
            .with(id, |task| assert_eq!(task.status, TaskStatus::Dead))
            .unwrap();
        reap(id);
        assert!(TASKS.with(id, |_| ()).is_err());
    }

    #[test]
    fn user_task_requires_a_user_stack() {
        let _serial = crate::sched::test_lock();
        let mut info = kernel_task_info("ring3", Priority::Medium);
        info.privilege = Privilege::User;
        assert!(create_task(info).is_err());
    }
}
