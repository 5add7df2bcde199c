//! Global kernel state.
//!
//! One process-wide object built during bring-up with an explicit
//! initialization order. The big object lists (processes, tasks, disks,
//! filesystems, files, user mutexes) live in their subsystems' slab
//! registries; this struct carries the boot snapshot and bindings that
//! tie them together. Subsystem fields are only touched under the
//! matching kernel mutex.

#![allow(dead_code)]

use spin::Once;

use crate::mm::startup::KernelStartupInfo;
use crate::process::ProcessId;
use crate::sched::TaskId;

/// The kernel singleton.
pub struct Kernel {
    /// Copy of the loader's handoff block.
    pub startup: KernelStartupInfo,
    /// The kernel's own process.
    pub kernel_process: ProcessId,
    /// The boot flow, adopted as idle task.
    pub idle_task: TaskId,
    /// The shell task, if started.
    pub shell_task: Option<TaskId>,
}

static KERNEL: Once<Kernel> = Once::new();

/// Install the singleton; called once at the end of bring-up.
pub fn install(kernel: Kernel) -> &'static Kernel {
    KERNEL.call_once(|| kernel)
}

/// The singleton; panics before [`install`].
pub fn kernel() -> &'static Kernel {
    KERNEL.get().expect("kernel state used before install")
}

/// True once bring-up completed.
pub fn is_up() -> bool {
    KERNEL.get().is_some()
}
