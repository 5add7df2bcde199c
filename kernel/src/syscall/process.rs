//! Process syscalls.

extern crate alloc;

use super::base::status_return;
use super::{read_user, set_last_error, write_user, SYSCALL_FAILED};
use crate::error::KernelError;
use crate::process::ProcessId;

/// Argument block for `CreateProcess`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CreateProcessArgs {
    /// NUL-terminated volume-qualified executable path.
    pub path: u32,
    /// NUL-terminated command line, may be zero.
    pub command_line: u32,
    /// Initial task priority.
    pub priority: u32,
}

/// Answer block for `GetProcessInfo`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ProcessInfoOut {
    pub privilege_ring: u32,
    pub parent: u32,
    pub heap_base: u32,
    pub heap_size: u32,
    pub name: [u8; 32],
}

/// Load, parse, and launch an executable. The kernel side of the spawn
/// path; everything address-space-related happens in the process module.
#[cfg(target_os = "none")]
pub fn spawn(
    path: &str,
    command_line: &str,
    priority: crate::sched::Priority,
) -> crate::error::Result<ProcessId> {
    use alloc::string::ToString;

    let bytes = crate::fs::file::load_file(path)?;
    let image = crate::process::image::parse(&bytes)?;

    let info = crate::process::ProcessInfo {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        command_line: command_line.to_string(),
        privilege: crate::process::Privilege::User,
        priority,
        security: crate::process::SecurityDescriptor {
            user: crate::security::current_user().unwrap_or_default(),
            group: alloc::string::String::from("users"),
            permissions: 0,
        },
    };

    let mut vm = crate::mm::vmm::active();
    let (process, directory, stack_base, stack_size) =
        crate::process::create_process_from_image(&mut vm, info, &image, &bytes)?;

    // Bootstrap words for the trampoline on the new task's user stack.
    let words = crate::arch::i386::context::build_user_bootstrap(image.entry.as_u32(), 0);
    let top = stack_base.as_u32() + stack_size - 8;
    let mut bytes_on_stack = [0u8; 8];
    bytes_on_stack[..4].copy_from_slice(&words[0].to_le_bytes());
    bytes_on_stack[4..].copy_from_slice(&words[1].to_le_bytes());
    crate::process::foreign_write(&mut vm, directory, crate::mm::Linear(top), &bytes_on_stack)?;

    let task = crate::sched::task::create_task(crate::sched::task::TaskInfo {
        name: crate::process::PROCESSES
            .with(process, |p| p.name.clone())
            .unwrap_or_default(),
        process,
        privilege: crate::process::Privilege::User,
        priority,
        entry: image.entry.as_u32(),
        parameter: 0,
        user_stack: Some((stack_base, stack_size)),
    });
    if let Err(error) = task {
        let _ = crate::process::kill_process(&mut vm, process);
        return Err(error);
    }
    Ok(process)
}

pub fn sys_create_process(parameter: u32) -> u32 {
    #[cfg(target_os = "none")]
    {
        let result = read_user::<CreateProcessArgs>(parameter).and_then(|args| {
            let path = super::read_user_string(args.path, super::file::MAX_PATH)?;
            let command_line = if args.command_line != 0 {
                super::read_user_string(args.command_line, super::file::MAX_PATH)?
            } else {
                alloc::string::String::new()
            };
            spawn(
                &path,
                &command_line,
                crate::sched::task::Priority::from_raw(args.priority),
            )
        });
        super::result_to_return(result.map(|id| id.to_raw()))
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = parameter;
        set_last_error(KernelError::NotImplemented.code());
        SYSCALL_FAILED
    }
}

pub fn sys_kill_process(parameter: u32) -> u32 {
    #[cfg(target_os = "none")]
    {
        let id = ProcessId::from_raw(parameter);
        if Some(id) == crate::sched::current_process()
            || id == crate::process::kernel_process()
        {
            // Neither the kernel nor the caller's own process goes away
            // through this entry; tasks use Exit.
            set_last_error(KernelError::NoPermission.code());
            return SYSCALL_FAILED;
        }
        let mut vm = crate::mm::vmm::active();
        status_return(crate::process::kill_process(&mut vm, id))
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = parameter;
        set_last_error(KernelError::NotImplemented.code());
        SYSCALL_FAILED
    }
}

pub fn sys_get_process_info(parameter: u32) -> u32 {
    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Args {
        process: u32,
        out: u32,
    }

    let result = read_user::<Args>(parameter).and_then(|args| {
        let id = ProcessId::from_raw(args.process);
        let out = crate::process::PROCESSES.with(id, |process| {
            let mut name = [0u8; 32];
            let take = process.name.len().min(31);
            name[..take].copy_from_slice(&process.name.as_bytes()[..take]);
            ProcessInfoOut {
                privilege_ring: u32::from(process.privilege.ring()),
                parent: process.parent.map(|p| p.to_raw()).unwrap_or(0),
                heap_base: process.heap_base.as_u32(),
                heap_size: process.heap_size,
                name,
            }
        })?;
        write_user(args.out, &out)
    });
    status_return(result)
}

/// Generic object release: the raw id is tried against each deletable
/// object class.
pub fn sys_delete_object(parameter: u32) -> u32 {
    if crate::sync::mutex::delete_user_mutex(parameter).is_ok() {
        return 0;
    }
    if crate::fs::file::close_file(crate::fs::FileId::from_raw(parameter)).is_ok() {
        return 0;
    }
    set_last_error(KernelError::BadParameter.code());
    SYSCALL_FAILED
}
