//! Software task context and the context switch.
//!
//! Tasks are switched in software: the outgoing task's callee-saved
//! registers and flags go onto its own system stack, its stack pointer is
//! parked in the context, and the incoming task's stack is adopted. The
//! x87 state travels in the context via `fnsave`/`frstor`, CR3 is loaded
//! when the address space changes, and the shared TSS's `esp0` is pointed
//! at the incoming task's system stack so the next ring-3 trap lands
//! there.
//!
//! First-entry and resumed tasks go through the identical switch path: a
//! new task's system stack is pre-baked so the restore sequence "returns"
//! into a thunk that `iret`s onto the entry point with the right
//! CS/SS/EFLAGS for its privilege.

use super::frame::FpuState;
use crate::mm::layout::{
    LA_TASK_RUNNER, SELECTOR_KERNEL_CODE, SELECTOR_USER_CODE, SELECTOR_USER_DATA,
};

/// EFLAGS image for entered tasks: reserved bit 1 plus IF.
pub const EFLAGS_INTERRUPTS_ON: u32 = 0x0000_0202;
/// EFLAGS image inside the switch sequence: interrupts stay off until the
/// entry `iret` turns them on.
const EFLAGS_SWITCH: u32 = 0x0000_0002;

/// Margin kept below the true top of a system stack when programming the
/// TSS, so a trap arriving mid-switch cannot clip the saved frame.
pub const ESP0_SAFETY_MARGIN: u32 = 64;

/// Saved processor context of one task. The switch assembly addresses
/// `esp` and `cr3` by offset; keep them first.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CpuContext {
    /// Parked system-stack pointer.
    pub esp: u32,
    /// Page directory of the owning process.
    pub cr3: u32,
    /// Top of the system stack, for the TSS esp0 reload.
    pub esp0: u32,
    /// Saved x87 state; invalid until the first save.
    pub fpu: FpuState,
    pub fpu_valid: bool,
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            esp: 0,
            cr3: 0,
            esp0: 0,
            fpu: FpuState::zeroed(),
            fpu_valid: false,
        }
    }
}

/// Word layout pre-baked onto a fresh task's system stack, top first.
///
/// The tail (highest addresses) is the entry frame: the `iret` image plus
/// a conventional return address and the task parameter, so the entry
/// function sees an ordinary call frame. Below it sit the restore slots
/// the switch sequence pops: return target, callee-saved registers, and
/// the in-switch EFLAGS image.
#[derive(Debug, Clone, Copy)]
pub struct InitialStack {
    /// Offset in words from the stack base at which ESP starts.
    pub esp_word_offset: usize,
}

/// Bake the system stack of a fresh kernel-mode task.
///
/// `stack` is the task's whole system stack as words; `entry_thunk` is the
/// address the switch returns into (it must `iret`), `exit_hook` receives
/// control if the entry function ever returns.
pub fn build_kernel_entry_stack(
    stack: &mut [u32],
    entry: u32,
    parameter: u32,
    entry_thunk: u32,
    exit_hook: u32,
) -> InitialStack {
    let n = stack.len();
    stack[n - 1] = parameter;
    stack[n - 2] = exit_hook;
    stack[n - 3] = EFLAGS_INTERRUPTS_ON;
    stack[n - 4] = u32::from(SELECTOR_KERNEL_CODE);
    stack[n - 5] = entry;
    stack[n - 6] = entry_thunk;
    stack[n - 7] = 0; // ebp
    stack[n - 8] = 0; // ebx
    stack[n - 9] = 0; // esi
    stack[n - 10] = 0; // edi
    stack[n - 11] = EFLAGS_SWITCH;
    InitialStack {
        esp_word_offset: n - 11,
    }
}

/// Bake the system stack of a fresh user-mode task.
///
/// The `iret` image carries ring-3 selectors and the prepared user stack;
/// execution enters the task-runner trampoline page, which calls the task
/// function and exits through the syscall gate.
pub fn build_user_entry_stack(
    stack: &mut [u32],
    user_stack_pointer: u32,
    entry_thunk: u32,
) -> InitialStack {
    let n = stack.len();
    stack[n - 1] = u32::from(SELECTOR_USER_DATA);
    stack[n - 2] = user_stack_pointer;
    stack[n - 3] = EFLAGS_INTERRUPTS_ON;
    stack[n - 4] = u32::from(SELECTOR_USER_CODE);
    stack[n - 5] = LA_TASK_RUNNER.as_u32();
    stack[n - 6] = entry_thunk;
    stack[n - 7] = 0; // ebp
    stack[n - 8] = 0; // ebx
    stack[n - 9] = 0; // esi
    stack[n - 10] = 0; // edi
    stack[n - 11] = EFLAGS_SWITCH;
    InitialStack {
        esp_word_offset: n - 11,
    }
}

/// Words the task-runner trampoline expects on a fresh user stack: the
/// entry address (popped first) below the task parameter.
pub fn build_user_bootstrap(entry: u32, parameter: u32) -> [u32; 2] {
    [entry, parameter]
}

// ---------------------------------------------------------------------
// Bare-metal switch machinery
// ---------------------------------------------------------------------

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod machine {
    use super::CpuContext;

    core::arch::global_asm!(
        r#"
// switch_stacks(prev: *mut CpuContext, next: *const CpuContext)
//
// Saves callee-saved registers and EFLAGS on the outgoing stack, parks
// ESP in prev.esp, loads next's CR3 when it differs, adopts next.esp and
// unwinds its restore slots. For a first-entry task the final `ret`
// lands in one of the entry thunks below.
.global switch_stacks
switch_stacks:
    mov eax, [esp + 4]
    mov edx, [esp + 8]
    push ebp
    push ebx
    push esi
    push edi
    pushfd
    mov [eax], esp
    mov ecx, [edx + 4]
    mov ebx, cr3
    cmp ecx, ebx
    je 2f
    mov cr3, ecx
2:
    mov esp, [edx]
    popfd
    pop edi
    pop esi
    pop ebx
    pop ebp
    ret

// First entry into a kernel-mode task: the pre-baked iret image is on
// the stack.
.global task_entry_kernel
task_entry_kernel:
    iretd

// First entry into a user-mode task: load ring-3 data segments, then
// iret through the five-word image onto the trampoline page.
.global task_entry_user
task_entry_user:
    mov ax, 0x23
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    iretd

// A kernel task's entry function returned; its value is the exit code.
.global task_exit_kernel
task_exit_kernel:
    push eax
    call task_exit_with
"#
    );

    core::arch::global_asm!(
        r#"
// The user-mode trampoline, aliased read-exec-user in every address
// space. The fresh user stack carries [entry][parameter]; the task
// function's return value becomes the Exit syscall argument (function 15).
.section .text.task_runner
.balign 4096
.global task_runner_page
task_runner_page:
    pop eax
    call eax
    mov ebx, eax
    mov eax, 15
    int 0x80
3:
    jmp 3b
.global task_runner_page_end
task_runner_page_end:
.text
"#
    );

    extern "C" {
        pub fn switch_stacks(prev: *mut CpuContext, next: *const CpuContext);
        pub fn task_entry_kernel();
        pub fn task_entry_user();
        pub fn task_exit_kernel();
        pub fn task_runner_page();
        pub fn task_runner_page_end();
    }
}

/// Address of the kernel-entry thunk.
pub fn kernel_entry_thunk() -> u32 {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        machine::task_entry_kernel as usize as u32
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        0xC0DE_0001
    }
}

/// Address of the user-entry thunk.
pub fn user_entry_thunk() -> u32 {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        machine::task_entry_user as usize as u32
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        0xC0DE_0002
    }
}

/// Address a returning kernel-task entry function falls into.
pub fn kernel_exit_hook() -> u32 {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        machine::task_exit_kernel as usize as u32
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        0xC0DE_0003
    }
}

/// Linear range of the trampoline page inside the kernel image.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn task_runner_span() -> (u32, u32) {
    (
        machine::task_runner_page as usize as u32,
        machine::task_runner_page_end as usize as u32,
    )
}

/// Save the outgoing FPU state, restore (or initialize) the incoming one.
fn swap_fpu(prev: &mut CpuContext, next: &mut CpuContext) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        // SAFETY: the fnsave area is 108 bytes by construction; frstor
        // only runs over an image a previous fnsave produced.
        unsafe {
            core::arch::asm!("fnsave [{}]", in(reg) prev.fpu.0.as_mut_ptr(), options(nostack));
            prev.fpu_valid = true;
            if next.fpu_valid {
                core::arch::asm!("frstor [{}]", in(reg) next.fpu.0.as_ptr(), options(nostack));
            } else {
                core::arch::asm!("fninit", options(nomem, nostack));
            }
        }
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        prev.fpu_valid = true;
        let _ = next;
    }
}

/// Switch from `prev` to `next`.
///
/// # Safety
///
/// Both contexts must be live task contexts, `next`'s stack image must be
/// either a parked switch frame or a pre-baked entry frame, and the
/// caller must run with interrupts disabled.
pub unsafe fn switch(prev: &mut CpuContext, next: &mut CpuContext) {
    swap_fpu(prev, next);
    super::gdt::set_kernel_stack(next.esp0.saturating_sub(ESP0_SAFETY_MARGIN));
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: forwarded from the caller.
    unsafe {
        machine::switch_stacks(prev as *mut CpuContext, next as *const CpuContext);
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        let _ = (prev, next);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn kernel_entry_stack_shape() {
        let mut stack = [0u32; 64];
        let baked = build_kernel_entry_stack(&mut stack, 0xC012_3456, 77, 0xAAAA_0000, 0xBBBB_0000);
        let esp = baked.esp_word_offset;
        assert_eq!(stack[esp], EFLAGS_SWITCH, "switch pops flags first");
        assert_eq!(stack[esp + 5], 0xAAAA_0000, "then returns into the thunk");
        // iret image: eip, cs, eflags.
        assert_eq!(stack[esp + 6], 0xC012_3456);
        assert_eq!(stack[esp + 7], u32::from(SELECTOR_KERNEL_CODE));
        assert_eq!(stack[esp + 8], EFLAGS_INTERRUPTS_ON);
        // Conventional frame for the entry function.
        assert_eq!(stack[esp + 9], 0xBBBB_0000);
        assert_eq!(stack[esp + 10], 77);
    }

    #[test]
    fn user_entry_stack_targets_trampoline() {
        let mut stack = [0u32; 64];
        let baked = build_user_entry_stack(&mut stack, 0x9FFF_FFF8, 0xAAAA_0004);
        let esp = baked.esp_word_offset;
        assert_eq!(stack[esp + 6], LA_TASK_RUNNER.as_u32());
        assert_eq!(stack[esp + 7], u32::from(SELECTOR_USER_CODE));
        assert_eq!(stack[esp + 8], EFLAGS_INTERRUPTS_ON);
        assert_eq!(stack[esp + 9], 0x9FFF_FFF8);
        assert_eq!(stack[esp + 10], u32::from(SELECTOR_USER_DATA));
    }

    #[test]
    fn user_bootstrap_orders_entry_below_parameter() {
        let words = build_user_bootstrap(0x0040_1000, 42);
        assert_eq!(words, [0x0040_1000, 42]);
    }
}
