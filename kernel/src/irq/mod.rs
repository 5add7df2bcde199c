//! Interrupt dispatch.
//!
//! The common stub hands every trap here as an [`InterruptFrame`].
//! Exceptions log the frame and kill the offending task (page faults
//! first get a shot at user-stack growth); IRQs acknowledge the PIC and
//! run their registered handler chain, with the timer IRQ driving the
//! clock and the scheduler; the two software gates route into the
//! system-call and driver-call tables.

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;

use spin::RwLock;

#[cfg(target_os = "none")]
use crate::arch::i386::frame::{log_frame, InterruptFrame};
#[cfg(target_os = "none")]
use crate::arch::i386::idt::{VECTOR_DRIVER_CALL, VECTOR_IRQ_BASE, VECTOR_USER_CALL};
use crate::arch::i386::pic;
#[cfg(target_os = "none")]
use crate::mm::Linear;

/// Hardware IRQ lines.
pub const IRQ_LINES: usize = 16;

/// IRQ line of the PIT.
pub const IRQ_TIMER: u8 = 0;
/// IRQ line of the PS/2 keyboard.
pub const IRQ_KEYBOARD: u8 = 1;

/// One registered IRQ handler.
pub type IrqHandler = fn(u8);

static IRQ_HANDLERS: [RwLock<Vec<IrqHandler>>; IRQ_LINES] =
    [const { RwLock::new(Vec::new()) }; IRQ_LINES];

/// Register a handler on an IRQ line and unmask it.
pub fn register_irq_handler(irq: u8, handler: IrqHandler) {
    if (irq as usize) < IRQ_LINES {
        IRQ_HANDLERS[irq as usize].write().push(handler);
        pic::enable_irq(irq);
    }
}

/// How far below the committed stack base a fault still counts as stack
/// use rather than a stray pointer.
pub const STACK_GROW_LIMIT: u32 = 0x0010_0000;

/// Headroom committed beyond the faulting page on every growth.
pub const STACK_GROW_EXTRA: u32 = 0x2000;

/// Bytes to grow a stack whose base sits at `stack_base` after a fault at
/// `fault`, or `None` when the fault is not stack growth.
pub fn stack_growth_needed(stack_base: u32, fault: u32) -> Option<u32> {
    if fault >= stack_base || stack_base == 0 {
        return None;
    }
    let gap = stack_base - fault;
    if gap > STACK_GROW_LIMIT {
        return None;
    }
    Some(gap + STACK_GROW_EXTRA)
}

/// Try to extend the current task's user stack downward to cover `fault`.
#[cfg(target_os = "none")]
fn grow_current_stack(fault: Linear) -> bool {
    use crate::mm::vmm::AllocFlags;
    use crate::sched::TASKS;

    let Some(current) = crate::sched::current_task() else {
        return false;
    };
    let (base, size) = match TASKS.with(current, |t| (t.user_stack_base, t.user_stack_size)) {
        Ok(values) => values,
        Err(_) => return false,
    };
    let Some(extra) = stack_growth_needed(base.as_u32(), fault.as_u32()) else {
        return false;
    };

    let mut vm = crate::mm::vmm::active();
    match vm.resize_region(base, size, size + extra, AllocFlags::READ_WRITE) {
        Ok(new_base) => {
            let grown = base.as_u32() - new_base.as_u32();
            let _ = TASKS.with_mut(current, |task| {
                task.user_stack_base = new_base;
                task.user_stack_size = size + grown;
            });
            log::debug!(
                "stack grown to {:#010x}+{:#x} after fault at {:#010x}",
                new_base.as_u32(),
                size + grown,
                fault.as_u32()
            );
            true
        }
        Err(_) => false,
    }
}

#[cfg(target_os = "none")]
fn handle_page_fault(frame: &mut InterruptFrame) {
    let fault = Linear(frame.cr2);
    if grow_current_stack(fault) {
        return;
    }
    log::error!("page fault at {:#010x}", fault.as_u32());
    log_frame(frame);
    kill_faulting_task(frame);
}

#[cfg(target_os = "none")]
fn kill_faulting_task(frame: &mut InterruptFrame) {
    if !frame.from_user() {
        panic!(
            "kernel fault: vector {} at {:#010x}, cr2 {:#010x}",
            frame.vector, frame.eip, frame.cr2
        );
    }
    if let Some(current) = crate::sched::current_task() {
        let _ = crate::sched::task::kill_task(current, frame.fault_exit_code());
    }
}

#[cfg(target_os = "none")]
fn handle_exception(frame: &mut InterruptFrame) {
    log_frame(frame);
    kill_faulting_task(frame);
}

#[cfg(target_os = "none")]
fn handle_irq(frame: &mut InterruptFrame) {
    let irq = (frame.vector as u8) - VECTOR_IRQ_BASE;
    pic::end_of_interrupt(irq);
    for handler in IRQ_HANDLERS[irq as usize].read().iter() {
        handler(irq);
    }
    if irq == IRQ_TIMER {
        crate::timer::tick();
    }
}

/// Dispatcher entered by the common stub.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn interrupt_dispatch(frame: &mut InterruptFrame) {
    match frame.vector {
        14 => handle_page_fault(frame),
        0..=31 => handle_exception(frame),
        32..=47 => handle_irq(frame),
        v if v == u32::from(VECTOR_USER_CALL) => {
            let privilege = if frame.from_user() {
                crate::process::Privilege::User
            } else {
                crate::process::Privilege::Kernel
            };
            frame.eax = crate::syscall::dispatch(frame.eax, frame.ebx, privilege);
        }
        v if v == u32::from(VECTOR_DRIVER_CALL) => {
            frame.eax = crate::drivers::command::dispatch(frame.eax, frame.ebx);
        }
        other => {
            log::warn!("spurious interrupt vector {}", other);
        }
    }
}
