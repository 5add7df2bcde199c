//! Console syscalls.

use super::base::status_return;
use super::{read_user, read_user_string, set_last_error, write_user_bytes, SYSCALL_FAILED};
use crate::drivers::console::{CONSOLE, CONSOLE_HEIGHT, CONSOLE_WIDTH};
use crate::drivers::keyboard;
use crate::sync::{MutexGuard, CONSOLE_MUTEX};

/// Longest string `ConsolePrint` accepts.
pub const MAX_PRINT: u32 = 4096;

/// Pack a key event into the 32-bit return: ascii, scancode, modifiers.
fn pack_key(event: keyboard::KeyEvent) -> u32 {
    u32::from(event.ascii) | (u32::from(event.scancode) << 8) | (event.modifiers.bits() << 16)
}

/// Returns the packed next key without consuming it, 0 when none.
pub fn sys_peek_key(_parameter: u32) -> u32 {
    keyboard::peek_key().map_or(0, pack_key)
}

/// Blocks until a key arrives; returns it packed.
pub fn sys_get_key(_parameter: u32) -> u32 {
    pack_key(keyboard::wait_key())
}

pub fn sys_get_modifiers(_parameter: u32) -> u32 {
    keyboard::modifiers().bits()
}

pub fn sys_print(parameter: u32) -> u32 {
    match read_user_string(parameter, MAX_PRINT) {
        Ok(text) => {
            let _console = MutexGuard::lock(&CONSOLE_MUTEX);
            CONSOLE.lock().write_str(&text);
            text.len() as u32
        }
        Err(error) => {
            set_last_error(error.code());
            SYSCALL_FAILED
        }
    }
}

/// Argument block for `ConsoleGetString`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct GetStringArgs {
    pub buffer: u32,
    pub buffer_size: u32,
}

/// Read an edited line: echoing, backspace, terminated by Enter. Returns
/// the byte count stored (NUL excluded).
pub fn sys_get_string(parameter: u32) -> u32 {
    extern crate alloc;
    let args = match read_user::<GetStringArgs>(parameter) {
        Ok(args) => args,
        Err(error) => {
            set_last_error(error.code());
            return SYSCALL_FAILED;
        }
    };
    if args.buffer_size == 0 {
        set_last_error(crate::error::KernelError::BadParameter.code());
        return SYSCALL_FAILED;
    }

    let mut line = alloc::vec::Vec::new();
    loop {
        let event = keyboard::wait_key();
        match event.ascii {
            b'\n' => break,
            8 => {
                if line.pop().is_some() {
                    let _console = MutexGuard::lock(&CONSOLE_MUTEX);
                    CONSOLE.lock().put_char(8);
                }
            }
            0 => {}
            byte => {
                if (line.len() as u32) < args.buffer_size - 1 {
                    line.push(byte);
                    let _console = MutexGuard::lock(&CONSOLE_MUTEX);
                    CONSOLE.lock().put_char(byte);
                }
            }
        }
    }
    {
        let _console = MutexGuard::lock(&CONSOLE_MUTEX);
        CONSOLE.lock().put_char(b'\n');
    }

    line.push(0);
    if write_user_bytes(args.buffer, &line).is_err() {
        set_last_error(crate::error::KernelError::BadParameter.code());
        return SYSCALL_FAILED;
    }
    line.len() as u32 - 1
}

/// Cursor move: x in the low half, y in the high half.
pub fn sys_goto_xy(parameter: u32) -> u32 {
    let x = (parameter & 0xFFFF) as usize;
    let y = (parameter >> 16) as usize;
    let _console = MutexGuard::lock(&CONSOLE_MUTEX);
    CONSOLE.lock().goto_xy(x, y);
    0
}

pub fn sys_clear(_parameter: u32) -> u32 {
    let _console = MutexGuard::lock(&CONSOLE_MUTEX);
    CONSOLE.lock().clear();
    0
}

/// Copy a full prepared cell buffer (80x25 u16 cells) onto the screen.
pub fn sys_blit_buffer(parameter: u32) -> u32 {
    let bytes = (CONSOLE_WIDTH * CONSOLE_HEIGHT * 2) as u32;
    if !super::caller_range_valid(parameter, bytes) {
        set_last_error(crate::error::KernelError::BadParameter.code());
        return SYSCALL_FAILED;
    }
    // SAFETY: validated caller range covering the whole cell grid; only
    // reached through the gate on the bare-metal target.
    let cells = unsafe {
        core::slice::from_raw_parts(parameter as *const u16, CONSOLE_WIDTH * CONSOLE_HEIGHT)
    };
    let _console = MutexGuard::lock(&CONSOLE_MUTEX);
    CONSOLE.lock().blit_buffer(cells);
    0
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::drivers::keyboard::{KeyEvent, Modifiers};

    #[test]
    fn key_packing_keeps_all_fields() {
        let event = KeyEvent {
            scancode: 0x1E,
            ascii: b'A',
            modifiers: Modifiers::SHIFT,
        };
        let packed = pack_key(event);
        assert_eq!(packed & 0xFF, u32::from(b'A'));
        assert_eq!((packed >> 8) & 0xFF, 0x1E);
        assert_eq!(packed >> 16, Modifiers::SHIFT.bits());
    }

    #[test]
    fn goto_packs_x_low_y_high() {
        assert_eq!(sys_goto_xy(5 | (7 << 16)), 0);
        let console = CONSOLE.lock();
        assert_eq!(console.cursor(), (5, 7));
    }
}
