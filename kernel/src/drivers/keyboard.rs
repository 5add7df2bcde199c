//! PS/2 keyboard input path.
//!
//! The IRQ1 handler drains raw set-1 scancodes into a queue; consumers
//! poll decoded key events through the console syscalls. Only the base
//! map ships here; full layout tables belong to layout drivers.

extern crate alloc;

use alloc::collections::VecDeque;

use bitflags::bitflags;
use spin::Mutex;

const DATA_PORT: u16 = 0x60;

bitflags! {
    /// Modifier state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL  = 1 << 1;
        const ALT   = 1 << 2;
        const CAPS  = 1 << 3;
    }
}

/// One decoded key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Raw make code.
    pub scancode: u8,
    /// ASCII translation, 0 when none.
    pub ascii: u8,
    pub modifiers: Modifiers,
}

struct KeyboardState {
    queue: VecDeque<KeyEvent>,
    modifiers: Modifiers,
}

static KEYBOARD: Mutex<KeyboardState> = Mutex::new(KeyboardState {
    queue: VecDeque::new(),
    modifiers: Modifiers::empty(),
});

/// Queue capacity; excess input is dropped oldest-first.
const QUEUE_LIMIT: usize = 64;

const SCANCODE_LSHIFT: u8 = 0x2A;
const SCANCODE_RSHIFT: u8 = 0x36;
const SCANCODE_CTRL: u8 = 0x1D;
const SCANCODE_ALT: u8 = 0x38;
const SCANCODE_CAPS: u8 = 0x3A;
const RELEASE_BIT: u8 = 0x80;

/// Set-1 base map, unshifted.
const BASE_MAP: [u8; 64] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
];

/// Set-1 base map, shifted.
const SHIFT_MAP: [u8; 64] = [
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 8, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
];

fn translate(scancode: u8, modifiers: Modifiers) -> u8 {
    let index = scancode as usize;
    if index >= BASE_MAP.len() {
        return 0;
    }
    let shifted = modifiers.contains(Modifiers::SHIFT) ^ modifiers.contains(Modifiers::CAPS);
    let ascii = if shifted { SHIFT_MAP[index] } else { BASE_MAP[index] };
    if modifiers.contains(Modifiers::CTRL) && ascii.is_ascii_alphabetic() {
        return ascii.to_ascii_uppercase() - b'@';
    }
    ascii
}

/// Feed one raw scancode into the state machine; the IRQ handler and the
/// host tests both enter here.
pub fn feed_scancode(scancode: u8) {
    let mut state = KEYBOARD.lock();
    let released = scancode & RELEASE_BIT != 0;
    let code = scancode & !RELEASE_BIT;

    let modifier = match code {
        SCANCODE_LSHIFT | SCANCODE_RSHIFT => Some(Modifiers::SHIFT),
        SCANCODE_CTRL => Some(Modifiers::CTRL),
        SCANCODE_ALT => Some(Modifiers::ALT),
        _ => None,
    };
    if let Some(modifier) = modifier {
        state.modifiers.set(modifier, !released);
        return;
    }
    if code == SCANCODE_CAPS {
        if !released {
            state.modifiers.toggle(Modifiers::CAPS);
        }
        return;
    }
    if released {
        return;
    }

    let modifiers = state.modifiers;
    let event = KeyEvent {
        scancode: code,
        ascii: translate(code, modifiers),
        modifiers,
    };
    if state.queue.len() == QUEUE_LIMIT {
        state.queue.pop_front();
    }
    state.queue.push_back(event);
}

/// IRQ1 handler: drain the controller into the queue.
#[cfg(target_os = "none")]
fn irq_handler(_irq: u8) {
    // SAFETY: reading the PS/2 data port inside the keyboard IRQ.
    let scancode = unsafe { crate::arch::i386::port::inb(DATA_PORT) };
    feed_scancode(scancode);
}

/// Hook the keyboard onto IRQ1.
#[cfg(target_os = "none")]
pub fn init() {
    crate::irq::register_irq_handler(crate::irq::IRQ_KEYBOARD, irq_handler);
    log::debug!("keyboard: irq {} hooked", crate::irq::IRQ_KEYBOARD);
}

/// Next event without consuming it.
pub fn peek_key() -> Option<KeyEvent> {
    KEYBOARD.lock().queue.front().copied()
}

/// Consume the next event.
pub fn get_key() -> Option<KeyEvent> {
    KEYBOARD.lock().queue.pop_front()
}

/// Current modifier state.
pub fn modifiers() -> Modifiers {
    KEYBOARD.lock().modifiers
}

/// Block until a key arrives.
pub fn wait_key() -> KeyEvent {
    loop {
        if let Some(event) = get_key() {
            return event;
        }
        crate::sched::yield_now();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn drain() {
        while get_key().is_some() {}
    }

    #[test]
    fn plain_keys_decode_to_ascii() {
        let _serial = SERIAL.lock().unwrap_or_else(|p| p.into_inner());
        drain();
        feed_scancode(0x1E); // 'a' make
        feed_scancode(0x9E); // 'a' break
        let event = get_key().expect("one event queued");
        assert_eq!(event.ascii, b'a');
        assert_eq!(get_key(), None, "release produces no event");
    }

    #[test]
    fn shift_changes_the_map() {
        let _serial = SERIAL.lock().unwrap_or_else(|p| p.into_inner());
        drain();
        feed_scancode(SCANCODE_LSHIFT);
        feed_scancode(0x1E);
        feed_scancode(SCANCODE_LSHIFT | RELEASE_BIT);
        feed_scancode(0x1E);
        let upper = get_key().unwrap();
        let lower = get_key().unwrap();
        assert_eq!(upper.ascii, b'A');
        assert!(upper.modifiers.contains(Modifiers::SHIFT));
        assert_eq!(lower.ascii, b'a');
    }

    #[test]
    fn ctrl_produces_control_codes() {
        let _serial = SERIAL.lock().unwrap_or_else(|p| p.into_inner());
        drain();
        feed_scancode(SCANCODE_CTRL);
        feed_scancode(0x2E); // 'c'
        feed_scancode(SCANCODE_CTRL | RELEASE_BIT);
        let event = get_key().unwrap();
        assert_eq!(event.ascii, 3, "ctrl-c is ETX");
    }
}
