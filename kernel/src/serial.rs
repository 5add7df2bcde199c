//! COM1 serial output for early boot and diagnostics.

use core::fmt;

use spin::Mutex;

use crate::arch::i386::port::{inb, outb};

const COM1: u16 = 0x3F8;

/// A 16550 UART on a fixed base port.
pub struct SerialPort {
    base: u16,
    initialized: bool,
}

/// The boot serial console.
pub static SERIAL: Mutex<SerialPort> = Mutex::new(SerialPort {
    base: COM1,
    initialized: false,
});

impl SerialPort {
    /// 115200 8N1, FIFO on.
    pub fn init(&mut self) {
        // SAFETY: standard 16550 initialization on the COM1 register file.
        unsafe {
            outb(self.base + 1, 0x00); // interrupts off
            outb(self.base + 3, 0x80); // DLAB
            outb(self.base + 0, 0x01); // divisor 1 = 115200
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03); // 8N1
            outb(self.base + 2, 0xC7); // FIFO, 14-byte threshold
            outb(self.base + 4, 0x0B); // DTR + RTS + OUT2
        }
        self.initialized = true;
    }

    #[cfg(target_os = "none")]
    fn transmit_ready(&self) -> bool {
        // SAFETY: LSR read has no side effect.
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        #[cfg(target_os = "none")]
        {
            let mut spins = 0u32;
            while !self.transmit_ready() {
                spins += 1;
                if spins > 1_000_000 {
                    return;
                }
                core::hint::spin_loop();
            }
        }
        // SAFETY: THR write on an initialized UART.
        unsafe { outb(self.base, byte) };
    }

    pub fn write_str(&mut self, text: &str) {
        for byte in text.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        SerialPort::write_str(self, text);
        Ok(())
    }
}

/// Print to COM1.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

/// Print to COM1, with a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = SERIAL.lock().write_fmt(args);
}
