//! VGA text console.
//!
//! An 80x25 cell buffer at linear `0xB8000`; each cell is an ASCII byte
//! plus an attribute byte. The host build renders into a shadow buffer
//! so console logic stays testable.

extern crate alloc;

use lazy_static::lazy_static;
use spin::Mutex;

#[cfg(target_os = "none")]
use crate::mm::layout::LA_CONSOLE;

pub const CONSOLE_WIDTH: usize = 80;
pub const CONSOLE_HEIGHT: usize = 25;

/// Default attribute: light grey on black.
pub const ATTRIBUTE_NORMAL: u8 = 0x07;

const CURSOR_INDEX_PORT: u16 = 0x3D4;
const CURSOR_DATA_PORT: u16 = 0x3D5;

/// One text cell in wire format: ASCII low byte, attribute high byte.
pub const fn cell(character: u8, attribute: u8) -> u16 {
    (character as u16) | ((attribute as u16) << 8)
}

/// The console device.
pub struct Console {
    cursor_x: usize,
    cursor_y: usize,
    attribute: u8,
    #[cfg(not(target_os = "none"))]
    shadow: [u16; CONSOLE_WIDTH * CONSOLE_HEIGHT],
}

lazy_static! {
    /// The single text console; writers lock it directly, syscall paths
    /// additionally hold the Console kernel mutex.
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new());
}

impl Console {
    fn new() -> Self {
        Self {
            cursor_x: 0,
            cursor_y: 0,
            attribute: ATTRIBUTE_NORMAL,
            #[cfg(not(target_os = "none"))]
            shadow: [cell(b' ', ATTRIBUTE_NORMAL); CONSOLE_WIDTH * CONSOLE_HEIGHT],
        }
    }

    fn write_cell(&mut self, x: usize, y: usize, value: u16) {
        let index = y * CONSOLE_WIDTH + x;
        #[cfg(target_os = "none")]
        // SAFETY: the text buffer is identity-mapped at LA_CONSOLE and
        // index stays inside the 80x25 cell grid.
        unsafe {
            (LA_CONSOLE.as_u32() as *mut u16).add(index).write_volatile(value);
        }
        #[cfg(not(target_os = "none"))]
        {
            self.shadow[index] = value;
        }
    }

    fn read_cell(&self, x: usize, y: usize) -> u16 {
        let index = y * CONSOLE_WIDTH + x;
        #[cfg(target_os = "none")]
        // SAFETY: as for write_cell.
        unsafe {
            (LA_CONSOLE.as_u32() as *const u16).add(index).read_volatile()
        }
        #[cfg(not(target_os = "none"))]
        {
            self.shadow[index]
        }
    }

    /// Clear the screen and home the cursor.
    pub fn clear(&mut self) {
        for y in 0..CONSOLE_HEIGHT {
            for x in 0..CONSOLE_WIDTH {
                self.write_cell(x, y, cell(b' ', self.attribute));
            }
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.sync_cursor();
    }

    /// Move the cursor; out-of-range coordinates clamp.
    pub fn goto_xy(&mut self, x: usize, y: usize) {
        self.cursor_x = x.min(CONSOLE_WIDTH - 1);
        self.cursor_y = y.min(CONSOLE_HEIGHT - 1);
        self.sync_cursor();
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn set_attribute(&mut self, attribute: u8) {
        self.attribute = attribute;
    }

    fn scroll_up(&mut self) {
        for y in 1..CONSOLE_HEIGHT {
            for x in 0..CONSOLE_WIDTH {
                let value = self.read_cell(x, y);
                self.write_cell(x, y - 1, value);
            }
        }
        for x in 0..CONSOLE_WIDTH {
            self.write_cell(x, CONSOLE_HEIGHT - 1, cell(b' ', self.attribute));
        }
    }

    fn newline(&mut self) {
        self.cursor_x = 0;
        if self.cursor_y + 1 == CONSOLE_HEIGHT {
            self.scroll_up();
        } else {
            self.cursor_y += 1;
        }
    }

    /// Print one character with control handling.
    pub fn put_char(&mut self, character: u8) {
        match character {
            b'\n' => self.newline(),
            b'\r' => self.cursor_x = 0,
            0x08 => {
                if self.cursor_x > 0 {
                    self.cursor_x -= 1;
                    let attribute = self.attribute;
                    self.write_cell(self.cursor_x, self.cursor_y, cell(b' ', attribute));
                }
            }
            b'\t' => {
                let next = (self.cursor_x / 8 + 1) * 8;
                while self.cursor_x < next.min(CONSOLE_WIDTH - 1) {
                    self.put_char(b' ');
                }
            }
            printable => {
                let attribute = self.attribute;
                self.write_cell(self.cursor_x, self.cursor_y, cell(printable, attribute));
                self.cursor_x += 1;
                if self.cursor_x == CONSOLE_WIDTH {
                    self.newline();
                }
            }
        }
        self.sync_cursor();
    }

    pub fn write_str(&mut self, text: &str) {
        for byte in text.bytes() {
            self.put_char(byte);
        }
    }

    /// Copy a whole prepared cell buffer onto the screen.
    pub fn blit_buffer(&mut self, cells: &[u16]) {
        for (index, value) in cells
            .iter()
            .take(CONSOLE_WIDTH * CONSOLE_HEIGHT)
            .enumerate()
        {
            self.write_cell(index % CONSOLE_WIDTH, index / CONSOLE_WIDTH, *value);
        }
    }

    /// Cell contents at a position, for diagnostics and tests.
    pub fn cell_at(&self, x: usize, y: usize) -> u16 {
        self.read_cell(x.min(CONSOLE_WIDTH - 1), y.min(CONSOLE_HEIGHT - 1))
    }

    fn sync_cursor(&self) {
        #[cfg(target_os = "none")]
        {
            let position = (self.cursor_y * CONSOLE_WIDTH + self.cursor_x) as u16;
            // SAFETY: standard VGA CRTC cursor programming.
            unsafe {
                crate::arch::i386::port::outb(CURSOR_INDEX_PORT, 0x0F);
                crate::arch::i386::port::outb(CURSOR_DATA_PORT, (position & 0xFF) as u8);
                crate::arch::i386::port::outb(CURSOR_INDEX_PORT, 0x0E);
                crate::arch::i386::port::outb(CURSOR_DATA_PORT, (position >> 8) as u8);
            }
        }
    }

    /// Adopt the cursor position the loader left.
    pub fn restore_cursor(&mut self, x: usize, y: usize) {
        self.goto_xy(x, y);
    }
}

impl core::fmt::Write for Console {
    fn write_str(&mut self, text: &str) -> core::fmt::Result {
        Console::write_str(self, text);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn characters_land_under_the_cursor() {
        let mut console = Console::new();
        console.clear();
        console.write_str("ok");
        assert_eq!(console.cell_at(0, 0), cell(b'o', ATTRIBUTE_NORMAL));
        assert_eq!(console.cell_at(1, 0), cell(b'k', ATTRIBUTE_NORMAL));
        assert_eq!(console.cursor(), (2, 0));
    }

    #[test]
    fn newline_and_scroll() {
        let mut console = Console::new();
        console.clear();
        for line in 0..CONSOLE_HEIGHT + 1 {
            console.write_str("line");
            let _ = line;
            console.put_char(b'\n');
        }
        // The first line scrolled off; the buffer still shows text above
        // the cursor.
        assert_eq!(console.cursor().0, 0);
        assert_eq!(console.cursor().1, CONSOLE_HEIGHT - 1);
        assert_eq!(console.cell_at(0, CONSOLE_HEIGHT - 2) & 0xFF, u16::from(b'l'));
    }

    #[test]
    fn goto_clamps_to_the_grid() {
        let mut console = Console::new();
        console.goto_xy(500, 500);
        assert_eq!(console.cursor(), (CONSOLE_WIDTH - 1, CONSOLE_HEIGHT - 1));
    }

    #[test]
    fn blit_replaces_the_visible_cells() {
        let mut console = Console::new();
        let cells = [cell(b'#', 0x1F); CONSOLE_WIDTH * CONSOLE_HEIGHT];
        console.blit_buffer(&cells);
        assert_eq!(console.cell_at(79, 24), cell(b'#', 0x1F));
    }
}
