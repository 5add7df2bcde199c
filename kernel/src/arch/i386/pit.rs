//! 8253/8254 programmable interval timer.
//!
//! Channel 0 is programmed as a rate generator firing once per
//! millisecond; the tick handler maintains the global system time and
//! drives the scheduler.

use super::port::outb;

const CHANNEL0_DATA: u16 = 0x40;
const MODE_COMMAND: u16 = 0x43;

/// Input clock of the PIT in Hz.
pub const PIT_FREQUENCY: u32 = 1_193_182;

/// Tick rate: one interrupt per millisecond.
pub const TICK_HZ: u32 = 1000;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator), binary.
const COMMAND_RATE_GENERATOR: u8 = 0x34;

/// Reload divisor for [`TICK_HZ`].
pub const fn divisor_for(hz: u32) -> u16 {
    (PIT_FREQUENCY / hz) as u16
}

/// Program channel 0 for the kernel tick.
pub fn init() {
    let divisor = divisor_for(TICK_HZ);
    // SAFETY: standard PIT programming sequence on the standard ports.
    unsafe {
        outb(MODE_COMMAND, COMMAND_RATE_GENERATOR);
        outb(CHANNEL0_DATA, (divisor & 0xFF) as u8);
        outb(CHANNEL0_DATA, (divisor >> 8) as u8);
    }
    log::debug!("pit: {} Hz tick, divisor {}", TICK_HZ, divisor);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn millisecond_tick_divisor() {
        // 1193182 / 1000 truncates to 1193, within 0.1% of 1 kHz.
        assert_eq!(divisor_for(TICK_HZ), 1193);
    }
}
