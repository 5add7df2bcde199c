//! Kernel logging sink for the `log` facade.
//!
//! Records go to the serial line always and to the text console from
//! `Info` upward. Debug builds default to `Debug` verbosity, release
//! builds to `Info`.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!(
            "[{:5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        if record.level() <= Level::Info {
            crate::println!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the logger; idempotent.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(default);
    }
}

/// Adjust verbosity at run time (shell `loglevel` helper).
pub fn set_level(filter: LevelFilter) {
    log::set_max_level(filter);
}
