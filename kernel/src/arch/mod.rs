//! Architecture support. EXOS targets 32-bit x86 only.

pub mod i386;

pub use i386::{disable_interrupts, enable_interrupts, halt, without_interrupts};
