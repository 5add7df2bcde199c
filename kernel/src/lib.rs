//! EXOS kernel library.
//!
//! A preemptive, protected-mode kernel for 32-bit x86: physical and
//! virtual memory management over a recursive self-map, software-switched
//! tasks behind a priority round-robin scheduler, a fixed syscall table
//! on `int 0x80`, block storage with partition discovery, and a console
//! shell.
//!
//! The crate builds for the bare-metal target and for the host, where
//! the architecture-independent core runs under the standard test
//! harness.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare metal the kernel heap feeds the global allocator; the host
// build delegates to the system allocator so tests allocate normally.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;
#[macro_use]
pub mod serial;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod kernel;
pub mod log_service;
pub mod mm;
pub mod object;
pub mod process;
pub mod sched;
pub mod security;
pub mod shell;
pub mod sync;
pub mod syscall;
pub mod timer;

// Re-exports for the binary and the integration tests.
pub use error::{KernelError, Result};
pub use mm::{Linear, Physical};
