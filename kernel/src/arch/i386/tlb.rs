//! TLB and control-register primitives.

use crate::mm::{Linear, Physical};

/// Invalidate the TLB entry covering one linear page.
#[inline]
pub fn invlpg(address: Linear) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: invlpg only drops a TLB entry; the next access re-walks the
    // live tables.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) address.as_u32(), options(nostack));
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = address;
}

/// Reload CR3 with its current value, flushing all non-global entries.
#[inline]
pub fn reload_cr3() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: rewriting CR3 with the same directory only flushes the TLB.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
    }
}

/// Current page-directory physical address.
#[inline]
pub fn read_cr3() -> Physical {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: reading CR3 has no side effects at ring 0.
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack));
        }
        Physical(value & 0xFFFF_F000)
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        Physical::NULL
    }
}

/// Switch to another page directory.
///
/// # Safety
///
/// `directory` must be a valid page directory whose recursive slot points
/// at itself and whose kernel band maps the running kernel.
#[inline]
pub unsafe fn load_cr3(directory: Physical) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: forwarded to the caller.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) directory.as_u32(), options(nostack));
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = directory;
}

/// Faulting linear address of the latest page fault.
#[inline]
pub fn read_cr2() -> Linear {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let value: u32;
        // SAFETY: reading CR2 has no side effects at ring 0.
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack));
        }
        Linear(value)
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        Linear::NULL
    }
}
