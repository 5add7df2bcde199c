//! The interrupt frame: the exact register image the trap stubs push.
//!
//! Field order is bit-compatible with the common stub's push sequence;
//! the scheduler, fault handlers, and exception reporters consume it
//! unchanged. Vectors whose CPU exception pushes no error code get a
//! zero pushed by their stub so every frame has the same shape.

use core::fmt;

/// x87 state saved with `fnsave` (108 bytes).
#[derive(Clone, Copy)]
#[repr(C)]
pub struct FpuState(pub [u8; 108]);

impl FpuState {
    pub const fn zeroed() -> Self {
        Self([0; 108])
    }
}

impl Default for FpuState {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for FpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FpuState(..)")
    }
}

/// Register image on the ring-0 stack after the common stub ran.
///
/// Ascending field order mirrors descending push order: the FPU area is
/// stored last (lowest address), the CPU-pushed `eflags`/`cs`/`eip` sit
/// at the top, and `user_esp`/`user_ss` are only valid when `cs` holds a
/// ring-3 selector.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptFrame {
    pub fpu: FpuState,

    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,

    pub cr4: u32,
    pub cr3: u32,
    pub cr2: u32,
    pub cr0: u32,

    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,

    // pusha image
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Ring-0 ESP at the time of `pusha`.
    pub kernel_esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    /// Vector number pushed by the per-vector stub.
    pub vector: u32,
    /// CPU error code, zero when the vector pushes none.
    pub error_code: u32,

    // CPU-pushed return frame
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// Only pushed on a privilege transition.
    pub user_esp: u32,
    pub user_ss: u32,
}

impl InterruptFrame {
    /// True when the interrupted code ran at ring 3.
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Exit code encoding `{ vector, CR2 }` for a task killed by a fault:
    /// the vector in the top byte, the faulting page in the rest.
    pub fn fault_exit_code(&self) -> u32 {
        (self.vector << 24) | (self.cr2 >> 12 << 4) | 0xF
    }
}

/// Log one frame, the way exception reports print it.
pub fn log_frame(frame: &InterruptFrame) {
    log::error!(
        "vector {} error {:#x} at {:#06x}:{:#010x} eflags {:#010x}",
        frame.vector,
        frame.error_code,
        frame.cs,
        frame.eip,
        frame.eflags
    );
    log::error!(
        "eax {:#010x} ebx {:#010x} ecx {:#010x} edx {:#010x}",
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx
    );
    log::error!(
        "esi {:#010x} edi {:#010x} ebp {:#010x} esp {:#010x}",
        frame.esi,
        frame.edi,
        frame.ebp,
        frame.kernel_esp
    );
    log::error!(
        "cr0 {:#010x} cr2 {:#010x} cr3 {:#010x} cr4 {:#010x}",
        frame.cr0,
        frame.cr2,
        frame.cr3,
        frame.cr4
    );
    if frame.from_user() {
        log::error!("user stack {:#06x}:{:#010x}", frame.user_ss, frame.user_esp);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_push_sequence() {
        use core::mem::{offset_of, size_of};
        // The asm stub counts on these offsets; pin them.
        assert_eq!(offset_of!(InterruptFrame, fpu), 0);
        assert_eq!(offset_of!(InterruptFrame, dr0), 108);
        assert_eq!(offset_of!(InterruptFrame, cr4), 132);
        assert_eq!(offset_of!(InterruptFrame, gs), 148);
        assert_eq!(offset_of!(InterruptFrame, edi), 164);
        assert_eq!(offset_of!(InterruptFrame, vector), 196);
        assert_eq!(offset_of!(InterruptFrame, error_code), 200);
        assert_eq!(offset_of!(InterruptFrame, eip), 204);
        assert_eq!(offset_of!(InterruptFrame, user_ss), 220);
        assert_eq!(size_of::<InterruptFrame>(), 224);
    }

    #[test]
    fn ring_detection_reads_cs_rpl() {
        let mut frame: InterruptFrame = unsafe { core::mem::zeroed() };
        frame.cs = 0x08;
        assert!(!frame.from_user());
        frame.cs = 0x1B;
        assert!(frame.from_user());
    }

    #[test]
    fn fault_exit_code_encodes_vector_and_page() {
        let mut frame: InterruptFrame = unsafe { core::mem::zeroed() };
        frame.vector = 14;
        frame.cr2 = 0x0040_2123;
        let code = frame.fault_exit_code();
        assert_eq!(code >> 24, 14);
        assert_eq!(code & 0xF, 0xF);
    }
}
