//! Fixed address-space layout.
//!
//! Every process sees the same linear map: low RAM identity-mapped for the
//! kernel, the user window, a reserved shared-library band, the kernel
//! window, the descriptor-table band, and the recursive self-map window
//! that exposes the live page directory and all page tables.

use super::{Linear, Physical, PAGE_SIZE};

// ---------------------------------------------------------------------------
// Linear layout
// ---------------------------------------------------------------------------

/// Identity-mapped low RAM (BIOS data, VGA, text console).
pub const LA_RAM: Linear = Linear(0x0000_0000);
/// VGA graphics memory inside the low band.
pub const LA_VIDEO: Linear = Linear(0x000A_0000);
/// VGA text buffer inside the low band.
pub const LA_CONSOLE: Linear = Linear(0x000B_8000);
/// Start of the user code/data/heap/stack window.
pub const LA_USER: Linear = Linear(0x0040_0000);
/// Reserved shared-library band.
pub const LA_LIBRARY: Linear = Linear(0xA000_0000);
/// User-executable alias of the task entry trampoline page.
pub const LA_TASK_RUNNER: Linear = Linear(0xBFFF_F000);
/// Start of the kernel window; everything from here up is supervisor.
pub const LA_KERNEL: Linear = Linear(0xC000_0000);
/// Descriptor-table band: IDT, GDT, TSS, physical page bitmap.
pub const LA_SYSTEM: Linear = Linear(0xFF40_0000);
/// System band: fixed aliases of the current directory and system table.
pub const LA_DIRECTORY: Linear = Linear(0xFF80_0000);
/// Alias of the page table that maps the 0xFF800000 band.
pub const LA_SYSTABLE: Linear = Linear(0xFF80_1000);

/// Temporary mapping pages used to touch arbitrary physical frames.
pub const LA_TEMP_1: Linear = Linear(0xFFBF_D000);
pub const LA_TEMP_2: Linear = Linear(0xFFBF_E000);
pub const LA_TEMP_3: Linear = Linear(0xFFBF_F000);

/// Base of the recursive self-map window: page table for directory index D
/// is visible at `LA_PAGE_TABLES + D * 4096`.
pub const LA_PAGE_TABLES: Linear = Linear(0xFFC0_0000);
/// Recursive alias of the page directory itself.
pub const LA_DIRECTORY_RECURSIVE: Linear = Linear(0xFFFF_F000);

/// Directory slot reserved for the recursive self-map.
pub const RECURSIVE_SLOT: usize = 1023;

/// Linear alias of the page table covering directory index `dir`.
pub const fn page_table_alias(dir: usize) -> Linear {
    Linear(LA_PAGE_TABLES.0 + (dir as u32) * PAGE_SIZE)
}

/// First directory index of the kernel window. Directory entries at or
/// above this index are shared by all address spaces.
pub const KERNEL_DIRECTORY_FIRST: usize = (LA_KERNEL.0 >> 22) as usize;

// ---------------------------------------------------------------------------
// Physical boot layout
// ---------------------------------------------------------------------------
//
//  00000000  00100000  low RAM (BIOS, VGA, text console, ROM)
//  00100000  00020000  high memory area
//  00120000  00001000  interrupt descriptor table
//  00121000  00002000  global descriptor table
//  00123000  00008000  task state segment area
//  0012B000  ...       loader scratch up to the kernel image
//
// The kernel image base and size come from the startup block; the physical
// page bitmap sits immediately after the image.

/// Low memory size permanently reserved for the kernel.
pub const LOW_MEMORY_SIZE: u32 = 0x0010_0000;
/// High memory area size.
pub const HMA_SIZE: u32 = 0x0002_0000;

pub const IDT_SIZE: u32 = 0x1000;
pub const GDT_SIZE: u32 = 0x2000;
pub const TSS_AREA_SIZE: u32 = 0x8000;

pub const PA_IDT: Physical = Physical(LOW_MEMORY_SIZE + HMA_SIZE);
pub const PA_GDT: Physical = Physical(PA_IDT.0 + IDT_SIZE);
pub const PA_TSS: Physical = Physical(PA_GDT.0 + GDT_SIZE);
pub const PA_SYSTEM_END: Physical = Physical(PA_TSS.0 + TSS_AREA_SIZE);

/// Linear aliases of the descriptor band inside `LA_SYSTEM`.
pub const LA_IDT: Linear = Linear(LA_SYSTEM.0);
pub const LA_GDT: Linear = Linear(LA_IDT.0 + IDT_SIZE);
pub const LA_TSS: Linear = Linear(LA_GDT.0 + GDT_SIZE);

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

pub const SELECTOR_KERNEL_CODE: u16 = 0x08;
pub const SELECTOR_KERNEL_DATA: u16 = 0x10;
pub const SELECTOR_USER_CODE: u16 = 0x18 | 3;
pub const SELECTOR_USER_DATA: u16 = 0x20 | 3;
pub const SELECTOR_REAL_CODE: u16 = 0x28;
pub const SELECTOR_REAL_DATA: u16 = 0x30;
pub const SELECTOR_TSS: u16 = 0x40;

/// Classification of a linear address against the fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRegion {
    /// Identity-mapped low RAM, supervisor only
    LowRam,
    /// User window
    User,
    /// Shared-library band
    Library,
    /// Kernel window
    Kernel,
    /// IDT/GDT/TSS/bitmap band
    System,
    /// Directory/systable/temp band
    SystemTables,
    /// Recursive self-map window
    Recursive,
}

impl AddressRegion {
    pub fn of(addr: Linear) -> Self {
        match addr.0 {
            a if a < LA_USER.0 => AddressRegion::LowRam,
            a if a < LA_LIBRARY.0 => AddressRegion::User,
            a if a < LA_KERNEL.0 => AddressRegion::Library,
            a if a < LA_SYSTEM.0 => AddressRegion::Kernel,
            a if a < LA_DIRECTORY.0 => AddressRegion::System,
            a if a < LA_PAGE_TABLES.0 => AddressRegion::SystemTables,
            _ => AddressRegion::Recursive,
        }
    }

    /// True for regions a ring-3 task may touch.
    pub fn user_accessible(self) -> bool {
        matches!(self, AddressRegion::User | AddressRegion::Library)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn recursive_window_constants_agree() {
        // Directory slot 1023 places the table window at 0xFFC00000 and the
        // directory alias in the window's own last page.
        assert_eq!(LA_PAGE_TABLES.0, (RECURSIVE_SLOT as u32) << 22);
        assert_eq!(
            page_table_alias(RECURSIVE_SLOT).0,
            LA_DIRECTORY_RECURSIVE.0
        );
    }

    #[test]
    fn kernel_band_starts_at_3gb() {
        assert_eq!(KERNEL_DIRECTORY_FIRST, 768);
        assert_eq!(AddressRegion::of(LA_KERNEL), AddressRegion::Kernel);
        assert_eq!(AddressRegion::of(Linear(0xBFFF_FFFF)), AddressRegion::Library);
    }

    #[test]
    fn user_window_classification() {
        assert!(AddressRegion::of(Linear(0x0040_0000)).user_accessible());
        assert!(AddressRegion::of(Linear(0x9FFF_FFFF)).user_accessible());
        assert!(!AddressRegion::of(Linear(0x000B_8000)).user_accessible());
        assert!(!AddressRegion::of(Linear(0xC000_0000)).user_accessible());
        assert!(!AddressRegion::of(Linear(0xFFFF_F000)).user_accessible());
    }

    #[test]
    fn descriptor_band_is_contiguous() {
        assert_eq!(PA_GDT.0, 0x0012_1000);
        assert_eq!(PA_TSS.0, 0x0012_3000);
        assert_eq!(PA_SYSTEM_END.0, 0x0012_B000);
    }
}
