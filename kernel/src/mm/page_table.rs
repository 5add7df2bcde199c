//! Two-level i386 paging structures and the recursive self-map window.
//!
//! Directory slot 1023 points at the directory's own frame, which makes
//! the directory visible at `0xFFFFF000` and the page table for directory
//! index D at `0xFFC00000 + D * 0x1000`. Page-table edits go through that
//! window; arbitrary physical frames are touched through the temporary
//! mapping pages, one `invlpg` per rewrite.

use bitflags::bitflags;

#[cfg(not(target_os = "none"))]
use std::{boxed::Box, vec::Vec};

#[cfg(target_os = "none")]
use super::layout::{page_table_alias, LA_DIRECTORY_RECURSIVE};
use super::layout::{LA_TEMP_1, RECURSIVE_SLOT};
use super::{Linear, Physical, ENTRIES_PER_TABLE, PAGE_SHIFT};

bitflags! {
    /// Page-directory entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PdeFlags: u32 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const USER           = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const CACHE_DISABLED = 1 << 4;
        const ACCESSED       = 1 << 5;
        /// 4 MiB page size; this kernel always maps 4 KiB pages.
        const PAGE_SIZE      = 1 << 7;
        const GLOBAL         = 1 << 8;
        /// Kernel convention: mapping is permanent, never reclaimed.
        const FIXED          = 1 << 9;
    }
}

bitflags! {
    /// Page-table entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const USER           = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const CACHE_DISABLED = 1 << 4;
        const ACCESSED       = 1 << 5;
        const DIRTY          = 1 << 6;
        const GLOBAL         = 1 << 8;
        /// Kernel convention: mapping is permanent, never reclaimed.
        const FIXED          = 1 << 9;
        /// Swap reservation; carried in the layout but always zero, the
        /// kernel ships no swap engine.
        const RESERVED_SWAP  = 1 << 10;
    }
}

/// Frame-number field of the reserve sentinel: a non-present entry whose
/// address bits are all ones marks a reserved (guard) page so the fault
/// handler can tell it from an unmapped one.
const RESERVE_SENTINEL: u32 = 0xFFFF_F000;

/// One page-directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageDirectoryEntry(u32);

impl PageDirectoryEntry {
    pub const EMPTY: Self = Self(0);

    pub fn new(table: Physical, flags: PdeFlags) -> Self {
        Self((table.as_u32() & 0xFFFF_F000) | flags.bits())
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn table(self) -> Physical {
        Physical(self.0 & 0xFFFF_F000)
    }

    pub fn flags(self) -> PdeFlags {
        PdeFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PdeFlags::PRESENT)
    }

    /// An all-zero entry: no table was ever allocated here.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    pub fn new(frame: Physical, flags: PteFlags) -> Self {
        Self((frame.as_u32() & 0xFFFF_F000) | flags.bits())
    }

    /// Non-present guard entry with the reserve sentinel address.
    pub fn reserved(flags: PteFlags) -> Self {
        Self(RESERVE_SENTINEL | (flags & !PteFlags::PRESENT).bits())
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn frame(self) -> Physical {
        Physical(self.0 & 0xFFFF_F000)
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True for the reserve-sentinel guard entries.
    pub fn is_reserved_guard(self) -> bool {
        !self.is_present() && self.0 & 0xFFFF_F000 == RESERVE_SENTINEL
    }
}

/// Access to the page tables of one address space.
///
/// The live implementation reads and writes through the recursive window
/// of the running address space; the host test build substitutes an
/// in-memory table set so region logic is exercised without paging
/// hardware.
pub trait TableView {
    /// Read directory entry `dir`.
    fn pde(&self, dir: usize) -> PageDirectoryEntry;

    /// Write directory entry `dir`.
    fn set_pde(&mut self, dir: usize, entry: PageDirectoryEntry);

    /// Read entry `tab` of the table selected by a present `dir`.
    fn pte(&self, dir: usize, tab: usize) -> PageTableEntry;

    /// Write entry `tab` of the table selected by a present `dir`.
    fn set_pte(&mut self, dir: usize, tab: usize, entry: PageTableEntry);

    /// Zero-fill a whole table reachable through `dir`.
    fn zero_table(&mut self, dir: usize) {
        for tab in 0..ENTRIES_PER_TABLE {
            self.set_pte(dir, tab, PageTableEntry::EMPTY);
        }
    }

    /// Run `f` over an arbitrary physical frame viewed as a table of 1024
    /// entries, through a transient mapping.
    fn with_frame<R>(&mut self, frame: Physical, f: &mut dyn FnMut(&mut [u32; 1024]) -> R) -> R;

    /// Invalidate the TLB entry for one linear page.
    fn invalidate(&mut self, address: Linear);

    /// Reload the whole TLB.
    fn flush_all(&mut self);
}

/// The address space the CPU is running on, edited through the recursive
/// self-map.
#[cfg(target_os = "none")]
pub struct ActiveSpace;

#[cfg(target_os = "none")]
impl ActiveSpace {
    /// Raw pointer to the directory alias.
    fn directory_ptr() -> *mut u32 {
        LA_DIRECTORY_RECURSIVE.0 as *mut u32
    }

    /// Raw pointer to the alias of the table for directory index `dir`.
    fn table_ptr(dir: usize) -> *mut u32 {
        page_table_alias(dir).0 as *mut u32
    }

    /// Install `frame` into the first temporary-mapping slot and return
    /// its linear window.
    fn map_temporary(&mut self, frame: Physical) -> Linear {
        let dir = LA_TEMP_1.directory_index();
        let tab = LA_TEMP_1.table_index();
        let entry = PageTableEntry::new(
            frame,
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::FIXED,
        );
        self.set_pte(dir, tab, entry);
        LA_TEMP_1
    }
}

#[cfg(target_os = "none")]
impl TableView for ActiveSpace {
    fn pde(&self, dir: usize) -> PageDirectoryEntry {
        // SAFETY: the recursive slot keeps the directory alias mapped in
        // every address space this kernel creates.
        unsafe { PageDirectoryEntry::from_raw(Self::directory_ptr().add(dir).read_volatile()) }
    }

    fn set_pde(&mut self, dir: usize, entry: PageDirectoryEntry) {
        // SAFETY: as above; the write targets the current directory.
        unsafe { Self::directory_ptr().add(dir).write_volatile(entry.raw()) };
        self.invalidate(Linear((dir as u32) << 22));
    }

    fn pte(&self, dir: usize, tab: usize) -> PageTableEntry {
        // SAFETY: callers only read entries below present directory slots;
        // the recursive window aliases that table.
        unsafe { PageTableEntry::from_raw(Self::table_ptr(dir).add(tab).read_volatile()) }
    }

    fn set_pte(&mut self, dir: usize, tab: usize, entry: PageTableEntry) {
        // SAFETY: as for `pte`; the alias is writable at ring 0.
        unsafe { Self::table_ptr(dir).add(tab).write_volatile(entry.raw()) };
        self.invalidate(Linear(((dir as u32) << 22) | ((tab as u32) << PAGE_SHIFT)));
    }

    fn with_frame<R>(&mut self, frame: Physical, f: &mut dyn FnMut(&mut [u32; 1024]) -> R) -> R {
        let window = self.map_temporary(frame);
        // SAFETY: map_temporary just installed a writable mapping of
        // `frame` at `window` and invalidated the stale TLB entry.
        let view = unsafe { &mut *(window.0 as *mut [u32; 1024]) };
        f(view)
    }

    fn invalidate(&mut self, address: Linear) {
        crate::arch::i386::tlb::invlpg(address);
    }

    fn flush_all(&mut self) {
        crate::arch::i386::tlb::reload_cr3();
    }
}

/// In-memory table set for the host test build.
#[cfg(not(target_os = "none"))]
pub struct FakeSpace {
    directory: [u32; ENTRIES_PER_TABLE],
    frames: std::collections::BTreeMap<u32, Box<[u32; ENTRIES_PER_TABLE]>>,
    /// Linear pages invalidated since construction, for TLB-discipline
    /// assertions.
    pub invalidations: Vec<Linear>,
    pub full_flushes: u32,
}

#[cfg(not(target_os = "none"))]
impl Default for FakeSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "none"))]
impl FakeSpace {
    pub fn new() -> Self {
        Self {
            directory: [0; ENTRIES_PER_TABLE],
            frames: std::collections::BTreeMap::new(),
            invalidations: Vec::new(),
            full_flushes: 0,
        }
    }

    fn backing(&mut self, frame: Physical) -> &mut [u32; ENTRIES_PER_TABLE] {
        self.frames
            .entry(frame.as_u32())
            .or_insert_with(|| Box::new([0; ENTRIES_PER_TABLE]))
    }
}

#[cfg(not(target_os = "none"))]
impl TableView for FakeSpace {
    fn pde(&self, dir: usize) -> PageDirectoryEntry {
        PageDirectoryEntry::from_raw(self.directory[dir])
    }

    fn set_pde(&mut self, dir: usize, entry: PageDirectoryEntry) {
        self.directory[dir] = entry.raw();
        self.invalidations.push(Linear((dir as u32) << 22));
    }

    fn pte(&self, dir: usize, tab: usize) -> PageTableEntry {
        let table = self.pde(dir).table().as_u32();
        match self.frames.get(&table) {
            Some(frame) => PageTableEntry::from_raw(frame[tab]),
            None => PageTableEntry::EMPTY,
        }
    }

    fn set_pte(&mut self, dir: usize, tab: usize, entry: PageTableEntry) {
        let table = self.pde(dir).table();
        self.backing(table)[tab] = entry.raw();
        self.invalidations
            .push(Linear(((dir as u32) << 22) | ((tab as u32) << PAGE_SHIFT)));
    }

    fn with_frame<R>(&mut self, frame: Physical, f: &mut dyn FnMut(&mut [u32; 1024]) -> R) -> R {
        let result = f(self.backing(frame));
        self.invalidations.push(LA_TEMP_1);
        result
    }

    fn invalidate(&mut self, address: Linear) {
        self.invalidations.push(address);
    }

    fn flush_all(&mut self) {
        self.full_flushes += 1;
    }
}

/// Check the recursive-slot invariant of a directory image: entry 1023
/// must reference the directory's own frame.
pub fn recursive_slot_valid(directory: &[u32; ENTRIES_PER_TABLE], own_frame: Physical) -> bool {
    let entry = PageDirectoryEntry::from_raw(directory[RECURSIVE_SLOT]);
    entry.is_present() && entry.table() == own_frame
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entries_pack_frame_and_flags() {
        let pte = PageTableEntry::new(
            Physical(0x0024_0000),
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
        assert_eq!(pte.frame(), Physical(0x0024_0000));
        assert!(pte.is_present());
        assert!(pte.flags().contains(PteFlags::USER));
        assert!(!pte.flags().contains(PteFlags::RESERVED_SWAP));
    }

    #[test]
    fn reserve_sentinel_is_recognizable() {
        let guard = PageTableEntry::reserved(PteFlags::WRITABLE | PteFlags::USER);
        assert!(!guard.is_present());
        assert!(guard.is_reserved_guard());
        assert!(!guard.is_empty());
        // A plain unmapped entry is not a guard.
        assert!(!PageTableEntry::EMPTY.is_reserved_guard());
    }

    #[test]
    fn fake_space_round_trips_entries() {
        let mut space = FakeSpace::new();
        let table = Physical(0x0030_0000);
        space.set_pde(5, PageDirectoryEntry::new(table, PdeFlags::PRESENT | PdeFlags::WRITABLE));
        space.set_pte(5, 7, PageTableEntry::new(Physical(0x0040_0000), PteFlags::PRESENT));
        assert!(space.pde(5).is_present());
        assert_eq!(space.pte(5, 7).frame(), Physical(0x0040_0000));
        // Every mutation invalidated its linear page.
        assert_eq!(space.invalidations.len(), 2);
    }

    #[test]
    fn recursive_slot_check() {
        let mut directory = [0u32; ENTRIES_PER_TABLE];
        let own = Physical(0x0050_0000);
        directory[RECURSIVE_SLOT] =
            PageDirectoryEntry::new(own, PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::FIXED)
                .raw();
        assert!(recursive_slot_valid(&directory, own));
        assert!(!recursive_slot_valid(&directory, Physical(0x0060_0000)));
    }
}
