//! Virtual memory manager: linear-region allocation over the two-level
//! page tables.
//!
//! Regions are allocated in whole pages. A first pass claims the range by
//! writing reserve-sentinel entries (growing page tables on demand), a
//! second pass commits physical frames; any failure unwinds the whole
//! region. Searches and table edits are serialized by the Memory mutex,
//! which is released around every physical-page allocation so the frame
//! allocator is never entered while the VMM still owns the walk.

use bitflags::bitflags;

use super::frame_allocator::PhysicalPageBitmap;
use super::layout::{
    AddressRegion, KERNEL_DIRECTORY_FIRST, LA_DIRECTORY, LA_KERNEL, LA_LIBRARY, LA_PAGE_TABLES,
    LA_SYSTEM, LA_USER, RECURSIVE_SLOT,
};
use super::page_table::{
    PageDirectoryEntry, PageTableEntry, PdeFlags, PteFlags, TableView,
};
use super::{pages_spanned, Linear, Physical, ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::error::{KernelError, Result};
use crate::sync::mutex::INFINITY;
use crate::sync::MEMORY_MUTEX;

bitflags! {
    /// Region allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Back every page with a physical frame.
        const COMMIT       = 1 << 0;
        /// Install guard entries only; a fault on them is recognizable.
        const RESERVE      = 1 << 1;
        /// Pages are writable.
        const READ_WRITE   = 1 << 2;
        /// Search upward from the caller's hint instead of the window base.
        const AT_OR_OVER   = 1 << 3;
        /// Map the given physical range instead of allocating frames.
        const MAP_PHYSICAL = 1 << 4;
        /// Disable caching; combined with MAP_PHYSICAL for MMIO.
        const UNCACHEABLE  = 1 << 5;
        /// Allocate in the kernel window with supervisor-only pages.
        const KERNEL       = 1 << 6;
    }
}

/// Page count above which a freed region reloads CR3 instead of relying
/// on per-page invalidation alone.
const FLUSH_ALL_THRESHOLD: u32 = 64;

/// First linear address the kernel-window search considers; below it lies
/// the kernel image mapping.
const KERNEL_ALLOC_BASE: Linear = Linear(LA_KERNEL.0 + 0x0100_0000);

/// Virtual memory manager over one address space.
pub struct VirtualMemory<'a, V: TableView> {
    view: V,
    frames: &'a PhysicalPageBitmap,
}

impl<'a, V: TableView> VirtualMemory<'a, V> {
    pub fn new(view: V, frames: &'a PhysicalPageBitmap) -> Self {
        Self { view, frames }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn frames(&self) -> &'a PhysicalPageBitmap {
        self.frames
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Translate a linear address through the live tables.
    pub fn map_linear_to_physical(&self, address: Linear) -> Option<Physical> {
        let pde = self.view.pde(address.directory_index());
        if !pde.is_present() {
            return None;
        }
        let pte = self.view.pte(address.directory_index(), address.table_index());
        if !pte.is_present() {
            return None;
        }
        Some(Physical(pte.frame().as_u32() | (address.as_u32() & super::PAGE_MASK)))
    }

    /// True when every page of `[address, address + size)` is mapped
    /// present.
    pub fn is_valid_memory(&self, address: Linear, size: u32) -> bool {
        let mut page = address.align_down();
        let end = address.as_u32().saturating_add(size.max(1));
        while page.as_u32() < end {
            let pde = self.view.pde(page.directory_index());
            if !pde.is_present() {
                return false;
            }
            if !self.view.pte(page.directory_index(), page.table_index()).is_present() {
                return false;
            }
            match page.as_u32().checked_add(PAGE_SIZE) {
                Some(next) => page = Linear(next),
                None => break,
            }
        }
        true
    }

    /// True when no page of the range has an entry (present, guard, or
    /// otherwise).
    pub fn is_region_free(&self, base: Linear, page_count: u32) -> bool {
        let mut page = base.align_down();
        for _ in 0..page_count {
            if page.as_u32() >= LA_PAGE_TABLES.0 {
                return false;
            }
            let pde = self.view.pde(page.directory_index());
            if !pde.is_empty()
                && !self
                    .view
                    .pte(page.directory_index(), page.table_index())
                    .is_empty()
            {
                return false;
            }
            match page.as_u32().checked_add(PAGE_SIZE) {
                Some(next) => page = Linear(next),
                None => return false,
            }
        }
        true
    }

    /// First-fit search for `page_count` consecutive free pages in
    /// `[from, to)`.
    fn find_free_region(&self, from: Linear, to: Linear, page_count: u32) -> Option<Linear> {
        let span = page_count * PAGE_SIZE;
        let mut base = from.align_down();
        while base.as_u32().checked_add(span).is_some_and(|end| end <= to.as_u32()) {
            if self.is_region_free(base, page_count) {
                return Some(base);
            }
            base = Linear(base.as_u32() + PAGE_SIZE);
        }
        None
    }

    /// Search window for a region with the given flags.
    fn search_window(flags: AllocFlags) -> (Linear, Linear) {
        if flags.contains(AllocFlags::KERNEL) {
            (KERNEL_ALLOC_BASE, LA_SYSTEM)
        } else {
            (LA_USER, LA_LIBRARY)
        }
    }

    // -----------------------------------------------------------------
    // Page-table growth and collapse
    // -----------------------------------------------------------------

    /// Ensure a page table exists for the 4 MiB band containing `address`.
    ///
    /// The Memory mutex is dropped around the frame allocation and the
    /// directory entry re-checked afterwards, so a concurrent grower of
    /// the same band loses gracefully.
    fn ensure_page_table(&mut self, address: Linear, user: bool) -> Result<()> {
        let dir = address.directory_index();
        if !self.view.pde(dir).is_empty() {
            return Ok(());
        }

        MEMORY_MUTEX.unlock();
        let table = self.frames.alloc_physical_page();
        MEMORY_MUTEX.lock(INFINITY);

        let table = match table {
            Some(table) => table,
            None => return Err(KernelError::NoMemory),
        };

        if !self.view.pde(dir).is_empty() {
            // Someone else grew this band while the mutex was down.
            self.frames.free_physical_page(table);
            return Ok(());
        }

        let mut flags = PdeFlags::PRESENT | PdeFlags::WRITABLE;
        if user {
            flags |= PdeFlags::USER;
        }
        self.view.set_pde(dir, PageDirectoryEntry::new(table, flags));
        self.view.zero_table(dir);
        Ok(())
    }

    /// Free every page table whose 1024 entries are all zero, clearing the
    /// parent directory entry. Fixed (kernel/system) tables are skipped.
    pub fn free_empty_page_tables(&mut self) {
        for dir in 1..ENTRIES_PER_TABLE {
            if dir == RECURSIVE_SLOT || dir >= KERNEL_DIRECTORY_FIRST {
                continue;
            }
            let pde = self.view.pde(dir);
            if pde.is_empty() || pde.flags().contains(PdeFlags::FIXED) {
                continue;
            }
            let mut live = false;
            for tab in 0..ENTRIES_PER_TABLE {
                if !self.view.pte(dir, tab).is_empty() {
                    live = true;
                    break;
                }
            }
            if !live {
                self.frames.free_physical_page(pde.table());
                self.view.set_pde(dir, PageDirectoryEntry::EMPTY);
            }
        }
    }

    // -----------------------------------------------------------------
    // Region allocation
    // -----------------------------------------------------------------

    /// Allocate a linear region.
    ///
    /// `hint` of zero lets the manager pick a base (first fit in the
    /// window); `AT_OR_OVER` searches upward from the hint; a non-zero
    /// hint without `AT_OR_OVER` demands that exact base and fails if any
    /// page of it is already claimed. Returns `None` on failure with all
    /// partial work undone.
    pub fn alloc_region(
        &mut self,
        hint: Linear,
        target: Physical,
        size: u32,
        flags: AllocFlags,
    ) -> Option<Linear> {
        // The ABI convention for "kernel chooses" is an all-ones hint;
        // normalize it to the null hint used internally.
        let hint = if hint.as_u32() == u32::MAX {
            Linear::NULL
        } else {
            hint
        };
        let page_count = pages_spanned(size);
        let user = !flags.contains(AllocFlags::KERNEL);

        MEMORY_MUTEX.lock(INFINITY);
        let result = self.alloc_region_locked(hint, target, page_count, user, flags);
        MEMORY_MUTEX.unlock();
        result
    }

    fn alloc_region_locked(
        &mut self,
        hint: Linear,
        target: Physical,
        page_count: u32,
        user: bool,
        flags: AllocFlags,
    ) -> Option<Linear> {
        let (window_base, window_end) = Self::search_window(flags);

        let base = if hint.is_null() {
            self.find_free_region(window_base, window_end, page_count)?
        } else if flags.contains(AllocFlags::AT_OR_OVER) {
            let from = hint.align_down().as_u32().max(window_base.as_u32());
            self.find_free_region(Linear(from), window_end, page_count)?
        } else {
            let base = hint.align_down();
            if !self.is_region_free(base, page_count) {
                return None;
            }
            base
        };

        let mut pte_flags = PteFlags::empty();
        if flags.contains(AllocFlags::READ_WRITE) {
            pte_flags |= PteFlags::WRITABLE;
        }
        if user {
            pte_flags |= PteFlags::USER;
        }
        if flags.contains(AllocFlags::UNCACHEABLE) {
            pte_flags |= PteFlags::CACHE_DISABLED;
        }

        // First pass: claim the range with guard entries (or the caller's
        // physical pages), growing tables on demand.
        for index in 0..page_count {
            let page = Linear(base.as_u32() + index * PAGE_SIZE);
            if self.ensure_page_table(page, user).is_err() {
                self.release_range(base, index);
                self.free_empty_page_tables();
                return None;
            }
            let entry = if flags.contains(AllocFlags::MAP_PHYSICAL) {
                PageTableEntry::new(
                    target.offset(index * PAGE_SIZE),
                    pte_flags | PteFlags::PRESENT | PteFlags::FIXED,
                )
            } else {
                PageTableEntry::reserved(pte_flags)
            };
            self.view.set_pte(page.directory_index(), page.table_index(), entry);
        }

        // Second pass: back the range with frames.
        if flags.contains(AllocFlags::COMMIT) && !flags.contains(AllocFlags::MAP_PHYSICAL) {
            for index in 0..page_count {
                let page = Linear(base.as_u32() + index * PAGE_SIZE);

                MEMORY_MUTEX.unlock();
                let frame = self.frames.alloc_physical_page();
                MEMORY_MUTEX.lock(INFINITY);

                let frame = match frame {
                    Some(frame) => frame,
                    None => {
                        self.release_range(base, page_count);
                        self.free_empty_page_tables();
                        return None;
                    }
                };
                self.view.set_pte(
                    page.directory_index(),
                    page.table_index(),
                    PageTableEntry::new(frame, pte_flags | PteFlags::PRESENT),
                );
            }
        }

        Some(base)
    }

    /// Free a region: return committed frames to the bitmap, clear the
    /// entries, then collapse any page table left empty.
    pub fn free_region(&mut self, base: Linear, size: u32) {
        let page_count = pages_spanned(size);
        MEMORY_MUTEX.lock(INFINITY);
        self.release_range(base.align_down(), page_count);
        self.free_empty_page_tables();
        if page_count > FLUSH_ALL_THRESHOLD {
            self.view.flush_all();
        }
        MEMORY_MUTEX.unlock();
    }

    fn release_range(&mut self, base: Linear, page_count: u32) {
        for index in 0..page_count {
            let page = Linear(base.as_u32() + index * PAGE_SIZE);
            let dir = page.directory_index();
            if self.view.pde(dir).is_empty() {
                continue;
            }
            let pte = self.view.pte(dir, page.table_index());
            if pte.is_empty() {
                continue;
            }
            if pte.is_present() && !pte.flags().contains(PteFlags::FIXED) {
                self.frames.free_physical_page(pte.frame());
            }
            self.view.set_pte(dir, page.table_index(), PageTableEntry::EMPTY);
        }
    }

    /// Resize a region whose top end is anchored: the page at
    /// `base + old_size` stays put.
    ///
    /// Growing extends the region downward (stacks grow down) by
    /// committing pages below `base` and returns the new, lower base.
    /// Shrinking releases pages from the bottom and returns the new,
    /// higher base.
    pub fn resize_region(
        &mut self,
        base: Linear,
        old_size: u32,
        new_size: u32,
        flags: AllocFlags,
    ) -> Result<Linear> {
        let old_pages = pages_spanned(old_size);
        let new_pages = pages_spanned(new_size);

        if new_pages == old_pages {
            return Ok(base);
        }

        if new_pages < old_pages {
            let drop_pages = old_pages - new_pages;
            let new_base = Linear(base.as_u32() + drop_pages * PAGE_SIZE);
            MEMORY_MUTEX.lock(INFINITY);
            self.release_range(base.align_down(), drop_pages);
            self.free_empty_page_tables();
            MEMORY_MUTEX.unlock();
            return Ok(new_base);
        }

        let grow_pages = new_pages - old_pages;
        let grow_bytes = grow_pages * PAGE_SIZE;
        let new_base = Linear(
            base.align_down()
                .as_u32()
                .checked_sub(grow_bytes)
                .ok_or(KernelError::BadParameter)?,
        );

        MEMORY_MUTEX.lock(INFINITY);
        let grown = self.alloc_region_locked(
            new_base,
            Physical::NULL,
            grow_pages,
            !flags.contains(AllocFlags::KERNEL),
            flags | AllocFlags::COMMIT,
        );
        MEMORY_MUTEX.unlock();

        match grown {
            Some(base) => Ok(base),
            None => Err(KernelError::NoMemory),
        }
    }

    // -----------------------------------------------------------------
    // Address-space construction
    // -----------------------------------------------------------------

    /// Allocate a fresh page directory.
    ///
    /// The new space clones the current low-identity and kernel-band
    /// directory entries, points its recursive slot at itself, and gets
    /// its own system table whose first two entries alias the directory
    /// and the system table at `LA_DIRECTORY`/`LA_SYSTABLE`.
    pub fn alloc_page_directory(&mut self) -> Result<Physical> {
        let directory = self.frames.alloc_physical_page().ok_or(KernelError::NoMemory)?;
        let system_table = match self.frames.alloc_physical_page() {
            Some(frame) => frame,
            None => {
                self.frames.free_physical_page(directory);
                return Err(KernelError::NoMemory);
            }
        };

        let supervisor =
            PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::FIXED;

        // Entries cloned from the running space: low identity plus the
        // whole kernel band. The recursive slot and system band are
        // recomputed for the new directory.
        let low = self.view.pde(0);
        let mut kernel_band = [PageDirectoryEntry::EMPTY; ENTRIES_PER_TABLE - KERNEL_DIRECTORY_FIRST];
        for (slot, entry) in kernel_band.iter_mut().enumerate() {
            *entry = self.view.pde(KERNEL_DIRECTORY_FIRST + slot);
        }

        let system_band_dir = LA_DIRECTORY.directory_index();
        self.view.with_frame(directory, &mut |table| {
            table.fill(0);
            table[0] = low.raw();
            for (slot, entry) in kernel_band.iter().enumerate() {
                table[KERNEL_DIRECTORY_FIRST + slot] = entry.raw();
            }
            table[system_band_dir] =
                PageDirectoryEntry::new(system_table, supervisor).raw();
            table[RECURSIVE_SLOT] =
                PageDirectoryEntry::new(directory, supervisor).raw();
        });

        let pte_fixed = PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::FIXED;
        self.view.with_frame(system_table, &mut |table| {
            table.fill(0);
            table[0] = PageTableEntry::new(directory, pte_fixed).raw();
            table[1] = PageTableEntry::new(system_table, pte_fixed).raw();
        });

        Ok(directory)
    }
}

/// Manager over the running address space, on the live frame allocator.
#[cfg(target_os = "none")]
pub fn active() -> VirtualMemory<'static, super::page_table::ActiveSpace> {
    VirtualMemory::new(
        super::page_table::ActiveSpace,
        super::frame_allocator::frame_allocator(),
    )
}

bitflags! {
    /// Page-fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultCode: u32 {
        const PROTECTION = 1 << 0;
        const WRITE      = 1 << 1;
        const USER       = 1 << 2;
    }
}

/// Classify a faulting address for the page-fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Fault hit a reserve-sentinel guard entry: candidate for stack
    /// growth.
    GuardPage,
    /// Fault in the user window with no entry at all.
    Unmapped,
    /// Fault outside anything a user task may touch.
    Illegal,
}

impl FaultDisposition {
    pub fn classify<V: TableView>(view: &V, address: Linear) -> Self {
        let region = AddressRegion::of(address);
        if !region.user_accessible() {
            return FaultDisposition::Illegal;
        }
        let pde = view.pde(address.directory_index());
        if !pde.is_empty()
            && view
                .pte(address.directory_index(), address.table_index())
                .is_reserved_guard()
        {
            FaultDisposition::GuardPage
        } else {
            FaultDisposition::Unmapped
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::super::frame_allocator::test_bitmap;
    use super::super::page_table::FakeSpace;
    use super::*;

    fn test_vm() -> VirtualMemory<'static, FakeSpace> {
        extern crate std;
        let frames = std::boxed::Box::leak(std::boxed::Box::new(test_bitmap(64 * 1024 * 1024)));
        VirtualMemory::new(FakeSpace::new(), frames)
    }

    #[test]
    fn commit_alloc_then_free_restores_usage() {
        let mut vm = test_vm();
        let used = vm.frames.used_frames();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                3 * PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .expect("allocation in an empty window succeeds");
        assert!(vm.is_valid_memory(base, 3 * PAGE_SIZE));

        vm.free_region(base, 3 * PAGE_SIZE);
        assert!(!vm.is_valid_memory(base, PAGE_SIZE));
        assert_eq!(
            vm.frames.used_frames(),
            used,
            "all frames including the page table came back"
        );
    }

    #[test]
    fn freed_base_is_reusable_at_the_same_address() {
        let mut vm = test_vm();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                2 * PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .unwrap();
        let first_frame = vm.map_linear_to_physical(base).unwrap();
        vm.free_region(base, 2 * PAGE_SIZE);

        let again = vm
            .alloc_region(
                base,
                Physical::NULL,
                2 * PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .expect("explicit re-allocation of a freed base succeeds");
        assert_eq!(again, base);
        // The frame pool may hand the same frame back, but the old entry
        // itself was gone in between.
        let _ = first_frame;
    }

    #[test]
    fn explicit_base_fails_if_any_page_claimed() {
        let mut vm = test_vm();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .unwrap();
        // Overlapping explicit request must fail, reserve entries included.
        assert!(vm
            .alloc_region(base, Physical::NULL, 2 * PAGE_SIZE, AllocFlags::COMMIT)
            .is_none());
    }

    #[test]
    fn reserve_writes_guard_entries_not_frames() {
        let mut vm = test_vm();
        let used = vm.frames.used_frames();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                2 * PAGE_SIZE,
                AllocFlags::RESERVE | AllocFlags::READ_WRITE,
            )
            .unwrap();
        // One frame for the page table, none for the pages.
        assert_eq!(vm.frames.used_frames(), used + 1);
        assert!(!vm.is_valid_memory(base, PAGE_SIZE));
        assert_eq!(
            FaultDisposition::classify(vm.view(), base),
            FaultDisposition::GuardPage
        );
    }

    #[test]
    fn map_physical_installs_requested_frames_and_frees_none() {
        let mut vm = test_vm();
        let used = vm.frames.used_frames();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical(0x00E0_0000),
                2 * PAGE_SIZE,
                AllocFlags::MAP_PHYSICAL | AllocFlags::READ_WRITE | AllocFlags::UNCACHEABLE,
            )
            .unwrap();
        assert_eq!(vm.map_linear_to_physical(base), Some(Physical(0x00E0_0000)));
        assert_eq!(
            vm.map_linear_to_physical(base.offset(PAGE_SIZE + 0x10)),
            Some(Physical(0x00E0_1010))
        );
        vm.free_region(base, 2 * PAGE_SIZE);
        // Only the page table frame was consumed and returned.
        assert_eq!(vm.frames.used_frames(), used);
    }

    #[test]
    fn at_or_over_searches_upward_from_hint() {
        let mut vm = test_vm();
        let hint = Linear(0x0100_0000);
        let base = vm
            .alloc_region(
                hint,
                Physical::NULL,
                PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE | AllocFlags::AT_OR_OVER,
            )
            .unwrap();
        assert!(base.as_u32() >= hint.as_u32());
    }

    #[test]
    fn exhaustion_unwinds_partial_region() {
        extern crate std;
        let frames = std::boxed::Box::leak(std::boxed::Box::new(test_bitmap(4 * 1024 * 1024)));
        let mut vm = VirtualMemory::new(FakeSpace::new(), frames);
        // 4 MiB of RAM minus the boot reservation cannot back 16 MiB.
        assert!(vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                16 * 1024 * 1024,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .is_none());
        // The unwind returned everything: only boot frames stay used.
        let used = vm.frames.used_frames();
        let baseline = {
            let info = super::super::startup::test_startup_info(4 * 1024 * 1024);
            info.first_allocatable_frame().min(info.page_count)
        };
        assert_eq!(used, baseline);
    }

    #[test]
    fn empty_page_tables_collapse() {
        let mut vm = test_vm();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .unwrap();
        let dir = base.directory_index();
        assert!(!vm.view().pde(dir).is_empty());
        vm.free_region(base, PAGE_SIZE);
        assert!(
            vm.view().pde(dir).is_empty(),
            "a fully cleared table is freed and its directory slot zeroed"
        );
    }

    #[test]
    fn resize_grows_downward_and_shrinks_upward() {
        let mut vm = test_vm();
        let top_anchor = Linear(0x0200_0000);
        let base = vm
            .alloc_region(
                top_anchor,
                Physical::NULL,
                8 * PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .unwrap();

        let grown = vm
            .resize_region(base, 8 * PAGE_SIZE, 12 * PAGE_SIZE, AllocFlags::READ_WRITE)
            .expect("grow succeeds");
        assert_eq!(grown.as_u32(), base.as_u32() - 4 * PAGE_SIZE);
        assert!(vm.is_valid_memory(grown, 4 * PAGE_SIZE));

        let shrunk = vm
            .resize_region(grown, 12 * PAGE_SIZE, 8 * PAGE_SIZE, AllocFlags::READ_WRITE)
            .expect("shrink succeeds");
        assert_eq!(shrunk, base);
        assert!(!vm.is_valid_memory(grown, PAGE_SIZE));
    }

    #[test]
    fn new_directory_recursive_slot_points_to_itself() {
        let mut vm = test_vm();
        let directory = vm.alloc_page_directory().expect("directory allocation");
        vm.view_mut().with_frame(directory, &mut |table| {
            let entry = PageDirectoryEntry::from_raw(table[RECURSIVE_SLOT]);
            assert!(entry.is_present());
            assert_eq!(entry.table(), directory);
            assert!(entry.flags().contains(PdeFlags::FIXED));
        });
    }

    #[test]
    fn new_directory_aliases_itself_in_system_band() {
        let mut vm = test_vm();
        let directory = vm.alloc_page_directory().unwrap();
        let system_dir = LA_DIRECTORY.directory_index();
        let system_table = vm.view_mut().with_frame(directory, &mut |table| {
            PageDirectoryEntry::from_raw(table[system_dir]).table()
        });
        vm.view_mut().with_frame(system_table, &mut |table| {
            assert_eq!(PageTableEntry::from_raw(table[0]).frame(), directory);
            assert_eq!(PageTableEntry::from_raw(table[1]).frame(), system_table);
        });
    }

    #[test]
    fn every_pte_mutation_invalidates_its_page() {
        let mut vm = test_vm();
        let before = vm.view().invalidations.len();
        let base = vm
            .alloc_region(
                Linear::NULL,
                Physical::NULL,
                2 * PAGE_SIZE,
                AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            )
            .unwrap();
        let touched: std::vec::Vec<_> = vm.view().invalidations[before..].to_vec();
        assert!(touched.contains(&base));
        assert!(touched.contains(&base.offset(PAGE_SIZE)));
    }
}
