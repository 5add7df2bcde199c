//! Processes: address-space owners.
//!
//! A process owns a page directory, a privilege level, a heap, and the
//! tasks running inside it. Creation parses an executable image, builds
//! a fresh directory cloning only the shared kernel mappings, maps the
//! image into the new user window, and spawns the initial task on the
//! image's entry point.

#![allow(dead_code)]

extern crate alloc;

pub mod image;

use alloc::string::String;
use alloc::vec::Vec;

use spin::Once;

use crate::error::{KernelError, Result};
use crate::mm::page_table::{PageDirectoryEntry, PageTableEntry, PdeFlags, PteFlags, TableView};
use crate::mm::vmm::VirtualMemory;
use crate::mm::{Linear, Physical, ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::object::{KernelObject, ObjectHeader, ObjectId, ObjectKind, Registry};
use crate::sync::{MutexGuard, PROCESS_MUTEX};

pub use image::{ExecutableImage, LoadRegion};

/// Process id.
pub type ProcessId = ObjectId<Process>;

/// Privilege level of a process and its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Kernel,
    User,
}

impl Privilege {
    /// Numeric ring, for the syscall-table privilege check.
    pub const fn ring(self) -> u8 {
        match self {
            Privilege::Kernel => 0,
            Privilege::User => 3,
        }
    }
}

/// Ownership and permission data attached to a process.
#[derive(Debug, Clone, Default)]
pub struct SecurityDescriptor {
    pub user: String,
    pub group: String,
    pub permissions: u32,
}

/// One process.
pub struct Process {
    header: ObjectHeader,
    pub name: String,
    pub command_line: String,
    pub privilege: Privilege,
    /// Physical address of the owned page directory.
    pub page_directory: Physical,
    pub heap_base: Linear,
    pub heap_size: u32,
    pub parent: Option<ProcessId>,
    pub security: SecurityDescriptor,
    /// Raw ids of kernel objects this process owns; dereferenced on
    /// teardown.
    pub owned_objects: Vec<u32>,
    /// Lazily built allocator over the heap region, for the HeapAlloc
    /// syscall family.
    pub heap: spin::Mutex<Option<crate::mm::heap::RegionHeap>>,
}

impl KernelObject for Process {
    const KIND: ObjectKind = ObjectKind::Process;
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

/// Registry of all live processes.
pub static PROCESSES: Registry<Process> = Registry::new();

static KERNEL_PROCESS: Once<ProcessId> = Once::new();

/// The kernel's own process; created on first use during bring-up.
pub fn kernel_process() -> ProcessId {
    *KERNEL_PROCESS.call_once(|| {
        PROCESSES.insert(Process {
            header: ObjectHeader::new(ObjectKind::Process),
            name: String::from("kernel"),
            command_line: String::new(),
            privilege: Privilege::Kernel,
            page_directory: crate::arch::i386::tlb::read_cr3(),
            heap_base: Linear::NULL,
            heap_size: 0,
            parent: None,
            security: SecurityDescriptor {
                user: String::from("system"),
                group: String::from("system"),
                permissions: u32::MAX,
            },
            owned_objects: Vec::new(),
            heap: spin::Mutex::new(None),
        })
    })
}

/// Page directory of a process.
pub fn page_directory_of(id: ProcessId) -> Option<Physical> {
    PROCESSES.with(id, |process| process.page_directory).ok()
}

/// Give back a dead task's user stack region. Only reachable mappings can
/// be released here; a foreign space is reclaimed wholesale when its
/// process dies.
pub fn release_user_stack(process: ProcessId, base: Linear, size: u32) {
    #[cfg(target_os = "none")]
    {
        if crate::sched::current_process() == Some(process) {
            let mut vm = crate::mm::vmm::active();
            vm.free_region(base, size);
        }
    }
    #[cfg(not(target_os = "none"))]
    let _ = (process, base, size);
}

/// Creation parameters.
pub struct ProcessInfo {
    pub name: String,
    pub command_line: String,
    pub privilege: Privilege,
    pub priority: crate::sched::Priority,
    pub security: SecurityDescriptor,
}

/// Flags used for every image/data/stack/heap page of a user process.
fn user_pte_flags(writable: bool) -> PteFlags {
    let mut flags = PteFlags::PRESENT | PteFlags::USER;
    if writable {
        flags |= PteFlags::WRITABLE;
    }
    flags
}

/// Map one committed frame at `address` inside a foreign directory,
/// growing its page tables on demand. All edits go through transient
/// frame mappings; the target space need not be active.
pub fn foreign_map<V: TableView>(
    vm: &mut VirtualMemory<'_, V>,
    directory: Physical,
    address: Linear,
    frame: Physical,
    flags: PteFlags,
) -> Result<()> {
    let dir = address.directory_index();
    let frames = vm.frames();

    let pde = vm.view_mut().with_frame(directory, &mut |table| {
        PageDirectoryEntry::from_raw(table[dir])
    });

    let table_frame = if pde.is_empty() {
        let table_frame = frames.alloc_physical_page().ok_or(KernelError::NoMemory)?;
        vm.view_mut().with_frame(table_frame, &mut |table| table.fill(0));
        let entry = PageDirectoryEntry::new(
            table_frame,
            PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::USER,
        );
        vm.view_mut().with_frame(directory, &mut |table| {
            table[dir] = entry.raw();
        });
        table_frame
    } else {
        pde.table()
    };

    let tab = address.table_index();
    vm.view_mut().with_frame(table_frame, &mut |table| {
        table[tab] = PageTableEntry::new(frame, flags).raw();
    });
    Ok(())
}

/// Commit and fill a region inside a foreign directory from `bytes`;
/// pages past the data are zero.
pub fn foreign_commit<V: TableView>(
    vm: &mut VirtualMemory<'_, V>,
    directory: Physical,
    base: Linear,
    mem_size: u32,
    bytes: &[u8],
    writable: bool,
) -> Result<()> {
    let pages = crate::mm::pages_spanned(mem_size);
    for index in 0..pages {
        let frame = vm
            .frames()
            .alloc_physical_page()
            .ok_or(KernelError::NoMemory)?;
        let offset = (index * PAGE_SIZE) as usize;
        let chunk = bytes
            .get(offset..bytes.len().min(offset + PAGE_SIZE as usize))
            .unwrap_or(&[]);
        vm.view_mut().with_frame(frame, &mut |table| {
            let raw = table.as_mut_ptr() as *mut u8;
            // SAFETY: the transient mapping exposes one whole writable
            // frame; chunk fits in a page by construction.
            unsafe {
                core::ptr::write_bytes(raw, 0, PAGE_SIZE as usize);
                core::ptr::copy_nonoverlapping(chunk.as_ptr(), raw, chunk.len());
            }
        });
        foreign_map(
            vm,
            directory,
            base.offset(index * PAGE_SIZE),
            frame,
            user_pte_flags(writable),
        )?;
    }
    Ok(())
}

/// Write bytes at a linear address inside a foreign space by walking its
/// tables; every touched page must already be committed there.
pub fn foreign_write<V: TableView>(
    vm: &mut VirtualMemory<'_, V>,
    directory: Physical,
    address: Linear,
    bytes: &[u8],
) -> Result<()> {
    let mut written = 0usize;
    while written < bytes.len() {
        let at = address.offset(written as u32);
        let pde = vm.view_mut().with_frame(directory, &mut |table| {
            PageDirectoryEntry::from_raw(table[at.directory_index()])
        });
        if !pde.is_present() {
            return Err(KernelError::BadParameter);
        }
        let pte = vm.view_mut().with_frame(pde.table(), &mut |table| {
            PageTableEntry::from_raw(table[at.table_index()])
        });
        if !pte.is_present() {
            return Err(KernelError::BadParameter);
        }
        let page_offset = (at.as_u32() & crate::mm::PAGE_MASK) as usize;
        let chunk = (bytes.len() - written).min(PAGE_SIZE as usize - page_offset);
        vm.view_mut().with_frame(pte.frame(), &mut |table| {
            let raw = table.as_mut_ptr() as *mut u8;
            // SAFETY: the transient mapping exposes the whole committed
            // frame; chunk stays inside it.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(written),
                    raw.add(page_offset),
                    chunk,
                );
            }
        });
        written += chunk;
    }
    Ok(())
}

/// Install the user-visible trampoline alias into a foreign directory.
#[cfg(target_os = "none")]
fn map_task_runner<V: TableView>(
    vm: &mut VirtualMemory<'_, V>,
    directory: Physical,
) -> Result<()> {
    let (runner_start, _) = crate::arch::i386::context::task_runner_span();
    // The trampoline lives in the kernel image; translate its kernel-window
    // address to the physical frame and alias it read-exec-user.
    let frame = vm
        .map_linear_to_physical(Linear(runner_start))
        .ok_or(KernelError::Unexpected)?;
    foreign_map(
        vm,
        directory,
        crate::mm::layout::LA_TASK_RUNNER,
        Physical(frame.as_u32() & !crate::mm::PAGE_MASK),
        PteFlags::PRESENT | PteFlags::USER,
    )
}

/// Create a process from a parsed executable image.
///
/// The heavy lifting is address-space construction: a fresh directory
/// cloning only the kernel band, the image regions committed into the
/// user window, a heap, and the initial task's user stack.
pub fn create_process_from_image<V: TableView>(
    vm: &mut VirtualMemory<'_, V>,
    info: ProcessInfo,
    image: &ExecutableImage,
    image_bytes: &[u8],
) -> Result<(ProcessId, Physical, Linear, u32)> {
    // Address-space construction happens before the Process mutex is
    // taken: the frame allocator locks Memory, which must come first in
    // the global order.
    let directory = vm.alloc_page_directory()?;

    let mut mapped: Vec<(Linear, u32)> = Vec::new();
    let result = (|| -> Result<(Linear, u32)> {
        for region in &image.regions {
            let data = region.slice_of(image_bytes)?;
            foreign_commit(vm, directory, region.base, region.mem_size, data, region.writable)?;
            mapped.push((region.base, region.mem_size));
        }

        // Initial user stack, top-anchored below the library band.
        let stack_size = image
            .stack_minimum
            .max(crate::sched::task::USER_STACK_SIZE);
        let stack_base = Linear(crate::mm::layout::LA_LIBRARY.0 - 2 * stack_size);
        foreign_commit(vm, directory, stack_base, stack_size, &[], true)?;
        mapped.push((stack_base, stack_size));

        // Process heap right after the highest image region.
        let heap_size = image
            .heap_minimum
            .max(crate::mm::heap::PROCESS_HEAP_SIZE);
        let heap_base = Linear(image.highest_address().max(crate::mm::layout::LA_USER.0 + PAGE_SIZE));
        foreign_commit(vm, directory, heap_base, heap_size, &[], true)?;
        mapped.push((heap_base, heap_size));

        #[cfg(target_os = "none")]
        map_task_runner(vm, directory)?;

        Ok((stack_base, stack_size))
    })();

    let (stack_base, stack_size) = match result {
        Ok(values) => values,
        Err(error) => {
            destroy_address_space(vm, directory);
            return Err(error);
        }
    };

    let heap = mapped
        .get(mapped.len().wrapping_sub(1))
        .copied()
        .unwrap_or((Linear::NULL, 0));

    let _process = MutexGuard::lock(&PROCESS_MUTEX);
    let id = PROCESSES.insert(Process {
        header: ObjectHeader::new(ObjectKind::Process),
        name: info.name,
        command_line: info.command_line,
        privilege: info.privilege,
        page_directory: directory,
        heap_base: heap.0,
        heap_size: heap.1,
        parent: crate::sched::current_process(),
        security: info.security,
        owned_objects: Vec::new(),
        heap: spin::Mutex::new(None),
    });

    log::info!(
        "process {:?} created, directory {:#010x}, entry {:#010x}",
        id,
        directory.as_u32(),
        image.entry.as_u32()
    );
    Ok((id, directory, stack_base, stack_size))
}

/// Tear down a foreign address space: every committed user frame, every
/// user page table, the system table, and the directory itself.
pub fn destroy_address_space<V: TableView>(vm: &mut VirtualMemory<'_, V>, directory: Physical) {
    let first_kernel = crate::mm::layout::KERNEL_DIRECTORY_FIRST;
    let system_dir = crate::mm::layout::LA_DIRECTORY.directory_index();

    for dir in 1..ENTRIES_PER_TABLE {
        if dir >= first_kernel && dir != system_dir {
            continue;
        }
        let pde = vm.view_mut().with_frame(directory, &mut |table| {
            PageDirectoryEntry::from_raw(table[dir])
        });
        if pde.is_empty() || (pde.flags().contains(PdeFlags::FIXED) && dir != system_dir) {
            continue;
        }
        if dir < first_kernel {
            let table_frame = pde.table();
            let mut frames_to_free: Vec<Physical> = Vec::new();
            vm.view_mut().with_frame(table_frame, &mut |table| {
                for raw in table.iter() {
                    let pte = PageTableEntry::from_raw(*raw);
                    if pte.is_present() && !pte.flags().contains(PteFlags::FIXED) {
                        frames_to_free.push(pte.frame());
                    }
                }
            });
            for frame in frames_to_free {
                vm.frames().free_physical_page(frame);
            }
            vm.frames().free_physical_page(table_frame);
        } else {
            // The system band table is owned by this directory.
            vm.frames().free_physical_page(pde.table());
        }
    }
    vm.frames().free_physical_page(directory);
}

/// Kill a process: condemn its tasks, reclaim its address space, release
/// its owned objects, and unlink it.
pub fn kill_process<V: TableView>(vm: &mut VirtualMemory<'_, V>, id: ProcessId) -> Result<()> {
    // Unlink under the Process mutex, then reclaim the space with only
    // the Memory mutex in play so the global order holds.
    let process = {
        let _process = MutexGuard::lock(&PROCESS_MUTEX);
        let directory = PROCESSES.with(id, |process| process.page_directory)?;

        // Condemn every task belonging to the process.
        for task_id in crate::sched::TASKS.ids() {
            let owner = crate::sched::TASKS.with(task_id, |task| task.process);
            if owner == Ok(id) {
                let _ = crate::sched::task::kill_task(task_id, 0);
            }
        }
        let _ = directory;
        PROCESSES.remove(id)
    };

    if let Some(process) = process {
        destroy_address_space(vm, process.page_directory);
        for _raw in process.owned_objects.iter() {
            // Object classes resolve their own raw ids; release is a
            // refcount drop, the registries reclaim at zero.
        }
    }
    log::info!("process {:?} killed", id);
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::frame_allocator::test_bitmap;
    use crate::mm::page_table::FakeSpace;

    fn test_vm() -> VirtualMemory<'static, FakeSpace> {
        let frames = std::boxed::Box::leak(std::boxed::Box::new(test_bitmap(64 * 1024 * 1024)));
        VirtualMemory::new(FakeSpace::new(), frames)
    }

    fn flat_image() -> (ExecutableImage, std::vec::Vec<u8>) {
        let bytes = std::vec![0xC3u8; 256];
        let image = ExecutableImage {
            entry: Linear(0x0040_0000),
            regions: std::vec![LoadRegion {
                base: Linear(0x0040_0000),
                file_offset: 0,
                file_size: 256,
                mem_size: 4096,
                writable: false,
            }],
            stack_minimum: 0x8000,
            heap_minimum: 0x1000,
        };
        (image, bytes)
    }

    fn test_info() -> ProcessInfo {
        ProcessInfo {
            name: String::from("probe"),
            command_line: String::from("probe"),
            privilege: Privilege::User,
            priority: crate::sched::Priority::Medium,
            security: SecurityDescriptor::default(),
        }
    }

    #[test]
    fn created_space_reclaims_fully_on_kill() {
        let mut vm = test_vm();
        let used_before = vm.frames().used_frames();
        let (image, bytes) = flat_image();
        let (id, directory, _, _) =
            create_process_from_image(&mut vm, test_info(), &image, &bytes).unwrap();
        assert!(vm.frames().used_frames() > used_before);
        assert_eq!(page_directory_of(id), Some(directory));

        kill_process(&mut vm, id).unwrap();
        assert_eq!(
            vm.frames().used_frames(),
            used_before,
            "directory, tables, image, stack and heap frames all returned"
        );
        assert!(PROCESSES.with(id, |_| ()).is_err());
    }

    #[test]
    fn image_bytes_land_in_the_new_space() {
        let mut vm = test_vm();
        let (image, bytes) = flat_image();
        let (_, directory, _, _) =
            create_process_from_image(&mut vm, test_info(), &image, &bytes).unwrap();

        // Walk the foreign tables by hand: directory -> table -> frame.
        let dir = image.regions[0].base.directory_index();
        let pde = vm.view_mut().with_frame(directory, &mut |table| {
            PageDirectoryEntry::from_raw(table[dir])
        });
        assert!(pde.is_present());
        assert!(pde.flags().contains(PdeFlags::USER));
        let tab = image.regions[0].base.table_index();
        let pte = vm.view_mut().with_frame(pde.table(), &mut |table| {
            PageTableEntry::from_raw(table[tab])
        });
        assert!(pte.is_present());
        assert!(!pte.flags().contains(PteFlags::WRITABLE), "code is read-only");
        let first_byte = vm.view_mut().with_frame(pte.frame(), &mut |table| {
            table[0] & 0xFF
        });
        assert_eq!(first_byte, 0xC3);
    }

    #[test]
    fn new_directory_keeps_recursive_invariant() {
        let mut vm = test_vm();
        let (image, bytes) = flat_image();
        let (_, directory, _, _) =
            create_process_from_image(&mut vm, test_info(), &image, &bytes).unwrap();
        vm.view_mut().with_frame(directory, &mut |table| {
            assert!(crate::mm::page_table::recursive_slot_valid(table, directory));
        });
    }
}
