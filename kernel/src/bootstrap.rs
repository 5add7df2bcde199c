//! Kernel bring-up.
//!
//! Strict order: serial and logging first (no allocation), descriptor
//! tables and interrupt plumbing, physical memory, the recursive paging
//! window, the kernel heap, and only then the object registries, the
//! boot process and task, drivers, filesystems, and the shell.

#![cfg(target_os = "none")]

use crate::arch::i386::{self, gdt, idt, pic, pit};
use crate::mm::layout::RECURSIVE_SLOT;
use crate::mm::page_table::{PageDirectoryEntry, PdeFlags};
use crate::mm::startup::KernelStartupInfo;
use crate::mm::vmm::AllocFlags;
use crate::mm::{frame_allocator, Linear, Physical};

/// Kernel heap region size committed during boot.
const BOOT_HEAP_SIZE: u32 = crate::mm::heap::KERNEL_HEAP_SIZE;

/// Sectors of the boot RAM disk.
const RAMDISK_SECTORS: u64 = 2048;

/// Install the recursive slot into the loader's page directory so the
/// self-map window works before the kernel builds its own directory.
///
/// # Safety
///
/// Must run exactly once, while the loader's identity mapping of low
/// memory is still live.
unsafe fn bootstrap_recursive_slot(info: &KernelStartupInfo) {
    let directory = info.page_directory as *mut u32;
    let entry = PageDirectoryEntry::new(
        Physical(info.page_directory),
        PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::FIXED,
    );
    // SAFETY: the loader's directory is identity-mapped per the handoff
    // contract; slot 1023 is unused by the loader.
    unsafe {
        directory.add(RECURSIVE_SLOT).write_volatile(entry.raw());
    }
    i386::tlb::reload_cr3();
}

/// Commit the kernel heap region and hand it to the global allocator.
fn init_kernel_heap() {
    let mut vm = crate::mm::vmm::active();
    let base = vm
        .alloc_region(
            Linear::NULL,
            Physical::NULL,
            BOOT_HEAP_SIZE,
            AllocFlags::COMMIT | AllocFlags::READ_WRITE | AllocFlags::KERNEL,
        )
        .expect("kernel heap region");
    // SAFETY: the region was just committed, is supervisor-only, and is
    // handed to the allocator exactly once.
    unsafe {
        crate::ALLOCATOR
            .lock()
            .init(base.as_u32() as *mut u8, BOOT_HEAP_SIZE as usize);
    }
    log::info!(
        "kernel heap: {} KiB at {:#010x}",
        BOOT_HEAP_SIZE >> 10,
        base.as_u32()
    );
}

/// Full bring-up; never returns. The boot flow ends as the idle task.
pub fn kernel_main() -> ! {
    crate::serial::SERIAL.lock().init();
    crate::log_service::init();
    log::info!("EXOS kernel starting");

    // SAFETY: called once, straight from the entry stub, with the
    // loader's mappings still in place.
    let info = unsafe { KernelStartupInfo::from_loader() };
    log::info!(
        "memory {} MiB, kernel image {:#010x}+{:#x}",
        info.memory_size >> 20,
        info.kernel_physical_base,
        info.kernel_size
    );

    i386::disable_interrupts();
    gdt::init();
    idt::init();
    pic::init(info.irq_mask_21_rm as u8, info.irq_mask_a1_rm as u8);
    pit::init();

    // Physical and virtual memory.
    // SAFETY: single-threaded boot; the bitmap span is part of the boot
    // reservation.
    unsafe { frame_allocator::init(&info) };
    // SAFETY: single-threaded boot, loader mappings live.
    unsafe { bootstrap_recursive_slot(&info) };
    init_kernel_heap();

    // From here allocation works: registries, processes, tasks.
    let kernel_process = crate::process::kernel_process();
    let idle_task = crate::sched::scheduler::adopt_boot_task(kernel_process, "idle");

    {
        let mut console = crate::drivers::console::CONSOLE.lock();
        console.restore_cursor(
            info.console_cursor_x as usize,
            info.console_cursor_y as usize,
        );
    }
    crate::drivers::keyboard::init();

    // Storage: the boot RAM disk, then volume discovery.
    let ramdisk = alloc_boot_ramdisk();
    crate::drivers::storage::register_disk(ramdisk);
    crate::fs::initialize_filesystems();

    crate::security::init("exos");

    // The shell runs as a kernel task beside the idle loop.
    let shell_task = crate::sched::task::create_task(crate::sched::task::TaskInfo {
        name: alloc::string::String::from("shell"),
        process: kernel_process,
        privilege: crate::process::Privilege::Kernel,
        priority: crate::sched::Priority::Medium,
        entry: crate::shell::shell_task as usize as u32,
        parameter: 0,
        user_stack: None,
    })
    .expect("shell task");

    crate::kernel::install(crate::kernel::Kernel {
        startup: info,
        kernel_process,
        idle_task,
        shell_task: Some(shell_task),
    });

    log::info!(
        "bring-up complete, {} KiB physical in use",
        frame_allocator::physical_memory_used() >> 10
    );
    i386::enable_interrupts();

    // Idle: halt until the timer hands the CPU around.
    loop {
        i386::halt();
    }
}

extern crate alloc;

/// Build the native boot volume: a RAM disk stamped with the native
/// superblock signature so the mount scan binds the in-memory driver.
fn alloc_boot_ramdisk() -> alloc::sync::Arc<crate::drivers::ramdisk::RamDisk> {
    let mut header = [0u8; 512];
    header[..4].copy_from_slice(crate::fs::partition::magic::EXFS);
    alloc::sync::Arc::new(crate::drivers::ramdisk::RamDisk::with_image(
        512,
        RAMDISK_SECTORS,
        &header,
    ))
}
