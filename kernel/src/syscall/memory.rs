//! Memory syscalls: region allocation and the process heap.

use super::base::status_return;
use super::{read_user, set_last_error, SYSCALL_FAILED};
use crate::error::KernelError;

/// Argument block for `AllocRegion`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct AllocRegionArgs {
    /// Base hint; zero lets the kernel choose.
    pub base: u32,
    /// Physical target for MAP_PHYSICAL requests.
    pub target: u32,
    pub size: u32,
    /// [`AllocFlags`](crate::mm::vmm::AllocFlags) bits.
    pub flags: u32,
}

/// Argument block for `FreeRegion`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FreeRegionArgs {
    pub base: u32,
    pub size: u32,
}

/// Argument block for `HeapRealloc`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct HeapReallocArgs {
    pub address: u32,
    pub new_size: u32,
}

pub fn sys_alloc_region(parameter: u32) -> u32 {
    #[cfg(target_os = "none")]
    {
        use crate::mm::vmm::AllocFlags;
        let args = match read_user::<AllocRegionArgs>(parameter) {
            Ok(args) => args,
            Err(error) => {
                set_last_error(error.code());
                return SYSCALL_FAILED;
            }
        };
        // Callers never get supervisor mappings through this gate.
        let flags = AllocFlags::from_bits_truncate(args.flags) & !AllocFlags::KERNEL;
        let mut vm = crate::mm::vmm::active();
        match vm.alloc_region(
            crate::mm::Linear(args.base),
            crate::mm::Physical(args.target),
            args.size,
            flags,
        ) {
            Some(base) => base.as_u32(),
            None => {
                set_last_error(KernelError::NoMemory.code());
                0
            }
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = parameter;
        set_last_error(KernelError::NotImplemented.code());
        0
    }
}

pub fn sys_free_region(parameter: u32) -> u32 {
    #[cfg(target_os = "none")]
    {
        let args = match read_user::<FreeRegionArgs>(parameter) {
            Ok(args) => args,
            Err(error) => {
                set_last_error(error.code());
                return SYSCALL_FAILED;
            }
        };
        if !crate::mm::layout::AddressRegion::of(crate::mm::Linear(args.base)).user_accessible() {
            set_last_error(KernelError::NoPermission.code());
            return SYSCALL_FAILED;
        }
        let mut vm = crate::mm::vmm::active();
        vm.free_region(crate::mm::Linear(args.base), args.size);
        0
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = parameter;
        set_last_error(KernelError::NotImplemented.code());
        SYSCALL_FAILED
    }
}

pub fn sys_is_memory_valid(parameter: u32) -> u32 {
    u32::from(super::caller_range_valid(parameter, 1))
}

pub fn sys_get_process_heap(_parameter: u32) -> u32 {
    crate::sched::current_process()
        .and_then(|id| {
            crate::process::PROCESSES
                .with(id, |process| process.heap_base.as_u32())
                .ok()
        })
        .unwrap_or(0)
}

/// Run `f` on the calling process's heap, building it on first use.
fn with_current_heap<R>(
    f: impl FnOnce(&mut crate::mm::heap::RegionHeap) -> crate::error::Result<R>,
) -> crate::error::Result<R> {
    let id = crate::sched::current_process().ok_or(KernelError::Unexpected)?;
    crate::process::PROCESSES.with(id, |process| {
        let mut heap = process.heap.lock();
        if heap.is_none() {
            if process.heap_base.is_null() || process.heap_size == 0 {
                return Err(KernelError::NoMemory);
            }
            // SAFETY: the heap region was committed at process creation
            // and belongs exclusively to this process.
            *heap = Some(unsafe {
                crate::mm::heap::RegionHeap::new(
                    process.heap_base.as_u32() as usize,
                    process.heap_size as usize,
                )
            });
        }
        f(heap.as_mut().expect("heap just initialized"))
    })?
}

pub fn sys_heap_alloc(parameter: u32) -> u32 {
    match with_current_heap(|heap| heap.alloc(parameter as usize)) {
        Ok(address) => address as u32,
        Err(error) => {
            set_last_error(error.code());
            0
        }
    }
}

pub fn sys_heap_free(parameter: u32) -> u32 {
    status_return(with_current_heap(|heap| heap.free(parameter as usize)))
}

pub fn sys_heap_realloc(parameter: u32) -> u32 {
    match read_user::<HeapReallocArgs>(parameter).and_then(|args| {
        with_current_heap(|heap| heap.realloc(args.address as usize, args.new_size as usize))
    }) {
        Ok(address) => address as u32,
        Err(error) => {
            set_last_error(error.code());
            0
        }
    }
}
