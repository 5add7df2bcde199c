//! Kernel and per-process heaps.
//!
//! The kernel heap is a committed region in the kernel window feeding the
//! global `linked_list_allocator`. Each user process additionally owns a
//! heap region in its user window; `HeapAlloc`-family syscalls carve it
//! with a first-fit allocator. Every block carries a small header so
//! `HeapFree` and `HeapRealloc` recover the layout from the raw pointer
//! alone.

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

use crate::error::{KernelError, Result};

/// Initial kernel heap commit.
pub const KERNEL_HEAP_SIZE: u32 = 0x0010_0000;

/// Default user-process heap size.
pub const PROCESS_HEAP_SIZE: u32 = 0x0010_0000;

/// Block header magic.
const BLOCK_MAGIC: u32 = 0x4845_4150; // "HEAP"

/// Header placed in front of every heap block.
#[repr(C)]
struct BlockHeader {
    magic: u32,
    size: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();
const BLOCK_ALIGN: usize = 8;

/// A first-fit heap over one contiguous committed region.
///
/// Addresses are `usize` so the code is exact on the 32-bit target and
/// still runs under the host test harness.
pub struct RegionHeap {
    base: usize,
    size: usize,
    inner: Heap,
}

impl RegionHeap {
    /// Build a heap over `[base, base + size)`.
    ///
    /// # Safety
    ///
    /// The range must be committed, writable, exclusive to this heap, and
    /// outlive it.
    pub unsafe fn new(base: usize, size: usize) -> Self {
        let mut inner = Heap::empty();
        // SAFETY: forwarded contract; the range is exclusive and mapped.
        unsafe { inner.init(base as *mut u8, size) };
        Self { base, size, inner }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn layout_for(size: usize) -> Layout {
        // Header + payload, both 8-aligned.
        Layout::from_size_align(HEADER_SIZE + size, BLOCK_ALIGN)
            .expect("heap block layout is always valid")
    }

    /// Allocate `size` bytes, returning the payload address.
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        if size == 0 || size > self.size {
            return Err(KernelError::BadParameter);
        }
        let block = self
            .inner
            .allocate_first_fit(Self::layout_for(size))
            .map_err(|_| KernelError::NoMemory)?;
        let header = block.as_ptr() as *mut BlockHeader;
        // SAFETY: the allocator returned a block large enough for the
        // header plus payload, inside our exclusive region.
        unsafe {
            (*header).magic = BLOCK_MAGIC;
            (*header).size = size as u32;
        }
        Ok(block.as_ptr() as usize + HEADER_SIZE)
    }

    /// Validate a payload pointer and read its block size.
    fn block_of(&self, address: usize) -> Result<(NonNull<u8>, usize)> {
        if address < self.base + HEADER_SIZE || address >= self.base + self.size {
            return Err(KernelError::BadParameter);
        }
        let header_ptr = (address - HEADER_SIZE) as *mut BlockHeader;
        // SAFETY: the bounds check above keeps the header inside the
        // committed region; a stale or forged pointer fails the magic test.
        let (magic, size) = unsafe { ((*header_ptr).magic, (*header_ptr).size) };
        if magic != BLOCK_MAGIC || size == 0 || size as usize > self.size {
            return Err(KernelError::BadParameter);
        }
        Ok((
            NonNull::new(header_ptr as *mut u8).ok_or(KernelError::BadParameter)?,
            size as usize,
        ))
    }

    /// Free a block previously returned by [`alloc`](Self::alloc).
    pub fn free(&mut self, address: usize) -> Result<()> {
        let (block, size) = self.block_of(address)?;
        // SAFETY: block_of verified the header; the block came from this
        // heap with this layout.
        unsafe {
            (block.as_ptr() as *mut BlockHeader).write(BlockHeader { magic: 0, size: 0 });
            self.inner.deallocate(block, Self::layout_for(size));
        }
        Ok(())
    }

    /// Resize a block, moving it if needed. Returns the (possibly new)
    /// payload address.
    pub fn realloc(&mut self, address: usize, new_size: usize) -> Result<usize> {
        if address == 0 {
            return self.alloc(new_size);
        }
        let (_, old_size) = self.block_of(address)?;
        if new_size == 0 {
            self.free(address)?;
            return Ok(0);
        }
        if new_size <= old_size {
            return Ok(address);
        }
        let fresh = self.alloc(new_size)?;
        // SAFETY: both blocks are live, disjoint, and at least old_size
        // bytes long.
        unsafe {
            core::ptr::copy_nonoverlapping(address as *const u8, fresh as *mut u8, old_size);
        }
        self.free(address)?;
        Ok(fresh)
    }

    /// Bytes still available.
    pub fn free_bytes(&self) -> usize {
        self.inner.free()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn test_heap(size: usize) -> RegionHeap {
        let storage = std::vec![0u8; size].leak();
        // SAFETY: the leaked buffer is exclusive and 'static.
        unsafe { RegionHeap::new(storage.as_mut_ptr() as usize, size) }
    }

    #[test]
    fn alloc_free_round_trip() {
        let mut heap = test_heap(64 * 1024);
        let free_before = heap.free_bytes();
        let a = heap.alloc(100).expect("small allocation succeeds");
        let b = heap.alloc(200).expect("second allocation succeeds");
        assert_ne!(a, b);
        heap.free(a).unwrap();
        heap.free(b).unwrap();
        assert_eq!(heap.free_bytes(), free_before);
    }

    #[test]
    fn free_rejects_garbage_pointers() {
        let mut heap = test_heap(16 * 1024);
        let block = heap.alloc(64).unwrap();
        assert_eq!(heap.free(block + 4), Err(KernelError::BadParameter));
        assert_eq!(heap.free(0), Err(KernelError::BadParameter));
        heap.free(block).unwrap();
        // Double free fails the magic check instead of corrupting.
        assert_eq!(heap.free(block), Err(KernelError::BadParameter));
    }

    #[test]
    fn realloc_preserves_contents() {
        let mut heap = test_heap(64 * 1024);
        let block = heap.alloc(16).unwrap();
        // SAFETY: test heap memory, block is 16 bytes.
        unsafe {
            (block as *mut u8).copy_from(b"exos heap block!".as_ptr(), 16);
        }
        let grown = heap.realloc(block, 4096).unwrap();
        let contents = unsafe { core::slice::from_raw_parts(grown as *const u8, 16) };
        assert_eq!(contents, b"exos heap block!");
        heap.free(grown).unwrap();
    }

    #[test]
    fn exhaustion_reports_no_memory() {
        let mut heap = test_heap(8 * 1024);
        assert_eq!(heap.alloc(64 * 1024), Err(KernelError::BadParameter));
        let mut blocks = std::vec::Vec::new();
        loop {
            match heap.alloc(1024) {
                Ok(b) => blocks.push(b),
                Err(e) => {
                    assert_eq!(e, KernelError::NoMemory);
                    break;
                }
            }
        }
        for b in blocks {
            heap.free(b).unwrap();
        }
    }
}
