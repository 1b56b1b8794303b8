//! Fixed-size-block pool (freelist) allocator.
//!
//! A `SlabRegistry`/`SlabPage`-style free-list pattern, narrowed to a
//! single size class per instance: construction takes `(block_size,
//! block_count)` rather than a size-class table.

use std::ptr::NonNull;

use crate::alloc::{Allocator, AllocatorStats, StatsSnapshot};
use crate::error::{ErrorKind, ScriptResult};
use crate::sync::mutex::Mutex;
use crate::util::layout::align_up;

struct Inner {
    buffer: NonNull<u8>,
    /// Head of the intrusive freelist, or null if exhausted.
    free_head: *mut u8,
    available: usize,
}

unsafe impl Send for Inner {}

/// A fixed-size-block allocator with O(1) allocate/free.
pub struct PoolAllocator {
    inner: Mutex<Inner>,
    block_size: usize,
    block_count: usize,
    stats: AllocatorStats,
}

impl PoolAllocator {
    /// Create a pool of `block_count` blocks, each at least `block_size`
    /// bytes, raised to `max(block_size, size_of::<usize>())` and rounded up
    /// to pointer alignment.
    pub fn new(block_size: usize, block_count: usize) -> ScriptResult<Self> {
        if block_count == 0 {
            return crate::error::make_error(
                ErrorKind::InvalidArguments,
                "block_count must be nonzero",
                "PoolAllocator::new",
                None,
            );
        }
        let ptr_size = std::mem::size_of::<usize>();
        let ptr_align = std::mem::align_of::<usize>();
        let actual_block_size = align_up(block_size.max(ptr_size), ptr_align);

        let capacity = actual_block_size
            .checked_mul(block_count)
            .ok_or(())
            .map_err(|_| {
                crate::error::ErrorInfo::new(
                    ErrorKind::InvalidArguments,
                    "block_size * block_count overflows",
                    "PoolAllocator::new",
                    None,
                )
            })?;

        let layout = std::alloc::Layout::from_size_align(capacity, ptr_align)
            .map_err(|e| crate::error::ErrorInfo::new(
                ErrorKind::InvalidArguments,
                format!("invalid pool layout: {e}"),
                "PoolAllocator::new",
                None,
            ))?;
        let base = unsafe { std::alloc::alloc(layout) };
        let buffer = NonNull::new(base).ok_or_else(|| {
            crate::error::ErrorInfo::new(
                ErrorKind::ResourceExhausted,
                "failed to allocate pool buffer",
                "PoolAllocator::new",
                None,
            )
        })?;

        // Thread every block into the freelist, last block first, so the
        // freelist yields blocks in ascending address order.
        unsafe {
            let mut prev: *mut u8 = std::ptr::null_mut();
            for i in (0..block_count).rev() {
                let block = buffer.as_ptr().add(i * actual_block_size);
                (block as *mut *mut u8).write(prev);
                prev = block;
            }
            Ok(Self {
                inner: Mutex::new(Inner {
                    buffer,
                    free_head: prev,
                    available: block_count,
                }),
                block_size: actual_block_size,
                block_count,
                stats: AllocatorStats::default(),
            })
        }
    }

    /// The (possibly raised/rounded) block size in use.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks this pool was constructed with.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of blocks currently allocated out.
    pub fn allocated_blocks(&self) -> usize {
        self.block_count - self.inner.lock().available
    }

    /// Number of blocks currently free.
    pub fn available_blocks(&self) -> usize {
        self.inner.lock().available
    }

    fn capacity_bytes(&self) -> usize {
        self.block_size * self.block_count
    }

    fn in_range(&self, inner: &Inner, addr: usize) -> bool {
        let base = inner.buffer.as_ptr() as usize;
        addr >= base && addr < base + self.capacity_bytes()
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        let layout = std::alloc::Layout::from_size_align(
            self.capacity_bytes(),
            std::mem::align_of::<usize>(),
        )
        .expect("capacity was validated in new()");
        unsafe {
            std::alloc::dealloc(inner.buffer.as_ptr(), layout);
        }
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&self, size: usize, _align: usize) -> ScriptResult<NonNull<u8>> {
        if size > self.block_size {
            return crate::error::make_error(
                ErrorKind::InvalidArguments,
                format!("requested size {size} exceeds block size {}", self.block_size),
                "PoolAllocator::allocate",
                None,
            );
        }
        let mut inner = self.inner.lock();
        if inner.free_head.is_null() {
            return crate::error::make_error(
                ErrorKind::ResourceExhausted,
                "pool exhausted",
                "PoolAllocator::allocate",
                None,
            );
        }
        let block = inner.free_head;
        let next = unsafe { (block as *mut *mut u8).read() };
        inner.free_head = next;
        inner.available -= 1;
        drop(inner);
        self.stats.record_alloc(self.block_size);
        Ok(NonNull::new(block).expect("freelist never stores null blocks"))
    }

    fn deallocate(&self, ptr: NonNull<u8>, _size: usize) -> ScriptResult<()> {
        let mut inner = self.inner.lock();
        let addr = ptr.as_ptr() as usize;
        if !self.in_range(&inner, addr) {
            #[cfg(feature = "log")]
            log::warn!("PoolAllocator::deallocate: pointer {addr:#x} is out of range; ignoring");
            return crate::error::make_error(
                ErrorKind::InvalidArguments,
                format!("pointer {addr:#x} is out of range for this pool"),
                "PoolAllocator::deallocate",
                None,
            );
        }
        unsafe {
            (ptr.as_ptr() as *mut *mut u8).write(inner.free_head);
        }
        inner.free_head = ptr.as_ptr();
        inner.available += 1;
        drop(inner);
        self.stats.record_dealloc(self.block_size);
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_blocks_sum_to_count() {
        let p = PoolAllocator::new(64, 8).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..5 {
            ptrs.push(p.allocate(64, 8).unwrap());
        }
        assert_eq!(p.allocated_blocks() + p.available_blocks(), 8);
        for ptr in ptrs {
            p.deallocate(ptr, 64).unwrap();
        }
        assert_eq!(p.allocated_blocks() + p.available_blocks(), 8);
        assert_eq!(p.allocated_blocks(), 0);
    }

    #[test]
    fn exhaustion_then_free_then_allocate() {
        // 4 blocks of 64 bytes; 4 allocs succeed, 5th fails, free one,
        // next alloc succeeds.
        let p = PoolAllocator::new(64, 4).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..4 {
            ptrs.push(p.allocate(64, 8).unwrap());
        }
        let unique: std::collections::HashSet<_> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        assert_eq!(unique.len(), 4, "all 4 pointers must be distinct");

        assert!(p.allocate(64, 8).is_err());

        p.deallocate(ptrs.pop().unwrap(), 64).unwrap();
        assert!(p.allocate(64, 8).is_ok());
    }

    #[test]
    fn oversized_request_fails() {
        let p = PoolAllocator::new(32, 4).unwrap();
        assert!(p.allocate(64, 8).is_err());
    }

    #[test]
    fn out_of_range_deallocate_does_not_corrupt_freelist() {
        let p = PoolAllocator::new(64, 4).unwrap();
        let bogus = Box::new([0u8; 64]);
        let bogus_ptr = NonNull::new(Box::into_raw(bogus) as *mut u8).unwrap();

        let err = p.deallocate(bogus_ptr, 64).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
        assert_eq!(p.available_blocks(), 4, "freelist must be unaffected by an unknown pointer");

        // Pool is still fully usable afterwards.
        for _ in 0..4 {
            assert!(p.allocate(64, 8).is_ok());
        }
        unsafe {
            drop(Box::from_raw(bogus_ptr.as_ptr() as *mut [u8; 64]));
        }
    }

    #[test]
    fn block_size_rounded_up_to_pointer_requirements() {
        let p = PoolAllocator::new(1, 4).unwrap();
        assert!(p.block_size() >= std::mem::size_of::<usize>());
        assert_eq!(p.block_size() % std::mem::align_of::<usize>(), 0);
    }
}
