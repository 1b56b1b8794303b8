//! Allocator interface, default allocator, statistics, and factory.
//!
//! `scriptcore` never assumes the host wants the system allocator: the
//! interpreter's single reallocate-style allocation hook is routed through
//! whichever [`Allocator`] the runtime manager was built with. Three
//! concrete strategies live alongside this trait: [`stack::StackAllocator`]
//! (LIFO arena), [`pool::PoolAllocator`] (fixed-block freelist), and
//! [`virtual_mem::VirtualAllocator`] (page-granular OS mappings).

pub mod pool;
pub mod stack;
pub mod virtual_mem;

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{ErrorKind, ScriptResult};
use crate::util::layout::align_up;

/// Aggregated, thread-safe allocation statistics.
///
/// `total_allocated` and `active_allocations` are "outstanding" counters:
/// [`Allocator::reset_statistics`] must not zero them, or a reset mid-flight
/// would make future frees look like they drove usage negative.
/// `allocation_count`, `deallocation_count`, and `total_allocated_lifetime`
/// are cumulative and are zeroed by `reset_statistics`.
#[derive(Default)]
pub struct AllocatorStats {
    total_allocated: AtomicUsize,
    peak_allocated: AtomicUsize,
    total_allocated_lifetime: AtomicU64,
    allocation_count: AtomicU64,
    deallocation_count: AtomicU64,
}

/// A point-in-time snapshot of [`AllocatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes currently allocated (outstanding).
    pub total_allocated: usize,
    /// Peak bytes allocated (high-water mark, outstanding-style: never
    /// reset by `reset_statistics`).
    pub peak_allocated: usize,
    /// Cumulative bytes ever allocated (reset by `reset_statistics`).
    pub total_allocated_lifetime: u64,
    /// Cumulative allocation count (reset by `reset_statistics`).
    pub allocation_count: u64,
    /// Cumulative deallocation count (reset by `reset_statistics`).
    pub deallocation_count: u64,
}

impl StatsSnapshot {
    /// Currently outstanding allocations (allocation_count - deallocation_count).
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

impl AllocatorStats {
    pub(crate) fn record_alloc(&self, size: usize) {
        let now = self.total_allocated.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_allocated.fetch_max(now, Ordering::Relaxed);
        self.total_allocated_lifetime.fetch_add(size as u64, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dealloc(&self, size: usize) {
        self.total_allocated.fetch_sub(size, Ordering::Relaxed);
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset cumulative counters without touching outstanding ones.
    pub(crate) fn reset(&self) {
        self.total_allocated_lifetime.store(0, Ordering::Relaxed);
        self.allocation_count.store(0, Ordering::Relaxed);
        self.deallocation_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            peak_allocated: self.peak_allocated.load(Ordering::Relaxed),
            total_allocated_lifetime: self.total_allocated_lifetime.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Capability set every allocation strategy implements.
///
/// Implementations must be thread-safe: all mutation and observation of
/// internal structural state happens under a single exclusive lock, though
/// counters that don't need to be consistent with that structural state may
/// use atomics directly (see [`AllocatorStats`]).
pub trait Allocator: Send + Sync {
    /// Allocate `size` bytes aligned to `align` (a power of two). Returns
    /// `ResourceExhausted` if the request cannot be satisfied.
    fn allocate(&self, size: usize, align: usize) -> ScriptResult<NonNull<u8>>;

    /// Deallocate a pointer previously returned by `allocate`/`reallocate`
    /// on this same instance. `size` is the size that was allocated.
    ///
    /// An out-of-range or unknown pointer is reported as `InvalidArguments`
    /// without touching internal structural state (no partial free, no
    /// freelist corruption).
    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> ScriptResult<()>;

    /// Resize an allocation in place or by realloc-then-copy.
    /// `reallocate(ptr, old, 0)` is equivalent to `deallocate(ptr, old)`.
    /// A null `ptr` (size 0 in, signalled by `old_size == 0` with no prior
    /// allocation) behaves like `allocate(new_size, align)`.
    fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> ScriptResult<Option<NonNull<u8>>> {
        match (ptr, new_size) {
            (None, 0) => Ok(None),
            (None, _) => self.allocate(new_size, align).map(Some),
            (Some(p), 0) => {
                self.deallocate(p, old_size)?;
                Ok(None)
            }
            (Some(p), _) => {
                let new_ptr = self.allocate(new_size, align)?;
                let copy_len = old_size.min(new_size);
                unsafe {
                    std::ptr::copy_nonoverlapping(p.as_ptr(), new_ptr.as_ptr(), copy_len);
                }
                self.deallocate(p, old_size)?;
                Ok(Some(new_ptr))
            }
        }
    }

    /// Current statistics snapshot.
    fn stats(&self) -> StatsSnapshot;

    /// Reset cumulative statistics. Outstanding counters (bytes currently
    /// allocated, peak) are left untouched.
    fn reset_statistics(&self);
}

/// Wraps the host's general-purpose allocator (`std::alloc`).
///
/// For alignments exceeding pointer size, over-allocates by
/// `size + align + size_of::<usize>()`, aligns the returned pointer upward,
/// and stores the original allocation pointer one word below it so
/// `deallocate`/`reallocate` can recover it.
pub struct DefaultAllocator {
    stats: AllocatorStats,
}

impl DefaultAllocator {
    /// Create a new default allocator.
    pub fn new() -> Self {
        Self {
            stats: AllocatorStats::default(),
        }
    }

    fn ptr_align() -> usize {
        std::mem::align_of::<usize>()
    }

    unsafe fn raw_alloc(size: usize, align: usize) -> *mut u8 {
        if align <= Self::ptr_align() {
            let layout = match std::alloc::Layout::from_size_align(size.max(1), align.max(Self::ptr_align())) {
                Ok(l) => l,
                Err(_) => return std::ptr::null_mut(),
            };
            std::alloc::alloc(layout)
        } else {
            let word = std::mem::size_of::<usize>();
            let total = match size.checked_add(align).and_then(|v| v.checked_add(word)) {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            };
            let layout = match std::alloc::Layout::from_size_align(total, align) {
                Ok(l) => l,
                Err(_) => return std::ptr::null_mut(),
            };
            let base = std::alloc::alloc(layout);
            if base.is_null() {
                return std::ptr::null_mut();
            }
            let base_addr = base as usize;
            let aligned_addr = align_up(base_addr + word, align);
            let aligned_ptr = aligned_addr as *mut u8;
            // Stash the original pointer one word below the aligned address.
            (aligned_ptr.sub(word) as *mut usize).write(base_addr);
            aligned_ptr
        }
    }

    unsafe fn raw_dealloc(ptr: *mut u8, size: usize, align: usize) {
        if align <= Self::ptr_align() {
            let layout = std::alloc::Layout::from_size_align_unchecked(size.max(1), align.max(Self::ptr_align()));
            std::alloc::dealloc(ptr, layout);
        } else {
            let word = std::mem::size_of::<usize>();
            let base_addr = (ptr.sub(word) as *const usize).read();
            let total = size.checked_add(align).and_then(|v| v.checked_add(word)).unwrap_or(size);
            let layout = std::alloc::Layout::from_size_align_unchecked(total, align);
            std::alloc::dealloc(base_addr as *mut u8, layout);
        }
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for DefaultAllocator {
    fn allocate(&self, size: usize, align: usize) -> ScriptResult<NonNull<u8>> {
        let align = align.max(1).next_power_of_two();
        let ptr = unsafe { Self::raw_alloc(size, align) };
        match NonNull::new(ptr) {
            Some(p) => {
                self.stats.record_alloc(size);
                Ok(p)
            }
            None => crate::error::make_error(
                ErrorKind::ResourceExhausted,
                format!("system allocator failed for {size} bytes (align {align})"),
                "DefaultAllocator::allocate",
                None,
            ),
        }
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> ScriptResult<()> {
        // align is not tracked per-allocation by this simple wrapper; the
        // over-allocation path only activates above pointer alignment, and
        // our own allocators never request alignments scriptcore doesn't
        // already know at the call site, so pointer alignment is the safe
        // default here.
        unsafe { Self::raw_dealloc(ptr.as_ptr(), size, Self::ptr_align()) };
        self.stats.record_dealloc(size);
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }
}

/// Selects a concrete allocator strategy from a use-case tag.
///
/// | tag                          | strategy                       |
/// |-------------------------------|--------------------------------|
/// | `"temp_objects"` / `"stack"`  | [`stack::StackAllocator`]       |
/// | `"fixed_size"` / `"pool"`     | [`pool::PoolAllocator`] (64B blocks, 4096 count) |
/// | `"large_blocks"` / `"virtual"`| [`virtual_mem::VirtualAllocator`] |
/// | anything else                 | [`DefaultAllocator`]            |
pub fn create_recommended_allocator(use_case: &str) -> Box<dyn Allocator> {
    match use_case {
        "temp_objects" | "stack" => Box::new(stack::StackAllocator::new(crate::util::size::mb(1))),
        "fixed_size" | "pool" => Box::new(
            pool::PoolAllocator::new(64, 4096).expect("default pool parameters are always valid"),
        ),
        "large_blocks" | "virtual" => Box::new(virtual_mem::VirtualAllocator::new()),
        _ => Box::new(DefaultAllocator::new()),
    }
}
