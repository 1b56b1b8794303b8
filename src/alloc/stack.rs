//! LIFO stack (arena) allocator with named frames.
//!
//! Backed by a single contiguous buffer, bump-allocator style, but
//! thread-safe (all mutation under one lock) and exposing a named-frame /
//! pop-to-frame API rather than a raw `head()`/`reset_to()` pair.

use std::ptr::NonNull;

use crate::alloc::{Allocator, AllocatorStats, StatsSnapshot};
use crate::error::{ErrorKind, ScriptResult};
use crate::sync::mutex::Mutex;
use crate::util::layout::align_up;

/// A saved high-water mark inside a [`StackAllocator`]. Popping a frame
/// bulk-releases every allocation made after it was pushed.
#[derive(Debug, Clone)]
pub struct StackFrame {
    id: u64,
    offset: usize,
    tag: String,
}

impl StackFrame {
    /// Frame identifier, stable for the lifetime of the frame.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The offset the arena was at when this frame was pushed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The caller-supplied tag for this frame.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

struct Inner {
    buffer: NonNull<u8>,
    capacity: usize,
    current_offset: usize,
    frames: Vec<StackFrame>,
    next_frame_id: u64,
    /// Offset of the most recent allocation, for the strict-LIFO
    /// deallocate check.
    last_alloc_offset: Option<usize>,
}

// SAFETY: `Inner` is only ever accessed through `StackAllocator`'s mutex.
unsafe impl Send for Inner {}

/// A LIFO arena allocator with named frames and pop-to-frame semantics.
pub struct StackAllocator {
    inner: Mutex<Inner>,
    stats: AllocatorStats,
}

impl StackAllocator {
    /// Create a new stack allocator with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(capacity.max(1), 16)
            .expect("stack allocator capacity must fit a valid layout");
        let ptr = unsafe { std::alloc::alloc(layout) };
        let buffer = NonNull::new(ptr).expect("failed to allocate stack allocator buffer");

        Self {
            inner: Mutex::new(Inner {
                buffer,
                capacity,
                current_offset: 0,
                frames: Vec::new(),
                next_frame_id: 0,
                last_alloc_offset: None,
            }),
            stats: AllocatorStats::default(),
        }
    }

    /// Current allocation offset from the base of the arena.
    pub fn current_offset(&self) -> usize {
        self.inner.lock().current_offset
    }

    /// Total buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Fraction of the buffer not currently in use (`1 - used/capacity`).
    pub fn fragmentation(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.capacity == 0 {
            return 0.0;
        }
        1.0 - (inner.current_offset as f64 / inner.capacity as f64)
    }

    /// Push a new named frame, recording the current offset as its
    /// high-water mark. Returns the frame id for a later `pop_frame`.
    pub fn push_frame(&self, tag: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_frame_id;
        inner.next_frame_id += 1;
        let offset = inner.current_offset;
        inner.frames.push(StackFrame {
            id,
            offset,
            tag: tag.into(),
        });
        id
    }

    /// Pop back to the frame with the given id, releasing every allocation
    /// made since it was pushed (including frames pushed after it).
    pub fn pop_frame(&self, frame_id: u64) -> ScriptResult<()> {
        let mut inner = self.inner.lock();
        let pos = inner.frames.iter().position(|f| f.id == frame_id);
        match pos {
            Some(idx) => {
                let offset = inner.frames[idx].offset;
                inner.frames.truncate(idx);
                inner.current_offset = offset;
                inner.last_alloc_offset = None;
                Ok(())
            }
            None => crate::error::make_error(
                ErrorKind::InvalidState,
                format!("no such frame id {frame_id}"),
                "StackAllocator::pop_frame",
                None,
            ),
        }
    }

    /// Reset the whole arena, invalidating all allocations and frames.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let freed = inner.current_offset;
        inner.current_offset = 0;
        inner.frames.clear();
        inner.last_alloc_offset = None;
        #[cfg(feature = "debug")]
        unsafe {
            std::ptr::write_bytes(inner.buffer.as_ptr(), 0xCD, inner.capacity);
        }
        drop(inner);
        if freed > 0 {
            self.stats.record_dealloc(freed);
        }
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        let layout = std::alloc::Layout::from_size_align(inner.capacity.max(1), 16)
            .expect("capacity was validated in new()");
        unsafe {
            std::alloc::dealloc(inner.buffer.as_ptr(), layout);
        }
    }
}

impl Allocator for StackAllocator {
    fn allocate(&self, size: usize, align: usize) -> ScriptResult<NonNull<u8>> {
        let align = align.max(1).next_power_of_two();
        let mut inner = self.inner.lock();
        let aligned = align_up(inner.current_offset, align);
        let new_offset = match aligned.checked_add(size) {
            Some(v) => v,
            None => {
                return crate::error::make_error(
                    ErrorKind::ResourceExhausted,
                    "allocation size overflow",
                    "StackAllocator::allocate",
                    None,
                )
            }
        };
        if new_offset > inner.capacity {
            return crate::error::make_error(
                ErrorKind::ResourceExhausted,
                format!(
                    "stack allocator exhausted: requested {size} bytes at offset {aligned}, capacity {}",
                    inner.capacity
                ),
                "StackAllocator::allocate",
                None,
            );
        }
        let ptr = unsafe { inner.buffer.as_ptr().add(aligned) };
        inner.current_offset = new_offset;
        inner.last_alloc_offset = Some(aligned);
        drop(inner);
        self.stats.record_alloc(size);
        Ok(NonNull::new(ptr).expect("offset within buffer is never null"))
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> ScriptResult<()> {
        let mut inner = self.inner.lock();
        let base = inner.buffer.as_ptr() as usize;
        let ptr_addr = ptr.as_ptr() as usize;
        let offset = ptr_addr.wrapping_sub(base);

        if inner.last_alloc_offset == Some(offset) {
            inner.current_offset = offset;
            inner.last_alloc_offset = None;
            drop(inner);
            self.stats.record_dealloc(size);
        } else {
            // Non-LIFO deallocate is never an error, just a no-op with a
            // warning — arena-with-frames callers routinely free in
            // non-stack order and rely on pop_frame/reset instead.
            drop(inner);
            #[cfg(feature = "log")]
            log::warn!(
                "StackAllocator::deallocate called out of LIFO order at offset {offset}; ignoring"
            );
        }
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }
}
