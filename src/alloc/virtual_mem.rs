//! Page-granular OS-backed virtual memory allocator.
//!
//! Follows a `platform/{linux,windows}.rs` split: unix targets go through
//! `libc::mmap`/`munmap`/`sysconf`, Windows targets go through `winapi`'s
//! `VirtualAlloc`/`VirtualFree`/`GetSystemInfo`. Each outstanding mapping is
//! tracked as a [`Region`] so the destructor can release every one of them.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::alloc::{Allocator, AllocatorStats, StatsSnapshot};
use crate::error::{ErrorKind, ScriptResult};
use crate::sync::mutex::Mutex;
use crate::util::layout::align_up;

/// One OS-level mapping, page-aligned, released as a unit.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// Base address of the mapping.
    pub address: usize,
    /// Size in bytes, rounded up to page granularity.
    pub size: usize,
    /// Unix timestamp (seconds) the mapping was created.
    pub allocated_at: u64,
}

struct Inner {
    regions: HashMap<usize, Region>,
}

/// An OS-backed allocator handing out whole page-aligned mappings.
pub struct VirtualAllocator {
    page_size: usize,
    inner: Mutex<Inner>,
    stats: AllocatorStats,
}

impl VirtualAllocator {
    /// Create a new virtual-memory allocator, querying the page size from
    /// the OS at construction.
    pub fn new() -> Self {
        Self {
            page_size: query_page_size(),
            inner: Mutex::new(Inner {
                regions: HashMap::new(),
            }),
            stats: AllocatorStats::default(),
        }
    }

    /// The page size this allocator rounds requests up to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of currently outstanding mappings.
    pub fn region_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Snapshot of every currently outstanding mapping.
    pub fn regions(&self) -> Vec<Region> {
        self.inner.lock().regions.values().copied().collect()
    }

    fn now_unix() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl Default for VirtualAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualAllocator {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for region in inner.regions.drain().map(|(_, r)| r) {
            unsafe { os_unmap(region.address, region.size) };
        }
    }
}

impl Allocator for VirtualAllocator {
    fn allocate(&self, size: usize, _align: usize) -> ScriptResult<NonNull<u8>> {
        if size == 0 {
            return crate::error::make_error(
                ErrorKind::InvalidArguments,
                "cannot map a zero-size region",
                "VirtualAllocator::allocate",
                None,
            );
        }
        let rounded = align_up(size, self.page_size);
        let addr = unsafe { os_map(rounded) };
        match addr {
            Some(addr) => {
                let region = Region {
                    address: addr,
                    size: rounded,
                    allocated_at: Self::now_unix(),
                };
                self.inner.lock().regions.insert(addr, region);
                self.stats.record_alloc(rounded);
                Ok(NonNull::new(addr as *mut u8).expect("mmap never returns null on success"))
            }
            None => crate::error::make_error(
                ErrorKind::ResourceExhausted,
                format!("OS mapping failed for {rounded} bytes"),
                "VirtualAllocator::allocate",
                None,
            ),
        }
    }

    fn deallocate(&self, ptr: NonNull<u8>, _size: usize) -> ScriptResult<()> {
        let addr = ptr.as_ptr() as usize;
        let region = self.inner.lock().regions.remove(&addr);
        match region {
            Some(region) => {
                unsafe { os_unmap(region.address, region.size) };
                self.stats.record_dealloc(region.size);
                Ok(())
            }
            None => {
                #[cfg(feature = "log")]
                log::warn!("VirtualAllocator::deallocate: unknown region at {addr:#x}");
                crate::error::make_error(
                    ErrorKind::InvalidArguments,
                    format!("unknown region at {addr:#x}"),
                    "VirtualAllocator::deallocate",
                    None,
                )
            }
        }
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }
}

#[cfg(unix)]
fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    }
}

#[cfg(not(any(unix, windows)))]
fn query_page_size() -> usize {
    4096
}

/// # Safety
/// `size` must already be rounded up to page granularity.
#[cfg(unix)]
unsafe fn os_map(size: usize) -> Option<usize> {
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr as usize)
    }
}

/// # Safety
/// `address`/`size` must be a mapping previously returned by `os_map`.
#[cfg(unix)]
unsafe fn os_unmap(address: usize, size: usize) {
    libc::munmap(address as *mut libc::c_void, size);
}

#[cfg(windows)]
unsafe fn os_map(size: usize) -> Option<usize> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
    let ptr = VirtualAlloc(std::ptr::null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as usize)
    }
}

#[cfg(windows)]
unsafe fn os_unmap(address: usize, _size: usize) {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;
    VirtualFree(address as *mut _, 0, MEM_RELEASE);
}

#[cfg(not(any(unix, windows)))]
unsafe fn os_map(size: usize) -> Option<usize> {
    let layout = std::alloc::Layout::from_size_align(size, 16).ok()?;
    let ptr = std::alloc::alloc(layout);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as usize)
    }
}

#[cfg(not(any(unix, windows)))]
unsafe fn os_unmap(address: usize, size: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, 16) {
        std::alloc::dealloc(address as *mut u8, layout);
    }
}
