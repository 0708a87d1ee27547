//! Backing store for simulated memory contents.
//!
//! This module provides the byte storage behind every memory range. Timing is
//! modelled elsewhere; the store only holds data. It provides:
//! 1. **Lazy allocation:** On Unix the store is an anonymous `mmap`, so a 2 GiB
//!    expander range only consumes host memory for the pages actually touched.
//! 2. **Shared access:** The store is shared (`Arc`) between the component that
//!    registers a range and the component that serves it.
//! 3. **Bounds checking:** Out-of-range accesses are reported, never performed.

use crate::common::SimError;
use std::slice;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Raw byte storage for one memory range.
///
/// Interior mutability through a raw pointer lets the device registration and
/// the controller share one store. Every copy in or out holds `lock`.
#[derive(Debug)]
pub struct BackingStore {
    ptr: *mut u8,
    size: usize,
    is_mmap: bool,
    lock: Mutex<()>,
}

// SAFETY: the store owns the allocation behind `ptr` for its whole lifetime.
unsafe impl Send for BackingStore {}
// SAFETY: the bytes are only touched through `read` and `write`, which copy under
// `lock`, so shared references never race on the allocation.
unsafe impl Sync for BackingStore {}

impl BackingStore {
    /// Allocates a zero-filled store of `size` bytes.
    ///
    /// On Unix, uses `mmap` for lazy allocation; on other platforms, allocates a `Vec`.
    ///
    /// # Arguments
    ///
    /// * `size` - Size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Allocation`] if the host refuses the mapping.
    pub fn new(size: u64) -> Result<Self, SimError> {
        let len = usize::try_from(size).map_err(|_| SimError::Allocation { size })?;
        if len == 0 {
            return Err(SimError::Allocation { size });
        }

        #[cfg(unix)]
        {
            // SAFETY: anonymous private mapping with no address hint; the result is checked.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(SimError::Allocation { size });
            }
            Ok(Self { ptr: ptr.cast::<u8>(), size: len, is_mmap: true, lock: Mutex::new(()) })
        }

        #[cfg(not(unix))]
        {
            let mut vec = vec![0u8; len];
            let ptr = vec.as_mut_ptr();
            std::mem::forget(vec);
            Ok(Self { ptr, size: len, is_mmap: false, lock: Mutex::new(()) })
        }
    }

    /// Returns the size of the store in bytes.
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` for a zero-sized store (never produced by [`BackingStore::new`]).
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn span(&self, offset: u64, len: usize) -> Option<usize> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.size).then_some(start)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock leaves nothing inconsistent.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `len` bytes starting at `offset`.
    ///
    /// Returns `None` if the span leaves the store.
    pub fn read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        let start = self.span(offset, len)?;
        let _guard = self.guard();
        // SAFETY: `span` checked that `[start, start + len)` lies inside the allocation,
        // and the lock excludes concurrent writers.
        let bytes = unsafe { slice::from_raw_parts(self.ptr.add(start), len) };
        Some(bytes.to_vec())
    }

    /// Copies `data` to `offset`.
    ///
    /// Returns `false` and writes nothing if the span leaves the store.
    #[must_use]
    pub fn write(&self, offset: u64, data: &[u8]) -> bool {
        let Some(start) = self.span(offset, data.len()) else {
            return false;
        };
        let _guard = self.guard();
        // SAFETY: `span` checked the destination and the lock excludes other accesses;
        // source and destination cannot overlap because `data` does not alias the store.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(start), data.len());
        }
        true
    }
}

impl Drop for BackingStore {
    /// Releases the mapping (Unix) or the vector (elsewhere).
    fn drop(&mut self) {
        if self.is_mmap {
            #[cfg(unix)]
            // SAFETY: `ptr` and `size` are exactly what `mmap` returned and was asked for.
            unsafe {
                let _ = libc::munmap(self.ptr.cast(), self.size);
            }
        } else {
            #[cfg(not(unix))]
            // SAFETY: reconstructs the vector forgotten in `new` with its original length.
            unsafe {
                drop(Vec::from_raw_parts(self.ptr, self.size, self.size));
            }
        }
    }
}
