//! Allocator for guest-addressable blocks of the shared address space.
//!
//! Both contexts allocate from the same heap: the host places proxy records here (so the guest
//! can address them with 32-bit pointers) and the guest stages call arguments here (so the host
//! can read them through translated pointers).
//!
//! Blocks are rounded up to [`HEAP_GRANULE`] bytes. Freed blocks go onto an exact-size free list
//! and are reused before the bump pointer advances, so steady-state create/destroy cycles do not
//! grow the heap.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use thiserror::Error;

use crate::addr::{GuestPtr, GUEST_WINDOW_BYTES};

/// Allocation granularity (and alignment) in bytes.
pub const HEAP_GRANULE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("shared heap exhausted allocating {len} bytes")]
    OutOfMemory { len: u32 },
    #[error("zero-sized shared heap allocation")]
    ZeroSize,
    #[error("free of unallocated shared heap block {0}")]
    InvalidFree(GuestPtr),
}

#[derive(Debug, Default)]
struct HeapInner {
    bump: u64,
    free: BTreeMap<u32, Vec<u32>>,
    live: HashMap<u32, u32>,
    live_bytes: u64,
}

#[derive(Debug)]
pub struct SharedHeap {
    start: u64,
    end: u64,
    inner: Mutex<HeapInner>,
}

impl SharedHeap {
    /// Create a heap over guest addresses `[start, start + len)`.
    ///
    /// The first granule is skipped when `start` is zero so that no allocation aliases the null
    /// pointer.
    pub fn new(start: GuestPtr, len: u32) -> Self {
        let end = (start.to_u64() + len as u64).min(GUEST_WINDOW_BYTES);
        let mut first = align_up(start.to_u64(), HEAP_GRANULE as u64);
        if first == 0 {
            first = HEAP_GRANULE as u64;
        }
        Self {
            start: first,
            end,
            inner: Mutex::new(HeapInner {
                bump: first,
                ..HeapInner::default()
            }),
        }
    }

    pub fn alloc(&self, len: u32) -> Result<GuestPtr, HeapError> {
        if len == 0 {
            return Err(HeapError::ZeroSize);
        }
        let size = align_up(len as u64, HEAP_GRANULE as u64);
        let size32 = u32::try_from(size).map_err(|_| HeapError::OutOfMemory { len })?;

        let mut inner = self.lock();
        let reused = inner.free.get_mut(&size32).and_then(Vec::pop);
        let addr = match reused {
            Some(addr) => addr,
            None => {
                let addr = inner.bump;
                let next = addr
                    .checked_add(size)
                    .ok_or(HeapError::OutOfMemory { len })?;
                if next > self.end {
                    return Err(HeapError::OutOfMemory { len });
                }
                inner.bump = next;
                addr as u32
            }
        };
        inner.live.insert(addr, size32);
        inner.live_bytes += size;
        Ok(GuestPtr(addr))
    }

    pub fn free(&self, ptr: GuestPtr) -> Result<(), HeapError> {
        let mut inner = self.lock();
        let Some(size) = inner.live.remove(&ptr.0) else {
            return Err(HeapError::InvalidFree(ptr));
        };
        inner.live_bytes -= size as u64;
        inner.free.entry(size).or_default().push(ptr.0);
        Ok(())
    }

    /// Whether `ptr` is the start of a live block.
    pub fn is_live(&self, ptr: GuestPtr) -> bool {
        self.lock().live.contains_key(&ptr.0)
    }

    pub fn live_bytes(&self) -> u64 {
        self.lock().live_bytes
    }

    pub fn live_allocations(&self) -> usize {
        self.lock().live.len()
    }

    /// Bytes ever handed out by the bump pointer (high-water mark).
    pub fn high_water_bytes(&self) -> u64 {
        self.lock().bump - self.start
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeapInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

const fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_hands_out_null() {
        let heap = SharedHeap::new(GuestPtr::NULL, 0x100);
        let p = heap.alloc(1).unwrap();
        assert!(!p.is_null());
        assert_eq!(p.0 % HEAP_GRANULE, 0);
    }

    #[test]
    fn reuses_freed_blocks_of_the_same_size() {
        let heap = SharedHeap::new(GuestPtr(0x1000), 0x1000);
        let a = heap.alloc(8).unwrap();
        heap.free(a).unwrap();
        let b = heap.alloc(12).unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.high_water_bytes(), 16);
        assert_eq!(heap.live_bytes(), 16);
    }

    #[test]
    fn detects_double_free() {
        let heap = SharedHeap::new(GuestPtr(0x1000), 0x1000);
        let a = heap.alloc(32).unwrap();
        heap.free(a).unwrap();
        assert_eq!(heap.free(a), Err(HeapError::InvalidFree(a)));
        assert_eq!(heap.live_allocations(), 0);
    }

    #[test]
    fn reports_exhaustion() {
        let heap = SharedHeap::new(GuestPtr(0x1000), 0x40);
        for _ in 0..4 {
            heap.alloc(16).unwrap();
        }
        assert_eq!(heap.alloc(1), Err(HeapError::OutOfMemory { len: 1 }));
        assert_eq!(heap.alloc(0), Err(HeapError::ZeroSize));
    }
}
