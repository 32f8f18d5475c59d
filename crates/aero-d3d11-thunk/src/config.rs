use aero_thunk_abi::{AddressTranslator, GuestPtr, SharedHeap, GUEST_WINDOW_BYTES};

use crate::error::{Result, ThunkError};

/// Layout of the shared address space used by a thunk instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThunkOptions {
    /// Host address of guest address 0.
    pub guest_base: u64,
    /// First guest address handed out by the shared heap.
    pub heap_base: GuestPtr,
    pub heap_bytes: u32,
    /// Size of the shared memory backing, starting at guest address 0.
    pub memory_bytes: usize,
}

impl Default for ThunkOptions {
    fn default() -> Self {
        Self {
            guest_base: 0x1_0000_0000,
            heap_base: GuestPtr(0x10_0000),
            heap_bytes: 4 * 1024 * 1024,
            memory_bytes: 0x50_0000,
        }
    }
}

impl ThunkOptions {
    pub fn translator(&self) -> AddressTranslator {
        AddressTranslator::new(self.guest_base)
    }

    /// The shared heap both sides of one thunk instance must be handed.
    pub fn shared_heap(&self) -> SharedHeap {
        SharedHeap::new(self.heap_base, self.heap_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heap_bytes == 0 {
            return Err(ThunkError::InvalidOptions("heap_bytes must be non-zero"));
        }
        let heap_end = self.heap_base.to_u64() + self.heap_bytes as u64;
        if heap_end > GUEST_WINDOW_BYTES {
            return Err(ThunkError::InvalidOptions(
                "shared heap extends past the guest window",
            ));
        }
        if heap_end > self.memory_bytes as u64 {
            return Err(ThunkError::InvalidOptions(
                "shared heap extends past the shared memory backing",
            ));
        }
        if self
            .guest_base
            .checked_add(self.memory_bytes as u64)
            .is_none()
        {
            return Err(ThunkError::InvalidOptions(
                "shared memory overflows the host address space",
            ));
        }
        Ok(())
    }
}
