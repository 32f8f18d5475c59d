//! Shared memory visible to both contexts.
//!
//! Host-side call handlers read guest-supplied arguments (interface ids) and write out-values
//! (descriptor blobs) through this trait, addressing memory with already-translated host
//! pointers. The real runtime backs it with the process address space; tests use
//! [`VecSharedMemory`].

use std::sync::RwLock;

use thiserror::Error;

use crate::addr::HostPtr;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("shared memory access out of bounds: addr={addr}, len=0x{len:x}")]
    OutOfBounds { addr: HostPtr, len: usize },
    #[error("null pointer access (len=0x{len:x})")]
    Null { len: usize },
}

/// Byte-addressed view of the shared address space.
pub trait SharedMemory: Send + Sync {
    fn read(&self, addr: HostPtr, dst: &mut [u8]) -> Result<(), MemoryError>;
    fn write(&self, addr: HostPtr, src: &[u8]) -> Result<(), MemoryError>;
}

/// Contiguous in-memory backing covering host addresses `[base, base + len)`.
#[derive(Debug)]
pub struct VecSharedMemory {
    base: u64,
    mem: RwLock<Vec<u8>>,
}

impl VecSharedMemory {
    pub fn new(base: HostPtr, size_bytes: usize) -> Self {
        Self {
            base: base.0,
            mem: RwLock::new(vec![0u8; size_bytes]),
        }
    }

    pub fn base(&self) -> HostPtr {
        HostPtr(self.base)
    }

    pub fn len(&self) -> usize {
        self.mem.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(
        &self,
        addr: HostPtr,
        len: usize,
        mem_len: usize,
    ) -> Result<core::ops::Range<usize>, MemoryError> {
        if addr.is_null() {
            return Err(MemoryError::Null { len });
        }
        let oob = MemoryError::OutOfBounds { addr, len };
        let offset = addr.0.checked_sub(self.base).ok_or(oob.clone())?;
        let start = usize::try_from(offset).map_err(|_| oob.clone())?;
        let end = start.checked_add(len).ok_or(oob.clone())?;
        if end > mem_len {
            return Err(oob);
        }
        Ok(start..end)
    }
}

impl SharedMemory for VecSharedMemory {
    fn read(&self, addr: HostPtr, dst: &mut [u8]) -> Result<(), MemoryError> {
        let mem = self.mem.read().unwrap_or_else(|e| e.into_inner());
        let range = self.range(addr, dst.len(), mem.len())?;
        dst.copy_from_slice(&mem[range]);
        Ok(())
    }

    fn write(&self, addr: HostPtr, src: &[u8]) -> Result<(), MemoryError> {
        let mut mem = self.mem.write().unwrap_or_else(|e| e.into_inner());
        let range = self.range(addr, src.len(), mem.len())?;
        mem[range].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mem = VecSharedMemory::new(HostPtr(0x1000), 0x100);
        mem.write(HostPtr(0x1010), &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        mem.read(HostPtr(0x1010), &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn rejects_accesses_outside_the_backing() {
        let mem = VecSharedMemory::new(HostPtr(0x1000), 0x100);
        let mut out = [0u8; 8];
        assert_eq!(
            mem.read(HostPtr(0x10fc), &mut out),
            Err(MemoryError::OutOfBounds {
                addr: HostPtr(0x10fc),
                len: 8
            })
        );
        assert!(mem.write(HostPtr(0xff0), &[0; 4]).is_err());
        assert_eq!(
            mem.write(HostPtr::NULL, &[0; 4]),
            Err(MemoryError::Null { len: 4 })
        );
    }
}
