//! Wire-level definitions shared by both sides of the D3D state-object thunk.
//!
//! This crate provides:
//! - Guest/host pointer types and the pure address translator (see [`AddressTranslator`]).
//! - The byte-addressed shared memory view and the shared guest-addressable heap.
//! - Call records and opcodes passed through the dispatch gate (see [`CallRecord`]).
//! - Status codes, interface ids and the per-kind interface tables.
#![forbid(unsafe_code)]

pub mod addr;
pub mod call;
pub mod guid;
pub mod heap;
pub mod hresult;
pub mod kind;
pub mod mem;

pub use addr::{AddressTranslator, GuestPtr, HostPtr, GUEST_WINDOW_BYTES};
pub use call::{CallDecodeError, CallRecord, Method, Opcode, CALL_RECORD_BYTES};
pub use guid::{iid, Guid};
pub use heap::{HeapError, SharedHeap, HEAP_GRANULE};
pub use hresult::HResult;
pub use kind::{DescRevision, Family, StateKind};
pub use mem::{MemoryError, SharedMemory, VecSharedMemory};
