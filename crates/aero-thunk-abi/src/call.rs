//! Call records exchanged through the dispatch gate.
//!
//! A call is a single fixed-size record. The guest fills in the opcode, the proxy handle and the
//! arguments (pointers as widened guest addresses), hands the record to the gate, and reads the
//! status code, the scalar result and any out-values back from the same record once the call
//! returns. Host handlers translate every pointer field before touching memory.
//!
//! Argument conventions per [`Method`]:
//!
//! | method | `args[0]` | `args[1]` | `iret` |
//! |---|---|---|---|
//! | `QueryInterface` | guest address of the 16-byte riid | - | - |
//! | `AddRef`/`Release`/`LegacyAddRef`/`LegacyRelease` | - | - | new count |
//! | `GetDevice` | out: guest device record (0 if none) | - | - |
//! | `GetDesc`/`LegacyGetDesc`/`LegacyGetDesc1` | out buffer address | buffer length | - |

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::addr::GuestPtr;
use crate::hresult::HResult;
use crate::kind::StateKind;

pub const CALL_RECORD_BYTES: usize = 56;
pub const CALL_ARG_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    QueryInterface = 1,
    AddRef = 2,
    Release = 3,
    GetDevice = 4,
    GetDesc = 5,
    LegacyAddRef = 6,
    LegacyRelease = 7,
    LegacyGetDesc = 8,
    LegacyGetDesc1 = 9,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Method::QueryInterface,
            2 => Method::AddRef,
            3 => Method::Release,
            4 => Method::GetDevice,
            5 => Method::GetDesc,
            6 => Method::LegacyAddRef,
            7 => Method::LegacyRelease,
            8 => Method::LegacyGetDesc,
            9 => Method::LegacyGetDesc1,
            _ => return None,
        })
    }
}

/// Identifies the handler a call record is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode {
    pub kind: StateKind,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallDecodeError {
    #[error("call record too small: {len} bytes")]
    BufferTooSmall { len: usize },
    #[error("unknown state kind {0}")]
    UnknownKind(u8),
    #[error("unknown method {0}")]
    UnknownMethod(u8),
    #[error("reserved opcode bits set: 0x{0:x}")]
    ReservedBits(u64),
}

impl Opcode {
    pub const fn new(kind: StateKind, method: Method) -> Self {
        Self { kind, method }
    }

    /// `(kind << 8) | method`.
    pub const fn encode(self) -> u64 {
        ((self.kind as u64) << 8) | self.method as u64
    }

    pub fn decode(raw: u64) -> Result<Self, CallDecodeError> {
        if raw >> 16 != 0 {
            return Err(CallDecodeError::ReservedBits(raw));
        }
        let kind_raw = (raw >> 8) as u8;
        let method_raw = raw as u8;
        let kind = StateKind::from_u8(kind_raw).ok_or(CallDecodeError::UnknownKind(kind_raw))?;
        let method =
            Method::from_u8(method_raw).ok_or(CallDecodeError::UnknownMethod(method_raw))?;
        Ok(Self { kind, method })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CallRecord {
    /// [`Opcode::encode`].
    pub id: u64,
    /// Native status code, written by the handler.
    pub status: i32,
    pub reserved: u32,
    /// Scalar result (reference counts).
    pub iret: u64,
    /// Guest address of the proxy record the call targets.
    pub iface: u64,
    pub args: [u64; CALL_ARG_COUNT],
}

const _: () = assert!(core::mem::size_of::<CallRecord>() == CALL_RECORD_BYTES);

impl CallRecord {
    /// A fresh record targeting `handle`; the status starts out as `E_FAIL` so a gate that never
    /// runs the handler cannot report success.
    pub fn new(op: Opcode, handle: GuestPtr) -> Self {
        Self {
            id: op.encode(),
            status: HResult::E_FAIL.0,
            iface: handle.to_u64(),
            ..Self::default()
        }
    }

    pub fn with_arg(mut self, index: usize, value: u64) -> Self {
        self.args[index] = value;
        self
    }

    pub fn with_guest_arg(self, index: usize, ptr: GuestPtr) -> Self {
        self.with_arg(index, ptr.to_u64())
    }

    pub fn opcode(&self) -> Result<Opcode, CallDecodeError> {
        Opcode::decode(self.id)
    }

    pub fn handle(&self) -> GuestPtr {
        GuestPtr::from_u64(self.iface)
    }

    pub fn arg(&self, index: usize) -> u64 {
        self.args[index]
    }

    pub fn guest_arg(&self, index: usize) -> GuestPtr {
        GuestPtr::from_u64(self.args[index])
    }

    pub fn status(&self) -> HResult {
        HResult(self.status)
    }

    pub fn set_status(&mut self, hr: HResult) {
        self.status = hr.0;
    }

    /// Reference count returned by AddRef/Release handlers.
    pub fn ref_count(&self) -> u32 {
        self.iret as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CallDecodeError> {
        let Some(raw) = bytes.get(..CALL_RECORD_BYTES) else {
            return Err(CallDecodeError::BufferTooSmall { len: bytes.len() });
        };
        Ok(bytemuck::pod_read_unaligned(raw))
    }
}
