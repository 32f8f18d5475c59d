use aero_thunk_abi::{
    CallDecodeError, GuestPtr, Guid, HResult, HeapError, MemoryError, StateKind,
};
use thiserror::Error;

pub type Result<T, E = ThunkError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThunkError {
    #[error("unknown proxy handle {0}")]
    UnknownHandle(GuestPtr),

    #[error("expected a {expected:?} state object, found {actual:?}")]
    KindMismatch {
        expected: StateKind,
        actual: StateKind,
    },

    #[error("malformed call record: {0}")]
    Decode(#[from] CallDecodeError),

    #[error("shared heap: {0}")]
    Heap(#[from] HeapError),

    #[error("shared memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("interface {0} is not exposed by {1:?} state objects")]
    NoInterface(Guid, StateKind),

    #[error("host object does not expose the legacy {0:?} interface")]
    LegacyUnsupported(StateKind),

    #[error("descriptor buffer is {actual} bytes, expected {expected}")]
    DescSize { expected: usize, actual: usize },

    #[error("host object has no registered device")]
    NoDevice,

    #[error("host call failed with {0:?}")]
    Host(HResult),

    #[error("invalid thunk options: {0}")]
    InvalidOptions(&'static str),
}

impl ThunkError {
    /// Status code reported to callers for this error.
    pub fn hresult(&self) -> HResult {
        match self {
            ThunkError::UnknownHandle(_)
            | ThunkError::KindMismatch { .. }
            | ThunkError::DescSize { .. }
            | ThunkError::InvalidOptions(_) => HResult::E_INVALIDARG,
            ThunkError::Decode(CallDecodeError::BufferTooSmall { .. }) => HResult::E_INVALIDARG,
            ThunkError::Decode(_) => HResult::E_NOTIMPL,
            ThunkError::Heap(HeapError::InvalidFree(_)) => HResult::E_FAIL,
            ThunkError::Heap(_) => HResult::E_OUTOFMEMORY,
            ThunkError::Memory(_) => HResult::E_POINTER,
            ThunkError::NoInterface(..) | ThunkError::LegacyUnsupported(_) => {
                HResult::E_NOINTERFACE
            }
            ThunkError::NoDevice => HResult::E_FAIL,
            ThunkError::Host(hr) => *hr,
        }
    }

    /// Turn a failed host status into an error, passing successful codes (including `S_FALSE`)
    /// through.
    pub fn check(hr: HResult) -> Result<HResult> {
        if hr.failed() {
            Err(ThunkError::Host(hr))
        } else {
            Ok(hr)
        }
    }
}

impl From<ThunkError> for HResult {
    fn from(err: ThunkError) -> Self {
        err.hresult()
    }
}
