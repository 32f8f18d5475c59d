use bytemuck::{Pod, Zeroable};
use core::fmt;

/// Native status code of the wrapped interface family.
///
/// Values are carried verbatim across the call gate; the thunk never invents its own scheme.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: Self = Self(0);
    pub const S_FALSE: Self = Self(1);
    pub const E_NOTIMPL: Self = Self::from_u32(0x8000_4001);
    pub const E_NOINTERFACE: Self = Self::from_u32(0x8000_4002);
    pub const E_POINTER: Self = Self::from_u32(0x8000_4003);
    pub const E_FAIL: Self = Self::from_u32(0x8000_4005);
    pub const E_OUTOFMEMORY: Self = Self::from_u32(0x8007_000e);
    pub const E_INVALIDARG: Self = Self::from_u32(0x8007_0057);
    pub const DXGI_ERROR_NOT_FOUND: Self = Self::from_u32(0x887a_0002);
    pub const DXGI_ERROR_MORE_DATA: Self = Self::from_u32(0x887a_0003);

    pub const fn from_u32(v: u32) -> Self {
        Self(v as i32)
    }

    pub const fn to_u32(self) -> u32 {
        self.0 as u32
    }

    pub const fn succeeded(self) -> bool {
        self.0 >= 0
    }

    pub const fn failed(self) -> bool {
        self.0 < 0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::S_OK => "S_OK",
            Self::S_FALSE => "S_FALSE",
            Self::E_NOTIMPL => "E_NOTIMPL",
            Self::E_NOINTERFACE => "E_NOINTERFACE",
            Self::E_POINTER => "E_POINTER",
            Self::E_FAIL => "E_FAIL",
            Self::E_OUTOFMEMORY => "E_OUTOFMEMORY",
            Self::E_INVALIDARG => "E_INVALIDARG",
            Self::DXGI_ERROR_NOT_FOUND => "DXGI_ERROR_NOT_FOUND",
            Self::DXGI_ERROR_MORE_DATA => "DXGI_ERROR_MORE_DATA",
            _ => return None,
        })
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "HResult(0x{:08x})", self.to_u32()),
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.to_u32())
    }
}
