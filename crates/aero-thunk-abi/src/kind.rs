//! Per-kind tables for the fixed-function state objects.
//!
//! Every state kind follows the same proxy pattern; the only things that differ are the interface
//! identifiers each façade answers to, the capability id used to bind the legacy interface on the
//! host, and the descriptor sizes.

use crate::guid::{iid, Guid};

/// Which fixed-function state object a proxy wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateKind {
    Blend = 1,
    DepthStencil = 2,
    Rasterizer = 3,
    Sampler = 4,
}

/// Which interface family a façade belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Family {
    /// `ID3D11*State`.
    D3D11 = 0,
    /// `ID3D10*State` (`ID3D10BlendState1` for blend state).
    D3D10 = 1,
}

/// Descriptor revision requested from a façade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescRevision {
    /// `GetDesc`.
    Base,
    /// `ID3D10BlendState1::GetDesc1`.
    Rev1,
}

const BLEND_D3D11: &[Guid] = &[iid::ID3D11_BLEND_STATE, iid::ID3D11_DEVICE_CHILD, iid::IUNKNOWN];
const BLEND_D3D10: &[Guid] = &[
    iid::ID3D10_BLEND_STATE1,
    iid::ID3D10_BLEND_STATE,
    iid::ID3D10_DEVICE_CHILD,
];
const DEPTH_STENCIL_D3D11: &[Guid] = &[
    iid::ID3D11_DEPTH_STENCIL_STATE,
    iid::ID3D11_DEVICE_CHILD,
    iid::IUNKNOWN,
];
const DEPTH_STENCIL_D3D10: &[Guid] = &[iid::ID3D10_DEPTH_STENCIL_STATE, iid::ID3D10_DEVICE_CHILD];
const RASTERIZER_D3D11: &[Guid] = &[
    iid::ID3D11_RASTERIZER_STATE,
    iid::ID3D11_DEVICE_CHILD,
    iid::IUNKNOWN,
];
const RASTERIZER_D3D10: &[Guid] = &[iid::ID3D10_RASTERIZER_STATE, iid::ID3D10_DEVICE_CHILD];
const SAMPLER_D3D11: &[Guid] = &[
    iid::ID3D11_SAMPLER_STATE,
    iid::ID3D11_DEVICE_CHILD,
    iid::IUNKNOWN,
];
const SAMPLER_D3D10: &[Guid] = &[iid::ID3D10_SAMPLER_STATE, iid::ID3D10_DEVICE_CHILD];

impl StateKind {
    pub const ALL: [StateKind; 4] = [
        StateKind::Blend,
        StateKind::DepthStencil,
        StateKind::Rasterizer,
        StateKind::Sampler,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => StateKind::Blend,
            2 => StateKind::DepthStencil,
            3 => StateKind::Rasterizer,
            4 => StateKind::Sampler,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            StateKind::Blend => "blend",
            StateKind::DepthStencil => "depth-stencil",
            StateKind::Rasterizer => "rasterizer",
            StateKind::Sampler => "sampler",
        }
    }

    /// Interface ids a façade of `family` answers to, primary interface first.
    ///
    /// The two families' sets are disjoint for every kind.
    pub fn iids(self, family: Family) -> &'static [Guid] {
        match (self, family) {
            (StateKind::Blend, Family::D3D11) => BLEND_D3D11,
            (StateKind::Blend, Family::D3D10) => BLEND_D3D10,
            (StateKind::DepthStencil, Family::D3D11) => DEPTH_STENCIL_D3D11,
            (StateKind::DepthStencil, Family::D3D10) => DEPTH_STENCIL_D3D10,
            (StateKind::Rasterizer, Family::D3D11) => RASTERIZER_D3D11,
            (StateKind::Rasterizer, Family::D3D10) => RASTERIZER_D3D10,
            (StateKind::Sampler, Family::D3D11) => SAMPLER_D3D11,
            (StateKind::Sampler, Family::D3D10) => SAMPLER_D3D10,
        }
    }

    /// Which family `riid` selects, if any.
    pub fn family_of(self, riid: &Guid) -> Option<Family> {
        if self.iids(Family::D3D11).contains(riid) {
            Some(Family::D3D11)
        } else if self.iids(Family::D3D10).contains(riid) {
            Some(Family::D3D10)
        } else {
            None
        }
    }

    /// Interface the host mirror queries once to bind the legacy façade.
    pub fn legacy_capability_iid(self) -> Guid {
        self.iids(Family::D3D10)[0]
    }

    /// Size of the descriptor blob returned by `GetDesc`/`GetDesc1`, or `None` if the façade has
    /// no such method.
    pub fn desc_size(self, family: Family, revision: DescRevision) -> Option<usize> {
        match (self, family, revision) {
            // D3D11_BLEND_DESC: two BOOLs + 8 render-target blend descs of 32 bytes.
            (StateKind::Blend, Family::D3D11, DescRevision::Base) => Some(264),
            // D3D10_BLEND_DESC: BOOL + BOOL[8] + 6 enums + UINT8[8].
            (StateKind::Blend, Family::D3D10, DescRevision::Base) => Some(68),
            // D3D10_BLEND_DESC1 has the same layout as D3D11_BLEND_DESC.
            (StateKind::Blend, Family::D3D10, DescRevision::Rev1) => Some(264),
            (StateKind::DepthStencil, _, DescRevision::Base) => Some(52),
            (StateKind::Rasterizer, _, DescRevision::Base) => Some(40),
            (StateKind::Sampler, _, DescRevision::Base) => Some(52),
            _ => None,
        }
    }
}
