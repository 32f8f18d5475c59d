use bytemuck::{Pod, Zeroable};
use core::fmt;

/// A COM interface / private-data identifier, laid out exactly like the Windows `GUID` struct.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    /// Build a GUID from its canonical big-endian `u128` spelling, e.g.
    /// `0x75b68faa_347d_4159_8f45_a0640f01cd9a`.
    pub const fn from_u128(v: u128) -> Self {
        Self {
            data1: (v >> 96) as u32,
            data2: (v >> 80) as u16,
            data3: (v >> 64) as u16,
            data4: (v as u64).to_be_bytes(),
        }
    }

    pub const fn to_u128(self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Interface identifiers understood by the state-object thunk.
pub mod iid {
    use super::Guid;

    pub const IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);

    pub const ID3D11_DEVICE: Guid = Guid::from_u128(0xdb6f6ddb_ac77_4e88_8253_819df9bbf140);
    pub const ID3D10_DEVICE: Guid = Guid::from_u128(0x9b7e4c0f_342c_4106_a19f_4f2704f689f0);

    pub const ID3D11_DEVICE_CHILD: Guid = Guid::from_u128(0x1841e5c8_16b0_489b_bcc8_44cfb0d5deae);
    pub const ID3D11_BLEND_STATE: Guid = Guid::from_u128(0x75b68faa_347d_4159_8f45_a0640f01cd9a);
    pub const ID3D11_DEPTH_STENCIL_STATE: Guid =
        Guid::from_u128(0x03823efb_8d8f_4e1c_9aa2_f64bb2cbfdf1);
    pub const ID3D11_RASTERIZER_STATE: Guid =
        Guid::from_u128(0x9bb4ab81_ab1a_4d8f_b506_fc04200b6ee7);
    pub const ID3D11_SAMPLER_STATE: Guid = Guid::from_u128(0xda6fea51_564c_4487_9810_f0d0f9b4e3a5);

    pub const ID3D10_DEVICE_CHILD: Guid = Guid::from_u128(0x9b7e4c00_342c_4106_a19f_4f2704f689f0);
    pub const ID3D10_BLEND_STATE: Guid = Guid::from_u128(0xedad8d19_8a35_4d6d_8566_2ea276cde161);
    pub const ID3D10_BLEND_STATE1: Guid = Guid::from_u128(0xedad8d99_8a35_4d6d_8566_2ea276cde161);
    pub const ID3D10_DEPTH_STENCIL_STATE: Guid =
        Guid::from_u128(0x2b4b1cc8_a4ad_41f8_8322_ca86fc3ec675);
    pub const ID3D10_RASTERIZER_STATE: Guid =
        Guid::from_u128(0xa2a07292_89af_4345_be2e_c53d9fbb6e9f);
    pub const ID3D10_SAMPLER_STATE: Guid = Guid::from_u128(0x9b7e4c0c_342c_4106_a19f_4f2704f689f0);

    /// Reserved private-data key under which the host mirror is attached to the real host object.
    ///
    /// Never exposed to guest callers; guest private data lives in the proxy's own store.
    pub const AERO_STATE_MIRROR: Guid = Guid::from_u128(0x2c9a6d1e_5b7f_4c0a_9e3d_a3e06f17c2b4);
}
