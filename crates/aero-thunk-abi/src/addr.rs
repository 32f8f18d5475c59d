//! Guest ↔ host address translation.
//!
//! Both contexts share one address space. The guest sees a 4GiB window of it through 32-bit
//! pointers; the host sees the same bytes at `guest_base + guest_addr`. Translation is therefore a
//! width/offset conversion, never a copy:
//!
//! - `to_host(g) = guest_base + g`
//! - `to_guest(h) = h - guest_base` (truncated to 32 bits)
//!
//! Null maps to null in both directions so optional pointer arguments survive the round trip.

use core::fmt;

/// Size of the guest-addressable window in bytes.
pub const GUEST_WINDOW_BYTES: u64 = 1 << 32;

/// A pointer as seen by the guest (32-bit).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestPtr(pub u32);

/// A pointer as seen by the host (64-bit).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPtr(pub u64);

impl GuestPtr {
    pub const NULL: Self = Self(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pointer arithmetic within the guest window; `None` on 32-bit overflow.
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    pub const fn checked_sub(self, offset: u32) -> Option<Self> {
        match self.0.checked_sub(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Widen to the 64-bit slot used by call records.
    pub const fn to_u64(self) -> u64 {
        self.0 as u64
    }

    /// Narrow a call-record slot back to a guest pointer.
    ///
    /// Call records are written by the guest, so the upper half is always zero for well-formed
    /// records; stray bits are discarded rather than trusted.
    pub const fn from_u64(v: u64) -> Self {
        Self(v as u32)
    }
}

impl HostPtr {
    pub const NULL: Self = Self(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for GuestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g:0x{:08x}", self.0)
    }
}

impl fmt::Display for GuestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Debug for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h:0x{:016x}", self.0)
    }
}

impl fmt::Display for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Pure guest ↔ host pointer translation for one shared address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressTranslator {
    guest_base: u64,
}

impl AddressTranslator {
    /// Guest addresses are host addresses (the guest window starts at host address 0).
    pub const IDENTITY: Self = Self { guest_base: 0 };

    pub const fn new(guest_base: u64) -> Self {
        Self { guest_base }
    }

    pub const fn guest_base(&self) -> u64 {
        self.guest_base
    }

    pub const fn to_host(&self, ptr: GuestPtr) -> HostPtr {
        if ptr.is_null() {
            return HostPtr::NULL;
        }
        HostPtr(self.guest_base.wrapping_add(ptr.0 as u64))
    }

    /// Translate a host pointer into the guest window.
    ///
    /// Only meaningful for host pointers that were handed out inside the guest window; everything
    /// the thunk passes to the guest is allocated there. Use [`Self::try_to_guest`] to validate
    /// untrusted pointers.
    pub fn to_guest(&self, ptr: HostPtr) -> GuestPtr {
        if ptr.is_null() {
            return GuestPtr::NULL;
        }
        debug_assert!(
            self.is_guest_addressable(ptr),
            "host pointer {ptr:?} outside guest window (base 0x{:x})",
            self.guest_base
        );
        GuestPtr(ptr.0.wrapping_sub(self.guest_base) as u32)
    }

    pub fn try_to_guest(&self, ptr: HostPtr) -> Option<GuestPtr> {
        if ptr.is_null() {
            return Some(GuestPtr::NULL);
        }
        if !self.is_guest_addressable(ptr) {
            return None;
        }
        Some(GuestPtr(ptr.0.wrapping_sub(self.guest_base) as u32))
    }

    /// Whether `ptr` lies inside the guest window.
    pub fn is_guest_addressable(&self, ptr: HostPtr) -> bool {
        let Some(offset) = ptr.0.checked_sub(self.guest_base) else {
            return false;
        };
        offset < GUEST_WINDOW_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_preserved_both_ways() {
        let t = AddressTranslator::new(0x7f00_0000_0000);
        assert_eq!(t.to_host(GuestPtr::NULL), HostPtr::NULL);
        assert_eq!(t.to_guest(HostPtr::NULL), GuestPtr::NULL);
        assert_eq!(t.try_to_guest(HostPtr::NULL), Some(GuestPtr::NULL));
    }

    #[test]
    fn offsets_by_guest_base() {
        let t = AddressTranslator::new(0x1_0000_0000);
        assert_eq!(t.to_host(GuestPtr(0x1000)), HostPtr(0x1_0000_1000));
        assert_eq!(t.to_guest(HostPtr(0x1_0000_1000)), GuestPtr(0x1000));
    }

    #[test]
    fn rejects_pointers_outside_the_window() {
        let t = AddressTranslator::new(0x1_0000_0000);
        assert_eq!(t.try_to_guest(HostPtr(0x1000)), None);
        assert_eq!(t.try_to_guest(HostPtr(0x2_0000_0000)), None);
        assert_eq!(
            t.try_to_guest(HostPtr(0x1_ffff_fffc)),
            Some(GuestPtr(0xffff_fffc))
        );
    }

    #[test]
    fn identity_translator_is_a_widening() {
        let t = AddressTranslator::IDENTITY;
        assert_eq!(t.to_host(GuestPtr(0xdead_beef)), HostPtr(0xdead_beef));
        assert_eq!(t.to_guest(HostPtr(0xdead_beef)), GuestPtr(0xdead_beef));
    }
}
