//! Host-side object contract consumed by the thunk.
//!
//! The thunk never implements state objects itself; it forwards to whatever the host runtime hands
//! it through these traits. Reference counts are explicit COM-style counts carried by the objects,
//! independent of the `Arc` that keeps the Rust value alive: an object is logically destroyed when
//! its own count reaches zero, at which point it must release everything in its private-data store.

use std::sync::Arc;

use aero_thunk_abi::{DescRevision, Family, GuestPtr, Guid, HResult, HostPtr};

/// `IUnknown` lifetime subset, shared by host objects and private-data interface values.
pub trait Unknown: Send + Sync {
    fn add_ref(&self) -> u32;
    fn release(&self) -> u32;
    /// Interface pointer value written out when the object is read back from a private-data store.
    fn interface_ptr(&self) -> u64;
}

/// A counted-or-borrowed reference to a host interface.
pub type HostRef = Arc<dyn HostDeviceChild>;

/// `ID3D11DeviceChild` plus the state-object `GetDesc`, as implemented by the host runtime.
pub trait HostDeviceChild: Unknown {
    /// On success the returned interface carries one reference owned by the caller.
    fn query_interface(&self, riid: &Guid) -> Result<HostRef, HResult>;

    /// Host address of the owning device.
    ///
    /// Like `ID3D11DeviceChild::GetDevice` this AddRefs the device. The reference belongs to the
    /// host runtime, which releases it once the guest device record it maps to goes away; the
    /// thunk never releases it.
    fn get_device(&self) -> Option<HostPtr>;

    fn get_private_data(&self, guid: &Guid, size: &mut u32, data: Option<&mut [u8]>) -> HResult;

    /// Interface value stored under `guid`, carrying one reference owned by the caller. `None` if
    /// the key is absent or holds plain bytes.
    fn get_private_data_interface(&self, guid: &Guid) -> Option<Arc<dyn Unknown>>;

    fn set_private_data(&self, guid: &Guid, data: Option<&[u8]>) -> HResult;

    fn set_private_data_interface(&self, guid: &Guid, value: Option<Arc<dyn Unknown>>) -> HResult;

    /// Copy the descriptor of the requested family/revision into `out`, which is exactly the
    /// kind's descriptor size.
    fn get_desc(&self, family: Family, revision: DescRevision, out: &mut [u8]);

    fn host_ptr(&self) -> HostPtr {
        HostPtr(self.interface_ptr())
    }
}

/// Maps host device pointers to the guest device wrapper record.
pub trait DeviceRegistry: Send + Sync {
    fn guest_device(&self, host: HostPtr) -> Option<GuestPtr>;
}
