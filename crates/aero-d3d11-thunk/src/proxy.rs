//! Guest-visible dual-identity proxies.
//!
//! One proxy record lives in the shared heap per wrapped host object. It holds two interface
//! headers, one per façade:
//!
//! ```text
//! +0  current header  (ID3D11*State vtable tag)
//! +4  legacy header   (ID3D10*State vtable tag)
//! ```
//!
//! Both façades resolve to the same record, which is the handle passed through the gate. The
//! proxy keeps no reference count of its own: every AddRef/Release is forwarded to the host
//! object.

use std::fmt;
use std::sync::Arc;

use aero_thunk_abi::{
    CallRecord, DescRevision, Family, GuestPtr, Guid, HResult, Method, Opcode, StateKind,
};
use tracing::{trace, warn};

use crate::guest::GuestShared;
use crate::host::Unknown;
use crate::private_data::{PointerWidth, PrivateStore};

/// Size of a proxy record in the shared heap.
pub const PROXY_RECORD_BYTES: u32 = 8;

const VTABLE_TAG_MAGIC: u32 = 0xae5d_0000;

/// Offset of a façade's interface header inside the proxy record.
pub const fn header_offset(family: Family) -> u32 {
    match family {
        Family::D3D11 => 0,
        Family::D3D10 => 4,
    }
}

/// Value stored in an interface header, identifying the façade's vtable.
pub const fn vtable_tag(kind: StateKind, family: Family) -> u32 {
    VTABLE_TAG_MAGIC | ((kind as u32) << 8) | family as u32
}

pub fn decode_vtable_tag(tag: u32) -> Option<(StateKind, Family)> {
    if tag & 0xffff_0000 != VTABLE_TAG_MAGIC {
        return None;
    }
    let kind = StateKind::from_u8((tag >> 8) as u8)?;
    let family = match tag as u8 {
        0 => Family::D3D11,
        1 => Family::D3D10,
        _ => return None,
    };
    Some((kind, family))
}

/// Guest-side state of one wrapped object.
#[derive(Debug)]
pub struct StateProxy {
    kind: StateKind,
    record: GuestPtr,
    private: PrivateStore,
}

impl StateProxy {
    pub(crate) fn new(kind: StateKind, record: GuestPtr) -> Self {
        Self {
            kind,
            record,
            private: PrivateStore::new(PointerWidth::Guest32),
        }
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn record(&self) -> GuestPtr {
        self.record
    }

    /// Address of the given façade's interface header.
    pub fn header(&self, family: Family) -> GuestPtr {
        // Records are heap blocks inside the guest window, so the header offset cannot wrap.
        GuestPtr(self.record.0 + header_offset(family))
    }

    pub fn private_store(&self) -> &PrivateStore {
        &self.private
    }

    fn call(&self, ctx: &GuestShared, method: Method) -> CallRecord {
        let mut rec = CallRecord::new(Opcode::new(self.kind, method), self.record);
        ctx.call(&mut rec);
        rec
    }

    fn probe_interface(&self, ctx: &GuestShared, riid: &Guid) {
        let scratch = match ctx.scratch(Guid::SIZE_BYTES) {
            Ok(scratch) => scratch,
            Err(err) => {
                warn!(record = %self.record, %riid, %err, "skipping interface probe");
                return;
            }
        };
        if let Err(err) = scratch.write(riid.as_bytes()) {
            warn!(record = %self.record, %riid, %err, "skipping interface probe");
            return;
        }
        let mut rec = CallRecord::new(Opcode::new(self.kind, Method::QueryInterface), self.record)
            .with_guest_arg(0, scratch.ptr());
        ctx.call(&mut rec);
        trace!(record = %self.record, %riid, status = ?rec.status(), "interface probe");
    }

    fn get_device(&self, ctx: &GuestShared, family: Family) -> Option<GuestPtr> {
        let rec = self.call(ctx, Method::GetDevice);
        if rec.status().failed() {
            return None;
        }
        ctx.device_interface(rec.guest_arg(0), family)
    }

    fn get_desc(
        &self,
        ctx: &GuestShared,
        method: Method,
        family: Family,
        revision: DescRevision,
        out: &mut [u8],
    ) -> HResult {
        let Some(size) = self.kind.desc_size(family, revision) else {
            return HResult::E_NOINTERFACE;
        };
        if out.len() != size {
            return HResult::E_INVALIDARG;
        }
        let scratch = match ctx.scratch(size) {
            Ok(scratch) => scratch,
            Err(err) => return err.hresult(),
        };
        let mut rec = CallRecord::new(Opcode::new(self.kind, method), self.record)
            .with_guest_arg(0, scratch.ptr())
            .with_arg(1, size as u64);
        ctx.call(&mut rec);
        let hr = rec.status();
        if hr.failed() {
            return hr;
        }
        match scratch.read(out) {
            Ok(()) => hr,
            Err(err) => err.hresult(),
        }
    }
}

/// Either façade, as returned by `QueryInterface`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interface {
    D3D11(D3D11StateIface),
    D3D10(D3D10StateIface),
}

impl Interface {
    pub fn as_ptr(&self) -> GuestPtr {
        match self {
            Interface::D3D11(iface) => iface.as_ptr(),
            Interface::D3D10(iface) => iface.as_ptr(),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Interface::D3D11(_) => Family::D3D11,
            Interface::D3D10(_) => Family::D3D10,
        }
    }

    pub fn release(&self) -> u32 {
        match self {
            Interface::D3D11(iface) => iface.release(),
            Interface::D3D10(iface) => iface.release(),
        }
    }

    pub fn into_d3d11(self) -> Option<D3D11StateIface> {
        match self {
            Interface::D3D11(iface) => Some(iface),
            Interface::D3D10(_) => None,
        }
    }

    pub fn into_d3d10(self) -> Option<D3D10StateIface> {
        match self {
            Interface::D3D10(iface) => Some(iface),
            Interface::D3D11(_) => None,
        }
    }
}

/// `ID3D11BlendState` / `ID3D11DepthStencilState` / `ID3D11RasterizerState` /
/// `ID3D11SamplerState` façade.
///
/// Cloning a façade does not touch the reference count; like a raw interface pointer, callers
/// balance [`Self::add_ref`] and [`Self::release`] themselves.
#[derive(Clone)]
pub struct D3D11StateIface {
    ctx: Arc<GuestShared>,
    proxy: Arc<StateProxy>,
}

/// `ID3D10BlendState1` / `ID3D10DepthStencilState` / `ID3D10RasterizerState` /
/// `ID3D10SamplerState` façade.
#[derive(Clone)]
pub struct D3D10StateIface {
    ctx: Arc<GuestShared>,
    proxy: Arc<StateProxy>,
}

impl D3D11StateIface {
    pub(crate) fn new(ctx: Arc<GuestShared>, proxy: Arc<StateProxy>) -> Self {
        Self { ctx, proxy }
    }

    pub fn as_ptr(&self) -> GuestPtr {
        self.proxy.header(Family::D3D11)
    }

    pub fn kind(&self) -> StateKind {
        self.proxy.kind
    }

    pub fn proxy(&self) -> &Arc<StateProxy> {
        &self.proxy
    }

    pub(crate) fn legacy(&self) -> D3D10StateIface {
        D3D10StateIface {
            ctx: self.ctx.clone(),
            proxy: self.proxy.clone(),
        }
    }

    /// Only the two fixed interface families are ever handed out. Anything else is probed on the
    /// host so missing coverage gets reported, and fails with `E_NOINTERFACE` regardless.
    pub fn query_interface(&self, riid: &Guid) -> Result<Interface, HResult> {
        trace!(iface = %self.as_ptr(), %riid, "QueryInterface");
        match self.proxy.kind.family_of(riid) {
            Some(family) => {
                let method = match family {
                    Family::D3D11 => Method::AddRef,
                    Family::D3D10 => Method::LegacyAddRef,
                };
                let hr = self.proxy.call(&self.ctx, method).status();
                if hr.failed() {
                    return Err(hr);
                }
                Ok(match family {
                    Family::D3D11 => Interface::D3D11(self.clone()),
                    Family::D3D10 => Interface::D3D10(self.legacy()),
                })
            }
            None => {
                self.proxy.probe_interface(&self.ctx, riid);
                Err(HResult::E_NOINTERFACE)
            }
        }
    }

    pub fn add_ref(&self) -> u32 {
        let refcount = self.proxy.call(&self.ctx, Method::AddRef).ref_count();
        trace!(iface = %self.as_ptr(), refcount, "AddRef");
        refcount
    }

    pub fn release(&self) -> u32 {
        let refcount = self.proxy.call(&self.ctx, Method::Release).ref_count();
        trace!(iface = %self.as_ptr(), refcount, "Release");
        refcount
    }

    /// `ID3D11Device` interface of the owning device.
    pub fn get_device(&self) -> Option<GuestPtr> {
        self.proxy.get_device(&self.ctx, Family::D3D11)
    }

    pub fn get_private_data(
        &self,
        guid: &Guid,
        size: &mut u32,
        data: Option<&mut [u8]>,
    ) -> HResult {
        self.proxy.private.get(guid, size, data)
    }

    pub fn set_private_data(&self, guid: &Guid, data: Option<&[u8]>) -> HResult {
        self.proxy.private.set(guid, data)
    }

    pub fn set_private_data_interface(
        &self,
        guid: &Guid,
        value: Option<Arc<dyn Unknown>>,
    ) -> HResult {
        self.proxy.private.set_interface(guid, value)
    }

    /// Copy the `D3D11_*_DESC` of this object into `out`, which must be exactly the descriptor
    /// size.
    pub fn get_desc(&self, out: &mut [u8]) -> HResult {
        self.proxy.get_desc(
            &self.ctx,
            Method::GetDesc,
            Family::D3D11,
            DescRevision::Base,
            out,
        )
    }
}

impl D3D10StateIface {
    pub fn as_ptr(&self) -> GuestPtr {
        self.proxy.header(Family::D3D10)
    }

    pub fn kind(&self) -> StateKind {
        self.proxy.kind
    }

    pub fn proxy(&self) -> &Arc<StateProxy> {
        &self.proxy
    }

    fn current(&self) -> D3D11StateIface {
        D3D11StateIface::new(self.ctx.clone(), self.proxy.clone())
    }

    pub fn query_interface(&self, riid: &Guid) -> Result<Interface, HResult> {
        self.current().query_interface(riid)
    }

    /// Returns 0 if the host object does not expose the legacy interface.
    pub fn add_ref(&self) -> u32 {
        let refcount = self.proxy.call(&self.ctx, Method::LegacyAddRef).ref_count();
        trace!(iface = %self.as_ptr(), refcount, "AddRef");
        refcount
    }

    pub fn release(&self) -> u32 {
        let refcount = self.proxy.call(&self.ctx, Method::LegacyRelease).ref_count();
        trace!(iface = %self.as_ptr(), refcount, "Release");
        refcount
    }

    /// `ID3D10Device` interface of the owning device.
    pub fn get_device(&self) -> Option<GuestPtr> {
        self.proxy.get_device(&self.ctx, Family::D3D10)
    }

    pub fn get_private_data(
        &self,
        guid: &Guid,
        size: &mut u32,
        data: Option<&mut [u8]>,
    ) -> HResult {
        self.proxy.private.get(guid, size, data)
    }

    pub fn set_private_data(&self, guid: &Guid, data: Option<&[u8]>) -> HResult {
        self.proxy.private.set(guid, data)
    }

    pub fn set_private_data_interface(
        &self,
        guid: &Guid,
        value: Option<Arc<dyn Unknown>>,
    ) -> HResult {
        self.proxy.private.set_interface(guid, value)
    }

    pub fn get_desc(&self, out: &mut [u8]) -> HResult {
        self.proxy.get_desc(
            &self.ctx,
            Method::LegacyGetDesc,
            Family::D3D10,
            DescRevision::Base,
            out,
        )
    }

    /// `ID3D10BlendState1::GetDesc1`; `E_NOINTERFACE` for the other kinds.
    pub fn get_desc1(&self, out: &mut [u8]) -> HResult {
        self.proxy.get_desc(
            &self.ctx,
            Method::LegacyGetDesc1,
            Family::D3D10,
            DescRevision::Rev1,
            out,
        )
    }
}

impl PartialEq for D3D11StateIface {
    fn eq(&self, other: &Self) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl Eq for D3D11StateIface {}

impl PartialEq for D3D10StateIface {
    fn eq(&self, other: &Self) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl Eq for D3D10StateIface {}

impl fmt::Debug for D3D11StateIface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D3D11StateIface({:?} @ {:?})", self.proxy.kind, self.as_ptr())
    }
}

impl fmt::Debug for D3D10StateIface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D3D10StateIface({:?} @ {:?})", self.proxy.kind, self.as_ptr())
    }
}

impl Unknown for D3D11StateIface {
    fn add_ref(&self) -> u32 {
        D3D11StateIface::add_ref(self)
    }

    fn release(&self) -> u32 {
        D3D11StateIface::release(self)
    }

    fn interface_ptr(&self) -> u64 {
        self.as_ptr().to_u64()
    }
}

impl Unknown for D3D10StateIface {
    fn add_ref(&self) -> u32 {
        D3D10StateIface::add_ref(self)
    }

    fn release(&self) -> u32 {
        D3D10StateIface::release(self)
    }

    fn interface_ptr(&self) -> u64 {
        self.as_ptr().to_u64()
    }
}
