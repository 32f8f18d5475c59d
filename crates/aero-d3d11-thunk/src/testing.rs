//! Test doubles for the host runtime and a fully wired guest/host pair.
//!
//! Only available to this crate's own tests or with the `test-utils` feature.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use aero_thunk_abi::{
    iid, DescRevision, Family, GuestPtr, Guid, HResult, HostPtr, SharedHeap, StateKind,
    VecSharedMemory,
};
use hashbrown::HashMap;

use crate::config::ThunkOptions;
use crate::error::Result;
use crate::gate::HostDispatcher;
use crate::guest::{GuestContext, GuestDevices};
use crate::host::{DeviceRegistry, HostDeviceChild, HostRef, Unknown};
use crate::mirror::{HostMirror, HostThunk};
use crate::private_data::{PointerWidth, PrivateStore};
use crate::proxy::D3D11StateIface;

/// Install a `tracing` subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

static NEXT_HOST_ADDR: AtomicU64 = AtomicU64::new(0x7f10_0000_0000);

fn next_host_addr() -> HostPtr {
    HostPtr(NEXT_HOST_ADDR.fetch_add(0x100, Ordering::Relaxed))
}

#[derive(Debug, Clone)]
pub struct FakeHostOptions {
    /// Whether the object answers the legacy capability query.
    pub legacy_supported: bool,
    /// Interfaces the object claims beyond the two modeled families.
    pub extra_iids: Vec<Guid>,
    pub device: Option<HostPtr>,
    /// Seed for the descriptor bytes returned by `get_desc`.
    pub desc_seed: u8,
    /// Fail `set_private_data_interface` for the mirror slot.
    pub reject_mirror_attach: bool,
}

impl Default for FakeHostOptions {
    fn default() -> Self {
        Self {
            legacy_supported: true,
            extra_iids: Vec::new(),
            device: None,
            desc_seed: 0x5a,
            reject_mirror_attach: false,
        }
    }
}

/// Host state object with a COM-style reference count.
///
/// Starts with one reference (the creator's). When the count drops to zero the object runs its
/// destructor, which releases everything in its private-data store.
pub struct FakeHostState {
    kind: StateKind,
    addr: HostPtr,
    options: FakeHostOptions,
    refcount: AtomicU32,
    destroyed: AtomicU32,
    private: PrivateStore,
    weak_self: Weak<FakeHostState>,
}

impl std::fmt::Debug for FakeHostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHostState")
            .field("kind", &self.kind)
            .field("addr", &self.addr)
            .field("refcount", &self.refcount())
            .finish()
    }
}

impl FakeHostState {
    pub fn new(kind: StateKind) -> Arc<Self> {
        Self::with_options(kind, FakeHostOptions::default())
    }

    pub fn with_options(kind: StateKind, options: FakeHostOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            kind,
            addr: next_host_addr(),
            options,
            refcount: AtomicU32::new(1),
            destroyed: AtomicU32::new(0),
            private: PrivateStore::new(PointerWidth::Host64),
            weak_self: weak_self.clone(),
        })
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// How many times the destructor ran.
    pub fn destroy_count(&self) -> u32 {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn private_store(&self) -> &PrivateStore {
        &self.private
    }

    pub fn as_host_ref(&self) -> Option<HostRef> {
        let strong: Arc<FakeHostState> = self.weak_self.upgrade()?;
        Some(strong)
    }

    /// Descriptor bytes this object reports for `family`/`revision`.
    pub fn expected_desc(&self, family: Family, revision: DescRevision) -> Option<Vec<u8>> {
        let size = self.kind.desc_size(family, revision)?;
        let salt = ((family as u8) << 4) | (revision == DescRevision::Rev1) as u8;
        Some(
            (0..size)
                .map(|i| self.options.desc_seed ^ salt ^ (i as u8).wrapping_mul(7))
                .collect(),
        )
    }

    fn answers(&self, riid: &Guid) -> bool {
        match self.kind.family_of(riid) {
            Some(Family::D3D11) => true,
            Some(Family::D3D10) => self.options.legacy_supported,
            None => self.options.extra_iids.contains(riid),
        }
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::AcqRel);
        self.private.cleanup();
    }
}

impl Unknown for FakeHostState {
    fn add_ref(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release(&self) -> u32 {
        let refcount = self.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
        if refcount == 0 {
            self.destroy();
        }
        refcount
    }

    fn interface_ptr(&self) -> u64 {
        self.addr.0
    }
}

impl HostDeviceChild for FakeHostState {
    fn query_interface(&self, riid: &Guid) -> std::result::Result<HostRef, HResult> {
        if !self.answers(riid) {
            return Err(HResult::E_NOINTERFACE);
        }
        let iface = self.as_host_ref().ok_or(HResult::E_FAIL)?;
        self.add_ref();
        Ok(iface)
    }

    fn get_device(&self) -> Option<HostPtr> {
        self.options.device
    }

    fn get_private_data(&self, guid: &Guid, size: &mut u32, data: Option<&mut [u8]>) -> HResult {
        self.private.get(guid, size, data)
    }

    fn get_private_data_interface(&self, guid: &Guid) -> Option<Arc<dyn Unknown>> {
        self.private.get_interface(guid)
    }

    fn set_private_data(&self, guid: &Guid, data: Option<&[u8]>) -> HResult {
        self.private.set(guid, data)
    }

    fn set_private_data_interface(&self, guid: &Guid, value: Option<Arc<dyn Unknown>>) -> HResult {
        if self.options.reject_mirror_attach && *guid == iid::AERO_STATE_MIRROR {
            return HResult::E_FAIL;
        }
        self.private.set_interface(guid, value)
    }

    fn get_desc(&self, family: Family, revision: DescRevision, out: &mut [u8]) {
        if let Some(desc) = self.expected_desc(family, revision) {
            out.copy_from_slice(&desc);
        }
    }
}

/// Both device registries: host device → guest device record, and guest device record →
/// per-family device interface (`ID3D11Device` at +0, `ID3D10Device` at +8).
#[derive(Debug, Default)]
pub struct FakeDevices {
    devices: Mutex<HashMap<HostPtr, GuestPtr>>,
}

impl FakeDevices {
    pub const D3D10_INTERFACE_OFFSET: u32 = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, host: HostPtr, guest: GuestPtr) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host, guest);
    }
}

impl DeviceRegistry for FakeDevices {
    fn guest_device(&self, host: HostPtr) -> Option<GuestPtr> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&host)
            .copied()
    }
}

impl GuestDevices for FakeDevices {
    fn device_interface(&self, device: GuestPtr, family: Family) -> Option<GuestPtr> {
        match family {
            Family::D3D11 => Some(device),
            Family::D3D10 => device.checked_add(Self::D3D10_INTERFACE_OFFSET),
        }
    }
}

/// A guest context wired to a host thunk through an in-process gate.
pub struct ThunkHarness {
    pub options: ThunkOptions,
    pub memory: Arc<VecSharedMemory>,
    pub heap: Arc<SharedHeap>,
    pub devices: Arc<FakeDevices>,
    pub dispatcher: Arc<HostDispatcher>,
    pub host: HostThunk,
    pub guest: GuestContext,
}

impl ThunkHarness {
    pub fn new() -> Self {
        match Self::with_options(ThunkOptions::default()) {
            Ok(harness) => harness,
            Err(err) => panic!("default thunk options rejected: {err}"),
        }
    }

    pub fn with_options(options: ThunkOptions) -> Result<Self> {
        options.validate()?;
        let memory = Arc::new(VecSharedMemory::new(
            HostPtr(options.guest_base),
            options.memory_bytes,
        ));
        let heap = Arc::new(options.shared_heap());
        let devices = Arc::new(FakeDevices::new());

        let host = HostThunk::new(&options, memory.clone(), heap.clone(), devices.clone())?;
        let dispatcher = Arc::new(HostDispatcher::new(host.clone()));
        let guest = GuestContext::new(
            &options,
            dispatcher.clone(),
            memory.clone(),
            heap.clone(),
            devices.clone(),
        )?;
        host.set_teardown_sink(guest.teardown_sink());

        Ok(Self {
            options,
            memory,
            heap,
            devices,
            dispatcher,
            host,
            guest,
        })
    }

    /// State-creation path: bind (or find) the mirror on the host, then initialize the guest
    /// proxy. The returned façade owns the creator's reference on `state`.
    pub fn create_state(&self, state: &Arc<FakeHostState>) -> Result<D3D11StateIface> {
        let mirror = self.bind(state)?;
        self.guest.init_state(state.kind(), mirror.handle())
    }

    pub fn bind(&self, state: &Arc<FakeHostState>) -> Result<Arc<HostMirror>> {
        let host: HostRef = state.clone();
        self.host.wrap_or_resolve(state.kind(), host)
    }
}

impl Default for ThunkHarness {
    fn default() -> Self {
        Self::new()
    }
}
