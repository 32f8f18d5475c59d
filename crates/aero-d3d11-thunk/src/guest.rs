//! Guest half of the thunk: proxy table, call staging and the teardown callback.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use aero_thunk_abi::{
    AddressTranslator, CallRecord, Family, GuestPtr, HeapError, SharedHeap, SharedMemory,
    StateKind,
};
use hashbrown::HashMap;
use tracing::{debug, error, warn};

use crate::config::ThunkOptions;
use crate::error::{Result, ThunkError};
use crate::gate::CallGate;
use crate::mirror::TeardownSink;
use crate::proxy::{
    decode_vtable_tag, header_offset, vtable_tag, D3D11StateIface, Interface, StateProxy,
    PROXY_RECORD_BYTES,
};

/// Resolves a guest device record to the interface a façade hands out from `GetDevice`.
pub trait GuestDevices: Send + Sync {
    fn device_interface(&self, device: GuestPtr, family: Family) -> Option<GuestPtr>;
}

pub(crate) struct GuestShared {
    gate: Arc<dyn CallGate>,
    memory: Arc<dyn SharedMemory>,
    heap: Arc<SharedHeap>,
    translator: AddressTranslator,
    devices: Arc<dyn GuestDevices>,
    proxies: Mutex<HashMap<GuestPtr, Arc<StateProxy>>>,
}

impl GuestShared {
    pub(crate) fn call(&self, rec: &mut CallRecord) {
        self.gate.call(rec);
    }

    /// Per-call staging buffer in the shared heap, freed on drop.
    pub(crate) fn scratch(&self, len: usize) -> Result<ScratchBuf<'_>> {
        let len32 =
            u32::try_from(len).map_err(|_| HeapError::OutOfMemory { len: u32::MAX })?;
        let ptr = self.heap.alloc(len32)?;
        Ok(ScratchBuf {
            shared: self,
            ptr,
            len,
        })
    }

    pub(crate) fn device_interface(&self, device: GuestPtr, family: Family) -> Option<GuestPtr> {
        if device.is_null() {
            return None;
        }
        self.devices.device_interface(device, family)
    }

    fn proxies(&self) -> MutexGuard<'_, HashMap<GuestPtr, Arc<StateProxy>>> {
        self.proxies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TeardownSink for GuestShared {
    fn destroy_state(&self, handle: GuestPtr) {
        let proxy = self.proxies().remove(&handle);
        let Some(proxy) = proxy else {
            warn!(%handle, "teardown for unknown proxy");
            return;
        };
        proxy.private_store().cleanup();
        // Stale façade pointers must stop resolving before the record is reused.
        let record = self.translator.to_host(handle);
        if let Err(err) = self
            .memory
            .write(record, &[0u8; PROXY_RECORD_BYTES as usize])
        {
            error!(%handle, %err, "failed to clear proxy headers");
        }
        debug!(%handle, kind = proxy.kind().name(), "destroyed guest proxy");
    }
}

pub(crate) struct ScratchBuf<'a> {
    shared: &'a GuestShared,
    ptr: GuestPtr,
    len: usize,
}

impl ScratchBuf<'_> {
    pub(crate) fn ptr(&self) -> GuestPtr {
        self.ptr
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> Result<()> {
        debug_assert!(bytes.len() <= self.len);
        let host = self.shared.translator.to_host(self.ptr);
        self.shared.memory.write(host, bytes)?;
        Ok(())
    }

    pub(crate) fn read(&self, out: &mut [u8]) -> Result<()> {
        debug_assert!(out.len() <= self.len);
        let host = self.shared.translator.to_host(self.ptr);
        self.shared.memory.read(host, out)?;
        Ok(())
    }
}

impl Drop for ScratchBuf<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.shared.heap.free(self.ptr) {
            error!(ptr = %self.ptr, %err, "failed to free call scratch buffer");
        }
    }
}

/// Guest-side entry point: creates proxies for records bound by the host and recovers façades
/// from raw interface pointers.
#[derive(Clone)]
pub struct GuestContext {
    shared: Arc<GuestShared>,
}

impl GuestContext {
    /// Fails with [`ThunkError::InvalidOptions`] if `options` describe an unusable layout.
    pub fn new(
        options: &ThunkOptions,
        gate: Arc<dyn CallGate>,
        memory: Arc<dyn SharedMemory>,
        heap: Arc<SharedHeap>,
        devices: Arc<dyn GuestDevices>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(GuestShared {
                gate,
                memory,
                heap,
                translator: options.translator(),
                devices,
                proxies: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Callback for the host thunk to run when a mirror is torn down.
    pub fn teardown_sink(&self) -> Weak<dyn TeardownSink> {
        let sink: Weak<GuestShared> = Arc::downgrade(&self.shared);
        sink
    }

    /// Initialize the proxy for a record the host just bound and return its current façade.
    ///
    /// Idempotent: a record that already has a proxy returns the existing one.
    pub fn init_state(&self, kind: StateKind, handle: GuestPtr) -> Result<D3D11StateIface> {
        if handle.is_null() {
            return Err(ThunkError::UnknownHandle(handle));
        }
        let mut proxies = self.shared.proxies();
        if let Some(existing) = proxies.get(&handle) {
            if existing.kind() != kind {
                return Err(ThunkError::KindMismatch {
                    expected: kind,
                    actual: existing.kind(),
                });
            }
            return Ok(D3D11StateIface::new(
                self.shared.clone(),
                existing.clone(),
            ));
        }

        let mut headers = [0u8; PROXY_RECORD_BYTES as usize];
        for family in [Family::D3D11, Family::D3D10] {
            let offset = header_offset(family) as usize;
            headers[offset..offset + 4].copy_from_slice(&vtable_tag(kind, family).to_le_bytes());
        }
        let record = self.shared.translator.to_host(handle);
        self.shared.memory.write(record, &headers)?;

        let proxy = Arc::new(StateProxy::new(kind, handle));
        proxies.insert(handle, proxy.clone());
        debug!(%handle, kind = kind.name(), "initialized guest proxy");
        Ok(D3D11StateIface::new(self.shared.clone(), proxy))
    }

    /// Recover the façade whose interface header is at `ptr`.
    ///
    /// Returns `None` for null, for pointers that do not hold a state-object vtable tag, and for
    /// records that are no longer live.
    pub fn facade_from_ptr(&self, ptr: GuestPtr) -> Option<Interface> {
        if ptr.is_null() {
            return None;
        }
        let mut tag = [0u8; 4];
        self.shared
            .memory
            .read(self.shared.translator.to_host(ptr), &mut tag)
            .ok()?;
        let (kind, family) = decode_vtable_tag(u32::from_le_bytes(tag))?;
        let record = ptr.checked_sub(header_offset(family))?;
        let proxy = self.shared.proxies().get(&record).cloned()?;
        if proxy.kind() != kind {
            warn!(%ptr, ?kind, actual = ?proxy.kind(), "vtable tag does not match proxy kind");
            return None;
        }
        let current = D3D11StateIface::new(self.shared.clone(), proxy);
        Some(match family {
            Family::D3D11 => Interface::D3D11(current),
            Family::D3D10 => Interface::D3D10(current.legacy()),
        })
    }

    pub fn proxy(&self, handle: GuestPtr) -> Option<Arc<StateProxy>> {
        self.shared.proxies().get(&handle).cloned()
    }

    pub fn live_proxies(&self) -> usize {
        self.shared.proxies().len()
    }
}
