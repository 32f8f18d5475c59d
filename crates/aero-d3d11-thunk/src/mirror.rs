//! Host mirrors and the identity registry.
//!
//! Every wrapped host state object gets exactly one [`HostMirror`]. The mirror is attached to the
//! host object as interface-typed private data under [`iid::AERO_STATE_MIRROR`]; that attachment
//! holds the mirror's only shadow reference. When the host object is destroyed it releases its
//! private data, the shadow count drops to zero and the mirror tears down the guest proxy.
//!
//! The mirror itself never holds a counted reference on the host object, so the host object's own
//! reference count alone decides when the pair goes away.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use aero_thunk_abi::{
    iid, AddressTranslator, GuestPtr, HostPtr, SharedHeap, SharedMemory, StateKind,
};
use hashbrown::HashMap;
use tracing::{debug, error, trace, warn};

use crate::config::ThunkOptions;
use crate::error::{Result, ThunkError};
use crate::host::{DeviceRegistry, HostDeviceChild, HostRef, Unknown};
use crate::proxy::PROXY_RECORD_BYTES;
use crate::stats::{ThunkStats, ThunkStatsSnapshot};

/// Guest-side cleanup invoked when a mirror is torn down.
pub trait TeardownSink: Send + Sync {
    /// Release guest-local resources of the proxy whose record is at `handle`. The record itself
    /// is freed by the host after this returns.
    fn destroy_state(&self, handle: GuestPtr);
}

/// Outcome of the one-time legacy capability query made when a mirror is bound.
#[derive(Clone)]
pub enum LegacyBinding {
    Bound(HostRef),
    Unsupported,
}

impl std::fmt::Debug for LegacyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyBinding::Bound(iface) => write!(f, "Bound({:?})", iface.host_ptr()),
            LegacyBinding::Unsupported => f.write_str("Unsupported"),
        }
    }
}

pub struct HostMirror {
    kind: StateKind,
    handle: GuestPtr,
    record: HostPtr,
    current: HostRef,
    legacy: LegacyBinding,
    shadow_refcount: AtomicU32,
    shared: Weak<HostShared>,
}

impl std::fmt::Debug for HostMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMirror")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("current", &self.current.host_ptr())
            .field("legacy", &self.legacy)
            .field("shadow_refcount", &self.shadow_refcount())
            .finish()
    }
}

impl HostMirror {
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// Guest address of the proxy record; the handle carried by every call record.
    pub fn handle(&self) -> GuestPtr {
        self.handle
    }

    pub fn current(&self) -> &HostRef {
        &self.current
    }

    pub fn legacy(&self) -> Option<&HostRef> {
        match &self.legacy {
            LegacyBinding::Bound(iface) => Some(iface),
            LegacyBinding::Unsupported => None,
        }
    }

    pub fn legacy_binding(&self) -> &LegacyBinding {
        &self.legacy
    }

    pub fn shadow_refcount(&self) -> u32 {
        self.shadow_refcount.load(Ordering::Acquire)
    }
}

impl Unknown for HostMirror {
    fn add_ref(&self) -> u32 {
        let refcount = self.shadow_refcount.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(handle = %self.handle, refcount, "mirror add_ref");
        refcount
    }

    fn release(&self) -> u32 {
        let refcount = self.shadow_refcount.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(handle = %self.handle, refcount, "mirror release");
        if refcount == 0 {
            match self.shared.upgrade() {
                Some(shared) => shared.teardown(self),
                None => warn!(handle = %self.handle, "host thunk gone before mirror teardown"),
            }
        }
        refcount
    }

    fn interface_ptr(&self) -> u64 {
        self.record.0
    }
}

pub(crate) struct HostShared {
    translator: AddressTranslator,
    memory: Arc<dyn SharedMemory>,
    heap: Arc<SharedHeap>,
    devices: Arc<dyn DeviceRegistry>,
    sink: RwLock<Option<Weak<dyn TeardownSink>>>,
    mirrors: RwLock<HashMap<HostPtr, Arc<HostMirror>>>,
    wrap_lock: Mutex<()>,
    stats: ThunkStats,
}

impl HostShared {
    fn teardown(&self, mirror: &HostMirror) {
        debug!(
            handle = %mirror.handle,
            kind = mirror.kind.name(),
            host = %mirror.current.host_ptr(),
            "tearing down state mirror"
        );
        let removed = self
            .mirrors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&mirror.record);
        if removed.is_none() {
            warn!(handle = %mirror.handle, "mirror missing from table at teardown");
        }

        let sink = self
            .sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        match sink {
            Some(sink) => sink.destroy_state(mirror.handle),
            None => warn!(handle = %mirror.handle, "no guest teardown sink; proxy leaked"),
        }

        if let Err(err) = self.heap.free(mirror.handle) {
            error!(handle = %mirror.handle, %err, "failed to free proxy record");
        }
        self.stats.inc_teardowns();
    }
}

/// Host half of the thunk: owns the mirror table and binds host objects to guest proxies.
#[derive(Clone)]
pub struct HostThunk {
    shared: Arc<HostShared>,
}

impl HostThunk {
    /// Fails with [`ThunkError::InvalidOptions`] if `options` describe an unusable layout.
    pub fn new(
        options: &ThunkOptions,
        memory: Arc<dyn SharedMemory>,
        heap: Arc<SharedHeap>,
        devices: Arc<dyn DeviceRegistry>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(HostShared {
                translator: options.translator(),
                memory,
                heap,
                devices,
                sink: RwLock::new(None),
                mirrors: RwLock::new(HashMap::new()),
                wrap_lock: Mutex::new(()),
                stats: ThunkStats::new(),
            }),
        })
    }

    /// Register the guest callback that runs on teardown.
    pub fn set_teardown_sink(&self, sink: Weak<dyn TeardownSink>) {
        *self.shared.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    pub fn translator(&self) -> AddressTranslator {
        self.shared.translator
    }

    pub(crate) fn memory(&self) -> &dyn SharedMemory {
        &*self.shared.memory
    }

    pub(crate) fn devices(&self) -> &dyn DeviceRegistry {
        &*self.shared.devices
    }

    pub(crate) fn stats_counters(&self) -> &ThunkStats {
        &self.shared.stats
    }

    pub fn stats(&self) -> ThunkStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn mirror_count(&self) -> usize {
        self.shared
            .mirrors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Resolve a guest handle to its mirror.
    pub fn resolve(&self, handle: GuestPtr) -> Result<Arc<HostMirror>> {
        if handle.is_null() {
            return Err(ThunkError::UnknownHandle(handle));
        }
        let record = self.shared.translator.to_host(handle);
        self.lookup_record(record)
            .ok_or(ThunkError::UnknownHandle(handle))
    }

    fn lookup_record(&self, record: HostPtr) -> Option<Arc<HostMirror>> {
        self.shared
            .mirrors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&record)
            .cloned()
    }

    /// Reverse lookup from a raw host object to its mirror. Never allocates.
    pub fn state_from_host(&self, host: &dyn HostDeviceChild) -> Option<Arc<HostMirror>> {
        let Some(slot) = host.get_private_data_interface(&iid::AERO_STATE_MIRROR) else {
            trace!(host = %host.host_ptr(), "host object has no mirror");
            return None;
        };
        let record = HostPtr(slot.interface_ptr());
        let mirror = self.lookup_record(record);
        // The slot reference is dropped on every path, including foreign values.
        slot.release();
        if mirror.is_none() {
            warn!(host = %host.host_ptr(), %record, "mirror slot points at an unknown record");
        }
        mirror
    }

    /// Return the mirror bound to `host`, binding a new one if there is none yet.
    ///
    /// Concurrent callers for the same host object serialize on the wrap lock, so at most one
    /// mirror is ever attached.
    pub fn wrap_or_resolve(&self, kind: StateKind, host: HostRef) -> Result<Arc<HostMirror>> {
        let _guard = self
            .shared
            .wrap_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = self.state_from_host(&*host) {
            if existing.kind != kind {
                return Err(ThunkError::KindMismatch {
                    expected: kind,
                    actual: existing.kind,
                });
            }
            return Ok(existing);
        }
        self.bind(kind, host)
    }

    fn bind(&self, kind: StateKind, host: HostRef) -> Result<Arc<HostMirror>> {
        let shared = &self.shared;
        let handle = shared.heap.alloc(PROXY_RECORD_BYTES).map_err(|err| {
            warn!(kind = kind.name(), %err, "out of memory allocating proxy record");
            ThunkError::from(err)
        })?;
        let record = shared.translator.to_host(handle);
        if let Err(err) = shared
            .memory
            .write(record, &[0u8; PROXY_RECORD_BYTES as usize])
        {
            self.free_record(handle);
            return Err(err.into());
        }

        let legacy = self.resolve_legacy(kind, &host);
        let mirror = Arc::new(HostMirror {
            kind,
            handle,
            record,
            current: host.clone(),
            legacy,
            shadow_refcount: AtomicU32::new(0),
            shared: Arc::downgrade(shared),
        });
        shared
            .mirrors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record, mirror.clone());

        let hr = host.set_private_data_interface(&iid::AERO_STATE_MIRROR, Some(mirror.clone()));
        if let Err(err) = ThunkError::check(hr) {
            warn!(host = %host.host_ptr(), ?hr, "failed to attach state mirror");
            shared
                .mirrors
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&record);
            self.free_record(handle);
            return Err(err);
        }

        shared.stats.inc_mirrors_bound();
        debug!(
            %handle,
            kind = kind.name(),
            host = %host.host_ptr(),
            legacy = mirror.legacy().is_some(),
            "bound state mirror"
        );
        Ok(mirror)
    }

    fn resolve_legacy(&self, kind: StateKind, host: &HostRef) -> LegacyBinding {
        let riid = kind.legacy_capability_iid();
        match host.query_interface(&riid) {
            Ok(iface) => {
                // The mirror rides on the host object's lifetime; keep no counted reference.
                iface.release();
                LegacyBinding::Bound(iface)
            }
            Err(hr) => {
                warn!(host = %host.host_ptr(), %riid, ?hr, "legacy interface unavailable");
                self.shared.stats.inc_legacy_capability_failures();
                LegacyBinding::Unsupported
            }
        }
    }

    fn free_record(&self, handle: GuestPtr) {
        if let Err(err) = self.shared.heap.free(handle) {
            error!(%handle, %err, "failed to free proxy record");
        }
    }
}
