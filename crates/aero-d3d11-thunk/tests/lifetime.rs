use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use aero_d3d11_thunk::testing::{
    init_tracing, FakeDevices, FakeHostOptions, FakeHostState, ThunkHarness,
};
use aero_d3d11_thunk::{GuestContext, HostDispatcher, HostThunk, Interface, ThunkOptions, Unknown};
use aero_thunk_abi::{iid, GuestPtr, HResult, HostPtr, StateKind, VecSharedMemory};

#[test]
fn host_release_tears_down_exactly_once() {
    init_tracing();
    let harness = ThunkHarness::new();
    let state = FakeHostState::new(StateKind::Blend);
    let current = harness.create_state(&state).unwrap();
    let record = current.proxy().record();
    let mirror = harness.bind(&state).unwrap();
    assert_eq!(mirror.shadow_refcount(), 1);
    assert!(harness.heap.is_live(record));

    assert_eq!(current.release(), 0);
    assert_eq!(state.destroy_count(), 1);
    assert_eq!(mirror.shadow_refcount(), 0);
    assert!(!harness.heap.is_live(record));
    assert!(harness.guest.proxy(record).is_none());
    assert_eq!(harness.host.mirror_count(), 0);
    assert_eq!(harness.host.stats().teardowns, 1);
    assert!(harness.host.state_from_host(&*state).is_none());
}

#[test]
fn host_side_references_keep_the_proxy_alive() {
    let harness = ThunkHarness::new();
    let state = FakeHostState::new(StateKind::Sampler);
    let current = harness.create_state(&state).unwrap();

    // Another host component holds its own reference, e.g. a bound pipeline slot.
    Unknown::add_ref(&*state);
    assert_eq!(current.release(), 1);
    assert_eq!(harness.guest.live_proxies(), 1);
    assert_eq!(harness.host.stats().teardowns, 0);

    // The host can still hand the object back to the guest.
    let mirror = harness.host.state_from_host(&*state).unwrap();
    let again = harness.guest.init_state(mirror.kind(), mirror.handle()).unwrap();
    assert_eq!(again, current);

    Unknown::release(&*state);
    assert_eq!(state.destroy_count(), 1);
    assert_eq!(harness.guest.live_proxies(), 0);
}

#[test]
fn stale_handles_fail_cleanly() {
    init_tracing();
    let harness = ThunkHarness::new();
    let state = FakeHostState::new(StateKind::Rasterizer);
    let current = harness.create_state(&state).unwrap();
    let legacy = current
        .query_interface(&iid::ID3D10_RASTERIZER_STATE)
        .unwrap()
        .into_d3d10()
        .unwrap();
    legacy.release();
    current.release();
    assert_eq!(state.destroy_count(), 1);

    assert_eq!(current.add_ref(), 0);
    assert_eq!(current.release(), 0);
    assert_eq!(legacy.add_ref(), 0);
    assert_eq!(
        current.query_interface(&iid::ID3D11_RASTERIZER_STATE),
        Err(HResult::E_INVALIDARG)
    );
    assert_eq!(
        legacy.query_interface(&iid::ID3D10_RASTERIZER_STATE),
        Err(HResult::E_INVALIDARG)
    );
    let mut desc = [0u8; 40];
    assert_eq!(current.get_desc(&mut desc), HResult::E_INVALIDARG);
    assert_eq!(legacy.get_desc(&mut desc), HResult::E_INVALIDARG);
    assert_eq!(current.get_device(), None);
    assert_eq!(state.destroy_count(), 1);
    assert_eq!(harness.host.stats().teardowns, 1);

    assert!(harness.host.resolve(GuestPtr::NULL).is_err());
    assert_eq!(
        harness
            .host
            .resolve(current.proxy().record())
            .unwrap_err()
            .hresult(),
        HResult::E_INVALIDARG
    );
}

#[test]
fn create_release_cycles_leak_nothing() {
    const CYCLES: u64 = 10_000;

    let harness = ThunkHarness::new();
    for i in 0..CYCLES {
        let kind = StateKind::ALL[i as usize % StateKind::ALL.len()];
        let state = FakeHostState::new(kind);
        let current = harness.create_state(&state).unwrap();
        let legacy = current
            .query_interface(&kind.legacy_capability_iid())
            .unwrap();
        assert_eq!(legacy.release(), 1);
        assert_eq!(current.release(), 0);
        assert_eq!(state.destroy_count(), 1);
        assert_eq!(state.refcount(), 0);
    }

    let stats = harness.host.stats();
    assert_eq!(stats.mirrors_bound, CYCLES);
    assert_eq!(stats.teardowns, CYCLES);
    assert_eq!(harness.host.mirror_count(), 0);
    assert_eq!(harness.guest.live_proxies(), 0);
    assert_eq!(harness.heap.live_bytes(), 0);
    assert_eq!(harness.heap.live_allocations(), 0);
    // Freed records are reused rather than marching through the heap.
    assert!(harness.heap.high_water_bytes() < 4096);
}

#[test]
fn concurrent_first_wrap_binds_one_mirror() {
    let harness = ThunkHarness::new();
    for _ in 0..32 {
        let state = FakeHostState::new(StateKind::DepthStencil);
        let handles: Vec<GuestPtr> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| harness.bind(&state).unwrap().handle()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(handles.windows(2).all(|w| w[0] == w[1]));

        let mirror = harness.bind(&state).unwrap();
        assert_eq!(mirror.shadow_refcount(), 1);
        let current = harness.guest.init_state(mirror.kind(), mirror.handle()).unwrap();
        drop(mirror);
        current.release();
        assert_eq!(state.destroy_count(), 1);
    }
    assert_eq!(harness.host.stats().mirrors_bound, 32);
    assert_eq!(harness.host.mirror_count(), 0);
}

#[test]
fn concurrent_refcount_traffic_is_balanced() {
    let harness = ThunkHarness::new();
    let state = FakeHostState::new(StateKind::Blend);
    let current = harness.create_state(&state).unwrap();
    let legacy = match current.query_interface(&iid::ID3D10_BLEND_STATE1).unwrap() {
        Interface::D3D10(iface) => iface,
        Interface::D3D11(_) => panic!("expected the legacy façade"),
    };

    thread::scope(|s| {
        for worker in 0..8 {
            let current = current.clone();
            let legacy = legacy.clone();
            s.spawn(move || {
                for _ in 0..500 {
                    if worker % 2 == 0 {
                        assert!(current.add_ref() >= 3);
                        assert!(current.release() >= 2);
                    } else {
                        assert!(legacy.add_ref() >= 3);
                        assert!(legacy.release() >= 2);
                    }
                }
            });
        }
    });

    assert_eq!(state.refcount(), 2);
    legacy.release();
    current.release();
    assert_eq!(state.destroy_count(), 1);
}

#[test]
fn guest_private_interfaces_may_point_at_other_proxies() {
    let harness = ThunkHarness::new();
    let outer = FakeHostState::new(StateKind::Blend);
    let inner = FakeHostState::new(StateKind::Sampler);
    let outer_iface = harness.create_state(&outer).unwrap();
    let inner_iface = harness.create_state(&inner).unwrap();

    let key = iid::ID3D11_SAMPLER_STATE;
    let value: Arc<dyn Unknown> = Arc::new(inner_iface.clone());
    assert_eq!(
        outer_iface.set_private_data_interface(&key, Some(value)),
        HResult::S_OK
    );
    assert_eq!(inner.refcount(), 2);

    // Dropping the creator reference leaves the store's reference.
    inner_iface.release();
    assert_eq!(inner.destroy_count(), 0);

    // Tearing down the outer proxy releases the inner object through the gate.
    outer_iface.release();
    assert_eq!(outer.destroy_count(), 1);
    assert_eq!(inner.destroy_count(), 1);
    assert_eq!(harness.host.stats().teardowns, 2);
    assert_eq!(harness.guest.live_proxies(), 0);
}

#[test]
fn rejects_heap_outside_memory() {
    let options = ThunkOptions {
        memory_bytes: 0x1000,
        ..ThunkOptions::default()
    };
    let err = ThunkHarness::with_options(options).err().unwrap();
    assert_eq!(err.hresult(), HResult::E_INVALIDARG);
}

#[test]
fn heap_exhaustion_leaves_no_partial_state() {
    init_tracing();
    let options = ThunkOptions {
        heap_bytes: 16,
        ..ThunkOptions::default()
    };
    let harness = ThunkHarness::with_options(options).unwrap();
    let first = FakeHostState::new(StateKind::Blend);
    let first_iface = harness.create_state(&first).unwrap();
    assert_eq!(harness.heap.live_allocations(), 1);

    let second = FakeHostState::new(StateKind::Sampler);
    let err = harness.create_state(&second).unwrap_err();
    assert_eq!(err.hresult(), HResult::E_OUTOFMEMORY);
    assert_eq!(harness.host.mirror_count(), 1);
    assert_eq!(harness.guest.live_proxies(), 1);
    assert_eq!(harness.heap.live_allocations(), 1);
    assert!(!second.private_store().contains(&iid::AERO_STATE_MIRROR));
    assert!(harness.host.state_from_host(&*second).is_none());
    assert_eq!(second.refcount(), 1);
    assert_eq!(harness.host.stats().mirrors_bound, 1);

    // Once the first record is freed the second object binds normally.
    first_iface.release();
    let second_iface = harness.create_state(&second).unwrap();
    second_iface.release();
    assert_eq!(second.destroy_count(), 1);
    assert_eq!(harness.heap.live_allocations(), 0);
}

#[test]
fn failed_mirror_attach_is_rolled_back() {
    init_tracing();
    let harness = ThunkHarness::new();
    let state = FakeHostState::with_options(
        StateKind::DepthStencil,
        FakeHostOptions {
            reject_mirror_attach: true,
            ..FakeHostOptions::default()
        },
    );

    let err = harness.create_state(&state).unwrap_err();
    assert_eq!(err.hresult(), HResult::E_FAIL);
    assert_eq!(harness.host.mirror_count(), 0);
    assert_eq!(harness.guest.live_proxies(), 0);
    assert_eq!(harness.heap.live_allocations(), 0);
    assert!(!state.private_store().contains(&iid::AERO_STATE_MIRROR));
    assert!(harness.host.state_from_host(&*state).is_none());
    // The legacy capability query was balanced.
    assert_eq!(state.refcount(), 1);
    assert_eq!(harness.host.stats().mirrors_bound, 0);

    Unknown::release(&*state);
    assert_eq!(state.destroy_count(), 1);
    assert_eq!(harness.host.stats().teardowns, 0);
}

#[derive(Default)]
struct Foreign(AtomicU32);

impl Unknown for Foreign {
    fn add_ref(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::SeqCst) - 1
    }

    fn interface_ptr(&self) -> u64 {
        0x7f00_1234_5678
    }
}

#[test]
fn reverse_lookup_releases_foreign_mirror_slots() {
    init_tracing();
    let harness = ThunkHarness::new();
    let state = FakeHostState::new(StateKind::Rasterizer);
    let foreign = Arc::new(Foreign::default());
    state
        .private_store()
        .set_interface(&iid::AERO_STATE_MIRROR, Some(foreign.clone()));
    assert_eq!(foreign.0.load(Ordering::SeqCst), 1);

    assert!(harness.host.state_from_host(&*state).is_none());
    assert!(harness.host.state_from_host(&*state).is_none());
    assert_eq!(foreign.0.load(Ordering::SeqCst), 1);

    // Reverse lookups of a bound object leave the shadow count alone.
    let bound = FakeHostState::new(StateKind::Blend);
    let iface = harness.create_state(&bound).unwrap();
    let mirror = harness.host.state_from_host(&*bound).unwrap();
    assert_eq!(mirror.shadow_refcount(), 1);
    drop(mirror);
    iface.release();

    state.private_store().cleanup();
    assert_eq!(foreign.0.load(Ordering::SeqCst), 0);
}

#[test]
fn constructors_validate_the_layout() {
    let bad = ThunkOptions {
        heap_bytes: 0,
        ..ThunkOptions::default()
    };
    let memory = Arc::new(VecSharedMemory::new(HostPtr(bad.guest_base), bad.memory_bytes));
    let heap = Arc::new(ThunkOptions::default().shared_heap());
    let devices = Arc::new(FakeDevices::new());

    let err = HostThunk::new(&bad, memory.clone(), heap.clone(), devices.clone())
        .err()
        .unwrap();
    assert_eq!(err.hresult(), HResult::E_INVALIDARG);

    let good = ThunkOptions::default();
    let host = HostThunk::new(&good, memory.clone(), heap.clone(), devices.clone()).unwrap();
    let gate = Arc::new(HostDispatcher::new(host));
    let guest = GuestContext::new(
        &bad,
        gate.clone(),
        memory.clone(),
        heap.clone(),
        devices.clone(),
    );
    assert!(guest.is_err());
    assert!(GuestContext::new(&good, gate, memory, heap, devices).is_ok());
}
