//! End-to-end pass over the state-object thunk: create, query both families, read descriptors,
//! attach private data and tear down.

use aero_d3d11_thunk::testing::{init_tracing, FakeHostState, ThunkHarness};
use aero_d3d11_thunk::Interface;
use aero_thunk_abi::{DescRevision, Family, Guid, HResult, StateKind};

const NAME_KEY: Guid = Guid::from_u128(0x429b8c22_9188_4b0c_8742_acb0bf85c200);

#[test]
fn d3d11_state_thunk_smoke() {
    init_tracing();
    let harness = ThunkHarness::new();

    let states: Vec<_> = StateKind::ALL
        .into_iter()
        .map(FakeHostState::new)
        .collect();
    let facades: Vec<_> = states
        .iter()
        .map(|state| harness.create_state(state).unwrap())
        .collect();
    assert_eq!(harness.guest.live_proxies(), 4);
    assert_eq!(harness.host.mirror_count(), 4);

    for (state, current) in states.iter().zip(&facades) {
        let kind = state.kind();
        let legacy = match current.query_interface(&kind.legacy_capability_iid()) {
            Ok(Interface::D3D10(iface)) => iface,
            other => panic!("{kind:?}: unexpected legacy query result {other:?}"),
        };

        let size = kind.desc_size(Family::D3D10, DescRevision::Base).unwrap();
        let mut desc = vec![0u8; size];
        assert_eq!(legacy.get_desc(&mut desc), HResult::S_OK);
        assert_eq!(
            Some(desc),
            state.expected_desc(Family::D3D10, DescRevision::Base)
        );

        assert_eq!(
            current.set_private_data(&NAME_KEY, Some(kind.name().as_bytes())),
            HResult::S_OK
        );
        let mut name = [0u8; 32];
        let mut len = name.len() as u32;
        assert_eq!(
            legacy.get_private_data(&NAME_KEY, &mut len, Some(&mut name)),
            HResult::S_OK
        );
        assert_eq!(&name[..len as usize], kind.name().as_bytes());

        assert_eq!(legacy.release(), 1);
    }

    for (state, current) in states.iter().zip(&facades) {
        assert_eq!(current.release(), 0);
        assert_eq!(state.destroy_count(), 1);
    }

    let stats = harness.host.stats();
    assert_eq!(stats.mirrors_bound, 4);
    assert_eq!(stats.teardowns, 4);
    assert_eq!(stats.coverage_defects, 0);
    assert_eq!(stats.legacy_capability_failures, 0);
    assert_eq!(harness.heap.live_allocations(), 0);
}
