use aero_thunk_abi::{AddressTranslator, GuestPtr, HostPtr, GUEST_WINDOW_BYTES};
use proptest::prelude::*;

fn arb_guest_base() -> impl Strategy<Value = u64> {
    // Keep the whole window representable in 64 bits.
    prop_oneof![
        Just(0u64),
        Just(0x1_0000_0000u64),
        (0u64..0x7fff_ffffu64).prop_map(|page| page << 16),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn guest_round_trips_through_host(base in arb_guest_base(), addr in any::<u32>()) {
        let t = AddressTranslator::new(base);
        let g = GuestPtr(addr);
        let h = t.to_host(g);
        prop_assert_eq!(t.to_guest(h), g);
        prop_assert_eq!(t.try_to_guest(h), Some(g));
        if !g.is_null() {
            prop_assert_eq!(h.0, base + addr as u64);
            prop_assert!(t.is_guest_addressable(h));
        }
    }

    #[test]
    fn host_addresses_past_the_window_are_rejected(
        base in arb_guest_base(),
        past in 0u64..0x1_0000,
    ) {
        let t = AddressTranslator::new(base);
        let h = HostPtr(base + GUEST_WINDOW_BYTES + past);
        prop_assert_eq!(t.try_to_guest(h), None);
    }
}

#[test]
fn null_stays_null_for_every_base() {
    for base in [0u64, 0x1000, 0x1_0000_0000, 0x7ff0_0000_0000] {
        let t = AddressTranslator::new(base);
        assert_eq!(t.to_host(GuestPtr::NULL), HostPtr::NULL);
        assert_eq!(t.to_guest(HostPtr::NULL), GuestPtr::NULL);
    }
}
