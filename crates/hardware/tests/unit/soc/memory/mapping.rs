//! Address Mapping Unit Tests.
//!
//! Verifies the built-in geometries and the decoder over every bit order.

use cxlsim_core::common::GIB;
use cxlsim_core::config::MediaProfile;
use cxlsim_core::soc::memory::mapping::{AddressDecoder, AddressMapping};
use proptest::prelude::*;
use rstest::rstest;
use std::collections::HashSet;

const MAPPINGS: [AddressMapping; 3] =
    [AddressMapping::RoRaBaCoCh, AddressMapping::RoRaBaChCo, AddressMapping::RoCoRaBaCh];

#[rstest]
#[case(MediaProfile::Ddr4_2400_16x4, 64, 8192, 32 * GIB)]
#[case(MediaProfile::Ddr4_2400_8x8, 64, 8192, 16 * GIB)]
#[case(MediaProfile::Ddr4_2400_4x16, 64, 8192, 4 * GIB)]
#[case(MediaProfile::Nvm_2400_1x64, 64, 256, 512 * GIB)]
fn profile_geometry(#[case] profile: MediaProfile, #[case] burst: u64, #[case] row: u64, #[case] capacity: u64) {
    let g = profile.baseline().geometry;
    assert!(g.validate().is_ok());
    assert_eq!(g.burst_size(), burst);
    assert_eq!(g.row_buffer_size(), row);
    assert_eq!(g.capacity(), capacity);
}

#[test]
fn one_row_of_bursts_maps_to_distinct_coordinates() {
    let g = MediaProfile::Ddr4_2400_16x4.baseline().geometry;
    for mapping in MAPPINGS {
        let d = AddressDecoder::new(g, mapping);
        let stride = d.row_stride();
        let coords: HashSet<_> = (0..stride / 64).map(|i| d.decode(i * 64)).collect();
        assert_eq!(coords.len() as u64, stride / 64, "{mapping:?}");
    }
}

#[test]
fn offsets_within_a_burst_decode_alike() {
    let g = MediaProfile::Ddr4_2400_16x4.baseline().geometry;
    let d = AddressDecoder::new(g, AddressMapping::RoRaBaCoCh);
    assert_eq!(d.decode(0x1040), d.decode(0x107F));
    assert_eq!(d.burst_align(0x107F), 0x1040);
}

proptest! {
    #[test]
    fn decoded_fields_stay_in_range(offset in 0u64..(32 * GIB), m in 0usize..3) {
        let g = MediaProfile::Ddr4_2400_16x4.baseline().geometry;
        let c = AddressDecoder::new(g, MAPPINGS[m]).decode(offset);
        prop_assert!((c.channel as u64) < g.channels);
        prop_assert!((c.rank as u64) < g.ranks_per_channel);
        prop_assert!((c.bank as u64) < g.banks_per_rank);
        prop_assert!(c.row < g.rows_per_bank());
        prop_assert!(c.column < g.columns_per_row());
    }
}
