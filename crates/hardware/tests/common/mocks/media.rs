use cxlsim_core::common::{AccessKind, Tick};
use cxlsim_core::soc::memory::mapping::MediaCoord;
use cxlsim_core::soc::memory::media::{MediaAccess, MediaInterface, MediaKind};
use cxlsim_core::stats::MediaStats;
use mockall::mock;

mock! {
    pub Media {}

    impl MediaInterface for Media {
        fn kind(&self) -> MediaKind;
        fn access(&mut self, coord: MediaCoord, kind: AccessKind, at: Tick) -> MediaAccess;
        fn is_row_hit(&self, coord: MediaCoord) -> bool;
        fn static_latency(&self) -> Tick;
        fn command_slot(&self) -> Tick;
        fn stats(&self) -> MediaStats;
    }
}

/// A media mock whose row `open_row` is always open and whose accesses take `latency`.
///
/// Every access is appended to `log` as `(row, kind, tick)`.
pub fn open_row_media(
    open_row: u64,
    latency: Tick,
    log: std::sync::Arc<std::sync::Mutex<Vec<(u64, AccessKind, Tick)>>>,
) -> MockMedia {
    let mut media = MockMedia::new();
    media.expect_kind().return_const(MediaKind::Dram);
    media.expect_static_latency().return_const(0u64);
    media.expect_command_slot().return_const(1u64);
    media.expect_stats().returning(MediaStats::default);
    media.expect_is_row_hit().returning(move |c| c.row == open_row);
    media.expect_access().returning(move |coord, kind, at| {
        log.lock().unwrap().push((coord.row, kind, at));
        MediaAccess {
            activated_at: None,
            precharged_at: None,
            issued_at: at,
            ready_at: at + latency,
            row_hit: coord.row == open_row,
        }
    });
    media
}
