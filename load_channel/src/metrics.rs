use metric::{Registry, U64Counter, U64Gauge};

pub const TABLET_WRITER_COUNT_METRIC: &str = "load_tablet_writer_count";
pub const REPLAYED_PACKETS_METRIC: &str = "load_tablet_channel_replayed_packets";
pub const REPLICA_WAIT_TIMEOUTS_METRIC: &str = "load_tablet_channel_replica_wait_timeouts";

/// Instruments shared by every tablet channel of a process.
///
/// Create once at startup and hand the same `Arc` to every channel.
#[derive(Debug)]
pub struct TabletChannelMetrics {
    pub(crate) tablet_writer_count: U64Gauge,
    pub(crate) replayed_packets: U64Counter,
    pub(crate) replica_wait_timeouts: U64Counter,
}

impl TabletChannelMetrics {
    pub fn new(registry: &Registry) -> Self {
        let tablet_writer_count = registry
            .register_metric::<U64Gauge>(
                TABLET_WRITER_COUNT_METRIC,
                "tablet writers currently owned by open tablet channels",
            )
            .recorder([]);
        let replayed_packets = registry
            .register_metric::<U64Counter>(
                REPLAYED_PACKETS_METRIC,
                "packets answered OK because they had already been applied",
            )
            .recorder([]);
        let replica_wait_timeouts = registry
            .register_metric::<U64Counter>(
                REPLICA_WAIT_TIMEOUTS_METRIC,
                "channel closes that stopped waiting on secondary replicas",
            )
            .recorder([]);
        Self {
            tablet_writer_count,
            replayed_packets,
            replica_wait_timeouts,
        }
    }
}
