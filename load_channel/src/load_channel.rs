//! The per-load owner of tablet channels.

use std::{fmt::Debug, sync::Arc};

use hashbrown::HashMap;
use load_types::{
    AddChunkRequest, AddChunkResponse, Chunk, IndexId, LoadId, OpenRequest, Schema,
    SegmentRequest, SegmentResponse, Status, TabletId,
};
use observability_deps::tracing::{Span, debug, info, info_span, warn};
use parking_lot::Mutex;

use crate::tablet_channel::{TabletChannel, TabletChannelDeps};

pub mod mock;

/// What a [`TabletChannel`] needs from the load that owns it.
pub trait LoadChannelOwner: Debug + Send + Sync {
    /// Called once by a tablet channel after it committed and closed.
    fn remove_tablet_channel(&self, index_id: IndexId);

    /// Parent span for the tablet writers of the load.
    fn span(&self) -> Span;
}

#[derive(Debug, Default)]
struct Channels {
    by_index: HashMap<IndexId, Arc<TabletChannel>>,
    opened: bool,
}

/// The tablet channels of one load, by index.
#[derive(Debug)]
pub struct LoadChannel {
    load_id: LoadId,
    span: Span,
    deps: TabletChannelDeps,
    channels: Mutex<Channels>,
}

impl LoadChannel {
    pub fn new(load_id: LoadId, deps: TabletChannelDeps) -> Arc<Self> {
        Arc::new(Self {
            load_id,
            span: info_span!("load", %load_id),
            deps,
            channels: Mutex::new(Channels::default()),
        })
    }

    pub fn load_id(&self) -> LoadId {
        self.load_id
    }

    /// Open the tablet channel of `request.index_id`. Opening an index twice is a no-op.
    pub fn open(self: &Arc<Self>, request: &OpenRequest, schema: &Schema) -> Status {
        let mut channels = self.channels.lock();
        if channels.by_index.contains_key(&request.index_id) {
            debug!(load_id = %self.load_id, index_id = %request.index_id, "index already open");
            return Status::ok();
        }

        let owner: Arc<dyn LoadChannelOwner> = Arc::clone(self) as _;
        match TabletChannel::open(Arc::downgrade(&owner), &self.deps, request, schema) {
            Ok(channel) => {
                channels.by_index.insert(request.index_id, Arc::new(channel));
                channels.opened = true;
                Status::ok()
            }
            Err(error) => {
                warn!(
                    load_id = %self.load_id,
                    index_id = %request.index_id,
                    %error,
                    "failed to open tablet channel"
                );
                error.into()
            }
        }
    }

    /// Route a packet to the tablet channel of its index.
    pub async fn add_chunk(
        &self,
        chunk: Option<Arc<Chunk>>,
        request: &AddChunkRequest,
        response: &mut AddChunkResponse,
    ) {
        let Some(channel) = self.channel(request.index_id) else {
            response.status = Status::internal_error(
                "cannot find the tablets channel associated with the index id",
            );
            return;
        };
        channel.add_chunk(chunk, request, response).await;
    }

    pub async fn add_segment(&self, request: SegmentRequest) -> SegmentResponse {
        let Some(channel) = self.channel(request.index_id) else {
            return SegmentResponse {
                status: Status::internal_error(
                    "cannot find the tablets channel associated with the index id",
                ),
            };
        };
        channel.add_segment(request).await
    }

    /// Cancel and drop every tablet channel of the load.
    pub fn cancel(&self) {
        let channels = std::mem::take(&mut self.channels.lock().by_index);
        for channel in channels.values() {
            channel.cancel();
        }
        info!(load_id = %self.load_id, indexes = channels.len(), "cancelled load");
    }

    /// Abort the given tablets of index `index_id`.
    pub fn cancel_tablets(&self, index_id: IndexId, tablet_ids: &[TabletId]) {
        if let Some(channel) = self.channel(index_id) {
            for tablet_id in tablet_ids {
                channel.cancel_tablet(*tablet_id);
            }
        }
    }

    /// Whether every tablet channel opened so far has closed.
    pub fn is_finished(&self) -> bool {
        let channels = self.channels.lock();
        channels.opened && channels.by_index.is_empty()
    }

    fn channel(&self, index_id: IndexId) -> Option<Arc<TabletChannel>> {
        self.channels.lock().by_index.get(&index_id).map(Arc::clone)
    }
}

impl LoadChannelOwner for LoadChannel {
    fn remove_tablet_channel(&self, index_id: IndexId) {
        if self.channels.lock().by_index.remove(&index_id).is_some() {
            debug!(load_id = %self.load_id, %index_id, "tablet channel closed");
        }
    }

    fn span(&self) -> Span {
        self.span.clone()
    }
}

#[cfg(test)]
mod tests {
    use load_types::{IndexSchema, NodeId, StatusCode, TabletWithPartition, TxnId};
    use metric::Registry;

    use super::*;
    use crate::{
        TabletChannelMetrics,
        storage::mock::{MockTabletManager, MockTxnManager},
        writer::mock::MockTabletWriterFactory,
    };

    const LOAD: LoadId = LoadId::new(1, 2);

    fn load(factory: &Arc<MockTabletWriterFactory>) -> Arc<LoadChannel> {
        LoadChannel::new(
            LOAD,
            TabletChannelDeps {
                writer_factory: Arc::clone(factory) as _,
                tablet_manager: Arc::new(MockTabletManager::default()),
                txn_manager: Arc::new(MockTxnManager::default()),
                metrics: Arc::new(TabletChannelMetrics::new(&Registry::new())),
                options: Default::default(),
            },
        )
    }

    fn schema() -> Schema {
        Schema {
            columns: vec![],
            indexes: [1, 2]
                .into_iter()
                .map(|id| IndexSchema {
                    index_id: IndexId::new(id),
                    schema_hash: 0,
                    columns: vec![],
                })
                .collect(),
        }
    }

    fn open_request(index_id: i64, tablets: &[i64]) -> OpenRequest {
        OpenRequest {
            load_id: LOAD,
            index_id: IndexId::new(index_id),
            txn_id: TxnId::new(1),
            node_id: NodeId::new(1),
            tablets: tablets
                .iter()
                .map(|&t| TabletWithPartition::new(t, 1))
                .collect(),
            num_senders: 1,
            is_replicated_storage: false,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn open_is_idempotent() {
        let factory = Arc::new(MockTabletWriterFactory::default());
        let load = load(&factory);
        assert!(!load.is_finished());

        assert!(load.open(&open_request(1, &[10, 11]), &schema()).is_ok());
        assert!(load.open(&open_request(1, &[10, 11]), &schema()).is_ok());
        assert_eq!(factory.opened().len(), 2);

        let status = load.open(&open_request(3, &[12]), &schema());
        assert_eq!(status.code, StatusCode::InvalidArgument);
        assert!(!load.is_finished());
    }

    #[tokio::test]
    async fn missing_index() {
        let factory = Arc::new(MockTabletWriterFactory::default());
        let load = load(&factory);

        let request = AddChunkRequest {
            index_id: IndexId::new(2),
            ..Default::default()
        };
        let mut response = AddChunkResponse::default();
        load.add_chunk(None, &request, &mut response).await;
        assert_eq!(response.status.code, StatusCode::InternalError);
        assert_eq!(
            response.status.error_msgs,
            vec!["cannot find the tablets channel associated with the index id"]
        );
    }

    #[tokio::test]
    async fn closed_channel_is_removed() {
        let factory = Arc::new(MockTabletWriterFactory::default());
        let load = load(&factory);
        assert!(load.open(&open_request(1, &[10]), &schema()).is_ok());
        assert!(load.open(&open_request(2, &[20]), &schema()).is_ok());

        let request = |index_id: i64| AddChunkRequest {
            load_id: LOAD,
            index_id: IndexId::new(index_id),
            txn_id: TxnId::new(1),
            sender_id: Some(0),
            packet_seq: Some(0),
            eos: true,
            partition_ids: vec![load_types::PartitionId::new(1)],
            ..Default::default()
        };

        let mut response = AddChunkResponse::default();
        load.add_chunk(None, &request(1), &mut response).await;
        assert!(response.status.is_ok());
        assert_eq!(factory.writer(10).commits(), 1);
        assert!(!load.is_finished());

        let mut response = AddChunkResponse::default();
        load.add_chunk(None, &request(2), &mut response).await;
        assert!(response.status.is_ok());
        assert!(load.is_finished());
    }

    #[test]
    fn cancel_aborts_every_index() {
        let factory = Arc::new(MockTabletWriterFactory::default());
        let load = load(&factory);
        assert!(load.open(&open_request(1, &[10, 11]), &schema()).is_ok());
        assert!(load.open(&open_request(2, &[20]), &schema()).is_ok());

        load.cancel_tablets(IndexId::new(1), &[TabletId::new(11)]);
        assert_eq!(factory.writer(11).aborts(), 1);
        assert_eq!(factory.writer(10).aborts(), 0);

        load.cancel();
        for t in [10, 20] {
            assert_eq!(factory.writer(t).aborts(), 1);
        }
        assert!(load.is_finished());
    }
}
