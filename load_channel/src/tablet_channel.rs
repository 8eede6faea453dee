//! The tablet channel: fan-out of sender packets to the tablet writers of one index.
//!
//! A [`TabletChannel`] is opened once per (load, index) pair on every node hosting tablets of
//! that index. Each upstream sender streams numbered packets of rows into it; the channel
//! deduplicates retried packets per sender, scatters the rows of each packet to the writers of
//! their tablets and, once every sender delivered its eos packet, commits the tablets that
//! received data and aborts the rest.

use std::{
    fmt::Display,
    sync::{Arc, Weak},
    time::Duration,
};

use hashbrown::{HashMap, HashSet};
use load_types::{
    AddChunkRequest, AddChunkResponse, Chunk, IndexId, LoadId, NodeId, OpenRequest, PartitionId,
    Schema, SegmentRequest, SegmentResponse, Status, TabletId, TxnId,
};
use observability_deps::tracing::{Span, debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    load_channel::LoadChannelOwner,
    metrics::TabletChannelMetrics,
    scatter::RowScatter,
    sender::{Admission, SenderSlot},
    storage::{TabletManager, TxnManager},
    write_context::{WriteCallback, WriteContext},
    writer::{
        GlobalDicts, ReplicaState, SegmentCallback, TabletWriter, TabletWriterError,
        TabletWriterFactory, WriteRequest, WriterOptions,
    },
};

/// Identifies a tablet channel: the index `index_id` of load `load_id`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TabletChannelKey {
    pub load_id: LoadId,
    pub index_id: IndexId,
}

impl Display for TabletChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.load_id, self.index_id)
    }
}

/// Tunables of a tablet channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TabletChannelOptions {
    /// How far ahead of its last contiguously completed packet a sender may run.
    pub sliding_window_size: usize,
    /// Poll interval while waiting on secondary replicas.
    pub replica_poll_interval: Duration,
    /// How often to log a secondary replica that is still not settled.
    pub replica_progress_log_interval: Duration,
}

impl TabletChannelOptions {
    /// Three packets in flight for each of the 16 pipelines a sender may run.
    pub const DEFAULT_SLIDING_WINDOW_SIZE: usize = 48;
    pub const DEFAULT_REPLICA_POLL_INTERVAL: Duration = Duration::from_millis(10);
    pub const DEFAULT_REPLICA_PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);
}

impl Default for TabletChannelOptions {
    fn default() -> Self {
        Self {
            sliding_window_size: Self::DEFAULT_SLIDING_WINDOW_SIZE,
            replica_poll_interval: Self::DEFAULT_REPLICA_POLL_INTERVAL,
            replica_progress_log_interval: Self::DEFAULT_REPLICA_PROGRESS_LOG_INTERVAL,
        }
    }
}

/// Services and settings shared by the tablet channels of a node.
#[derive(Debug, Clone)]
pub struct TabletChannelDeps {
    pub writer_factory: Arc<dyn TabletWriterFactory>,
    pub tablet_manager: Arc<dyn TabletManager>,
    pub txn_manager: Arc<dyn TxnManager>,
    pub metrics: Arc<TabletChannelMetrics>,
    pub options: TabletChannelOptions,
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("unknown index id {index_id} for load {load_id}")]
    UnknownIndex { load_id: LoadId, index_id: IndexId },

    #[error(transparent)]
    Writer(#[from] TabletWriterError),
}

impl From<OpenError> for Status {
    fn from(e: OpenError) -> Self {
        match e {
            OpenError::UnknownIndex { .. } => Self::invalid_argument(e.to_string()),
            OpenError::Writer(e) => e.into(),
        }
    }
}

#[derive(Debug)]
struct CloseState {
    remaining_senders: usize,
    touched_partitions: HashSet<PartitionId>,
}

/// The tablet writers of one index of one load, and the senders feeding them.
#[derive(Debug)]
pub struct TabletChannel {
    key: TabletChannelKey,
    txn_id: TxnId,
    node_id: NodeId,
    is_replicated_storage: bool,
    owner: Weak<dyn LoadChannelOwner>,

    /// Never modified after open.
    writers: HashMap<TabletId, Arc<dyn TabletWriter>>,
    /// Ordinal of each tablet in ascending tablet id order.
    sorted_tablet_index: HashMap<TabletId, u32>,
    /// Inverse of `sorted_tablet_index`.
    sorted_tablet_ids: Vec<TabletId>,

    senders: Vec<SenderSlot>,
    close_state: Mutex<CloseState>,

    tablet_manager: Arc<dyn TabletManager>,
    txn_manager: Arc<dyn TxnManager>,
    metrics: Arc<TabletChannelMetrics>,
    options: TabletChannelOptions,
}

impl TabletChannel {
    /// Open one writer per tablet of `request`.
    ///
    /// Fails on the first writer that cannot be opened; the writers opened before it are
    /// dropped and the caller has to open the channel again.
    pub fn open(
        owner: Weak<dyn LoadChannelOwner>,
        deps: &TabletChannelDeps,
        request: &OpenRequest,
        schema: &Schema,
    ) -> Result<Self, OpenError> {
        let key = TabletChannelKey {
            load_id: request.load_id,
            index_id: request.index_id,
        };
        let index = schema
            .index(request.index_id)
            .ok_or(OpenError::UnknownIndex {
                load_id: request.load_id,
                index_id: request.index_id,
            })?;

        let global_dicts: GlobalDicts = schema
            .columns
            .iter()
            .filter(|c| !c.global_dict_words.is_empty())
            .map(|c| {
                let dict = c
                    .global_dict_words
                    .iter()
                    .enumerate()
                    .map(|(code, word)| (word.clone(), code))
                    .collect();
                (c.name.clone(), dict)
            })
            .collect();
        let global_dicts = Arc::new(global_dicts);
        let columns: Arc<[String]> = index.columns.clone().into();
        let parent_span = owner.upgrade().map(|o| o.span()).unwrap_or_else(Span::none);

        let mut writers = HashMap::with_capacity(request.tablets.len());
        for tablet in &request.tablets {
            let options = WriterOptions {
                tablet_id: tablet.tablet_id,
                partition_id: tablet.partition_id,
                load_id: request.load_id,
                index_id: request.index_id,
                txn_id: request.txn_id,
                node_id: request.node_id,
                schema_hash: index.schema_hash,
                columns: Arc::clone(&columns),
                global_dicts: Arc::clone(&global_dicts),
                parent_span: parent_span.clone(),
                timeout_ms: request.timeout_ms,
                is_replicated_storage: request.is_replicated_storage,
                replicas: if request.is_replicated_storage {
                    tablet.replicas.clone()
                } else {
                    vec![]
                },
            };
            let writer = deps.writer_factory.open(options)?;
            writers.insert(tablet.tablet_id, writer);
        }

        let mut sorted_tablet_ids = writers.keys().copied().collect::<Vec<_>>();
        sorted_tablet_ids.sort_unstable();
        let sorted_tablet_index = sorted_tablet_ids
            .iter()
            .enumerate()
            .map(|(ordinal, id)| (*id, ordinal as u32))
            .collect();

        deps.metrics.tablet_writer_count.inc(writers.len() as u64);
        info!(
            load_id = %key.load_id,
            index_id = %key.index_id,
            txn_id = %request.txn_id,
            writers = %writers
                .iter()
                .map(|(id, w)| format!("{id}:{}", w.replica_state()))
                .collect::<Vec<_>>()
                .join(","),
            "opened tablet writers"
        );

        Ok(Self {
            key,
            txn_id: request.txn_id,
            node_id: request.node_id,
            is_replicated_storage: request.is_replicated_storage,
            owner,
            writers,
            sorted_tablet_index,
            sorted_tablet_ids,
            senders: (0..request.num_senders)
                .map(|_| SenderSlot::default())
                .collect(),
            close_state: Mutex::new(CloseState {
                remaining_senders: request.num_senders,
                touched_partitions: HashSet::new(),
            }),
            tablet_manager: Arc::clone(&deps.tablet_manager),
            txn_manager: Arc::clone(&deps.txn_manager),
            metrics: Arc::clone(&deps.metrics),
            options: deps.options,
        })
    }

    pub fn key(&self) -> TabletChannelKey {
        self.key
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Tablet ids of this channel, ascending.
    pub fn tablet_ids(&self) -> &[TabletId] {
        &self.sorted_tablet_ids
    }

    /// Apply one packet of `request.sender_id`.
    ///
    /// `chunk` holds the packet's rows and may only be absent on an eos packet. The outcome is
    /// merged into `response`, which may already carry the outcome of other channels the same
    /// request was routed through.
    pub async fn add_chunk(
        &self,
        chunk: Option<Arc<Chunk>>,
        request: &AddChunkRequest,
        response: &mut AddChunkResponse,
    ) {
        let started = Instant::now();

        let (sender_id, seq) = match self.validate(request) {
            Ok(v) => v,
            Err(status) => {
                response.status.merge(status);
                return;
            }
        };
        let sender = &self.senders[sender_id];
        let window_size = self.options.sliding_window_size;

        match sender.admit(seq, request.eos, window_size) {
            Admission::Accepted => {}
            Admission::Replay => {
                info!(
                    key = %self.key,
                    sender_id,
                    packet_seq = seq,
                    "packet already applied"
                );
                self.metrics.replayed_packets.inc(1);
                return;
            }
            Admission::Rejected(status) => {
                response.status.merge(status);
                return;
            }
        }

        let scatter = match self.scatter(chunk, request) {
            Ok(v) => v,
            Err(status) => {
                sender.forget(seq);
                response.status.merge(status);
                return;
            }
        };

        let context = WriteContext::new();
        if let Some((chunk, scatter)) = scatter {
            for (ordinal, range) in scatter.ranges() {
                let tablet_id = self.sorted_tablet_ids[ordinal];
                let writer = &self.writers[&tablet_id];
                debug!(key = %self.key, %tablet_id, rows = range.len(), "dispatching write");
                writer.write(
                    WriteRequest::new(
                        Arc::clone(&chunk),
                        Arc::clone(scatter.row_indexes()),
                        range,
                    ),
                    WriteCallback::new(&context),
                );
            }
            // The boundaries are no longer needed; the row indexes live on in the requests.
            drop(scatter);
        }

        // Closing only after this packet's writes are submitted keeps every commit behind them.
        let close_channel = request.eos && self.close_sender(sender, &request.partition_ids);
        let committed = if close_channel {
            self.commit_or_abort(&context)
        } else {
            vec![]
        };

        context.release();
        context.wait().await;

        if self.is_replicated_storage && close_channel {
            let timeout = Duration::from_millis(request.timeout_ms.max(0) as u64);
            self.wait_secondary_replicas(started + timeout).await;
        }

        sender.complete(seq, window_size);

        if close_channel {
            self.finish_close(&committed).await;
        }

        context.fill_response(response);
        let elapsed = started.elapsed().as_micros() as i64;
        response.execution_time_us = Some(response.execution_time_us.unwrap_or_default() + elapsed);
        // Lock waits are not measured.
        response.wait_lock_time_us = 0;
    }

    /// Route a segment shipped by a primary replica to the writer of its tablet.
    pub async fn add_segment(&self, request: SegmentRequest) -> SegmentResponse {
        let Some(writer) = self.writers.get(&request.tablet_id) else {
            return SegmentResponse {
                status: Status::internal_error(format!(
                    "tablet_id {} not exists",
                    request.tablet_id
                )),
            };
        };

        let (callback, rx) = SegmentCallback::new();
        writer.write_segment(request, callback);
        let status = match rx.await {
            Ok(Ok(())) => Status::ok(),
            Ok(Err(e)) => e.into(),
            Err(_) => Status::internal_error("tablet writer dropped the segment request"),
        };
        SegmentResponse { status }
    }

    /// Abort every writer of this channel.
    pub fn cancel(&self) {
        for writer in self.writers.values() {
            writer.abort(false);
        }
        info!(
            key = %self.key,
            txn_id = %self.txn_id,
            tablets = ?self.sorted_tablet_ids,
            "cancelled tablet channel"
        );
    }

    /// Abort the writer of `tablet_id`, if this channel has one.
    pub fn cancel_tablet(&self, tablet_id: TabletId) {
        if let Some(writer) = self.writers.get(&tablet_id) {
            writer.abort(true);
        }
    }

    fn validate(&self, request: &AddChunkRequest) -> Result<(usize, i64), Status> {
        let Some(sender_id) = request.sender_id else {
            return Err(Status::invalid_argument("no sender_id in add chunk request"));
        };
        if sender_id < 0 {
            return Err(Status::invalid_argument(
                "negative sender_id in add chunk request",
            ));
        }
        if sender_id as u64 >= self.senders.len() as u64 {
            return Err(Status::invalid_argument(format!(
                "invalid sender_id {sender_id} in add chunk request, limit={}",
                self.senders.len()
            )));
        }
        let Some(seq) = request.packet_seq else {
            return Err(Status::invalid_argument("no packet_seq in add chunk request"));
        };
        Ok((sender_id as usize, seq))
    }

    /// Group the packet's rows by tablet. `None` for an eos packet without rows.
    fn scatter(
        &self,
        chunk: Option<Arc<Chunk>>,
        request: &AddChunkRequest,
    ) -> Result<Option<(Arc<Chunk>, RowScatter)>, Status> {
        let Some(chunk) = chunk else {
            if request.eos {
                return Ok(None);
            }
            return Err(Status::invalid_argument(
                "add chunk request has no chunk or eos",
            ));
        };
        if request.tablet_ids.len() != chunk.num_rows() {
            return Err(Status::invalid_argument(format!(
                "add chunk request has {} tablet ids for {} rows",
                request.tablet_ids.len(),
                chunk.num_rows()
            )));
        }
        let scatter = RowScatter::new(&request.tablet_ids, &self.sorted_tablet_index)
            .map_err(|e| Status::internal_error(e.to_string()))?;
        Ok(Some((chunk, scatter)))
    }

    /// Record the eos packet of `sender`. Returns `true` for the caller closing the last
    /// sender, which then owns closing the channel.
    fn close_sender(&self, sender: &SenderSlot, partition_ids: &[PartitionId]) -> bool {
        // Every eos packet contributes its partitions, only the first one per sender counts
        // down. Both happen under one lock so the closer sees every partition.
        let mut state = self.close_state.lock();
        state.touched_partitions.extend(partition_ids.iter().copied());
        if !sender.close() {
            return false;
        }
        debug_assert!(state.remaining_senders > 0);
        state.remaining_senders -= 1;
        state.remaining_senders == 0
    }

    /// Commit the tablets of touched partitions, abort the others. Returns the committed
    /// tablets.
    ///
    /// Secondary replicas are left to their primary.
    fn commit_or_abort(&self, context: &Arc<WriteContext>) -> Vec<TabletId> {
        let touched = self.close_state.lock().touched_partitions.clone();

        let mut committed = vec![];
        let mut aborted = vec![];
        for tablet_id in &self.sorted_tablet_ids {
            let writer = &self.writers[tablet_id];
            if writer.replica_state() == ReplicaState::Secondary {
                continue;
            }
            if touched.contains(&writer.partition_id()) {
                writer.commit(WriteCallback::new(context));
                committed.push(*tablet_id);
            } else {
                // Nothing was loaded into this partition.
                writer.abort(false);
                aborted.push(*tablet_id);
            }
        }

        info!(
            key = %self.key,
            txn_id = %self.txn_id,
            tablets = ?committed,
            "commit tablets"
        );
        info!(
            key = %self.key,
            txn_id = %self.txn_id,
            tablets = ?aborted,
            "abort tablets"
        );
        committed
    }

    /// Wait for every secondary replica to settle, or for `deadline`.
    async fn wait_secondary_replicas(&self, deadline: Instant) {
        let started = Instant::now();
        for tablet_id in &self.sorted_tablet_ids {
            let writer = &self.writers[tablet_id];
            if writer.replica_state() != ReplicaState::Secondary {
                continue;
            }

            let mut last_progress_log = started;
            loop {
                let state = writer.state();
                if state.is_settled() {
                    break;
                }
                tokio::time::sleep(self.options.replica_poll_interval).await;

                let now = Instant::now();
                if now > deadline {
                    info!(
                        key = %self.key,
                        %tablet_id,
                        %state,
                        "timed out waiting for secondary replica"
                    );
                    self.metrics.replica_wait_timeouts.inc(1);
                    return;
                }
                if now.duration_since(last_progress_log) >= self.options.replica_progress_log_interval
                {
                    info!(
                        key = %self.key,
                        %tablet_id,
                        %state,
                        waited_ms = now.duration_since(started).as_millis() as u64,
                        "still waiting for secondary replica"
                    );
                    last_progress_log = now;
                }
            }
        }
    }

    async fn finish_close(&self, committed: &[TabletId]) {
        match self.owner.upgrade() {
            Some(owner) => owner.remove_tablet_channel(self.key.index_id),
            None => warn!(key = %self.key, "load channel dropped before tablet channel closed"),
        }

        let tablets = committed
            .iter()
            .filter_map(|id| self.tablet_manager.get_tablet(*id))
            .collect::<Vec<_>>();
        if let Err(error) = self.txn_manager.persist_tablet_related_txns(&tablets).await {
            warn!(key = %self.key, %error, "failed to persist transactions");
        }
    }
}

impl Drop for TabletChannel {
    fn drop(&mut self) {
        self.metrics.tablet_writer_count.dec(self.writers.len() as u64);
    }
}
