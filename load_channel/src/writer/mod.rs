//! The per-tablet writer capability driven by a tablet channel.
//!
//! A [`TabletWriter`] buffers rows for a single tablet and turns them into a new rowset on
//! commit. All of its operations are asynchronous: they enqueue work and report back through a
//! callback, so a channel can fan one packet out to many writers without blocking on any of
//! them.

use std::{fmt::Debug, ops::Range, sync::Arc};

use bytes::Bytes;
use hashbrown::HashMap;
use load_types::{
    Chunk, IndexId, LoadId, NodeId, PartitionId, Replica, SegmentRequest, Status, TabletId,
    TabletInfo, TxnId,
};
use observability_deps::tracing::Span;
use thiserror::Error;
use tokio::sync::oneshot;

pub use crate::write_context::WriteCallback;

pub mod mem;
pub mod mock;

/// Lifecycle of a tablet writer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WriterState {
    Uninitialized,
    Writing,
    Committed,
    Aborted,
}

impl WriterState {
    /// Whether the writer reached a state a closing channel no longer has to wait on.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Writing => "writing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// The role of a tablet writer when the load writes to replicated storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReplicaState {
    /// Storage is not replicated.
    Peer,
    /// Receives rows from the channel and ships segments to the secondaries.
    Primary,
    /// Receives segments from its primary, which also commits it.
    Secondary,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Peer => "peer",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        };
        f.write_str(s)
    }
}

/// Global dictionaries of a table, by column name. Each maps a word to its code.
pub type GlobalDicts = HashMap<String, HashMap<String, usize>>;

#[derive(Debug, Error)]
pub enum TabletWriterError {
    #[error("failed to open writer for tablet {tablet_id}: {reason}")]
    Open { tablet_id: TabletId, reason: String },

    #[error("tablet {tablet_id} writer is {state}, cannot {op}")]
    InvalidState {
        tablet_id: TabletId,
        state: WriterState,
        op: &'static str,
    },

    #[error("write to tablet {tablet_id} failed: {reason}")]
    Write { tablet_id: TabletId, reason: String },

    #[error("writer of tablet {tablet_id} has shut down")]
    Closed { tablet_id: TabletId },
}

impl From<TabletWriterError> for Status {
    fn from(e: TabletWriterError) -> Self {
        match e {
            TabletWriterError::Open { .. }
            | TabletWriterError::InvalidState { .. }
            | TabletWriterError::Write { .. }
            | TabletWriterError::Closed { .. } => Self::internal_error(e.to_string()),
        }
    }
}

/// Everything a writer needs to know about the tablet it writes.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub tablet_id: TabletId,
    pub partition_id: PartitionId,
    pub load_id: LoadId,
    pub index_id: IndexId,
    pub txn_id: TxnId,
    pub node_id: NodeId,
    pub schema_hash: i32,
    /// Columns stored by the index.
    pub columns: Arc<[String]>,
    pub global_dicts: Arc<GlobalDicts>,
    pub parent_span: Span,
    pub timeout_ms: i64,
    pub is_replicated_storage: bool,
    /// Replicas of the tablet, primary first. Empty unless replicated.
    pub replicas: Vec<Replica>,
}

impl WriterOptions {
    /// The role this node plays for the tablet.
    pub fn replica_state(&self) -> ReplicaState {
        if !self.is_replicated_storage {
            return ReplicaState::Peer;
        }
        match self.replicas.first() {
            Some(primary) if primary.node_id != self.node_id => ReplicaState::Secondary,
            _ => ReplicaState::Primary,
        }
    }
}

/// The rows of one packet bound for one tablet.
#[derive(Debug)]
pub struct WriteRequest {
    chunk: Arc<Chunk>,
    row_indexes: Arc<[u32]>,
    range: Range<usize>,
}

impl WriteRequest {
    pub(crate) fn new(chunk: Arc<Chunk>, row_indexes: Arc<[u32]>, range: Range<usize>) -> Self {
        debug_assert!(range.end <= row_indexes.len());
        Self {
            chunk,
            row_indexes,
            range,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Ordinals, within the chunk, of the rows to write. Ascending.
    pub fn indexes(&self) -> &[u32] {
        &self.row_indexes[self.range.clone()]
    }

    pub fn rows(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.chunk.select(self.indexes())
    }
}

/// Result of a commit, reported through the commit's [`WriteCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTabletInfo {
    pub tablet: TabletInfo,
    /// Secondary replicas the primary committed along with itself.
    pub replicated: Vec<TabletInfo>,
}

/// Completion handle for [`TabletWriter::write_segment`].
#[derive(Debug)]
pub struct SegmentCallback {
    tx: oneshot::Sender<Result<(), TabletWriterError>>,
}

impl SegmentCallback {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<(), TabletWriterError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn run(self, result: Result<(), TabletWriterError>) {
        // The requester may have gone away.
        let _ = self.tx.send(result);
    }
}

/// An asynchronous writer bound to one tablet.
///
/// Implementations must tolerate [`abort`](Self::abort) racing with queued writes.
pub trait TabletWriter: Debug + Send + Sync {
    fn tablet_id(&self) -> TabletId;

    fn partition_id(&self) -> PartitionId;

    fn replica_state(&self) -> ReplicaState;

    fn state(&self) -> WriterState;

    /// Enqueue the rows of `request`. `callback` completes once they are buffered.
    fn write(&self, request: WriteRequest, callback: WriteCallback);

    /// Enqueue a segment shipped by the tablet's primary replica.
    fn write_segment(&self, request: SegmentRequest, callback: SegmentCallback);

    /// Enqueue a commit after every previously enqueued write.
    fn commit(&self, callback: WriteCallback);

    /// Abort the tablet's transaction. `with_log` controls whether the abort is logged.
    fn abort(&self, with_log: bool);
}

/// Opens [`TabletWriter`]s.
pub trait TabletWriterFactory: Debug + Send + Sync {
    fn open(&self, options: WriterOptions) -> Result<Arc<dyn TabletWriter>, TabletWriterError>;
}
