//! Requests and responses exchanged with the load coordinator.
//!
//! Optional fields mirror the presence semantics of the wire protocol: a sender that omits its
//! `sender_id` is distinguishable from one that sends `0`.

use bytes::Bytes;

use crate::{IndexId, LoadId, NodeId, PartitionId, Status, TabletId, TxnId};

/// A replica of a tablet, used when the load writes to replicated storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
}

/// A tablet assigned to a tablet channel together with the partition it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletWithPartition {
    pub tablet_id: TabletId,
    pub partition_id: PartitionId,
    /// The tablet's replicas, primary first. Only populated for replicated storage.
    pub replicas: Vec<Replica>,
}

impl TabletWithPartition {
    pub fn new(tablet_id: impl Into<TabletId>, partition_id: impl Into<PartitionId>) -> Self {
        Self {
            tablet_id: tablet_id.into(),
            partition_id: partition_id.into(),
            replicas: vec![],
        }
    }

    pub fn with_replicas(mut self, replicas: impl IntoIterator<Item = Replica>) -> Self {
        self.replicas = replicas.into_iter().collect();
        self
    }
}

/// Opens the tablet channel of one index for one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub load_id: LoadId,
    pub index_id: IndexId,
    pub txn_id: TxnId,
    /// The node receiving the request.
    pub node_id: NodeId,
    pub tablets: Vec<TabletWithPartition>,
    /// Number of upstream senders that will each deliver an eos packet.
    pub num_senders: usize,
    pub is_replicated_storage: bool,
    pub timeout_ms: i64,
}

/// One packet of rows from one sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddChunkRequest {
    pub load_id: LoadId,
    pub index_id: IndexId,
    pub txn_id: TxnId,
    pub sender_id: Option<i64>,
    pub packet_seq: Option<i64>,
    /// Last packet of this sender.
    pub eos: bool,
    /// Partitions this sender wrote to. Only meaningful on the eos packet.
    pub partition_ids: Vec<PartitionId>,
    /// Destination tablet of each row of the accompanying chunk.
    pub tablet_ids: Vec<TabletId>,
    pub timeout_ms: i64,
}

/// Per-tablet information reported back when a tablet's rowset is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub schema_hash: i32,
    /// Columns whose global dictionary is still valid after this load.
    pub valid_dict_cache_columns: Vec<String>,
    /// Columns that outgrew their global dictionary during this load.
    pub invalid_dict_cache_columns: Vec<String>,
}

impl TabletInfo {
    pub fn new(tablet_id: TabletId, schema_hash: i32) -> Self {
        Self {
            tablet_id,
            schema_hash,
            valid_dict_cache_columns: vec![],
            invalid_dict_cache_columns: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddChunkResponse {
    pub status: Status,
    /// Tablets committed by this packet, including those replicated to secondaries.
    pub tablet_vec: Vec<TabletInfo>,
    /// Accumulated over every tablet channel the request went through.
    pub execution_time_us: Option<i64>,
    pub wait_lock_time_us: i64,
}

/// A pre-built segment, sent by a primary replica to a secondary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRequest {
    pub load_id: LoadId,
    pub index_id: IndexId,
    pub txn_id: TxnId,
    pub tablet_id: TabletId,
    pub segment: Option<Bytes>,
    /// Last segment of this tablet; the receiving replica commits after applying it.
    pub eos: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentResponse {
    pub status: Status,
}
