//! Shared types for the tablet load path.
//!
//! This crate holds the identifiers, status codes and request/response messages that flow
//! between a load coordinator and the tablet channels (see the `load_channel` crate) that own the
//! per-tablet writers for one load job. It has no behaviour of its own beyond small helpers on
//! those types.

pub mod chunk;
pub mod id;
pub mod message;
pub mod schema;
pub mod status;

pub use chunk::Chunk;
pub use id::{IndexId, LoadId, NodeId, PartitionId, TabletId, TxnId};
pub use message::{
    AddChunkRequest, AddChunkResponse, OpenRequest, Replica, SegmentRequest, SegmentResponse,
    TabletInfo, TabletWithPartition,
};
pub use schema::{ColumnDesc, IndexSchema, Schema};
pub use status::{Status, StatusCode};
