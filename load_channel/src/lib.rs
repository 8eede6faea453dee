//! Tablet write channels of the load path.
//!
//! A load job streams rows from many upstream senders to every node hosting tablets of the
//! target table. On each such node a [`LoadChannel`] owns one [`TabletChannel`] per table
//! index; the tablet channel owns one [`TabletWriter`] per tablet and
//!
//! * deduplicates retried packets per sender, so a packet is applied at most once even though
//!   the sender delivers it at least once,
//! * scatters the rows of every packet to the writers of their tablets with a stable counting
//!   sort, and
//! * once every sender sent its eos packet, commits the tablets of the partitions that received
//!   data and aborts the others.
//!
//! The storage engine plugs in through [`TabletWriterFactory`], [`TabletManager`] and
//! [`TxnManager`]. [`MemTabletWriterFactory`] provides an in-memory writer.
//!
//! [`TabletWriter`]: writer::TabletWriter
//! [`TabletWriterFactory`]: writer::TabletWriterFactory
//! [`TabletManager`]: storage::TabletManager
//! [`TxnManager`]: storage::TxnManager
//! [`MemTabletWriterFactory`]: writer::mem::MemTabletWriterFactory

pub mod load_channel;
pub mod metrics;
mod scatter;
mod sender;
pub mod storage;
pub mod tablet_channel;
mod write_context;
pub mod writer;

pub use load_channel::{LoadChannel, LoadChannelOwner};
pub use metrics::TabletChannelMetrics;
pub use tablet_channel::{
    OpenError, TabletChannel, TabletChannelDeps, TabletChannelKey, TabletChannelOptions,
};
