//! An in-memory [`TabletWriter`].
//!
//! Every writer owns a tokio task that applies its queued operations in submission order, so
//! a commit observes every write enqueued before it. Rows and segments are kept in memory and
//! can be inspected once the writer settles.

use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use load_types::{PartitionId, SegmentRequest, TabletId, TabletInfo};
use observability_deps::tracing::{Instrument, debug, info, info_span};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    CommittedTabletInfo, ReplicaState, SegmentCallback, TabletWriter, TabletWriterError,
    TabletWriterFactory, WriteCallback, WriteRequest, WriterOptions, WriterState,
};

#[derive(Debug)]
enum Op {
    Write(WriteRequest, WriteCallback),
    Segment(SegmentRequest, SegmentCallback),
    Commit(WriteCallback),
}

#[derive(Debug)]
struct Tablet {
    state: WriterState,
    rows: Vec<Bytes>,
    segments: Vec<Bytes>,
}

#[derive(Debug)]
struct Shared {
    tablet_id: TabletId,
    schema_hash: i32,
    dict_columns: Vec<String>,
    tablet: Mutex<Tablet>,
}

impl Shared {
    fn check_open(&self, tablet: &Tablet, op: &'static str) -> Result<(), TabletWriterError> {
        match tablet.state {
            WriterState::Uninitialized | WriterState::Writing => Ok(()),
            state => Err(TabletWriterError::InvalidState {
                tablet_id: self.tablet_id,
                state,
                op,
            }),
        }
    }

    fn write(&self, request: &WriteRequest) -> Result<(), TabletWriterError> {
        let mut tablet = self.tablet.lock();
        self.check_open(&tablet, "write")?;
        tablet.state = WriterState::Writing;
        tablet.rows.extend(request.rows().cloned());
        Ok(())
    }

    fn write_segment(&self, request: SegmentRequest) -> Result<(), TabletWriterError> {
        {
            let mut tablet = self.tablet.lock();
            self.check_open(&tablet, "write segment")?;
            tablet.state = WriterState::Writing;
            tablet.segments.extend(request.segment);
        }
        if request.eos {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&self) -> Result<CommittedTabletInfo, TabletWriterError> {
        let mut tablet = self.tablet.lock();
        self.check_open(&tablet, "commit")?;
        tablet.state = WriterState::Committed;
        debug!(
            tablet_id = %self.tablet_id,
            rows = tablet.rows.len(),
            segments = tablet.segments.len(),
            "committed tablet"
        );

        let mut info = TabletInfo::new(self.tablet_id, self.schema_hash);
        info.valid_dict_cache_columns = self.dict_columns.clone();
        Ok(CommittedTabletInfo {
            tablet: info,
            replicated: vec![],
        })
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Op>) {
        while let Some(op) = rx.recv().await {
            match op {
                Op::Write(request, callback) => callback.run(self.write(&request).map(|_| None)),
                Op::Segment(request, callback) => callback.run(self.write_segment(request)),
                Op::Commit(callback) => callback.run(self.commit().map(Some)),
            }
        }
    }
}

/// A [`TabletWriter`] that keeps its tablet in memory.
#[derive(Debug)]
pub struct MemTabletWriter {
    partition_id: PartitionId,
    replica_state: ReplicaState,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Op>,
}

impl MemTabletWriter {
    /// Open a writer and spawn its task on the current tokio runtime.
    pub fn open(options: &WriterOptions) -> Result<Self, TabletWriterError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|e| TabletWriterError::Open {
                tablet_id: options.tablet_id,
                reason: e.to_string(),
            })?;

        let shared = Arc::new(Shared {
            tablet_id: options.tablet_id,
            schema_hash: options.schema_hash,
            dict_columns: options
                .columns
                .iter()
                .filter(|c| options.global_dicts.contains_key(*c))
                .cloned()
                .collect(),
            tablet: Mutex::new(Tablet {
                state: WriterState::Uninitialized,
                rows: vec![],
                segments: vec![],
            }),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!(
            parent: &options.parent_span,
            "tablet_writer",
            tablet_id = %options.tablet_id,
            txn_id = %options.txn_id,
        );
        handle.spawn(Arc::clone(&shared).run(rx).instrument(span));

        Ok(Self {
            partition_id: options.partition_id,
            replica_state: options.replica_state(),
            shared,
            tx,
        })
    }

    /// Rows buffered or committed so far.
    pub fn rows(&self) -> Vec<Bytes> {
        self.shared.tablet.lock().rows.clone()
    }

    /// Segments received from a primary so far.
    pub fn segments(&self) -> Vec<Bytes> {
        self.shared.tablet.lock().segments.clone()
    }

    fn enqueue(&self, op: Op) {
        if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
            let err = || TabletWriterError::Closed {
                tablet_id: self.shared.tablet_id,
            };
            match op {
                Op::Write(_, callback) | Op::Commit(callback) => callback.run(Err(err())),
                Op::Segment(_, callback) => callback.run(Err(err())),
            }
        }
    }
}

impl TabletWriter for MemTabletWriter {
    fn tablet_id(&self) -> TabletId {
        self.shared.tablet_id
    }

    fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn replica_state(&self) -> ReplicaState {
        self.replica_state
    }

    fn state(&self) -> WriterState {
        self.shared.tablet.lock().state
    }

    fn write(&self, request: WriteRequest, callback: WriteCallback) {
        self.enqueue(Op::Write(request, callback));
    }

    fn write_segment(&self, request: SegmentRequest, callback: SegmentCallback) {
        self.enqueue(Op::Segment(request, callback));
    }

    fn commit(&self, callback: WriteCallback) {
        self.enqueue(Op::Commit(callback));
    }

    fn abort(&self, with_log: bool) {
        let mut tablet = self.shared.tablet.lock();
        if tablet.state == WriterState::Committed {
            return;
        }
        tablet.state = WriterState::Aborted;
        tablet.rows.clear();
        tablet.segments.clear();
        if with_log {
            info!(tablet_id = %self.shared.tablet_id, "aborted tablet writer");
        }
    }
}

/// Opens [`MemTabletWriter`]s and keeps a handle on each for inspection.
#[derive(Debug, Default)]
pub struct MemTabletWriterFactory {
    writers: Mutex<HashMap<TabletId, Arc<MemTabletWriter>>>,
}

impl MemTabletWriterFactory {
    pub fn writer(&self, tablet_id: TabletId) -> Option<Arc<MemTabletWriter>> {
        self.writers.lock().get(&tablet_id).map(Arc::clone)
    }
}

impl TabletWriterFactory for MemTabletWriterFactory {
    fn open(&self, options: WriterOptions) -> Result<Arc<dyn TabletWriter>, TabletWriterError> {
        let writer = Arc::new(MemTabletWriter::open(&options)?);
        self.writers
            .lock()
            .insert(options.tablet_id, Arc::clone(&writer));
        Ok(writer as Arc<dyn TabletWriter>)
    }
}
