//! Mock [`TabletWriter`] and [`TabletWriterFactory`] that record every call.

use std::{collections::VecDeque, sync::Arc};

use hashbrown::{HashMap, HashSet};
use load_types::{PartitionId, SegmentRequest, TabletId, TabletInfo};
use parking_lot::Mutex;

use super::{
    CommittedTabletInfo, ReplicaState, SegmentCallback, TabletWriter, TabletWriterError,
    TabletWriterFactory, WriteCallback, WriteRequest, WriterOptions, WriterState,
};

/// A call observed by a [`MockTabletWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWriterCall {
    /// The row ordinals of a write.
    Write(Vec<u32>),
    Segment { eos: bool },
    Commit,
    Abort { with_log: bool },
}

#[derive(Debug)]
struct Inner {
    calls: Vec<MockWriterCall>,
    state: WriterState,
    held: VecDeque<WriteCallback>,
}

/// A [`TabletWriter`] that completes writes synchronously unless told to hold them.
#[derive(Debug)]
pub struct MockTabletWriter {
    tablet_id: TabletId,
    partition_id: PartitionId,
    replica_state: ReplicaState,
    hold_writes: bool,
    write_error: Option<String>,
    inner: Mutex<Inner>,
}

impl MockTabletWriter {
    pub fn new(tablet_id: TabletId, partition_id: PartitionId) -> Self {
        Self {
            tablet_id,
            partition_id,
            replica_state: ReplicaState::Peer,
            hold_writes: false,
            write_error: None,
            inner: Mutex::new(Inner {
                calls: vec![],
                state: WriterState::Uninitialized,
                held: VecDeque::new(),
            }),
        }
    }

    pub fn with_replica_state(mut self, replica_state: ReplicaState) -> Self {
        self.replica_state = replica_state;
        self
    }

    /// Keep write callbacks until [`complete_held`](Self::complete_held) is called.
    pub fn with_held_writes(mut self) -> Self {
        self.hold_writes = true;
        self
    }

    /// Fail every write with `reason`.
    pub fn with_write_error(mut self, reason: impl Into<String>) -> Self {
        self.write_error = Some(reason.into());
        self
    }

    pub fn calls(&self) -> Vec<MockWriterCall> {
        self.inner.lock().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockWriterCall::Write(rows) => Some(rows),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.count(|c| matches!(c, MockWriterCall::Commit))
    }

    pub fn aborts(&self) -> usize {
        self.count(|c| matches!(c, MockWriterCall::Abort { .. }))
    }

    pub fn held(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Complete every held write successfully.
    pub fn complete_held(&self) {
        let held = std::mem::take(&mut self.inner.lock().held);
        for callback in held {
            callback.run(Ok(None));
        }
    }

    /// Force the writer into `state`, as its replication peer would.
    pub fn set_state(&self, state: WriterState) {
        self.inner.lock().state = state;
    }

    fn count(&self, f: impl Fn(&MockWriterCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| f(*c)).count()
    }
}

impl TabletWriter for MockTabletWriter {
    fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn replica_state(&self) -> ReplicaState {
        self.replica_state
    }

    fn state(&self) -> WriterState {
        self.inner.lock().state
    }

    fn write(&self, request: WriteRequest, callback: WriteCallback) {
        let result = {
            let mut inner = self.inner.lock();
            inner
                .calls
                .push(MockWriterCall::Write(request.indexes().to_vec()));
            if inner.state == WriterState::Uninitialized {
                inner.state = WriterState::Writing;
            }
            if self.hold_writes {
                inner.held.push_back(callback);
                return;
            }
            match &self.write_error {
                Some(reason) => Err(TabletWriterError::Write {
                    tablet_id: self.tablet_id,
                    reason: reason.clone(),
                }),
                None => Ok(None),
            }
        };
        callback.run(result);
    }

    fn write_segment(&self, request: SegmentRequest, callback: SegmentCallback) {
        {
            let mut inner = self.inner.lock();
            inner
                .calls
                .push(MockWriterCall::Segment { eos: request.eos });
            if request.eos {
                inner.state = WriterState::Committed;
            }
        }
        callback.run(Ok(()));
    }

    fn commit(&self, callback: WriteCallback) {
        {
            let mut inner = self.inner.lock();
            inner.calls.push(MockWriterCall::Commit);
            inner.state = WriterState::Committed;
        }
        callback.run(Ok(Some(CommittedTabletInfo {
            tablet: TabletInfo::new(self.tablet_id, 0),
            replicated: vec![],
        })));
    }

    fn abort(&self, with_log: bool) {
        let mut inner = self.inner.lock();
        inner.calls.push(MockWriterCall::Abort { with_log });
        inner.state = WriterState::Aborted;
    }
}

#[derive(Debug, Default)]
struct FactoryConfig {
    hold_writes: bool,
    write_error: Option<String>,
    fail_open: HashSet<TabletId>,
    replica_states: HashMap<TabletId, ReplicaState>,
}

/// Opens [`MockTabletWriter`]s and keeps them for inspection.
#[derive(Debug, Default)]
pub struct MockTabletWriterFactory {
    config: FactoryConfig,
    writers: Mutex<HashMap<TabletId, Arc<MockTabletWriter>>>,
    opened: Mutex<Vec<WriterOptions>>,
}

impl MockTabletWriterFactory {
    pub fn with_held_writes(mut self) -> Self {
        self.config.hold_writes = true;
        self
    }

    pub fn with_write_error(mut self, reason: impl Into<String>) -> Self {
        self.config.write_error = Some(reason.into());
        self
    }

    pub fn with_failed_open(mut self, tablet_id: impl Into<TabletId>) -> Self {
        self.config.fail_open.insert(tablet_id.into());
        self
    }

    pub fn with_replica_state(
        mut self,
        tablet_id: impl Into<TabletId>,
        replica_state: ReplicaState,
    ) -> Self {
        self.config
            .replica_states
            .insert(tablet_id.into(), replica_state);
        self
    }

    /// # Panics
    ///
    /// If no writer was opened for `tablet_id`.
    pub fn writer(&self, tablet_id: impl Into<TabletId>) -> Arc<MockTabletWriter> {
        let tablet_id = tablet_id.into();
        self.writers
            .lock()
            .get(&tablet_id)
            .map(Arc::clone)
            .unwrap_or_else(|| panic!("no writer opened for tablet {tablet_id}"))
    }

    pub fn opened(&self) -> Vec<WriterOptions> {
        self.opened.lock().clone()
    }
}

impl TabletWriterFactory for MockTabletWriterFactory {
    fn open(&self, options: WriterOptions) -> Result<Arc<dyn TabletWriter>, TabletWriterError> {
        if self.config.fail_open.contains(&options.tablet_id) {
            return Err(TabletWriterError::Open {
                tablet_id: options.tablet_id,
                reason: "mock open failure".to_string(),
            });
        }

        let mut writer = MockTabletWriter::new(options.tablet_id, options.partition_id)
            .with_replica_state(
                self.config
                    .replica_states
                    .get(&options.tablet_id)
                    .copied()
                    .unwrap_or_else(|| options.replica_state()),
            );
        if self.config.hold_writes {
            writer = writer.with_held_writes();
        }
        if let Some(reason) = &self.config.write_error {
            writer = writer.with_write_error(reason.clone());
        }

        let writer = Arc::new(writer);
        self.writers
            .lock()
            .insert(options.tablet_id, Arc::clone(&writer));
        self.opened.lock().push(options);
        Ok(writer as Arc<dyn TabletWriter>)
    }
}
