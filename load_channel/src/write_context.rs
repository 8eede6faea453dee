//! Completion tracking for the per-tablet requests dispatched for one packet.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use load_types::{AddChunkResponse, Status, TabletInfo};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::writer::{CommittedTabletInfo, TabletWriterError};

#[derive(Debug, Default)]
struct Outcome {
    status: Status,
    tablet_vec: Vec<TabletInfo>,
}

/// The completion sink shared by every request dispatched for one packet.
///
/// The context counts outstanding references: one held by the dispatcher and one per
/// [`WriteCallback`]. When the dispatcher has handed out every callback it calls
/// [`release`](Self::release) and then [`wait`](Self::wait)s for the count to reach zero.
#[derive(Debug)]
pub(crate) struct WriteContext {
    pending: AtomicUsize,
    done: Notify,
    outcome: Mutex<Outcome>,
}

impl WriteContext {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicUsize::new(1),
            done: Notify::new(),
            outcome: Mutex::new(Outcome::default()),
        })
    }

    /// Drop the dispatcher's reference.
    pub(crate) fn release(&self) {
        self.count_down();
    }

    /// Resolves once the dispatcher and every callback have released their reference.
    pub(crate) async fn wait(&self) {
        while self.pending.load(Ordering::Acquire) != 0 {
            self.done.notified().await;
        }
    }

    /// Move the aggregated outcome into `response`.
    pub(crate) fn fill_response(&self, response: &mut AddChunkResponse) {
        let outcome = std::mem::take(&mut *self.outcome.lock());
        response.status.merge(outcome.status);
        response.tablet_vec.extend(outcome.tablet_vec);
    }

    fn acquire(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn count_down(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        if prev == 1 {
            // Stores a permit if the dispatcher is not parked yet.
            self.done.notify_one();
        }
    }

    fn update(&self, result: Result<Option<CommittedTabletInfo>, TabletWriterError>) {
        let mut outcome = self.outcome.lock();
        match result {
            Ok(None) => {}
            Ok(Some(info)) => {
                outcome.tablet_vec.push(info.tablet);
                // Tablets the primary replicated to its secondaries.
                outcome.tablet_vec.extend(info.replicated);
            }
            Err(e) => outcome.status.merge(Status::from(e)),
        }
    }
}

/// Completion handle passed to a tablet writer with every write or commit request.
///
/// The writer reports the outcome through [`run`](Self::run). Dropping the callback, with or
/// without running it, releases its reference on the packet's write context.
#[derive(Debug)]
pub struct WriteCallback {
    context: Arc<WriteContext>,
}

impl WriteCallback {
    pub(crate) fn new(context: &Arc<WriteContext>) -> Self {
        context.acquire();
        Self {
            context: Arc::clone(context),
        }
    }

    /// Report the outcome of the request this callback was attached to.
    ///
    /// A commit reports the committed tablet; a write reports `Ok(None)`.
    pub fn run(self, result: Result<Option<CommittedTabletInfo>, TabletWriterError>) {
        self.context.update(result);
    }
}

impl Drop for WriteCallback {
    fn drop(&mut self) {
        self.context.count_down();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use load_types::{StatusCode, TabletId};

    use super::*;

    #[tokio::test]
    async fn wait_for_all_callbacks() {
        let context = WriteContext::new();
        let a = WriteCallback::new(&context);
        let b = WriteCallback::new(&context);
        context.release();

        let waiter = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { context.wait().await })
        };

        a.run(Ok(None));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(b);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("context should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn completion_before_wait() {
        let context = WriteContext::new();
        WriteCallback::new(&context).run(Ok(None));
        context.release();
        context.wait().await;
    }

    #[tokio::test]
    async fn first_failure_wins() {
        let context = WriteContext::new();
        WriteCallback::new(&context).run(Err(TabletWriterError::Write {
            tablet_id: TabletId::new(1),
            reason: "memtable full".to_string(),
        }));
        WriteCallback::new(&context).run(Ok(Some(CommittedTabletInfo {
            tablet: TabletInfo::new(TabletId::new(2), 7),
            replicated: vec![TabletInfo::new(TabletId::new(2), 7)],
        })));
        WriteCallback::new(&context).run(Err(TabletWriterError::Write {
            tablet_id: TabletId::new(3),
            reason: "io".to_string(),
        }));
        context.release();
        context.wait().await;

        let mut response = AddChunkResponse::default();
        context.fill_response(&mut response);
        assert_eq!(response.status.code, StatusCode::InternalError);
        assert_eq!(response.status.error_msgs.len(), 2);
        assert!(response.status.error_msgs[0].contains("memtable full"));
        assert_eq!(response.tablet_vec.len(), 2);
    }
}
