use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use load_types::TabletId;
use parking_lot::Mutex;

use super::{Tablet, TabletManager, TxnError, TxnManager};

/// A [`TabletManager`] hosting a fixed set of tablets.
#[derive(Debug, Default)]
pub struct MockTabletManager {
    tablets: HashMap<TabletId, Arc<Tablet>>,
}

impl MockTabletManager {
    pub fn with_tablets(mut self, ids: impl IntoIterator<Item = impl Into<TabletId>>) -> Self {
        for tablet_id in ids.into_iter().map(Into::into) {
            self.tablets.insert(
                tablet_id,
                Arc::new(Tablet {
                    tablet_id,
                    schema_hash: 0,
                }),
            );
        }
        self
    }
}

impl TabletManager for MockTabletManager {
    fn get_tablet(&self, tablet_id: TabletId) -> Option<Arc<Tablet>> {
        self.tablets.get(&tablet_id).map(Arc::clone)
    }
}

/// A [`TxnManager`] recording the tablets of every persist call.
#[derive(Debug, Default)]
pub struct MockTxnManager {
    fail: bool,
    calls: Mutex<Vec<Vec<TabletId>>>,
}

impl MockTxnManager {
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> Vec<Vec<TabletId>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TxnManager for MockTxnManager {
    async fn persist_tablet_related_txns(&self, tablets: &[Arc<Tablet>]) -> Result<(), TxnError> {
        let mut ids = tablets.iter().map(|t| t.tablet_id).collect::<Vec<_>>();
        ids.sort();
        self.calls.lock().push(ids);
        if self.fail {
            return Err(TxnError::Persist {
                tablets: tablets.len(),
                reason: "mock persist failure".to_string(),
            });
        }
        Ok(())
    }
}
