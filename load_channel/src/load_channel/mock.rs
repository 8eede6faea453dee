use load_types::IndexId;
use observability_deps::tracing::Span;
use parking_lot::Mutex;

use super::LoadChannelOwner;

/// A [`LoadChannelOwner`] recording every removed index.
#[derive(Debug, Default)]
pub struct MockLoadChannelOwner {
    removed: Mutex<Vec<IndexId>>,
}

impl MockLoadChannelOwner {
    pub fn removed(&self) -> Vec<IndexId> {
        self.removed.lock().clone()
    }
}

impl LoadChannelOwner for MockLoadChannelOwner {
    fn remove_tablet_channel(&self, index_id: IndexId) {
        self.removed.lock().push(index_id);
    }

    fn span(&self) -> Span {
        Span::none()
    }
}
