//! Storage engine services a tablet channel calls into when it closes.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use load_types::TabletId;
use thiserror::Error;

pub mod mock;

/// A tablet known to the local storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tablet {
    pub tablet_id: TabletId,
    pub schema_hash: i32,
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("failed to persist transactions of {tablets} tablets: {reason}")]
    Persist { tablets: usize, reason: String },
}

/// Looks up tablets hosted by this node.
pub trait TabletManager: Debug + Send + Sync {
    fn get_tablet(&self, tablet_id: TabletId) -> Option<Arc<Tablet>>;
}

/// Owns the transaction state of the tablets on this node.
#[async_trait]
pub trait TxnManager: Debug + Send + Sync {
    /// Durably record the transactions the given tablets take part in.
    async fn persist_tablet_related_txns(&self, tablets: &[Arc<Tablet>]) -> Result<(), TxnError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tablets_are_plain_values() {
        let tablet = Tablet {
            tablet_id: TabletId::new(3),
            schema_hash: 42,
        };
        let copied = tablet;
        assert_eq!(tablet, copied);
    }
}
