//! Hands canonical span batches to the persistence and live fan-out
//! gateways. Persistence failures propagate to the ingest caller; fan-out is
//! fire-and-forget.

use runlens_core::error::{Result, RunlensError};
use runlens_core::model::span::SpanData;
use runlens_store::Store;

use crate::fanout::FanoutHub;

#[derive(Clone)]
pub struct Pipeline {
    store: Store,
    fanout: FanoutHub,
}

impl Pipeline {
    pub fn new(store: Store, fanout: FanoutHub) -> Self {
        Self { store, fanout }
    }

    /// Submit one decoded batch, empty batches included, as a unit. The
    /// store write runs on the blocking pool so a slow disk delays only this
    /// call's acknowledgment.
    pub async fn submit_spans(&self, spans: Vec<SpanData>) -> Result<()> {
        let store = self.store.clone();
        let spans = tokio::task::spawn_blocking(move || {
            store.insert_spans(&spans).map(|_| spans)
        })
        .await
        .map_err(|e| RunlensError::Internal(format!("span writer task failed: {e}")))??;

        self.fanout.broadcast(&spans);
        Ok(())
    }
}
