//! Hand-off point to the external execution engine

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::webhook::NormalizedEvent;

/// Receives every accepted event. The dispatcher's job ends here.
#[async_trait]
pub trait ExecutionTrigger: Send + Sync {
    async fn trigger(&self, event: NormalizedEvent) -> Result<()>;
}

/// Fans events out to broadcast subscribers (the SSE stream, an engine adapter).
#[derive(Debug, Clone)]
pub struct BroadcastTrigger {
    tx: broadcast::Sender<NormalizedEvent>,
}

impl BroadcastTrigger {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NormalizedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ExecutionTrigger for BroadcastTrigger {
    async fn trigger(&self, event: NormalizedEvent) -> Result<()> {
        // No subscribers is fine
        if self.tx.send(event).is_err() {
            debug!("event accepted with no subscribers");
        }
        Ok(())
    }
}
