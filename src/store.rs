//! Receiver persistence seam.
//!
//! Declarative receivers live in an external consistent key-value store;
//! [`ReceiverStore`] is the narrow interface the core needs from it.
//! [`MemoryReceiverStore`] backs single-process deployments and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::receiver::{ReceiverRef, WebhookReceiver};

#[async_trait]
pub trait ReceiverStore: Send + Sync {
    async fn get(&self, reference: &ReceiverRef) -> Result<Option<WebhookReceiver>>;

    /// Insert or replace the receiver under its own reference
    async fn put(&self, receiver: WebhookReceiver) -> Result<()>;

    /// Insert only when the reference is free. Returns false, leaving the
    /// stored receiver untouched, when one already exists.
    async fn insert(&self, receiver: WebhookReceiver) -> Result<bool>;

    async fn remove(&self, reference: &ReceiverRef) -> Result<Option<WebhookReceiver>>;

    async fn list(&self) -> Result<Vec<WebhookReceiver>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryReceiverStore {
    receivers: Arc<RwLock<HashMap<ReceiverRef, WebhookReceiver>>>,
}

impl MemoryReceiverStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiverStore for MemoryReceiverStore {
    async fn get(&self, reference: &ReceiverRef) -> Result<Option<WebhookReceiver>> {
        Ok(self.receivers.read().await.get(reference).cloned())
    }

    async fn put(&self, receiver: WebhookReceiver) -> Result<()> {
        self.receivers
            .write()
            .await
            .insert(receiver.reference.clone(), receiver);
        Ok(())
    }

    async fn insert(&self, receiver: WebhookReceiver) -> Result<bool> {
        match self.receivers.write().await.entry(receiver.reference.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(receiver);
                Ok(true)
            }
        }
    }

    async fn remove(&self, reference: &ReceiverRef) -> Result<Option<WebhookReceiver>> {
        Ok(self.receivers.write().await.remove(reference))
    }

    async fn list(&self) -> Result<Vec<WebhookReceiver>> {
        let mut receivers: Vec<_> = self.receivers.read().await.values().cloned().collect();
        receivers.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(receivers)
    }
}
