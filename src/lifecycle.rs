//! Hook Lifecycle Manager.
//!
//! Reconciles each receiver's desired state ("a hook should exist") against
//! the provider. Work on one receiver is serialized behind a per-reference
//! async mutex; distinct receivers reconcile concurrently. Nothing runs
//! unless the caller's [`LeaderContext`] is active. Failures are returned
//! for the external controller to requeue with its own backoff.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialSource;
use crate::error::{HookError, Result};
use crate::provider::{HookProvider, ProviderRegistry};
use crate::receiver::{ReceiverRef, WebhookReceiver};
use crate::store::ReceiverStore;

/// Leadership as decided by an external election primitive.
#[derive(Debug, Clone)]
pub struct LeaderContext {
    active: watch::Receiver<bool>,
}

impl LeaderContext {
    pub fn new(active: watch::Receiver<bool>) -> Self {
        Self { active }
    }

    /// A context that is always leader, for single-replica deployments.
    pub fn always_active() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { active: rx }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileOutcome {
    /// A hook was created by this call
    Registered,
    /// Already registered; nothing to do
    Unchanged,
    /// The remote footprint is gone and the receiver was removed
    Removed,
    /// This instance is not the leader
    Skipped,
}

/// One async mutex per receiver reference
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<ReceiverRef, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &ReceiverRef) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry unless another task is still waiting on it.
    fn forget(&self, key: &ReceiverRef) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

#[derive(Clone)]
pub struct HookLifecycleManager {
    registry: Arc<ProviderRegistry>,
    receivers: Arc<dyn ReceiverStore>,
    credentials: Arc<dyn CredentialSource>,
    locks: Arc<KeyedLocks>,
    workers: usize,
}

impl HookLifecycleManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        receivers: Arc<dyn ReceiverStore>,
        credentials: Arc<dyn CredentialSource>,
        workers: usize,
    ) -> Self {
        Self {
            registry,
            receivers,
            credentials,
            locks: Arc::new(KeyedLocks::default()),
            workers: workers.max(1),
        }
    }

    /// Unregistered -> Registered. Creates the remote hook when the receiver
    /// has none; on failure the hook state is left untouched and the error
    /// is recorded and returned.
    pub async fn reconcile(
        &self,
        ctx: &LeaderContext,
        reference: &ReceiverRef,
    ) -> Result<ReconcileOutcome> {
        if !ctx.is_active() {
            debug!(receiver = %reference, "not leader, skipping reconcile");
            return Ok(ReconcileOutcome::Skipped);
        }
        let _guard = self.locks.lock(reference).await;

        let mut receiver = self
            .receivers
            .get(reference)
            .await?
            .ok_or_else(|| HookError::ReceiverNotFound(reference.to_string()))?;
        if receiver.is_registered() {
            return Ok(ReconcileOutcome::Unchanged);
        }

        match self.register(&receiver).await {
            Ok(hook_id) => {
                receiver.mark_registered(hook_id);
                self.receivers.put(receiver).await?;
                info!(receiver = %reference, "receiver registered");
                Ok(ReconcileOutcome::Registered)
            }
            Err(e) => {
                warn!(receiver = %reference, "registration failed: {}", e);
                receiver.record_error(&e);
                self.receivers.put(receiver).await?;
                Err(e)
            }
        }
    }

    /// Receiver deletion. Removes the remote hook (found by callback marker,
    /// so hooks from earlier process lifetimes are covered) and then the
    /// receiver itself. Any failure keeps the receiver for a later retry.
    pub async fn finalize(
        &self,
        ctx: &LeaderContext,
        reference: &ReceiverRef,
    ) -> Result<ReconcileOutcome> {
        if !ctx.is_active() {
            debug!(receiver = %reference, "not leader, skipping finalize");
            return Ok(ReconcileOutcome::Skipped);
        }
        let guard = self.locks.lock(reference).await;

        let Some(mut receiver) = self.receivers.get(reference).await? else {
            return Ok(ReconcileOutcome::Removed);
        };

        if let Err(e) = self.deregister(&receiver).await {
            warn!(receiver = %reference, "hook deletion failed: {}", e);
            receiver.record_error(&e);
            self.receivers.put(receiver).await?;
            return Err(e);
        }

        receiver.mark_unregistered();
        self.receivers.remove(reference).await?;
        drop(guard);
        self.locks.forget(reference);
        info!(receiver = %reference, "receiver removed");
        Ok(ReconcileOutcome::Removed)
    }

    /// Reconcile every stored receiver, at most `workers` at a time.
    pub async fn reconcile_all(
        &self,
        ctx: &LeaderContext,
    ) -> Result<Vec<(ReceiverRef, Result<ReconcileOutcome>)>> {
        if !ctx.is_active() {
            return Ok(Vec::new());
        }
        let references: Vec<_> = self
            .receivers
            .list()
            .await?
            .into_iter()
            .map(|r| r.reference)
            .collect();

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for reference in references {
            let manager = self.clone();
            let ctx = ctx.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = manager.reconcile(&ctx, &reference).await;
                (reference, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((reference, result)) => {
                    if let Err(e) = &result {
                        error!(receiver = %reference, "reconcile failed: {}", e);
                    }
                    results.push((reference, result));
                }
                Err(e) => error!("reconcile task panicked: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn register(&self, receiver: &WebhookReceiver) -> Result<Option<String>> {
        let remote = self.registry.get(receiver.spec.provider)?;
        let token = self
            .credentials
            .access_token(&receiver.spec.credential)
            .await?;
        remote.create_hook(receiver, &token).await
    }

    async fn deregister(&self, receiver: &WebhookReceiver) -> Result<()> {
        let remote = self.registry.get(receiver.spec.provider)?;
        let token = self
            .credentials
            .access_token(&receiver.spec.credential)
            .await?;
        remote.delete_hook(receiver, &token).await
    }
}
