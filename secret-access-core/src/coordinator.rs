//! The refresh coordinator: a periodic sweep across every registered
//! resolver, independent of any individual reference's bound
//! [`RefreshPolicy`].
//!
//! `register_secret` takes a fully-constructed [`ResolverAggregate`] rather
//! than a bare policy, so the coordinator never holds a registration with a
//! null credential — by the time an aggregate exists, its credential and
//! provider are already resolved.

use crate::event::{EventBus, RefreshReason, SecretAccessEvent, SecretRefreshRequested};
use crate::model::SecretReference;
use crate::resolver::ResolverAggregate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The reference implementation's default sweep interval: one minute.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long `stop()` waits for the sweep task to finish before giving up on
/// joining it.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Periodically sweeps every registered reference and asks its resolver to
/// refresh when due, independent of whether that reference has its own
/// `RefreshPolicy` driving it out-of-band.
pub struct RefreshCoordinator {
    self_ref: Weak<Self>,
    entries: RwLock<HashMap<SecretReference, Arc<ResolverAggregate>>>,
    event_bus: Arc<EventBus>,
    sweep_interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    /// Build a coordinator sweeping every [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(event_bus: Arc<EventBus>) -> Arc<Self> {
        Self::with_sweep_interval(event_bus, DEFAULT_SWEEP_INTERVAL)
    }

    /// Build a coordinator with an explicit sweep interval.
    pub fn with_sweep_interval(event_bus: Arc<EventBus>, sweep_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            entries: RwLock::new(HashMap::new()),
            event_bus,
            sweep_interval,
            cancel: Mutex::new(None),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Register `resolver` so the periodic sweep considers it. Replaces any
    /// existing registration for the same reference.
    pub fn register_secret(&self, resolver: Arc<ResolverAggregate>) {
        self.entries
            .write()
            .unwrap()
            .insert(resolver.reference().clone(), resolver);
    }

    /// Remove a reference from the sweep. A no-op if it wasn't registered.
    pub fn unregister_secret(&self, reference: &SecretReference) {
        self.entries.write().unwrap().remove(reference);
    }

    /// Force an immediate refresh of `reference`, if registered. Returns
    /// `false` if no resolver is registered for it.
    pub async fn trigger_refresh(&self, reference: &SecretReference, reason: RefreshReason) -> bool {
        let resolver = self.entries.read().unwrap().get(reference).cloned();
        let Some(resolver) = resolver else {
            return false;
        };
        self.event_bus.publish(SecretAccessEvent::RefreshRequested(SecretRefreshRequested::new(
            reference.clone(),
            reason,
        )));
        if let Err(error) = resolver.refresh_secret().await {
            tracing::warn!(%reference, %error, "coordinator-triggered refresh failed");
        }
        true
    }

    /// React to an externally published refresh request by forwarding it to
    /// the matching resolver, if one is registered.
    pub async fn handle_refresh_event(&self, event: &SecretRefreshRequested) {
        let resolver = self.entries.read().unwrap().get(&event.reference).cloned();
        let Some(resolver) = resolver else {
            return;
        };
        if let Err(error) = resolver.refresh_secret().await {
            tracing::warn!(reference = %event.reference, %error, "refresh triggered by external event failed");
        }
    }

    /// Sweeps every registered reference and, for each whose bound policy
    /// (or the default staleness rule, if none is bound) currently says a
    /// refresh is due, calls `trigger_refresh` — which publishes
    /// `SecretRefreshRequested` before performing the fetch, same as any
    /// other `trigger_refresh` path.
    async fn sweep(&self) {
        let resolvers: Vec<Arc<ResolverAggregate>> = self.entries.read().unwrap().values().cloned().collect();
        for resolver in resolvers {
            if resolver.is_refresh_due().await {
                self.trigger_refresh(resolver.reference(), RefreshReason::CoordinatorSweep).await;
            }
        }
    }

    /// Start the periodic sweep. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(coordinator) = self.self_ref.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => coordinator.sweep().await,
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop the periodic sweep. Returns only after it has ceased (or the
    /// grace period elapsed).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = tokio::time::timeout(STOP_GRACE_PERIOD, handle).await;
        }
    }

    /// Whether the periodic sweep is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
