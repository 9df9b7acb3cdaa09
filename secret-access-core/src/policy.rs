//! Refresh policies: decide when to refresh, and can eagerly prefetch for
//! every reference they've been told about.
//!
//! `PollingRefreshPolicy`'s background worker uses `tokio::spawn` +
//! `tokio_util::sync::CancellationToken` for cooperative shutdown.
//! `EventDrivenRefreshPolicy` instead rides the existing [`EventBus`]: it
//! subscribes to externally published `SecretRefreshRequested` events and
//! maps each one to a `trigger_refresh` call.

use crate::cache::Cache;
use crate::event::{
    EventBus, EventHandler, EventTopic, RefreshReason, SecretAccessEvent, SecretRefreshRequested,
    SecretRefreshed,
};
use crate::model::{AccessCredential, Secret, SecretReference, StoreType};
use crate::provider::SecretProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `stop()` waits for a background worker to finish a cooperative
/// shutdown before giving up on joining it.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The subset of [`crate::provider::ProviderRegistry`] a policy needs,
/// expressed as a trait so policies don't have to depend on the concrete
/// registry type. `ProviderRegistry` implements it directly.
pub trait ProviderLookup: Send + Sync {
    /// See [`crate::provider::ProviderRegistry::find_for`].
    fn find_for(&self, store_type: StoreType) -> Option<Arc<dyn SecretProvider>>;
}

impl ProviderLookup for crate::provider::ProviderRegistry {
    fn find_for(&self, store_type: StoreType) -> Option<Arc<dyn SecretProvider>> {
        crate::provider::ProviderRegistry::find_for(self, store_type)
    }
}

/// A strategy deciding when a reference should be re-fetched, and driving
/// out-of-band refreshes for every reference it has been told about via
/// [`RefreshPolicy::register_secret`].
#[async_trait]
pub trait RefreshPolicy: Send + Sync {
    /// Bind this policy to the provider lookup and cache it should drive.
    /// Idempotent; safe to call again to rebind.
    async fn apply(&self, registry: Arc<dyn ProviderLookup>, cache: Arc<Cache>);

    /// A cheap predicate consulted by the resolver when deciding whether to
    /// honor a cache hit. The canonical rule: `true` iff `cached` is absent
    /// or the cache considers the entry stale.
    async fn is_refresh_needed(&self, reference: &SecretReference, cached: Option<&Secret>) -> bool;

    /// Request an out-of-band refresh for a registered reference. Emits
    /// `SecretRefreshRequested`, then performs the fetch/cache update.
    /// Errors are reported via the event bus, not raised to the caller.
    async fn trigger_refresh(&self, reference: &SecretReference, reason: RefreshReason);

    /// Register a reference's credential with this policy, so it can drive
    /// refreshes for it.
    fn register_secret(&self, reference: SecretReference, credential: AccessCredential);

    /// Stop driving refreshes for a reference.
    fn unregister_secret(&self, reference: &SecretReference);

    /// Start any background worker. Idempotent.
    async fn start(&self);

    /// Stop any background worker. Returns only after it has ceased (or the
    /// grace period elapsed).
    async fn stop(&self);

    /// Whether a background worker is currently running.
    async fn is_running(&self) -> bool;
}

struct Bound {
    registry: Arc<dyn ProviderLookup>,
    cache: Arc<Cache>,
}

async fn fetch_and_cache(
    bound: &Bound,
    event_bus: &EventBus,
    reference: &SecretReference,
    credential: &AccessCredential,
    reason: RefreshReason,
) {
    event_bus.publish(SecretAccessEvent::RefreshRequested(SecretRefreshRequested::new(
        reference.clone(),
        reason,
    )));

    let Some(provider) = bound.registry.find_for(reference.store_type()) else {
        tracing::warn!(%reference, "no provider supports this reference's store type; skipping refresh");
        return;
    };

    match provider.fetch_secret(reference, credential).await {
        Ok(secret) => {
            let version = secret.metadata().version().to_string();
            bound.cache.put(secret);
            event_bus.publish(SecretAccessEvent::Refreshed(SecretRefreshed::new(
                reference.clone(),
                version,
                true,
            )));
        }
        Err(error) => {
            tracing::warn!(%reference, %error, "refresh attempt failed");
        }
    }
}

/// Background-timer strategy: on each tick of `interval`, calls
/// `trigger_refresh` for every registered reference the cache considers
/// stale.
pub struct PollingRefreshPolicy {
    self_ref: Weak<Self>,
    interval: Duration,
    bound: RwLock<Option<Bound>>,
    event_bus: Arc<EventBus>,
    credentials: RwLock<HashMap<SecretReference, AccessCredential>>,
    cancel: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingRefreshPolicy {
    /// Build a new polling policy ticking every `interval`.
    pub fn new(interval: Duration, event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            interval,
            bound: RwLock::new(None),
            event_bus,
            credentials: RwLock::new(HashMap::new()),
            cancel: Mutex::new(None),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    fn bound_snapshot(&self) -> Option<Bound> {
        self.bound.read().unwrap().as_ref().map(|b| Bound {
            registry: b.registry.clone(),
            cache: b.cache.clone(),
        })
    }

    async fn tick(&self) {
        let Some(bound) = self.bound_snapshot() else {
            return;
        };
        let due: Vec<(SecretReference, AccessCredential)> = {
            let credentials = self.credentials.read().unwrap();
            credentials
                .iter()
                .filter(|(reference, _)| bound.cache.is_stale(reference))
                .map(|(r, c)| (r.clone(), c.clone()))
                .collect()
        };
        for (reference, credential) in due {
            fetch_and_cache(&bound, &self.event_bus, &reference, &credential, RefreshReason::PolicyTick).await;
        }
    }
}

#[async_trait]
impl RefreshPolicy for PollingRefreshPolicy {
    async fn apply(&self, registry: Arc<dyn ProviderLookup>, cache: Arc<Cache>) {
        *self.bound.write().unwrap() = Some(Bound { registry, cache });
    }

    async fn is_refresh_needed(&self, _reference: &SecretReference, cached: Option<&Secret>) -> bool {
        cached.is_none()
    }

    async fn trigger_refresh(&self, reference: &SecretReference, reason: RefreshReason) {
        let credential = self.credentials.read().unwrap().get(reference).cloned();
        let Some(credential) = credential else {
            tracing::warn!(%reference, "trigger_refresh called for an unregistered reference");
            return;
        };
        let Some(bound) = self.bound_snapshot() else {
            tracing::warn!("trigger_refresh called before apply()");
            return;
        };
        fetch_and_cache(&bound, &self.event_bus, reference, &credential, reason).await;
    }

    fn register_secret(&self, reference: SecretReference, credential: AccessCredential) {
        self.credentials.write().unwrap().insert(reference, credential);
    }

    fn unregister_secret(&self, reference: &SecretReference) {
        self.credentials.write().unwrap().remove(reference);
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(policy) = self.self_ref.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => policy.tick().await,
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    async fn stop(&self) {
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

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Reactive strategy: does not poll on a timer. Instead subscribes to the
/// event bus and treats any externally published `SecretRefreshRequested`
/// (one not originating from this policy's own `trigger_refresh`) as a
/// trigger.
pub struct EventDrivenRefreshPolicy {
    self_ref: Weak<Self>,
    bound: RwLock<Option<Bound>>,
    event_bus: Arc<EventBus>,
    credentials: RwLock<HashMap<SecretReference, AccessCredential>>,
    running: AtomicBool,
}

impl EventDrivenRefreshPolicy {
    /// Build a new event-driven policy publishing through and subscribing to
    /// `event_bus`.
    pub fn new(event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            bound: RwLock::new(None),
            event_bus,
            credentials: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        })
    }

    fn bound_snapshot(&self) -> Option<Bound> {
        self.bound.read().unwrap().as_ref().map(|b| Bound {
            registry: b.registry.clone(),
            cache: b.cache.clone(),
        })
    }
}

struct RequestedHandler(Weak<EventDrivenRefreshPolicy>);

impl EventHandler for RequestedHandler {
    fn handle(
        &self,
        event: &SecretAccessEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let SecretAccessEvent::RefreshRequested(requested) = event else {
            return Ok(());
        };
        if requested.reason == RefreshReason::PolicyTick {
            return Ok(()); // avoid looping back on our own polling siblings
        }
        let Some(policy) = self.0.upgrade() else {
            return Ok(());
        };
        let reference = requested.reference.clone();
        tokio::spawn(async move {
            policy.trigger_refresh(&reference, RefreshReason::ExternalNotification).await;
        });
        Ok(())
    }
}

#[async_trait]
impl RefreshPolicy for EventDrivenRefreshPolicy {
    async fn apply(&self, registry: Arc<dyn ProviderLookup>, cache: Arc<Cache>) {
        *self.bound.write().unwrap() = Some(Bound { registry, cache });
    }

    async fn is_refresh_needed(&self, _reference: &SecretReference, cached: Option<&Secret>) -> bool {
        cached.is_none()
    }

    async fn trigger_refresh(&self, reference: &SecretReference, reason: RefreshReason) {
        let credential = self.credentials.read().unwrap().get(reference).cloned();
        let Some(credential) = credential else {
            tracing::warn!(%reference, "trigger_refresh called for an unregistered reference");
            return;
        };
        let Some(bound) = self.bound_snapshot() else {
            tracing::warn!("trigger_refresh called before apply()");
            return;
        };
        fetch_and_cache(&bound, &self.event_bus, reference, &credential, reason).await;
    }

    fn register_secret(&self, reference: SecretReference, credential: AccessCredential) {
        self.credentials.write().unwrap().insert(reference, credential);
    }

    fn unregister_secret(&self, reference: &SecretReference) {
        self.credentials.write().unwrap().remove(reference);
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(policy) = self.self_ref.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        self.event_bus.subscribe(
            EventTopic::RefreshRequested,
            Arc::new(RequestedHandler(Arc::downgrade(&policy))),
        );
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.event_bus.unsubscribe_all(EventTopic::RefreshRequested);
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
