//! The per-reference resolution state machine.
//!
//! Single-flight is a `tokio::sync::Mutex` held for the duration of the
//! provider call — the one documented exception to "never hold a lock
//! across a provider call". Since a `ResolverAggregate` is constructed one
//! per reference (the facade owns exactly one per registered name), that
//! mutex *is* the per-reference single-flight ticket: a second caller
//! blocked on it simply waits for the leader's fetch and then re-reads the
//! (now fresh) cache instead of issuing its own `fetch_secret`.

use crate::cache::Cache;
use crate::error::{AccessError, ConfigurationError, CoreError};
use crate::event::{EventBus, SecretAccessEvent, SecretRefreshed, SecretRolloverDetected};
use crate::model::{AccessCredential, Secret, SecretReference, VERSION_HINT_INACTIVE};
use crate::policy::RefreshPolicy;
use crate::provider::{ProviderRegistry, SecretProvider};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshot of a prior fetch kept only long enough to compare against the
/// next one — never exposed outside this module.
struct PriorFetch {
    version: String,
    buffer_copy: Secret,
}

/// Owns one [`SecretReference`], its [`AccessCredential`], the provider
/// chosen for it, and the serialized read-through/refresh state machine.
///
/// Construction fails with [`ConfigurationError`] if no registered provider
/// supports the reference's store type.
pub struct ResolverAggregate {
    reference: SecretReference,
    credential: AccessCredential,
    provider: Arc<dyn SecretProvider>,
    cache: Arc<Cache>,
    policy: Option<Arc<dyn RefreshPolicy>>,
    event_bus: Arc<EventBus>,
    last_retrieved: Mutex<Option<PriorFetch>>,
    in_flight: Mutex<()>,
}

impl ResolverAggregate {
    /// Build a new aggregate for `reference`, looking up a supporting
    /// provider in `registry`. Fails with [`ConfigurationError`] if none
    /// supports `reference.store_type()`.
    ///
    /// If `policy` is given, it is `apply`'d with `(registry, cache)`,
    /// `register_secret`'d for this reference/credential pair, and started
    /// (if not already running).
    pub async fn new(
        reference: SecretReference,
        credential: AccessCredential,
        registry: Arc<ProviderRegistry>,
        cache: Arc<Cache>,
        policy: Option<Arc<dyn RefreshPolicy>>,
        event_bus: Arc<EventBus>,
    ) -> Result<Arc<Self>, CoreError> {
        let provider = registry.find_for(reference.store_type()).ok_or_else(|| {
            ConfigurationError::new(format!(
                "no provider registered supports store type {:?}",
                reference.store_type()
            ))
        })?;

        let aggregate = Arc::new(Self {
            reference,
            credential,
            provider,
            cache,
            policy: policy.clone(),
            event_bus,
            last_retrieved: Mutex::new(None),
            in_flight: Mutex::new(()),
        });

        if let Some(policy) = policy {
            policy.apply(registry, aggregate.cache.clone()).await;
            policy.register_secret(aggregate.reference.clone(), aggregate.credential.clone());
            if !policy.is_running().await {
                policy.start().await;
            }
        }

        Ok(aggregate)
    }

    /// The reference this aggregate resolves.
    pub fn reference(&self) -> &SecretReference {
        &self.reference
    }

    /// Read path: return the cached secret if fresh, otherwise fetch.
    /// Consults the bound [`RefreshPolicy`] (or the default
    /// "stale-or-missing" rule when none is bound) to decide whether a cache
    /// hit is honored. Concurrent misses on the same reference coalesce into
    /// a single provider call.
    pub async fn get_secret(&self) -> Result<Secret, CoreError> {
        let cached = self.cache.get(&self.reference);
        if !self.is_refresh_due_given(cached.as_ref()).await {
            if let Some(secret) = cached {
                self.remember(&secret).await;
                return Ok(secret);
            }
        }

        self.fetch_coalesced().await
    }

    /// Whether this aggregate's bound policy (or the default
    /// "stale-or-missing" rule, when none is bound) currently says a refresh
    /// is due, given the cache's present contents. Used by
    /// [`ResolverAggregate::get_secret`] and by the refresh coordinator's
    /// periodic sweep to decide which registered references to actually
    /// touch on a given pass.
    pub async fn is_refresh_due(&self) -> bool {
        let cached = self.cache.get(&self.reference);
        self.is_refresh_due_given(cached.as_ref()).await
    }

    async fn is_refresh_due_given(&self, cached: Option<&Secret>) -> bool {
        match &self.policy {
            Some(policy) => policy.is_refresh_needed(&self.reference, cached).await,
            None => cached.is_none() || self.cache.is_stale(&self.reference),
        }
    }

    /// Force a fetch from the provider regardless of cache freshness,
    /// update the cache, run rollover detection, and publish lifecycle
    /// events. Unlike [`ResolverAggregate::get_secret`]'s internal fetch
    /// path, this never short-circuits on an already-fresh cache entry —
    /// "refresh" means a new provider call every time it is called.
    pub async fn refresh_secret(&self) -> Result<Secret, CoreError> {
        let _flight = self.in_flight.lock().await;
        self.do_fetch().await
    }

    /// Like `refresh_secret`, but lets a caller that coalesced behind
    /// `_flight` observe the leader's just-produced cache entry instead of
    /// issuing a redundant fetch of its own. Only `get_secret`'s internal
    /// miss path uses this — an explicit `refresh_secret` call always
    /// forces a new fetch.
    async fn fetch_coalesced(&self) -> Result<Secret, CoreError> {
        let _flight = self.in_flight.lock().await;

        if let Some(cached) = self.cache.get(&self.reference) {
            if !self.cache.is_stale(&self.reference) {
                self.remember(&cached).await;
                return Ok(cached);
            }
        }

        self.do_fetch().await
    }

    /// The actual fetch/cache/rollover/publish sequence. Callers are
    /// expected to already hold `_flight`.
    async fn do_fetch(&self) -> Result<Secret, CoreError> {
        // 1. Snapshot the prior lastRetrieved (may be empty) before the
        //    fetch mutates it, so rollover detection compares against the
        //    value that was current before this fetch, not after.
        let prior = self.last_retrieved.lock().await.take();

        // 2. Fetch. On provider error, propagate without touching cache or
        //    lastRetrieved.
        let secret = self
            .provider
            .fetch_secret(&self.reference, &self.credential)
            .await
            .map_err(CoreError::Access)?;

        // 3. Store as the new lastRetrieved (a defensive copy; the cache
        //    and the caller each get their own independent copy too).
        let for_last_retrieved = secret.defensive_copy();
        let for_caller = secret.defensive_copy();
        *self.last_retrieved.lock().await = Some(PriorFetch {
            version: for_last_retrieved.metadata().version().to_string(),
            buffer_copy: for_last_retrieved,
        });

        // 4. Rollover detection, using the pre-fetch snapshot.
        self.detect_rollover(prior.as_ref(), &secret);

        // 5. Cache the freshly fetched secret.
        let value_changed = match &prior {
            None => true,
            Some(p) => !p.buffer_copy.value_bytes_eq(&secret),
        };
        let version = secret.metadata().version().to_string();
        self.cache.put(secret);

        // 6/7. Publish SecretRefreshed after the rollover event (if any) and
        // after the cache.put.
        self.event_bus
            .publish(SecretAccessEvent::Refreshed(SecretRefreshed::new(
                self.reference.clone(),
                version,
                value_changed,
            )));

        // 8. Return to the caller.
        Ok(for_caller)
    }

    /// Applies only when `reference.version_hint()` is `"active"`
    /// (case-insensitive). Forms the `"inactive"` sibling reference; if it is
    /// cached, a prior fetch exists, and the prior version differs from the
    /// fresh one, publishes `SecretRolloverDetected`. Advisory only — never
    /// mutates the cache.
    fn detect_rollover(&self, prior: Option<&PriorFetch>, fresh: &Secret) {
        if !self.reference.is_active_hint() {
            return;
        }
        let Some(prior) = prior else { return };
        if prior.version == fresh.metadata().version() {
            return;
        }
        let sibling = self.reference.sibling(VERSION_HINT_INACTIVE);
        if self.cache.get(&sibling).is_none() {
            return;
        }
        self.event_bus
            .publish(SecretAccessEvent::RolloverDetected(SecretRolloverDetected::new(
                self.reference.clone(),
                sibling,
                fresh.metadata().version().to_string(),
            )));
    }

    async fn remember(&self, secret: &Secret) {
        let mut guard = self.last_retrieved.lock().await;
        *guard = Some(PriorFetch {
            version: secret.metadata().version().to_string(),
            buffer_copy: secret.defensive_copy(),
        });
    }

    /// Detach this aggregate's reference from its bound refresh policy, if
    /// any. Does not stop the policy's background worker itself — a policy
    /// instance may be shared across several aggregates (the facade's
    /// default policy is exactly this), so only a caller that knows it owns
    /// the policy outright (see [`ResolverAggregate::policy`]) should stop
    /// it.
    pub async fn stop(&self) {
        if let Some(policy) = &self.policy {
            policy.unregister_secret(&self.reference);
        }
    }

    /// The refresh policy bound to this aggregate, if any.
    pub fn policy(&self) -> Option<Arc<dyn RefreshPolicy>> {
        self.policy.clone()
    }
}
