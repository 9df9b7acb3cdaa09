//! The library's single entry point: register references, read secrets, and
//! shut everything down deterministically.
//!
//! A flat `name -> resolver` map sits behind a builder-constructed facade
//! that owns a shared cache and starts a background coordinator
//! automatically.

use crate::cache::Cache;
use crate::coordinator::RefreshCoordinator;
use crate::error::{ConfigurationError, CoreError};
use crate::event::{EventBus, EventHandler, EventTopic};
use crate::model::{AccessCredential, Secret, SecretReference};
use crate::policy::RefreshPolicy;
use crate::provider::{ProviderRegistry, SecretProvider};
use crate::resolver::ResolverAggregate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The secret access library's entry point.
///
/// Build one with [`SecretAccessFacadeBuilder`]. Cheaply cloneable (it's a
/// thin handle over `Arc`-shared state) — clone it to hand out to multiple
/// owners rather than wrapping it in your own `Arc`.
#[derive(Clone)]
pub struct SecretAccessFacade {
    resolvers: Arc<RwLock<HashMap<String, Arc<ResolverAggregate>>>>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<Cache>,
    event_bus: Arc<EventBus>,
    coordinator: Arc<RefreshCoordinator>,
    default_policy: Option<Arc<dyn RefreshPolicy>>,
}

impl SecretAccessFacade {
    /// Register `name` to resolve `reference` using `credential`. `policy`
    /// overrides the facade's default policy for this reference only; `None`
    /// falls back to the default (if any).
    ///
    /// Fails with [`ConfigurationError`] if `name` is already registered or
    /// if no provider supports `reference`'s store type.
    pub async fn register(
        &self,
        name: impl Into<String>,
        reference: SecretReference,
        credential: AccessCredential,
        policy: Option<Arc<dyn RefreshPolicy>>,
    ) -> Result<(), CoreError> {
        let name = name.into();
        if self.resolvers.read().unwrap().contains_key(&name) {
            return Err(ConfigurationError::new(format!("'{name}' is already registered")).into());
        }

        let policy = policy.or_else(|| self.default_policy.clone());
        let resolver = ResolverAggregate::new(
            reference,
            credential,
            self.registry.clone(),
            self.cache.clone(),
            policy,
            self.event_bus.clone(),
        )
        .await?;

        self.coordinator.register_secret(resolver.clone());
        self.resolvers.write().unwrap().insert(name, resolver);
        Ok(())
    }

    /// Remove `name`'s registration and stop its policy. A no-op if `name`
    /// isn't registered.
    pub async fn unregister(&self, name: &str) {
        let resolver = self.resolvers.write().unwrap().remove(name);
        if let Some(resolver) = resolver {
            self.coordinator.unregister_secret(resolver.reference());
            resolver.stop().await;
        }
    }

    /// Resolve `name`'s current value, refreshing if the cache considers it
    /// stale or the bound policy says so.
    pub async fn get(&self, name: &str) -> Result<Secret, CoreError> {
        let resolver = self.resolver_for(name)?;
        resolver.get_secret().await
    }

    /// Resolve `name`'s current value as a UTF-8 string, zeroing the
    /// intermediate buffer as soon as the copy is made.
    pub async fn get_as_string(&self, name: &str) -> Result<String, CoreError> {
        let resolver = self.resolver_for(name)?;
        let secret = resolver.get_secret().await?;
        let scoped = secret.into_scoped();
        Ok(scoped.with_bytes(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Force a refresh of `name`, bypassing the cache's freshness check.
    pub async fn refresh(&self, name: &str) -> Result<Secret, CoreError> {
        let resolver = self.resolver_for(name)?;
        resolver.refresh_secret().await
    }

    fn resolver_for(&self, name: &str) -> Result<Arc<ResolverAggregate>, CoreError> {
        self.resolvers
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::new(format!("'{name}' is not registered")).into())
    }

    /// The shared event bus, for subscribing to lifecycle events.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Stop the background coordinator and every registered policy, then
    /// clear the cache. Idempotent; safe to call more than once.
    ///
    /// A policy shared across several registrations (the default policy,
    /// most commonly) is stopped exactly once no matter how many resolvers
    /// reference it.
    pub async fn close(&self) {
        self.coordinator.stop().await;
        let resolvers: Vec<Arc<ResolverAggregate>> = self.resolvers.read().unwrap().values().cloned().collect();

        let mut policies: Vec<Arc<dyn RefreshPolicy>> = Vec::new();
        for resolver in &resolvers {
            resolver.stop().await;
            if let Some(policy) = resolver.policy() {
                if !policies.iter().any(|bound| Arc::ptr_eq(bound, &policy)) {
                    policies.push(policy);
                }
            }
        }
        for policy in policies {
            if policy.is_running().await {
                policy.stop().await;
            }
        }

        self.cache.clear();
    }
}

/// Builds a [`SecretAccessFacade`].
pub struct SecretAccessFacadeBuilder {
    registry: ProviderRegistry,
    cache: Option<Arc<Cache>>,
    default_policy: Option<Arc<dyn RefreshPolicy>>,
    event_sink: Option<Arc<dyn EventHandler>>,
    default_ttl: Option<std::time::Duration>,
}

impl SecretAccessFacadeBuilder {
    /// Start a new builder with no providers, no cache, and no default
    /// policy.
    pub fn new() -> Self {
        Self {
            registry: ProviderRegistry::new(),
            cache: None,
            default_policy: None,
            event_sink: None,
            default_ttl: None,
        }
    }

    /// Register a provider. Providers are tried in registration order when
    /// resolving a reference's store type.
    pub fn with_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.registry.register(provider);
        self
    }

    /// Use an explicit cache instead of a freshly built default one.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the default refresh policy applied to references registered
    /// without an explicit override.
    pub fn with_default_policy(mut self, policy: Arc<dyn RefreshPolicy>) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Subscribe `handler` to every event published on the built facade's
    /// bus, for the lifetime of the facade.
    pub fn with_event_sink(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_sink = Some(handler);
        self
    }

    /// Override the cache's default TTL.
    pub fn with_default_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Build the facade and start its background coordinator.
    ///
    /// Fails with [`ConfigurationError`] if no cache was supplied via
    /// [`SecretAccessFacadeBuilder::with_cache`].
    pub async fn build(self) -> Result<SecretAccessFacade, ConfigurationError> {
        let cache = self
            .cache
            .ok_or_else(|| ConfigurationError::new("a cache is required to build a SecretAccessFacade"))?;
        if let Some(ttl) = self.default_ttl {
            cache.set_default_ttl(ttl);
        }
        let event_bus = Arc::new(EventBus::new());
        if let Some(sink) = self.event_sink {
            event_bus.subscribe(EventTopic::All, sink);
        }
        let coordinator = RefreshCoordinator::new(event_bus.clone());
        coordinator.start().await;

        Ok(SecretAccessFacade {
            resolvers: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(self.registry),
            cache,
            event_bus,
            coordinator,
            default_policy: self.default_policy,
        })
    }
}

impl Default for SecretAccessFacadeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::model::{SecretMetadata, StoreType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        store_type: StoreType,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SecretProvider for CountingProvider {
        async fn fetch_secret(
            &self,
            reference: &SecretReference,
            _credential: &AccessCredential,
        ) -> Result<Secret, AccessError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Secret::new(
                reference.name(),
                format!("value-{n}").into_bytes(),
                SecretMetadata::new(format!("v{n}"), reference.store_type(), reference.clone()),
            ))
        }

        fn supports_store(&self, store_type: StoreType) -> bool {
            store_type == self.store_type
        }
    }

    async fn facade_with_provider(calls: Arc<AtomicUsize>) -> SecretAccessFacade {
        SecretAccessFacadeBuilder::new()
            .with_provider(Arc::new(CountingProvider {
                store_type: StoreType::CyberArk,
                calls,
            }))
            .with_cache(Arc::new(Cache::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn build_without_a_cache_fails_with_configuration_error() {
        let err = SecretAccessFacadeBuilder::new()
            .with_provider(Arc::new(CountingProvider {
                store_type: StoreType::CyberArk,
                calls: Arc::new(AtomicUsize::new(0)),
            }))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cache"));
    }

    #[tokio::test]
    async fn register_then_get_resolves_through_the_provider() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("k").unwrap();
        facade.register("db", reference, credential, None).await.unwrap();

        let secret = facade.get("db").await.unwrap();
        secret.with_bytes(|b| assert_eq!(b, b"value-1"));
        facade.close().await;
    }

    #[tokio::test]
    async fn get_as_string_decodes_utf8_and_zeroes_the_scoped_copy() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("k").unwrap();
        facade.register("db", reference, credential, None).await.unwrap();

        let value = facade.get_as_string("db").await.unwrap();
        assert_eq!(value, "value-1");
        facade.close().await;
    }

    #[tokio::test]
    async fn register_twice_with_the_same_name_fails() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("k").unwrap();
        facade.register("db", reference.clone(), credential.clone(), None).await.unwrap();

        let err = facade.register("db", reference, credential, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        facade.close().await;
    }

    #[tokio::test]
    async fn get_on_unregistered_name_fails_with_configuration_error() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        let err = facade.get("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        facade.close().await;
    }

    #[tokio::test]
    async fn unregister_then_get_fails() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("k").unwrap();
        facade.register("db", reference, credential, None).await.unwrap();
        facade.unregister("db").await;

        let err = facade.get("db").await.unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        facade.close().await;
    }

    #[tokio::test]
    async fn refresh_forces_a_new_fetch_even_when_cache_is_warm() {
        let calls = Arc::new(AtomicUsize::new(0));
        let facade = facade_with_provider(calls.clone()).await;
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("k").unwrap();
        facade.register("db", reference, credential, None).await.unwrap();

        facade.get("db").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        facade.refresh("db").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        facade.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let facade = facade_with_provider(Arc::new(AtomicUsize::new(0))).await;
        facade.close().await;
        facade.close().await;
    }
}
