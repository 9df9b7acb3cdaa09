//! The provider contract and the registry that routes a store type to the
//! first provider that advertises support for it.
//!
//! A provider self-advertises support via `supports_store` rather than being
//! paired with an external matcher, so registration order alone decides
//! which provider wins a tie between two that both support the same store
//! type.

use crate::error::AccessError;
use crate::model::{AccessCredential, Secret, SecretReference, StoreType};
use async_trait::async_trait;
use std::sync::Arc;

/// An adapter that speaks one backing store's protocol.
///
/// Implemented by store adapters (`secret-access-aws`, `secret-access-cyberark`,
/// and test doubles). Opaque to the core beyond this contract.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch a secret for `reference`, authenticating with `credential`.
    ///
    /// Implementations must set the returned secret's
    /// `metadata().source_ref()` to `reference` and `metadata().store_type()`
    /// to `reference.store_type()`, and must populate `version` with a
    /// stable opaque identifier: the same bytes iff the underlying secret is
    /// unchanged, a new identifier on every rotation.
    async fn fetch_secret(
        &self,
        reference: &SecretReference,
        credential: &AccessCredential,
    ) -> Result<Secret, AccessError>;

    /// True iff this provider can serve references of `store_type`.
    fn supports_store(&self, store_type: StoreType) -> bool;

    /// A cheap staleness check: the latest version identifier for
    /// `reference`, without fetching the full secret. `None` if the provider
    /// doesn't support this (the default).
    async fn get_latest_version(
        &self,
        _reference: &SecretReference,
        _credential: &AccessCredential,
    ) -> Option<String> {
        None
    }

    /// True iff this provider can push change notifications rather than
    /// requiring polling. `false` by default.
    fn supports_change_notifications(&self) -> bool {
        false
    }
}

/// An append-only, insertion-order list of providers.
///
/// `find_for` returns the first registered provider whose `supports_store`
/// is true. There is no deregistration — a provider's lifetime is the
/// process's, matching `neuron_secret::SecretRegistry`'s own posture.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn SecretProvider>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Append a provider, builder-style.
    pub fn with_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Append a provider.
    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.push(provider);
    }

    /// The first registered provider supporting `store_type`, if any.
    pub fn find_for(&self, store_type: StoreType) -> Option<Arc<dyn SecretProvider>> {
        self.providers
            .iter()
            .find(|p| p.supports_store(store_type))
            .cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
