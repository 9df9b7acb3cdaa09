#![deny(missing_docs)]
//! Resolution and freshness engine for secrets held in remote stores (AWS
//! Secrets Manager, CyberArk, and similar): caching, refresh policies,
//! rollover detection between an `"active"`/`"inactive"` reference pair, and
//! a lifecycle event bus.
//!
//! [`SecretAccessFacade`], built via [`SecretAccessFacadeBuilder`], is the
//! entry point. Store adapters implement [`SecretProvider`] and register
//! with the builder; `secret-access-aws` and `secret-access-cyberark` ship
//! the two adapters this crate ships bindings for.

mod cache;
mod coordinator;
mod error;
mod event;
mod facade;
mod model;
mod policy;
mod provider;
mod resolver;

#[cfg(feature = "test-utils")]
pub mod test_support;

pub use cache::{Cache, DEFAULT_TTL};
pub use coordinator::{RefreshCoordinator, DEFAULT_SWEEP_INTERVAL};
pub use error::{AccessError, ConfigurationError, CoreError, ValidationError};
pub use event::{
    EventBus, EventHandler, EventId, EventTopic, RefreshReason, SecretAccessEvent,
    SecretRefreshRequested, SecretRefreshed, SecretRolloverDetected,
};
pub use facade::{SecretAccessFacade, SecretAccessFacadeBuilder};
pub use model::{
    AccessCredential, CredentialMethod, CredentialPayload, STSAssumeRoleConfig, Secret, SecretId,
    SecretMetadata, SecretReference, ScopedSecret, StoreType, VERSION_HINT_ACTIVE,
    VERSION_HINT_INACTIVE, VERSION_HINT_LATEST,
};
pub use policy::{EventDrivenRefreshPolicy, PollingRefreshPolicy, ProviderLookup, RefreshPolicy};
pub use provider::{ProviderRegistry, SecretProvider};
pub use resolver::ResolverAggregate;
