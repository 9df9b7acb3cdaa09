#![deny(missing_docs)]
//! Stub [`SecretProvider`] for a CyberArk-style enterprise vault.
//!
//! This crate provides the correct trait impl shape for a CyberArk-backed
//! provider. The actual vault SDK integration is not implemented — every
//! `fetch_secret` call returns an [`AccessError`] naming the stub.

use async_trait::async_trait;
use secret_access_core::{AccessCredential, AccessError, Secret, SecretProvider, SecretReference, StoreType};

/// Stub provider for a CyberArk-style vault, reached at `base_url`.
pub struct CyberArkProvider {
    base_url: String,
}

impl CyberArkProvider {
    /// Build a new stub provider pointed at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// The configured vault base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SecretProvider for CyberArkProvider {
    async fn fetch_secret(
        &self,
        reference: &SecretReference,
        _credential: &AccessCredential,
    ) -> Result<Secret, AccessError> {
        Err(AccessError::new(
            reference.clone(),
            format!(
                "CyberArkProvider is a stub — would resolve {} against {}",
                reference.name(),
                self.base_url
            ),
        ))
    }

    fn supports_store(&self, store_type: StoreType) -> bool {
        store_type == StoreType::CyberArk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn object_safety() {
        _assert_send_sync::<Box<dyn SecretProvider>>();
        _assert_send_sync::<Arc<dyn SecretProvider>>();
    }

    #[tokio::test]
    async fn matches_cyberark_store_but_returns_a_stub_access_error() {
        let provider = CyberArkProvider::new("https://cyberark.internal:1858");
        let reference = SecretReference::new(StoreType::CyberArk, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("unused").unwrap();

        assert!(provider.supports_store(StoreType::CyberArk));
        let err = provider.fetch_secret(&reference, &credential).await.unwrap_err();
        assert!(err.message().unwrap().contains("stub"));
    }

    #[test]
    fn rejects_wrong_store_type() {
        let provider = CyberArkProvider::new("https://cyberark.internal:1858");
        assert!(!provider.supports_store(StoreType::AwsSecretsManager));
    }
}
