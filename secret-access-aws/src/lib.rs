#![deny(missing_docs)]
//! Stub [`SecretProvider`] for AWS Secrets Manager.
//!
//! This crate provides the correct trait impl shape for an AWS Secrets
//! Manager-backed provider. The actual AWS SDK integration is not
//! implemented — every `fetch_secret` call returns an [`AccessError`]
//! naming the stub.

use async_trait::async_trait;
use secret_access_core::{AccessCredential, AccessError, Secret, SecretProvider, SecretReference, StoreType};

/// Stub provider for AWS Secrets Manager.
pub struct AwsSecretsManagerProvider;

impl AwsSecretsManagerProvider {
    /// Build a new stub provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AwsSecretsManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsManagerProvider {
    async fn fetch_secret(
        &self,
        reference: &SecretReference,
        _credential: &AccessCredential,
    ) -> Result<Secret, AccessError> {
        Err(AccessError::new(
            reference.clone(),
            format!(
                "AwsSecretsManagerProvider is a stub — would resolve {} in AWS Secrets Manager",
                reference.name()
            ),
        ))
    }

    fn supports_store(&self, store_type: StoreType) -> bool {
        store_type == StoreType::AwsSecretsManager
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
    async fn matches_aws_store_but_returns_a_stub_access_error() {
        let provider = AwsSecretsManagerProvider::new();
        let reference = SecretReference::new(StoreType::AwsSecretsManager, "db/creds").unwrap();
        let credential = AccessCredential::cyber_ark_api_key("unused").unwrap();

        assert!(provider.supports_store(StoreType::AwsSecretsManager));
        let err = provider.fetch_secret(&reference, &credential).await.unwrap_err();
        assert!(err.message().unwrap().contains("stub"));
    }

    #[test]
    fn rejects_wrong_store_type() {
        let provider = AwsSecretsManagerProvider::new();
        assert!(!provider.supports_store(StoreType::CyberArk));
    }
}
