//! In-memory [`SecretProvider`] for downstream integration tests, gated
//! behind the `test-utils` feature — the same "ship a mock, don't make
//! consumers hand-roll one" posture as `layer0`'s own `test-utils` feature.

use crate::error::AccessError;
use crate::model::{AccessCredential, Secret, SecretMetadata, SecretReference, StoreType};
use crate::provider::SecretProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// A canned response for one call to [`MockSecretProvider::fetch_secret`].
#[derive(Clone)]
pub enum MockResponse {
    /// Succeed, minting a secret with the given version and bytes.
    Value {
        /// The opaque version identifier to report.
        version: String,
        /// The secret bytes to return.
        bytes: Vec<u8>,
    },
    /// Fail with the given message.
    Error(String),
}

impl MockResponse {
    /// Build a successful response.
    pub fn value(version: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Value {
            version: version.into(),
            bytes: bytes.into(),
        }
    }

    /// Build a failing response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// A [`SecretProvider`] backed by a caller-supplied, per-reference script of
/// responses, returned one at a time on successive calls. The last scripted
/// response for a reference repeats once the script is exhausted.
pub struct MockSecretProvider {
    store_type: StoreType,
    scripts: RwLock<HashMap<SecretReference, Vec<MockResponse>>>,
    cursor: RwLock<HashMap<SecretReference, usize>>,
    call_count: AtomicUsize,
}

impl MockSecretProvider {
    /// Build a mock that only claims to support `store_type`.
    pub fn new(store_type: StoreType) -> Self {
        Self {
            store_type,
            scripts: RwLock::new(HashMap::new()),
            cursor: RwLock::new(HashMap::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Script the responses `fetch_secret` returns for `reference`, in
    /// order.
    pub fn script(&self, reference: SecretReference, responses: Vec<MockResponse>) {
        self.scripts.write().unwrap().insert(reference, responses);
    }

    /// Total number of `fetch_secret` calls observed so far, across every
    /// reference.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretProvider for MockSecretProvider {
    async fn fetch_secret(
        &self,
        reference: &SecretReference,
        _credential: &AccessCredential,
    ) -> Result<Secret, AccessError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let scripts = self.scripts.read().unwrap();
        let Some(script) = scripts.get(reference) else {
            return Err(AccessError::new(
                reference.clone(),
                "MockSecretProvider has no script for this reference",
            ));
        };

        let mut cursors = self.cursor.write().unwrap();
        let index = cursors.entry(reference.clone()).or_insert(0);
        let response = script.get(*index).or_else(|| script.last()).cloned();
        if *index + 1 < script.len() {
            *index += 1;
        }

        match response {
            Some(MockResponse::Value { version, bytes }) => Ok(Secret::new(
                reference.name(),
                bytes,
                SecretMetadata::new(version, reference.store_type(), reference.clone()),
            )),
            Some(MockResponse::Error(message)) => Err(AccessError::new(reference.clone(), message)),
            None => Err(AccessError::new(reference.clone(), "empty script")),
        }
    }

    fn supports_store(&self, store_type: StoreType) -> bool {
        store_type == self.store_type
    }
}
