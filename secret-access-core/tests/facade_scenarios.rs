//! End-to-end scenarios against [`SecretAccessFacade`]: cold reads, warm
//! reads, staleness-triggered refetches, rollover detection, error
//! propagation, and credential validation, plus a few round-trip and
//! event-count properties.

use secret_access_core::test_support::{MockResponse, MockSecretProvider};
use secret_access_core::{
    AccessCredential, Cache, CoreError, EventHandler, EventTopic, PollingRefreshPolicy,
    SecretAccessEvent, SecretAccessFacadeBuilder, SecretReference, StoreType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn db_reference() -> SecretReference {
    SecretReference::new(StoreType::CyberArk, "db/creds").unwrap()
}

fn credential() -> AccessCredential {
    AccessCredential::cyber_ark_api_key("k").unwrap()
}

struct CountingHandler(Arc<AtomicUsize>);
impl EventHandler for CountingHandler {
    fn handle(&self, _event: &SecretAccessEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A cold read fetches from the provider and populates the cache.
#[tokio::test]
async fn cold_read_fetches_and_caches() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(reference.clone(), vec![MockResponse::value("v1", *b"s3cr3t")]);

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(Arc::new(Cache::new()))
        .build()
        .await
        .unwrap();
    facade.register("db", reference, credential(), None).await.unwrap();

    let secret = facade.get("db").await.unwrap();
    secret.with_bytes(|b| assert_eq!(b, b"s3cr3t"));
    facade.close().await;
}

/// A second read within the TTL window is served from cache, not a
/// second provider call.
#[tokio::test]
async fn warm_read_does_not_refetch() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(reference.clone(), vec![MockResponse::value("v1", *b"s3cr3t")]);

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(Arc::new(Cache::new()))
        .build()
        .await
        .unwrap();
    facade.register("db", reference, credential(), None).await.unwrap();

    facade.get("db").await.unwrap();
    facade.get("db").await.unwrap();
    facade.get("db").await.unwrap();
    facade.close().await;
}

/// Once the per-reference TTL elapses, the next read refetches.
#[tokio::test]
async fn stale_read_triggers_a_refetch() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(
        reference.clone(),
        vec![MockResponse::value("v1", *b"first-"), MockResponse::value("v2", *b"second")],
    );

    let cache = Arc::new(Cache::new());
    cache.set_ttl(reference.clone(), Duration::from_millis(20));
    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(cache)
        .build()
        .await
        .unwrap();
    facade.register("db", reference, credential(), None).await.unwrap();

    let first = facade.get("db").await.unwrap();
    first.with_bytes(|b| assert_eq!(b, b"first-"));
    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = facade.get("db").await.unwrap();
    second.with_bytes(|b| assert_eq!(b, b"second"));
    facade.close().await;
}

/// A version change on an `"active"`-hint reference with a cached
/// `"inactive"` sibling publishes `SecretRolloverDetected`.
#[tokio::test]
async fn rollover_is_detected_between_active_and_inactive_siblings() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let active = SecretReference::with_version_hint(StoreType::CyberArk, "rot", "active").unwrap();
    provider.script(
        active.clone(),
        vec![MockResponse::value("v1", *b"one---"), MockResponse::value("v2", *b"two---")],
    );

    let cache = Arc::new(Cache::new());
    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(cache.clone())
        .build()
        .await
        .unwrap();

    // Seed the inactive sibling directly into the shared cache so the
    // rollover check has something to compare against.
    let inactive = active.sibling("inactive");
    cache.put(secret_access_core::Secret::new(
        "rot",
        b"old-inactive".to_vec(),
        secret_access_core::SecretMetadata::new("v0", StoreType::CyberArk, inactive),
    ));

    let rollover_count = Arc::new(AtomicUsize::new(0));
    facade
        .events()
        .subscribe(EventTopic::RolloverDetected, Arc::new(CountingHandler(rollover_count.clone())));

    facade.register("rot", active, credential(), None).await.unwrap();
    facade.refresh("rot").await.unwrap();
    assert_eq!(rollover_count.load(Ordering::SeqCst), 0, "first fetch has no prior to compare");
    facade.refresh("rot").await.unwrap();
    assert_eq!(rollover_count.load(Ordering::SeqCst), 1);
    facade.close().await;
}

/// A provider error surfaces to the caller and never touches the cache.
#[tokio::test]
async fn provider_error_propagates_without_caching() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(reference.clone(), vec![MockResponse::error("access denied")]);

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(Arc::new(Cache::new()))
        .build()
        .await
        .unwrap();
    facade.register("db", reference, credential(), None).await.unwrap();

    let err = facade.get("db").await.unwrap_err();
    match err {
        CoreError::Access(e) => assert!(e.message().unwrap().contains("denied")),
        other => panic!("expected AccessError, got {other:?}"),
    }
    facade.close().await;
}

/// Building a credential with a mismatched method/payload pairing fails
/// validation rather than reaching a provider.
#[tokio::test]
async fn cross_type_credential_construction_is_rejected() {
    use secret_access_core::{CredentialMethod, CredentialPayload};

    let err = AccessCredential::new(
        CredentialMethod::IamRole,
        CredentialPayload::ApiKey("plain-string".into()),
    )
    .unwrap_err();
    assert!(err.to_string().contains("IamRole"));
}

/// Register/unregister/register round-trips cleanly.
#[tokio::test]
async fn register_unregister_register_round_trip() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(
        reference.clone(),
        vec![MockResponse::value("v1", *b"first-"), MockResponse::value("v2", *b"second")],
    );

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(Arc::new(Cache::new()))
        .build()
        .await
        .unwrap();
    facade.register("db", reference.clone(), credential(), None).await.unwrap();
    facade.get("db").await.unwrap();
    facade.unregister("db").await;
    assert!(facade.get("db").await.is_err());

    facade.register("db", reference, credential(), None).await.unwrap();
    facade.get("db").await.unwrap();
    facade.close().await;
}

/// Publish/subscribe fires exactly once per subscribed event.
#[tokio::test]
async fn refreshed_event_fires_exactly_once_per_fetch() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(reference.clone(), vec![MockResponse::value("v1", *b"s3cr3t")]);

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(Arc::new(Cache::new()))
        .build()
        .await
        .unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    facade
        .events()
        .subscribe(EventTopic::Refreshed, Arc::new(CountingHandler(count.clone())));

    facade.register("db", reference, credential(), None).await.unwrap();
    facade.get("db").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    facade.close().await;
}

/// A reference driven by a `PollingRefreshPolicy` is eventually refreshed in
/// the background without the caller calling `refresh` explicitly.
#[tokio::test]
async fn polling_policy_refreshes_in_the_background() {
    let provider = MockSecretProvider::new(StoreType::CyberArk);
    let reference = db_reference();
    provider.script(
        reference.clone(),
        vec![MockResponse::value("v1", *b"first-"), MockResponse::value("v2", *b"second")],
    );

    let cache = Arc::new(Cache::new());
    cache.set_ttl(reference.clone(), Duration::from_millis(15));
    let event_bus_policy = Arc::new(secret_access_core::EventBus::new());
    let policy = PollingRefreshPolicy::new(Duration::from_millis(10), event_bus_policy);

    let facade = SecretAccessFacadeBuilder::new()
        .with_provider(Arc::new(provider))
        .with_cache(cache.clone())
        .with_default_policy(policy)
        .build()
        .await
        .unwrap();
    facade.register("db", reference.clone(), credential(), None).await.unwrap();
    facade.get("db").await.unwrap();

    let mut saw_second = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(secret) = cache.get(&reference) {
            if secret.with_bytes(|b| b == b"second") {
                saw_second = true;
                break;
            }
        }
    }
    assert!(saw_second, "background poll never observed the rotated value");
    facade.close().await;
}
