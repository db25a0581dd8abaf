//! Wait-path and event-sequencing behavior through the manager.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use conduit_ratelimit::{
    EventKind, RateLimitConfig, RateLimitError, RateLimitManager, ResourcePolicy,
};

fn manager_with(resource: &str, policy: ResourcePolicy) -> RateLimitManager {
    let mut config = RateLimitConfig {
        enabled: true,
        ..Default::default()
    };
    config.resources.insert(resource.to_string(), policy);
    RateLimitManager::new(config).unwrap()
}

fn record_kinds(manager: &RateLimitManager) -> Arc<Mutex<Vec<EventKind>>> {
    let kinds: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    manager
        .event_bus()
        .subscribe(Box::new(move |event| {
            sink.lock().push(event.kind);
        }))
        .unwrap();
    kinds
}

#[tokio::test]
async fn successful_wait_emits_start_allowed_success() {
    let manager = manager_with(
        "api",
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 50.0,
            capacity: 1.0,
            initial_tokens: 1.0,
            timeout: 2_000,
            ..Default::default()
        },
    );
    let kinds = record_kinds(&manager);
    let ctx = CancellationToken::new();

    // Drain the bucket, then wait for the ~20ms refill.
    assert!(manager.allow(&ctx, "api").await.unwrap());
    manager.wait(&ctx, "api").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let kinds = kinds.lock().clone();
    assert!(kinds.contains(&EventKind::WaitStart));
    assert!(kinds.contains(&EventKind::WaitSuccess));
    let start_pos = kinds.iter().position(|k| *k == EventKind::WaitStart).unwrap();
    let success_pos = kinds
        .iter()
        .position(|k| *k == EventKind::WaitSuccess)
        .unwrap();
    assert!(start_pos < success_pos);
    manager.close().await.unwrap();
}

#[tokio::test]
async fn timed_out_wait_emits_start_then_timeout() {
    let manager = manager_with(
        "api",
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 0.01,
            capacity: 1.0,
            initial_tokens: 1.0,
            timeout: 60,
            ..Default::default()
        },
    );
    let kinds = record_kinds(&manager);
    let ctx = CancellationToken::new();

    assert!(manager.allow(&ctx, "api").await.unwrap());
    let err = manager.wait(&ctx, "api").await.unwrap_err();
    assert!(matches!(err, RateLimitError::WaitTimeout { .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let kinds = kinds.lock().clone();
    assert!(kinds.contains(&EventKind::WaitStart));
    assert!(kinds.contains(&EventKind::WaitTimeout));
    assert!(!kinds.contains(&EventKind::WaitSuccess));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn wait_on_concurrency_polls_until_release() {
    let manager = Arc::new(manager_with(
        "jobs",
        ResourcePolicy {
            algorithm: "concurrency".to_string(),
            max_concurrency: 1,
            timeout: 2_000,
            ..Default::default()
        },
    ));
    let ctx = CancellationToken::new();

    assert!(manager.allow(&ctx, "jobs").await.unwrap());

    // Release the held slot shortly; the waiter polls at 100ms granularity
    // and must pick it up well before its deadline.
    let releaser = Arc::clone(&manager);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        releaser.release("jobs", 1).await.unwrap();
    });

    let started = std::time::Instant::now();
    manager.wait(&ctx, "jobs").await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_secs(1));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn cancelled_wait_returns_cancellation() {
    let manager = Arc::new(manager_with(
        "api",
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 0.01,
            capacity: 1.0,
            initial_tokens: 1.0,
            timeout: 5_000,
            ..Default::default()
        },
    ));
    let ctx = CancellationToken::new();
    assert!(manager.allow(&ctx, "api").await.unwrap());

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = manager.wait(&ctx, "api").await.unwrap_err();
    assert!(matches!(err, RateLimitError::Cancelled));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn wait_passthrough_for_unconfigured_resource() {
    let manager = manager_with(
        "x",
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 1.0,
            capacity: 1.0,
            initial_tokens: 1.0,
            ..Default::default()
        },
    );
    let ctx = CancellationToken::new();

    // No policy resolves for "y": wait returns immediately.
    let started = std::time::Instant::now();
    manager.wait(&ctx, "y").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));
    manager.close().await.unwrap();
}
