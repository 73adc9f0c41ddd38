//! Cache behavior through the engine surface: idempotency, single-flight,
//! generation invalidation for roles and groups, and the change-event feed.

use accessgate::{
    AccessEngine, Action, ChangeEvent, DecisionRequest, EngineConfig, GroupRecord,
    InMemorySnapshotStore, Permission, ResourceRef, RoleAssignment, RoleRecord, SnapshotSource,
    TenantId, TenantSnapshot, UserRecord,
};
use async_trait::async_trait;
use tokio_test::assert_ok;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Surface the engine's tracing output when running with RUST_LOG set
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn seeded_store() -> Arc<InMemorySnapshotStore> {
    init_tracing();
    let store = Arc::new(InMemorySnapshotStore::new());
    store.update(&"acme".to_string(), |s| {
        s.insert_role(RoleRecord::new("acme", "viewer").with_priority(5));
        s.insert_permission(
            Permission::new("acme", "p-view", ResourceRef::type_only("document"))
                .with_action(Action::Read),
        );
        s.bind_permission("viewer", "p-view");
        s.insert_user(UserRecord::new("acme", "alice").with_role(RoleAssignment::new("viewer")));
        s.insert_group(GroupRecord::new("acme", "staff").with_role("viewer"));
        s.insert_user(UserRecord::new("acme", "bob").with_group("staff"));
    });
    store
}

struct CountingSource {
    inner: Arc<InMemorySnapshotStore>,
    fetches: AtomicUsize,
}

impl CountingSource {
    fn new(inner: Arc<InMemorySnapshotStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SnapshotSource for CountingSource {
    async fn tenant_snapshot(
        &self,
        tenant_id: &TenantId,
    ) -> accessgate::Result<Option<Arc<TenantSnapshot>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Simulated upstream latency makes duplicated work observable.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.tenant_snapshot(tenant_id).await
    }
}

fn read_request(user: &str) -> DecisionRequest {
    DecisionRequest::new("acme", user, ResourceRef::exact("document", "42"), Action::Read)
}

#[tokio::test]
async fn test_repeated_decisions_bit_identical() {
    let store = seeded_store();
    let engine = AccessEngine::new(EngineConfig::default(), store);

    let request = read_request("alice");
    let first = engine.decide(&request, None).await;
    for _ in 0..5 {
        let next = engine.decide(&request, None).await;
        assert_eq!(first, next);
    }

    let stats = engine.cache_stats().unwrap();
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_concurrent_same_fingerprint_single_computation() {
    let source = CountingSource::new(seeded_store());
    let engine = Arc::new(AccessEngine::new(
        EngineConfig::default(),
        Arc::clone(&source) as _,
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.decide(&read_request("alice"), None).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().allowed);
    }

    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_role_invalidation_reaches_direct_holders() {
    let store = seeded_store();
    let engine = AccessEngine::new(EngineConfig::default(), Arc::clone(&store) as _);

    assert!(engine.decide(&read_request("alice"), None).await.allowed);

    // Unbind the permission, publish, then invalidate the role.
    store.update(&"acme".to_string(), |s| {
        s.role_permissions.remove("viewer");
    });
    engine
        .invalidate_role(&"acme".to_string(), &"viewer".to_string())
        .await;

    assert!(!engine.decide(&read_request("alice"), None).await.allowed);
}

#[tokio::test]
async fn test_role_invalidation_reaches_group_members() {
    let store = seeded_store();
    let engine = AccessEngine::new(EngineConfig::default(), Arc::clone(&store) as _);

    // bob holds viewer only through the "staff" group.
    assert!(engine.decide(&read_request("bob"), None).await.allowed);

    store.update(&"acme".to_string(), |s| {
        s.role_permissions.remove("viewer");
    });
    engine
        .invalidate_role(&"acme".to_string(), &"viewer".to_string())
        .await;

    assert!(!engine.decide(&read_request("bob"), None).await.allowed);
}

#[tokio::test]
async fn test_group_invalidation() {
    let store = seeded_store();
    let engine = AccessEngine::new(EngineConfig::default(), Arc::clone(&store) as _);

    assert!(engine.decide(&read_request("bob"), None).await.allowed);

    store.update(&"acme".to_string(), |s| {
        s.insert_group(GroupRecord::new("acme", "staff"));
    });
    engine
        .invalidate_group(&"acme".to_string(), &"staff".to_string())
        .await;

    assert!(!engine.decide(&read_request("bob"), None).await.allowed);
}

#[tokio::test]
async fn test_invalidation_idempotent() {
    let store = seeded_store();
    let engine = AccessEngine::new(EngineConfig::default(), Arc::clone(&store) as _);

    let request = read_request("alice");
    assert!(engine.decide(&request, None).await.allowed);

    for _ in 0..3 {
        engine.invalidate_user(&"acme".to_string(), &"alice".to_string());
    }

    // Still coherent: recompute once, then hit again.
    assert!(engine.decide(&request, None).await.allowed);
    assert!(engine.decide(&request, None).await.allowed);
    let stats = engine.cache_stats().unwrap();
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn test_event_feed_drives_invalidation() {
    let store = seeded_store();
    let engine = Arc::new(AccessEngine::new(
        EngineConfig::default(),
        Arc::clone(&store) as _,
    ));
    let (tx, rx) = mpsc::channel(16);
    let listener = engine.spawn_event_listener(rx);

    let request = read_request("alice");
    assert!(engine.decide(&request, None).await.allowed);

    // Publish first, then emit the event.
    store.update(&"acme".to_string(), |s| {
        s.insert_user(UserRecord::new("acme", "alice"));
    });
    tx.send(ChangeEvent::UserChanged {
        tenant_id: "acme".to_string(),
        user_ids: vec!["alice".to_string()],
    })
    .await
    .unwrap();

    // The listener bumps the generation asynchronously.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!engine.decide(&request, None).await.allowed);

    drop(tx);
    assert_ok!(listener.await);
}

#[tokio::test]
async fn test_disabled_cache_always_recomputes() {
    let source = CountingSource::new(seeded_store());
    let config = EngineConfig {
        enable_cache: false,
        ..Default::default()
    };
    let engine = AccessEngine::new(config, Arc::clone(&source) as _);

    for _ in 0..3 {
        assert!(engine.decide(&read_request("alice"), None).await.allowed);
    }
    assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    assert!(engine.cache_stats().is_none());
}

#[tokio::test]
async fn test_ttl_bounds_staleness_without_events() {
    let store = seeded_store();
    let config = EngineConfig {
        cache_config: accessgate::CacheConfig {
            ttl: Duration::from_millis(30),
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = AccessEngine::new(config, Arc::clone(&store) as _);

    let request = read_request("alice");
    assert!(engine.decide(&request, None).await.allowed);

    // Mutation whose invalidation event is "lost": only the TTL saves us.
    store.update(&"acme".to_string(), |s| {
        s.insert_user(UserRecord::new("acme", "alice"));
    });
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(!engine.decide(&request, None).await.allowed);
}
