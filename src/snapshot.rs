//! Policy snapshot access
//!
//! The engine consumes policy data exclusively through [`SnapshotSource`].
//! [`InMemorySnapshotStore`] is the reference implementation: each tenant's
//! data lives in one immutable [`TenantSnapshot`] behind an `Arc`, and every
//! mutation publishes a whole new snapshot (copy-on-write). A reader that
//! fetched the `Arc` before a publication keeps a fully consistent view of
//! the pre-mutation state; it never observes a partial edit.
//!
//! Publication ordering contract: callers publish the new snapshot *first*
//! and invalidate cache entries *second*, so an invalidated entry is always
//! recomputed against the snapshot that made it stale.

use crate::error::Result;
use crate::types::{TenantId, TenantSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Read-only, versioned source of tenant policy snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot for a tenant, `None` for an unknown tenant
    async fn tenant_snapshot(&self, tenant_id: &TenantId) -> Result<Option<Arc<TenantSnapshot>>>;
}

/// Copy-on-write in-memory snapshot store
#[derive(Default)]
pub struct InMemorySnapshotStore {
    tenants: DashMap<TenantId, Arc<TenantSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot, replacing the tenant's current one
    ///
    /// The stored version is always one past the previous snapshot's, so
    /// versions stay monotonic regardless of what the caller set. The
    /// version read and the replacement happen under the tenant's map entry
    /// lock, so concurrent publications serialize instead of racing.
    pub fn publish(&self, mut snapshot: TenantSnapshot) -> Arc<TenantSnapshot> {
        let tenant_id = snapshot.tenant_id.clone();
        let mut slot = self
            .tenants
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(TenantSnapshot::new(tenant_id.clone())));
        snapshot.version = slot.version + 1;
        let published = Arc::new(snapshot);
        *slot = Arc::clone(&published);
        published
    }

    /// Apply a mutation to a copy of the tenant's snapshot and publish it
    ///
    /// Readers holding the old `Arc` keep the pre-mutation view; new reads
    /// see the post-mutation one. Creates the tenant when absent. The whole
    /// read-clone-mutate-replace runs under the tenant's map entry lock:
    /// concurrent `update` calls serialize, and no committed mutation is
    /// ever overwritten by a publication that cloned the same base.
    pub fn update(
        &self,
        tenant_id: &TenantId,
        mutate: impl FnOnce(&mut TenantSnapshot),
    ) -> Arc<TenantSnapshot> {
        let mut slot = self
            .tenants
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(TenantSnapshot::new(tenant_id.clone())));
        let mut next = (**slot).clone();
        mutate(&mut next);
        next.version = slot.version + 1;
        let published = Arc::new(next);
        *slot = Arc::clone(&published);
        published
    }

    /// Current snapshot without going through the async trait
    pub fn current(&self, tenant_id: &TenantId) -> Option<Arc<TenantSnapshot>> {
        self.tenants.get(tenant_id).map(|s| Arc::clone(&s))
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshotStore {
    async fn tenant_snapshot(&self, tenant_id: &TenantId) -> Result<Option<Arc<TenantSnapshot>>> {
        Ok(self.current(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RoleRecord, UserRecord};

    #[tokio::test]
    async fn test_publish_bumps_version() {
        let store = InMemorySnapshotStore::new();
        let tenant = "t1".to_string();

        let v1 = store.publish(TenantSnapshot::new("t1"));
        assert_eq!(v1.version, 1);

        let v2 = store.update(&tenant, |s| {
            s.insert_role(RoleRecord::new("t1", "viewer"));
        });
        assert_eq!(v2.version, 2);

        let fetched = store.tenant_snapshot(&tenant).await.unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert!(fetched.roles.contains_key("viewer"));
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let store = InMemorySnapshotStore::new();
        assert!(store
            .tenant_snapshot(&"ghost".to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_retained() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let tenant = "t1".to_string();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                store.update(&tenant, |s| {
                    // A slow edit widens the window a racing publication
                    // could overwrite.
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    s.insert_role(RoleRecord::new("t1", format!("r{}", i)));
                });
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.current(&tenant).unwrap();
        assert_eq!(snapshot.roles.len(), 8);
        assert_eq!(snapshot.version, 8);
    }

    #[tokio::test]
    async fn test_readers_keep_consistent_view() {
        let store = InMemorySnapshotStore::new();
        let tenant = "t1".to_string();
        store.update(&tenant, |s| {
            s.insert_user(UserRecord::new("t1", "alice"));
        });

        let before = store.current(&tenant).unwrap();
        store.update(&tenant, |s| {
            s.users.remove("alice");
        });

        // The old reference still sees alice; a fresh read does not.
        assert!(before.users.contains_key("alice"));
        assert!(!store.current(&tenant).unwrap().users.contains_key("alice"));
    }
}
