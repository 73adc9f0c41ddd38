//! # Accessgate
//!
//! Multi-tenant access decision engine: RBAC with role and group
//! hierarchies, ABAC condition evaluation, field-level filtering, and a
//! generation-tagged decision cache with single-flight recomputation.
//!
//! The engine is the authority for allow/deny: given a user, a target
//! resource, an action, and a runtime context it computes a structured
//! [`Decision`] plus the visible/writable field set, fail-closed on every
//! error path. It owns no entities: policy data arrives as immutable
//! snapshots from the hosting platform's CRUD layer, and mutations reach the
//! engine as [`ChangeEvent`]s that invalidate cached decisions.
//!
//! ## Example
//!
//! ```rust
//! use accessgate::{
//!     AccessEngine, Action, DecisionRequest, EngineConfig, InMemorySnapshotStore, Permission,
//!     ResourceRef, RoleAssignment, RoleRecord, UserRecord,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemorySnapshotStore::new());
//!     store.update(&"acme".to_string(), |s| {
//!         s.insert_role(RoleRecord::new("acme", "viewer"));
//!         s.insert_permission(
//!             Permission::new("acme", "p-read", ResourceRef::type_only("document"))
//!                 .with_action(Action::Read),
//!         );
//!         s.bind_permission("viewer", "p-read");
//!         s.insert_user(
//!             UserRecord::new("acme", "alice").with_role(RoleAssignment::new("viewer")),
//!         );
//!     });
//!
//!     let engine = AccessEngine::new(EngineConfig::default(), store);
//!     let request = DecisionRequest::new(
//!         "acme",
//!         "alice",
//!         ResourceRef::exact("document", "123"),
//!         Action::Read,
//!     );
//!
//!     let decision = engine.decide(&request, None).await;
//!     assert!(decision.allowed);
//! }
//! ```

pub mod aggregate;
pub mod cache;
pub mod condition;
pub mod engine;
pub mod error;
pub mod events;
pub mod fields;
pub mod hierarchy;
pub mod identity;
pub mod snapshot;
pub mod types;

// Re-export the public surface
pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use condition::{CompareOp, Condition};
pub use engine::{
    AccessEngine, Decision, DecisionEvent, DecisionReason, DecisionRequest, DecisionSink,
    EngineConfig, EngineMetrics,
};
pub use error::{AccessError, Result};
pub use events::ChangeEvent;
pub use snapshot::{InMemorySnapshotStore, SnapshotSource};
pub use types::{
    Action, FieldAccess, FieldMode, GroupId, GroupRecord, MatchSpecificity, Permission,
    PermissionId, RequestContext, ResourceRef, RoleAssignment, RoleId, RoleRecord, TenantId,
    TenantSnapshot, UserId, UserRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
