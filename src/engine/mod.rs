//! Access decision engine
//!
//! Orchestrates identity resolution, hierarchy expansion, permission
//! aggregation, condition evaluation, and field filtering over an immutable
//! policy snapshot, with a generation-tagged decision cache in front.
//!
//! ```text
//! Request → Cache ─miss→ Snapshot → ResolveRoles → Aggregate → Conditions → Fields
//!             │                                                                │
//!             └──────────────────────── Decision ←──────────────────────────────┘
//! ```
//!
//! Every failure path resolves to a deny decision tagged with the failure;
//! nothing on the `decide` surface ever grants access on an error.

pub mod decision;
pub mod metrics;

pub use decision::{Decision, DecisionEvent, DecisionReason, DecisionRequest, DecisionSink};
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::aggregate::{self, Candidate};
use crate::cache::{fingerprint, CacheConfig, CacheStats, DecisionCache};
use crate::condition::parse_instant;
use crate::error::{AccessError, Result};
use crate::events::ChangeEvent;
use crate::fields;
use crate::hierarchy::{self, DEFAULT_MAX_DEPTH};
use crate::identity;
use crate::snapshot::SnapshotSource;
use crate::types::{
    FieldAccess, GroupId, RequestContext, ResourceRef, RoleId, TenantId, TenantSnapshot, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on role/group parent chain length
    pub max_hierarchy_depth: usize,

    /// Enable the decision cache
    pub enable_cache: bool,

    /// Cache configuration
    pub cache_config: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Deadline for the snapshot fetch when the caller supplies none
    pub snapshot_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: DEFAULT_MAX_DEPTH,
            enable_cache: true,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
            snapshot_timeout: Duration::from_secs(2),
        }
    }
}

/// The access decision engine
///
/// Cheap to share: all state is behind `Arc`, and decision computation is
/// pure over the fetched snapshot, so any number of decisions may run in
/// parallel. The only synchronization points are the cache's per-fingerprint
/// single-flight locks and generation counters.
pub struct AccessEngine {
    snapshots: Arc<dyn SnapshotSource>,
    cache: Option<Arc<DecisionCache>>,
    metrics: Option<Arc<MetricsCollector>>,
    sink: Option<Arc<dyn DecisionSink>>,
    config: EngineConfig,
}

impl AccessEngine {
    pub fn new(config: EngineConfig, snapshots: Arc<dyn SnapshotSource>) -> Self {
        let cache = config
            .enable_cache
            .then(|| Arc::new(DecisionCache::new(config.cache_config.clone())));
        let metrics = config.enable_metrics.then(|| Arc::new(MetricsCollector::new()));

        info!(
            cache = config.enable_cache,
            metrics = config.enable_metrics,
            max_depth = config.max_hierarchy_depth,
            "access engine initialized"
        );

        Self {
            snapshots,
            cache,
            metrics,
            sink: None,
            config,
        }
    }

    /// Attach a decision-event sink (audit feed)
    pub fn with_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Compute the authoritative decision for a request
    ///
    /// Never returns an error: failures resolve to a deny decision whose
    /// reason carries the failure tag, so callers can distinguish "denied by
    /// policy" from "denied by failure" while both deny. `deadline` bounds
    /// the snapshot fetch; `None` falls back to the configured timeout.
    pub async fn decide(&self, request: &DecisionRequest, deadline: Option<Duration>) -> Decision {
        let start = Instant::now();

        debug!(
            tenant = %request.tenant_id,
            user = %request.user_id,
            resource = %request.resource.canonical(),
            action = %request.action,
            "decision requested"
        );

        let (decision, cache_hit) = match &self.cache {
            Some(cache) => {
                let key = fingerprint(
                    &request.tenant_id,
                    &request.user_id,
                    &request.resource,
                    request.action,
                    &request.context,
                );
                match cache
                    .get_or_compute(&request.tenant_id, &request.user_id, key, || {
                        self.compute_decision(request, deadline)
                    })
                    .await
                {
                    Ok((decision, hit)) => (decision, hit),
                    Err(err) => (self.deny_on_failure(request, err), false),
                }
            }
            None => match self.compute_decision(request, deadline).await {
                Ok(decision) => (decision, false),
                Err(err) => (self.deny_on_failure(request, err), false),
            },
        };

        self.finalize(request, decision, cache_hit, start.elapsed()).await
    }

    /// Project an entity's declared fields for a user
    ///
    /// The projection considers every condition-satisfied grant on the
    /// resource regardless of action, so a field writable under `update`
    /// shows as writable even when the caller is rendering a read view.
    /// Fail-closed: any failure hides every field.
    pub async fn project_entity_fields(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        resource: &ResourceRef,
        entity_fields: &[String],
        context: &RequestContext,
        deadline: Option<Duration>,
    ) -> BTreeMap<String, FieldAccess> {
        let candidates = async {
            let snapshot = self.fetch_snapshot(tenant_id, user_id, deadline).await?;
            let satisfied =
                self.satisfied_candidates_for_fields(&snapshot, user_id, resource, context)?;
            Ok::<_, AccessError>(satisfied)
        }
        .await;

        match candidates {
            Ok(satisfied) => fields::project_entity_fields(&satisfied, entity_fields),
            Err(err) => {
                warn!(tenant = %tenant_id, user = %user_id, error = %err,
                    "field projection failed, hiding all fields");
                entity_fields
                    .iter()
                    .map(|f| (f.clone(), FieldAccess::Hidden))
                    .collect()
            }
        }
    }

    /// Drop cached decisions for one user
    ///
    /// Idempotent; the CRUD layer calls this immediately after a committing
    /// mutation, after the new snapshot is visible.
    pub fn invalidate_user(&self, tenant_id: &TenantId, user_id: &UserId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_user(tenant_id, user_id);
            debug!(tenant = %tenant_id, user = %user_id, "user cache invalidated");
        }
    }

    /// Drop cached decisions for every user a role edit can affect
    pub async fn invalidate_role(&self, tenant_id: &TenantId, role_id: &RoleId) {
        self.invalidate_hierarchy(tenant_id, role_id, HierarchyKind::Role).await;
    }

    /// Drop cached decisions for every user a group edit can affect
    pub async fn invalidate_group(&self, tenant_id: &TenantId, group_id: &GroupId) {
        self.invalidate_hierarchy(tenant_id, group_id, HierarchyKind::Group).await;
    }

    /// Consume a change-event feed, bumping cache generations per event
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(tenant = %event.tenant_id(), ?event, "change event received");
                match event {
                    ChangeEvent::UserChanged {
                        tenant_id,
                        user_ids,
                    } => {
                        for user_id in &user_ids {
                            engine.invalidate_user(&tenant_id, user_id);
                        }
                    }
                    ChangeEvent::RoleChanged { tenant_id, role_id } => {
                        engine.invalidate_role(&tenant_id, &role_id).await;
                    }
                    ChangeEvent::GroupChanged {
                        tenant_id,
                        group_id,
                    } => {
                        engine.invalidate_group(&tenant_id, &group_id).await;
                    }
                    ChangeEvent::PermissionChanged {
                        tenant_id,
                        role_ids,
                    } => {
                        for role_id in &role_ids {
                            engine.invalidate_role(&tenant_id, role_id).await;
                        }
                    }
                }
            }
            debug!("change event feed closed");
        })
    }

    /// Engine metrics, when collection is enabled
    pub async fn get_metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Cache statistics, when the cache is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    // Pipeline internals

    /// Full decision computation; `Err` means fail-closed deny
    async fn compute_decision(
        &self,
        request: &DecisionRequest,
        deadline: Option<Duration>,
    ) -> Result<Decision> {
        let snapshot = self
            .fetch_snapshot(&request.tenant_id, &request.user_id, deadline)
            .await?;
        let now = request_time(&request.context);

        let roles = identity::resolve_roles(
            &snapshot,
            &request.user_id,
            now,
            self.config.max_hierarchy_depth,
        )?;
        debug!(user = %request.user_id, roles = roles.len(), "roles resolved");

        let candidates = aggregate::aggregate(
            &snapshot,
            &roles,
            &request.resource,
            request.action,
            self.config.max_hierarchy_depth,
        )?;
        let satisfied = satisfy_conditions(candidates, &request.context);

        let resolved_roles: Vec<RoleId> = roles.into_iter().collect();
        if satisfied.is_empty() {
            debug!(user = %request.user_id, "no matching condition-satisfied permission");
            return Ok(Decision::default_deny(request.action, resolved_roles));
        }

        let field_candidates = self.satisfied_candidates_for_fields(
            &snapshot,
            &request.user_id,
            &request.resource,
            &request.context,
        )?;
        let field_mask = fields::project_fields(&field_candidates);

        let mut permission_ids: Vec<_> =
            satisfied.iter().map(|c| c.permission.id.clone()).collect();
        permission_ids.sort();

        Ok(Decision::allow(
            request.action,
            field_mask,
            permission_ids,
            resolved_roles,
        ))
    }

    /// Condition-satisfied candidates across all actions, for field masks
    fn satisfied_candidates_for_fields(
        &self,
        snapshot: &TenantSnapshot,
        user_id: &UserId,
        resource: &ResourceRef,
        context: &RequestContext,
    ) -> Result<Vec<Candidate>> {
        let now = request_time(context);
        let roles = identity::resolve_roles(snapshot, user_id, now, self.config.max_hierarchy_depth)?;
        let candidates = aggregate::aggregate_for_fields(
            snapshot,
            &roles,
            resource,
            self.config.max_hierarchy_depth,
        )?;
        Ok(satisfy_conditions(candidates, context))
    }

    /// Snapshot fetch, bounded by the caller's deadline
    async fn fetch_snapshot(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        deadline: Option<Duration>,
    ) -> Result<Arc<TenantSnapshot>> {
        let timeout = deadline.unwrap_or(self.config.snapshot_timeout);
        let fetched = tokio::time::timeout(timeout, self.snapshots.tenant_snapshot(tenant_id))
            .await
            .map_err(|_| {
                AccessError::SnapshotUnavailable(format!(
                    "snapshot fetch for tenant '{}' exceeded {:?}",
                    tenant_id, timeout
                ))
            })??;

        // An unknown tenant means the user snapshot lookup missed.
        fetched.ok_or_else(|| AccessError::UnknownUser(user_id.clone()))
    }

    fn deny_on_failure(&self, request: &DecisionRequest, err: AccessError) -> Decision {
        match &err {
            AccessError::HierarchyCorruption(detail) => {
                // Standing alert candidate: upstream data integrity failure.
                error!(tenant = %request.tenant_id, detail = %detail,
                    "hierarchy corruption detected, failing closed");
            }
            _ => {
                warn!(tenant = %request.tenant_id, user = %request.user_id, error = %err,
                    "decision failed, failing closed");
            }
        }
        Decision::deny_on_failure(request.action, err)
    }

    async fn finalize(
        &self,
        request: &DecisionRequest,
        decision: Decision,
        cache_hit: bool,
        latency: Duration,
    ) -> Decision {
        if let Some(metrics) = &self.metrics {
            metrics
                .record_decision(decision.allowed, decision.reason.is_failure())
                .await;
            metrics.record_cache(cache_hit).await;
            metrics.record_latency(latency).await;
        }

        if let Some(sink) = &self.sink {
            sink.record(DecisionEvent::new(request, &decision, cache_hit, latency));
        }

        info!(
            tenant = %request.tenant_id,
            user = %request.user_id,
            resource = %request.resource.canonical(),
            action = %request.action,
            allowed = decision.allowed,
            cache_hit,
            "decision"
        );

        decision
    }

    async fn invalidate_hierarchy(&self, tenant_id: &TenantId, id: &str, kind: HierarchyKind) {
        let Some(cache) = &self.cache else {
            return;
        };

        let affected = self.affected_users(tenant_id, id, kind).await;
        match affected {
            Ok(users) => {
                debug!(tenant = %tenant_id, id, affected = users.len(),
                    "hierarchy invalidation");
                for user_id in users {
                    cache.invalidate_user(tenant_id, &user_id);
                }
            }
            Err(err) => {
                // Over-invalidate rather than risk serving stale grants.
                warn!(tenant = %tenant_id, id, error = %err,
                    "could not compute affected users, invalidating tenant");
                cache.invalidate_tenant(tenant_id);
            }
        }
    }

    /// Users whose decisions a role/group edit can change
    async fn affected_users(
        &self,
        tenant_id: &TenantId,
        id: &str,
        kind: HierarchyKind,
    ) -> Result<Vec<UserId>> {
        let snapshot = self
            .snapshots
            .tenant_snapshot(tenant_id)
            .await?
            .ok_or_else(|| {
                AccessError::SnapshotUnavailable(format!("no snapshot for tenant '{}'", tenant_id))
            })?;
        let depth = self.config.max_hierarchy_depth;

        let mut affected_ids: HashSet<String> = HashSet::new();
        affected_ids.insert(id.to_string());
        match kind {
            // A role edit affects holders of the role and of every role
            // that inherits from it.
            HierarchyKind::Role => {
                affected_ids.extend(hierarchy::role_descendants(&snapshot, &id.to_string(), depth)?)
            }
            // A group edit affects members of the group and of every group
            // below it (descendants inherit ancestor roles).
            HierarchyKind::Group => {
                affected_ids.extend(hierarchy::group_descendants(&snapshot, &id.to_string(), depth)?)
            }
        }

        let mut users = Vec::new();
        for user in snapshot.users.values() {
            let touched = match kind {
                HierarchyKind::Role => {
                    let direct = user
                        .role_assignments
                        .iter()
                        .any(|a| affected_ids.contains(&a.role_id));
                    direct
                        || self.user_groups_assign_any(&snapshot, user, &affected_ids, depth)?
                }
                HierarchyKind::Group => user.group_ids.iter().any(|g| {
                    affected_ids.contains(g)
                        || hierarchy::group_ancestors(&snapshot, g, depth)
                            .map(|ancestors| ancestors.iter().any(|a| affected_ids.contains(a)))
                            .unwrap_or(true)
                }),
            };
            if touched {
                users.push(user.id.clone());
            }
        }
        Ok(users)
    }

    /// Whether any of the user's groups (or their ancestors) assign one of
    /// the given roles
    fn user_groups_assign_any(
        &self,
        snapshot: &TenantSnapshot,
        user: &crate::types::UserRecord,
        role_ids: &HashSet<String>,
        depth: usize,
    ) -> Result<bool> {
        for group_id in &user.group_ids {
            let mut chain = vec![group_id.clone()];
            chain.extend(hierarchy::group_ancestors(snapshot, group_id, depth)?);
            for gid in chain {
                if let Some(group) = snapshot.groups.get(&gid) {
                    if group.role_ids.iter().any(|r| role_ids.contains(r)) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy)]
enum HierarchyKind {
    Role,
    Group,
}

/// The instant a decision is evaluated at: the context's timestamp attribute
/// when present, otherwise now
///
/// Using the context timestamp keeps decisions deterministic per
/// fingerprint, since the fingerprint covers the context.
fn request_time(context: &RequestContext) -> DateTime<Utc> {
    context
        .get("timestamp")
        .and_then(parse_instant)
        .unwrap_or_else(Utc::now)
}

/// Drop candidates whose condition is not satisfied by the context
fn satisfy_conditions(candidates: Vec<Candidate>, context: &RequestContext) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| {
            candidate
                .permission
                .condition
                .as_ref()
                .map_or(true, |condition| condition.evaluate(context))
        })
        .collect()
}
