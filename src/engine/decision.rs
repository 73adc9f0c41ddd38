//! Decision types and decision-event emission

use crate::error::AccessError;
use crate::types::{
    Action, FieldAccess, PermissionId, RequestContext, ResourceRef, RoleId, TenantId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// A single access decision request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub resource: ResourceRef,
    pub action: Action,

    #[serde(default)]
    pub context: RequestContext,
}

impl DecisionRequest {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        user_id: impl Into<UserId>,
        resource: ResourceRef,
        action: Action,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            resource,
            action,
            context: RequestContext::new(),
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Why a decision came out the way it did
///
/// The failure variants let callers distinguish "denied by policy" from
/// "denied by failure" for user messaging and alerting; the access outcome
/// is deny either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// At least one condition-satisfied permission grants the action
    Granted,

    /// No matching, condition-satisfied permission; default deny
    DefaultDeny,

    /// User snapshot lookup missed
    UnknownUser,

    /// Resource reference was structurally invalid
    UnknownResource,

    /// Cycle or depth-bound violation in the role/group hierarchy
    HierarchyCorruption { detail: String },

    /// Upstream snapshot read failed or timed out
    SnapshotUnavailable { detail: String },
}

impl DecisionReason {
    /// Denied by infrastructure or data failure, not by policy
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DecisionReason::UnknownUser
                | DecisionReason::UnknownResource
                | DecisionReason::HierarchyCorruption { .. }
                | DecisionReason::SnapshotUnavailable { .. }
        )
    }

    pub(crate) fn from_error(error: AccessError) -> Self {
        match error {
            AccessError::UnknownUser(_) => DecisionReason::UnknownUser,
            AccessError::UnknownResource(_) => DecisionReason::UnknownResource,
            AccessError::HierarchyCorruption(detail) => {
                DecisionReason::HierarchyCorruption { detail }
            }
            AccessError::SnapshotUnavailable(detail) => {
                DecisionReason::SnapshotUnavailable { detail }
            }
            // Cache failure degrades to recompute and never reaches a
            // decision; mapped fail-closed all the same.
            AccessError::CacheUnavailable(detail) => {
                DecisionReason::SnapshotUnavailable { detail }
            }
        }
    }
}

/// The engine's structured output
///
/// Deliberately free of per-call metadata (no id, no timestamp): identical
/// fingerprints must yield bit-identical decisions whether served from cache
/// or recomputed. Per-call metadata lives on [`DecisionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the requested action is allowed
    pub allowed: bool,

    /// The requested action
    pub action: Action,

    pub reason: DecisionReason,

    /// Resolved field access for fields the contributing permissions mention
    #[serde(default)]
    pub fields: BTreeMap<String, FieldAccess>,

    /// Permissions that contributed, for audit and debugging
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,

    /// Roles the user effectively held
    #[serde(default)]
    pub resolved_roles: Vec<RoleId>,
}

impl Decision {
    /// Allow with the winning field mask and contributing permissions
    pub fn allow(
        action: Action,
        fields: BTreeMap<String, FieldAccess>,
        permission_ids: Vec<PermissionId>,
        resolved_roles: Vec<RoleId>,
    ) -> Self {
        Self {
            allowed: true,
            action,
            reason: DecisionReason::Granted,
            fields,
            permission_ids,
            resolved_roles,
        }
    }

    /// Policy deny: resolution succeeded but nothing grants the action
    pub fn default_deny(action: Action, resolved_roles: Vec<RoleId>) -> Self {
        Self {
            allowed: false,
            action,
            reason: DecisionReason::DefaultDeny,
            fields: BTreeMap::new(),
            permission_ids: Vec::new(),
            resolved_roles,
        }
    }

    /// Fail-closed deny carrying the failure tag
    pub fn deny_on_failure(action: Action, error: AccessError) -> Self {
        Self {
            allowed: false,
            action,
            reason: DecisionReason::from_error(error),
            fields: BTreeMap::new(),
            permission_ids: Vec::new(),
            resolved_roles: Vec::new(),
        }
    }
}

/// Event emitted after every decision, for audit and alerting
///
/// Storage and reporting are external; the engine only emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub resource: ResourceRef,
    pub action: Action,
    pub allowed: bool,
    pub reason: DecisionReason,
    pub permission_ids: Vec<PermissionId>,
    pub cache_hit: bool,
    pub latency_ms: u64,
}

impl DecisionEvent {
    pub(crate) fn new(
        request: &DecisionRequest,
        decision: &Decision,
        cache_hit: bool,
        latency: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            resource: request.resource.clone(),
            action: request.action,
            allowed: decision.allowed,
            reason: decision.reason.clone(),
            permission_ids: decision.permission_ids.clone(),
            cache_hit,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Receiver for decision events
///
/// Implementations must be cheap and non-blocking; the engine calls them on
/// the decision path.
pub trait DecisionSink: Send + Sync {
    fn record(&self, event: DecisionEvent);
}
