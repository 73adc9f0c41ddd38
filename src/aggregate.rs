//! Permission aggregation across the resolved role set
//!
//! For every role the user holds, the aggregator unions that role's direct
//! permission bindings with the bindings of every role ancestor (child
//! inherits parent's grants), deduplicates by permission identifier, and
//! filters to grants covering the requested resource and action. The result
//! is a candidate list; condition evaluation and conflict resolution run on
//! top of it.

use crate::error::{AccessError, Result};
use crate::hierarchy;
use crate::types::{
    Action, MatchSpecificity, Permission, PermissionId, ResourceRef, RoleId, TenantSnapshot,
};
use std::collections::{BTreeSet, HashMap};

/// A permission grant that covers the requested resource and action
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The matching permission
    pub permission: Permission,

    /// Role whose binding contributed the permission
    pub role_id: RoleId,

    /// Priority of the contributing role
    pub priority: i32,

    /// How specifically the permission target matched the request
    pub specificity: MatchSpecificity,
}

/// Aggregate candidate permissions for a role set against one resource/action
///
/// Fails with [`AccessError::UnknownResource`] for a structurally invalid
/// reference and propagates [`AccessError::HierarchyCorruption`] from role
/// expansion. Dangling bindings (to deleted permissions) are skipped, as are
/// inactive permissions and grants from other tenants.
pub fn aggregate(
    snapshot: &TenantSnapshot,
    role_set: &BTreeSet<RoleId>,
    resource: &ResourceRef,
    action: Action,
    max_depth: usize,
) -> Result<Vec<Candidate>> {
    aggregate_inner(snapshot, role_set, resource, Some(action), max_depth)
}

/// Aggregate candidates covering the resource under *any* action
///
/// Field projection uses this: a field mask reflects every condition-
/// satisfied grant on the resource, not just grants for one action.
pub fn aggregate_for_fields(
    snapshot: &TenantSnapshot,
    role_set: &BTreeSet<RoleId>,
    resource: &ResourceRef,
    max_depth: usize,
) -> Result<Vec<Candidate>> {
    aggregate_inner(snapshot, role_set, resource, None, max_depth)
}

fn aggregate_inner(
    snapshot: &TenantSnapshot,
    role_set: &BTreeSet<RoleId>,
    resource: &ResourceRef,
    action: Option<Action>,
    max_depth: usize,
) -> Result<Vec<Candidate>> {
    if resource.resource_type.is_empty() {
        return Err(AccessError::UnknownResource(
            "empty resource type".to_string(),
        ));
    }

    // permission id -> best candidate seen so far
    let mut by_permission: HashMap<PermissionId, Candidate> = HashMap::new();

    for role_id in role_set {
        collect_role(snapshot, role_id, resource, action, &mut by_permission);

        for ancestor_id in hierarchy::role_ancestors(snapshot, role_id, max_depth)? {
            collect_role(snapshot, &ancestor_id, resource, action, &mut by_permission);
        }
    }

    let mut candidates: Vec<Candidate> = by_permission.into_values().collect();
    // Deterministic order: strongest grant first, then stable by id.
    candidates.sort_by(|a, b| {
        b.specificity
            .cmp(&a.specificity)
            .then(b.priority.cmp(&a.priority))
            .then(a.permission.id.cmp(&b.permission.id))
    });

    Ok(candidates)
}

/// Collect one role's direct bindings into the candidate map
fn collect_role(
    snapshot: &TenantSnapshot,
    role_id: &RoleId,
    resource: &ResourceRef,
    action: Option<Action>,
    by_permission: &mut HashMap<PermissionId, Candidate>,
) {
    let Some(role) = snapshot.roles.get(role_id) else {
        return;
    };

    for permission_id in snapshot.direct_permissions(role_id) {
        let Some(permission) = snapshot.permissions.get(permission_id) else {
            continue;
        };
        if !permission.active || permission.tenant_id != snapshot.tenant_id {
            continue;
        }
        if let Some(action) = action {
            if !permission.actions.contains(&action) {
                continue;
            }
        }
        let Some(specificity) = permission.target.match_request(resource) else {
            continue;
        };

        let candidate = Candidate {
            permission: permission.clone(),
            role_id: role_id.clone(),
            priority: role.priority,
            specificity,
        };

        by_permission
            .entry(permission_id.clone())
            .and_modify(|existing| {
                // Same permission reachable through several roles: keep the
                // highest-priority annotation.
                if candidate.priority > existing.priority {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
}
