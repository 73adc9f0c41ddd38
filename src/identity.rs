//! Identity context resolution
//!
//! Computes the effective role set for a user: direct assignments that are
//! active and unexpired, plus roles assigned to the user's groups and to
//! every ancestor of those groups. Role-hierarchy expansion happens later,
//! in the permission aggregator; this module only decides which roles the
//! user *holds*.

use crate::error::{AccessError, Result};
use crate::hierarchy;
use crate::types::{RoleId, TenantSnapshot, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Resolve the set of roles a user holds at `now`
///
/// Fails with [`AccessError::UnknownUser`] when the snapshot has no such
/// user; callers must treat that as deny, not as "no restrictions". Roles
/// that are inactive, or assignments that are expired or switched off,
/// contribute nothing. Dangling role references (assignment to a deleted
/// role) are skipped.
pub fn resolve_roles(
    snapshot: &TenantSnapshot,
    user_id: &UserId,
    now: DateTime<Utc>,
    max_depth: usize,
) -> Result<BTreeSet<RoleId>> {
    let user = snapshot
        .users
        .get(user_id)
        .ok_or_else(|| AccessError::UnknownUser(user_id.clone()))?;

    let mut roles = BTreeSet::new();

    for assignment in &user.role_assignments {
        if assignment.is_effective(now) && is_active_role(snapshot, &assignment.role_id) {
            roles.insert(assignment.role_id.clone());
        }
    }

    for group_id in &user.group_ids {
        let Some(group) = snapshot.groups.get(group_id) else {
            continue;
        };

        if group.active {
            for role_id in &group.role_ids {
                if is_active_role(snapshot, role_id) {
                    roles.insert(role_id.clone());
                }
            }
        }

        // Group role inheritance flows parent -> descendants: membership in
        // a group conveys every ancestor group's roles as well.
        for ancestor_id in hierarchy::group_ancestors(snapshot, group_id, max_depth)? {
            if let Some(ancestor) = snapshot.groups.get(&ancestor_id) {
                for role_id in &ancestor.role_ids {
                    if is_active_role(snapshot, role_id) {
                        roles.insert(role_id.clone());
                    }
                }
            }
        }
    }

    Ok(roles)
}

fn is_active_role(snapshot: &TenantSnapshot, role_id: &RoleId) -> bool {
    snapshot.roles.get(role_id).map_or(false, |role| role.active)
}
