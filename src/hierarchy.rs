//! Role and group hierarchy expansion
//!
//! Parent links are expected to be acyclic per tenant, but the upstream CRUD
//! layer is not trusted to enforce that: traversal is bounded in depth
//! (default 32) and tracks visited nodes, and a violation surfaces as
//! [`AccessError::HierarchyCorruption`] so callers fail closed instead of
//! looping. Inactive nodes still participate in traversal (their descendants
//! may be active) but are excluded from the returned sets.

use crate::error::{AccessError, Result};
use crate::types::{GroupId, RoleId, TenantSnapshot};
use std::collections::{HashMap, HashSet, VecDeque};

/// Default bound on parent/child chain length
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Ancestors of a role, nearest first, inactive roles excluded
///
/// An unknown starting id yields an empty sequence; the identity resolver
/// treats dangling assignments the same way.
pub fn role_ancestors(
    snapshot: &TenantSnapshot,
    role_id: &RoleId,
    max_depth: usize,
) -> Result<Vec<RoleId>> {
    ancestors_walk(role_id, max_depth, "role", |id| {
        snapshot
            .roles
            .get(id)
            .map(|role| (role.parent_id.clone(), role.active))
    })
}

/// Ancestors of a group, nearest first, inactive groups excluded
pub fn group_ancestors(
    snapshot: &TenantSnapshot,
    group_id: &GroupId,
    max_depth: usize,
) -> Result<Vec<GroupId>> {
    ancestors_walk(group_id, max_depth, "group", |id| {
        snapshot
            .groups
            .get(id)
            .map(|group| (group.parent_id.clone(), group.active))
    })
}

/// Transitive children of a role, inactive roles excluded
pub fn role_descendants(
    snapshot: &TenantSnapshot,
    role_id: &RoleId,
    max_depth: usize,
) -> Result<HashSet<RoleId>> {
    descendants_walk(
        role_id,
        max_depth,
        "role",
        snapshot
            .roles
            .values()
            .map(|role| (role.id.as_str(), role.parent_id.as_deref(), role.active)),
    )
}

/// Transitive children of a group, inactive groups excluded
pub fn group_descendants(
    snapshot: &TenantSnapshot,
    group_id: &GroupId,
    max_depth: usize,
) -> Result<HashSet<GroupId>> {
    descendants_walk(
        group_id,
        max_depth,
        "group",
        snapshot
            .groups
            .values()
            .map(|group| (group.id.as_str(), group.parent_id.as_deref(), group.active)),
    )
}

/// Walk parent links upward, each node visited at most once
///
/// `lookup` returns `(parent, active)` for a known id and `None` for an
/// unknown one (a dangling parent link terminates the walk).
fn ancestors_walk(
    start: &str,
    max_depth: usize,
    kind: &str,
    lookup: impl Fn(&str) -> Option<(Option<String>, bool)>,
) -> Result<Vec<String>> {
    let mut ancestors = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());

    let Some((mut next, _)) = lookup(start) else {
        return Ok(ancestors);
    };

    let mut depth = 0usize;
    while let Some(current) = next {
        depth += 1;
        if depth > max_depth {
            return Err(AccessError::HierarchyCorruption(format!(
                "{} ancestor chain of '{}' exceeds depth bound {}",
                kind, start, max_depth
            )));
        }
        if !visited.insert(current.clone()) {
            return Err(AccessError::HierarchyCorruption(format!(
                "cycle through {} '{}' reached from '{}'",
                kind, current, start
            )));
        }

        match lookup(&current) {
            Some((parent, active)) => {
                if active {
                    ancestors.push(current);
                }
                next = parent;
            }
            // Dangling parent link: treat like a root.
            None => break,
        }
    }

    Ok(ancestors)
}

/// Walk child links downward breadth-first, each node visited at most once
fn descendants_walk<'a>(
    start: &str,
    max_depth: usize,
    kind: &str,
    nodes: impl Iterator<Item = (&'a str, Option<&'a str>, bool)>,
) -> Result<HashSet<String>> {
    let mut children: HashMap<&str, Vec<(&str, bool)>> = HashMap::new();
    for (id, parent, active) in nodes {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push((id, active));
        }
    }

    let mut descendants = HashSet::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(start);

    let mut frontier: VecDeque<&str> = VecDeque::new();
    frontier.push_back(start);

    let mut depth = 0usize;
    while !frontier.is_empty() {
        depth += 1;
        if depth > max_depth {
            return Err(AccessError::HierarchyCorruption(format!(
                "{} descendant closure of '{}' exceeds depth bound {}",
                kind, start, max_depth
            )));
        }

        for _ in 0..frontier.len() {
            let Some(current) = frontier.pop_front() else {
                break;
            };
            for &(child, active) in children.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                if !visited.insert(child) {
                    return Err(AccessError::HierarchyCorruption(format!(
                        "cycle through {} '{}' reached from '{}'",
                        kind, child, start
                    )));
                }
                if active {
                    descendants.insert(child.to_string());
                }
                frontier.push_back(child);
            }
        }
    }

    Ok(descendants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupRecord, RoleRecord};

    fn snapshot_with_chain() -> TenantSnapshot {
        // admin -> manager -> employee (child -> parent)
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_role(RoleRecord::new("t1", "employee"));
        snapshot.insert_role(RoleRecord::new("t1", "manager").with_parent("employee"));
        snapshot.insert_role(RoleRecord::new("t1", "admin").with_parent("manager"));
        snapshot
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let snapshot = snapshot_with_chain();
        let ancestors =
            role_ancestors(&snapshot, &"admin".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(ancestors, vec!["manager".to_string(), "employee".to_string()]);
    }

    #[test]
    fn test_ancestors_of_root_is_empty() {
        let snapshot = snapshot_with_chain();
        let ancestors =
            role_ancestors(&snapshot, &"employee".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert!(ancestors.is_empty());
    }

    #[test]
    fn test_ancestors_of_unknown_is_empty() {
        let snapshot = snapshot_with_chain();
        let ancestors =
            role_ancestors(&snapshot, &"ghost".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert!(ancestors.is_empty());
    }

    #[test]
    fn test_inactive_ancestor_excluded_but_traversed() {
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_role(RoleRecord::new("t1", "root"));
        snapshot.insert_role(RoleRecord::new("t1", "middle").with_parent("root").inactive());
        snapshot.insert_role(RoleRecord::new("t1", "leaf").with_parent("middle"));

        let ancestors =
            role_ancestors(&snapshot, &"leaf".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        // "middle" is skipped, but traversal continues through it to "root".
        assert_eq!(ancestors, vec!["root".to_string()]);
    }

    #[test]
    fn test_ancestor_cycle_detected() {
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_role(RoleRecord::new("t1", "a").with_parent("b"));
        snapshot.insert_role(RoleRecord::new("t1", "b").with_parent("a"));

        let err = role_ancestors(&snapshot, &"a".to_string(), DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, AccessError::HierarchyCorruption(_)));
    }

    #[test]
    fn test_depth_bound() {
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_role(RoleRecord::new("t1", "r0"));
        for i in 1..10 {
            snapshot.insert_role(
                RoleRecord::new("t1", format!("r{}", i)).with_parent(format!("r{}", i - 1)),
            );
        }

        let err = role_ancestors(&snapshot, &"r9".to_string(), 4).unwrap_err();
        assert!(matches!(err, AccessError::HierarchyCorruption(_)));

        assert!(role_ancestors(&snapshot, &"r9".to_string(), 16).is_ok());
    }

    #[test]
    fn test_descendants() {
        let snapshot = snapshot_with_chain();
        let descendants =
            role_descendants(&snapshot, &"employee".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(descendants.len(), 2);
        assert!(descendants.contains("manager"));
        assert!(descendants.contains("admin"));

        let leaf =
            role_descendants(&snapshot, &"admin".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_descendant_cycle_detected() {
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_group(GroupRecord::new("t1", "g1").with_parent("g2"));
        snapshot.insert_group(GroupRecord::new("t1", "g2").with_parent("g1"));

        let err =
            group_descendants(&snapshot, &"g1".to_string(), DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, AccessError::HierarchyCorruption(_)));
    }

    #[test]
    fn test_group_ancestors() {
        let mut snapshot = TenantSnapshot::new("t1");
        snapshot.insert_group(GroupRecord::new("t1", "org"));
        snapshot.insert_group(GroupRecord::new("t1", "dept").with_parent("org"));

        let ancestors =
            group_ancestors(&snapshot, &"dept".to_string(), DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(ancestors, vec!["org".to_string()]);
    }
}
