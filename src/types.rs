//! Core data model for access decisions
//!
//! The engine never owns these entities: it reads immutable snapshots
//! published by the CRUD layer. Everything here is plain data; all decision
//! logic lives in the sibling modules.

use crate::condition::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tenant identifier
pub type TenantId = String;

/// User identifier
pub type UserId = String;

/// Group identifier
pub type GroupId = String;

/// Role identifier
pub type RoleId = String;

/// Permission identifier
pub type PermissionId = String;

/// Action being performed on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Execute,
    Approve,
    Reject,
}

impl Action {
    /// Stable lowercase name, used in fingerprints and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Execute => "execute",
            Action::Approve => "approve",
            Action::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How specifically a permission target matched a requested resource
///
/// Ordering matters: `ExactId > PathPrefix > TypeOnly` is the tie-break used
/// during conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSpecificity {
    TypeOnly,
    PathPrefix,
    ExactId,
}

/// Reference to a target resource
///
/// On the request side this names the concrete resource being accessed; on
/// the permission side it names the grant's target, where `resource_id` and
/// `path` narrow the grant from "every resource of this type" down to a path
/// subtree or a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource type (e.g., "document", "menu", "field_definition")
    pub resource_type: String,

    /// Exact resource identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Slash-separated resource path (e.g., "/contracts/2026/q3")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ResourceRef {
    /// Reference covering every resource of a type
    pub fn type_only(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            path: None,
        }
    }

    /// Reference to a single resource by identifier
    pub fn exact(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: Some(resource_id.into()),
            path: None,
        }
    }

    /// Reference to a path subtree
    pub fn path_prefix(resource_type: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            path: Some(path.into()),
        }
    }

    /// Attach a path to a request-side reference
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match this permission target against a requested resource
    ///
    /// Returns the specificity of the match, or `None` when the target does
    /// not cover the request. Exact id match takes precedence over path
    /// prefix, which takes precedence over type-only coverage.
    pub fn match_request(&self, request: &ResourceRef) -> Option<MatchSpecificity> {
        if self.resource_type != request.resource_type {
            return None;
        }

        if let Some(target_id) = &self.resource_id {
            return match &request.resource_id {
                Some(id) if id == target_id => Some(MatchSpecificity::ExactId),
                _ => None,
            };
        }

        if let Some(prefix) = &self.path {
            return match &request.path {
                Some(path) if path_starts_with(path, prefix) => {
                    Some(MatchSpecificity::PathPrefix)
                }
                _ => None,
            };
        }

        Some(MatchSpecificity::TypeOnly)
    }

    /// Stable textual form, used in fingerprints and log lines
    pub fn canonical(&self) -> String {
        match (&self.resource_id, &self.path) {
            (Some(id), _) => format!("{}:{}", self.resource_type, id),
            (None, Some(path)) => format!("{}:{}", self.resource_type, path),
            (None, None) => self.resource_type.clone(),
        }
    }
}

/// Prefix match on whole path segments, so "/a/b" covers "/a/b/c" but not "/a/bc"
fn path_starts_with(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Field-level mode granted by a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    Read,
    Write,
    Hidden,
}

/// Field-level access in a resolved decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    Hidden,
    ReadOnly,
    ReadWrite,
}

/// Direct role assignment on a user
///
/// Expired or inactive assignments contribute nothing to a decision but are
/// retained by the owning store for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: RoleId,

    /// Assignment is switched on
    pub active: bool,

    /// Optional expiration; `None` means never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn new(role_id: impl Into<RoleId>) -> Self {
        Self {
            role_id: role_id.into(),
            active: true,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether the assignment contributes at the given instant
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |at| now < at)
    }
}

/// Read-only snapshot of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub tenant_id: TenantId,

    /// Direct role assignments
    #[serde(default)]
    pub role_assignments: Vec<RoleAssignment>,

    /// Group memberships
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
}

impl UserRecord {
    pub fn new(tenant_id: impl Into<TenantId>, id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            role_assignments: Vec::new(),
            group_ids: Vec::new(),
        }
    }

    pub fn with_role(mut self, assignment: RoleAssignment) -> Self {
        self.role_assignments.push(assignment);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<GroupId>) -> Self {
        self.group_ids.push(group_id.into());
        self
    }
}

/// Read-only snapshot of a group
///
/// Groups form a forest per tenant; a group's effective roles include every
/// ancestor group's assigned roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub tenant_id: TenantId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<GroupId>,

    /// Roles assigned to this group
    #[serde(default)]
    pub role_ids: Vec<RoleId>,

    pub active: bool,
}

impl GroupRecord {
    pub fn new(tenant_id: impl Into<TenantId>, id: impl Into<GroupId>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            parent_id: None,
            role_ids: Vec::new(),
            active: true,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<GroupId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.role_ids.push(role_id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Read-only snapshot of a role
///
/// Roles form a forest per tenant; a child role inherits every ancestor's
/// permission bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub tenant_id: TenantId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RoleId>,

    /// Higher priority wins on conflicts
    pub priority: i32,

    /// Role may be assigned directly to users
    pub assignable: bool,

    pub active: bool,
}

impl RoleRecord {
    pub fn new(tenant_id: impl Into<TenantId>, id: impl Into<RoleId>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            parent_id: None,
            priority: 0,
            assignable: true,
            active: true,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<RoleId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Permission grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub tenant_id: TenantId,

    /// Resource coverage of the grant
    pub target: ResourceRef,

    /// Actions the grant allows
    pub actions: BTreeSet<Action>,

    /// ABAC condition; absent means always true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Field name → granted mode
    #[serde(default)]
    pub field_modes: BTreeMap<String, FieldMode>,

    pub active: bool,
}

impl Permission {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        id: impl Into<PermissionId>,
        target: ResourceRef,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            target,
            actions: BTreeSet::new(),
            condition: None,
            field_modes: BTreeMap::new(),
            active: true,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.insert(action);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, mode: FieldMode) -> Self {
        self.field_modes.insert(field.into(), mode);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Caller-supplied attribute bag for ABAC evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Named attributes (timestamp, IP class, tenant-defined tags, resource
    /// runtime attributes)
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Store the request timestamp under the conventional "timestamp" key
    pub fn with_timestamp(self, at: DateTime<Utc>) -> Self {
        self.with_attribute("timestamp", at.to_rfc3339())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}

/// Immutable, versioned view of one tenant's policy data
///
/// Entities are addressed by stable identifiers rather than object
/// references (arena layout), so bounded-depth traversal and cycle defense
/// stay cheap. Mutation never happens in place: the owning store publishes a
/// whole new snapshot and readers holding an old `Arc` keep a consistent,
/// if slightly stale, view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,

    /// Monotonic snapshot version, bumped on every publication
    pub version: u64,

    #[serde(default)]
    pub users: HashMap<UserId, UserRecord>,

    #[serde(default)]
    pub groups: HashMap<GroupId, GroupRecord>,

    #[serde(default)]
    pub roles: HashMap<RoleId, RoleRecord>,

    #[serde(default)]
    pub permissions: HashMap<PermissionId, Permission>,

    /// Role → direct permission bindings (ancestor permissions are added by
    /// hierarchy expansion, never duplicated into bindings)
    #[serde(default)]
    pub role_permissions: HashMap<RoleId, Vec<PermissionId>>,
}

impl TenantSnapshot {
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn insert_user(&mut self, user: UserRecord) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_group(&mut self, group: GroupRecord) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn insert_role(&mut self, role: RoleRecord) {
        self.roles.insert(role.id.clone(), role);
    }

    pub fn insert_permission(&mut self, permission: Permission) {
        self.permissions.insert(permission.id.clone(), permission);
    }

    /// Bind a permission to a role, skipping duplicates
    pub fn bind_permission(
        &mut self,
        role_id: impl Into<RoleId>,
        permission_id: impl Into<PermissionId>,
    ) {
        let bindings = self.role_permissions.entry(role_id.into()).or_default();
        let permission_id = permission_id.into();
        if !bindings.contains(&permission_id) {
            bindings.push(permission_id);
        }
    }

    /// Direct permission bindings on a role, empty when none
    pub fn direct_permissions(&self, role_id: &RoleId) -> &[PermissionId] {
        self.role_permissions
            .get(role_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
