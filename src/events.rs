//! Policy change events
//!
//! The CRUD layer emits one of these after every committing mutation that can
//! change a decision outcome. The engine consumes the stream and bumps the
//! matching cache generations. Events must be sent after the new snapshot is
//! published (publish-then-invalidate).

use crate::types::{GroupId, RoleId, TenantId, UserId};
use serde::{Deserialize, Serialize};

/// A policy mutation that may change decision outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Direct user edits: assignments added/removed, group membership changes
    UserChanged {
        tenant_id: TenantId,
        user_ids: Vec<UserId>,
    },

    /// Role edit: permissions bound/unbound, priority, parent link, flags
    RoleChanged {
        tenant_id: TenantId,
        role_id: RoleId,
    },

    /// Group edit: role assignments, parent link, flags
    GroupChanged {
        tenant_id: TenantId,
        group_id: GroupId,
    },

    /// Permission edit, with the roles it is bound to
    PermissionChanged {
        tenant_id: TenantId,
        role_ids: Vec<RoleId>,
    },
}

impl ChangeEvent {
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            ChangeEvent::UserChanged { tenant_id, .. }
            | ChangeEvent::RoleChanged { tenant_id, .. }
            | ChangeEvent::GroupChanged { tenant_id, .. }
            | ChangeEvent::PermissionChanged { tenant_id, .. } => tenant_id,
        }
    }
}
