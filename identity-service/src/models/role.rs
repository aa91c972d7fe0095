//! Role and permission models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Role reserved for platform operators; invitations may never grant it.
pub const SUPERADMIN_ROLE: &str = "superadmin";

/// Role entity. Roles are defined platform-wide; the user↔role link is
/// scoped per tenant, so one user can hold different roles in different
/// tenants.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            name,
            is_active: true,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_utc.is_none()
    }

    pub fn is_superadmin(&self) -> bool {
        self.name == SUPERADMIN_ROLE
    }
}

/// Flat row produced by the role/permission join for one user in one
/// tenant: one row per (role, permission), permission absent for roles
/// with no active permissions. Assignment order is preserved by the
/// store query.
#[derive(Debug, Clone, FromRow)]
pub struct RoleGrantRow {
    pub role_id: Uuid,
    pub role_name: String,
    pub permission_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superadmin_detection() {
        assert!(Role::new(SUPERADMIN_ROLE.to_string()).is_superadmin());
        assert!(!Role::new("accountant".to_string()).is_superadmin());
    }

    #[test]
    fn test_inactive_role_is_not_usable() {
        let mut role = Role::new("accountant".to_string());
        assert!(role.is_usable());
        role.is_active = false;
        assert!(!role.is_usable());
    }
}
