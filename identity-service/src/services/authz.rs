use serde::Deserialize;
use service_core::error::AppError;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{MembershipRow, RoleGrantRow};

/// Effective authorization for one user: their role and permission set
/// in the selected tenant, plus every tenant they belong to.
#[derive(Debug, Clone)]
pub struct AuthorizedContext {
    pub role: String,
    pub permissions: Vec<String>,
    pub tenant_id: Uuid,
    pub memberships: Vec<MembershipRow>,
}

/// Resolves roles, permissions and tenant context from the relational
/// graph.
#[derive(Clone)]
pub struct AuthzService {
    db: Database,
}

impl AuthzService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve the user's effective authorization. The selected tenant is
    /// the membership flagged primary, falling back to the oldest
    /// membership. A fully authenticated user with zero tenants or zero
    /// roles is an invariant violation, not a client error.
    pub async fn resolve(&self, user_id: Uuid) -> Result<AuthorizedContext, AppError> {
        let memberships = self.db.find_memberships(user_id).await?;
        // Primary-first ordering comes from the store.
        let selected = memberships.first().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "User {} has no tenant membership",
                user_id
            ))
        })?;
        let tenant_id = selected.tenant_id;

        let grants = self.db.find_role_grants(user_id, tenant_id).await?;
        let (role, permissions) = fold_grants(&grants).ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "User {} has no role in tenant {}",
                user_id,
                tenant_id
            ))
        })?;

        Ok(AuthorizedContext {
            role,
            permissions,
            tenant_id,
            memberships,
        })
    }
}

/// Collapse flat (role, permission) rows into the primary role and a
/// deduplicated, order-preserving permission list. The first role in
/// assignment order is authoritative; permissions merge across all
/// assigned roles, first seen wins.
pub fn fold_grants(rows: &[RoleGrantRow]) -> Option<(String, Vec<String>)> {
    let role = rows.first()?.role_name.clone();

    let mut seen = HashSet::new();
    let mut permissions = Vec::new();
    for row in rows {
        if let Some(permission) = &row.permission_name {
            if seen.insert(permission.clone()) {
                permissions.push(permission.clone());
            }
        }
    }

    Some((role, permissions))
}

/// Declarative per-route authorization constraints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRequirements {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// ALL (true) vs ANY (false) semantics over `permissions`.
    pub require_all_permissions: bool,
    /// When both role and permission constraints are present, require
    /// both to hold instead of either.
    pub require_both: bool,
}

impl AccessRequirements {
    pub fn roles<I: IntoIterator<Item = S>, S: Into<String>>(roles: I) -> Self {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn permissions<I: IntoIterator<Item = S>, S: Into<String>>(permissions: I) -> Self {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Evaluate the constraints against a user's role and permission
    /// names. No constraints means an authentication-only gate.
    pub fn check(&self, role: &str, permissions: &[String]) -> Result<(), AppError> {
        if self.roles.is_empty() && self.permissions.is_empty() {
            return Ok(());
        }

        let role_ok = if self.roles.is_empty() {
            None
        } else {
            Some(self.roles.iter().any(|r| r == role))
        };

        let permissions_ok = if self.permissions.is_empty() {
            None
        } else if self.require_all_permissions {
            Some(self.permissions.iter().all(|p| permissions.contains(p)))
        } else {
            Some(self.permissions.iter().any(|p| permissions.contains(p)))
        };

        let allowed = match (role_ok, permissions_ok) {
            (Some(r), Some(p)) => {
                if self.require_both {
                    r && p
                } else {
                    r || p
                }
            }
            (Some(r), None) => r,
            (None, Some(p)) => p,
            (None, None) => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Insufficient privileges"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role: &str, permission: Option<&str>) -> RoleGrantRow {
        RoleGrantRow {
            role_id: Uuid::new_v4(),
            role_name: role.to_string(),
            permission_name: permission.map(|p| p.to_string()),
        }
    }

    fn perms(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_fold_grants_dedupes_first_seen() {
        let rows = vec![
            grant("owner", Some("ledger:read")),
            grant("owner", Some("ledger:write")),
            grant("accountant", Some("ledger:read")),
            grant("accountant", Some("reports:run")),
        ];

        let (role, permissions) = fold_grants(&rows).unwrap();
        assert_eq!(role, "owner");
        assert_eq!(
            permissions,
            perms(&["ledger:read", "ledger:write", "reports:run"])
        );
    }

    #[test]
    fn test_fold_grants_role_without_permissions() {
        let rows = vec![grant("viewer", None)];
        let (role, permissions) = fold_grants(&rows).unwrap();
        assert_eq!(role, "viewer");
        assert!(permissions.is_empty());
    }

    #[test]
    fn test_fold_grants_empty_is_none() {
        assert!(fold_grants(&[]).is_none());
    }

    #[test]
    fn test_no_constraints_passes() {
        let reqs = AccessRequirements::default();
        assert!(reqs.check("viewer", &[]).is_ok());
    }

    #[test]
    fn test_role_only_gate() {
        let reqs = AccessRequirements::roles(["owner", "admin"]);
        assert!(reqs.check("owner", &[]).is_ok());
        assert!(reqs.check("viewer", &[]).is_err());
    }

    #[test]
    fn test_permissions_any_semantics() {
        let reqs = AccessRequirements::permissions(["ledger:write", "reports:run"]);
        assert!(reqs.check("viewer", &perms(&["reports:run"])).is_ok());
        assert!(reqs.check("viewer", &perms(&["ledger:read"])).is_err());
    }

    #[test]
    fn test_permissions_all_semantics() {
        let reqs = AccessRequirements {
            permissions: perms(&["ledger:write", "reports:run"]),
            require_all_permissions: true,
            ..Default::default()
        };
        assert!(reqs
            .check("viewer", &perms(&["ledger:write", "reports:run"]))
            .is_ok());
        assert!(reqs.check("viewer", &perms(&["ledger:write"])).is_err());
    }

    #[test]
    fn test_either_suffices_by_default() {
        let reqs = AccessRequirements {
            roles: perms(&["owner"]),
            permissions: perms(&["ledger:write"]),
            ..Default::default()
        };
        // Role matches, permission does not.
        assert!(reqs.check("owner", &[]).is_ok());
        // Permission matches, role does not.
        assert!(reqs.check("viewer", &perms(&["ledger:write"])).is_ok());
        // Neither matches.
        assert!(reqs.check("viewer", &[]).is_err());
    }

    #[test]
    fn test_require_both() {
        let reqs = AccessRequirements {
            roles: perms(&["owner"]),
            permissions: perms(&["ledger:write"]),
            require_both: true,
            ..Default::default()
        };
        assert!(reqs.check("owner", &perms(&["ledger:write"])).is_ok());
        assert!(reqs.check("owner", &[]).is_err());
        assert!(reqs.check("viewer", &perms(&["ledger:write"])).is_err());
    }

    #[test]
    fn test_require_both_with_single_constraint_type() {
        // With only one constraint type present, that one alone governs
        // regardless of the combination flag.
        let reqs = AccessRequirements {
            roles: perms(&["owner"]),
            require_both: true,
            ..Default::default()
        };
        assert!(reqs.check("owner", &[]).is_ok());
    }
}
