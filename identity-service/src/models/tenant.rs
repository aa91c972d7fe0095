//! Tenant model - organization boundaries and memberships.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

static SCHEMA_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("schema name regex"));

/// Tenant entity.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    /// Unique identifier usable as a database schema name.
    pub schema_name: String,
    pub label: String,
    pub is_active: bool,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new(schema_name: String, label: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            schema_name,
            label,
            is_active: true,
            deleted_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Lowercase letter first, then lowercase letters, digits or
    /// underscores, at most 63 characters.
    pub fn is_valid_schema_name(name: &str) -> bool {
        name.len() <= 63 && SCHEMA_NAME_RE.is_match(name)
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_utc.is_none()
    }
}

/// Tenant response for API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantResponse {
    pub tenant_id: Uuid,
    pub schema_name: String,
    pub label: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            tenant_id: t.tenant_id,
            schema_name: t.schema_name,
            label: t.label,
            is_active: t.is_active,
            created_utc: t.created_utc,
        }
    }
}

/// Membership row joined with its tenant, as loaded for authorization
/// resolution. Ordered primary-first by the store.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRow {
    pub tenant_id: Uuid,
    pub schema_name: String,
    pub label: String,
    pub is_primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_schema_names() {
        assert!(Tenant::is_valid_schema_name("acme"));
        assert!(Tenant::is_valid_schema_name("acme_books_2"));
        assert!(Tenant::is_valid_schema_name("a"));
    }

    #[test]
    fn test_invalid_schema_names() {
        assert!(!Tenant::is_valid_schema_name(""));
        assert!(!Tenant::is_valid_schema_name("1acme"));
        assert!(!Tenant::is_valid_schema_name("_acme"));
        assert!(!Tenant::is_valid_schema_name("Acme"));
        assert!(!Tenant::is_valid_schema_name("acme-books"));
        assert!(!Tenant::is_valid_schema_name(&"a".repeat(64)));
    }

    #[test]
    fn test_new_tenant_is_usable() {
        let tenant = Tenant::new("acme".to_string(), "Acme Books".to_string());
        assert!(tenant.is_usable());
    }
}
