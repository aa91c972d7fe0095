//! Tenant endpoints: creation (platform operators) and membership
//! management.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use service_core::{error::AppError, response::ApiResponse};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::CurrentUser;
use crate::models::tenant::TenantResponse;
use crate::models::Tenant;
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, max = 63, message = "schema name must be 1-63 characters"))]
    pub schema_name: String,
    #[validate(length(min = 1, max = 120, message = "label is required"))]
    pub label: String,
}

/// POST /tenants — create an organization.
pub async fn create(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !Tenant::is_valid_schema_name(&req.schema_name) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Schema name must start with a lowercase letter and contain only lowercase letters, digits and underscores"
        )));
    }

    if state
        .db
        .find_tenant_by_schema_name(&req.schema_name)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "A tenant with this schema name already exists"
        )));
    }

    let tenant = Tenant::new(req.schema_name, req.label);
    state.db.insert_tenant(&tenant).await?;

    tracing::info!(
        target: "audit",
        event = "tenant_created",
        tenant_id = %tenant.tenant_id,
        schema_name = %tenant.schema_name,
        "Tenant created"
    );

    Ok(ApiResponse::created(
        "Tenant created",
        TenantResponse::from(tenant),
    ))
}

/// POST /tenants/:tenant_id/primary — make this membership the caller's
/// primary tenant; any other primary flag is cleared in the same
/// transaction.
pub async fn set_primary(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.set_primary_tenant(user.0.sub, tenant_id).await?;
    Ok(ApiResponse::ok("Primary tenant updated", serde_json::json!({})))
}
