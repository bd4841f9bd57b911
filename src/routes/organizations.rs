use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::organization::Organization;
use crate::AppState;

pub async fn list_organizations(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let rows: Vec<Organization> = sqlx::query_as(
        "SELECT * FROM organizations WHERE status = 'active' ORDER BY is_featured DESC, name",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "organizations": rows })))
}

pub async fn get_organization(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let org: Option<Organization> =
        sqlx::query_as("SELECT * FROM organizations WHERE id = $1 AND status = 'active'")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;

    let org = org.ok_or_else(|| AppError::NotFound("Organization not found".into()))?;
    Ok(Json(json!({ "organization": org })))
}
