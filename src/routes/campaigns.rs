use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::campaign::{Campaign, CampaignListQuery};
use crate::AppState;

// Lists are cached briefly; cached progress figures self-expire rather
// than being invalidated on every donation.
const LIST_CACHE_SECS: u64 = 30;

fn campaign_json(c: &Campaign) -> Value {
    let mut v = serde_json::to_value(c).unwrap_or_default();
    v["progress_percentage"] = json!(c.progress_percentage());
    v
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignListQuery>,
) -> AppResult<Json<Value>> {
    let cache_key = format!(
        "campaigns:{}:{}:{}",
        query
            .organization
            .map(|o| o.to_string())
            .unwrap_or_else(|| "all".into()),
        query.campaign_type.as_deref().unwrap_or("all"),
        query.featured.unwrap_or(false),
    );
    if let Some(cached) = state.cache.get_json::<Value>(&cache_key).await {
        return Ok(Json(cached));
    }

    let rows: Vec<Campaign> = sqlx::query_as(
        r#"SELECT * FROM campaigns WHERE status = 'active'
            AND ($1::uuid IS NULL OR organization_id = $1)
            AND ($2::text IS NULL OR campaign_type = $2)
            AND (NOT $3::bool OR is_featured)
        ORDER BY is_featured DESC, created_at DESC"#,
    )
    .bind(query.organization)
    .bind(query.campaign_type.clone())
    .bind(query.featured.unwrap_or(false))
    .fetch_all(&state.db)
    .await?;

    let body = json!({ "campaigns": rows.iter().map(campaign_json).collect::<Vec<_>>() });
    state.cache.set_json(&cache_key, &body, LIST_CACHE_SECS).await;
    Ok(Json(body))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let campaign: Option<Campaign> =
        sqlx::query_as("SELECT * FROM campaigns WHERE id = $1 AND status = 'active'")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;

    let campaign = campaign.ok_or_else(|| AppError::NotFound("Campaign not found".into()))?;
    Ok(Json(json!({ "campaign": campaign_json(&campaign) })))
}
