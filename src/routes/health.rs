use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();
    let redis_ok = state.cache.health_check().await;

    let status = if db_ok && redis_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "postgres": db_ok,
        "redis": redis_ok,
        "timestamp": chrono::Utc::now(),
    }))
}

/// Operational counters, including webhook events dropped on lookup
/// misses (the out-of-band reconciliation queue).
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let events: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*)::bigint FROM stripe_events GROUP BY status",
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    let dropped: Vec<(String, i64)> = sqlx::query_as(
        r#"SELECT COALESCE(payload->>'type', 'unknown'), COUNT(*)::bigint
        FROM stripe_events WHERE status = 'dropped' GROUP BY 1"#,
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    Json(json!({
        "webhookEvents": events.into_iter().collect::<std::collections::HashMap<_, _>>(),
        "droppedByType": dropped.into_iter().collect::<std::collections::HashMap<_, _>>(),
    }))
}
