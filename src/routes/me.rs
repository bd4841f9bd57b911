use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::donation::Donation;
use crate::models::recurring::RecurringDonation;
use crate::AppState;

pub async fn my_donations(
    State(state): State<AppState>,
    user: Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let rows: Vec<Donation> = sqlx::query_as(
        r#"SELECT d.* FROM donations d
        JOIN donor_profiles p ON p.id = d.donor_id
        WHERE p.user_id = $1
        ORDER BY d.created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "donations": rows })))
}

pub async fn my_recurring_donations(
    State(state): State<AppState>,
    user: Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let rows: Vec<RecurringDonation> = sqlx::query_as(
        r#"SELECT r.* FROM recurring_donations r
        JOIN donor_profiles p ON p.id = r.donor_id
        WHERE p.user_id = $1
        ORDER BY r.created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "recurringDonations": rows })))
}
