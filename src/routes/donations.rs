use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::donation::{CheckoutRequest, CheckoutSuccessQuery};
use crate::services::receipts;
use crate::services::stripe::CheckoutSessionParams;
use crate::AppState;

/// Stripe's flat-rate-plus-percentage fee, in minor units:
/// round(amount * 2.9%) + 30. Integer arithmetic, round half up.
pub fn processing_fee(amount_minor: i64) -> i64 {
    (amount_minor * 29 + 500) / 1000 + 30
}

/// Publishable key handed to the frontend so it can mount Stripe.js.
pub async fn stripe_config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "publishableKey": state.config.stripe.publishable_key,
    }))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Json(body): Json<CheckoutRequest>,
) -> AppResult<Json<Value>> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Internal("Stripe not configured".into()))?;

    let mut amount = body.amount.unwrap_or(0);
    if amount < 100 {
        return Err(AppError::BadRequest("Amount must be at least $1.00".into()));
    }
    let org_id = body
        .organization_id
        .ok_or_else(|| AppError::BadRequest("Organization ID is required".into()))?;

    let currency = body.currency.unwrap_or_else(|| "usd".to_string());
    let monthly = body.interval.as_deref() == Some("monthly");

    let org: Option<(String,)> =
        sqlx::query_as("SELECT name FROM organizations WHERE id = $1 AND status = 'active'")
            .bind(org_id)
            .fetch_optional(&state.db)
            .await?;
    let (org_name,) = org.ok_or_else(|| AppError::NotFound("Organization not found".into()))?;

    let campaign_title = match body.campaign_id {
        Some(cid) => {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT title FROM campaigns WHERE id = $1 AND status = 'active'")
                    .bind(cid)
                    .fetch_optional(&state.db)
                    .await?;
            let (title,) = row.ok_or_else(|| AppError::NotFound("Campaign not found".into()))?;
            Some(title)
        }
        None => None,
    };

    // The donor absorbs the processor fee when asked to
    let mut fee = 0i64;
    if body.covers_processing_fee {
        fee = processing_fee(amount);
        amount += fee;
    }

    let customer_id = match &user {
        Some(Extension(user)) => ensure_stripe_customer(&state, user).await?,
        None => None,
    };

    // This bag is the contract the webhook reconciler parses back out of
    // checkout.session.completed
    let mut metadata: Vec<(String, String)> = vec![
        ("organization_id".into(), org_id.to_string()),
        ("is_anonymous".into(), body.is_anonymous.to_string()),
        (
            "covers_processing_fee".into(),
            body.covers_processing_fee.to_string(),
        ),
        ("processing_fee_amount".into(), fee.to_string()),
    ];
    if let Some(cid) = body.campaign_id {
        metadata.push(("campaign_id".into(), cid.to_string()));
    }
    if let Some(Extension(user)) = &user {
        metadata.push(("user_id".into(), user.id.to_string()));
    }
    if let Some(dedication_type) = &body.dedication_type {
        metadata.push(("dedication_type".into(), dedication_type.clone()));
        metadata.push((
            "dedication_name".into(),
            body.dedication_name.clone().unwrap_or_default(),
        ));
    }

    let product_name = if monthly {
        format!("Monthly Donation to {}", org_name)
    } else {
        format!("Donation to {}", org_name)
    };

    let session = stripe
        .create_checkout_session(&CheckoutSessionParams {
            customer_id,
            currency,
            unit_amount: amount,
            product_name,
            product_description: campaign_title.unwrap_or_else(|| "General Support".to_string()),
            recurring_monthly: monthly,
            success_url: format!(
                "{}/donate/success?session_id={{CHECKOUT_SESSION_ID}}",
                state.config.frontend_url
            ),
            cancel_url: format!("{}/donate", state.config.frontend_url),
            metadata,
        })
        .await?;

    Ok(Json(json!({
        "sessionId": session["id"],
        "url": session["url"],
    })))
}

/// Creates (or reuses) the Stripe customer attached to the caller's donor
/// profile. Callers without a profile donate as guests.
async fn ensure_stripe_customer(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<Option<String>> {
    let stripe = match &state.stripe {
        Some(s) => s,
        None => return Ok(None),
    };

    let profile: Option<(Uuid, Option<String>, String, String)> = sqlx::query_as(
        "SELECT id, stripe_customer_id, email, full_name FROM donor_profiles WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    let Some((profile_id, existing, email, full_name)) = profile else {
        return Ok(None);
    };

    if let Some(cid) = existing.filter(|c| !c.is_empty()) {
        return Ok(Some(cid));
    }

    let customer = stripe
        .create_customer(&email, &full_name, &user.id.to_string())
        .await?;
    let cid = customer["id"].as_str().unwrap_or("").to_string();

    sqlx::query("UPDATE donor_profiles SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(&cid)
        .bind(profile_id)
        .execute(&state.db)
        .await?;

    Ok(Some(cid))
}

pub async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<CheckoutSuccessQuery>,
) -> AppResult<Json<Value>> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Internal("Stripe not configured".into()))?;

    let session_id = query
        .session_id
        .ok_or_else(|| AppError::BadRequest("Session ID is required".into()))?;

    let session = stripe.get_checkout_session(&session_id).await?;

    let amount_minor = session["amount_total"].as_i64().unwrap_or(0);
    Ok(Json(json!({
        "amount": amount_minor as f64 / 100.0,
        "currency": session["currency"].as_str().unwrap_or("usd"),
        "customerEmail": session["customer_details"]["email"],
        "paymentStatus": session["payment_status"],
    })))
}

pub async fn issue_receipt(
    State(state): State<AppState>,
    user: Extension<AuthUser>,
    Path(donation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let receipt = receipts::issue_receipt(&state.db, donation_id, user.id).await?;
    Ok(Json(json!({ "receipt": receipt })))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    user: Extension<AuthUser>,
    Path(donation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let receipt = receipts::get_receipt(&state.db, donation_id, user.id).await?;
    Ok(Json(json!({ "receipt": receipt })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fee_matches_flat_rate_plus_percentage() {
        // $50.00 donation: 2.9% = 145, plus 30 = 175
        assert_eq!(processing_fee(5000), 175);
        // $1.00 floor: 2.9% of 100 rounds to 3, plus 30
        assert_eq!(processing_fee(100), 33);
        // Rounding is half-up: 2.9% of 1050 = 30.45 -> 30
        assert_eq!(processing_fee(1050), 60);
    }

    #[test]
    fn covered_fee_scenario() {
        // A $50 gift with the fee covered charges $51.75 and books a
        // $1.75 fee
        let base = 5000;
        let fee = processing_fee(base);
        assert_eq!(fee, 175);
        assert_eq!(base + fee, 5175);
    }
}
