use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode};
use serde_json::Value;

use crate::services::reconcile::{self, Outcome};
use crate::AppState;

/// Stripe webhook endpoint. Signature failures and unparseable payloads
/// are the only 4xx; everything past verification answers 200 so the
/// processor stops redelivering. Every verified event id is logged in
/// stripe_events, and an already-seen id short-circuits before any
/// handler runs.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let stripe = match &state.stripe {
        Some(s) => s,
        None => return Ok(StatusCode::OK),
    };

    let sig = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let event = match stripe.verify_webhook_signature(&body, sig) {
        Ok(e) => e,
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };

    let event_id = event["id"].as_str().unwrap_or("");
    let event_type = event["type"].as_str().unwrap_or("");
    let object = &event["data"]["object"];

    // Idempotency check against the event log
    let already_processed: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stripe_events WHERE id = $1)")
            .bind(event_id)
            .fetch_one(&state.db)
            .await
            .unwrap_or(false);

    if already_processed {
        return Ok(StatusCode::OK);
    }

    let result = match event_type {
        "checkout.session.completed" => {
            reconcile::checkout_completed(&state.db, state.stripe.as_ref(), object).await
        }
        "payment_intent.succeeded" => {
            reconcile::payment_intent_succeeded(&state.db, object).await
        }
        "invoice.paid" => reconcile::invoice_paid(&state.db, object).await,
        "customer.subscription.deleted" => {
            reconcile::subscription_deleted(&state.db, object).await
        }
        "invoice.payment_failed" => {
            reconcile::invoice_payment_failed(&state.db, object).await
        }
        // Unknown event kinds are acknowledged to prevent redelivery
        // storms, but logged as ignored so the audit trail can tell them
        // apart from genuinely handled events
        _ => Ok(Outcome::Ignored),
    };

    let status = match &result {
        Ok(outcome) => {
            if let Outcome::Dropped(reason) = *outcome {
                tracing::warn!(event_id, event_type, reason, "webhook event dropped");
                state
                    .cache
                    .incr(&format!("webhooks:dropped:{}", reason))
                    .await;
            }
            outcome.as_status()
        }
        Err(e) => {
            tracing::error!(event_id, event_type, "webhook handler failed: {e}");
            "failed"
        }
    };

    record_event(&state.db, event_id, event_type, &event, status).await;

    Ok(StatusCode::OK)
}

/// Appends the verified event to the audit log. The first recorded status
/// wins; a lost write costs only the event-level short-circuit, since every
/// handler is individually idempotent, but it is worth a warning.
async fn record_event(
    db: &sqlx::PgPool,
    event_id: &str,
    event_type: &str,
    payload: &Value,
    status: &str,
) {
    if let Err(e) = sqlx::query(
        "INSERT INTO stripe_events (id, event_type, payload, status) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(payload)
    .bind(status)
    .execute(db)
    .await
    {
        tracing::warn!(event_id, event_type, "failed to record webhook event: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[sqlx::test]
    async fn event_log_keeps_the_first_recorded_status(pool: sqlx::PgPool) {
        let payload = json!({ "id": "evt_log_1", "type": "invoice.paid" });
        record_event(&pool, "evt_log_1", "invoice.paid", &payload, "processed").await;
        record_event(&pool, "evt_log_1", "invoice.paid", &payload, "ignored").await;

        let (status, count): (String, i64) = sqlx::query_as(
            "SELECT MAX(status), COUNT(*)::bigint FROM stripe_events WHERE id = 'evt_log_1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "processed");
        assert_eq!(count, 1);
    }
}
