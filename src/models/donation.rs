use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One monetary transfer, one-time or produced by a recurring subscription.
/// Rows are append-mostly and never deleted; donor/organization FKs are
/// restrict-on-delete to protect financial history.
///
/// `stripe_payment_intent_id` and `stripe_invoice_id` carry unique
/// constraints and act as idempotency keys for webhook delivery.
/// `completed_at` is set exactly once, the first time status becomes
/// `succeeded`, and is never rewritten afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub recurring_donation_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub donation_type: String, // one_time | recurring
    pub covers_processing_fee: bool,
    pub processing_fee_amount: Decimal,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub stripe_charge_id: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: String,
    pub failure_reason: String,
    pub is_anonymous: bool,
    pub dedication_type: String, // in_honor | in_memory | none
    pub dedication_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Minor currency units (cents). Minimum 100 = $1.00.
    pub amount: Option<i64>,
    pub currency: Option<String>,
    /// "one_time" or "monthly".
    pub interval: Option<String>,
    #[serde(rename = "organizationId")]
    pub organization_id: Option<Uuid>,
    #[serde(rename = "campaignId")]
    pub campaign_id: Option<Uuid>,
    #[serde(rename = "isAnonymous", default)]
    pub is_anonymous: bool,
    #[serde(rename = "coversProcessingFee", default)]
    pub covers_processing_fee: bool,
    #[serde(rename = "dedicationType")]
    pub dedication_type: Option<String>,
    #[serde(rename = "dedicationName")]
    pub dedication_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSuccessQuery {
    pub session_id: Option<String>,
}
