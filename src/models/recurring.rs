use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Stripe subscription mirrored locally. `stripe_subscription_id` is
/// unique and is the idempotency key for checkout completion in
/// subscription mode. Invariant, also enforced by a table CHECK:
/// total_payments == successful_payments + failed_payments.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecurringDonation {
    pub id: Uuid,
    pub donor_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub frequency: String, // monthly | quarterly | yearly
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub stripe_price_id: String,
    pub status: String, // active | paused | cancelled | failed
    pub total_payments: i32,
    pub successful_payments: i32,
    pub failed_payments: i32,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
