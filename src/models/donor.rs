use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Donor profile, one per user identity. The giving fields are a cache
/// over succeeded donations and are only ever written by the aggregate
/// recompute in `services::aggregates`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DonorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub address: String,
    pub total_donated: Decimal,
    pub donation_count: i32,
    pub average_donation: Decimal,
    pub first_donation_date: Option<DateTime<Utc>>,
    pub last_donation_date: Option<DateTime<Utc>>,
    pub lifecycle_status: String,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Donor lifecycle states. `reactivated` is defined but not assigned by
/// the current derivation (see `services::aggregates::derive_lifecycle`).
pub const LIFECYCLE_STATUSES: &[&str] = &["new", "active", "lapsed", "reactivated"];
