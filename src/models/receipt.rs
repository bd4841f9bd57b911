use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tax receipt, one-to-one with a donation. Donor and organization fields
/// are snapshots taken at generation time and are never recomputed from
/// live rows afterwards (tax-audit requirement).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DonationReceipt {
    pub id: Uuid,
    pub donation_id: Uuid,
    pub receipt_number: String,
    pub tax_year: i32,
    pub donor_name: String,
    pub donor_email: String,
    pub donor_address: String,
    pub organization_name: String,
    pub organization_ein: String,
    pub organization_address: String,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}
