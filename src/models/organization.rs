use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nonprofit partner. Lifecycle: pending -> active -> suspended/archived.
/// Only administrative edits once donations reference it; deletion is
/// blocked by restrict FKs on the donation tables.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub mission_statement: String,
    pub email: String,
    pub website: String,
    pub ein: String,
    pub address: String,
    pub status: String,
    pub is_featured: bool,
    pub stripe_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
