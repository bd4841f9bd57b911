use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fundraising campaign owned by an organization (cascade on delete).
/// `amount_raised` and `donor_count` are cached aggregates over succeeded
/// donations, maintained by `services::aggregates`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub campaign_type: String,
    pub goal_amount: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub amount_raised: Decimal,
    pub donor_count: i32,
    pub status: String,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn progress_percentage(&self) -> f64 {
        progress_percentage(self.amount_raised, self.goal_amount)
    }
}

/// Percentage of goal reached, clamped to [0, 100].
pub fn progress_percentage(raised: Decimal, goal: Decimal) -> f64 {
    if goal <= Decimal::ZERO {
        return 0.0;
    }
    let pct = (raised / goal * Decimal::from(100)).to_f64().unwrap_or(0.0);
    pct.clamp(0.0, 100.0)
}

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    pub organization: Option<Uuid>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    pub featured: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn progress_is_clamped_to_goal() {
        let goal = Decimal::new(100_00, 2);
        assert_eq!(progress_percentage(Decimal::new(50_00, 2), goal), 50.0);
        assert_eq!(progress_percentage(Decimal::new(250_00, 2), goal), 100.0);
        assert_eq!(progress_percentage(Decimal::ZERO, goal), 0.0);
    }

    #[test]
    fn zero_goal_reports_zero_progress() {
        assert_eq!(progress_percentage(Decimal::new(10_00, 2), Decimal::ZERO), 0.0);
    }
}
