use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::aggregates;
use crate::services::stripe::StripeClient;

/// Result of applying one webhook event to the ledger/registry.
///
/// Stripe delivers at least once and in no guaranteed order, so every
/// handler here must be safe to replay. `Dropped` covers lookup misses:
/// the event references state we don't hold (racing local creation, or a
/// deleted entity). Those are recorded and counted rather than surfaced,
/// because a non-2xx response would wedge the processor's retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Effect applied.
    Applied,
    /// Event kind this service does not handle; acknowledged only.
    Ignored,
    /// Redelivery of an event whose effect is already recorded; no-op.
    Duplicate,
    /// Referent missing; effect skipped, reason feeds the drop counter.
    Dropped(&'static str),
}

impl Outcome {
    pub fn as_status(&self) -> &'static str {
        match self {
            Outcome::Applied => "processed",
            Outcome::Ignored => "ignored",
            Outcome::Duplicate => "duplicate",
            Outcome::Dropped(_) => "dropped",
        }
    }
}

/// The metadata bag attached to checkout sessions at creation time.
/// Checkout creation (routes::donations) writes it; this is the parse
/// side of that contract. All values arrive as strings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub organization_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub is_anonymous: bool,
    pub covers_processing_fee: bool,
    /// Minor units.
    pub processing_fee_amount: i64,
    pub dedication_type: String,
    pub dedication_name: String,
}

impl CheckoutMetadata {
    pub fn parse(metadata: &Value) -> Self {
        let uuid_field = |key: &str| {
            metadata[key]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
        };
        let bool_field = |key: &str| {
            metadata[key]
                .as_str()
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        Self {
            organization_id: uuid_field("organization_id"),
            campaign_id: uuid_field("campaign_id"),
            user_id: uuid_field("user_id"),
            is_anonymous: bool_field("is_anonymous"),
            covers_processing_fee: bool_field("covers_processing_fee"),
            processing_fee_amount: metadata["processing_fee_amount"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            dedication_type: metadata["dedication_type"]
                .as_str()
                .unwrap_or("none")
                .to_string(),
            dedication_name: metadata["dedication_name"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// checkout.session.completed. Payment mode creates a succeeded one-time
/// donation; subscription mode registers the recurring donation. Either
/// way the whole effect commits in one transaction.
pub async fn checkout_completed(
    db: &sqlx::PgPool,
    stripe: Option<&StripeClient>,
    session: &Value,
) -> AppResult<Outcome> {
    let metadata = CheckoutMetadata::parse(&session["metadata"]);

    let Some(org_id) = metadata.organization_id else {
        return Ok(Outcome::Dropped("missing_organization"));
    };

    let amount_minor = session["amount_total"].as_i64().unwrap_or(0);
    let amount = Decimal::new(amount_minor, 2);
    let currency = session["currency"].as_str().unwrap_or("usd").to_string();
    let customer_id = session["customer"].as_str().unwrap_or("").to_string();
    let subscription_mode = session["mode"].as_str() == Some("subscription");

    // Price id is only available by reading the subscription back; a
    // failure here is tolerated rather than blocking the registration.
    let (subscription_id, price_id) = if subscription_mode {
        let sub_id = session["subscription"].as_str().unwrap_or("").to_string();
        if sub_id.is_empty() {
            return Ok(Outcome::Dropped("missing_subscription_id"));
        }
        let price_id = match stripe {
            Some(client) => client
                .get_subscription(&sub_id)
                .await
                .map(|sub| {
                    sub["items"]["data"][0]["price"]["id"]
                        .as_str()
                        .unwrap_or("")
                        .to_string()
                })
                .unwrap_or_default(),
            None => String::new(),
        };
        (sub_id, price_id)
    } else {
        (String::new(), String::new())
    };

    let mut tx = db.begin().await?;

    let org_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1)")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;
    if !org_exists {
        return Ok(Outcome::Dropped("unknown_organization"));
    }

    // A vanished campaign downgrades the gift to general support
    // instead of dropping the whole event.
    let campaign_id = match metadata.campaign_id {
        Some(cid) => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM campaigns WHERE id = $1)")
                    .bind(cid)
                    .fetch_one(&mut *tx)
                    .await?;
            if exists {
                Some(cid)
            } else {
                tracing::warn!("Checkout references unknown campaign {cid}, detaching");
                None
            }
        }
        None => None,
    };

    let donor_id: Option<Uuid> = match metadata.user_id {
        Some(user_id) => {
            sqlx::query_scalar("SELECT id FROM donor_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
        }
        None => None,
    };

    if subscription_mode {
        let inserted = sqlx::query(
            r#"INSERT INTO recurring_donations
                (donor_id, organization_id, campaign_id, amount, currency, frequency,
                 stripe_subscription_id, stripe_customer_id, stripe_price_id, status)
            VALUES ($1, $2, $3, $4, $5, 'monthly', $6, $7, $8, 'active')
            ON CONFLICT DO NOTHING"#,
        )
        .bind(donor_id)
        .bind(org_id)
        .bind(campaign_id)
        .bind(amount)
        .bind(&currency)
        .bind(&subscription_id)
        .bind(&customer_id)
        .bind(&price_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if inserted.rows_affected() == 0 {
            return Ok(Outcome::Duplicate);
        }
        return Ok(Outcome::Applied);
    }

    let payment_intent_id = session["payment_intent"].as_str().unwrap_or("");
    if payment_intent_id.is_empty() {
        return Ok(Outcome::Dropped("missing_payment_intent"));
    }

    let inserted = sqlx::query(
        r#"INSERT INTO donations
            (donor_id, organization_id, campaign_id, amount, currency, donation_type,
             covers_processing_fee, processing_fee_amount,
             stripe_payment_intent_id, stripe_customer_id,
             is_anonymous, dedication_type, dedication_name, status, completed_at)
        VALUES ($1, $2, $3, $4, $5, 'one_time', $6, $7, $8, $9, $10, $11, $12, 'succeeded', NOW())
        ON CONFLICT DO NOTHING"#,
    )
    .bind(donor_id)
    .bind(org_id)
    .bind(campaign_id)
    .bind(amount)
    .bind(&currency)
    .bind(metadata.covers_processing_fee)
    .bind(Decimal::new(metadata.processing_fee_amount, 2))
    .bind(payment_intent_id)
    .bind(&customer_id)
    .bind(metadata.is_anonymous)
    .bind(&metadata.dedication_type)
    .bind(&metadata.dedication_name)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Same payment intent already recorded; nothing to recompute.
        tx.commit().await?;
        return Ok(Outcome::Duplicate);
    }

    if let Some(donor_id) = donor_id {
        aggregates::recompute_donor(&mut tx, donor_id).await?;
    }
    if let Some(campaign_id) = campaign_id {
        aggregates::recompute_campaign(&mut tx, campaign_id).await?;
    }

    tx.commit().await?;
    Ok(Outcome::Applied)
}

/// payment_intent.succeeded. Marks the matching donation succeeded and
/// attaches the charge id. `completed_at` is preserved across replays.
pub async fn payment_intent_succeeded(
    db: &sqlx::PgPool,
    payment_intent: &Value,
) -> AppResult<Outcome> {
    let intent_id = payment_intent["id"].as_str().unwrap_or("");
    if intent_id.is_empty() {
        return Ok(Outcome::Dropped("malformed_payment_intent"));
    }
    let charge_id = payment_intent["charges"]["data"][0]["id"]
        .as_str()
        .or_else(|| payment_intent["latest_charge"].as_str())
        .unwrap_or("");

    let mut tx = db.begin().await?;

    let row: Option<(Uuid, Option<Uuid>, Option<Uuid>)> = sqlx::query_as(
        r#"UPDATE donations SET
            status = 'succeeded', stripe_charge_id = $2,
            completed_at = COALESCE(completed_at, NOW()), updated_at = NOW()
        WHERE stripe_payment_intent_id = $1
        RETURNING id, donor_id, campaign_id"#,
    )
    .bind(intent_id)
    .bind(charge_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((_, donor_id, campaign_id)) = row else {
        return Ok(Outcome::Dropped("unknown_payment_intent"));
    };

    if let Some(donor_id) = donor_id {
        aggregates::recompute_donor(&mut tx, donor_id).await?;
    }
    if let Some(campaign_id) = campaign_id {
        aggregates::recompute_campaign(&mut tx, campaign_id).await?;
    }

    tx.commit().await?;
    Ok(Outcome::Applied)
}

/// invoice.paid. One new succeeded donation per billing cycle, keyed by
/// the invoice id so a redelivered event cannot double-count the payment
/// or re-increment the subscription counters.
pub async fn invoice_paid(db: &sqlx::PgPool, invoice: &Value) -> AppResult<Outcome> {
    let subscription_id = invoice["subscription"].as_str().unwrap_or("");
    let invoice_id = invoice["id"].as_str().unwrap_or("");
    if subscription_id.is_empty() || invoice_id.is_empty() {
        return Ok(Outcome::Dropped("malformed_invoice"));
    }

    let mut tx = db.begin().await?;

    let recurring: Option<(Uuid, Option<Uuid>, Uuid, Option<Uuid>, Decimal, String, String)> =
        sqlx::query_as(
            r#"SELECT id, donor_id, organization_id, campaign_id, amount, currency, stripe_customer_id
            FROM recurring_donations WHERE stripe_subscription_id = $1"#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some((recurring_id, donor_id, org_id, campaign_id, amount, currency, customer_id)) =
        recurring
    else {
        return Ok(Outcome::Dropped("unknown_subscription"));
    };

    let inserted = sqlx::query(
        r#"INSERT INTO donations
            (donor_id, organization_id, campaign_id, recurring_donation_id,
             amount, currency, donation_type,
             stripe_payment_intent_id, stripe_invoice_id, stripe_charge_id,
             stripe_customer_id, stripe_subscription_id, status, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'recurring', $7, $8, $9, $10, $11, 'succeeded', NOW())
        ON CONFLICT DO NOTHING"#,
    )
    .bind(donor_id)
    .bind(org_id)
    .bind(campaign_id)
    .bind(recurring_id)
    .bind(amount)
    .bind(&currency)
    .bind(invoice["payment_intent"].as_str())
    .bind(invoice_id)
    .bind(invoice["charge"].as_str().unwrap_or(""))
    .bind(&customer_id)
    .bind(subscription_id)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Ok(Outcome::Duplicate);
    }

    sqlx::query(
        r#"UPDATE recurring_donations SET
            successful_payments = successful_payments + 1,
            total_payments = total_payments + 1,
            updated_at = NOW()
        WHERE id = $1"#,
    )
    .bind(recurring_id)
    .execute(&mut *tx)
    .await?;

    if let Some(donor_id) = donor_id {
        aggregates::recompute_donor(&mut tx, donor_id).await?;
    }
    if let Some(campaign_id) = campaign_id {
        aggregates::recompute_campaign(&mut tx, campaign_id).await?;
    }

    tx.commit().await?;
    Ok(Outcome::Applied)
}

/// customer.subscription.deleted.
pub async fn subscription_deleted(db: &sqlx::PgPool, subscription: &Value) -> AppResult<Outcome> {
    let subscription_id = subscription["id"].as_str().unwrap_or("");
    if subscription_id.is_empty() {
        return Ok(Outcome::Dropped("malformed_subscription"));
    }

    let updated = sqlx::query(
        r#"UPDATE recurring_donations SET
            status = 'cancelled',
            cancelled_at = COALESCE(cancelled_at, NOW()),
            updated_at = NOW()
        WHERE stripe_subscription_id = $1"#,
    )
    .bind(subscription_id)
    .execute(db)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(Outcome::Dropped("unknown_subscription"));
    }
    Ok(Outcome::Applied)
}

/// invoice.payment_failed. Counters only; the subscription stays in its
/// current status until Stripe cancels it.
pub async fn invoice_payment_failed(db: &sqlx::PgPool, invoice: &Value) -> AppResult<Outcome> {
    let subscription_id = invoice["subscription"].as_str().unwrap_or("");
    if subscription_id.is_empty() {
        return Ok(Outcome::Dropped("malformed_invoice"));
    }

    let updated = sqlx::query(
        r#"UPDATE recurring_donations SET
            failed_payments = failed_payments + 1,
            total_payments = total_payments + 1,
            updated_at = NOW()
        WHERE stripe_subscription_id = $1"#,
    )
    .bind(subscription_id)
    .execute(db)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(Outcome::Dropped("unknown_subscription"));
    }
    Ok(Outcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_full_metadata_bag() {
        let org = Uuid::new_v4();
        let campaign = Uuid::new_v4();
        let user = Uuid::new_v4();
        let metadata = json!({
            "organization_id": org.to_string(),
            "campaign_id": campaign.to_string(),
            "user_id": user.to_string(),
            "is_anonymous": "true",
            "covers_processing_fee": "true",
            "processing_fee_amount": "175",
            "dedication_type": "in_honor",
            "dedication_name": "Jane Doe",
        });

        let parsed = CheckoutMetadata::parse(&metadata);
        assert_eq!(parsed.organization_id, Some(org));
        assert_eq!(parsed.campaign_id, Some(campaign));
        assert_eq!(parsed.user_id, Some(user));
        assert!(parsed.is_anonymous);
        assert!(parsed.covers_processing_fee);
        assert_eq!(parsed.processing_fee_amount, 175);
        assert_eq!(parsed.dedication_type, "in_honor");
        assert_eq!(parsed.dedication_name, "Jane Doe");
    }

    #[test]
    fn parses_minimal_metadata_bag() {
        let org = Uuid::new_v4();
        let metadata = json!({
            "organization_id": org.to_string(),
            "is_anonymous": "false",
            "covers_processing_fee": "false",
            "processing_fee_amount": "0",
        });

        let parsed = CheckoutMetadata::parse(&metadata);
        assert_eq!(parsed.organization_id, Some(org));
        assert_eq!(parsed.campaign_id, None);
        assert_eq!(parsed.user_id, None);
        assert!(!parsed.is_anonymous);
        assert_eq!(parsed.processing_fee_amount, 0);
        assert_eq!(parsed.dedication_type, "none");
    }

    #[test]
    fn garbage_metadata_parses_to_defaults() {
        let parsed = CheckoutMetadata::parse(&json!({
            "organization_id": "not-a-uuid",
            "processing_fee_amount": "NaN",
        }));
        assert_eq!(parsed.organization_id, None);
        assert_eq!(parsed.processing_fee_amount, 0);
        let empty = CheckoutMetadata::parse(&json!(null));
        assert_eq!(empty, CheckoutMetadata::default());
    }

    #[test]
    fn outcome_status_strings() {
        assert_eq!(Outcome::Applied.as_status(), "processed");
        assert_eq!(Outcome::Ignored.as_status(), "ignored");
        assert_eq!(Outcome::Duplicate.as_status(), "duplicate");
        assert_eq!(Outcome::Dropped("unknown_subscription").as_status(), "dropped");
    }

    async fn seed_org(pool: &sqlx::PgPool) -> Uuid {
        sqlx::query_scalar(
            r#"INSERT INTO organizations (name, slug, email, status)
            VALUES ('Harvest Food Bank', 'harvest-food-bank', 'ops@harvest.org', 'active')
            RETURNING id"#,
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_donor(pool: &sqlx::PgPool, user_id: Uuid) -> Uuid {
        sqlx::query_scalar(
            r#"INSERT INTO donor_profiles (user_id, email, full_name)
            VALUES ($1, 'donor@example.com', 'Pat Donor')
            RETURNING id"#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_campaign(pool: &sqlx::PgPool, org_id: Uuid) -> Uuid {
        sqlx::query_scalar(
            r#"INSERT INTO campaigns (organization_id, title, slug, goal_amount, status)
            VALUES ($1, 'Winter Drive', 'winter-drive', 1000, 'active')
            RETURNING id"#,
        )
        .bind(org_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn payment_session(org: Uuid, campaign: Uuid, user: Uuid, intent: &str) -> Value {
        serde_json::json!({
            "mode": "payment",
            "payment_intent": intent,
            "amount_total": 5175,
            "currency": "usd",
            "customer": "cus_test",
            "metadata": {
                "organization_id": org.to_string(),
                "campaign_id": campaign.to_string(),
                "user_id": user.to_string(),
                "is_anonymous": "false",
                "covers_processing_fee": "true",
                "processing_fee_amount": "175",
            },
        })
    }

    #[sqlx::test]
    async fn replayed_checkout_completion_books_exactly_one_donation(pool: sqlx::PgPool) {
        let org = seed_org(&pool).await;
        let user = Uuid::new_v4();
        let donor = seed_donor(&pool, user).await;
        let campaign = seed_campaign(&pool, org).await;
        let session = payment_session(org, campaign, user, "pi_replay");

        assert_eq!(
            checkout_completed(&pool, None, &session).await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            checkout_completed(&pool, None, &session).await.unwrap(),
            Outcome::Duplicate
        );

        let (rows, fee): (i64, Decimal) = sqlx::query_as(
            r#"SELECT COUNT(*)::bigint, COALESCE(MAX(processing_fee_amount), 0)::numeric
            FROM donations WHERE stripe_payment_intent_id = 'pi_replay'"#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(fee, Decimal::new(1_75, 2));

        // Cached donor stats still equal the ledger sum after the replay
        let (total, count, lifecycle): (Decimal, i32, String) = sqlx::query_as(
            "SELECT total_donated, donation_count, lifecycle_status FROM donor_profiles WHERE id = $1",
        )
        .bind(donor)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(total, Decimal::new(51_75, 2));
        assert_eq!(count, 1);
        assert_eq!(lifecycle, "new");

        let (raised, donors): (Decimal, i32) =
            sqlx::query_as("SELECT amount_raised, donor_count FROM campaigns WHERE id = $1")
                .bind(campaign)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(raised, Decimal::new(51_75, 2));
        assert_eq!(donors, 1);
    }

    #[sqlx::test]
    async fn replayed_invoice_paid_cannot_double_count(pool: sqlx::PgPool) {
        let org = seed_org(&pool).await;
        let donor = seed_donor(&pool, Uuid::new_v4()).await;
        let recurring_id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO recurring_donations
                (donor_id, organization_id, amount, stripe_subscription_id)
            VALUES ($1, $2, 25, 'sub_live')
            RETURNING id"#,
        )
        .bind(donor)
        .bind(org)
        .fetch_one(&pool)
        .await
        .unwrap();

        let invoice = serde_json::json!({
            "id": "in_cycle_1",
            "subscription": "sub_live",
            "payment_intent": "pi_cycle_1",
            "charge": "ch_cycle_1",
        });

        assert_eq!(invoice_paid(&pool, &invoice).await.unwrap(), Outcome::Applied);
        assert_eq!(invoice_paid(&pool, &invoice).await.unwrap(), Outcome::Duplicate);

        let (total, successful, failed): (i32, i32, i32) = sqlx::query_as(
            r#"SELECT total_payments, successful_payments, failed_payments
            FROM recurring_donations WHERE id = $1"#,
        )
        .bind(recurring_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((total, successful, failed), (1, 1, 0));

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM donations WHERE stripe_invoice_id = 'in_cycle_1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test]
    async fn invoice_for_unknown_subscription_is_recorded_as_dropped(pool: sqlx::PgPool) {
        let invoice = serde_json::json!({ "id": "in_orphan", "subscription": "sub_orphan" });
        assert_eq!(
            invoice_paid(&pool, &invoice).await.unwrap(),
            Outcome::Dropped("unknown_subscription")
        );

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*)::bigint FROM donations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[sqlx::test]
    async fn completed_at_survives_status_replay(pool: sqlx::PgPool) {
        let org = seed_org(&pool).await;
        sqlx::query(
            r#"INSERT INTO donations (organization_id, amount, stripe_payment_intent_id, status)
            VALUES ($1, 20, 'pi_settle', 'processing')"#,
        )
        .bind(org)
        .execute(&pool)
        .await
        .unwrap();

        let intent = serde_json::json!({ "id": "pi_settle", "latest_charge": "ch_settle" });
        assert_eq!(
            payment_intent_succeeded(&pool, &intent).await.unwrap(),
            Outcome::Applied
        );
        let first: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
            "SELECT completed_at FROM donations WHERE stripe_payment_intent_id = 'pi_settle'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(
            payment_intent_succeeded(&pool, &intent).await.unwrap(),
            Outcome::Applied
        );
        let second: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
            "SELECT completed_at FROM donations WHERE stripe_payment_intent_id = 'pi_settle'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(first, second);
    }
}
