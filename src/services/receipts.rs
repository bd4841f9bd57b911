use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::receipt::DonationReceipt;

/// Issues the tax receipt for a succeeded donation. Donor and organization
/// details are copied into the receipt row at this moment; later edits to
/// either entity must not leak into an issued receipt, so reads always go
/// to the snapshot. Re-issuing returns the existing receipt untouched.
pub async fn issue_receipt(
    db: &sqlx::PgPool,
    donation_id: Uuid,
    user_id: Uuid,
) -> AppResult<DonationReceipt> {
    let mut tx = db.begin().await?;

    let donation: Option<(Option<Uuid>, Uuid, rust_decimal::Decimal, String, String, chrono::DateTime<Utc>)> =
        sqlx::query_as(
            r#"SELECT donor_id, organization_id, amount, currency, status,
                COALESCE(completed_at, created_at)
            FROM donations WHERE id = $1"#,
        )
        .bind(donation_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some((donor_id, org_id, amount, currency, status, completed_at)) = donation else {
        return Err(AppError::NotFound("Donation not found".into()));
    };

    let donor: Option<(Uuid, String, String, String)> = match donor_id {
        Some(id) => {
            sqlx::query_as("SELECT user_id, full_name, email, address FROM donor_profiles WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
        }
        None => None,
    };

    let Some((owner_user_id, donor_name, donor_email, donor_address)) = donor else {
        return Err(AppError::BadRequest(
            "Receipts are only available for donations linked to a donor profile".into(),
        ));
    };

    if owner_user_id != user_id {
        return Err(AppError::Forbidden("Not your donation".into()));
    }

    if status != "succeeded" {
        return Err(AppError::BadRequest(
            "Receipts can only be issued for succeeded donations".into(),
        ));
    }

    if let Some(existing) = sqlx::query_as::<_, DonationReceipt>(
        "SELECT * FROM donation_receipts WHERE donation_id = $1",
    )
    .bind(donation_id)
    .fetch_optional(&mut *tx)
    .await?
    {
        return Ok(existing);
    }

    let (org_name, org_ein, org_address): (String, String, String) =
        sqlx::query_as("SELECT name, ein, address FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;

    let tax_year = completed_at.year();
    let receipt_number = format!(
        "RCPT-{}-{}",
        tax_year,
        Uuid::new_v4().simple().to_string()[..8].to_uppercase()
    );

    let receipt: DonationReceipt = sqlx::query_as(
        r#"INSERT INTO donation_receipts
            (donation_id, receipt_number, tax_year,
             donor_name, donor_email, donor_address,
             organization_name, organization_ein, organization_address,
             amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *"#,
    )
    .bind(donation_id)
    .bind(&receipt_number)
    .bind(tax_year)
    .bind(&donor_name)
    .bind(&donor_email)
    .bind(&donor_address)
    .bind(&org_name)
    .bind(&org_ein)
    .bind(&org_address)
    .bind(amount)
    .bind(&currency)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(receipt)
}

pub async fn get_receipt(
    db: &sqlx::PgPool,
    donation_id: Uuid,
    user_id: Uuid,
) -> AppResult<DonationReceipt> {
    let receipt: Option<DonationReceipt> = sqlx::query_as(
        r#"SELECT r.* FROM donation_receipts r
        JOIN donations d ON d.id = r.donation_id
        JOIN donor_profiles p ON p.id = d.donor_id
        WHERE r.donation_id = $1 AND p.user_id = $2"#,
    )
    .bind(donation_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    receipt.ok_or_else(|| AppError::NotFound("Receipt not found".into()))
}
