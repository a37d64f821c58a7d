//! Resident pay-in reports and their review lifecycle.

use chrono::{NaiveDate, NaiveDateTime};
use estate_core::{
    BankTransactionId, DomainError, HouseId, PayinDraft, PayinId, PayinReport, PayinStatus, UserId,
};
use sqlx::SqliteConnection;

use crate::accounts::fetch_house;
use crate::db::{begin_immediate, finish, money, DbPool};
use crate::error::{StoreError, StoreResult};
use crate::invoices::fetch_income_for_payin;
use crate::policy::Policy;

#[derive(sqlx::FromRow)]
pub(crate) struct PayinRow {
    id: i64,
    house_id: i64,
    submitted_by: Option<i64>,
    amount_cents: i64,
    transfer_date: NaiveDate,
    transfer_hour: i64,
    transfer_minute: i64,
    evidence_ref: Option<String>,
    status: String,
    source: String,
    matched_bank_transaction_id: Option<i64>,
    rejection_reason: Option<String>,
    accepted_by: Option<i64>,
    accepted_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

impl TryFrom<PayinRow> for PayinReport {
    type Error = StoreError;

    fn try_from(r: PayinRow) -> Result<Self, Self::Error> {
        let hour = u32::try_from(r.transfer_hour)
            .map_err(|_| StoreError::InvalidData(format!("pay-in {} hour {}", r.id, r.transfer_hour)))?;
        let minute = u32::try_from(r.transfer_minute)
            .map_err(|_| StoreError::InvalidData(format!("pay-in {} minute {}", r.id, r.transfer_minute)))?;
        Ok(PayinReport {
            id: PayinId(r.id),
            house_id: HouseId(r.house_id),
            submitted_by: r.submitted_by.map(UserId),
            amount: money(r.amount_cents),
            transfer_date: r.transfer_date,
            transfer_hour: hour,
            transfer_minute: minute,
            evidence_ref: r.evidence_ref,
            status: r.status.parse()?,
            source: r.source.parse()?,
            matched_bank_transaction_id: r.matched_bank_transaction_id.map(BankTransactionId),
            rejection_reason: r.rejection_reason,
            accepted_by: r.accepted_by.map(UserId),
            accepted_at: r.accepted_at,
            created_at: r.created_at,
        })
    }
}

pub(crate) const PAYIN_COLUMNS: &str = "id, house_id, submitted_by, amount_cents, transfer_date, transfer_hour, \
     transfer_minute, evidence_ref, status, source, matched_bank_transaction_id, rejection_reason, \
     accepted_by, accepted_at, created_at";

/// Statuses the review queue and candidate search treat as SUBMITTED.
pub(crate) const REVIEW_STATUSES: &str = "('SUBMITTED', 'PENDING')";

pub(crate) fn convert_payins(rows: Vec<PayinRow>) -> StoreResult<Vec<PayinReport>> {
    rows.into_iter().map(PayinReport::try_from).collect()
}

/// Records a new pay-in, as a draft or straight into the review queue.
pub async fn create_payin(
    pool: &DbPool,
    policy: &Policy,
    draft: &PayinDraft,
    submitted_by: Option<UserId>,
    submit: bool,
) -> StoreResult<PayinReport> {
    draft.validate()?;
    policy.ensure_open(draft.transfer_date)?;

    let mut conn = pool.acquire().await?;
    fetch_house(&mut conn, draft.house_id).await?;

    let status = if submit { PayinStatus::Submitted } else { PayinStatus::Draft };
    let id = sqlx::query(
        "INSERT INTO payin_reports (house_id, submitted_by, amount_cents, transfer_date, transfer_hour, \
         transfer_minute, evidence_ref, status, source) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(draft.house_id.0)
    .bind(submitted_by.map(|u| u.0))
    .bind(draft.amount.to_cents()?)
    .bind(draft.transfer_date)
    .bind(draft.transfer_hour as i64)
    .bind(draft.transfer_minute as i64)
    .bind(draft.evidence_ref.as_deref())
    .bind(status.as_str())
    .bind(draft.source.as_str())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::info!(
        payin_id = id,
        house_id = draft.house_id.0,
        amount = %draft.amount,
        status = %status,
        "pay-in recorded"
    );
    fetch_payin(&mut conn, PayinId(id)).await
}

/// Replaces the submitter-controlled fields of a DRAFT or rejected pay-in.
pub async fn update_payin(pool: &DbPool, policy: &Policy, id: PayinId, draft: &PayinDraft) -> StoreResult<PayinReport> {
    draft.validate()?;
    policy.ensure_open(draft.transfer_date)?;

    let mut conn = begin_immediate(pool).await?;
    let result = update_locked(&mut conn, id, draft).await;
    finish(conn, result).await
}

async fn update_locked(conn: &mut SqliteConnection, id: PayinId, draft: &PayinDraft) -> StoreResult<PayinReport> {
    let payin = fetch_payin(conn, id).await?;
    if !payin.status.is_editable() {
        return Err(DomainError::PayinNotEditable(payin.status).into());
    }
    fetch_house(conn, draft.house_id).await?;

    sqlx::query(
        "UPDATE payin_reports SET house_id = ?, amount_cents = ?, transfer_date = ?, transfer_hour = ?, \
         transfer_minute = ?, evidence_ref = ?, source = ? WHERE id = ?",
    )
    .bind(draft.house_id.0)
    .bind(draft.amount.to_cents()?)
    .bind(draft.transfer_date)
    .bind(draft.transfer_hour as i64)
    .bind(draft.transfer_minute as i64)
    .bind(draft.evidence_ref.as_deref())
    .bind(draft.source.as_str())
    .bind(id.0)
    .execute(&mut *conn)
    .await?;

    tracing::info!(payin_id = id.0, amount = %draft.amount, "pay-in updated");
    fetch_payin(conn, id).await
}

/// DRAFT or REJECTED_NEEDS_FIX → SUBMITTED. Clears any earlier rejection reason.
pub async fn submit_payin(pool: &DbPool, id: PayinId) -> StoreResult<PayinReport> {
    let mut conn = begin_immediate(pool).await?;
    let result = submit_locked(&mut conn, id).await;
    finish(conn, result).await
}

async fn submit_locked(conn: &mut SqliteConnection, id: PayinId) -> StoreResult<PayinReport> {
    let payin = fetch_payin(conn, id).await?;
    if !payin.status.is_editable() {
        return Err(DomainError::PayinNotEditable(payin.status).into());
    }
    set_status(conn, id, PayinStatus::Submitted, None).await?;
    tracing::info!(payin_id = id.0, from = %payin.status, "pay-in submitted");
    fetch_payin(conn, id).await
}

/// Sends a queued pay-in back to the resident with a reason.
pub async fn reject_payin(pool: &DbPool, id: PayinId, reason: &str, actor: Option<UserId>) -> StoreResult<PayinReport> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::MissingReason.into());
    }
    let mut conn = begin_immediate(pool).await?;
    let result = reject_locked(&mut conn, id, reason, actor).await;
    finish(conn, result).await
}

async fn reject_locked(
    conn: &mut SqliteConnection,
    id: PayinId,
    reason: &str,
    actor: Option<UserId>,
) -> StoreResult<PayinReport> {
    let payin = fetch_payin(conn, id).await?;
    if !payin.status.is_review_eligible() {
        return Err(DomainError::PayinNotReviewable(payin.status).into());
    }
    if payin.is_matched() {
        return Err(DomainError::PayinAlreadyMatched.into());
    }
    set_status(conn, id, PayinStatus::RejectedNeedsFix, Some(reason)).await?;
    tracing::info!(payin_id = id.0, actor = ?actor.map(|u| u.0), reason, "pay-in rejected");
    fetch_payin(conn, id).await
}

async fn set_status(
    conn: &mut SqliteConnection,
    id: PayinId,
    status: PayinStatus,
    rejection_reason: Option<&str>,
) -> StoreResult<()> {
    sqlx::query("UPDATE payin_reports SET status = ?, rejection_reason = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(rejection_reason)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Removes a pay-in that never reached the ledger.
pub async fn delete_payin(pool: &DbPool, id: PayinId) -> StoreResult<()> {
    let mut conn = begin_immediate(pool).await?;
    let result = delete_locked(&mut conn, id).await;
    finish(conn, result).await
}

async fn delete_locked(conn: &mut SqliteConnection, id: PayinId) -> StoreResult<()> {
    let payin = fetch_payin(conn, id).await?;
    if payin.status.is_terminal() {
        return Err(DomainError::PayinNotEditable(payin.status).into());
    }
    if payin.is_matched() {
        return Err(DomainError::PayinAlreadyMatched.into());
    }
    if fetch_income_for_payin(conn, id).await?.is_some() {
        return Err(DomainError::PayinHasLedger.into());
    }

    sqlx::query("DELETE FROM payin_reports WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    tracing::info!(payin_id = id.0, "pay-in deleted");
    Ok(())
}

pub async fn get_payin(pool: &DbPool, id: PayinId) -> StoreResult<PayinReport> {
    let mut conn = pool.acquire().await?;
    fetch_payin(&mut conn, id).await
}

pub(crate) async fn fetch_payin(conn: &mut SqliteConnection, id: PayinId) -> StoreResult<PayinReport> {
    let row = sqlx::query_as::<_, PayinRow>(&format!("SELECT {PAYIN_COLUMNS} FROM payin_reports WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DomainError::not_found("pay-in", id.0))?;
    row.try_into()
}

/// Pay-ins awaiting operator review, earliest transfer first.
pub async fn list_review_queue(pool: &DbPool) -> StoreResult<Vec<PayinReport>> {
    let rows = sqlx::query_as::<_, PayinRow>(&format!(
        "SELECT {PAYIN_COLUMNS} FROM payin_reports WHERE status IN {REVIEW_STATUSES} \
         ORDER BY transfer_date, transfer_hour, transfer_minute, id"
    ))
    .fetch_all(pool)
    .await?;
    convert_payins(rows)
}

pub async fn list_house_payins(pool: &DbPool, house_id: HouseId) -> StoreResult<Vec<PayinReport>> {
    let rows = sqlx::query_as::<_, PayinRow>(&format!(
        "SELECT {PAYIN_COLUMNS} FROM payin_reports WHERE house_id = ? \
         ORDER BY transfer_date DESC, transfer_hour DESC, transfer_minute DESC, id DESC"
    ))
    .bind(house_id.0)
    .fetch_all(pool)
    .await?;
    convert_payins(rows)
}
