//! Explicit one-to-one pairing of bank credits with pay-ins.

use estate_core::{BankTransaction, BankTransactionId, DomainError, PayinId, PayinReport, PayinStatus, PostingStatus};
use estate_import::{MatchCandidate, MatchableTransaction};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::{begin_immediate, finish, DbPool};
use crate::error::StoreResult;
use crate::invoices::fetch_income_for_payin;
use crate::payins::{convert_payins, fetch_payin, PayinRow, PAYIN_COLUMNS, REVIEW_STATUSES};
use crate::policy::Policy;
use crate::statements::{convert_transactions, fetch_transaction, TransactionRow, TRANSACTION_COLUMNS};

#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub success: bool,
    pub bank_transaction_id: BankTransactionId,
    pub payin_id: PayinId,
    pub seconds_apart: i64,
}

fn bank_side(txn: &BankTransaction) -> Option<MatchableTransaction> {
    txn.credit_amount().map(|amount| MatchableTransaction {
        id: txn.id.0,
        at: txn.effective_at,
        amount,
    })
}

fn payin_side(payin: &PayinReport) -> MatchableTransaction {
    MatchableTransaction {
        id: payin.id.0,
        at: payin.transfer_datetime(),
        amount: payin.amount,
    }
}

/// Links a credit to a pay-in after checking both sides and the tolerances.
///
/// Both foreign keys and the MATCHED flag are written together or not at all.
pub async fn match_transaction(
    pool: &DbPool,
    policy: &Policy,
    bank_transaction_id: BankTransactionId,
    payin_id: PayinId,
) -> StoreResult<MatchOutcome> {
    let mut conn = begin_immediate(pool).await?;
    let result = match_locked(&mut conn, policy, bank_transaction_id, payin_id).await;
    finish(conn, result).await
}

async fn match_locked(
    conn: &mut SqliteConnection,
    policy: &Policy,
    bank_transaction_id: BankTransactionId,
    payin_id: PayinId,
) -> StoreResult<MatchOutcome> {
    let txn = fetch_transaction(conn, bank_transaction_id).await?;
    let bank = bank_side(&txn).ok_or(DomainError::NotCredit)?;
    match txn.posting_status {
        PostingStatus::Unmatched if txn.matched_payin_id.is_none() => {}
        PostingStatus::Unmatched | PostingStatus::Matched => return Err(DomainError::AlreadyMatched.into()),
        other @ (PostingStatus::Posted | PostingStatus::Reversed) => {
            return Err(DomainError::NotMatchable(other).into())
        }
    }

    let payin = fetch_payin(conn, payin_id).await?;
    if payin.is_matched() {
        return Err(DomainError::PayinAlreadyMatched.into());
    }
    if !payin.status.is_review_eligible() {
        return Err(DomainError::PayinNotReviewable(payin.status).into());
    }
    if fetch_income_for_payin(conn, payin_id).await?.is_some() {
        return Err(DomainError::PayinAlreadyPosted.into());
    }

    let seconds_apart = policy.engine().check_pair(&bank, &payin_side(&payin))?;

    sqlx::query("UPDATE bank_transactions SET matched_payin_id = ?, posting_status = ? WHERE id = ?")
        .bind(payin_id.0)
        .bind(PostingStatus::Matched.as_str())
        .bind(bank_transaction_id.0)
        .execute(&mut *conn)
        .await?;
    // Legacy PENDING rows are rewritten with the canonical spelling.
    sqlx::query("UPDATE payin_reports SET matched_bank_transaction_id = ?, status = ? WHERE id = ?")
        .bind(bank_transaction_id.0)
        .bind(PayinStatus::Submitted.as_str())
        .bind(payin_id.0)
        .execute(&mut *conn)
        .await?;

    tracing::info!(
        bank_transaction_id = bank_transaction_id.0,
        payin_id = payin_id.0,
        amount = %bank.amount,
        seconds_apart,
        "matched"
    );
    Ok(MatchOutcome {
        success: true,
        bank_transaction_id,
        payin_id,
        seconds_apart,
    })
}

/// Clears both sides of a match and returns the transaction to UNMATCHED.
pub async fn unmatch(pool: &DbPool, bank_transaction_id: BankTransactionId) -> StoreResult<BankTransaction> {
    let mut conn = begin_immediate(pool).await?;
    let result = unmatch_locked(&mut conn, bank_transaction_id).await;
    finish(conn, result).await
}

async fn unmatch_locked(conn: &mut SqliteConnection, bank_transaction_id: BankTransactionId) -> StoreResult<BankTransaction> {
    let txn = fetch_transaction(conn, bank_transaction_id).await?;
    let payin_id = match (txn.posting_status, txn.matched_payin_id) {
        (PostingStatus::Matched, Some(id)) => id,
        (PostingStatus::Posted, Some(_)) => return Err(DomainError::PayinAccepted.into()),
        (PostingStatus::Reversed, _) => return Err(DomainError::NotMatchable(PostingStatus::Reversed).into()),
        _ => return Err(DomainError::NotMatched.into()),
    };

    let payin = fetch_payin(conn, payin_id).await?;
    if payin.status == PayinStatus::Accepted {
        return Err(DomainError::PayinAccepted.into());
    }

    sqlx::query("UPDATE bank_transactions SET matched_payin_id = NULL, posting_status = ? WHERE id = ?")
        .bind(PostingStatus::Unmatched.as_str())
        .bind(bank_transaction_id.0)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE payin_reports SET matched_bank_transaction_id = NULL WHERE id = ?")
        .bind(payin_id.0)
        .execute(&mut *conn)
        .await?;

    tracing::info!(bank_transaction_id = bank_transaction_id.0, payin_id = payin_id.0, "unmatched");
    fetch_transaction(conn, bank_transaction_id).await
}

/// Unmatched credits that could belong to this pay-in, closest in time first.
pub async fn candidates_for_payin(pool: &DbPool, policy: &Policy, payin_id: PayinId) -> StoreResult<Vec<MatchCandidate>> {
    let mut conn = pool.acquire().await?;
    let payin = fetch_payin(&mut conn, payin_id).await?;
    let engine = policy.engine();
    let tolerance = engine.amount_tolerance.to_cents()?;
    let cents = payin.amount.to_cents()?;

    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions \
         WHERE posting_status = 'UNMATCHED' AND matched_payin_id IS NULL \
           AND credit_cents > 0 AND credit_cents BETWEEN ? AND ?"
    ))
    .bind(cents - tolerance)
    .bind(cents + tolerance)
    .fetch_all(&mut *conn)
    .await?;

    let pool_side: Vec<MatchableTransaction> = convert_transactions(rows)?.iter().filter_map(bank_side).collect();
    Ok(engine.candidates(&payin_side(&payin), &pool_side))
}

/// Review-eligible, unmatched pay-ins that could explain this credit.
pub async fn candidates_for_bank_transaction(
    pool: &DbPool,
    policy: &Policy,
    bank_transaction_id: BankTransactionId,
) -> StoreResult<Vec<MatchCandidate>> {
    let mut conn = pool.acquire().await?;
    let txn = fetch_transaction(&mut conn, bank_transaction_id).await?;
    let bank = bank_side(&txn).ok_or(DomainError::NotCredit)?;
    let engine = policy.engine();
    let tolerance = engine.amount_tolerance.to_cents()?;
    let cents = bank.amount.to_cents()?;

    let rows = sqlx::query_as::<_, PayinRow>(&format!(
        "SELECT {PAYIN_COLUMNS} FROM payin_reports \
         WHERE status IN {REVIEW_STATUSES} AND matched_bank_transaction_id IS NULL \
           AND amount_cents BETWEEN ? AND ? \
           AND NOT EXISTS (SELECT 1 FROM income_transactions i WHERE i.payin_id = payin_reports.id)"
    ))
    .bind(cents - tolerance)
    .bind(cents + tolerance)
    .fetch_all(&mut *conn)
    .await?;

    let pool_side: Vec<MatchableTransaction> = convert_payins(rows)?.iter().map(payin_side).collect();
    Ok(engine.candidates(&bank, &pool_side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payins::{create_payin, get_payin, reject_payin};
    use crate::statements::get_bank_transaction;
    use crate::testing::{baht, draft, fixture, import_credit};

    #[tokio::test]
    async fn match_links_both_sides() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();

        let out = match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap();
        assert!(out.success);
        assert_eq!(out.seconds_apart, 0);

        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Matched);
        assert_eq!(t.matched_payin_id, Some(payin.id));
        let p = get_payin(&fx.pool, payin.id).await.unwrap();
        assert_eq!(p.matched_bank_transaction_id, Some(txn));
    }

    #[tokio::test]
    async fn amount_mismatch_changes_nothing() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(500), 14, 30), None, true)
            .await
            .unwrap();

        let err = match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap_err();
        assert_eq!(err.as_domain().map(|e| e.code()), Some("AMOUNT_MISMATCH"));
        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Unmatched);
        assert!(!get_payin(&fx.pool, payin.id).await.unwrap().is_matched());
    }

    #[tokio::test]
    async fn time_mismatch_reports_gap() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:32").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();

        let err = match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::TimeMismatch { seconds: 120 }));
    }

    #[tokio::test]
    async fn one_to_one_on_both_sides() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let first = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        let second = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        match_transaction(&fx.pool, &fx.policy, txn, first.id).await.unwrap();

        let err = match_transaction(&fx.pool, &fx.policy, txn, second.id).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::AlreadyMatched));
        assert!(!get_payin(&fx.pool, second.id).await.unwrap().is_matched());
    }

    #[tokio::test]
    async fn rejected_payin_cannot_be_matched() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        reject_payin(&fx.pool, payin.id, "blurry slip", None).await.unwrap();

        let err = match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap_err();
        assert_eq!(err.as_domain().map(|e| e.code()), Some("WRONG_PAYIN_STATUS"));
    }

    #[tokio::test]
    async fn unmatch_restores_both_sides() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap();

        let t = unmatch(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Unmatched);
        assert_eq!(t.matched_payin_id, None);
        assert!(!get_payin(&fx.pool, payin.id).await.unwrap().is_matched());

        let err = unmatch(&fx.pool, txn).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::NotMatched));
    }

    #[tokio::test]
    async fn candidates_are_symmetric_and_ordered() {
        let fx = fixture().await;
        let txn = import_credit(&fx, "600.00", "14:30").await;
        let near = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        let off = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 31), None, true)
            .await
            .unwrap();
        create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(601), 14, 30), None, true)
            .await
            .unwrap();

        let found = candidates_for_bank_transaction(&fx.pool, &fx.policy, txn).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![near.id.0, off.id.0]);

        let found = candidates_for_payin(&fx.pool, &fx.policy, near.id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, txn.0);
    }
}
