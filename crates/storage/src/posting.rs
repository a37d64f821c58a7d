//! Confirm-and-post and its compensating reversal.
//!
//! Every operation here runs as one `BEGIN IMMEDIATE` unit keyed on the bank
//! transaction: read its current state, decide, write, commit. A concurrent
//! caller on the same transaction waits for the write lock and then sees the
//! committed POSTED or REVERSED state, taking the idempotent or rejecting
//! branch.

use std::collections::BTreeSet;

use estate_core::allocation::{plan_auto, plan_explicit};
use estate_core::{
    Allocation, AllocationPlan, AllocationStrategy, BankTransaction, BankTransactionId, DomainError, HouseId,
    IncomeTransactionId, InvoiceId, LedgerStatus, Money, OpenInvoice, PayinId, PayinReport,
    PayinStatus, PaymentStatus, PostingStatus, UserId,
};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::{begin_immediate, finish, now, DbPool};
use crate::error::StoreResult;
use crate::invoices::{
    as_open, fetch_allocations, fetch_income_for_bank_transaction, fetch_income_for_payin, fetch_invoice,
    fetch_outstanding, refresh_invoice_status,
};
use crate::payins::fetch_payin;
use crate::policy::Policy;
use crate::statements::fetch_transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingResult {
    Posted,
    AlreadyPosted,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostingOutcome {
    pub status: PostingResult,
    pub income_transaction_id: IncomeTransactionId,
    pub bank_transaction_id: BankTransactionId,
    pub house_id: HouseId,
    pub payin_id: Option<PayinId>,
    pub amount: Money,
    /// Absent on `already_posted`; the original choice is not stored.
    pub strategy: Option<AllocationStrategy>,
    pub allocations: Vec<Allocation>,
    pub unallocated: Money,
    pub payin_accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalResult {
    Reversed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReversalOutcome {
    pub status: ReversalResult,
    pub bank_transaction_id: BankTransactionId,
    pub income_transaction_id: Option<IncomeTransactionId>,
    pub reversed_invoices: Vec<InvoiceId>,
    pub payin_id: Option<PayinId>,
    pub payin_reverted: bool,
}

/// Turns a credit into a ledger entry and allocates it.
///
/// Retrying on an already POSTED transaction returns the stored result.
pub async fn confirm_and_post(
    pool: &DbPool,
    policy: &Policy,
    bank_transaction_id: BankTransactionId,
    invoice_id: Option<InvoiceId>,
    actor: Option<UserId>,
) -> StoreResult<PostingOutcome> {
    let mut conn = begin_immediate(pool).await?;
    let result = post_locked(&mut conn, policy, bank_transaction_id, invoice_id, actor).await;
    finish(conn, result).await
}

async fn post_locked(
    conn: &mut SqliteConnection,
    policy: &Policy,
    bank_transaction_id: BankTransactionId,
    invoice_id: Option<InvoiceId>,
    actor: Option<UserId>,
) -> StoreResult<PostingOutcome> {
    let txn = fetch_transaction(conn, bank_transaction_id).await?;
    match txn.posting_status {
        PostingStatus::Posted => return already_posted(conn, &txn).await,
        PostingStatus::Reversed => return Err(DomainError::TransactionReversed.into()),
        PostingStatus::Unmatched | PostingStatus::Matched => {}
    }
    let amount = txn.credit_amount().ok_or(DomainError::NotCredit)?;
    policy.ensure_open(txn.effective_date())?;

    let payin = match txn.matched_payin_id {
        Some(id) => Some(fetch_payin(conn, id).await?),
        None => None,
    };
    if let Some(p) = &payin {
        if fetch_income_for_payin(conn, p.id).await?.is_some() {
            return Err(DomainError::PayinAlreadyPosted.into());
        }
    }
    let explicit = match invoice_id {
        Some(id) => Some(fetch_invoice(conn, id).await?),
        None => None,
    };

    let house_id = match (&payin, &explicit) {
        (Some(p), Some(inv)) if p.house_id != inv.house_id => return Err(DomainError::InvoiceHouseMismatch.into()),
        (Some(p), _) => p.house_id,
        (None, Some(inv)) => inv.house_id,
        (None, None) => return Err(DomainError::Ambiguous.into()),
    };

    let plan = match &explicit {
        Some(inv) => {
            if inv.is_cancelled() {
                return Err(DomainError::InvoiceClosed(inv.status).into());
            }
            if !inv.outstanding().is_positive() {
                return Err(DomainError::InvoiceNotOutstanding.into());
            }
            plan_explicit(amount, as_open(inv))
        }
        None => {
            let open: Vec<OpenInvoice> = fetch_outstanding(conn, house_id).await?.iter().map(as_open).collect();
            plan_auto(amount, &open, policy.matching.amount_tolerance())
        }
    };

    let income_id = write_ledger(conn, &txn, house_id, payin.as_ref(), amount, &plan, actor).await?;

    sqlx::query("UPDATE bank_transactions SET posting_status = ? WHERE id = ?")
        .bind(PostingStatus::Posted.as_str())
        .bind(bank_transaction_id.0)
        .execute(&mut *conn)
        .await?;

    let payin_accepted = match &payin {
        Some(p) => {
            sqlx::query(
                "UPDATE payin_reports SET status = ?, accepted_by = ?, accepted_at = ?, rejection_reason = NULL \
                 WHERE id = ?",
            )
            .bind(PayinStatus::Accepted.as_str())
            .bind(actor.map(|u| u.0))
            .bind(now())
            .bind(p.id.0)
            .execute(&mut *conn)
            .await?;
            true
        }
        None => false,
    };

    tracing::info!(
        bank_transaction_id = bank_transaction_id.0,
        income_transaction_id = income_id.0,
        house_id = house_id.0,
        payin_id = ?payin.as_ref().map(|p| p.id.0),
        amount = %amount,
        strategy = ?plan.strategy,
        allocations = plan.allocations.len(),
        unallocated = %plan.unallocated,
        "posted"
    );

    Ok(PostingOutcome {
        status: PostingResult::Posted,
        income_transaction_id: income_id,
        bank_transaction_id,
        house_id,
        payin_id: payin.map(|p| p.id),
        amount,
        strategy: Some(plan.strategy),
        allocations: plan.allocations,
        unallocated: plan.unallocated,
        payin_accepted,
    })
}

/// Ledger row first, then one allocation per planned slice; each touched
/// invoice's status is recomputed right after its slice lands.
async fn write_ledger(
    conn: &mut SqliteConnection,
    txn: &BankTransaction,
    house_id: HouseId,
    payin: Option<&PayinReport>,
    amount: Money,
    plan: &AllocationPlan,
    actor: Option<UserId>,
) -> StoreResult<IncomeTransactionId> {
    let income_id = sqlx::query(
        "INSERT INTO income_transactions (house_id, payin_id, bank_transaction_id, amount_cents, received_at, \
         status, created_by) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(house_id.0)
    .bind(payin.map(|p| p.id.0))
    .bind(txn.id.0)
    .bind(amount.to_cents()?)
    .bind(txn.effective_at)
    .bind(LedgerStatus::Posted.as_str())
    .bind(actor.map(|u| u.0))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for alloc in &plan.allocations {
        sqlx::query(
            "INSERT INTO invoice_payments (invoice_id, income_transaction_id, amount_cents, settles, status) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(alloc.invoice_id.0)
        .bind(income_id)
        .bind(alloc.amount.to_cents()?)
        .bind(alloc.settles)
        .bind(PaymentStatus::Active.as_str())
        .execute(&mut *conn)
        .await?;
        refresh_invoice_status(conn, alloc.invoice_id).await?;
    }

    Ok(IncomeTransactionId(income_id))
}

/// Rebuilds the result of an earlier posting from the ledger and its
/// ACTIVE allocations.
async fn already_posted(conn: &mut SqliteConnection, txn: &BankTransaction) -> StoreResult<PostingOutcome> {
    let income = fetch_income_for_bank_transaction(conn, txn.id)
        .await?
        .ok_or(DomainError::not_found("income transaction for bank transaction", txn.id.0))?;

    let allocations: Vec<Allocation> = fetch_allocations(conn, income.id, true)
        .await?
        .into_iter()
        .map(|payment| Allocation {
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            settles: payment.settles,
        })
        .collect();
    let allocated: Money = allocations.iter().map(|a| a.amount).sum();

    let payin_accepted = match income.payin_id {
        Some(id) => fetch_payin(conn, id).await?.status == PayinStatus::Accepted,
        None => false,
    };

    tracing::debug!(
        bank_transaction_id = txn.id.0,
        income_transaction_id = income.id.0,
        "already posted"
    );
    Ok(PostingOutcome {
        status: PostingResult::AlreadyPosted,
        income_transaction_id: income.id,
        bank_transaction_id: txn.id,
        house_id: income.house_id,
        payin_id: income.payin_id,
        amount: income.amount,
        strategy: None,
        allocations,
        unallocated: income.amount.saturating_sub(allocated),
        payin_accepted,
    })
}

/// Accepts a matched pay-in by posting its bank transaction.
pub async fn accept_payin(
    pool: &DbPool,
    policy: &Policy,
    payin_id: PayinId,
    actor: Option<UserId>,
) -> StoreResult<PostingOutcome> {
    let mut conn = begin_immediate(pool).await?;
    let result = accept_locked(&mut conn, policy, payin_id, actor).await;
    finish(conn, result).await
}

async fn accept_locked(
    conn: &mut SqliteConnection,
    policy: &Policy,
    payin_id: PayinId,
    actor: Option<UserId>,
) -> StoreResult<PostingOutcome> {
    let payin = fetch_payin(conn, payin_id).await?;
    let txn_id = payin.matched_bank_transaction_id.ok_or(DomainError::PayinNotMatched)?;
    match payin.status {
        PayinStatus::Accepted => {
            let txn = fetch_transaction(conn, txn_id).await?;
            already_posted(conn, &txn).await
        }
        PayinStatus::Submitted => post_locked(conn, policy, txn_id, None, actor).await,
        other @ (PayinStatus::Draft | PayinStatus::RejectedNeedsFix) => {
            Err(DomainError::PayinNotReviewable(other).into())
        }
    }
}

/// Cancels the financial effect of a posting. Ledger and allocation rows
/// stay, flagged REVERSED.
pub async fn reverse(
    pool: &DbPool,
    bank_transaction_id: BankTransactionId,
    reason: &str,
    actor: Option<UserId>,
) -> StoreResult<ReversalOutcome> {
    let mut conn = begin_immediate(pool).await?;
    let result = reverse_locked(&mut conn, bank_transaction_id, reason.trim(), actor).await;
    finish(conn, result).await
}

async fn reverse_locked(
    conn: &mut SqliteConnection,
    bank_transaction_id: BankTransactionId,
    reason: &str,
    actor: Option<UserId>,
) -> StoreResult<ReversalOutcome> {
    let txn = fetch_transaction(conn, bank_transaction_id).await?;
    if txn.posting_status != PostingStatus::Posted {
        return Err(DomainError::NotPosted(txn.posting_status).into());
    }
    if reason.is_empty() {
        return Err(DomainError::MissingReason.into());
    }
    let stamp = now();

    let income = fetch_income_for_bank_transaction(conn, bank_transaction_id).await?;
    let mut reversed_invoices = Vec::new();
    if let Some(income) = &income {
        let active = fetch_allocations(conn, income.id, true).await?;
        sqlx::query(
            "UPDATE invoice_payments SET status = ?, reversed_at = ? WHERE income_transaction_id = ? AND status = ?",
        )
        .bind(PaymentStatus::Reversed.as_str())
        .bind(stamp)
        .bind(income.id.0)
        .bind(PaymentStatus::Active.as_str())
        .execute(&mut *conn)
        .await?;

        let touched: BTreeSet<InvoiceId> = active.iter().map(|p| p.invoice_id).collect();
        for invoice_id in touched {
            refresh_invoice_status(conn, invoice_id).await?;
            reversed_invoices.push(invoice_id);
        }

        sqlx::query(
            "UPDATE income_transactions SET status = ?, reversed_by = ?, reversed_at = ?, reversal_reason = ? \
             WHERE id = ?",
        )
        .bind(LedgerStatus::Reversed.as_str())
        .bind(actor.map(|u| u.0))
        .bind(stamp)
        .bind(reason)
        .bind(income.id.0)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("UPDATE bank_transactions SET posting_status = ?, matched_payin_id = NULL WHERE id = ?")
        .bind(PostingStatus::Reversed.as_str())
        .bind(bank_transaction_id.0)
        .execute(&mut *conn)
        .await?;

    let mut payin_reverted = false;
    if let Some(payin_id) = txn.matched_payin_id {
        let payin = fetch_payin(conn, payin_id).await?;
        payin_reverted = payin.status == PayinStatus::Accepted;
        let status = if payin_reverted { PayinStatus::Submitted } else { payin.status };
        sqlx::query(
            "UPDATE payin_reports SET status = ?, accepted_by = NULL, accepted_at = NULL, \
             matched_bank_transaction_id = NULL WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(payin_id.0)
        .execute(&mut *conn)
        .await?;
    }

    tracing::info!(
        bank_transaction_id = bank_transaction_id.0,
        income_transaction_id = ?income.as_ref().map(|i| i.id.0),
        payin_id = ?txn.matched_payin_id.map(|p| p.0),
        invoices = reversed_invoices.len(),
        reason,
        "reversed"
    );

    Ok(ReversalOutcome {
        status: ReversalResult::Reversed,
        bank_transaction_id,
        income_transaction_id: income.map(|i| i.id),
        reversed_invoices,
        payin_id: txn.matched_payin_id,
        payin_reverted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_core::InvoiceStatus;
    use crate::invoices::{create_invoice, get_income_transaction, get_invoice, list_allocations};
    use crate::matching::{match_transaction, unmatch};
    use crate::payins::{create_payin, get_payin};
    use crate::statements::get_bank_transaction;
    use crate::testing::{
        baht, day, draft, file_fixture, fixture, import_credit, import_credits, import_debit, locked_policy, Fixture,
    };

    async fn matched_credit(fx: &Fixture, amount: &str, payin_amount: Money) -> (BankTransactionId, PayinId) {
        let txn = import_credit(fx, amount, "14:30").await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, payin_amount, 14, 30), None, true)
            .await
            .unwrap();
        match_transaction(&fx.pool, &fx.policy, txn, payin.id).await.unwrap();
        (txn, payin.id)
    }

    async fn ledger_count(fx: &Fixture) -> i64 {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM income_transactions")
            .fetch_one(&fx.pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn matched_credit_settles_single_invoice() {
        let fx = fixture().await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, payin) = matched_credit(&fx, "600.00", baht(600)).await;

        let out = confirm_and_post(&fx.pool, &fx.policy, txn, None, Some(fx.operator)).await.unwrap();
        assert_eq!(out.status, PostingResult::Posted);
        assert_eq!(out.strategy, Some(AllocationStrategy::ExactMatch));
        assert_eq!(out.allocations.len(), 1);
        assert_eq!(out.allocations[0].amount, baht(600));
        assert!(out.payin_accepted);

        assert_eq!(get_invoice(&fx.pool, inv.id).await.unwrap().status, InvoiceStatus::Paid);
        let p = get_payin(&fx.pool, payin).await.unwrap();
        assert_eq!(p.status, PayinStatus::Accepted);
        assert_eq!(p.accepted_by, Some(fx.operator));
        assert!(p.accepted_at.is_some());
        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Posted);
    }

    #[tokio::test]
    async fn fifo_spreads_over_three_invoices() {
        let fx = fixture().await;
        let jan = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let feb = create_invoice(&fx.pool, fx.house, "2026-02", baht(600), day(2026, 2, 5)).await.unwrap();
        let mar = create_invoice(&fx.pool, fx.house, "2026-03", baht(600), day(2026, 3, 5)).await.unwrap();
        let (txn, _) = matched_credit(&fx, "1400.00", baht(1_400)).await;

        let out = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        assert_eq!(out.strategy, Some(AllocationStrategy::Fifo));
        let slices: Vec<(InvoiceId, Money)> = out.allocations.iter().map(|a| (a.invoice_id, a.amount)).collect();
        assert_eq!(slices, vec![(jan.id, baht(600)), (feb.id, baht(600)), (mar.id, baht(200))]);
        assert_eq!(out.unallocated, Money::zero());

        assert_eq!(get_invoice(&fx.pool, jan.id).await.unwrap().status, InvoiceStatus::Paid);
        assert_eq!(get_invoice(&fx.pool, feb.id).await.unwrap().status, InvoiceStatus::Paid);
        let mar = get_invoice(&fx.pool, mar.id).await.unwrap();
        assert_eq!(mar.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(mar.outstanding(), baht(400));
    }

    #[tokio::test]
    async fn unmatched_without_invoice_is_ambiguous() {
        let fx = fixture().await;
        create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let txn = import_credit(&fx, "600.00", "14:30").await;

        let err = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::Ambiguous));
        assert_eq!(ledger_count(&fx).await, 0);
        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Unmatched);
    }

    #[tokio::test]
    async fn reversal_restores_invoice_and_payin() {
        let fx = fixture().await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, payin) = matched_credit(&fx, "600.00", baht(600)).await;
        let posted = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();

        let out = reverse(&fx.pool, txn, "posted to wrong house", Some(fx.operator)).await.unwrap();
        assert_eq!(out.status, ReversalResult::Reversed);
        assert_eq!(out.income_transaction_id, Some(posted.income_transaction_id));
        assert_eq!(out.reversed_invoices, vec![inv.id]);
        assert!(out.payin_reverted);

        assert_eq!(get_invoice(&fx.pool, inv.id).await.unwrap().status, InvoiceStatus::Issued);
        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Reversed);

        let ledger = get_income_transaction(&fx.pool, posted.income_transaction_id).await.unwrap();
        assert_eq!(ledger.status, LedgerStatus::Reversed);
        assert_eq!(ledger.reversed_by, Some(fx.operator));
        assert_eq!(ledger.reversal_reason.as_deref(), Some("posted to wrong house"));
        let allocs = list_allocations(&fx.pool, ledger.id).await.unwrap();
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].status, PaymentStatus::Reversed);

        let p = get_payin(&fx.pool, payin).await.unwrap();
        assert_eq!(p.status, PayinStatus::Submitted);
        assert_eq!(p.accepted_by, None);
        assert!(!p.is_matched());
    }

    #[tokio::test]
    async fn posting_twice_returns_the_first_result() {
        let fx = fixture().await;
        create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;

        let first = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        let again = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        assert_eq!(again.status, PostingResult::AlreadyPosted);
        assert_eq!(again.income_transaction_id, first.income_transaction_id);
        assert_eq!(again.allocations, first.allocations);
        assert!(again.payin_accepted);
        assert_eq!(ledger_count(&fx).await, 1);
    }

    #[tokio::test]
    async fn retried_post_keeps_its_allocations_after_later_payments() {
        let fx = fixture().await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let txns = import_credits(&fx, &[("200.00", "09:00"), ("400.00", "10:00")]).await;

        let first = confirm_and_post(&fx.pool, &fx.policy, txns[0], Some(inv.id), None).await.unwrap();
        assert!(!first.allocations[0].settles);
        let second = confirm_and_post(&fx.pool, &fx.policy, txns[1], Some(inv.id), None).await.unwrap();
        assert!(second.allocations[0].settles);
        assert_eq!(get_invoice(&fx.pool, inv.id).await.unwrap().status, InvoiceStatus::Paid);

        let again = confirm_and_post(&fx.pool, &fx.policy, txns[0], Some(inv.id), None).await.unwrap();
        assert_eq!(again.status, PostingResult::AlreadyPosted);
        assert_eq!(again.allocations, first.allocations);
        assert_eq!(again.unallocated, first.unallocated);
    }

    #[tokio::test]
    async fn reversed_transaction_cannot_be_posted_or_reversed_again() {
        let fx = fixture().await;
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;
        confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        reverse(&fx.pool, txn, "duplicate slip", None).await.unwrap();

        let err = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::TransactionReversed));
        let err = reverse(&fx.pool, txn, "again", None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::NotPosted(PostingStatus::Reversed)));
    }

    #[tokio::test]
    async fn reverse_requires_posted_and_reason() {
        let fx = fixture().await;
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;
        let err = reverse(&fx.pool, txn, "oops", None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::NotPosted(PostingStatus::Matched)));

        confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        let err = reverse(&fx.pool, txn, "  ", None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::MissingReason));
        let t = get_bank_transaction(&fx.pool, txn).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Posted);
    }

    #[tokio::test]
    async fn unmatch_blocked_once_accepted() {
        let fx = fixture().await;
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;
        confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();

        let err = unmatch(&fx.pool, txn).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::PayinAccepted));
    }

    #[tokio::test]
    async fn reverted_payin_cannot_reach_the_ledger_again() {
        let fx = fixture().await;
        let txns = import_credits(&fx, &[("600.00", "14:30"), ("600.00", "14:30:30")]).await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        match_transaction(&fx.pool, &fx.policy, txns[0], payin.id).await.unwrap();
        confirm_and_post(&fx.pool, &fx.policy, txns[0], None, None).await.unwrap();
        reverse(&fx.pool, txns[0], "wrong statement row", None).await.unwrap();
        assert_eq!(get_payin(&fx.pool, payin.id).await.unwrap().status, PayinStatus::Submitted);

        let err = match_transaction(&fx.pool, &fx.policy, txns[1], payin.id).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::PayinAlreadyPosted));
        let found = crate::matching::candidates_for_bank_transaction(&fx.pool, &fx.policy, txns[1]).await.unwrap();
        assert!(found.is_empty());

        // A link written behind the engine's back is still refused at posting time.
        sqlx::query("UPDATE bank_transactions SET matched_payin_id = ?, posting_status = 'MATCHED' WHERE id = ?")
            .bind(payin.id.0)
            .bind(txns[1].0)
            .execute(&fx.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE payin_reports SET matched_bank_transaction_id = ? WHERE id = ?")
            .bind(txns[1].0)
            .bind(payin.id.0)
            .execute(&fx.pool)
            .await
            .unwrap();
        let err = accept_payin(&fx.pool, &fx.policy, payin.id, Some(fx.operator)).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::PayinAlreadyPosted));
        let err = confirm_and_post(&fx.pool, &fx.policy, txns[1], None, None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::PayinAlreadyPosted));
        assert_eq!(ledger_count(&fx).await, 1);
        let t = get_bank_transaction(&fx.pool, txns[1]).await.unwrap();
        assert_eq!(t.posting_status, PostingStatus::Matched);
    }

    #[tokio::test]
    async fn accept_requires_a_match() {
        let fx = fixture().await;
        let payin = create_payin(&fx.pool, &fx.policy, &draft(fx.house, baht(600), 14, 30), None, true)
            .await
            .unwrap();
        let err = accept_payin(&fx.pool, &fx.policy, payin.id, None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::PayinNotMatched));
    }

    #[tokio::test]
    async fn explicit_invoice_takes_at_most_its_outstanding() {
        let fx = fixture().await;
        let jan = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let feb = create_invoice(&fx.pool, fx.house, "2026-02", baht(600), day(2026, 2, 5)).await.unwrap();
        let txn = import_credit(&fx, "1000.00", "14:30").await;

        let out = confirm_and_post(&fx.pool, &fx.policy, txn, Some(feb.id), None).await.unwrap();
        assert_eq!(out.strategy, Some(AllocationStrategy::Explicit));
        assert_eq!(out.house_id, fx.house);
        assert_eq!(out.allocations.len(), 1);
        assert_eq!(out.allocations[0].invoice_id, feb.id);
        assert_eq!(out.allocations[0].amount, baht(600));
        assert_eq!(out.unallocated, baht(400));
        assert!(!out.payin_accepted);
        assert_eq!(get_invoice(&fx.pool, jan.id).await.unwrap().status, InvoiceStatus::Issued);
    }

    #[tokio::test]
    async fn explicit_invoice_must_be_open_and_in_house() {
        let fx = fixture().await;
        let other = crate::accounts::create_house(&fx.pool, "99/9").await.unwrap();
        let foreign = create_invoice(&fx.pool, other.id, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;

        let err = confirm_and_post(&fx.pool, &fx.policy, txn, Some(foreign.id), None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::InvoiceHouseMismatch));

        let own = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        crate::invoices::apply_credit(&fx.pool, own.id, baht(600), None, None).await.unwrap();
        let err = confirm_and_post(&fx.pool, &fx.policy, txn, Some(own.id), None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::InvoiceNotOutstanding));
        assert_eq!(ledger_count(&fx).await, 0);
    }

    #[tokio::test]
    async fn overpayment_stays_unallocated() {
        let fx = fixture().await;
        let jan = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, _) = matched_credit(&fx, "1000.00", baht(1_000)).await;

        let out = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();
        assert_eq!(out.strategy, Some(AllocationStrategy::Fifo));
        assert_eq!(out.allocations.len(), 1);
        assert_eq!(out.unallocated, baht(400));
        let jan = get_invoice(&fx.pool, jan.id).await.unwrap();
        assert_eq!(jan.paid, baht(600));
        assert_eq!(jan.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn locked_period_refuses_posting() {
        let fx = fixture().await;
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;

        let err = confirm_and_post(&fx.pool, &locked_policy(), txn, None, None).await.unwrap_err();
        assert_eq!(err.as_domain().map(|e| e.code()), Some("PERIOD_LOCKED"));
        assert_eq!(ledger_count(&fx).await, 0);
    }

    #[tokio::test]
    async fn debit_rows_are_not_postable() {
        let fx = fixture().await;
        let txn = import_debit(&fx, "250.00", "08:00").await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();

        let err = confirm_and_post(&fx.pool, &fx.policy, txn, Some(inv.id), None).await.unwrap_err();
        assert_eq!(err.as_domain(), Some(&DomainError::NotCredit));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_posts_settle_on_one_ledger_entry() {
        let (_dir, fx) = file_fixture().await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, _) = matched_credit(&fx, "600.00", baht(600)).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (pool, policy) = (fx.pool.clone(), fx.policy.clone());
                tokio::spawn(async move { confirm_and_post(&pool, &policy, txn, None, None).await })
            })
            .collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let posted = outcomes.iter().filter(|o| o.status == PostingResult::Posted).count();
        let replayed = outcomes.iter().filter(|o| o.status == PostingResult::AlreadyPosted).count();
        assert_eq!((posted, replayed), (1, 5));
        let ledger_id = outcomes[0].income_transaction_id;
        assert!(outcomes.iter().all(|o| o.income_transaction_id == ledger_id));
        assert!(outcomes.iter().all(|o| o.allocations == outcomes[0].allocations));
        assert_eq!(ledger_count(&fx).await, 1);
        let inv = get_invoice(&fx.pool, inv.id).await.unwrap();
        assert_eq!(inv.paid, baht(600));
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reversals_apply_once() {
        let (_dir, fx) = file_fixture().await;
        let inv = create_invoice(&fx.pool, fx.house, "2026-01", baht(600), day(2026, 1, 5)).await.unwrap();
        let (txn, payin) = matched_credit(&fx, "600.00", baht(600)).await;
        let posted = confirm_and_post(&fx.pool, &fx.policy, txn, None, None).await.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = fx.pool.clone();
                tokio::spawn(async move { reverse(&pool, txn, "duplicate slip", None).await })
            })
            .collect();
        let mut reversed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(out) => {
                    reversed += 1;
                    assert_eq!(out.income_transaction_id, Some(posted.income_transaction_id));
                    assert!(out.payin_reverted);
                }
                Err(err) => {
                    assert_eq!(err.as_domain(), Some(&DomainError::NotPosted(PostingStatus::Reversed)));
                }
            }
        }
        assert_eq!(reversed, 1);

        assert_eq!(get_invoice(&fx.pool, inv.id).await.unwrap().status, InvoiceStatus::Issued);
        let ledger = get_income_transaction(&fx.pool, posted.income_transaction_id).await.unwrap();
        assert_eq!(ledger.status, LedgerStatus::Reversed);
        assert_eq!(get_payin(&fx.pool, payin).await.unwrap().status, PayinStatus::Submitted);
    }
}
