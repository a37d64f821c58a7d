//! Invoices, credits and the audit views over ledger allocations.

use chrono::{NaiveDate, NaiveDateTime};
use estate_core::invoice::derive_status;
use estate_core::{
    BankTransactionId, DomainError, HouseId, IncomeTransaction, IncomeTransactionId, Invoice, InvoiceId,
    InvoicePayment, InvoicePaymentId, InvoiceStatus, Money, OpenInvoice, PayinId, UserId,
};
use sqlx::SqliteConnection;

use crate::accounts::fetch_house;
use crate::db::{begin_immediate, finish, money, DbPool};
use crate::error::{StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: i64,
    house_id: i64,
    cycle: String,
    total_cents: i64,
    due_date: NaiveDate,
    status: String,
    paid_cents: i64,
    credited_cents: i64,
    created_at: NaiveDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(r: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: InvoiceId(r.id),
            house_id: HouseId(r.house_id),
            cycle: r.cycle,
            total: money(r.total_cents),
            due_date: r.due_date,
            status: r.status.parse()?,
            paid: money(r.paid_cents),
            credited: money(r.credited_cents),
            created_at: r.created_at,
        })
    }
}

/// Paid and credited totals come from ACTIVE allocations and all credits.
const INVOICE_SELECT: &str = "SELECT i.id, i.house_id, i.cycle, i.total_cents, i.due_date, i.status, \
     COALESCE((SELECT SUM(p.amount_cents) FROM invoice_payments p \
               WHERE p.invoice_id = i.id AND p.status = 'ACTIVE'), 0) AS paid_cents, \
     COALESCE((SELECT SUM(c.amount_cents) FROM invoice_credits c WHERE c.invoice_id = i.id), 0) AS credited_cents, \
     i.created_at \
     FROM invoices i";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    invoice_id: i64,
    income_transaction_id: i64,
    amount_cents: i64,
    settles: bool,
    status: String,
    created_at: NaiveDateTime,
    reversed_at: Option<NaiveDateTime>,
}

impl TryFrom<PaymentRow> for InvoicePayment {
    type Error = StoreError;

    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(InvoicePayment {
            id: InvoicePaymentId(r.id),
            invoice_id: InvoiceId(r.invoice_id),
            income_transaction_id: IncomeTransactionId(r.income_transaction_id),
            amount: money(r.amount_cents),
            settles: r.settles,
            status: r.status.parse()?,
            created_at: r.created_at,
            reversed_at: r.reversed_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, invoice_id, income_transaction_id, amount_cents, settles, status, created_at, reversed_at";

#[derive(sqlx::FromRow)]
struct IncomeRow {
    id: i64,
    house_id: i64,
    payin_id: Option<i64>,
    bank_transaction_id: Option<i64>,
    amount_cents: i64,
    received_at: NaiveDateTime,
    status: String,
    created_by: Option<i64>,
    created_at: NaiveDateTime,
    reversed_by: Option<i64>,
    reversed_at: Option<NaiveDateTime>,
    reversal_reason: Option<String>,
}

impl TryFrom<IncomeRow> for IncomeTransaction {
    type Error = StoreError;

    fn try_from(r: IncomeRow) -> Result<Self, Self::Error> {
        Ok(IncomeTransaction {
            id: IncomeTransactionId(r.id),
            house_id: HouseId(r.house_id),
            payin_id: r.payin_id.map(PayinId),
            bank_transaction_id: r.bank_transaction_id.map(BankTransactionId),
            amount: money(r.amount_cents),
            received_at: r.received_at,
            status: r.status.parse()?,
            created_by: r.created_by.map(UserId),
            created_at: r.created_at,
            reversed_by: r.reversed_by.map(UserId),
            reversed_at: r.reversed_at,
            reversal_reason: r.reversal_reason,
        })
    }
}

pub(crate) const INCOME_COLUMNS: &str = "id, house_id, payin_id, bank_transaction_id, amount_cents, received_at, \
     status, created_by, created_at, reversed_by, reversed_at, reversal_reason";

pub async fn create_invoice(
    pool: &DbPool,
    house_id: HouseId,
    cycle: &str,
    total: Money,
    due_date: NaiveDate,
) -> StoreResult<Invoice> {
    if !total.is_positive() {
        return Err(DomainError::InvalidAmount.into());
    }
    let mut conn = pool.acquire().await?;
    fetch_house(&mut conn, house_id).await?;

    let id = sqlx::query("INSERT INTO invoices (house_id, cycle, total_cents, due_date, status) VALUES (?, ?, ?, ?, ?)")
        .bind(house_id.0)
        .bind(cycle)
        .bind(total.to_cents()?)
        .bind(due_date)
        .bind(InvoiceStatus::Issued.as_str())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    tracing::info!(invoice_id = id, house_id = house_id.0, total = %total, "invoice issued");
    fetch_invoice(&mut conn, InvoiceId(id)).await
}

pub async fn get_invoice(pool: &DbPool, id: InvoiceId) -> StoreResult<Invoice> {
    let mut conn = pool.acquire().await?;
    fetch_invoice(&mut conn, id).await
}

pub(crate) async fn fetch_invoice(conn: &mut SqliteConnection, id: InvoiceId) -> StoreResult<Invoice> {
    let row = sqlx::query_as::<_, InvoiceRow>(&format!("{INVOICE_SELECT} WHERE i.id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DomainError::not_found("invoice", id.0))?;
    row.try_into()
}

pub async fn list_house_invoices(pool: &DbPool, house_id: HouseId) -> StoreResult<Vec<Invoice>> {
    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "{INVOICE_SELECT} WHERE i.house_id = ? ORDER BY i.due_date, i.id"
    ))
    .bind(house_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Invoice::try_from).collect()
}

/// Open invoices with something left to pay, oldest due first, ties by id.
pub async fn outstanding_invoices(pool: &DbPool, house_id: HouseId) -> StoreResult<Vec<Invoice>> {
    let mut conn = pool.acquire().await?;
    fetch_outstanding(&mut conn, house_id).await
}

pub(crate) async fn fetch_outstanding(conn: &mut SqliteConnection, house_id: HouseId) -> StoreResult<Vec<Invoice>> {
    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "{INVOICE_SELECT} WHERE i.house_id = ? AND i.status <> 'CANCELLED' ORDER BY i.due_date, i.id"
    ))
    .bind(house_id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut open = Vec::new();
    for row in rows {
        let inv = Invoice::try_from(row)?;
        if inv.outstanding().is_positive() {
            open.push(inv);
        }
    }
    Ok(open)
}

pub(crate) fn as_open(invoice: &Invoice) -> OpenInvoice {
    OpenInvoice {
        id: invoice.id,
        due_date: invoice.due_date,
        outstanding: invoice.outstanding(),
    }
}

/// Re-derives status from the current totals and stores it if it changed.
pub(crate) async fn refresh_invoice_status(conn: &mut SqliteConnection, id: InvoiceId) -> StoreResult<InvoiceStatus> {
    let inv = fetch_invoice(conn, id).await?;
    let status = derive_status(inv.total, inv.paid, inv.credited, inv.is_cancelled());
    if status != inv.status {
        sqlx::query("UPDATE invoices SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&mut *conn)
            .await?;
        tracing::debug!(invoice_id = id.0, from = %inv.status, to = %status, "invoice status recomputed");
    }
    Ok(status)
}

/// Cancels an invoice nobody has paid against.
pub async fn cancel_invoice(pool: &DbPool, id: InvoiceId) -> StoreResult<Invoice> {
    let mut conn = begin_immediate(pool).await?;
    let result = cancel_locked(&mut conn, id).await;
    finish(conn, result).await
}

async fn cancel_locked(conn: &mut SqliteConnection, id: InvoiceId) -> StoreResult<Invoice> {
    let inv = fetch_invoice(conn, id).await?;
    if inv.is_cancelled() {
        return Err(DomainError::InvoiceClosed(inv.status).into());
    }
    if inv.paid.is_positive() {
        return Err(DomainError::InvoiceHasPayments.into());
    }
    sqlx::query("UPDATE invoices SET status = ? WHERE id = ?")
        .bind(InvoiceStatus::Cancelled.as_str())
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    tracing::info!(invoice_id = id.0, "invoice cancelled");
    fetch_invoice(conn, id).await
}

/// Credits an invoice, capped at what is still outstanding.
pub async fn apply_credit(
    pool: &DbPool,
    id: InvoiceId,
    amount: Money,
    note: Option<&str>,
    actor: Option<UserId>,
) -> StoreResult<Invoice> {
    if !amount.is_positive() {
        return Err(DomainError::InvalidAmount.into());
    }
    let mut conn = begin_immediate(pool).await?;
    let result = credit_locked(&mut conn, id, amount, note, actor).await;
    finish(conn, result).await
}

async fn credit_locked(
    conn: &mut SqliteConnection,
    id: InvoiceId,
    amount: Money,
    note: Option<&str>,
    actor: Option<UserId>,
) -> StoreResult<Invoice> {
    let inv = fetch_invoice(conn, id).await?;
    if inv.is_cancelled() {
        return Err(DomainError::InvoiceClosed(inv.status).into());
    }
    let outstanding = inv.outstanding();
    if !outstanding.is_positive() {
        return Err(DomainError::InvoiceNotOutstanding.into());
    }
    let credit = amount.min(outstanding);

    sqlx::query("INSERT INTO invoice_credits (invoice_id, amount_cents, note, created_by) VALUES (?, ?, ?, ?)")
        .bind(id.0)
        .bind(credit.to_cents()?)
        .bind(note)
        .bind(actor.map(|u| u.0))
        .execute(&mut *conn)
        .await?;
    refresh_invoice_status(conn, id).await?;

    tracing::info!(invoice_id = id.0, amount = %credit, "credit applied");
    fetch_invoice(conn, id).await
}

pub async fn list_invoice_payments(pool: &DbPool, invoice_id: InvoiceId) -> StoreResult<Vec<InvoicePayment>> {
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM invoice_payments WHERE invoice_id = ? ORDER BY id"
    ))
    .bind(invoice_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(InvoicePayment::try_from).collect()
}

/// Every allocation drawn from one ledger entry, reversed ones included.
pub async fn list_allocations(pool: &DbPool, income_id: IncomeTransactionId) -> StoreResult<Vec<InvoicePayment>> {
    let mut conn = pool.acquire().await?;
    fetch_allocations(&mut conn, income_id, false).await
}

pub(crate) async fn fetch_allocations(
    conn: &mut SqliteConnection,
    income_id: IncomeTransactionId,
    active_only: bool,
) -> StoreResult<Vec<InvoicePayment>> {
    let filter = if active_only { " AND status = 'ACTIVE'" } else { "" };
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM invoice_payments WHERE income_transaction_id = ?{filter} ORDER BY id"
    ))
    .bind(income_id.0)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(InvoicePayment::try_from).collect()
}

pub async fn get_income_transaction(pool: &DbPool, id: IncomeTransactionId) -> StoreResult<IncomeTransaction> {
    let row = sqlx::query_as::<_, IncomeRow>(&format!("SELECT {INCOME_COLUMNS} FROM income_transactions WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .ok_or(DomainError::not_found("income transaction", id.0))?;
    row.try_into()
}

pub(crate) async fn fetch_income_for_bank_transaction(
    conn: &mut SqliteConnection,
    bank_transaction_id: BankTransactionId,
) -> StoreResult<Option<IncomeTransaction>> {
    let row = sqlx::query_as::<_, IncomeRow>(&format!(
        "SELECT {INCOME_COLUMNS} FROM income_transactions WHERE bank_transaction_id = ?"
    ))
    .bind(bank_transaction_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(IncomeTransaction::try_from).transpose()
}

/// The ledger entry a pay-in produced, posted or reversed.
pub(crate) async fn fetch_income_for_payin(
    conn: &mut SqliteConnection,
    payin_id: PayinId,
) -> StoreResult<Option<IncomeTransaction>> {
    let row = sqlx::query_as::<_, IncomeRow>(&format!(
        "SELECT {INCOME_COLUMNS} FROM income_transactions WHERE payin_id = ?"
    ))
    .bind(payin_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(IncomeTransaction::try_from).transpose()
}

pub async fn list_house_income(pool: &DbPool, house_id: HouseId) -> StoreResult<Vec<IncomeTransaction>> {
    let rows = sqlx::query_as::<_, IncomeRow>(&format!(
        "SELECT {INCOME_COLUMNS} FROM income_transactions WHERE house_id = ? ORDER BY received_at, id"
    ))
    .bind(house_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(IncomeTransaction::try_from).collect()
}
