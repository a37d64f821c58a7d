//! Statement import: preview, confirm and batch housekeeping.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use estate_core::{
    BankAccountId, BankTransaction, BankTransactionId, BatchId, BatchStatus, DateRange, DomainError, Money,
    PayinId, StatementBatch, StatementMonth, UserId,
};
use estate_import::{
    check_fingerprints, fingerprint, parse_statement, validate_batch, BatchValidation, ParseDiagnostics,
    StatementRow,
};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::accounts::fetch_bank_account;
use crate::db::{begin_immediate, finish, opt_cents, opt_money, DbPool};
use crate::error::{is_unique_violation, StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: i64,
    bank_account_id: i64,
    year: i64,
    month: i64,
    source_filename: String,
    uploaded_by: Option<i64>,
    status: String,
    opening_balance_cents: Option<i64>,
    closing_balance_cents: Option<i64>,
    warnings: String,
    created_at: NaiveDateTime,
}

impl TryFrom<BatchRow> for StatementBatch {
    type Error = StoreError;

    fn try_from(r: BatchRow) -> Result<Self, Self::Error> {
        let warnings: Vec<String> =
            serde_json::from_str(&r.warnings).map_err(|e| StoreError::InvalidData(format!("batch warnings: {e}")))?;
        Ok(StatementBatch {
            id: BatchId(r.id),
            bank_account_id: BankAccountId(r.bank_account_id),
            year: r.year as i32,
            month: r.month as u32,
            source_filename: r.source_filename,
            uploaded_by: r.uploaded_by.map(UserId),
            status: r.status.parse::<BatchStatus>()?,
            opening_balance: opt_money(r.opening_balance_cents),
            closing_balance: opt_money(r.closing_balance_cents),
            warnings,
            created_at: r.created_at,
        })
    }
}

const BATCH_COLUMNS: &str = "id, bank_account_id, year, month, source_filename, uploaded_by, status, \
     opening_balance_cents, closing_balance_cents, warnings, created_at";

#[derive(sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: i64,
    batch_id: i64,
    bank_account_id: i64,
    effective_at: NaiveDateTime,
    description: String,
    debit_cents: Option<i64>,
    credit_cents: Option<i64>,
    balance_cents: Option<i64>,
    channel: Option<String>,
    raw_row: String,
    fingerprint: String,
    posting_status: String,
    matched_payin_id: Option<i64>,
}

impl TryFrom<TransactionRow> for BankTransaction {
    type Error = StoreError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        Ok(BankTransaction {
            id: BankTransactionId(r.id),
            batch_id: BatchId(r.batch_id),
            bank_account_id: BankAccountId(r.bank_account_id),
            effective_at: r.effective_at,
            description: r.description,
            debit: opt_money(r.debit_cents),
            credit: opt_money(r.credit_cents),
            balance: opt_money(r.balance_cents),
            channel: r.channel,
            raw_row: r.raw_row,
            fingerprint: r.fingerprint,
            posting_status: r.posting_status.parse()?,
            matched_payin_id: r.matched_payin_id.map(PayinId),
        })
    }
}

pub(crate) const TRANSACTION_COLUMNS: &str = "id, batch_id, bank_account_id, effective_at, description, \
     debit_cents, credit_cents, balance_cents, channel, raw_row, fingerprint, posting_status, matched_payin_id";

pub(crate) fn convert_transactions(rows: Vec<TransactionRow>) -> StoreResult<Vec<BankTransaction>> {
    rows.into_iter().map(BankTransaction::try_from).collect()
}

/// Who is uploading which file for which account and month.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub bank_account_id: BankAccountId,
    pub year: i32,
    pub month: u32,
    pub source_filename: String,
    pub uploaded_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewRow {
    #[serde(flatten)]
    pub row: StatementRow,
    pub fingerprint: String,
}

/// What a confirm would create. Nothing is written.
#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub bank_account_id: BankAccountId,
    pub year: i32,
    pub month: u32,
    pub rows: Vec<PreviewRow>,
    pub diagnostics: ParseDiagnostics,
    pub opening_balance: Option<Money>,
    pub closing_balance: Option<Money>,
    pub validation: BatchValidation,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch: StatementBatch,
    pub transaction_count: usize,
    pub credit_count: usize,
    pub debit_count: usize,
    pub date_range: Option<DateRange>,
    pub diagnostics: ParseDiagnostics,
}

struct PreparedImport {
    month: StatementMonth,
    rows: Vec<StatementRow>,
    fingerprints: Vec<String>,
    diagnostics: ParseDiagnostics,
    opening_balance: Option<Money>,
    closing_balance: Option<Money>,
    validation: BatchValidation,
}

/// Parse, validate and fingerprint. Reads only.
async fn prepare(
    conn: &mut SqliteConnection,
    account_id: BankAccountId,
    year: i32,
    month: u32,
    raw_text: &str,
) -> StoreResult<PreparedImport> {
    let target = StatementMonth::new(year, month).ok_or(DomainError::InvalidPeriod { year, month })?;
    let account = fetch_bank_account(conn, account_id).await?;
    if !account.is_active {
        return Err(DomainError::AccountInactive.into());
    }

    let parsed = parse_statement(raw_text)?;
    let exists = batch_exists(conn, account_id, target).await?;
    let mut validation = validate_batch(target, exists, &parsed.transactions);

    let fingerprints: Vec<String> = parsed
        .transactions
        .iter()
        .map(|row| fingerprint(account_id, row))
        .collect();

    if !exists {
        let already = existing_fingerprints(conn, account_id, &fingerprints).await?;
        check_fingerprints(&parsed.transactions, &fingerprints, &already, &mut validation);
    }

    Ok(PreparedImport {
        month: target,
        rows: parsed.transactions,
        fingerprints,
        diagnostics: parsed.diagnostics,
        opening_balance: parsed.opening_balance,
        closing_balance: parsed.closing_balance,
        validation,
    })
}

async fn batch_exists(conn: &mut SqliteConnection, account_id: BankAccountId, month: StatementMonth) -> StoreResult<bool> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM statement_batches WHERE bank_account_id = ? AND year = ? AND month = ?",
    )
    .bind(account_id.0)
    .bind(month.year())
    .bind(month.month())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

async fn existing_fingerprints(
    conn: &mut SqliteConnection,
    account_id: BankAccountId,
    fingerprints: &[String],
) -> StoreResult<HashSet<String>> {
    let mut found = HashSet::new();
    // Stay well under SQLite's bound-parameter limit.
    for chunk in fingerprints.chunks(500) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT fingerprint FROM bank_transactions WHERE bank_account_id = ");
        qb.push_bind(account_id.0);
        qb.push(" AND fingerprint IN (");
        let mut sep = qb.separated(", ");
        for fp in chunk {
            sep.push_bind(fp.as_str());
        }
        sep.push_unseparated(")");

        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
        found.extend(rows.into_iter().map(|(fp,)| fp));
    }
    Ok(found)
}

pub async fn preview_import(
    pool: &DbPool,
    account_id: BankAccountId,
    year: i32,
    month: u32,
    raw_text: &str,
) -> StoreResult<ImportPreview> {
    let mut conn = pool.acquire().await?;
    let prepared = prepare(&mut conn, account_id, year, month, raw_text).await?;

    let rows = prepared
        .rows
        .into_iter()
        .zip(prepared.fingerprints)
        .map(|(row, fingerprint)| PreviewRow { row, fingerprint })
        .collect();

    Ok(ImportPreview {
        bank_account_id: account_id,
        year: prepared.month.year(),
        month: prepared.month.month(),
        rows,
        diagnostics: prepared.diagnostics,
        opening_balance: prepared.opening_balance,
        closing_balance: prepared.closing_balance,
        validation: prepared.validation,
    })
}

/// Parses, validates and stores a month of statement rows as one unit.
/// Either every row lands as UNMATCHED or nothing is written.
pub async fn confirm_import(pool: &DbPool, request: &ImportRequest, raw_text: &str) -> StoreResult<BatchSummary> {
    let mut conn = begin_immediate(pool).await?;
    let result = confirm_locked(&mut conn, request, raw_text).await;
    finish(conn, result).await
}

async fn confirm_locked(
    conn: &mut SqliteConnection,
    request: &ImportRequest,
    raw_text: &str,
) -> StoreResult<BatchSummary> {
    let prepared = prepare(conn, request.bank_account_id, request.year, request.month, raw_text).await?;
    if !prepared.validation.is_ok() {
        tracing::warn!(
            bank_account_id = request.bank_account_id.0,
            errors = prepared.validation.errors.len(),
            "statement import rejected"
        );
        return Err(StoreError::Validation(prepared.validation));
    }

    let warnings = serde_json::to_string(&prepared.validation.warning_messages())
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;

    let inserted = sqlx::query(
        "INSERT INTO statement_batches \
         (bank_account_id, year, month, source_filename, uploaded_by, status, opening_balance_cents, closing_balance_cents, warnings) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(request.bank_account_id.0)
    .bind(prepared.month.year())
    .bind(prepared.month.month())
    .bind(&request.source_filename)
    .bind(request.uploaded_by.map(|u| u.0))
    .bind(BatchStatus::Confirmed.as_str())
    .bind(opt_cents(prepared.opening_balance)?)
    .bind(opt_cents(prepared.closing_balance)?)
    .bind(&warnings)
    .execute(&mut *conn)
    .await;

    let batch_id = match inserted {
        Ok(r) => BatchId(r.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => {
            return Err(duplicate_batch_race(prepared.month, &prepared.rows));
        }
        Err(e) => return Err(e.into()),
    };

    for (row, fp) in prepared.rows.iter().zip(&prepared.fingerprints) {
        let inserted = sqlx::query(
            "INSERT INTO bank_transactions \
             (batch_id, bank_account_id, effective_at, description, debit_cents, credit_cents, balance_cents, channel, raw_row, fingerprint) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id.0)
        .bind(request.bank_account_id.0)
        .bind(row.effective_at)
        .bind(&row.description)
        .bind(opt_cents(row.debit)?)
        .bind(opt_cents(row.credit)?)
        .bind(opt_cents(row.balance)?)
        .bind(&row.channel)
        .bind(&row.raw_row)
        .bind(fp)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                let mut validation = BatchValidation::default();
                let already: HashSet<String> = [fp.clone()].into_iter().collect();
                check_fingerprints(std::slice::from_ref(row), std::slice::from_ref(fp), &already, &mut validation);
                return Err(StoreError::Validation(validation));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let batch = fetch_batch(conn, batch_id).await?;
    let credit_count = prepared.rows.iter().filter(|r| r.is_credit()).count();
    let debit_count = prepared.rows.iter().filter(|r| r.debit.is_some()).count();

    tracing::info!(
        batch_id = batch_id.0,
        bank_account_id = request.bank_account_id.0,
        month = %prepared.month,
        rows = prepared.rows.len(),
        warnings = batch.warnings.len(),
        "statement batch confirmed"
    );

    Ok(BatchSummary {
        batch,
        transaction_count: prepared.rows.len(),
        credit_count,
        debit_count,
        date_range: prepared.diagnostics.date_range,
        diagnostics: prepared.diagnostics,
    })
}

fn duplicate_batch_race(month: StatementMonth, rows: &[StatementRow]) -> StoreError {
    StoreError::Validation(validate_batch(month, true, rows))
}

pub async fn get_batch(pool: &DbPool, id: BatchId) -> StoreResult<StatementBatch> {
    let mut conn = pool.acquire().await?;
    fetch_batch(&mut conn, id).await
}

async fn fetch_batch(conn: &mut SqliteConnection, id: BatchId) -> StoreResult<StatementBatch> {
    let row = sqlx::query_as::<_, BatchRow>(&format!("SELECT {BATCH_COLUMNS} FROM statement_batches WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DomainError::not_found("statement batch", id.0))?;
    row.try_into()
}

pub async fn list_batches(pool: &DbPool, account_id: BankAccountId) -> StoreResult<Vec<StatementBatch>> {
    let rows = sqlx::query_as::<_, BatchRow>(&format!(
        "SELECT {BATCH_COLUMNS} FROM statement_batches WHERE bank_account_id = ? ORDER BY year DESC, month DESC"
    ))
    .bind(account_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(StatementBatch::try_from).collect()
}

pub async fn list_batch_transactions(pool: &DbPool, batch_id: BatchId) -> StoreResult<Vec<BankTransaction>> {
    let mut conn = pool.acquire().await?;
    fetch_batch(&mut conn, batch_id).await?;
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions WHERE batch_id = ? ORDER BY effective_at, id"
    ))
    .bind(batch_id.0)
    .fetch_all(&mut *conn)
    .await?;
    convert_transactions(rows)
}

pub async fn get_bank_transaction(pool: &DbPool, id: BankTransactionId) -> StoreResult<BankTransaction> {
    let mut conn = pool.acquire().await?;
    fetch_transaction(&mut conn, id).await
}

pub(crate) async fn fetch_transaction(conn: &mut SqliteConnection, id: BankTransactionId) -> StoreResult<BankTransaction> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DomainError::not_found("bank transaction", id.0))?;
    row.try_into()
}

/// UNMATCHED credits awaiting review, oldest first.
pub async fn list_unmatched_credits(pool: &DbPool, batch_id: Option<BatchId>) -> StoreResult<Vec<BankTransaction>> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM bank_transactions \
         WHERE posting_status = 'UNMATCHED' AND credit_cents > 0 AND (?1 IS NULL OR batch_id = ?1) \
         ORDER BY effective_at, id"
    ))
    .bind(batch_id.map(|b| b.0))
    .fetch_all(pool)
    .await?;
    convert_transactions(rows)
}

/// Removes a batch and its rows. Refused once any row has moved past
/// UNMATCHED, since ledger history must stay reachable.
pub async fn delete_batch(pool: &DbPool, id: BatchId) -> StoreResult<u64> {
    let mut conn = begin_immediate(pool).await?;
    let result = delete_batch_locked(&mut conn, id).await;
    finish(conn, result).await
}

async fn delete_batch_locked(conn: &mut SqliteConnection, id: BatchId) -> StoreResult<u64> {
    fetch_batch(conn, id).await?;
    let (in_use,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bank_transactions WHERE batch_id = ? AND posting_status <> 'UNMATCHED'",
    )
    .bind(id.0)
    .fetch_one(&mut *conn)
    .await?;
    if in_use > 0 {
        return Err(DomainError::BatchInUse.into());
    }

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bank_transactions WHERE batch_id = ?")
        .bind(id.0)
        .fetch_one(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM statement_batches WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;

    tracing::info!(batch_id = id.0, rows, "statement batch deleted");
    Ok(rows as u64)
}
