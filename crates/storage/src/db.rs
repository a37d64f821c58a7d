use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use estate_core::{DomainError, Money};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

use crate::error::StoreResult;

pub type DbPool = Pool<Sqlite>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if needed) a file-backed database and runs migrations.
pub async fn create_db(path: &Path, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database for tests. The connection is never
/// recycled, so the schema lives as long as the pool.
pub async fn create_memory_db() -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS houses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        house_number TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bank_accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bank_code TEXT NOT NULL,
        account_number_masked TEXT NOT NULL,
        currency TEXT NOT NULL DEFAULT 'THB',
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS statement_batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bank_account_id INTEGER NOT NULL,
        year INTEGER NOT NULL,
        month INTEGER NOT NULL,
        source_filename TEXT NOT NULL,
        uploaded_by INTEGER,
        status TEXT NOT NULL,
        opening_balance_cents INTEGER,
        closing_balance_cents INTEGER,
        warnings TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (bank_account_id, year, month),
        FOREIGN KEY (bank_account_id) REFERENCES bank_accounts(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bank_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id INTEGER NOT NULL,
        bank_account_id INTEGER NOT NULL,
        effective_at TEXT NOT NULL,
        description TEXT NOT NULL,
        debit_cents INTEGER,
        credit_cents INTEGER,
        balance_cents INTEGER,
        channel TEXT,
        raw_row TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        posting_status TEXT NOT NULL DEFAULT 'UNMATCHED',
        matched_payin_id INTEGER UNIQUE,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (bank_account_id, fingerprint),
        FOREIGN KEY (batch_id) REFERENCES statement_batches(id) ON DELETE CASCADE,
        FOREIGN KEY (bank_account_id) REFERENCES bank_accounts(id),
        FOREIGN KEY (matched_payin_id) REFERENCES payin_reports(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bank_transactions_batch ON bank_transactions(batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_bank_transactions_status ON bank_transactions(posting_status)",
    r#"
    CREATE TABLE IF NOT EXISTS payin_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        house_id INTEGER NOT NULL,
        submitted_by INTEGER,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        transfer_date TEXT NOT NULL,
        transfer_hour INTEGER NOT NULL CHECK (transfer_hour BETWEEN 0 AND 23),
        transfer_minute INTEGER NOT NULL CHECK (transfer_minute BETWEEN 0 AND 59),
        evidence_ref TEXT,
        status TEXT NOT NULL,
        source TEXT NOT NULL,
        matched_bank_transaction_id INTEGER UNIQUE,
        rejection_reason TEXT,
        accepted_by INTEGER,
        accepted_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY (house_id) REFERENCES houses(id),
        FOREIGN KEY (matched_bank_transaction_id) REFERENCES bank_transactions(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payin_reports_status ON payin_reports(status)",
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        house_id INTEGER NOT NULL,
        cycle TEXT NOT NULL,
        total_cents INTEGER NOT NULL CHECK (total_cents > 0),
        due_date TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ISSUED',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY (house_id) REFERENCES houses(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_invoices_house ON invoices(house_id, due_date)",
    r#"
    CREATE TABLE IF NOT EXISTS invoice_credits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        invoice_id INTEGER NOT NULL,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        note TEXT,
        created_by INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY (invoice_id) REFERENCES invoices(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS income_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        house_id INTEGER NOT NULL,
        payin_id INTEGER UNIQUE,
        bank_transaction_id INTEGER UNIQUE,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        received_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'POSTED',
        created_by INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        reversed_by INTEGER,
        reversed_at TEXT,
        reversal_reason TEXT,
        FOREIGN KEY (house_id) REFERENCES houses(id),
        FOREIGN KEY (payin_id) REFERENCES payin_reports(id),
        FOREIGN KEY (bank_transaction_id) REFERENCES bank_transactions(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoice_payments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        invoice_id INTEGER NOT NULL,
        income_transaction_id INTEGER NOT NULL,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        settles INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        reversed_at TEXT,
        FOREIGN KEY (invoice_id) REFERENCES invoices(id),
        FOREIGN KEY (income_transaction_id) REFERENCES income_transactions(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_invoice_payments_invoice ON invoice_payments(invoice_id)",
    "CREATE INDEX IF NOT EXISTS idx_invoice_payments_income ON invoice_payments(income_transaction_id)",
];

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Checks out a connection and opens a write transaction on it.
///
/// `BEGIN IMMEDIATE` takes SQLite's reserved lock up front, so every write
/// path reads its rows already holding the only write lock; a concurrent
/// caller waits (up to the busy timeout) and then sees the committed state.
pub(crate) async fn begin_immediate(pool: &DbPool) -> Result<PoolConnection<Sqlite>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(conn)
}

/// Commits on `Ok`, rolls back on `Err`. A failed commit is rolled back too.
pub(crate) async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(value),
            Err(e) => {
                rollback(conn).await;
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(conn).await;
            Err(e)
        }
    }
}

async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::warn!(error = %e, "rollback failed; discarding connection");
        drop(conn.detach());
    }
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn money(cents: i64) -> Money {
    Money::from_cents(cents)
}

pub(crate) fn opt_money(cents: Option<i64>) -> Option<Money> {
    cents.map(Money::from_cents)
}

pub(crate) fn opt_cents(money: Option<Money>) -> Result<Option<i64>, DomainError> {
    money.map(Money::to_cents).transpose()
}
