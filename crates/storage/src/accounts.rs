use estate_core::{BankAccount, BankAccountId, DomainError, House, HouseId};
use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::error::StoreResult;

const DEFAULT_CURRENCY: &str = "THB";

#[derive(sqlx::FromRow)]
struct BankAccountRow {
    id: i64,
    bank_code: String,
    account_number_masked: String,
    currency: String,
    is_active: bool,
}

impl From<BankAccountRow> for BankAccount {
    fn from(r: BankAccountRow) -> Self {
        BankAccount {
            id: BankAccountId(r.id),
            bank_code: r.bank_code,
            account_number_masked: r.account_number_masked,
            currency: r.currency,
            is_active: r.is_active,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, bank_code, account_number_masked, currency, is_active";

pub async fn create_bank_account(
    pool: &DbPool,
    bank_code: &str,
    account_number_masked: &str,
    currency: Option<&str>,
) -> StoreResult<BankAccount> {
    let currency = currency.filter(|c| !c.trim().is_empty()).unwrap_or(DEFAULT_CURRENCY);
    let id = sqlx::query(
        "INSERT INTO bank_accounts (bank_code, account_number_masked, currency) VALUES (?, ?, ?)",
    )
    .bind(bank_code.trim())
    .bind(account_number_masked.trim())
    .bind(currency.trim().to_uppercase())
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(bank_account_id = id, bank_code, "bank account created");
    get_bank_account(pool, BankAccountId(id)).await
}

pub async fn get_bank_account(pool: &DbPool, id: BankAccountId) -> StoreResult<BankAccount> {
    let mut conn = pool.acquire().await?;
    fetch_bank_account(&mut conn, id).await
}

pub(crate) async fn fetch_bank_account(conn: &mut SqliteConnection, id: BankAccountId) -> StoreResult<BankAccount> {
    let row = sqlx::query_as::<_, BankAccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM bank_accounts WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(BankAccount::from)
        .ok_or_else(|| DomainError::not_found("bank account", id.0).into())
}

pub async fn list_bank_accounts(pool: &DbPool) -> StoreResult<Vec<BankAccount>> {
    let rows = sqlx::query_as::<_, BankAccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM bank_accounts ORDER BY bank_code, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(BankAccount::from).collect())
}

/// The only mutation an account allows after creation.
pub async fn set_bank_account_active(pool: &DbPool, id: BankAccountId, active: bool) -> StoreResult<BankAccount> {
    let affected = sqlx::query("UPDATE bank_accounts SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(id.0)
        .execute(pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(DomainError::not_found("bank account", id.0).into());
    }
    tracing::info!(bank_account_id = id.0, active, "bank account activation changed");
    get_bank_account(pool, id).await
}

pub async fn create_house(pool: &DbPool, house_number: &str) -> StoreResult<House> {
    let id = sqlx::query("INSERT INTO houses (house_number) VALUES (?)")
        .bind(house_number.trim())
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(House {
        id: HouseId(id),
        house_number: house_number.trim().to_string(),
    })
}

pub async fn get_house(pool: &DbPool, id: HouseId) -> StoreResult<House> {
    let mut conn = pool.acquire().await?;
    fetch_house(&mut conn, id).await
}

pub(crate) async fn fetch_house(conn: &mut SqliteConnection, id: HouseId) -> StoreResult<House> {
    let row = sqlx::query_as::<_, (i64, String)>("SELECT id, house_number FROM houses WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|(id, house_number)| House {
        id: HouseId(id),
        house_number,
    })
    .ok_or_else(|| DomainError::not_found("house", id.0).into())
}

pub async fn list_houses(pool: &DbPool) -> StoreResult<Vec<House>> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, house_number FROM houses ORDER BY house_number")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, house_number)| House {
            id: HouseId(id),
            house_number,
        })
        .collect())
}
