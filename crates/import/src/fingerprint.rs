use chrono::NaiveDateTime;
use estate_core::{BankAccountId, Money};
use sha2::{Digest, Sha256};

use crate::statement::StatementRow;
use crate::util::normalize_text;

/// Deterministic identity of a statement row within one bank account.
///
/// SHA-256 over account, timestamp, debit, credit, balance and the
/// whitespace-normalized description. Re-importing the same row yields the
/// same value; the account id keeps identical rows of different accounts
/// apart.
pub fn fingerprint(account: BankAccountId, row: &StatementRow) -> String {
    fingerprint_parts(
        account,
        row.effective_at,
        row.debit,
        row.credit,
        row.balance,
        &row.description,
    )
}

pub fn fingerprint_parts(
    account: BankAccountId,
    effective_at: NaiveDateTime,
    debit: Option<Money>,
    credit: Option<Money>,
    balance: Option<Money>,
    description: &str,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        account,
        effective_at.format("%Y-%m-%dT%H:%M:%S"),
        amount_part(debit),
        amount_part(credit),
        amount_part(balance),
        normalize_text(description),
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex(&hasher.finalize())
}

fn amount_part(amount: Option<Money>) -> String {
    amount.map(|m| format!("{:.2}", m.as_decimal())).unwrap_or_default()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
