use chrono::{NaiveDateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ids::{BankAccountId, BankTransactionId, BatchId, PayinId, UserId};
use crate::money::Money;
use crate::period::StatementMonth;
use crate::status::{BatchStatus, PostingStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: BankAccountId,
    pub bank_code: String,
    pub account_number_masked: String,
    pub currency: String,
    pub is_active: bool,
}

/// One calendar month of one account's statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementBatch {
    pub id: BatchId,
    pub bank_account_id: BankAccountId,
    pub year: i32,
    pub month: u32,
    pub source_filename: String,
    pub uploaded_by: Option<UserId>,
    pub status: BatchStatus,
    pub opening_balance: Option<Money>,
    pub closing_balance: Option<Money>,
    pub warnings: Vec<String>,
    pub created_at: NaiveDateTime,
}

impl StatementBatch {
    pub fn statement_month(&self) -> Option<StatementMonth> {
        StatementMonth::new(self.year, self.month)
    }
}

/// A normalized statement row. Amount, date and description never change
/// after import; only `posting_status` and the match link do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: BankTransactionId,
    pub batch_id: BatchId,
    pub bank_account_id: BankAccountId,
    pub effective_at: NaiveDateTime,
    pub description: String,
    pub debit: Option<Money>,
    pub credit: Option<Money>,
    pub balance: Option<Money>,
    pub channel: Option<String>,
    pub raw_row: String,
    pub fingerprint: String,
    pub posting_status: PostingStatus,
    pub matched_payin_id: Option<PayinId>,
}

impl BankTransaction {
    /// Positive credit amount, if this row brought money in.
    pub fn credit_amount(&self) -> Option<Money> {
        self.credit.filter(|c| c.is_positive())
    }

    pub fn is_credit(&self) -> bool {
        self.credit_amount().is_some()
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.effective_at.date()
    }
}
