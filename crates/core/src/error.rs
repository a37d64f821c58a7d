use chrono::NaiveDate;
use thiserror::Error;

use crate::money::Money;
use crate::status::{InvoiceStatus, PayinStatus, PostingStatus};

/// Rule violations raised by the reconciliation engine.
///
/// Every variant is client-actionable and carries a stable reason code
/// (see [`DomainError::code`]) so operators can decide the next manual step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("bank transaction is not a credit")]
    NotCredit,
    #[error("bank transaction is already matched to a pay-in")]
    AlreadyMatched,
    #[error("bank transaction is {0}; only UNMATCHED transactions can be matched")]
    NotMatchable(PostingStatus),
    #[error("pay-in is already matched to a bank transaction")]
    PayinAlreadyMatched,
    #[error("pay-in is {0}; only SUBMITTED pay-ins can be reviewed")]
    PayinNotReviewable(PayinStatus),
    #[error("pay-in is {0} and can no longer be edited")]
    PayinNotEditable(PayinStatus),
    #[error("pay-in is not matched to a bank transaction")]
    PayinNotMatched,
    #[error("pay-in has ledger history and cannot be deleted")]
    PayinHasLedger,
    #[error("pay-in already produced a ledger entry; record a new pay-in")]
    PayinAlreadyPosted,
    #[error("amount mismatch: bank credit {bank} vs pay-in {payin}")]
    AmountMismatch { bank: Money, payin: Money },
    #[error("time mismatch: transfer times are {seconds}s apart")]
    TimeMismatch { seconds: i64 },
    #[error("bank transaction is not matched")]
    NotMatched,
    #[error("matched pay-in is already ACCEPTED; reverse the posting first")]
    PayinAccepted,
    #[error("bank transaction was REVERSED and cannot be posted again")]
    TransactionReversed,
    #[error("bank transaction is {0}; only POSTED transactions can be reversed")]
    NotPosted(PostingStatus),
    #[error("cannot determine the house for this transaction: match a pay-in first or specify an invoice")]
    Ambiguous,
    #[error("invoice belongs to a different house")]
    InvoiceHouseMismatch,
    #[error("invoice has no outstanding balance")]
    InvoiceNotOutstanding,
    #[error("invoice is {0}")]
    InvoiceClosed(InvoiceStatus),
    #[error("invoice has active payments and cannot be cancelled")]
    InvoiceHasPayments,
    #[error("a reversal reason is required")]
    MissingReason,
    #[error("period containing {0} is locked")]
    PeriodLocked(NaiveDate),
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("amount {0} is too large to record")]
    AmountOutOfRange(Money),
    #[error("invalid transfer time {hour:02}:{minute:02}")]
    InvalidTransferTime { hour: u32, minute: u32 },
    #[error("bank account is inactive")]
    AccountInactive,
    #[error("statement batch has matched or posted transactions")]
    BatchInUse,
    #[error("invalid statement period {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },
}

/// Broad class of a rule violation, used by outer layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    BadInput,
    Conflict,
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        DomainError::NotFound { entity, id }
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "NOT_FOUND",
            DomainError::NotCredit => "NOT_CREDIT",
            DomainError::AlreadyMatched => "ALREADY_MATCHED",
            DomainError::NotMatchable(_) => "WRONG_POSTING_STATUS",
            DomainError::PayinAlreadyMatched => "PAYIN_ALREADY_MATCHED",
            DomainError::PayinNotReviewable(_) => "WRONG_PAYIN_STATUS",
            DomainError::PayinNotEditable(_) => "PAYIN_NOT_EDITABLE",
            DomainError::PayinNotMatched => "PAYIN_NOT_MATCHED",
            DomainError::PayinHasLedger => "PAYIN_HAS_LEDGER",
            DomainError::PayinAlreadyPosted => "PAYIN_ALREADY_POSTED",
            DomainError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            DomainError::TimeMismatch { .. } => "TIME_MISMATCH",
            DomainError::NotMatched => "NOT_MATCHED",
            DomainError::PayinAccepted => "PAYIN_ACCEPTED",
            DomainError::TransactionReversed => "TRANSACTION_REVERSED",
            DomainError::NotPosted(_) => "NOT_POSTED",
            DomainError::Ambiguous => "AMBIGUOUS",
            DomainError::InvoiceHouseMismatch => "INVOICE_HOUSE_MISMATCH",
            DomainError::InvoiceNotOutstanding => "INVOICE_NOT_OUTSTANDING",
            DomainError::InvoiceClosed(_) => "INVOICE_CLOSED",
            DomainError::InvoiceHasPayments => "INVOICE_HAS_PAYMENTS",
            DomainError::MissingReason => "MISSING_REASON",
            DomainError::PeriodLocked(_) => "PERIOD_LOCKED",
            DomainError::InvalidAmount => "INVALID_AMOUNT",
            DomainError::AmountOutOfRange(_) => "AMOUNT_OUT_OF_RANGE",
            DomainError::InvalidTransferTime { .. } => "INVALID_TRANSFER_TIME",
            DomainError::AccountInactive => "ACCOUNT_INACTIVE",
            DomainError::BatchInUse => "BATCH_IN_USE",
            DomainError::InvalidPeriod { .. } => "INVALID_PERIOD",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            DomainError::NotFound { .. } => ErrorClass::NotFound,
            DomainError::MissingReason
            | DomainError::InvalidAmount
            | DomainError::AmountOutOfRange(_)
            | DomainError::InvalidTransferTime { .. }
            | DomainError::InvalidPeriod { .. } => ErrorClass::BadInput,
            _ => ErrorClass::Conflict,
        }
    }
}
