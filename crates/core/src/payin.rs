use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{BankTransactionId, HouseId, PayinId, UserId};
use crate::money::Money;
use crate::status::{PayinSource, PayinStatus};

/// A resident's claim of having transferred money to the estate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayinReport {
    pub id: PayinId,
    pub house_id: HouseId,
    pub submitted_by: Option<UserId>,
    pub amount: Money,
    pub transfer_date: NaiveDate,
    pub transfer_hour: u32,
    pub transfer_minute: u32,
    pub evidence_ref: Option<String>,
    pub status: PayinStatus,
    pub source: PayinSource,
    pub matched_bank_transaction_id: Option<BankTransactionId>,
    pub rejection_reason: Option<String>,
    pub accepted_by: Option<UserId>,
    pub accepted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl PayinReport {
    /// Transfer date with the separately stored hour and minute folded in.
    pub fn transfer_datetime(&self) -> NaiveDateTime {
        fold_transfer_time(self.transfer_date, self.transfer_hour, self.transfer_minute)
            .unwrap_or_else(|| self.transfer_date.and_time(NaiveTime::MIN))
    }

    pub fn is_matched(&self) -> bool {
        self.matched_bank_transaction_id.is_some()
    }
}

pub fn fold_transfer_time(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).map(|t| date.and_time(t))
}

/// Fields a submitter controls, checked before any write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayinDraft {
    pub house_id: HouseId,
    pub amount: Money,
    pub transfer_date: NaiveDate,
    pub transfer_hour: u32,
    pub transfer_minute: u32,
    pub evidence_ref: Option<String>,
    pub source: PayinSource,
}

impl PayinDraft {
    pub fn validate(&self) -> Result<NaiveDateTime, DomainError> {
        if !self.amount.is_positive() {
            return Err(DomainError::InvalidAmount);
        }
        self.amount.to_cents()?;
        fold_transfer_time(self.transfer_date, self.transfer_hour, self.transfer_minute).ok_or(
            DomainError::InvalidTransferTime {
                hour: self.transfer_hour,
                minute: self.transfer_minute,
            },
        )
    }
}
