//! Status enums for every mutable lifecycle field.
//!
//! Each enum round-trips through the upper-case strings stored in the
//! database. Transition sites match exhaustively on these types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        ParseStatusError {
            kind,
            value: value.to_string(),
        }
    }
}

/// Reconciliation state of an imported bank transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingStatus {
    Unmatched,
    Matched,
    Posted,
    Reversed,
}

impl PostingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostingStatus::Unmatched => "UNMATCHED",
            PostingStatus::Matched => "MATCHED",
            PostingStatus::Posted => "POSTED",
            PostingStatus::Reversed => "REVERSED",
        }
    }
}

impl FromStr for PostingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UNMATCHED" => Ok(PostingStatus::Unmatched),
            "MATCHED" => Ok(PostingStatus::Matched),
            "POSTED" => Ok(PostingStatus::Posted),
            "REVERSED" => Ok(PostingStatus::Reversed),
            _ => Err(ParseStatusError::new("posting", s)),
        }
    }
}

/// Review state of a resident's pay-in report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayinStatus {
    Draft,
    Submitted,
    RejectedNeedsFix,
    Accepted,
}

impl PayinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayinStatus::Draft => "DRAFT",
            PayinStatus::Submitted => "SUBMITTED",
            PayinStatus::RejectedNeedsFix => "REJECTED_NEEDS_FIX",
            PayinStatus::Accepted => "ACCEPTED",
        }
    }

    /// Resident-side edits are only allowed before review or after a rejection.
    pub fn is_editable(self) -> bool {
        match self {
            PayinStatus::Draft | PayinStatus::RejectedNeedsFix => true,
            PayinStatus::Submitted | PayinStatus::Accepted => false,
        }
    }

    /// Waiting in the operator review queue; the only state that can be matched.
    pub fn is_review_eligible(self) -> bool {
        match self {
            PayinStatus::Submitted => true,
            PayinStatus::Draft | PayinStatus::RejectedNeedsFix | PayinStatus::Accepted => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PayinStatus::Accepted)
    }
}

impl FromStr for PayinStatus {
    type Err = ParseStatusError;

    /// Accepts the legacy `PENDING` and `REJECTED` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(PayinStatus::Draft),
            "SUBMITTED" | "PENDING" => Ok(PayinStatus::Submitted),
            "REJECTED_NEEDS_FIX" | "REJECTED" => Ok(PayinStatus::RejectedNeedsFix),
            "ACCEPTED" => Ok(PayinStatus::Accepted),
            _ => Err(ParseStatusError::new("pay-in", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayinSource {
    Resident,
    AdminCreated,
    LineReceived,
}

impl PayinSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PayinSource::Resident => "RESIDENT",
            PayinSource::AdminCreated => "ADMIN_CREATED",
            PayinSource::LineReceived => "LINE_RECEIVED",
        }
    }
}

impl FromStr for PayinSource {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RESIDENT" => Ok(PayinSource::Resident),
            "ADMIN_CREATED" => Ok(PayinSource::AdminCreated),
            "LINE_RECEIVED" => Ok(PayinSource::LineReceived),
            _ => Err(ParseStatusError::new("pay-in source", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Posted,
    Reversed,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Posted => "POSTED",
            LedgerStatus::Reversed => "REVERSED",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "POSTED" => Ok(LedgerStatus::Posted),
            "REVERSED" => Ok(LedgerStatus::Reversed),
            _ => Err(ParseStatusError::new("ledger", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Active,
    Reversed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Active => "ACTIVE",
            PaymentStatus::Reversed => "REVERSED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => Ok(PaymentStatus::Active),
            "REVERSED" => Ok(PaymentStatus::Reversed),
            _ => Err(ParseStatusError::new("invoice payment", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ISSUED" => Ok(InvoiceStatus::Issued),
            "PARTIALLY_PAID" => Ok(InvoiceStatus::PartiallyPaid),
            "PAID" => Ok(InvoiceStatus::Paid),
            "CANCELLED" => Ok(InvoiceStatus::Cancelled),
            _ => Err(ParseStatusError::new("invoice", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Parsed,
    Confirmed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Parsed => "PARSED",
            BatchStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PARSED" => Ok(BatchStatus::Parsed),
            "CONFIRMED" => Ok(BatchStatus::Confirmed),
            _ => Err(ParseStatusError::new("batch", s)),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_as_str!(
    PostingStatus,
    PayinStatus,
    PayinSource,
    LedgerStatus,
    PaymentStatus,
    InvoiceStatus,
    BatchStatus
);
