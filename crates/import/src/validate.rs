//! Pre-commit checks for a parsed statement batch.
//!
//! Errors block the import; warnings are stored on the batch and shown to
//! the operator.

use std::collections::{HashMap, HashSet};
use std::fmt;

use estate_core::StatementMonth;
use serde::Serialize;

use crate::statement::StatementRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
}

impl ValidationIssue {
    fn batch(code: &'static str, message: String) -> Self {
        Self {
            code,
            message,
            row_index: None,
        }
    }

    fn row(code: &'static str, row_index: usize, message: String) -> Self {
        Self {
            code,
            message,
            row_index: Some(row_index),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchValidation {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl BatchValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }
}

impl fmt::Display for BatchValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Checks a parsed batch against its target month.
///
/// An existing batch for the same account and month short-circuits with a
/// single error.
pub fn validate_batch(month: StatementMonth, batch_exists: bool, rows: &[StatementRow]) -> BatchValidation {
    let mut result = BatchValidation::default();

    if batch_exists {
        result.errors.push(ValidationIssue::batch(
            "DUPLICATE_BATCH",
            format!("a statement for {month} already exists for this account"),
        ));
        return result;
    }

    for row in rows {
        let date = row.effective_at.date();
        if !month.contains(date) {
            result.errors.push(ValidationIssue::row(
                "DATE_OUT_OF_RANGE",
                row.row_index,
                format!("row {} is dated {date}, outside {month}", row.row_index),
            ));
        }
    }

    let Some(first) = rows.iter().map(|r| r.effective_at.date()).min() else {
        return result;
    };
    let last = rows.iter().map(|r| r.effective_at.date()).max().unwrap_or(first);

    if first > month.first_day() {
        result.warnings.push(ValidationIssue::batch(
            "STARTS_LATE",
            format!("first transaction is on {first}, after the start of {month}"),
        ));
    }
    if last < month.last_day() {
        result.warnings.push(ValidationIssue::batch(
            "ENDS_EARLY",
            format!("last transaction is on {last}, before the end of {month}"),
        ));
    }

    let with_balance = rows.iter().filter(|r| r.balance.is_some()).count();
    if with_balance == 0 {
        result.warnings.push(ValidationIssue::batch(
            "NO_BALANCES",
            "no running balances in this statement".to_string(),
        ));
    } else if with_balance < rows.len() {
        result.warnings.push(ValidationIssue::batch(
            "PARTIAL_BALANCES",
            format!("{} of {} rows have no running balance", rows.len() - with_balance, rows.len()),
        ));
    }

    result
}

/// Flags rows already imported for the account and rows repeated within
/// the file. `fingerprints` runs parallel to `rows`.
pub fn check_fingerprints(
    rows: &[StatementRow],
    fingerprints: &[String],
    already_imported: &HashSet<String>,
    result: &mut BatchValidation,
) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (row, fp) in rows.iter().zip(fingerprints) {
        if already_imported.contains(fp) {
            result.errors.push(ValidationIssue::row(
                "DUPLICATE_TRANSACTION",
                row.row_index,
                format!("row {} was already imported for this account", row.row_index),
            ));
            continue;
        }
        if let Some(first) = seen.insert(fp.as_str(), row.row_index) {
            result.errors.push(ValidationIssue::row(
                "DUPLICATE_IN_FILE",
                row.row_index,
                format!("row {} repeats row {first}", row.row_index),
            ));
        }
    }
}
