//! Bank statement CSV parsing.
//!
//! Thai bank exports carry a few metadata rows (account number, period,
//! opening balance) above a header row whose wording varies by bank and
//! language. The parser finds the header by synonym scoring, normalizes each
//! data row and reports why every other row was dropped.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, NaiveTime};
use estate_core::{DateRange, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::columns::{expected_columns, ColumnMap};
use crate::util::{is_blank_row, normalize_text, parse_amount, parse_date, parse_datetime, parse_time};

const DELIMITERS: [char; 3] = [',', ';', '\t'];
const DELIMITER_SAMPLE_LINES: usize = 10;

const OPENING_LABELS: &[&str] = &[
    "opening balance",
    "beginning balance",
    "balance brought forward",
    "brought forward",
    "ยอดยกมา",
    "ยอดคงเหลือยกมา",
    "ยอดเงินคงเหลือต้นงวด",
];

const CLOSING_LABELS: &[&str] = &[
    "closing balance",
    "ending balance",
    "balance carried forward",
    "carried forward",
    "ยอดยกไป",
    "ยอดคงเหลือสิ้นงวด",
    "ยอดเงินคงเหลือปลายงวด",
];

const SUMMARY_LABELS: &[&str] = &[
    "total",
    "totals",
    "sub total",
    "subtotal",
    "grand total",
    "opening balance",
    "closing balance",
    "beginning balance",
    "ending balance",
    "brought forward",
    "carried forward",
    "รวม",
    "ยอดรวม",
    "รวมทั้งสิ้น",
    "ยอดยกมา",
    "ยอดยกไป",
];

/// One normalized statement row, before it is tied to an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    /// Position of the row among all records in the file.
    pub row_index: usize,
    pub effective_at: NaiveDateTime,
    pub description: String,
    pub debit: Option<Money>,
    pub credit: Option<Money>,
    pub balance: Option<Money>,
    pub channel: Option<String>,
    /// The original cells, as a JSON array.
    pub raw_row: String,
}

impl StatementRow {
    pub fn is_credit(&self) -> bool {
        self.credit.is_some_and(|c| c.is_positive())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SkipReason {
    InvalidDate,
    InvalidAmount,
    NoAmount,
    SummaryRow,
    RepeatedHeader,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            SkipReason::InvalidDate => "invalid_date",
            SkipReason::InvalidAmount => "invalid_amount",
            SkipReason::NoAmount => "no_amount",
            SkipReason::SummaryRow => "summary_row",
            SkipReason::RepeatedHeader => "repeated_header",
        }
    }
}

/// What the parser saw, returned on success and attached to every failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseDiagnostics {
    pub delimiter: char,
    pub header_row_index: Option<usize>,
    /// Non-blank rows below the header.
    pub total_rows: usize,
    pub parsed_rows: usize,
    pub skipped_rows: usize,
    pub skip_reasons: BTreeMap<String, usize>,
    pub detected_columns: Vec<String>,
    pub expected_columns: Vec<String>,
    pub date_range: Option<DateRange>,
}

impl ParseDiagnostics {
    fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            header_row_index: None,
            total_rows: 0,
            parsed_rows: 0,
            skipped_rows: 0,
            skip_reasons: BTreeMap::new(),
            detected_columns: Vec::new(),
            expected_columns: expected_columns(),
            date_range: None,
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        self.skipped_rows += 1;
        *self.skip_reasons.entry(reason.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn summary(&self) -> String {
        let reasons = if self.skip_reasons.is_empty() {
            "none".to_string()
        } else {
            self.skip_reasons
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{} of {} rows parsed (skipped: {}); detected columns [{}], expected [{}]",
            self.parsed_rows,
            self.total_rows,
            reasons,
            self.detected_columns.join(", "),
            self.expected_columns.join(", "),
        )
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("statement file is empty")]
    Empty,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no header row found: {}", .0.summary())]
    HeaderNotFound(Box<ParseDiagnostics>),
    #[error("no transactions could be parsed: {}", .0.summary())]
    NoTransactions(Box<ParseDiagnostics>),
}

impl ParseError {
    pub fn diagnostics(&self) -> Option<&ParseDiagnostics> {
        match self {
            ParseError::HeaderNotFound(d) | ParseError::NoTransactions(d) => Some(d),
            ParseError::Empty | ParseError::Csv(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub header_row_index: usize,
    pub metadata_rows: Vec<Vec<String>>,
    pub transactions: Vec<StatementRow>,
    pub diagnostics: ParseDiagnostics,
    pub opening_balance: Option<Money>,
    pub closing_balance: Option<Money>,
}

/// Parses a statement export. Accepts comma, semicolon or tab separated
/// text with an optional UTF-8 byte order mark.
pub fn parse_statement(input: &str) -> Result<ParsedStatement, ParseError> {
    let text = input.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let delimiter = detect_delimiter(text);
    let rows = read_records(text, delimiter)?;
    let mut diagnostics = ParseDiagnostics::new(delimiter);

    let header = rows.iter().enumerate().find_map(|(idx, row)| {
        let map = ColumnMap::detect(row);
        map.qualifies().then_some((idx, map))
    });

    let Some((header_idx, columns)) = header else {
        diagnostics.total_rows = rows.iter().filter(|r| !is_blank_row(r)).count();
        diagnostics.detected_columns = rows
            .iter()
            .map(|r| ColumnMap::detect(r))
            .max_by_key(|m| m.detected_count())
            .map(|m| m.detected())
            .unwrap_or_default();
        return Err(ParseError::HeaderNotFound(Box::new(diagnostics)));
    };

    diagnostics.header_row_index = Some(header_idx);
    diagnostics.detected_columns = columns.detected();

    let metadata_rows: Vec<Vec<String>> = rows[..header_idx]
        .iter()
        .filter(|r| !is_blank_row(r))
        .cloned()
        .collect();

    let mut transactions = Vec::new();
    for (idx, row) in rows.iter().enumerate().skip(header_idx + 1) {
        if is_blank_row(row) {
            continue;
        }
        diagnostics.total_rows += 1;
        match extract_row(idx, row, &columns) {
            Ok(parsed) => transactions.push(parsed),
            Err(reason) => diagnostics.skip(reason),
        }
    }
    diagnostics.parsed_rows = transactions.len();
    diagnostics.date_range = DateRange::spanning(transactions.iter().map(|t| t.effective_at.date()));

    if transactions.is_empty() {
        return Err(ParseError::NoTransactions(Box::new(diagnostics)));
    }

    let opening_balance =
        balance_from_metadata(&metadata_rows, OPENING_LABELS).or_else(|| derive_opening(&transactions));
    let closing_balance =
        balance_from_metadata(&metadata_rows, CLOSING_LABELS).or_else(|| derive_closing(&transactions));

    Ok(ParsedStatement {
        header_row_index: header_idx,
        metadata_rows,
        transactions,
        diagnostics,
        opening_balance,
        closing_balance,
    })
}

/// Picks the delimiter that occurs most often in the first non-blank lines.
/// Ties go to the comma.
fn detect_delimiter(text: &str) -> char {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();

    let mut best = ',';
    let mut best_count = 0;
    for d in DELIMITERS {
        let count: usize = sample.iter().map(|l| l.matches(d).count()).sum();
        if count > best_count {
            best = d;
            best_count = count;
        }
    }
    best
}

fn read_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(rows)
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map_or("", String::as_str)
}

fn extract_row(row_index: usize, row: &[String], columns: &ColumnMap) -> Result<StatementRow, SkipReason> {
    if ColumnMap::detect(row).qualifies() {
        return Err(SkipReason::RepeatedHeader);
    }

    let description = cell(row, columns.description).to_string();
    if [columns.datetime, columns.date, columns.description]
        .into_iter()
        .any(|idx| is_summary_label(cell(row, idx)))
    {
        return Err(SkipReason::SummaryRow);
    }

    let effective_at = extract_datetime(row, columns).ok_or(SkipReason::InvalidDate)?;

    let debit = amount_cell(row, columns.debit)?;
    let credit = amount_cell(row, columns.credit)?;
    if debit.is_none() && credit.is_none() {
        return Err(SkipReason::NoAmount);
    }
    let balance = parse_amount(cell(row, columns.balance)).map_err(|_| SkipReason::InvalidAmount)?;

    let channel = Some(cell(row, columns.channel).to_string()).filter(|c| !c.is_empty());
    let raw_row = serde_json::to_string(row).unwrap_or_else(|_| row.join(","));

    Ok(StatementRow {
        row_index,
        effective_at,
        description,
        debit,
        credit,
        balance,
        channel,
        raw_row,
    })
}

/// A cell is a summary label when it is the label itself, optionally
/// followed by a colon ("Total", "รวม:", "Total: 4 items"). Descriptions
/// that merely start with a label word stay transactions.
fn is_summary_label(text: &str) -> bool {
    let normalized = normalize_text(text);
    let normalized = normalized.trim_end_matches([':', '.']).trim_end();
    SUMMARY_LABELS.iter().any(|label| {
        normalized
            .strip_prefix(label)
            .is_some_and(|rest| rest.is_empty() || rest.trim_start().starts_with(':'))
    })
}

/// Debit and credit columns hold absolute values; a zero is treated as empty.
fn amount_cell(row: &[String], idx: Option<usize>) -> Result<Option<Money>, SkipReason> {
    let amount = parse_amount(cell(row, idx)).map_err(|_| SkipReason::InvalidAmount)?;
    Ok(amount.map(Money::abs).filter(|m| !m.is_zero()))
}

fn extract_datetime(row: &[String], columns: &ColumnMap) -> Option<NaiveDateTime> {
    if let Some(at) = columns.datetime.and_then(|_| parse_datetime(cell(row, columns.datetime))) {
        return Some(at);
    }

    let date_cell = cell(row, columns.date);
    let time_cell = cell(row, columns.time);

    if let Some(date) = parse_date(date_cell) {
        let time = parse_time(time_cell).unwrap_or(NaiveTime::MIN);
        return Some(date.and_time(time));
    }
    // Some exports put the full timestamp in the date column.
    if let Some(at) = parse_datetime(date_cell) {
        return Some(at);
    }
    // Others swap the date and time columns.
    if let (Some(date), Some(time)) = (parse_date(time_cell), parse_time(date_cell)) {
        return Some(date.and_time(time));
    }
    None
}

fn balance_from_metadata(metadata: &[Vec<String>], labels: &[&str]) -> Option<Money> {
    for row in metadata {
        for (idx, raw) in row.iter().enumerate() {
            let normalized = normalize_text(raw);
            if !labels.iter().any(|l| normalized.contains(l)) {
                continue;
            }
            if let Some((_, tail)) = raw.split_once(':') {
                if let Ok(Some(v)) = parse_amount(tail) {
                    return Some(v);
                }
            }
            if let Some(v) = row[idx + 1..].iter().find_map(|c| parse_amount(c).ok().flatten()) {
                return Some(v);
            }
        }
    }
    None
}

fn chronological(transactions: &[StatementRow]) -> Vec<&StatementRow> {
    let mut ordered: Vec<&StatementRow> = transactions.iter().collect();
    ordered.sort_by_key(|t| t.effective_at);
    ordered
}

fn derive_opening(transactions: &[StatementRow]) -> Option<Money> {
    let first = *chronological(transactions).first()?;
    let balance = first.balance?;
    Some(balance - first.credit.unwrap_or_default() + first.debit.unwrap_or_default())
}

fn derive_closing(transactions: &[StatementRow]) -> Option<Money> {
    chronological(transactions).last()?.balance
}
