use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use estate_core::Money;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})$").unwrap());
static DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4}|\d{2})$").unwrap());
static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[:.](\d{2})(?:[:.](\d{2})(?:\.\d+)?)?$").unwrap());

const NAMED_MONTH_FORMATS: &[&str] = &["%d %b %Y", "%d-%b-%Y", "%d %B %Y", "%b %d, %Y", "%d-%b-%y"];

/// Buddhist-era years run 543 ahead of the Gregorian calendar.
const BUDDHIST_ERA_OFFSET: i32 = 543;

const CURRENCY_TOKENS: &[&str] = &["thb", "บาท", "฿", "$", "baht"];

/// Collapses runs of whitespace (including newlines inside quoted cells)
/// and lowercases.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// Parses a money cell. Blank cells and dash placeholders are `Ok(None)`;
/// anything that is not a number is `Err` with the original text.
///
/// Tolerates thousands separators, currency markers, `(1,234.00)` and
/// trailing-minus negatives, and a decimal comma when no point is present.
pub fn parse_amount(s: &str) -> Result<Option<Money>, String> {
    let original = s;
    let mut s = s.trim().to_lowercase();
    for token in CURRENCY_TOKENS {
        s = s.replace(token, "");
    }
    let s = s.trim();
    if s.is_empty() || s == "-" || s == "–" {
        return Ok(None);
    }

    let (mut negative, s) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };
    let mut s = s.trim().to_string();
    if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest.trim().to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim().to_string();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.trim().to_string();
    }

    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.' || c == ' ') {
        return Err(original.to_string());
    }
    let s: String = s.chars().filter(|c| *c != ' ').collect();
    let normalized = normalize_separators(&s);

    let mut dec = Decimal::from_str(&normalized).map_err(|_| original.to_string())?;
    if negative {
        dec = -dec;
    }
    let money = Money::from_decimal(dec);
    money.to_cents().map_err(|_| original.to_string())?;
    Ok(Some(money))
}

/// Resolves which of `,` and `.` is the decimal separator.
fn normalize_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(c), Some(p)) if c > p => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(c), None) => {
            let tail = &s[c + 1..];
            if tail.len() == 3 || s.matches(',').count() > 1 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        (None, _) => s.to_string(),
    }
}

/// Parses a date cell in the day-first or ISO layouts Thai banks export.
/// Buddhist-era years are converted to Gregorian.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_end_matches(',');
    if s.is_empty() {
        return None;
    }

    if let Some(c) = ISO_DATE.captures(s) {
        return build_date(num(&c[1])?, num(&c[2])?, num(&c[3])?);
    }
    if let Some(c) = DMY_DATE.captures(s) {
        let year = expand_year(&c[3])?;
        return build_date(year, num(&c[2])?, num(&c[1])?);
    }
    for fmt in NAMED_MONTH_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return from_buddhist_era(date);
        }
    }
    None
}

fn num<T: FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

fn expand_year(s: &str) -> Option<i32> {
    let y: i32 = num(s)?;
    if s.len() == 4 {
        return Some(y);
    }
    // Two-digit years: small values are Gregorian (26 -> 2026), large ones
    // are short Buddhist-era years (69 -> 2569).
    Some(if y < 40 { 2000 + y } else { 2500 + y })
}

fn build_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let year = if year > 2400 { year - BUDDHIST_ERA_OFFSET } else { year };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn from_buddhist_era(date: NaiveDate) -> Option<NaiveDate> {
    if date.year() > 2400 {
        date.with_year(date.year() - BUDDHIST_ERA_OFFSET)
    } else {
        Some(date)
    }
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let c = CLOCK.captures(s.trim())?;
    let secs = c.get(3).map_or(Some(0), |m| num(m.as_str()))?;
    NaiveTime::from_hms_opt(num(&c[1])?, num(&c[2])?, secs)
}

/// Parses a combined date-time cell; a bare date yields midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Some(date) = parse_date(s) {
        return Some(date.and_time(NaiveTime::MIN));
    }
    if let Some((date, time)) = s.rsplit_once(char::is_whitespace) {
        if let (Some(d), Some(t)) = (parse_date(date), parse_time(time)) {
            return Some(d.and_time(t));
        }
    }
    if let Some((date, time)) = s.split_once('T') {
        if let (Some(d), Some(t)) = (parse_date(date), parse_time(time)) {
            return Some(d.and_time(t));
        }
    }
    None
}
