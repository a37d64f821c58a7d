//! Header detection for bank statement exports.
//!
//! Each column kind has a list of English and Thai synonyms. A header cell
//! scores 3 for an exact synonym, 2 when it starts with one and 1 when it
//! merely contains one; cells are then assigned greedily, best score first.

use serde::{Deserialize, Serialize};

use crate::util::normalize_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    DateTime,
    Date,
    Time,
    Description,
    Debit,
    Credit,
    Balance,
    Channel,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 8] = [
        ColumnKind::DateTime,
        ColumnKind::Date,
        ColumnKind::Time,
        ColumnKind::Description,
        ColumnKind::Debit,
        ColumnKind::Credit,
        ColumnKind::Balance,
        ColumnKind::Channel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::DateTime => "datetime",
            ColumnKind::Date => "date",
            ColumnKind::Time => "time",
            ColumnKind::Description => "description",
            ColumnKind::Debit => "debit",
            ColumnKind::Credit => "credit",
            ColumnKind::Balance => "balance",
            ColumnKind::Channel => "channel",
        }
    }

    fn synonyms(self) -> &'static [&'static str] {
        match self {
            ColumnKind::DateTime => &[
                "date/time",
                "date time",
                "datetime",
                "transaction date/time",
                "วันที่/เวลา",
                "วันที่และเวลา",
                "วัน/เวลา",
            ],
            ColumnKind::Date => &[
                "date",
                "transaction date",
                "trans date",
                "posting date",
                "value date",
                "effective date",
                "วันที่",
                "วันที่ทำรายการ",
                "วันที่มีผล",
            ],
            ColumnKind::Time => &["time", "transaction time", "trans time", "เวลา", "เวลาทำรายการ"],
            ColumnKind::Description => &[
                "description",
                "details",
                "detail",
                "transaction",
                "transactions",
                "particulars",
                "narrative",
                "remark",
                "remarks",
                "memo",
                "รายการ",
                "รายละเอียด",
                "คำอธิบาย",
            ],
            ColumnKind::Debit => &[
                "debit",
                "withdrawal",
                "withdrawals",
                "withdraw",
                "money out",
                "paid out",
                "ถอน",
                "ถอนเงิน",
                "เดบิต",
                "จ่าย",
            ],
            ColumnKind::Credit => &[
                "credit",
                "deposit",
                "deposits",
                "money in",
                "paid in",
                "ฝาก",
                "ฝากเงิน",
                "เครดิต",
                "รับ",
            ],
            ColumnKind::Balance => &[
                "balance",
                "outstanding balance",
                "running balance",
                "ledger balance",
                "คงเหลือ",
                "ยอดคงเหลือ",
                "ยอดเงินคงเหลือ",
            ],
            ColumnKind::Channel => &[
                "channel",
                "branch",
                "service",
                "via",
                "ช่องทาง",
                "สาขา",
                "ช่องทางการทำรายการ",
            ],
        }
    }

    /// 3 exact, 2 prefix, 1 substring, 0 no match.
    fn score(self, normalized_cell: &str) -> u8 {
        if normalized_cell.is_empty() {
            return 0;
        }
        let mut best = 0;
        for syn in self.synonyms() {
            let s = if normalized_cell == *syn {
                3
            } else if normalized_cell.starts_with(syn) {
                2
            } else if normalized_cell.contains(syn) {
                1
            } else {
                0
            };
            best = best.max(s);
        }
        best
    }
}

/// Column positions found in a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub datetime: Option<usize>,
    pub date: Option<usize>,
    pub time: Option<usize>,
    pub description: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub balance: Option<usize>,
    pub channel: Option<usize>,
}

impl ColumnMap {
    pub fn detect(row: &[String]) -> Self {
        let cells: Vec<String> = row.iter().map(|c| normalize_text(c)).collect();

        let mut scored: Vec<(u8, usize, ColumnKind)> = Vec::new();
        for (idx, cell) in cells.iter().enumerate() {
            for kind in ColumnKind::ALL {
                let s = kind.score(cell);
                if s > 0 {
                    scored.push((s, idx, kind));
                }
            }
        }
        // Highest score wins; ties go to the leftmost cell, then kind order.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut map = ColumnMap::default();
        let mut used = vec![false; cells.len()];
        for (_, idx, kind) in scored {
            if used[idx] || map.get(kind).is_some() {
                continue;
            }
            map.set(kind, idx);
            used[idx] = true;
        }
        map
    }

    pub fn get(&self, kind: ColumnKind) -> Option<usize> {
        match kind {
            ColumnKind::DateTime => self.datetime,
            ColumnKind::Date => self.date,
            ColumnKind::Time => self.time,
            ColumnKind::Description => self.description,
            ColumnKind::Debit => self.debit,
            ColumnKind::Credit => self.credit,
            ColumnKind::Balance => self.balance,
            ColumnKind::Channel => self.channel,
        }
    }

    fn set(&mut self, kind: ColumnKind, idx: usize) {
        let slot = match kind {
            ColumnKind::DateTime => &mut self.datetime,
            ColumnKind::Date => &mut self.date,
            ColumnKind::Time => &mut self.time,
            ColumnKind::Description => &mut self.description,
            ColumnKind::Debit => &mut self.debit,
            ColumnKind::Credit => &mut self.credit,
            ColumnKind::Balance => &mut self.balance,
            ColumnKind::Channel => &mut self.channel,
        };
        *slot = Some(idx);
    }

    /// A header needs a date, a description and at least one amount column.
    pub fn qualifies(&self) -> bool {
        (self.datetime.is_some() || self.date.is_some())
            && self.description.is_some()
            && (self.debit.is_some() || self.credit.is_some())
    }

    pub fn detected(&self) -> Vec<String> {
        ColumnKind::ALL
            .iter()
            .filter(|k| self.get(**k).is_some())
            .map(|k| k.as_str().to_string())
            .collect()
    }

    pub fn detected_count(&self) -> usize {
        ColumnKind::ALL.iter().filter(|k| self.get(**k).is_some()).count()
    }
}

/// Column names reported when no header row qualifies.
pub fn expected_columns() -> Vec<String> {
    vec![
        "date or datetime".to_string(),
        "description".to_string(),
        "debit or credit".to_string(),
    ]
}
