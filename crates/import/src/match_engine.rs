use chrono::{Duration, NaiveDateTime};
use estate_core::{DomainError, MatchingConfig, Money};
use serde::Serialize;

/// Either side of a bank-credit/pay-in pair, reduced to what matching
/// compares.
#[derive(Debug, Clone, Copy)]
pub struct MatchableTransaction {
    pub id: i64,
    pub at: NaiveDateTime,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchCandidate {
    pub id: i64,
    pub at: NaiveDateTime,
    pub amount: Money,
    pub seconds_apart: i64,
    pub amount_difference: Money,
}

/// Pairs a bank credit with a pay-in when amounts agree within
/// `amount_tolerance` and timestamps within `time_tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct AutoMatchEngine {
    pub amount_tolerance: Money,
    pub time_tolerance: Duration,
}

impl Default for AutoMatchEngine {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl AutoMatchEngine {
    pub fn new(amount_tolerance: Money, time_tolerance: Duration) -> Self {
        Self {
            amount_tolerance,
            time_tolerance,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.amount_tolerance(), config.time_tolerance())
    }

    /// Checks amount first, then time. Returns the gap in seconds on success.
    pub fn check_pair(
        &self,
        bank: &MatchableTransaction,
        payin: &MatchableTransaction,
    ) -> Result<i64, DomainError> {
        if !bank.amount.within(payin.amount, self.amount_tolerance) {
            return Err(DomainError::AmountMismatch {
                bank: bank.amount,
                payin: payin.amount,
            });
        }
        let seconds = seconds_apart(bank.at, payin.at);
        if seconds > self.time_tolerance.num_seconds() {
            return Err(DomainError::TimeMismatch { seconds });
        }
        Ok(seconds)
    }

    /// Everything in `pool` that would pass [`check_pair`](Self::check_pair)
    /// against `target`, closest in time first, then by id.
    pub fn candidates(
        &self,
        target: &MatchableTransaction,
        pool: &[MatchableTransaction],
    ) -> Vec<MatchCandidate> {
        let mut found: Vec<MatchCandidate> = pool
            .iter()
            .filter_map(|other| {
                let seconds = self.check_pair(target, other).ok()?;
                Some(MatchCandidate {
                    id: other.id,
                    at: other.at,
                    amount: other.amount,
                    seconds_apart: seconds,
                    amount_difference: target.amount.abs_diff(other.amount),
                })
            })
            .collect();
        found.sort_by(|a, b| a.seconds_apart.cmp(&b.seconds_apart).then(a.id.cmp(&b.id)));
        found
    }
}

fn seconds_apart(a: NaiveDateTime, b: NaiveDateTime) -> i64 {
    (a - b).num_seconds().abs()
}
