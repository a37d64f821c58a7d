use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use estate_core::{DomainError, MatchingConfig, NoPeriodLocks, PeriodLock};
use estate_import::AutoMatchEngine;

/// Deployment knobs consulted by the write paths: matching tolerances and
/// the period-lock collaborator.
#[derive(Clone)]
pub struct Policy {
    pub matching: MatchingConfig,
    pub locks: Arc<dyn PeriodLock>,
}

impl Policy {
    pub fn new(matching: MatchingConfig, locks: Arc<dyn PeriodLock>) -> Self {
        Self { matching, locks }
    }

    pub fn engine(&self) -> AutoMatchEngine {
        AutoMatchEngine::from_config(&self.matching)
    }

    pub(crate) fn ensure_open(&self, date: NaiveDate) -> Result<(), DomainError> {
        if self.locks.is_period_locked(date) {
            return Err(DomainError::PeriodLocked(date));
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(MatchingConfig::default(), Arc::new(NoPeriodLocks))
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("matching", &self.matching)
            .finish_non_exhaustive()
    }
}
