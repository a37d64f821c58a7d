use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::ids::{HouseId, InvoiceId};
use crate::money::Money;
use crate::status::InvoiceStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct House {
    pub id: HouseId,
    pub house_number: String,
}

/// A billing obligation for one house for one cycle.
///
/// `paid` and `credited` are aggregates over ACTIVE allocations and credits;
/// they are loaded alongside the row rather than stored on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub house_id: HouseId,
    pub cycle: String,
    pub total: Money,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub paid: Money,
    pub credited: Money,
    pub created_at: NaiveDateTime,
}

impl Invoice {
    pub fn outstanding(&self) -> Money {
        outstanding(self.total, self.paid, self.credited)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }
}

pub fn outstanding(total: Money, paid: Money, credited: Money) -> Money {
    total.saturating_sub(paid + credited)
}

/// Status follows from the totals; it is never set directly.
pub fn derive_status(total: Money, paid: Money, credited: Money, cancelled: bool) -> InvoiceStatus {
    if cancelled {
        return InvoiceStatus::Cancelled;
    }
    let covered = paid + credited;
    if covered >= total {
        InvoiceStatus::Paid
    } else if covered.is_positive() {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(c: i64) -> Money {
        Money::from_cents(c)
    }

    #[test]
    fn status_from_totals() {
        assert_eq!(derive_status(m(60_000), m(0), m(0), false), InvoiceStatus::Issued);
        assert_eq!(
            derive_status(m(60_000), m(20_000), m(0), false),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(derive_status(m(60_000), m(60_000), m(0), false), InvoiceStatus::Paid);
        assert_eq!(
            derive_status(m(60_000), m(50_000), m(10_000), false),
            InvoiceStatus::Paid
        );
        assert_eq!(
            derive_status(m(60_000), m(60_000), m(0), true),
            InvoiceStatus::Cancelled
        );
    }

    #[test]
    fn outstanding_subtracts_payments_and_credits() {
        assert_eq!(outstanding(m(60_000), m(20_000), m(5_000)), m(35_000));
        assert_eq!(outstanding(m(60_000), m(70_000), m(0)), Money::zero());
    }
}
