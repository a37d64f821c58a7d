//! FIFO allocation of received money across a house's open invoices.
//!
//! Pure functions: the caller loads outstanding balances, this module decides
//! how much lands on which invoice, and the caller persists the result.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::InvoiceId;
use crate::money::Money;

/// An invoice as seen by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoice {
    pub id: InvoiceId,
    pub due_date: NaiveDate,
    pub outstanding: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Exactly one open invoice whose balance equals the amount.
    ExactMatch,
    Fifo,
    /// The operator named the invoice.
    Explicit,
    /// Nothing outstanding; the ledger entry is posted with no allocations.
    NoOutstanding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub invoice_id: InvoiceId,
    pub amount: Money,
    /// The allocation clears the invoice's remaining balance.
    pub settles: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub strategy: AllocationStrategy,
    pub allocations: Vec<Allocation>,
    /// Over-payment left on the ledger entry. No credit note is generated.
    pub unallocated: Money,
}

impl AllocationPlan {
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// Walks invoices oldest-due-first (ties broken by id) taking
/// `min(remaining, outstanding)` from each until the money runs out.
///
/// Returns the allocations and the unallocated remainder.
pub fn allocate_fifo(amount: Money, invoices: &[OpenInvoice]) -> (Vec<Allocation>, Money) {
    let mut ordered: Vec<OpenInvoice> = invoices.to_vec();
    ordered.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));

    let mut remaining = amount;
    let mut allocations = Vec::new();

    for inv in ordered {
        if !remaining.is_positive() {
            break;
        }
        if !inv.outstanding.is_positive() {
            continue;
        }
        let take = remaining.min(inv.outstanding);
        allocations.push(Allocation {
            invoice_id: inv.id,
            amount: take,
            settles: take == inv.outstanding,
        });
        remaining -= take;
    }

    (allocations, remaining)
}

/// Chooses the target invoices when the operator did not name one.
pub fn plan_auto(amount: Money, invoices: &[OpenInvoice], tolerance: Money) -> AllocationPlan {
    let open: Vec<OpenInvoice> = invoices
        .iter()
        .copied()
        .filter(|i| i.outstanding.is_positive())
        .collect();

    if open.is_empty() {
        return AllocationPlan {
            strategy: AllocationStrategy::NoOutstanding,
            allocations: Vec::new(),
            unallocated: amount,
        };
    }

    let strategy = if open.len() == 1 && open[0].outstanding.within(amount, tolerance) {
        AllocationStrategy::ExactMatch
    } else {
        AllocationStrategy::Fifo
    };
    let (allocations, unallocated) = allocate_fifo(amount, &open);
    AllocationPlan {
        strategy,
        allocations,
        unallocated,
    }
}

/// Applies the amount to one named invoice; any excess stays unallocated.
pub fn plan_explicit(amount: Money, invoice: OpenInvoice) -> AllocationPlan {
    let (allocations, unallocated) = allocate_fifo(amount, &[invoice]);
    AllocationPlan {
        strategy: AllocationStrategy::Explicit,
        allocations,
        unallocated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(id: i64, month: u32, outstanding: i64) -> OpenInvoice {
        OpenInvoice {
            id: InvoiceId(id),
            due_date: NaiveDate::from_ymd_opt(2026, month, 5).unwrap(),
            outstanding: Money::from_cents(outstanding),
        }
    }

    fn baht(b: i64) -> Money {
        Money::from_cents(b * 100)
    }

    #[test]
    fn fifo_spreads_over_three_invoices() {
        // 1,400 over three 600 invoices: Jan and Feb settle, Mar gets 200.
        let invoices = [inv(3, 3, 60_000), inv(1, 1, 60_000), inv(2, 2, 60_000)];
        let (allocs, rest) = allocate_fifo(baht(1_400), &invoices);
        assert_eq!(allocs.len(), 3);
        assert_eq!(allocs[0].invoice_id, InvoiceId(1));
        assert_eq!(allocs[0].amount, baht(600));
        assert!(allocs[0].settles);
        assert_eq!(allocs[1].invoice_id, InvoiceId(2));
        assert!(allocs[1].settles);
        assert_eq!(allocs[2].invoice_id, InvoiceId(3));
        assert_eq!(allocs[2].amount, baht(200));
        assert!(!allocs[2].settles);
        assert_eq!(rest, Money::zero());
    }

    #[test]
    fn fifo_skips_zero_outstanding() {
        let invoices = [inv(1, 1, 0), inv(2, 2, 30_000)];
        let (allocs, rest) = allocate_fifo(baht(100), &invoices);
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].invoice_id, InvoiceId(2));
        assert_eq!(rest, Money::zero());
    }

    #[test]
    fn fifo_leaves_overpayment_unallocated() {
        let invoices = [inv(1, 1, 60_000)];
        let (allocs, rest) = allocate_fifo(baht(1_000), &invoices);
        assert_eq!(allocs[0].amount, baht(600));
        assert_eq!(rest, baht(400));
    }

    #[test]
    fn fifo_breaks_due_date_ties_by_id() {
        let invoices = [inv(9, 1, 60_000), inv(4, 1, 60_000)];
        let (allocs, _) = allocate_fifo(baht(600), &invoices);
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].invoice_id, InvoiceId(4));
    }

    #[test]
    fn allocation_never_exceeds_amount_or_outstanding() {
        let invoices = [inv(1, 1, 12_345), inv(2, 2, 99_999), inv(3, 3, 1)];
        for cents in [0, 1, 12_345, 50_000, 112_345, 500_000] {
            let amount = Money::from_cents(cents);
            let (allocs, rest) = allocate_fifo(amount, &invoices);
            let total: Money = allocs.iter().map(|a| a.amount).sum();
            assert!(total <= amount);
            assert_eq!(total + rest, amount);
            for a in &allocs {
                let open = invoices.iter().find(|i| i.id == a.invoice_id).unwrap();
                assert!(a.amount <= open.outstanding);
            }
        }
    }

    #[test]
    fn auto_plan_detects_single_exact_match() {
        let plan = plan_auto(baht(600), &[inv(1, 1, 60_000)], Money::from_cents(1));
        assert_eq!(plan.strategy, AllocationStrategy::ExactMatch);
        assert_eq!(plan.allocated(), baht(600));
        assert_eq!(plan.unallocated, Money::zero());
    }

    #[test]
    fn auto_plan_falls_back_to_fifo() {
        let plan = plan_auto(baht(500), &[inv(1, 1, 60_000)], Money::from_cents(1));
        assert_eq!(plan.strategy, AllocationStrategy::Fifo);
        assert_eq!(plan.allocated(), baht(500));
    }

    #[test]
    fn auto_plan_without_open_invoices_allocates_nothing() {
        let plan = plan_auto(baht(500), &[inv(1, 1, 0)], Money::from_cents(1));
        assert_eq!(plan.strategy, AllocationStrategy::NoOutstanding);
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.unallocated, baht(500));
    }

    #[test]
    fn explicit_plan_caps_at_outstanding() {
        let plan = plan_explicit(baht(900), inv(7, 2, 60_000));
        assert_eq!(plan.strategy, AllocationStrategy::Explicit);
        assert_eq!(plan.allocations[0].amount, baht(600));
        assert_eq!(plan.unallocated, baht(300));
    }
}
