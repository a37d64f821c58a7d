pub mod accounts;
pub mod db;
pub mod error;
pub mod invoices;
pub mod matching;
pub mod payins;
pub mod policy;
pub mod posting;
pub mod statements;

pub use accounts::{
    create_bank_account, create_house, get_bank_account, get_house, list_bank_accounts, list_houses,
    set_bank_account_active,
};
pub use db::{create_db, create_memory_db, DbPool};
pub use error::{StoreError, StoreResult};
pub use invoices::{
    apply_credit, cancel_invoice, create_invoice, get_income_transaction, get_invoice, list_allocations,
    list_house_income, list_house_invoices, list_invoice_payments, outstanding_invoices,
};
pub use matching::{candidates_for_bank_transaction, candidates_for_payin, match_transaction, unmatch, MatchOutcome};
pub use payins::{
    create_payin, delete_payin, get_payin, list_house_payins, list_review_queue, reject_payin, submit_payin,
    update_payin,
};
pub use policy::Policy;
pub use posting::{accept_payin, confirm_and_post, reverse, PostingOutcome, PostingResult, ReversalOutcome, ReversalResult};
pub use statements::{
    confirm_import, delete_batch, get_bank_transaction, get_batch, list_batch_transactions, list_batches,
    list_unmatched_credits, preview_import, BatchSummary, ImportPreview, ImportRequest, PreviewRow,
};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use estate_core::{
        BankTransactionId, HouseId, LockedMonths, MatchingConfig, Money, PayinDraft, PayinSource, StatementMonth,
        UserId,
    };

    use crate::{create_bank_account, create_house, create_memory_db, DbPool, ImportRequest, Policy};

    pub struct Fixture {
        pub pool: DbPool,
        pub policy: Policy,
        pub house: HouseId,
        pub operator: UserId,
    }

    pub async fn fixture() -> Fixture {
        let pool = create_memory_db().await.unwrap();
        let house = create_house(&pool, "12/1").await.unwrap();
        Fixture {
            pool,
            policy: Policy::default(),
            house: house.id,
            operator: UserId(900),
        }
    }

    /// A fixture on a file-backed pool with several connections, for tests
    /// that need real write-lock contention.
    pub async fn file_fixture() -> (tempfile::TempDir, Fixture) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::create_db(&dir.path().join("estate.db"), 4).await.unwrap();
        let house = create_house(&pool, "12/1").await.unwrap();
        let fx = Fixture {
            pool,
            policy: Policy::default(),
            house: house.id,
            operator: UserId(900),
        };
        (dir, fx)
    }

    pub fn baht(b: i64) -> Money {
        Money::from_cents(b * 100)
    }

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A resident pay-in dated 2026-01-15.
    pub fn draft(house: HouseId, amount: Money, hour: u32, minute: u32) -> PayinDraft {
        PayinDraft {
            house_id: house,
            amount,
            transfer_date: day(2026, 1, 15),
            transfer_hour: hour,
            transfer_minute: minute,
            evidence_ref: Some("slip.jpg".to_string()),
            source: PayinSource::Resident,
        }
    }

    /// January 2026 is closed.
    pub fn locked_policy() -> Policy {
        let locks = LockedMonths::new(StatementMonth::new(2026, 1));
        Policy::new(MatchingConfig::default(), Arc::new(locks))
    }

    /// Imports a January 2026 statement under a fresh account, one row per
    /// `(withdrawal, deposit, time)` on 15/01/2026, and returns the row ids in
    /// statement order.
    pub async fn import_rows(fx: &Fixture, rows: &[(&str, &str, &str)]) -> Vec<BankTransactionId> {
        let account = create_bank_account(&fx.pool, "SCB", "xxx-x-x9999-x", None).await.unwrap();
        let mut csv = String::from("Date,Time,Description,Withdrawal,Deposit\n");
        for (i, (debit, credit, time)) in rows.iter().enumerate() {
            csv.push_str(&format!("15/01/2026,{time},Row {i},{debit},{credit}\n"));
        }
        let request = ImportRequest {
            bank_account_id: account.id,
            year: 2026,
            month: 1,
            source_filename: "test.csv".to_string(),
            uploaded_by: None,
        };
        let summary = crate::confirm_import(&fx.pool, &request, &csv).await.unwrap();
        let txns = crate::list_batch_transactions(&fx.pool, summary.batch.id).await.unwrap();
        txns.iter().map(|t| t.id).collect()
    }

    pub async fn import_credits(fx: &Fixture, credits: &[(&str, &str)]) -> Vec<BankTransactionId> {
        let rows: Vec<(&str, &str, &str)> = credits.iter().map(|&(amount, time)| ("", amount, time)).collect();
        import_rows(fx, &rows).await
    }

    pub async fn import_credit(fx: &Fixture, amount: &str, time: &str) -> BankTransactionId {
        import_credits(fx, &[(amount, time)]).await[0]
    }

    pub async fn import_debit(fx: &Fixture, amount: &str, time: &str) -> BankTransactionId {
        import_rows(fx, &[(amount, "", time)]).await[0]
    }
}
