pub mod allocation;
pub mod bank;
pub mod config;
pub mod error;
pub mod ids;
pub mod invoice;
pub mod ledger;
pub mod money;
pub mod payin;
pub mod period;
pub mod status;

pub use allocation::{Allocation, AllocationPlan, AllocationStrategy, OpenInvoice};
pub use bank::{BankAccount, BankTransaction, StatementBatch};
pub use config::{MatchingConfig, PeriodConfig};
pub use error::{DomainError, ErrorClass};
pub use ids::{
    BankAccountId, BankTransactionId, BatchId, HouseId, IncomeTransactionId, InvoiceId,
    InvoicePaymentId, PayinId, UserId,
};
pub use invoice::{House, Invoice};
pub use ledger::{IncomeTransaction, InvoicePayment};
pub use money::Money;
pub use payin::{PayinDraft, PayinReport};
pub use period::{DateRange, LockedMonths, NoPeriodLocks, PeriodLock, StatementMonth};
pub use status::{
    BatchStatus, InvoiceStatus, LedgerStatus, ParseStatusError, PaymentStatus, PayinSource,
    PayinStatus, PostingStatus,
};
