use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::ids::{
    BankTransactionId, HouseId, IncomeTransactionId, InvoiceId, InvoicePaymentId, PayinId, UserId,
};
use crate::money::Money;
use crate::status::{LedgerStatus, PaymentStatus};

/// Ledger entry for money received. Never deleted; reversal flips the
/// status and stamps the audit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeTransaction {
    pub id: IncomeTransactionId,
    pub house_id: HouseId,
    pub payin_id: Option<PayinId>,
    pub bank_transaction_id: Option<BankTransactionId>,
    pub amount: Money,
    pub received_at: NaiveDateTime,
    pub status: LedgerStatus,
    pub created_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub reversed_by: Option<UserId>,
    pub reversed_at: Option<NaiveDateTime>,
    pub reversal_reason: Option<String>,
}

/// One slice of a ledger entry applied to one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: InvoicePaymentId,
    pub invoice_id: InvoiceId,
    pub income_transaction_id: IncomeTransactionId,
    pub amount: Money,
    /// The slice cleared the invoice's outstanding balance when it was posted.
    pub settles: bool,
    pub status: PaymentStatus,
    pub created_at: NaiveDateTime,
    pub reversed_at: Option<NaiveDateTime>,
}
