use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

row_id!(
    BankAccountId,
    BatchId,
    BankTransactionId,
    PayinId,
    HouseId,
    InvoiceId,
    IncomeTransactionId,
    InvoicePaymentId,
    /// Acting user as supplied by the identity service.
    UserId,
);
