use estate_core::{DomainError, ParseStatusError};
use estate_import::{BatchValidation, ParseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("statement failed validation: {0}")]
    Validation(BatchValidation),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

impl From<ParseStatusError> for StoreError {
    fn from(e: ParseStatusError) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

impl StoreError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
