use thiserror::Error;

use enquote_core::errors::EntityKind;
use enquote_core::store::StoreError;

mod audit;
mod codec;
mod quotation;
mod reference;

pub use quotation::SqlQuotationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} {id} changed concurrently: {detail}")]
    Conflict { entity: EntityKind, id: String, detail: String },
    #[error("quote number {0} is already in use")]
    DuplicateQuoteNumber(String),
}

impl RepositoryError {
    pub(crate) fn decode(error: impl std::fmt::Display) -> Self {
        Self::Decode(error.to_string())
    }

    pub(crate) fn conflict(
        entity: EntityKind,
        id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Conflict { entity, id: id.into(), detail: detail.into() }
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { entity, id, detail } => {
                StoreError::Conflict { entity, id, detail }
            }
            RepositoryError::DuplicateQuoteNumber(number) => {
                StoreError::DuplicateQuoteNumber(number)
            }
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Backend(format!("decode: {message}")),
        }
    }
}

/// Message of a unique-constraint violation, if that is what `error` is.
pub(crate) fn unique_violation(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(database) if database.is_unique_violation() => {
            Some(database.message().to_string())
        }
        _ => None,
    }
}
