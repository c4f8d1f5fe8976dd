use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_utils::ClockError;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("No active practitioner found")]
    NoPractitioner,

    #[error("{0} active practitioners found; set PRACTITIONER_ID to choose one")]
    AmbiguousPractitioner(usize),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SlotError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SlotError::Store(e) if e.is_retryable())
    }
}

impl From<SlotError> for AppError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::Store(store) => store.into(),
            SlotError::Clock(clock) => AppError::ValidationError(clock.to_string()),
            SlotError::Validation(msg) => AppError::ValidationError(msg),
            SlotError::NoPractitioner => AppError::NotFound(e.to_string()),
            SlotError::AmbiguousPractitioner(_) => AppError::ValidationError(e.to_string()),
            SlotError::Catalog(catalog) => AppError::Internal(catalog.to_string()),
        }
    }
}
