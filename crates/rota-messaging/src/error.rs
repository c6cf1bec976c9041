use rota_store::{CoverageStatus, StoreError};
use thiserror::Error;

/// Result type for messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;

/// Errors surfaced to callers of the messaging pipeline.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Rejected before any write was attempted.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("record store failure: {0}")]
    TransientStore(#[from] StoreError),
    /// The communication status was updated but the shift request status was not.
    #[error(
        "response applied to communication '{communication_id}' but not to shift request '{shift_request_id}': {source}"
    )]
    InconsistentResponse {
        communication_id: String,
        shift_request_id: String,
        #[source]
        source: StoreError,
    },
    #[error("invalid coverage transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: Option<CoverageStatus>,
        to: CoverageStatus,
    },
}

impl MessagingError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStore(_) | Self::InconsistentResponse { .. }
        )
    }
}

/// A shift-coverage communication was stored without its linked request.
///
/// Never returned as an error; it is logged and carried on the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("communication '{communication_id}' stored without a shift coverage request after {attempts} attempts: {reason}")]
pub struct PartialWriteError {
    pub communication_id: String,
    pub attempts: u32,
    pub reason: String,
}

pub(crate) fn require_non_blank(field: &'static str, value: &str) -> MessagingResult<()> {
    if value.trim().is_empty() {
        return Err(MessagingError::validation(field, "must not be blank"));
    }
    Ok(())
}
