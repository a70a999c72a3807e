//! Error taxonomy for authentication actions.
//!
//! Provider and storage failures propagate to the initiating action unchanged.
//! Nothing in this crate retries; `retryable` only advises the caller.

use crate::identity::{ProviderError, ProviderErrorKind};
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Password and confirmation differ. Raised before any provider call.
    #[error("Passwords do not match!")]
    PasswordMismatch,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("guest record storage failed: {0}")]
    Persistence(#[from] StorageError),

    /// Another authentication action is already in flight.
    #[error("another authentication action is in progress")]
    Busy,

    #[error("authentication action cancelled")]
    Cancelled,

    #[error("no signed-in identity")]
    NoActiveIdentity,
}

impl AuthError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PasswordMismatch => "E_PASSWORD_MISMATCH",
            Self::Provider(_) => "E_PROVIDER",
            Self::Persistence(_) => "E_PERSISTENCE",
            Self::Busy => "E_BUSY",
            Self::Cancelled => "E_CANCELLED",
            Self::NoActiveIdentity => "E_NO_ACTIVE_IDENTITY",
        }
    }

    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Provider(ProviderError { kind: ProviderErrorKind::Network, .. }))
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
