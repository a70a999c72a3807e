//! Identity types and the identity-provider seam.
//!
//! DESIGN
//! ======
//! The identity provider is an external service that owns every identity.
//! This crate only holds read-only `Identity` snapshots and talks to the
//! provider through the `IdentityProvider` trait, which keeps the guest and
//! session logic testable against `MemoryIdentityProvider`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// =============================================================================
// IDENTITY
// =============================================================================

/// Snapshot of a provider-owned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-assigned unique id. Preserved across linking.
    pub id: String,
    /// Email address, absent for guests.
    pub email: Option<String>,
    /// True for guest identities with no credential attached.
    pub is_anonymous: bool,
}

impl Identity {
    /// True when this identity carries a permanent credential.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_anonymous
    }
}

/// Third-party sign-in providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalProvider {
    Google,
}

impl ExternalProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

/// Credential used to link a guest identity to a permanent one.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    EmailPassword { email: String, password: String },
    External(ExternalProvider),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmailPassword { email, .. } => f
                .debug_struct("EmailPassword")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Self::External(kind) => f.debug_tuple("External").field(kind).finish(),
        }
    }
}

// =============================================================================
// PROVIDER ERRORS
// =============================================================================

/// Failure categories reported by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    EmailAlreadyInUse,
    CredentialAlreadyInUse,
    InvalidCredential,
    WeakPassword,
    UserNotFound,
    ExternalAccountUnavailable,
    Network,
    Internal,
}

/// Error returned by the identity provider. The message is shown to users
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

/// Stream of identity-change notifications. `None` means signed out.
///
/// Dropping the receiver unsubscribes.
pub type IdentityChanges = mpsc::UnboundedReceiver<Option<Identity>>;

/// Operations this crate needs from an identity provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The identity the provider currently considers active.
    fn current_identity(&self) -> Option<Identity>;

    /// Subscribe to identity changes. The current state is delivered first,
    /// then one notification per change, in emission order.
    fn subscribe(&self) -> IdentityChanges;

    /// Create a permanent identity and make it active.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the email is taken or the password is rejected.
    async fn create_permanent_identity(&self, email: &str, password: &str) -> Result<Identity, ProviderError>;

    /// Sign in with an existing permanent identity.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] on unknown email or wrong password.
    async fn sign_in_with_permanent_identity(&self, email: &str, password: &str)
    -> Result<Identity, ProviderError>;

    /// Create a fresh anonymous identity and make it active.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider refuses.
    async fn create_anonymous_identity(&self) -> Result<Identity, ProviderError>;

    /// Sign in through a third-party provider.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the external sign-in fails.
    async fn sign_in_with_external_provider(&self, kind: ExternalProvider) -> Result<Identity, ProviderError>;

    /// Attach a credential to an existing identity, keeping its id.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the credential belongs to another identity.
    async fn link_identity(&self, existing: &Identity, credential: Credential) -> Result<Identity, ProviderError>;

    /// Permanently delete an identity.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the identity does not exist.
    async fn delete_identity(&self, identity: &Identity) -> Result<(), ProviderError>;

    /// Clear the active identity.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider refuses.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Send a password-reset email.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] on delivery failure.
    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    /// Replace the password of an identity.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the password is rejected.
    async fn change_password(&self, identity: &Identity, new_password: &str) -> Result<(), ProviderError>;

    /// Send an email-verification message that returns the user to `return_url`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the identity has no email or delivery fails.
    async fn send_email_verification(&self, identity: &Identity, return_url: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
