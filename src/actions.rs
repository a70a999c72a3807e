//! Authentication actions invoked by the UI.
//!
//! DESIGN
//! ======
//! `AuthActions` is the single entry point for register, sign-in, guest and
//! account-maintenance calls. It owns a single-flight guard: while one action
//! is in flight, every other action fails fast with `AuthError::Busy` and
//! never reaches the provider. The guard is released on drop, so success,
//! failure, cancellation and a dropped future all free it.
//!
//! Every provider call races a `CancellationToken`; a torn-down caller cancels
//! the token instead of leaving the action to finish unobserved.
//!
//! UPGRADES
//! ========
//! Registration and Google sign-in while a guest is active link the guest
//! identity (id preserved) and erase the guest record. Without a guest they
//! create or sign in to a permanent identity normally.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::guest::{Clock, GuestRecordStore, GuestSessionManager};
use crate::identity::{Credential, ExternalProvider, Identity, IdentityProvider, ProviderError};
use crate::storage::KeyValueStore;

/// Await a provider call unless `cancel` fires first.
pub(crate) async fn provider_call<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, AuthError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AuthError::Cancelled),
        result = call => result.map_err(AuthError::from),
    }
}

/// Releases the in-flight flag on drop.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AuthActions {
    provider: Arc<dyn IdentityProvider>,
    guest: GuestSessionManager,
    in_flight: AtomicBool,
    verification_return_url: String,
}

impl AuthActions {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        guest: GuestSessionManager,
        verification_return_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            guest,
            in_flight: AtomicBool::new(false),
            verification_return_url: verification_return_url.into(),
        }
    }

    /// Wire the guest manager and actions from typed config.
    #[must_use]
    pub fn from_config(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &AuthConfig,
    ) -> Self {
        let records = GuestRecordStore::new(store, &config.storage_namespace);
        let guest = GuestSessionManager::new(Arc::clone(&provider), records, clock, config.guest_expiration);
        Self::new(provider, guest, config.verification_return_url.clone())
    }

    /// True while an action holds the single-flight guard.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn guest(&self) -> &GuestSessionManager {
        &self.guest
    }

    fn begin(&self) -> Result<InFlight<'_>, AuthError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| AuthError::Busy)
    }

    fn active_guest(&self) -> Option<Identity> {
        self.provider
            .current_identity()
            .filter(|i| i.is_anonymous)
    }

    fn active_identity(&self) -> Result<Identity, AuthError> {
        self.provider
            .current_identity()
            .ok_or(AuthError::NoActiveIdentity)
    }

    /// Register with email and password, linking the active guest if any.
    ///
    /// # Errors
    ///
    /// [`AuthError::PasswordMismatch`] before any provider call when the
    /// passwords differ; otherwise busy, cancellation, provider or storage errors.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
        cancel: &CancellationToken,
    ) -> Result<Identity, AuthError> {
        if password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        let _guard = self.begin()?;

        let result: Result<Identity, AuthError> = async {
            let Some(guest) = self.active_guest() else {
                let created = provider_call(cancel, self.provider.create_permanent_identity(email, password)).await?;
                info!(id = %created.id, "account created");
                return Ok(created);
            };
            let credential = Credential::EmailPassword { email: email.to_owned(), password: password.to_owned() };
            let linked = provider_call(cancel, self.provider.link_identity(&guest, credential)).await?;
            self.guest.records().erase()?;
            info!(id = %linked.id, "guest linked to email account");
            Ok::<_, AuthError>(linked)
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "email/password registration failed"))
    }

    /// Sign in with email and password. A signed-in guest is replaced, not linked.
    ///
    /// # Errors
    ///
    /// Busy, cancellation or provider errors.
    pub async fn sign_in(&self, email: &str, password: &str, cancel: &CancellationToken) -> Result<Identity, AuthError> {
        let _guard = self.begin()?;
        let identity = provider_call(cancel, self.provider.sign_in_with_permanent_identity(email, password))
            .await
            .inspect_err(|e| error!(error = %e, "sign-in failed"))?;
        info!(id = %identity.id, "signed in");
        Ok(identity)
    }

    /// Sign in with Google, linking the active guest if any.
    ///
    /// # Errors
    ///
    /// Busy, cancellation, provider or storage errors.
    pub async fn sign_in_with_google(&self, cancel: &CancellationToken) -> Result<Identity, AuthError> {
        let _guard = self.begin()?;
        let result: Result<Identity, AuthError> = async {
            let Some(guest) = self.active_guest() else {
                let identity =
                    provider_call(cancel, self.provider.sign_in_with_external_provider(ExternalProvider::Google))
                        .await?;
                info!(id = %identity.id, "signed in with google");
                return Ok(identity);
            };
            let credential = Credential::External(ExternalProvider::Google);
            let linked = provider_call(cancel, self.provider.link_identity(&guest, credential)).await?;
            self.guest.records().erase()?;
            info!(id = %linked.id, "guest linked to google account");
            Ok::<_, AuthError>(linked)
        }
        .await;
        result.inspect_err(|e| error!(error = %e, "google sign-in failed"))
    }

    /// Reuse, replace or create the guest identity.
    ///
    /// # Errors
    ///
    /// Busy, cancellation, provider or storage errors.
    pub async fn ensure_guest_session(&self, cancel: &CancellationToken) -> Result<Identity, AuthError> {
        let _guard = self.begin()?;
        self.guest
            .ensure_guest_session(cancel)
            .await
            .inspect_err(|e| error!(error = %e, "anonymous sign-in failed"))
    }

    /// # Errors
    ///
    /// Busy, cancellation or provider errors.
    pub async fn sign_out(&self, cancel: &CancellationToken) -> Result<(), AuthError> {
        let _guard = self.begin()?;
        provider_call(cancel, self.provider.sign_out())
            .await
            .inspect_err(|e| error!(error = %e, "sign-out failed"))?;
        info!("signed out");
        Ok(())
    }

    /// # Errors
    ///
    /// Busy, cancellation or provider errors.
    pub async fn request_password_reset(&self, email: &str, cancel: &CancellationToken) -> Result<(), AuthError> {
        let _guard = self.begin()?;
        provider_call(cancel, self.provider.request_password_reset(email))
            .await
            .inspect_err(|e| error!(error = %e, "password reset request failed"))?;
        info!("password reset email sent");
        Ok(())
    }

    /// Change the active identity's password.
    ///
    /// # Errors
    ///
    /// [`AuthError::NoActiveIdentity`] when nobody is signed in; otherwise busy,
    /// cancellation or provider errors.
    pub async fn change_password(&self, new_password: &str, cancel: &CancellationToken) -> Result<(), AuthError> {
        let _guard = self.begin()?;
        let identity = self.active_identity()?;
        provider_call(cancel, self.provider.change_password(&identity, new_password))
            .await
            .inspect_err(|e| error!(error = %e, "password change failed"))?;
        info!(id = %identity.id, "password updated");
        Ok(())
    }

    /// Send a verification email for the active identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::NoActiveIdentity`] when nobody is signed in; otherwise busy,
    /// cancellation or provider errors.
    pub async fn send_email_verification(&self, cancel: &CancellationToken) -> Result<(), AuthError> {
        let _guard = self.begin()?;
        let identity = self.active_identity()?;
        provider_call(
            cancel,
            self.provider
                .send_email_verification(&identity, &self.verification_return_url),
        )
        .await
        .inspect_err(|e| error!(error = %e, "email verification failed"))?;
        info!(id = %identity.id, "email verification sent");
        Ok(())
    }
}

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;
