//! In-process identity provider.
//!
//! DESIGN
//! ======
//! Behaves like a hosted identity service from the caller's point of view:
//! it owns every account, tracks one active identity, and notifies
//! subscribers on each change. Every call is recorded and a single failure
//! can be injected ahead of time, so tests can assert exact provider
//! interaction sequences.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::identity::{
    Credential, ExternalProvider, Identity, IdentityChanges, IdentityProvider, ProviderError, ProviderErrorKind,
};

const MIN_PASSWORD_LEN: usize = 6;

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreatePermanent { email: String },
    SignInPermanent { email: String },
    CreateAnonymous,
    SignInExternal(ExternalProvider),
    Link { id: String },
    Delete { id: String },
    SignOut,
    PasswordReset { email: String },
    ChangePassword { id: String },
    SendVerification { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    PasswordReset,
    Verification,
}

/// Email the provider would have delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub kind: EmailKind,
    pub to: String,
    pub return_url: Option<String>,
}

struct Account {
    identity: Identity,
    password: Option<String>,
    external: HashSet<ExternalProvider>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    current: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
    external_accounts: HashMap<ExternalProvider, String>,
    id_prefix: Option<String>,
    issued: u64,
    calls: Vec<ProviderCall>,
    outbox: Vec<SentEmail>,
    fail_next: Option<ProviderError>,
}

impl Inner {
    fn next_id(&mut self) -> String {
        self.issued += 1;
        match &self.id_prefix {
            Some(prefix) => format!("{prefix}{}", self.issued),
            None => Uuid::new_v4().simple().to_string(),
        }
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current
            .as_ref()
            .and_then(|id| self.accounts.get(id))
            .map(|a| a.identity.clone())
    }

    fn email_owner(&self, email: &str) -> Option<&Account> {
        self.accounts
            .values()
            .find(|a| a.identity.email.as_deref() == Some(email))
    }

    /// Record the call and consume any injected failure.
    fn begin(&mut self, call: ProviderCall) -> Result<(), ProviderError> {
        self.calls.push(call);
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_current(&mut self, id: Option<String>) {
        self.current = id;
        self.notify();
    }

    fn notify(&mut self) {
        let identity = self.current_identity();
        self.subscribers
            .retain(|tx| tx.send(identity.clone()).is_ok());
    }

    fn insert_account(&mut self, identity: Identity, password: Option<String>) -> Identity {
        let id = identity.id.clone();
        self.accounts
            .insert(id.clone(), Account { identity: identity.clone(), password, external: HashSet::new() });
        self.set_current(Some(id));
        identity
    }
}

fn weak_password() -> ProviderError {
    ProviderError::new(
        ProviderErrorKind::WeakPassword,
        "Password should be at least 6 characters (auth/weak-password).",
    )
}

fn user_not_found() -> ProviderError {
    ProviderError::new(ProviderErrorKind::UserNotFound, "No account matches this identity (auth/user-not-found).")
}

#[derive(Default)]
pub struct MemoryIdentityProvider {
    inner: Mutex<Inner>,
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue sequential ids (`{prefix}1`, `{prefix}2`, ...) instead of UUIDs.
    #[must_use]
    pub fn with_id_prefix(self, prefix: impl Into<String>) -> Self {
        self.lock().id_prefix = Some(prefix.into());
        self
    }

    /// Register the account an external sign-in resolves to.
    #[must_use]
    pub fn with_external_account(self, kind: ExternalProvider, email: impl Into<String>) -> Self {
        self.lock().external_accounts.insert(kind, email.into());
        self
    }

    /// Make the next provider call fail with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        self.lock().fail_next = Some(err);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    #[must_use]
    pub fn outbox(&self) -> Vec<SentEmail> {
        self.lock().outbox.clone()
    }

    /// Look up any account by id, active or not.
    #[must_use]
    pub fn identity(&self, id: &str) -> Option<Identity> {
        self.lock().accounts.get(id).map(|a| a.identity.clone())
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.lock().current_identity()
    }

    fn subscribe(&self) -> IdentityChanges {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        // Initial state goes out before any later change.
        if tx.send(inner.current_identity()).is_ok() {
            inner.subscribers.push(tx);
        }
        rx
    }

    async fn create_permanent_identity(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::CreatePermanent { email: email.to_owned() })?;
        if inner.email_owner(email).is_some() {
            return Err(ProviderError::new(
                ProviderErrorKind::EmailAlreadyInUse,
                "Email already in use (auth/email-already-in-use).",
            ));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(weak_password());
        }
        let identity = Identity { id: inner.next_id(), email: Some(email.to_owned()), is_anonymous: false };
        Ok(inner.insert_account(identity, Some(password.to_owned())))
    }

    async fn sign_in_with_permanent_identity(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::SignInPermanent { email: email.to_owned() })?;
        let id = inner
            .email_owner(email)
            .filter(|a| a.password.as_deref() == Some(password))
            .map(|a| a.identity.id.clone())
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::InvalidCredential, "Invalid credential (auth/invalid-credential)."))?;
        inner.set_current(Some(id));
        inner.current_identity().ok_or_else(user_not_found)
    }

    async fn create_anonymous_identity(&self) -> Result<Identity, ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::CreateAnonymous)?;
        let identity = Identity { id: inner.next_id(), email: None, is_anonymous: true };
        Ok(inner.insert_account(identity, None))
    }

    async fn sign_in_with_external_provider(&self, kind: ExternalProvider) -> Result<Identity, ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::SignInExternal(kind))?;
        let Some(email) = inner.external_accounts.get(&kind).cloned() else {
            return Err(ProviderError::new(
                ProviderErrorKind::ExternalAccountUnavailable,
                "The popup has been closed by the user (auth/popup-closed-by-user).",
            ));
        };
        let existing = inner.email_owner(&email).map(|a| a.identity.id.clone());
        match existing {
            Some(id) => {
                if let Some(account) = inner.accounts.get_mut(&id) {
                    account.external.insert(kind);
                }
                inner.set_current(Some(id));
                inner.current_identity().ok_or_else(user_not_found)
            }
            None => {
                let identity = Identity { id: inner.next_id(), email: Some(email), is_anonymous: false };
                let identity = inner.insert_account(identity, None);
                if let Some(account) = inner.accounts.get_mut(&identity.id) {
                    account.external.insert(kind);
                }
                Ok(identity)
            }
        }
    }

    async fn link_identity(&self, existing: &Identity, credential: Credential) -> Result<Identity, ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::Link { id: existing.id.clone() })?;
        if !inner.accounts.contains_key(&existing.id) {
            return Err(user_not_found());
        }

        let (email, password, external) = match credential {
            Credential::EmailPassword { email, password } => {
                if password.len() < MIN_PASSWORD_LEN {
                    return Err(weak_password());
                }
                (email, Some(password), None)
            }
            Credential::External(kind) => {
                let Some(email) = inner.external_accounts.get(&kind).cloned() else {
                    return Err(ProviderError::new(
                        ProviderErrorKind::ExternalAccountUnavailable,
                        "The popup has been closed by the user (auth/popup-closed-by-user).",
                    ));
                };
                (email, None, Some(kind))
            }
        };

        if inner
            .email_owner(&email)
            .is_some_and(|a| a.identity.id != existing.id)
        {
            return Err(ProviderError::new(
                ProviderErrorKind::CredentialAlreadyInUse,
                "This credential is already associated with a different account (auth/credential-already-in-use).",
            ));
        }

        let Some(account) = inner.accounts.get_mut(&existing.id) else {
            return Err(user_not_found());
        };
        account.identity.email = Some(email);
        account.identity.is_anonymous = false;
        if password.is_some() {
            account.password = password;
        }
        if let Some(kind) = external {
            account.external.insert(kind);
        }
        let linked = account.identity.clone();

        if inner.current.as_deref() == Some(linked.id.as_str()) {
            inner.notify();
        }
        Ok(linked)
    }

    async fn delete_identity(&self, identity: &Identity) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::Delete { id: identity.id.clone() })?;
        if inner.accounts.remove(&identity.id).is_none() {
            return Err(user_not_found());
        }
        if inner.current.as_deref() == Some(identity.id.as_str()) {
            inner.set_current(None);
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::SignOut)?;
        if inner.current.is_some() {
            inner.set_current(None);
        }
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::PasswordReset { email: email.to_owned() })?;
        // Unknown addresses succeed silently so callers cannot probe for accounts.
        if inner.email_owner(email).is_some() {
            inner
                .outbox
                .push(SentEmail { kind: EmailKind::PasswordReset, to: email.to_owned(), return_url: None });
        }
        Ok(())
    }

    async fn change_password(&self, identity: &Identity, new_password: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::ChangePassword { id: identity.id.clone() })?;
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(weak_password());
        }
        let account = inner
            .accounts
            .get_mut(&identity.id)
            .ok_or_else(user_not_found)?;
        account.password = Some(new_password.to_owned());
        Ok(())
    }

    async fn send_email_verification(&self, identity: &Identity, return_url: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.begin(ProviderCall::SendVerification { id: identity.id.clone() })?;
        let email = inner
            .accounts
            .get(&identity.id)
            .ok_or_else(user_not_found)?
            .identity
            .email
            .clone()
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::Internal, "Identity has no email (auth/missing-email)."))?;
        inner.outbox.push(SentEmail {
            kind: EmailKind::Verification,
            to: email,
            return_url: Some(return_url.to_owned()),
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_provider_test.rs"]
mod tests;
