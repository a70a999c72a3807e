//! Auth configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GUEST_EXPIRATION_SECS: u64 = 86_400;
pub const DEFAULT_STORAGE_NAMESPACE: &str = "repple-";
pub const DEFAULT_VERIFICATION_RETURN_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Guest identities older than this are deleted and replaced.
    pub guest_expiration: Duration,
    /// Prefix for the persisted guest-record keys.
    pub storage_namespace: String,
    /// Where email-verification links send the user back to.
    pub verification_return_url: String,
    /// JSON file for the guest record; in-memory when absent.
    pub storage_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            guest_expiration: Duration::from_secs(DEFAULT_GUEST_EXPIRATION_SECS),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_owned(),
            verification_return_url: DEFAULT_VERIFICATION_RETURN_URL.to_owned(),
            storage_path: None,
        }
    }
}

impl AuthConfig {
    /// Build typed config from environment variables.
    ///
    /// - `GUEST_EXPIRATION_SECS`: default 86400
    /// - `GUEST_STORAGE_NAMESPACE`: default `repple-`
    /// - `EMAIL_VERIFICATION_RETURN_URL`: default `http://localhost:3000`
    /// - `AUTH_STORAGE_PATH`: unset means in-memory storage
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let expiration_secs = lookup("GUEST_EXPIRATION_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_GUEST_EXPIRATION_SECS);
        let storage_namespace = lookup("GUEST_STORAGE_NAMESPACE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_STORAGE_NAMESPACE.to_owned());
        let verification_return_url = lookup("EMAIL_VERIFICATION_RETURN_URL")
            .map(|v| v.trim_end_matches('/').to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VERIFICATION_RETURN_URL.to_owned());
        let storage_path = lookup("AUTH_STORAGE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            guest_expiration: Duration::from_secs(expiration_secs),
            storage_namespace,
            verification_return_url,
            storage_path,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
