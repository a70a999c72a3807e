//! Guest (anonymous) session lifecycle.
//!
//! ARCHITECTURE
//! ============
//! The identity provider knows nothing about guest expiry. This module keeps
//! a small guest record (id + creation time) in the key-value store and, on
//! each `ensure_guest_session`, decides whether to reuse the active guest,
//! expire and replace it, or create one from scratch.
//!
//! INVARIANTS
//! ==========
//! - A record is only trusted while its `guest_id` equals the active
//!   anonymous identity's id. Any drift erases the record.
//! - The provider-side identity is deleted before its record is erased, so a
//!   failed delete leaves the record in place for the next attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::provider_call;
use crate::error::AuthError;
use crate::identity::{Identity, IdentityProvider};
use crate::storage::{KeyValueStore, StorageError};

// =============================================================================
// CLOCK
// =============================================================================

/// Wall-clock source in Unix epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
    }
}

// =============================================================================
// GUEST RECORD
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRecord {
    pub guest_id: String,
    pub created_at_epoch_millis: i64,
}

impl GuestRecord {
    #[must_use]
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.created_at_epoch_millis)
    }
}

/// Result of reading the persisted guest record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredGuest {
    Absent,
    Present(GuestRecord),
    /// Only one key present, or the timestamp is not a number.
    Corrupt,
}

/// Guest record persisted as two keys under a namespace prefix.
pub struct GuestRecordStore {
    store: Arc<dyn KeyValueStore>,
    uid_key: String,
    created_key: String,
}

impl GuestRecordStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            store,
            uid_key: format!("{namespace}guest_uid"),
            created_key: format!("{namespace}guest_creation_time"),
        }
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing store cannot be read.
    pub fn load(&self) -> Result<StoredGuest, StorageError> {
        let uid = self.store.get(&self.uid_key)?;
        let created = self.store.get(&self.created_key)?;
        Ok(match (uid, created) {
            (None, None) => StoredGuest::Absent,
            (Some(guest_id), Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(created_at_epoch_millis) => StoredGuest::Present(GuestRecord { guest_id, created_at_epoch_millis }),
                Err(_) => StoredGuest::Corrupt,
            },
            _ => StoredGuest::Corrupt,
        })
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if either key cannot be written.
    pub fn save(&self, record: &GuestRecord) -> Result<(), StorageError> {
        self.store.set(&self.uid_key, &record.guest_id)?;
        self.store
            .set(&self.created_key, &record.created_at_epoch_millis.to_string())
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if either key cannot be removed.
    pub fn erase(&self) -> Result<(), StorageError> {
        self.store.remove(&self.uid_key)?;
        self.store.remove(&self.created_key)
    }
}

// =============================================================================
// GUEST SESSION MANAGER
// =============================================================================

pub struct GuestSessionManager {
    provider: Arc<dyn IdentityProvider>,
    records: GuestRecordStore,
    clock: Arc<dyn Clock>,
    expiration: Duration,
}

impl GuestSessionManager {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        records: GuestRecordStore,
        clock: Arc<dyn Clock>,
        expiration: Duration,
    ) -> Self {
        Self { provider, records, clock, expiration }
    }

    #[must_use]
    pub fn records(&self) -> &GuestRecordStore {
        &self.records
    }

    #[must_use]
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    fn expiration_millis(&self) -> i64 {
        i64::try_from(self.expiration.as_millis()).unwrap_or(i64::MAX)
    }

    /// Return the active identity if it is permanent or a still-valid guest;
    /// otherwise expire/clean up and create a new guest.
    ///
    /// # Errors
    ///
    /// Provider and storage failures propagate unchanged; [`AuthError::Cancelled`]
    /// if `cancel` fires during a provider call.
    pub async fn ensure_guest_session(&self, cancel: &CancellationToken) -> Result<Identity, AuthError> {
        let active = self.provider.current_identity();
        if let Some(identity) = active.as_ref().filter(|i| i.is_permanent()) {
            info!(id = %identity.id, "permanent identity already active");
            return Ok(identity.clone());
        }

        let record = match self.records.load()? {
            StoredGuest::Absent => None,
            StoredGuest::Present(record) => Some(record),
            StoredGuest::Corrupt => {
                warn!("unreadable guest record; discarding");
                self.records.erase()?;
                None
            }
        };

        if let Some(record) = record {
            let matching = active.filter(|i| i.id == record.guest_id);
            let age = record.age_millis(self.clock.now_millis());

            if age > self.expiration_millis() {
                if let Some(expired) = matching {
                    if let Err(e) = provider_call(cancel, self.provider.delete_identity(&expired)).await {
                        warn!(guest_id = %expired.id, error = %e, "failed to delete expired guest");
                        return Err(e);
                    }
                    info!(guest_id = %expired.id, age_ms = age, "expired guest deleted");
                }
                self.records.erase()?;
            } else if let Some(identity) = matching {
                info!(guest_id = %identity.id, "reusing stored guest");
                return Ok(identity);
            } else {
                warn!(guest_id = %record.guest_id, "stored guest does not match active identity; clearing record");
                self.records.erase()?;
            }
        }

        let identity = provider_call(cancel, self.provider.create_anonymous_identity())
            .await
            .inspect_err(|e| warn!(error = %e, "anonymous sign-in failed"))?;
        self.records.save(&GuestRecord {
            guest_id: identity.id.clone(),
            created_at_epoch_millis: self.clock.now_millis(),
        })?;
        info!(guest_id = %identity.id, "new guest created");
        Ok(identity)
    }
}

#[cfg(test)]
#[path = "guest_test.rs"]
mod tests;
