//! Repple authentication core.
//!
//! ARCHITECTURE
//! ============
//! - `session`: publishes who is signed in, gated on the first provider
//!   notification.
//! - `guest`: reuses, expires or creates anonymous guest identities.
//! - `actions`: UI-facing register/sign-in/guest calls behind a single-flight
//!   guard, with cancellation threaded through every provider call.
//!
//! The identity provider and the key-value store are external collaborators
//! injected as trait objects.

pub mod actions;
pub mod config;
pub mod error;
pub mod guest;
pub mod identity;
pub mod memory_provider;
pub mod session;
pub mod storage;

pub use actions::AuthActions;
pub use config::AuthConfig;
pub use error::AuthError;
pub use guest::{Clock, GuestRecord, GuestRecordStore, GuestSessionManager, SystemClock};
pub use identity::{Credential, ExternalProvider, Identity, IdentityProvider, ProviderError, ProviderErrorKind};
pub use memory_provider::MemoryIdentityProvider;
pub use session::{SessionReceiver, SessionSnapshot, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
