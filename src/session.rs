//! Session state store.
//!
//! DESIGN
//! ======
//! One listener task owns the `watch::Sender` and is the only writer of the
//! session snapshot. It replaces the snapshot wholesale on every provider
//! notification, so readers always see the latest one (last write wins, no
//! queue).
//!
//! Readers never observe the initial loading snapshot: `snapshot()` returns
//! `None` and `ready()`/`SessionReceiver::next()` wait until the first
//! provider notification has landed.
//!
//! LIFECYCLE
//! =========
//! `start` subscribes and spawns the listener; `stop` (or drop) aborts it,
//! which drops the provider subscription. The last snapshot stays readable.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::identity::{Identity, IdentityChanges, IdentityProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub is_logged_in: bool,
    pub is_loading: bool,
}

impl SessionSnapshot {
    /// State before the provider has reported anything.
    #[must_use]
    pub fn loading() -> Self {
        Self { identity: None, is_logged_in: false, is_loading: true }
    }

    #[must_use]
    pub fn from_notification(identity: Option<Identity>) -> Self {
        let is_logged_in = identity.is_some();
        Self { identity, is_logged_in, is_loading: false }
    }
}

pub struct SessionStore {
    rx: watch::Receiver<SessionSnapshot>,
    listener: Option<JoinHandle<()>>,
}

impl SessionStore {
    /// Subscribe to `provider` and start publishing snapshots.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(provider: &dyn IdentityProvider) -> Self {
        Self::listen(provider.subscribe())
    }

    /// Start publishing snapshots from an existing notification stream.
    #[must_use]
    pub fn listen(changes: IdentityChanges) -> Self {
        let (tx, rx) = watch::channel(SessionSnapshot::loading());
        let listener = tokio::spawn(run_listener(changes, tx));
        info!("session store started");
        Self { rx, listener: Some(listener) }
    }

    /// Current snapshot, or `None` while still loading.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let snapshot = self.rx.borrow();
        (!snapshot.is_loading).then(|| snapshot.clone())
    }

    /// Wait until the first provider notification has arrived.
    ///
    /// Returns `None` if the store stopped before that happened.
    pub async fn ready(&self) -> Option<SessionSnapshot> {
        let mut rx = self.rx.clone();
        let snapshot = rx.wait_for(|s| !s.is_loading).await.ok()?;
        Some(snapshot.clone())
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionReceiver {
        SessionReceiver { rx: self.rx.clone(), primed: false }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop listening. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            info!("session store stopped");
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_listener(mut changes: IdentityChanges, tx: watch::Sender<SessionSnapshot>) {
    while let Some(identity) = changes.recv().await {
        let snapshot = SessionSnapshot::from_notification(identity);
        debug!(
            logged_in = snapshot.is_logged_in,
            id = snapshot.identity.as_ref().map_or("-", |i| i.id.as_str()),
            "identity changed"
        );
        tx.send_replace(snapshot);
    }
    debug!("identity notifications closed");
}

/// Consumer handle that only yields loaded snapshots.
pub struct SessionReceiver {
    rx: watch::Receiver<SessionSnapshot>,
    primed: bool,
}

impl SessionReceiver {
    /// First call: the current snapshot once loading has finished. Later
    /// calls: the next change. `None` once the store has stopped.
    pub async fn next(&mut self) -> Option<SessionSnapshot> {
        if !self.primed {
            let snapshot = self.rx.wait_for(|s| !s.is_loading).await.ok()?.clone();
            self.primed = true;
            return Some(snapshot);
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
