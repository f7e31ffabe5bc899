//! Session state machine with a first-wins termination guard.

use std::sync::{Mutex, MutexGuard, PoisonError};

use container_relay_core::SessionState;

struct Inner {
    state: SessionState,
    termination_initiated: bool,
}

/// Lifecycle of one session.
///
/// All transitions happen under one lock, so concurrent termination
/// triggers are serialized: `begin_termination` returns `true` for exactly
/// one caller over the whole life of the session.
pub struct SessionLifecycle {
    inner: Mutex<Inner>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    /// Create a lifecycle in the `Opening` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Opening,
                termination_initiated: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data is two plain fields; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Whether data may still be relayed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// `Opening -> Active`, once the runtime stream is attached.
    pub fn activate(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Opening {
            return false;
        }
        inner.state = SessionState::Active;
        true
    }

    /// `Opening -> Closed`, when attaching failed.
    pub fn abort_opening(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Opening {
            return false;
        }
        inner.termination_initiated = true;
        inner.state = SessionState::Closed;
        true
    }

    /// `Active -> Terminating`.
    ///
    /// Returns `true` only for the first caller; every later or concurrent
    /// caller gets `false` and must not perform any teardown.
    pub fn begin_termination(&self) -> bool {
        let mut inner = self.lock();
        if inner.termination_initiated || inner.state != SessionState::Active {
            return false;
        }
        inner.termination_initiated = true;
        inner.state = SessionState::Terminating;
        true
    }

    /// `Terminating -> Closed`. Closed is terminal.
    pub fn finish(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Terminating {
            return false;
        }
        inner.state = SessionState::Closed;
        true
    }
}
