//! Process-wide table of active sessions.

use std::{
    collections::HashMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use container_relay_core::{SessionId, SessionInfo, SessionKind};

/// Filter for registry listings.
#[derive(Debug, Clone, Default)]
pub struct RegistryFilter {
    /// Filter by session kind.
    pub kind: Option<SessionKind>,
    /// Filter by node name.
    pub node: Option<String>,
    /// Limit results.
    pub limit: Option<usize>,
}

/// Lifetime totals of registry operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions added.
    pub registered: u64,
    /// Sessions removed.
    pub unregistered: u64,
    /// `unregister` calls for ids that were not present.
    pub missed_unregisters: u64,
}

/// Registry of active sessions.
///
/// Pure bookkeeping for visibility and cleanup; no relay behavior depends on
/// what it contains. Sessions never inspect each other through it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    registered: AtomicU64,
    unregistered: AtomicU64,
    missed_unregisters: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` if the id was already present.
    pub fn register(&self, info: SessionInfo) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&info.id) {
            return false;
        }
        tracing::debug!(session_id = %info.id, "Registered session");
        sessions.insert(info.id, info);
        self.registered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            self.unregistered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id = %id, "Unregistered session");
        } else {
            self.missed_unregisters.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Totals since the registry was created.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            missed_unregisters: self.missed_unregisters.load(Ordering::Relaxed),
        }
    }

    /// Get a session snapshot by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// All active sessions, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        self.list_filtered(&RegistryFilter::default())
    }

    /// Active sessions matching `filter`, newest first.
    #[must_use]
    pub fn list_filtered(&self, filter: &RegistryFilter) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        let mut result: Vec<SessionInfo> = sessions
            .values()
            .filter(|s| filter.kind.is_none_or(|kind| s.kind == kind))
            .filter(|s| {
                filter
                    .node
                    .as_ref()
                    .is_none_or(|node| s.target.node.as_ref() == Some(node))
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        result
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
