use dashmap::DashMap;
use std::sync::Arc;

use crate::session::ManagedSession;

/// Authoritative map of live sessions by `seq`. Source of truth for "is this
/// session still alive" - a session absent here has unconditionally died.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<ManagedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Arc<ManagedSession>) {
        self.sessions.insert(session.seq, session);
    }

    pub fn remove(&self, seq: u64) -> Option<Arc<ManagedSession>> {
        self.sessions.remove(&seq).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.sessions.contains_key(&seq)
    }

    /// All currently-registered sessions, used for shutdown.
    pub fn snapshot_all(&self) -> Vec<Arc<ManagedSession>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Remove and return every registered session, leaving the registry
    /// empty. Used by shutdown so the registry is cleared before sessions
    /// are closed outside any lock.
    pub fn drain_all(&self) -> Vec<Arc<ManagedSession>> {
        let seqs: Vec<u64> = self.sessions.iter().map(|e| *e.key()).collect();
        seqs.into_iter()
            .filter_map(|seq| self.sessions.remove(&seq).map(|(_, s)| s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionTransport;
    use crate::testing::TestSessionTransport;
    use std::time::Instant;

    fn session(seq: u64) -> Arc<ManagedSession> {
        let transport: Arc<dyn SessionTransport> = TestSessionTransport::new();
        ManagedSession::new(seq, Instant::now(), transport)
    }

    #[test]
    fn insert_remove_roundtrip() {
        let reg = SessionRegistry::new();
        reg.insert(session(1));
        assert!(reg.contains(1));
        assert_eq!(reg.len(), 1);
        let removed = reg.remove(1).unwrap();
        assert_eq!(removed.seq, 1);
        assert!(!reg.contains(1));
    }

    #[test]
    fn drain_all_empties_registry() {
        let reg = SessionRegistry::new();
        for seq in 1..=3 {
            reg.insert(session(seq));
        }
        let drained = reg.drain_all();
        assert_eq!(drained.len(), 3);
        assert!(reg.is_empty());
    }
}
