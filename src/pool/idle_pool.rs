use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::PoolConfig;
use crate::session::ManagedSession;

/// Outcome of one maintenance-cycle scan over the idle pool (Phase 1 +
/// Phase 2). Sessions named in `idle_close`/`age_close` have already been
/// removed from the pool by the time this is returned; closing them is the
/// caller's (Phase 3's) job, performed without the idle pool lock held.
pub struct MaintenanceOutcome {
    pub idle_close: Vec<Arc<ManagedSession>>,
    pub age_close: Vec<Arc<ManagedSession>>,
    pub current_pool_size: usize,
    pub idle_found: usize,
    pub idle_protected: usize,
    pub age_eligible: usize,
    pub age_protected: usize,
}

/// Idle sessions ordered by descending `seq` (newest first), keyed under
/// `u64::MAX - seq` so "smallest key" means "newest session". A session is
/// unique in the map because `seq` is unique for the manager's lifetime.
pub struct IdlePool {
    inner: Mutex<BTreeMap<u64, Arc<ManagedSession>>>,
}

impl IdlePool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn key_for(seq: u64) -> u64 {
        u64::MAX - seq
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Arc<ManagedSession>>> {
        self.inner.lock().expect("idle pool mutex poisoned")
    }

    /// Insert a session. Precondition: the session is not already present
    /// (guaranteed by `seq` uniqueness).
    pub fn insert(&self, session: Arc<ManagedSession>) {
        let key = Self::key_for(session.seq);
        self.lock().insert(key, session);
    }

    /// No-op if absent.
    pub fn remove_by_seq(&self, seq: u64) -> Option<Arc<ManagedSession>> {
        self.lock().remove(&Self::key_for(seq))
    }

    /// Remove and return the session with the highest `seq` (smallest key).
    pub fn pop_newest(&self) -> Option<Arc<ManagedSession>> {
        let mut guard = self.lock();
        let key = *guard.keys().next()?;
        guard.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the maintenance-cycle idle/age scan (Phase 1) and snapshot
    /// the resulting pool size (Phase 2), all under a single critical
    /// section. No network I/O or blocking call happens while the lock is
    /// held - only in-memory bookkeeping and decision logic.
    pub fn run_maintenance_scan(&self, now: Instant, config: &PoolConfig) -> MaintenanceOutcome {
        let mut guard = self.lock();

        // Ascending key order == descending seq == newest-first.
        let ordered_seqs: Vec<u64> = guard.values().map(|s| s.seq).collect();

        let mut idle_retained = 0usize;
        let mut age_retained = 0usize;
        let mut idle_found = 0usize;
        let mut age_eligible = 0usize;
        let mut idle_close = Vec::new();
        let mut age_close = Vec::new();

        for seq in ordered_seqs {
            let key = Self::key_for(seq);
            let session = match guard.get(&key) {
                Some(s) => s.clone(),
                None => continue,
            };

            let mut marked_for_close = false;

            if let Some(idle_since) = session.idle_since() {
                if now.saturating_duration_since(idle_since) >= config.idle_session_timeout {
                    idle_found += 1;
                    if idle_retained >= config.min_idle_session {
                        idle_close.push(session.clone());
                        marked_for_close = true;
                    } else {
                        session.set_idle_since(now);
                        idle_retained += 1;
                    }
                } else {
                    idle_retained += 1;
                }
            }

            if !marked_for_close && !config.max_connection_lifetime.is_zero() {
                let effective = session
                    .effective_lifetime(config.max_connection_lifetime, config.connection_lifetime_jitter);
                if now > session.created_at + effective {
                    age_eligible += 1;
                    if age_retained >= config.min_idle_session_for_age {
                        age_close.push(session.clone());
                        marked_for_close = true;
                    } else {
                        age_retained += 1;
                    }
                }
            }

            if marked_for_close {
                guard.remove(&key);
            }
        }

        let current_pool_size = guard.len();
        let idle_protected = idle_found.saturating_sub(idle_close.len());
        let age_protected = age_eligible.saturating_sub(age_close.len());

        MaintenanceOutcome {
            idle_close,
            age_close,
            current_pool_size,
            idle_found,
            idle_protected,
            age_eligible,
            age_protected,
        }
    }
}

impl Default for IdlePool {
    fn default() -> Self {
        Self::new()
    }
}
