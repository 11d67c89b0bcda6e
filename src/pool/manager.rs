use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PoolConfig;
use crate::pool::idle_pool::IdlePool;
use crate::pool::registry::SessionRegistry;
use crate::session::{
    DialContext, Dialer, ManagedSession, ManagedStream, PaddingFactoryHandle,
};
use crate::utils::error::{PoolError, Result};

/// Orchestrates a population of AnyTLS sessions serving a single remote
/// endpoint: serves `acquire_stream` requests, runs the periodic
/// maintenance cycle, spawns proactive creators, and coordinates shutdown.
pub struct PoolManager {
    config: PoolConfig,
    dialer: Arc<dyn Dialer>,
    clock: Arc<dyn Clock>,
    idle_pool: Arc<IdlePool>,
    registry: Arc<SessionRegistry>,
    next_seq: AtomicU64,
    cancel: CancellationToken,
    #[allow(dead_code)]
    padding_factory: Option<PaddingFactoryHandle>,
}

impl PoolManager {
    /// Construct a manager and start its maintenance ticker. The
    /// `padding_factory` parameter is carried opaquely (see
    /// [`PaddingFactoryHandle`]); the core never inspects it.
    pub fn new(
        dialer: Arc<dyn Dialer>,
        padding_factory: Option<PaddingFactoryHandle>,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            dialer,
            clock,
            idle_pool: Arc::new(IdlePool::new()),
            registry: Arc::new(SessionRegistry::new()),
            next_seq: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            padding_factory,
        });

        manager.clone().spawn_maintenance_ticker();
        manager
    }

    /// Construct a manager without starting its background ticker - for
    /// tests that want to drive maintenance cycles deterministically via
    /// [`PoolManager::run_maintenance_once`].
    pub fn new_without_ticker(
        dialer: Arc<dyn Dialer>,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            dialer,
            clock,
            idle_pool: Arc::new(IdlePool::new()),
            registry: Arc::new(SessionRegistry::new()),
            next_seq: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            padding_factory: None,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn idle_len(&self) -> usize {
        self.idle_pool.len()
    }

    pub fn registered_len(&self) -> usize {
        self.registry.len()
    }

    /// Serve one stream request: reuse an idle session if one is available,
    /// otherwise dial a new one. Installs the stream's return-to-pool hook
    /// before handing the stream back.
    pub async fn acquire_stream(&self, ctx: &DialContext) -> Result<ManagedStream> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::PoolClosed);
        }

        let session = match self.idle_pool.pop_newest() {
            Some(session) => session,
            None => self.create_session(ctx).await?,
        };

        let stream = match session.transport.open_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                session.close().await;
                return Err(PoolError::StreamOpenFailure(err));
            }
        };

        stream.register_death_hook(self.stream_death_hook(session.clone()));

        Ok(ManagedStream::new(stream))
    }

    /// Build the callback installed on every stream handed out: on stream
    /// end, return the parent session to the idle pool unless it is
    /// already dead or the manager has been cancelled.
    fn stream_death_hook(&self, session: Arc<ManagedSession>) -> crate::session::DeathHook {
        let idle_pool = self.idle_pool.clone();
        let cancel = self.cancel.clone();
        let clock = self.clock.clone();

        Box::new(move || {
            if session.is_closed() {
                // The session's own death hook already tore down registry
                // and idle-pool membership; returning it here would leak a
                // dead entry back into the pool.
                return;
            }

            if cancel.is_cancelled() {
                tokio::spawn(async move {
                    session.close().await;
                });
                return;
            }

            session.set_idle_since(clock.now());
            idle_pool.insert(session);
        })
    }

    /// Shared session-creation procedure used by both the on-demand and
    /// proactive paths: dial, assign `seq`, install the session death hook,
    /// register, and start the transport's internal run loop.
    async fn create_session(&self, ctx: &DialContext) -> Result<Arc<ManagedSession>> {
        let transport = self
            .dialer
            .dial_session(ctx)
            .await
            .map_err(PoolError::DialFailure)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let created_at = self.clock.now();
        let session = ManagedSession::new(seq, created_at, transport.clone());

        session.transport.register_death_hook(self.session_death_hook(session.clone()));
        self.registry.insert(session.clone());
        transport.run();

        Ok(session)
    }

    /// Build the callback installed on every session at birth: on session
    /// death (explicit close or transport failure), remove it from both the
    /// idle pool and the registry exactly once.
    fn session_death_hook(&self, session: Arc<ManagedSession>) -> crate::session::DeathHook {
        let idle_pool = self.idle_pool.clone();
        let registry = self.registry.clone();

        Box::new(move || {
            if !session.mark_death_fired() {
                return;
            }
            idle_pool.remove_by_seq(session.seq);
            registry.remove(session.seq);
        })
    }

    fn spawn_maintenance_ticker(self: Arc<Self>) {
        let interval_period = self.config.idle_session_check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_maintenance_once().await;
                    }
                    _ = self.cancel.cancelled() => {
                        break;
                    }
                }
            }
        });
    }

    /// Run one maintenance cycle: scan the idle pool (Phase 1), snapshot
    /// its size (Phase 2), close selected sessions and spawn proactive
    /// creators (Phase 3).
    pub async fn run_maintenance_once(self: &Arc<Self>) {
        let now = self.clock.now();
        let outcome = self.idle_pool.run_maintenance_scan(now, &self.config);

        debug!(
            found = outcome.idle_found,
            closed = outcome.idle_close.len(),
            protected = outcome.idle_protected,
            "idle cleanup"
        );
        debug!(
            closed = outcome.age_close.len(),
            protected = outcome.age_protected,
            eligible = outcome.age_eligible,
            "age cleanup"
        );

        for session in outcome
            .idle_close
            .into_iter()
            .chain(outcome.age_close.into_iter())
        {
            session.close().await;
        }

        if self.config.ensure_idle_session > 0 {
            let deficit = self
                .config
                .ensure_idle_session
                .saturating_sub(outcome.current_pool_size);

            if deficit > 0 {
                let to_create = if self.config.ensure_idle_session_create_rate > 0 {
                    deficit.min(self.config.ensure_idle_session_create_rate)
                } else {
                    deficit
                };

                debug!(
                    current_pool_size = outcome.current_pool_size,
                    target = self.config.ensure_idle_session,
                    to_create,
                    "proactive replenish"
                );

                for _ in 0..to_create {
                    let manager = self.clone();
                    tokio::spawn(async move {
                        manager.spawn_proactive_creator().await;
                    });
                }
            }
        }
    }

    /// One proactive creator: dials with its own 30-second budget,
    /// independent of any caller's context, and inserts the session
    /// directly into the idle pool on success.
    async fn spawn_proactive_creator(self: Arc<Self>) {
        let ctx = DialContext::proactive();

        let result = tokio::time::timeout(ctx.budget, self.create_session(&ctx)).await;

        match result {
            Ok(Ok(session)) => {
                if self.cancel.is_cancelled() {
                    session.close().await;
                    return;
                }
                session.set_idle_since(self.clock.now());
                self.idle_pool.insert(session.clone());
                debug!(seq = session.seq, "created proactive session");
            }
            Ok(Err(err)) => {
                debug!(error = %err, "proactive dial failed, will retry next tick");
            }
            Err(_) => {
                debug!("proactive dial timed out, will retry next tick");
            }
        }
    }

    /// Flip the manager into the cancelled state without tearing down any
    /// session. `close()` always does this first; exposed separately so
    /// tests can exercise the narrow race between cancellation and an
    /// in-flight stream's return-to-pool hook.
    pub fn initiate_cancellation(&self) {
        self.cancel.cancel();
    }

    /// Cancel the manager and tear down every live session. Idempotent:
    /// calling this twice leaves the same externally observable state as
    /// calling it once.
    pub async fn close(&self) {
        self.initiate_cancellation();
        let sessions = self.registry.drain_all();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "closing pool manager, tearing down sessions");
        }
        for session in sessions {
            self.idle_pool.remove_by_seq(session.seq);
            session.close().await;
        }
    }
}
