use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Error type transport implementations report through; the manager wraps
/// these into the public [`crate::utils::error::PoolError`] variants.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// A callback fired at most once. Used for both session and stream
/// "this died" notifications.
pub type DeathHook = Box<dyn FnOnce() + Send>;

/// Opaque handle to the AnyTLS padding factory. The core never inspects it;
/// it exists purely so `PoolManager::new` can carry the same constructor
/// shape the wire-framing layer expects, without pulling framing concerns
/// into this crate.
#[derive(Clone)]
pub struct PaddingFactoryHandle(pub Arc<dyn std::any::Any + Send + Sync>);

impl fmt::Debug for PaddingFactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaddingFactoryHandle(..)")
    }
}

/// Per-call context for a dial or stream-open attempt: a time budget and a
/// cancellation handle scoped to the caller, independent of the manager's
/// own lifetime.
#[derive(Clone)]
pub struct DialContext {
    pub budget: Duration,
    pub cancel: CancellationToken,
}

impl DialContext {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            cancel: CancellationToken::new(),
        }
    }

    /// The fixed 30-second budget proactive creators use, independent of any
    /// caller context.
    pub fn proactive() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// A multiplexed logical channel over one session. Opaque to the core
/// beyond its ability to notify the manager when it ends.
pub trait StreamHandle: Send + Sync + 'static {
    /// Install the callback invoked exactly once when this stream ends.
    /// Implementations must guarantee at-most-once delivery even under a
    /// race between an explicit close and a transport-observed failure.
    fn register_death_hook(&self, hook: DeathHook);
}

/// One live AnyTLS multiplexed transport to a single remote endpoint.
/// Framing, TLS, ECH and padding live below this seam; the core only needs
/// the operations below.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// Produce a new multiplexed stream on this session.
    async fn open_stream(&self) -> Result<Box<dyn StreamHandle>, TransportError>;

    /// Observable predicate; monotonically transitions false -> true.
    fn is_closed(&self) -> bool;

    /// Idempotent teardown. After this returns, `is_closed()` is true.
    async fn close(&self);

    /// Install the callback invoked exactly once when this session
    /// transitions to closed, whether via `close()` or an underlying
    /// transport failure observed internally.
    fn register_death_hook(&self, hook: DeathHook);

    /// Start the session's internal protocol loop. Transports that drive
    /// themselves off their own I/O (the common case) may leave this a
    /// no-op; it exists as an explicit seam so the manager never needs to
    /// know how a given transport pumps itself.
    fn run(self: Arc<Self>) {}
}

/// Dials a fresh, fully framed AnyTLS session. The only thing the core
/// requires from the outside world to create sessions.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial_session(&self, ctx: &DialContext) -> Result<Arc<dyn SessionTransport>, TransportError>;
}

/// Manager-side bookkeeping wrapped around an opaque `SessionTransport`.
///
/// `seq` is assigned once at creation and never changes; `idle_since` is
/// meaningful only while the session sits in the idle pool and is written
/// only under the idle pool's lock.
pub struct ManagedSession {
    pub seq: u64,
    pub created_at: Instant,
    idle_since: Mutex<Option<Instant>>,
    death_fired: AtomicBool,
    pub transport: Arc<dyn SessionTransport>,
}

impl ManagedSession {
    pub fn new(seq: u64, created_at: Instant, transport: Arc<dyn SessionTransport>) -> Arc<Self> {
        Arc::new(Self {
            seq,
            created_at,
            idle_since: Mutex::new(None),
            death_fired: AtomicBool::new(false),
            transport,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn idle_since(&self) -> Option<Instant> {
        *self.idle_since.lock().expect("idle_since mutex poisoned")
    }

    pub fn set_idle_since(&self, at: Instant) {
        *self.idle_since.lock().expect("idle_since mutex poisoned") = Some(at);
    }

    pub fn clear_idle_since(&self) {
        *self.idle_since.lock().expect("idle_since mutex poisoned") = None;
    }

    /// Deterministic per-session jitter window computation: the same
    /// `max_connection_lifetime`/`jitter` pair always yields the same
    /// effective lifetime for this session. Computed in whole seconds so the
    /// `seq`-indexed offset actually spans the jitter window instead of
    /// collapsing to a near-constant few-millisecond spread.
    pub fn effective_lifetime(&self, max_connection_lifetime: Duration, jitter: Duration) -> Duration {
        if jitter.is_zero() {
            return max_connection_lifetime;
        }
        let jitter_secs = jitter.as_secs() as i128;
        let window = 2 * jitter_secs;
        let offset = (self.seq as i128).rem_euclid(window) - jitter_secs;
        let base_secs = max_connection_lifetime.as_secs() as i128;
        let effective_secs = (base_secs + offset).max(0);
        Duration::from_secs(effective_secs as u64)
    }

    /// Idempotent guard ensuring the death hook semantics ("exactly once")
    /// hold even if both the transport and the manager attempt to fire it.
    /// Returns `true` the first time it is called.
    pub fn mark_death_fired(&self) -> bool {
        self.death_fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSession")
            .field("seq", &self.seq)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}
