//! Test doubles for the pool manager's two collaborator seams
//! ([`crate::session::Dialer`] and [`crate::session::SessionTransport`]).
//!
//! These are not behind `#[cfg(test)]` because the crate's own integration
//! tests under `tests/` need them too, and downstream users exercising this
//! crate's manager against a fake transport benefit from the same fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::session::{DeathHook, DialContext, Dialer, SessionTransport, StreamHandle, TransportError};

struct TestStreamInner {
    death_hook: Mutex<Option<DeathHook>>,
}

/// A stream handle returned by [`TestSessionTransport::open_stream`].
pub struct TestStreamHandle {
    inner: Arc<TestStreamInner>,
}

impl StreamHandle for TestStreamHandle {
    fn register_death_hook(&self, hook: DeathHook) {
        *self.inner.death_hook.lock().expect("poisoned") = Some(hook);
    }
}

/// Test-side control over a [`TestStreamHandle`] handed to the manager:
/// lets a test simulate the stream ending.
#[derive(Clone)]
pub struct TestStreamController {
    inner: Arc<TestStreamInner>,
}

impl TestStreamController {
    /// Simulate the stream ending, firing its registered death hook exactly
    /// once (a no-op if it was already fired or never registered).
    pub fn end(&self) {
        if let Some(hook) = self.inner.death_hook.lock().expect("poisoned").take() {
            hook();
        }
    }
}

fn stream_pair() -> (Box<dyn StreamHandle>, TestStreamController) {
    let inner = Arc::new(TestStreamInner {
        death_hook: Mutex::new(None),
    });
    (
        Box::new(TestStreamHandle {
            inner: inner.clone(),
        }),
        TestStreamController { inner },
    )
}

/// A fake AnyTLS session transport driven entirely by test code: no real
/// I/O happens, but `open_stream`/`close`/death-hook semantics match the
/// real contract exactly.
pub struct TestSessionTransport {
    closed: std::sync::atomic::AtomicBool,
    death_hook: Mutex<Option<DeathHook>>,
    fail_next_open_stream: AtomicUsize,
    last_stream: Mutex<Option<TestStreamController>>,
}

impl TestSessionTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: std::sync::atomic::AtomicBool::new(false),
            death_hook: Mutex::new(None),
            fail_next_open_stream: AtomicUsize::new(0),
            last_stream: Mutex::new(None),
        })
    }

    /// Make the next `n` calls to `open_stream` fail.
    pub fn fail_next_open_stream(&self, n: usize) {
        self.fail_next_open_stream.store(n, Ordering::SeqCst);
    }

    /// Fetch the controller for the most recently opened stream, so a test
    /// can end it and observe the return-to-pool hook fire.
    pub fn take_last_stream_controller(&self) -> Option<TestStreamController> {
        self.last_stream.lock().expect("poisoned").take()
    }

    /// Simulate a spontaneous transport failure: transitions to closed and
    /// fires the death hook, exactly as `close()` would.
    pub fn simulate_spontaneous_death(&self) {
        self.fire_death_if_first();
    }

    fn fire_death_if_first(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(hook) = self.death_hook.lock().expect("poisoned").take() {
                hook();
            }
        }
    }
}

#[async_trait]
impl SessionTransport for TestSessionTransport {
    async fn open_stream(&self) -> Result<Box<dyn StreamHandle>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("session is closed".into());
        }

        let remaining = self.fail_next_open_stream.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_open_stream
                .store(remaining - 1, Ordering::SeqCst);
            return Err("scripted open_stream failure".into());
        }

        let (handle, controller) = stream_pair();
        *self.last_stream.lock().expect("poisoned") = Some(controller);
        Ok(handle)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.fire_death_if_first();
    }

    fn register_death_hook(&self, hook: DeathHook) {
        *self.death_hook.lock().expect("poisoned") = Some(hook);
    }
}

/// A dialer whose behavior is scripted by the test: optionally hand out
/// pre-built transports in order, optionally fail the next N dials.
pub struct ScriptedDialer {
    queued: Mutex<VecDeque<Arc<TestSessionTransport>>>,
    fail_next: AtomicUsize,
    dial_count: AtomicUsize,
}

impl ScriptedDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            fail_next: AtomicUsize::new(0),
            dial_count: AtomicUsize::new(0),
        })
    }

    /// Queue a specific transport to be returned by the next dial instead
    /// of a freshly constructed one.
    pub fn push_session(&self, transport: Arc<TestSessionTransport>) {
        self.queued.lock().expect("poisoned").push_back(transport);
    }

    /// Make the next `n` dial attempts fail.
    pub fn fail_next_dials(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dial_count.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedDialer {
    fn default() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fail_next: AtomicUsize::new(0),
            dial_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial_session(&self, _ctx: &DialContext) -> Result<Arc<dyn SessionTransport>, TransportError> {
        self.dial_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err("scripted dial failure".into());
        }

        let transport = self
            .queued
            .lock()
            .expect("poisoned")
            .pop_front()
            .unwrap_or_else(TestSessionTransport::new);

        Ok(transport as Arc<dyn SessionTransport>)
    }
}
