//! Thin wiring demonstration for the pool manager: loads a config file (or
//! defaults), dials against a local TCP loopback listener standing in for
//! a real AnyTLS endpoint, and runs a manager against it until Ctrl+C.
//!
//! This binary is not part of the pool manager's contract - the real
//! AnyTLS dialer, framing and TLS/ECH live outside this crate entirely.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anytls_pool::config::{merge_pool_config, GlobalPoolConfig, PoolConfig};
use anytls_pool::session::{DeathHook, DialContext, Dialer, SessionTransport, StreamHandle, TransportError};
use anytls_pool::{PoolManager, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "anytls-pool-demo")]
#[command(about = "Wiring demonstration for the AnyTLS client session pool manager", long_about = None)]
struct Args {
    /// Global pool config file (TOML), mirroring the `GlobalPoolConfig` layer
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Loopback address standing in for the real AnyTLS remote endpoint
    #[arg(long, default_value = "127.0.0.1:0")]
    upstream: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("anytls-pool-demo v{} starting", env!("CARGO_PKG_VERSION"));

    let global = match &args.config {
        Some(path) => {
            info!("Loading pool config from {:?}", path);
            let content = std::fs::read_to_string(path)
                .map_err(|e| anytls_pool::PoolError::Config(format!("failed to read config file: {e}")))?;
            toml::from_str::<GlobalPoolConfig>(&content)
                .map_err(|e| anytls_pool::PoolError::Config(format!("failed to parse config: {e}")))?
        }
        None => {
            info!("No config file specified, using defaults");
            GlobalPoolConfig::default()
        }
    };

    let config: PoolConfig = merge_pool_config(Some(&global), None, None)?;
    info!(?config, "effective pool configuration");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| anytls_pool::PoolError::Config(format!("failed to bind demo upstream: {e}")))?;
    let upstream_addr = listener.local_addr().expect("bound listener has a local addr");
    tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let dialer: Arc<dyn Dialer> = Arc::new(LoopbackDialer { addr: upstream_addr });
    let manager = PoolManager::new(
        dialer,
        None,
        config,
        Arc::new(anytls_pool::clock::SystemClock),
    );

    let ctx = DialContext::new(std::time::Duration::from_secs(5));
    match manager.acquire_stream(&ctx).await {
        Ok(_stream) => info!("acquired a demonstration stream"),
        Err(err) => error!(error = %err, "failed to acquire demonstration stream"),
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for Ctrl+C");
    info!("shutting down");
    manager.close().await;

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| anytls_pool::PoolError::Config(format!("invalid log level: {e}")))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    Ok(())
}

/// Dials a plain loopback TCP connection and wraps it as a `SessionTransport`.
/// Stands in for the real AnyTLS dialer, which lives outside this crate.
struct LoopbackDialer {
    addr: SocketAddr,
}

#[async_trait::async_trait]
impl Dialer for LoopbackDialer {
    async fn dial_session(&self, ctx: &DialContext) -> std::result::Result<Arc<dyn SessionTransport>, TransportError> {
        let stream = tokio::time::timeout(ctx.budget, TcpStream::connect(self.addr))
            .await
            .map_err(|_| -> TransportError { "dial timed out".into() })?
            .map_err(|e| -> TransportError { Box::new(e) })?;

        Ok(Arc::new(LoopbackSession {
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
            death_hook: Mutex::new(None),
        }))
    }
}

struct LoopbackSession {
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
    death_hook: Mutex<Option<DeathHook>>,
}

#[async_trait::async_trait]
impl SessionTransport for LoopbackSession {
    async fn open_stream(&self) -> std::result::Result<Box<dyn StreamHandle>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("session is closed".into());
        }
        Ok(Box::new(LoopbackStream::default()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stream.lock().expect("poisoned").take();
            if let Some(hook) = self.death_hook.lock().expect("poisoned").take() {
                hook();
            }
        }
    }

    fn register_death_hook(&self, hook: DeathHook) {
        *self.death_hook.lock().expect("poisoned") = Some(hook);
    }
}

/// A demonstration stream with no real multiplexed I/O: it fires its death
/// hook as soon as it is dropped, standing in for "the stream ended".
#[derive(Default)]
struct LoopbackStream {
    death_hook: Mutex<Option<DeathHook>>,
}

impl StreamHandle for LoopbackStream {
    fn register_death_hook(&self, hook: DeathHook) {
        *self.death_hook.lock().expect("poisoned") = Some(hook);
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        if let Some(hook) = self.death_hook.lock().expect("poisoned").take() {
            hook();
        }
    }
}
