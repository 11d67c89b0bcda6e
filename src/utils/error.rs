use thiserror::Error;

/// Errors surfaced across the pool manager's public API.
///
/// `DialFailureProactive` and `SessionSpontaneousDeath` from the design are
/// deliberately absent here: both are absorbed internally (logged, never
/// returned to a caller) per the propagation rules the manager follows.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    PoolClosed,

    #[error("failed to create session: {0}")]
    DialFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to create stream: {0}")]
    StreamOpenFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
