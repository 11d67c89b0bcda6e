//! Client-side session pool manager for the AnyTLS transport protocol.
//!
//! Multiplexes application-level streams onto a small population of
//! long-lived sessions under idle/age/rate-control policies. The AnyTLS
//! wire framing, TLS handshake and padding live outside this crate; see
//! [`session::Dialer`] for the seam the real transport plugs into.

pub mod clock;
pub mod config;
pub mod pool;
pub mod session;
pub mod testing;
pub mod utils;

pub use pool::PoolManager;
pub use session::{DialContext, Dialer, PaddingFactoryHandle, SessionTransport, StreamHandle};
pub use utils::error::{PoolError, Result};
