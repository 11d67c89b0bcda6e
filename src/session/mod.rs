pub mod stream;
pub mod types;

pub use stream::ManagedStream;
pub use types::{
    DeathHook, DialContext, Dialer, ManagedSession, PaddingFactoryHandle, SessionTransport,
    StreamHandle, TransportError,
};
