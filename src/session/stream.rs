use super::types::StreamHandle;

/// The stream handed back to callers of [`crate::pool::manager::PoolManager::acquire_stream`].
///
/// This is a thin wrapper around the opaque [`StreamHandle`] trait object;
/// its only job is to give callers a concrete, nameable return type while
/// the actual multiplexed-stream behavior remains the transport's concern.
pub struct ManagedStream {
    inner: Box<dyn StreamHandle>,
}

impl ManagedStream {
    pub(crate) fn new(inner: Box<dyn StreamHandle>) -> Self {
        Self { inner }
    }

    pub fn handle(&self) -> &dyn StreamHandle {
        self.inner.as_ref()
    }
}
