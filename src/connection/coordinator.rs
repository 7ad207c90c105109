use super::config::MemcachedHost;

/// Told when a connection dies on its own, so that it can be replaced or the
/// host failed over. Never called for a `stop()` the caller asked for.
pub trait ConnectionCoordinator: Send + Sync {
    fn disconnect(&self, host: &MemcachedHost);
}

impl<F> ConnectionCoordinator for F
where
    F: Fn(&MemcachedHost) + Send + Sync,
{
    fn disconnect(&self, host: &MemcachedHost) {
        self(host)
    }
}

/// A coordinator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCoordinator;

impl ConnectionCoordinator for NoopCoordinator {
    fn disconnect(&self, _host: &MemcachedHost) {}
}
