//! Connection Configuration
//!
//! Everything a connection needs to know before `start()`: where the server
//! is, how long to wait for it, and how to behave while idle.

use crate::expiring::SweepConfig;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Writer capacity used when the OS does not report a send buffer size
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 8 * 1024;

/// Bytes reserved for each socket read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// A memcached server as the rest of the client knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemcachedHost {
    name: String,
    address: SocketAddr,
}

impl MemcachedHost {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl From<SocketAddr> for MemcachedHost {
    fn from(address: SocketAddr) -> Self {
        Self::new(address.to_string(), address)
    }
}

impl fmt::Display for MemcachedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address.to_string() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Username and password sent right after connecting.
#[derive(Clone, PartialEq, Eq)]
pub struct Authentication {
    username: String,
    password: String,
}

impl Authentication {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// Never print the password
impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Tunables shared by the pipelined and blocking connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on the TCP connect (default: 3s)
    pub connect_timeout: Duration,

    /// Used when `send()` is given no timeout. `None` waits until the
    /// request resolves or the connection dies.
    pub default_request_timeout: Option<Duration>,

    /// Blocking mode: bound on assembling one response (default: 30s)
    pub read_timeout: Duration,

    /// Idle period before a no-op probe is sent. `None` disables probing.
    pub keep_alive: Option<Duration>,

    /// Bounded readiness wait of the event loop (default: 1s)
    pub idle_tick: Duration,

    /// Overrides the writer capacity otherwise taken from SO_SNDBUF
    pub send_buffer_size: Option<usize>,

    /// Bytes reserved per socket read (default: 8 KiB)
    pub read_buffer_size: usize,

    /// Consecutive invalid readiness events tolerated before giving up
    pub max_invalid_readiness: u32,

    /// Blocking mode: lifetime of an unresolved callback (default: 30s)
    pub callback_expiry: Duration,

    /// Blocking mode: eviction cadence of expired callbacks
    pub sweep: SweepConfig,

    pub authentication: Option<Authentication>,

    pub tcp_nodelay: bool,

    pub tcp_keepalive: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            default_request_timeout: None,
            read_timeout: Duration::from_secs(30),
            keep_alive: Some(Duration::from_secs(30)),
            idle_tick: Duration::from_secs(1),
            send_buffer_size: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_invalid_readiness: 3,
            callback_expiry: Duration::from_secs(30),
            sweep: SweepConfig::default(),
            authentication: None,
            tcp_nodelay: true,
            tcp_keepalive: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_default_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_request_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_idle_tick(mut self, tick: Duration) -> Self {
        self.idle_tick = tick;
        self
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_callback_expiry(mut self, expiry: Duration) -> Self {
        self.callback_expiry = expiry;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = Some(authentication);
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Number of idle ticks that make up the keepalive period, if enabled.
    ///
    /// A keepalive shorter than one tick still waits one full tick.
    pub fn keep_alive_ticks(&self) -> Option<u32> {
        let keep_alive = self.keep_alive?;
        let tick = self.idle_tick.as_nanos().max(1);
        let ticks = keep_alive.as_nanos().div_ceil(tick).max(1);
        Some(u32::try_from(ticks).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.default_request_timeout, None);
        assert_eq!(config.keep_alive, Some(Duration::from_secs(30)));
        assert_eq!(config.max_invalid_readiness, 3);
        assert!(config.authentication.is_none());
    }

    #[test]
    fn test_keep_alive_ticks() {
        let config = ConnectionConfig::default();
        assert_eq!(config.keep_alive_ticks(), Some(30));

        let config = ConnectionConfig::default()
            .with_idle_tick(Duration::from_millis(400))
            .with_keep_alive(Some(Duration::from_secs(1)));
        assert_eq!(config.keep_alive_ticks(), Some(3));

        let config = ConnectionConfig::default()
            .with_idle_tick(Duration::from_secs(1))
            .with_keep_alive(Some(Duration::from_millis(10)));
        assert_eq!(config.keep_alive_ticks(), Some(1));

        let config = ConnectionConfig::default().with_keep_alive(None);
        assert_eq!(config.keep_alive_ticks(), None);
    }

    #[test]
    fn test_authentication_debug_hides_password() {
        let auth = Authentication::new("alice", "secret");
        let printed = format!("{:?}", auth);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_host_display() {
        let address: SocketAddr = "127.0.0.1:11211".parse().unwrap();
        assert_eq!(MemcachedHost::from(address).to_string(), "127.0.0.1:11211");
        assert_eq!(
            MemcachedHost::new("cache-1", address).to_string(),
            "cache-1 (127.0.0.1:11211)"
        );
    }
}
