use std::time::Duration;

/// Configuration for transport connections.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use murk_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_body(2 * 1024 * 1024)
///     .io_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum accepted request/response body size in bytes.
    pub(crate) max_body: usize,
    /// Timeout applied to a single read or write of one frame.
    pub(crate) io_timeout: Duration,
    /// Timeout for establishing an outbound connection.
    pub(crate) connect_timeout: Duration,
    /// Maximum idle connections kept per remote address in the pool.
    pub(crate) max_idle_per_addr: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self {
            max_body: 4 * 1024 * 1024, // 4 MB: one chunk plus envelope overhead
            io_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_idle_per_addr: 4,
        }
    }

    /// Set maximum body size (default: 4 MB).
    pub fn max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    /// Set the per-frame read/write timeout (default: 30 s).
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the outbound connect timeout (default: 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle-connection cap per remote address (default: 4).
    pub fn max_idle_per_addr(mut self, count: usize) -> Self {
        self.max_idle_per_addr = count;
        self
    }
}
