/// Errors returned by the Murk transport layer.
#[derive(Debug, thiserror::Error)]
pub enum MurkTransportError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("body too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("unknown status code: {0}")]
    UnknownStatus(u16),
}
