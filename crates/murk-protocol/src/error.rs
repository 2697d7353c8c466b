use crate::types::PeerId;

/// Protocol-level errors for Murk.
///
/// Wraps transport errors and adds the frame/crypto/transfer taxonomy.
/// `Throttled` is not a failure — it tells the caller to reschedule
/// without touching the network.
#[derive(Debug, thiserror::Error)]
pub enum MurkProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] murk_transport::MurkTransportError),

    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    #[error("unsupported protocol version {version} (supported {min}..={max})")]
    UnsupportedVersion { version: u64, min: u64, max: u64 },

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("truncated frame")]
    Truncated,

    #[error("session invalid")]
    SessionInvalid,

    #[error("relay refused request with status {status}")]
    Refused { status: u16 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("throttled")]
    Throttled,

    #[error("no tunnel to peer {peer}")]
    NotEnoughTunnels { peer: PeerId },

    #[error("transfer gave up after {retries} failed attempts")]
    RetryExhausted { retries: u32 },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk index {index} out of range")]
    ChunkOutOfRange { index: u64 },

    #[error("file unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("engine is not running")]
    NotRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for MurkProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MurkProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MurkProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MurkProtocolError::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_checksum() {
        assert_eq!(
            MurkProtocolError::ChecksumMismatch.to_string(),
            "frame checksum mismatch"
        );
    }

    #[test]
    fn display_version() {
        let err = MurkProtocolError::UnsupportedVersion {
            version: 9,
            min: 1,
            max: 2,
        };
        assert_eq!(
            err.to_string(),
            "unsupported protocol version 9 (supported 1..=2)"
        );
    }

    #[test]
    fn display_no_tunnel() {
        let err = MurkProtocolError::NotEnoughTunnels {
            peer: PeerId::from_raw(0xab),
        };
        assert_eq!(err.to_string(), "no tunnel to peer 00000000000000ab");
    }
}
