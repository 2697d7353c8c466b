use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use murk_transport::SessionId;

/// Protocol version written into every envelope.
pub const PROTOCOL_VERSION: u64 = 2;

/// Inclusive range of envelope versions this build will decode.
pub const MIN_SUPPORTED_VERSION: u64 = 1;
pub const MAX_SUPPORTED_VERSION: u64 = 2;

/// Per-peer capacity of the pending-message ring.
pub const PENDING_RING_CAPACITY: usize = 64;

/// Identity of a peer on the network — random 64-bit value the peer
/// mints once and presents at every handshake. Displayed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(u64);

/// Identifier of a chat room / community on a relay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(u64);

/// Content identity of a shared file: SHA-256 over the file bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub [u8; 32]);

macro_rules! hex_u64_id {
    ($name:ident) => {
        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn as_raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:016x})"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = crate::MurkProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                u64::from_str_radix(s, 16).map(Self).map_err(|_| {
                    crate::MurkProtocolError::Deserialization(format!(
                        concat!("invalid ", stringify!($name), ": {:?}"),
                        s
                    ))
                })
            }
        }
    };
}

hex_u64_id!(PeerId);
hex_u64_id!(GroupId);

impl FileId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_string();
        write!(f, "FileId({}...)", &hex[..12])
    }
}

/// Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}
