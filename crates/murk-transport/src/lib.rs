//! Murk transport layer.
//!
//! A deliberately small HTTP-like request/response transport: every
//! protocol frame travels as the body of one request or response over a
//! plain TCP connection. The session identifier rides in a request
//! header; relay answers carry one of a handful of HTTP status codes.
//!
//! The protocol layer above never touches sockets directly — it works
//! with [`Connection`] (generic over the stream, so tests can use
//! in-memory duplex pipes) and the client-side [`Pool`].

mod config;
mod connection;
mod error;
mod frame;
mod pool;

pub use config::TransportConfig;
pub use connection::Connection;
pub use error::MurkTransportError;
pub use frame::{Request, Response, Status};
pub use pool::Pool;

use std::fmt;
use std::str::FromStr;

/// Identifier of one live session on a relay.
///
/// Random 64-bit value minted by the relay at handshake time. Displayed
/// and parsed as fixed-width hex; travels in the `X-Murk-Session`
/// request header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:016x})", self.0)
    }
}

impl FromStr for SessionId {
    type Err = MurkTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| MurkTransportError::InvalidSessionId(s.to_string()))
    }
}

impl serde::Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for SessionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self)
    }
}
