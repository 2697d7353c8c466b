//! Murk protocol layer.
//!
//! Implements the envelope codec, session and group encryption, the
//! relay accept/dispatch engine, chunked file transfer, and the
//! timeout-driven lifecycle registry on top of `murk-transport`.
//!
//! Wire format: checksummed multi-message envelopes with MessagePack
//! bodies. Crypto: XChaCha20-Poly1305, session layer inside an
//! optional passphrase-derived group layer.

pub mod crypto;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod lifecycle;
pub mod message;
pub mod throttle;
pub mod transfer;
pub mod types;

pub use crypto::{password_proof, Cipher, CryptoEnvelope, PlainCipher, SymmetricCipher};
pub use engine::{
    serve_connection, spawn_sweeper, Acceptor, Command, ConnState, EngineState, Promotion,
    RelayConfig, RelayCore, RunState, Service, ServiceConfig, ServiceHandle, SweepConfig,
};
pub use error::MurkProtocolError;
pub use events::{EventSink, Notice};
pub use lifecycle::{
    AbuseTracker, GroupRecord, Lifecycle, PeerRecord, PendingRing, RelayRecord, SessionRecord,
    TunnelHandle,
};
pub use message::{FileInfo, Message, MessageTag, PeerSummary};
pub use throttle::{Backoff, Throttle};
pub use transfer::{
    ChunkFetch, ChunkTransport, RelayChunkTransport, TransferEngine, TransferHandle,
    TransferState, UploadTask,
};
pub use types::{
    now_ms, FileId, GroupId, PeerId, SessionId, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
    PROTOCOL_VERSION,
};
