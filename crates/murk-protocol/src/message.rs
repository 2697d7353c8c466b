/// The Murk message set.
///
/// Every message carries a numeric wire tag; the envelope codec writes
/// the tag list up front and dispatches on it when decoding. Bodies are
/// MessagePack. Requests, responses, and relayed callbacks share the
/// one enum — a callback is simply a message the relay forwards to a
/// third peer instead of answering itself.
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::MurkProtocolError;
use crate::types::{FileId, GroupId, PeerId, SessionId};

// ── Wire tags ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    Handshake = 1,
    HandshakeAck = 2,
    Join = 3,
    JoinAck = 4,
    Quit = 5,
    Chat = 6,
    Browse = 7,
    BrowseReply = 8,
    ClientList = 9,
    ClientListReply = 10,
    Search = 11,
    SearchReply = 12,
    Socket = 13,
    SocketAck = 14,
    Tunnel = 15,
    TunnelAck = 16,
    Ping = 17,
    Pong = 18,
    UploadPoll = 19,
    UploadTask = 20,
    UploadChunk = 21,
    UploadChunkAck = 22,
    Download = 23,
    DownloadReply = 24,
}

impl MessageTag {
    pub fn from_u8(raw: u8) -> Result<Self, MurkProtocolError> {
        use MessageTag::*;
        Ok(match raw {
            1 => Handshake,
            2 => HandshakeAck,
            3 => Join,
            4 => JoinAck,
            5 => Quit,
            6 => Chat,
            7 => Browse,
            8 => BrowseReply,
            9 => ClientList,
            10 => ClientListReply,
            11 => Search,
            12 => SearchReply,
            13 => Socket,
            14 => SocketAck,
            15 => Tunnel,
            16 => TunnelAck,
            17 => Ping,
            18 => Pong,
            19 => UploadPoll,
            20 => UploadTask,
            21 => UploadChunk,
            22 => UploadChunkAck,
            23 => Download,
            24 => DownloadReply,
            other => return Err(MurkProtocolError::UnknownTag(other)),
        })
    }
}

// ── Shared payload types ───────────────────────────────────────────────

/// Presence summary for one peer, as the relay reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer: PeerId,
    /// Public endpoint, if the peer is directly reachable.
    pub endpoint: Option<SocketAddr>,
    /// True when the peer is only reachable through this relay.
    pub behind_relay: bool,
    pub muted: bool,
}

/// Metadata for one shared file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub chunk_size: u32,
}

impl FileInfo {
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.chunk_size as u64)
    }
}

// ── Message bodies ─────────────────────────────────────────────────────

/// Session establishment — the only message accepted without a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub peer: PeerId,
    /// Public endpoint, or `None` for a peer behind NAT.
    pub endpoint: Option<SocketAddr>,
    /// Fresh symmetric session key; every later frame on this session
    /// is sealed with it.
    pub session_key: [u8; 32],
    /// SHA-256 proof of the relay password, when the relay requires one.
    pub credentials: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub session: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Join an existing room by id, or create/join by name.
    pub group: Option<GroupId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    pub group: GroupId,
    pub members: Vec<PeerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub from: PeerId,
    /// Direct recipient; `None` means room broadcast.
    pub to: Option<PeerId>,
    pub group: Option<GroupId>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browse {
    pub from: PeerId,
    /// Whose shared files to list.
    pub peer: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseReply {
    pub from: PeerId,
    pub to: PeerId,
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientListReply {
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Search {
    pub from: PeerId,
    pub id: u64,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReply {
    pub from: PeerId,
    pub to: PeerId,
    pub id: u64,
    pub hits: Vec<FileInfo>,
}

/// Poll the relay for the next chunk it wants for `file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPoll {
    pub file: FileId,
    pub chunk_count: u64,
}

/// Relay's answer to a poll. `chunk: None` means "no chunk ready yet" —
/// the uploader backs off, it is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub file: FileId,
    pub chunk: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    pub file: FileId,
    pub chunk: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunkAck {
    pub file: FileId,
    pub chunk: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub file: FileId,
    pub chunk: u64,
}

/// Download answer. `data: None` with no redirect means the chunk is not
/// ready yet; a redirect points the downloader at another relay that is
/// seeding the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReply {
    pub file: FileId,
    pub chunk: u64,
    pub data: Option<Vec<u8>>,
    pub redirect: Option<SocketAddr>,
}

// ── The message enum ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Handshake(Handshake),
    HandshakeAck(HandshakeAck),
    Join(Join),
    JoinAck(JoinAck),
    Quit,
    Chat(Chat),
    Browse(Browse),
    BrowseReply(BrowseReply),
    ClientList,
    ClientListReply(ClientListReply),
    Search(Search),
    SearchReply(SearchReply),
    /// Register this connection as one of the peer's delivery sockets.
    Socket,
    SocketAck,
    /// Register this connection as the peer's dedicated tunnel,
    /// replacing any previous one.
    Tunnel,
    TunnelAck,
    Ping,
    Pong,
    UploadPoll(UploadPoll),
    UploadTask(UploadTask),
    UploadChunk(UploadChunk),
    UploadChunkAck(UploadChunkAck),
    Download(Download),
    DownloadReply(DownloadReply),
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Handshake(_) => MessageTag::Handshake,
            Message::HandshakeAck(_) => MessageTag::HandshakeAck,
            Message::Join(_) => MessageTag::Join,
            Message::JoinAck(_) => MessageTag::JoinAck,
            Message::Quit => MessageTag::Quit,
            Message::Chat(_) => MessageTag::Chat,
            Message::Browse(_) => MessageTag::Browse,
            Message::BrowseReply(_) => MessageTag::BrowseReply,
            Message::ClientList => MessageTag::ClientList,
            Message::ClientListReply(_) => MessageTag::ClientListReply,
            Message::Search(_) => MessageTag::Search,
            Message::SearchReply(_) => MessageTag::SearchReply,
            Message::Socket => MessageTag::Socket,
            Message::SocketAck => MessageTag::SocketAck,
            Message::Tunnel => MessageTag::Tunnel,
            Message::TunnelAck => MessageTag::TunnelAck,
            Message::Ping => MessageTag::Ping,
            Message::Pong => MessageTag::Pong,
            Message::UploadPoll(_) => MessageTag::UploadPoll,
            Message::UploadTask(_) => MessageTag::UploadTask,
            Message::UploadChunk(_) => MessageTag::UploadChunk,
            Message::UploadChunkAck(_) => MessageTag::UploadChunkAck,
            Message::Download(_) => MessageTag::Download,
            Message::DownloadReply(_) => MessageTag::DownloadReply,
        }
    }

    /// Whether this message may only be dispatched on an authenticated
    /// (valid-session) connection. Handshake is the single exception.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Message::Handshake(_))
    }

    /// Serialize the body (without the tag — the envelope header carries it).
    pub fn encode_body(&self) -> Result<Vec<u8>, MurkProtocolError> {
        macro_rules! body {
            ($payload:expr) => {
                rmp_serde::to_vec($payload).map_err(Into::into)
            };
        }
        match self {
            Message::Handshake(m) => body!(m),
            Message::HandshakeAck(m) => body!(m),
            Message::Join(m) => body!(m),
            Message::JoinAck(m) => body!(m),
            Message::Quit => Ok(Vec::new()),
            Message::Chat(m) => body!(m),
            Message::Browse(m) => body!(m),
            Message::BrowseReply(m) => body!(m),
            Message::ClientList => Ok(Vec::new()),
            Message::ClientListReply(m) => body!(m),
            Message::Search(m) => body!(m),
            Message::SearchReply(m) => body!(m),
            Message::Socket => Ok(Vec::new()),
            Message::SocketAck => Ok(Vec::new()),
            Message::Tunnel => Ok(Vec::new()),
            Message::TunnelAck => Ok(Vec::new()),
            Message::Ping => Ok(Vec::new()),
            Message::Pong => Ok(Vec::new()),
            Message::UploadPoll(m) => body!(m),
            Message::UploadTask(m) => body!(m),
            Message::UploadChunk(m) => body!(m),
            Message::UploadChunkAck(m) => body!(m),
            Message::Download(m) => body!(m),
            Message::DownloadReply(m) => body!(m),
        }
    }

    /// Deserialize a body for `tag`. Unknown tags were already rejected
    /// by [`MessageTag::from_u8`]; a body that does not parse for its
    /// tag is a protocol error, never silently skipped.
    pub fn decode_body(tag: MessageTag, body: &[u8]) -> Result<Self, MurkProtocolError> {
        macro_rules! body {
            ($variant:path) => {
                rmp_serde::from_slice(body).map($variant).map_err(Into::into)
            };
        }
        Ok(match tag {
            MessageTag::Handshake => return body!(Message::Handshake),
            MessageTag::HandshakeAck => return body!(Message::HandshakeAck),
            MessageTag::Join => return body!(Message::Join),
            MessageTag::JoinAck => return body!(Message::JoinAck),
            MessageTag::Quit => Message::Quit,
            MessageTag::Chat => return body!(Message::Chat),
            MessageTag::Browse => return body!(Message::Browse),
            MessageTag::BrowseReply => return body!(Message::BrowseReply),
            MessageTag::ClientList => Message::ClientList,
            MessageTag::ClientListReply => return body!(Message::ClientListReply),
            MessageTag::Search => return body!(Message::Search),
            MessageTag::SearchReply => return body!(Message::SearchReply),
            MessageTag::Socket => Message::Socket,
            MessageTag::SocketAck => Message::SocketAck,
            MessageTag::Tunnel => Message::Tunnel,
            MessageTag::TunnelAck => Message::TunnelAck,
            MessageTag::Ping => Message::Ping,
            MessageTag::Pong => Message::Pong,
            MessageTag::UploadPoll => return body!(Message::UploadPoll),
            MessageTag::UploadTask => return body!(Message::UploadTask),
            MessageTag::UploadChunk => return body!(Message::UploadChunk),
            MessageTag::UploadChunkAck => return body!(Message::UploadChunkAck),
            MessageTag::Download => return body!(Message::Download),
            MessageTag::DownloadReply => return body!(Message::DownloadReply),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Handshake(Handshake {
                peer: PeerId::from_raw(1),
                endpoint: Some("127.0.0.1:4040".parse().unwrap()),
                session_key: [7; 32],
                credentials: None,
            }),
            Message::HandshakeAck(HandshakeAck {
                session: SessionId::from_raw(9),
            }),
            Message::Join(Join {
                group: None,
                name: "lobby".into(),
            }),
            Message::Quit,
            Message::Chat(Chat {
                from: PeerId::from_raw(1),
                to: Some(PeerId::from_raw(2)),
                group: None,
                text: "hello".into(),
            }),
            Message::ClientList,
            Message::Socket,
            Message::Tunnel,
            Message::Ping,
            Message::UploadPoll(UploadPoll {
                file: FileId([1; 32]),
                chunk_count: 16,
            }),
            Message::DownloadReply(DownloadReply {
                file: FileId([1; 32]),
                chunk: 3,
                data: Some(vec![0xAB; 128]),
                redirect: None,
            }),
        ]
    }

    #[test]
    fn body_roundtrip_every_sample() {
        for message in sample_messages() {
            let body = message.encode_body().expect("encode");
            let decoded = Message::decode_body(message.tag(), &body).expect("decode");
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn tag_mapping_roundtrip() {
        for message in sample_messages() {
            let tag = message.tag();
            assert_eq!(MessageTag::from_u8(tag as u8).unwrap(), tag);
        }
    }

    #[test]
    fn unknown_tag_fails_loudly() {
        let err = MessageTag::from_u8(0).unwrap_err();
        assert!(matches!(err, MurkProtocolError::UnknownTag(0)));
        let err = MessageTag::from_u8(200).unwrap_err();
        assert!(matches!(err, MurkProtocolError::UnknownTag(200)));
    }

    #[test]
    fn only_handshake_skips_session() {
        for message in sample_messages() {
            let expect = !matches!(message, Message::Handshake(_));
            assert_eq!(message.requires_session(), expect, "{:?}", message.tag());
        }
    }

    #[test]
    fn empty_body_for_bare_tags() {
        assert!(Message::Quit.encode_body().unwrap().is_empty());
        assert!(Message::Ping.encode_body().unwrap().is_empty());
        assert_eq!(
            Message::decode_body(MessageTag::Pong, &[]).unwrap(),
            Message::Pong
        );
    }

    #[test]
    fn garbage_body_is_an_error() {
        let err = Message::decode_body(MessageTag::Chat, b"\xFF\xFF\xFF").unwrap_err();
        assert!(matches!(err, MurkProtocolError::Deserialization(_)));
    }

    #[test]
    fn chunk_count_rounds_up() {
        let info = FileInfo {
            id: FileId([0; 32]),
            name: "a".into(),
            size: 1001,
            chunk_size: 100,
        };
        assert_eq!(info.chunk_count(), 11);
    }
}
