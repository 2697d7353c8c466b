/// Per-message relay handlers.
///
/// The acceptor decodes an envelope and feeds each message here in
/// header order. A handler returns the messages to pack into the
/// response; anything destined for a third peer is forwarded through
/// that peer's tunnel (or queued on its pending ring) rather than
/// answered to the sender.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::crypto::{password_proof, Cipher, CryptoEnvelope, SymmetricCipher};
use crate::envelope;
use crate::error::MurkProtocolError;
use crate::events::{EventSink, Notice};
use crate::lifecycle::{Lifecycle, PeerRecord, SessionRecord};
use crate::message::{
    Chat, ClientListReply, Download, DownloadReply, FileInfo, Handshake, HandshakeAck, Join,
    JoinAck, Message, Search, UploadChunk, UploadChunkAck, UploadPoll, UploadTask,
};
use crate::types::{now_ms, FileId, PeerId, SessionId};

/// Relay-side behavior knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay password; handshakes must prove it when set.
    pub password: Option<String>,
    /// Passphrases for encrypted rooms this relay hosts, by room name.
    pub room_passphrases: HashMap<String, String>,
    /// Whether this relay stores and serves file chunks.
    pub serve_transfers: bool,
    /// Where to redirect download requests for files we do not hold.
    pub transfer_redirect: Option<SocketAddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            password: None,
            room_passphrases: HashMap::new(),
            serve_transfers: true,
            transfer_redirect: None,
        }
    }
}

/// What the connection loop should do after the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Become the peer's dedicated tunnel.
    Tunnel,
    /// Become one of the peer's pooled delivery sockets.
    Socket,
}

/// Mutable per-connection context threaded through the handlers.
#[derive(Default)]
pub struct ConnState {
    pub session: Option<SessionId>,
    pub peer: Option<PeerId>,
    pub promote: Option<Promotion>,
    /// Set by `quit`; the loop closes the connection after responding.
    pub closing: bool,
}

impl ConnState {
    pub fn authenticated(&self) -> bool {
        self.session.is_some() && self.peer.is_some()
    }
}

// ── Relay-side chunk store ─────────────────────────────────────────────

struct StoredFile {
    info: FileInfo,
    chunks: HashMap<u64, Vec<u8>>,
}

impl StoredFile {
    fn next_missing(&self) -> Option<u64> {
        (0..self.info.chunk_count()).find(|index| !self.chunks.contains_key(index))
    }

    fn is_complete(&self) -> bool {
        self.next_missing().is_none()
    }
}

/// In-memory chunk buffer for files in transit through this relay.
#[derive(Default)]
struct TransferStore {
    files: Mutex<HashMap<FileId, StoredFile>>,
}

impl TransferStore {
    fn poll(&self, file: FileId, chunk_count: u64, chunk_size: u32) -> Option<u64> {
        let mut files = self.files.lock().expect("store lock");
        let entry = files.entry(file).or_insert_with(|| StoredFile {
            info: FileInfo {
                id: file,
                name: String::new(),
                size: chunk_count * chunk_size as u64,
                chunk_size,
            },
            chunks: HashMap::new(),
        });
        entry.next_missing()
    }

    fn put(&self, file: FileId, chunk: u64, data: Vec<u8>) -> bool {
        let mut files = self.files.lock().expect("store lock");
        match files.get_mut(&file) {
            Some(entry) => {
                entry.chunks.insert(chunk, data);
                entry.is_complete()
            }
            None => false,
        }
    }

    fn get(&self, file: FileId, chunk: u64) -> Option<Vec<u8>> {
        self.files
            .lock()
            .expect("store lock")
            .get(&file)
            .and_then(|entry| entry.chunks.get(&chunk).cloned())
    }
}

// ── The core ───────────────────────────────────────────────────────────

pub struct RelayCore {
    pub lifecycle: Arc<Lifecycle>,
    pub events: EventSink,
    pub config: RelayConfig,
    store: TransferStore,
}

impl RelayCore {
    pub fn new(lifecycle: Arc<Lifecycle>, events: EventSink, config: RelayConfig) -> Self {
        Self {
            lifecycle,
            events,
            config,
            store: TransferStore::default(),
        }
    }

    /// Crypto envelope for a session: the session cipher plus, when an
    /// encrypted room is the session's active group, that room's cipher
    /// as the outer layer. The active group is the one recorded on the
    /// session itself, so both sides agree on which key seals what even
    /// when the peer sits in several encrypted rooms.
    pub fn envelope_for(&self, record: &SessionRecord) -> CryptoEnvelope {
        let group = record
            .group
            .and_then(|group| self.lifecycle.group_cipher(group));
        CryptoEnvelope::new(record.cipher.clone(), group)
    }

    /// Dispatch one decoded message. Returns the replies to pack into
    /// the outbound envelope.
    pub fn handle(
        &self,
        conn: &mut ConnState,
        message: Message,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        match message {
            Message::Handshake(handshake) => self.on_handshake(conn, handshake),
            Message::Join(join) => self.on_join(conn, join),
            Message::Quit => self.on_quit(conn),
            Message::Chat(chat) => self.on_chat(conn, chat),
            Message::Browse(browse) => self.on_forward_to(browse.peer, Message::Browse(browse)),
            Message::BrowseReply(reply) => {
                self.on_forward_to(reply.to, Message::BrowseReply(reply))
            }
            Message::ClientList => self.on_client_list(),
            Message::Search(search) => self.on_search(conn, search),
            Message::SearchReply(reply) => {
                self.on_forward_to(reply.to, Message::SearchReply(reply))
            }
            Message::Socket => {
                conn.promote = Some(Promotion::Socket);
                Ok(vec![Message::SocketAck])
            }
            Message::Tunnel => {
                conn.promote = Some(Promotion::Tunnel);
                Ok(vec![Message::TunnelAck])
            }
            Message::Ping => {
                self.touch(conn);
                Ok(vec![Message::Pong])
            }
            Message::Pong => {
                self.touch(conn);
                Ok(vec![])
            }
            Message::UploadPoll(poll) => self.on_upload_poll(poll),
            Message::UploadChunk(chunk) => self.on_upload_chunk(chunk),
            Message::Download(download) => self.on_download(download),
            // Reply-only tags arriving as requests are protocol noise.
            other => {
                tracing::debug!(tag = ?other.tag(), "ignoring unexpected message");
                Ok(vec![])
            }
        }
    }

    fn touch(&self, conn: &ConnState) {
        if let Some(session) = conn.session {
            self.lifecycle.touch_session(session);
        }
        if let Some(peer) = conn.peer {
            self.lifecycle.touch_peer(peer);
        }
    }

    // ── Handshake ──────────────────────────────────────────────────

    fn on_handshake(
        &self,
        conn: &mut ConnState,
        handshake: Handshake,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        if let Some(password) = &self.config.password {
            let expected = password_proof(password);
            if handshake.credentials != Some(expected) {
                tracing::info!(peer = %handshake.peer, "handshake rejected, bad credentials");
                return Err(MurkProtocolError::Refused { status: 401 });
            }
        }

        let peer = handshake.peer;
        let cipher: Arc<dyn Cipher> = Arc::new(SymmetricCipher::new(handshake.session_key));
        let session = self.lifecycle.insert_session(peer, cipher);

        let groups = self
            .lifecycle
            .peer(peer)
            .map(|existing| existing.groups)
            .unwrap_or_default();
        self.lifecycle.upsert_peer(PeerRecord {
            peer,
            endpoint: handshake.endpoint,
            behind_relay: handshake.endpoint.is_none(),
            muted: self.lifecycle.is_muted(peer),
            last_activity: now_ms(),
            session: Some(session),
            groups,
        });

        conn.session = Some(session);
        conn.peer = Some(peer);
        self.lifecycle.mark_session_established(session);
        self.events.emit(Notice::SessionUp { peer, session });
        tracing::info!(%peer, %session, "session established");

        Ok(vec![Message::HandshakeAck(HandshakeAck { session })])
    }

    // ── Presence ───────────────────────────────────────────────────

    fn on_join(
        &self,
        conn: &mut ConnState,
        join: Join,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        let peer = conn.peer.ok_or(MurkProtocolError::SessionInvalid)?;

        let group = match join.group {
            Some(group) if self.lifecycle.group(group).is_some() => group,
            _ => {
                let cipher = self.config.room_passphrases.get(&join.name).map(|pass| {
                    // The id is minted first so the key can be salted with it.
                    let group = self.lifecycle.create_or_get_group(&join.name, None);
                    (group, pass.clone())
                });
                match cipher {
                    Some((group, passphrase)) => {
                        let oracle: Arc<dyn Cipher> =
                            Arc::new(SymmetricCipher::from_passphrase(&passphrase, group));
                        self.lifecycle.set_group_cipher(group, oracle);
                        group
                    }
                    None => self.lifecycle.create_or_get_group(&join.name, None),
                }
            }
        };

        self.lifecycle.join_group(group, peer);
        // An encrypted join becomes the session's active outer layer —
        // the client swaps its own key once it has read the ack. Plain
        // rooms never touch the layer; the client keeps sealing with
        // whatever it used before.
        if self.lifecycle.group_cipher(group).is_some() {
            if let Some(session) = conn.session {
                self.lifecycle.set_session_group(session, Some(group));
            }
        }
        self.touch(conn);
        self.events.emit(Notice::PeerJoined {
            peer,
            group: Some(group),
        });
        tracing::info!(%peer, %group, room = %join.name, "peer joined room");

        let members = self
            .lifecycle
            .group_members(group)
            .into_iter()
            .filter_map(|member| self.lifecycle.peer(member))
            .map(|record| record.summary())
            .collect();
        Ok(vec![Message::JoinAck(JoinAck { group, members })])
    }

    fn on_quit(&self, conn: &mut ConnState) -> Result<Vec<Message>, MurkProtocolError> {
        if let Some(peer) = conn.peer {
            self.lifecycle.remove_peer(peer);
            self.events.emit(Notice::PeerLeft { peer });
            tracing::info!(%peer, "peer quit");
        }
        if let Some(session) = conn.session {
            self.lifecycle.remove_session(session);
            if let (Some(peer), Some(session)) = (conn.peer, conn.session) {
                self.events.emit(Notice::SessionDown { peer, session });
            }
        }
        conn.session = None;
        conn.peer = None;
        conn.closing = true;
        Ok(vec![])
    }

    fn on_client_list(&self) -> Result<Vec<Message>, MurkProtocolError> {
        let peers = self
            .lifecycle
            .peer_snapshot()
            .into_iter()
            .map(|record| record.summary())
            .collect();
        Ok(vec![Message::ClientListReply(ClientListReply { peers })])
    }

    // ── Chat & fan-out ─────────────────────────────────────────────

    fn on_chat(
        &self,
        conn: &mut ConnState,
        chat: Chat,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        self.touch(conn);
        if self.lifecycle.is_muted(chat.from) {
            // Muted senders are dropped quietly, not errored.
            tracing::debug!(peer = %chat.from, "dropping chat from muted peer");
            return Ok(vec![]);
        }

        match (chat.to, chat.group) {
            (Some(to), _) => self.on_forward_to(to, Message::Chat(chat)),
            (None, Some(group)) => {
                let members = self.lifecycle.group_members(group);
                for member in members {
                    if member == chat.from {
                        continue;
                    }
                    self.forward(member, Message::Chat(chat.clone()));
                }
                Ok(vec![])
            }
            (None, None) => {
                tracing::debug!(peer = %chat.from, "chat with no recipient dropped");
                Ok(vec![])
            }
        }
    }

    fn on_search(
        &self,
        conn: &mut ConnState,
        search: Search,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        self.touch(conn);
        for record in self.lifecycle.peer_snapshot() {
            if record.peer == search.from {
                continue;
            }
            self.forward(record.peer, Message::Search(search.clone()));
        }
        Ok(vec![])
    }

    fn on_forward_to(
        &self,
        to: PeerId,
        message: Message,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        self.forward(to, message);
        Ok(vec![])
    }

    /// Push one message to `to` through its tunnel or delivery socket,
    /// queuing on the pending ring when no path exists.
    pub fn forward(&self, to: PeerId, message: Message) {
        match self.seal_for(to, std::slice::from_ref(&message)) {
            Ok(Some(frame)) => {
                if let Some(handle) = self.lifecycle.push_handle(to) {
                    if handle.push(frame) {
                        return;
                    }
                }
                self.lifecycle.queue_pending(to, message);
            }
            Ok(None) => {
                // No session for the recipient; queue until it returns.
                self.lifecycle.queue_pending(to, message);
            }
            Err(err) => {
                tracing::warn!(peer = %to, %err, "failed to seal forwarded message");
            }
        }
    }

    /// Flush the pending ring into a freshly registered tunnel, oldest
    /// first. Unsent messages go back to the front of the ring.
    pub fn flush_pending(&self, peer: PeerId) {
        let queued = self.lifecycle.drain_pending(peer);
        if queued.is_empty() {
            return;
        }
        tracing::debug!(%peer, count = queued.len(), "flushing pending ring into tunnel");
        let mut unsent = Vec::new();
        let mut delivering = true;
        for message in queued {
            if delivering {
                match self.seal_for(peer, std::slice::from_ref(&message)) {
                    Ok(Some(frame)) => {
                        let pushed = self
                            .lifecycle
                            .push_handle(peer)
                            .map(|handle| handle.push(frame))
                            .unwrap_or(false);
                        if pushed {
                            continue;
                        }
                        delivering = false;
                    }
                    Ok(None) => delivering = false,
                    Err(err) => {
                        tracing::warn!(%peer, %err, "seal failed during flush");
                        continue;
                    }
                }
            }
            unsent.push(message);
        }
        if !unsent.is_empty() {
            self.lifecycle.requeue_pending(peer, unsent);
        }
    }

    /// Encode + seal messages with the recipient's own session (and
    /// group) layers. `None` when the recipient has no live session.
    fn seal_for(
        &self,
        to: PeerId,
        messages: &[Message],
    ) -> Result<Option<Vec<u8>>, MurkProtocolError> {
        let Some(record) = self
            .lifecycle
            .peer(to)
            .and_then(|peer| peer.session)
            .and_then(|session| self.lifecycle.session(session))
        else {
            return Ok(None);
        };
        let frame = envelope::encode(messages)?;
        self.envelope_for(&record).seal(&frame).map(Some)
    }

    // ── Transfers ──────────────────────────────────────────────────

    fn on_upload_poll(&self, poll: UploadPoll) -> Result<Vec<Message>, MurkProtocolError> {
        if !self.config.serve_transfers {
            return Err(MurkProtocolError::Refused { status: 501 });
        }
        let chunk = self
            .store
            .poll(poll.file, poll.chunk_count, crate::fsutil::CHUNK_SIZE as u32);
        Ok(vec![Message::UploadTask(UploadTask {
            file: poll.file,
            chunk,
        })])
    }

    fn on_upload_chunk(&self, chunk: UploadChunk) -> Result<Vec<Message>, MurkProtocolError> {
        if !self.config.serve_transfers {
            return Err(MurkProtocolError::Refused { status: 501 });
        }
        let complete = self.store.put(chunk.file, chunk.chunk, chunk.data);
        if complete {
            tracing::info!(file = %chunk.file, "relay holds complete file");
        }
        Ok(vec![Message::UploadChunkAck(UploadChunkAck {
            file: chunk.file,
            chunk: chunk.chunk,
        })])
    }

    fn on_download(&self, download: Download) -> Result<Vec<Message>, MurkProtocolError> {
        let data = self.store.get(download.file, download.chunk);
        let redirect = match (&data, self.config.transfer_redirect) {
            (None, Some(target)) => Some(target),
            _ => None,
        };
        Ok(vec![Message::DownloadReply(DownloadReply {
            file: download.file,
            chunk: download.chunk,
            data,
            redirect,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TunnelHandle;

    fn core() -> RelayCore {
        let (sink, rx) = EventSink::with_capacity(256);
        std::mem::drop(rx);
        RelayCore::new(
            Arc::new(Lifecycle::new(Some(1))),
            sink,
            RelayConfig::default(),
        )
    }

    fn handshake(peer: u64) -> Handshake {
        Handshake {
            peer: PeerId::from_raw(peer),
            endpoint: None,
            session_key: [peer as u8; 32],
            credentials: None,
        }
    }

    fn connect(core: &RelayCore, peer: u64) -> ConnState {
        let mut conn = ConnState::default();
        let replies = core.handle(&mut conn, Message::Handshake(handshake(peer))).unwrap();
        assert!(matches!(replies[0], Message::HandshakeAck(_)));
        conn
    }

    #[test]
    fn handshake_creates_session_and_peer() {
        let core = core();
        let conn = connect(&core, 7);
        assert!(conn.authenticated());
        assert_eq!(core.lifecycle.peer_count(), 1);
        assert_eq!(core.lifecycle.session_count(), 1);
        let record = core.lifecycle.peer(PeerId::from_raw(7)).unwrap();
        assert!(record.behind_relay);
    }

    #[test]
    fn handshake_with_wrong_password_is_refused() {
        let (sink, _rx) = EventSink::with_capacity(16);
        let core = RelayCore::new(
            Arc::new(Lifecycle::new(Some(1))),
            sink,
            RelayConfig {
                password: Some("sesame".into()),
                ..Default::default()
            },
        );
        let mut conn = ConnState::default();
        let err = core
            .handle(&mut conn, Message::Handshake(handshake(1)))
            .unwrap_err();
        assert!(matches!(err, MurkProtocolError::Refused { status: 401 }));
        assert!(!conn.authenticated());

        let mut good = handshake(1);
        good.credentials = Some(password_proof("sesame"));
        let replies = core.handle(&mut conn, Message::Handshake(good)).unwrap();
        assert!(matches!(replies[0], Message::HandshakeAck(_)));
    }

    #[test]
    fn join_returns_membership() {
        let core = core();
        let mut alice = connect(&core, 1);
        let mut bob = connect(&core, 2);

        let join = || {
            Message::Join(Join {
                group: None,
                name: "lobby".into(),
            })
        };
        core.handle(&mut alice, join()).unwrap();
        let replies = core.handle(&mut bob, join()).unwrap();
        let Message::JoinAck(ack) = &replies[0] else {
            panic!("expected JoinAck");
        };
        assert_eq!(ack.members.len(), 2);
    }

    #[test]
    fn join_replaces_the_session_group_layer() {
        let (sink, _rx) = EventSink::with_capacity(16);
        let mut passphrases = HashMap::new();
        passphrases.insert("alpha".to_string(), "pw-a".to_string());
        passphrases.insert("beta".to_string(), "pw-b".to_string());
        let core = RelayCore::new(
            Arc::new(Lifecycle::new(Some(1))),
            sink,
            RelayConfig {
                room_passphrases: passphrases,
                ..Default::default()
            },
        );
        let mut conn = connect(&core, 1);
        let session = conn.session.unwrap();
        let join = |name: &str| {
            Message::Join(Join {
                group: None,
                name: name.into(),
            })
        };

        let replies = core.handle(&mut conn, join("alpha")).unwrap();
        let Message::JoinAck(alpha) = &replies[0] else {
            panic!("expected JoinAck");
        };
        assert_eq!(
            core.lifecycle.session(session).unwrap().group,
            Some(alpha.group)
        );

        // A second encrypted room replaces the layer instead of leaving
        // the choice to hash iteration order.
        let replies = core.handle(&mut conn, join("beta")).unwrap();
        let Message::JoinAck(beta) = &replies[0] else {
            panic!("expected JoinAck");
        };
        let record = core.lifecycle.session(session).unwrap();
        assert_eq!(record.group, Some(beta.group));

        let sealed = core.envelope_for(&record).seal(b"x").unwrap();
        let beta_layers = CryptoEnvelope::new(
            record.cipher.clone(),
            core.lifecycle.group_cipher(beta.group),
        );
        assert_eq!(beta_layers.open(&sealed).unwrap(), b"x");

        // A plain room leaves the active layer alone.
        core.handle(&mut conn, join("lobby")).unwrap();
        assert_eq!(
            core.lifecycle.session(session).unwrap().group,
            Some(beta.group)
        );
    }

    #[test]
    fn quit_tears_down_and_closes() {
        let core = core();
        let mut conn = connect(&core, 3);
        core.handle(&mut conn, Message::Quit).unwrap();
        assert!(conn.closing);
        assert!(!conn.authenticated());
        assert_eq!(core.lifecycle.peer_count(), 0);
        assert_eq!(core.lifecycle.session_count(), 0);
    }

    #[test]
    fn direct_chat_queues_without_tunnel_then_flushes() {
        let core = core();
        let mut alice_conn = connect(&core, 1);
        let _bob = connect(&core, 2);
        let bob = PeerId::from_raw(2);

        for i in 0..3 {
            core.handle(
                &mut alice_conn,
                Message::Chat(Chat {
                    from: PeerId::from_raw(1),
                    to: Some(bob),
                    group: None,
                    text: format!("m{i}"),
                }),
            )
            .unwrap();
        }
        assert_eq!(core.lifecycle.pending_len(bob), 3);

        // Tunnel appears; flush delivers in original order.
        let (handle, mut rx) = TunnelHandle::new(bob);
        core.lifecycle.register_tunnel(handle);
        core.flush_pending(bob);

        let bob_session = core.lifecycle.peer(bob).unwrap().session.unwrap();
        let bob_record = core.lifecycle.session(bob_session).unwrap();
        let bob_envelope = core.envelope_for(&bob_record);
        let mut texts = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let opened = bob_envelope.open(&frame).unwrap();
            for message in envelope::decode(&opened).unwrap() {
                if let Message::Chat(chat) = message {
                    texts.push(chat.text);
                }
            }
        }
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
        assert_eq!(core.lifecycle.pending_len(bob), 0);
    }

    #[test]
    fn muted_chat_is_dropped() {
        let core = core();
        let mut conn = connect(&core, 1);
        let _bob = connect(&core, 2);
        for _ in 0..3 {
            core.lifecycle.strike(PeerId::from_raw(1));
        }

        core.handle(
            &mut conn,
            Message::Chat(Chat {
                from: PeerId::from_raw(1),
                to: Some(PeerId::from_raw(2)),
                group: None,
                text: "spam".into(),
            }),
        )
        .unwrap();
        assert_eq!(core.lifecycle.pending_len(PeerId::from_raw(2)), 0);
    }

    #[test]
    fn upload_poll_walks_missing_chunks() {
        let core = core();
        let file = FileId([9; 32]);

        let poll = |core: &RelayCore| {
            let replies = core
                .handle(
                    &mut ConnState::default(),
                    Message::UploadPoll(UploadPoll {
                        file,
                        chunk_count: 2,
                    }),
                )
                .unwrap();
            let Message::UploadTask(task) = &replies[0] else {
                panic!("expected UploadTask");
            };
            task.chunk
        };

        assert_eq!(poll(&core), Some(0));
        core.handle(
            &mut ConnState::default(),
            Message::UploadChunk(UploadChunk {
                file,
                chunk: 0,
                data: vec![1; 8],
            }),
        )
        .unwrap();
        assert_eq!(poll(&core), Some(1));
        core.handle(
            &mut ConnState::default(),
            Message::UploadChunk(UploadChunk {
                file,
                chunk: 1,
                data: vec![2; 8],
            }),
        )
        .unwrap();
        assert_eq!(poll(&core), None, "complete file wants nothing");

        // Stored chunks are served back.
        let replies = core
            .handle(
                &mut ConnState::default(),
                Message::Download(Download { file, chunk: 1 }),
            )
            .unwrap();
        let Message::DownloadReply(reply) = &replies[0] else {
            panic!("expected DownloadReply");
        };
        assert_eq!(reply.data.as_deref(), Some(&[2u8; 8][..]));
    }

    #[test]
    fn download_miss_redirects_when_configured() {
        let (sink, _rx) = EventSink::with_capacity(16);
        let target: SocketAddr = "10.0.0.1:4040".parse().unwrap();
        let core = RelayCore::new(
            Arc::new(Lifecycle::new(Some(1))),
            sink,
            RelayConfig {
                transfer_redirect: Some(target),
                ..Default::default()
            },
        );
        let replies = core
            .handle(
                &mut ConnState::default(),
                Message::Download(Download {
                    file: FileId([1; 32]),
                    chunk: 0,
                }),
            )
            .unwrap();
        let Message::DownloadReply(reply) = &replies[0] else {
            panic!("expected DownloadReply");
        };
        assert_eq!(reply.data, None);
        assert_eq!(reply.redirect, Some(target));
    }

    #[test]
    fn socket_and_tunnel_request_promotion() {
        let core = core();
        let mut conn = connect(&core, 1);
        let replies = core.handle(&mut conn, Message::Socket).unwrap();
        assert_eq!(replies, vec![Message::SocketAck]);
        assert_eq!(conn.promote, Some(Promotion::Socket));

        let mut conn = connect(&core, 1);
        let replies = core.handle(&mut conn, Message::Tunnel).unwrap();
        assert_eq!(replies, vec![Message::TunnelAck]);
        assert_eq!(conn.promote, Some(Promotion::Tunnel));
    }
}
