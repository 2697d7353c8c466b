/// Relay-side accept loop.
///
/// One task per accepted connection, each running the read → decrypt →
/// decode → dispatch → seal → write cycle until the peer quits, the
/// socket fails, or the connection is promoted into a tunnel / delivery
/// socket — after which it only pushes outbound frames.
///
/// Status mapping: bare probe → 404 and close; unknown or failed
/// session crypto and checksum failures → 401; unsupported envelope
/// version → 501; undecodable body → 404.
use std::sync::Arc;

use murk_transport::{Connection, Response, Status, TransportConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::crypto::CryptoEnvelope;
use crate::engine::handlers::{ConnState, Promotion, RelayCore};
use crate::engine::state::EngineState;
use crate::envelope;
use crate::error::MurkProtocolError;
use crate::lifecycle::{SessionRecord, TunnelHandle};
use crate::message::Message;

pub struct Acceptor {
    core: Arc<RelayCore>,
    transport: TransportConfig,
    state: Arc<EngineState>,
}

impl Acceptor {
    pub fn new(core: Arc<RelayCore>, transport: TransportConfig, state: Arc<EngineState>) -> Self {
        Self {
            core,
            transport,
            state,
        }
    }

    /// Accept connections until the engine leaves its running states.
    pub async fn run(&self, listener: TcpListener) {
        while self.state.should_run() {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                }
            };
            tracing::debug!(%peer_addr, "connection accepted");
            let connection =
                Connection::from_stream(stream, self.transport.clone()).with_peer_addr(peer_addr);
            let core = self.core.clone();
            tokio::spawn(async move {
                serve_connection(core, connection).await;
            });
        }
    }
}

/// Run the §4.3 request/response cycle on one connection.
///
/// Generic over the stream so tests can drive it over an in-memory
/// duplex pipe.
pub async fn serve_connection<S>(core: Arc<RelayCore>, mut connection: Connection<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = ConnState::default();

    loop {
        let request = match connection.recv_request().await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%err, "connection closed");
                return;
            }
        };

        // 1. Bare probe: no session, no body.
        if request.is_bare() {
            let _ = connection
                .send_response(&Response::empty(Status::NotFound))
                .await;
            return;
        }

        // 2. Resolve the session, or start plaintext for a handshake.
        let session_record = match request.session {
            Some(session) => match core.lifecycle.session(session) {
                Some(record) => Some(record),
                None => {
                    if respond(&mut connection, Status::Unauthorized).await.is_err() {
                        return;
                    }
                    continue;
                }
            },
            None => None,
        };
        let crypto = match &session_record {
            Some(record) => core.envelope_for(record),
            None => CryptoEnvelope::plaintext(None),
        };

        // 3. Remove group then session layers.
        let frame = match crypto.open(&request.body) {
            Ok(frame) => frame,
            Err(_) => {
                teardown_invalid(&core, session_record.as_ref());
                if respond(&mut connection, Status::Unauthorized).await.is_err() {
                    return;
                }
                continue;
            }
        };

        // 4. Decode; checksum failures rank with crypto failures.
        let messages = match envelope::decode(&frame) {
            Ok(messages) => messages,
            Err(MurkProtocolError::ChecksumMismatch) => {
                teardown_invalid(&core, session_record.as_ref());
                if respond(&mut connection, Status::Unauthorized).await.is_err() {
                    return;
                }
                continue;
            }
            Err(MurkProtocolError::UnsupportedVersion { version, .. }) => {
                tracing::info!(version, "rejecting unsupported envelope version");
                if respond(&mut connection, Status::NotImplemented).await.is_err() {
                    return;
                }
                continue;
            }
            Err(err) => {
                tracing::debug!(%err, "undecodable request body");
                if respond(&mut connection, Status::NotFound).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if let Some(record) = &session_record {
            conn.session = Some(record.session);
            conn.peer = Some(record.peer);
            core.lifecycle.touch_session(record.session);
            core.lifecycle.touch_peer(record.peer);
        }

        // 5. Dispatch in header order.
        let mut replies: Vec<Message> = Vec::new();
        let mut refusal: Option<Status> = None;
        for message in messages {
            if message.requires_session() && !conn.authenticated() {
                refusal = Some(Status::Unauthorized);
                break;
            }
            match core.handle(&mut conn, message) {
                Ok(mut out) => replies.append(&mut out),
                Err(MurkProtocolError::Refused { status: 401 }) => {
                    refusal = Some(Status::Unauthorized);
                    break;
                }
                Err(MurkProtocolError::Refused { status: 501 }) => {
                    refusal = Some(Status::NotImplemented);
                    break;
                }
                Err(err) => {
                    tracing::warn!(%err, "handler failed, skipping message");
                }
            }
        }
        if let Some(status) = refusal {
            if respond(&mut connection, status).await.is_err() {
                return;
            }
            continue;
        }

        // 6. Prepend any pending backlog and seal one response envelope.
        let mut outbound = match conn.peer {
            Some(peer) => core.lifecycle.drain_pending(peer),
            None => Vec::new(),
        };
        let backlog_len = outbound.len();
        outbound.extend(replies);

        // A handshake in this request switched the connection onto a
        // fresh session; its ack is sealed with the new session cipher
        // alone, since the peer derives any group layer only after it
        // has read the relevant ack. Every other response keeps the
        // layers the request arrived under — a join ack in particular
        // must not be sealed with the room key it is announcing.
        let seal_crypto = if conn.session != request.session {
            conn.session
                .and_then(|session| core.lifecycle.session(session))
                .map(|record| CryptoEnvelope::session_only(record.cipher))
                .unwrap_or(crypto)
        } else {
            crypto
        };

        let body = match envelope::encode(&outbound).and_then(|frame| seal_crypto.seal(&frame)) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%err, "failed to seal response");
                return;
            }
        };
        if connection
            .send_response(&Response::new(Status::Ok, body))
            .await
            .is_err()
        {
            // Only the drained backlog goes back to the ring; this
            // exchange's replies die with the connection.
            if let Some(peer) = conn.peer {
                outbound.truncate(backlog_len);
                core.lifecycle.requeue_pending(peer, outbound);
            }
            return;
        }

        if conn.closing {
            return;
        }

        // 7. Promotion: stop the request/response cycle and push.
        if let Some(promotion) = conn.promote.take() {
            let Some(peer) = conn.peer else { return };
            let (handle, rx) = TunnelHandle::new(peer);
            match promotion {
                Promotion::Tunnel => {
                    // Replacing drops the old handle, closing its loop.
                    let _old = core.lifecycle.register_tunnel(handle);
                    core.flush_pending(peer);
                }
                Promotion::Socket => core.lifecycle.register_delivery(handle),
            }
            push_loop(connection, rx).await;
            return;
        }
    }
}

/// Write every queued frame until the handle is dropped or the socket
/// dies.
async fn push_loop<S>(
    mut connection: Connection<S>,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Some(frame) = rx.recv().await {
        if let Err(err) = connection
            .send_response(&Response::new(Status::Ok, frame))
            .await
        {
            tracing::debug!(%err, "push connection failed");
            return;
        }
    }
    tracing::debug!("push connection handle dropped, closing");
}

fn teardown_invalid(core: &RelayCore, record: Option<&SessionRecord>) {
    let Some(record) = record else { return };
    core.lifecycle.strike(record.peer);
    if !record.established {
        // A session that never authenticated leaves no peer context.
        core.lifecycle.remove_session(record.session);
        core.lifecycle.remove_peer(record.peer);
        tracing::info!(peer = %record.peer, "tearing down never-established session");
    }
}

async fn respond<S>(
    connection: &mut Connection<S>,
    status: Status,
) -> Result<(), murk_transport::MurkTransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    connection.send_response(&Response::empty(status)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricCipher;
    use crate::engine::handlers::RelayConfig;
    use crate::events::EventSink;
    use crate::lifecycle::Lifecycle;
    use crate::message::{Chat, Handshake, Join};
    use crate::types::{PeerId, SessionId};
    use murk_transport::Request;

    fn spawn_relay_with(config: RelayConfig) -> (Arc<RelayCore>, Connection<tokio::io::DuplexStream>) {
        let (sink, _rx) = EventSink::with_capacity(256);
        let core = Arc::new(RelayCore::new(
            Arc::new(Lifecycle::new(Some(3))),
            sink,
            config,
        ));
        let (client_side, server_side) = tokio::io::duplex(256 * 1024);
        let server_conn = Connection::from_stream(server_side, TransportConfig::default());
        tokio::spawn(serve_connection(core.clone(), server_conn));
        let client = Connection::from_stream(client_side, TransportConfig::default());
        (core, client)
    }

    fn spawn_relay() -> (Arc<RelayCore>, Connection<tokio::io::DuplexStream>) {
        spawn_relay_with(RelayConfig::default())
    }

    fn plain_frame(messages: &[Message]) -> Vec<u8> {
        envelope::encode(messages).unwrap()
    }

    async fn do_handshake(
        client: &mut Connection<tokio::io::DuplexStream>,
        peer: u64,
        key: [u8; 32],
    ) -> SessionId {
        let frame = plain_frame(&[Message::Handshake(Handshake {
            peer: PeerId::from_raw(peer),
            endpoint: None,
            session_key: key,
            credentials: None,
        })]);
        let response = client
            .round_trip(&Request::new(None, frame))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        let cipher = SymmetricCipher::new(key);
        let envelope = CryptoEnvelope::session_only(Arc::new(cipher));
        let opened = envelope.open(&response.body).unwrap();
        let messages = crate::envelope::decode(&opened).unwrap();
        let Message::HandshakeAck(ack) = &messages[0] else {
            panic!("expected HandshakeAck, got {messages:?}");
        };
        ack.session
    }

    #[tokio::test]
    async fn bare_probe_gets_not_found() {
        let (_core, mut client) = spawn_relay();
        let response = client.round_trip(&Request::probe()).await.unwrap();
        assert_eq!(response.status, Status::NotFound);
    }

    #[tokio::test]
    async fn unknown_session_is_unauthorized() {
        let (_core, mut client) = spawn_relay();
        let request = Request::new(Some(SessionId::from_raw(0xdead)), vec![1, 2, 3]);
        let response = client.round_trip(&request).await.unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[tokio::test]
    async fn protected_message_without_session_is_unauthorized() {
        let (_core, mut client) = spawn_relay();
        let frame = plain_frame(&[Message::Ping]);
        let response = client.round_trip(&Request::new(None, frame)).await.unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[tokio::test]
    async fn unsupported_version_is_not_implemented() {
        let (_core, mut client) = spawn_relay();
        let frame = envelope::encode_with_version(
            &[Message::Ping],
            crate::types::MAX_SUPPORTED_VERSION + 1,
        )
        .unwrap();
        let response = client.round_trip(&Request::new(None, frame)).await.unwrap();
        assert_eq!(response.status, Status::NotImplemented);
    }

    #[tokio::test]
    async fn handshake_then_ping_on_session() {
        let (_core, mut client) = spawn_relay();
        let key = [0x42; 32];
        let session = do_handshake(&mut client, 1, key).await;

        let envelope_crypto =
            CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));
        let sealed = envelope_crypto
            .seal(&plain_frame(&[Message::Ping]))
            .unwrap();
        let response = client
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        let opened = envelope_crypto.open(&response.body).unwrap();
        let messages = envelope::decode(&opened).unwrap();
        assert_eq!(messages, vec![Message::Pong]);
    }

    #[tokio::test]
    async fn tampered_session_frame_is_unauthorized() {
        let (_core, mut client) = spawn_relay();
        let key = [0x01; 32];
        let session = do_handshake(&mut client, 1, key).await;

        let envelope_crypto =
            CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));
        let mut sealed = envelope_crypto
            .seal(&plain_frame(&[Message::Ping]))
            .unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let response = client
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    fn connect_to(core: &Arc<RelayCore>) -> Connection<tokio::io::DuplexStream> {
        let (client_side, server_side) = tokio::io::duplex(256 * 1024);
        let server_conn = Connection::from_stream(server_side, TransportConfig::default());
        tokio::spawn(serve_connection(core.clone(), server_conn));
        Connection::from_stream(client_side, TransportConfig::default())
    }

    #[tokio::test]
    async fn quit_invalidates_the_session() {
        let (core, mut client) = spawn_relay();
        let key = [0x07; 32];
        let session = do_handshake(&mut client, 1, key).await;
        let envelope_crypto =
            CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));

        let sealed = envelope_crypto
            .seal(&plain_frame(&[Message::Join(Join {
                group: None,
                name: "lobby".into(),
            })]))
            .unwrap();
        let response = client
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        let sealed = envelope_crypto
            .seal(&plain_frame(&[Message::Quit]))
            .unwrap();
        let response = client
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        // The quit closed that connection; the next protected message
        // on a fresh connection must find the session gone.
        let mut fresh = connect_to(&core);
        let sealed = envelope_crypto
            .seal(&plain_frame(&[Message::Ping]))
            .unwrap();
        let response = fresh
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[tokio::test]
    async fn second_encrypted_room_keeps_the_session_usable() {
        let mut config = RelayConfig::default();
        config.room_passphrases.insert("alpha".into(), "pw-a".into());
        config.room_passphrases.insert("beta".into(), "pw-b".into());
        let (_core, mut client) = spawn_relay_with(config);

        let key = [0x5A; 32];
        let session = do_handshake(&mut client, 1, key).await;
        let mut crypto = CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));

        for (room, pass) in [("alpha", "pw-a"), ("beta", "pw-b")] {
            let sealed = crypto
                .seal(&plain_frame(&[Message::Join(Join {
                    group: None,
                    name: room.into(),
                })]))
                .unwrap();
            let response = client
                .round_trip(&Request::new(Some(session), sealed))
                .await
                .unwrap();
            assert_eq!(response.status, Status::Ok, "join {room} refused");
            let messages = envelope::decode(&crypto.open(&response.body).unwrap()).unwrap();
            let Message::JoinAck(ack) = &messages[0] else {
                panic!("expected JoinAck, got {messages:?}");
            };
            // Swap the outer layer to the newly joined room's key, as a
            // client does after reading the ack.
            let group_cipher = Arc::new(SymmetricCipher::from_passphrase(pass, ack.group));
            crypto = crypto.with_group(Some(group_cipher));
        }

        // Frames under the latest room's layer still authenticate.
        let sealed = crypto.seal(&plain_frame(&[Message::Ping])).unwrap();
        let response = client
            .round_trip(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        let opened = crypto.open(&response.body).unwrap();
        assert_eq!(envelope::decode(&opened).unwrap(), vec![Message::Pong]);
    }

    #[tokio::test]
    async fn failed_response_write_requeues_only_the_backlog() {
        let (sink, _rx) = EventSink::with_capacity(256);
        let core = Arc::new(RelayCore::new(
            Arc::new(Lifecycle::new(Some(3))),
            sink,
            RelayConfig::default(),
        ));
        let (client_side, server_side) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(serve_connection(
            core.clone(),
            Connection::from_stream(server_side, TransportConfig::default()),
        ));
        let mut client = Connection::from_stream(client_side, TransportConfig::default());

        let key = [0x66; 32];
        let session = do_handshake(&mut client, 1, key).await;
        let peer = PeerId::from_raw(1);
        let queued = Message::Chat(Chat {
            from: PeerId::from_raw(2),
            to: Some(peer),
            group: None,
            text: "backlog".into(),
        });
        core.lifecycle.queue_pending(peer, queued.clone());

        // Send a ping, then hang up before the response can be written.
        let crypto = CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));
        let sealed = crypto.seal(&plain_frame(&[Message::Ping])).unwrap();
        client
            .send_request(&Request::new(Some(session), sealed))
            .await
            .unwrap();
        drop(client);
        server.await.unwrap();

        // The drained chat is back in the ring; the pong is not.
        assert_eq!(core.lifecycle.drain_pending(peer), vec![queued]);
    }

    #[tokio::test]
    async fn chat_reaches_peer_through_delivery_socket() {
        let (core, mut alice) = spawn_relay();
        let alice_key = [0xAA; 32];
        let alice_session = do_handshake(&mut alice, 1, alice_key).await;

        // Bob connects on a second connection of the same relay.
        let mut bob = connect_to(&core);
        let bob_key = [0xBB; 32];
        let bob_session = do_handshake(&mut bob, 2, bob_key).await;
        let bob_crypto = CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(bob_key)));

        // Bob promotes this connection into his tunnel.
        let sealed = bob_crypto.seal(&plain_frame(&[Message::Tunnel])).unwrap();
        let response = bob
            .round_trip(&Request::new(Some(bob_session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        let opened = bob_crypto.open(&response.body).unwrap();
        assert_eq!(envelope::decode(&opened).unwrap(), vec![Message::TunnelAck]);

        // Alice sends Bob a chat.
        let alice_crypto =
            CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(alice_key)));
        let sealed = alice_crypto
            .seal(&plain_frame(&[Message::Chat(Chat {
                from: PeerId::from_raw(1),
                to: Some(PeerId::from_raw(2)),
                group: None,
                text: "hi bob".into(),
            })]))
            .unwrap();
        let response = alice
            .round_trip(&Request::new(Some(alice_session), sealed))
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        // The chat arrives on Bob's tunnel as a pushed response.
        let pushed = bob.recv_response().await.unwrap();
        assert_eq!(pushed.status, Status::Ok);
        let opened = bob_crypto.open(&pushed.body).unwrap();
        let messages = envelope::decode(&opened).unwrap();
        let Message::Chat(chat) = &messages[0] else {
            panic!("expected pushed chat, got {messages:?}");
        };
        assert_eq!(chat.text, "hi bob");
    }
}
