/// Client-side relay service.
///
/// Owns the control connection to one relay: handshake → join →
/// delivery sockets (and a tunnel when we have no public endpoint) →
/// periodic liveness ping. Any read/write failure tears the link down
/// and rebuilds it after a jittered backoff; command senders never see
/// the restart, only a possibly-dropped in-flight command.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use murk_transport::{Connection, Pool, Request, Status, TransportConfig};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::crypto::{password_proof, CryptoEnvelope, SymmetricCipher};
use crate::engine::state::EngineState;
use crate::envelope;
use crate::error::MurkProtocolError;
use crate::events::{EventSink, Notice};
use crate::message::{Browse, Chat, Handshake, Join, Message, Search};
use crate::throttle::Backoff;
use crate::types::{GroupId, PeerId, SessionId};

#[derive(Clone)]
pub struct ServiceConfig {
    pub relay: SocketAddr,
    pub peer: PeerId,
    /// Our public endpoint; `None` means we need tunnel delivery.
    pub endpoint: Option<SocketAddr>,
    /// Room to join on connect.
    pub room: Option<String>,
    /// Passphrase for the room's group layer, when it has one.
    pub room_passphrase: Option<String>,
    /// Relay password, when the relay requires one.
    pub password: Option<String>,
    /// Pooled delivery sockets to keep open.
    pub delivery_sockets: usize,
    pub ping_interval: Duration,
    pub restart_backoff_base: Duration,
    pub restart_backoff_max: Duration,
    pub transport: TransportConfig,
    /// Seeds the restart jitter; `None` for entropy.
    pub seed: Option<u64>,
}

impl ServiceConfig {
    pub fn new(relay: SocketAddr, peer: PeerId) -> Self {
        Self {
            relay,
            peer,
            endpoint: None,
            room: None,
            room_passphrase: None,
            password: None,
            delivery_sockets: 2,
            ping_interval: Duration::from_secs(15),
            restart_backoff_base: Duration::from_millis(500),
            restart_backoff_max: Duration::from_secs(30),
            transport: TransportConfig::default(),
            seed: None,
        }
    }
}

/// Commands the embedder sends into the service loop.
pub enum Command {
    Chat {
        to: Option<PeerId>,
        group: Option<GroupId>,
        text: String,
    },
    Browse {
        peer: PeerId,
    },
    ClientList,
    Search {
        id: u64,
        query: String,
    },
    /// Announce departure to the relay, then stop.
    Quit,
}

/// Cheap-to-clone handle into a running [`Service`].
#[derive(Clone)]
pub struct ServiceHandle {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<EngineState>,
}

impl ServiceHandle {
    pub async fn send(&self, command: Command) -> Result<(), MurkProtocolError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| MurkProtocolError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Request a stop; the loop notices on its next wakeup.
    pub fn stop(&self) {
        self.state.begin_stop();
    }
}

pub struct Service;

impl Service {
    /// Start the service loop. Returns the command handle and the
    /// notice stream.
    pub fn spawn(config: ServiceConfig) -> (ServiceHandle, mpsc::Receiver<Notice>) {
        let state = Arc::new(EngineState::new());
        let (events, notice_rx) = EventSink::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        if state.begin_start() {
            let loop_state = state.clone();
            tokio::spawn(service_loop(config, loop_state, events, cmd_rx));
        }

        (ServiceHandle { cmd_tx, state }, notice_rx)
    }
}

async fn service_loop(
    config: ServiceConfig,
    state: Arc<EngineState>,
    events: EventSink,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let mut backoff = match config.seed {
        Some(seed) => Backoff::seeded(
            config.restart_backoff_base,
            config.restart_backoff_max,
            seed,
        ),
        None => Backoff::new(config.restart_backoff_base, config.restart_backoff_max),
    };
    let pool = Pool::new(config.transport.clone());

    while state.should_run() {
        match Link::establish(&config, &pool, events.clone()).await {
            Ok(mut link) => {
                state.mark_running();
                backoff.reset();
                events.emit(Notice::RelayUp { addr: config.relay });

                let quit = link.run(&config, &state, &events, &mut cmd_rx).await;
                events.emit(Notice::RelayDown { addr: config.relay });
                // A torn link leaves idle connections in an unknown
                // state; the next attempt starts from fresh sockets.
                pool.evict(config.relay);
                if quit || !state.should_run() {
                    break;
                }
                state.begin_restart();
            }
            Err(err) => {
                tracing::warn!(relay = %config.relay, %err, "relay connection failed");
                pool.evict(config.relay);
                events.emit(Notice::RelayDown { addr: config.relay });
            }
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }

    state.begin_stop();
    state.finish_stop();
    tracing::info!(relay = %config.relay, "service stopped");
}

/// One established relay link: control connection, session crypto, and
/// the spawned delivery tasks.
struct Link {
    control: Connection<TcpStream>,
    session: SessionId,
    crypto: CryptoEnvelope,
    group: Option<GroupId>,
    events: EventSink,
    delivery: Vec<tokio::task::JoinHandle<()>>,
}

impl Link {
    async fn establish(
        config: &ServiceConfig,
        pool: &Pool,
        events: EventSink,
    ) -> Result<Self, MurkProtocolError> {
        let mut control = pool.checkout(config.relay).await?;

        // Handshake travels outside any session layer and carries the
        // key for the session it creates.
        let (key, _) = SymmetricCipher::generate();
        let handshake = Message::Handshake(Handshake {
            peer: config.peer,
            endpoint: config.endpoint,
            session_key: key,
            credentials: config.password.as_deref().map(password_proof),
        });
        let frame = envelope::encode(std::slice::from_ref(&handshake))?;
        let response = control.round_trip(&Request::new(None, frame)).await?;
        if response.status != Status::Ok {
            return Err(MurkProtocolError::Refused {
                status: response.status.code(),
            });
        }

        let session_crypto =
            CryptoEnvelope::session_only(Arc::new(SymmetricCipher::new(key)));
        let messages = envelope::decode(&session_crypto.open(&response.body)?)?;
        let session = match messages.first() {
            Some(Message::HandshakeAck(ack)) => ack.session,
            other => {
                return Err(MurkProtocolError::Deserialization(format!(
                    "expected handshake ack, got {other:?}"
                )))
            }
        };
        tracing::info!(relay = %config.relay, %session, "session established");

        let mut link = Self {
            control,
            session,
            crypto: session_crypto,
            group: None,
            events,
            delivery: Vec::new(),
        };

        if let Some(room) = &config.room {
            link.join_room(config, room).await?;
        }
        link.spawn_delivery(config, pool).await?;
        Ok(link)
    }

    async fn join_room(
        &mut self,
        config: &ServiceConfig,
        room: &str,
    ) -> Result<(), MurkProtocolError> {
        let replies = self
            .exchange(&[Message::Join(Join {
                group: None,
                name: room.to_string(),
            })])
            .await?;
        let group = match replies.iter().find_map(|message| match message {
            Message::JoinAck(ack) => Some(ack.group),
            _ => None,
        }) {
            Some(group) => group,
            None => {
                return Err(MurkProtocolError::Deserialization(
                    "join acknowledged without a group".into(),
                ))
            }
        };
        self.group = Some(group);
        tracing::info!(%group, room, "joined room");

        // The group id salts the passphrase-derived key, so the outer
        // layer can only be built after the ack.
        if let Some(passphrase) = &config.room_passphrase {
            let group_cipher = Arc::new(SymmetricCipher::from_passphrase(passphrase, group));
            self.crypto = self.crypto.with_group(Some(group_cipher));
        }
        Ok(())
    }

    /// Open the pooled delivery sockets, plus a dedicated tunnel when
    /// we have no public endpoint.
    async fn spawn_delivery(
        &mut self,
        config: &ServiceConfig,
        pool: &Pool,
    ) -> Result<(), MurkProtocolError> {
        let mut kinds = vec![Message::Socket; config.delivery_sockets];
        if config.endpoint.is_none() {
            kinds.push(Message::Tunnel);
        }

        for kind in kinds {
            let mut connection = pool.checkout(config.relay).await?;
            let sealed = self
                .crypto
                .seal(&envelope::encode(std::slice::from_ref(&kind))?)?;
            let response = connection
                .round_trip(&Request::new(Some(self.session), sealed))
                .await?;
            if response.status != Status::Ok {
                return Err(MurkProtocolError::Refused {
                    status: response.status.code(),
                });
            }

            self.delivery.push(tokio::spawn(push_reader(
                connection,
                self.crypto.clone(),
                self.events.clone(),
            )));
        }
        Ok(())
    }

    /// Send one request envelope on the control connection and return
    /// the decoded reply messages.
    async fn exchange(
        &mut self,
        messages: &[Message],
    ) -> Result<Vec<Message>, MurkProtocolError> {
        let sealed = self.crypto.seal(&envelope::encode(messages)?)?;
        let response = self
            .control
            .round_trip(&Request::new(Some(self.session), sealed))
            .await?;
        match response.status {
            Status::Ok => {}
            Status::Unauthorized => return Err(MurkProtocolError::SessionInvalid),
            other => {
                return Err(MurkProtocolError::Refused {
                    status: other.code(),
                })
            }
        }
        envelope::decode(&self.crypto.open(&response.body)?)
    }

    /// Drive the link until failure, quit, or stop. Returns true when
    /// the loop should not restart (explicit quit).
    async fn run(
        &mut self,
        config: &ServiceConfig,
        state: &Arc<EngineState>,
        events: &EventSink,
        cmd_rx: &mut mpsc::Receiver<Command>,
    ) -> bool {
        let mut ping = tokio::time::interval(config.ping_interval);
        ping.tick().await; // skip the immediate first tick

        loop {
            if !state.should_run() {
                return true;
            }
            tokio::select! {
                command = cmd_rx.recv() => {
                    let Some(command) = command else { return true };
                    let quit = matches!(command, Command::Quit);
                    let request = command_messages(command, config.peer);
                    match self.exchange(&request).await {
                        Ok(replies) => surface(&replies, events),
                        Err(err) => {
                            tracing::warn!(%err, "control exchange failed, restarting link");
                            return false;
                        }
                    }
                    if quit {
                        return true;
                    }
                }
                _ = ping.tick() => {
                    match self.exchange(&[Message::Ping]).await {
                        Ok(replies) => {
                            if !replies.contains(&Message::Pong) {
                                tracing::debug!("ping answered without pong");
                            }
                            surface(&replies, events);
                        }
                        Err(err) => {
                            tracing::warn!(%err, "ping failed, restarting link");
                            return false;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.delivery {
            task.abort();
        }
    }
}

/// Read pushed frames off a delivery/tunnel connection forever.
async fn push_reader(
    mut connection: Connection<TcpStream>,
    crypto: CryptoEnvelope,
    events: EventSink,
) {
    loop {
        let response = match connection.recv_response().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%err, "delivery socket closed");
                return;
            }
        };
        let Ok(frame) = crypto.open(&response.body) else {
            tracing::warn!("undecryptable pushed frame dropped");
            continue;
        };
        match envelope::decode(&frame) {
            // Delivery sockets have no reply path; notices only.
            Ok(messages) => surface(&messages, &events),
            Err(err) => {
                tracing::warn!(%err, "undecodable pushed frame dropped");
            }
        }
    }
}

fn command_messages(command: Command, local: PeerId) -> Vec<Message> {
    match command {
        Command::Chat { to, group, text } => vec![Message::Chat(Chat {
            from: local,
            to,
            group,
            text,
        })],
        Command::Browse { peer } => vec![Message::Browse(Browse { from: local, peer })],
        Command::ClientList => vec![Message::ClientList],
        Command::Search { id, query } => vec![Message::Search(Search {
            from: local,
            id,
            query,
        })],
        Command::Quit => vec![Message::Quit],
    }
}

/// Convert reply/pushed messages into notices for the embedder.
fn surface(messages: &[Message], events: &EventSink) {
    for message in messages {
        match message {
            Message::Chat(chat) => events.emit(Notice::Chat {
                from: chat.from,
                group: chat.group,
                text: chat.text.clone(),
            }),
            Message::BrowseReply(reply) => events.emit(Notice::FileListing {
                from: reply.from,
                files: reply.files.clone(),
            }),
            Message::SearchReply(reply) => events.emit(Notice::SearchHits {
                from: reply.from,
                id: reply.id,
                hits: reply.hits.clone(),
            }),
            Message::ClientListReply(_)
            | Message::JoinAck(_)
            | Message::Pong
            | Message::SocketAck
            | Message::TunnelAck => {}
            other => {
                tracing::debug!(tag = ?other.tag(), "unsurfaced reply message");
            }
        }
    }
}
