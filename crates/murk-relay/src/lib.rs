//! Murk relay daemon.
//!
//! Wires the protocol engine's acceptor and eviction sweeper onto a TCP
//! listener, with a graceful shutdown path: new connections stop being
//! accepted immediately, in-flight exchanges get a grace period to
//! finish, then everything is torn down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use murk_protocol::{
    spawn_sweeper, Acceptor, EngineState, EventSink, Lifecycle, Notice, RelayConfig, RelayCore,
    SweepConfig,
};
use murk_transport::TransportConfig;

#[derive(Debug, Error)]
pub enum MurkRelayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Everything the daemon needs to run one relay.
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    pub bind: SocketAddr,
    /// Relay password; when set, handshakes must carry its proof.
    pub password: Option<String>,
    /// Passphrases for encrypted rooms hosted here, by room name.
    pub room_passphrases: HashMap<String, String>,
    /// Whether this relay buffers and serves file chunks.
    pub serve_transfers: bool,
    /// Redirect target for chunks this relay does not hold.
    pub transfer_redirect: Option<SocketAddr>,
    pub transport: TransportConfig,
    pub sweep: SweepConfig,
    /// How long in-flight exchanges get to finish on shutdown.
    pub shutdown_grace: Duration,
}

impl RelayServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            password: None,
            room_passphrases: HashMap::new(),
            serve_transfers: true,
            transfer_redirect: None,
            transport: TransportConfig::default(),
            sweep: SweepConfig::default(),
            shutdown_grace: Duration::from_secs(3),
        }
    }

    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            password: self.password.clone(),
            room_passphrases: self.room_passphrases.clone(),
            serve_transfers: self.serve_transfers,
            transfer_redirect: self.transfer_redirect,
        }
    }
}

/// A running relay: listener, accept loop, and eviction sweeper.
pub struct RelayServer {
    core: Arc<RelayCore>,
    state: Arc<EngineState>,
    local_addr: SocketAddr,
    shutdown_grace: Duration,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl RelayServer {
    /// Bind and start. Returns the server and its notice stream.
    pub async fn spawn(
        config: RelayServerConfig,
    ) -> Result<(Self, mpsc::Receiver<Notice>), MurkRelayError> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;

        let (events, notices) = EventSink::channel();
        let lifecycle = Arc::new(Lifecycle::new(None));
        let core = Arc::new(RelayCore::new(
            lifecycle.clone(),
            events.clone(),
            config.relay_config(),
        ));
        let state = Arc::new(EngineState::new());
        state.begin_start();

        let acceptor = Acceptor::new(core.clone(), config.transport.clone(), state.clone());
        let accept_task = tokio::spawn(async move { acceptor.run(listener).await });
        let sweep_task = spawn_sweeper(lifecycle, events, config.sweep);

        state.mark_running();
        tracing::info!(
            %local_addr,
            password = config.password.is_some(),
            rooms = config.room_passphrases.len(),
            transfers = config.serve_transfers,
            "relay listening"
        );

        Ok((
            Self {
                core,
                state,
                local_addr,
                shutdown_grace: config.shutdown_grace,
                tasks: vec![accept_task, sweep_task],
            },
            notices,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn core(&self) -> &Arc<RelayCore> {
        &self.core
    }

    /// Block until ctrl-c, then shut down gracefully.
    pub async fn run_until_ctrl_c(self) -> Result<(), MurkRelayError> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("ctrl-c received, shutting down");
        self.shutdown().await;
        Ok(())
    }

    /// Stop accepting, let in-flight exchanges drain, then tear down.
    pub async fn shutdown(mut self) {
        self.state.begin_stop();
        tokio::time::sleep(self.shutdown_grace).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state.finish_stop();
        tracing::info!(local_addr = %self.local_addr, "relay stopped");
    }
}
