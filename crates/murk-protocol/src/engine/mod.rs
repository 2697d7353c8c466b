//! The protocol engine: relay-side accept/dispatch and the client-side
//! service loop, sharing one lifecycle registry and run-state machine.

pub mod acceptor;
pub mod handlers;
pub mod service;
pub mod state;

pub use acceptor::{serve_connection, Acceptor};
pub use handlers::{ConnState, Promotion, RelayConfig, RelayCore};
pub use service::{Command, Service, ServiceConfig, ServiceHandle};
pub use state::{EngineState, RunState};

use std::sync::Arc;
use std::time::Duration;

use crate::events::{EventSink, Notice};
use crate::lifecycle::Lifecycle;

/// Timeout windows for the periodic eviction sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Sessions idle longer than this are torn down.
    pub session_window: Duration,
    /// Peers idle longer than this are evicted with the full cascade.
    pub peer_window: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            session_window: Duration::from_secs(120),
            peer_window: Duration::from_secs(180),
        }
    }
}

/// Spawn the eviction sweeper. Runs until aborted; every pass expires
/// idle sessions first so a stale session never outlives its peer by a
/// full window, then evicts idle peers with the cascade.
pub fn spawn_sweeper(
    lifecycle: Arc<Lifecycle>,
    events: EventSink,
    config: SweepConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            sweep_once(&lifecycle, &events, config);
        }
    })
}

fn sweep_once(lifecycle: &Lifecycle, events: &EventSink, config: SweepConfig) {
    let sessions = lifecycle.expire_sessions(config.session_window.as_millis() as u64);
    for record in sessions {
        tracing::info!(session = %record.session, peer = %record.peer, "session expired");
        events.emit(Notice::SessionDown {
            peer: record.peer,
            session: record.session,
        });
    }

    let peers = lifecycle.expire_peers(config.peer_window.as_millis() as u64);
    for record in peers {
        events.emit(Notice::PeerEvicted { peer: record.peer });
    }
}
