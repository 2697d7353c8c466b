/// Outbound notifications from the protocol engine to its embedder.
///
/// Delivery is fire-and-forget over a bounded channel: a slow or absent
/// subscriber must never stall a connection task, so `emit` uses
/// `try_send` and drops on a full queue with a log line. Anything the
/// embedder must not miss travels through command replies instead.
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::message::FileInfo;
use crate::types::{FileId, GroupId, PeerId, SessionId};

/// Default capacity of the notice queue.
const NOTICE_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Handshake completed, session established.
    SessionUp { peer: PeerId, session: SessionId },
    /// Session expired or was torn down.
    SessionDown { peer: PeerId, session: SessionId },
    PeerJoined { peer: PeerId, group: Option<GroupId> },
    PeerLeft { peer: PeerId },
    PeerEvicted { peer: PeerId },
    PeerMuted { peer: PeerId },
    Chat {
        from: PeerId,
        group: Option<GroupId>,
        text: String,
    },
    FileListing { from: PeerId, files: Vec<FileInfo> },
    SearchHits { from: PeerId, id: u64, hits: Vec<FileInfo> },
    TransferProgress {
        file: FileId,
        done_chunks: u64,
        total_chunks: u64,
    },
    TransferComplete { file: FileId },
    TransferFailed { file: FileId, reason: String },
    RelayUp { addr: SocketAddr },
    RelayDown { addr: SocketAddr },
}

/// Sending side, cloned into every task that reports.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Notice>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::Receiver<Notice>) {
        Self::with_capacity(NOTICE_QUEUE)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a notice. Never blocks; a full or closed queue drops it.
    pub fn emit(&self, notice: Notice) {
        if let Err(err) = self.tx.try_send(notice) {
            tracing::debug!(%err, "notice dropped, subscriber not keeping up");
        }
    }
}
