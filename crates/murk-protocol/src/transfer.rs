/// Chunked file transfer engine.
///
/// Uploads are relay-driven: the uploader polls the chosen transfer
/// relay, which answers with the next chunk index it wants, and the
/// uploader pushes exactly that chunk. Empty polls back off with
/// jitter; a long streak of them escalates to giving up so a dead
/// relay cannot pin an upload task forever.
///
/// Downloads pull chunks from candidate endpoints into a pre-sized
/// file, following redirects (endpoints are deduplicated so a redirect
/// loop converges), retrying failures up to a cap, and re-hashing the
/// assembled file before declaring it available. Any terminal failure
/// removes the partial file.
///
/// Every transfer is driven under a [`TransferHandle`], whose state
/// walks `pending → running → {paused ⇄ running} → done | errored |
/// cancelled`, with `waiting` for throttle and empty-poll deferrals.
/// A transport operation that outlives its deadline drops the transfer
/// back to `pending`; enough of those in one transfer make it
/// `errored`.
///
/// All network traffic goes through the [`ChunkTransport`] trait so the
/// engine can be exercised against a scripted transport in tests;
/// [`RelayChunkTransport`] is the real one, speaking the transfer
/// message set over pooled relay connections. A saturated throttle
/// defers the next operation without any network call at all.
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murk_transport::{Pool, Request, Status};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{watch, Mutex, Notify};

use crate::crypto::{password_proof, CryptoEnvelope, SymmetricCipher};
use crate::envelope;
use crate::error::MurkProtocolError;
use crate::events::{EventSink, Notice};
use crate::fsutil::{self, CHUNK_SIZE};
use crate::lifecycle::Lifecycle;
use crate::message::{Download, FileInfo, Handshake, Message, UploadChunk, UploadPoll};
use crate::throttle::{Backoff, Throttle};
use crate::types::{FileId, PeerId, SessionId};

/// Consecutive failed attempts before a transfer is abandoned.
const RETRY_LIMIT: u32 = 5;

/// Consecutive empty upload polls before the relay is presumed done
/// with us (or dead).
const IDLE_POLL_LIMIT: u32 = 8;

/// Deadline for one transport operation.
const OP_DEADLINE: Duration = Duration::from_secs(30);

/// Expired deadlines tolerated per transfer before it errors out.
const SOFT_EXPIRY_LIMIT: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// What a transfer relay answers to an upload poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTask {
    /// Send this chunk next.
    Chunk(u64),
    /// Nothing wanted right now; poll again later.
    Idle,
    /// The relay holds the complete file.
    Complete,
}

/// What an endpoint answers to a chunk fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFetch {
    Data(Vec<u8>),
    /// The endpoint knows the file but does not hold this chunk yet.
    NotReady,
    /// Ask this endpoint instead.
    Redirect(SocketAddr),
}

/// Network operations of the transfer engine, mockable in tests.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn poll_upload(
        &self,
        relay: SocketAddr,
        file: &FileInfo,
    ) -> Result<UploadTask, MurkProtocolError>;

    async fn send_chunk(
        &self,
        relay: SocketAddr,
        file: FileId,
        chunk: u64,
        data: Vec<u8>,
    ) -> Result<(), MurkProtocolError>;

    async fn fetch_chunk(
        &self,
        endpoint: SocketAddr,
        file: FileId,
        chunk: u64,
    ) -> Result<ChunkFetch, MurkProtocolError>;
}

// ── Transfer state ─────────────────────────────────────────────────────

/// Observable lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Queued or knocked back by a deadline expiry; nothing in flight.
    Pending,
    Running,
    /// Held by the user; resuming re-enters `Running`.
    Paused,
    /// Deferred by the throttle or an empty poll.
    Waiting,
    Done,
    Errored,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

/// Control surface for one transfer: observable state, pause/resume,
/// and cancellation. Clones share the same transfer; the engine drives
/// one clone while the embedder holds another.
///
/// Pause and cancel take effect at the next operation boundary — an
/// in-flight chunk is never abandoned halfway.
#[derive(Clone)]
pub struct TransferHandle {
    state: Arc<watch::Sender<TransferState>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    resumed: Arc<Notify>,
}

impl TransferHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(TransferState::Pending)),
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            resumed: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    /// Watch the state as it changes. Intermediate states may coalesce;
    /// terminal states never do.
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.state.subscribe()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_one();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.resumed.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Move to `next` unless the transfer already finished.
    fn set(&self, next: TransferState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Gate between operations: honors a pending cancel, parks while
    /// paused. `notify_one` stores a permit, so a resume or cancel that
    /// lands before the park still wakes it.
    async fn checkpoint(&self) -> Result<(), MurkProtocolError> {
        loop {
            if self.is_cancelled() {
                self.set(TransferState::Cancelled);
                return Err(MurkProtocolError::Cancelled);
            }
            if !self.paused.load(Ordering::SeqCst) {
                self.set(TransferState::Running);
                return Ok(());
            }
            self.set(TransferState::Paused);
            self.resumed.notified().await;
        }
    }
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ── The engine ─────────────────────────────────────────────────────────

pub struct TransferEngine<T: ChunkTransport> {
    transport: Arc<T>,
    throttle: Arc<Throttle>,
    events: EventSink,
    rng: Mutex<StdRng>,
}

impl<T: ChunkTransport> TransferEngine<T> {
    pub fn new(transport: Arc<T>, throttle: Arc<Throttle>, events: EventSink) -> Self {
        Self::seeded(transport, throttle, events, None)
    }

    pub fn seeded(
        transport: Arc<T>,
        throttle: Arc<Throttle>,
        events: EventSink,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            transport,
            throttle,
            events,
            rng: Mutex::new(rng),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(BACKOFF_BASE, BACKOFF_MAX)
    }

    /// Wait out the throttle without issuing any network call. The
    /// retry is rescheduled after a randomized delay so deferred
    /// transfers do not stampede the moment tokens return.
    async fn defer_for_token(&self, handle: &TransferHandle) {
        let mut deferred = false;
        while !self.throttle.try_acquire() {
            deferred = true;
            handle.set(TransferState::Waiting);
            let base = self.throttle.time_to_token().max(Duration::from_millis(10));
            let delay = self.reschedule_delay(base).await;
            tokio::time::sleep(delay).await;
        }
        if deferred {
            handle.set(TransferState::Running);
        }
    }

    /// Base wait plus up to half again of random jitter.
    async fn reschedule_delay(&self, base: Duration) -> Duration {
        let jitter = self.rng.lock().await.gen_range(0.0..0.5);
        base + base.mul_f64(jitter)
    }

    // ── Upload ─────────────────────────────────────────────────────

    /// Upload to a transfer relay picked uniformly at random from the
    /// live transfer-capable rows of the router table.
    pub async fn upload_to_any(
        &self,
        lifecycle: &Lifecycle,
        path: &Path,
        info: &FileInfo,
        handle: &TransferHandle,
    ) -> Result<(), MurkProtocolError> {
        let Some(relay) = lifecycle.select_transfer_relay() else {
            return Err(self.fail(
                handle,
                info.id,
                MurkProtocolError::Unavailable {
                    reason: "no transfer-capable relay is alive".into(),
                },
            ));
        };
        tracing::debug!(file = %info.id, relay = %relay.addr, "selected transfer relay");
        self.upload(path, info, relay.addr, handle).await
    }

    /// Drive one upload to completion against `relay`.
    ///
    /// The caller has already hashed the file into `info`.
    pub async fn upload(
        &self,
        path: &Path,
        info: &FileInfo,
        relay: SocketAddr,
        handle: &TransferHandle,
    ) -> Result<(), MurkProtocolError> {
        let total = info.chunk_count();
        let mut sent: u64 = 0;
        let mut retries: u32 = 0;
        let mut idle_polls: u32 = 0;
        let mut expiries: u32 = 0;
        let mut backoff = self.backoff();

        loop {
            handle.checkpoint().await?;
            self.defer_for_token(handle).await;

            let polled = match tokio::time::timeout(
                OP_DEADLINE,
                self.transport.poll_upload(relay, info),
            )
            .await
            {
                Ok(polled) => polled,
                Err(_) => {
                    if let Err(err) = self.soft_expire(handle, info.id, &mut expiries) {
                        return Err(self.fail(handle, info.id, err));
                    }
                    continue;
                }
            };
            match polled {
                Ok(UploadTask::Complete) => {
                    handle.set(TransferState::Done);
                    tracing::info!(file = %info.id, %relay, "upload complete");
                    self.events.emit(Notice::TransferComplete { file: info.id });
                    return Ok(());
                }
                Ok(UploadTask::Chunk(index)) => {
                    idle_polls = 0;
                    let data = match fsutil::read_chunk(path, index).await {
                        Ok(data) => data,
                        Err(err) => return Err(self.fail(handle, info.id, err)),
                    };
                    let pushed = match tokio::time::timeout(
                        OP_DEADLINE,
                        self.transport.send_chunk(relay, info.id, index, data),
                    )
                    .await
                    {
                        Ok(pushed) => pushed,
                        Err(_) => {
                            if let Err(err) = self.soft_expire(handle, info.id, &mut expiries) {
                                return Err(self.fail(handle, info.id, err));
                            }
                            continue;
                        }
                    };
                    match pushed {
                        // Progress resets the backoff, never the
                        // retry counter.
                        Ok(()) => {
                            backoff.reset();
                            sent += 1;
                            self.events.emit(Notice::TransferProgress {
                                file: info.id,
                                done_chunks: sent.min(total),
                                total_chunks: total,
                            });
                        }
                        Err(err) => {
                            retries += 1;
                            tracing::warn!(file = %info.id, chunk = index, retries, %err, "chunk send failed");
                            if retries >= RETRY_LIMIT {
                                return Err(self.fail(
                                    handle,
                                    info.id,
                                    MurkProtocolError::RetryExhausted { retries },
                                ));
                            }
                            tokio::time::sleep(backoff.next_delay()).await;
                        }
                    }
                }
                Ok(UploadTask::Idle) => {
                    idle_polls += 1;
                    if idle_polls >= IDLE_POLL_LIMIT {
                        // Relay stopped asking but never said complete.
                        return Err(self.fail(
                            handle,
                            info.id,
                            MurkProtocolError::Unavailable {
                                reason: format!("relay {relay} went quiet mid-upload"),
                            },
                        ));
                    }
                    handle.set(TransferState::Waiting);
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Err(err) => {
                    retries += 1;
                    tracing::warn!(file = %info.id, retries, %err, "upload poll failed");
                    if retries >= RETRY_LIMIT {
                        return Err(self.fail(
                            handle,
                            info.id,
                            MurkProtocolError::RetryExhausted { retries },
                        ));
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    // ── Download ───────────────────────────────────────────────────

    /// Fetch every chunk of `info` into `dest` from the candidate
    /// endpoints, verify the hash, and report completion.
    pub async fn download(
        &self,
        info: &FileInfo,
        dest: &Path,
        endpoints: Vec<SocketAddr>,
        handle: &TransferHandle,
    ) -> Result<(), MurkProtocolError> {
        handle.checkpoint().await?;
        if fsutil::exists_with_size(dest, info.size).await
            && fsutil::hash_file(dest).await? == info.id
        {
            // Already present and intact.
            handle.set(TransferState::Done);
            self.events.emit(Notice::TransferComplete { file: info.id });
            return Ok(());
        }

        let mut candidates: Vec<SocketAddr> = Vec::new();
        let mut known: HashSet<SocketAddr> = HashSet::new();
        for endpoint in endpoints {
            if known.insert(endpoint) {
                candidates.push(endpoint);
            }
        }
        if candidates.is_empty() {
            return Err(self.fail(
                handle,
                info.id,
                MurkProtocolError::Unavailable {
                    reason: "no endpoints offered the file".into(),
                },
            ));
        }

        fsutil::create_sized_file(dest, info.size).await?;

        let total = info.chunk_count();
        let result = self
            .fetch_all(info, dest, total, &mut candidates, &mut known, handle)
            .await;
        if let Err(err) = result {
            fsutil::remove_if_exists(dest).await?;
            if matches!(err, MurkProtocolError::Cancelled) {
                tracing::info!(file = %info.id, path = %dest.display(), "download cancelled");
                return Err(err);
            }
            return Err(self.fail(handle, info.id, err));
        }

        // Availability re-hash: never announce a file whose content
        // does not match its id.
        let actual = fsutil::hash_file(dest).await?;
        if actual != info.id {
            fsutil::remove_if_exists(dest).await?;
            return Err(self.fail(
                handle,
                info.id,
                MurkProtocolError::Unavailable {
                    reason: format!("assembled file hashed to {actual}, expected {}", info.id),
                },
            ));
        }

        handle.set(TransferState::Done);
        tracing::info!(file = %info.id, path = %dest.display(), "download complete");
        self.events.emit(Notice::TransferComplete { file: info.id });
        Ok(())
    }

    async fn fetch_all(
        &self,
        info: &FileInfo,
        dest: &Path,
        total: u64,
        candidates: &mut Vec<SocketAddr>,
        known: &mut HashSet<SocketAddr>,
        handle: &TransferHandle,
    ) -> Result<(), MurkProtocolError> {
        let mut backoff = self.backoff();
        // The retry budget spans the whole transfer; progress resets
        // the backoff only.
        let mut retries: u32 = 0;
        let mut expiries: u32 = 0;
        for index in 0..total {
            loop {
                handle.checkpoint().await?;
                self.defer_for_token(handle).await;
                let endpoint = self.pick(candidates).await?;

                let fetched = match tokio::time::timeout(
                    OP_DEADLINE,
                    self.transport.fetch_chunk(endpoint, info.id, index),
                )
                .await
                {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        self.soft_expire(handle, info.id, &mut expiries)?;
                        continue;
                    }
                };
                match fetched {
                    Ok(ChunkFetch::Data(data)) => {
                        let expected = CHUNK_SIZE.min(info.size - index * CHUNK_SIZE) as usize;
                        if data.len() != expected {
                            return Err(MurkProtocolError::Deserialization(format!(
                                "chunk {index}: got {} bytes, expected {expected}",
                                data.len()
                            )));
                        }
                        fsutil::write_chunk(dest, index, &data).await?;
                        backoff.reset();
                        self.events.emit(Notice::TransferProgress {
                            file: info.id,
                            done_chunks: index + 1,
                            total_chunks: total,
                        });
                        break;
                    }
                    Ok(ChunkFetch::Redirect(target)) => {
                        // A redirecting endpoint leaves the candidate
                        // list; dedup keeps redirect loops finite.
                        candidates.retain(|candidate| *candidate != endpoint);
                        if known.insert(target) {
                            candidates.push(target);
                            tracing::debug!(file = %info.id, %endpoint, %target, "following transfer redirect");
                        }
                    }
                    Ok(ChunkFetch::NotReady) => {
                        retries += 1;
                        handle.set(TransferState::Waiting);
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                    Err(err) => {
                        retries += 1;
                        tracing::warn!(file = %info.id, chunk = index, %endpoint, retries, %err, "chunk fetch failed");
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }

                if retries >= RETRY_LIMIT {
                    return Err(MurkProtocolError::RetryExhausted { retries });
                }
            }
        }
        Ok(())
    }

    /// Uniform random pick among the current candidates.
    async fn pick(&self, candidates: &[SocketAddr]) -> Result<SocketAddr, MurkProtocolError> {
        if candidates.is_empty() {
            return Err(MurkProtocolError::Unavailable {
                reason: "candidate endpoint list became empty".into(),
            });
        }
        let index = self.rng.lock().await.gen_range(0..candidates.len());
        Ok(candidates[index])
    }

    /// One transport operation outlived its deadline. Soft while under
    /// the limit: the transfer drops back to pending and retries. At
    /// the limit the expiry is hard.
    fn soft_expire(
        &self,
        handle: &TransferHandle,
        file: FileId,
        expiries: &mut u32,
    ) -> Result<(), MurkProtocolError> {
        *expiries += 1;
        tracing::warn!(%file, expiries = *expiries, "transfer operation ran past its deadline");
        if *expiries >= SOFT_EXPIRY_LIMIT {
            return Err(MurkProtocolError::Unavailable {
                reason: format!("{} operations ran past {OP_DEADLINE:?}", *expiries),
            });
        }
        handle.set(TransferState::Pending);
        Ok(())
    }

    fn fail(
        &self,
        handle: &TransferHandle,
        file: FileId,
        err: MurkProtocolError,
    ) -> MurkProtocolError {
        handle.set(TransferState::Errored);
        tracing::warn!(%file, %err, "transfer failed");
        self.events.emit(Notice::TransferFailed {
            file,
            reason: err.to_string(),
        });
        err
    }
}

// ── Relay transport ────────────────────────────────────────────────────

/// [`ChunkTransport`] over real relay connections: pooled sockets plus
/// one cached session per relay, re-handshaking when a relay forgets
/// us. Handshake credentials come from the router table's password
/// entry for that relay.
pub struct RelayChunkTransport {
    pool: Arc<Pool>,
    lifecycle: Arc<Lifecycle>,
    peer: PeerId,
    sessions: Mutex<HashMap<SocketAddr, RelaySession>>,
}

#[derive(Clone)]
struct RelaySession {
    session: SessionId,
    crypto: CryptoEnvelope,
}

impl RelayChunkTransport {
    pub fn new(pool: Arc<Pool>, lifecycle: Arc<Lifecycle>, peer: PeerId) -> Self {
        Self {
            pool,
            lifecycle,
            peer,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session with `relay`, handshaking on first use.
    async fn session_for(&self, relay: SocketAddr) -> Result<RelaySession, MurkProtocolError> {
        if let Some(existing) = self.sessions.lock().await.get(&relay) {
            return Ok(existing.clone());
        }

        let (key, cipher) = SymmetricCipher::generate();
        let password = self.lifecycle.relay(relay).and_then(|record| record.password);
        let handshake = Message::Handshake(Handshake {
            peer: self.peer,
            endpoint: None,
            session_key: key,
            credentials: password.as_deref().map(password_proof),
        });
        let frame = envelope::encode(std::slice::from_ref(&handshake))?;

        let mut connection = self.pool.checkout(relay).await?;
        let response = connection.round_trip(&Request::new(None, frame)).await?;
        if response.status != Status::Ok {
            return Err(MurkProtocolError::Refused {
                status: response.status.code(),
            });
        }
        self.pool.checkin(relay, connection);

        let crypto = CryptoEnvelope::session_only(Arc::new(cipher));
        let messages = envelope::decode(&crypto.open(&response.body)?)?;
        let session = match messages.first() {
            Some(Message::HandshakeAck(ack)) => ack.session,
            other => {
                return Err(MurkProtocolError::Deserialization(format!(
                    "expected handshake ack, got {other:?}"
                )))
            }
        };
        tracing::debug!(%relay, %session, "transfer session established");

        let link = RelaySession { session, crypto };
        self.sessions.lock().await.insert(relay, link.clone());
        Ok(link)
    }

    /// One sealed request/response exchange with `relay`.
    async fn exchange(
        &self,
        relay: SocketAddr,
        message: &Message,
    ) -> Result<Vec<Message>, MurkProtocolError> {
        let link = self.session_for(relay).await?;
        let sealed = link
            .crypto
            .seal(&envelope::encode(std::slice::from_ref(message))?)?;

        let mut connection = self.pool.checkout(relay).await?;
        let response = match connection
            .round_trip(&Request::new(Some(link.session), sealed))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // A stale pooled socket; its idle siblings are suspect too.
                self.pool.evict(relay);
                return Err(err.into());
            }
        };
        self.pool.checkin(relay, connection);

        match response.status {
            Status::Ok => envelope::decode(&link.crypto.open(&response.body)?),
            Status::Unauthorized => {
                // The relay forgot the session; handshake anew on retry.
                self.sessions.lock().await.remove(&relay);
                Err(MurkProtocolError::SessionInvalid)
            }
            other => Err(MurkProtocolError::Refused {
                status: other.code(),
            }),
        }
    }
}

#[async_trait]
impl ChunkTransport for RelayChunkTransport {
    async fn poll_upload(
        &self,
        relay: SocketAddr,
        file: &FileInfo,
    ) -> Result<UploadTask, MurkProtocolError> {
        let replies = self
            .exchange(
                relay,
                &Message::UploadPoll(UploadPoll {
                    file: file.id,
                    chunk_count: file.chunk_count(),
                }),
            )
            .await?;
        match replies.into_iter().next() {
            // The relay always asks for its next missing chunk, so an
            // empty answer means it holds the whole file.
            Some(Message::UploadTask(task)) => Ok(match task.chunk {
                Some(index) => UploadTask::Chunk(index),
                None => UploadTask::Complete,
            }),
            other => Err(MurkProtocolError::Deserialization(format!(
                "expected upload task, got {other:?}"
            ))),
        }
    }

    async fn send_chunk(
        &self,
        relay: SocketAddr,
        file: FileId,
        chunk: u64,
        data: Vec<u8>,
    ) -> Result<(), MurkProtocolError> {
        let replies = self
            .exchange(relay, &Message::UploadChunk(UploadChunk { file, chunk, data }))
            .await?;
        match replies.first() {
            Some(Message::UploadChunkAck(ack)) if ack.file == file && ack.chunk == chunk => Ok(()),
            other => Err(MurkProtocolError::Deserialization(format!(
                "expected chunk ack, got {other:?}"
            ))),
        }
    }

    async fn fetch_chunk(
        &self,
        endpoint: SocketAddr,
        file: FileId,
        chunk: u64,
    ) -> Result<ChunkFetch, MurkProtocolError> {
        let replies = self
            .exchange(endpoint, &Message::Download(Download { file, chunk }))
            .await?;
        match replies.into_iter().next() {
            Some(Message::DownloadReply(reply)) => Ok(match (reply.data, reply.redirect) {
                (Some(data), _) => ChunkFetch::Data(data),
                (None, Some(target)) => ChunkFetch::Redirect(target),
                (None, None) => ChunkFetch::NotReady,
            }),
            other => Err(MurkProtocolError::Deserialization(format!(
                "expected download reply, got {other:?}"
            ))),
        }
    }
}
