/// Lifecycle manager — the thread-safe indices everything else leans on.
///
/// One parent context owns a session table, a peer table, a group
/// table, a relay (router) table, the tunnel registries, a bounded
/// per-peer pending-message ring, and the abuse tracker. Each container
/// has its own lock, taken for the minimum scope needed to mutate or
/// snapshot it; no lock is ever held across an await. Read-mostly
/// iteration clones a snapshot under the lock and releases it before
/// any handler runs.
///
/// The periodic timeout sweep calls the `expire_*` methods for every
/// container that carries a last-activity timestamp. Peer eviction
/// cascades: tunnels and delivery sockets are closed, group membership
/// is removed, queued messages are discarded, and the abuse tracker is
/// told about the removal.
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::mpsc;

use crate::crypto::Cipher;
use crate::message::{Message, PeerSummary};
use crate::types::{now_ms, GroupId, PeerId, SessionId, PENDING_RING_CAPACITY};

/// Strikes before a peer is muted.
const MUTE_THRESHOLD: u32 = 3;

/// Tracked-peer capacity of the abuse tracker.
const ABUSE_CAPACITY: usize = 4096;

/// Delivery sockets kept per peer.
const MAX_DELIVERY_SOCKETS: usize = 4;

// ── Records ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SessionRecord {
    pub session: SessionId,
    pub peer: PeerId,
    pub cipher: Arc<dyn Cipher>,
    /// False until the handshake response has been delivered; a session
    /// that was never valid is torn down on the first crypto failure.
    pub established: bool,
    /// Room whose key currently seals this session's outer layer. Each
    /// encrypted join replaces it; plain joins leave it alone.
    pub group: Option<GroupId>,
    pub last_activity: u64,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session", &self.session)
            .field("peer", &self.peer)
            .field("established", &self.established)
            .field("group", &self.group)
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer: PeerId,
    pub endpoint: Option<SocketAddr>,
    pub behind_relay: bool,
    pub muted: bool,
    pub last_activity: u64,
    pub session: Option<SessionId>,
    pub groups: HashSet<GroupId>,
}

impl PeerRecord {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer: self.peer,
            endpoint: self.endpoint,
            behind_relay: self.behind_relay,
            muted: self.muted,
        }
    }
}

#[derive(Clone)]
pub struct GroupRecord {
    pub group: GroupId,
    pub name: String,
    /// Community cipher, when this group carries an outer crypto layer.
    pub cipher: Option<Arc<dyn Cipher>>,
    pub members: HashSet<PeerId>,
}

/// A relay known to this node — possibly itself a client of other
/// relays (federation).
#[derive(Debug, Clone)]
pub struct RelayRecord {
    pub addr: SocketAddr,
    pub password: Option<String>,
    pub alive: bool,
    /// Size of the relay's peer table, as last reported.
    pub load: usize,
    pub transfer_capable: bool,
}

// ── Tunnels ────────────────────────────────────────────────────────────

/// Sending half of a tunnel or delivery socket: sealed frames pushed
/// here are written to the peer's connection by its writer task.
/// Dropping every clone closes the socket.
#[derive(Clone)]
pub struct TunnelHandle {
    pub peer: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TunnelHandle {
    pub fn new(peer: PeerId) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peer, tx }, rx)
    }

    pub fn push(&self, sealed_frame: Vec<u8>) -> bool {
        self.tx.send(sealed_frame).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Pending ring ───────────────────────────────────────────────────────

/// Bounded per-peer FIFO of undelivered outbound messages.
///
/// When a peer has no live tunnel, messages queue here and are flushed
/// the moment a tunnel appears. A full ring drops the oldest entry:
/// delivery is lossy best-effort by design, and the drop is logged.
#[derive(Debug, Default)]
pub struct PendingRing {
    capacity: usize,
    rings: HashMap<PeerId, VecDeque<Message>>,
}

impl PendingRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: HashMap::new(),
        }
    }

    /// Queue a message; returns the dropped oldest entry if full.
    pub fn push(&mut self, peer: PeerId, message: Message) -> Option<Message> {
        let ring = self.rings.entry(peer).or_default();
        let dropped = if ring.len() >= self.capacity {
            ring.pop_front()
        } else {
            None
        };
        ring.push_back(message);
        dropped
    }

    /// Put unsent messages back at the front, preserving FIFO order for
    /// the next delivery attempt.
    pub fn requeue_front(&mut self, peer: PeerId, messages: Vec<Message>) {
        let ring = self.rings.entry(peer).or_default();
        for message in messages.into_iter().rev() {
            ring.push_front(message);
        }
        while ring.len() > self.capacity {
            ring.pop_back();
        }
    }

    /// Take every queued message for `peer`, oldest first.
    pub fn drain(&mut self, peer: PeerId) -> Vec<Message> {
        self.rings
            .remove(&peer)
            .map(|ring| ring.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, peer: PeerId) -> usize {
        self.rings.get(&peer).map(VecDeque::len).unwrap_or(0)
    }

    pub fn discard(&mut self, peer: PeerId) {
        self.rings.remove(&peer);
    }
}

// ── Abuse tracker ──────────────────────────────────────────────────────

/// LRU strike counter for misbehaving peers ("troll" tracking).
///
/// Bad frames, crypto failures, and evictions each add a strike; a peer
/// past the threshold is muted. Bounded so unknown peers cannot grow it.
pub struct AbuseTracker {
    strikes: LruCache<PeerId, u32>,
    threshold: u32,
}

impl AbuseTracker {
    pub fn new() -> Self {
        Self {
            strikes: LruCache::new(NonZeroUsize::new(ABUSE_CAPACITY).expect("nonzero")),
            threshold: MUTE_THRESHOLD,
        }
    }

    /// Record one strike; returns the new total.
    pub fn strike(&mut self, peer: PeerId) -> u32 {
        let total = self.strikes.get(&peer).copied().unwrap_or(0) + 1;
        self.strikes.put(peer, total);
        total
    }

    /// A timed-out eviction counts as a strike too.
    pub fn note_eviction(&mut self, peer: PeerId) -> u32 {
        self.strike(peer)
    }

    pub fn is_muted(&mut self, peer: PeerId) -> bool {
        self.strikes
            .get(&peer)
            .map(|&strikes| strikes >= self.threshold)
            .unwrap_or(false)
    }

    pub fn strikes(&mut self, peer: PeerId) -> u32 {
        self.strikes.get(&peer).copied().unwrap_or(0)
    }
}

impl Default for AbuseTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── The manager ────────────────────────────────────────────────────────

pub struct Lifecycle {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
    groups: Mutex<HashMap<GroupId, GroupRecord>>,
    relays: Mutex<HashMap<SocketAddr, RelayRecord>>,
    tunnels: Mutex<HashMap<PeerId, TunnelHandle>>,
    delivery: Mutex<HashMap<PeerId, Vec<TunnelHandle>>>,
    ring: Mutex<PendingRing>,
    abuse: Mutex<AbuseTracker>,
    rng: Mutex<StdRng>,
}

impl Lifecycle {
    /// `seed` makes every random id and selection reproducible in tests.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sessions: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            relays: Mutex::new(HashMap::new()),
            tunnels: Mutex::new(HashMap::new()),
            delivery: Mutex::new(HashMap::new()),
            ring: Mutex::new(PendingRing::new(PENDING_RING_CAPACITY)),
            abuse: Mutex::new(AbuseTracker::new()),
            rng: Mutex::new(rng),
        }
    }

    fn next_raw_id<V>(map: &HashMap<u64, V>, rng: &mut StdRng) -> u64 {
        // Collision-free under the container's lock.
        loop {
            let candidate = rng.next_u64();
            if candidate != 0 && !map.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Create a session with a fresh collision-free id.
    pub fn insert_session(&self, peer: PeerId, cipher: Arc<dyn Cipher>) -> SessionId {
        let mut sessions = self.sessions.lock().expect("session lock");
        let mut rng = self.rng.lock().expect("rng lock");
        let raw = loop {
            let candidate = rng.next_u64();
            if candidate != 0 && !sessions.contains_key(&SessionId::from_raw(candidate)) {
                break candidate;
            }
        };
        drop(rng);
        let session = SessionId::from_raw(raw);
        sessions.insert(
            session,
            SessionRecord {
                session,
                peer,
                cipher,
                established: false,
                group: None,
                last_activity: now_ms(),
            },
        );
        session
    }

    pub fn session(&self, session: SessionId) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .expect("session lock")
            .get(&session)
            .cloned()
    }

    pub fn mark_session_established(&self, session: SessionId) {
        if let Some(record) = self.sessions.lock().expect("session lock").get_mut(&session) {
            record.established = true;
        }
    }

    /// Record the group whose cipher seals this session's outer layer.
    pub fn set_session_group(&self, session: SessionId, group: Option<GroupId>) {
        if let Some(record) = self.sessions.lock().expect("session lock").get_mut(&session) {
            record.group = group;
        }
    }

    pub fn touch_session(&self, session: SessionId) {
        if let Some(record) = self.sessions.lock().expect("session lock").get_mut(&session) {
            record.last_activity = now_ms();
        }
    }

    pub fn remove_session(&self, session: SessionId) -> Option<SessionRecord> {
        self.sessions.lock().expect("session lock").remove(&session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session lock").len()
    }

    /// Remove sessions idle past `window_ms`; returns the evicted records.
    pub fn expire_sessions(&self, window_ms: u64) -> Vec<SessionRecord> {
        let cutoff = now_ms().saturating_sub(window_ms);
        let mut sessions = self.sessions.lock().expect("session lock");
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|record| record.last_activity < cutoff)
            .map(|record| record.session)
            .collect();
        expired
            .into_iter()
            .filter_map(|session| sessions.remove(&session))
            .collect()
    }

    // ── Peers ──────────────────────────────────────────────────────

    pub fn upsert_peer(&self, record: PeerRecord) {
        self.peers
            .lock()
            .expect("peer lock")
            .insert(record.peer, record);
    }

    pub fn peer(&self, peer: PeerId) -> Option<PeerRecord> {
        self.peers.lock().expect("peer lock").get(&peer).cloned()
    }

    pub fn touch_peer(&self, peer: PeerId) {
        if let Some(record) = self.peers.lock().expect("peer lock").get_mut(&peer) {
            record.last_activity = now_ms();
        }
    }

    pub fn set_peer_muted(&self, peer: PeerId, muted: bool) {
        if let Some(record) = self.peers.lock().expect("peer lock").get_mut(&peer) {
            record.muted = muted;
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer lock").len()
    }

    /// Snapshot of every peer, for presence replies. Taken under the
    /// lock, iterated without it.
    pub fn peer_snapshot(&self) -> Vec<PeerRecord> {
        self.peers.lock().expect("peer lock").values().cloned().collect()
    }

    /// Remove one peer with the full cascade.
    pub fn remove_peer(&self, peer: PeerId) -> Option<PeerRecord> {
        let record = self.peers.lock().expect("peer lock").remove(&peer)?;
        self.cascade_peer_removal(&record, false);
        Some(record)
    }

    /// Remove peers idle past `window_ms`, cascading each removal.
    /// Returns the evicted records so the caller can emit events.
    pub fn expire_peers(&self, window_ms: u64) -> Vec<PeerRecord> {
        let cutoff = now_ms().saturating_sub(window_ms);
        let evicted: Vec<PeerRecord> = {
            let mut peers = self.peers.lock().expect("peer lock");
            let stale: Vec<PeerId> = peers
                .values()
                .filter(|record| record.last_activity < cutoff)
                .map(|record| record.peer)
                .collect();
            stale
                .into_iter()
                .filter_map(|peer| peers.remove(&peer))
                .collect()
        };
        for record in &evicted {
            self.cascade_peer_removal(record, true);
        }
        evicted
    }

    /// Close sockets, leave groups, drop queued messages, drop the
    /// session, and tell the abuse tracker.
    fn cascade_peer_removal(&self, record: &PeerRecord, timed_out: bool) {
        self.tunnels.lock().expect("tunnel lock").remove(&record.peer);
        self.delivery.lock().expect("delivery lock").remove(&record.peer);
        self.ring.lock().expect("ring lock").discard(record.peer);
        if let Some(session) = record.session {
            self.sessions.lock().expect("session lock").remove(&session);
        }
        {
            let mut groups = self.groups.lock().expect("group lock");
            for group in &record.groups {
                if let Some(entry) = groups.get_mut(group) {
                    entry.members.remove(&record.peer);
                }
            }
        }
        if timed_out {
            let strikes = self.abuse.lock().expect("abuse lock").note_eviction(record.peer);
            tracing::info!(peer = %record.peer, strikes, "peer evicted by timeout sweep");
        } else {
            tracing::debug!(peer = %record.peer, "peer removed");
        }
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Create a group with a fresh id, or return the existing one by name.
    pub fn create_or_get_group(&self, name: &str, cipher: Option<Arc<dyn Cipher>>) -> GroupId {
        let mut groups = self.groups.lock().expect("group lock");
        if let Some(existing) = groups.values().find(|g| g.name == name) {
            return existing.group;
        }
        let mut rng = self.rng.lock().expect("rng lock");
        let raw_map: HashMap<u64, ()> = groups.keys().map(|g| (g.as_raw(), ())).collect();
        let raw = Self::next_raw_id(&raw_map, &mut rng);
        drop(rng);
        let group = GroupId::from_raw(raw);
        groups.insert(
            group,
            GroupRecord {
                group,
                name: name.to_string(),
                cipher,
                members: HashSet::new(),
            },
        );
        group
    }

    pub fn group(&self, group: GroupId) -> Option<GroupRecord> {
        self.groups.lock().expect("group lock").get(&group).cloned()
    }

    pub fn set_group_cipher(&self, group: GroupId, cipher: Arc<dyn Cipher>) {
        if let Some(record) = self.groups.lock().expect("group lock").get_mut(&group) {
            record.cipher = Some(cipher);
        }
    }

    pub fn group_cipher(&self, group: GroupId) -> Option<Arc<dyn Cipher>> {
        self.groups
            .lock()
            .expect("group lock")
            .get(&group)
            .and_then(|record| record.cipher.clone())
    }

    pub fn join_group(&self, group: GroupId, peer: PeerId) -> bool {
        let joined = {
            let mut groups = self.groups.lock().expect("group lock");
            match groups.get_mut(&group) {
                Some(record) => {
                    record.members.insert(peer);
                    true
                }
                None => false,
            }
        };
        if joined {
            if let Some(record) = self.peers.lock().expect("peer lock").get_mut(&peer) {
                record.groups.insert(group);
            }
        }
        joined
    }

    pub fn leave_group(&self, group: GroupId, peer: PeerId) {
        if let Some(record) = self.groups.lock().expect("group lock").get_mut(&group) {
            record.members.remove(&peer);
        }
        if let Some(record) = self.peers.lock().expect("peer lock").get_mut(&peer) {
            record.groups.remove(&group);
        }
    }

    /// Member snapshot, for fan-out and join replies.
    pub fn group_members(&self, group: GroupId) -> Vec<PeerId> {
        self.groups
            .lock()
            .expect("group lock")
            .get(&group)
            .map(|record| record.members.iter().copied().collect())
            .unwrap_or_default()
    }

    // ── Relays (router table) ──────────────────────────────────────

    pub fn upsert_relay(&self, record: RelayRecord) {
        self.relays
            .lock()
            .expect("relay lock")
            .insert(record.addr, record);
    }

    pub fn relay(&self, addr: SocketAddr) -> Option<RelayRecord> {
        self.relays.lock().expect("relay lock").get(&addr).cloned()
    }

    pub fn mark_relay_alive(&self, addr: SocketAddr, alive: bool) {
        if let Some(record) = self.relays.lock().expect("relay lock").get_mut(&addr) {
            record.alive = alive;
        }
    }

    pub fn set_relay_load(&self, addr: SocketAddr, load: usize) {
        if let Some(record) = self.relays.lock().expect("relay lock").get_mut(&addr) {
            record.load = load;
        }
    }

    /// Alive transfer-capable relays, snapshotted for selection.
    pub fn transfer_relays(&self) -> Vec<RelayRecord> {
        self.relays
            .lock()
            .expect("relay lock")
            .values()
            .filter(|record| record.alive && record.transfer_capable)
            .cloned()
            .collect()
    }

    /// Pick one transfer-capable relay uniformly at random.
    pub fn select_transfer_relay(&self) -> Option<RelayRecord> {
        let candidates = self.transfer_relays();
        if candidates.is_empty() {
            return None;
        }
        let index = self
            .rng
            .lock()
            .expect("rng lock")
            .gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }

    // ── Tunnels & delivery sockets ─────────────────────────────────

    /// Bind `handle` as the peer's dedicated tunnel. At most one tunnel
    /// per peer: the previous handle is returned so its socket closes.
    pub fn register_tunnel(&self, handle: TunnelHandle) -> Option<TunnelHandle> {
        let mut tunnels = self.tunnels.lock().expect("tunnel lock");
        let old = tunnels.insert(handle.peer, handle);
        if old.is_some() {
            tracing::debug!("tunnel replaced, closing previous connection");
        }
        old
    }

    /// Add a pooled delivery socket for the peer, capped.
    pub fn register_delivery(&self, handle: TunnelHandle) {
        let mut delivery = self.delivery.lock().expect("delivery lock");
        let sockets = delivery.entry(handle.peer).or_default();
        sockets.retain(|socket| !socket.is_closed());
        if sockets.len() >= MAX_DELIVERY_SOCKETS {
            sockets.remove(0);
        }
        sockets.push(handle);
    }

    /// Any live handle able to push to `peer`: the dedicated tunnel
    /// first, then a delivery socket.
    pub fn push_handle(&self, peer: PeerId) -> Option<TunnelHandle> {
        {
            let mut tunnels = self.tunnels.lock().expect("tunnel lock");
            if let Some(handle) = tunnels.get(&peer) {
                if !handle.is_closed() {
                    return Some(handle.clone());
                }
                tunnels.remove(&peer);
            }
        }
        let mut delivery = self.delivery.lock().expect("delivery lock");
        if let Some(sockets) = delivery.get_mut(&peer) {
            sockets.retain(|socket| !socket.is_closed());
            return sockets.first().cloned();
        }
        None
    }

    pub fn has_tunnel(&self, peer: PeerId) -> bool {
        self.push_handle(peer).is_some()
    }

    // ── Pending ring ───────────────────────────────────────────────

    /// Queue an undeliverable message. Logs and reports the dropped
    /// oldest entry when the ring is full.
    pub fn queue_pending(&self, peer: PeerId, message: Message) -> Option<Message> {
        let dropped = self.ring.lock().expect("ring lock").push(peer, message);
        if dropped.is_some() {
            tracing::warn!(%peer, "pending ring full, dropping oldest undelivered message");
        }
        dropped
    }

    pub fn drain_pending(&self, peer: PeerId) -> Vec<Message> {
        self.ring.lock().expect("ring lock").drain(peer)
    }

    pub fn requeue_pending(&self, peer: PeerId, messages: Vec<Message>) {
        self.ring.lock().expect("ring lock").requeue_front(peer, messages)
    }

    pub fn pending_len(&self, peer: PeerId) -> usize {
        self.ring.lock().expect("ring lock").len(peer)
    }

    // ── Abuse ──────────────────────────────────────────────────────

    /// Record a strike; mutes the peer once past the threshold.
    /// Returns true while the peer is muted.
    pub fn strike(&self, peer: PeerId) -> bool {
        let (strikes, muted) = {
            let mut abuse = self.abuse.lock().expect("abuse lock");
            let strikes = abuse.strike(peer);
            (strikes, abuse.is_muted(peer))
        };
        if muted {
            self.set_peer_muted(peer, true);
            tracing::warn!(%peer, strikes, "peer muted by abuse tracker");
        }
        muted
    }

    pub fn is_muted(&self, peer: PeerId) -> bool {
        self.abuse.lock().expect("abuse lock").is_muted(peer)
    }
}
