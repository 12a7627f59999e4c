//! Tracks active connections and mediates admission: the single place that
//! decides whether an inbound socket or a discovered enode gets to become a
//! session. Mirrors the teacher's channel-based style (`peer_channels.rs`)
//! rather than a shared mutable map guarded by a giant lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::enode::Enode;
use crate::rlpx::message::Message;

const DIAL_QUEUE_CAPACITY: usize = 256;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Bound on a single peer's outbound broadcast queue; a peer slow enough to
/// fill this is dropped rather than letting one laggard stall the others.
const PEER_OUTBOX_CAPACITY: usize = 64;
/// eth/68 relative message codes (absolute code is `ETH_CAP_OFFSET + this`).
const ETH_NEW_BLOCK_HASHES: u8 = 0x01;
const ETH_TRANSACTIONS: u8 = 0x02;

struct Backoff {
    next_attempt_at: Instant,
    delay: Duration,
}

impl Backoff {
    fn fresh() -> Self {
        Self {
            next_attempt_at: Instant::now(),
            delay: BACKOFF_BASE,
        }
    }

    fn failed(&mut self) {
        self.delay = (self.delay * 2).min(BACKOFF_CAP);
        self.next_attempt_at = Instant::now() + self.delay;
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_BASE;
        self.next_attempt_at = Instant::now();
    }
}

/// Owns peer admission and the outbound dial queue. Never touches a socket
/// itself; `net::dial` does that, reporting back via `dial_succeeded`/
/// `dial_failed` so backoff state stays in one place.
pub struct PeerPool {
    config: Config,
    /// Every live session, inbound or outbound; the `bool` marks inbound so
    /// `admit_inbound` can enforce `maxInbound` on top of the shared
    /// `maxPeers` ceiling both directions count against.
    connected: Mutex<HashMap<SocketAddr, bool>>,
    /// One outbound channel per admitted peer, fed by `broadcast_*` and
    /// drained by that peer's own `RLPxConnection::handle_peer` task.
    senders: Mutex<HashMap<SocketAddr, mpsc::Sender<Arc<Message>>>>,
    backoffs: Mutex<HashMap<SocketAddr, Backoff>>,
    dial_tx: mpsc::Sender<Enode>,
    dial_rx: Mutex<Option<mpsc::Receiver<Enode>>>,
}

impl PeerPool {
    pub fn new(config: Config) -> Self {
        let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE_CAPACITY);
        Self {
            config,
            connected: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            backoffs: Mutex::new(HashMap::new()),
            dial_tx,
            dial_rx: Mutex::new(Some(dial_rx)),
        }
    }

    /// Takes ownership of the dial queue's receiving end. Panics if called
    /// twice; there is exactly one dial-loop task per pool.
    pub fn take_dial_queue(&self) -> mpsc::Receiver<Enode> {
        self.dial_rx
            .lock()
            .expect("peer pool mutex poisoned")
            .take()
            .expect("dial queue already taken")
    }

    pub fn schedule_dial(&self, enode: Enode) {
        if self.dial_tx.try_send(enode).is_err() {
            warn!(%enode.node_id, "dial queue full, dropping dial request");
        }
    }

    /// Called by the dial loop before connecting, to respect backoff.
    pub fn ready_to_dial(&self, addr: SocketAddr) -> bool {
        let backoffs = self.backoffs.lock().expect("peer pool mutex poisoned");
        match backoffs.get(&addr) {
            Some(backoff) => Instant::now() >= backoff.next_attempt_at,
            None => true,
        }
    }

    pub fn dial_succeeded(&self, addr: SocketAddr) {
        let mut backoffs = self.backoffs.lock().expect("peer pool mutex poisoned");
        backoffs.entry(addr).or_insert_with(Backoff::fresh).reset();
    }

    pub fn dial_failed(&self, addr: SocketAddr) {
        let mut backoffs = self.backoffs.lock().expect("peer pool mutex poisoned");
        backoffs.entry(addr).or_insert_with(Backoff::fresh).failed();
    }

    /// Inbound admission: total connections stay under `maxPeers`, and
    /// inbound connections are capped at `maxInbound` = `maxPeers / 2` so a
    /// node always has room to make outbound connections of its choosing.
    pub fn admit_inbound(&self, addr: SocketAddr) -> bool {
        let mut connected = self.connected.lock().expect("peer pool mutex poisoned");
        let inbound_count = connected.values().filter(|&&inbound| inbound).count() as u32;
        if connected.len() as u32 >= self.config.max_peers || inbound_count >= self.config.max_inbound() {
            debug!(count = connected.len(), "inbound admission rejected, pool full");
            return false;
        }
        connected.insert(addr, true);
        true
    }

    /// Outbound admission: only the shared `maxPeers` ceiling applies: a
    /// node dials out by its own choice, so there is no sub-cap to enforce.
    pub fn admit_outbound(&self, addr: SocketAddr) -> bool {
        let mut connected = self.connected.lock().expect("peer pool mutex poisoned");
        if connected.len() as u32 >= self.config.max_peers {
            debug!(count = connected.len(), "outbound admission rejected, pool full");
            return false;
        }
        connected.insert(addr, false);
        true
    }

    pub fn remove(&self, addr: SocketAddr) {
        self.connected.lock().expect("peer pool mutex poisoned").remove(&addr);
        self.senders.lock().expect("peer pool mutex poisoned").remove(&addr);
    }

    pub fn len(&self) -> usize {
        self.connected.lock().expect("peer pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `addr`'s outbound channel once its session is established,
    /// returning the receiving end for that peer's connection task to drain.
    /// Call once per session; a second registration for the same address
    /// silently replaces the first.
    pub fn register_sender(&self, addr: SocketAddr) -> mpsc::Receiver<Arc<Message>> {
        let (tx, rx) = mpsc::channel(PEER_OUTBOX_CAPACITY);
        self.senders.lock().expect("peer pool mutex poisoned").insert(addr, tx);
        rx
    }

    /// Best-effort fan-out of a `Transactions` message to every connected
    /// peer. A peer whose outbox is full or whose connection task has
    /// already exited is dropped from the pool; it never blocks the others.
    pub fn broadcast_transactions(&self, payload: Vec<u8>) {
        self.broadcast(ETH_TRANSACTIONS, payload);
    }

    /// Best-effort fan-out of a `NewBlockHashes` message to every connected
    /// peer, with the same per-peer failure handling as
    /// `broadcast_transactions`.
    pub fn broadcast_new_block_hashes(&self, payload: Vec<u8>) {
        self.broadcast(ETH_NEW_BLOCK_HASHES, payload);
    }

    fn broadcast(&self, relative_code: u8, payload: Vec<u8>) {
        let message = Arc::new(Message::Eth {
            relative_code,
            payload,
        });
        let unreachable: Vec<SocketAddr> = {
            let senders = self.senders.lock().expect("peer pool mutex poisoned");
            senders
                .iter()
                .filter_map(|(addr, tx)| {
                    if tx.try_send(message.clone()).is_err() {
                        Some(*addr)
                    } else {
                        None
                    }
                })
                .collect()
        };
        for addr in unreachable {
            warn!(%addr, "peer outbox full or closed, dropping from pool");
            self.remove(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_until_max_peers_then_rejects() {
        let mut config = Config::default();
        config.max_peers = 4;
        let pool = PeerPool::new(config);
        for port in 0..4u16 {
            let addr: SocketAddr = format!("127.0.0.1:{}", 40000 + port).parse().unwrap();
            assert!(pool.admit_inbound(addr));
        }
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        assert!(!pool.admit_inbound(addr));
    }

    #[test]
    fn backoff_grows_and_resets() {
        let pool = PeerPool::new(Config::default());
        let addr: SocketAddr = "127.0.0.1:30303".parse().unwrap();
        assert!(pool.ready_to_dial(addr));
        pool.dial_failed(addr);
        assert!(!pool.ready_to_dial(addr));
        pool.dial_succeeded(addr);
        assert!(pool.ready_to_dial(addr));
    }
}
