//! UDP discovery driver: bootstraps from configured bootnodes, answers
//! ping/pong/findnode/neighbours, and periodically revalidates and refreshes
//! the routing table. Grounded on the teacher's `net.rs` discovery loop
//! (`discovery_startup`, `peers_revalidation`), adapted to a from-scratch
//! tree-of-buckets routing table (see `kademlia`) since the teacher's own
//! routing-table source isn't part of this crate's lineage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use ethereum_types::H512;
use k256::ecdsa::SigningKey;
use tokio::net::UdpSocket;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ban_list::BanList;
use super::error::DiscoveryError;
use super::kademlia::{AddOutcome, PeerRecord, RoutingTable};
use super::message::{
    expiration_from_now, is_expired, now_unix, Endpoint, FindNodeMessage, Message, NeighbourNode,
    NeighboursMessage, PingMessage, PongMessage,
};
use super::packet::Packet;
use crate::config::Config;
use crate::enode::Enode;
use crate::peer_pool::PeerPool;
use crate::persistence::{self, PeerStoreRecord};
use crate::rlpx::utils::pubkey2id;

/// How many nodes worth fit in one UDP datagram's `Neighbours` reply without
/// risking IP fragmentation, matching the devp2p reference clients.
const MAX_NODES_PER_NEIGHBOURS: usize = 12;
const MAX_DISC_PACKET_SIZE: usize = 1280;
const PROOF_VALID_SECS: u64 = 20;
const REVALIDATE_PER_BUCKET: usize = 3;

pub struct DiscoveryDriver {
    signer: SigningKey,
    local_node_id: H512,
    config: Config,
    pool: Arc<PeerPool>,
    table: StdMutex<RoutingTable>,
    ban_list: StdMutex<BanList>,
}

impl DiscoveryDriver {
    pub fn new(signer: SigningKey, config: Config, pool: Arc<PeerPool>) -> Self {
        let local_node_id = pubkey2id(&(*signer.verifying_key()).into());
        Self {
            signer,
            local_node_id,
            config,
            pool,
            table: StdMutex::new(RoutingTable::new(local_node_id)),
            ban_list: StdMutex::new(BanList::default()),
        }
    }

    pub async fn run(&self) -> Result<(), DiscoveryError> {
        let socket = UdpSocket::bind(("0.0.0.0", self.config.listen_port))
            .await
            .map_err(|err| DiscoveryError::Transport(err.to_string()))?;
        info!(port = self.config.listen_port, "discv4 socket bound");

        self.seed_from_peerstore();
        self.bootstrap(&socket).await;

        let mut revalidate_tick = time::interval(Duration::from_secs(30));
        revalidate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Shares its cadence with the refresh lookup below, so persisting the
        // table to `peerstore.json` doesn't need a task of its own.
        let mut refresh_tick = time::interval(Duration::from_secs(60));
        refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Give the network a moment to settle before the first lookup, so
        // bootstrap pongs have a chance to land first.
        time::sleep(Duration::from_secs(10)).await;
        self.lookup(&socket, self.local_node_id).await;

        let mut buf = [0u8; MAX_DISC_PACKET_SIZE];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_packet(&socket, &buf[..len], from).await,
                        Err(err) => warn!(%err, "discv4 socket read failed"),
                    }
                }
                _ = revalidate_tick.tick() => self.revalidate(&socket).await,
                _ = refresh_tick.tick() => {
                    let target = H512::random();
                    self.lookup(&socket, target).await;
                    self.persist_to_peerstore();
                }
            }
        }
    }

    /// Seeds the routing table from a prior run's `peerstore.json`, if any.
    /// Entries are added the same way a live discovery observation would be;
    /// stale ones simply drop out the next time their bucket is revalidated.
    fn seed_from_peerstore(&self) {
        let records = persistence::load(&self.config.peerstore_path());
        if records.is_empty() {
            return;
        }
        let mut table = self.table.lock().expect("routing table mutex poisoned");
        let mut seeded = 0;
        for record in &records {
            if let Some(peer) = record.to_peer() {
                if matches!(table.add(peer), AddOutcome::Added) {
                    seeded += 1;
                }
            }
        }
        info!(seeded, known = records.len(), "seeded routing table from peerstore.json");
    }

    /// Snapshots the routing table to `peerstore.json`, atomically. Called on
    /// the same 60s cadence as the refresh lookup.
    fn persist_to_peerstore(&self) {
        let contacts = {
            let table = self.table.lock().expect("routing table mutex poisoned");
            table.all_contacts()
        };
        let last_seen = now_unix();
        let records: Vec<PeerStoreRecord> = contacts
            .iter()
            .map(|peer| PeerStoreRecord::from_peer(peer, last_seen))
            .collect();
        if let Err(err) = persistence::save(&self.config.peerstore_path(), records) {
            warn!(%err, "failed to persist peerstore.json");
        }
    }

    async fn bootstrap(&self, socket: &UdpSocket) {
        for bootnode in self.config.bootnodes.clone() {
            self.send_ping(socket, bootnode.udp_addr()).await;
        }
    }

    async fn lookup(&self, socket: &UdpSocket, target: H512) {
        let closest = {
            let table = self.table.lock().expect("routing table mutex poisoned");
            table.closest(target, REVALIDATE_PER_BUCKET * 4)
        };
        for peer in closest {
            self.send_find_node(socket, SocketAddr::new(peer.ip, peer.udp_port), target)
                .await;
        }
    }

    async fn revalidate(&self, socket: &UdpSocket) {
        let stale = {
            let table = self.table.lock().expect("routing table mutex poisoned");
            table.stalest_contacts(REVALIDATE_PER_BUCKET)
        };
        for peer in stale {
            self.send_ping(socket, SocketAddr::new(peer.ip, peer.udp_port))
                .await;
        }
    }

    async fn handle_packet(&self, socket: &UdpSocket, data: &[u8], from: SocketAddr) {
        if self.ban_list.lock().expect("ban list mutex poisoned").has(&from.ip().to_string()) {
            debug!(%from, "dropping packet from banned address");
            return;
        }

        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%from, %err, "dropping malformed discv4 packet");
                return;
            }
        };

        match packet.message {
            Message::Ping(ping) => {
                if is_expired(ping.expiration) {
                    return;
                }
                self.send_pong(socket, from, packet.hash).await;
                self.observe(packet.node_id, from, ping.from.tcp_port);
            }
            Message::Pong(pong) => {
                if is_expired(pong.expiration) {
                    return;
                }
                self.observe(packet.node_id, from, 0);
            }
            Message::FindNode(find_node) => {
                if is_expired(find_node.expiration) {
                    return;
                }
                self.reply_neighbours(socket, from, find_node.target).await;
            }
            Message::Neighbours(neighbours) => {
                if is_expired(neighbours.expiration) {
                    return;
                }
                for node in neighbours.nodes {
                    self.observe(node.node_id, SocketAddr::new(node.endpoint.ip, node.endpoint.udp_port), node.endpoint.tcp_port);
                    self.send_ping(socket, SocketAddr::new(node.endpoint.ip, node.endpoint.udp_port)).await;
                }
            }
        }
    }

    /// Records a contact seen via ping, pong, or a neighbours reply. On
    /// `Full`, the caller (here, the driver itself) pings the bucket's
    /// current contacts to check liveness before the candidate can take a
    /// slot; those pings are simply fired and the candidate stays queued as
    /// a replacement until `revalidate` frees a slot.
    fn observe(&self, node_id: H512, addr: SocketAddr, tcp_port: u16) {
        if node_id == self.local_node_id {
            return;
        }
        let peer = PeerRecord {
            id: node_id,
            ip: addr.ip(),
            udp_port: addr.port(),
            tcp_port,
            vector_clock: 1,
        };
        let mut table = self.table.lock().expect("routing table mutex poisoned");
        match table.add(peer) {
            AddOutcome::Added => {
                self.pool.schedule_dial(Enode {
                    node_id,
                    ip: addr.ip(),
                    tcp_port,
                    udp_port: addr.port(),
                });
            }
            AddOutcome::Updated => {}
            AddOutcome::Full { .. } => {
                debug!(%node_id, "bucket full, candidate queued as replacement");
            }
        }
    }

    async fn reply_neighbours(&self, socket: &UdpSocket, to: SocketAddr, target: H512) {
        let closest = {
            let table = self.table.lock().expect("routing table mutex poisoned");
            table.closest(target, REVALIDATE_PER_BUCKET * 4)
        };
        for chunk in closest.chunks(MAX_NODES_PER_NEIGHBOURS) {
            let nodes = chunk
                .iter()
                .map(|peer| NeighbourNode {
                    endpoint: Endpoint {
                        ip: peer.ip,
                        udp_port: peer.udp_port,
                        tcp_port: peer.tcp_port,
                    },
                    node_id: peer.id,
                })
                .collect();
            let message = Message::Neighbours(NeighboursMessage {
                nodes,
                expiration: expiration_from_now(PROOF_VALID_SECS),
            });
            self.send(socket, &message, to).await;
        }
    }

    async fn send_ping(&self, socket: &UdpSocket, to: SocketAddr) {
        let local_port = self.config.listen_port;
        let message = Message::Ping(PingMessage {
            version: 4,
            from: Endpoint {
                ip: socket.local_addr().map(|addr| addr.ip()).unwrap_or([0, 0, 0, 0].into()),
                udp_port: local_port,
                tcp_port: local_port,
            },
            to: Endpoint {
                ip: to.ip(),
                udp_port: to.port(),
                tcp_port: to.port(),
            },
            expiration: expiration_from_now(PROOF_VALID_SECS),
        });
        self.send(socket, &message, to).await;
    }

    async fn send_pong(&self, socket: &UdpSocket, to: SocketAddr, ping_hash: ethereum_types::H256) {
        let message = Message::Pong(PongMessage {
            to: Endpoint {
                ip: to.ip(),
                udp_port: to.port(),
                tcp_port: to.port(),
            },
            ping_hash,
            expiration: expiration_from_now(PROOF_VALID_SECS),
        });
        self.send(socket, &message, to).await;
    }

    async fn send_find_node(&self, socket: &UdpSocket, to: SocketAddr, target: H512) {
        let message = Message::FindNode(FindNodeMessage {
            target,
            expiration: expiration_from_now(PROOF_VALID_SECS),
        });
        self.send(socket, &message, to).await;
    }

    async fn send(&self, socket: &UdpSocket, message: &Message, to: SocketAddr) {
        let encoded = Packet::encode(message, &self.signer);
        if let Err(err) = socket.send_to(&encoded, to).await {
            warn!(%to, %err, "failed to send discv4 packet");
        }
    }
}
