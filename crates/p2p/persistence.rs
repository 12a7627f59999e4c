//! `peerstore.json`: a flat-file snapshot of known peers. No database engine
//! is in scope, so this plays the role the teacher gives its `Store`
//! abstraction, just backed by `serde_json` and a rename instead of a KV
//! engine.

use std::io;
use std::net::IpAddr;
use std::path::Path;

use ethereum_types::H512;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discv4::kademlia::PeerRecord;

/// Up to this many peers are kept in the store; older entries by `last_seen`
/// are dropped first when a snapshot would exceed it.
pub const MAX_PERSISTED_PEERS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStoreRecord {
    pub node_id: String,
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub last_seen: u64,
    pub vector_clock: u32,
}

impl PeerStoreRecord {
    pub fn from_peer(peer: &PeerRecord, last_seen: u64) -> Self {
        Self {
            node_id: hex::encode(peer.id.as_bytes()),
            ip: peer.ip,
            tcp_port: peer.tcp_port,
            udp_port: peer.udp_port,
            last_seen,
            vector_clock: peer.vector_clock,
        }
    }

    pub fn to_peer(&self) -> Option<PeerRecord> {
        let bytes = hex::decode(&self.node_id).ok()?;
        if bytes.len() != 64 {
            return None;
        }
        Some(PeerRecord {
            id: H512::from_slice(&bytes),
            ip: self.ip,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            vector_clock: self.vector_clock,
        })
    }
}

/// Reads the store at `path`. A missing or corrupt file is a warning, not a
/// fatal error; the caller just starts from an empty set of known peers.
pub fn load(path: &Path) -> Vec<PeerStoreRecord> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(?path, %err, "peerstore.json is corrupt, starting empty");
            Vec::new()
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            warn!(?path, %err, "failed to read peerstore.json, starting empty");
            Vec::new()
        }
    }
}

/// Writes `records` atomically: serialize to a sibling temp file, then
/// rename over the destination, so a crash mid-write never corrupts the
/// previous snapshot.
pub fn save(path: &Path, mut records: Vec<PeerStoreRecord>) -> io::Result<()> {
    records.sort_by_key(|record| std::cmp::Reverse(record.last_seen));
    records.truncate(MAX_PERSISTED_PEERS);

    let tmp_path = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(&records)?;
    std::fs::write(&tmp_path, payload)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ferrum-peerstore-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("peerstore.json");

        let record = PeerStoreRecord {
            node_id: hex::encode([7u8; 64]),
            ip: "10.0.0.1".parse().unwrap(),
            tcp_port: 30303,
            udp_port: 30303,
            last_seen: 100,
            vector_clock: 1,
        };
        save(&path, vec![record.clone()]).unwrap();

        let loaded = load(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].node_id, record.node_id);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_loads_empty_without_error() {
        let path = std::env::temp_dir().join("ferrum-peerstore-does-not-exist.json");
        std::fs::remove_file(&path).ok();
        assert!(load(&path).is_empty());
    }
}
