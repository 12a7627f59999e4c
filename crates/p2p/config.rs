use std::path::PathBuf;
use std::time::Duration;

use crate::enode::Enode;

/// Typed configuration assembled from CLI flags, one field per flag in `cmd/ferrumd`.
/// Defaults match the devp2p reference values so a node started with no flags at
/// all behaves like a mainnet client.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub max_peers: u32,
    pub bootnodes: Vec<Enode>,
    pub private_key_path: PathBuf,
    pub network_id: u64,
    pub dial_timeout: Duration,
    pub ping_interval: Duration,
    pub inactivity_timeout: Duration,
    pub require_eip8: bool,
    pub log_level: String,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 30303,
            max_peers: 25,
            bootnodes: Vec::new(),
            private_key_path: PathBuf::from("node.key"),
            network_id: 1,
            dial_timeout: Duration::from_millis(10_000),
            ping_interval: Duration::from_millis(15_000),
            inactivity_timeout: Duration::from_millis(20_000),
            require_eip8: true,
            log_level: "info".to_string(),
            data_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn max_inbound(&self) -> u32 {
        self.max_peers / 2
    }

    pub fn peerstore_path(&self) -> PathBuf {
        self.data_dir.join("peerstore.json")
    }
}
