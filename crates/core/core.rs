pub mod fork_id;

use ethereum_types::H512;
use sha3::{Digest, Keccak256};

/// The 64-byte uncompressed secp256k1 public key identifying a node, without
/// the leading `0x04` SEC1 tag.
pub type NodeId = H512;

/// Opaque 32-byte chain hash. Block/transaction bodies are out of scope for this
/// crate; every place that would otherwise need a `BlockHeader`/`Block` type only
/// ever needs its hash, so this is the single concrete type shared with the ETH
/// sub-protocol Status exchange.
pub type BlockHash = ethereum_types::H256;

pub fn keccak256(data: &[u8]) -> ethereum_types::H256 {
    ethereum_types::H256::from_slice(&Keccak256::digest(data))
}

pub use fork_id::ForkId;

/// Narrow interface the ETH sub-protocol status handshake needs from the chain
/// subsystem. Block import, execution and storage are out of scope; a real node
/// wires this to its `Store`, tests wire it to a fixed fixture.
pub trait ChainDataSource: Send + Sync {
    fn network_id(&self) -> u64;
    fn genesis_hash(&self) -> BlockHash;
    fn best_hash(&self) -> BlockHash;
    fn total_difficulty(&self) -> ethereum_types::U256;
    fn fork_id(&self) -> ForkId;
}

/// Fixed chain info for tests and for standalone runs with no real chain backing
/// this node yet.
#[derive(Debug, Clone)]
pub struct StaticChainData {
    pub network_id: u64,
    pub genesis_hash: BlockHash,
    pub best_hash: BlockHash,
    pub total_difficulty: ethereum_types::U256,
    pub fork_id: ForkId,
}

impl ChainDataSource for StaticChainData {
    fn network_id(&self) -> u64 {
        self.network_id
    }

    fn genesis_hash(&self) -> BlockHash {
        self.genesis_hash
    }

    fn best_hash(&self) -> BlockHash {
        self.best_hash
    }

    fn total_difficulty(&self) -> ethereum_types::U256 {
        self.total_difficulty
    }

    fn fork_id(&self) -> ForkId {
        self.fork_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak256_of_empty_matches_known_vector() {
        let hash = keccak256(b"");
        assert_eq!(
            hex::encode(hash.as_bytes()),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a47"
        );
    }
}
