//! `eth/68` `Status` (relative code `0x00`, absolute `0x10`): the mandatory
//! first message on a freshly negotiated `eth` stream. Both peers send it
//! before anything else; the fields this crate validates are network id,
//! genesis hash and fork id — block import and the rest of the sub-protocol
//! messages stay on the opaque `Bytes` boundary (see [`super::super::message::Message::Eth`]).

use bytes::BufMut;
use ferrum_core::{BlockHash, ForkId};
use ethereum_types::U256;
use ferrum_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::message::RLPxMessage;
use crate::rlpx::utils::{snappy_compress, snappy_decompress};

pub(crate) const ETH_VERSION: u32 = 68;

#[derive(Debug, Clone)]
pub(crate) struct StatusMessage {
    pub(crate) eth_version: u32,
    pub(crate) network_id: u64,
    pub(crate) total_difficulty: U256,
    pub(crate) block_hash: BlockHash,
    pub(crate) genesis: BlockHash,
    pub(crate) fork_id: ForkId,
}

impl RLPxMessage for StatusMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.eth_version)
            .encode_field(&self.network_id)
            .encode_field(&self.total_difficulty)
            .encode_field(&self.block_hash)
            .encode_field(&self.genesis)
            .encode_field(&self.fork_id)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (eth_version, decoder): (u32, _) = decoder.decode_field("protocolVersion")?;
        let (network_id, decoder): (u64, _) = decoder.decode_field("networkId")?;
        let (total_difficulty, decoder): (U256, _) = decoder.decode_field("totalDifficulty")?;
        let (block_hash, decoder): (BlockHash, _) = decoder.decode_field("blockHash")?;
        let (genesis, decoder): (BlockHash, _) = decoder.decode_field("genesis")?;
        let (fork_id, decoder): (ForkId, _) = decoder.decode_field("forkId")?;
        let _padding = decoder.finish_unchecked();

        Ok(Self {
            eth_version,
            network_id,
            total_difficulty,
            block_hash,
            genesis,
            fork_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_roundtrips_through_rlp_and_snappy() {
        let status = StatusMessage {
            eth_version: ETH_VERSION,
            network_id: 1,
            total_difficulty: U256::from(17_179_869_184u64),
            block_hash: ferrum_core::keccak256(b"block"),
            genesis: ferrum_core::keccak256(b"genesis"),
            fork_id: ForkId::new([0xfc, 0x64, 0xec, 0x04], 0),
        };

        let mut buf = vec![];
        status.encode(&mut buf).unwrap();
        let decoded = StatusMessage::decode(&buf).unwrap();

        assert_eq!(decoded.eth_version, status.eth_version);
        assert_eq!(decoded.network_id, status.network_id);
        assert_eq!(decoded.total_difficulty, status.total_difficulty);
        assert_eq!(decoded.block_hash, status.block_hash);
        assert_eq!(decoded.genesis, status.genesis);
        assert_eq!(decoded.fork_id, status.fork_id);
    }
}
