use bytes::BufMut;
use ferrum_rlp::{
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
    RLPDecode, RLPEncode,
};

/// EIP-2124 fork identifier: a CRC32 digest of the genesis hash and past fork
/// block numbers/timestamps, plus the next scheduled fork (0 if none known).
/// Computing the digest from an actual hardfork schedule is chain-subsystem
/// work and out of scope here; this type only carries the already-computed
/// value through the Status handshake and compares it for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkId {
    pub hash: [u8; 4],
    pub next: u64,
}

impl ForkId {
    pub fn new(hash: [u8; 4], next: u64) -> Self {
        Self { hash, next }
    }
}

impl RLPEncode for ForkId {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.hash)
            .encode_field(&self.next)
            .finish()
    }
}

impl RLPDecode for ForkId {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (hash, decoder) = decoder.decode_field("hash")?;
        let (next, decoder) = decoder.decode_field("next")?;
        let rest = decoder.finish()?;
        Ok((ForkId { hash, next }, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_id_roundtrips_through_rlp() {
        let fork_id = ForkId::new([0xde, 0xad, 0xbe, 0xef], 1_150_000);
        let encoded = fork_id.encode_to_vec();
        let decoded = ForkId::decode(&encoded).unwrap();
        assert_eq!(decoded, fork_id);
    }
}
