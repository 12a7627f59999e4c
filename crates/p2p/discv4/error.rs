use ferrum_rlp::error::{RLPDecodeError, RLPEncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("packet too short to contain hash/sig/type")]
    MalformedPacket,
    #[error("packet hash does not match its contents")]
    BadHash,
    #[error("packet signature did not recover a valid public key")]
    BadSignature,
    #[error("unknown discv4 packet type: {0:#04x}")]
    UnknownPacketType(u8),
    #[error("decode error: {0}")]
    DecodeError(#[from] RLPDecodeError),
    #[error("encode error: {0}")]
    EncodeError(#[from] RLPEncodeError),
    #[error("socket error: {0}")]
    Transport(String),
}
