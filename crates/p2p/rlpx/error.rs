use ferrum_rlp::error::{RLPDecodeError, RLPEncodeError};
use thiserror::Error;

use super::message::Message;
use super::p2p_messages::DisconnectReason;

#[derive(Debug, Error)]
pub enum RLPxError {
    #[error("handshake error: {0}")]
    HandshakeError(String),
    /// A protocol-level condition the caller should answer with a specific
    /// `Disconnect` reason, rather than the generic `SubprotocolError`
    /// fallback an unhandled error gets.
    #[error("peer should be disconnected: {0:?}")]
    Disconnect(DisconnectReason),
    #[error("invalid connection state for this operation")]
    InvalidState,
    #[error("decode error: {0}")]
    DecodeError(#[from] RLPDecodeError),
    #[error("encode error: {0}")]
    EncodeError(#[from] RLPEncodeError),
    #[error("invalid peer id")]
    InvalidPeerId,
    #[error("invalid recovery id in signature")]
    InvalidRecoveryId,
    #[error("invalid message length")]
    InvalidMessageLength,
    #[error("cryptography error: {0}")]
    CryptographyError(String),
    #[error("ECIES auth/ack MAC did not verify")]
    EciesBadTag,
    #[error("unsupported ECIES message version")]
    EciesBadVersion,
    #[error("ECIES handshake timed out")]
    EciesTimeout,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(Message),
    #[error("message not handled: {0}")]
    MessageNotHandled(String),
    #[error("peer not found")]
    NotFound,
    #[error("frame MAC did not verify")]
    BadFrameMac,
}
