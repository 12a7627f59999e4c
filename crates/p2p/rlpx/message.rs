use bytes::BufMut;
use ferrum_rlp::error::{RLPDecodeError, RLPEncodeError};
use std::fmt::Display;

use super::eth::status::StatusMessage;
use super::p2p_messages::{DisconnectMessage, HelloMessage, PingMessage, PongMessage};
use ferrum_rlp::encode::RLPEncode;

/// Every RLPx Wire and sub-protocol message implements this; `encode`/`decode`
/// work on the already-decrypted frame body (code byte stripped), so they
/// only ever need to worry about snappy framing and RLP fields.
pub trait RLPxMessage: Sized {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError>;

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError>;
}

/// Lowest relative code of the negotiated `eth` capability's message-code block,
/// per the offsetting rule of the session multiplexer (reserved 0x00..0x10 belongs
/// to the Wire Protocol above).
pub(crate) const ETH_CAP_OFFSET: u8 = 0x10;

#[derive(Debug)]
pub(crate) enum Message {
    Hello(HelloMessage),
    Disconnect(DisconnectMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    Status(StatusMessage),
    /// Any other negotiated `eth/68` message. Block/transaction encodings are out
    /// of scope for this crate (see the opaque `serialize()/deserialize()` boundary),
    /// so everything past Status is carried as already-RLP-encoded, already
    /// snappy-decompressed bytes and handed to the caller unparsed.
    Eth { relative_code: u8, payload: Vec<u8> },
}

impl Message {
    pub fn decode(msg_id: u8, msg_data: &[u8]) -> Result<Message, RLPDecodeError> {
        match msg_id {
            0x00 => Ok(Message::Hello(HelloMessage::decode(msg_data)?)),
            0x01 => Ok(Message::Disconnect(DisconnectMessage::decode(msg_data)?)),
            0x02 => Ok(Message::Ping(PingMessage::decode(msg_data)?)),
            0x03 => Ok(Message::Pong(PongMessage::decode(msg_data)?)),
            ETH_CAP_OFFSET => Ok(Message::Status(StatusMessage::decode(msg_data)?)),
            code if code > ETH_CAP_OFFSET => {
                let decompressed = super::utils::snappy_decompress(msg_data)?;
                Ok(Message::Eth {
                    relative_code: code - ETH_CAP_OFFSET,
                    payload: decompressed,
                })
            }
            _ => Err(RLPDecodeError::MalformedData),
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        match self {
            Message::Hello(msg) => {
                0x00_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Disconnect(msg) => {
                0x01_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Ping(msg) => {
                0x02_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Pong(msg) => {
                0x03_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Status(msg) => {
                ETH_CAP_OFFSET.encode(buf);
                msg.encode(buf)
            }
            Message::Eth {
                relative_code,
                payload,
            } => {
                (ETH_CAP_OFFSET + relative_code).encode(buf);
                let compressed = super::utils::snappy_compress(payload.clone())?;
                buf.put_slice(&compressed);
                Ok(())
            }
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Hello(_) => "p2p:Hello".fmt(f),
            Message::Disconnect(_) => "p2p:Disconnect".fmt(f),
            Message::Ping(_) => "p2p:Ping".fmt(f),
            Message::Pong(_) => "p2p:Pong".fmt(f),
            Message::Status(_) => "eth:Status".fmt(f),
            Message::Eth { relative_code, .. } => write!(f, "eth:0x{relative_code:02x}"),
        }
    }
}
