//! The RLPx Wire Protocol messages: `Hello`, `Disconnect`, `Ping`, `Pong`.
//! These occupy the reserved code range `0x00..0x10` of every RLPx session,
//! regardless of which sub-protocols get negotiated on top.

use bytes::BufMut;
use ethereum_types::H512;
use ferrum_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};
use k256::PublicKey;

use super::message::RLPxMessage;
use super::utils::{id2pubkey, pubkey2id, snappy_compress, snappy_decompress};

/// A negotiated sub-protocol, named the way devp2p capability strings are:
/// `(name, version)`. Only `eth/68` is implemented end to end; `snap` sync is
/// out of scope, so it is not offered here even though the wire format has
/// room for arbitrary capability names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    P2p,
    Eth,
}

impl Capability {
    fn name(self) -> &'static str {
        match self {
            Capability::P2p => "p2p",
            Capability::Eth => "eth",
        }
    }
}

impl RLPEncode for Capability {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.name().encode(buf)
    }
}

impl RLPDecode for Capability {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (name, rest) = String::decode_unfinished(rlp)?;
        let cap = match name.as_str() {
            "p2p" => Capability::P2p,
            "eth" => Capability::Eth,
            _ => return Err(RLPDecodeError::MalformedData),
        };
        Ok((cap, rest))
    }
}

pub(crate) const LOCAL_CLIENT_ID: &str = "ferrum/0.1.0";
pub(crate) const P2P_PROTOCOL_VERSION: u8 = 5;

#[derive(Debug)]
pub(crate) struct HelloMessage {
    pub(crate) capabilities: Vec<(Capability, u8)>,
    pub(crate) node_id: PublicKey,
}

impl HelloMessage {
    pub fn new(capabilities: Vec<(Capability, u8)>, node_id: PublicKey) -> Self {
        Self {
            capabilities,
            node_id,
        }
    }
}

impl RLPxMessage for HelloMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        Encoder::new(buf)
            .encode_field(&P2P_PROTOCOL_VERSION)
            .encode_field(&LOCAL_CLIENT_ID)
            .encode_field(&self.capabilities)
            .encode_field(&0u16) // listenPort, unused
            .encode_field(&pubkey2id(&self.node_id))
            .finish();
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decoder = Decoder::new(msg_data)?;
        let (_protocol_version, decoder): (u8, _) = decoder.decode_field("protocolVersion")?;
        let (_client_id, decoder): (String, _) = decoder.decode_field("clientId")?;
        let (capabilities, decoder): (Vec<(Capability, u8)>, _) =
            decoder.decode_field("capabilities")?;
        let (_listen_port, decoder): (u16, _) = decoder.decode_field("listenPort")?;
        let (node_id, decoder): (H512, _) = decoder.decode_field("nodeId")?;
        let _padding = decoder.finish_unchecked();

        Ok(Self::new(
            capabilities,
            id2pubkey(node_id).ok_or(RLPDecodeError::MalformedData)?,
        ))
    }
}

/// Disconnect reason codes, devp2p wire-protocol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    DisconnectRequested = 0x00,
    TcpError = 0x01,
    BadProtocol = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleP2PProtocolVersion = 0x06,
    NullNodeIdentity = 0x07,
    ClientQuitting = 0x08,
    UnexpectedIdentity = 0x09,
    SelfConnection = 0x0a,
    TimeoutReceiving = 0x0b,
    SubprotocolError = 0x10,
}

impl DisconnectReason {
    fn from_byte(byte: u8) -> Option<Self> {
        use DisconnectReason::*;
        Some(match byte {
            0x00 => DisconnectRequested,
            0x01 => TcpError,
            0x02 => BadProtocol,
            0x03 => UselessPeer,
            0x04 => TooManyPeers,
            0x05 => AlreadyConnected,
            0x06 => IncompatibleP2PProtocolVersion,
            0x07 => NullNodeIdentity,
            0x08 => ClientQuitting,
            0x09 => UnexpectedIdentity,
            0x0a => SelfConnection,
            0x0b => TimeoutReceiving,
            0x10 => SubprotocolError,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub(crate) struct DisconnectMessage {
    pub(crate) reason: Option<DisconnectReason>,
}

impl DisconnectMessage {
    pub fn new(reason: Option<DisconnectReason>) -> Self {
        Self { reason }
    }
}

impl RLPxMessage for DisconnectMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        match self.reason {
            Some(reason) => Encoder::new(&mut encoded_data)
                .encode_field(&(reason as u8))
                .finish(),
            None => Vec::<u8>::new().encode(&mut encoded_data),
        }
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let reason = match decompressed_data.len() {
            0 => None,
            1 => DisconnectReason::from_byte(decompressed_data[0]),
            _ => {
                let decoder = Decoder::new(&decompressed_data)?;
                let (reason, _): (Option<u8>, _) = decoder.decode_optional_field();
                reason.and_then(DisconnectReason::from_byte)
            }
        };
        Ok(Self::new(reason))
    }
}

#[derive(Debug, Default)]
pub(crate) struct PingMessage;

impl RLPxMessage for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let _ = decoder.finish_unchecked();
        Ok(Self)
    }
}

#[derive(Debug, Default)]
pub(crate) struct PongMessage;

impl RLPxMessage for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let _ = decoder.finish_unchecked();
        Ok(Self)
    }
}
