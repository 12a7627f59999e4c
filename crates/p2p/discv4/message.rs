use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use ethereum_types::H512;
use ferrum_rlp::{
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
    RLPDecode, RLPEncode,
};

use super::error::DiscoveryError;

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs()
}

pub(crate) fn expiration_from_now(valid_for_secs: u64) -> u64 {
    now_unix() + valid_for_secs
}

pub(crate) fn is_expired(expiration: u64) -> bool {
    expiration < now_unix()
}

/// `[ip, udpPort, tcpPort]`, the wire shape of a discv4 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) ip: IpAddr,
    pub(crate) udp_port: u16,
    pub(crate) tcp_port: u16,
}

impl RLPEncode for Endpoint {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ip)
            .encode_field(&self.udp_port)
            .encode_field(&self.tcp_port)
            .finish()
    }
}

impl RLPDecode for Endpoint {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udpPort")?;
        let (tcp_port, decoder) = decoder.decode_field("tcpPort")?;
        let rest = decoder.finish()?;
        Ok((
            Endpoint {
                ip,
                udp_port,
                tcp_port,
            },
            rest,
        ))
    }
}

/// A peer as carried in a `Neighbours` reply: an `Endpoint` plus its `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NeighbourNode {
    pub(crate) endpoint: Endpoint,
    pub(crate) node_id: H512,
}

impl RLPEncode for NeighbourNode {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.endpoint.ip)
            .encode_field(&self.endpoint.udp_port)
            .encode_field(&self.endpoint.tcp_port)
            .encode_field(&self.node_id)
            .finish()
    }
}

impl RLPDecode for NeighbourNode {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ip, decoder) = decoder.decode_field("ip")?;
        let (udp_port, decoder) = decoder.decode_field("udpPort")?;
        let (tcp_port, decoder) = decoder.decode_field("tcpPort")?;
        let (node_id, decoder) = decoder.decode_field("nodeId")?;
        let rest = decoder.finish()?;
        Ok((
            NeighbourNode {
                endpoint: Endpoint {
                    ip,
                    udp_port,
                    tcp_port,
                },
                node_id,
            },
            rest,
        ))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PingMessage {
    pub(crate) version: u8,
    pub(crate) from: Endpoint,
    pub(crate) to: Endpoint,
    pub(crate) expiration: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PongMessage {
    pub(crate) to: Endpoint,
    pub(crate) ping_hash: ethereum_types::H256,
    pub(crate) expiration: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct FindNodeMessage {
    pub(crate) target: H512,
    pub(crate) expiration: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct NeighboursMessage {
    pub(crate) nodes: Vec<NeighbourNode>,
    pub(crate) expiration: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    Neighbours(NeighboursMessage),
}

impl Message {
    pub(crate) fn packet_type(&self) -> u8 {
        match self {
            Message::Ping(_) => 0x01,
            Message::Pong(_) => 0x02,
            Message::FindNode(_) => 0x03,
            Message::Neighbours(_) => 0x04,
        }
    }

    pub(crate) fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Message::Ping(msg) => Encoder::new(buf)
                .encode_field(&msg.version)
                .encode_field(&msg.from)
                .encode_field(&msg.to)
                .encode_field(&msg.expiration)
                .finish(),
            Message::Pong(msg) => Encoder::new(buf)
                .encode_field(&msg.to)
                .encode_field(&msg.ping_hash)
                .encode_field(&msg.expiration)
                .finish(),
            Message::FindNode(msg) => Encoder::new(buf)
                .encode_field(&msg.target)
                .encode_field(&msg.expiration)
                .finish(),
            Message::Neighbours(msg) => Encoder::new(buf)
                .encode_field(&msg.nodes)
                .encode_field(&msg.expiration)
                .finish(),
        }
    }

    pub(crate) fn decode(packet_type: u8, payload: &[u8]) -> Result<Self, DiscoveryError> {
        Ok(match packet_type {
            0x01 => {
                let decoder = Decoder::new(payload)?;
                let (version, decoder): (u8, _) = decoder.decode_field("version")?;
                let (from, decoder) = decoder.decode_field("from")?;
                let (to, decoder) = decoder.decode_field("to")?;
                let (expiration, decoder): (u64, _) = decoder.decode_field("expiration")?;
                let _ = decoder.finish_unchecked();
                Message::Ping(PingMessage {
                    version,
                    from,
                    to,
                    expiration,
                })
            }
            0x02 => {
                let decoder = Decoder::new(payload)?;
                let (to, decoder) = decoder.decode_field("to")?;
                let (ping_hash, decoder) = decoder.decode_field("pingHash")?;
                let (expiration, decoder): (u64, _) = decoder.decode_field("expiration")?;
                let _ = decoder.finish_unchecked();
                Message::Pong(PongMessage {
                    to,
                    ping_hash,
                    expiration,
                })
            }
            0x03 => {
                let decoder = Decoder::new(payload)?;
                let (target, decoder) = decoder.decode_field("target")?;
                let (expiration, decoder): (u64, _) = decoder.decode_field("expiration")?;
                let _ = decoder.finish_unchecked();
                Message::FindNode(FindNodeMessage { target, expiration })
            }
            0x04 => {
                let decoder = Decoder::new(payload)?;
                let (nodes, decoder) = decoder.decode_field("nodes")?;
                let (expiration, decoder): (u64, _) = decoder.decode_field("expiration")?;
                let _ = decoder.finish_unchecked();
                Message::Neighbours(NeighboursMessage { nodes, expiration })
            }
            _ => return Err(DiscoveryError::UnknownPacketType(packet_type)),
        })
    }
}
