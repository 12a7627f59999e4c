//! `enode://<hex-nodeId>@<ip>:<tcpPort>?discport=<udpPort>` URIs: bootnode and
//! dial-target addresses. Unlike the teacher's `BootNode`, `discport` is
//! supported and defaults to `tcpPort` when absent.

use ethereum_types::H512;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnodeParseError {
    #[error("missing 'enode://' scheme")]
    MissingScheme,
    #[error("malformed node id")]
    BadNodeId,
    #[error("missing '@' separator between node id and address")]
    MissingAddress,
    #[error("malformed ip address")]
    BadIp,
    #[error("malformed tcp port")]
    BadTcpPort,
    #[error("malformed discport query parameter")]
    BadDiscPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enode {
    pub node_id: H512,
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl Enode {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

impl FromStr for Enode {
    type Err = EnodeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let rest = input
            .strip_prefix("enode://")
            .ok_or(EnodeParseError::MissingScheme)?;

        let (node_id_hex, rest) = rest
            .split_once('@')
            .ok_or(EnodeParseError::MissingAddress)?;
        let node_id =
            H512::from_str(node_id_hex).map_err(|_| EnodeParseError::BadNodeId)?;

        let (host_port, query) = match rest.split_once('?') {
            Some((host_port, query)) => (host_port, Some(query)),
            None => (rest, None),
        };

        let (ip_str, port_str) = host_port
            .rsplit_once(':')
            .ok_or(EnodeParseError::BadTcpPort)?;
        let ip: IpAddr = ip_str.parse().map_err(|_| EnodeParseError::BadIp)?;
        let tcp_port: u16 = port_str.parse().map_err(|_| EnodeParseError::BadTcpPort)?;

        let udp_port = match query.and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("discport="))
        }) {
            Some(value) => value.parse().map_err(|_| EnodeParseError::BadDiscPort)?,
            None => tcp_port,
        };

        Ok(Enode {
            node_id,
            ip,
            tcp_port,
            udp_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_ID_HEX: &str = "d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666";

    #[test]
    fn parses_enode_without_discport() {
        let input = format!("enode://{NODE_ID_HEX}@18.138.108.67:30303");
        let enode = Enode::from_str(&input).unwrap();
        assert_eq!(enode.tcp_port, 30303);
        assert_eq!(enode.udp_port, 30303);
        assert_eq!(enode.ip.to_string(), "18.138.108.67");
    }

    #[test]
    fn parses_enode_with_discport() {
        let input = format!("enode://{NODE_ID_HEX}@18.138.108.67:30303?discport=30301");
        let enode = Enode::from_str(&input).unwrap();
        assert_eq!(enode.tcp_port, 30303);
        assert_eq!(enode.udp_port, 30301);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(
            Enode::from_str("18.138.108.67:30303"),
            Err(EnodeParseError::MissingScheme)
        );
    }
}
