//! Wire framing for discv4 UDP packets: `hash(32) ∥ sig(65) ∥ type(1) ∥ rlp-payload`.
//! `hash` binds the whole packet (`keccak256(sig ∥ type ∥ payload)`) so a bit flip
//! anywhere is detectable without first verifying the signature; the signature
//! itself recovers the sender's `NodeId`.

use ethereum_types::{H256, H512};
use ferrum_core::keccak256;
use k256::ecdsa::{
    signature::hazmat::PrehashSigner, RecoveryId, Signature, SigningKey, VerifyingKey,
};

use super::error::DiscoveryError;
use super::message::Message;

pub(crate) struct Packet {
    pub(crate) hash: H256,
    pub(crate) node_id: H512,
    pub(crate) message: Message,
}

impl Packet {
    pub(crate) fn encode(message: &Message, signer: &SigningKey) -> Vec<u8> {
        let mut type_and_payload = vec![message.packet_type()];
        message.encode_payload(&mut type_and_payload);

        let digest = keccak256(&type_and_payload);
        let (signature, recovery_id): (Signature, RecoveryId) = signer
            .sign_prehash_recoverable(digest.as_bytes())
            .expect("signing a 32-byte prehash cannot fail");

        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&signature.to_bytes());
        sig_bytes[64] = recovery_id.to_byte();

        let hash = keccak256(&[sig_bytes.as_slice(), &type_and_payload].concat());

        let mut out = Vec::with_capacity(32 + 65 + type_and_payload.len());
        out.extend_from_slice(hash.as_bytes());
        out.extend_from_slice(&sig_bytes);
        out.extend_from_slice(&type_and_payload);
        out
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        if data.len() < 32 + 65 + 1 {
            return Err(DiscoveryError::MalformedPacket);
        }
        let (hash_bytes, rest) = data.split_at(32);
        let (sig_bytes, type_and_payload) = rest.split_at(65);

        let expected_hash = keccak256(&[sig_bytes, type_and_payload].concat());
        if expected_hash.as_bytes() != hash_bytes {
            return Err(DiscoveryError::BadHash);
        }

        let recovery_id = RecoveryId::from_byte(sig_bytes[64])
            .ok_or(DiscoveryError::BadSignature)?;
        let signature = Signature::from_slice(&sig_bytes[..64])
            .map_err(|_| DiscoveryError::BadSignature)?;
        let digest = keccak256(type_and_payload);
        let verifying_key =
            VerifyingKey::recover_from_prehash(digest.as_bytes(), &signature, recovery_id)
                .map_err(|_| DiscoveryError::BadSignature)?;
        let node_id = crate::rlpx::utils::pubkey2id(&verifying_key.into());

        let packet_type = type_and_payload[0];
        let payload = &type_and_payload[1..];
        let message = Message::decode(packet_type, payload)?;

        Ok(Packet {
            hash: H256::from_slice(hash_bytes),
            node_id,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn packet_round_trips_and_recovers_sender() {
        let signer = SigningKey::random(&mut OsRng);
        let expiration = super::super::message::expiration_from_now(20);
        let message = Message::FindNode(super::super::message::FindNodeMessage {
            target: H512::random(),
            expiration,
        });

        let encoded = Packet::encode(&message, &signer);
        let decoded = Packet::decode(&encoded).unwrap();

        let expected_node_id = crate::rlpx::utils::node_id_from_signing_key(&signer);
        assert_eq!(decoded.node_id, expected_node_id);
    }

    #[test]
    fn decode_rejects_tampered_hash() {
        let signer = SigningKey::random(&mut OsRng);
        let endpoint = super::super::message::Endpoint {
            ip: "127.0.0.1".parse().unwrap(),
            udp_port: 30301,
            tcp_port: 30303,
        };
        let message = Message::Ping(super::super::message::PingMessage {
            version: 4,
            from: endpoint,
            to: endpoint,
            expiration: super::super::message::expiration_from_now(20),
        });
        let mut encoded = Packet::encode(&message, &signer);
        encoded[0] ^= 0xff;
        assert!(matches!(
            Packet::decode(&encoded),
            Err(DiscoveryError::BadHash)
        ));
    }
}
