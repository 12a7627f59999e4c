//! ECIES authenticated key agreement (EIP-8, with legacy receive-only support).

use bytes::BufMut;
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ethereum_types::{H256, H512};
use ferrum_rlp::structs::{Decoder, Encoder};
use ferrum_rlp::{RLPDecode, RLPEncode};
use k256::{
    ecdsa::{signature::hazmat::PrehashSigner, RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use rand::Rng;

use super::error::RLPxError;
use super::utils::{ecdh_xchng, id2pubkey, kdf, pubkey2id, sha256, sha256_hmac};

/// Minimum size of the random padding appended to auth/ack payloads (EIP-8, §4.2).
const MIN_PADDING: usize = 100;
const MAX_PADDING: usize = 250;

#[derive(Debug, Clone)]
pub struct AuthMessage {
    pub signature: Signature,
    pub recovery_id: RecoveryId,
    pub node_id: H512,
    pub nonce: H256,
    pub version: u8,
}

impl RLPEncode for AuthMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&self.signature.to_bytes());
        sig_bytes[64] = self.recovery_id.to_byte();
        Encoder::new(buf)
            .encode_field(&sig_bytes)
            .encode_field(&self.node_id)
            .encode_field(&self.nonce)
            .encode_field(&self.version)
            .finish()
    }
}

impl RLPDecode for AuthMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), ferrum_rlp::error::RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (sig_bytes, decoder): ([u8; 65], _) = decoder.decode_field("signature")?;
        let (node_id, decoder) = decoder.decode_field("node_id")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (version, decoder) = decoder.decode_field("version")?;
        let rest = decoder.finish_unchecked();

        let recovery_id = RecoveryId::from_byte(sig_bytes[64])
            .ok_or(ferrum_rlp::error::RLPDecodeError::MalformedData)?;
        let signature = Signature::from_slice(&sig_bytes[..64])
            .map_err(|_| ferrum_rlp::error::RLPDecodeError::MalformedData)?;

        Ok((
            AuthMessage {
                signature,
                recovery_id,
                node_id,
                nonce,
                version,
            },
            rest,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct AckMessage {
    pub ephemeral_pubkey: H512,
    pub nonce: H256,
    pub version: u8,
}

impl AckMessage {
    pub fn get_ephemeral_pubkey(&self) -> Option<PublicKey> {
        id2pubkey(self.ephemeral_pubkey)
    }
}

impl RLPEncode for AckMessage {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ephemeral_pubkey)
            .encode_field(&self.nonce)
            .encode_field(&self.version)
            .finish()
    }
}

impl RLPDecode for AckMessage {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), ferrum_rlp::error::RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ephemeral_pubkey, decoder) = decoder.decode_field("ephemeral_pubkey")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (version, decoder) = decoder.decode_field("version")?;
        let rest = decoder.finish_unchecked();
        Ok((
            AckMessage {
                ephemeral_pubkey,
                nonce,
                version,
            },
            rest,
        ))
    }
}

fn sign_shared_secret(
    shared_secret: H256,
    local_nonce: H256,
    local_ephemeral_key: &SecretKey,
) -> Result<(Signature, RecoveryId), RLPxError> {
    let signing_key = SigningKey::from(local_ephemeral_key.clone());
    let digest = shared_secret ^ local_nonce;
    signing_key
        .sign_prehash_recoverable(digest.as_bytes())
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))
}

pub(crate) fn encode_auth_message(
    static_key: &SecretKey,
    local_nonce: H256,
    remote_static_pubkey: &PublicKey,
    local_ephemeral_key: &SecretKey,
) -> Result<Vec<u8>, RLPxError> {
    let static_shared_secret = H256::from(ecdh_xchng(static_key, remote_static_pubkey));
    let (signature, recovery_id) =
        sign_shared_secret(static_shared_secret, local_nonce, local_ephemeral_key)?;

    let node_id = pubkey2id(&static_key.public_key());
    let auth = AuthMessage {
        signature,
        recovery_id,
        node_id,
        nonce: local_nonce,
        version: 4,
    };

    encrypt_message(remote_static_pubkey, auth.encode_to_vec())
}

pub(crate) fn decode_auth_message(
    static_key: &SecretKey,
    msg: &[u8],
    auth_data: &[u8],
) -> Result<(AuthMessage, PublicKey), RLPxError> {
    let decrypted = decrypt_message(static_key, msg, auth_data)?;
    let auth = AuthMessage::decode(&decrypted)?;

    let remote_pubkey = id2pubkey(auth.node_id).ok_or(RLPxError::InvalidPeerId)?;
    Ok((auth, remote_pubkey))
}

pub(crate) fn retrieve_remote_ephemeral_key(
    static_key: &SecretKey,
    remote_pubkey: &PublicKey,
    remote_nonce: H256,
    auth: &AuthMessage,
) -> Result<PublicKey, RLPxError> {
    let static_shared_secret = H256::from(ecdh_xchng(static_key, remote_pubkey));
    let digest = (static_shared_secret ^ remote_nonce).to_fixed_bytes();

    let verifying_key = VerifyingKey::recover_from_prehash(
        &digest,
        &auth.signature,
        auth.recovery_id,
    )
    .map_err(|_| RLPxError::InvalidRecoveryId)?;

    Ok(PublicKey::from(verifying_key))
}

pub(crate) fn encode_ack_message(
    local_ephemeral_key: &SecretKey,
    local_nonce: H256,
    remote_static_pubkey: &PublicKey,
) -> Result<Vec<u8>, RLPxError> {
    let ack = AckMessage {
        ephemeral_pubkey: pubkey2id(&local_ephemeral_key.public_key()),
        nonce: local_nonce,
        version: 4,
    };
    encrypt_message(remote_static_pubkey, ack.encode_to_vec())
}

pub(crate) fn decode_ack_message(
    static_key: &SecretKey,
    msg: &[u8],
    auth_data: &[u8],
) -> Result<AckMessage, RLPxError> {
    let decrypted = decrypt_message(static_key, msg, auth_data)?;
    Ok(AckMessage::decode(&decrypted)?)
}

/// Encrypts `encoded_msg` under a fresh message-level ephemeral key, EIP-8 style:
/// `size(2B) || ephemeral_pubkey(65B) || iv(16B) || aes_ctr(encoded_msg) || hmac(32B)`.
fn encrypt_message(remote_static_pubkey: &PublicKey, mut encoded_msg: Vec<u8>) -> Result<Vec<u8>, RLPxError> {
    let padding_len = rand::thread_rng().gen_range(MIN_PADDING..=MAX_PADDING);
    encoded_msg.extend(vec![0u8; padding_len]);

    let msg_ephemeral_key = SecretKey::random(&mut rand::rngs::OsRng);
    let msg_secret = ecdh_xchng(&msg_ephemeral_key, remote_static_pubkey);

    let mut derived = [0u8; 32];
    kdf(&msg_secret, &mut derived);
    let aes_key = &derived[..16];
    let mac_key = sha256(&derived[16..32]);

    let total_size = (65 + 16 + encoded_msg.len() + 32) as u16;
    let size_bytes = total_size.to_be_bytes();

    let iv = rand::random::<[u8; 16]>();
    let mut cipher_text = encoded_msg;
    let mut cipher = ctr::Ctr128BE::<aes::Aes128>::new(
        GenericArray::from_slice(aes_key),
        GenericArray::from_slice(&iv),
    );
    cipher.apply_keystream(&mut cipher_text);

    let r_public_key = msg_ephemeral_key.public_key().to_encoded_point(false);
    let mac_footer = sha256_hmac(&mac_key, &[&iv, &cipher_text], &size_bytes)?;

    let mut out = Vec::with_capacity(total_size as usize + 2);
    out.extend_from_slice(&size_bytes);
    out.extend_from_slice(r_public_key.as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&cipher_text);
    out.extend_from_slice(&mac_footer);
    Ok(out)
}

/// `msg` is the ciphertext body (`ephemeral_pubkey || iv || cipher_text || mac`),
/// `auth_data` is the 2-byte big-endian size prefix that was authenticated but not
/// encrypted (fed into the HMAC as associated data).
fn decrypt_message(static_key: &SecretKey, msg: &[u8], auth_data: &[u8]) -> Result<Vec<u8>, RLPxError> {
    if msg.len() < 65 + 16 + 32 {
        return Err(RLPxError::InvalidMessageLength);
    }
    let (pk_bytes, rest) = msg.split_at(65);
    let (iv, rest) = rest.split_at(16);
    let (cipher_text, mac_footer) = rest.split_at(rest.len() - 32);

    let remote_ephemeral_pubkey = PublicKey::from_sec1_bytes(pk_bytes)
        .map_err(|_| RLPxError::InvalidPeerId)?;
    let shared_secret = ecdh_xchng(static_key, &remote_ephemeral_pubkey);

    let mut derived = [0u8; 32];
    kdf(&shared_secret, &mut derived);
    let aes_key = &derived[..16];
    let mac_key = sha256(&derived[16..32]);

    let expected_mac = sha256_hmac(&mac_key, &[iv, cipher_text], auth_data)?;
    if expected_mac != mac_footer {
        return Err(RLPxError::EciesBadTag);
    }

    let mut plain_text = cipher_text.to_vec();
    let mut cipher = ctr::Ctr128BE::<aes::Aes128>::new(
        GenericArray::from_slice(aes_key),
        GenericArray::from_slice(iv),
    );
    cipher.apply_keystream(&mut plain_text);
    Ok(plain_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn auth_ack_round_trip_derives_matching_static_shared_secret() {
        let initiator_static = SecretKey::random(&mut OsRng);
        let receiver_static = SecretKey::random(&mut OsRng);
        let initiator_ephemeral = SecretKey::random(&mut OsRng);
        let initiator_nonce = H256::random();

        let auth_wire = encode_auth_message(
            &initiator_static,
            initiator_nonce,
            &receiver_static.public_key(),
            &initiator_ephemeral,
        )
        .unwrap();

        // size-prefixed EIP-8 framing: 2-byte size, then the ciphertext body.
        let (size_bytes, body) = auth_wire.split_at(2);
        let (auth, remote_pubkey) =
            decode_auth_message(&receiver_static, body, size_bytes).unwrap();

        assert_eq!(remote_pubkey, initiator_static.public_key());

        let recovered_ephemeral = retrieve_remote_ephemeral_key(
            &receiver_static,
            &remote_pubkey,
            initiator_nonce,
            &auth,
        )
        .unwrap();
        assert_eq!(recovered_ephemeral, initiator_ephemeral.public_key());
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let receiver_static = SecretKey::random(&mut OsRng);
        let auth_wire = encode_auth_message(
            &SecretKey::random(&mut OsRng),
            H256::random(),
            &receiver_static.public_key(),
            &SecretKey::random(&mut OsRng),
        )
        .unwrap();
        let (size_bytes, body) = auth_wire.split_at(2);
        let mut tampered = body.to_vec();
        let last = tampered.len() - 40;
        tampered[last] ^= 0xff;

        assert!(matches!(
            decode_auth_message(&receiver_static, &tampered, size_bytes),
            Err(RLPxError::EciesBadTag)
        ));
    }
}
