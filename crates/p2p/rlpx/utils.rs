use ethereum_types::H512;
use hmac::{Hmac, Mac};
use k256::{
    ecdh::diffie_hellman,
    ecdsa::SigningKey,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    sha2::{Digest, Sha256},
    EncodedPoint, PublicKey, SecretKey,
};

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

use super::error::RLPxError;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hmac(key: &[u8], inputs: &[&[u8]], auth_data: &[u8]) -> Result<[u8; 32], RLPxError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))?;
    for input in inputs {
        mac.update(input);
    }
    mac.update(auth_data);
    Ok(mac.finalize().into_bytes().into())
}

pub fn ecdh_xchng(secret_key: &SecretKey, public_key: &PublicKey) -> [u8; 32] {
    let shared = diffie_hellman(secret_key.to_nonzero_scalar(), public_key.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(&shared.raw_secret_bytes()[..32]);
    out
}

pub fn kdf(secret: &[u8], output: &mut [u8]) {
    concat_kdf::derive_key_into::<Sha256>(secret, &[], output)
        .expect("concat-kdf output length is always within the SHA-256 hash function limit");
}

/// Strips the `0x04` uncompressed-point tag, yielding the 64-byte `NodeId` wire form.
pub fn pubkey2id(pk: &PublicKey) -> H512 {
    let encoded = pk.to_encoded_point(false);
    H512::from_slice(&encoded.as_bytes()[1..])
}

pub fn id2pubkey(id: H512) -> Option<PublicKey> {
    let mut encoded = [0u8; 65];
    encoded[0] = UNCOMPRESSED_POINT_TAG;
    encoded[1..].copy_from_slice(id.as_bytes());
    let point = EncodedPoint::from_bytes(encoded).ok()?;
    PublicKey::from_encoded_point(&point).into_option()
}

pub fn node_id_from_signing_key(signer: &SigningKey) -> H512 {
    let public_key: PublicKey = (*signer.verifying_key()).into();
    pubkey2id(&public_key)
}

/// Every RLPx Wire and sub-protocol message payload is snappy-compressed (raw
/// frame, not the streaming format) before being handed to the frame codec.
/// Returns the RLP error types directly so it composes with `RLPxMessage::encode/decode`.
pub fn snappy_compress(uncompressed_data: Vec<u8>) -> Result<Vec<u8>, ferrum_rlp::error::RLPEncodeError> {
    let mut encoder = snap::raw::Encoder::new();
    encoder
        .compress_vec(&uncompressed_data)
        .map_err(|_| ferrum_rlp::error::RLPEncodeError::InvalidCompression)
}

pub fn snappy_decompress(compressed_data: &[u8]) -> Result<Vec<u8>, ferrum_rlp::error::RLPDecodeError> {
    let mut decoder = snap::raw::Decoder::new();
    decoder
        .decompress_vec(compressed_data)
        .map_err(|err| ferrum_rlp::error::RLPDecodeError::Custom(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn ecdh_xchng_is_symmetric() {
        let a = SecretKey::random(&mut OsRng);
        let b = SecretKey::random(&mut OsRng);
        let a_pub = a.public_key();
        let b_pub = b.public_key();

        assert_eq!(ecdh_xchng(&a, &b_pub), ecdh_xchng(&b, &a_pub));
    }

    #[test]
    fn id2pubkey_pubkey2id_roundtrip() {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        let id = pubkey2id(&public);
        let recovered = id2pubkey(id).unwrap();
        assert_eq!(public, recovered);
    }

    #[test]
    fn node_id_matches_pubkey2id() {
        let signer = SigningKey::random(&mut OsRng);
        let public_key: PublicKey = (*signer.verifying_key()).into();
        assert_eq!(node_id_from_signing_key(&signer), pubkey2id(&public_key));
    }
}
