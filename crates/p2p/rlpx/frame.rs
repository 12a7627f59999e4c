use aes::{
    cipher::{BlockEncrypt as _, KeyInit as _, StreamCipher as _},
    Aes256Enc,
};
use ethereum_types::H128;
use ferrum_rlp::encode::RLPEncode as _;
use sha3::Digest as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::connection::Established;
use super::error::RLPxError;

/// Encrypts and MACs `frame_data` as a single RLPx frame and writes it to `stream`.
///
/// Wire layout: `header-ciphertext(16) || header-mac(16) || frame-ciphertext(padded to 16) || frame-mac(16)`.
pub(crate) async fn write<S: AsyncWrite + Unpin>(
    mut frame_data: Vec<u8>,
    state: &mut Established,
    stream: &mut S,
) -> Result<(), RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(state.mac_key.as_bytes())
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))?;

    // header = frame-size(3) || header-data(capability-id, context-id) || padding
    let mut header = Vec::with_capacity(32);
    let frame_size = frame_data.len().to_be_bytes();
    header.extend_from_slice(&frame_size[5..8]);

    let header_data = (0_u8, 0_u8);
    header_data.encode(&mut header);

    header.resize(16, 0);
    state.egress_aes.apply_keystream(&mut header[..16]);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16]
            .try_into()
            .expect("keccak256 digest is at least 16 bytes");
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        let header_block: [u8; 16] = header[..16]
            .try_into()
            .expect("header is resized to exactly 16 bytes above");
        H128(seed.into()) ^ H128(header_block)
    };
    state.egress_mac.update(header_mac_seed);
    let header_mac = state.egress_mac.clone().finalize();
    header.extend_from_slice(&header_mac[..16]);

    stream
        .write_all(&header)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;

    frame_data.resize(frame_data.len().next_multiple_of(16), 0);
    state.egress_aes.apply_keystream(&mut frame_data);
    let frame_ciphertext = frame_data;

    stream
        .write_all(&frame_ciphertext)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;

    state.egress_mac.update(&frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16]
            .try_into()
            .expect("keccak256 digest is at least 16 bytes");
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.egress_mac.update(frame_mac_seed);
    let frame_mac = state.egress_mac.clone().finalize();

    stream
        .write_all(&frame_mac[..16])
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;

    Ok(())
}

/// Reads, MAC-checks and decrypts a single RLPx frame from `stream`. A mismatched
/// header or frame MAC is always an [`RLPxError::BadFrameMac`], never a panic:
/// the bytes come straight off the wire from a remote peer.
pub(crate) async fn read<S: AsyncRead + Unpin>(
    state: &mut Established,
    stream: &mut S,
) -> Result<Vec<u8>, RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(state.mac_key.as_bytes())
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))?;

    let mut frame_header = [0u8; 32];
    stream
        .read_exact(&mut frame_header)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
    let (header_ciphertext, header_mac) = frame_header.split_at_mut(16);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .expect("keccak256 digest is at least 16 bytes");
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        let ciphertext_block: [u8; 16] = header_ciphertext
            .try_into()
            .expect("frame_header split at 16 yields a 16-byte half");
        (H128(seed.into()) ^ H128(ciphertext_block)).0
    };
    state.ingress_mac.update(header_mac_seed);
    let expected_header_mac: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
        .try_into()
        .expect("keccak256 digest is at least 16 bytes");

    if header_mac != expected_header_mac {
        return Err(RLPxError::BadFrameMac);
    }

    let header_text = header_ciphertext;
    state.ingress_aes.apply_keystream(header_text);

    if header_text[3..6] != (0_u8, 0_u8).encode_to_vec()[..] {
        return Err(RLPxError::HandshakeError(
            "non-zero capability/context id in frame header".to_string(),
        ));
    }

    let frame_size =
        u32::from_be_bytes([0, header_text[0], header_text[1], header_text[2]]) as usize;

    let padded_size = frame_size.next_multiple_of(16);
    let mut frame_data = vec![0u8; padded_size + 16];
    stream
        .read_exact(&mut frame_data)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
    let (frame_ciphertext, frame_mac) = frame_data.split_at_mut(padded_size);

    state.ingress_mac.update(&frame_ciphertext[..]);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .expect("keccak256 digest is at least 16 bytes");
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.ingress_mac.update(frame_mac_seed);
    let expected_frame_mac: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
        .try_into()
        .expect("keccak256 digest is at least 16 bytes");

    if frame_mac != expected_frame_mac {
        return Err(RLPxError::BadFrameMac);
    }

    state.ingress_aes.apply_keystream(frame_ciphertext);

    let (frame_data, _padding) = frame_ciphertext.split_at(frame_size);

    Ok(frame_data.to_vec())
}
