use bytes::{Bytes, BytesMut};
use ethereum_types::{Address, Bloom, H128, H256, H264, H32, H512, H64, U256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::RLPDecodeError;

fn checked_split_at(data: &[u8], mid: usize) -> Option<(&[u8], &[u8])> {
    if mid > data.len() {
        None
    } else {
        Some(data.split_at(mid))
    }
}

pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (value, rest) = Self::decode_unfinished(rlp)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(value)
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        match first {
            0x80 => Ok((false, &rlp[1..])),
            0x01 => Ok((true, &rlp[1..])),
            _ => Err(RLPDecodeError::MalformedBoolean),
        }
    }
}

pub(crate) fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut out = [0u8; N];
    if !data.is_empty() {
        if data[0] == 0 {
            // non-canonical integer: a leading zero byte on a non-empty value.
            return Err(RLPDecodeError::MalformedData);
        }
        out[N - data.len()..].copy_from_slice(data);
    }
    Ok(out)
}

macro_rules! decode_unsigned {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (data, rest) = decode_bytes(rlp)?;
                let padded = static_left_pad::<{ core::mem::size_of::<$t>() }>(data)?;
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        }
    };
}

decode_unsigned!(u8);
decode_unsigned!(u16);
decode_unsigned!(u32);
decode_unsigned!(u64);
decode_unsigned!(usize);
decode_unsigned!(u128);

fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0..=0x7f => Ok((&data[..1], &data[1..])),
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            let (value, rest) =
                checked_split_at(&data[1..], len).ok_or(RLPDecodeError::InvalidLength)?;
            if len == 1 && value[0] < 0x80 {
                return Err(RLPDecodeError::MalformedData);
            }
            Ok((value, rest))
        }
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let (len_bytes, rest) =
                checked_split_at(&data[1..], len_of_len).ok_or(RLPDecodeError::InvalidLength)?;
            if len_bytes[0] == 0 {
                return Err(RLPDecodeError::MalformedData);
            }
            let len = bytes_to_usize(len_bytes)?;
            if len < 56 {
                return Err(RLPDecodeError::MalformedData);
            }
            let (value, rest) = checked_split_at(rest, len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((value, rest))
        }
        0xc0..=0xff => Err(RLPDecodeError::UnexpectedList),
    }
}

fn bytes_to_usize(bytes: &[u8]) -> Result<usize, RLPDecodeError> {
    if bytes.len() > core::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut padded = [0u8; core::mem::size_of::<usize>()];
    padded[core::mem::size_of::<usize>() - bytes.len()..].copy_from_slice(bytes);
    Ok(usize::from_be_bytes(padded))
}

/// Parses one RLP item and returns `(is_list, payload, rest)`, mirroring the five
/// canonical prefix ranges.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0x00..=0x7f => Ok((false, &data[..1], &data[1..])),
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            let (payload, rest) =
                checked_split_at(&data[1..], len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((false, payload, rest))
        }
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let (len_bytes, rest) =
                checked_split_at(&data[1..], len_of_len).ok_or(RLPDecodeError::InvalidLength)?;
            let len = bytes_to_usize(len_bytes)?;
            let (payload, rest) = checked_split_at(rest, len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((false, payload, rest))
        }
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            let (payload, rest) =
                checked_split_at(&data[1..], len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((true, payload, rest))
        }
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            let (len_bytes, rest) =
                checked_split_at(&data[1..], len_of_len).ok_or(RLPDecodeError::InvalidLength)?;
            let len = bytes_to_usize(len_bytes)?;
            let (payload, rest) = checked_split_at(rest, len).ok_or(RLPDecodeError::InvalidLength)?;
            Ok((true, payload, rest))
        }
    }
}

/// Like [`decode_rlp_item`] but returns the item together with its prefix, for
/// passing an already-encoded sub-item through untouched.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    let total_len = match first {
        0x00..=0x7f => 1,
        0x80..=0xb7 => 1 + (first - 0x80) as usize,
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let len_bytes = data
                .get(1..1 + len_of_len)
                .ok_or(RLPDecodeError::InvalidLength)?;
            1 + len_of_len + bytes_to_usize(len_bytes)?
        }
        0xc0..=0xf7 => 1 + (first - 0xc0) as usize,
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            let len_bytes = data
                .get(1..1 + len_of_len)
                .ok_or(RLPDecodeError::InvalidLength)?;
            1 + len_of_len + bytes_to_usize(len_bytes)?
        }
    };
    checked_split_at(data, total_len)
        .ok_or(RLPDecodeError::InvalidLength)
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = decode_bytes(rlp)?;
        if data.len() != N {
            return Err(RLPDecodeError::InvalidLength);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(data);
        Ok((out, rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(data), rest))
    }
}

impl RLPDecode for BytesMut {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = decode_bytes(rlp)?;
        Ok((BytesMut::from(data), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = decode_bytes(rlp)?;
        let value = String::from_utf8(data.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = decode_bytes(rlp)?;
        let padded = static_left_pad::<32>(data)?;
        Ok((U256::from_big_endian(&padded), rest))
    }
}

macro_rules! decode_hash_newtype {
    ($t:ty, $n:expr) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (data, rest) = <[u8; $n]>::decode_unfinished(rlp)?;
                Ok((<$t>::from(data), rest))
            }
        }
    };
}

decode_hash_newtype!(H32, 4);
decode_hash_newtype!(H64, 8);
decode_hash_newtype!(H128, 16);
decode_hash_newtype!(Address, 20);
decode_hash_newtype!(H256, 32);
decode_hash_newtype!(H264, 33);
decode_hash_newtype!(H512, 64);
decode_hash_newtype!(Bloom, 256);

impl RLPDecode for Ipv4Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = <[u8; 4]>::decode_unfinished(rlp)?;
        Ok((Ipv4Addr::from(data), rest))
    }
}

impl RLPDecode for Ipv6Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, rest) = <[u8; 16]>::decode_unfinished(rlp)?;
        Ok((Ipv6Addr::from(data), rest))
    }
}

impl RLPDecode for IpAddr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (data, _) = decode_bytes(rlp)?;
        match data.len() {
            4 => {
                let (v, rest) = Ipv4Addr::decode_unfinished(rlp)?;
                Ok((IpAddr::V4(v), rest))
            }
            16 => {
                let (v, rest) = Ipv6Addr::decode_unfinished(rlp)?;
                Ok((IpAddr::V6(v), rest))
            }
            _ => Err(RLPDecodeError::MalformedData),
        }
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&crate::RLP_EMPTY_LIST) {
            return Ok((Vec::new(), &rlp[1..]));
        }
        let (is_list, payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let mut result = Vec::new();
        let mut current = payload;
        while !current.is_empty() {
            let (item, remaining) = T::decode_unfinished(current)?;
            result.push(item);
            current = remaining;
        }
        Ok((result, rest))
    }
}

impl<T: RLPDecode> RLPDecode for Option<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&crate::RLP_EMPTY_LIST) {
            return Ok((None, &rlp[1..]));
        }
        let (value, rest) = T::decode_unfinished(rlp)?;
        Ok((Some(value), rest))
    }
}

macro_rules! decode_tuple {
    ($($t:ident),+) => {
        impl<$($t: RLPDecode),+> RLPDecode for ($($t,)+) {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (is_list, payload, rest) = decode_rlp_item(rlp)?;
                if !is_list {
                    return Err(RLPDecodeError::UnexpectedString);
                }
                let mut current = payload;
                $(
                    #[allow(non_snake_case)]
                    let ($t, remaining) = $t::decode_unfinished(current)?;
                    current = remaining;
                )+
                if !current.is_empty() {
                    return Err(RLPDecodeError::MalformedData);
                }
                Ok((($($t,)+), rest))
            }
        }
    };
}

decode_tuple!(A, B);
decode_tuple!(A, B, C);
decode_tuple!(A, B, C, D);
decode_tuple!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_zero_byte_string() {
        assert_eq!(u8::decode(&[0x80]).unwrap(), 0u8);
    }

    #[test]
    fn decode_single_byte() {
        assert_eq!(u8::decode(&[0x0f]).unwrap(), 15u8);
    }

    #[test]
    fn decode_short_string() {
        assert_eq!(
            String::decode(&[0x83, b'd', b'o', b'g']).unwrap(),
            "dog".to_string()
        );
    }

    #[test]
    fn decode_empty_list() {
        let items: Vec<u8> = Vec::decode(&[0xc0]).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn decode_rejects_truncated_string() {
        assert_eq!(
            String::decode(&[0x83, b'd', b'o']),
            Err(RLPDecodeError::InvalidLength)
        );
    }

    #[test]
    fn decode_rejects_noncanonical_leading_zero() {
        assert_eq!(u32::decode(&[0x82, 0x00, 0x01]), Err(RLPDecodeError::MalformedData));
    }

    #[test]
    fn roundtrip_u256() {
        let value = U256::from(123456789u64);
        let encoded = crate::encode::encode(value);
        assert_eq!(U256::decode(&encoded).unwrap(), value);
    }
}
