use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, H128, H256, H264, H32, H512, H64, U256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tinyvec::ArrayVec;

use crate::{RLP_EMPTY_LIST, RLP_NULL};

pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(1);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

macro_rules! encode_unsigned {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                if *self == 0 {
                    buf.put_u8(0x80);
                } else if *self < 0x80 {
                    buf.put_u8(*self as u8);
                } else {
                    let bytes = self.to_be_bytes();
                    let leading_zeros = bytes.iter().take_while(|&&b| b == 0).count();
                    let trimmed: ArrayVec<[u8; core::mem::size_of::<$t>()]> =
                        bytes[leading_zeros..].iter().copied().collect();
                    trimmed.as_slice().encode(buf);
                }
            }
        }
    };
}

encode_unsigned!(u8);
encode_unsigned!(u16);
encode_unsigned!(u32);
encode_unsigned!(u64);
encode_unsigned!(usize);
encode_unsigned!(u128);

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_EMPTY_LIST);
    }
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < 0x80 {
            buf.put_u8(self[0]);
        } else {
            encode_byte_string_prefix(self.len(), buf);
            buf.put_slice(self);
        }
    }
}

fn encode_byte_string_prefix(len: usize, buf: &mut dyn BufMut) {
    if len < 56 {
        buf.put_u8(0x80 + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let leading_zeros = len_bytes.iter().take_while(|&&b| b == 0).count();
        let len_bytes = &len_bytes[leading_zeros..];
        buf.put_u8(0xb7 + len_bytes.len() as u8);
        buf.put_slice(len_bytes);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for &str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        let leading_zeros = bytes.iter().take_while(|&&b| b == 0).count();
        bytes[leading_zeros..].encode(buf)
    }
}

pub(crate) fn encode_length(total_len: usize, buf: &mut dyn BufMut) {
    if total_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + total_len as u8);
    } else {
        let len_bytes = total_len.to_be_bytes();
        let leading_zeros = len_bytes.iter().take_while(|&&b| b == 0).count();
        let len_bytes = &len_bytes[leading_zeros..];
        buf.put_u8(0xf7 + len_bytes.len() as u8);
        buf.put_slice(len_bytes);
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut body = Vec::new();
        for item in self {
            item.encode(&mut body);
        }
        encode_length(body.len(), buf);
        buf.put_slice(&body);
    }
}

impl<T: RLPEncode> RLPEncode for &[T] {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut body = Vec::new();
        for item in self.iter() {
            item.encode(&mut body);
        }
        encode_length(body.len(), buf);
        buf.put_slice(&body);
    }
}

impl<T: RLPEncode> RLPEncode for Option<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Some(v) => v.encode(buf),
            None => buf.put_u8(RLP_EMPTY_LIST),
        }
    }
}

macro_rules! encode_tuple {
    ($($name:ident: $t:ident),+) => {
        impl<$($t: RLPEncode),+> RLPEncode for ($($t,)+) {
            fn encode(&self, buf: &mut dyn BufMut) {
                #[allow(non_snake_case)]
                let ($($name,)+) = self;
                let mut body = Vec::new();
                $($name.encode(&mut body);)+
                encode_length(body.len(), buf);
                buf.put_slice(&body);
            }
        }
    };
}

encode_tuple!(a: A);
encode_tuple!(a: A, b: B);
encode_tuple!(a: A, b: B, c: C);
encode_tuple!(a: A, b: B, c: C, d: D);
encode_tuple!(a: A, b: B, c: C, d: D, e: E);

impl RLPEncode for Ipv4Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for Ipv6Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for IpAddr {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            IpAddr::V4(ip) => ip.encode(buf),
            IpAddr::V6(ip) => ip.encode(buf),
        }
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

macro_rules! encode_hash_newtype {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                self.as_bytes().encode(buf)
            }
        }
    };
}

encode_hash_newtype!(H32);
encode_hash_newtype!(H64);
encode_hash_newtype!(H128);
encode_hash_newtype!(Address);
encode_hash_newtype!(H256);
encode_hash_newtype!(H264);
encode_hash_newtype!(H512);
encode_hash_newtype!(Bloom);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_zero_byte_is_string_prefix() {
        assert_eq!(encode(0u8), vec![0x80]);
    }

    #[test]
    fn encode_single_small_byte_is_itself() {
        assert_eq!(encode(15u8), vec![0x0f]);
    }

    #[test]
    fn encode_boundary_byte_is_length_prefixed() {
        assert_eq!(encode(0x80u16), vec![0x81, 0x80]);
    }

    #[test]
    fn encode_short_string() {
        assert_eq!(encode("dog".to_string()), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn encode_empty_list() {
        let items: Vec<u8> = vec![];
        assert_eq!(encode(items), vec![0xc0]);
    }

    #[test]
    fn encode_list_of_strings() {
        let items = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(
            encode(items),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn encode_u256_strips_leading_zeros() {
        assert_eq!(encode(U256::from(1024)), vec![0x82, 0x04, 0x00]);
    }
}
