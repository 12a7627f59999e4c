use bytes::{BufMut, Bytes};

use crate::{
    decode::{decode_rlp_item, get_item_with_prefix, RLPDecode},
    encode::{encode_length, RLPEncode},
    error::RLPDecodeError,
};

/// Borrowed, forward-only cursor over the payload of one RLP list item.
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        let (is_list, payload, remaining) = decode_rlp_item(buf)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        Ok(Self { payload, remaining })
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (value, payload) =
            T::decode_unfinished(self.payload).map_err(|err| field_decode_error::<T>(name, err))?;
        Ok((
            value,
            Decoder {
                payload,
                remaining: self.remaining,
            },
        ))
    }

    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        match T::decode_unfinished(self.payload) {
            Ok((value, payload)) => (
                Some(value),
                Decoder {
                    payload,
                    remaining: self.remaining,
                },
            ),
            Err(_) => (None, self),
        }
    }

    pub fn get_encoded_item(self) -> Result<(Vec<u8>, Self), RLPDecodeError> {
        let (item, payload) = get_item_with_prefix(self.payload)?;
        Ok((
            item.to_vec(),
            Decoder {
                payload,
                remaining: self.remaining,
            },
        ))
    }

    /// Errors unless the whole list payload was consumed.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if !self.payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(self.remaining)
    }

    /// Silently drops any unconsumed trailing fields. Used by decoders of messages
    /// (Hello, Ping, Status, ...) that must accept forward-compatible trailing data.
    pub fn finish_unchecked(self) -> &'a [u8] {
        self.remaining
    }
}

fn field_decode_error<T>(field_name: &str, err: RLPDecodeError) -> RLPDecodeError {
    RLPDecodeError::Custom(format!(
        "error decoding field {field_name} of type {}: {err}",
        core::any::type_name::<T>()
    ))
}

/// Accumulates encoded fields for a single RLP list.
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> core::fmt::Debug for Encoder<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Encoder")
            .field("temp_buf", &self.temp_buf)
            .finish()
    }
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    pub fn encode_optional_field<T: RLPEncode>(mut self, opt_value: &Option<T>) -> Self {
        opt_value.encode(&mut self.temp_buf);
        self
    }

    pub fn encode_key_value_list<T: RLPEncode>(mut self, list: &[(Bytes, T)]) -> Self {
        let mut body = Vec::new();
        for (key, value) in list {
            let mut pair = Vec::new();
            key.encode(&mut pair);
            value.encode(&mut pair);
            encode_length(pair.len(), &mut body);
            body.extend_from_slice(&pair);
        }
        encode_length(body.len(), &mut self.temp_buf);
        self.temp_buf.extend_from_slice(&body);
        self
    }

    pub fn finish(self) {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RLPDecode;
    use crate::encode::RLPEncode;

    struct Simple {
        a: u8,
        b: u16,
    }

    impl RLPEncode for Simple {
        fn encode(&self, buf: &mut dyn BufMut) {
            Encoder::new(buf)
                .encode_field(&self.a)
                .encode_field(&self.b)
                .finish()
        }
    }

    impl RLPDecode for Simple {
        fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
            let decoder = Decoder::new(rlp)?;
            let (a, decoder) = decoder.decode_field("a")?;
            let (b, decoder) = decoder.decode_field("b")?;
            let rest = decoder.finish()?;
            Ok((Simple { a, b }, rest))
        }
    }

    #[test]
    fn struct_roundtrip_matches_raw_tuple_bytes() {
        let simple = Simple { a: 61, b: 75 };
        let encoded = simple.encode_to_vec();
        assert_eq!(encoded, vec![0xc2, 61, 75]);

        let decoded = Simple::decode(&encoded).unwrap();
        assert_eq!(decoded.a, 61);
        assert_eq!(decoded.b, 75);
    }

    #[test]
    fn finish_unchecked_ignores_trailing_fields() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u8)
            .encode_field(&2u8)
            .encode_field(&3u8)
            .finish();

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder) = decoder.decode_field::<u8>("a").unwrap();
        assert_eq!(a, 1);
        decoder.finish_unchecked();
    }

    #[test]
    fn decode_optional_field_roundtrips_some_and_none() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u8)
            .encode_optional_field(&Some(7u64))
            .finish();
        let decoder = Decoder::new(&buf).unwrap();
        let (_, decoder) = decoder.decode_field::<u8>("version").unwrap();
        let (enr_seq, decoder): (Option<u64>, _) = decoder.decode_optional_field();
        assert_eq!(enr_seq, Some(7));
        decoder.finish().unwrap();

        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u8)
            .encode_optional_field(&None::<u64>)
            .finish();
        let decoder = Decoder::new(&buf).unwrap();
        let (_, decoder) = decoder.decode_field::<u8>("version").unwrap();
        let (enr_seq, decoder): (Option<u64>, _) = decoder.decode_optional_field();
        assert_eq!(enr_seq, None);
        // the `None` marker byte itself is never consumed by decode_optional_field;
        // callers at the end of a message's field list use finish_unchecked for this.
        decoder.finish_unchecked();
    }
}
