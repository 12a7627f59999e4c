pub mod decode;
pub mod encode;
pub mod error;
pub mod structs;

pub(crate) const RLP_NULL: u8 = 0x80;
pub(crate) const RLP_EMPTY_LIST: u8 = 0xc0;

pub use decode::{decode_rlp_item, get_item_with_prefix, RLPDecode};
pub use encode::RLPEncode;
pub use error::{RLPDecodeError, RLPEncodeError};
pub use structs::{Decoder, Encoder};
