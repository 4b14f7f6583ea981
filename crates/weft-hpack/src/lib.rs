//! HPACK (RFC 7541) header compression for HTTP/2.
//!
//! The [`Decoder`] is resumable, so header block fragments can be fed as
//! they come off the wire, across HEADERS and CONTINUATION frames. The
//! [`Encoder`] produces blocks the decoder (or any other HPACK decoder)
//! understands.

pub mod decoder;
pub mod encoder;
pub mod huffman;

mod base64;
mod table;

pub use base64::{is_binary_header, Base64DecodingError, BINARY_SUFFIX};
pub use decoder::{
    Decoder, DecoderError, DecoderResult, IntegerDecodingError, StringDecodingError,
};
pub use encoder::Encoder;
pub use table::{
    DynamicTable, HeaderTable, StaticTable, DEFAULT_TABLE_SIZE, ENTRY_OVERHEAD, STATIC_TABLE,
};
