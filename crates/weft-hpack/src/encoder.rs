//! Implements all functionality related to encoding header blocks using
//! HPACK.
//!
//! Clients should use the `Encoder` struct as the API for performing HPACK
//! encoding.
//!
//! # Examples
//!
//! Encodes a header using a literal encoding.
//!
//! ```rust
//! use weft_hpack::Encoder;
//!
//! let mut encoder = Encoder::new();
//! encoder.set_huffman(false);
//!
//! let headers = vec![
//!     (&b"custom-key"[..], &b"custom-value"[..]),
//! ];
//! // First encoding...
//! let result = encoder.encode(headers);
//! // The result is a literal encoding of the header name and value, with an
//! // initial byte representing the type of the encoding
//! // (incremental indexing).
//! assert_eq!(
//!     vec![0x40,
//!          10, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y',
//!          12, b'c', b'u', b's', b't', b'o', b'm', b'-', b'v', b'a', b'l',
//!          b'u', b'e'],
//!     result);
//! ```
//!
//! Encodes some pseudo-headers that are already found in the static table.
//!
//! ```rust
//! use weft_hpack::Encoder;
//!
//! let mut encoder = Encoder::new();
//! let headers = vec![
//!     (&b":method"[..], &b"GET"[..]),
//!     (&b":path"[..], &b"/"[..]),
//! ];
//!
//! // The headers are encoded by providing their index (with a bit flag
//! // indicating that the indexed representation is used).
//! assert_eq!(encoder.encode(headers), vec![2 | 0x80, 4 | 0x80]);
//! ```

use tracing::trace;

use crate::base64::{self, is_binary_header};
use crate::huffman;
use crate::table::HeaderTable;

/// Encodes an integer with the given prefix size (in bits) into `out`. The
/// bits of `flags` above the prefix are set on the first octet.
pub fn encode_integer_into(value: usize, prefix_size: u8, flags: u8, out: &mut Vec<u8>) {
    let mask = ((1u16 << prefix_size) - 1) as u8;
    let flags = flags & !mask;

    if value < mask as usize {
        out.push(flags | value as u8);
        return;
    }

    out.push(flags | mask);
    let mut value = value - mask as usize;
    while value >= 128 {
        out.push((value % 128) as u8 | 0x80);
        value /= 128;
    }
    out.push(value as u8);
}

/// Encodes an integer with the given prefix size (in bits) and returns it.
pub fn encode_integer(value: usize, prefix_size: u8) -> Vec<u8> {
    let mut res = Vec::new();
    encode_integer_into(value, prefix_size, 0, &mut res);
    res
}

/// Encodes header lists into HPACK header blocks, keeping a dynamic table
/// that mirrors the peer decoder's.
///
/// Every field not already fully present in the table is sent as a literal
/// with incremental indexing. String literals are Huffman coded whenever
/// that makes them shorter, unless disabled with [`Encoder::set_huffman`].
pub struct Encoder {
    header_table: HeaderTable,
    huffman: bool,
    /// Smallest and final table sizes requested since the last block.
    pending_size_update: Option<(usize, usize)>,
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder {
            header_table: HeaderTable::default(),
            huffman: true,
            pending_size_update: None,
        }
    }
}

impl Encoder {
    /// Creates a new `Encoder` with a default static table and an empty
    /// dynamic table.
    pub fn new() -> Encoder {
        Default::default()
    }

    /// Changes the dynamic table size, e.g. after the peer lowered its
    /// SETTINGS_HEADER_TABLE_SIZE. The change is signalled at the start of
    /// the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.pending_size_update = Some(match self.pending_size_update {
            Some((smallest, _)) => (smallest.min(size), size),
            None => (size, size),
        });
        self.header_table.dynamic_table.set_max_table_size(size);
    }

    pub fn set_huffman(&mut self, huffman: bool) {
        self.huffman = huffman;
    }

    pub fn header_table(&self) -> &HeaderTable {
        &self.header_table
    }

    /// Encodes the given headers into a new header block.
    pub fn encode<'b, I>(&mut self, headers: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'b [u8], &'b [u8])>,
    {
        let mut encoded = Vec::new();
        self.encode_into(headers, &mut encoded);
        encoded
    }

    /// Encodes the given headers, appending the header block to `out`.
    pub fn encode_into<'b, I>(&mut self, headers: I, out: &mut Vec<u8>)
    where
        I: IntoIterator<Item = (&'b [u8], &'b [u8])>,
    {
        if let Some((smallest, last)) = self.pending_size_update.take() {
            // A decrease followed by an increase needs both to be signalled.
            if smallest < last {
                encode_integer_into(smallest, 5, 0x20, out);
            }
            encode_integer_into(last, 5, 0x20, out);
        }

        for header in headers {
            self.encode_header_into(header, out);
        }
    }

    /// Encodes a single header field, appending it to `out`.
    pub fn encode_header_into(&mut self, header: (&[u8], &[u8]), out: &mut Vec<u8>) {
        let (name, value) = header;
        match self.header_table.find_header(header) {
            Some((index, true)) => {
                trace!(index, "indexed field");
                encode_integer_into(index, 7, 0x80, out);
            }
            Some((index, false)) => {
                trace!(index, "literal with indexed name");
                encode_integer_into(index, 6, 0x40, out);
                self.encode_value(name, value, out);
                self.header_table.add_header(name.to_vec(), value.to_vec());
            }
            None => {
                trace!(name = %String::from_utf8_lossy(name), "literal with new name");
                out.push(0x40);
                self.encode_string_literal(name, out);
                self.encode_value(name, value, out);
                self.header_table.add_header(name.to_vec(), value.to_vec());
            }
        }
    }

    /// Values of `-bin` headers go on the wire base64 encoded.
    fn encode_value(&self, name: &[u8], value: &[u8], out: &mut Vec<u8>) {
        if is_binary_header(name) {
            let mut encoded = Vec::with_capacity((value.len() + 2) / 3 * 4);
            base64::encode(value, &mut encoded);
            self.encode_string_literal(&encoded, out);
        } else {
            self.encode_string_literal(value, out);
        }
    }

    fn encode_string_literal(&self, octet_str: &[u8], out: &mut Vec<u8>) {
        let huffman_len = huffman::encoded_len(octet_str);
        if self.huffman && huffman_len < octet_str.len() {
            encode_integer_into(huffman_len, 7, 0x80, out);
            huffman::encode(octet_str, out);
        } else {
            encode_integer_into(octet_str.len(), 7, 0, out);
            out.extend_from_slice(octet_str);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_integer, Encoder};
    use crate::decoder::Decoder;

    #[test]
    fn test_encode_integer() {
        assert_eq!(encode_integer(10, 5), [10]);
        assert_eq!(encode_integer(1337, 5), [31, 154, 10]);
        assert_eq!(encode_integer(127, 7), [127, 0]);
        assert_eq!(encode_integer(255, 8), [255, 0]);
        assert_eq!(encode_integer(254, 8), [254]);
        assert_eq!(encode_integer(1, 8), [1]);
        assert_eq!(encode_integer(0, 8), [0]);
        assert_eq!(encode_integer(255, 7), [127, 128, 1]);
    }

    #[test]
    fn test_encode_only_method() {
        let mut encoder = Encoder::new();
        let headers = vec![(&b":method"[..], &b"GET"[..])];

        let result = encoder.encode(headers);

        assert_eq!(result, [0x82]);
    }

    #[test]
    fn test_custom_header_gets_indexed() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let headers = vec![(&b"custom-key"[..], &b"custom-value"[..])];

        let first = encoder.encode(headers.clone());
        assert_eq!(first[0], 0x40);
        assert_eq!(encoder.header_table().dynamic_table.len(), 1);

        // Second time around, it's in the dynamic table.
        let second = encoder.encode(headers);
        assert_eq!(second, [62 | 0x80]);
    }

    #[test]
    fn test_name_match_reuses_index() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);

        let result = encoder.encode(vec![(&b":authority"[..], &b"a.b"[..])]);

        assert_eq!(result, [0x41, 0x03, b'a', b'.', b'b']);
    }

    /// RFC 7541, C.4.1
    #[test]
    fn test_huffman_request() {
        let mut encoder = Encoder::new();
        let result = encoder.encode(vec![
            (&b":method"[..], &b"GET"[..]),
            (&b":scheme"[..], &b"http"[..]),
            (&b":path"[..], &b"/"[..]),
            (&b":authority"[..], &b"www.example.com"[..]),
        ]);

        assert_eq!(
            result,
            [
                0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
                0x90, 0xf4, 0xff,
            ]
        );
    }

    #[test]
    fn test_table_size_updates_lead_the_next_block() {
        let mut encoder = Encoder::new();
        encoder.set_max_table_size(0);
        encoder.set_max_table_size(256);

        let result = encoder.encode(vec![(&b":method"[..], &b"GET"[..])]);

        // 0, then 256 = 31 + 225
        assert_eq!(result, [0x20, 0x3f, 0xe1, 0x01, 0x82]);

        let mut decoder = Decoder::new();
        decoder.decode(&result).unwrap();
        assert_eq!(
            decoder.header_table().dynamic_table.get_max_table_size(),
            256
        );
    }

    #[test]
    fn test_binary_value_is_base64_on_the_wire() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let value = [0u8, 1, 2, 255];

        let result = encoder.encode(vec![(&b"trace-bin"[..], &value[..])]);

        assert!(result.ends_with(b"\x06AAEC/w"));
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.decode(&result).unwrap(),
            [(b"trace-bin".to_vec(), value.to_vec())]
        );
    }
}
