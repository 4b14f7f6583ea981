//! Exposes the struct `Decoder` that turns HPACK-encoded header blocks into
//! header lists.
//!
//! The decoder is resumable: a header block may be handed to
//! [`Decoder::parse`] in as many pieces as the transport delivers it, split
//! at any byte, and [`Decoder::end_block`] is called once the block is
//! complete. Header names and values are opaque octets; the only semantic
//! rule applied is that values of `-bin` headers are base64 decoded.
//!
//! # Example
//!
//! ```rust
//! use weft_hpack::Decoder;
//! let mut decoder = Decoder::new();
//!
//! let header_list = decoder.decode(&[0x82, 0x84]).unwrap();
//!
//! assert_eq!(header_list, [
//!     (b":method".to_vec(), b"GET".to_vec()),
//!     (b":path".to_vec(), b"/".to_vec()),
//! ]);
//! ```
//!
//! Feeding a block in pieces, with a callback that borrows each field:
//!
//! ```rust
//! use weft_hpack::Decoder;
//! let mut decoder = Decoder::new();
//!
//! let mut names = Vec::new();
//! let block = [0x82, 0x41, 0x03, b'a', b'.', b'b'];
//! for chunk in block.chunks(2) {
//!     decoder
//!         .parse(chunk, |name, _value| names.push(name.into_owned()))
//!         .unwrap();
//! }
//! decoder.end_block().unwrap();
//!
//! assert_eq!(names, [b":method".to_vec(), b":authority".to_vec()]);
//! ```

use std::borrow::Cow;

use tracing::{debug, trace};

use crate::base64::{is_binary_header, Base64Decoder, Base64DecodingError};
use crate::huffman::{HuffmanDecoder, HuffmanDecoderError};
use crate::table::{HeaderTable, DEFAULT_TABLE_SIZE};

/// A header block may open with at most this many dynamic table size
/// updates.
const MAX_SIZE_UPDATES: u8 = 2;

/// Length of the stream dependency and weight that precede the header block
/// fragment of a HEADERS frame with the PRIORITY flag.
const PRIORITY_LEN: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Indexing {
    Incremental,
    Without,
    Never,
}

impl Indexing {
    /// Mask for the name index stored in the first byte.
    const fn prefix_mask(self) -> u8 {
        match self {
            Indexing::Incremental => 0x3f,
            Indexing::Without | Indexing::Never => 0x0f,
        }
    }
}

/// Where a literal's name comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NameRef {
    /// Table index, fits in the first byte.
    Indexed,
    /// Table index, continues in the following octets.
    IndexedOverflow,
    /// A string literal follows.
    Literal,
}

/// Everything the first byte of a field says about how to parse the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldShape {
    Indexed,
    IndexedOverflow,
    Literal(Indexing, NameRef),
    SizeUpdate,
    SizeUpdateOverflow,
    /// `0x80`: indexed field with index 0.
    Illegal,
}

static FIRST_BYTE: [FieldShape; 256] = build_first_byte_table();

const fn name_ref(index: u8, mask: u8) -> NameRef {
    if index == 0 {
        NameRef::Literal
    } else if index == mask {
        NameRef::IndexedOverflow
    } else {
        NameRef::Indexed
    }
}

const fn shape_of(octet: u8) -> FieldShape {
    if octet & 0x80 != 0 {
        match octet & 0x7f {
            0 => FieldShape::Illegal,
            0x7f => FieldShape::IndexedOverflow,
            _ => FieldShape::Indexed,
        }
    } else if octet & 0x40 != 0 {
        FieldShape::Literal(Indexing::Incremental, name_ref(octet & 0x3f, 0x3f))
    } else if octet & 0x20 != 0 {
        if octet & 0x1f == 0x1f {
            FieldShape::SizeUpdateOverflow
        } else {
            FieldShape::SizeUpdate
        }
    } else if octet & 0x10 != 0 {
        FieldShape::Literal(Indexing::Never, name_ref(octet & 0x0f, 0x0f))
    } else {
        FieldShape::Literal(Indexing::Without, name_ref(octet & 0x0f, 0x0f))
    }
}

const fn build_first_byte_table() -> [FieldShape; 256] {
    let mut table = [FieldShape::Illegal; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = shape_of(i as u8);
        i += 1;
    }
    table
}

/// Represents all errors that can be encountered while decoding an
/// integer.
#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IntegerDecodingError {
    /// Continuation octets past the fifth must be `0x80` padding, closed by a
    /// `0x00`.
    #[error("Too many octets in the integer encoding")]
    TooManyOctets,
    /// The value does not fit in 32 bits.
    #[error("Integer value too large")]
    ValueTooLarge,
    /// The header block ended while an integer was being decoded.
    #[error("Not enough octets in the buffer")]
    NotEnoughOctets,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StringDecodingError {
    #[error("Not enough octets in the buffer")]
    NotEnoughOctets,
    #[error("Huffman decoder error: {0}")]
    HuffmanDecoderError(#[from] HuffmanDecoderError),
    #[error("Base64 decoder error: {0}")]
    Base64DecodingError(#[from] Base64DecodingError),
}

/// Represents all errors that can be encountered while performing the decoding
/// of an HPACK header set.
#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecoderError {
    #[error("Header index out of bounds")]
    HeaderIndexOutOfBounds,
    #[error("Integer decoding error: {0}")]
    IntegerDecodingError(#[from] IntegerDecodingError),
    #[error("String decoding error: {0}")]
    StringDecodingError(#[from] StringDecodingError),
    /// The size of the dynamic table can never be allowed to exceed the max
    /// size mandated to the decoder by the protocol.
    #[error("Dynamic table size exceeds the maximum size")]
    InvalidMaxDynamicSize,
    /// Size updates may only open a header block.
    #[error("Dynamic table size update after a header field")]
    SizeUpdateAfterField,
    #[error("More than two dynamic table size updates in a header block")]
    TooManySizeUpdates,
}

impl From<HuffmanDecoderError> for DecoderError {
    fn from(err: HuffmanDecoderError) -> Self {
        StringDecodingError::from(err).into()
    }
}

/// The result returned by the `decode` method of the `Decoder`.
pub type DecoderResult = Result<Vec<(Vec<u8>, Vec<u8>)>, DecoderError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StringTarget {
    Name,
    Value,
}

/// What a multi-octet integer is for, once it's complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IntegerTarget {
    FieldIndex,
    NameIndex,
    TableSize,
    StringLength(StringTarget),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Between fields: the next byte is a first byte.
    Begin,
    /// Skipping the priority fields of a HEADERS frame.
    Priority { remaining: u8 },
    /// `octet` counts the continuation octets consumed so far.
    Integer {
        value: u32,
        octet: u8,
        target: IntegerTarget,
    },
    /// Waiting for the octet holding the Huffman flag and length prefix.
    StringHeader(StringTarget),
    StringBody(StringTarget),
}

enum IntegerProgress {
    Done(u32),
    More { value: u32, octet: u8 },
}

/// Folds one continuation octet into an integer being decoded.
///
/// Octets one through four contribute seven bits each. The fifth may only
/// contribute four more (the value is a `u32`), and must not overflow. After
/// that, `0x80` keeps the integer open and `0x00` closes it.
fn continue_integer(value: u32, octet: u8, byte: u8) -> Result<IntegerProgress, DecoderError> {
    let value = match octet {
        0..=3 => value + (((byte & 0x7f) as u32) << (7 * octet)),
        4 => {
            let bits = (byte & 0x7f) as u32;
            if bits > 0xf {
                return Err(IntegerDecodingError::ValueTooLarge.into());
            }
            let add = bits << 28;
            if add > u32::MAX - value {
                return Err(IntegerDecodingError::ValueTooLarge.into());
            }
            value + add
        }
        _ => {
            return match byte {
                0x80 => Ok(IntegerProgress::More { value, octet }),
                0x00 => Ok(IntegerProgress::Done(value)),
                _ => Err(IntegerDecodingError::TooManyOctets.into()),
            }
        }
    };

    if byte & 0x80 == 0 {
        Ok(IntegerProgress::Done(value))
    } else {
        Ok(IntegerProgress::More {
            value,
            octet: octet + 1,
        })
    }
}

/// Decodes an integer with the given prefix from the start of `buf`.
/// Returns the value and the number of octets it took.
#[cfg(test)]
pub(crate) fn decode_integer(buf: &[u8], prefix_size: u8) -> Result<(u32, usize), DecoderError> {
    let mask = ((1u16 << prefix_size) - 1) as u8;
    let first = *buf.first().ok_or(IntegerDecodingError::NotEnoughOctets)?;
    let mut value = (first & mask) as u32;
    if value < mask as u32 {
        return Ok((value, 1));
    }

    let mut octet = 0;
    for (i, &b) in buf[1..].iter().enumerate() {
        match continue_integer(value, octet, b)? {
            IntegerProgress::Done(v) => return Ok((v, i + 2)),
            IntegerProgress::More { value: v, octet: o } => {
                value = v;
                octet = o;
            }
        }
    }
    Err(IntegerDecodingError::NotEnoughOctets.into())
}

/// Per-string decoding state.
#[derive(Clone, Copy, Debug, Default)]
struct StringState {
    huffman: bool,
    huffman_decoder: HuffmanDecoder,
    /// Present while decoding the value of a `-bin` header.
    base64: Option<Base64Decoder>,
    remaining: u32,
}

fn push_symbol(
    base64: &mut Option<Base64Decoder>,
    symbol: u8,
    out: &mut Vec<u8>,
) -> Result<(), StringDecodingError> {
    match base64 {
        Some(decoder) => decoder.push(symbol, out)?,
        None => out.push(symbol),
    }
    Ok(())
}

/// Decodes headers encoded using HPACK.
///
/// Maintains the dynamic table across header blocks, so one decoder must
/// be used per connection, and blocks must be fed in the order they were
/// encoded. Once an error is returned, the decoder stays failed: the
/// connection's compression context is unusable.
pub struct Decoder {
    header_table: HeaderTable,
    max_allowed_table_size: usize,

    state: State,
    failed: Option<DecoderError>,

    indexing: Indexing,
    key: Vec<u8>,
    value: Vec<u8>,
    string: StringState,

    size_updates_left: u8,
    seen_field: bool,
}

impl Default for Decoder {
    fn default() -> Decoder {
        Decoder {
            header_table: HeaderTable::default(),
            max_allowed_table_size: DEFAULT_TABLE_SIZE,
            state: State::Begin,
            failed: None,
            indexing: Indexing::Without,
            key: Vec::new(),
            value: Vec::new(),
            string: StringState::default(),
            size_updates_left: MAX_SIZE_UPDATES,
            seen_field: false,
        }
    }
}

impl Decoder {
    /// Creates a new `Decoder` with all settings set to default values.
    pub fn new() -> Decoder {
        Default::default()
    }

    /// Sets a new maximum dynamic table size for the decoder, as an encoder
    /// signalled size update would.
    ///
    /// # Panics
    ///
    /// If `new_max_size` exceeds the allowed table size.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        assert!(
            new_max_size <= self.max_allowed_table_size,
            "new_max_size ({new_max_size}) > max_allowed_table_size ({})",
            self.max_allowed_table_size
        );
        self.header_table
            .dynamic_table
            .set_max_table_size(new_max_size);
    }

    /// The largest table size a peer's size update may ask for: our
    /// SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_allowed_table_size(&mut self, max_allowed_size: usize) {
        self.max_allowed_table_size = max_allowed_size;
    }

    pub fn header_table(&self) -> &HeaderTable {
        &self.header_table
    }

    /// True when the decoder is not in the middle of a field. A header block
    /// that ends anywhere else is malformed.
    pub fn is_at_field_boundary(&self) -> bool {
        self.state == State::Begin
    }

    /// The next 5 bytes fed are the priority fields of a HEADERS frame, and
    /// are skipped. Does nothing once the decoder has failed: the next
    /// call to [`Decoder::parse`] reports the error.
    pub fn skip_priority(&mut self) {
        if self.failed.is_some() {
            return;
        }
        debug_assert_eq!(self.state, State::Begin);
        self.state = State::Priority {
            remaining: PRIORITY_LEN,
        };
    }

    /// Feeds part of a header block, calling `cb` for every completed
    /// header field. Fields may straddle calls.
    pub fn parse(
        &mut self,
        buf: &[u8],
        mut cb: impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        if let Some(err) = self.failed {
            return Err(err);
        }

        let mut pos = 0;
        while pos < buf.len() {
            match self.step(&buf[pos..], &mut cb) {
                Ok(consumed) => pos += consumed,
                Err(err) => {
                    debug!(%err, state = ?self.state, "hpack decoding failed");
                    self.failed = Some(err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Marks the end of the current header block.
    pub fn end_block(&mut self) -> Result<(), DecoderError> {
        if let Some(err) = self.failed {
            return Err(err);
        }

        self.size_updates_left = MAX_SIZE_UPDATES;
        self.seen_field = false;

        let res = match self.state {
            State::Begin => return Ok(()),
            State::StringBody(_) => DecoderError::from(StringDecodingError::NotEnoughOctets),
            State::Integer { .. } | State::StringHeader(_) | State::Priority { .. } => {
                IntegerDecodingError::NotEnoughOctets.into()
            }
        };
        debug!(state = ?self.state, "header block ended mid-field");
        self.failed = Some(res);
        Err(res)
    }

    /// Decodes a complete header block, calling `cb` for every field.
    pub fn decode_with_cb(
        &mut self,
        buf: &[u8],
        cb: impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        self.parse(buf, cb)?;
        self.end_block()
    }

    /// Decode a complete header block into an owned header list.
    pub fn decode(&mut self, buf: &[u8]) -> DecoderResult {
        let mut header_list = Vec::new();
        self.decode_with_cb(buf, |n, v| {
            header_list.push((n.into_owned(), v.into_owned()))
        })?;
        Ok(header_list)
    }

    /// Makes progress on `buf`, which is never empty. Returns how many
    /// octets were consumed.
    fn step(
        &mut self,
        buf: &[u8],
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<usize, DecoderError> {
        let byte = buf[0];
        match self.state {
            State::Begin => {
                self.begin_field(byte, cb)?;
                Ok(1)
            }
            State::Priority { remaining } => {
                let n = buf.len().min(remaining as usize);
                let remaining = remaining - n as u8;
                self.state = if remaining == 0 {
                    State::Begin
                } else {
                    State::Priority { remaining }
                };
                Ok(n)
            }
            State::Integer {
                value,
                octet,
                target,
            } => {
                match continue_integer(value, octet, byte)? {
                    IntegerProgress::Done(value) => self.integer_done(target, value, cb)?,
                    IntegerProgress::More { value, octet } => {
                        self.state = State::Integer {
                            value,
                            octet,
                            target,
                        }
                    }
                }
                Ok(1)
            }
            State::StringHeader(target) => {
                let base64 = match target {
                    StringTarget::Value if is_binary_header(&self.key) => {
                        Some(Base64Decoder::default())
                    }
                    _ => None,
                };
                self.string = StringState {
                    huffman: byte & 0x80 != 0,
                    base64,
                    ..Default::default()
                };

                let len = byte & 0x7f;
                if len == 0x7f {
                    self.state = State::Integer {
                        value: 0x7f,
                        octet: 0,
                        target: IntegerTarget::StringLength(target),
                    };
                } else {
                    self.string_length(target, len as u32, cb)?;
                }
                Ok(1)
            }
            State::StringBody(target) => {
                let n = buf.len().min(self.string.remaining as usize);
                self.string_bytes(target, &buf[..n])?;
                self.string.remaining -= n as u32;
                if self.string.remaining == 0 {
                    self.finish_string(target, cb)?;
                }
                Ok(n)
            }
        }
    }

    fn begin_field(
        &mut self,
        byte: u8,
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        let shape = FIRST_BYTE[byte as usize];
        trace!(byte, ?shape, "field start");

        match shape {
            FieldShape::SizeUpdate | FieldShape::SizeUpdateOverflow => {
                if self.seen_field {
                    return Err(DecoderError::SizeUpdateAfterField);
                }
                if self.size_updates_left == 0 {
                    return Err(DecoderError::TooManySizeUpdates);
                }
                self.size_updates_left -= 1;
            }
            _ => self.seen_field = true,
        }

        match shape {
            FieldShape::Indexed => self.emit_indexed((byte & 0x7f) as u32, cb)?,
            FieldShape::IndexedOverflow => {
                self.state = State::Integer {
                    value: 0x7f,
                    octet: 0,
                    target: IntegerTarget::FieldIndex,
                }
            }
            FieldShape::Literal(indexing, name) => {
                self.indexing = indexing;
                let mask = indexing.prefix_mask();
                match name {
                    NameRef::Indexed => self.literal_with_indexed_name((byte & mask) as u32)?,
                    NameRef::IndexedOverflow => {
                        self.state = State::Integer {
                            value: mask as u32,
                            octet: 0,
                            target: IntegerTarget::NameIndex,
                        }
                    }
                    NameRef::Literal => {
                        self.key.clear();
                        self.state = State::StringHeader(StringTarget::Name);
                    }
                }
            }
            FieldShape::SizeUpdate => self.update_table_size((byte & 0x1f) as u32)?,
            FieldShape::SizeUpdateOverflow => {
                self.state = State::Integer {
                    value: 0x1f,
                    octet: 0,
                    target: IntegerTarget::TableSize,
                }
            }
            FieldShape::Illegal => return Err(DecoderError::HeaderIndexOutOfBounds),
        }
        Ok(())
    }

    fn integer_done(
        &mut self,
        target: IntegerTarget,
        value: u32,
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        match target {
            IntegerTarget::FieldIndex => self.emit_indexed(value, cb),
            IntegerTarget::NameIndex => self.literal_with_indexed_name(value),
            IntegerTarget::TableSize => self.update_table_size(value),
            IntegerTarget::StringLength(target) => self.string_length(target, value, cb),
        }
    }

    fn emit_indexed(
        &mut self,
        index: u32,
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        let (name, value) = self
            .header_table
            .get_from_table(index as usize)
            .ok_or(DecoderError::HeaderIndexOutOfBounds)?;
        trace!(index, "indexed field");
        cb(Cow::Borrowed(name), Cow::Borrowed(value));
        self.state = State::Begin;
        Ok(())
    }

    fn literal_with_indexed_name(&mut self, index: u32) -> Result<(), DecoderError> {
        let (name, _) = self
            .header_table
            .get_from_table(index as usize)
            .ok_or(DecoderError::HeaderIndexOutOfBounds)?;
        self.key.clear();
        self.key.extend_from_slice(name);
        self.state = State::StringHeader(StringTarget::Value);
        Ok(())
    }

    fn update_table_size(&mut self, size: u32) -> Result<(), DecoderError> {
        let size = size as usize;
        if size > self.max_allowed_table_size {
            return Err(DecoderError::InvalidMaxDynamicSize);
        }
        trace!(size, "dynamic table size update");
        self.header_table.dynamic_table.set_max_table_size(size);
        self.state = State::Begin;
        Ok(())
    }

    fn string_length(
        &mut self,
        target: StringTarget,
        len: u32,
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        match target {
            StringTarget::Name => self.key.clear(),
            StringTarget::Value => self.value.clear(),
        }
        self.string.remaining = len;
        if len == 0 {
            self.finish_string(target, cb)
        } else {
            self.state = State::StringBody(target);
            Ok(())
        }
    }

    fn string_bytes(&mut self, target: StringTarget, bytes: &[u8]) -> Result<(), DecoderError> {
        let out = match target {
            StringTarget::Name => &mut self.key,
            StringTarget::Value => &mut self.value,
        };
        let string = &mut self.string;

        for &byte in bytes {
            if string.huffman {
                string
                    .huffman_decoder
                    .feed(byte, |symbol| push_symbol(&mut string.base64, symbol, out))?;
            } else {
                push_symbol(&mut string.base64, byte, out)?;
            }
        }
        Ok(())
    }

    fn finish_string(
        &mut self,
        target: StringTarget,
        cb: &mut impl FnMut(Cow<[u8]>, Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        if self.string.huffman {
            self.string.huffman_decoder.finish()?;
        }
        if let Some(base64) = self.string.base64.as_mut() {
            base64
                .finish(&mut self.value)
                .map_err(StringDecodingError::from)?;
        }

        match target {
            StringTarget::Name => {
                self.state = State::StringHeader(StringTarget::Value);
            }
            StringTarget::Value => {
                trace!(
                    name = %String::from_utf8_lossy(&self.key),
                    indexing = ?self.indexing,
                    "literal field"
                );
                if self.indexing == Indexing::Incremental {
                    self.header_table
                        .add_header(self.key.clone(), self.value.clone());
                }
                cb(Cow::Borrowed(&self.key), Cow::Borrowed(&self.value));
                self.state = State::Begin;
            }
        }
        Ok(())
    }
}
