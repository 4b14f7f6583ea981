//! Frame headers and the fixed-layout payloads a transport writes back.
//!
//! Every frame starts with 9 bytes: a 24-bit payload length, a type byte, a
//! flags byte, then a reserved bit and a 31-bit stream id (RFC 9113
//! section 4.1).

use std::{fmt, io::Write};

use byteorder::{BigEndian, WriteBytesExt};
use enumflags2::{bitflags, BitFlags};
use nom::{
    number::streaming::{be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// Length of a frame header on the wire.
pub const FRAME_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

impl RawFrameType {
    pub fn repr(self) -> u8 {
        self as u8
    }

    pub fn from_repr(ty: u8) -> Option<Self> {
        use RawFrameType::*;
        const ALL: [RawFrameType; 10] = [
            Data,
            Headers,
            Priority,
            RstStream,
            Settings,
            PushPromise,
            Ping,
            GoAway,
            WindowUpdate,
            Continuation,
        ];
        ALL.get(ty as usize).copied()
    }
}

/// A frame type with the flags that type defines. Flag bits a type doesn't
/// define are dropped; [`Frame::raw_flags`] keeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise,
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    /// Extension frame types. Receivers ignore these.
    Unknown(EncodedFrameType),
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

/// Type and flags bytes exactly as they were on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl FrameType {
    pub fn encode(self) -> EncodedFrameType {
        let (ty, flags) = match self {
            Self::Data(f) => (RawFrameType::Data, f.bits()),
            Self::Headers(f) => (RawFrameType::Headers, f.bits()),
            Self::Priority => (RawFrameType::Priority, 0),
            Self::RstStream => (RawFrameType::RstStream, 0),
            Self::Settings(f) => (RawFrameType::Settings, f.bits()),
            Self::PushPromise => (RawFrameType::PushPromise, 0),
            Self::Ping(f) => (RawFrameType::Ping, f.bits()),
            Self::GoAway => (RawFrameType::GoAway, 0),
            Self::WindowUpdate => (RawFrameType::WindowUpdate, 0),
            Self::Continuation(f) => (RawFrameType::Continuation, f.bits()),
            Self::Unknown(encoded) => return encoded,
        };
        EncodedFrameType {
            ty: ty.repr(),
            flags,
        }
    }

    pub fn decode(encoded: EncodedFrameType) -> Self {
        let Some(ty) = RawFrameType::from_repr(encoded.ty) else {
            return Self::Unknown(encoded);
        };
        let flags = encoded.flags;
        match ty {
            RawFrameType::Data => Self::Data(BitFlags::from_bits_truncate(flags)),
            RawFrameType::Headers => Self::Headers(BitFlags::from_bits_truncate(flags)),
            RawFrameType::Priority => Self::Priority,
            RawFrameType::RstStream => Self::RstStream,
            RawFrameType::Settings => Self::Settings(BitFlags::from_bits_truncate(flags)),
            RawFrameType::PushPromise => Self::PushPromise,
            RawFrameType::Ping => Self::Ping(BitFlags::from_bits_truncate(flags)),
            RawFrameType::GoAway => Self::GoAway,
            RawFrameType::WindowUpdate => Self::WindowUpdate,
            RawFrameType::Continuation => {
                Self::Continuation(BitFlags::from_bits_truncate(flags))
            }
        }
    }
}

/// A 31-bit stream identifier. Zero addresses the connection itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub const CONNECTION: Self = Self(0);

    pub fn is_connection(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded frame header. The payload isn't part of it.
#[derive(Clone, Copy)]
pub struct Frame {
    pub frame_type: FrameType,
    raw_flags: u8,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.frame_type.encode();
        let name = match RawFrameType::from_repr(encoded.ty) {
            Some(ty) => format!("{ty:?}"),
            None => format!("Unknown({:#04x})", encoded.ty),
        };

        let mut s = f.debug_struct(&name);
        s.field("stream_id", &self.stream_id.0);
        if self.len > 0 {
            s.field("len", &self.len);
        }
        if self.raw_flags != 0 {
            s.field("flags", &format_args!("{:#04x}", self.raw_flags));
        }
        if self.reserved != 0 {
            s.field("reserved", &self.reserved);
        }
        s.finish()
    }
}

impl Frame {
    /// A header with no payload. Use [`Frame::with_len`] to give it one.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            raw_flags: frame_type.encode().flags,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// Needs all 9 bytes: fewer yield `nom::Err::Incomplete`.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, ty, flags, (reserved, stream_id))) =
            tuple((be_u24, be_u8, be_u8, parse_bit_and_u31))(i)?;

        let frame = Frame {
            frame_type: FrameType::decode(EncodedFrameType { ty, flags }),
            raw_flags: flags,
            reserved,
            stream_id: StreamId(stream_id),
            len,
        };
        Ok((i, frame))
    }

    pub fn write_into(self, mut w: impl Write) -> std::io::Result<()> {
        let encoded = self.frame_type.encode();
        w.write_u24::<BigEndian>(self.len)?;
        w.write_u8(encoded.ty)?;
        w.write_u8(encoded.flags)?;
        w.write_all(&pack_bit_and_u31(self.reserved, self.stream_id.0))
    }

    /// Flags byte as it was on the wire, unknown bits included.
    pub fn raw_flags(&self) -> u8 {
        self.raw_flags
    }

    pub fn is_end_headers(&self) -> bool {
        match self.frame_type {
            FrameType::Headers(flags) => flags.contains(HeadersFlags::EndHeaders),
            FrameType::Continuation(flags) => flags.contains(ContinuationFlags::EndHeaders),
            _ => false,
        }
    }

    pub fn is_end_stream(&self) -> bool {
        match self.frame_type {
            FrameType::Data(flags) => flags.contains(DataFlags::EndStream),
            FrameType::Headers(flags) => flags.contains(HeadersFlags::EndStream),
            _ => false,
        }
    }
}

/// Splits a big-endian u32 into its top bit and the 31 bits below it.
pub fn parse_bit_and_u31(i: &[u8]) -> IResult<&[u8], (u8, u32)> {
    let (i, x) = be_u32(i)?;
    Ok((i, ((x >> 31) as u8, x & 0x7fff_ffff)))
}

/// Inverse of [`parse_bit_and_u31`]. Panics if `bit` isn't 0 or 1, or
/// `val` doesn't fit in 31 bits.
pub fn pack_bit_and_u31(bit: u8, val: u32) -> [u8; 4] {
    assert!(val >> 31 == 0, "val is too large: {val:x}");
    assert!(bit <= 1, "bit should be 0 or 1: {bit:x}");
    (((bit as u32) << 31) | val).to_be_bytes()
}

/// An error code as carried by RST_STREAM and GOAWAY. Peers may send codes
/// we don't know.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(known) => write!(f, "{known:?}"),
            None => write!(f, "ErrorCode({:#04x})", self.0),
        }
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(known: KnownErrorCode) -> Self {
        Self(known as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KnownErrorCode {
    NoError = 0x00,
    ProtocolError = 0x01,
    InternalError = 0x02,
    FlowControlError = 0x03,
    SettingsTimeout = 0x04,
    StreamClosed = 0x05,
    FrameSizeError = 0x06,
    RefusedStream = 0x07,
    Cancel = 0x08,
    /// The HPACK context can't be kept in sync anymore.
    CompressionError = 0x09,
    ConnectError = 0x0a,
    EnhanceYourCalm = 0x0b,
    InadequateSecurity = 0x0c,
    Http1_1Required = 0x0d,
}

impl KnownErrorCode {
    pub fn from_repr(code: u32) -> Option<Self> {
        use KnownErrorCode::*;
        const ALL: [KnownErrorCode; 14] = [
            NoError,
            ProtocolError,
            InternalError,
            FlowControlError,
            SettingsTimeout,
            StreamClosed,
            FrameSizeError,
            RefusedStream,
            Cancel,
            CompressionError,
            ConnectError,
            EnhanceYourCalm,
            InadequateSecurity,
            Http1_1Required,
        ];
        ALL.get(usize::try_from(code).ok()?).copied()
    }
}

impl TryFrom<ErrorCode> for KnownErrorCode {
    type Error = ErrorCode;

    fn try_from(code: ErrorCode) -> Result<Self, Self::Error> {
        KnownErrorCode::from_repr(code.0).ok_or(code)
    }
}

pub struct GoAway<'a> {
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub additional_debug_data: &'a [u8],
}

impl GoAway<'_> {
    /// Payload length.
    pub fn len(&self) -> usize {
        8 + self.additional_debug_data.len()
    }

    pub fn write_into(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(&pack_bit_and_u31(0, self.last_stream_id.0))?;
        w.write_u32::<BigEndian>(self.error_code.0)?;
        w.write_all(self.additional_debug_data)
    }
}

pub struct RstStream {
    pub error_code: ErrorCode,
}

impl RstStream {
    pub fn write_into(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_u32::<BigEndian>(self.error_code.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn write_into(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(&pack_bit_and_u31(self.reserved, self.increment))
    }
}
