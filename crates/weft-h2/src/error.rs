use weft_hpack::DecoderError;

use crate::{
    frame::{KnownErrorCode, RawFrameType, StreamId},
    settings::SettingsError,
};

/// Errors that must tear down the whole connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum H2ConnectionError {
    #[error("remote ended {frame_type:?} frame early, payload length is {frame_size}")]
    IncompleteFrame {
        frame_type: RawFrameType,
        frame_size: u32,
    },

    #[error("on stream {stream_id}, expected continuation frame, but got {frame_type:?}")]
    ExpectedContinuationFrame {
        stream_id: StreamId,
        frame_type: Option<RawFrameType>,
    },

    #[error("expected continuation frame for stream {stream_id}, but got continuation for stream {continuation_stream_id}")]
    ExpectedContinuationForStream {
        stream_id: StreamId,
        continuation_stream_id: StreamId,
    },

    #[error("on stream {stream_id}, received unexpected continuation frame")]
    UnexpectedContinuationFrame { stream_id: StreamId },

    #[error("received {frame_type:?} frame with Padded flag, padding is not supported")]
    PaddingNotSupported { frame_type: RawFrameType },

    #[error("hpack decoding error: {0:?}")]
    HpackDecodingError(#[from] DecoderError),

    #[error("on stream {stream_id}, end of header frame not aligned with a hpack record boundary")]
    HeaderBlockNotFrameAligned { stream_id: StreamId },

    #[error("stream-specific frame {frame_type:?} sent to stream ID 0 (connection-wide)")]
    StreamSpecificFrameToConnection { frame_type: RawFrameType },

    #[error("error writing H2 frame: {0:?}")]
    WriteError(#[from] std::io::Error),

    #[error("received ping frame with non-zero stream id")]
    PingFrameWithNonZeroStreamId { stream_id: StreamId },

    #[error("received ping frame with invalid length {len}")]
    PingFrameInvalidLength { len: u32 },

    #[error("received ping frame with invalid flags {flags:#04x}")]
    PingFrameInvalidFlags { flags: u8 },

    #[error("non-empty settings ack frame received, length {len}")]
    SettingsAckWithPayload { len: u32 },

    #[error("invalid flags on settings frame: {flags:#04x}")]
    SettingsInvalidFlags { flags: u8 },

    #[error("received settings frame with invalid length {len}")]
    SettingsInvalidLength { len: u32 },

    #[error("received settings frame with non-zero stream id")]
    SettingsWithNonZeroStreamId { stream_id: StreamId },

    #[error("zero increment in window update frame")]
    WindowUpdateZeroIncrement,

    #[error("window update has its reserved bit set: {raw:#010x}")]
    WindowUpdateReservedBit { raw: u32 },

    #[error("received window update frame with invalid length {len}")]
    WindowUpdateInvalidLength { len: u32 },

    #[error("received window update frame with invalid flags {flags:#04x}")]
    WindowUpdateInvalidFlags { flags: u8 },

    #[error("bad setting value: {0}")]
    BadSettingValue(#[from] SettingsError),
}

impl H2ConnectionError {
    pub fn as_known_error_code(&self) -> KnownErrorCode {
        match self {
            // frame size errors
            H2ConnectionError::PingFrameInvalidLength { .. } => KnownErrorCode::FrameSizeError,
            H2ConnectionError::SettingsAckWithPayload { .. } => KnownErrorCode::FrameSizeError,
            H2ConnectionError::SettingsInvalidLength { .. } => KnownErrorCode::FrameSizeError,
            H2ConnectionError::WindowUpdateInvalidLength { .. } => KnownErrorCode::FrameSizeError,
            // flow control errors
            H2ConnectionError::BadSettingValue(SettingsError::InitialWindowSizeTooLarge {
                ..
            }) => KnownErrorCode::FlowControlError,
            // compression errors
            H2ConnectionError::HpackDecodingError(_) => KnownErrorCode::CompressionError,
            H2ConnectionError::HeaderBlockNotFrameAligned { .. } => {
                KnownErrorCode::CompressionError
            }
            H2ConnectionError::WriteError(_) => KnownErrorCode::InternalError,
            _ => KnownErrorCode::ProtocolError,
        }
    }
}

/// Errors scoped to a single stream. The connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum H2StreamError {
    #[error("unsupported data flags: {flags:#04x}")]
    UnsupportedDataFlags { flags: u8 },

    #[error("bad grpc frame type {frame_type:#04x}")]
    BadGrpcFrameType { frame_type: u8 },

    #[error("too many header frames received")]
    TooManyHeaderBlocks,

    #[error("stream closed")]
    StreamClosed,
}

impl H2StreamError {
    pub fn as_known_error_code(&self) -> KnownErrorCode {
        use H2StreamError::*;
        use KnownErrorCode as Code;

        match self {
            // stream closed error
            StreamClosed => Code::StreamClosed,
            _ => Code::ProtocolError,
        }
    }
}

/// What a frame that touches a stream can fail with: either the whole
/// connection or just that stream.
#[derive(Debug, thiserror::Error)]
pub enum H2ErrorLevel {
    #[error("connection error: {0}")]
    Connection(#[from] H2ConnectionError),

    #[error("stream error: {0}")]
    Stream(#[from] H2StreamError),
}
