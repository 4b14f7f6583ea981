//! HTTP/2 frame parsing for the weft transport core.
//!
//! Each frame type has a resumable parser: `begin_frame` validates the
//! frame header, then `parse` is called with slices of the payload as they
//! arrive, the last one flagged `is_last`. Parsers write their effects into
//! a [`TransportParsing`] (settings, window credit, replies to queue) or,
//! for DATA, into the stream's [`StreamParsing`].
//!
//! Routing frames to parsers based on the frame header is left to the
//! caller.

pub use enumflags2;
pub use weft_hpack;

pub mod data;
pub mod error;
pub mod frame;
pub mod headers;
pub mod ping;
pub mod settings;
pub mod transport;
pub mod window_update;
pub mod write;

pub use data::{DataOp, DataParser};
pub use error::{H2ConnectionError, H2ErrorLevel, H2StreamError};
pub use frame::{
    ErrorCode, Frame, FrameType, KnownErrorCode, RawFrameType, StreamId, FRAME_HEADER_LEN,
};
pub use headers::{HeaderBlockParser, HeaderField, HeadersOrTrailers};
pub use ping::PingParser;
pub use settings::{Setting, Settings, SettingsError, SettingsParser, SettingsTable};
pub use transport::{StreamParsing, TransportParsing};
pub use window_update::WindowUpdateParser;
