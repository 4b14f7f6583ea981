mod tracing_common;

use bytes::Bytes;
use enumflags2::BitFlags;
use weft_h2::{
    frame::{FrameType, HeadersFlags},
    Frame, H2ConnectionError, H2ErrorLevel, H2StreamError, HeaderBlockParser, PingParser, SettingsParser,
    StreamId, TransportParsing, WindowUpdateParser,
};

pub(crate) use tracing_common::setup_tracing;

#[derive(Debug)]
pub(crate) enum FeedError {
    Connection(H2ConnectionError),
    Stream(StreamId, H2StreamError),
}

impl From<H2ConnectionError> for FeedError {
    fn from(e: H2ConnectionError) -> Self {
        Self::Connection(e)
    }
}

/// Routes every frame in `wire` to its parser, handing payloads over in
/// `chunk_size` slices.
pub(crate) fn feed(
    transport: &mut TransportParsing,
    mut wire: &[u8],
    chunk_size: usize,
) -> Result<(), FeedError> {
    while !wire.is_empty() {
        let (rest, frame) = Frame::parse(wire).expect("incomplete frame header");
        let (payload, rest) = rest.split_at(frame.len as usize);
        wire = rest;

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[]]
        } else {
            payload.chunks(chunk_size).collect()
        };
        let last = chunks.len() - 1;

        match frame.frame_type {
            FrameType::Data(_) => {
                let stream_id = frame.stream_id;
                let stream_err = |e| FeedError::Stream(stream_id, e);
                let stream = transport
                    .begin_data_frame(&frame)
                    .map_err(|e| match e {
                        H2ErrorLevel::Connection(e) => FeedError::Connection(e),
                        H2ErrorLevel::Stream(e) => stream_err(e),
                    })?;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    stream
                        .parse_data(Bytes::copy_from_slice(chunk), i == last)
                        .map_err(stream_err)?;
                }
            }
            FrameType::Headers(_) | FrameType::Continuation(_) => {
                let mut parser = HeaderBlockParser::begin_frame(&frame, transport)?;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    parser.parse(transport, chunk, i == last)?;
                }
            }
            FrameType::Settings(_) => {
                let mut parser = SettingsParser::begin_frame(&frame, transport)?;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    parser.parse(transport, chunk, i == last)?;
                }
            }
            FrameType::Ping(_) => {
                let mut parser = PingParser::begin_frame(&frame, transport)?;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    parser.parse(transport, chunk, i == last)?;
                }
            }
            FrameType::WindowUpdate => {
                let mut parser = WindowUpdateParser::begin_frame(&frame, transport)?;
                for (i, chunk) in chunks.into_iter().enumerate() {
                    parser.parse(transport, chunk, i == last)?;
                }
            }
            other => panic!("no parser for {other:?}"),
        }
    }
    Ok(())
}

/// Appends a frame, header and payload, to `out`.
pub(crate) fn push_frame(
    out: &mut Vec<u8>,
    frame_type: FrameType,
    stream_id: u32,
    payload: &[u8],
) {
    Frame::new(frame_type, StreamId(stream_id))
        .with_len(payload.len() as u32)
        .write_into(&mut *out)
        .unwrap();
    out.extend_from_slice(payload);
}

pub(crate) fn headers_flags(flags: &[HeadersFlags]) -> FrameType {
    FrameType::Headers(flags.iter().copied().collect::<BitFlags<_>>())
}

/// A length-prefixed message as it travels in DATA frames.
pub(crate) fn message(compressed: bool, body: &[u8]) -> Vec<u8> {
    let mut out = vec![compressed as u8];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}
