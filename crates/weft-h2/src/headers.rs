//! Feeds HEADERS and CONTINUATION payloads to the connection's HPACK
//! decoder, collecting fields onto the stream they belong to.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    error::{H2ConnectionError, H2StreamError},
    frame::{Frame, FrameType, HeadersFlags, RawFrameType, StreamId},
    transport::TransportParsing,
};

/// A stream receives at most one block of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersOrTrailers {
    Headers,
    Trailers,
}

/// A decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

/// Where the block that's being decoded goes. Kept on the transport while
/// CONTINUATION frames are expected.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderBlock {
    pub(crate) stream_id: StreamId,
    /// `None` when fields are decoded only to keep the HPACK table in sync.
    pub(crate) target: Option<HeadersOrTrailers>,
    pub(crate) end_stream: bool,
}

#[derive(Debug)]
pub struct HeaderBlockParser {
    block: HeaderBlock,
    end_headers: bool,
}

impl HeaderBlockParser {
    pub fn begin_frame(
        frame: &Frame,
        transport: &mut TransportParsing,
    ) -> Result<Self, H2ConnectionError> {
        let stream_id = frame.stream_id;

        let (block, end_headers) = match frame.frame_type {
            FrameType::Headers(flags) => {
                transport.check_not_mid_header_block(frame)?;
                if stream_id.is_connection() {
                    return Err(H2ConnectionError::StreamSpecificFrameToConnection {
                        frame_type: RawFrameType::Headers,
                    });
                }
                if flags.contains(HeadersFlags::Padded) {
                    return Err(H2ConnectionError::PaddingNotSupported {
                        frame_type: RawFrameType::Headers,
                    });
                }

                let stream = transport.stream_or_insert(stream_id);
                let target = match stream.header_frames_received {
                    0 => Some(HeadersOrTrailers::Headers),
                    1 => Some(HeadersOrTrailers::Trailers),
                    _ => {
                        debug!(%stream_id, "too many header frames received");
                        stream.error = Some(H2StreamError::TooManyHeaderBlocks);
                        None
                    }
                };

                if flags.contains(HeadersFlags::Priority) {
                    transport.hpack.skip_priority();
                }

                let block = HeaderBlock {
                    stream_id,
                    target,
                    end_stream: flags.contains(HeadersFlags::EndStream),
                };
                (block, flags.contains(HeadersFlags::EndHeaders))
            }
            FrameType::Continuation(_) => {
                let Some(block) = transport.expect_continuation else {
                    return Err(H2ConnectionError::UnexpectedContinuationFrame { stream_id });
                };
                if block.stream_id != stream_id {
                    return Err(H2ConnectionError::ExpectedContinuationForStream {
                        stream_id: block.stream_id,
                        continuation_stream_id: stream_id,
                    });
                }
                (block, frame.is_end_headers())
            }
            _ => {
                return Err(H2ConnectionError::ExpectedContinuationFrame {
                    stream_id,
                    frame_type: RawFrameType::from_repr(frame.frame_type.encode().ty),
                })
            }
        };

        transport.expect_continuation = if end_headers { None } else { Some(block) };
        Ok(Self { block, end_headers })
    }

    /// Feeds a slice of the frame's payload. With `is_last`, a frame that
    /// ended the block must have ended it on a field boundary.
    pub fn parse(
        &mut self,
        transport: &mut TransportParsing,
        slice: &[u8],
        is_last: bool,
    ) -> Result<(), H2ConnectionError> {
        let stream_id = self.block.stream_id;
        let mut fields = match self.block.target {
            Some(target) => transport
                .streams
                .get_mut(&stream_id)
                .map(|stream| stream.metadata_mut(target)),
            None => None,
        };

        transport.hpack.parse(slice, |name, value| {
            trace!(
                %stream_id,
                name = %String::from_utf8_lossy(&name),
                "header field"
            );
            if let Some(fields) = fields.as_mut() {
                fields.push(HeaderField {
                    name: Bytes::from(name.into_owned()),
                    value: Bytes::from(value.into_owned()),
                });
            }
        })?;

        if !(is_last && self.end_headers) {
            return Ok(());
        }

        if !transport.hpack.is_at_field_boundary() {
            return Err(H2ConnectionError::HeaderBlockNotFrameAligned { stream_id });
        }
        transport.hpack.end_block()?;

        if let Some(stream) = transport.streams.get_mut(&stream_id) {
            if self.block.target.is_some() {
                stream.header_frames_received += 1;
            }
            if self.block.end_stream {
                debug!(%stream_id, "stream closed by peer");
                stream.received_close = true;
            }
        }
        Ok(())
    }
}
