//! DATA frame payloads carry length-prefixed messages: a 1-byte
//! compression flag, a 4-byte big-endian length, then the message bytes.
//! Messages can span DATA frames, and one frame can hold several, so the
//! parser lives with its stream and survives from frame to frame.

use bytes::Bytes;
use tracing::trace;

use crate::{
    error::H2StreamError,
    frame::{DataFlags, Frame},
};

/// Length of the header in front of every message.
pub const MESSAGE_HEADER_LEN: usize = 5;

/// What a DATA frame contributed to its stream, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOp {
    /// A new message starts, `length` bytes long.
    BeginMessage { length: u32, compressed: bool },
    /// The next bytes of the current message.
    Payload(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DataState {
    /// Compression flag of the next message.
    #[default]
    Fh0,
    Fh1,
    Fh2,
    Fh3,
    Fh4,
    /// Message bytes, `remaining` of them still to come.
    Frame { remaining: u32 },
}

#[derive(Debug, Default)]
pub struct DataParser {
    state: DataState,
    compressed: bool,
    length: u32,
    end_stream: bool,
    failed: Option<H2StreamError>,
}

impl DataParser {
    /// Only END_STREAM may be set on a DATA frame.
    pub fn begin_frame(&mut self, frame: &Frame) -> Result<(), H2StreamError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let flags = frame.raw_flags();
        if flags & !(DataFlags::EndStream as u8) != 0 {
            let err = H2StreamError::UnsupportedDataFlags { flags };
            self.failed = Some(err.clone());
            return Err(err);
        }
        self.end_stream = flags & DataFlags::EndStream as u8 != 0;
        Ok(())
    }

    /// True if the frame being parsed ends the stream.
    pub fn end_stream(&self) -> bool {
        self.end_stream
    }

    /// Consumes a slice of the frame's payload, pushing what it holds onto
    /// `ops`. Payload ops borrow from `slice` without copying.
    pub fn parse(&mut self, slice: Bytes, ops: &mut Vec<DataOp>) -> Result<(), H2StreamError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let mut pos = 0;
        while pos < slice.len() {
            let b = slice[pos];
            self.state = match self.state {
                DataState::Fh0 => {
                    pos += 1;
                    self.compressed = match b {
                        0 => false,
                        1 => true,
                        frame_type => {
                            let err = H2StreamError::BadGrpcFrameType { frame_type };
                            self.failed = Some(err.clone());
                            return Err(err);
                        }
                    };
                    DataState::Fh1
                }
                DataState::Fh1 => {
                    pos += 1;
                    self.length = (b as u32) << 24;
                    DataState::Fh2
                }
                DataState::Fh2 => {
                    pos += 1;
                    self.length |= (b as u32) << 16;
                    DataState::Fh3
                }
                DataState::Fh3 => {
                    pos += 1;
                    self.length |= (b as u32) << 8;
                    DataState::Fh4
                }
                DataState::Fh4 => {
                    pos += 1;
                    self.length |= b as u32;
                    trace!(length = self.length, compressed = self.compressed, "begin message");
                    ops.push(DataOp::BeginMessage {
                        length: self.length,
                        compressed: self.compressed,
                    });
                    if self.length == 0 {
                        DataState::Fh0
                    } else {
                        DataState::Frame {
                            remaining: self.length,
                        }
                    }
                }
                DataState::Frame { remaining } => {
                    let n = (slice.len() - pos).min(remaining as usize);
                    ops.push(DataOp::Payload(slice.slice(pos..pos + n)));
                    pos += n;
                    match remaining - n as u32 {
                        0 => DataState::Fh0,
                        remaining => DataState::Frame { remaining },
                    }
                }
            };
        }

        Ok(())
    }

    /// True between messages.
    pub fn is_at_message_boundary(&self) -> bool {
        self.state == DataState::Fh0
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use enumflags2::BitFlags;
    use pretty_assertions::assert_eq;

    use super::{DataOp, DataParser};
    use crate::{
        error::H2StreamError,
        frame::{DataFlags, EncodedFrameType, Frame, FrameType, StreamId},
    };

    fn data_frame(flags: BitFlags<DataFlags>) -> Frame {
        Frame::new(FrameType::Data(flags), StreamId(1))
    }

    #[test]
    fn test_two_messages_in_one_frame() {
        let mut parser = DataParser::default();
        parser.begin_frame(&data_frame(DataFlags::EndStream.into())).unwrap();
        assert!(parser.end_stream());

        let mut ops = Vec::new();
        let payload = Bytes::from_static(b"\x00\x00\x00\x00\x03abc\x01\x00\x00\x00\x00");
        parser.parse(payload, &mut ops).unwrap();

        assert_eq!(
            ops,
            [
                DataOp::BeginMessage {
                    length: 3,
                    compressed: false
                },
                DataOp::Payload(Bytes::from_static(b"abc")),
                DataOp::BeginMessage {
                    length: 0,
                    compressed: true
                },
            ]
        );
        assert!(parser.is_at_message_boundary());
    }

    #[test]
    fn test_message_spans_frames_and_slices() {
        let mut parser = DataParser::default();
        let mut ops = Vec::new();

        parser.begin_frame(&data_frame(BitFlags::empty())).unwrap();
        parser.parse(Bytes::from_static(b"\x00\x00\x00"), &mut ops).unwrap();
        parser.parse(Bytes::from_static(b"\x00\x05he"), &mut ops).unwrap();
        assert!(!parser.end_stream());

        parser.begin_frame(&data_frame(DataFlags::EndStream.into())).unwrap();
        parser.parse(Bytes::from_static(b"llo"), &mut ops).unwrap();

        assert_eq!(
            ops,
            [
                DataOp::BeginMessage {
                    length: 5,
                    compressed: false
                },
                DataOp::Payload(Bytes::from_static(b"he")),
                DataOp::Payload(Bytes::from_static(b"llo")),
            ]
        );
        assert!(parser.is_at_message_boundary());
    }

    #[test]
    fn test_padded_flag_is_a_stream_error() {
        let mut parser = DataParser::default();
        let err = parser
            .begin_frame(&data_frame(DataFlags::Padded | DataFlags::EndStream))
            .unwrap_err();
        assert_eq!(err, H2StreamError::UnsupportedDataFlags { flags: 0x09 });
    }

    #[test]
    fn test_unknown_flag_bits_are_rejected() {
        let mut parser = DataParser::default();
        let frame = Frame::new(
            FrameType::Unknown(EncodedFrameType { ty: 0, flags: 0x40 }),
            StreamId(1),
        );
        assert!(parser.begin_frame(&frame).is_err());
    }

    #[test]
    fn test_bad_message_type_is_sticky() {
        let mut parser = DataParser::default();
        let mut ops = Vec::new();
        parser.begin_frame(&data_frame(BitFlags::empty())).unwrap();

        let err = parser
            .parse(Bytes::from_static(b"\x02\x00\x00\x00\x00"), &mut ops)
            .unwrap_err();
        assert_eq!(err, H2StreamError::BadGrpcFrameType { frame_type: 2 });
        assert!(ops.is_empty());

        assert_eq!(
            parser.parse(Bytes::from_static(b"\x00"), &mut ops),
            Err(H2StreamError::BadGrpcFrameType { frame_type: 2 })
        );
    }
}
