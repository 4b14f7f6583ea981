//! See <https://httpwg.org/specs/rfc9113.html#PING>

use tracing::debug;

use crate::{
    error::H2ConnectionError,
    frame::{Frame, RawFrameType, StreamId},
    transport::TransportParsing,
    write,
};

/// Length of the opaque data every PING carries.
pub const PING_PAYLOAD_LEN: u32 = 8;

/// Collects the 8 opaque bytes of a PING frame, then either echoes them
/// back or acknowledges one of our own pings.
#[derive(Debug)]
pub struct PingParser {
    is_ack: bool,
    byte: usize,
    opaque_8bytes: [u8; 8],
}

impl PingParser {
    pub fn begin_frame(
        frame: &Frame,
        transport: &mut TransportParsing,
    ) -> Result<Self, H2ConnectionError> {
        transport.check_not_mid_header_block(frame)?;

        if frame.stream_id != StreamId::CONNECTION {
            return Err(H2ConnectionError::PingFrameWithNonZeroStreamId {
                stream_id: frame.stream_id,
            });
        }

        let flags = frame.raw_flags();
        if flags & 0xfe != 0 {
            return Err(H2ConnectionError::PingFrameInvalidFlags { flags });
        }
        if frame.len != PING_PAYLOAD_LEN {
            return Err(H2ConnectionError::PingFrameInvalidLength { len: frame.len });
        }

        Ok(Self {
            is_ack: flags & 0x01 != 0,
            byte: 0,
            opaque_8bytes: [0; 8],
        })
    }

    pub fn parse(
        &mut self,
        transport: &mut TransportParsing,
        slice: &[u8],
        is_last: bool,
    ) -> Result<(), H2ConnectionError> {
        let n = slice.len().min(self.opaque_8bytes.len() - self.byte);
        self.opaque_8bytes[self.byte..][..n].copy_from_slice(&slice[..n]);
        self.byte += n;

        if !is_last {
            return Ok(());
        }
        if self.byte != self.opaque_8bytes.len() {
            return Err(H2ConnectionError::IncompleteFrame {
                frame_type: RawFrameType::Ping,
                frame_size: PING_PAYLOAD_LEN,
            });
        }

        if self.is_ack {
            transport.ack_ping(self.opaque_8bytes);
        } else {
            debug!(payload = ?self.opaque_8bytes, "answering ping");
            transport.queue(write::ping_frame(self.opaque_8bytes, true)?);
        }
        Ok(())
    }
}
