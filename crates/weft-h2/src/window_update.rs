//! See <https://httpwg.org/specs/rfc9113.html#WINDOW_UPDATE>

use tracing::debug;

use crate::{
    error::H2ConnectionError,
    frame::{Frame, RawFrameType, StreamId},
    transport::TransportParsing,
};

const WINDOW_UPDATE_LEN: u32 = 4;

/// Reads the 4-byte increment of a WINDOW_UPDATE frame and credits it to
/// the stream the frame names, or to the connection for stream 0.
#[derive(Debug)]
pub struct WindowUpdateParser {
    stream_id: StreamId,
    byte: u8,
    amount: u32,
}

impl WindowUpdateParser {
    pub fn begin_frame(
        frame: &Frame,
        transport: &mut TransportParsing,
    ) -> Result<Self, H2ConnectionError> {
        transport.check_not_mid_header_block(frame)?;

        let flags = frame.raw_flags();
        if flags != 0 {
            return Err(H2ConnectionError::WindowUpdateInvalidFlags { flags });
        }
        if frame.len != WINDOW_UPDATE_LEN {
            return Err(H2ConnectionError::WindowUpdateInvalidLength { len: frame.len });
        }

        Ok(Self {
            stream_id: frame.stream_id,
            byte: 0,
            amount: 0,
        })
    }

    pub fn parse(
        &mut self,
        transport: &mut TransportParsing,
        slice: &[u8],
        is_last: bool,
    ) -> Result<(), H2ConnectionError> {
        for &b in slice {
            if self.byte == WINDOW_UPDATE_LEN as u8 {
                break;
            }
            self.amount = (self.amount << 8) | b as u32;
            self.byte += 1;
        }

        if !is_last {
            return Ok(());
        }
        if self.byte != WINDOW_UPDATE_LEN as u8 {
            return Err(H2ConnectionError::IncompleteFrame {
                frame_type: RawFrameType::WindowUpdate,
                frame_size: WINDOW_UPDATE_LEN,
            });
        }

        let increment = self.amount;
        if increment & 0x8000_0000 != 0 {
            return Err(H2ConnectionError::WindowUpdateReservedBit { raw: increment });
        }
        if increment == 0 {
            return Err(H2ConnectionError::WindowUpdateZeroIncrement);
        }

        if self.stream_id.is_connection() {
            transport.outgoing_window_update += increment as u64;
            debug!(increment, "connection window update");
        } else if let Some(stream) = transport.streams.get_mut(&self.stream_id) {
            stream.outgoing_window_update += increment as u64;
            debug!(stream_id = %self.stream_id, increment, "stream window update");
        } else {
            debug!(stream_id = %self.stream_id, increment, "window update for unknown stream");
        }
        Ok(())
    }
}
