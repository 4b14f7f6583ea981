//! Connection-wide parsing state: what the frame parsers read from and
//! write into.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;
use weft_hpack::Decoder;

use crate::{
    data::{DataOp, DataParser},
    error::{H2ConnectionError, H2ErrorLevel, H2StreamError},
    frame::{Frame, RawFrameType, StreamId},
    headers::{HeaderBlock, HeaderField, HeadersOrTrailers},
    settings::{Setting, Settings, SettingsTable},
    write,
};

type OnPingAck = Box<dyn FnOnce() + Send>;

struct OutstandingPing {
    id: [u8; 8],
    on_ack: OnPingAck,
}

/// Per-stream parsing state.
#[derive(Debug, Default)]
pub struct StreamParsing {
    pub(crate) header_frames_received: u8,
    pub(crate) initial_metadata: Vec<HeaderField>,
    pub(crate) trailing_metadata: Vec<HeaderField>,
    pub(crate) data_parser: DataParser,
    pub(crate) incoming_ops: Vec<DataOp>,
    pub(crate) received_close: bool,
    pub(crate) outgoing_window_update: u64,
    pub(crate) error: Option<H2StreamError>,
}

impl StreamParsing {
    pub(crate) fn metadata_mut(&mut self, target: HeadersOrTrailers) -> &mut Vec<HeaderField> {
        match target {
            HeadersOrTrailers::Headers => &mut self.initial_metadata,
            HeadersOrTrailers::Trailers => &mut self.trailing_metadata,
        }
    }

    pub fn initial_metadata(&self) -> &[HeaderField] {
        &self.initial_metadata
    }

    pub fn trailing_metadata(&self) -> &[HeaderField] {
        &self.trailing_metadata
    }

    /// True once the peer sent END_STREAM.
    pub fn received_close(&self) -> bool {
        self.received_close
    }

    /// Window credit granted by the peer and not yet taken.
    pub fn take_outgoing_window_update(&mut self) -> u64 {
        std::mem::take(&mut self.outgoing_window_update)
    }

    pub fn take_incoming_ops(&mut self) -> Vec<DataOp> {
        std::mem::take(&mut self.incoming_ops)
    }

    /// The stream-level error recorded while parsing header blocks, if any.
    pub fn error(&self) -> Option<&H2StreamError> {
        self.error.as_ref()
    }

    pub(crate) fn begin_data_frame(&mut self, frame: &Frame) -> Result<(), H2StreamError> {
        if self.received_close {
            return Err(H2StreamError::StreamClosed);
        }
        self.data_parser.begin_frame(frame)
    }

    /// Feeds a slice of a DATA frame's payload.
    pub fn parse_data(&mut self, slice: Bytes, is_last: bool) -> Result<(), H2StreamError> {
        self.data_parser.parse(slice, &mut self.incoming_ops)?;
        if is_last && self.data_parser.end_stream() {
            debug!("stream closed by peer");
            self.received_close = true;
        }
        Ok(())
    }
}

/// Everything the frame parsers of one connection share: settings in both
/// directions, the HPACK decoder, streams, pings in flight and the frames
/// queued in reply.
pub struct TransportParsing {
    pub(crate) hpack: Decoder,

    pub(crate) peer_settings: SettingsTable,
    pub(crate) local_settings: SettingsTable,
    pub(crate) settings_updated: bool,
    pub(crate) settings_ack_received: bool,
    pub(crate) initial_window_update: i64,

    pub(crate) outgoing_window_update: u64,
    pub(crate) streams: HashMap<StreamId, StreamParsing>,
    pub(crate) expect_continuation: Option<HeaderBlock>,

    pings: Vec<OutstandingPing>,
    qbuf: Vec<Bytes>,
}

impl Default for TransportParsing {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl TransportParsing {
    /// `local_settings` are the settings we advertise. Until the peer
    /// acknowledges them, the protocol defaults apply.
    pub fn new(local_settings: Settings) -> Self {
        Self {
            hpack: Decoder::new(),
            peer_settings: SettingsTable::default(),
            local_settings: SettingsTable::from(&local_settings),
            settings_updated: false,
            settings_ack_received: false,
            initial_window_update: 0,
            outgoing_window_update: 0,
            streams: HashMap::new(),
            expect_continuation: None,
            pings: Vec::new(),
            qbuf: Vec::new(),
        }
    }

    /// Queues our SETTINGS frame.
    pub fn send_settings(&mut self) -> Result<(), H2ConnectionError> {
        let frame = write::settings_frame(self.local_settings.pairs())?;
        self.queue(frame);
        Ok(())
    }

    /// Queues a PING; `on_ack` runs when the peer acknowledges it.
    pub fn send_ping(
        &mut self,
        id: [u8; 8],
        on_ack: impl FnOnce() + Send + 'static,
    ) -> Result<(), H2ConnectionError> {
        self.queue(write::ping_frame(id, false)?);
        self.pings.push(OutstandingPing {
            id,
            on_ack: Box::new(on_ack),
        });
        Ok(())
    }

    pub(crate) fn ack_ping(&mut self, id: [u8; 8]) {
        match self.pings.iter().position(|ping| ping.id == id) {
            Some(index) => {
                let ping = self.pings.remove(index);
                debug!(?id, "ping acknowledged");
                (ping.on_ack)();
            }
            None => debug!(?id, "ack for unknown ping"),
        }
    }

    pub fn outstanding_pings(&self) -> usize {
        self.pings.len()
    }

    pub(crate) fn on_settings_ack(&mut self) {
        debug!("settings acknowledged");
        self.settings_ack_received = true;
        self.hpack
            .set_max_allowed_table_size(self.local_settings.get(Setting::HeaderTableSize) as usize);
    }

    pub(crate) fn queue(&mut self, frame: Bytes) {
        self.qbuf.push(frame);
    }

    /// Frames waiting to be written, oldest first.
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.qbuf)
    }

    pub fn peer_settings(&self) -> Settings {
        Settings::from(&self.peer_settings)
    }

    /// True once a SETTINGS frame from the peer has been applied. Reading
    /// it clears it.
    pub fn take_settings_updated(&mut self) -> bool {
        std::mem::take(&mut self.settings_updated)
    }

    pub fn settings_ack_received(&self) -> bool {
        self.settings_ack_received
    }

    /// Change to every stream's send window caused by a new
    /// INITIAL_WINDOW_SIZE, since the last call.
    pub fn take_initial_window_update(&mut self) -> i64 {
        std::mem::take(&mut self.initial_window_update)
    }

    /// Connection-level window credit granted by the peer since the last
    /// call.
    pub fn take_outgoing_window_update(&mut self) -> u64 {
        std::mem::take(&mut self.outgoing_window_update)
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&StreamParsing> {
        self.streams.get(&stream_id)
    }

    pub fn stream_mut(&mut self, stream_id: StreamId) -> Option<&mut StreamParsing> {
        self.streams.get_mut(&stream_id)
    }

    pub fn stream_or_insert(&mut self, stream_id: StreamId) -> &mut StreamParsing {
        self.streams.entry(stream_id).or_default()
    }

    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<StreamParsing> {
        self.streams.remove(&stream_id)
    }

    pub fn hpack(&self) -> &Decoder {
        &self.hpack
    }

    /// Starts a DATA frame, returning the stream its payload goes to via
    /// [`StreamParsing::parse_data`].
    pub fn begin_data_frame(
        &mut self,
        frame: &Frame,
    ) -> Result<&mut StreamParsing, H2ErrorLevel> {
        self.check_not_mid_header_block(frame)?;
        if frame.stream_id.is_connection() {
            return Err(H2ConnectionError::StreamSpecificFrameToConnection {
                frame_type: RawFrameType::Data,
            }
            .into());
        }

        let stream = self.stream_or_insert(frame.stream_id);
        stream.begin_data_frame(frame)?;
        Ok(stream)
    }

    /// Only CONTINUATION frames may follow a HEADERS frame that didn't end
    /// its block.
    pub(crate) fn check_not_mid_header_block(&self, frame: &Frame) -> Result<(), H2ConnectionError> {
        match self.expect_continuation {
            Some(block) => Err(H2ConnectionError::ExpectedContinuationFrame {
                stream_id: block.stream_id,
                frame_type: RawFrameType::from_repr(frame.frame_type.encode().ty),
            }),
            None => Ok(()),
        }
    }
}
