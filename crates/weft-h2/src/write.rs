//! Whole control frames, header and payload, ready to be queued.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use enumflags2::BitFlags;

use crate::{
    frame::{
        ErrorCode, Frame, FrameType, GoAway, PingFlags, RstStream, SettingsFlags, StreamId,
        WindowUpdate, FRAME_HEADER_LEN,
    },
    settings::Setting,
};

fn frame_with_payload(
    frame_type: FrameType,
    stream_id: StreamId,
    payload_len: usize,
    payload: impl FnOnce(&mut bytes::buf::Writer<BytesMut>) -> std::io::Result<()>,
) -> std::io::Result<Bytes> {
    let mut w = BytesMut::with_capacity(FRAME_HEADER_LEN + payload_len).writer();
    Frame::new(frame_type, stream_id)
        .with_len(payload_len as u32)
        .write_into(&mut w)?;
    payload(&mut w)?;
    Ok(w.into_inner().freeze())
}

pub fn settings_frame(
    pairs: impl IntoIterator<Item = (Setting, u32)>,
) -> std::io::Result<Bytes> {
    let mut payload = Vec::new();
    for (id, value) in pairs {
        payload.write_u16::<BigEndian>(id.repr())?;
        payload.write_u32::<BigEndian>(value)?;
    }
    frame_with_payload(
        FrameType::Settings(BitFlags::empty()),
        StreamId::CONNECTION,
        payload.len(),
        |w| w.write_all(&payload),
    )
}

pub fn settings_ack_frame() -> std::io::Result<Bytes> {
    frame_with_payload(
        FrameType::Settings(SettingsFlags::Ack.into()),
        StreamId::CONNECTION,
        0,
        |_| Ok(()),
    )
}

pub fn ping_frame(opaque_8bytes: [u8; 8], ack: bool) -> std::io::Result<Bytes> {
    let flags = if ack {
        PingFlags::Ack.into()
    } else {
        BitFlags::empty()
    };
    frame_with_payload(FrameType::Ping(flags), StreamId::CONNECTION, 8, |w| {
        w.write_all(&opaque_8bytes)
    })
}

pub fn rst_stream_frame(
    stream_id: StreamId,
    error_code: impl Into<ErrorCode>,
) -> std::io::Result<Bytes> {
    let payload = RstStream {
        error_code: error_code.into(),
    };
    frame_with_payload(FrameType::RstStream, stream_id, 4, |w| payload.write_into(w))
}

pub fn goaway_frame(
    last_stream_id: StreamId,
    error_code: impl Into<ErrorCode>,
    additional_debug_data: &[u8],
) -> std::io::Result<Bytes> {
    let payload = GoAway {
        last_stream_id,
        error_code: error_code.into(),
        additional_debug_data,
    };
    frame_with_payload(
        FrameType::GoAway,
        StreamId::CONNECTION,
        payload.len(),
        |w| payload.write_into(w),
    )
}

pub fn window_update_frame(stream_id: StreamId, increment: u32) -> std::io::Result<Bytes> {
    let payload = WindowUpdate {
        reserved: 0,
        increment,
    };
    frame_with_payload(FrameType::WindowUpdate, stream_id, 4, |w| {
        payload.write_into(w)
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        goaway_frame, ping_frame, rst_stream_frame, settings_ack_frame, settings_frame,
        window_update_frame,
    };
    use crate::{
        frame::{Frame, FrameType, KnownErrorCode, StreamId},
        settings::Setting,
    };

    #[test]
    fn test_settings_ack() {
        assert_eq!(
            &settings_ack_frame().unwrap()[..],
            [0, 0, 0, 0x04, 0x01, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_settings_pairs() {
        let frame = settings_frame([(Setting::InitialWindowSize, 0x0102_0304)]).unwrap();
        assert_eq!(
            &frame[..],
            [0, 0, 6, 0x04, 0x00, 0, 0, 0, 0, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn test_ping_ack_echoes_payload() {
        let frame = ping_frame([1, 2, 3, 4, 5, 6, 7, 8], true).unwrap();
        assert_eq!(
            &frame[..],
            [0, 0, 8, 0x06, 0x01, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_rst_stream() {
        let frame = rst_stream_frame(StreamId(3), KnownErrorCode::Cancel).unwrap();
        assert_eq!(
            &frame[..],
            [0, 0, 4, 0x03, 0x00, 0, 0, 0, 3, 0, 0, 0, 0x08]
        );
    }

    #[test]
    fn test_goaway_with_debug_data() {
        let frame = goaway_frame(StreamId(5), KnownErrorCode::ProtocolError, b"bye").unwrap();
        let (payload, header) = Frame::parse(&frame).unwrap();
        assert_eq!(header.frame_type, FrameType::GoAway);
        assert_eq!(header.len, 11);
        assert_eq!(payload, [0, 0, 0, 5, 0, 0, 0, 1, b'b', b'y', b'e']);
    }

    #[test]
    fn test_window_update() {
        let frame = window_update_frame(StreamId(0), 0x7fff_ffff).unwrap();
        assert_eq!(
            &frame[..],
            [0, 0, 4, 0x08, 0x00, 0, 0, 0, 0, 0x7f, 0xff, 0xff, 0xff]
        );
    }
}
