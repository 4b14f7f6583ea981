//! Blocks produced by the encoder, decoded by a decoder following the same
//! connection.

mod helpers;

use pretty_assertions::assert_eq;
use weft_hpack::{Decoder, DecoderError, Encoder};

use helpers::{decode_chunked, headers, setup_tracing, HeaderList};

fn request(path: &str, id: &str) -> HeaderList {
    headers(&[
        (":method", "POST"),
        (":scheme", "https"),
        (":path", path),
        (":authority", "weft.example"),
        ("content-type", "application/grpc"),
        ("te", "trailers"),
        ("x-request-id", id),
    ])
}

fn as_slices(list: &HeaderList) -> Vec<(&[u8], &[u8])> {
    list.iter().map(|(n, v)| (&n[..], &v[..])).collect()
}

#[test]
fn repeated_requests_shrink() {
    setup_tracing();

    let mut encoder = Encoder::new();
    let mut decoder = Decoder::new();

    let mut sizes = Vec::new();
    for i in 0..8 {
        let list = request("/echo.Echo/Say", &format!("req-{i}"));
        let block = encoder.encode(as_slices(&list));
        sizes.push(block.len());

        assert_eq!(decode_chunked(&mut decoder, &block, 5).unwrap(), list);
    }

    // Everything but the request id is indexed after the first block.
    assert!(sizes[1] < sizes[0] / 2, "{sizes:?}");
    assert_eq!(
        encoder.header_table().dynamic_table.to_vec(),
        decoder.header_table().dynamic_table.to_vec()
    );
}

#[test]
fn with_and_without_huffman() {
    setup_tracing();

    for huffman in [false, true] {
        let mut encoder = Encoder::new();
        encoder.set_huffman(huffman);
        let mut decoder = Decoder::new();

        let list = headers(&[
            (":status", "200"),
            ("grpc-encoding", "identity"),
            ("x-long", &"0123456789abcdef".repeat(20)),
        ]);
        let block = encoder.encode(as_slices(&list));
        assert_eq!(decoder.decode(&block).unwrap(), list);
    }
}

#[test]
fn binary_headers() {
    setup_tracing();

    let mut encoder = Encoder::new();
    let mut decoder = Decoder::new();

    let details: Vec<u8> = (0..=255u8).collect();
    let list = vec![
        (b"grpc-status".to_vec(), b"3".to_vec()),
        (b"grpc-status-details-bin".to_vec(), details),
    ];

    for _ in 0..2 {
        let block = encoder.encode(as_slices(&list));
        assert_eq!(decode_chunked(&mut decoder, &block, 3).unwrap(), list);
    }
}

#[test]
fn table_size_changes() {
    setup_tracing();

    let mut encoder = Encoder::new();
    let mut decoder = Decoder::new();

    let list = request("/a", "1");
    decoder.decode(&encoder.encode(as_slices(&list))).unwrap();
    assert!(!decoder.header_table().dynamic_table.is_empty());

    encoder.set_max_table_size(0);
    encoder.set_max_table_size(1024);
    let block = encoder.encode(as_slices(&list));
    assert_eq!(decoder.decode(&block).unwrap(), list);
    assert_eq!(
        decoder.header_table().dynamic_table.get_max_table_size(),
        1024
    );
    assert_eq!(
        encoder.header_table().dynamic_table.to_vec(),
        decoder.header_table().dynamic_table.to_vec()
    );
}

#[test]
fn table_size_above_our_limit() {
    setup_tracing();

    let mut encoder = Encoder::new();
    encoder.set_max_table_size(8192);
    let block = encoder.encode(as_slices(&request("/a", "1")));

    let mut decoder = Decoder::new();
    assert_eq!(
        decoder.decode(&block),
        Err(DecoderError::InvalidMaxDynamicSize)
    );

    let mut decoder = Decoder::new();
    decoder.set_max_allowed_table_size(8192);
    assert_eq!(decoder.decode(&block).unwrap(), request("/a", "1"));
}

#[test]
fn block_split_mid_field_is_an_error() {
    setup_tracing();

    let mut encoder = Encoder::new();
    let block = encoder.encode(as_slices(&request("/a", "1")));

    for cut in 1..block.len() {
        let mut decoder = Decoder::new();
        let mut seen = 0;
        decoder.parse(&block[..cut], |_, _| seen += 1).unwrap();
        if decoder.is_at_field_boundary() {
            decoder.end_block().unwrap();
        } else {
            assert!(decoder.end_block().is_err(), "cut at {cut}");
            // and it stays that way
            assert!(decoder.parse(&block[cut..], |_, _| {}).is_err());
        }
        assert!(seen < 7);
    }
}
