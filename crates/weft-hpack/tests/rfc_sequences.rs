//! The header block sequences of RFC 7541, Appendix C, decoded with every
//! block split into pieces of various sizes.

mod helpers;

use pretty_assertions::assert_eq;
use weft_hpack::Decoder;

use helpers::{decode_chunked, headers, setup_tracing, HeaderList};

struct Step {
    block: &'static str,
    headers: &'static [(&'static str, &'static str)],
    table: &'static [(&'static str, &'static str)],
}

const CHUNK_SIZES: &[usize] = &[1, 2, 3, 7, 4096];

fn run_sequence(table_size: Option<usize>, steps: &[Step]) {
    setup_tracing();

    for &chunk_size in CHUNK_SIZES {
        let mut decoder = Decoder::new();
        if let Some(size) = table_size {
            decoder.set_max_table_size(size);
        }

        for (i, step) in steps.iter().enumerate() {
            let block = hex::decode(step.block).unwrap();
            let decoded: HeaderList = decode_chunked(&mut decoder, &block, chunk_size)
                .unwrap_or_else(|e| panic!("block {i}, chunk size {chunk_size}: {e}"));
            assert_eq!(decoded, headers(step.headers), "block {i}, chunk size {chunk_size}");
            assert_eq!(
                decoder.header_table().dynamic_table.to_vec(),
                headers(step.table),
                "table after block {i}, chunk size {chunk_size}"
            );
        }
    }
}

const DATE_21: &str = "Mon, 21 Oct 2013 20:13:21 GMT";
const DATE_22: &str = "Mon, 21 Oct 2013 20:13:22 GMT";
const LOCATION: &str = "https://www.example.com";
const COOKIE: &str = "foo=ASDJKHQKBZXOQWEOPIUAXQWEOIU; max-age=3600; version=1";

fn request_steps(first: &'static str, second: &'static str, third: &'static str) -> [Step; 3] {
    [
        Step {
            block: first,
            headers: &[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ],
            table: &[(":authority", "www.example.com")],
        },
        Step {
            block: second,
            headers: &[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ],
            table: &[
                ("cache-control", "no-cache"),
                (":authority", "www.example.com"),
            ],
        },
        Step {
            block: third,
            headers: &[
                (":method", "GET"),
                (":scheme", "https"),
                (":path", "/index.html"),
                (":authority", "www.example.com"),
                ("custom-key", "custom-value"),
            ],
            table: &[
                ("custom-key", "custom-value"),
                ("cache-control", "no-cache"),
                (":authority", "www.example.com"),
            ],
        },
    ]
}

fn response_steps(first: &'static str, second: &'static str, third: &'static str) -> [Step; 3] {
    [
        Step {
            block: first,
            headers: &[
                (":status", "302"),
                ("cache-control", "private"),
                ("date", DATE_21),
                ("location", LOCATION),
            ],
            table: &[
                ("location", LOCATION),
                ("date", DATE_21),
                ("cache-control", "private"),
                (":status", "302"),
            ],
        },
        Step {
            block: second,
            headers: &[
                (":status", "307"),
                ("cache-control", "private"),
                ("date", DATE_21),
                ("location", LOCATION),
            ],
            table: &[
                (":status", "307"),
                ("location", LOCATION),
                ("date", DATE_21),
                ("cache-control", "private"),
            ],
        },
        Step {
            block: third,
            headers: &[
                (":status", "200"),
                ("cache-control", "private"),
                ("date", DATE_22),
                ("location", LOCATION),
                ("content-encoding", "gzip"),
                ("set-cookie", COOKIE),
            ],
            table: &[
                ("set-cookie", COOKIE),
                ("content-encoding", "gzip"),
                ("date", DATE_22),
            ],
        },
    ]
}

#[test]
fn requests_without_huffman() {
    run_sequence(
        None,
        &request_steps(
            "828684410f7777772e6578616d706c652e636f6d",
            "828684be58086e6f2d6361636865",
            "828785bf400a637573746f6d2d6b65790c637573746f6d2d76616c7565",
        ),
    );
}

#[test]
fn requests_with_huffman() {
    run_sequence(
        None,
        &request_steps(
            "828684418cf1e3c2e5f23a6ba0ab90f4ff",
            "828684be5886a8eb10649cbf",
            "828785bf408825a849e95ba97d7f8925a849e95bb8e8b4bf",
        ),
    );
}

#[test]
fn responses_without_huffman() {
    run_sequence(
        Some(256),
        &response_steps(
            "4803333032580770726976617465611d4d6f6e2c203231204f637420323031332032303a31333a323120474d546e1768747470733a2f2f7777772e6578616d706c652e636f6d",
            "4803333037c1c0bf",
            "88c1611d4d6f6e2c203231204f637420323031332032303a31333a323220474d54c05a04677a69707738666f6f3d4153444a4b48514b425a584f5157454f50495541585157454f49553b206d61782d6167653d333630303b2076657273696f6e3d31",
        ),
    );
}

#[test]
fn responses_with_huffman() {
    run_sequence(
        Some(256),
        &response_steps(
            "488264025885aec3771a4b6196d07abe941054d444a8200595040b8166e082a62d1bff6e919d29ad171863c78f0b97c8e9ae82ae43d3",
            "4883640effc1c0bf",
            "88c16196d07abe941054d444a8200595040b8166e084a62d1bffc05a839bd9ab77ad94e7821dd7f2e6c7b335dfdfcd5b3960d5af27087f3672c1ab270fb5291f9587316065c003ed4ee5b1063d5007",
        ),
    );
}
