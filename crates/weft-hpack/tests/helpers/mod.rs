mod tracing_common;

pub(crate) use tracing_common::setup_tracing;

pub(crate) type HeaderList = Vec<(Vec<u8>, Vec<u8>)>;

pub(crate) fn headers(list: &[(&str, &str)]) -> HeaderList {
    list.iter()
        .map(|(n, v)| (n.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

/// Feeds `block` to `decoder` in `chunk_size` pieces, then ends the block.
pub(crate) fn decode_chunked(
    decoder: &mut weft_hpack::Decoder,
    block: &[u8],
    chunk_size: usize,
) -> Result<HeaderList, weft_hpack::DecoderError> {
    let mut list = Vec::new();
    for chunk in block.chunks(chunk_size) {
        decoder.parse(chunk, |n, v| list.push((n.into_owned(), v.into_owned())))?;
    }
    decoder.end_block()?;
    Ok(list)
}
