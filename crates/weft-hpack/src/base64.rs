//! Base64 for binary header values (keys ending in `-bin`). Values arrive
//! base64 encoded on the wire, with or without `=` padding, and are stored
//! and emitted decoded.

/// Value of each input octet: 0-63 for the alphabet, 64 for `=` (skipped),
/// 255 for anything else.
static INVERSE: [u8; 256] = build_inverse();

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const fn build_inverse() -> [u8; 256] {
    let mut table = [255u8; 256];
    let mut i = 0;
    while i < 64 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table[b'=' as usize] = 64;
    table
}

/// Header names ending in this suffix carry binary values.
pub const BINARY_SUFFIX: &[u8] = b"-bin";

pub fn is_binary_header(name: &[u8]) -> bool {
    name.ends_with(BINARY_SUFFIX)
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Base64DecodingError {
    #[error("Illegal base64 character {0:#04x}")]
    IllegalCharacter(u8),
    /// A lone symbol can't make up an octet.
    #[error("Illegal base64 encoding")]
    IllegalEncoding,
    #[error("Trailing bits in base64 encoding: {0:#x}")]
    TrailingBits(u32),
}

/// Which symbol of the current 4-symbol group comes next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Group {
    #[default]
    Byte0,
    Byte1,
    Byte2,
    Byte3,
}

/// Resumable decoder: symbols can be pushed one at a time, across as many
/// input buffers as needed.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Base64Decoder {
    group: Group,
    bits: u32,
}

impl Base64Decoder {
    pub(crate) fn push(&mut self, symbol: u8, out: &mut Vec<u8>) -> Result<(), Base64DecodingError> {
        let value = match INVERSE[symbol as usize] {
            255 => return Err(Base64DecodingError::IllegalCharacter(symbol)),
            64 => return Ok(()),
            v => v as u32,
        };

        self.group = match self.group {
            Group::Byte0 => {
                self.bits = value << 18;
                Group::Byte1
            }
            Group::Byte1 => {
                self.bits |= value << 12;
                Group::Byte2
            }
            Group::Byte2 => {
                self.bits |= value << 6;
                Group::Byte3
            }
            Group::Byte3 => {
                self.bits |= value;
                out.extend_from_slice(&[
                    (self.bits >> 16) as u8,
                    (self.bits >> 8) as u8,
                    self.bits as u8,
                ]);
                Group::Byte0
            }
        };
        Ok(())
    }

    /// Flushes a trailing partial group, which must end on an octet boundary.
    pub(crate) fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), Base64DecodingError> {
        let group = std::mem::take(&mut self.group);
        let bits = self.bits;
        self.bits = 0;

        match group {
            Group::Byte0 => Ok(()),
            Group::Byte1 => Err(Base64DecodingError::IllegalEncoding),
            Group::Byte2 => {
                if bits & 0xffff != 0 {
                    return Err(Base64DecodingError::TrailingBits(bits & 0xffff));
                }
                out.push((bits >> 16) as u8);
                Ok(())
            }
            Group::Byte3 => {
                if bits & 0xff != 0 {
                    return Err(Base64DecodingError::TrailingBits(bits & 0xff));
                }
                out.extend_from_slice(&[(bits >> 16) as u8, (bits >> 8) as u8]);
                Ok(())
            }
        }
    }
}

/// Unpadded base64, used by the encoder for binary header values.
pub(crate) fn encode(input: &[u8], out: &mut Vec<u8>) {
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let bits = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        let symbols = chunk.len() + 1;
        for i in 0..symbols {
            out.push(ALPHABET[((bits >> (18 - 6 * i)) & 0x3f) as usize]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{encode, is_binary_header, Base64Decoder, Base64DecodingError};

    fn decode(input: &[u8]) -> Result<Vec<u8>, Base64DecodingError> {
        let mut decoder = Base64Decoder::default();
        let mut out = Vec::new();
        for &symbol in input {
            decoder.push(symbol, &mut out)?;
        }
        decoder.finish(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_decode_full_and_partial_groups() {
        assert_eq!(decode(b"").unwrap(), b"");
        assert_eq!(decode(b"Zm9v").unwrap(), b"foo");
        assert_eq!(decode(b"Zm9vYg").unwrap(), b"foob");
        assert_eq!(decode(b"Zm9vYg==").unwrap(), b"foob");
        assert_eq!(decode(b"Zm9vYmE").unwrap(), b"fooba");
        assert_eq!(decode(b"Zm9vYmE=").unwrap(), b"fooba");
        assert_eq!(decode(b"AAEC/w").unwrap(), [0u8, 1, 2, 255]);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(
            decode(b"Zm9v!"),
            Err(Base64DecodingError::IllegalCharacter(b'!'))
        );
        assert_eq!(decode(b"Zm9vY"), Err(Base64DecodingError::IllegalEncoding));
        // 'Zh' leaves non-zero bits after the first octet
        assert_eq!(decode(b"Zh"), Err(Base64DecodingError::TrailingBits(0x1000)));
        assert_eq!(decode(b"Zm8"), Ok(b"fo".to_vec()));
        assert_eq!(decode(b"Zm9vYmF"), Err(Base64DecodingError::TrailingBits(0x40)));
    }

    #[test]
    fn test_encode_unpadded() {
        let mut out = Vec::new();
        encode(b"fooba", &mut out);
        assert_eq!(out, b"Zm9vYmE");

        for len in 0..40 {
            let input: Vec<u8> = (0..len).map(|i| (i * 37) as u8).collect();
            let mut encoded = Vec::new();
            encode(&input, &mut encoded);
            assert_eq!(decode(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn test_binary_header_names() {
        assert!(is_binary_header(b"grpc-status-details-bin"));
        assert!(!is_binary_header(b"content-type"));
        assert!(!is_binary_header(b"bin"));
    }
}
