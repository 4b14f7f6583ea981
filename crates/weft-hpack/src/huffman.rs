//! Huffman coding of HPACK string literals (RFC 7541, Appendix B).
//!
//! Decoding walks the code tree four bits at a time. For every interior
//! node of the tree (there are exactly 256 of them) and every nibble, a
//! `next` table gives the node reached after those four bits and an `emit`
//! table gives the symbol completed on the way, if any. No code is shorter
//! than five bits, so a nibble completes at most one symbol. This keeps
//! decoding O(1) per nibble no matter how long the codes are, and lets a
//! decoder stop after any byte and pick up again later.

use std::sync::OnceLock;

use tracing::trace;

/// The end-of-string symbol. It must never appear in an encoded string.
const EOS: u16 = 256;

/// Marker in the emit table for "no symbol completed".
const NO_SYMBOL: u16 = u16::MAX;

/// `(code, bit length)` for every symbol, codes right-aligned.
static CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HuffmanDecoderError {
    /// Any padding strictly larger than 7 bits MUST be interpreted as an error
    #[error("Padding too large")]
    PaddingTooLarge,
    /// Any padding that does not correspond to the most significant bits of
    /// EOS MUST be interpreted as an error.
    #[error("Invalid padding")]
    InvalidPadding,
    /// If EOS is ever found in the string, it causes an error.
    #[error("EOS in string")]
    EOSInString,
}

/// What it means for a string to end while the decoder sits on a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Tail {
    /// Root, or up to 7 bits down the all-ones path: valid padding.
    Accepting,
    /// Further down the all-ones path.
    TooLong,
    /// Anywhere else: the leftover bits are not an EOS prefix.
    Invalid,
}

struct NibbleTables {
    next: [[u8; 16]; 256],
    emit: [[u16; 16]; 256],
    tail: [Tail; 256],
}

#[derive(Clone, Copy)]
enum Child {
    Empty,
    Node(u8),
    Leaf(u16),
}

impl NibbleTables {
    fn get() -> &'static NibbleTables {
        static TABLES: OnceLock<NibbleTables> = OnceLock::new();
        TABLES.get_or_init(NibbleTables::build)
    }

    fn build() -> NibbleTables {
        // interior nodes of the code tree, root first
        let mut tree: Vec<[Child; 2]> = vec![[Child::Empty; 2]];
        for (symbol, &(code, len)) in CODES.iter().enumerate() {
            let mut node = 0;
            for shift in (0..len).rev() {
                let bit = ((code >> shift) & 1) as usize;
                if shift == 0 {
                    tree[node][bit] = Child::Leaf(symbol as u16);
                    break;
                }
                node = match tree[node][bit] {
                    Child::Node(n) => n as usize,
                    _ => {
                        tree.push([Child::Empty; 2]);
                        let n = tree.len() - 1;
                        tree[node][bit] = Child::Node(n as u8);
                        n
                    }
                };
            }
        }
        debug_assert_eq!(tree.len(), 256);

        let mut next = [[0u8; 16]; 256];
        let mut emit = [[NO_SYMBOL; 16]; 256];
        for state in 0..tree.len() {
            for nibble in 0..16u8 {
                let mut node = state;
                let mut symbol = NO_SYMBOL;
                for shift in (0..4).rev() {
                    let bit = ((nibble >> shift) & 1) as usize;
                    match tree[node][bit] {
                        Child::Node(n) => node = n as usize,
                        Child::Leaf(s) => {
                            symbol = s;
                            node = 0;
                        }
                        Child::Empty => node = 0,
                    }
                }
                next[state][nibble as usize] = node as u8;
                emit[state][nibble as usize] = symbol;
            }
        }

        let mut tail = [Tail::Invalid; 256];
        let mut node = 0;
        let mut depth = 0;
        loop {
            tail[node] = if depth <= 7 {
                Tail::Accepting
            } else {
                Tail::TooLong
            };
            match tree[node][1] {
                Child::Node(n) => {
                    node = n as usize;
                    depth += 1;
                }
                _ => break,
            }
        }

        NibbleTables { next, emit, tail }
    }
}

/// Resumable Huffman decoder: feed it whole bytes, then call
/// [`HuffmanDecoder::finish`] once the string's last byte went in.
#[derive(Debug, Default, Clone, Copy)]
pub struct HuffmanDecoder {
    state: u8,
}

impl HuffmanDecoder {
    pub fn new() -> HuffmanDecoder {
        Default::default()
    }

    /// Decodes one input byte (two nibbles, high first), handing each
    /// completed symbol to `emit`.
    pub fn feed<E>(
        &mut self,
        byte: u8,
        mut emit: impl FnMut(u8) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<HuffmanDecoderError>,
    {
        let tables = NibbleTables::get();
        for nibble in [byte >> 4, byte & 0xf] {
            let state = self.state as usize;
            match tables.emit[state][nibble as usize] {
                NO_SYMBOL => {}
                EOS => return Err(HuffmanDecoderError::EOSInString.into()),
                symbol => emit(symbol as u8)?,
            }
            self.state = tables.next[state][nibble as usize];
        }
        Ok(())
    }

    /// Checks the trailing bits of the string are valid padding, and resets
    /// the decoder.
    pub fn finish(&mut self) -> Result<(), HuffmanDecoderError> {
        let tail = NibbleTables::get().tail[self.state as usize];
        self.state = 0;
        match tail {
            Tail::Accepting => Ok(()),
            Tail::TooLong => Err(HuffmanDecoderError::PaddingTooLarge),
            Tail::Invalid => Err(HuffmanDecoderError::InvalidPadding),
        }
    }

    /// Decodes a complete string.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<u8>, HuffmanDecoderError> {
        let mut out = Vec::with_capacity(buf.len() * 8 / 5);
        for &byte in buf {
            self.feed(byte, |b| {
                out.push(b);
                Ok::<_, HuffmanDecoderError>(())
            })?;
        }
        self.finish()?;
        Ok(out)
    }
}

/// Number of octets `input` takes once Huffman coded.
pub fn encoded_len(input: &[u8]) -> usize {
    let bits: usize = input.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    (bits + 7) / 8
}

/// Huffman codes `input` onto the end of `out`, padding the last octet with
/// the most significant bits of EOS.
pub fn encode(input: &[u8], out: &mut Vec<u8>) {
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in input {
        let (code, len) = CODES[byte as usize];
        acc = (acc << len) | code as u64;
        bits += len as u32;
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }

    if bits > 0 {
        out.push(((acc << (8 - bits)) as u8) | (0xffu8 >> bits));
    }
    trace!(input_len = input.len(), "huffman encoded string");
}
