//! Corpus container constants and the byte-aligned file header.
//!
//! ## Layout
//!
//! ```text
//! header   'G' 'L' 'B' level      4 bytes, byte-aligned; level is an ASCII
//!                                 digit 1..9, max uncompressed block size
//!                                 is level * 100_000 bytes
//! block    magic      48 bits     0x2718_2818_2845
//!          raw_len    32 bits     uncompressed payload length, > 0
//!          comp_len   32 bits     compressed payload length, > 0
//!          crc        32 bits     CRC-32 of the uncompressed payload
//!          payload    comp_len * 8 bits, raw DEFLATE
//! footer   magic      48 bits     0x1618_0339_8874
//!          crc        32 bits     combined stream CRC
//!          padding    0..7 bits   zeros to the next byte boundary
//! ```
//!
//! Blocks and the footer are packed back to back with no byte padding, so
//! every frame after the first generally starts mid-byte. All fields are
//! MSB-first. The combined CRC folds each block CRC into a running value
//! with [`combine_crc`], starting from zero.

use std::io;

/// File header magic; followed by the block-size level digit.
pub const HEADER_MAGIC: [u8; 3] = *b"GLB";

/// Total header length in bytes.
pub const HEADER_LEN: usize = 4;

/// Header length in bits; the first block starts here.
pub const HEADER_BITS: u64 = HEADER_LEN as u64 * 8;

/// Block start marker (leading digits of e).
pub const BLOCK_MAGIC: u64 = 0x2718_2818_2845;

/// End-of-stream marker (leading digits of phi).
pub const END_MAGIC: u64 = 0x1618_0339_8874;

/// Width of both magics in bits.
pub const MAGIC_BITS: u32 = 48;

/// Width of the `raw_len`, `comp_len` and `crc` fields in bits.
pub const FIELD_BITS: u32 = 32;

/// Bits in a block frame before the payload.
pub const BLOCK_HEADER_BITS: u64 = MAGIC_BITS as u64 + 3 * FIELD_BITS as u64;

/// Bits in the footer before padding.
pub const FOOTER_BITS: u64 = MAGIC_BITS as u64 + FIELD_BITS as u64;

/// Uncompressed block size granularity per level digit.
pub const BLOCK_SIZE_UNIT: usize = 100_000;

/// Smallest possible corpus: the header plus an empty footer.
pub const MIN_CORPUS_LEN: u64 = HEADER_LEN as u64 + (FOOTER_BITS + 7) / 8;

const _: () = assert!(BLOCK_HEADER_BITS == 144);
const _: () = assert!(FOOTER_BITS == 80);
const _: () = assert!(MIN_CORPUS_LEN == 14);

/// Fold one block CRC into the running combined stream CRC.
#[inline]
pub fn combine_crc(combined: u32, block_crc: u32) -> u32 {
    combined.rotate_left(1) ^ block_crc
}

/// Parsed file header: just the block-size level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusHeader {
    level: u8,
}

impl CorpusHeader {
    /// `level` must be 1..=9.
    pub fn new(level: u8) -> io::Result<Self> {
        if !(1..=9).contains(&level) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid block-size level {level} (expected 1..=9)"),
            ));
        }
        Ok(Self { level })
    }

    /// Parse and validate the 4-byte header at the start of `data`.
    pub fn parse(data: &[u8]) -> io::Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "corpus too small for header",
            ));
        }
        if data[..3] != HEADER_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "corpus header: invalid magic",
            ));
        }
        let marker = data[3];
        if !marker.is_ascii_digit() || marker == b'0' {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "corpus header: invalid block-size marker {:?}",
                    marker as char
                ),
            ));
        }
        Ok(Self {
            level: marker - b'0',
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        [b'G', b'L', b'B', b'0' + self.level]
    }

    #[inline]
    pub fn level(self) -> u8 {
        self.level
    }

    /// Maximum uncompressed payload bytes per block.
    #[inline]
    pub fn block_size(self) -> usize {
        self.level as usize * BLOCK_SIZE_UNIT
    }
}
