//! The block offsets index: which doc ids live in which compressed block.
//!
//! Two parallel arrays plus an end sentinel: `first_doc_ids[i]` is the id of
//! the first record a lookup can read after entering block `i`, and
//! `block_bit_offsets[i]` is the absolute bit offset of block `i`'s frame.
//! `block_bit_offsets[block_count]` is the bit offset of the end-of-stream
//! magic, so every block has a bit range without a special case for the last
//! one.
//!
//! ## Sidecar format (`<corpus>.blockOffsets`)
//!
//! ```text
//! magic          "GBO1", 4 bytes
//! block_count    u32
//! record_count   u64
//! last_doc_id    u64
//! corpus_size    u64              corpus file length in bytes
//! first_doc_ids  u64 * block_count
//! bit_offsets    u64 * (block_count + 1)
//! ```
//!
//! All integers little-endian. Loading validates the magic, the exact file
//! length, and the monotonicity invariants; any mismatch refuses the sidecar
//! rather than serving wrong lookups.

use crate::format::block::{FOOTER_BITS, HEADER_BITS};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const SIDECAR_MAGIC: [u8; 4] = *b"GBO1";
const FIXED_HEADER_LEN: usize = 32;

/// Suffix appended to the corpus file name to form the sidecar name.
pub const SIDECAR_SUFFIX: &str = ".blockOffsets";

/// Sidecar path for a corpus: the full corpus file name with
/// [`SIDECAR_SUFFIX`] appended (not an extension swap).
pub fn block_offsets_path(corpus: &Path) -> PathBuf {
    let mut name = corpus.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// In-memory block offsets index.
#[derive(Debug, Clone)]
pub struct BlockOffsets {
    first_doc_ids: Vec<u64>,
    block_bit_offsets: Vec<u64>,
    record_count: u64,
    last_doc_id: u64,
    corpus_size_bytes: u64,
}

impl BlockOffsets {
    /// Assemble an index, validating its invariants.
    pub fn new(
        first_doc_ids: Vec<u64>,
        block_bit_offsets: Vec<u64>,
        record_count: u64,
        last_doc_id: u64,
        corpus_size_bytes: u64,
    ) -> io::Result<Self> {
        let this = Self {
            first_doc_ids,
            block_bit_offsets,
            record_count,
            last_doc_id,
            corpus_size_bytes,
        };
        this.validate()?;
        Ok(this)
    }

    fn validate(&self) -> io::Result<()> {
        if self.block_bit_offsets.len() != self.first_doc_ids.len() + 1 {
            return Err(invalid_data(format!(
                "block offsets index: {} blocks but {} bit offsets",
                self.first_doc_ids.len(),
                self.block_bit_offsets.len()
            )));
        }
        if self.block_bit_offsets[0] < HEADER_BITS {
            return Err(invalid_data(
                "block offsets index: first offset lies inside the corpus header",
            ));
        }
        if !self.block_bit_offsets.windows(2).all(|w| w[0] < w[1]) {
            return Err(invalid_data(
                "block offsets index: bit offsets are not strictly increasing",
            ));
        }
        if !self.first_doc_ids.windows(2).all(|w| w[0] <= w[1]) {
            return Err(invalid_data(
                "block offsets index: first doc ids are not non-decreasing",
            ));
        }
        let Some(total_bits) = self.corpus_size_bytes.checked_mul(8) else {
            return Err(invalid_data("block offsets index: implausible corpus size"));
        };
        // The footer (end magic + combined crc) and 0..7 pad bits follow the
        // sentinel; together they must land exactly on the corpus size.
        let sentinel = self.block_bit_offsets[self.first_doc_ids.len()];
        let min = sentinel + FOOTER_BITS;
        if total_bits < min || total_bits > min + 7 {
            return Err(invalid_data(format!(
                "block offsets index: end sentinel {sentinel} does not match corpus size {} bytes",
                self.corpus_size_bytes
            )));
        }
        Ok(())
    }

    pub fn block_count(&self) -> usize {
        self.first_doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_doc_ids.is_empty()
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Highest doc id in the corpus; 0 for an empty corpus.
    pub fn last_doc_id(&self) -> u64 {
        self.last_doc_id
    }

    pub fn corpus_size_bytes(&self) -> u64 {
        self.corpus_size_bytes
    }

    /// Id of the first record readable from block `block_index`.
    pub fn first_doc_id(&self, block_index: usize) -> u64 {
        self.first_doc_ids[block_index]
    }

    /// Bit offset of block `block_index`'s frame.
    pub fn block_bit_offset(&self, block_index: usize) -> u64 {
        self.block_bit_offsets[block_index]
    }

    /// Bit range `[start, end)` of block `block_index`'s frame.
    pub fn block_bit_range(&self, block_index: usize) -> (u64, u64) {
        (
            self.block_bit_offsets[block_index],
            self.block_bit_offsets[block_index + 1],
        )
    }

    /// Bit offset of the end-of-stream magic.
    pub fn end_bit_offset(&self) -> u64 {
        self.block_bit_offsets[self.first_doc_ids.len()]
    }

    /// Block a lookup for `doc_id` should start from, or `None` when the id
    /// precedes every indexed record.
    ///
    /// Binary search for the last block whose first doc id is `<= doc_id`.
    /// When several consecutive blocks carry exactly `doc_id` as their first
    /// id (the record spans block boundaries), the earliest of the run wins,
    /// so the walk starts where the record actually begins.
    pub fn block_index_for(&self, doc_id: u64) -> Option<usize> {
        let pp = self.first_doc_ids.partition_point(|&first| first <= doc_id);
        if pp == 0 {
            return None;
        }
        let mut i = pp - 1;
        if self.first_doc_ids[i] == doc_id {
            while i > 0 && self.first_doc_ids[i - 1] == doc_id {
                i -= 1;
            }
        }
        Some(i)
    }

    /// Load and validate a sidecar file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        let this = Self::from_bytes(&data)?;
        debug!(
            path = %path.display(),
            blocks = this.block_count(),
            records = this.record_count,
            "loaded block offsets index"
        );
        Ok(this)
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(invalid_data(format!(
                "block offsets index truncated: {} < {FIXED_HEADER_LEN}",
                data.len()
            )));
        }
        if data[..4] != SIDECAR_MAGIC {
            return Err(invalid_data("block offsets index: invalid magic"));
        }
        let block_count = u32::from_le_bytes(data[4..8].try_into().unwrap()) as u64;
        let record_count = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let last_doc_id = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let corpus_size_bytes = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let expected = FIXED_HEADER_LEN as u64 + (2 * block_count + 1) * 8;
        if data.len() as u64 != expected {
            return Err(invalid_data(format!(
                "block offsets index: length {} does not match block count {block_count} (expected {expected})",
                data.len()
            )));
        }
        let block_count = block_count as usize;
        let mut pos = FIXED_HEADER_LEN;
        let mut read_u64 = || {
            let v = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
            pos += 8;
            v
        };
        let first_doc_ids: Vec<u64> = (0..block_count).map(|_| read_u64()).collect();
        let block_bit_offsets: Vec<u64> = (0..=block_count).map(|_| read_u64()).collect();
        Self::new(
            first_doc_ids,
            block_bit_offsets,
            record_count,
            last_doc_id,
            corpus_size_bytes,
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let words = self.first_doc_ids.len() + self.block_bit_offsets.len();
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + words * 8);
        out.extend_from_slice(&SIDECAR_MAGIC);
        out.extend_from_slice(&(self.first_doc_ids.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.record_count.to_le_bytes());
        out.extend_from_slice(&self.last_doc_id.to_le_bytes());
        out.extend_from_slice(&self.corpus_size_bytes.to_le_bytes());
        for id in &self.first_doc_ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        for off in &self.block_bit_offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }
        out
    }

    /// Write the sidecar atomically: temp file in the target directory,
    /// fsync, then rename over `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if self.first_doc_ids.len() > u32::MAX as usize {
            return Err(invalid_data("block offsets index: too many blocks"));
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(
            path = %path.display(),
            blocks = self.block_count(),
            "wrote block offsets index"
        );
        Ok(())
    }
}

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
