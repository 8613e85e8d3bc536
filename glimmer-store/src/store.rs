//! Random access to records in a compressed corpus by doc id.
//!
//! [`DocumentStore`] memory-maps the corpus, loads its block offsets sidecar
//! and serves lookups through a [`BlockCache`]. A lookup binary-searches the
//! sidecar for the block to enter, streams decompressed bytes from that
//! block's start and walks record heads until the target id appears. Doc ids
//! are non-decreasing across the corpus, so the walk stops at the first id
//! past the target.
//!
//! The store trusts the corpus (it is machine-written and CRC-checked per
//! block) but not the sidecar, which can be stale or hand-damaged. Sidecar
//! rows that point at implausible bit offsets read as empty blocks, and a
//! walk that finds nothing readable retries once from the previous block;
//! a row whose promised first id the corpus contradicts logs a warning and
//! treats the doc as absent. Lookups never panic on disagreement.

use crate::cache::{BlockCache, BlockReader, BlockStream};
use crate::format::bits::{copy_bits_to_bytes, read_bits};
use crate::format::block::{CorpusHeader, BLOCK_HEADER_BITS, BLOCK_MAGIC, FIELD_BITS, MAGIC_BITS};
use crate::offsets::{block_offsets_path, BlockOffsets};
use crate::record::{FIELD_DELIMITER, MAX_DOC_ID_DIGITS, RECORD_DELIMITER};
use flate2::read::DeflateDecoder;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cached decompressed blocks per store unless overridden.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

const WALK_BUF_LEN: usize = 8 * 1024;

/// Read-only document store over a corpus file and its block offsets sidecar.
///
/// Shared-reference API throughout; safe to use from many threads at once.
#[derive(Debug)]
pub struct DocumentStore {
    offsets: Arc<BlockOffsets>,
    cache: BlockCache<CorpusBlockReader>,
}

impl DocumentStore {
    /// Open `corpus` with its conventional sidecar and the default cache
    /// capacity.
    pub fn open(corpus: &Path) -> io::Result<Self> {
        Self::open_with(corpus, &block_offsets_path(corpus), DEFAULT_CACHE_CAPACITY)
    }

    /// [`DocumentStore::open`] with an explicit cache capacity.
    pub fn with_cache_capacity(corpus: &Path, cache_capacity: usize) -> io::Result<Self> {
        Self::open_with(corpus, &block_offsets_path(corpus), cache_capacity)
    }

    /// Open `corpus` against a sidecar at a non-conventional path.
    pub fn open_with(
        corpus: &Path,
        offsets_path: &Path,
        cache_capacity: usize,
    ) -> io::Result<Self> {
        let file = File::open(corpus)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = CorpusHeader::parse(&mmap)?;
        let offsets = Arc::new(BlockOffsets::load(offsets_path)?);
        if offsets.corpus_size_bytes() != mmap.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "block offsets index was built for a {}-byte corpus, file is {} bytes",
                    offsets.corpus_size_bytes(),
                    mmap.len()
                ),
            ));
        }
        debug!(
            corpus = %corpus.display(),
            blocks = offsets.block_count(),
            records = offsets.record_count(),
            block_size = header.block_size(),
            "opened document store"
        );
        let reader = CorpusBlockReader {
            mmap,
            offsets: Arc::clone(&offsets),
            block_size: header.block_size(),
        };
        Ok(Self {
            offsets,
            cache: BlockCache::new(reader, cache_capacity),
        })
    }

    /// Highest doc id in the corpus; 0 for an empty corpus.
    pub fn last_doc_id(&self) -> u64 {
        self.offsets.last_doc_id()
    }

    pub fn record_count(&self) -> u64 {
        self.offsets.record_count()
    }

    pub fn block_count(&self) -> usize {
        self.offsets.block_count()
    }

    /// The loaded block offsets index.
    pub fn offsets(&self) -> &BlockOffsets {
        &self.offsets
    }

    /// Decompressed bytes of one block, or `None` past the last block.
    /// An implausible sidecar row reads as an empty buffer.
    pub fn block_bytes(&self, block_index: usize) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .cache
            .block(block_index)?
            .map(|block| block.data().to_vec()))
    }

    /// The record carrying `doc_id`: its bytes from the first id digit up
    /// to, not including, the record delimiter. `None` when no such document
    /// is stored.
    pub fn document(&self, doc_id: u64) -> io::Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.document_reader(doc_id)? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Streaming variant of [`DocumentStore::document`].
    pub fn document_reader(&self, doc_id: u64) -> io::Result<Option<DocumentReader<'_>>> {
        if self.offsets.is_empty() || doc_id > self.offsets.last_doc_id() {
            return Ok(None);
        }
        let Some(indexed) = self.offsets.block_index_for(doc_id) else {
            return Ok(None);
        };
        let mut block_index = indexed;
        let mut retried = false;
        loop {
            match self.walk_from(block_index, doc_id)? {
                Walk::Found(reader) => return Ok(Some(reader)),
                Walk::Gap => return Ok(None),
                Walk::FirstPast { first_seen } => {
                    warn!(
                        doc_id,
                        block_index,
                        first_seen,
                        "block offsets index promised an earlier id than the corpus holds; treating doc as absent"
                    );
                    return Ok(None);
                }
                Walk::NoRecord if !retried && block_index > 0 => {
                    // A record spanning the tail of the corpus (or a damaged
                    // row) can index an id at a block holding only its body
                    // bytes; the record's head sits a block earlier.
                    retried = true;
                    block_index -= 1;
                }
                Walk::NoRecord => {
                    warn!(
                        doc_id,
                        block_index = indexed,
                        "no readable record at the indexed block; treating doc as absent"
                    );
                    return Ok(None);
                }
            }
        }
    }

    /// Stream records from `block_index`'s start and compare heads against
    /// `target` until it is found, passed, or the corpus ends.
    fn walk_from(&self, block_index: usize, target: u64) -> io::Result<Walk<'_>> {
        let mut rd = BufReader::with_capacity(WALK_BUF_LEN, self.cache.stream_from(block_index, 0));
        // Every block but the first can begin mid-record; its first readable
        // record starts after the next delimiter.
        if block_index > 0 && !skip_past_delimiter(&mut rd)? {
            return Ok(Walk::NoRecord);
        }
        let mut first = true;
        loop {
            let mut head = [0u8; MAX_DOC_ID_DIGITS + 1];
            let Some((id, head_len)) = read_record_head(&mut rd, &mut head)? else {
                return Ok(Walk::NoRecord);
            };
            if id == target {
                return Ok(Walk::Found(DocumentReader {
                    head,
                    head_len,
                    head_pos: 0,
                    inner: rd,
                    done: false,
                }));
            }
            if id > target {
                return Ok(if first {
                    Walk::FirstPast { first_seen: id }
                } else {
                    Walk::Gap
                });
            }
            first = false;
            if !skip_past_delimiter(&mut rd)? {
                return Ok(Walk::NoRecord);
            }
        }
    }
}

/// Outcome of walking one block for a target id.
enum Walk<'a> {
    Found(DocumentReader<'a>),
    /// A later id turned up after at least one earlier record: the target is
    /// simply not stored.
    Gap,
    /// The very first readable id was already past the target: the sidecar
    /// row lied.
    FirstPast { first_seen: u64 },
    /// The stream ended (or stopped making sense) before any id at or past
    /// the target.
    NoRecord,
}

/// Streams one record's bytes: the already-parsed head (id digits plus the
/// field delimiter) replays first, then the rest of the record up to its
/// delimiter.
pub struct DocumentReader<'a> {
    head: [u8; MAX_DOC_ID_DIGITS + 1],
    head_len: usize,
    head_pos: usize,
    inner: BufReader<BlockStream<'a, CorpusBlockReader>>,
    done: bool,
}

impl Read for DocumentReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.head_pos < self.head_len {
            let n = (self.head_len - self.head_pos).min(out.len());
            out[..n].copy_from_slice(&self.head[self.head_pos..self.head_pos + n]);
            self.head_pos += n;
            return Ok(n);
        }
        if self.done {
            return Ok(0);
        }
        let n = self.inner.read(out)?;
        if n == 0 {
            self.done = true;
            return Ok(0);
        }
        match out[..n].iter().position(|&b| b == RECORD_DELIMITER) {
            Some(i) => {
                self.done = true;
                Ok(i)
            }
            None => Ok(n),
        }
    }
}

fn read_one<R: BufRead>(rd: &mut R) -> io::Result<Option<u8>> {
    let buf = rd.fill_buf()?;
    let Some(&b) = buf.first() else {
        return Ok(None);
    };
    rd.consume(1);
    Ok(Some(b))
}

/// Consume up to and including the next record delimiter. `false` on EOF.
fn skip_past_delimiter<R: BufRead>(rd: &mut R) -> io::Result<bool> {
    loop {
        let buf = rd.fill_buf()?;
        if buf.is_empty() {
            return Ok(false);
        }
        match buf.iter().position(|&b| b == RECORD_DELIMITER) {
            Some(i) => {
                rd.consume(i + 1);
                return Ok(true);
            }
            None => {
                let n = buf.len();
                rd.consume(n);
            }
        }
    }
}

/// Parse a record head: id digits followed by the field delimiter. Fills
/// `head` with the bytes as read and returns the id value and head length.
/// `None` on EOF or anything that is not a well-formed head; the caller
/// treats both as "nothing readable here".
fn read_record_head<R: BufRead>(
    rd: &mut R,
    head: &mut [u8; MAX_DOC_ID_DIGITS + 1],
) -> io::Result<Option<(u64, usize)>> {
    let mut len = 0usize;
    let mut value = 0u64;
    loop {
        let Some(b) = read_one(rd)? else {
            return Ok(None);
        };
        match b {
            b'0'..=b'9' => {
                if len == MAX_DOC_ID_DIGITS {
                    return Ok(None);
                }
                head[len] = b;
                len += 1;
                value = value * 10 + u64::from(b - b'0');
            }
            FIELD_DELIMITER if len > 0 => {
                head[len] = FIELD_DELIMITER;
                return Ok(Some((value, len + 1)));
            }
            _ => return Ok(None),
        }
    }
}

/// Decodes blocks for the cache straight off the corpus mmap.
///
/// Each sidecar row is checked for structural plausibility before any
/// decompression: the frame magic at the row's bit offset, sane length
/// fields, payload inside the file. An implausible row reads as `Ok(0)` so
/// the cache renders it inert; failures past those checks mean a real block
/// carries bad data and are hard errors.
#[derive(Debug)]
struct CorpusBlockReader {
    mmap: Mmap,
    offsets: Arc<BlockOffsets>,
    block_size: usize,
}

impl BlockReader for CorpusBlockReader {
    fn read_block(&self, block_index: usize, buf: &mut [u8]) -> io::Result<usize> {
        let (start, _) = self.offsets.block_bit_range(block_index);
        let file_bits = self.mmap.len() as u64 * 8;
        if start + BLOCK_HEADER_BITS > file_bits {
            return Ok(0);
        }
        if read_bits(&self.mmap, start, MAGIC_BITS) != BLOCK_MAGIC {
            return Ok(0);
        }
        let raw_len = read_bits(&self.mmap, start + u64::from(MAGIC_BITS), FIELD_BITS) as usize;
        let comp_len = read_bits(
            &self.mmap,
            start + u64::from(MAGIC_BITS) + u64::from(FIELD_BITS),
            FIELD_BITS,
        ) as usize;
        let crc = read_bits(
            &self.mmap,
            start + u64::from(MAGIC_BITS) + 2 * u64::from(FIELD_BITS),
            FIELD_BITS,
        ) as u32;
        if raw_len == 0 || raw_len > buf.len() || comp_len == 0 {
            return Ok(0);
        }
        let payload_start = start + BLOCK_HEADER_BITS;
        if payload_start + comp_len as u64 * 8 > file_bits {
            return Ok(0);
        }

        let mut compressed = Vec::new();
        copy_bits_to_bytes(&self.mmap, payload_start, comp_len, &mut compressed);
        let mut decoder = DeflateDecoder::new(&compressed[..]);
        decoder
            .read_exact(&mut buf[..raw_len])
            .map_err(|e| block_data_error(block_index, format!("corrupt payload: {e}")))?;
        let mut probe = [0u8; 1];
        let over = decoder
            .read(&mut probe)
            .map_err(|e| block_data_error(block_index, format!("corrupt payload: {e}")))?;
        if over != 0 {
            return Err(block_data_error(
                block_index,
                "payload inflates past its declared length",
            ));
        }
        if crc32fast::hash(&buf[..raw_len]) != crc {
            return Err(block_data_error(block_index, "payload CRC mismatch"));
        }
        Ok(raw_len)
    }

    fn block_count(&self) -> usize {
        self.offsets.block_count()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

fn block_data_error(block_index: usize, msg: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("block {block_index}: {msg}"),
    )
}
