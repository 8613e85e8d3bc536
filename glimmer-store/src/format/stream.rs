//! Streaming corpus encode and verified sequential decode.
//!
//! [`CorpusWriter`] compresses blocks and packs their frames back to back at
//! bit granularity. [`CorpusDecoder`] walks a corpus front to back, locating
//! each frame with the bit scanner, checking magics and CRCs, and handing out
//! decompressed payloads together with their starting bit offsets.

use crate::format::bits::{copy_bits_to_bytes, read_bits, BitWriter};
use crate::format::block::{
    combine_crc, CorpusHeader, BLOCK_HEADER_BITS, BLOCK_MAGIC, END_MAGIC, FIELD_BITS, FOOTER_BITS,
    HEADER_BITS, HEADER_LEN, MAGIC_BITS,
};
use crate::scan::BitSequenceScanner;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::cmp::Ordering;
use std::io::{self, Read, Write};

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

// ============================================================================
// Writer
// ============================================================================

/// Streaming corpus encoder.
///
/// Buffers uncompressed bytes and emits one compressed block whenever the
/// buffer reaches the level's block size; [`flush_block`] forces a block out
/// early, which gives callers control over block layout. [`finish`] writes
/// the footer; a corpus dropped without `finish` has no footer and will not
/// decode.
///
/// Frames flow to the sink in small pieces, so hand the writer buffered
/// output for file targets.
///
/// [`flush_block`]: Self::flush_block
/// [`finish`]: Self::finish
pub struct CorpusWriter<W: Write> {
    bits: BitWriter<W>,
    pending: Vec<u8>,
    block_size: usize,
    comp_buf: Vec<u8>,
    combined_crc: u32,
    blocks_written: u64,
}

impl<W: Write> CorpusWriter<W> {
    /// Start a corpus at block-size level `level` (1..=9); writes the file
    /// header immediately.
    pub fn new(inner: W, level: u8) -> io::Result<Self> {
        let header = CorpusHeader::new(level)?;
        let mut bits = BitWriter::new(inner);
        bits.write_bytes(&header.to_bytes())?;
        Ok(Self {
            bits,
            pending: Vec::with_capacity(header.block_size()),
            block_size: header.block_size(),
            comp_buf: Vec::new(),
            combined_crc: 0,
            blocks_written: 0,
        })
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Compress and emit the pending bytes as one block. No-op when nothing
    /// is pending.
    pub fn flush_block(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let crc = crc32fast::hash(&self.pending);
        let mut enc = DeflateEncoder::new(
            std::mem::take(&mut self.comp_buf),
            Compression::default(),
        );
        enc.write_all(&self.pending)?;
        let comp = enc.finish()?;
        self.bits.write_bits(BLOCK_MAGIC, MAGIC_BITS)?;
        self.bits.write_bits(self.pending.len() as u64, FIELD_BITS)?;
        self.bits.write_bits(comp.len() as u64, FIELD_BITS)?;
        self.bits.write_bits(u64::from(crc), FIELD_BITS)?;
        self.bits.write_bytes(&comp)?;
        self.comp_buf = comp;
        self.comp_buf.clear();
        self.combined_crc = combine_crc(self.combined_crc, crc);
        self.pending.clear();
        self.blocks_written += 1;
        Ok(())
    }

    /// Flush any pending block, write the footer, and return the inner
    /// writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_block()?;
        self.bits.write_bits(END_MAGIC, MAGIC_BITS)?;
        self.bits.write_bits(u64::from(self.combined_crc), FIELD_BITS)?;
        self.bits.align_to_byte()?;
        let mut inner = self.bits.into_inner();
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for CorpusWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_size {
                self.flush_block()?;
            }
        }
        Ok(buf.len())
    }

    /// Emits the pending bytes as a block, then flushes the sink.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_block()?;
        self.bits.flush()
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// One step of a sequential decode.
#[derive(Debug)]
pub enum CorpusEvent<'a> {
    /// A verified block: where its frame starts and its decompressed bytes.
    Block { bit_offset: u64, data: &'a [u8] },
    /// Footer verified, stream complete. Returned again on further calls.
    End {
        /// Bit offset of the end-of-stream magic.
        end_bit_offset: u64,
        /// Total corpus length in bytes.
        corpus_size_bytes: u64,
    },
}

/// Verified front-to-back decoder over any byte source.
///
/// Every frame must start exactly where the previous one ended. Frames are
/// located by scanning the raw stream for the magic bit patterns; scanner
/// candidates inside a claimed frame are payload bytes spelling the pattern
/// and are ignored, while a candidate past the expected boundary means the
/// corpus is corrupt. Payloads are CRC-checked individually and the footer
/// closes over all of them with the combined CRC, so a decode that reaches
/// [`CorpusEvent::End`] has verified the whole file.
pub struct CorpusDecoder<R: Read> {
    reader: R,
    chunk: Vec<u8>,
    chunk_len: usize,
    chunk_pos: usize,
    block_scan: BitSequenceScanner,
    end_scan: BitSequenceScanner,
    /// Raw bytes of the frame being assembled; `buf[0]` is corpus byte
    /// `buf_base`.
    buf: Vec<u8>,
    buf_base: u64,
    /// Where the next frame must start.
    expected_bit: u64,
    payload: Vec<u8>,
    comp: Vec<u8>,
    header: CorpusHeader,
    combined_crc: u32,
    blocks_read: u64,
    end_state: Option<(u64, u64)>,
}

impl<R: Read> CorpusDecoder<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut hdr = [0u8; HEADER_LEN];
        reader.read_exact(&mut hdr).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid_data("corpus too small for header")
            } else {
                e
            }
        })?;
        let header = CorpusHeader::parse(&hdr)?;
        let mut block_scan = BitSequenceScanner::new(BLOCK_MAGIC, MAGIC_BITS);
        let mut end_scan = BitSequenceScanner::new(END_MAGIC, MAGIC_BITS);
        for &b in &hdr {
            let _ = block_scan.push(b);
            let _ = end_scan.push(b);
        }
        Ok(Self {
            reader,
            chunk: vec![0u8; 8192],
            chunk_len: 0,
            chunk_pos: 0,
            block_scan,
            end_scan,
            buf: Vec::new(),
            buf_base: HEADER_LEN as u64,
            expected_bit: HEADER_BITS,
            payload: Vec::new(),
            comp: Vec::new(),
            header,
            combined_crc: 0,
            blocks_read: 0,
            end_state: None,
        })
    }

    pub fn header(&self) -> CorpusHeader {
        self.header
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Decode the next frame. After an `Err` the decoder is unusable.
    pub fn next_event(&mut self) -> io::Result<CorpusEvent<'_>> {
        if let Some((end_bit_offset, corpus_size_bytes)) = self.end_state {
            return Ok(CorpusEvent::End {
                end_bit_offset,
                corpus_size_bytes,
            });
        }
        if self.seek_frame()? {
            let (end_bit_offset, corpus_size_bytes) = self.finish_footer()?;
            return Ok(CorpusEvent::End {
                end_bit_offset,
                corpus_size_bytes,
            });
        }
        let bit_offset = self.expected_bit;
        self.decode_frame()?;
        Ok(CorpusEvent::Block {
            bit_offset,
            data: &self.payload,
        })
    }

    fn read_raw_byte(&mut self) -> io::Result<Option<u8>> {
        while self.chunk_pos == self.chunk_len {
            match self.reader.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    self.chunk_len = n;
                    self.chunk_pos = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let b = self.chunk[self.chunk_pos];
        self.chunk_pos += 1;
        Ok(Some(b))
    }

    fn feed(&mut self, b: u8) -> (Option<crate::scan::BitMatch>, Option<crate::scan::BitMatch>) {
        self.buf.push(b);
        (self.block_scan.push(b), self.end_scan.push(b))
    }

    /// Read until a frame magic lands exactly on `expected_bit`. Returns
    /// true for the end magic, false for a block magic.
    fn seek_frame(&mut self) -> io::Result<bool> {
        loop {
            let Some(b) = self.read_raw_byte()? else {
                return Err(invalid_data(format!(
                    "unexpected end of corpus while expecting a frame at bit offset {}",
                    self.expected_bit
                )));
            };
            let (block_hit, end_hit) = self.feed(b);
            if let Some(m) = block_hit {
                match m.bit_offset().cmp(&self.expected_bit) {
                    Ordering::Equal => return Ok(false),
                    Ordering::Greater => return Err(self.desync_error()),
                    Ordering::Less => {}
                }
            }
            if let Some(m) = end_hit {
                match m.bit_offset().cmp(&self.expected_bit) {
                    Ordering::Equal => return Ok(true),
                    Ordering::Greater => return Err(self.desync_error()),
                    Ordering::Less => {}
                }
            }
        }
    }

    fn desync_error(&self) -> io::Error {
        invalid_data(format!(
            "invalid frame at bit offset {}",
            self.expected_bit
        ))
    }

    /// Buffer raw bytes until every bit below `end_bit` is available.
    fn fill_to_bit(&mut self, end_bit: u64) -> io::Result<()> {
        while (self.buf_base + self.buf.len() as u64) * 8 < end_bit {
            let Some(b) = self.read_raw_byte()? else {
                return Err(invalid_data(format!(
                    "unexpected end of corpus inside the frame at bit offset {}",
                    self.expected_bit
                )));
            };
            let _ = self.feed(b);
        }
        Ok(())
    }

    fn read_buf_bits(&self, abs_bit: u64, width: u32) -> u64 {
        read_bits(&self.buf, abs_bit - self.buf_base * 8, width)
    }

    fn decode_frame(&mut self) -> io::Result<()> {
        let start = self.expected_bit;
        self.fill_to_bit(start + BLOCK_HEADER_BITS)?;
        let raw_len = self.read_buf_bits(start + MAGIC_BITS as u64, FIELD_BITS) as usize;
        let comp_off = start + MAGIC_BITS as u64 + FIELD_BITS as u64;
        let comp_len = self.read_buf_bits(comp_off, FIELD_BITS) as usize;
        let crc = self.read_buf_bits(comp_off + FIELD_BITS as u64, FIELD_BITS) as u32;
        if raw_len == 0 || raw_len > self.header.block_size() {
            return Err(invalid_data(format!(
                "block at bit offset {start}: invalid uncompressed length {raw_len}"
            )));
        }
        if comp_len == 0 {
            return Err(invalid_data(format!(
                "block at bit offset {start}: invalid compressed length 0"
            )));
        }
        let payload_start = start + BLOCK_HEADER_BITS;
        let payload_end = payload_start + comp_len as u64 * 8;
        self.fill_to_bit(payload_end)?;
        copy_bits_to_bytes(
            &self.buf,
            payload_start - self.buf_base * 8,
            comp_len,
            &mut self.comp,
        );
        self.payload.clear();
        self.payload.resize(raw_len, 0);
        let mut dec = DeflateDecoder::new(&self.comp[..]);
        dec.read_exact(&mut self.payload).map_err(|e| {
            invalid_data(format!("block at bit offset {start}: corrupt payload: {e}"))
        })?;
        let mut probe = [0u8; 1];
        let extra = dec.read(&mut probe).map_err(|e| {
            invalid_data(format!("block at bit offset {start}: corrupt payload: {e}"))
        })?;
        if extra != 0 {
            return Err(invalid_data(format!(
                "block at bit offset {start}: payload exceeds declared length {raw_len}"
            )));
        }
        if crc32fast::hash(&self.payload) != crc {
            return Err(invalid_data(format!(
                "block at bit offset {start}: payload CRC mismatch"
            )));
        }
        self.combined_crc = combine_crc(self.combined_crc, crc);
        self.blocks_read += 1;
        // Drop consumed bytes, keeping the byte holding the next frame's
        // first bit.
        let keep_from = payload_end / 8;
        self.buf.drain(..(keep_from - self.buf_base) as usize);
        self.buf_base = keep_from;
        self.expected_bit = payload_end;
        Ok(())
    }

    fn finish_footer(&mut self) -> io::Result<(u64, u64)> {
        let start = self.expected_bit;
        self.fill_to_bit(start + FOOTER_BITS)?;
        let stored = self.read_buf_bits(start + MAGIC_BITS as u64, FIELD_BITS) as u32;
        if stored != self.combined_crc {
            return Err(invalid_data(format!(
                "combined CRC mismatch: stored {stored:#010x}, computed {:#010x}",
                self.combined_crc
            )));
        }
        if self.read_raw_byte()?.is_some() {
            return Err(invalid_data("trailing data after corpus footer"));
        }
        let size = self.block_scan.bytes_fed();
        self.end_state = Some((start, size));
        Ok((start, size))
    }
}
