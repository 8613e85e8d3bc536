//! One-pass construction of a corpus's block offsets index.
//!
//! The builder decodes the corpus front to back and runs a small parser over
//! the decompressed record stream, tracking the doc id at the head of each
//! record. Whenever the decoder reports a new block, the block waits in a
//! pending queue until the first record *starting strictly inside it* has
//! its id parsed; that id becomes the block's first doc id. A block that no
//! record starts inside (one fully spanned by a neighbor's body, or one
//! beginning exactly on a record boundary) inherits the id of the next
//! record to start anywhere after it, and trailing blocks spanned by the
//! final record inherit the last id. This mirrors how a lookup enters a
//! block — skipping to the first record delimiter before parsing — so a
//! fresh index never points a lookup at a block whose first readable id is
//! past the target.
//!
//! A block boundary can land anywhere, including between two digits of an
//! id, which is why assignment is deferred until the id is complete rather
//! than read off a counter at the boundary.
//!
//! The corpus is machine-written, so the parser is strict: out-of-order ids,
//! non-digit id bytes, missing delimiters or an unterminated final record
//! all abort the build.

use crate::error::{BuildError, Result};
use crate::format::stream::{CorpusDecoder, CorpusEvent};
use crate::offsets::BlockOffsets;
use crate::record::{FIELD_DELIMITER, MAX_DOC_ID_DIGITS, RECORD_DELIMITER};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Scan the corpus at `path` and build its block offsets index.
pub fn build_block_offsets(path: &Path) -> Result<BlockOffsets> {
    let file = File::open(path)?;
    build_block_offsets_from_reader(BufReader::new(file))
}

/// [`build_block_offsets`] over any byte source (stdin, sockets, tests).
pub fn build_block_offsets_from_reader<R: Read>(reader: R) -> Result<BlockOffsets> {
    let mut decoder = CorpusDecoder::new(reader)?;
    let mut sink = OffsetsSink::default();
    loop {
        match decoder.next_event()? {
            CorpusEvent::Block { bit_offset, data } => {
                sink.block_start(bit_offset);
                sink.bytes(data)?;
            }
            CorpusEvent::End {
                end_bit_offset,
                corpus_size_bytes,
            } => {
                return sink.finish(end_bit_offset, corpus_size_bytes);
            }
        }
    }
}

/// Accumulates the index while the decoder streams blocks and bytes.
#[derive(Default)]
struct OffsetsSink {
    block_bit_offsets: Vec<u64>,
    first_doc_ids: Vec<u64>,
    /// Uncompressed start positions of blocks still waiting for an id,
    /// oldest first. Always `block_bit_offsets.len() - first_doc_ids.len()`
    /// entries.
    pending: VecDeque<u64>,
    /// Absolute uncompressed position of the next byte.
    pos: u64,
    id_value: u64,
    id_digits: usize,
    /// Position of the current record's first byte; meaningful whenever a
    /// record is in progress.
    record_start: u64,
    /// Between the id's field delimiter and the record delimiter.
    in_body: bool,
    last_doc_id: Option<u64>,
    record_count: u64,
}

impl OffsetsSink {
    fn block_start(&mut self, bit_offset: u64) {
        self.block_bit_offsets.push(bit_offset);
        self.pending.push_back(self.pos);
    }

    fn bytes(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            self.byte(b)?;
        }
        Ok(())
    }

    fn byte(&mut self, b: u8) -> Result<()> {
        let pos = self.pos;
        self.pos += 1;
        if self.in_body {
            if b == RECORD_DELIMITER {
                self.in_body = false;
                self.record_count += 1;
                if self.record_count % 100_000 == 0 {
                    debug!(records = self.record_count, "building block offsets");
                }
            }
            return Ok(());
        }
        match b {
            b'0'..=b'9' => {
                if self.id_digits == MAX_DOC_ID_DIGITS {
                    return Err(BuildError::DocIdTooLong { byte_offset: pos });
                }
                if self.id_digits == 0 {
                    self.record_start = pos;
                }
                self.id_value = self.id_value * 10 + u64::from(b - b'0');
                self.id_digits += 1;
                Ok(())
            }
            FIELD_DELIMITER => {
                if self.id_digits == 0 {
                    return Err(BuildError::EmptyDocId { byte_offset: pos });
                }
                self.complete_id()
            }
            _ => Err(BuildError::InvalidDocIdByte {
                byte: b,
                byte_offset: pos,
            }),
        }
    }

    /// The current record's id is fully parsed: order-check it, then hand it
    /// to every pending block the record is readable from.
    fn complete_id(&mut self) -> Result<()> {
        let id = self.id_value;
        if let Some(prev) = self.last_doc_id {
            if id < prev {
                return Err(BuildError::OutOfOrderDocId { prev, next: id });
            }
        }
        while let Some(&block_start) = self.pending.front() {
            // A record starting exactly on a later block's boundary is only
            // readable from the block before it, where its preceding
            // delimiter lives; the first block starts at a record start.
            let readable = block_start == 0 || self.record_start > block_start;
            if !readable {
                break;
            }
            self.first_doc_ids.push(id);
            self.pending.pop_front();
        }
        self.last_doc_id = Some(id);
        self.id_value = 0;
        self.id_digits = 0;
        self.in_body = true;
        Ok(())
    }

    fn finish(mut self, end_bit_offset: u64, corpus_size_bytes: u64) -> Result<BlockOffsets> {
        if self.in_body || self.id_digits > 0 {
            return Err(BuildError::UnterminatedRecord {
                byte_offset: self.record_start,
            });
        }
        if !self.pending.is_empty() {
            // Tail blocks spanned by the final record. Lookups only reach
            // them chasing that record's id and recover through the
            // earliest-of-equal-run rule.
            let Some(last) = self.last_doc_id else {
                return Err(BuildError::NoRecords);
            };
            while self.pending.pop_front().is_some() {
                self.first_doc_ids.push(last);
            }
        }
        self.block_bit_offsets.push(end_bit_offset);
        debug!(
            blocks = self.first_doc_ids.len(),
            records = self.record_count,
            last_doc_id = self.last_doc_id.unwrap_or(0),
            "block offsets built"
        );
        Ok(BlockOffsets::new(
            self.first_doc_ids,
            self.block_bit_offsets,
            self.record_count,
            self.last_doc_id.unwrap_or(0),
            corpus_size_bytes,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::stream::CorpusWriter;
    use crate::record::BySubjectRecord;
    use std::io::Write;

    /// One block per chunk, split wherever the caller says.
    fn corpus_of_chunks(chunks: &[&[u8]]) -> Vec<u8> {
        let mut w = CorpusWriter::new(Vec::new(), 1).unwrap();
        for chunk in chunks {
            w.write_all(chunk).unwrap();
            w.flush_block().unwrap();
        }
        w.finish().unwrap()
    }

    fn single_block(bytes: &[u8]) -> Vec<u8> {
        corpus_of_chunks(&[bytes])
    }

    fn build(bytes: &[u8]) -> Result<BlockOffsets> {
        build_block_offsets_from_reader(bytes)
    }

    /// Ten 8-byte records `i\tSi\tRi\n`, record `i` spanning bytes
    /// `[8i, 8i + 8)`.
    fn ten_records() -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..10u64 {
            bytes.extend_from_slice(format!("{i}\tS{i}\tR{i}\n").as_bytes());
        }
        assert_eq!(bytes.len(), 80);
        bytes
    }

    #[test]
    fn first_ids_are_the_first_record_starting_inside_each_block() {
        let bytes = ten_records();
        // The cut at 20 splits record 2 across blocks 0 and 1; the cut at 40
        // puts record 5's first byte exactly on block 2's boundary.
        let corpus = corpus_of_chunks(&[&bytes[..20], &bytes[20..40], &bytes[40..]]);
        let offsets = build(&corpus).unwrap();

        assert_eq!(offsets.block_count(), 3);
        assert_eq!(
            (0..3).map(|i| offsets.first_doc_id(i)).collect::<Vec<_>>(),
            vec![0, 3, 6]
        );
        assert_eq!(offsets.record_count(), 10);
        assert_eq!(offsets.last_doc_id(), 9);
        assert_eq!(offsets.corpus_size_bytes(), corpus.len() as u64);
        assert!((0..3).all(|i| {
            let (start, end) = offsets.block_bit_range(i);
            start < end
        }));
    }

    #[test]
    fn record_starting_exactly_on_a_boundary_belongs_to_the_previous_block() {
        let bytes = ten_records();
        // The cut falls right after record 1's delimiter, so record 2 starts
        // at block 1's first byte. A lookup entering block 1 skips to the
        // delimiter *ending* record 2, so block 1's first readable id is 3.
        let corpus = corpus_of_chunks(&[&bytes[..16], &bytes[16..]]);
        let offsets = build(&corpus).unwrap();

        assert_eq!(offsets.first_doc_id(0), 0);
        assert_eq!(offsets.first_doc_id(1), 3);
    }

    #[test]
    fn blocks_spanned_by_one_record_share_the_next_id() {
        let mut bytes = Vec::new();
        for i in 0..5u64 {
            BySubjectRecord::new(i, format!("S{i}"), vec![format!("R{i}")])
                .write_to(&mut bytes)
                .unwrap();
        }
        let span_start = bytes.len() as u64;
        BySubjectRecord::new(5, "S5", vec!["x".repeat(150)])
            .write_to(&mut bytes)
            .unwrap();
        let span_end = bytes.len() as u64;
        for i in 6..10u64 {
            BySubjectRecord::new(i, format!("S{i}"), vec![format!("R{i}")])
                .write_to(&mut bytes)
                .unwrap();
        }
        // Three cuts inside record 5's body: blocks 1..=3 all start within
        // its span, and record 6 starts strictly inside block 3.
        let cuts = [50u64, 110, 170];
        assert!(cuts.iter().all(|&c| span_start < c && c < span_end));
        let corpus = corpus_of_chunks(&[
            &bytes[..50],
            &bytes[50..110],
            &bytes[110..170],
            &bytes[170..],
        ]);
        let offsets = build(&corpus).unwrap();

        assert_eq!(offsets.block_count(), 4);
        assert_eq!(
            (0..4).map(|i| offsets.first_doc_id(i)).collect::<Vec<_>>(),
            vec![0, 6, 6, 6]
        );
        // The equal run resolves to its earliest block.
        assert_eq!(offsets.block_index_for(5), Some(0));
        assert_eq!(offsets.block_index_for(6), Some(1));
    }

    #[test]
    fn tail_blocks_spanned_by_the_final_record_take_the_last_id() {
        let mut bytes = Vec::new();
        BySubjectRecord::new(1, "a", vec![])
            .write_to(&mut bytes)
            .unwrap();
        BySubjectRecord::new(2, "b", vec!["y".repeat(100)])
            .write_to(&mut bytes)
            .unwrap();
        let corpus = corpus_of_chunks(&[&bytes[..20], &bytes[20..60], &bytes[60..]]);
        let offsets = build(&corpus).unwrap();

        assert_eq!(offsets.block_count(), 3);
        assert_eq!(offsets.first_doc_id(0), 1);
        assert_eq!(offsets.first_doc_id(1), 2);
        assert_eq!(offsets.first_doc_id(2), 2);
        assert_eq!(offsets.last_doc_id(), 2);
    }

    #[test]
    fn empty_corpus_builds_an_empty_index() {
        let corpus = corpus_of_chunks(&[]);
        let offsets = build(&corpus).unwrap();
        assert_eq!(offsets.block_count(), 0);
        assert_eq!(offsets.record_count(), 0);
        assert_eq!(offsets.last_doc_id(), 0);
        assert_eq!(offsets.corpus_size_bytes(), corpus.len() as u64);
    }

    #[test]
    fn equal_consecutive_ids_are_accepted() {
        let offsets = build(&single_block(b"7\ta\n7\tb\n8\tc\n")).unwrap();
        assert_eq!(offsets.record_count(), 3);
        assert_eq!(offsets.last_doc_id(), 8);
    }

    #[test]
    fn descending_ids_are_rejected() {
        let err = build(&single_block(b"5\ta\n4\tb\n")).unwrap_err();
        assert!(
            matches!(err, BuildError::OutOfOrderDocId { prev: 5, next: 4 }),
            "{err}"
        );
    }

    #[test]
    fn malformed_records_are_rejected() {
        let err = build(&single_block(b"12x\ts\n")).unwrap_err();
        assert!(
            matches!(
                err,
                BuildError::InvalidDocIdByte {
                    byte: b'x',
                    byte_offset: 2
                }
            ),
            "{err}"
        );

        let err = build(&single_block(b"\ts\n")).unwrap_err();
        assert!(matches!(err, BuildError::EmptyDocId { byte_offset: 0 }), "{err}");

        let err = build(&single_block(b"12345678901234567890\ts\n")).unwrap_err();
        assert!(matches!(err, BuildError::DocIdTooLong { .. }), "{err}");
    }

    #[test]
    fn unterminated_final_record_is_rejected() {
        let err = build(&single_block(b"1\ta\n2\tno newline")).unwrap_err();
        assert!(
            matches!(err, BuildError::UnterminatedRecord { byte_offset: 4 }),
            "{err}"
        );

        // Even a bare trailing id counts as an unterminated record.
        let err = build(&single_block(b"1\ta\n2")).unwrap_err();
        assert!(matches!(err, BuildError::UnterminatedRecord { .. }), "{err}");
    }

    #[test]
    fn container_corruption_surfaces_as_io() {
        let corpus = single_block(b"1\ta\n");
        let err = build(&corpus[..corpus.len() - 3]).unwrap_err();
        assert!(matches!(err, BuildError::Io(_)), "{err}");
    }

    #[test]
    fn builds_from_a_file_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tiny.glb");
        std::fs::write(&path, single_block(b"3\ts\tr\n")).unwrap();

        let offsets = build_block_offsets(&path).unwrap();
        assert_eq!(offsets.block_count(), 1);
        assert_eq!(offsets.first_doc_id(0), 3);
        assert_eq!(offsets.record_count(), 1);
        assert_eq!(offsets.last_doc_id(), 3);
    }
}
