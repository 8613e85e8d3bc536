//! Block-compressed document corpus with bit-offset indexed random access.
//!
//! A glimmer corpus stores newline-terminated by-subject records (ascending
//! numeric doc ids) as a sequence of compressed blocks that start at
//! arbitrary *bit* offsets. A compact sidecar index (`<corpus>.blockOffsets`)
//! maps each block to the first doc id a lookup can serve from it, so
//! fetching a document decompresses one block (occasionally two) instead of
//! the whole file.
//!
//! The three entry points:
//!
//! * [`CorpusWriter`] writes a corpus;
//! * [`build_block_offsets`] scans a corpus front to back and produces the
//!   sidecar index;
//! * [`DocumentStore`] opens a corpus plus its sidecar and serves
//!   [`document`](DocumentStore::document) lookups.

pub mod build;
pub mod cache;
pub mod error;
pub mod format;
pub mod offsets;
pub mod record;
pub mod scan;
pub mod store;

// ── Read side ───────────────────────────────────────────────────────────────
pub use cache::{Block, BlockCache, BlockReader, BlockStream};
pub use offsets::{block_offsets_path, BlockOffsets, SIDECAR_SUFFIX};
pub use store::{DocumentReader, DocumentStore, DEFAULT_CACHE_CAPACITY};

// ── Write side and index building ───────────────────────────────────────────
pub use build::{build_block_offsets, build_block_offsets_from_reader};
pub use error::BuildError;
pub use format::stream::{CorpusDecoder, CorpusEvent, CorpusWriter};

// ── Format primitives ───────────────────────────────────────────────────────
pub use format::block::CorpusHeader;
pub use record::{BySubjectRecord, RecordParseError};
pub use scan::{BitMatch, BitSequenceScanner};
