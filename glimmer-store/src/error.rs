//! Error types for corpus scanning and index building.

use crate::record::MAX_DOC_ID_DIGITS;
use std::io;
use thiserror::Error;

/// Errors raised while scanning a corpus to build its block offsets index.
///
/// All variants are fatal: the builder publishes nothing on error.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Doc ids must be non-decreasing across the corpus.
    #[error("doc id {next} out of order after {prev}")]
    OutOfOrderDocId { prev: u64, next: u64 },

    #[error("invalid byte {byte:#04x} in doc id at corpus byte {byte_offset}")]
    InvalidDocIdByte { byte: u8, byte_offset: u64 },

    #[error("empty doc id at corpus byte {byte_offset}")]
    EmptyDocId { byte_offset: u64 },

    #[error("doc id at corpus byte {byte_offset} exceeds {} digits", MAX_DOC_ID_DIGITS)]
    DocIdTooLong { byte_offset: u64 },

    #[error("record starting at corpus byte {byte_offset} is not terminated")]
    UnterminatedRecord { byte_offset: u64 },

    #[error("corpus contains blocks but no complete records")]
    NoRecords,
}

pub type Result<T> = std::result::Result<T, BuildError>;
