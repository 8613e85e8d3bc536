//! The by-subject record format stored inside a corpus.
//!
//! ```text
//! record := doc_id '\t' subject ['\t' relation ("  " relation)*] '\n'
//! ```
//!
//! `doc_id` is ASCII decimal, at most 19 digits (so any valid id fits a
//! `u64`), and ids are non-decreasing across a corpus. Relations are
//! separated by two spaces; a record may have none. The container knows
//! nothing about records, so a record may straddle compressed block
//! boundaries at any byte, including mid-digit.

use std::io::{self, Write};
use thiserror::Error;

/// Upper bound on doc id digits.
pub const MAX_DOC_ID_DIGITS: usize = 19;

/// Separates the doc id, the subject, and the relations section.
pub const FIELD_DELIMITER: u8 = b'\t';

/// Terminates every record.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Separates relations from each other.
pub const RELATION_SEPARATOR: &str = "  ";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("record is empty")]
    Empty,
    #[error("doc id is empty")]
    EmptyDocId,
    #[error("doc id exceeds {} digits", MAX_DOC_ID_DIGITS)]
    DocIdTooLong,
    #[error("invalid doc id byte {0:#04x}")]
    InvalidDocIdByte(u8),
    #[error("record has no subject field")]
    MissingSubject,
    #[error("record text is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BySubjectRecord {
    pub doc_id: u64,
    pub subject: String,
    pub relations: Vec<String>,
}

impl BySubjectRecord {
    pub fn new(doc_id: u64, subject: impl Into<String>, relations: Vec<String>) -> Self {
        Self {
            doc_id,
            subject: subject.into(),
            relations,
        }
    }

    /// Parse a record from its bytes, without the trailing record delimiter.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordParseError> {
        if bytes.is_empty() {
            return Err(RecordParseError::Empty);
        }
        let (doc_id, rest) = split_doc_id(bytes)?;
        let (subject, relations) = match rest.iter().position(|&b| b == FIELD_DELIMITER) {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let subject = std::str::from_utf8(subject)?.to_owned();
        let relations = match relations {
            Some(bytes) => std::str::from_utf8(bytes)?
                .split(RELATION_SEPARATOR)
                .map(str::to_owned)
                .collect(),
            None => Vec::new(),
        };
        Ok(Self {
            doc_id,
            subject,
            relations,
        })
    }

    /// Serialized bytes, including the trailing record delimiter.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{}\t{}", self.doc_id, self.subject);
        if !self.relations.is_empty() {
            out.push(FIELD_DELIMITER as char);
            out.push_str(&self.relations.join(RELATION_SEPARATOR));
        }
        out.push(RECORD_DELIMITER as char);
        out.into_bytes()
    }

    /// Stream the serialized record, including the trailing delimiter.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }
}

/// The leading doc id of a record's bytes, if well-formed up to its first
/// field delimiter.
pub fn leading_doc_id(bytes: &[u8]) -> Option<u64> {
    split_doc_id(bytes).ok().map(|(id, _)| id)
}

fn split_doc_id(bytes: &[u8]) -> Result<(u64, &[u8]), RecordParseError> {
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'0'..=b'9' => {
                if i == MAX_DOC_ID_DIGITS {
                    return Err(RecordParseError::DocIdTooLong);
                }
                value = value * 10 + u64::from(b - b'0');
            }
            FIELD_DELIMITER => {
                if i == 0 {
                    return Err(RecordParseError::EmptyDocId);
                }
                return Ok((value, &bytes[i + 1..]));
            }
            _ => return Err(RecordParseError::InvalidDocIdByte(b)),
        }
    }
    Err(RecordParseError::MissingSubject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_record() {
        let rec = BySubjectRecord::parse(b"42\tsubject text\trelA  relB  relC").unwrap();
        assert_eq!(rec.doc_id, 42);
        assert_eq!(rec.subject, "subject text");
        assert_eq!(rec.relations, vec!["relA", "relB", "relC"]);
    }

    #[test]
    fn parse_record_without_relations() {
        let rec = BySubjectRecord::parse(b"7\tjust a subject").unwrap();
        assert_eq!(rec.doc_id, 7);
        assert_eq!(rec.subject, "just a subject");
        assert!(rec.relations.is_empty());
    }

    #[test]
    fn relations_may_contain_single_spaces() {
        let rec = BySubjectRecord::parse(b"1\ts\ta b  c d").unwrap();
        assert_eq!(rec.relations, vec!["a b", "c d"]);
    }

    #[test]
    fn round_trip() {
        let rec = BySubjectRecord::new(
            9_999_999_999_999_999_999,
            "S",
            vec!["r1".to_owned(), "r2".to_owned()],
        );
        let bytes = rec.to_bytes();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(BySubjectRecord::parse(&bytes[..bytes.len() - 1]).unwrap(), rec);
    }

    #[test]
    fn round_trip_doc_id_zero() {
        let rec = BySubjectRecord::new(0, "zero", Vec::new());
        let bytes = rec.to_bytes();
        assert_eq!(bytes, b"0\tzero\n");
        assert_eq!(BySubjectRecord::parse(b"0\tzero").unwrap(), rec);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(BySubjectRecord::parse(b"").unwrap_err(), RecordParseError::Empty);
        assert_eq!(
            BySubjectRecord::parse(b"\tsubject").unwrap_err(),
            RecordParseError::EmptyDocId
        );
        assert_eq!(
            BySubjectRecord::parse(b"12x\ts").unwrap_err(),
            RecordParseError::InvalidDocIdByte(b'x')
        );
        assert_eq!(
            BySubjectRecord::parse(b"12345678901234567890\ts").unwrap_err(),
            RecordParseError::DocIdTooLong
        );
        assert_eq!(
            BySubjectRecord::parse(b"123").unwrap_err(),
            RecordParseError::MissingSubject
        );
    }

    #[test]
    fn leading_doc_id_reads_digits_up_to_tab() {
        assert_eq!(leading_doc_id(b"123\trest"), Some(123));
        assert_eq!(leading_doc_id(b"0\t"), Some(0));
        assert_eq!(leading_doc_id(b"123"), None);
        assert_eq!(leading_doc_id(b"x\t"), None);
    }
}
