//! Bit-pattern detection over a byte stream at arbitrary bit alignment.
//!
//! Compressed blocks are packed back to back with no byte padding, so finding
//! frame boundaries means watching the raw byte stream for a magic bit
//! sequence at all eight alignments. The scanner keeps a rolling 64-bit pipe:
//! each input byte shifts the pipe left by 8 and is OR'd in, then the pattern
//! is tested byte-aligned first and at the seven right-shifted alignments.
//!
//! Candidates are reported as they complete, at most one per input byte.
//! False positives are possible (payload bytes can spell the pattern), so
//! consumers verify every candidate structurally; there are no false
//! negatives once the pattern's final bit has been fed.

/// A candidate match reported by [`BitSequenceScanner::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMatch {
    /// Byte containing the first bit of the match.
    pub byte_offset: u64,
    /// Position of the first bit within that byte (0 = most significant).
    pub bit_in_byte: u32,
}

impl BitMatch {
    /// Absolute bit offset of the first bit of the match.
    #[inline]
    pub fn bit_offset(&self) -> u64 {
        self.byte_offset * 8 + u64::from(self.bit_in_byte)
    }
}

/// Push-model detector for a fixed bit sequence of up to 63 bits.
#[derive(Debug)]
pub struct BitSequenceScanner {
    sequence: u64,
    mask: u64,
    length_in_bytes: u64,
    pipe: u64,
    bytes_fed: u64,
}

impl BitSequenceScanner {
    /// `sequence` is right-aligned in the u64; `length_in_bits` must be
    /// 1..=63 and cover every set bit of `sequence`.
    pub fn new(sequence: u64, length_in_bits: u32) -> Self {
        debug_assert!((1..=63).contains(&length_in_bits));
        let mask = (1u64 << length_in_bits) - 1;
        debug_assert_eq!(sequence & !mask, 0);
        Self {
            sequence,
            mask,
            length_in_bytes: u64::from(length_in_bits.div_ceil(8)),
            pipe: 0,
            bytes_fed: 0,
        }
    }

    /// Feed one byte; reports at most one candidate per byte, preferring the
    /// byte-aligned position, then descending bit positions.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Option<BitMatch> {
        self.bytes_fed += 1;
        self.pipe = (self.pipe << 8) | u64::from(byte);
        if self.pipe & self.mask == self.sequence {
            // A hit before the pipe is warm would start before byte 0.
            let byte_offset = self.bytes_fed.checked_sub(self.length_in_bytes)?;
            return Some(BitMatch {
                byte_offset,
                bit_in_byte: 0,
            });
        }
        let mut shifted = self.pipe;
        for i in 1..8u32 {
            shifted >>= 1;
            if shifted & self.mask == self.sequence {
                let byte_offset = self.bytes_fed.checked_sub(self.length_in_bytes + 1)?;
                return Some(BitMatch {
                    byte_offset,
                    bit_in_byte: 8 - i,
                });
            }
        }
        None
    }

    /// Total bytes fed so far.
    #[inline]
    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: u64 = 0x2718_2818_2845;
    const PATTERN_BITS: u32 = 48;

    /// Zeroed stream of `total_bytes` with the pattern's bits set starting at
    /// `bit_offset`.
    fn stream_with_pattern_at(bit_offset: usize, total_bytes: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; total_bytes];
        for i in 0..PATTERN_BITS as usize {
            if (PATTERN >> (PATTERN_BITS as usize - 1 - i)) & 1 == 1 {
                let pos = bit_offset + i;
                bytes[pos / 8] |= 1 << (7 - pos % 8);
            }
        }
        bytes
    }

    fn scan_all(bytes: &[u8]) -> Vec<BitMatch> {
        let mut scanner = BitSequenceScanner::new(PATTERN, PATTERN_BITS);
        bytes.iter().filter_map(|&b| scanner.push(b)).collect()
    }

    #[test]
    fn byte_aligned_match() {
        let bytes = stream_with_pattern_at(16, 12);
        let hits = scan_all(&bytes);
        assert_eq!(
            hits,
            vec![BitMatch {
                byte_offset: 2,
                bit_in_byte: 0
            }]
        );
    }

    #[test]
    fn match_at_every_bit_alignment() {
        for bit in 0..8usize {
            let offset = 24 + bit;
            let hits = scan_all(&stream_with_pattern_at(offset, 16));
            assert_eq!(hits.len(), 1, "alignment {bit}");
            assert_eq!(hits[0].byte_offset, 3, "alignment {bit}");
            assert_eq!(hits[0].bit_in_byte, bit as u32, "alignment {bit}");
            assert_eq!(hits[0].bit_offset(), offset as u64);
        }
    }

    #[test]
    fn match_ending_at_stream_end_is_reported() {
        let bytes = stream_with_pattern_at(80, 16);
        let hits = scan_all(&bytes);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bit_offset(), 80);
    }

    #[test]
    fn absent_pattern_reports_nothing() {
        assert!(scan_all(&[0xAB; 64]).is_empty());
        assert!(scan_all(&[0x00; 64]).is_empty());
        assert!(scan_all(&[0xFF; 64]).is_empty());
    }

    #[test]
    fn garbage_prefix_does_not_suppress_match() {
        let mut bytes = stream_with_pattern_at(43, 16);
        for (i, b) in [0x5Au8, 0xC3, 0xFF, 0x00, 0x81].into_iter().enumerate() {
            bytes[i] = b;
        }
        let hits = scan_all(&bytes);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bit_offset(), 43);
    }

    #[test]
    fn warmup_phantom_is_dropped() {
        // A shifted hit in the first bytes would claim a start before the
        // stream began; the scanner must swallow it.
        let mut scanner = BitSequenceScanner::new(0x0002, 16);
        assert_eq!(scanner.push(0x00), None);
        assert_eq!(scanner.push(0x04), None);
    }

    #[test]
    fn bytes_fed_counts_input() {
        let mut scanner = BitSequenceScanner::new(PATTERN, PATTERN_BITS);
        for b in [1u8, 2, 3] {
            assert_eq!(scanner.push(b), None);
        }
        assert_eq!(scanner.bytes_fed(), 3);
    }

    #[test]
    fn bit_offset_combines_byte_and_bit() {
        let m = BitMatch {
            byte_offset: 3,
            bit_in_byte: 5,
        };
        assert_eq!(m.bit_offset(), 29);
    }
}
