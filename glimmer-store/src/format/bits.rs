//! MSB-first bit packing helpers.
//!
//! Corpus frames are packed back to back with no byte padding, so the writer
//! and every reader need bit-granular access: append N-bit fields to a byte
//! sink, and read N-bit fields from a byte slice at any bit offset. Bit order
//! matches stream order throughout: the first bit written lands in the most
//! significant bit of the first byte.

use std::io::{self, Write};

/// Append-only MSB-first bit sink over any [`Write`].
///
/// Bytes reach the sink in small pieces; hand it buffered output for file
/// targets.
pub struct BitWriter<W: Write> {
    inner: W,
    acc: u64,
    acc_bits: u32,
    bits_written: u64,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            acc: 0,
            acc_bits: 0,
            bits_written: 0,
        }
    }

    /// Total bits written, including pending bits not yet flushed to a byte.
    #[inline]
    pub fn bit_position(&self) -> u64 {
        self.bits_written
    }

    /// Write the low `width` bits of `value`, most significant first.
    /// `width` must be 1..=56.
    pub fn write_bits(&mut self, value: u64, width: u32) -> io::Result<()> {
        debug_assert!((1..=56).contains(&width));
        debug_assert_eq!(value >> width, 0);
        self.acc = (self.acc << width) | value;
        self.acc_bits += width;
        self.bits_written += u64::from(width);
        while self.acc_bits >= 8 {
            let byte = (self.acc >> (self.acc_bits - 8)) as u8;
            self.inner.write_all(&[byte])?;
            self.acc_bits -= 8;
        }
        Ok(())
    }

    /// Write whole bytes. Passes straight through when byte-aligned,
    /// otherwise shifts each byte through the pending accumulator.
    pub fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        if self.acc_bits == 0 {
            self.inner.write_all(data)?;
            self.bits_written += data.len() as u64 * 8;
            return Ok(());
        }
        let shift = self.acc_bits;
        let mut chunk = [0u8; 512];
        let mut filled = 0;
        for &b in data {
            self.acc = (self.acc << 8) | u64::from(b);
            chunk[filled] = (self.acc >> shift) as u8;
            filled += 1;
            if filled == chunk.len() {
                self.inner.write_all(&chunk)?;
                filled = 0;
            }
        }
        self.inner.write_all(&chunk[..filled])?;
        self.bits_written += data.len() as u64 * 8;
        Ok(())
    }

    /// Pad with zero bits to the next byte boundary.
    pub fn align_to_byte(&mut self) -> io::Result<()> {
        if self.acc_bits > 0 {
            let pad = 8 - self.acc_bits;
            self.acc <<= pad;
            self.inner.write_all(&[self.acc as u8])?;
            self.bits_written += u64::from(pad);
            self.acc_bits = 0;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Return the inner writer. The sink must be byte-aligned; any pending
    /// sub-byte bits are discarded.
    pub fn into_inner(self) -> W {
        debug_assert_eq!(self.acc_bits, 0);
        self.inner
    }
}

/// Read `width` (1..=57) bits MSB-first from `data` at `bit_offset`.
///
/// The caller guarantees `bit_offset + width <= data.len() * 8`.
#[inline]
pub fn read_bits(data: &[u8], bit_offset: u64, width: u32) -> u64 {
    debug_assert!((1..=57).contains(&width));
    debug_assert!(bit_offset + u64::from(width) <= data.len() as u64 * 8);
    let first = (bit_offset / 8) as usize;
    let shift = (bit_offset % 8) as u32;
    let nbytes = ((shift + width).div_ceil(8)) as usize;
    let mut window = 0u64;
    for i in 0..nbytes {
        window = (window << 8) | u64::from(data[first + i]);
    }
    (window >> (nbytes as u32 * 8 - shift - width)) & ((1u64 << width) - 1)
}

/// Copy `len` whole bytes starting at `bit_offset` into `out` (cleared
/// first), shifting every byte when the offset is not byte-aligned.
///
/// The caller guarantees `bit_offset + len * 8 <= data.len() * 8`.
pub fn copy_bits_to_bytes(data: &[u8], bit_offset: u64, len: usize, out: &mut Vec<u8>) {
    debug_assert!(bit_offset + len as u64 * 8 <= data.len() as u64 * 8);
    out.clear();
    out.reserve(len);
    let base = (bit_offset / 8) as usize;
    let shift = (bit_offset % 8) as u32;
    if shift == 0 {
        out.extend_from_slice(&data[base..base + len]);
        return;
    }
    for i in 0..len {
        let hi = data[base + i] << shift;
        let lo = data[base + i + 1] >> (8 - shift);
        out.push(hi | lo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bits_packs_msb_first() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(0b101, 3).unwrap();
        w.write_bits(0b01, 2).unwrap();
        w.write_bits(0b110, 3).unwrap();
        assert_eq!(w.bit_position(), 8);
        assert_eq!(w.into_inner(), vec![0b1010_1110]);
    }

    #[test]
    fn align_pads_with_zeros() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(0b11, 2).unwrap();
        w.align_to_byte().unwrap();
        assert_eq!(w.bit_position(), 8);
        assert_eq!(w.into_inner(), vec![0b1100_0000]);
    }

    #[test]
    fn write_bytes_aligned_passthrough() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bytes(&[0xDE, 0xAD]).unwrap();
        assert_eq!(w.into_inner(), vec![0xDE, 0xAD]);
    }

    #[test]
    fn write_bytes_unaligned_shifts() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(0b1111, 4).unwrap();
        w.write_bytes(&[0x00, 0xFF]).unwrap();
        w.align_to_byte().unwrap();
        assert_eq!(w.into_inner(), vec![0b1111_0000, 0b0000_1111, 0b1111_0000]);
    }

    #[test]
    fn write_bytes_unaligned_long_run() {
        // Longer than the internal chunk, to cross the chunk flush.
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(0b101, 3).unwrap();
        w.write_bytes(&data).unwrap();
        w.align_to_byte().unwrap();
        let packed = w.into_inner();
        for (i, &b) in data.iter().enumerate() {
            let got = read_bits(&packed, 3 + i as u64 * 8, 8) as u8;
            assert_eq!(got, b, "byte {i}");
        }
    }

    #[test]
    fn read_bits_round_trip() {
        let fields: &[(u64, u32)] = &[
            (0x2718_2818_2845, 48),
            (1234, 32),
            (7, 5),
            (0, 1),
            (u32::MAX as u64, 32),
        ];
        let mut w = BitWriter::new(Vec::new());
        for &(v, width) in fields {
            w.write_bits(v, width).unwrap();
        }
        w.align_to_byte().unwrap();
        let packed = w.into_inner();
        let mut pos = 0u64;
        for &(v, width) in fields {
            assert_eq!(read_bits(&packed, pos, width), v);
            pos += u64::from(width);
        }
    }

    #[test]
    fn copy_bits_aligned() {
        let data = [0x12, 0x34, 0x56];
        let mut out = Vec::new();
        copy_bits_to_bytes(&data, 8, 2, &mut out);
        assert_eq!(out, vec![0x34, 0x56]);
    }

    #[test]
    fn copy_bits_unaligned() {
        let data = [0b1111_0000, 0b1010_1010, 0b0101_0101];
        let mut out = Vec::new();
        copy_bits_to_bytes(&data, 4, 2, &mut out);
        assert_eq!(out, vec![0b0000_1010, 0b1010_0101]);
    }
}
