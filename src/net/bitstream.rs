//! Bit-level stream writer/reader
//!
//! Writes MSB-first into a caller-supplied byte buffer. Fields are packed with
//! no padding between them; the caller decides the layout. Continuous values go
//! through [`BitWriter::write_float`], which quantizes a bounded range onto an
//! unsigned integer of the requested width.

use bitvec::prelude::*;

/// Errors from encoding or decoding a bit stream
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Stream overflow: {requested} bits requested, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },
    #[error("Unexpected end of stream: {requested} bits requested, {remaining} remaining")]
    UnexpectedEnd { requested: usize, remaining: usize },
    #[error("{field} value {value} outside encodable range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("Invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },
    #[error("Unsupported bit width {0} (expected 1..=32)")]
    InvalidBitWidth(u8),
}

/// Largest integer representable in `bits` bits
#[inline]
pub fn max_value(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Worst-case absolute error of a value quantized by `write_float`
pub fn float_tolerance(min: f32, max: f32, bits: u8) -> f32 {
    ((max - min) as f64 / max_value(bits) as f64 / 2.0) as f32
}

fn check_width(bits: u8) -> Result<(), CodecError> {
    if bits == 0 || bits > 32 {
        return Err(CodecError::InvalidBitWidth(bits));
    }
    Ok(())
}

/// Position inside a writer that can be rolled back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// MSB-first bit writer over a borrowed byte buffer
pub struct BitWriter<'a> {
    bits: &'a mut BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let bits = buffer.view_bits_mut::<Msb0>();
        bits.fill(false);
        Self { bits, pos: 0 }
    }

    /// Bits written so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.bits.len() - self.pos
    }

    /// Bytes touched so far (last byte zero-padded)
    #[inline]
    pub fn bytes_written(&self) -> usize {
        self.pos.div_ceil(8)
    }

    fn reserve(&self, requested: usize) -> Result<(), CodecError> {
        if requested > self.remaining_bits() {
            return Err(CodecError::Overflow {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Write the low `bits` bits of `value`.
    ///
    /// Values that do not fit are rejected rather than truncated.
    pub fn write_bits(&mut self, value: u32, bits: u8) -> Result<(), CodecError> {
        check_width(bits)?;
        if value > max_value(bits) {
            return Err(CodecError::InvalidValue {
                field: "integer",
                value,
            });
        }
        let width = bits as usize;
        self.reserve(width)?;
        self.bits[self.pos..self.pos + width].store_be(value);
        self.pos += width;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.reserve(1)?;
        self.bits.set(self.pos, value);
        self.pos += 1;
        Ok(())
    }

    /// Quantize `value` in `[min, max]` onto `bits` bits.
    ///
    /// Non-finite or out-of-range values are rejected.
    pub fn write_float(
        &mut self,
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
        bits: u8,
    ) -> Result<(), CodecError> {
        check_width(bits)?;
        if !value.is_finite() || value < min || value > max {
            return Err(CodecError::OutOfRange {
                field,
                value,
                min,
                max,
            });
        }
        let range = max_value(bits) as f64;
        let normalized = (value as f64 - min as f64) / (max as f64 - min as f64);
        let quantized = (normalized * range).round().clamp(0.0, range) as u32;
        self.write_bits(quantized, bits)
    }

    /// Overwrite `bits` bits previously written at `at`, e.g. a count slot
    /// reserved before the records it counts
    pub fn patch_bits(&mut self, at: Checkpoint, value: u32, bits: u8) -> Result<(), CodecError> {
        check_width(bits)?;
        if value > max_value(bits) {
            return Err(CodecError::InvalidValue {
                field: "integer",
                value,
            });
        }
        let Checkpoint(start) = at;
        let end = start + bits as usize;
        if end > self.pos {
            return Err(CodecError::Overflow {
                requested: bits as usize,
                remaining: self.pos.saturating_sub(start),
            });
        }
        self.bits[start..end].store_be(value);
        Ok(())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    /// Discard everything written after `checkpoint`
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint(at) = checkpoint;
        if at < self.pos {
            self.bits[at..self.pos].fill(false);
            self.pos = at;
        }
    }
}

/// MSB-first bit reader over a borrowed byte buffer
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            bits: buffer.view_bits::<Msb0>(),
            pos: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.bits.len() - self.pos
    }

    fn take(&mut self, requested: usize) -> Result<&'a BitSlice<u8, Msb0>, CodecError> {
        if requested > self.remaining_bits() {
            return Err(CodecError::UnexpectedEnd {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        let bits: &'a BitSlice<u8, Msb0> = self.bits;
        let slice = &bits[self.pos..self.pos + requested];
        self.pos += requested;
        Ok(slice)
    }

    pub fn read_bits(&mut self, bits: u8) -> Result<u32, CodecError> {
        check_width(bits)?;
        Ok(self.take(bits as usize)?.load_be::<u32>())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Inverse of [`BitWriter::write_float`]; result always lies in `[min, max]`
    pub fn read_float(&mut self, min: f32, max: f32, bits: u8) -> Result<f32, CodecError> {
        let quantized = self.read_bits(bits)? as f64;
        let range = max_value(bits) as f64;
        let value = min as f64 + quantized / range * (max as f64 - min as f64);
        Ok((value as f32).clamp(min, max))
    }
}
