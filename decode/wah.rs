// ========================================================================================
//
//                       WAH AND SPARSE PRIMITIVES: THE BIT-LEVEL CODEC
//
// ========================================================================================
//
// Every genotype line is stored either as a WAH bitmap or as a sparse index list. The
// width of the words used by both encodings is a property of the file (read from the
// header), so the codecs here are tagged with a runtime `WordWidth` rather than being
// compiled per width. All reads go through bounds-checked slices; a cursor is a plain
// byte offset into the region being decoded.

use crate::error::GtbError;
use crate::shared::files::{read_le_u16, read_le_u32};

/// Width of an encoded word, fixed per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    U16,
    U32,
}

impl WordWidth {
    /// Maps the byte count stored in the header to a width.
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            2 => Some(WordWidth::U16),
            4 => Some(WordWidth::U32),
            _ => None,
        }
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            WordWidth::U16 => 2,
            WordWidth::U32 => 4,
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        (self.bytes() * 8) as u32
    }

    #[inline]
    fn load(self, data: &[u8], offset: usize, what: &str) -> Result<u64, GtbError> {
        match self {
            WordWidth::U16 => read_le_u16(data, offset, what).map(u64::from),
            WordWidth::U32 => read_le_u32(data, offset, what).map(u64::from),
        }
    }
}

// ----------------------------------------------------------------------------------------
// WAH bitmaps
// ----------------------------------------------------------------------------------------

/// Decoder for word-aligned hybrid bitmaps.
///
/// A word with its most significant bit clear is a literal: its remaining bits are the
/// next `payload_bits` positions of the bitmap, least significant bit first. A word with
/// the most significant bit set is a fill: the next bit is the fill value and the rest
/// count how many `payload_bits` groups the fill covers.
#[derive(Debug, Clone, Copy)]
pub struct WahCodec {
    width: WordWidth,
    payload_bits: usize,
    fill_flag: u64,
    fill_value: u64,
    counter_mask: u64,
}

impl WahCodec {
    pub fn new(width: WordWidth) -> Self {
        let bits = width.bits();
        let fill_flag = 1u64 << (bits - 1);
        let fill_value = 1u64 << (bits - 2);
        Self {
            width,
            payload_bits: bits as usize - 1,
            fill_flag,
            fill_value,
            counter_mask: fill_value - 1,
        }
    }

    pub fn width(&self) -> WordWidth {
        self.width
    }

    /// Number of bitmap positions carried by one literal word.
    #[inline]
    pub fn payload_bits(&self) -> usize {
        self.payload_bits
    }

    /// Length of a scratch buffer able to hold `n_bits` decoded positions, rounded up
    /// to a whole number of literal words.
    #[inline]
    pub fn padded_len(&self, n_bits: usize) -> usize {
        n_bits.div_ceil(self.payload_bits) * self.payload_bits
    }

    #[inline]
    fn next_word(&self, data: &[u8], cursor: &mut usize) -> Result<u64, GtbError> {
        let word = self.width.load(data, *cursor, "WAH word")?;
        *cursor += self.width.bytes();
        Ok(word)
    }

    #[inline]
    fn fill_len(&self, word: u64, at: usize) -> Result<usize, GtbError> {
        let groups = (word & self.counter_mask) as usize;
        if groups == 0 {
            return Err(GtbError::CorruptBlock(format!(
                "zero-length WAH fill word ending at byte {at}"
            )));
        }
        Ok(groups * self.payload_bits)
    }

    /// Decodes the next `n_bits` positions into `out[..n_bits]` and returns how many of
    /// them are set. The cursor is left on the first word of the following line.
    pub fn extract(
        &self,
        data: &[u8],
        cursor: &mut usize,
        out: &mut [bool],
        n_bits: usize,
    ) -> Result<usize, GtbError> {
        if out.len() < n_bits {
            return Err(GtbError::Precondition(format!(
                "WAH output buffer holds {} bits, {n_bits} requested",
                out.len()
            )));
        }

        let mut filled = 0usize;
        let mut ones = 0usize;
        while filled < n_bits {
            let word = self.next_word(data, cursor)?;
            if word & self.fill_flag != 0 {
                let run = self.fill_len(word, *cursor)?;
                let value = word & self.fill_value != 0;
                let end = (filled + run).min(n_bits);
                out[filled..end].fill(value);
                if value {
                    ones += end - filled;
                }
                filled += run;
            } else {
                let take = self.payload_bits.min(n_bits - filled);
                for (bit, slot) in out[filled..filled + take].iter_mut().enumerate() {
                    *slot = (word >> bit) & 1 == 1;
                }
                ones += (word & low_mask(take)).count_ones() as usize;
                filled += self.payload_bits;
            }
        }
        Ok(ones)
    }

    /// Skips the next `n_bits` positions without materializing them, returning the
    /// number of set positions skipped.
    pub fn advance(&self, data: &[u8], cursor: &mut usize, n_bits: usize) -> Result<usize, GtbError> {
        let mut covered = 0usize;
        let mut ones = 0usize;
        while covered < n_bits {
            let word = self.next_word(data, cursor)?;
            if word & self.fill_flag != 0 {
                let run = self.fill_len(word, *cursor)?;
                if word & self.fill_value != 0 {
                    ones += run.min(n_bits - covered);
                }
                covered += run;
            } else {
                let take = self.payload_bits.min(n_bits - covered);
                ones += (word & low_mask(take)).count_ones() as usize;
                covered += self.payload_bits;
            }
        }
        Ok(ones)
    }
}

#[inline]
fn low_mask(bits: usize) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

// ----------------------------------------------------------------------------------------
// Sparse lists
// ----------------------------------------------------------------------------------------

/// Header of one sparse line: how many haplotype indices follow, and whether they list
/// the haplotypes *without* the allele (negated) instead of those with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseLine {
    pub count: usize,
    pub negated: bool,
}

impl SparseLine {
    /// Number of haplotypes carrying the allele on a line of `n_haps` haplotypes.
    #[inline]
    pub fn ones(&self, n_haps: usize) -> Result<usize, GtbError> {
        if self.count > n_haps {
            return Err(GtbError::CorruptBlock(format!(
                "sparse line lists {} of {n_haps} haplotypes",
                self.count
            )));
        }
        Ok(if self.negated { n_haps - self.count } else { self.count })
    }
}

/// Decoder for sparse lines: a header word whose most significant bit is the negation
/// flag and whose other bits are the entry count, followed by that many index words.
#[derive(Debug, Clone, Copy)]
pub struct SparseCodec {
    width: WordWidth,
    negated_bit: u64,
}

impl SparseCodec {
    pub fn new(width: WordWidth) -> Self {
        Self {
            width,
            negated_bit: 1u64 << (width.bits() - 1),
        }
    }

    pub fn width(&self) -> WordWidth {
        self.width
    }

    #[inline]
    fn read_header(&self, data: &[u8], cursor: &mut usize) -> Result<SparseLine, GtbError> {
        let word = self.width.load(data, *cursor, "sparse line header")?;
        *cursor += self.width.bytes();
        Ok(SparseLine {
            count: (word & !self.negated_bit) as usize,
            negated: word & self.negated_bit != 0,
        })
    }

    /// Decodes the next sparse line, replacing the contents of `list` with its indices.
    pub fn extract(
        &self,
        data: &[u8],
        cursor: &mut usize,
        list: &mut Vec<usize>,
    ) -> Result<SparseLine, GtbError> {
        let line = self.read_header(data, cursor)?;
        list.clear();
        list.reserve(line.count);
        for _ in 0..line.count {
            list.push(self.width.load(data, *cursor, "sparse index")? as usize);
            *cursor += self.width.bytes();
        }
        Ok(line)
    }

    /// Skips the next sparse line of a line of `n_haps` haplotypes, returning its header.
    /// Indices are range-checked but not kept.
    pub fn advance(
        &self,
        data: &[u8],
        cursor: &mut usize,
        n_haps: usize,
    ) -> Result<SparseLine, GtbError> {
        let line = self.read_header(data, cursor)?;
        let body = line.count * self.width.bytes();
        if data.len() < *cursor + body {
            return Err(GtbError::CorruptBlock(format!(
                "sparse line of {} entries at byte {} runs past the end of the sparse matrix",
                line.count, *cursor
            )));
        }
        for _ in 0..line.count {
            let index = self.width.load(data, *cursor, "sparse index")? as usize;
            if index >= n_haps {
                return Err(GtbError::CorruptBlock(format!(
                    "sparse index {index} exceeds the line's {n_haps} haplotypes"
                )));
            }
            *cursor += self.width.bytes();
        }
        Ok(line)
    }
}
