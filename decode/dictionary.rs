// ========================================================================================
//                                 Block dictionaries
// ========================================================================================
//
// Every block, and the genotype sub-block inside it, starts with a small table of
// `u32` key/value pairs: a count followed by the pairs. Values are either byte offsets
// relative to the start of the table's own block or plain scalars, depending on the
// key.

use crate::error::GtbError;
use crate::shared::files::{read_le_u32, slice_at};
use ahash::AHashMap;
use std::fmt;

/// A key type that can be looked up in a block dictionary.
pub trait DictionaryKey: Copy + fmt::Debug {
    fn code(self) -> u32;
}

/// Keys of the outer dictionary of a binary block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockKey {
    /// Offset of the variant payload. Not consumed by the genotype decoder.
    Variants = 1,
    /// Offset of the genotype sub-block.
    Genotypes = 2,
}

/// Keys of the genotype sub-block dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GtKey {
    /// Scalar: number of variant (BCF) lines in the block.
    BcfLines = 0,
    /// Scalar: number of binary genotype lines in the block.
    BinaryLines = 1,
    MatrixWah = 2,
    MatrixSparse = 3,
    /// Per binary line: WAH (set) or sparse (clear).
    LineSelect = 4,
    /// Per binary line: the line drives the permutation update.
    LineSort = 5,
    /// Per BCF line.
    LineMissing = 6,
    /// Per BCF line.
    LineNonUniformPhasing = 7,
    /// Per BCF line.
    LineEndOfVectors = 8,
    /// Per binary line: the line covers one haplotype per sample.
    LineHaploid = 9,
    /// Scalar: phase bit applied to every non-leading haplotype of a sample.
    DefaultPhasing = 10,
}

impl DictionaryKey for BlockKey {
    fn code(self) -> u32 {
        self as u32
    }
}

impl DictionaryKey for GtKey {
    fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockDictionary {
    entries: AHashMap<u32, u32>,
}

impl BlockDictionary {
    /// Parses the table at the start of `block`.
    pub fn read(block: &[u8]) -> Result<Self, GtbError> {
        let count = read_le_u32(block, 0, "dictionary size")? as usize;
        let pairs = slice_at(
            block,
            4,
            count.saturating_mul(8),
            "dictionary entries",
        )?;

        let mut entries = AHashMap::with_capacity(count);
        for pair in pairs.chunks_exact(8) {
            let key = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
            let value = u32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    /// Looks up an optional key. Absence is never an error; callers apply the fallback
    /// documented for that key.
    #[inline]
    pub fn get<K: DictionaryKey>(&self, key: K) -> Option<u32> {
        self.entries.get(&key.code()).copied()
    }

    /// Looks up a structurally required key. Absence means the block was not written by
    /// a conforming encoder.
    pub fn require<K: DictionaryKey>(&self, key: K) -> Result<u32, GtbError> {
        self.get(key).ok_or_else(|| {
            GtbError::Format(format!("block dictionary is missing required key {key:?}"))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
