// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// Number of low bits of an absolute line position that address a binary line
/// inside its block. The remaining high bits are the block id.
pub const BLOCK_BITS: u32 = 15;

/// Mask selecting the in-block offset of an absolute line position.
pub const BLOCK_MASK: u64 = (1u64 << BLOCK_BITS) - 1;

/// An absolute binary genotype line position, as handed out by the variant side of
/// the format. It packs the block id and the offset within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinePosition(pub u64);

impl LinePosition {
    #[inline]
    pub fn new(block_id: usize, offset: usize) -> Self {
        debug_assert!((offset as u64) <= BLOCK_MASK);
        Self(((block_id as u64) << BLOCK_BITS) | (offset as u64 & BLOCK_MASK))
    }

    #[inline]
    pub fn block_id(self) -> usize {
        (self.0 >> BLOCK_BITS) as usize
    }

    #[inline]
    pub fn offset(self) -> usize {
        (self.0 & BLOCK_MASK) as usize
    }
}

impl fmt::Display for LinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} line {}", self.block_id(), self.offset())
    }
}

// ----------------------------------------------------------------------------------------
// BCF genotype codes
// ----------------------------------------------------------------------------------------
//
// Genotype arrays use the BCF integer encoding so they can be handed straight to a
// record writer: `(allele + 1) << 1`, with the low bit carrying the phase of the
// allele relative to the previous one of the same sample. Zero is the missing value.

/// Encodes an allele index as an unphased genotype code.
#[inline]
pub const fn gt_unphased(allele: i32) -> i32 {
    (allele + 1) << 1
}

/// Encodes an allele index as a phased genotype code.
#[inline]
pub const fn gt_phased(allele: i32) -> i32 {
    gt_unphased(allele) | 1
}

/// Recovers the allele index from a genotype code. Missing decodes to -1.
#[inline]
pub const fn gt_allele(code: i32) -> i32 {
    (code >> 1) - 1
}

#[inline]
pub const fn gt_is_phased(code: i32) -> bool {
    code & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_position_splits_into_block_and_offset() {
        let pos = LinePosition::new(3, 17);
        assert_eq!(pos.0, (3 << BLOCK_BITS) | 17);
        assert_eq!(pos.block_id(), 3);
        assert_eq!(pos.offset(), 17);

        let last_of_first = LinePosition(BLOCK_MASK);
        assert_eq!(last_of_first.block_id(), 0);
        assert_eq!(last_of_first.offset(), BLOCK_MASK as usize);

        let first_of_second = LinePosition(BLOCK_MASK + 1);
        assert_eq!(first_of_second.block_id(), 1);
        assert_eq!(first_of_second.offset(), 0);
    }

    #[test]
    fn genotype_codes_follow_bcf_encoding() {
        assert_eq!(gt_unphased(0), 2);
        assert_eq!(gt_unphased(1), 4);
        assert_eq!(gt_phased(1), 5);
        assert_eq!(gt_allele(gt_phased(3)), 3);
        assert_eq!(gt_allele(0), -1);
        assert!(gt_is_phased(gt_phased(0)));
        assert!(!gt_is_phased(gt_unphased(2)));
    }
}
