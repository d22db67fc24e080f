// ========================================================================================
//
//                  THE DECODE CURSOR: WALKING BINARY LINES THROUGH A BLOCK
//
// ========================================================================================
//
// ### Purpose ###
//
// A `DecodeCursor` is the stateful session bound to one genotype block. It walks the
// binary genotype lines of the block strictly forward, advancing its WAH and sparse
// cursors and keeping the PBWT permutation `a` in step with every sorting line, and
// materializes either a genotype array or per-allele counts on request.
//
// ### Invariants ###
//
// 1.  `a` is always a permutation of `0..n_haps`. After a sorting line it is the stable
//     partition of its previous value keyed by the decoded values (0s first).
// 2.  `wah_cursor` and `sparse_cursor` only move forward, by exactly the encoded size
//     of every line consumed, until `reset()` returns them to their origins.
// 3.  `position` is the index of the next binary line to be consumed.
//
// After any error the cursor is in an unspecified position and must be reset (the
// accessor discards it instead).

use crate::dictionary::{BlockDictionary, GtKey};
use crate::error::GtbError;
use crate::header::FormatConfig;
use crate::locator::BlockView;
use crate::types::{gt_allele, gt_unphased};
use crate::wah::{SparseCodec, WahCodec};
use log::warn;

/// Per variant (BCF) line flags carried by the block.
///
/// They are surfaced for callers only: the block holds no payload from which missing or
/// end-of-vector entries could be restored, so genotype arrays never contain them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineFlags {
    pub has_missing: bool,
    pub has_non_uniform_phasing: bool,
    pub has_end_of_vector: bool,
}

pub struct DecodeCursor {
    block: BlockView,
    wah: WahCodec,
    sparse_codec: SparseCodec,
    n_haps: usize,
    ploidy: usize,
    bcf_lines: usize,
    binary_lines: usize,
    default_phased: bool,

    // --- Per binary line ---
    line_is_wah: Vec<bool>,
    line_is_sorting: Vec<bool>,
    line_is_haploid: Vec<bool>,

    // --- Per BCF line ---
    line_has_missing: Vec<bool>,
    line_has_non_uniform_phasing: Vec<bool>,
    line_has_end_of_vector: Vec<bool>,

    // --- Walking state ---
    wah_origin: usize,
    wah_cursor: usize,
    sparse_origin: usize,
    sparse_cursor: usize,
    position: usize,

    // --- Scratch ---
    a: Vec<u32>,
    b: Vec<u32>,
    y: Vec<bool>,
    marks: Vec<bool>,
    sparse: Vec<usize>,
    allele_counts: Vec<usize>,
}

impl DecodeCursor {
    /// Binds a cursor to a genotype block, reading its dictionary and per-line flags.
    /// Matrices are not touched until lines are consumed.
    pub fn new(config: FormatConfig, block: BlockView) -> Result<Self, GtbError> {
        let wah = WahCodec::new(config.wah_width);
        let sparse_codec = SparseCodec::new(config.index_width);
        let bytes = block.bytes();
        let dictionary = BlockDictionary::read(bytes)?;

        let bcf_lines = dictionary.require(GtKey::BcfLines)? as usize;
        let binary_lines = dictionary.require(GtKey::BinaryLines)? as usize;
        let wah_origin = region_origin(&dictionary, GtKey::MatrixWah, bytes.len())?;
        let sparse_origin = region_origin(&dictionary, GtKey::MatrixSparse, bytes.len())?;

        let line_is_wah = read_flags(bytes, &dictionary, GtKey::LineSelect, binary_lines, &wah)?
            .unwrap_or_else(|| vec![true; binary_lines]);
        // By default only the WAH lines are sorting.
        let line_is_sorting = read_flags(bytes, &dictionary, GtKey::LineSort, binary_lines, &wah)?
            .unwrap_or_else(|| line_is_wah.clone());
        let line_is_haploid = read_flags(bytes, &dictionary, GtKey::LineHaploid, binary_lines, &wah)?
            .unwrap_or_else(|| vec![false; binary_lines]);

        let per_bcf_line = |key| -> Result<Vec<bool>, GtbError> {
            Ok(read_flags(bytes, &dictionary, key, bcf_lines, &wah)?
                .unwrap_or_else(|| vec![false; bcf_lines]))
        };
        let line_has_missing = per_bcf_line(GtKey::LineMissing)?;
        let line_has_non_uniform_phasing = per_bcf_line(GtKey::LineNonUniformPhasing)?;
        let line_has_end_of_vector = per_bcf_line(GtKey::LineEndOfVectors)?;

        let default_phased = dictionary.get(GtKey::DefaultPhasing).unwrap_or(0) != 0;

        let n_haps = config.hap_samples;
        Ok(Self {
            wah,
            sparse_codec,
            n_haps,
            ploidy: config.ploidy.max(1),
            bcf_lines,
            binary_lines,
            default_phased,
            line_is_wah,
            line_is_sorting,
            line_is_haploid,
            line_has_missing,
            line_has_non_uniform_phasing,
            line_has_end_of_vector,
            wah_origin,
            wah_cursor: wah_origin,
            sparse_origin,
            sparse_cursor: sparse_origin,
            position: 0,
            a: (0..n_haps as u32).collect(),
            b: vec![0; n_haps],
            y: vec![false; wah.padded_len(n_haps)],
            marks: vec![false; n_haps],
            sparse: Vec::new(),
            allele_counts: Vec::new(),
            block,
        })
    }

    /// Index of the next binary line to be consumed.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn binary_lines(&self) -> usize {
        self.binary_lines
    }

    pub fn bcf_lines(&self) -> usize {
        self.bcf_lines
    }

    /// The current PBWT permutation: slot `i` holds the haplotype whose value is
    /// stored at bit `i` of the next sorted bitmap.
    pub fn permutation(&self) -> &[u32] {
        &self.a
    }

    /// Counts produced by the last fill call, indexed by allele (REF first).
    pub fn allele_counts(&self) -> &[usize] {
        &self.allele_counts
    }

    pub fn line_flags(&self, bcf_line: usize) -> Option<LineFlags> {
        (bcf_line < self.bcf_lines).then(|| LineFlags {
            has_missing: self.line_has_missing[bcf_line],
            has_non_uniform_phasing: self.line_has_non_uniform_phasing[bcf_line],
            has_end_of_vector: self.line_has_end_of_vector[bcf_line],
        })
    }

    /// Returns to the first line of the block with the identity permutation.
    pub fn reset(&mut self) {
        self.wah_cursor = self.wah_origin;
        self.sparse_cursor = self.sparse_origin;
        for (slot, hap) in self.a.iter_mut().zip(0u32..) {
            *slot = hap;
        }
        self.position = 0;
    }

    /// Moves the cursor so that `target` is the next line to be consumed.
    ///
    /// Seeking backwards is supported but restarts from the first line of the block.
    pub fn seek(&mut self, target: usize) -> Result<(), GtbError> {
        if target == self.position {
            return Ok(());
        }
        if target > self.binary_lines {
            return Err(GtbError::Precondition(format!(
                "seek to line {target} in a block of {} binary lines",
                self.binary_lines
            )));
        }
        if target < self.position {
            warn!(
                "Slow backwards seek from line {} to line {target}, replaying the block from its start",
                self.position
            );
            self.reset();
        }
        while self.position < target {
            let haps = self.line_haps(self.position);
            self.advance_line(haps)?;
        }
        Ok(())
    }

    /// Decodes the `n_alleles - 1` binary lines of the variant at the current position
    /// into `out`, one BCF genotype code per haplotype in original haplotype order.
    pub fn fill_genotype_array_advance(
        &mut self,
        out: &mut [i32],
        n_alleles: usize,
    ) -> Result<(), GtbError> {
        let haps = self.begin_variant(n_alleles)?;
        if out.len() < haps {
            return Err(GtbError::Precondition(format!(
                "genotype array holds {} entries, line covers {haps} haplotypes",
                out.len()
            )));
        }

        let mut total_alt = 0usize;
        for alt in 1..n_alleles {
            let line = self.position;
            let ones = self.decode_line_into(out, line, haps, alt as i32)?;
            self.allele_counts[alt] = ones;
            total_alt += ones;
            self.update_permutation(line);
            self.position += 1;
        }
        self.finish_counts(haps, total_alt)
    }

    /// Same traversal as [`Self::fill_genotype_array_advance`] but only the allele counts
    /// are kept.
    pub fn fill_allele_counts_advance(&mut self, n_alleles: usize) -> Result<(), GtbError> {
        let haps = self.begin_variant(n_alleles)?;
        let mut total_alt = 0usize;
        for alt in 1..n_alleles {
            let ones = self.advance_line(haps)?;
            self.allele_counts[alt] = ones;
            total_alt += ones;
        }
        self.finish_counts(haps, total_alt)
    }

    // ------------------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------------------

    #[inline]
    fn line_haps(&self, line: usize) -> usize {
        if self.line_is_haploid[line] {
            self.n_haps >> 1
        } else {
            self.n_haps
        }
    }

    /// Validates the request and returns the haplotype count of the variant's first line.
    fn begin_variant(&mut self, n_alleles: usize) -> Result<usize, GtbError> {
        if n_alleles < 2 {
            return Err(GtbError::Precondition(format!(
                "a variant needs at least two alleles, got {n_alleles}"
            )));
        }
        if self.position + n_alleles - 1 > self.binary_lines {
            return Err(GtbError::Precondition(format!(
                "{} lines requested from line {} of a block of {} binary lines",
                n_alleles - 1,
                self.position,
                self.binary_lines
            )));
        }
        self.allele_counts.clear();
        self.allele_counts.resize(n_alleles, 0);
        Ok(self.line_haps(self.position))
    }

    fn finish_counts(&mut self, haps: usize, total_alt: usize) -> Result<(), GtbError> {
        self.allele_counts[0] = haps.checked_sub(total_alt).ok_or_else(|| {
            GtbError::CorruptBlock(format!(
                "{total_alt} alternate alleles counted over {haps} haplotypes"
            ))
        })?;
        Ok(())
    }

    /// Consumes one line without materializing genotypes, returning its count of ones.
    /// Sorting lines are still extracted so the permutation can follow them.
    fn advance_line(&mut self, haps: usize) -> Result<usize, GtbError> {
        let line = self.position;
        let ones = if self.line_is_sorting[line] {
            self.extract_sorting_values(line, haps)?
        } else if self.line_is_wah[line] {
            self.wah
                .advance(self.block.bytes(), &mut self.wah_cursor, haps)?
        } else {
            self.sparse_codec
                .advance(self.block.bytes(), &mut self.sparse_cursor, haps)?
                .ones(haps)?
        };
        self.update_permutation(line);
        self.position += 1;
        Ok(ones)
    }

    /// Decodes a sorting line into `y`, in permutation order.
    fn extract_sorting_values(&mut self, line: usize, haps: usize) -> Result<usize, GtbError> {
        if self.line_is_wah[line] {
            let bytes = self.block.bytes();
            self.wah.extract(bytes, &mut self.wah_cursor, &mut self.y, haps)
        } else {
            let negated = self.extract_sparse(haps)?;
            self.sparse_values_to_y(haps, negated);
            Ok(if negated { haps - self.sparse.len() } else { self.sparse.len() })
        }
    }

    /// Decodes the next sparse line into `self.sparse`, checking every index against the
    /// line's haplotype count. Returns the negation flag.
    fn extract_sparse(&mut self, haps: usize) -> Result<bool, GtbError> {
        let bytes = self.block.bytes();
        let line = self
            .sparse_codec
            .extract(bytes, &mut self.sparse_cursor, &mut self.sparse)?;
        if let Some(&bad) = self.sparse.iter().find(|&&h| h >= haps) {
            return Err(GtbError::CorruptBlock(format!(
                "sparse index {bad} on line {} exceeds its {haps} haplotypes",
                self.position
            )));
        }
        if line.count > haps {
            return Err(GtbError::CorruptBlock(format!(
                "sparse line {} lists {} of {haps} haplotypes",
                self.position, line.count
            )));
        }
        Ok(line.negated)
    }

    /// Expands the decoded sparse list into `y` so sparse sorting lines partition the
    /// permutation exactly like sorted bitmaps do.
    fn sparse_values_to_y(&mut self, haps: usize, negated: bool) {
        for &h in &self.sparse {
            self.marks[h] = true;
        }
        for (value, &hap) in self.y[..haps].iter_mut().zip(&self.a) {
            *value = self.marks[hap as usize] != negated;
        }
        for &h in &self.sparse {
            self.marks[h] = false;
        }
    }

    /// Decodes one line of a variant and writes its allele into `out`. `alt == 1` is the
    /// REF / first ALT line and defines every haplotype; later lines only add their allele.
    fn decode_line_into(
        &mut self,
        out: &mut [i32],
        line: usize,
        haps: usize,
        alt: i32,
    ) -> Result<usize, GtbError> {
        let phased = self.default_phased;
        let ploidy = self.ploidy;
        // The phase bit belongs to every allele but the first of its sample.
        let code = move |allele: i32, hap: usize| -> i32 {
            let code = gt_unphased(allele);
            if phased && hap % ploidy != 0 { code | 1 } else { code }
        };

        if self.line_is_wah[line] {
            let bytes = self.block.bytes();
            let ones = self.wah.extract(bytes, &mut self.wah_cursor, &mut self.y, haps)?;
            let out_len = out.len();
            for (&value, &hap) in self.y[..haps].iter().zip(&self.a) {
                let hap = hap as usize;
                let slot = out.get_mut(hap).ok_or_else(|| {
                    GtbError::Precondition(format!(
                        "haplotype {hap} does not fit a genotype array of {out_len} entries"
                    ))
                })?;
                if alt == 1 {
                    *slot = code(value as i32, hap);
                } else if value {
                    *slot = code(alt, hap);
                }
            }
            return Ok(ones);
        }

        let negated = self.extract_sparse(haps)?;
        let ones = if negated { haps - self.sparse.len() } else { self.sparse.len() };
        if alt == 1 {
            let (default_allele, listed_allele) = if negated { (1, 0) } else { (0, 1) };
            for (hap, slot) in out[..haps].iter_mut().enumerate() {
                *slot = code(default_allele, hap);
            }
            for &hap in &self.sparse {
                out[hap] = code(listed_allele, hap);
            }
        } else if negated {
            // A negated line lists the haplotypes *without* this allele, which can only
            // happen for the majority allele: everything still REF takes it, then the
            // listed haplotypes are restored.
            for (hap, slot) in out[..haps].iter_mut().enumerate() {
                if gt_allele(*slot) == 0 {
                    *slot = code(alt, hap);
                }
            }
            for &hap in &self.sparse {
                if gt_allele(out[hap]) == alt {
                    out[hap] = code(0, hap);
                }
            }
        } else {
            for &hap in &self.sparse {
                out[hap] = code(alt, hap);
            }
        }

        if self.line_is_sorting[line] {
            self.sparse_values_to_y(haps, negated);
        }
        Ok(ones)
    }

    /// Stable bucket move of `a` by the values of the line just consumed, if it sorts.
    /// On haploid lines one decoded value drives a pair of permutation slots.
    fn update_permutation(&mut self, line: usize) {
        if !self.line_is_sorting[line] {
            return;
        }
        let stride = if self.line_is_haploid[line] { 2 } else { 1 };
        let mut zeros = 0usize;
        let mut ones = 0usize;
        for i in 0..self.n_haps {
            let hap = self.a[i];
            if self.y[i / stride] {
                self.b[ones] = hap;
                ones += 1;
            } else {
                self.a[zeros] = hap;
                zeros += 1;
            }
        }
        self.a[zeros..].copy_from_slice(&self.b[..ones]);
    }
}

impl std::fmt::Debug for DecodeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeCursor")
            .field("position", &self.position)
            .field("binary_lines", &self.binary_lines)
            .field("bcf_lines", &self.bcf_lines)
            .field("n_haps", &self.n_haps)
            .field("block", &self.block)
            .finish()
    }
}

fn region_origin(dictionary: &BlockDictionary, key: GtKey, block_len: usize) -> Result<usize, GtbError> {
    let offset = dictionary.require(key)? as usize;
    if offset > block_len {
        return Err(GtbError::CorruptBlock(format!(
            "{key:?} points to byte {offset} of a {block_len} byte block"
        )));
    }
    Ok(offset)
}

/// Decodes an optional per-line flag bitmap of `len` entries.
fn read_flags(
    bytes: &[u8],
    dictionary: &BlockDictionary,
    key: GtKey,
    len: usize,
    wah: &WahCodec,
) -> Result<Option<Vec<bool>>, GtbError> {
    let Some(offset) = dictionary.get(key) else {
        return Ok(None);
    };
    let mut cursor = offset as usize;
    let mut flags = vec![false; wah.padded_len(len)];
    wah.extract(bytes, &mut cursor, &mut flags, len)?;
    flags.truncate(len);
    Ok(Some(flags))
}
