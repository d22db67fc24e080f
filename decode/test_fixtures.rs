//! Test fixtures and builders for the decode tests.
//!
//! The crate only decodes, so the tests need a minimal encoder of their own: WAH and
//! sparse line writers, a genotype block builder that mirrors the permutation updates of
//! the decoder, and a builder for whole files (header, index, blocks and samples).

use crate::dictionary::{BlockKey, DictionaryKey, GtKey};
use crate::header::{ENDIANNESS_MARKER, FormatConfig, HEADER_SIZE, MAGIC, SUPPORTED_VERSION};
use crate::types::BLOCK_BITS;
use crate::wah::WordWidth;
use memmap2::{Mmap, MmapMut};
use rand::Rng;
use rand::rngs::StdRng;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

// ----------------------------------------------------------------------------------------
// Line encoders
// ----------------------------------------------------------------------------------------

fn push_word(out: &mut Vec<u8>, word: u64, width: WordWidth) {
    match width {
        WordWidth::U16 => out.extend_from_slice(&(word as u16).to_le_bytes()),
        WordWidth::U32 => out.extend_from_slice(&(word as u32).to_le_bytes()),
    }
}

/// WAH-encodes `bits`, padding the last group with zeros and merging uniform groups
/// into fill words.
pub fn wah_encode(bits: &[bool], width: WordWidth) -> Vec<u8> {
    let word_bits = width.bits();
    let payload = word_bits as usize - 1;
    let fill_flag = 1u64 << (word_bits - 1);
    let fill_value = 1u64 << (word_bits - 2);
    let max_run = fill_value - 1;

    let groups: Vec<u64> = bits
        .chunks(payload)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u64, |word, (bit, &set)| word | ((set as u64) << bit))
        })
        .collect();
    let full = (1u64 << payload) - 1;

    let mut out = Vec::new();
    let mut i = 0;
    while i < groups.len() {
        let group = groups[i];
        if group == 0 || group == full {
            let mut run = 1u64;
            while i + (run as usize) < groups.len() && groups[i + run as usize] == group && run < max_run {
                run += 1;
            }
            let value = if group == full { fill_value } else { 0 };
            push_word(&mut out, fill_flag | value | run, width);
            i += run as usize;
        } else {
            push_word(&mut out, group, width);
            i += 1;
        }
    }
    out
}

pub fn sparse_encode(indices: &[usize], negated: bool, width: WordWidth) -> Vec<u8> {
    let negated_bit = if negated { 1u64 << (width.bits() - 1) } else { 0 };
    let mut out = Vec::new();
    push_word(&mut out, negated_bit | indices.len() as u64, width);
    for &index in indices {
        push_word(&mut out, index as u64, width);
    }
    out
}

pub fn encode_dictionary(pairs: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + pairs.len() * 8);
    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for &(key, value) in pairs {
        out.extend_from_slice(&key.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Copies `bytes` into an anonymous read-only map.
pub fn map_bytes(bytes: &[u8]) -> Arc<Mmap> {
    let mut map = MmapMut::map_anon(bytes.len()).expect("anonymous map");
    map.copy_from_slice(bytes);
    Arc::new(map.make_read_only().expect("read-only map"))
}

pub fn write_temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(bytes).expect("write");
    file.flush().expect("flush");
    file
}

// ----------------------------------------------------------------------------------------
// Genotype blocks
// ----------------------------------------------------------------------------------------

/// One variant of a synthetic matrix: the allele carried by every haplotype.
#[derive(Debug, Clone)]
pub struct Variant {
    pub n_alleles: usize,
    pub alleles: Vec<i32>,
}

/// Random variants over `n_haps` haplotypes, mixing rare, common and near-fixed
/// alternate alleles so both line encodings and negated sparse lines show up.
pub fn random_variants(
    rng: &mut StdRng,
    n_haps: usize,
    count: usize,
    max_alleles: usize,
) -> Vec<Variant> {
    (0..count)
        .map(|_| {
            let n_alleles = rng.gen_range(2..=max_alleles.max(2));
            let alt_frequency = [0.03, 0.3, 0.6, 0.97][rng.gen_range(0..4)];
            let alleles = (0..n_haps)
                .map(|_| {
                    if rng.gen_bool(alt_frequency) {
                        rng.gen_range(1..n_alleles as i32)
                    } else {
                        0
                    }
                })
                .collect();
            Variant { n_alleles, alleles }
        })
        .collect()
}

enum LineEncoding {
    /// Bits as stored, i.e. in permutation order.
    Wah(Vec<bool>),
    /// Indices in original haplotype order.
    Sparse { indices: Vec<usize>, negated: bool },
}

struct Line {
    encoding: LineEncoding,
    sorting: bool,
    haploid: bool,
}

/// Builds a genotype sub-block.
pub struct GtBlockBuilder {
    config: FormatConfig,
    lines: Vec<Line>,
    bcf_lines: Option<usize>,
    bcf_flags: Option<[Vec<bool>; 3]>,
    default_phased: Option<bool>,
    sort_flags: bool,
    sparse_matrix: bool,
}

impl GtBlockBuilder {
    pub fn new(config: FormatConfig) -> Self {
        Self {
            config,
            lines: Vec::new(),
            bcf_lines: None,
            bcf_flags: None,
            default_phased: None,
            sort_flags: true,
            sparse_matrix: true,
        }
    }

    pub fn config(&self) -> FormatConfig {
        self.config
    }

    /// Appends a bitmap line exactly as stored.
    pub fn raw_wah_line(&mut self, stored: &[bool], sorting: bool, haploid: bool) -> &mut Self {
        self.lines.push(Line {
            encoding: LineEncoding::Wah(stored.to_vec()),
            sorting,
            haploid,
        });
        self
    }

    /// Appends a sparse line; `sorting` defaults to off.
    pub fn raw_sparse_line(
        &mut self,
        indices: &[usize],
        negated: bool,
        sorting: Option<bool>,
    ) -> &mut Self {
        self.lines.push(Line {
            encoding: LineEncoding::Sparse {
                indices: indices.to_vec(),
                negated,
            },
            sorting: sorting.unwrap_or(false),
            haploid: false,
        });
        self
    }

    pub fn default_phased(&mut self, phased: bool) -> &mut Self {
        self.default_phased = Some(phased);
        self
    }

    pub fn bcf_line_flags(
        &mut self,
        missing: Vec<bool>,
        non_uniform_phasing: Vec<bool>,
        end_of_vector: Vec<bool>,
    ) -> &mut Self {
        self.bcf_lines = Some(missing.len());
        self.bcf_flags = Some([missing, non_uniform_phasing, end_of_vector]);
        self
    }

    /// Leaves the sort bitmap out so the decoder falls back to the line encoding.
    pub fn omit_sort_flags(&mut self) -> &mut Self {
        self.sort_flags = false;
        self
    }

    pub fn omit_sparse_matrix(&mut self) -> &mut Self {
        self.sparse_matrix = false;
        self
    }

    /// Encodes `variants` the way a writer would: one line per alternate allele, stored
    /// either as a bitmap in permutation order or as a sparse list, with the permutation
    /// updated after every sorting line.
    pub fn encode_variants(config: FormatConfig, variants: &[Variant], rng: &mut StdRng) -> Self {
        let n_haps = config.hap_samples;
        let mut builder = Self::new(config);
        builder.bcf_lines = Some(variants.len());
        let mut a: Vec<usize> = (0..n_haps).collect();

        for variant in variants {
            for alt in 1..variant.n_alleles as i32 {
                let bits: Vec<bool> = variant.alleles.iter().map(|&allele| allele == alt).collect();
                let ones = bits.iter().filter(|&&b| b).count();
                let minority = ones.min(n_haps - ones);
                let sparse = if minority * 8 < n_haps {
                    !rng.gen_bool(0.2)
                } else {
                    rng.gen_bool(0.2)
                };
                let sorting = if sparse { rng.gen_bool(0.15) } else { !rng.gen_bool(0.15) };

                let encoding = if sparse {
                    let negated = ones * 2 > n_haps;
                    LineEncoding::Sparse {
                        indices: (0..n_haps).filter(|&h| bits[h] != negated).collect(),
                        negated,
                    }
                } else {
                    LineEncoding::Wah(a.iter().map(|&h| bits[h]).collect())
                };
                builder.lines.push(Line {
                    encoding,
                    sorting,
                    haploid: false,
                });

                if sorting {
                    let (zeros, set): (Vec<usize>, Vec<usize>) =
                        a.iter().copied().partition(|&h| !bits[h]);
                    a = zeros.into_iter().chain(set).collect();
                }
            }
        }
        builder
    }

    /// Serializes the sub-block: dictionary, flag bitmaps, WAH matrix, sparse matrix.
    pub fn build(&self) -> Vec<u8> {
        let wah_width = self.config.wah_width;
        let index_width = self.config.index_width;
        let binary_lines = self.lines.len();

        let mut wah_matrix = Vec::new();
        let mut sparse_matrix = Vec::new();
        for line in &self.lines {
            match &line.encoding {
                LineEncoding::Wah(bits) => wah_matrix.extend(wah_encode(bits, wah_width)),
                LineEncoding::Sparse { indices, negated } => {
                    sparse_matrix.extend(sparse_encode(indices, *negated, index_width))
                }
            }
        }

        let select: Vec<bool> = self
            .lines
            .iter()
            .map(|line| matches!(line.encoding, LineEncoding::Wah(_)))
            .collect();
        let sort: Vec<bool> = self.lines.iter().map(|line| line.sorting).collect();
        let haploid: Vec<bool> = self.lines.iter().map(|line| line.haploid).collect();

        // (key, payload) for every offset entry, in payload order.
        let mut sections: Vec<(GtKey, Vec<u8>)> = vec![
            (GtKey::LineSelect, wah_encode(&select, wah_width)),
            (GtKey::LineHaploid, wah_encode(&haploid, wah_width)),
        ];
        if self.sort_flags {
            sections.push((GtKey::LineSort, wah_encode(&sort, wah_width)));
        }
        if let Some([missing, non_uniform, end_of_vector]) = &self.bcf_flags {
            sections.push((GtKey::LineMissing, wah_encode(missing, wah_width)));
            sections.push((GtKey::LineNonUniformPhasing, wah_encode(non_uniform, wah_width)));
            sections.push((GtKey::LineEndOfVectors, wah_encode(end_of_vector, wah_width)));
        }
        sections.push((GtKey::MatrixWah, wah_matrix));
        if self.sparse_matrix {
            sections.push((GtKey::MatrixSparse, sparse_matrix));
        }

        let mut scalars = vec![
            (GtKey::BcfLines.code(), self.bcf_lines.unwrap_or(binary_lines) as u32),
            (GtKey::BinaryLines.code(), binary_lines as u32),
        ];
        if let Some(phased) = self.default_phased {
            scalars.push((GtKey::DefaultPhasing.code(), phased as u32));
        }

        let dictionary_len = 4 + 8 * (scalars.len() + sections.len());
        let mut pairs = scalars;
        let mut payload = Vec::new();
        for (key, bytes) in &sections {
            pairs.push((key.code(), (dictionary_len + payload.len()) as u32));
            payload.extend_from_slice(bytes);
        }

        let mut block = encode_dictionary(&pairs);
        block.extend(payload);
        block
    }

    /// Wraps the sub-block in a binary block whose outer dictionary also points at a
    /// small variant payload the decoder must ignore.
    pub fn build_binary_block(&self) -> Vec<u8> {
        let variants = b"variant payload".to_vec();
        let dictionary_len = 4 + 8 * 2;
        let mut block = encode_dictionary(&[
            (BlockKey::Variants.code(), dictionary_len as u32),
            (BlockKey::Genotypes.code(), (dictionary_len + variants.len()) as u32),
        ]);
        block.extend(variants);
        block.extend(self.build());
        block
    }
}

// ----------------------------------------------------------------------------------------
// Whole files
// ----------------------------------------------------------------------------------------

/// Builds a complete genotype file: header, block index, blocks and sample list.
pub struct FileBuilder {
    hap_samples: usize,
    ploidy: u8,
    num_variants: u64,
    wah_width: WordWidth,
    index_width: WordWidth,
    compressed: bool,
    samples: Vec<String>,
    blocks: Vec<Vec<u8>>,
}

impl FileBuilder {
    pub fn new(hap_samples: usize, ploidy: u8) -> Self {
        Self {
            hap_samples,
            ploidy,
            num_variants: 0,
            wah_width: WordWidth::U16,
            index_width: WordWidth::U32,
            compressed: false,
            samples: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn samples(mut self, ids: &[&str]) -> Self {
        self.samples = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn widths(mut self, wah_width: WordWidth, index_width: WordWidth) -> Self {
        self.wah_width = wah_width;
        self.index_width = index_width;
        self
    }

    pub fn num_variants(mut self, num_variants: u64) -> Self {
        self.num_variants = num_variants;
        self
    }

    /// The decoding parameters blocks of this file must be built with.
    pub fn config(&self) -> FormatConfig {
        FormatConfig {
            hap_samples: self.hap_samples,
            ploidy: self.ploidy as usize,
            wah_width: self.wah_width,
            index_width: self.index_width,
        }
    }

    /// Appends an arbitrary binary block.
    pub fn raw_block(mut self, bytes: Vec<u8>) -> Self {
        self.blocks.push(bytes);
        self
    }

    pub fn gt_block(self, block: &GtBlockBuilder) -> Self {
        let bytes = block.build_binary_block();
        self.raw_block(bytes)
    }

    pub fn build(&self) -> Vec<u8> {
        let number_of_blocks = self.blocks.len();
        let indices_offset = HEADER_SIZE;
        let ssas_offset = indices_offset + 4 * number_of_blocks;
        let wahs_offset = ssas_offset;

        let mut index = Vec::new();
        let mut genotypes = Vec::new();
        for block in &self.blocks {
            index.extend_from_slice(&((wahs_offset + genotypes.len()) as u32).to_le_bytes());
            if self.compressed {
                let payload = zstd::bulk::compress(block, 3).expect("zstd compress");
                genotypes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                genotypes.extend_from_slice(&(block.len() as u32).to_le_bytes());
                genotypes.extend(payload);
            } else {
                genotypes.extend_from_slice(block);
            }
        }
        let samples_offset = wahs_offset + genotypes.len();

        let mut header = vec![0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&ENDIANNESS_MARKER.to_le_bytes());
        header[4..8].copy_from_slice(&MAGIC.to_le_bytes());
        header[8..12].copy_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        header[12] = self.ploidy;
        header[13] = self.index_width.bytes() as u8;
        header[14] = self.wah_width.bytes() as u8;
        header[15] = self.compressed as u8;
        let fields = [
            self.hap_samples as u64,
            self.samples.len() as u64,
            self.num_variants,
            1u64 << BLOCK_BITS,
            number_of_blocks as u64,
            0,
            0,
            indices_offset as u64,
            ssas_offset as u64,
            wahs_offset as u64,
            samples_offset as u64,
        ];
        for (slot, value) in header[16..16 + 8 * fields.len()].chunks_exact_mut(8).zip(fields) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        header[124..128].copy_from_slice(&MAGIC.to_le_bytes());

        let mut file = header;
        file.extend(index);
        file.extend(genotypes);
        for id in &self.samples {
            file.extend_from_slice(id.as_bytes());
            file.push(0);
        }
        file
    }
}
