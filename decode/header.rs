// ========================================================================================
//
//                          THE FILE HEADER: VALIDATED ONCE, TRUSTED AFTER
//
// ========================================================================================
//
// The header is a fixed 128 byte little-endian record at the start of the file. It is
// checked exhaustively at open time, so that every later access can
// rely on its offsets and widths without re-validating them. Nothing in this module
// touches a genotype block.

use crate::error::GtbError;
use crate::shared::files::{read_le_u32, read_le_u64, slice_at};
use crate::wah::WordWidth;
use log::warn;

/// Marker stored in the first four bytes. Reading it back with the wrong byte order
/// yields `0xDDCCBBAA`.
pub const ENDIANNESS_MARKER: u32 = 0xAABB_CCDD;
/// Stored at both ends of the header so truncation and overwrites are caught.
pub const MAGIC: u32 = 0xD35F_2E41;
pub const SUPPORTED_VERSION: u32 = 4;
pub const HEADER_SIZE: usize = 128;

mod offsets {
    pub const ENDIANNESS: usize = 0;
    pub const FIRST_MAGIC: usize = 4;
    pub const VERSION: usize = 8;
    pub const PLOIDY: usize = 12;
    pub const INDEX_BYTES: usize = 13;
    pub const WAH_BYTES: usize = 14;
    pub const COMPRESSED: usize = 15;
    pub const HAP_SAMPLES: usize = 16;
    pub const NUM_SAMPLES: usize = 24;
    pub const NUM_VARIANTS: usize = 32;
    pub const BLOCK_SIZE: usize = 40;
    pub const NUMBER_OF_BLOCKS: usize = 48;
    pub const SS_RATE: usize = 56;
    pub const NUMBER_OF_SSAS: usize = 64;
    pub const INDICES: usize = 72;
    pub const SSAS: usize = 80;
    pub const WAHS: usize = 88;
    pub const SAMPLES: usize = 96;
    pub const LAST_MAGIC: usize = 124;
}

/// The parsed and validated file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub ploidy: u8,
    pub index_width: WordWidth,
    pub wah_width: WordWidth,
    pub compressed: bool,
    pub hap_samples: u64,
    pub num_samples: u64,
    pub num_variants: u64,
    pub block_size: u64,
    pub number_of_blocks: u64,
    pub ss_rate: u64,
    pub number_of_ssas: u64,
    pub indices_offset: u64,
    pub ssas_offset: u64,
    pub wahs_offset: u64,
    pub samples_offset: u64,
}

/// The per-file decoding parameters the cursor needs, derived from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatConfig {
    pub hap_samples: usize,
    pub ploidy: usize,
    pub wah_width: WordWidth,
    pub index_width: WordWidth,
}

/// Byte size of every region of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSizes {
    pub header: u64,
    pub indices: u64,
    pub ssas: u64,
    pub genotypes: u64,
    pub samples: u64,
}

impl Header {
    /// Parses and validates the header at the start of `file`.
    ///
    /// Checks run in this order and the first failure is returned: header length,
    /// both magic values, version, endianness marker, ploidy, word widths, region
    /// offsets and finally the capacity of the block index.
    pub fn parse(file: &[u8]) -> Result<Self, GtbError> {
        if file.len() < HEADER_SIZE {
            return Err(GtbError::Format(format!(
                "file is {} bytes, shorter than the {HEADER_SIZE} byte header",
                file.len()
            )));
        }
        let raw = &file[..HEADER_SIZE];

        let first_magic = read_le_u32(raw, offsets::FIRST_MAGIC, "first magic")?;
        let last_magic = read_le_u32(raw, offsets::LAST_MAGIC, "last magic")?;
        if first_magic != MAGIC || last_magic != MAGIC {
            return Err(GtbError::Format(format!(
                "bad magic: expected {MAGIC:#010x}, got {first_magic:#010x} and {last_magic:#010x}"
            )));
        }

        let version = read_le_u32(raw, offsets::VERSION, "version")?;
        if version != SUPPORTED_VERSION {
            return Err(GtbError::Format(format!(
                "unsupported format version {version}, expected {SUPPORTED_VERSION}"
            )));
        }

        let endianness = read_le_u32(raw, offsets::ENDIANNESS, "endianness marker")?;
        if endianness != ENDIANNESS_MARKER {
            return Err(GtbError::Format(format!(
                "bad endianness marker {endianness:#010x}, expected {ENDIANNESS_MARKER:#010x}"
            )));
        }

        let ploidy = raw[offsets::PLOIDY];
        if ploidy == 0 {
            return Err(GtbError::Format("ploidy in header is set to 0".to_string()));
        }

        let index_width = parse_width(raw[offsets::INDEX_BYTES], "index")?;
        let wah_width = parse_width(raw[offsets::WAH_BYTES], "WAH")?;

        let header = Header {
            version,
            ploidy,
            index_width,
            wah_width,
            compressed: raw[offsets::COMPRESSED] != 0,
            hap_samples: read_le_u64(raw, offsets::HAP_SAMPLES, "hap_samples")?,
            num_samples: read_le_u64(raw, offsets::NUM_SAMPLES, "num_samples")?,
            num_variants: read_le_u64(raw, offsets::NUM_VARIANTS, "num_variants")?,
            block_size: read_le_u64(raw, offsets::BLOCK_SIZE, "block_size")?,
            number_of_blocks: read_le_u64(raw, offsets::NUMBER_OF_BLOCKS, "number_of_blocks")?,
            ss_rate: read_le_u64(raw, offsets::SS_RATE, "ss_rate")?,
            number_of_ssas: read_le_u64(raw, offsets::NUMBER_OF_SSAS, "number_of_ssas")?,
            indices_offset: read_le_u64(raw, offsets::INDICES, "indices_offset")?,
            ssas_offset: read_le_u64(raw, offsets::SSAS, "ssas_offset")?,
            wahs_offset: read_le_u64(raw, offsets::WAHS, "wahs_offset")?,
            samples_offset: read_le_u64(raw, offsets::SAMPLES, "samples_offset")?,
        };

        header.validate_regions(file.len() as u64)?;

        if header.hap_samples == 0 {
            warn!("Genotype file has no haplotypes; only variant metadata can be served");
        }

        Ok(header)
    }

    fn validate_regions(&self, file_len: u64) -> Result<(), GtbError> {
        let ordered = [
            ("indices", self.indices_offset),
            ("ssas", self.ssas_offset),
            ("wahs", self.wahs_offset),
            ("samples", self.samples_offset),
        ];

        let mut previous = ("header", HEADER_SIZE as u64);
        for (name, offset) in ordered {
            if offset < previous.1 {
                return Err(GtbError::Format(format!(
                    "{name} region starts at {offset}, before the end of the {} region ({})",
                    previous.0, previous.1
                )));
            }
            previous = (name, offset);
        }
        if self.samples_offset > file_len {
            return Err(GtbError::Format(format!(
                "samples region starts at {}, past the end of the {file_len} byte file",
                self.samples_offset
            )));
        }

        let index_bytes = self.number_of_blocks.checked_mul(4).ok_or_else(|| {
            GtbError::Format(format!("{} blocks overflow the index", self.number_of_blocks))
        })?;
        if index_bytes > self.ssas_offset - self.indices_offset {
            return Err(GtbError::Format(format!(
                "index region of {} bytes cannot hold {} block offsets",
                self.ssas_offset - self.indices_offset,
                self.number_of_blocks
            )));
        }
        Ok(())
    }

    /// Decoding parameters for genotype blocks of this file.
    pub fn format_config(&self) -> FormatConfig {
        FormatConfig {
            hap_samples: self.hap_samples as usize,
            ploidy: self.ploidy as usize,
            wah_width: self.wah_width,
            index_width: self.index_width,
        }
    }

    pub fn region_sizes(&self, file_len: u64) -> RegionSizes {
        RegionSizes {
            header: HEADER_SIZE as u64,
            indices: self.ssas_offset - self.indices_offset,
            ssas: self.wahs_offset - self.ssas_offset,
            genotypes: self.samples_offset - self.wahs_offset,
            samples: file_len.saturating_sub(self.samples_offset),
        }
    }

    /// Parses the NUL-terminated sample ids stored at `samples_offset`.
    pub fn read_samples(&self, file: &[u8]) -> Result<Vec<String>, GtbError> {
        let start = self.samples_offset as usize;
        let mut region = slice_at(file, start, file.len() - start, "sample list")?;
        let mut samples = Vec::with_capacity(self.num_samples as usize);
        for index in 0..self.num_samples {
            let end = region.iter().position(|&b| b == 0).ok_or_else(|| {
                GtbError::Format(format!("sample {index} is not NUL-terminated"))
            })?;
            let id = std::str::from_utf8(&region[..end]).map_err(|e| {
                GtbError::Format(format!("sample {index} is not valid UTF-8: {e}"))
            })?;
            samples.push(id.to_string());
            region = &region[end + 1..];
        }
        Ok(samples)
    }
}

fn parse_width(bytes: u8, what: &str) -> Result<WordWidth, GtbError> {
    WordWidth::from_bytes(bytes).ok_or_else(|| {
        GtbError::Format(format!("{what} word width of {bytes} bytes is not supported"))
    })
}
