// ========================================================================================
//
//                  THE ACCESSOR: ABSOLUTE POSITIONS IN, GENOTYPES OUT
//
// ========================================================================================
//
// ### Purpose ###
//
// `GenotypeAccessor` is the single entry point for callers. It owns one block locator
// and at most one decode cursor, translates an absolute `LinePosition` into a block id
// and an in-block offset, rebuilds the cursor whenever the block changes, and hands the
// request to it.
//
// ### Concurrency ###
//
// The memory map is shared read-only behind an `Arc`. Everything else (the resident
// block and the cursor) is private to one accessor and mutated through `&mut self`.
// Worker threads each take their own accessor from `fork()`.

use crate::cursor::DecodeCursor;
use crate::error::GtbError;
use crate::header::{FormatConfig, Header, RegionSizes};
use crate::locator::BlockLocator;
use crate::shared::files::open_mapped_file;
use crate::types::LinePosition;
use log::debug;
use memmap2::Mmap;
use std::path::Path;
use std::sync::Arc;

pub struct GenotypeAccessor {
    mmap: Arc<Mmap>,
    config: FormatConfig,
    locator: BlockLocator,
    cursor: Option<(usize, DecodeCursor)>,
}

impl GenotypeAccessor {
    /// Maps and validates the file at `path`. No block is touched until the first
    /// request.
    pub fn open(path: &Path) -> Result<Self, GtbError> {
        let mmap = open_mapped_file(path)?;
        Self::from_shared(mmap)
    }

    /// Builds an accessor over an already mapped file.
    pub fn from_shared(mmap: Arc<Mmap>) -> Result<Self, GtbError> {
        let header = Header::parse(&mmap)?;
        let config = header.format_config();
        Ok(Self {
            locator: BlockLocator::new(Arc::clone(&mmap), header),
            mmap,
            config,
            cursor: None,
        })
    }

    /// An independent accessor over the same map, with its own block cache and cursor.
    pub fn fork(&self) -> Self {
        Self {
            mmap: Arc::clone(&self.mmap),
            config: self.config,
            locator: BlockLocator::new(Arc::clone(&self.mmap), self.header().clone()),
            cursor: None,
        }
    }

    pub fn header(&self) -> &Header {
        self.locator.header()
    }

    pub fn samples(&self) -> Result<Vec<String>, GtbError> {
        self.header().read_samples(&self.mmap)
    }

    pub fn region_sizes(&self) -> RegionSizes {
        self.header().region_sizes(self.mmap.len() as u64)
    }

    /// Number of binary lines stored in `block_id`. Binds the cursor to that block.
    pub fn block_line_count(&mut self, block_id: usize) -> Result<usize, GtbError> {
        Ok(self.cursor_for_block(block_id)?.binary_lines())
    }

    /// Decodes the variant whose first binary line is at `position` into `out`.
    pub fn fill_genotype_array(
        &mut self,
        out: &mut [i32],
        n_alleles: usize,
        position: LinePosition,
    ) -> Result<(), GtbError> {
        let block_id = position.block_id();
        let mut cursor = self.take_cursor_at(position)?;
        cursor
            .fill_genotype_array_advance(out, n_alleles)
            .map_err(|e| e.in_block(block_id))?;
        self.cursor = Some((block_id, cursor));
        Ok(())
    }

    /// Counts the alleles of the variant whose first binary line is at `position`.
    pub fn fill_allele_counts(
        &mut self,
        n_alleles: usize,
        position: LinePosition,
    ) -> Result<&[usize], GtbError> {
        let block_id = position.block_id();
        let mut cursor = self.take_cursor_at(position)?;
        cursor
            .fill_allele_counts_advance(n_alleles)
            .map_err(|e| e.in_block(block_id))?;
        Ok(self.cursor.insert((block_id, cursor)).1.allele_counts())
    }

    /// Counts from the last fill call; empty before the first one.
    pub fn allele_counts(&self) -> &[usize] {
        self.cursor
            .as_ref()
            .map(|(_, cursor)| cursor.allele_counts())
            .unwrap_or(&[])
    }

    fn cursor_for_block(&mut self, block_id: usize) -> Result<&mut DecodeCursor, GtbError> {
        let cursor = self.take_cursor(block_id)?;
        Ok(&mut self.cursor.insert((block_id, cursor)).1)
    }

    /// Takes the cursor out of the accessor, building a fresh one if it is bound to
    /// another block. Callers put it back only once their request succeeded, so a
    /// cursor left mid-line by an error is never reused.
    fn take_cursor(&mut self, block_id: usize) -> Result<DecodeCursor, GtbError> {
        match self.cursor.take() {
            Some((id, cursor)) if id == block_id => Ok(cursor),
            previous => {
                // The old cursor pins its block; release it before inflating the next one.
                let previous = previous.map(|(id, _)| id);
                let view = self.locator.resolve_genotypes(block_id)?;
                let cursor =
                    DecodeCursor::new(self.config, view).map_err(|e| e.in_block(block_id))?;
                debug!(
                    "Bound decode cursor to block {block_id} ({} binary lines), was {:?}",
                    cursor.binary_lines(),
                    previous
                );
                Ok(cursor)
            }
        }
    }

    fn take_cursor_at(&mut self, position: LinePosition) -> Result<DecodeCursor, GtbError> {
        let block_id = position.block_id();
        let mut cursor = self.take_cursor(block_id)?;
        cursor
            .seek(position.offset())
            .map_err(|e| e.in_block(block_id))?;
        Ok(cursor)
    }
}
