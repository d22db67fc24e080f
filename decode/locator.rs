// ========================================================================================
//
//                       THE BLOCK LOCATOR: ONE RESIDENT BLOCK AT A TIME
//
// ========================================================================================
//
// ### Purpose ###
//
// Maps a block id to the bytes of that block. Uncompressed blocks are served as views
// straight into the memory map. Compressed blocks are inflated into a single owned
// buffer that replaces the previously cached one, so at most one decompressed block is
// resident per locator. Asking again for the resident block costs an `Arc` clone.

use crate::dictionary::{BlockDictionary, BlockKey};
use crate::error::GtbError;
use crate::header::Header;
use crate::shared::files::{read_le_u32, slice_at};
use log::debug;
use memmap2::Mmap;
use std::ops::Range;
use std::sync::Arc;

const COMPRESSED_PREFIX_LEN: usize = 8;

#[derive(Clone)]
enum Backing {
    Mapped(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

/// A cheap, cloneable view over the bytes of one block (or a sub-region of it).
///
/// The view owns a reference to its backing storage, so a cursor holding one stays
/// valid even after the locator has moved on to another block.
#[derive(Clone)]
pub struct BlockView {
    backing: Backing,
    range: Range<usize>,
}

impl BlockView {
    /// Wraps an owned buffer, e.g. a freshly decompressed block.
    pub fn from_owned(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            backing: Backing::Owned(Arc::from(bytes)),
            range: 0..len,
        }
    }

    fn mapped(mmap: Arc<Mmap>, range: Range<usize>) -> Self {
        Self {
            backing: Backing::Mapped(mmap),
            range,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => &mmap[self.range.clone()],
            Backing::Owned(buf) => &buf[self.range.clone()],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// A view of everything from `offset` to the end of this view.
    pub fn tail(&self, offset: usize) -> Result<BlockView, GtbError> {
        if offset > self.len() {
            return Err(GtbError::CorruptBlock(format!(
                "sub-block offset {offset} is past the end of a {} byte block",
                self.len()
            )));
        }
        Ok(Self {
            backing: self.backing.clone(),
            range: self.range.start + offset..self.range.end,
        })
    }
}

impl std::fmt::Debug for BlockView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockView")
            .field("len", &self.len())
            .field("mapped", &matches!(self.backing, Backing::Mapped(_)))
            .finish()
    }
}

/// Resolves block ids to block bytes, caching the last one.
pub struct BlockLocator {
    mmap: Arc<Mmap>,
    header: Header,
    resident: Option<(usize, BlockView)>,
}

impl BlockLocator {
    /// The header must have been validated against this very map.
    pub fn new(mmap: Arc<Mmap>, header: Header) -> Self {
        Self {
            mmap,
            header,
            resident: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Id of the block currently cached, if any.
    pub fn resident_block(&self) -> Option<usize> {
        self.resident.as_ref().map(|(id, _)| *id)
    }

    /// Returns the whole binary block `block_id`, decompressing it if needed.
    pub fn resolve(&mut self, block_id: usize) -> Result<BlockView, GtbError> {
        if let Some((id, view)) = &self.resident {
            if *id == block_id {
                return Ok(view.clone());
            }
        }

        // At most one inflated block is held: release the old one before loading.
        self.resident = None;
        let view = self.load(block_id).map_err(|e| e.in_block(block_id))?;
        self.resident = Some((block_id, view.clone()));
        Ok(view)
    }

    /// Returns the genotype sub-block of `block_id`, located through the block's outer
    /// dictionary.
    pub fn resolve_genotypes(&mut self, block_id: usize) -> Result<BlockView, GtbError> {
        let block = self.resolve(block_id)?;
        let dictionary = BlockDictionary::read(block.bytes()).map_err(|e| e.in_block(block_id))?;
        let offset = dictionary.require(BlockKey::Genotypes).map_err(|_| {
            GtbError::Format(format!("binary block {block_id} does not have a genotype block"))
        })?;
        block.tail(offset as usize).map_err(|e| e.in_block(block_id))
    }

    fn block_offset(&self, block_id: usize) -> Result<usize, GtbError> {
        if block_id as u64 >= self.header.number_of_blocks {
            return Err(GtbError::Precondition(format!(
                "block {block_id} requested but the file holds {} blocks",
                self.header.number_of_blocks
            )));
        }
        let entry = self.header.indices_offset as usize + block_id * 4;
        Ok(read_le_u32(&self.mmap, entry, "block index entry")? as usize)
    }

    /// End of the block's byte range for uncompressed files: the start of the next
    /// block, or of the sample region for the last one.
    fn block_end(&self, block_id: usize) -> Result<usize, GtbError> {
        if (block_id as u64) + 1 < self.header.number_of_blocks {
            self.block_offset(block_id + 1)
        } else {
            Ok(self.header.samples_offset as usize)
        }
    }

    fn load(&self, block_id: usize) -> Result<BlockView, GtbError> {
        let offset = self.block_offset(block_id)?;
        if offset < self.header.wahs_offset as usize || offset > self.header.samples_offset as usize {
            return Err(GtbError::CorruptBlock(format!(
                "offset {offset} lies outside of the genotype region"
            )));
        }

        if !self.header.compressed {
            let end = self.block_end(block_id)?;
            if end < offset || end > self.mmap.len() {
                return Err(GtbError::CorruptBlock(format!(
                    "byte range {offset}..{end} is not inside the file"
                )));
            }
            debug!("Serving uncompressed block {block_id} ({} bytes) from the map", end - offset);
            return Ok(BlockView::mapped(Arc::clone(&self.mmap), offset..end));
        }

        let compressed_len = read_le_u32(&self.mmap, offset, "compressed block size")? as usize;
        let uncompressed_len =
            read_le_u32(&self.mmap, offset + 4, "uncompressed block size")? as usize;
        let payload = slice_at(
            &self.mmap,
            offset + COMPRESSED_PREFIX_LEN,
            compressed_len,
            "compressed block payload",
        )?;

        let inflated = zstd::bulk::decompress(payload, uncompressed_len)
            .map_err(|e| GtbError::CorruptBlock(format!("failed to decompress: {e}")))?;
        if inflated.len() != uncompressed_len {
            return Err(GtbError::CorruptBlock(format!(
                "decompressed to {} bytes, header announced {uncompressed_len}",
                inflated.len()
            )));
        }
        debug!("Decompressed block {block_id}: {compressed_len} -> {uncompressed_len} bytes");
        Ok(BlockView::from_owned(inflated))
    }
}
