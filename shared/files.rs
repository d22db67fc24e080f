use crate::error::GtbError;
use log::debug;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Memory-maps a genotype file read-only.
///
/// The returned map is the long-lived arena every accessor reads from. It is
/// wrapped in an `Arc` so independent accessors (one per worker thread) can share
/// it without copying; only their block caches and cursors are private.
pub fn open_mapped_file(path: &Path) -> Result<Arc<Mmap>, GtbError> {
    let file = File::open(path).map_err(|e| {
        GtbError::Io(std::io::Error::new(
            e.kind(),
            format!("Opening {}: {e}", path.display()),
        ))
    })?;
    let mmap = unsafe { Mmap::map(&file)? };
    // Block lookups jump around the file, readahead only wastes page cache.
    #[cfg(unix)]
    mmap.advise(memmap2::Advice::Random)?;
    debug!("Mapped {} ({} bytes)", path.display(), mmap.len());
    Ok(Arc::new(mmap))
}

/// Returns `len` bytes starting at `offset`, or a corrupt-block error naming the
/// region that would have been overrun.
#[inline]
pub fn slice_at<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &str,
) -> Result<&'a [u8], GtbError> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            GtbError::CorruptBlock(format!(
                "{what} at byte {offset} (+{len}) runs past the end of a {} byte region",
                buf.len()
            ))
        })
}

#[inline]
pub fn read_le_u16(buf: &[u8], offset: usize, what: &str) -> Result<u16, GtbError> {
    let b = slice_at(buf, offset, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
pub fn read_le_u32(buf: &[u8], offset: usize, what: &str) -> Result<u32, GtbError> {
    let b = slice_at(buf, offset, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
pub fn read_le_u64(buf: &[u8], offset: usize, what: &str) -> Result<u64, GtbError> {
    let b = slice_at(buf, offset, 8, what)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(b);
    Ok(u64::from_le_bytes(word))
}
