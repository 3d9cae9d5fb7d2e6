// Copyright © 2015-2018, Peter Atashian
//! The memory-mapped archive and its header.

use memmap2::Mmap;
use std::fs::File as FsFile;
use std::path::Path;
use std::ptr;

use crate::repr::{self, Header, MAGIC, HEADER_SIZE, NODE_RECORD_SIZE, OFFSET_ENTRY_SIZE};
use crate::node::Node;

/// An error occuring anywhere in the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file could not be opened or mapped.
    #[error("failed to open or map archive: {0}")]
    Io(#[from] std::io::Error),
    /// The archive's layout does not match the NX format.
    #[error("invalid archive format: {0}")]
    InvalidFormat(String),
    /// A bitmap blob failed to decompress.
    #[error("failed to decompress bitmap: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}

/// A memory-mapped NX archive.
///
/// Owns the mapping for its entire lifetime; every [`Node`], [`crate::bitmap::Bitmap`]
/// and [`crate::audio::Audio`] handle derived from it borrows from this value and
/// cannot outlive it.
pub struct Archive {
    #[allow(dead_code)]
    map: Mmap,
    data: *const u8,
    len: usize,
    node_count: u32,
    string_count: u32,
    bitmap_count: u32,
    audio_count: u32,
    node_table_offset: usize,
    string_table_offset: usize,
    bitmap_table_offset: Option<usize>,
    audio_table_offset: Option<usize>,
}

fn check_table(name: &str, offset: u64, count: u32, entry_size: usize, len: usize) -> Result<usize, Error> {
    let offset = offset as usize;
    let size = count as usize * entry_size;
    match offset.checked_add(size) {
        Some(end) if end <= len => Ok(offset),
        _ => Err(Error::InvalidFormat(format!(
            "{name} table (offset {offset}, {count} entries of {entry_size} bytes) overruns file of {len} bytes"
        ))),
    }
}

impl Archive {
    /// Opens an NX file via memory-mapping and validates its header.
    ///
    /// This is unsafe because it assumes the file will not be modified by
    /// another process or thread while mapped; the OS gives no such guarantee
    /// for a shared mapping.
    pub unsafe fn open<P: AsRef<Path>>(path: P) -> Result<Archive, Error> {
        let path = path.as_ref();
        log::debug!("opening NX archive at {}", path.display());
        let file = FsFile::open(path)?;
        let map = Mmap::map(&file)?;
        if map.len() < HEADER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "file is {} bytes, shorter than the {HEADER_SIZE}-byte header",
                map.len()
            )));
        }
        let data = map.as_ptr();
        // Header is packed; destructure into aligned locals before using the fields.
        let Header {
            magic,
            node_count,
            node_offset,
            string_count,
            string_offset,
            bitmap_count,
            bitmap_offset,
            audio_count,
            audio_offset,
        } = ptr::read_unaligned(data as *const Header);
        if magic != MAGIC {
            return Err(Error::InvalidFormat(format!("magic was {magic:#010x}, expected {MAGIC:#010x}")));
        }
        let len = map.len();
        let node_table_offset = check_table("node", node_offset, node_count, NODE_RECORD_SIZE, len)?;
        let string_table_offset = check_table("string", string_offset, string_count, OFFSET_ENTRY_SIZE, len)?;
        let bitmap_table_offset = if bitmap_offset == 0 {
            None
        } else {
            Some(check_table("bitmap", bitmap_offset, bitmap_count, OFFSET_ENTRY_SIZE, len)?)
        };
        let audio_table_offset = if audio_offset == 0 {
            None
        } else {
            Some(check_table("audio", audio_offset, audio_count, OFFSET_ENTRY_SIZE, len)?)
        };
        if node_count == 0 {
            return Err(Error::InvalidFormat("archive has zero nodes; root must occupy index 0".into()));
        }
        log::trace!("archive header: {node_count} nodes, {string_count} strings, {bitmap_count} bitmaps, {audio_count} audios");
        Ok(Archive {
            map,
            data,
            len,
            node_count,
            string_count,
            bitmap_count,
            audio_count,
            node_table_offset,
            string_table_offset,
            bitmap_table_offset,
            audio_table_offset,
        })
    }

    /// Number of nodes in the file.
    #[inline]
    pub fn node_count(&self) -> u32 {
        self.node_count
    }
    /// Number of strings in the file.
    #[inline]
    pub fn string_count(&self) -> u32 {
        self.string_count
    }
    /// Number of bitmaps in the file.
    #[inline]
    pub fn bitmap_count(&self) -> u32 {
        self.bitmap_count
    }
    /// Number of audios in the file.
    #[inline]
    pub fn audio_count(&self) -> u32 {
        self.audio_count
    }

    /// Gets the root node of the archive (node table index 0).
    #[inline]
    pub fn root(&self) -> Node<'_> {
        // Safety: `Archive::open` rejects any file with zero nodes, so index 0
        // always exists within the validated node table.
        unsafe { Node::at(self, 0) }
    }

    /// Reads the node record at `index`.
    ///
    /// Safety: `index` must be `< node_count()`.
    #[inline]
    pub(crate) unsafe fn node_record(&self, index: u32) -> &repr::Node {
        let ptr = (self.data.add(self.node_table_offset) as *const repr::Node).add(index as usize);
        &*ptr
    }

    /// Clamps a node's declared child range to the bounds of the node table.
    ///
    /// A corrupt child range is clamped to the node table bounds rather than
    /// causing a child accessor to fail or read out of bounds.
    pub(crate) fn child_range(&self, first_child_index: u32, child_count: u16) -> (u32, u32) {
        let first = first_child_index.min(self.node_count);
        let requested_end = first.saturating_add(child_count as u32);
        let end = requested_end.min(self.node_count);
        if end != requested_end {
            log::warn!(
                "node child range [{first}, {requested_end}) exceeds node_count {}; clamping",
                self.node_count
            );
        }
        (first, end)
    }

    unsafe fn table_entry(&self, table_offset: usize, index: u32) -> u64 {
        let ptr = self.data.add(table_offset + index as usize * OFFSET_ENTRY_SIZE) as *const u64;
        ptr::read_unaligned(ptr)
    }

    /// Raw bytes of string `index`, or an empty slice if `index` is out of
    /// range (a malformed reference degrades gracefully rather than
    /// panicking, matching the total-accessor contract of [`Node`]).
    pub fn string_bytes(&self, index: u32) -> &[u8] {
        if index >= self.string_count {
            log::warn!("string index {index} out of range (count {})", self.string_count);
            return &[];
        }
        unsafe {
            let off = self.table_entry(self.string_table_offset, index) as usize;
            let fits_length_prefix = match off.checked_add(2) {
                Some(end) => end <= self.len,
                None => false,
            };
            if !fits_length_prefix {
                log::warn!("string {index} offset {off} out of range");
                return &[];
            }
            let ptr = self.data.add(off);
            let length = u16::from_le_bytes([*ptr, *ptr.add(1)]) as usize;
            match off.checked_add(2 + length) {
                Some(end) if end <= self.len => std::slice::from_raw_parts(ptr.add(2), length),
                _ => {
                    log::warn!("string {index} length {length} overruns file");
                    &[]
                }
            }
        }
    }

    /// A lossy UTF-8 view of string `index`; borrows when the bytes are
    /// already valid UTF-8 and allocates only to replace invalid sequences.
    pub fn string(&self, index: u32) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.string_bytes(index))
    }

    /// Base pointer of bitmap blob `index`, bounds-checked against the
    /// bitmap table and the file length.
    pub(crate) fn bitmap_blob(&self, index: u32) -> Option<*const u8> {
        let table_offset = self.bitmap_table_offset?;
        if index >= self.bitmap_count {
            log::warn!("bitmap index {index} out of range (count {})", self.bitmap_count);
            return None;
        }
        unsafe {
            let off = self.table_entry(table_offset, index) as usize;
            if off >= self.len {
                log::warn!("bitmap {index} offset {off} out of range");
                return None;
            }
            Some(self.data.add(off))
        }
    }

    /// Base pointer of audio blob `index`, bounds-checked against the audio
    /// table and the file length.
    pub(crate) fn audio_blob(&self, index: u32, length: u32) -> Option<*const u8> {
        let table_offset = self.audio_table_offset?;
        if index >= self.audio_count {
            log::warn!("audio index {index} out of range (count {})", self.audio_count);
            return None;
        }
        unsafe {
            let off = self.table_entry(table_offset, index) as usize;
            match off.checked_add(length as usize) {
                Some(end) if end <= self.len => Some(self.data.add(off)),
                _ => {
                    log::warn!("audio {index} length {length} overruns file");
                    None
                }
            }
        }
    }
}

unsafe impl Send for Archive {}
unsafe impl Sync for Archive {}
