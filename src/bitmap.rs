// Copyright © 2015-2018, Peter Atashian
//! Bitmaps in NX files.

use std::ptr;

use crate::file::Error;

/// A bitmap leaf: `width × height` pixels of 4-byte-per-pixel data (channel
/// order is opaque, producer-defined), stored LZ4-compressed.
#[derive(Clone, Copy)]
pub struct Bitmap<'a> {
    width: u16,
    height: u16,
    /// Points at the 4-byte compressed-length prefix of the blob, or `None`
    /// for the null bitmap.
    blob: Option<*const u8>,
    _marker: std::marker::PhantomData<&'a u8>,
}

impl<'a> Bitmap<'a> {
    /// Constructs a `Bitmap` pointing at the given compressed blob.
    ///
    /// Safety: `blob` must point at a valid `u32` compressed-length prefix
    /// followed by that many bytes of LZ4 block data, within the archive's
    /// mapped region, and must outlive `'a`.
    pub(crate) unsafe fn construct(blob: *const u8, width: u16, height: u16) -> Bitmap<'a> {
        Bitmap { width, height, blob: Some(blob), _marker: std::marker::PhantomData }
    }

    /// The null bitmap, returned when a node is not a bitmap leaf.
    pub(crate) fn null() -> Bitmap<'a> {
        Bitmap { width: 0, height: 0, blob: None, _marker: std::marker::PhantomData }
    }

    /// The width in pixels.
    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }
    /// The height in pixels.
    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }
    /// The length of the decompressed data in bytes.
    #[inline]
    pub fn length(&self) -> u32 {
        self.width as u32 * self.height as u32 * 4
    }

    /// A stable identity for the underlying blob: equal ids mean the same
    /// bitmap. The null bitmap's id is always 0.
    pub fn id(&self) -> usize {
        self.blob.map_or(0, |p| p as usize)
    }

    /// Decompresses the bitmap into `out` and returns the populated prefix.
    ///
    /// `out` must have capacity at least `length() + 16`, the slack LZ4
    /// block decoders need for speculative reads past the logical end.
    pub fn data<'b>(&self, out: &'b mut [u8]) -> Result<&'b [u8], Error> {
        let want = self.length() as usize;
        if want == 0 {
            return Ok(&out[..0]);
        }
        let blob = match self.blob {
            Some(blob) => blob,
            None => return Ok(&out[..0]),
        };
        if out.len() < want + 16 {
            return Err(Error::InvalidFormat(format!(
                "bitmap output buffer too small: need {} (length {want} + 16 slack), have {}",
                want + 16,
                out.len()
            )));
        }
        // Safety: blob was validated by Archive::bitmap_blob to have at
        // least 4 bytes (the compressed-length prefix) within the mapping.
        let compressed_len = unsafe { ptr::read_unaligned(blob as *const u32) } as usize;
        let compressed = unsafe { std::slice::from_raw_parts(blob.add(4), compressed_len) };
        log::trace!("decompressing bitmap: {compressed_len} bytes -> {want} bytes");
        let written = lz4_flex::block::decompress_into(compressed, &mut out[..want])?;
        if written != want {
            log::warn!("bitmap decompressed to {written} bytes, expected {want}");
        }
        Ok(&out[..want])
    }
}

unsafe impl<'a> Send for Bitmap<'a> {}
unsafe impl<'a> Sync for Bitmap<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bitmap_has_zero_length_and_id() {
        let b = Bitmap::null();
        assert_eq!(b.length(), 0);
        assert_eq!(b.id(), 0);
        let mut out = [0u8; 32];
        assert_eq!(b.data(&mut out).unwrap().len(), 0);
    }
}
