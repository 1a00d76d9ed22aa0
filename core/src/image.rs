//! The on-media raw-byte image of one disk side.

use heapless::Vec;

use crate::{FdsError, MAX_BLOCKS, MAX_SIDE_SIZE};

/// Raw gap/block/CRC bytes for one side, plus the block index built while
/// loading it. Modeled as a fixed-length `MAX_SIDE_SIZE` byte array — the
/// same static buffer a microcontroller build would declare — with
/// `used_space` tracking the logical extent the loader or write engine has
/// laid out so far. No allocator is ever touched.
pub struct Image {
    data: Vec<u8, MAX_SIDE_SIZE>,
    /// Byte offset of each block's leading gap (its first zero byte, not the
    /// `0x80` terminator that ends it) within `data`, in block order.
    block_offsets: Vec<u32, MAX_BLOCKS>,
    /// Logical end of laid-out content. Bytes at or beyond this offset are
    /// unused gap padding, zeroed.
    used_space: u32,
}

impl Image {
    #[must_use]
    pub fn new() -> Self {
        let mut data = Vec::new();
        data.resize(MAX_SIDE_SIZE, 0).ok();
        Self {
            data,
            block_offsets: Vec::new(),
            used_space: 0,
        }
    }

    /// Clears all content back to an empty, unloaded side.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.block_offsets.clear();
        self.used_space = 0;
    }

    /// The full `MAX_SIDE_SIZE` backing array, `used_space` and beyond
    /// reading as zero.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn used_space(&self) -> u32 {
        self.used_space
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_offsets.len()
    }

    /// Byte offset of the start of the leading gap of block `index`, if it
    /// exists.
    #[must_use]
    pub fn block_offset(&self, index: usize) -> Option<u32> {
        self.block_offsets.get(index).copied()
    }

    /// Writes `byte` at the current `used_space` cursor and advances it.
    ///
    /// # Errors
    /// Returns [`FdsError::RomTooLarge`] if the side's capacity is
    /// exhausted.
    pub fn push_byte(&mut self, byte: u8) -> crate::Result<()> {
        if self.used_space as usize >= self.capacity() {
            return Err(FdsError::RomTooLarge);
        }
        self.data[self.used_space as usize] = byte;
        self.used_space += 1;
        Ok(())
    }

    /// Reserves `len` bytes at the current cursor and returns a mutable
    /// view into them for the caller to fill in place — used by the load
    /// codec to stream file payload bytes directly into the backing array
    /// without an intermediate stack buffer.
    ///
    /// # Errors
    /// Returns [`FdsError::RomTooLarge`] if the side's capacity is
    /// exhausted.
    pub fn reserve(&mut self, len: usize) -> crate::Result<&mut [u8]> {
        let start = self.used_space as usize;
        let end = start + len;
        if end > self.capacity() {
            return Err(FdsError::RomTooLarge);
        }
        self.used_space = end as u32;
        Ok(&mut self.data[start..end])
    }

    /// Writes every byte of `bytes` starting at the current cursor.
    ///
    /// # Errors
    /// Returns [`FdsError::RomTooLarge`] if the side's capacity would be
    /// exceeded partway through; bytes already written before the failure
    /// remain (callers needing atomic rollback call [`Self::truncate`] on
    /// error).
    pub fn push_bytes(&mut self, bytes: &[u8]) -> crate::Result<()> {
        for &b in bytes {
            self.push_byte(b)?;
        }
        Ok(())
    }

    /// Records the start of a new block at the image's current write
    /// cursor.
    ///
    /// # Errors
    /// Returns [`FdsError::RomTooLarge`] if [`crate::MAX_BLOCKS`] is
    /// exceeded.
    pub fn begin_block(&mut self) -> crate::Result<()> {
        let offset = self.used_space;
        self.block_offsets
            .push(offset)
            .map_err(|_| FdsError::RomTooLarge)
    }

    /// Moves `used_space` back to `len`, zeroes everything from `len`
    /// onward, and drops any recorded block whose gap terminator fell at or
    /// beyond `len`. Used by the write engine to roll an in-progress block
    /// back out on a capacity overrun or overlap, and by the codec to
    /// unwind a failed load.
    pub fn truncate(&mut self, len: u32) {
        for b in &mut self.data[len as usize..] {
            *b = 0;
        }
        self.used_space = len.min(self.capacity() as u32);
        while matches!(self.block_offsets.last(), Some(&off) if off >= len) {
            self.block_offsets.pop();
        }
    }

    /// Overwrites the byte at `offset`, regardless of `used_space`. Used by
    /// the write engine to patch bits and CRCs into the buffer ahead of the
    /// logical cursor while it lays out a block.
    pub fn set_byte(&mut self, offset: u32, byte: u8) {
        if let Some(slot) = self.data.get_mut(offset as usize) {
            *slot = byte;
        }
        if offset >= self.used_space && (offset as usize) < self.capacity() {
            self.used_space = offset + 1;
        }
    }

    /// Returns the block index whose payload contains byte offset `offset`,
    /// by scanning the recorded block starts. Used by the read engine to
    /// report the current head position in block-relative terms.
    #[must_use]
    pub fn block_index_for_offset(&self, offset: u32) -> Option<usize> {
        let mut found = None;
        for (i, &start) in self.block_offsets.iter().enumerate() {
            if start <= offset {
                found = Some(i);
            } else {
                break;
            }
        }
        found
    }
}

impl Default for Image {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_truncate_keep_used_space_in_sync() {
        let mut image = Image::new();
        image.push_bytes(&[1, 2, 3, 4]).unwrap();
        assert_eq!(image.used_space(), 4);
        image.truncate(2);
        assert_eq!(image.used_space(), 2);
        assert_eq!(&image.bytes()[..2], &[1, 2]);
    }

    #[test]
    fn begin_block_records_offsets_in_order() {
        let mut image = Image::new();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 1, 2, 3]).unwrap();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 4, 5]).unwrap();

        assert_eq!(image.block_offset(0), Some(0));
        assert_eq!(image.block_offset(1), Some(4));
        assert_eq!(image.block_count(), 2);
    }

    #[test]
    fn truncate_drops_blocks_that_started_past_the_cut() {
        let mut image = Image::new();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 1, 2]).unwrap();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 3, 4]).unwrap();

        image.truncate(3);
        assert_eq!(image.block_count(), 1);
    }

    #[test]
    fn block_index_for_offset_finds_containing_block() {
        let mut image = Image::new();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 1, 2, 3]).unwrap();
        image.begin_block().unwrap();
        image.push_bytes(&[0x80, 4, 5]).unwrap();

        assert_eq!(image.block_index_for_offset(0), Some(0));
        assert_eq!(image.block_index_for_offset(3), Some(0));
        assert_eq!(image.block_index_for_offset(4), Some(1));
        assert_eq!(image.block_index_for_offset(6), Some(1));
    }

    #[test]
    fn set_byte_ahead_of_cursor_advances_used_space() {
        let mut image = Image::new();
        image.set_byte(10, 0xAB);
        assert_eq!(image.used_space(), 11);
        assert_eq!(image.bytes()[10], 0xAB);
    }

    #[test]
    fn push_beyond_capacity_reports_rom_too_large() {
        let mut image = Image::new();
        let chunk = [0u8; 4096];
        let mut err = None;
        for _ in 0..(MAX_SIDE_SIZE / chunk.len() + 2) {
            if let Err(e) = image.push_bytes(&chunk) {
                err = Some(e);
                break;
            }
        }
        assert_eq!(err, Some(FdsError::RomTooLarge));
    }
}
