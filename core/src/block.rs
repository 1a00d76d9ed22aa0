//! Block kinds and payload sizing for the FDS block structure.

use crate::image::Image;
use crate::FDS_FILE_HEADER_SIZE;

/// The four block kinds an FDS side is built from, in the fixed order they
/// appear on a well-formed side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    DiskInfo,
    FileCount,
    FileHeader,
    FileData,
}

impl BlockKind {
    /// The single tag byte a block's payload starts with.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::DiskInfo => 0x01,
            Self::FileCount => 0x02,
            Self::FileHeader => 0x03,
            Self::FileData => 0x04,
        }
    }

    /// Recovers a block kind from its leading tag byte.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::DiskInfo),
            0x02 => Some(Self::FileCount),
            0x03 => Some(Self::FileHeader),
            0x04 => Some(Self::FileData),
            _ => None,
        }
    }

    /// Index of the block kind a well-formed side expects at block index
    /// `i`. Block 0 is always disk info, block 1 is always the file count;
    /// from block 2 onward, file header and file data alternate.
    #[must_use]
    pub fn expected_at(i: usize) -> Self {
        match i {
            0 => Self::DiskInfo,
            1 => Self::FileCount,
            n if n % 2 == 0 => Self::FileHeader,
            _ => Self::FileData,
        }
    }

    /// Payload size in bytes, tag byte included, for blocks whose size does
    /// not depend on file-header content.
    #[must_use]
    pub fn fixed_payload_size(self) -> Option<usize> {
        match self {
            Self::DiskInfo => Some(56),
            Self::FileCount => Some(2),
            Self::FileHeader => Some(FDS_FILE_HEADER_SIZE),
            Self::FileData => None,
        }
    }
}

/// Payload size in bytes (tag byte included) of a file-data block, given the
/// 2-byte little-endian file size stored at offset 13 of its preceding
/// file-header block.
#[must_use]
pub fn file_data_payload_size(file_size: u16) -> usize {
    1 + usize::from(file_size)
}

/// Byte length of the inter-block gap preceding block index `i`, terminator
/// included.
#[must_use]
pub fn gap_bytes_for(i: usize) -> usize {
    if i == 0 {
        crate::FIRST_GAP_BYTES
    } else {
        crate::NEXT_GAP_BYTES
    }
}

/// Total byte span of block `i`, combining its gap, payload and CRC per the
/// flags requested. Mirrors `block_total_size(i, include_gap, include_crc)`.
#[must_use]
pub fn block_total_size(
    gap_bytes: usize,
    payload_size: usize,
    include_gap: bool,
    include_crc: bool,
) -> usize {
    (if include_gap { gap_bytes } else { 0 }) + payload_size + if include_crc { 2 } else { 0 }
}

/// Payload size (tag byte included) of block `i`, resolving a file-data
/// block's size from its preceding file-header block already present in
/// `image`. Returns `None` if block `i` is a file-data block whose header
/// has not been written yet.
#[must_use]
pub fn payload_size_in_image(image: &Image, i: usize) -> Option<usize> {
    match BlockKind::expected_at(i) {
        BlockKind::DiskInfo => BlockKind::DiskInfo.fixed_payload_size(),
        BlockKind::FileCount => BlockKind::FileCount.fixed_payload_size(),
        BlockKind::FileHeader => BlockKind::FileHeader.fixed_payload_size(),
        BlockKind::FileData => {
            let header_start = image.block_offset(i.checked_sub(1)?)?;
            let header_payload = header_start as usize + gap_bytes_for(i - 1);
            let size_lo = *image.bytes().get(header_payload + 13)?;
            let size_hi = *image.bytes().get(header_payload + 14)?;
            let file_size = u16::from_le_bytes([size_lo, size_hi]);
            Some(file_data_payload_size(file_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_order_matches_disk_info_file_count_then_alternation() {
        assert_eq!(BlockKind::expected_at(0), BlockKind::DiskInfo);
        assert_eq!(BlockKind::expected_at(1), BlockKind::FileCount);
        assert_eq!(BlockKind::expected_at(2), BlockKind::FileHeader);
        assert_eq!(BlockKind::expected_at(3), BlockKind::FileData);
        assert_eq!(BlockKind::expected_at(4), BlockKind::FileHeader);
        assert_eq!(BlockKind::expected_at(5), BlockKind::FileData);
    }

    #[test]
    fn tag_round_trips() {
        for kind in [
            BlockKind::DiskInfo,
            BlockKind::FileCount,
            BlockKind::FileHeader,
            BlockKind::FileData,
        ] {
            assert_eq!(BlockKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(BlockKind::from_tag(0x05), None);
    }

    #[test]
    fn gap_bytes_first_block_is_the_long_gap() {
        assert_eq!(gap_bytes_for(0), crate::FIRST_GAP_BYTES);
        assert_eq!(gap_bytes_for(1), crate::NEXT_GAP_BYTES);
        assert_eq!(gap_bytes_for(41), crate::NEXT_GAP_BYTES);
    }

    #[test]
    fn file_data_size_includes_tag_byte() {
        assert_eq!(file_data_payload_size(0), 1);
        assert_eq!(file_data_payload_size(100), 101);
    }
}
