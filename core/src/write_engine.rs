//! Pulse-interval demodulator and block writer for the write path.

use heapless::Vec;

use crate::block::{block_total_size, gap_bytes_for, payload_size_in_image};
use crate::crc::fds_crc;
use crate::image::Image;
use crate::{FdsError, GAP_TERMINATOR, MAX_SIDE_SIZE, THRESHOLD_T1, THRESHOLD_T2, WRITE_GAP_SKIP_BITS};

/// Pulse-interval band a captured timestamp delta falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Short,
    Medium,
    Long,
}

fn classify(pulse: u16) -> Band {
    let pulse = u32::from(pulse);
    if pulse < THRESHOLD_T1 {
        Band::Short
    } else if pulse < THRESHOLD_T2 {
        Band::Medium
    } else {
        Band::Long
    }
}

/// Whether writing a freshly decoded bit crossed into the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockBoundary {
    Within,
    Reached,
}

/// Cursor, demodulator and carrier state for the write path.
pub struct WriteEngine {
    current_byte: u32,
    current_bit: u8,
    current_block_end: u32,
    carrier: u8,
    write_gap_skip: u32,
    stopping_short_count: u32,
    last_timestamp: u16,
}

impl WriteEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_byte: 0,
            current_bit: 0,
            current_block_end: 0,
            carrier: 0,
            write_gap_skip: 0,
            stopping_short_count: 0,
            last_timestamp: 0,
        }
    }

    #[must_use]
    pub fn current_byte(&self) -> u32 {
        self.current_byte
    }

    /// Converts a raw capture timestamp into the pulse interval since the
    /// previous one, updating the running timestamp.
    pub fn pulse_from_timestamp(&mut self, timestamp: u16) -> u16 {
        let pulse = timestamp.wrapping_sub(self.last_timestamp);
        self.last_timestamp = timestamp;
        pulse
    }

    /// Entry point for `WRITING_GAP`: discards the write-enable ramp, then
    /// looks for the gap-terminator start bit. Returns `true` once the
    /// engine should transition to `WRITING` (caller resets `carrier` and
    /// `current_bit` to 0, which this call already does internally).
    pub fn decode_gap(&mut self, pulse: u16) -> bool {
        if self.write_gap_skip < WRITE_GAP_SKIP_BITS {
            self.write_gap_skip += 1;
            return false;
        }
        if u32::from(pulse) >= THRESHOLD_T1 {
            self.carrier = 0;
            self.current_bit = 0;
            true
        } else {
            false
        }
    }

    /// Entry point for `WRITING`: classifies `pulse`, dispatches on the
    /// (carrier, band) key, and returns the bits emitted this call (zero,
    /// one or two).
    pub fn decode_writing(&mut self, pulse: u16) -> Vec<bool, 2> {
        let mut bits = Vec::new();
        let key = self.carrier | match classify(pulse) {
            Band::Short => 2,
            Band::Medium => 3,
            Band::Long => 4,
        };
        match key {
            0x82 => {
                bits.push(false).ok();
                self.carrier = 0x80;
            }
            0x83 => {
                bits.push(true).ok();
                self.carrier = 0;
            }
            0x84 => {
                // invalid combination; deliberately ignored
            }
            0x02 => {
                bits.push(true).ok();
                self.carrier = 0;
            }
            0x03 => {
                bits.push(false).ok();
                bits.push(false).ok();
                self.carrier = 0x80;
            }
            0x04 => {
                bits.push(false).ok();
                bits.push(true).ok();
                self.carrier = 0;
            }
            _ => unreachable!("band|carrier key space is exhaustively {0x02,0x03,0x04,0x82,0x83,0x84}"),
        }
        bits
    }

    /// Entry point for `WRITING_STOPPING`: counts consecutive short pulses.
    /// Returns `true` once [`crate::MULTI_WRITE_UNLICENSED_BITS`] have been
    /// seen back to back, signalling an unlicensed consecutive block write.
    pub fn decode_stopping(&mut self, pulse: u16) -> bool {
        if classify(pulse) == Band::Short {
            self.stopping_short_count += 1;
        } else {
            self.stopping_short_count = 0;
        }
        self.stopping_short_count >= crate::MULTI_WRITE_UNLICENSED_BITS
    }

    /// Writes one demodulated bit into `image` at the cursor, advancing the
    /// bit/byte cursor. Returns whether this write crossed
    /// `current_block_end`.
    pub fn write_bit(&mut self, image: &mut Image, bit: bool) -> BlockBoundary {
        let byte_index = self.current_byte as usize;
        let existing = image.bytes().get(byte_index).copied().unwrap_or(0);
        let shifted = (existing >> 1) | if bit { 0x80 } else { 0x00 };
        image.set_byte(self.current_byte, shifted);

        self.current_bit += 1;
        if self.current_bit == 8 {
            self.current_bit = 0;
            self.current_byte += 1;
            if self.current_byte as usize >= MAX_SIDE_SIZE {
                self.current_byte = 0;
            }
        }

        if self.current_byte == self.current_block_end {
            BlockBoundary::Reached
        } else {
            BlockBoundary::Within
        }
    }

    /// Recomputes block boundaries around the write cursor. Lays a fresh
    /// gap at the (possibly new) current block and truncates any block
    /// table entries the new layout overlaps.
    ///
    /// # Errors
    /// Returns [`FdsError::RomTooLarge`] if appending a new block would
    /// exceed [`crate::MAX_SIDE_SIZE`]; the caller is expected to treat this
    /// as a full stop.
    pub fn reset_writing(&mut self, image: &mut Image) -> crate::Result<()> {
        let mut current_block = image
            .block_index_for_offset(self.current_byte)
            .unwrap_or(0);

        if image.block_count() == 0 || self.current_byte >= image.used_space() {
            let i = image.block_count();
            if i > 0 {
                let prev_gap = gap_bytes_for(i - 1);
                let prev_payload = payload_size_in_image(image, i - 1).unwrap_or(0);
                let prev_offset = image.block_offset(i - 1).unwrap_or(0);
                let prev_total = block_total_size(prev_gap, prev_payload, true, true);
                let next_offset = prev_offset + prev_total as u32;
                if next_offset as usize >= image.capacity() {
                    return Err(FdsError::RomTooLarge);
                }
                image.truncate(next_offset);
            }
            image.begin_block()?;
            current_block = i;
        }

        let used_space = image.used_space();
        if used_space as usize > image.capacity() {
            return Err(FdsError::RomTooLarge);
        }

        self.current_byte = image.block_offset(current_block).unwrap_or(0);
        let gap = gap_bytes_for(current_block);
        let payload = payload_size_in_image(image, current_block).unwrap_or(0);
        let span = block_total_size(gap, payload, true, true) as u32;
        self.current_block_end = (self.current_byte + span) % MAX_SIDE_SIZE as u32;

        if let Some(next_offset) = image.block_offset(current_block + 1) {
            if next_offset < self.current_byte + span {
                // Image::truncate already zeroes everything from next_offset
                // through capacity.
                image.truncate(next_offset);
            }
        }

        for i in 0..gap.saturating_sub(1) {
            image.set_byte(self.current_byte + i as u32, 0);
        }
        image.set_byte(self.current_byte + gap as u32 - 1, GAP_TERMINATOR);

        self.write_gap_skip = 0;
        Ok(())
    }

    /// Recomputes and writes the trailing CRC for the block ending at
    /// `current_block_end`, given the block's gap and payload extents.
    /// Called once a block's payload has been fully captured.
    pub fn finalize_block_crc(&self, image: &mut Image, block_index: usize) {
        let Some(offset) = image.block_offset(block_index) else {
            return;
        };
        let gap = gap_bytes_for(block_index);
        let Some(payload_size) = payload_size_in_image(image, block_index) else {
            return;
        };
        let payload_start = offset as usize + gap;
        let payload_end = payload_start + payload_size;
        if payload_end > image.bytes().len() {
            return;
        }
        let crc = fds_crc(&image.bytes()[payload_start..payload_end]);
        let [lo, hi] = crc.to_le_bytes();
        image.set_byte(payload_end as u32, lo);
        image.set_byte(payload_end as u32 + 1, hi);
    }
}

impl Default for WriteEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_respects_thresholds() {
        assert_eq!(classify(0), Band::Short);
        assert_eq!(classify(THRESHOLD_T1 as u16 - 1), Band::Short);
        assert_eq!(classify(THRESHOLD_T1 as u16), Band::Medium);
        assert_eq!(classify(THRESHOLD_T2 as u16 - 1), Band::Medium);
        assert_eq!(classify(THRESHOLD_T2 as u16), Band::Long);
    }

    #[test]
    fn dispatch_table_matches_carrier_band_keys() {
        let mut engine = WriteEngine::new();

        engine.carrier = 0x80;
        let bits = engine.decode_writing(THRESHOLD_T1 as u16 - 1); // short -> 0x82
        assert_eq!(bits.as_slice(), &[false]);
        assert_eq!(engine.carrier, 0x80);

        engine.carrier = 0x80;
        let bits = engine.decode_writing(THRESHOLD_T1 as u16); // medium -> 0x83
        assert_eq!(bits.as_slice(), &[true]);
        assert_eq!(engine.carrier, 0);

        engine.carrier = 0x80;
        let bits = engine.decode_writing(THRESHOLD_T2 as u16); // long -> 0x84 invalid
        assert!(bits.is_empty());

        engine.carrier = 0;
        let bits = engine.decode_writing(THRESHOLD_T1 as u16 - 1); // short -> 0x02
        assert_eq!(bits.as_slice(), &[true]);
        assert_eq!(engine.carrier, 0);

        engine.carrier = 0;
        let bits = engine.decode_writing(THRESHOLD_T1 as u16); // medium -> 0x03
        assert_eq!(bits.as_slice(), &[false, false]);
        assert_eq!(engine.carrier, 0x80);

        engine.carrier = 0;
        let bits = engine.decode_writing(THRESHOLD_T2 as u16); // long -> 0x04
        assert_eq!(bits.as_slice(), &[false, true]);
        assert_eq!(engine.carrier, 0);
    }

    #[test]
    fn decode_gap_skips_ramp_then_waits_for_long_pulse() {
        let mut engine = WriteEngine::new();
        for _ in 0..WRITE_GAP_SKIP_BITS {
            assert!(!engine.decode_gap(0));
        }
        assert!(!engine.decode_gap(0));
        assert!(engine.decode_gap(THRESHOLD_T1 as u16));
    }

    #[test]
    fn decode_stopping_counts_consecutive_short_pulses() {
        let mut engine = WriteEngine::new();
        for _ in 0..(crate::MULTI_WRITE_UNLICENSED_BITS - 1) {
            assert!(!engine.decode_stopping(0));
        }
        assert!(engine.decode_stopping(0));
    }

    #[test]
    fn decode_stopping_resets_on_long_pulse() {
        let mut engine = WriteEngine::new();
        for _ in 0..10 {
            engine.decode_stopping(0);
        }
        assert!(!engine.decode_stopping(THRESHOLD_T2 as u16));
        assert_eq!(engine.stopping_short_count, 0);
    }

    #[test]
    fn write_bit_shifts_into_msb_and_advances_byte_at_eight_bits() {
        let mut image = Image::new();
        image.push_bytes(&[0, 0]).unwrap();
        let mut engine = WriteEngine::new();
        engine.current_block_end = 1;

        for bit in [true, false, true, false, true, false, true, false] {
            engine.write_bit(&mut image, bit);
        }
        assert_eq!(engine.current_byte(), 1);
        assert_eq!(image.bytes()[0], 0b0101_0101);
    }
}
