//! Bit-stream producer for the read path.

use crate::image::Image;
use crate::{IMPULSE_LENGTH, MAX_SIDE_SIZE, NOT_READY_BYTES};

/// Outcome of advancing the read cursor past a byte boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindEvent {
    /// No rewind condition was hit this slot.
    None,
    /// The cursor wrapped to the start of the side, or (in turbo mode)
    /// overran past the end of written data. The caller must raise
    /// NOT_READY and arm the dwell timer.
    Wrapped,
}

/// Cursor and phase state for emitting PWM read slots from an [`Image`].
///
/// One call to [`Self::next_slot`] produces one half-bit phase. Sixteen
/// calls emit one byte (two phases per data bit).
pub struct ReadEngine {
    current_byte: u32,
    current_bit: u8,
    clock: bool,
    last_value: bool,
    turbo: bool,
}

impl ReadEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_byte: 0,
            current_bit: 0,
            clock: false,
            last_value: false,
            turbo: false,
        }
    }

    #[must_use]
    pub fn current_byte(&self) -> u32 {
        self.current_byte
    }

    /// Re-arms the modulator at the start of a read. `turbo` selects the
    /// rewind policy used when a wrap is detected.
    pub fn reset_reading(&mut self, turbo: bool) {
        self.clock = false;
        self.last_value = false;
        self.current_bit = 0;
        self.turbo = turbo;
        if turbo {
            self.current_byte = 0;
        }
    }

    /// Produces one PWM slot value and advances the phase/bit/byte cursor.
    /// Returns the slot value (`0` or `IMPULSE_LENGTH - 1`) and whether this
    /// phase crossed a byte boundary into a rewind condition.
    pub fn next_slot(&mut self, image: &Image) -> (u16, RewindEvent) {
        let byte = image
            .bytes()
            .get(self.current_byte as usize)
            .copied()
            .unwrap_or(0);
        let bit = (byte >> (self.current_bit / 2)) & 1 != 0;

        self.clock = !self.clock;
        let value = bit ^ self.clock;
        let slot = if value && !self.last_value {
            IMPULSE_LENGTH - 1
        } else {
            0
        };
        self.last_value = value;

        self.current_bit += 1;
        let mut event = RewindEvent::None;
        if self.current_bit == 16 {
            self.current_bit = 0;
            self.current_byte += 1;
            if self.current_byte as usize >= MAX_SIDE_SIZE {
                self.current_byte = 0;
            }

            let wrapped_to_start = self.current_byte == 0;
            let turbo_overrun =
                self.turbo && self.current_byte > image.used_space() + NOT_READY_BYTES;
            if wrapped_to_start || turbo_overrun {
                event = RewindEvent::Wrapped;
            }
        }

        (slot, event)
    }

    /// Refills `out` one slot per element, returning `true` if any slot in
    /// this refill crossed a rewind boundary. Used by both the half- and
    /// full-complete DMA callbacks, each refilling half of `READ_BUFFER`.
    pub fn fill(&mut self, image: &Image, out: &mut [u16]) -> bool {
        let mut wrapped = false;
        for slot in out.iter_mut() {
            let (value, event) = self.next_slot(image);
            *slot = value;
            if event == RewindEvent::Wrapped {
                wrapped = true;
            }
        }
        wrapped
    }
}

impl Default for ReadEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with(bytes: &[u8]) -> Image {
        let mut image = Image::new();
        image.push_bytes(bytes).unwrap();
        image
    }

    #[test]
    fn emits_only_impulse_or_zero() {
        let image = image_with(&[0xAA, 0x55, 0x00, 0xFF]);
        let mut engine = ReadEngine::new();
        engine.reset_reading(false);
        for _ in 0..64 {
            let (value, _) = engine.next_slot(&image);
            assert!(value == 0 || value == IMPULSE_LENGTH - 1);
        }
    }

    #[test]
    fn sixteen_phases_advance_one_byte() {
        let image = image_with(&[0x00, 0x00]);
        let mut engine = ReadEngine::new();
        engine.reset_reading(false);
        assert_eq!(engine.current_byte(), 0);
        for _ in 0..16 {
            engine.next_slot(&image);
        }
        assert_eq!(engine.current_byte(), 1);
    }

    #[test]
    fn wraps_to_start_at_end_of_side() {
        let image = image_with(&[0x00]);
        let mut engine = ReadEngine::new();
        engine.reset_reading(false);
        let mut wrapped_at = None;
        for i in 0..(MAX_SIDE_SIZE * 16 + 16) {
            let (_, event) = engine.next_slot(&image);
            if event == RewindEvent::Wrapped {
                wrapped_at = Some(i);
                break;
            }
        }
        assert!(wrapped_at.is_some());
        assert_eq!(engine.current_byte(), 0);
    }

    #[test]
    fn turbo_overrun_wraps_before_side_end() {
        let mut image = Image::new();
        image.push_bytes(&[0x00; 4]).unwrap();
        let mut engine = ReadEngine::new();
        engine.reset_reading(true);

        let mut wrapped = false;
        // Used space is tiny; turbo should wrap well before MAX_SIDE_SIZE.
        for _ in 0..((NOT_READY_BYTES as usize + 32) * 16) {
            let (_, event) = engine.next_slot(&image);
            if event == RewindEvent::Wrapped {
                wrapped = true;
                break;
            }
        }
        assert!(wrapped);
        assert_eq!(engine.current_byte(), 0);
    }

    #[test]
    fn fill_reports_wrap_within_the_batch() {
        let image = image_with(&[0x00]);
        let mut engine = ReadEngine::new();
        engine.reset_reading(false);
        // Drive close to the wrap point first.
        for _ in 0..((MAX_SIDE_SIZE - 1) * 16) {
            engine.next_slot(&image);
        }
        let mut buf = [0u16; 32];
        let wrapped = engine.fill(&image, &mut buf);
        assert!(wrapped);
    }
}
