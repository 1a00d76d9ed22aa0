//! Hardware-agnostic core of an FDS drive emulator.
//!
//! This crate implements the bit-level disk transport (read/write engines),
//! the block-structured on-media image model, the FDS CRC, the load/save
//! codec and the drive controller state machine. It never touches a GPIO
//! pin, a timer register or a filesystem directly — those are reached
//! through the traits in [`host`], so the same engine drives real hardware
//! in `fdskey-firmware` and a deterministic in-memory double in tests.
#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod codec;
pub mod crc;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod host;
pub mod image;
pub mod read_engine;
pub mod write_engine;

pub use engine::Emulator;
pub use error::{FdsError, Result, StorageError};
pub use fsm::DriveState;

/// Size in bytes of one side's worth of on-media raw bytes (gaps, block
/// payloads and CRCs). Sized generously over [`ROM_SIDE_SIZE`] to hold the
/// largest legal gap/block layout the loader can produce.
pub const MAX_SIDE_SIZE: usize = 81_600;

/// Maximum number of blocks the block index can track on one side. A file
/// count byte tops out at 255, giving `255 * 2 + 2 = 512` blocks at most.
pub const MAX_BLOCKS: usize = 512;

/// Size in bytes of one side inside the on-disk `.fds` file layout (no
/// gaps, no terminators).
pub const ROM_SIDE_SIZE: usize = 65_500;

/// Size in bytes of the optional iNES-style header some `.fds` files carry.
pub const FDS_FILE_HEADER_SIZE: usize = 16;

/// Byte length of the inter-block gap preceding block 0.
pub const FIRST_GAP_BYTES: usize = 3_538;

/// Byte length of the inter-block gap preceding every block after the
/// first, including its `0x80` terminator.
pub const NEXT_GAP_BYTES: usize = 123;

/// The byte that terminates every inter-block gap and precedes a block's
/// payload.
pub const GAP_TERMINATOR: u8 = 0x80;

/// ASCII signature required at payload offset 1..14 of block 0.
pub const FDS_SIGNATURE: &[u8; 14] = b"*NINTENDO-HVC*";

/// Capacity of the read engine's PWM slot buffer. Must be even: one half is
/// refilled per DMA half/full-complete callback.
pub const READ_BUFFER_SLOTS: usize = 16;

/// Capacity of the write engine's capture-timestamp buffer.
pub const WRITE_BUFFER_CAPTURES: usize = 8;

/// One PWM slot's "emit a pulse" value; `0` means "no pulse this phase".
pub const IMPULSE_LENGTH: u16 = 5;

/// Pulse-interval threshold separating a "short" from a "medium" interval,
/// in capture-timer ticks at a 24 MHz capture clock (~10 µs).
pub const THRESHOLD_T1: u32 = 240;

/// Pulse-interval threshold separating a "medium" from a "long" interval,
/// in capture-timer ticks (~15 µs).
pub const THRESHOLD_T2: u32 = 360;

/// Pulses discarded at the start of [`DriveState::WritingGap`] to swallow
/// the write-enable ramp-up before the gap-terminator start bit.
pub const WRITE_GAP_SKIP_BITS: u32 = 14;

/// Consecutive short pulses in `WRITING_STOPPING` that are taken as an
/// unlicensed cart writing the next block back-to-back without releasing
/// the WRITE line.
pub const MULTI_WRITE_UNLICENSED_BITS: u32 = 50;

/// Distance (in bytes) ahead of `used_space` at which turbo rewind treats
/// the remainder of the side as "past the end of data" and rewinds early
/// rather than streaming trailing gap bytes.
pub const NOT_READY_BYTES: u32 = 1_024;

/// Dwell, in milliseconds, the drive reports NOT_READY after a turbo
/// rewind before the host is allowed to start reading.
pub const NOT_READY_TIME_TURBO_MS: u32 = 150;

/// Dwell, in milliseconds, the drive reports NOT_READY after an
/// original-speed rewind (approximately one physical disk revolution).
pub const NOT_READY_TIME_ORIGINAL_MS: u32 = 200;

/// Idle dwell, in milliseconds, after the last host activity before a
/// dirty image is handed to the foreground driver for saving.
pub const AUTOSAVE_DELAY_MS: u32 = 2_000;
