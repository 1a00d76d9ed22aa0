//! Host abstraction the emulator core is generic over.
//!
//! The core never talks to a GPIO register, a timer or a filesystem
//! directly. Instead it is generic over a single [`HostInterface`]
//! implementation that bundles the handful of traits below. `fdskey-firmware`
//! implements this bundle against real STM32F4 peripherals; tests implement
//! it against an in-memory double. Associated types rather than `dyn Trait`
//! objects keep this crate free of an allocator.

/// A GPIO output line the drive reports state to the host on, or the host
/// drives a command into (WRITE_GATE, DRIVE_READY, MEDIA_SET, ...).
pub trait OutputLine {
    /// Drives the line to its asserted level.
    fn assert(&mut self);
    /// Drives the line to its deasserted level.
    fn deassert(&mut self);
    /// Drives the line to `asserted`.
    fn set(&mut self, asserted: bool) {
        if asserted {
            self.assert();
        } else {
            self.deassert();
        }
    }
}

/// A GPIO input line the host drives the drive with (MOTOR_ON, WRITE_GATE
/// request, scan/step request, ...).
pub trait InputLine {
    /// Returns `true` if the host is currently asserting the line.
    fn is_asserted(&self) -> bool;
}

/// Monotonic millisecond clock used for the NOT_READY dwell and the autosave
/// idle timer.
pub trait Clock {
    /// Milliseconds since some arbitrary but fixed epoch. Must never wrap
    /// within the lifetime of one power cycle at the resolutions this crate
    /// schedules against (seconds to low tens of seconds).
    fn now_ms(&self) -> u32;
}

/// Seekable, append-and-rewrite byte storage for a single open file. Mirrors
/// the narrow slice of file I/O the codec needs — no directory entry or
/// metadata beyond size.
pub trait StorageFile {
    /// Reads starting at the current position, returning the number of
    /// bytes actually read (short on EOF, never an error).
    fn read(&mut self, buf: &mut [u8]) -> crate::Result<usize>;
    /// Writes at the current position, extending the file if needed.
    fn write(&mut self, buf: &[u8]) -> crate::Result<()>;
    /// Moves the read/write cursor to an absolute byte offset.
    fn seek(&mut self, offset: u32) -> crate::Result<()>;
    /// Current length of the file in bytes.
    fn size(&self) -> crate::Result<u32>;
    /// Truncates (or, for this crate's purposes, zero-extends) the file to
    /// exactly `len` bytes.
    fn set_len(&mut self, len: u32) -> crate::Result<()>;
}

/// The storage medium `.fds` images are loaded from and saved to — an SD
/// card, flash filesystem, or (in tests) an in-memory map.
pub trait Storage {
    type File: StorageFile;

    /// Opens an existing file for reading and writing.
    fn open(&mut self, path: &str) -> crate::Result<Self::File>;
    /// Creates a new file, failing with [`crate::StorageError::AlreadyExists`]
    /// if `path` already exists and `exclusive` is set.
    fn create(&mut self, path: &str, exclusive: bool) -> crate::Result<Self::File>;
    /// Returns `true` if `path` names an existing file.
    fn exists(&mut self, path: &str) -> bool;
    /// Copies the whole contents of `from` to `to`, creating `to`.
    fn copy(&mut self, from: &str, to: &str) -> crate::Result<()>;
    /// Creates a directory, returning `Ok(())` if it already exists.
    fn mkdir(&mut self, path: &str) -> crate::Result<()>;
}

/// Selects how a turbo-file rewind behaves versus an original NES disk
/// system rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindSpeed {
    /// Matches the timing of a real disk system drive.
    Original,
    /// Fast-forwards past trailing unused gap once past `used_space`.
    Turbo,
}

/// Where a dirty image's changes are committed on `save()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStrategy {
    /// Overwrite the loaded file directly.
    InPlace,
    /// Write to a new file, moving the previous version to a `.bak` sibling
    /// first.
    RewriteBackup,
    /// Write through to a fixed Everdrive-style save-slot path instead of
    /// the file the side was loaded from.
    Everdrive,
}

/// User-configurable behavior the host exposes to the core. Cheap to copy;
/// re-read on demand rather than cached by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub rewind_speed: RewindSpeed,
    pub backup_strategy: BackupStrategy,
}

/// The bundle of hardware and platform capabilities [`crate::Emulator`] is
/// generic over. One concrete type implements this per target: real
/// peripherals in firmware, an in-memory double in tests.
pub trait HostInterface {
    type Ready: OutputLine;
    type MediaSet: OutputLine;
    type WritableMedia: OutputLine;
    type ReadData: OutputLine;
    type MotorOn: InputLine;
    type WriteGateRequest: InputLine;
    type Clock: Clock;
    type Storage: Storage;

    fn ready(&mut self) -> &mut Self::Ready;
    fn media_set(&mut self) -> &mut Self::MediaSet;
    /// WRITABLE_MEDIA, active low: asserted while the loaded side accepts
    /// writes, deasserted once it is loaded read-only.
    fn writable_media(&mut self) -> &mut Self::WritableMedia;
    fn read_data(&mut self) -> &mut Self::ReadData;
    fn motor_on(&self) -> &Self::MotorOn;
    fn write_gate_request(&self) -> &Self::WriteGateRequest;
    fn clock(&self) -> &Self::Clock;
    fn storage(&mut self) -> &mut Self::Storage;

    /// Current user configuration; may change between calls as the host
    /// reacts to a button press or a config file reload.
    fn settings(&self) -> Settings;
}
