//! Error taxonomy for the emulator core.

/// Errors surfaced by the `Storage` host adapter, passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Io,
    AlreadyExists,
    OutOfSpace,
}

/// Every fallible operation in this crate returns one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdsError {
    /// Malformed header, block-kind mismatch, or premature EOF before
    /// `min_blocks` blocks were read.
    InvalidRom,
    /// The side exceeds `MAX_SIDE_SIZE` before `min_blocks` was reached.
    RomTooLarge,
    /// Allocation failure. Never returned by the static-allocation engine;
    /// kept so a future dynamic-allocation build has somewhere to report it.
    OutOfMemory,
    /// `save()` was called against a read-only or write-protected image.
    ReadOnly,
    /// A stored block CRC did not match its recomputed payload CRC.
    WrongCrc,
    /// Passed through from the storage adapter.
    Storage(StorageError),
}

impl FdsError {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRom => "invalid FDS ROM",
            Self::RomTooLarge => "ROM side too large",
            Self::OutOfMemory => "out of memory",
            Self::ReadOnly => "image is read-only",
            Self::WrongCrc => "stored block CRC mismatch",
            Self::Storage(StorageError::NotFound) => "storage: not found",
            Self::Storage(StorageError::Io) => "storage: I/O error",
            Self::Storage(StorageError::AlreadyExists) => "storage: already exists",
            Self::Storage(StorageError::OutOfSpace) => "storage: out of space",
        }
    }
}

impl From<StorageError> for FdsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

pub type Result<T> = core::result::Result<T, FdsError>;
