//! `fdskey_core::host::{Storage, StorageFile}` over a real SD card.
//!
//! The USB flux tracer this firmware started from never persists anything
//! to a filesystem — it streams flux straight to a USB host. `embedded-sdmmc`
//! is the ecosystem's `no_std` FAT crate for exactly this job (SPI SD card,
//! no allocator required beyond what it asks for itself) and is pulled in
//! fresh for this module.
//!
//! `embedded-sdmmc`'s directory/file handles normally borrow the
//! `VolumeManager` they came from, which doesn't fit a `Self::File`
//! associated type returned by value from `open`/`create` and then used
//! independently of further `Storage` calls. Its "raw" handle API sidesteps
//! that by returning plain `Copy` IDs (`RawVolume`/`RawDirectory`/`RawFile`)
//! that every operation is re-dispatched through the shared manager with —
//! the same `Rc<RefCell<...>>`-shared-backing-store idiom `codec.rs`'s
//! `MemFile` test double uses for its in-memory stand-in.

use alloc::rc::Rc;
use core::cell::RefCell;

use heapless::Vec as HVec;

use embedded_sdmmc::{
    Error as SdError, Mode, RawDirectory, RawFile, SdCard, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use stm32f4xx_hal::hal::blocking::delay::DelayUs;
use stm32f4xx_hal::hal::digital::v2::OutputPin;
use stm32f4xx_hal::hal::spi::FullDuplex;

use fdskey_core::host::{Storage, StorageFile};
use fdskey_core::{FdsError, StorageError};

/// Every file this drive ever opens is dateless; the NES never asked for a
/// real-time clock and we don't have a battery-backed one to give it.
pub struct NoTimeSource;

impl TimeSource for NoTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

fn map_err(err: SdError<embedded_sdmmc::sdcard::Error>) -> FdsError {
    match err {
        SdError::NotFound => StorageError::NotFound.into(),
        SdError::FileAlreadyExists => StorageError::AlreadyExists.into(),
        SdError::DiskFull => StorageError::OutOfSpace.into(),
        _ => StorageError::Io.into(),
    }
}

type Card<SPI, CS, DELAY> = SdCard<SPI, CS, DELAY>;
type Manager<SPI, CS, DELAY> = VolumeManager<Card<SPI, CS, DELAY>, NoTimeSource>;

/// A single open `.fds` (or `.bak`) file, addressed through the shared
/// volume manager by its raw handle.
pub struct SdFile<SPI, CS, DELAY> {
    manager: Rc<RefCell<Manager<SPI, CS, DELAY>>>,
    handle: RawFile,
}

impl<SPI, CS, DELAY> StorageFile for SdFile<SPI, CS, DELAY>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u8>,
{
    fn read(&mut self, buf: &mut [u8]) -> fdskey_core::Result<usize> {
        self.manager
            .borrow_mut()
            .read(self.handle, buf)
            .map_err(map_err)
    }

    fn write(&mut self, buf: &[u8]) -> fdskey_core::Result<()> {
        self.manager
            .borrow_mut()
            .write(self.handle, buf)
            .map_err(map_err)
    }

    fn seek(&mut self, offset: u32) -> fdskey_core::Result<()> {
        self.manager
            .borrow_mut()
            .file_seek_from_start(self.handle, offset)
            .map_err(map_err)
    }

    fn size(&self) -> fdskey_core::Result<u32> {
        self.manager
            .borrow()
            .file_length(self.handle)
            .map_err(map_err)
    }

    fn set_len(&mut self, len: u32) -> fdskey_core::Result<()> {
        let mut manager = self.manager.borrow_mut();
        let current = manager.file_length(self.handle).map_err(map_err)?;
        if len < current {
            manager.file_seek_from_start(self.handle, len).map_err(map_err)?;
            manager.truncate_file(self.handle).map_err(map_err)?;
        } else if len > current {
            manager.file_seek_from_start(self.handle, current).map_err(map_err)?;
            let zeroes = [0u8; 64];
            let mut remaining = len - current;
            while remaining > 0 {
                let chunk = remaining.min(zeroes.len() as u32) as usize;
                manager.write(self.handle, &zeroes[..chunk]).map_err(map_err)?;
                remaining -= chunk as u32;
            }
        }
        Ok(())
    }
}

impl<SPI, CS, DELAY> Drop for SdFile<SPI, CS, DELAY> {
    fn drop(&mut self) {
        let _ = self.manager.borrow_mut().close_file(self.handle);
    }
}

/// Root directory of a single FAT volume, kept open for the drive's whole
/// power cycle.
pub struct SdStorage<SPI, CS, DELAY> {
    manager: Rc<RefCell<Manager<SPI, CS, DELAY>>>,
    root: RawDirectory,
}

impl<SPI, CS, DELAY> SdStorage<SPI, CS, DELAY>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u8>,
{
    /// Mounts the first partition of `card` and opens its root directory.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the card can't be initialized or no
    /// FAT volume is found.
    pub fn mount(card: Card<SPI, CS, DELAY>) -> fdskey_core::Result<Self> {
        let mut manager = VolumeManager::new(card, NoTimeSource);
        let volume = manager
            .open_raw_volume(VolumeIdx(0))
            .map_err(map_err)?;
        let root = manager.open_root_dir(volume).map_err(map_err)?;
        Ok(Self {
            manager: Rc::new(RefCell::new(manager)),
            root,
        })
    }

    fn open_with_mode(&mut self, path: &str, mode: Mode) -> fdskey_core::Result<SdFile<SPI, CS, DELAY>> {
        let (parent, name) = self.resolve_parent(path, mode != Mode::ReadWriteAppend)?;
        let handle = self
            .manager
            .borrow_mut()
            .open_file_in_dir(parent, name, mode)
            .map_err(map_err)?;
        self.close_if_not_root(parent);
        Ok(SdFile {
            manager: Rc::clone(&self.manager),
            handle,
        })
    }

    /// Walks every directory component of `path` but the last, opening each
    /// one relative to its parent (creating it first if `create_missing` is
    /// set and it doesn't exist). Everdrive save slots are the only paths
    /// with more than one component (`EDN8\gamedata\<basename>\bram.srm`);
    /// an ordinary `.fds`/`.bak` path resolves straight to the root
    /// directory with no traversal.
    fn resolve_parent<'a>(&mut self, path: &'a str, create_missing: bool) -> fdskey_core::Result<(RawDirectory, &'a str)> {
        const MAX_DEPTH: usize = 8;
        let mut parts: HVec<&str, MAX_DEPTH> = HVec::new();
        for part in path.split(|c| c == '\\' || c == '/') {
            if !part.is_empty() {
                parts.push(part).map_err(|_| FdsError::Storage(StorageError::Io))?;
            }
        }
        let Some((&name, dirs)) = parts.split_last() else {
            return Err(FdsError::Storage(StorageError::NotFound));
        };

        let mut current = self.root;
        for &dir in dirs {
            if create_missing {
                let mut manager = self.manager.borrow_mut();
                match manager.make_dir_in_dir(current, dir) {
                    Ok(()) | Err(SdError::DirAlreadyExists) => {}
                    Err(e) => return Err(map_err(e)),
                }
            }
            let next = self.manager.borrow_mut().open_dir(current, dir).map_err(map_err)?;
            self.close_if_not_root(current);
            current = next;
        }
        Ok((current, name))
    }

    fn close_if_not_root(&self, dir: RawDirectory) {
        if dir != self.root {
            let _ = self.manager.borrow_mut().close_dir(dir);
        }
    }
}

impl<SPI, CS, DELAY> Storage for SdStorage<SPI, CS, DELAY>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u8>,
{
    type File = SdFile<SPI, CS, DELAY>;

    fn open(&mut self, path: &str) -> fdskey_core::Result<Self::File> {
        self.open_with_mode(path, Mode::ReadWriteAppend)
    }

    fn create(&mut self, path: &str, exclusive: bool) -> fdskey_core::Result<Self::File> {
        let mode = if exclusive {
            Mode::ReadWriteCreate
        } else {
            Mode::ReadWriteCreateOrTruncate
        };
        self.open_with_mode(path, mode)
    }

    fn exists(&mut self, path: &str) -> bool {
        let Ok((parent, name)) = self.resolve_parent(path, false) else {
            return false;
        };
        let found = self.manager.borrow_mut().find_directory_entry(parent, name).is_ok();
        self.close_if_not_root(parent);
        found
    }

    fn copy(&mut self, from: &str, to: &str) -> fdskey_core::Result<()> {
        let mut src = self.open_with_mode(from, Mode::ReadWriteAppend)?;
        let mut dst = self.open_with_mode(to, Mode::ReadWriteCreateOrTruncate)?;
        let mut buf = [0u8; 256];
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write(&buf[..n])?;
        }
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> fdskey_core::Result<()> {
        // `path` may be several components deep (the Everdrive save slot is
        // `EDN8\gamedata\<basename>`); walk and create every parent that
        // doesn't exist yet before creating the final component.
        let (parent, name) = self.resolve_parent(path, true)?;
        let result = {
            let mut manager = self.manager.borrow_mut();
            match manager.make_dir_in_dir(parent, name) {
                Ok(()) | Err(SdError::DirAlreadyExists) => Ok(()),
                Err(e) => Err(map_err(e)),
            }
        };
        self.close_if_not_root(parent);
        result
    }
}
