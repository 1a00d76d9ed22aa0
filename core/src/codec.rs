//! Load/save codec between the on-disk `.fds` file layout and the in-memory
//! image buffer.
//!
//! Every path here is driven entirely through the [`crate::host::Storage`]
//! trait — this module never assumes a real filesystem, only the narrow
//! sequential open/read/write/seek/mkdir surface `HostInterface` exposes.

use core::fmt::Write as _;

use heapless::String;

use crate::block::{gap_bytes_for, payload_size_in_image, BlockKind};
use crate::crc::fds_crc;
use crate::engine::Emulator;
use crate::host::{BackupStrategy, HostInterface, OutputLine, Storage, StorageFile};
use crate::image::Image;
use crate::{FdsError, StorageError, FDS_FILE_HEADER_SIZE, FDS_SIGNATURE, GAP_TERMINATOR, MAX_BLOCKS, ROM_SIDE_SIZE};

/// Longest path this codec builds for a backup or Everdrive redirection
/// target. Generous over any reasonable storage-adapter mount path.
const MAX_BUILT_PATH_LEN: usize = 192;

type BuiltPath = String<MAX_BUILT_PATH_LEN>;

/// Why block enumeration during a load stopped before reaching a natural
/// end of side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// The gap, payload or CRC for the next block would not fit in
    /// `MAX_SIDE_SIZE`, or the block table itself is full.
    Overflow,
    /// The source file ran out of bytes mid-payload.
    Eof,
    /// The payload's leading tag byte did not match the block kind expected
    /// at this index.
    KindMismatch,
}

/// Loads one side of `path` into the image buffer.
pub(crate) fn load_side<H: HostInterface>(
    emu: &mut Emulator<H>,
    path: &str,
    side: u8,
    read_only: bool,
) -> crate::Result<()> {
    let (host, image, meta) = emu.parts_mut();

    host.media_set().assert();
    host.ready().deassert();

    let source = resolve_load_source(host, path);

    let mut file = host.storage().open(source.as_str())?;
    let f_size = file.size()?;
    let header_len = header_len_for_size(f_size)?;
    file.seek(header_len + u32::from(side) * ROM_SIDE_SIZE as u32)?;

    image.reset();
    match load_blocks(image, &mut file) {
        Ok(_) => {
            meta.path.clear();
            let _ = meta.path.push_str(path);
            meta.side_index = side;
            meta.read_only = read_only;
            meta.changed = false;
            Ok(())
        }
        Err(e) => {
            image.reset();
            Err(e)
        }
    }
}

/// Writes the image back to storage. Assumes the caller has
/// already checked `changed`/`read_only`.
pub(crate) fn save<H: HostInterface>(emu: &mut Emulator<H>) -> crate::Result<()> {
    let (host, image, meta) = emu.parts_mut();

    for i in 0..image.block_count() {
        verify_block_crc(image, i)?;
    }

    let rom_path: BuiltPath = {
        let mut s = String::new();
        let _ = s.push_str(meta.path.as_str());
        s
    };

    let dest = resolve_save_destination(host, rom_path.as_str())?;

    let mut file = host.storage().open(dest.as_str())?;
    let dest_size = file.size()?;
    let header_len = header_len_for_size(dest_size)?;
    write_blocks(image, &mut file, header_len, meta.side_index)?;

    host.media_set().assert();
    Ok(())
}

// ---- Load helpers -------------------------------------------------------

/// Redirects the load source to a prior Everdrive save-slot file if one
/// exists and the host is configured for it.
fn resolve_load_source<H: HostInterface>(host: &mut H, path: &str) -> BuiltPath {
    let mut resolved = String::new();
    let _ = resolved.push_str(path);

    if host.settings().backup_strategy == BackupStrategy::Everdrive {
        let candidate = everdrive_path(path);
        if host.storage().exists(candidate.as_str()) {
            resolved = candidate;
        }
    }
    resolved
}

/// Maps a file size to its leading-header length, rejecting sizes that are
/// neither a whole number of sides nor one 16-byte-headered whole number of
/// sides.
fn header_len_for_size(size: u32) -> crate::Result<u32> {
    match size % ROM_SIDE_SIZE as u32 {
        0 => Ok(0),
        16 => Ok(FDS_FILE_HEADER_SIZE as u32),
        _ => Err(FdsError::InvalidRom),
    }
}

/// Reads and frames every block of one side from `file` into `image`,
/// returning the number of whole blocks accepted.
fn load_blocks<F: StorageFile>(image: &mut Image, file: &mut F) -> crate::Result<usize> {
    let mut min_blocks = 2usize;
    let mut block_count = 0usize;
    let mut stop;

    let mut i = 0usize;
    loop {
        if i >= MAX_BLOCKS {
            stop = StopReason::Overflow;
            break;
        }

        let block_start = image.used_space();
        let gap = gap_bytes_for(i);

        if block_start as usize + gap > image.capacity() || image.begin_block().is_err() {
            image.truncate(block_start);
            stop = StopReason::Overflow;
            break;
        }
        for _ in 0..gap - 1 {
            let _ = image.push_byte(0);
        }
        let _ = image.push_byte(GAP_TERMINATOR);

        let expected_kind = BlockKind::expected_at(i);
        let payload_size = match expected_kind {
            BlockKind::FileData => match payload_size_in_image(image, i) {
                Some(size) => size,
                None => {
                    image.truncate(block_start);
                    stop = StopReason::KindMismatch;
                    break;
                }
            },
            kind => kind.fixed_payload_size().expect("fixed kinds always carry a size"),
        };

        if image.used_space() as usize + payload_size + 2 > image.capacity() {
            image.truncate(block_start);
            stop = StopReason::Overflow;
            break;
        }

        let payload_start = block_start as usize + gap;
        let read_len = {
            let buf = image.reserve(payload_size)?;
            let n = file.read(buf)?;
            if n < buf.len() {
                for b in &mut buf[n..] {
                    *b = 0;
                }
            }
            n
        };
        if read_len < payload_size {
            image.truncate(block_start);
            stop = StopReason::Eof;
            break;
        }

        let tag = image.bytes()[payload_start];
        if BlockKind::from_tag(tag) != Some(expected_kind) {
            image.truncate(block_start);
            stop = StopReason::KindMismatch;
            break;
        }

        if i == 0 && &image.bytes()[payload_start + 1..payload_start + 15] != FDS_SIGNATURE.as_slice() {
            image.truncate(block_start);
            return Err(FdsError::InvalidRom);
        }

        let payload_end = payload_start + payload_size;
        let crc = fds_crc(&image.bytes()[payload_start..payload_end]);
        let [lo, hi] = crc.to_le_bytes();
        let _ = image.push_byte(lo);
        let _ = image.push_byte(hi);

        if i == 1 {
            let file_count_field = image.bytes()[payload_start + 1];
            min_blocks = usize::from(file_count_field) * 2 + 2;
        }

        block_count += 1;
        i += 1;
    }

    if block_count < min_blocks {
        return Err(match stop {
            StopReason::Overflow => FdsError::RomTooLarge,
            StopReason::Eof | StopReason::KindMismatch => FdsError::InvalidRom,
        });
    }
    Ok(block_count)
}

// ---- Save helpers --------------------------------------------------------

/// Recomputes a block's payload CRC and compares it against the stored
/// trailing checksum.
fn verify_block_crc(image: &Image, index: usize) -> crate::Result<()> {
    let offset = image.block_offset(index).ok_or(FdsError::WrongCrc)?;
    let gap = gap_bytes_for(index);
    let payload_size = payload_size_in_image(image, index).ok_or(FdsError::WrongCrc)?;

    let start = offset as usize + gap;
    let end = start + payload_size;
    let bytes = image.bytes();
    if end + 2 > bytes.len() {
        return Err(FdsError::WrongCrc);
    }

    let computed = fds_crc(&bytes[start..end]);
    let stored = u16::from_le_bytes([bytes[end], bytes[end + 1]]);
    if computed != stored {
        return Err(FdsError::WrongCrc);
    }
    Ok(())
}

/// Resolves where a save is written, creating a backup or Everdrive
/// save-slot copy first if one is missing.
fn resolve_save_destination<H: HostInterface>(host: &mut H, rom_path: &str) -> crate::Result<BuiltPath> {
    match host.settings().backup_strategy {
        BackupStrategy::InPlace => {
            let mut s = String::new();
            let _ = s.push_str(rom_path);
            Ok(s)
        }
        BackupStrategy::RewriteBackup => {
            let backup = backup_path(rom_path);
            if !host.storage().exists(backup.as_str()) {
                host.storage().copy(rom_path, backup.as_str())?;
            }
            let mut s = String::new();
            let _ = s.push_str(rom_path);
            Ok(s)
        }
        BackupStrategy::Everdrive => {
            let game_dir = everdrive_game_dir(rom_path);
            ensure_dir(host.storage(), "EDN8\\gamedata")?;
            ensure_dir(host.storage(), game_dir.as_str())?;

            let dest = everdrive_path(rom_path);
            if !host.storage().exists(dest.as_str()) {
                copy_stripping_header(host.storage(), rom_path, dest.as_str())?;
            }
            Ok(dest)
        }
    }
}

fn ensure_dir<S: Storage>(storage: &mut S, path: &str) -> crate::Result<()> {
    match storage.mkdir(path) {
        Ok(()) | Err(FdsError::Storage(StorageError::AlreadyExists)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copies `from` to `to`, dropping the leading 16-byte header if `from`
/// carries one (Everdrive save slots are always
/// headerless).
fn copy_stripping_header<S: Storage>(storage: &mut S, from: &str, to: &str) -> crate::Result<()> {
    let mut src = storage.open(from)?;
    let header_len = header_len_for_size(src.size()?)?;
    src.seek(header_len)?;

    let mut dst = storage.create(to, false)?;
    let mut buf = [0u8; 512];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write(&buf[..n])?;
    }
    Ok(())
}

/// Writes every block's payload and stored CRC, contiguous, starting at
/// `header_len + side * ROM_SIDE_SIZE`.
fn write_blocks<F: StorageFile>(image: &Image, file: &mut F, header_len: u32, side: u8) -> crate::Result<()> {
    file.seek(header_len + u32::from(side) * ROM_SIDE_SIZE as u32)?;

    for i in 0..image.block_count() {
        let offset = image.block_offset(i).ok_or(FdsError::InvalidRom)?;
        let gap = gap_bytes_for(i);
        let payload_size = payload_size_in_image(image, i).ok_or(FdsError::InvalidRom)?;

        let start = offset as usize + gap;
        let end = start + payload_size + 2;
        file.write(&image.bytes()[start..end])?;
    }
    Ok(())
}

// ---- Path helpers ---------------------------------------------------------

/// The final path component of `path`, with any trailing extension
/// stripped — the basename the Everdrive save layout keys on.
fn basename(path: &str) -> &str {
    let mut start = 0;
    for (i, b) in path.bytes().enumerate() {
        if b == b'\\' || b == b'/' {
            start = i + 1;
        }
    }
    let name = &path[start..];
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

fn everdrive_game_dir(rom_path: &str) -> BuiltPath {
    let mut s = String::new();
    let _ = write!(s, "EDN8\\gamedata\\{}", basename(rom_path));
    s
}

fn everdrive_path(rom_path: &str) -> BuiltPath {
    let mut s = String::new();
    let _ = write!(s, "EDN8\\gamedata\\{}\\bram.srm", basename(rom_path));
    s
}

fn backup_path(rom_path: &str) -> BuiltPath {
    let mut s = String::new();
    let _ = write!(s, "{rom_path}.bak");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Clock, InputLine, OutputLine, RewindSpeed, Settings};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::string::String as StdString;
    use std::vec::Vec;

    #[derive(Clone)]
    struct MemFile {
        data: Rc<RefCell<Vec<u8>>>,
        pos: usize,
    }

    impl StorageFile for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> crate::Result<usize> {
            let data = self.data.borrow();
            let n = buf.len().min(data.len().saturating_sub(self.pos));
            buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
        fn write(&mut self, buf: &[u8]) -> crate::Result<()> {
            let mut data = self.data.borrow_mut();
            let end = self.pos + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[self.pos..end].copy_from_slice(buf);
            self.pos = end;
            Ok(())
        }
        fn seek(&mut self, offset: u32) -> crate::Result<()> {
            self.pos = offset as usize;
            Ok(())
        }
        fn size(&self) -> crate::Result<u32> {
            Ok(self.data.borrow().len() as u32)
        }
        fn set_len(&mut self, len: u32) -> crate::Result<()> {
            self.data.borrow_mut().resize(len as usize, 0);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStorage {
        files: HashMap<StdString, Rc<RefCell<Vec<u8>>>>,
    }

    impl Storage for MemStorage {
        type File = MemFile;

        fn open(&mut self, path: &str) -> crate::Result<Self::File> {
            self.files
                .get(path)
                .cloned()
                .map(|data| MemFile { data, pos: 0 })
                .ok_or(FdsError::Storage(StorageError::NotFound))
        }
        fn create(&mut self, path: &str, exclusive: bool) -> crate::Result<Self::File> {
            if exclusive && self.files.contains_key(path) {
                return Err(FdsError::Storage(StorageError::AlreadyExists));
            }
            let data = Rc::new(RefCell::new(Vec::new()));
            self.files.insert(path.into(), data.clone());
            Ok(MemFile { data, pos: 0 })
        }
        fn exists(&mut self, path: &str) -> bool {
            self.files.contains_key(path)
        }
        fn copy(&mut self, from: &str, to: &str) -> crate::Result<()> {
            let data = self
                .files
                .get(from)
                .cloned()
                .ok_or(FdsError::Storage(StorageError::NotFound))?;
            let bytes = data.borrow().clone();
            self.files.insert(to.into(), Rc::new(RefCell::new(bytes)));
            Ok(())
        }
        fn mkdir(&mut self, _path: &str) -> crate::Result<()> {
            Ok(())
        }
    }

    struct FakeLine(bool);
    impl OutputLine for FakeLine {
        fn assert(&mut self) {
            self.0 = true;
        }
        fn deassert(&mut self) {
            self.0 = false;
        }
    }
    impl InputLine for FakeLine {
        fn is_asserted(&self) -> bool {
            self.0
        }
    }

    struct FakeClock;
    impl Clock for FakeClock {
        fn now_ms(&self) -> u32 {
            0
        }
    }

    struct FakeHost {
        ready: FakeLine,
        media_set: FakeLine,
        writable_media: FakeLine,
        read_data: FakeLine,
        motor_on: FakeLine,
        write_gate_request: FakeLine,
        clock: FakeClock,
        storage: MemStorage,
        backup_strategy: BackupStrategy,
    }

    impl FakeHost {
        fn new(backup_strategy: BackupStrategy) -> Self {
            Self {
                ready: FakeLine(false),
                media_set: FakeLine(false),
                writable_media: FakeLine(false),
                read_data: FakeLine(false),
                motor_on: FakeLine(false),
                write_gate_request: FakeLine(false),
                clock: FakeClock,
                storage: MemStorage::default(),
                backup_strategy,
            }
        }
    }

    impl HostInterface for FakeHost {
        type Ready = FakeLine;
        type MediaSet = FakeLine;
        type WritableMedia = FakeLine;
        type ReadData = FakeLine;
        type MotorOn = FakeLine;
        type WriteGateRequest = FakeLine;
        type Clock = FakeClock;
        type Storage = MemStorage;

        fn ready(&mut self) -> &mut Self::Ready {
            &mut self.ready
        }
        fn media_set(&mut self) -> &mut Self::MediaSet {
            &mut self.media_set
        }
        fn writable_media(&mut self) -> &mut Self::WritableMedia {
            &mut self.writable_media
        }
        fn read_data(&mut self) -> &mut Self::ReadData {
            &mut self.read_data
        }
        fn motor_on(&self) -> &Self::MotorOn {
            &self.motor_on
        }
        fn write_gate_request(&self) -> &Self::WriteGateRequest {
            &self.write_gate_request
        }
        fn clock(&self) -> &Self::Clock {
            &self.clock
        }
        fn storage(&mut self) -> &mut Self::Storage {
            &mut self.storage
        }
        fn settings(&self) -> Settings {
            Settings {
                rewind_speed: RewindSpeed::Turbo,
                backup_strategy: self.backup_strategy,
            }
        }
    }

    /// Builds one side's worth of bytes: a valid disk-info block and a
    /// zero-file file-count block, padded with zeros out to `ROM_SIDE_SIZE`.
    fn minimal_side_bytes() -> Vec<u8> {
        let mut side = Vec::new();

        let mut disk_info = [0u8; 56];
        disk_info[0] = 0x01;
        disk_info[1..15].copy_from_slice(FDS_SIGNATURE);
        side.extend_from_slice(&disk_info);
        let crc = fds_crc(&disk_info);
        side.extend_from_slice(&crc.to_le_bytes());

        let file_count = [0x02u8, 0x00];
        side.extend_from_slice(&file_count);
        let crc = fds_crc(&file_count);
        side.extend_from_slice(&crc.to_le_bytes());

        side.resize(ROM_SIDE_SIZE, 0);
        side
    }

    #[test]
    fn loads_a_minimal_valid_side() {
        let mut host = FakeHost::new(BackupStrategy::InPlace);
        host.storage.files.insert("rom.fds".into(), Rc::new(RefCell::new(minimal_side_bytes())));

        let mut emu = Emulator::new(host);
        emu.load_side("rom.fds", 0, false).unwrap();

        assert_eq!(emu.get_block_count(), 2);
        assert_eq!(
            emu.get_used_space(),
            (crate::FIRST_GAP_BYTES + 56 + 2 + crate::NEXT_GAP_BYTES + 2 + 2) as u32
        );
        assert!(!emu.is_changed());
    }

    #[test]
    fn rejects_a_side_missing_the_fds_signature() {
        let mut bytes = minimal_side_bytes();
        bytes[1] = b'X'; // corrupt the signature
        let mut host = FakeHost::new(BackupStrategy::InPlace);
        host.storage.files.insert("rom.fds".into(), Rc::new(RefCell::new(bytes)));

        let mut emu = Emulator::new(host);
        let err = emu.load_side("rom.fds", 0, false).unwrap_err();
        assert_eq!(err, FdsError::InvalidRom);
    }

    #[test]
    fn save_detects_a_corrupted_crc_before_touching_the_file() {
        let mut host = FakeHost::new(BackupStrategy::InPlace);
        let original = minimal_side_bytes();
        host.storage.files.insert("rom.fds".into(), Rc::new(RefCell::new(original.clone())));

        let mut emu = Emulator::new(host);
        emu.load_side("rom.fds", 0, false).unwrap();

        let (_, image, meta) = emu.parts_mut();
        meta.changed = true;
        image.set_byte(56, 0xFF); // corrupt block 0's stored CRC lo byte

        let err = emu.save().unwrap_err();
        assert_eq!(err, FdsError::WrongCrc);

        let stored = emu.host().storage.files.get("rom.fds").unwrap().borrow().clone();
        assert_eq!(stored, original);
    }

    #[test]
    fn save_round_trips_the_payload_and_crc_bytes() {
        let mut host = FakeHost::new(BackupStrategy::InPlace);
        host.storage.files.insert("rom.fds".into(), Rc::new(RefCell::new(minimal_side_bytes())));

        let mut emu = Emulator::new(host);
        emu.load_side("rom.fds", 0, false).unwrap();

        let (_, _image, meta) = emu.parts_mut();
        meta.changed = true;

        emu.save().unwrap();
        assert!(!emu.is_changed());

        let saved = emu.host().storage.files.get("rom.fds").unwrap().borrow().clone();
        assert_eq!(&saved[..62], &minimal_side_bytes()[..62]);
    }

    #[test]
    fn everdrive_save_redirects_subsequent_loads() {
        let mut host = FakeHost::new(BackupStrategy::Everdrive);
        host.storage.files.insert("rom.fds".into(), Rc::new(RefCell::new(minimal_side_bytes())));

        let mut emu = Emulator::new(host);
        emu.load_side("rom.fds", 0, false).unwrap();
        let (_, _image, meta) = emu.parts_mut();
        meta.changed = true;
        emu.save().unwrap();

        assert!(emu.host_mut().storage().exists("EDN8\\gamedata\\rom\\bram.srm"));

        emu.load_side("rom.fds", 0, false).unwrap();
        assert_eq!(emu.get_block_count(), 2);
    }
}
