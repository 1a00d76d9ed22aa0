//! The `Emulator` aggregate: couples the image, the read/write engines and
//! the drive FSM to a [`HostInterface`]. One instance per drive rather than
//! scattered globals, with an explicit constructor instead of static state.

use heapless::String;

use crate::fsm::DriveState;
use crate::host::{HostInterface, RewindSpeed};
use crate::image::Image;
use crate::read_engine::ReadEngine;
use crate::write_engine::{BlockBoundary, WriteEngine};
use crate::{FdsError, NOT_READY_TIME_ORIGINAL_MS, NOT_READY_TIME_TURBO_MS, READ_BUFFER_SLOTS};

/// Longest filename the metadata block remembers, generous enough for a
/// full storage path.
const MAX_PATH_LEN: usize = 128;

pub(crate) struct Metadata {
    pub(crate) path: String<MAX_PATH_LEN>,
    pub(crate) side_index: u8,
    pub(crate) read_only: bool,
    pub(crate) changed: bool,
    pub(crate) last_action_time: u32,
    pub(crate) not_ready_time: u32,
}

impl Metadata {
    fn new() -> Self {
        Self {
            path: String::new(),
            side_index: 0,
            read_only: false,
            changed: false,
            last_action_time: 0,
            not_ready_time: 0,
        }
    }
}

/// Ties the hardware-agnostic transport (image, read/write engines, drive
/// FSM) to one concrete [`HostInterface`]. One instance per drive.
pub struct Emulator<H: HostInterface> {
    host: H,
    image: Image,
    state: DriveState,
    read_engine: ReadEngine,
    write_engine: WriteEngine,
    writing_block: usize,
    meta: Metadata,
}

impl<H: HostInterface> Emulator<H> {
    #[must_use]
    pub fn new(host: H) -> Self {
        Self {
            host,
            image: Image::new(),
            state: DriveState::Off,
            read_engine: ReadEngine::new(),
            write_engine: WriteEngine::new(),
            writing_block: 0,
            meta: Metadata::new(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Grants [`crate::codec`] joint mutable access to the host, image and
    /// metadata it orchestrates across a load or save.
    pub(crate) fn parts_mut(&mut self) -> (&mut H, &mut Image, &mut Metadata) {
        (&mut self.host, &mut self.image, &mut self.meta)
    }

    fn turbo(&self) -> bool {
        self.host.settings().rewind_speed == RewindSpeed::Turbo
    }

    // ---- Public operations -------------------------------------------

    /// Loads one side of `path` into the image buffer. See
    /// [`crate::codec::load_side`] for the full procedure.
    pub fn load_side(&mut self, path: &str, side: u8, read_only: bool) -> crate::Result<()> {
        self.close(false)?;
        crate::codec::load_side(self, path, side, read_only)?;
        self.host.writable_media().set(!self.meta.read_only);
        self.meta.last_action_time = self.host.clock().now_ms();
        if self.host.motor_on().is_asserted() && self.turbo() {
            self.arm_read_wait_ready_timer();
        } else {
            self.state = DriveState::Idle;
        }
        self.check_pins();
        Ok(())
    }

    /// Writes the image back to storage if dirty. See
    /// [`crate::codec::save`] for the full procedure.
    pub fn save(&mut self) -> crate::Result<()> {
        if !self.meta.changed {
            return Ok(());
        }
        if self.meta.read_only {
            return Err(FdsError::ReadOnly);
        }
        crate::codec::save(self)?;
        self.meta.changed = false;
        self.check_pins();
        Ok(())
    }

    /// Optionally saves, then resets all transport state to `OFF`.
    pub fn close(&mut self, save_first: bool) -> crate::Result<()> {
        if save_first && self.meta.changed {
            self.save()?;
        }
        self.image.reset();
        self.state = DriveState::Off;
        self.meta = Metadata::new();
        Ok(())
    }

    #[must_use]
    pub fn get_state(&self) -> DriveState {
        self.state
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.meta.changed
    }

    #[must_use]
    pub fn get_block(&self) -> Option<usize> {
        let cursor = if self.state.is_writing() {
            self.write_engine.current_byte()
        } else {
            self.read_engine.current_byte()
        };
        self.image.block_index_for_offset(cursor)
    }

    #[must_use]
    pub fn get_block_count(&self) -> usize {
        self.image.block_count()
    }

    #[must_use]
    pub fn get_head_position(&self) -> u32 {
        if self.state.is_writing() {
            self.write_engine.current_byte()
        } else {
            self.read_engine.current_byte()
        }
    }

    #[must_use]
    pub fn get_max_size(&self) -> usize {
        self.image.capacity()
    }

    #[must_use]
    pub fn get_used_space(&self) -> u32 {
        self.image.used_space()
    }

    // ---- Drive FSM tick ------------------------------------------------

    fn arm_read_wait_ready_timer(&mut self) {
        self.host.ready().deassert();
        self.meta.not_ready_time = self.host.clock().now_ms();
        self.state = DriveState::ReadWaitReadyTimer;
        self.read_engine.reset_reading(self.turbo());
    }

    fn full_stop(&mut self) {
        self.state = DriveState::Idle;
        if self.turbo() {
            self.read_engine.reset_reading(true);
        }
    }

    fn not_ready_dwell_ms(&self) -> u32 {
        if self.turbo() {
            NOT_READY_TIME_TURBO_MS
        } else {
            NOT_READY_TIME_ORIGINAL_MS
        }
    }

    /// FSM tick and host-line observer. Must be called on every relevant
    /// GPIO change and periodically (about every 100 ms).
    pub fn check_pins(&mut self) {
        let now = self.host.clock().now_ms();
        let motor_on = self.host.motor_on().is_asserted();
        let write_requested = self.host.write_gate_request().is_asserted();

        if !motor_on {
            match self.state {
                DriveState::Off | DriveState::Writing => {}
                DriveState::Idle => {
                    if self.meta.changed && now > self.meta.last_action_time + crate::AUTOSAVE_DELAY_MS {
                        self.state = DriveState::SavePending;
                    }
                }
                DriveState::SavePending => {
                    if !self.meta.changed {
                        self.state = DriveState::Idle;
                    }
                }
                _ => self.full_stop(),
            }
            return;
        }

        if self.state == DriveState::SavePending && !self.meta.changed {
            self.state = DriveState::Idle;
        }

        if !write_requested {
            match self.state {
                DriveState::Idle => {
                    if self.turbo() || self.read_engine.current_byte() == 0 {
                        self.arm_read_wait_ready_timer();
                    } else {
                        self.state = DriveState::ReadWaitReady;
                    }
                }
                DriveState::ReadWaitReadyTimer => {
                    if now >= self.meta.not_ready_time + self.not_ready_dwell_ms() {
                        self.host.ready().assert();
                        self.state = DriveState::Reading;
                    }
                }
                DriveState::WritingStopping => {
                    self.state = DriveState::Reading;
                    self.host.ready().assert();
                }
                _ => {}
            }
        } else {
            match self.state {
                DriveState::Idle
                | DriveState::Reading
                | DriveState::ReadWaitReady
                | DriveState::ReadWaitReadyTimer => {
                    self.state = DriveState::WritingGap;
                }
                _ => {}
            }
        }

        self.meta.last_action_time = now;
    }

    // ---- Read DMA callbacks ---------------------------------------------

    /// Refills the first half of a `READ_BUFFER`-sized slot buffer. A
    /// no-op unless the FSM is streaming or pre-streaming reads.
    pub fn on_read_half_complete(&mut self, out: &mut [u16; READ_BUFFER_SLOTS]) {
        self.refill_read_slots(&mut out[..READ_BUFFER_SLOTS / 2]);
    }

    /// Refills the second half of a `READ_BUFFER`-sized slot buffer.
    pub fn on_read_full_complete(&mut self, out: &mut [u16; READ_BUFFER_SLOTS]) {
        self.refill_read_slots(&mut out[READ_BUFFER_SLOTS / 2..]);
    }

    fn refill_read_slots(&mut self, out: &mut [u16]) {
        if !matches!(self.state, DriveState::Reading | DriveState::ReadWaitReady) {
            return;
        }
        let wrapped = self.read_engine.fill(&self.image, out);
        if wrapped {
            self.arm_read_wait_ready_timer();
        }
    }

    // ---- Write DMA callback ---------------------------------------------

    /// Processes one captured write-data timestamp. A no-op unless the FSM
    /// is in a writing state.
    pub fn on_write_capture(&mut self, timestamp: u16) {
        if !self.state.is_writing() {
            return;
        }
        let pulse = self.write_engine.pulse_from_timestamp(timestamp);

        match self.state {
            DriveState::WritingGap => {
                if self.write_engine.decode_gap(pulse) {
                    self.state = DriveState::Writing;
                    if self.write_engine.reset_writing(&mut self.image).is_err() {
                        self.full_stop();
                        return;
                    }
                    self.writing_block = self
                        .image
                        .block_index_for_offset(self.write_engine.current_byte())
                        .unwrap_or(0);
                }
            }
            DriveState::Writing => {
                let bits = self.write_engine.decode_writing(pulse);
                for bit in bits {
                    let boundary = self.write_engine.write_bit(&mut self.image, bit);
                    self.meta.changed = true;
                    if boundary == BlockBoundary::Reached {
                        self.write_engine
                            .finalize_block_crc(&mut self.image, self.writing_block);
                        self.finish_block_at_boundary();
                    }
                }
            }
            DriveState::WritingStopping => {
                if self.write_engine.decode_stopping(pulse) {
                    if self.write_engine.reset_writing(&mut self.image).is_err() {
                        self.full_stop();
                        return;
                    }
                    self.state = DriveState::WritingGap;
                }
            }
            _ => {}
        }
    }

    fn finish_block_at_boundary(&mut self) {
        let motor_on = self.host.motor_on().is_asserted();
        let write_requested = self.host.write_gate_request().is_asserted();

        if !motor_on {
            self.full_stop();
        } else if write_requested {
            self.state = DriveState::WritingStopping;
        } else {
            self.state = DriveState::Reading;
            self.host.ready().assert();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BackupStrategy, Clock, InputLine, OutputLine, Settings, Storage, StorageFile};

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

    struct FakeClock(u32);
    impl Clock for FakeClock {
        fn now_ms(&self) -> u32 {
            self.0
        }
    }

    struct FakeFile;
    impl StorageFile for FakeFile {
        fn read(&mut self, _buf: &mut [u8]) -> crate::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, _buf: &[u8]) -> crate::Result<()> {
            Ok(())
        }
        fn seek(&mut self, _offset: u32) -> crate::Result<()> {
            Ok(())
        }
        fn size(&self) -> crate::Result<u32> {
            Ok(0)
        }
        fn set_len(&mut self, _len: u32) -> crate::Result<()> {
            Ok(())
        }
    }

    struct FakeStorage;
    impl Storage for FakeStorage {
        type File = FakeFile;
        fn open(&mut self, _path: &str) -> crate::Result<Self::File> {
            Ok(FakeFile)
        }
        fn create(&mut self, _path: &str, _exclusive: bool) -> crate::Result<Self::File> {
            Ok(FakeFile)
        }
        fn exists(&mut self, _path: &str) -> bool {
            false
        }
        fn copy(&mut self, _from: &str, _to: &str) -> crate::Result<()> {
            Ok(())
        }
        fn mkdir(&mut self, _path: &str) -> crate::Result<()> {
            Ok(())
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
        storage: FakeStorage,
    }

    impl HostInterface for FakeHost {
        type Ready = FakeLine;
        type MediaSet = FakeLine;
        type WritableMedia = FakeLine;
        type ReadData = FakeLine;
        type MotorOn = FakeLine;
        type WriteGateRequest = FakeLine;
        type Clock = FakeClock;
        type Storage = FakeStorage;

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
                backup_strategy: BackupStrategy::InPlace,
            }
        }
    }

    fn fake_host() -> FakeHost {
        FakeHost {
            ready: FakeLine(false),
            media_set: FakeLine(false),
            writable_media: FakeLine(false),
            read_data: FakeLine(false),
            motor_on: FakeLine(false),
            write_gate_request: FakeLine(false),
            clock: FakeClock(0),
            storage: FakeStorage,
        }
    }

    #[test]
    fn motor_on_without_write_request_arms_the_ready_timer_in_turbo() {
        let mut emu = Emulator::new(fake_host());
        emu.state = DriveState::Idle;
        emu.host_mut().motor_on.0 = true;
        emu.check_pins();
        assert_eq!(emu.get_state(), DriveState::ReadWaitReadyTimer);
    }

    #[test]
    fn ready_timer_elapses_into_reading() {
        let mut emu = Emulator::new(fake_host());
        emu.state = DriveState::Idle;
        emu.host_mut().motor_on.0 = true;
        emu.check_pins();
        assert_eq!(emu.get_state(), DriveState::ReadWaitReadyTimer);

        emu.host_mut().clock.0 = NOT_READY_TIME_TURBO_MS + 1;
        emu.check_pins();
        assert_eq!(emu.get_state(), DriveState::Reading);
    }

    #[test]
    fn write_request_while_reading_enters_writing_gap() {
        let mut emu = Emulator::new(fake_host());
        emu.state = DriveState::Reading;
        emu.host_mut().motor_on.0 = true;
        emu.host_mut().write_gate_request.0 = true;
        emu.check_pins();
        assert_eq!(emu.get_state(), DriveState::WritingGap);
    }

    #[test]
    fn motor_off_from_idle_schedules_autosave_after_delay() {
        let mut emu = Emulator::new(fake_host());
        emu.state = DriveState::Idle;
        emu.meta.changed = true;
        emu.meta.last_action_time = 0;
        emu.host_mut().clock.0 = crate::AUTOSAVE_DELAY_MS + 1;
        emu.check_pins();
        assert_eq!(emu.get_state(), DriveState::SavePending);
    }
}
