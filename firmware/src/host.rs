//! `StmHost`: the one [`fdskey_core::host::HostInterface`] implementation
//! this firmware provides, bundling the floppy-bus GPIO lines, the SD card
//! and the jumper-read settings the way `main.rs` wires up a
//! `FloppyControl` from its constituent `FloppyDriveUnit`s and GPIO pins.

use fdskey_core::host::{HostInterface, Settings};

use crate::clock::SysClock;
use crate::drive_lines::{ActiveLowInput, ActiveLowOutput};
use crate::settings::JumperSettings;
use crate::storage::SdStorage;

/// Concrete storage backend this board exposes: an SD card over SPI.
pub type BoardStorage<SPI, CS, DELAY> = SdStorage<SPI, CS, DELAY>;

pub struct StmHost<SPI, CS, DELAY> {
    ready: ActiveLowOutput,
    media_set: ActiveLowOutput,
    writable_media: ActiveLowOutput,
    read_data: ActiveLowOutput,
    motor_on: ActiveLowInput,
    write_gate_request: ActiveLowInput,
    clock: SysClock,
    storage: BoardStorage<SPI, CS, DELAY>,
    settings: JumperSettings,
}

impl<SPI, CS, DELAY> StmHost<SPI, CS, DELAY> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ready: ActiveLowOutput,
        media_set: ActiveLowOutput,
        writable_media: ActiveLowOutput,
        read_data: ActiveLowOutput,
        motor_on: ActiveLowInput,
        write_gate_request: ActiveLowInput,
        storage: BoardStorage<SPI, CS, DELAY>,
        settings: JumperSettings,
    ) -> Self {
        Self {
            ready,
            media_set,
            writable_media,
            read_data,
            motor_on,
            write_gate_request,
            clock: SysClock,
            storage,
            settings,
        }
    }
}

impl<SPI, CS, DELAY> HostInterface for StmHost<SPI, CS, DELAY>
where
    SPI: stm32f4xx_hal::hal::spi::FullDuplex<u8>,
    CS: stm32f4xx_hal::hal::digital::v2::OutputPin,
    DELAY: stm32f4xx_hal::hal::blocking::delay::DelayUs<u8>,
{
    type Ready = ActiveLowOutput;
    type MediaSet = ActiveLowOutput;
    type WritableMedia = ActiveLowOutput;
    type ReadData = ActiveLowOutput;
    type MotorOn = ActiveLowInput;
    type WriteGateRequest = ActiveLowInput;
    type Clock = SysClock;
    type Storage = BoardStorage<SPI, CS, DELAY>;

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
        self.settings.read()
    }
}
