//! GPIO wrappers binding `fdskey_core::host::{OutputLine, InputLine}` to real pins.
//!
//! Kept deliberately thin: the core never needs to know which port/pin or
//! even which polarity a signal is wired to, only whether it is asserted.
//! `Box<dyn ... + Send>` injection mirrors `floppy_control.rs`/
//! `floppy_drive_unit.rs`'s constructor-injected GPIO style, so the same
//! `main.rs` split-and-pass-down wiring survives the transform.

use core::convert::Infallible;

use alloc::boxed::Box;
use fdskey_core::host::{InputLine, OutputLine};
use stm32f4xx_hal::hal::digital::v2::{InputPin, OutputPin};
use unwrap_infallible::UnwrapInfallible;

/// An output line driven active-low at the pin (the floppy bus convention:
/// asserted == pulled to ground).
pub struct ActiveLowOutput {
    pin: Box<dyn OutputPin<Error = Infallible> + Send>,
}

impl ActiveLowOutput {
    #[must_use]
    pub fn new(pin: Box<dyn OutputPin<Error = Infallible> + Send>) -> Self {
        Self { pin }
    }
}

impl OutputLine for ActiveLowOutput {
    fn assert(&mut self) {
        self.pin.set_low().unwrap_infallible();
    }
    fn deassert(&mut self) {
        self.pin.set_high().unwrap_infallible();
    }
}

/// An input line sampled active-low at the pin.
pub struct ActiveLowInput {
    pin: Box<dyn InputPin<Error = Infallible> + Send>,
}

impl ActiveLowInput {
    #[must_use]
    pub fn new(pin: Box<dyn InputPin<Error = Infallible> + Send>) -> Self {
        Self { pin }
    }
}

impl InputLine for ActiveLowInput {
    fn is_asserted(&self) -> bool {
        self.pin.is_low().unwrap_infallible()
    }
}
