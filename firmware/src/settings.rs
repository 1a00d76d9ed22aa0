//! Reads the two jumper pins this board exposes into a
//! [`fdskey_core::host::Settings`] value.
//!
//! Grounded on `floppy_control.rs`'s `write_protection_is_active`/
//! `select_density`: a plain GPIO level read on every call rather than a
//! value cached at boot, so a jumper change takes effect on the next
//! `settings()` call without a reset — exactly the "re-read on demand"
//! contract `Settings`'s doc comment asks hosts to honor.

use core::convert::Infallible;

use alloc::boxed::Box;
use fdskey_core::host::{BackupStrategy, RewindSpeed, Settings};
use stm32f4xx_hal::hal::digital::v2::InputPin;
use unwrap_infallible::UnwrapInfallible;

/// Jumper-driven settings source. Both jumpers are active-low (shorted to
/// ground selects the non-default behavior), matching the rest of the
/// board's pull-up input convention.
pub struct JumperSettings {
    turbo_jumper: Box<dyn InputPin<Error = Infallible> + Send>,
    rewrite_backup_jumper: Box<dyn InputPin<Error = Infallible> + Send>,
}

impl JumperSettings {
    #[must_use]
    pub fn new(
        turbo_jumper: Box<dyn InputPin<Error = Infallible> + Send>,
        rewrite_backup_jumper: Box<dyn InputPin<Error = Infallible> + Send>,
    ) -> Self {
        Self {
            turbo_jumper,
            rewrite_backup_jumper,
        }
    }

    #[must_use]
    pub fn read(&self) -> Settings {
        Settings {
            rewind_speed: if self.turbo_jumper.is_low().unwrap_infallible() {
                RewindSpeed::Turbo
            } else {
                RewindSpeed::Original
            },
            backup_strategy: if self.rewrite_backup_jumper.is_low().unwrap_infallible() {
                BackupStrategy::RewriteBackup
            } else {
                BackupStrategy::InPlace
            },
        }
    }
}
