//! Drive controller state machine.

/// The nine states the drive controller can be in. Transitions are driven
/// by [`crate::Emulator::check_pins`] and the DMA-callback entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    /// Motor off, drive deselected. No transport activity.
    Off,
    /// Motor on, drive selected, neither reading nor writing.
    Idle,
    /// A dirty image is waiting for the autosave idle timer to elapse.
    SavePending,
    /// Rewinding; the NOT_READY dwell timer has been armed but has not
    /// elapsed yet.
    ReadWaitReadyTimer,
    /// Rewinding; the dwell timer has elapsed but the host has not yet
    /// dropped MOTOR_ON/WRITE_GATE_REQUEST long enough to be treated as
    /// read-ready. This double dwell is preserved deliberately, not
    /// collapsed into one wait.
    ReadWaitReady,
    /// Streaming PWM read-data pulses to the host.
    Reading,
    /// Discarding the write-enable ramp-up pulses before the gap terminator.
    WritingGap,
    /// Demodulating and appending captured pulses to the image.
    Writing,
    /// WRITE_GATE_REQUEST has been released; draining trailing short pulses
    /// to detect an unlicensed back-to-back next block. This state never
    /// transitions out on its own if the motor is cut mid-drain; that is
    /// preserved deliberately rather than patched over.
    WritingStopping,
}

impl DriveState {
    /// `true` for any state in which [`crate::read_engine::ReadEngine`] is
    /// the active producer of PWM slots.
    #[must_use]
    pub fn is_reading(self) -> bool {
        matches!(self, Self::Reading)
    }

    /// `true` for any state in which the write-capture DMA stream is the
    /// active consumer.
    #[must_use]
    pub fn is_writing(self) -> bool {
        matches!(self, Self::WritingGap | Self::Writing | Self::WritingStopping)
    }
}

#[cfg(test)]
mod tests {
    use super::DriveState;

    #[test]
    fn writing_family_flags() {
        assert!(DriveState::WritingGap.is_writing());
        assert!(DriveState::Writing.is_writing());
        assert!(DriveState::WritingStopping.is_writing());
        assert!(!DriveState::Reading.is_writing());
        assert!(!DriveState::Idle.is_writing());
    }

    #[test]
    fn reading_flag_only_for_reading() {
        assert!(DriveState::Reading.is_reading());
        assert!(!DriveState::ReadWaitReady.is_reading());
    }
}
