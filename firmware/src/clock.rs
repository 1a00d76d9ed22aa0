//! Millisecond clock driven by the SysTick exception.
//!
//! The original flux-tracer firmware already reconfigures `cp.SYST` in
//! `main.rs` and polls `FloppyControl::run()` from the `SysTick` handler in
//! `interrupts.rs` once a millisecond. This reuses that same reload value
//! and exception, adding only the free-running counter
//! `fdskey_core::host::Clock` needs — the polling call itself moves to
//! [`crate::interrupts`].

use core::sync::atomic::{AtomicU32, Ordering};

use fdskey_core::host::Clock;

/// Milliseconds elapsed since boot. Wraps after ~49 days, which is several
/// orders of magnitude past this crate's longest scheduled interval
/// (`AUTOSAVE_DELAY_MS`).
static MILLIS: AtomicU32 = AtomicU32::new(0);

/// Called once per SysTick exception.
pub fn tick() {
    MILLIS.fetch_add(1, Ordering::Relaxed);
}

/// Zero-sized handle onto the free-running millisecond counter.
#[derive(Clone, Copy)]
pub struct SysClock;

impl Clock for SysClock {
    fn now_ms(&self) -> u32 {
        MILLIS.load(Ordering::Relaxed)
    }
}
