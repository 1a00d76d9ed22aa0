//! IRQ handling and the global singletons the emulator and its two DMA
//! transports live in.
//!
//! One `Mutex<RefCell<Option<T>>>` per global, populated once from `main`
//! inside a critical section, and every IRQ handler reborrowing it inside
//! `cortex_m::interrupt::free` — the same shape the original flux-tracer
//! firmware used for `FLOPPY_CONTROL`, `FLUX_READER` and `FLUX_WRITER` as
//! three separate globals driven by three different interrupt sources.
//! Here `EMULATOR` (the hardware-agnostic state machine) stays separate
//! from `TRANSPORTS` (the two DMA engines), so a change to one never needs
//! touching the other's lock.

use core::cell::RefCell;

use cortex_m::interrupt::Mutex;
use cortex_m_rt::exception;
use stm32f4xx_hal::pac::interrupt;
use stm32f4xx_hal::prelude::_stm32f4xx_hal_gpio_ExtiPin;

use fdskey_core::host::HostInterface;
use fdskey_core::DriveState;

use crate::read_transport::ReadTransport;
use crate::write_transport::WriteTransport;
use crate::ConcreteEmulator;

/// The hardware-agnostic drive state machine.
pub static EMULATOR: Mutex<RefCell<Option<ConcreteEmulator>>> = Mutex::new(RefCell::new(None));

/// The two DMA transports, kept started/stopped in lockstep with
/// `EMULATOR`'s [`fdskey_core::DriveState`] by [`sync_transports`].
pub struct Transports {
    pub read: ReadTransport,
    pub write: WriteTransport,
}

pub static TRANSPORTS: Mutex<RefCell<Option<Transports>>> = Mutex::new(RefCell::new(None));

/// GPIO EXTI line watching MOTOR_ON; any edge re-checks the FSM immediately
/// instead of waiting for the next periodic poll.
pub static MOTOR_ON_EXTI: Mutex<RefCell<Option<stm32f4xx_hal::gpio::Pin<'C', 4>>>> =
    Mutex::new(RefCell::new(None));

/// GPIO EXTI line watching WRITE_GATE_REQUEST; same purpose as
/// `MOTOR_ON_EXTI`.
pub static WRITE_GATE_EXTI: Mutex<RefCell<Option<stm32f4xx_hal::gpio::Pin<'C', 5>>>> =
    Mutex::new(RefCell::new(None));

/// Starts or stops the read/write DMA transports to match the drive FSM's
/// current state, idempotently. Called after every operation that can move
/// the FSM: `check_pins`, each DMA IRQ, and `load_side`/`save`/`close`.
fn sync_transports(cs: &cortex_m::interrupt::CriticalSection, emulator: &mut ConcreteEmulator, transports: &mut Transports) {
    let state = emulator.get_state();

    if state.is_writing() {
        if transports.read.streaming() {
            transports.read.stop(cs);
            emulator.host_mut().read_data().deassert();
        }
        if !transports.write.capturing() {
            transports.write.start(cs);
        }
    } else if matches!(state, DriveState::Reading | DriveState::ReadWaitReady) {
        if transports.write.capturing() {
            transports.write.stop(cs);
        }
        if !transports.read.streaming() {
            transports.read.prepare(cs, emulator);
            transports.read.start(cs);
            emulator.host_mut().read_data().assert();
        }
    } else {
        if transports.read.streaming() {
            transports.read.stop(cs);
            emulator.host_mut().read_data().deassert();
        }
        if transports.write.capturing() {
            transports.write.stop(cs);
        }
    }
}

/// Runs `f` with both globals borrowed, then resynchronizes the transports
/// against whatever state `f` left the emulator in. Every IRQ handler below
/// is a thin wrapper around this.
fn with_emulator<R>(f: impl FnOnce(&mut ConcreteEmulator) -> R) -> Option<R> {
    cortex_m::interrupt::free(|cs| {
        let mut emulator_slot = EMULATOR.borrow(cs).borrow_mut();
        let emulator = emulator_slot.as_mut()?;
        let result = f(emulator);

        let mut transports_slot = TRANSPORTS.borrow(cs).borrow_mut();
        if let Some(transports) = transports_slot.as_mut() {
            sync_transports(cs, emulator, transports);
        }
        Some(result)
    })
}

#[exception]
fn SysTick() {
    crate::clock::tick();
    // A 100ms periodic poll lives alongside the 1ms tick rather than its own
    // timer, the same single-SysTick-does-everything style `floppy_control.rs::run`
    // used for its own poll loop.
    static mut TICKS_SINCE_POLL: u32 = 0;
    *TICKS_SINCE_POLL += 1;
    if *TICKS_SINCE_POLL >= 100 {
        *TICKS_SINCE_POLL = 0;
        with_emulator(ConcreteEmulator::check_pins);
    }
}

#[interrupt]
fn EXTI4() {
    with_emulator(ConcreteEmulator::check_pins);
    cortex_m::interrupt::free(|cs| {
        if let Some(pin) = MOTOR_ON_EXTI.borrow(cs).borrow_mut().as_mut() {
            pin.clear_interrupt_pending_bit();
        }
    });
}

#[interrupt]
fn EXTI9_5() {
    with_emulator(ConcreteEmulator::check_pins);
    cortex_m::interrupt::free(|cs| {
        if let Some(pin) = WRITE_GATE_EXTI.borrow(cs).borrow_mut().as_mut() {
            pin.clear_interrupt_pending_bit();
        }
    });
}

#[interrupt]
fn DMA1_STREAM6() {
    cortex_m::interrupt::free(|cs| {
        let mut emulator_slot = EMULATOR.borrow(cs).borrow_mut();
        let Some(emulator) = emulator_slot.as_mut() else {
            return;
        };
        let mut transports_slot = TRANSPORTS.borrow(cs).borrow_mut();
        let Some(transports) = transports_slot.as_mut() else {
            return;
        };
        transports.read.dma1_stream6_irq(cs, emulator);
        sync_transports(cs, emulator, transports);
    });
}

#[interrupt]
fn DMA1_STREAM1() {
    cortex_m::interrupt::free(|cs| {
        let mut emulator_slot = EMULATOR.borrow(cs).borrow_mut();
        let Some(emulator) = emulator_slot.as_mut() else {
            return;
        };
        let mut transports_slot = TRANSPORTS.borrow(cs).borrow_mut();
        let Some(transports) = transports_slot.as_mut() else {
            return;
        };
        transports.write.dma1_stream1_irq(cs, emulator);
        sync_transports(cs, emulator, transports);
    });
}
