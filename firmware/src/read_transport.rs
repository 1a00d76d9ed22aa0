//! READ_DATA pulse generation: TIM4 PWM + DMA1 stream 6, double buffered.
//!
//! Grounded on `flux_writer.rs`'s `FluxWriter`: same timer/DMA pairing
//! (TIM4 channel 3 in PWM mode, DMA1 stream 6 triggered on update), the same
//! current/back buffer swap on transfer-complete, the same half-bit PWM
//! pulse trick (`force_inactive` between edges). `FluxWriter` keeps two
//! independent `BUFFER_SIZE` buffers and a software FIFO feeding them; this
//! transport keeps one `READ_BUFFER_SLOTS`-sized array and points DMA's
//! `M0AR`/`M1AR` at its two halves, so each transfer-complete IRQ maps onto
//! exactly one of [`fdskey_core::Emulator::on_read_half_complete`] /
//! `on_read_full_complete`.

use cortex_m::interrupt::{CriticalSection, Mutex};
use stm32f4xx_hal::pac::{DMA1, TIM4};

use fdskey_core::READ_BUFFER_SLOTS;

const HALF: usize = READ_BUFFER_SLOTS / 2;

/// Drives the READ_DATA line with the half-bit cell pattern the core's read
/// engine computes.
pub struct ReadTransport {
    tim4: TIM4,
    dma1: &'static Mutex<DMA1>,
    buffer: &'static mut [u16; READ_BUFFER_SLOTS],
}

impl ReadTransport {
    /// Constructs with injected TIM4/DMA1 ownership. `dma1` is shared with
    /// [`crate::write_transport::WriteTransport`] behind the same
    /// interrupt-gated `Mutex`, matching the `Arc<Mutex<DMA1>>` split
    /// between `FluxReader` and `FluxWriter`.
    #[must_use]
    pub fn new(tim4: TIM4, dma1: &'static Mutex<DMA1>) -> Self {
        const ACTIVE_PULSE_LEN: u16 = 40;

        tim4.cr1.modify(|_, w| w.dir().down());
        tim4.ccr3().write(|w| w.ccr().bits(ACTIVE_PULSE_LEN));
        tim4.ccmr2_output().modify(|_, w| w.oc3m().force_inactive());
        tim4.ccer.write(|w| w.cc3e().set_bit().cc3p().set_bit());
        tim4.cr2.write(|w| w.ccds().on_update());

        let buffer: &'static mut [u16; READ_BUFFER_SLOTS] =
            cortex_m::singleton!(: [u16; READ_BUFFER_SLOTS] = [0; READ_BUFFER_SLOTS]).unwrap();

        Self { tim4, dma1, buffer }
    }

    #[must_use]
    pub fn streaming(&self) -> bool {
        self.tim4.cr1.read().cen().is_enabled()
    }

    /// Computes both halves of the buffer from the emulator and arms
    /// TIM4/DMA1. Call once before [`Self::start`].
    pub fn prepare<H: fdskey_core::host::HostInterface>(
        &mut self,
        cs: &CriticalSection,
        emulator: &mut fdskey_core::Emulator<H>,
    ) {
        let dma_stream = &self.dma1.borrow(cs).st[6];
        assert!(!dma_stream.cr.read().en().is_enabled());
        assert!(!self.tim4.cr1.read().cen().is_enabled());

        emulator.on_read_half_complete(self.buffer);
        emulator.on_read_full_complete(self.buffer);

        #[rustfmt::skip]
        dma_stream.cr.write(|w| {
            w.chsel().bits(2)
                .msize().bits16()
                .psize().bits16()
                .minc().incremented()
                .dir().memory_to_peripheral()
                .tcie().enabled()
                .teie().enabled()
                .dmeie().enabled()
                .dbm().enabled()
                .pfctrl().dma()
        });
        dma_stream.ndtr.write(|w| w.ndt().bits(HALF as u16));
        unsafe {
            dma_stream.m0ar.write(|w| w.m0a().bits(self.buffer[..HALF].as_ptr() as u32));
            dma_stream.m1ar.write(|w| w.m1a().bits(self.buffer[HALF..].as_ptr() as u32));
            dma_stream.par.write(|w| w.pa().bits(self.tim4.arr.as_ptr() as u32));
        }

        self.tim4.dier.write(|w| w.ude().enabled());
        self.tim4.ccmr2_output().modify(|_, w| w.oc3m().pwm_mode1());
        self.tim4.sr.write(|w| w.uif().clear());
        self.tim4.cnt.write(|w| w.cnt().bits(400));
        self.tim4.arr.write(|w| w.arr().bits(400));
    }

    /// Starts streaming the prefilled buffer onto READ_DATA.
    pub fn start(&mut self, cs: &CriticalSection) {
        let dma_stream = &self.dma1.borrow(cs).st[6];
        dma_stream.cr.modify(|_, w| w.en().enabled());
        self.tim4.cr1.modify(|_, w| w.cen().set_bit());
    }

    /// Stops streaming immediately, e.g. when the FSM leaves a reading state.
    pub fn stop(&mut self, cs: &CriticalSection) {
        let dma_stream = &self.dma1.borrow(cs).st[6];
        dma_stream.cr.modify(|_, w| w.en().disabled());
        self.tim4.cr1.modify(|_, w| w.cen().clear_bit());
    }

    /// DMA1 stream 6 transfer-complete IRQ. Refills the half the DMA unit
    /// just vacated and reports it to the emulator. `ct` is the stream's
    /// "current target" bit read by the caller right after the TC flag was
    /// seen: `false` means M0AR (the buffer's first half) just finished.
    pub fn dma1_stream6_irq<H: fdskey_core::host::HostInterface>(
        &mut self,
        cs: &CriticalSection,
        emulator: &mut fdskey_core::Emulator<H>,
    ) {
        let stream = &self.dma1.borrow(cs).st[6];
        if self.dma1.borrow(cs).hisr.read().tcif6().is_complete() {
            let ct = stream.cr.read().ct().bit_is_set();
            self.dma1.borrow(cs).hifcr.write(|w| w.ctcif6().clear());

            if ct {
                // DMA just switched onto M1AR; M0AR (first half) is free.
                emulator.on_read_half_complete(self.buffer);
            } else {
                emulator.on_read_full_complete(self.buffer);
            }
        }
        assert!(!self.dma1.borrow(cs).hisr.read().teif6().is_error(), "DMA Error");
    }
}
