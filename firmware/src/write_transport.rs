//! WRITE_DATA pulse capture: TIM2 input-capture + DMA1 stream 1, double
//! buffered.
//!
//! Grounded on `flux_reader.rs`'s `FluxReader`: same timer/channel (TIM2
//! channel 3, DMA1 stream 1 on TIM2_CH3), the same current/back buffer swap
//! on transfer-complete. `FluxReader` converts each captured counter value
//! into a pulse-interval delta itself before handing it off; here the raw
//! counter values are forwarded straight to
//! [`fdskey_core::Emulator::on_write_capture`], which owns that conversion
//! via `WriteEngine::pulse_from_timestamp` so the demodulator's running
//! timestamp lives in one place.

use core::mem;

use cortex_m::interrupt::{CriticalSection, Mutex};
use heapless::Vec;
use stm32f4xx_hal::pac::{DMA1, TIM2};

use fdskey_core::WRITE_BUFFER_CAPTURES as BUFFER_SIZE;

/// Captures WRITE_DATA transitions as raw TIM2 counter values.
pub struct WriteTransport {
    tim2: TIM2,
    dma1: &'static Mutex<DMA1>,
    current_buffer: &'static mut Vec<u32, BUFFER_SIZE>,
    back_buffer: &'static mut Vec<u32, BUFFER_SIZE>,
}

impl WriteTransport {
    #[must_use]
    pub fn new(tim2: TIM2, dma1: &'static Mutex<DMA1>) -> Self {
        tim2.cr1.modify(|_, w| w.dir().up());
        tim2.ccmr2_input().write(|w| w.cc3s().ti3());
        tim2.ccer.write(|w| w.cc3e().set_bit());
        tim2.dier.write(|w| w.cc3de().enabled());

        let current_buffer: &'static mut Vec<u32, BUFFER_SIZE> =
            cortex_m::singleton!(: Vec::<u32, BUFFER_SIZE> = Vec::new()).unwrap();
        let back_buffer: &'static mut Vec<u32, BUFFER_SIZE> =
            cortex_m::singleton!(: Vec::<u32, BUFFER_SIZE> = Vec::new()).unwrap();

        Self {
            tim2,
            dma1,
            current_buffer,
            back_buffer,
        }
    }

    #[must_use]
    pub fn capturing(&self) -> bool {
        self.tim2.cr1.read().cen().is_enabled()
    }

    /// Arms TIM2/DMA1 to begin capturing, e.g. on entry into `WRITING_GAP`.
    pub fn start(&mut self, cs: &CriticalSection) {
        let dma_stream = &self.dma1.borrow(cs).st[1];
        assert!(!dma_stream.cr.read().en().is_enabled());
        assert!(!self.tim2.cr1.read().cen().is_enabled());

        self.back_buffer.resize(BUFFER_SIZE, 0).unwrap();
        self.current_buffer.resize(BUFFER_SIZE, 0).unwrap();

        #[rustfmt::skip]
        dma_stream.cr.write(|w| {
            w.chsel().bits(3)
                .msize().bits32()
                .psize().bits32()
                .minc().incremented()
                .dir().peripheral_to_memory()
                .tcie().enabled()
                .teie().enabled()
                .dmeie().enabled()
                .dbm().enabled()
                .pfctrl().dma()
        });
        dma_stream.ndtr.write(|w| w.ndt().bits(BUFFER_SIZE as u16));
        unsafe {
            dma_stream.m0ar.write(|w| w.m0a().bits(self.back_buffer.as_ptr() as u32));
            dma_stream.m1ar.write(|w| w.m1a().bits(self.current_buffer.as_ptr() as u32));
            dma_stream.par.write(|w| w.pa().bits(self.tim2.ccr3.as_ptr() as u32));
        }

        self.tim2.cnt.write(|w| w.cnt().bits(0));
        dma_stream.cr.modify(|_, w| w.en().enabled());
        self.tim2.cr1.modify(|_, w| w.cen().set_bit());
    }

    /// Stops capturing, e.g. when the FSM leaves a writing state.
    pub fn stop(&mut self, cs: &CriticalSection) {
        let dma_stream = &self.dma1.borrow(cs).st[1];
        dma_stream.cr.modify(|_, w| w.en().disabled());
        self.tim2.cr1.modify(|_, w| w.cen().clear_bit());
    }

    /// DMA1 stream 1 transfer-complete IRQ. Forwards every raw counter value
    /// in the half just vacated by the DMA unit to the emulator, in order.
    pub fn dma1_stream1_irq<H: fdskey_core::host::HostInterface>(
        &mut self,
        cs: &CriticalSection,
        emulator: &mut fdskey_core::Emulator<H>,
    ) {
        if self.dma1.borrow(cs).lisr.read().tcif1().is_complete() {
            mem::swap(&mut self.current_buffer, &mut self.back_buffer);
            for &raw in self.current_buffer.iter() {
                emulator.on_write_capture(raw as u16);
            }
            self.dma1.borrow(cs).lifcr.write(|w| w.ctcif1().clear());
        }
        assert!(!self.dma1.borrow(cs).lisr.read().teif1().is_error(), "DMA Error");
    }
}
