#![no_std]
#![no_main]
#![feature(default_alloc_error_handler)]

pub mod clock;
pub mod custom_panic;
pub mod drive_lines;
pub mod host;
pub mod interrupts;
pub mod read_transport;
pub mod settings;
pub mod storage;
pub mod write_transport;

extern crate alloc;

use alloc::boxed::Box;
use core::cell::RefCell;
use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use drive_lines::{ActiveLowInput, ActiveLowOutput};
use rtt_target::{rprintln, rtt_init_print};
use settings::JumperSettings;
use stm32f4xx_hal::gpio::{Alternate, Edge, PushPull};
use stm32f4xx_hal::pac::Interrupt;
use stm32f4xx_hal::{pac, prelude::*};
use storage::SdStorage;

use alloc_cortex_m::CortexMHeap;

#[global_allocator]
static ALLOCATOR: CortexMHeap = CortexMHeap::empty();

/// The SD card and its SPI peripheral, pinned down to the concrete types
/// this board wires up, so every other module can name one
/// [`fdskey_core::Emulator`] type instead of carrying its own generics.
type Spi1 = stm32f4xx_hal::spi::Spi<
    pac::SPI1,
    (
        stm32f4xx_hal::gpio::Pin<'A', 5, Alternate<5>>,
        stm32f4xx_hal::gpio::Pin<'A', 6, Alternate<5>>,
        stm32f4xx_hal::gpio::Pin<'A', 7, Alternate<5>>,
    ),
>;
type SdCs = stm32f4xx_hal::gpio::Pin<'A', 4, stm32f4xx_hal::gpio::Output<PushPull>>;
type SdDelay = stm32f4xx_hal::timer::DelayUs<pac::TIM5>;
type SdCard = embedded_sdmmc::SdCard<Spi1, SdCs, SdDelay>;

pub type ConcreteHost = host::StmHost<Spi1, SdCs, SdDelay>;
pub type ConcreteEmulator = fdskey_core::Emulator<ConcreteHost>;

static DEBUG_LED_GREEN: Mutex<RefCell<Option<stm32f4xx_hal::gpio::Pin<'D', 15, stm32f4xx_hal::gpio::Output<PushPull>>>>> =
    Mutex::new(RefCell::new(None));

#[entry]
fn main() -> ! {
    {
        use core::mem::MaybeUninit;
        const HEAP_SIZE: usize = 13509 * 7;
        static mut HEAP: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
        unsafe { ALLOCATOR.init(HEAP.as_ptr() as usize, HEAP_SIZE) }
    }

    rtt_init_print!();

    let mut dp = pac::Peripherals::take().unwrap();
    let mut cp = cortex_m::Peripherals::take().unwrap();

    cp.DWT.enable_cycle_counter();
    dp.RCC.apb1enr.modify(|_, w| w.tim2en().set_bit());
    dp.RCC.apb1enr.modify(|_, w| w.tim4en().set_bit());
    dp.RCC.apb1enr.modify(|_, w| w.tim5en().set_bit());
    dp.RCC.ahb1enr.modify(|_, w| w.dma1en().set_bit());

    let rcc = dp.RCC.constrain();
    let clocks = rcc.cfgr.sysclk(168.MHz()).freeze();

    let gpioa = dp.GPIOA.split();
    let gpiob = dp.GPIOB.split();
    let gpioc = dp.GPIOC.split();
    let gpiod = dp.GPIOD.split();

    let debug_led_green = gpiod.pd15.into_push_pull_output();

    // floppy bus signals, in the order they appear on the connector
    let _out_read_data: stm32f4xx_hal::gpio::Pin<'B', 8, Alternate<2, PushPull>> =
        gpiob.pb8.into_alternate(); // READ_DATA pulse train, TIM4_CH3, AF2
    let _in_write_data: stm32f4xx_hal::gpio::Pin<'A', 2, Alternate<1>> =
        gpioa.pa2.into_alternate(); // WRITE_DATA capture, TIM2_CH3, AF1

    let mut in_motor_on = gpioc.pc4.into_pull_up_input();
    let mut in_write_gate_request = gpioc.pc5.into_pull_up_input();
    let out_ready = gpiod
        .pd12
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);
    let out_media_set = gpiod
        .pd13
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);
    let out_writable_media = gpiod
        .pd14
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);
    // Gates the READ_DATA line's output buffer; only driven while the read
    // transport is actually streaming pulses (see
    // `interrupts::sync_transports`), so a board that panics or has nothing
    // to read never toggles READ_DATA on its own.
    let out_read_data_enable = gpiob
        .pb9
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);

    let turbo_jumper = gpioc.pc6.into_pull_up_input();
    let rewrite_backup_jumper = gpioc.pc7.into_pull_up_input();

    // SD card over SPI1
    let sck = gpioa.pa5.into_alternate();
    let miso = gpioa.pa6.into_alternate();
    let mosi = gpioa.pa7.into_alternate();
    let cs = gpioa
        .pa4
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);

    let spi = dp.SPI1.spi((sck, miso, mosi), embedded_hal::spi::MODE_0, 400.kHz(), &clocks);
    let delay = dp.TIM5.delay_us(&clocks);
    let card = SdCard::new(spi, cs, delay);
    let storage = SdStorage::mount(card).unwrap_or_else(|e| {
        rprintln!("SD card mount failed: {:?}", e);
        panic!("no usable SD card");
    });

    let stm_host = ConcreteHost::new(
        ActiveLowOutput::new(Box::new(out_ready)),
        ActiveLowOutput::new(Box::new(out_media_set)),
        ActiveLowOutput::new(Box::new(out_writable_media)),
        ActiveLowOutput::new(Box::new(out_read_data_enable)),
        ActiveLowInput::new(Box::new(in_motor_on)),
        ActiveLowInput::new(Box::new(in_write_gate_request)),
        storage,
        JumperSettings::new(Box::new(turbo_jumper), Box::new(rewrite_backup_jumper)),
    );

    let emulator = fdskey_core::Emulator::new(stm_host);

    let dma1: &'static Mutex<pac::DMA1> =
        cortex_m::singleton!(: Mutex<pac::DMA1> = Mutex::new(dp.DMA1)).unwrap();

    let read_transport = read_transport::ReadTransport::new(dp.TIM4, dma1);
    let write_transport = write_transport::WriteTransport::new(dp.TIM2, dma1);

    let mut syscfg = dp.SYSCFG.constrain();
    in_motor_on.make_interrupt_source(&mut syscfg);
    in_motor_on.enable_interrupt(&mut dp.EXTI);
    in_motor_on.trigger_on_edge(&mut dp.EXTI, Edge::RisingFalling);

    in_write_gate_request.make_interrupt_source(&mut syscfg);
    in_write_gate_request.enable_interrupt(&mut dp.EXTI);
    in_write_gate_request.trigger_on_edge(&mut dp.EXTI, Edge::RisingFalling);

    let motor_on_int = in_motor_on.interrupt();
    let write_gate_int = in_write_gate_request.interrupt();

    cortex_m::interrupt::free(|cs| {
        DEBUG_LED_GREEN.borrow(cs).borrow_mut().replace(debug_led_green);
        *interrupts::EMULATOR.borrow(cs).borrow_mut() = Some(emulator);
        *interrupts::TRANSPORTS.borrow(cs).borrow_mut() = Some(interrupts::Transports {
            read: read_transport,
            write: write_transport,
        });
        *interrupts::MOTOR_ON_EXTI.borrow(cs).borrow_mut() = Some(in_motor_on);
        *interrupts::WRITE_GATE_EXTI.borrow(cs).borrow_mut() = Some(in_write_gate_request);
    });

    let mut syst = cp.SYST;
    syst.set_reload(clocks.sysclk().raw() / 1000 - 1); // 1ms tick
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    unsafe {
        cortex_m::peripheral::NVIC::unmask(Interrupt::DMA1_STREAM6); // read-data streaming
        cortex_m::peripheral::NVIC::unmask(Interrupt::DMA1_STREAM1); // write-data capture
        cortex_m::peripheral::NVIC::unmask(motor_on_int);
        cortex_m::peripheral::NVIC::unmask(write_gate_int);
    }

    rprintln!("fdskey firmware ready.");

    mainloop();
}

/// Autosave is the only thing this crate needs a busy mainloop for: nothing
/// else requires polling beyond the periodic `check_pins` already ticking
/// in the `SysTick` handler. Everything time-critical runs in the IRQ
/// handlers in `interrupts.rs`.
///
/// Only fires `save()` once `check_pins` has already settled the drive into
/// `SavePending` — `meta.changed` alone can be true mid-read or mid-write,
/// and calling into blocking SD I/O from here while a transport is streaming
/// would stall the read/write DMA and the millisecond tick for as long as
/// the card write takes.
fn mainloop() -> ! {
    loop {
        cortex_m::interrupt::free(|cs| {
            if let Some(emulator) = interrupts::EMULATOR.borrow(cs).borrow_mut().as_mut() {
                if emulator.get_state() == fdskey_core::DriveState::SavePending {
                    if let Err(e) = emulator.save() {
                        rprintln!("autosave failed: {:?}", e);
                    }
                }
            }
        });
        cortex_m::asm::delay(168_000_000 / 10); // ~100ms at 168MHz
    }
}
