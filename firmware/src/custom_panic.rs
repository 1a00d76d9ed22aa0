use core::panic::PanicInfo;
use cortex_m::iprintln;
use cortex_m::peripheral::ITM;
use stm32f4xx_hal::{pac, prelude::*};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    cortex_m::interrupt::disable();

    let dp = unsafe { pac::Peripherals::steal() };

    let gpiod = dp.GPIOD.split();

    // Force every output line the bus sees from us back to deasserted
    // (active-low, so physically driven high) so a panicked board looks
    // like "no disk inserted" to the console rather than a stuck READY or
    // WRITABLE_MEDIA that could make the NES think a write landed.
    gpiod
        .pd12
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);
    gpiod
        .pd13
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);
    gpiod
        .pd14
        .into_push_pull_output_in_state(stm32f4xx_hal::gpio::PinState::High);

    let itm = unsafe { &mut *ITM::PTR };
    let stim = &mut itm.stim[0];

    iprintln!(stim, "{}", info);

    loop {
        // add some side effect to prevent this from turning into a UDF instruction
        // see rust-lang/rust#28728 for details
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }
}
