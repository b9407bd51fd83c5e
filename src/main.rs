#![no_std]
#![no_main]

mod utils;

use panic_rtt_target as _;
use rtt_target::rtt_init_print;
use cortex_m_rt::entry;
use microbit::{
    board::Board,
    hal::{
        Timer,
        gpio::Level,
        gpiote::Gpiote,
        saadc::{self, Saadc, SaadcConfig},
        uarte::{Baudrate, Parity, Uarte},
    },
    pac::{Interrupt, NVIC, TIMER0, TIMER1, interrupt},
};

use critical_section_lock_mut::LockMut;
use stimlink::{
    config::DeviceConfig,
    device::Device,
    events::GattEvent,
    hal::{BoardPins, GpioBoard},
    link::{encode_notification, encode_response},
    params::StimulationParameters,
    prng::PseudoRandomSource,
    shared::SharedDevice,
};

use crate::utils::microbit_board::{self, SaadcBattery, StimBoard};
use crate::utils::uart_bridge::UartBridge;

/// globals
const DEBOUNCE_TIME: u32 = 100 * 1_000_000 / 1000; // 100ms at 1MHz count rate.
const TICK_CYCLES: u32 = DeviceConfig::DEFAULT.tick_us; // 1MHz count rate, one cycle per us

static GPIOTE_PERIPHERAL: LockMut<Gpiote> = LockMut::new();
static DEBOUNCE_TIMER: LockMut<Timer<TIMER0>> = LockMut::new();
static TICK_TIMER: LockMut<Timer<TIMER1>> = LockMut::new();
static DEVICE: SharedDevice<StimBoard> = SharedDevice::new();

/// Stimulus tick
#[interrupt]
fn TIMER1() {
    TICK_TIMER.with_lock(|tick_timer| {
        tick_timer.start(TICK_CYCLES);
    });
    DEVICE.tick();
}

/// Button A: wake from sleep
#[interrupt]
fn GPIOTE() {
    let mut debounced = false;
    DEBOUNCE_TIMER.with_lock(|debounce_timer| {
        if debounce_timer.read() == 0 {
            debounced = true;
            debounce_timer.start(DEBOUNCE_TIME);
        }
    });

    GPIOTE_PERIPHERAL.with_lock(|gpiote| {
        if gpiote.channel0().is_event_triggered() {
            gpiote.channel0().reset_events();
            if debounced {
                DEVICE.handle(GattEvent::Wake);
            }
        }
    });
}

/// Stop the tick while asleep; nothing runs until the wake button.
fn stop_tick() {
    NVIC::mask(Interrupt::TIMER1);
    NVIC::unpend(Interrupt::TIMER1);
}

fn start_tick() {
    TICK_TIMER.with_lock(|tick_timer| {
        tick_timer.start(TICK_CYCLES);
    });
    unsafe {
        NVIC::unmask(Interrupt::TIMER1);
    }
}

#[entry]
fn main() -> ! {
    rtt_init_print!();
    utils::rtt_logger::init(log::LevelFilter::Info);

    let board = Board::take().unwrap();

    // stimulation outputs and indicator LEDs, all low
    let pins = BoardPins {
        stim_left: board.edge.e00.into_push_pull_output(Level::Low).degrade(),
        stim_right: board.edge.e01.into_push_pull_output(Level::Low).degrade(),
        led_left: board.edge.e08.into_push_pull_output(Level::Low).degrade(),
        led_right: board.edge.e09.into_push_pull_output(Level::Low).degrade(),
        led_connection: board.edge.e16.into_push_pull_output(Level::Low).degrade(),
    };

    // gain digipot on the edge SPI pins, CS idles high
    let sck = board.pins.p0_17.into_push_pull_output(Level::Low).degrade();
    let mosi = board.pins.p0_13.into_push_pull_output(Level::Low).degrade();
    let cs = board.edge.e12.into_push_pull_output(Level::High).degrade();
    let gain = microbit_board::gain_pot(board.SPIM0, sck, mosi, cs).unwrap();

    // battery sense on e02
    let adc_config = SaadcConfig {
        time: saadc::Time::_40US,
        ..Default::default()
    };
    let adc = Saadc::new(board.ADC, adc_config);
    let battery = SaadcBattery::new(adc, board.edge.e02.into_floating_input());

    // seed the pattern generator from a free-running timer
    let mut seed_timer = Timer::new(board.TIMER3);
    seed_timer.start(u32::MAX);
    let seed = seed_timer.read() ^ board.FICR.deviceid[0].read().bits();
    let rng = PseudoRandomSource::from_counter(seed);

    let device = Device::new(
        GpioBoard::new(pins, gain, battery),
        DeviceConfig::DEFAULT,
        StimulationParameters::FACTORY,
        rng,
    );
    DEVICE.init(device);

    // GATT bridge on the USB serial port
    let uarte = Uarte::new(
        board.UARTE0,
        board.uart.into(),
        Parity::EXCLUDED,
        Baudrate::BAUD115200,
    );
    let mut bridge = UartBridge::new(uarte, Timer::new(board.TIMER2));

    // setup wake button interupt
    let a_btn = board.buttons.button_a.into_floating_input().degrade();
    let gpiote = Gpiote::new(board.GPIOTE);
    let channel0 = gpiote.channel0(); //a_btn
    channel0.input_pin(&a_btn).hi_to_lo().enable_interrupt();
    channel0.reset_events();
    GPIOTE_PERIPHERAL.init(gpiote);

    let mut debounce_timer = Timer::new(board.TIMER0);
    debounce_timer.reset_event();
    DEBOUNCE_TIMER.init(debounce_timer);

    let mut tick_timer = Timer::new(board.TIMER1);
    tick_timer.enable_interrupt();
    tick_timer.reset_event();
    TICK_TIMER.init(tick_timer);

    unsafe {
        NVIC::unmask(Interrupt::GPIOTE);
    };
    NVIC::unpend(Interrupt::GPIOTE);
    NVIC::unpend(Interrupt::TIMER1);
    start_tick();

    log::info!("stimlink ready");

    let mut ticking = true;
    loop {
        DEVICE.service();
        while let Some(notification) = DEVICE.next_notification() {
            bridge.send(&encode_notification(notification));
        }

        if DEVICE.is_sleeping() {
            if ticking {
                stop_tick();
                ticking = false;
            }
            cortex_m::asm::wfi();
            continue;
        }
        if !ticking {
            start_tick();
            ticking = true;
        }

        if let Some(request) = bridge.poll() {
            if let Some(response) = DEVICE.handle(request.event()) {
                bridge.send(&encode_response(request.op(), response));
            }
        }
    }
}
