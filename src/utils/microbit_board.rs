use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use microbit::{
    hal::{
        gpio::{Floating, Input, Output, Pin, PushPull, p0::P0_04},
        saadc::Saadc,
        spim::{self, Spim},
    },
    pac::SPIM0,
};
use stimlink::{
    drivers::mcp4000::Mcp4000,
    hal::{BatteryGauge, GpioBoard},
};

/// types
pub type OutPin = Pin<Output<PushPull>>;
pub type BatteryPinType = P0_04<Input<Floating>>; //e02
pub type GainPot = Mcp4000<ExclusiveDevice<Spim<SPIM0>, OutPin, NoDelay>>;
pub type StimBoard = GpioBoard<OutPin, GainPot, SaadcBattery>;

const MAX_ADC_VALUE: i16 = (1_i16 << 14) - 1_i16;

/// Battery level from a divided-down battery voltage on edge pin 2, full scale = 100 %.
pub struct SaadcBattery {
    adc: Saadc,
    pin: BatteryPinType,
}

impl SaadcBattery {
    pub fn new(adc: Saadc, pin: BatteryPinType) -> Self {
        SaadcBattery { adc, pin }
    }
}

impl BatteryGauge for SaadcBattery {
    fn read_percent(&mut self) -> u8 {
        match self.adc.read_channel(&mut self.pin) {
            Ok(raw) => (raw.clamp(0, MAX_ADC_VALUE) as u32 * 100 / MAX_ADC_VALUE as u32) as u8,
            Err(_) => {
                log::warn!("battery read failed");
                0
            }
        }
    }
}

/// Bring up the gain digipot on SPIM0. SCK/MOSI are the edge connector SPI pins.
pub fn gain_pot(spim: SPIM0, sck: OutPin, mosi: OutPin, cs: OutPin) -> Option<GainPot> {
    let pins = spim::Pins {
        sck: Some(sck),
        mosi: Some(mosi),
        miso: None,
    };
    // MCP4xxx tops out at 10 MHz; the board traces were sized for ~500 kHz
    let bus = Spim::new(spim, pins, spim::Frequency::K500, spim::MODE_0, 0);
    let device = ExclusiveDevice::new_no_delay(bus, cs).ok()?;
    match Mcp4000::new(device) {
        Ok(pot) => Some(pot),
        Err(e) => {
            log::error!("digipot init failed: {:?}", e);
            None
        }
    }
}
