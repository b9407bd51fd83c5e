//! hal.rs
//!
//! The hardware seam. The scheduler and the connection state machine only ever talk to
//! a `HardwareAbstraction`; each board revision supplies one implementation at startup.
//! `GpioBoard` covers every board that exposes its outputs as embedded-hal pins.

use embedded_hal::digital::OutputPin;

/// Stimulation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];
}

pub trait HardwareAbstraction {
    /// Drive a stimulation output.
    fn set_stimulus(&mut self, channel: Channel, high: bool);

    /// Drive a channel's indicator LED.
    fn set_indicator(&mut self, channel: Channel, on: bool);

    /// Drive the connection status LED.
    fn set_connection_led(&mut self, on: bool);

    /// Write an 8-bit code to the gain potentiometer.
    fn set_gain(&mut self, code: u8);

    /// Battery level, 0-100 %.
    fn read_battery_percent(&mut self) -> u8;

    /// Power down the non-essential peripherals (gain pot, outputs) for sleep.
    fn power_down(&mut self);

    /// Undo `power_down`.
    fn power_up(&mut self);

    /// Force every stimulation output and indicator LED low.
    fn all_outputs_low(&mut self) {
        for channel in Channel::BOTH {
            self.set_stimulus(channel, false);
            self.set_indicator(channel, false);
        }
    }
}

/// Gain potentiometer collaborator.
pub trait GainDriver {
    type Error: core::fmt::Debug;

    fn set_code(&mut self, code: u8) -> Result<(), Self::Error>;
    fn shutdown(&mut self) -> Result<(), Self::Error>;
    fn wake(&mut self) -> Result<(), Self::Error>;
}

/// Battery level collaborator.
pub trait BatteryGauge {
    /// Battery level, 0-100 %.
    fn read_percent(&mut self) -> u8;
}

/// A board whose outputs are plain GPIO pins.
pub struct GpioBoard<P, G, B> {
    stim_left: P,
    stim_right: P,
    led_left: P,
    led_right: P,
    led_connection: P,
    gain: G,
    battery: B,
}

/// The five output pins of a `GpioBoard`.
pub struct BoardPins<P> {
    pub stim_left: P,
    pub stim_right: P,
    pub led_left: P,
    pub led_right: P,
    pub led_connection: P,
}

impl<P, G, B> GpioBoard<P, G, B>
where
    P: OutputPin,
    G: GainDriver,
    B: BatteryGauge,
{
    /// Take ownership of the pins and collaborators. All outputs start low.
    pub fn new(pins: BoardPins<P>, gain: G, battery: B) -> Self {
        let mut board = GpioBoard {
            stim_left: pins.stim_left,
            stim_right: pins.stim_right,
            led_left: pins.led_left,
            led_right: pins.led_right,
            led_connection: pins.led_connection,
            gain,
            battery,
        };
        board.all_outputs_low();
        board.set_connection_led(false);
        board
    }

    fn drive(pin: &mut P, high: bool) {
        // the next tick rewrites the level
        let result = if high { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            log::warn!("pin write failed: {:?}", e);
        }
    }
}

impl<P, G, B> HardwareAbstraction for GpioBoard<P, G, B>
where
    P: OutputPin,
    G: GainDriver,
    B: BatteryGauge,
{
    fn set_stimulus(&mut self, channel: Channel, high: bool) {
        match channel {
            Channel::Left => Self::drive(&mut self.stim_left, high),
            Channel::Right => Self::drive(&mut self.stim_right, high),
        }
    }

    fn set_indicator(&mut self, channel: Channel, on: bool) {
        match channel {
            Channel::Left => Self::drive(&mut self.led_left, on),
            Channel::Right => Self::drive(&mut self.led_right, on),
        }
    }

    fn set_connection_led(&mut self, on: bool) {
        Self::drive(&mut self.led_connection, on);
    }

    fn set_gain(&mut self, code: u8) {
        if let Err(e) = self.gain.set_code(code) {
            log::warn!("gain write failed: {:?}", e);
        }
    }

    fn read_battery_percent(&mut self) -> u8 {
        self.battery.read_percent().min(100)
    }

    fn power_down(&mut self) {
        self.all_outputs_low();
        self.set_connection_led(false);
        if let Err(e) = self.gain.shutdown() {
            log::warn!("gain shutdown failed: {:?}", e);
        }
    }

    fn power_up(&mut self) {
        if let Err(e) = self.gain.wake() {
            log::warn!("gain wake failed: {:?}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakePin(Rc<Cell<bool>>);

    impl embedded_hal::digital::ErrorType for FakePin {
        type Error = Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.set(true);
            Ok(())
        }
    }

    /// Pin whose every write fails; counts the attempts.
    #[derive(Clone, Default)]
    struct StuckPin(Rc<Cell<u32>>);

    impl embedded_hal::digital::ErrorType for StuckPin {
        type Error = embedded_hal::digital::ErrorKind;
    }

    impl OutputPin for StuckPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.set(self.0.get() + 1);
            Err(embedded_hal::digital::ErrorKind::Other)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.set(self.0.get() + 1);
            Err(embedded_hal::digital::ErrorKind::Other)
        }
    }

    #[derive(Default)]
    struct FakeGain {
        code: Option<u8>,
        shut_down: bool,
    }

    impl GainDriver for FakeGain {
        type Error = ();

        fn set_code(&mut self, code: u8) -> Result<(), ()> {
            self.code = Some(code);
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), ()> {
            self.shut_down = true;
            Ok(())
        }

        fn wake(&mut self) -> Result<(), ()> {
            self.shut_down = false;
            Ok(())
        }
    }

    struct FixedBattery(u8);

    impl BatteryGauge for FixedBattery {
        fn read_percent(&mut self) -> u8 {
            self.0
        }
    }

    fn pins() -> (BoardPins<FakePin>, [FakePin; 5]) {
        let handles: [FakePin; 5] = Default::default();
        let pins = BoardPins {
            stim_left: handles[0].clone(),
            stim_right: handles[1].clone(),
            led_left: handles[2].clone(),
            led_right: handles[3].clone(),
            led_connection: handles[4].clone(),
        };
        (pins, handles)
    }

    #[test]
    fn test_gpio_board_routes_channels_to_pins() {
        let (pins, handles) = pins();
        let mut board = GpioBoard::new(pins, FakeGain::default(), FixedBattery(80));

        board.set_stimulus(Channel::Right, true);
        board.set_indicator(Channel::Left, true);
        board.set_connection_led(true);
        assert!(!handles[0].0.get());
        assert!(handles[1].0.get());
        assert!(handles[2].0.get());
        assert!(!handles[3].0.get());
        assert!(handles[4].0.get());

        board.all_outputs_low();
        assert!(handles[..4].iter().all(|pin| !pin.0.get()));
    }

    #[test]
    fn test_gpio_board_power_down_disables_gain_and_outputs() {
        let (pins, handles) = pins();
        let mut board = GpioBoard::new(pins, FakeGain::default(), FixedBattery(150));
        board.set_stimulus(Channel::Left, true);
        board.set_gain(200);
        assert_eq!(board.gain.code, Some(200));

        board.power_down();
        assert!(board.gain.shut_down);
        assert!(handles.iter().all(|pin| !pin.0.get()));

        board.power_up();
        assert!(!board.gain.shut_down);
        assert_eq!(board.read_battery_percent(), 100);
    }

    #[test]
    fn test_failed_pin_writes_are_survived() {
        let stuck = StuckPin::default();
        let pins = BoardPins {
            stim_left: stuck.clone(),
            stim_right: stuck.clone(),
            led_left: stuck.clone(),
            led_right: stuck.clone(),
            led_connection: stuck.clone(),
        };
        let mut board = GpioBoard::new(pins, FakeGain::default(), FixedBattery(50));
        let after_boot = stuck.0.get();
        assert_eq!(after_boot, 5);

        // every write is still attempted and the board keeps serving other requests
        board.set_stimulus(Channel::Left, true);
        board.set_indicator(Channel::Right, true);
        board.set_gain(64);
        assert_eq!(stuck.0.get(), after_boot + 2);
        assert_eq!(board.gain.code, Some(64));
        assert_eq!(board.read_battery_percent(), 50);
    }
}
