//! connection.rs
//!
//! ConnectionStateMachine: BLE link lifecycle, connection indicator, sleep countdown and
//! battery-check scheduling.
//!
//! ```text
//!   Disconnected --boot--> Advertising --connect--> Connected --disconnect--> Disconnected
//!                             |   ^                                              |
//!                  countdown  |   | wake                                         |
//!                             v   |                                  (readvertise immediately)
//!                           Sleeping
//! ```
//!
//! Aborting a running stimulation on disconnect is the device's job; this module only
//! tracks the link.

use crate::config::{ConnectBurst, ConnectedIndicator, DeviceConfig};
use crate::events::{Notification, Outbox};
use crate::hal::HardwareAbstraction;
use crate::timers::{SoftTimers, TimerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Advertising,
    /// Advertising sub-state: advertising off, peripherals powered down.
    Sleeping,
    Connected,
}

/// Timer work the state machine hands back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// Sample the battery now.
    CheckBattery,
    /// The device just went to sleep.
    Slept,
}

pub struct ConnectionStateMachine {
    state: ConnectionState,
    led_on: bool,
    sleep_timeout_ms: u32,
    battery_check_ms: u32,
    blink_period_ms: u32,
    blink_on_ms: u32,
    connected_indicator: ConnectedIndicator,
    connect_burst: Option<ConnectBurst>,
    /// Flashes still to play while a connect burst runs.
    burst_remaining: Option<u8>,
}

impl ConnectionStateMachine {
    pub fn new(config: &DeviceConfig) -> Self {
        ConnectionStateMachine {
            state: ConnectionState::Disconnected,
            led_on: false,
            sleep_timeout_ms: config.sleep_timeout_ms,
            battery_check_ms: config.battery_check_ms,
            blink_period_ms: config.advertising_blink_period_ms,
            blink_on_ms: config.advertising_blink_on_ms,
            connected_indicator: config.connected_indicator,
            connect_burst: config.connect_burst,
            burst_remaining: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Stimulation is only accepted from a connected central.
    pub fn can_stimulate(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// First transition after reset.
    pub fn boot<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) {
        self.enter_advertising(hw, timers, outbox);
    }

    pub fn on_connected<H: HardwareAbstraction>(&mut self, hw: &mut H, timers: &mut SoftTimers) {
        if self.state == ConnectionState::Connected {
            return;
        }
        if self.state == ConnectionState::Sleeping {
            hw.power_up();
        }
        log::info!("connected");
        self.state = ConnectionState::Connected;
        timers.cancel(TimerEvent::SleepCountdown);
        timers.start(TimerEvent::BatteryCheck, self.battery_check_ms);

        match self.connect_burst {
            Some(burst) if burst.pulses > 0 => {
                self.burst_remaining = Some(burst.pulses - 1);
                self.set_led(hw, true);
                timers.start(TimerEvent::ConnectionBlink, burst.on_ms);
            }
            _ => self.steady_indicator(hw, timers),
        }
    }

    pub fn on_disconnected<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) {
        if self.state != ConnectionState::Connected {
            return;
        }
        log::info!("disconnected");
        self.state = ConnectionState::Disconnected;
        self.burst_remaining = None;
        timers.cancel(TimerEvent::BatteryCheck);
        self.set_led(hw, false);
        self.enter_advertising(hw, timers, outbox);
    }

    /// External wake source. Leaves sleep, or restarts the countdown while advertising.
    pub fn on_wake<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) {
        match self.state {
            ConnectionState::Sleeping => {
                log::info!("wake");
                hw.power_up();
                self.enter_advertising(hw, timers, outbox);
            }
            ConnectionState::Advertising => {
                timers.start(TimerEvent::SleepCountdown, self.sleep_timeout_ms);
            }
            ConnectionState::Disconnected | ConnectionState::Connected => {}
        }
    }

    /// Handle an expired virtual timer.
    pub fn on_timer<H: HardwareAbstraction>(
        &mut self,
        event: TimerEvent,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) -> LinkAction {
        match (event, self.state) {
            (TimerEvent::SleepCountdown, ConnectionState::Advertising) => {
                self.enter_sleep(hw, timers, outbox);
                LinkAction::Slept
            }
            (TimerEvent::ConnectionBlink, ConnectionState::Advertising) => {
                self.blink(hw, timers, self.blink_period_ms, self.blink_on_ms);
                LinkAction::None
            }
            (TimerEvent::ConnectionBlink, ConnectionState::Connected) => {
                if let (Some(remaining), Some(burst)) = (self.burst_remaining, self.connect_burst) {
                    self.burst_step(hw, timers, remaining, burst);
                } else if let ConnectedIndicator::Pulsed { period_ms, on_ms } =
                    self.connected_indicator
                {
                    self.blink(hw, timers, period_ms, on_ms);
                }
                LinkAction::None
            }
            (TimerEvent::BatteryCheck, ConnectionState::Connected) => {
                timers.start(TimerEvent::BatteryCheck, self.battery_check_ms);
                LinkAction::CheckBattery
            }
            // stale expiry from a state we already left
            _ => LinkAction::None,
        }
    }

    fn enter_advertising<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) {
        log::info!("advertising");
        self.state = ConnectionState::Advertising;
        outbox.push(Notification::Advertising(true));
        self.set_led(hw, true);
        timers.start(TimerEvent::ConnectionBlink, self.blink_on_ms);
        timers.start(TimerEvent::SleepCountdown, self.sleep_timeout_ms);
    }

    fn enter_sleep<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        outbox: &mut Outbox,
    ) {
        log::info!("no connection for {} ms, sleeping", self.sleep_timeout_ms);
        self.state = ConnectionState::Sleeping;
        timers.cancel_all();
        self.set_led(hw, false);
        outbox.push(Notification::Advertising(false));
        hw.power_down();
    }

    /// One edge of the connect burst; hands over to the steady indicator after the last
    /// flash.
    fn burst_step<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        remaining: u8,
        burst: ConnectBurst,
    ) {
        if self.led_on {
            self.set_led(hw, false);
            timers.start(
                TimerEvent::ConnectionBlink,
                burst.period_ms.saturating_sub(burst.on_ms),
            );
        } else if remaining > 0 {
            self.burst_remaining = Some(remaining - 1);
            self.set_led(hw, true);
            timers.start(TimerEvent::ConnectionBlink, burst.on_ms);
        } else {
            self.burst_remaining = None;
            self.steady_indicator(hw, timers);
        }
    }

    fn steady_indicator<H: HardwareAbstraction>(&mut self, hw: &mut H, timers: &mut SoftTimers) {
        self.set_led(hw, true);
        match self.connected_indicator {
            ConnectedIndicator::Solid => timers.cancel(TimerEvent::ConnectionBlink),
            ConnectedIndicator::Pulsed { on_ms, .. } => {
                timers.start(TimerEvent::ConnectionBlink, on_ms)
            }
        }
    }

    /// Toggle the indicator and schedule the opposite edge.
    fn blink<H: HardwareAbstraction>(
        &mut self,
        hw: &mut H,
        timers: &mut SoftTimers,
        period_ms: u32,
        on_ms: u32,
    ) {
        let on = !self.led_on;
        self.set_led(hw, on);
        let next_ms = if on { on_ms } else { period_ms.saturating_sub(on_ms) };
        timers.start(TimerEvent::ConnectionBlink, next_ms);
    }

    fn set_led<H: HardwareAbstraction>(&mut self, hw: &mut H, on: bool) {
        self.led_on = on;
        hw.set_connection_led(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::RecordingHardware;

    struct Rig {
        csm: ConnectionStateMachine,
        hw: RecordingHardware,
        timers: SoftTimers,
        outbox: Outbox,
    }

    impl Rig {
        fn new(config: DeviceConfig) -> Self {
            let mut rig = Rig {
                csm: ConnectionStateMachine::new(&config),
                hw: RecordingHardware::default(),
                timers: SoftTimers::new(),
                outbox: Outbox::new(),
            };
            rig.csm.boot(&mut rig.hw, &mut rig.timers, &mut rig.outbox);
            rig
        }

        /// Advance time and run every expired timer, like the main loop does.
        fn run_ms(&mut self, ms: u32) -> LinkAction {
            let mut last = LinkAction::None;
            for _ in 0..ms {
                self.timers.advance(1_000);
                for event in self.timers.take_expired() {
                    let action =
                        self.csm.on_timer(event, &mut self.hw, &mut self.timers, &mut self.outbox);
                    if action != LinkAction::None {
                        last = action;
                    }
                }
            }
            last
        }
    }

    #[test]
    fn test_boot_starts_advertising() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        assert_eq!(rig.csm.state(), ConnectionState::Advertising);
        assert_eq!(rig.outbox.pop(), Some(Notification::Advertising(true)));
        assert!(rig.timers.is_armed(TimerEvent::SleepCountdown));
        assert!(rig.timers.is_armed(TimerEvent::ConnectionBlink));
    }

    #[test]
    fn test_advertising_blinks_slowly() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        let mut on_ms = 0;
        for _ in 0..1_000 {
            rig.run_ms(1);
            if rig.hw.connection_led {
                on_ms += 1;
            }
        }
        assert!((15..=25).contains(&on_ms), "on for {on_ms} ms");
    }

    #[test]
    fn test_sleep_after_idle_timeout() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        assert_eq!(rig.run_ms(29_999), LinkAction::None);
        assert_eq!(rig.run_ms(1), LinkAction::Slept);
        assert_eq!(rig.csm.state(), ConnectionState::Sleeping);
        assert!(rig.hw.powered_down);
        assert!(!rig.hw.connection_led);
        rig.outbox.pop();
        assert_eq!(rig.outbox.pop(), Some(Notification::Advertising(false)));
    }

    #[test]
    fn test_wake_restarts_advertising_and_countdown() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        rig.run_ms(30_000);
        rig.csm.on_wake(&mut rig.hw, &mut rig.timers, &mut rig.outbox);
        assert_eq!(rig.csm.state(), ConnectionState::Advertising);
        assert!(!rig.hw.powered_down);
        assert_eq!(rig.run_ms(29_000), LinkAction::None);

        // a wake while advertising resets the countdown
        rig.csm.on_wake(&mut rig.hw, &mut rig.timers, &mut rig.outbox);
        assert_eq!(rig.run_ms(29_000), LinkAction::None);
        assert_eq!(rig.run_ms(1_000), LinkAction::Slept);
    }

    #[test]
    fn test_connected_cancels_sleep_and_checks_battery() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);
        assert!(rig.csm.can_stimulate());
        assert!(rig.hw.connection_led);
        assert!(!rig.timers.is_armed(TimerEvent::SleepCountdown));

        assert_eq!(rig.run_ms(10_000), LinkAction::CheckBattery);
        assert_eq!(rig.run_ms(60_000), LinkAction::CheckBattery);
        assert_eq!(rig.csm.state(), ConnectionState::Connected);
        assert!(rig.hw.connection_led);
    }

    #[test]
    fn test_pulsed_connected_indicator() {
        let mut config = DeviceConfig::DEFAULT;
        config.connected_indicator = ConnectedIndicator::Pulsed { period_ms: 5, on_ms: 1 };
        let mut rig = Rig::new(config);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);

        let mut on_ms = 0;
        for _ in 0..100 {
            rig.run_ms(1);
            if rig.hw.connection_led {
                on_ms += 1;
            }
        }
        assert_eq!(on_ms, 20);
    }

    #[test]
    fn test_connect_burst_then_solid() {
        let mut config = DeviceConfig::DEFAULT;
        config.connect_burst = Some(ConnectBurst { pulses: 3, period_ms: 200, on_ms: 100 });
        let mut rig = Rig::new(config);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);
        assert!(rig.hw.connection_led);

        let mut rising_at = Vec::new();
        let mut was_on = true;
        for ms in 1..=1_000 {
            rig.run_ms(1);
            if rig.hw.connection_led && !was_on {
                rising_at.push(ms);
            }
            was_on = rig.hw.connection_led;
        }
        // two more flashes, then the solid indicator takes over
        assert_eq!(rising_at, [200, 400, 600]);
        assert!(rig.hw.connection_led);
        assert!(!rig.timers.is_armed(TimerEvent::ConnectionBlink));
    }

    #[test]
    fn test_disconnect_mid_burst_returns_to_advertising_blink() {
        let mut config = DeviceConfig::DEFAULT;
        config.connect_burst = Some(ConnectBurst { pulses: 5, period_ms: 200, on_ms: 100 });
        let mut rig = Rig::new(config);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);
        rig.run_ms(250);
        rig.csm.on_disconnected(&mut rig.hw, &mut rig.timers, &mut rig.outbox);

        let mut on_ms = 0;
        for _ in 0..1_000 {
            rig.run_ms(1);
            if rig.hw.connection_led {
                on_ms += 1;
            }
        }
        assert!((15..=25).contains(&on_ms), "on for {on_ms} ms");
    }

    #[test]
    fn test_disconnect_readvertises() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);
        rig.csm.on_disconnected(&mut rig.hw, &mut rig.timers, &mut rig.outbox);
        assert_eq!(rig.csm.state(), ConnectionState::Advertising);
        assert!(!rig.csm.can_stimulate());
        assert!(!rig.timers.is_armed(TimerEvent::BatteryCheck));
        assert!(rig.timers.is_armed(TimerEvent::SleepCountdown));
    }

    #[test]
    fn test_connection_from_sleep_powers_up() {
        let mut rig = Rig::new(DeviceConfig::DEFAULT);
        rig.run_ms(30_000);
        rig.csm.on_connected(&mut rig.hw, &mut rig.timers);
        assert_eq!(rig.csm.state(), ConnectionState::Connected);
        assert!(!rig.hw.powered_down);
    }
}
