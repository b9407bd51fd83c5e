//! device.rs
//!
//! `Device` owns every piece of stimulator state and wires the engines together:
//!
//! - `on_tick` runs from the timer interrupt: one scheduler tick plus the virtual timers.
//! - `service` runs from the main loop: expired timer events (blink, sleep, battery).
//! - `handle` takes one BLE event and returns the answer for the stack.
//!
//! The firmware keeps the whole `Device` behind one lock (see `shared`), so each of these
//! calls sees and leaves a consistent device.

use crate::config::DeviceConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine, LinkAction};
use crate::error::ParamError;
use crate::events::{GattEvent, GattResponse, Notification, Outbox};
use crate::gatt::{CharacteristicDispatcher, GattBackend};
use crate::hal::{Channel, HardwareAbstraction};
use crate::params::{ParamId, ParameterStore, StimulationParameters};
use crate::prng::PseudoRandomSource;
use crate::scheduler::{StartOutcome, StimulationSession, StimulusScheduler};
use crate::timers::SoftTimers;

pub struct Device<H> {
    hw: H,
    config: DeviceConfig,
    store: ParameterStore,
    scheduler: StimulusScheduler,
    link: ConnectionStateMachine,
    timers: SoftTimers,
    outbox: Outbox,
    dispatcher: CharacteristicDispatcher<'static>,
    battery_percent: Option<u8>,
}

impl<H: HardwareAbstraction> Device<H> {
    /// Build the device and start advertising.
    pub fn new(
        mut hw: H,
        config: DeviceConfig,
        params: StimulationParameters,
        rng: PseudoRandomSource,
    ) -> Self {
        let store = ParameterStore::new(params, config.duty_ceiling());
        hw.all_outputs_low();
        hw.set_gain(store.derived().gain_code);

        let mut device = Device {
            hw,
            config,
            store,
            scheduler: StimulusScheduler::new(&config, rng),
            link: ConnectionStateMachine::new(&config),
            timers: SoftTimers::new(),
            outbox: Outbox::new(),
            dispatcher: CharacteristicDispatcher::new(),
            battery_percent: None,
        };
        device
            .link
            .boot(&mut device.hw, &mut device.timers, &mut device.outbox);
        device
    }

    /// Timer interrupt body. Constant time.
    pub fn on_tick(&mut self) {
        if let Some(channel) = self.scheduler.tick(&mut self.hw) {
            self.outbox.push(Notification::SessionFinished(channel));
        }
        self.timers.advance(self.config.tick_us);
    }

    /// Main-loop housekeeping: run the work behind every expired virtual timer.
    pub fn service(&mut self) {
        for event in self.timers.take_expired() {
            let action =
                self.link
                    .on_timer(event, &mut self.hw, &mut self.timers, &mut self.outbox);
            match action {
                LinkAction::CheckBattery => self.check_battery(),
                LinkAction::Slept => self.scheduler.abort(&mut self.hw),
                LinkAction::None => {}
            }
        }
    }

    /// Handle one event from the BLE stack.
    pub fn handle(&mut self, event: GattEvent<'_>) -> GattResponse {
        let dispatcher = self.dispatcher;
        match event {
            GattEvent::Connected => {
                self.link.on_connected(&mut self.hw, &mut self.timers);
                GattResponse::Done
            }
            GattEvent::Disconnected => {
                // outputs go low before the link state changes
                self.scheduler.abort(&mut self.hw);
                self.link
                    .on_disconnected(&mut self.hw, &mut self.timers, &mut self.outbox);
                GattResponse::Done
            }
            GattEvent::Wake => {
                self.link
                    .on_wake(&mut self.hw, &mut self.timers, &mut self.outbox);
                GattResponse::Done
            }
            GattEvent::Write {
                uuid,
                offset,
                value,
                authorized,
            } => dispatcher
                .write(self, uuid, offset, value, authorized)
                .into(),
            GattEvent::Read {
                uuid,
                offset,
                authorized,
            } => match dispatcher.read(self, uuid, offset, authorized) {
                Ok(value) => GattResponse::Value(value),
                Err(e) => GattResponse::Error(e),
            },
        }
    }

    fn check_battery(&mut self) {
        let level = self.hw.read_battery_percent().min(100);
        log::debug!("battery {}%", level);
        self.battery_percent = Some(level);
        self.outbox.push(Notification::BatteryLevel(level));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_sleeping(&self) -> bool {
        self.link.state() == ConnectionState::Sleeping
    }

    pub fn is_stimulating(&self) -> bool {
        self.scheduler.is_active()
    }

    pub fn session(&self) -> Option<&StimulationSession> {
        self.scheduler.session()
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.store
    }

    /// Last sampled battery level, if any sample was taken yet.
    pub fn battery_percent(&self) -> Option<u8> {
        self.battery_percent
    }

    pub fn next_notification(&mut self) -> Option<Notification> {
        self.outbox.pop()
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }
}

impl<H: HardwareAbstraction> GattBackend for Device<H> {
    fn read_parameter(&self, id: ParamId) -> u8 {
        self.store.get_parameter(id)
    }

    fn write_parameter(&mut self, id: ParamId, value: &[u8]) -> Result<(), ParamError> {
        let id = self.store.set_parameter(id as u8, value)?;
        // a running session keeps the gain it started with
        if id == ParamId::Gain && !self.scheduler.is_active() {
            self.hw.set_gain(self.store.derived().gain_code);
        }
        self.outbox.push(Notification::ParameterChanged(id));
        Ok(())
    }

    fn stimulate(&mut self, channel: Channel) {
        if !self.link.can_stimulate() {
            log::warn!("stimulate {:?} ignored: not connected", channel);
            return;
        }
        let snapshot = self.store.snapshot();
        if self.scheduler.start(channel, snapshot, &mut self.hw) == StartOutcome::AlreadyActive {
            log::debug!("stimulate {:?} ignored: session running", channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AttributeUuid;
    use crate::hal::mock::RecordingHardware;

    const FREQUENCY: u16 = 0xB2B1;
    const PULSE_WIDTH: u16 = 0xB2B2;
    const DURATION: u16 = 0xB2B3;
    const GAIN: u16 = 0xB2B7;
    const STIMULATE_LEFT: u16 = 0xB2B5;
    const STIMULATE_RIGHT: u16 = 0xB2B6;

    fn device() -> Device<RecordingHardware> {
        Device::new(
            RecordingHardware::default(),
            DeviceConfig::DEFAULT,
            StimulationParameters::FACTORY,
            PseudoRandomSource::new(7),
        )
    }

    fn write(device: &mut Device<RecordingHardware>, uuid: u16, value: u8) -> GattResponse {
        device.handle(GattEvent::Write {
            uuid: AttributeUuid::Short(uuid),
            offset: 0,
            value: &[value],
            authorized: false,
        })
    }

    fn run_ticks(device: &mut Device<RecordingHardware>, ticks: u32) {
        for _ in 0..ticks {
            device.on_tick();
            device.service();
        }
    }

    #[test]
    fn test_boot_advertises_with_outputs_low() {
        let mut device = device();
        assert_eq!(device.connection_state(), ConnectionState::Advertising);
        assert!(!device.hardware().any_output_high());
        assert_eq!(device.hardware().gain_writes, [128]);
        assert_eq!(device.next_notification(), Some(Notification::Advertising(true)));
    }

    #[test]
    fn test_example_session_end_to_end() {
        let mut device = device();
        device.handle(GattEvent::Connected);
        assert_eq!(write(&mut device, FREQUENCY, 55), GattResponse::Done);
        assert_eq!(write(&mut device, PULSE_WIDTH, 9), GattResponse::Done);
        assert_eq!(write(&mut device, DURATION, 100), GattResponse::Done);
        assert_eq!(write(&mut device, GAIN, 50), GattResponse::Done);
        assert_eq!(write(&mut device, STIMULATE_LEFT, 1), GattResponse::Done);

        let session = *device.session().unwrap();
        assert_eq!(session.channel, Channel::Left);
        assert_eq!(session.current_period_ms, 18);
        assert_eq!(session.duration_ms(), 1818);
        assert_eq!(device.hardware().gain_writes.last(), Some(&128));
        assert!(device.hardware().indicator(Channel::Left));

        // a right trigger mid-session changes nothing
        run_ticks(&mut device, 1_000);
        assert_eq!(write(&mut device, STIMULATE_RIGHT, 1), GattResponse::Done);
        assert_eq!(device.session().unwrap().channel, Channel::Left);
        assert_eq!(device.session().unwrap().elapsed_ms(), 100);

        // 1818 ms at 100 µs per tick
        for _ in 0..17_180 {
            device.on_tick();
            device.service();
            assert!(!device.hardware().stim(Channel::Right));
            assert!(!device.hardware().indicator(Channel::Right));
        }
        assert!(device.is_stimulating());
        run_ticks(&mut device, 1);
        assert!(!device.is_stimulating());
        assert!(!device.hardware().any_output_high());

        let mut finished = false;
        while let Some(n) = device.next_notification() {
            finished |= n == Notification::SessionFinished(Channel::Left);
        }
        assert!(finished);
    }

    #[test]
    fn test_stimulate_requires_connection() {
        let mut device = device();
        assert_eq!(write(&mut device, STIMULATE_LEFT, 1), GattResponse::Done);
        assert!(!device.is_stimulating());
    }

    #[test]
    fn test_second_trigger_is_ignored() {
        let mut device = device();
        device.handle(GattEvent::Connected);
        write(&mut device, STIMULATE_LEFT, 1);
        run_ticks(&mut device, 10);
        write(&mut device, STIMULATE_RIGHT, 1);
        assert_eq!(device.session().unwrap().channel, Channel::Left);
        assert!(!device.hardware().stim(Channel::Right));
    }

    #[test]
    fn test_disconnect_aborts_before_next_tick() {
        let mut device = device();
        device.handle(GattEvent::Connected);
        write(&mut device, STIMULATE_RIGHT, 1);
        run_ticks(&mut device, 5);
        assert!(device.hardware().stim(Channel::Right));

        device.handle(GattEvent::Disconnected);
        assert!(!device.is_stimulating());
        assert!(!device.hardware().any_output_high());
        run_ticks(&mut device, 1);
        assert!(!device.hardware().any_output_high());
        assert_eq!(device.connection_state(), ConnectionState::Advertising);
    }

    #[test]
    fn test_gain_write_applies_when_idle_only() {
        let mut device = device();
        device.handle(GattEvent::Connected);
        write(&mut device, GAIN, 20);
        assert_eq!(device.hardware().gain_writes.last(), Some(&51));

        write(&mut device, STIMULATE_LEFT, 1);
        let writes = device.hardware().gain_writes.len();
        write(&mut device, GAIN, 100);
        assert_eq!(device.hardware().gain_writes.len(), writes);
        assert_eq!(device.session().unwrap().current_gain_code, 51);
        assert_eq!(device.parameters().derived().gain_code, 255);
    }

    #[test]
    fn test_parameter_write_during_session_keeps_session() {
        let mut device = device();
        device.handle(GattEvent::Connected);
        write(&mut device, STIMULATE_LEFT, 1);
        write(&mut device, FREQUENCY, 100);
        assert_eq!(device.session().unwrap().current_period_ms, 18);
        assert_eq!(device.parameters().derived().period_ms, 10);
    }

    #[test]
    fn test_invalid_writes_are_answered_with_att_errors() {
        let mut device = device();
        let response = device.handle(GattEvent::Write {
            uuid: AttributeUuid::Short(FREQUENCY),
            offset: 0,
            value: &[1, 2],
            authorized: false,
        });
        assert_eq!(response, GattResponse::Error(crate::error::AttError::InvalidValueSize));
        assert_eq!(device.parameters().params().frequency_hz, 55);

        let response = device.handle(GattEvent::Read {
            uuid: AttributeUuid::Long(1),
            offset: 0,
            authorized: false,
        });
        assert_eq!(response, GattResponse::Error(crate::error::AttError::InvalidHandle));
    }

    #[test]
    fn test_read_returns_parameter() {
        let mut device = device();
        write(&mut device, PULSE_WIDTH, 4);
        let response = device.handle(GattEvent::Read {
            uuid: AttributeUuid::Short(PULSE_WIDTH),
            offset: 0,
            authorized: false,
        });
        assert_eq!(response, GattResponse::Value(4));
    }

    #[test]
    fn test_write_queues_change_notification() {
        let mut device = device();
        device.next_notification();
        write(&mut device, GAIN, 70);
        assert_eq!(
            device.next_notification(),
            Some(Notification::ParameterChanged(ParamId::Gain))
        );
    }

    #[test]
    fn test_battery_sampled_while_connected() {
        let mut device = device();
        device.hardware_mut().battery_percent = 83;
        device.handle(GattEvent::Connected);
        assert_eq!(device.battery_percent(), None);

        // 10 s
        run_ticks(&mut device, 100_000);
        assert_eq!(device.battery_percent(), Some(83));
        let mut reported = false;
        while let Some(n) = device.next_notification() {
            reported |= n == Notification::BatteryLevel(83);
        }
        assert!(reported);
    }

    #[test]
    fn test_idle_device_sleeps_and_wakes() {
        let mut device = device();
        // 30 s
        run_ticks(&mut device, 300_000);
        assert!(device.is_sleeping());
        assert!(device.hardware().powered_down);

        device.handle(GattEvent::Wake);
        assert_eq!(device.connection_state(), ConnectionState::Advertising);
        assert!(!device.hardware().powered_down);
    }
}
