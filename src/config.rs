//! config.rs
//!
//! Timing and safety configuration for the stimulator. Everything the device needs to
//! know about "how long" and "how much" lives here so board bring-up only picks a
//! `DeviceConfig` and never touches the engine modules.

/// Microseconds per millisecond.
pub const US_PER_MS: u32 = 1_000;

/// How the connection indicator behaves while a central is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectedIndicator {
    /// LED held on for the whole connection.
    Solid,
    /// LED pulsed `on_ms` out of every `period_ms` (dim glow).
    Pulsed { period_ms: u32, on_ms: u32 },
}

/// Quick LED flashes played once when a central connects, before the steady indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectBurst {
    pub pulses: u8,
    pub period_ms: u32,
    pub on_ms: u32,
}

/// Device-wide configuration, fixed at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Period of the stimulus timer interrupt. Must stay at or below a tenth of the
    /// shortest pulse width (1 ms) for acceptable duty-cycle fidelity.
    pub tick_us: u32,
    /// Idle time spent advertising before the device powers down.
    pub sleep_timeout_ms: u32,
    /// Battery sampling period while connected.
    pub battery_check_ms: u32,
    /// Advertising blink: LED period.
    pub advertising_blink_period_ms: u32,
    /// Advertising blink: LED on-time per period.
    pub advertising_blink_on_ms: u32,
    pub connected_indicator: ConnectedIndicator,
    /// Optional flash sequence on connect. `None` goes straight to the steady indicator.
    pub connect_burst: Option<ConnectBurst>,
    /// Indicator LED brightness PWM period, in ticks. Independent of the stimulus.
    pub indicator_pwm_period_ticks: u16,
    /// Indicator LED on-ticks per brightness period.
    pub indicator_pwm_on_ticks: u16,
    /// Upper limit on the stimulus duty cycle, percent. 100 disables the limit.
    pub duty_ceiling_percent: u8,
}

impl DeviceConfig {
    pub const DEFAULT: DeviceConfig = DeviceConfig {
        tick_us: 100,
        sleep_timeout_ms: 30_000,
        battery_check_ms: 10_000,
        advertising_blink_period_ms: 1_000,
        advertising_blink_on_ms: 20,
        connected_indicator: ConnectedIndicator::Solid,
        connect_burst: None,
        indicator_pwm_period_ticks: 20,
        indicator_pwm_on_ticks: 5,
        duty_ceiling_percent: 100,
    };

    /// Ceiling clamped into [1, 100] so a bad config can never disable output entirely
    /// or exceed a full period.
    pub fn duty_ceiling(&self) -> u8 {
        self.duty_ceiling_percent.clamp(1, 100)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tick_resolves_shortest_pulse() {
        // shortest pulse width is 1 ms
        assert!(DeviceConfig::default().tick_us * 10 <= US_PER_MS);
    }

    #[test]
    fn test_duty_ceiling_is_clamped() {
        let mut config = DeviceConfig::DEFAULT;
        config.duty_ceiling_percent = 0;
        assert_eq!(config.duty_ceiling(), 1);
        config.duty_ceiling_percent = 250;
        assert_eq!(config.duty_ceiling(), 100);
        config.duty_ceiling_percent = 70;
        assert_eq!(config.duty_ceiling(), 70);
    }
}
