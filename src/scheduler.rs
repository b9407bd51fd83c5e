//! scheduler.rs
//!
//! The StimulusScheduler turns a parameter snapshot into output transitions, one fixed
//! period tick at a time. It owns the single `StimulationSession`.
//!
//! Session states:
//!
//! ```text
//!   Idle --start--> Running --elapsed > duration--> Finished (== Idle)
//!                      |
//!                      +--abort (disconnect / sleep)--> Idle
//! ```
//!
//! `tick` is constant time and never blocks, it runs from the timer interrupt.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{DeviceConfig, US_PER_MS};
use crate::hal::{Channel, HardwareAbstraction};
use crate::params::{
    Bounds, MAX_FREQUENCY_HZ, MAX_GAIN_PERCENT, Snapshot, gain_code, period_ms_for,
};
use crate::prng::PseudoRandomSource;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session is already running; the request was ignored.
    AlreadyActive,
}

/// The one stimulation session. Only meaningful while the scheduler reports active.
#[derive(Debug, Clone, Copy)]
pub struct StimulationSession {
    pub channel: Channel,
    pub elapsed_us: u32,
    pub current_frequency_hz: u8,
    pub current_period_ms: u16,
    pub current_pulse_width_ms: u8,
    pub current_gain_percent: u8,
    pub current_gain_code: u8,
    duration_us: u32,
    phase_us: u32,
    indicator_phase: u16,
    snapshot: Snapshot,
}

impl StimulationSession {
    fn new(channel: Channel, snapshot: Snapshot) -> Self {
        StimulationSession {
            channel,
            elapsed_us: 0,
            current_frequency_hz: snapshot.params.frequency_hz,
            current_period_ms: snapshot.derived.period_ms,
            current_pulse_width_ms: snapshot.params.pulse_width_ms,
            current_gain_percent: snapshot.params.gain_percent,
            current_gain_code: snapshot.derived.gain_code,
            duration_us: snapshot.derived.session_duration_ms.saturating_mul(US_PER_MS),
            phase_us: 0,
            indicator_phase: 0,
            snapshot,
        }
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_us / US_PER_MS
    }

    pub fn duration_ms(&self) -> u32 {
        self.snapshot.derived.session_duration_ms
    }

    pub fn random_mode(&self) -> bool {
        self.snapshot.params.random_mode
    }

    /// Draw a new frequency, pulse width and gain for the next pulse period.
    fn randomize_period(&mut self, rng: &mut PseudoRandomSource) {
        let params = &self.snapshot.params;
        let frequency = draw_within(params.frequency_bounds, rng).min(MAX_FREQUENCY_HZ);
        let pulse_width = draw_within(params.pulse_width_bounds, rng);
        let gain = draw_within(params.gain_bounds, rng).min(MAX_GAIN_PERCENT);

        self.current_frequency_hz = frequency;
        self.current_period_ms = period_ms_for(frequency);
        self.current_pulse_width_ms = pulse_width;
        self.current_gain_percent = gain;
        self.current_gain_code = gain_code(gain);
    }
}

/// Zero bounds are coerced to 1 so they can never reach a modulo.
fn if_zero(value: u8) -> u8 {
    if value == 0 { 1 } else { value }
}

/// Draw a value in `[min, max)`. Equal bounds pin the value; `max` itself is never drawn.
/// Reversed bounds are swapped.
pub fn draw_within(bounds: Bounds, rng: &mut PseudoRandomSource) -> u8 {
    let mut lo = if_zero(bounds.min);
    let mut hi = if_zero(bounds.max);
    if hi < lo {
        core::mem::swap(&mut lo, &mut hi);
    }
    if lo == hi {
        return lo;
    }
    lo + rng.next() % (hi - lo)
}

pub struct StimulusScheduler {
    session: StimulationSession,
    active: AtomicBool,
    rng: PseudoRandomSource,
    tick_us: u32,
    duty_ceiling_percent: u8,
    indicator_period_ticks: u16,
    indicator_on_ticks: u16,
}

impl StimulusScheduler {
    pub fn new(config: &DeviceConfig, rng: PseudoRandomSource) -> Self {
        StimulusScheduler {
            session: StimulationSession::new(Channel::Left, empty_snapshot()),
            active: AtomicBool::new(false),
            rng,
            tick_us: config.tick_us.max(1),
            duty_ceiling_percent: config.duty_ceiling(),
            indicator_period_ticks: config.indicator_pwm_period_ticks.max(1),
            indicator_on_ticks: config.indicator_pwm_on_ticks,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&StimulationSession> {
        self.is_active().then_some(&self.session)
    }

    /// Start a session on `channel` from a parameter snapshot. Ignored while a session
    /// is already running.
    pub fn start<H: HardwareAbstraction>(
        &mut self,
        channel: Channel,
        snapshot: Snapshot,
        hw: &mut H,
    ) -> StartOutcome {
        if self.is_active() {
            log::debug!("start {:?} ignored: session running", channel);
            return StartOutcome::AlreadyActive;
        }

        let mut session = StimulationSession::new(channel, snapshot);
        if session.random_mode() {
            session.randomize_period(&mut self.rng);
        }

        hw.all_outputs_low();
        hw.set_gain(session.current_gain_code);
        hw.set_indicator(channel, true);

        // session fields are complete before `active` is published
        self.session = session;
        self.active.store(true, Ordering::Release);

        log::info!(
            "stimulate {:?}: {} ms period, {} ms pulse, {} ms total",
            channel,
            session.current_period_ms,
            session.current_pulse_width_ms,
            session.duration_ms()
        );
        StartOutcome::Started
    }

    /// Advance the running session by one tick. Returns the channel of a session that
    /// finished on this tick.
    pub fn tick<H: HardwareAbstraction>(&mut self, hw: &mut H) -> Option<Channel> {
        if !self.is_active() {
            return None;
        }

        let tick_us = self.tick_us;
        let session = &mut self.session;
        let channel = session.channel;

        session.elapsed_us = session.elapsed_us.saturating_add(tick_us);
        if session.elapsed_us > session.duration_us {
            self.stop(hw);
            log::info!("stimulate {:?} finished", channel);
            return Some(channel);
        }

        let period_us = session.current_period_ms as u32 * US_PER_MS;
        if session.phase_us >= period_us {
            session.phase_us = 0;
            if session.random_mode() {
                session.randomize_period(&mut self.rng);
                hw.set_gain(session.current_gain_code);
            }
        }

        let high_us = high_time_us(session, self.duty_ceiling_percent);
        hw.set_stimulus(channel, session.phase_us < high_us);
        session.phase_us += tick_us;

        hw.set_indicator(channel, session.indicator_phase < self.indicator_on_ticks);
        session.indicator_phase = (session.indicator_phase + 1) % self.indicator_period_ticks;

        None
    }

    /// Stop any running session immediately and drive every output low.
    pub fn abort<H: HardwareAbstraction>(&mut self, hw: &mut H) {
        if self.is_active() {
            log::warn!("stimulate {:?} aborted", self.session.channel);
        }
        self.stop(hw);
    }

    fn stop<H: HardwareAbstraction>(&mut self, hw: &mut H) {
        self.active.store(false, Ordering::Release);
        hw.all_outputs_low();
    }
}

/// Output high time within the current period: the pulse width, capped by the period
/// and by the duty-cycle ceiling.
fn high_time_us(session: &StimulationSession, duty_ceiling_percent: u8) -> u32 {
    let period_us = session.current_period_ms as u32 * US_PER_MS;
    let width_us = session.current_pulse_width_ms as u32 * US_PER_MS;
    let ceiling_us = period_us * duty_ceiling_percent as u32 / 100;
    width_us.min(ceiling_us)
}

fn empty_snapshot() -> Snapshot {
    crate::params::ParameterStore::default().snapshot()
}
