//! params.rs
//!
//! The ParameterStore: validated holder of the stimulation parameters written over BLE
//! and read by the stimulus scheduler.
//!
//! Parameters and their derived timing values live together in one `Copy` `Snapshot`.
//! A setter builds a complete new snapshot and publishes it with a single assignment,
//! so a reader (the tick handler, under the same lock) never sees a frequency paired
//! with a stale period.

use crate::error::ParamError;

/// Highest accepted stimulation frequency. Writes above it are clamped.
pub const MAX_FREQUENCY_HZ: u8 = 150;
/// Highest accepted gain, percent. Writes above it are clamped.
pub const MAX_GAIN_PERCENT: u8 = 100;
/// Every parameter is encoded as exactly one byte.
pub const PARAM_LEN: usize = 1;

const MS_PER_SECOND: u16 = 1_000;

/// Parameter identifiers. Numbering follows the device's profile parameter table; 5-7
/// name no stored parameter and `from_raw` rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamId {
    Frequency = 1,
    PulseWidth = 2,
    Duration = 3,
    RandomMode = 4,
    Gain = 8,
    FreqMin = 9,
    FreqMax = 10,
    PulseWidthMin = 11,
    PulseWidthMax = 12,
    GainMin = 13,
    GainMax = 14,
}

impl ParamId {
    pub const ALL: [ParamId; 11] = [
        ParamId::Frequency,
        ParamId::PulseWidth,
        ParamId::Duration,
        ParamId::RandomMode,
        ParamId::Gain,
        ParamId::FreqMin,
        ParamId::FreqMax,
        ParamId::PulseWidthMin,
        ParamId::PulseWidthMax,
        ParamId::GainMin,
        ParamId::GainMax,
    ];

    pub fn from_raw(raw: u8) -> Option<ParamId> {
        ParamId::ALL.iter().copied().find(|id| *id as u8 == raw)
    }

    /// True for the parameters the derived timing values depend on.
    pub const fn affects_timing(self) -> bool {
        matches!(
            self,
            ParamId::Frequency | ParamId::PulseWidth | ParamId::Duration | ParamId::Gain
        )
    }
}

/// Inclusive-min, exclusive-max bounds for one randomized dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u8,
    pub max: u8,
}

impl Bounds {
    pub const fn new(min: u8, max: u8) -> Self {
        Bounds { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulationParameters {
    pub frequency_hz: u8,
    pub pulse_width_ms: u8,
    pub duration_units: u8,
    pub gain_percent: u8,
    pub random_mode: bool,
    pub frequency_bounds: Bounds,
    pub pulse_width_bounds: Bounds,
    pub gain_bounds: Bounds,
}

impl StimulationParameters {
    /// Factory defaults applied at boot.
    pub const FACTORY: StimulationParameters = StimulationParameters {
        frequency_hz: 55,
        pulse_width_ms: 9,
        duration_units: 55,
        gain_percent: 50,
        random_mode: false,
        frequency_bounds: Bounds::new(40, 100),
        pulse_width_bounds: Bounds::new(1, 9),
        gain_bounds: Bounds::new(40, 60),
    };
}

impl Default for StimulationParameters {
    fn default() -> Self {
        StimulationParameters::FACTORY
    }
}

/// Values computed from the parameters on every timing-relevant write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub period_ms: u16,
    pub duty_cycle_percent: u8,
    pub session_duration_ms: u32,
    pub gain_code: u8,
}

impl Derived {
    pub fn compute(params: &StimulationParameters, duty_ceiling_percent: u8) -> Derived {
        let period_ms = period_ms_for(params.frequency_hz);
        let duty = 100 * params.pulse_width_ms as u32 / period_ms as u32;
        let ceiling = duty_ceiling_percent.min(100) as u32;
        Derived {
            period_ms,
            duty_cycle_percent: duty.min(ceiling) as u8,
            session_duration_ms: period_ms as u32 * (params.duration_units as u32 + 1),
            gain_code: gain_code(params.gain_percent),
        }
    }
}

/// Parameters together with the values derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub params: StimulationParameters,
    pub derived: Derived,
}

/// Pulse period for a frequency. Zero is treated as 1 Hz.
pub fn period_ms_for(frequency_hz: u8) -> u16 {
    MS_PER_SECOND / frequency_hz.max(1) as u16
}

/// Map a gain percentage onto the 8-bit potentiometer code: `round(255/100 * percent)`.
pub fn gain_code(percent: u8) -> u8 {
    let percent = percent.min(MAX_GAIN_PERCENT) as u16;
    ((percent * 255 + 50) / 100) as u8
}

pub struct ParameterStore {
    current: Snapshot,
    duty_ceiling_percent: u8,
}

impl ParameterStore {
    pub fn new(params: StimulationParameters, duty_ceiling_percent: u8) -> Self {
        let params = sanitize(params);
        ParameterStore {
            current: Snapshot {
                params,
                derived: Derived::compute(&params, duty_ceiling_percent),
            },
            duty_ceiling_percent,
        }
    }

    /// Decode a raw parameter write and apply it.
    ///
    /// # Errors
    /// - `ParamError::UnknownParameter` - `id` does not name a writable parameter
    /// - `ParamError::InvalidLength` - `bytes` is not exactly one byte long
    pub fn set_parameter(&mut self, id: u8, bytes: &[u8]) -> Result<ParamId, ParamError> {
        let param = ParamId::from_raw(id).ok_or(ParamError::UnknownParameter(id))?;
        let value = match bytes {
            [value] => *value,
            _ => {
                return Err(ParamError::InvalidLength {
                    expected: PARAM_LEN,
                    got: bytes.len(),
                });
            }
        };
        self.set(param, value);
        Ok(param)
    }

    /// Apply an already-decoded value. Out-of-range values are coerced, never rejected.
    pub fn set(&mut self, id: ParamId, value: u8) {
        let mut params = self.current.params;
        match id {
            ParamId::Frequency => params.frequency_hz = value,
            ParamId::PulseWidth => params.pulse_width_ms = value,
            ParamId::Duration => params.duration_units = value,
            ParamId::RandomMode => params.random_mode = value != 0,
            ParamId::Gain => params.gain_percent = value,
            ParamId::FreqMin => params.frequency_bounds.min = value,
            ParamId::FreqMax => params.frequency_bounds.max = value,
            ParamId::PulseWidthMin => params.pulse_width_bounds.min = value,
            ParamId::PulseWidthMax => params.pulse_width_bounds.max = value,
            ParamId::GainMin => params.gain_bounds.min = value,
            ParamId::GainMax => params.gain_bounds.max = value,
        }
        let params = sanitize(params);

        let derived = if id.affects_timing() {
            Derived::compute(&params, self.duty_ceiling_percent)
        } else {
            self.current.derived
        };

        // publish parameters and derived values together
        self.current = Snapshot { params, derived };
        log::debug!("param {:?} = {}", id, value);
    }

    pub fn get_parameter(&self, id: ParamId) -> u8 {
        let params = &self.current.params;
        match id {
            ParamId::Frequency => params.frequency_hz,
            ParamId::PulseWidth => params.pulse_width_ms,
            ParamId::Duration => params.duration_units,
            ParamId::RandomMode => params.random_mode as u8,
            ParamId::Gain => params.gain_percent,
            ParamId::FreqMin => params.frequency_bounds.min,
            ParamId::FreqMax => params.frequency_bounds.max,
            ParamId::PulseWidthMin => params.pulse_width_bounds.min,
            ParamId::PulseWidthMax => params.pulse_width_bounds.max,
            ParamId::GainMin => params.gain_bounds.min,
            ParamId::GainMax => params.gain_bounds.max,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.current
    }

    pub fn params(&self) -> &StimulationParameters {
        &self.current.params
    }

    pub fn derived(&self) -> &Derived {
        &self.current.derived
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        ParameterStore::new(StimulationParameters::FACTORY, 100)
    }
}

/// Coerce values the scheduler must never see: a zero frequency (divide by zero) and
/// anything above the frequency and gain limits.
fn sanitize(mut params: StimulationParameters) -> StimulationParameters {
    params.frequency_hz = params.frequency_hz.clamp(1, MAX_FREQUENCY_HZ);
    params.gain_percent = params.gain_percent.min(MAX_GAIN_PERCENT);
    // random draws obey the same limits as direct writes
    let bounds = &mut params.frequency_bounds;
    bounds.min = bounds.min.min(MAX_FREQUENCY_HZ);
    bounds.max = bounds.max.min(MAX_FREQUENCY_HZ);
    let bounds = &mut params.gain_bounds;
    bounds.min = bounds.min.min(MAX_GAIN_PERCENT);
    bounds.max = bounds.max.min(MAX_GAIN_PERCENT);
    params
}
