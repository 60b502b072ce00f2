use crate::atsapi;
use serde::Deserialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors raised while building a capture configuration or validating a run
/// request. These are never retried.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown clock source '{0}'")]
    UnknownClockSource(String),
    #[error("internal clock cannot run at {0} Hz")]
    UnsupportedInternalRate(u32),
    #[error("external reference clock needs a non-zero sample rate")]
    ZeroExternalRate,
    #[error("invalid channel selection '{0}'")]
    InvalidChannels(String),
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} of {value} does not fit the board's 32 bit register")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("invalid run request: {0}")]
    InvalidRequest(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Internal,
    External10MhzRef,
}

impl ClockSource {
    pub fn code(self) -> u32 {
        match self {
            ClockSource::Internal => atsapi::INTERNAL_CLOCK,
            ClockSource::External10MhzRef => atsapi::EXTERNAL_CLOCK_10MHz_REF,
        }
    }
}

impl FromStr for ClockSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(ClockSource::Internal),
            "external_10mhz_ref" | "external10mhzref" => Ok(ClockSource::External10MhzRef),
            _ => Err(ConfigError::UnknownClockSource(s.to_string())),
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSource::Internal => write!(f, "internal"),
            ClockSource::External10MhzRef => write!(f, "external_10mhz_ref"),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockEdge {
    Rising,
    Falling,
}

impl ClockEdge {
    pub fn code(self) -> u32 {
        match self {
            ClockEdge::Rising => atsapi::CLOCK_EDGE_RISING,
            ClockEdge::Falling => atsapi::CLOCK_EDGE_FALLING,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    pub fn code(self) -> u32 {
        match self {
            Coupling::Ac => atsapi::AC_COUPLING,
            Coupling::Dc => atsapi::DC_COUPLING,
        }
    }
}

/// Input range of an analog channel, in volts peak.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRange {
    #[serde(rename = "pm_200_mv")]
    Pm200mV,
    #[serde(rename = "pm_400_mv")]
    Pm400mV,
    #[serde(rename = "pm_800_mv")]
    Pm800mV,
    #[serde(rename = "pm_1_v")]
    Pm1V,
    #[serde(rename = "pm_2_v")]
    Pm2V,
    #[serde(rename = "pm_4_v")]
    Pm4V,
    #[serde(rename = "pm_8_v")]
    Pm8V,
    #[serde(rename = "pm_16_v")]
    Pm16V,
}

impl InputRange {
    pub fn code(self) -> u32 {
        match self {
            InputRange::Pm200mV => atsapi::INPUT_RANGE_PM_200_MV,
            InputRange::Pm400mV => atsapi::INPUT_RANGE_PM_400_MV,
            InputRange::Pm800mV => atsapi::INPUT_RANGE_PM_800_MV,
            InputRange::Pm1V => atsapi::INPUT_RANGE_PM_1_V,
            InputRange::Pm2V => atsapi::INPUT_RANGE_PM_2_V,
            InputRange::Pm4V => atsapi::INPUT_RANGE_PM_4_V,
            InputRange::Pm8V => atsapi::INPUT_RANGE_PM_8_V,
            InputRange::Pm16V => atsapi::INPUT_RANGE_PM_16_V,
        }
    }

    pub fn volts(self) -> f64 {
        match self {
            InputRange::Pm200mV => 0.2,
            InputRange::Pm400mV => 0.4,
            InputRange::Pm800mV => 0.8,
            InputRange::Pm1V => 1.0,
            InputRange::Pm2V => 2.0,
            InputRange::Pm4V => 4.0,
            InputRange::Pm8V => 8.0,
            InputRange::Pm16V => 16.0,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Impedance {
    #[serde(rename = "50_ohm")]
    Ohm50,
    #[serde(rename = "1m_ohm")]
    MOhm1,
}

impl Impedance {
    pub fn code(self) -> u32 {
        match self {
            Impedance::Ohm50 => atsapi::IMPEDANCE_50_OHM,
            Impedance::MOhm1 => atsapi::IMPEDANCE_1M_OHM,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOperation {
    J,
    K,
    JOrK,
    JAndK,
    JXorK,
    JAndNotK,
    NotJAndK,
}

impl TriggerOperation {
    pub fn code(self) -> u32 {
        match self {
            TriggerOperation::J => atsapi::TRIG_ENGINE_OP_J,
            TriggerOperation::K => atsapi::TRIG_ENGINE_OP_K,
            TriggerOperation::JOrK => atsapi::TRIG_ENGINE_OP_J_OR_K,
            TriggerOperation::JAndK => atsapi::TRIG_ENGINE_OP_J_AND_K,
            TriggerOperation::JXorK => atsapi::TRIG_ENGINE_OP_J_XOR_K,
            TriggerOperation::JAndNotK => atsapi::TRIG_ENGINE_OP_J_AND_NOT_K,
            TriggerOperation::NotJAndK => atsapi::TRIG_ENGINE_OP_NOT_J_AND_K,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEngine {
    J,
    K,
}

impl TriggerEngine {
    pub fn code(self) -> u32 {
        match self {
            TriggerEngine::J => atsapi::TRIG_ENGINE_J,
            TriggerEngine::K => atsapi::TRIG_ENGINE_K,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    ChannelA,
    ChannelB,
    External,
    Disable,
}

impl TriggerSource {
    pub fn code(self) -> u32 {
        match self {
            TriggerSource::ChannelA => atsapi::TRIG_CHAN_A,
            TriggerSource::ChannelB => atsapi::TRIG_CHAN_B,
            TriggerSource::External => atsapi::TRIG_EXTERNAL,
            TriggerSource::Disable => atsapi::TRIG_DISABLE,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSlope {
    Positive,
    Negative,
}

impl TriggerSlope {
    pub fn code(self) -> u32 {
        match self {
            TriggerSlope::Positive => atsapi::TRIGGER_SLOPE_POSITIVE,
            TriggerSlope::Negative => atsapi::TRIGGER_SLOPE_NEGATIVE,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalTriggerRange {
    #[serde(rename = "etr_1v")]
    Etr1V,
    #[serde(rename = "etr_5v")]
    Etr5V,
}

impl ExternalTriggerRange {
    pub fn code(self) -> u32 {
        match self {
            ExternalTriggerRange::Etr1V => atsapi::ETR_1V,
            ExternalTriggerRange::Etr5V => atsapi::ETR_5V,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuxIoMode {
    OutTrigger,
    InTriggerEnable,
    OutPacer,
    InAuxiliary,
}

impl AuxIoMode {
    pub fn code(self) -> u32 {
        match self {
            AuxIoMode::OutTrigger => atsapi::AUX_OUT_TRIGGER,
            AuxIoMode::InTriggerEnable => atsapi::AUX_IN_TRIGGER_ENABLE,
            AuxIoMode::OutPacer => atsapi::AUX_OUT_PACER,
            AuxIoMode::InAuxiliary => atsapi::AUX_IN_AUXILIARY,
        }
    }
}

/// Analog input channel of the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub fn code(self) -> u32 {
        match self {
            Channel::A => atsapi::CHANNEL_A,
            Channel::B => atsapi::CHANNEL_B,
        }
    }
}

/// Non-empty set of channels that take part in a capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSelection {
    A,
    B,
    AB,
}

impl ChannelSelection {
    /// Channel mask handed to the board.
    pub fn mask(self) -> u32 {
        self.channels().iter().fold(0, |mask, c| mask | c.code())
    }

    pub fn channels(self) -> &'static [Channel] {
        match self {
            ChannelSelection::A => &[Channel::A],
            ChannelSelection::B => &[Channel::B],
            ChannelSelection::AB => &[Channel::A, Channel::B],
        }
    }

    pub fn count(self) -> usize {
        self.channels().len()
    }
}

impl FromStr for ChannelSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(ChannelSelection::A),
            "B" => Ok(ChannelSelection::B),
            "AB" | "BA" => Ok(ChannelSelection::AB),
            _ => Err(ConfigError::InvalidChannels(s.to_string())),
        }
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelection::A => write!(f, "A"),
            ChannelSelection::B => write!(f, "B"),
            ChannelSelection::AB => write!(f, "AB"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockConfig {
    pub source: ClockSource,
    /// Samples per second.
    pub sample_rate: u32,
    /// Value handed to the board: an enumerated rate id for the internal
    /// clock, the rate in Hz for the external reference.
    pub rate_code: u32,
    pub edge: ClockEdge,
    pub decimation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelConfig {
    pub channel: Channel,
    pub coupling: Coupling,
    pub input_range: InputRange,
    pub impedance: Impedance,
    pub bandwidth_limit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerEngineConfig {
    pub engine: TriggerEngine,
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    pub level: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerConfig {
    pub operation: TriggerOperation,
    pub engines: [TriggerEngineConfig; 2],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExternalTriggerConfig {
    pub coupling: Coupling,
    pub input_range: ExternalTriggerRange,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuxIoConfig {
    pub mode: AuxIoMode,
    pub parameter: u32,
}

/// Settings for one trigger engine as read from the configuration file.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct TriggerEngineParams {
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    pub level: u32,
}

/// Settings for one analog channel as read from the configuration file.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ChannelParams {
    pub coupling: Coupling,
    pub input_range: InputRange,
    pub impedance: Impedance,
    #[serde(default)]
    pub bandwidth_limit: bool,
}

/// The fixed lab parameters a `CaptureConfig` is derived from.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureParams {
    pub clock_source: String,
    pub sample_rate: u32,
    pub clock_edge: ClockEdge,
    pub decimation: u32,
    pub channel_a: ChannelParams,
    pub channel_b: ChannelParams,
    pub trigger_operation: TriggerOperation,
    pub trigger_j: TriggerEngineParams,
    pub trigger_k: TriggerEngineParams,
    pub ext_trigger_coupling: Coupling,
    pub ext_trigger_range: ExternalTriggerRange,
    pub trigger_delay_secs: f64,
    pub trigger_timeout_secs: f64,
    pub aux_io_mode: AuxIoMode,
    pub aux_io_parameter: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            clock_source: "internal".to_string(),
            sample_rate: 180_000_000,
            clock_edge: ClockEdge::Rising,
            decimation: 0,
            channel_a: ChannelParams {
                coupling: Coupling::Ac,
                input_range: InputRange::Pm2V,
                impedance: Impedance::Ohm50,
                bandwidth_limit: false,
            },
            channel_b: ChannelParams {
                coupling: Coupling::Dc,
                input_range: InputRange::Pm2V,
                impedance: Impedance::Ohm50,
                bandwidth_limit: false,
            },
            trigger_operation: TriggerOperation::J,
            trigger_j: TriggerEngineParams {
                source: TriggerSource::External,
                slope: TriggerSlope::Positive,
                level: 150,
            },
            trigger_k: TriggerEngineParams {
                source: TriggerSource::Disable,
                slope: TriggerSlope::Positive,
                level: 128,
            },
            ext_trigger_coupling: Coupling::Dc,
            ext_trigger_range: ExternalTriggerRange::Etr1V,
            trigger_delay_secs: 0.0,
            trigger_timeout_secs: 0.0,
            aux_io_mode: AuxIoMode::OutPacer,
            aux_io_parameter: 18,
        }
    }
}

/// Complete hardware setup of the digitizer. Built once, never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub clock: ClockConfig,
    pub channels: [ChannelConfig; 2],
    pub trigger: TriggerConfig,
    pub external_trigger: ExternalTriggerConfig,
    /// Trigger delay in samples.
    pub trigger_delay: u32,
    /// Trigger timeout in 10 us ticks; 0 waits forever.
    pub trigger_timeout: u32,
    pub aux_io: AuxIoConfig,
}

impl CaptureConfig {
    pub fn from_params(params: &CaptureParams) -> Result<Self, ConfigError> {
        let source: ClockSource = params.clock_source.parse()?;
        let rate_code = match source {
            ClockSource::Internal => atsapi::internal_rate_id(params.sample_rate)
                .ok_or(ConfigError::UnsupportedInternalRate(params.sample_rate))?,
            ClockSource::External10MhzRef => {
                if params.sample_rate == 0 {
                    return Err(ConfigError::ZeroExternalRate);
                }
                params.sample_rate
            }
        };

        let trigger_delay = round_half_up(
            "trigger_delay_secs",
            params.trigger_delay_secs * params.sample_rate as f64,
            params.trigger_delay_secs,
        )?;
        let trigger_timeout = round_half_up(
            "trigger_timeout_secs",
            params.trigger_timeout_secs / atsapi::TRIGGER_TIMEOUT_TICK_SECS,
            params.trigger_timeout_secs,
        )?;

        let channel = |channel, p: &ChannelParams| ChannelConfig {
            channel,
            coupling: p.coupling,
            input_range: p.input_range,
            impedance: p.impedance,
            bandwidth_limit: p.bandwidth_limit,
        };
        let engine = |engine, p: &TriggerEngineParams| TriggerEngineConfig {
            engine,
            source: p.source,
            slope: p.slope,
            level: p.level,
        };

        Ok(Self {
            clock: ClockConfig {
                source,
                sample_rate: params.sample_rate,
                rate_code,
                edge: params.clock_edge,
                decimation: params.decimation,
            },
            channels: [
                channel(Channel::A, &params.channel_a),
                channel(Channel::B, &params.channel_b),
            ],
            trigger: TriggerConfig {
                operation: params.trigger_operation,
                engines: [
                    engine(TriggerEngine::J, &params.trigger_j),
                    engine(TriggerEngine::K, &params.trigger_k),
                ],
            },
            external_trigger: ExternalTriggerConfig {
                coupling: params.ext_trigger_coupling,
                input_range: params.ext_trigger_range,
            },
            trigger_delay,
            trigger_timeout,
            aux_io: AuxIoConfig {
                mode: params.aux_io_mode,
                parameter: params.aux_io_parameter,
            },
        })
    }

    /// Samples per second, as seen by the record-length conversion.
    pub fn sample_rate_hz(&self) -> f64 {
        self.clock.sample_rate as f64
    }
}

/// Round `value`, derived from the setting `input`, to a register count.
fn round_half_up(field: &'static str, value: f64, input: f64) -> Result<u32, ConfigError> {
    if !input.is_finite() || !value.is_finite() {
        return Err(ConfigError::NotFinite { field });
    }
    if input < 0.0 {
        return Err(ConfigError::Negative {
            field,
            value: input,
        });
    }
    let rounded = (value + 0.5).floor();
    if rounded > u32::MAX as f64 {
        return Err(ConfigError::OutOfRange {
            field,
            value: input,
        });
    }
    Ok(rounded as u32)
}
