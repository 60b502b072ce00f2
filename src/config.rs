use crate::{
    AuxIoMode, CaptureParams, ChannelParams, ChannelSelection, ClockEdge, ConfigError, Coupling,
    ExternalTriggerRange, Impedance, InputRange, RunRequest, SinkPolicy, TriggerEngineParams,
    TriggerOperation, TriggerSlope, TriggerSource, DEFAULT_MODE_FLAGS,
};
use confique::Config;
use log::LevelFilter;
use std::{path::Path, time::Duration};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub board_settings: BoardSettings,
    #[config(nested)]
    pub trigger_settings: TriggerSettings,
    #[config(nested)]
    pub log_settings: LogSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = 0)]
    pub pre_trigger_samples: u32,
    /// Post-trigger record length in seconds.
    #[config(default = 1e-6)]
    pub record_length: f64,
    #[config(default = 1)]
    pub records_per_buffer: u32,
    #[config(default = 1)]
    pub buffers_per_acquisition: u32,
    /// Number of DMA buffers in the pool.
    #[config(default = 1)]
    pub buffer_count: u32,
    /// "A", "B" or "AB".
    #[config(default = "A")]
    pub channels: String,
    #[config(default = true)]
    pub save_data: bool,
    #[config(default = "data")]
    pub output_dir: String,
    /// Data file name inside `output_dir`. The next free `run<N>.bin` when unset.
    pub filename: Option<String>,
    #[config(default = false)]
    pub return_data: bool,
    #[config(default = 5000)]
    pub wait_timeout_ms: u64,
    /// Stop the run when a buffer cannot be written instead of warning.
    #[config(default = false)]
    pub fail_on_sink_error: bool,
}

#[derive(Config, Debug, Clone)]
pub struct BoardSettings {
    #[config(default = 1)]
    pub system_id: u32,
    #[config(default = 1)]
    pub board_id: u32,
    /// "internal" or "external_10mhz_ref".
    #[config(default = "internal")]
    pub clock_source: String,
    /// Samples per second. Must be one of the enumerated rates for the
    /// internal clock.
    #[config(default = 180000000)]
    pub sample_rate: u32,
    #[config(default = "rising")]
    pub clock_edge: ClockEdge,
    #[config(default = 0)]
    pub decimation: u32,
    #[config(default = "ac")]
    pub channel_a_coupling: Coupling,
    #[config(default = "pm_2_v")]
    pub channel_a_range: InputRange,
    #[config(default = "50_ohm")]
    pub channel_a_impedance: Impedance,
    #[config(default = false)]
    pub channel_a_bw_limit: bool,
    #[config(default = "dc")]
    pub channel_b_coupling: Coupling,
    #[config(default = "pm_2_v")]
    pub channel_b_range: InputRange,
    #[config(default = "50_ohm")]
    pub channel_b_impedance: Impedance,
    #[config(default = false)]
    pub channel_b_bw_limit: bool,
    #[config(default = "out_pacer")]
    pub aux_io_mode: AuxIoMode,
    #[config(default = 18)]
    pub aux_io_parameter: u32,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "j")]
    pub operation: TriggerOperation,
    #[config(default = "external")]
    pub j_source: TriggerSource,
    #[config(default = "positive")]
    pub j_slope: TriggerSlope,
    #[config(default = 150)]
    pub j_level: u32,
    #[config(default = "disable")]
    pub k_source: TriggerSource,
    #[config(default = "positive")]
    pub k_slope: TriggerSlope,
    #[config(default = 128)]
    pub k_level: u32,
    #[config(default = "dc")]
    pub ext_coupling: Coupling,
    #[config(default = "etr_1v")]
    pub ext_range: ExternalTriggerRange,
    #[config(default = 0.0)]
    pub delay_secs: f64,
    /// Seconds before the board triggers itself; 0 waits forever.
    #[config(default = 0.0)]
    pub timeout_secs: f64,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    /// One of "off", "error", "warn", "info", "debug", "trace".
    #[config(default = "info")]
    pub level: String,
    #[config(default = "logs")]
    pub log_dir: String,
}

impl Conf {
    /// Load `path` on top of the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, confique::Error> {
        let builder = Conf::builder();
        match path {
            Some(path) => builder.file(path).load(),
            None => builder.load(),
        }
    }

    /// A commented TOML file listing every setting and its default.
    pub fn template() -> String {
        confique::toml::template::<Conf>(confique::toml::FormatOptions::default())
    }

    pub fn capture_params(&self) -> CaptureParams {
        let board = &self.board_settings;
        let trigger = &self.trigger_settings;
        CaptureParams {
            clock_source: board.clock_source.clone(),
            sample_rate: board.sample_rate,
            clock_edge: board.clock_edge,
            decimation: board.decimation,
            channel_a: ChannelParams {
                coupling: board.channel_a_coupling,
                input_range: board.channel_a_range,
                impedance: board.channel_a_impedance,
                bandwidth_limit: board.channel_a_bw_limit,
            },
            channel_b: ChannelParams {
                coupling: board.channel_b_coupling,
                input_range: board.channel_b_range,
                impedance: board.channel_b_impedance,
                bandwidth_limit: board.channel_b_bw_limit,
            },
            trigger_operation: trigger.operation,
            trigger_j: TriggerEngineParams {
                source: trigger.j_source,
                slope: trigger.j_slope,
                level: trigger.j_level,
            },
            trigger_k: TriggerEngineParams {
                source: trigger.k_source,
                slope: trigger.k_slope,
                level: trigger.k_level,
            },
            ext_trigger_coupling: trigger.ext_coupling,
            ext_trigger_range: trigger.ext_range,
            trigger_delay_secs: trigger.delay_secs,
            trigger_timeout_secs: trigger.timeout_secs,
            aux_io_mode: board.aux_io_mode,
            aux_io_parameter: board.aux_io_parameter,
        }
    }

    /// Run request described by `[run_settings]`. The data file is left unset
    /// when no file name is configured.
    pub fn run_request(&self) -> Result<RunRequest, ConfigError> {
        let run = &self.run_settings;
        let channels: ChannelSelection = run.channels.parse()?;
        Ok(RunRequest {
            pre_trigger_samples: run.pre_trigger_samples,
            record_length_secs: run.record_length,
            records_per_buffer: run.records_per_buffer,
            buffers_per_acquisition: run.buffers_per_acquisition,
            buffer_count: run.buffer_count,
            channels,
            save_data: run.save_data,
            filename: run
                .filename
                .as_ref()
                .map(|name| Path::new(&run.output_dir).join(name)),
            return_data: run.return_data,
            wait_timeout: Duration::from_millis(run.wait_timeout_ms),
            sink_policy: if run.fail_on_sink_error {
                SinkPolicy::Fatal
            } else {
                SinkPolicy::Warn
            },
            mode_flags: DEFAULT_MODE_FLAGS,
        })
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_settings.level.parse().unwrap_or(LevelFilter::Info)
    }
}
