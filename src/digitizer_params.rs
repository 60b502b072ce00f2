use crate::{CaptureConfig, RunRequest};
use log::info;
use std::fmt::Write;

/// Every setting applied to the board, one `name: value` per line.
pub fn describe(config: &CaptureConfig) -> String {
    let mut out = String::new();
    let clock = &config.clock;
    let _ = writeln!(out, "ClockSource: {}", clock.source);
    let _ = writeln!(out, "SampleRate: {}", clock.sample_rate);
    let _ = writeln!(out, "SampleRateCode: {:#x}", clock.rate_code);
    let _ = writeln!(out, "ClockEdge: {:?}", clock.edge);
    let _ = writeln!(out, "Decimation: {}", clock.decimation);

    for ch in &config.channels {
        let _ = writeln!(out, "Coupling[{:?}]: {:?}", ch.channel, ch.coupling);
        let _ = writeln!(
            out,
            "InputRange[{:?}]: +/-{} V",
            ch.channel,
            ch.input_range.volts()
        );
        let _ = writeln!(out, "Impedance[{:?}]: {:?}", ch.channel, ch.impedance);
        let _ = writeln!(out, "BWLimit[{:?}]: {}", ch.channel, ch.bandwidth_limit);
    }

    let _ = writeln!(out, "TriggerOperation: {:?}", config.trigger.operation);
    for engine in &config.trigger.engines {
        let _ = writeln!(
            out,
            "TriggerEngine[{:?}]: source {:?}, slope {:?}, level {}",
            engine.engine, engine.source, engine.slope, engine.level
        );
    }
    let _ = writeln!(
        out,
        "ExternalTrigger: {:?}, {:?}",
        config.external_trigger.coupling, config.external_trigger.input_range
    );
    let _ = writeln!(out, "TriggerDelay: {} samples", config.trigger_delay);
    let _ = writeln!(out, "TriggerTimeout: {} ticks", config.trigger_timeout);
    let _ = write!(
        out,
        "AuxIO: {:?}, parameter {}",
        config.aux_io.mode, config.aux_io.parameter
    );
    out
}

pub fn log_all(config: &CaptureConfig, request: &RunRequest) {
    info!("Digitizer parameters:\n{}", describe(config));
    info!(
        "Run parameters:\nChannels: {}\nPreTriggerSamples: {}\nRecordLength: {} s\n\
         RecordsPerBuffer: {}\nBuffersPerAcquisition: {}\nBufferCount: {}\n\
         WaitTimeout: {:?}\nModeFlags: {:#x}",
        request.channels,
        request.pre_trigger_samples,
        request.record_length_secs,
        request.records_per_buffer,
        request.buffers_per_acquisition,
        request.buffer_count,
        request.wait_timeout,
        request.mode_flags
    );
}
