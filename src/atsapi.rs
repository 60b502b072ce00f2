#![allow(non_upper_case_globals)]
#![allow(dead_code)]

// Numeric codes of the vendor AlazarTech API (AlazarCmd.h / AlazarApi.h).

pub const INTERNAL_CLOCK: u32 = 0x0000_0001;
pub const EXTERNAL_CLOCK_10MHz_REF: u32 = 0x0000_0007;

pub const CLOCK_EDGE_RISING: u32 = 0;
pub const CLOCK_EDGE_FALLING: u32 = 1;

pub const SAMPLE_RATE_1KSPS: u32 = 0x0000_0001;
pub const SAMPLE_RATE_2KSPS: u32 = 0x0000_0002;
pub const SAMPLE_RATE_5KSPS: u32 = 0x0000_0004;
pub const SAMPLE_RATE_10KSPS: u32 = 0x0000_0008;
pub const SAMPLE_RATE_20KSPS: u32 = 0x0000_000A;
pub const SAMPLE_RATE_50KSPS: u32 = 0x0000_000C;
pub const SAMPLE_RATE_100KSPS: u32 = 0x0000_000E;
pub const SAMPLE_RATE_200KSPS: u32 = 0x0000_0010;
pub const SAMPLE_RATE_500KSPS: u32 = 0x0000_0012;
pub const SAMPLE_RATE_1MSPS: u32 = 0x0000_0014;
pub const SAMPLE_RATE_2MSPS: u32 = 0x0000_0018;
pub const SAMPLE_RATE_5MSPS: u32 = 0x0000_001A;
pub const SAMPLE_RATE_10MSPS: u32 = 0x0000_001C;
pub const SAMPLE_RATE_20MSPS: u32 = 0x0000_001E;
pub const SAMPLE_RATE_50MSPS: u32 = 0x0000_0022;
pub const SAMPLE_RATE_100MSPS: u32 = 0x0000_0024;
pub const SAMPLE_RATE_125MSPS: u32 = 0x0000_0025;
pub const SAMPLE_RATE_160MSPS: u32 = 0x0000_0026;
pub const SAMPLE_RATE_180MSPS: u32 = 0x0000_0027;

/// Internal clock rates as (rate id, samples per second).
pub const INTERNAL_SAMPLE_RATES: &[(u32, u32)] = &[
    (SAMPLE_RATE_1KSPS, 1_000),
    (SAMPLE_RATE_2KSPS, 2_000),
    (SAMPLE_RATE_5KSPS, 5_000),
    (SAMPLE_RATE_10KSPS, 10_000),
    (SAMPLE_RATE_20KSPS, 20_000),
    (SAMPLE_RATE_50KSPS, 50_000),
    (SAMPLE_RATE_100KSPS, 100_000),
    (SAMPLE_RATE_200KSPS, 200_000),
    (SAMPLE_RATE_500KSPS, 500_000),
    (SAMPLE_RATE_1MSPS, 1_000_000),
    (SAMPLE_RATE_2MSPS, 2_000_000),
    (SAMPLE_RATE_5MSPS, 5_000_000),
    (SAMPLE_RATE_10MSPS, 10_000_000),
    (SAMPLE_RATE_20MSPS, 20_000_000),
    (SAMPLE_RATE_50MSPS, 50_000_000),
    (SAMPLE_RATE_100MSPS, 100_000_000),
    (SAMPLE_RATE_125MSPS, 125_000_000),
    (SAMPLE_RATE_160MSPS, 160_000_000),
    (SAMPLE_RATE_180MSPS, 180_000_000),
];

pub const CHANNEL_A: u32 = 1;
pub const CHANNEL_B: u32 = 2;

pub const AC_COUPLING: u32 = 1;
pub const DC_COUPLING: u32 = 2;

pub const INPUT_RANGE_PM_200_MV: u32 = 0x6;
pub const INPUT_RANGE_PM_400_MV: u32 = 0x7;
pub const INPUT_RANGE_PM_800_MV: u32 = 0x9;
pub const INPUT_RANGE_PM_1_V: u32 = 0xA;
pub const INPUT_RANGE_PM_2_V: u32 = 0xB;
pub const INPUT_RANGE_PM_4_V: u32 = 0xC;
pub const INPUT_RANGE_PM_8_V: u32 = 0xE;
pub const INPUT_RANGE_PM_16_V: u32 = 0x12;

pub const IMPEDANCE_1M_OHM: u32 = 1;
pub const IMPEDANCE_50_OHM: u32 = 2;

pub const TRIG_ENGINE_OP_J: u32 = 0;
pub const TRIG_ENGINE_OP_K: u32 = 1;
pub const TRIG_ENGINE_OP_J_OR_K: u32 = 2;
pub const TRIG_ENGINE_OP_J_AND_K: u32 = 3;
pub const TRIG_ENGINE_OP_J_XOR_K: u32 = 4;
pub const TRIG_ENGINE_OP_J_AND_NOT_K: u32 = 5;
pub const TRIG_ENGINE_OP_NOT_J_AND_K: u32 = 6;

pub const TRIG_ENGINE_J: u32 = 0;
pub const TRIG_ENGINE_K: u32 = 1;

pub const TRIG_CHAN_A: u32 = 0;
pub const TRIG_CHAN_B: u32 = 1;
pub const TRIG_EXTERNAL: u32 = 2;
pub const TRIG_DISABLE: u32 = 3;

pub const TRIGGER_SLOPE_POSITIVE: u32 = 1;
pub const TRIGGER_SLOPE_NEGATIVE: u32 = 2;

pub const ETR_5V: u32 = 0;
pub const ETR_1V: u32 = 1;

pub const AUX_OUT_TRIGGER: u32 = 0;
pub const AUX_IN_TRIGGER_ENABLE: u32 = 1;
pub const AUX_OUT_PACER: u32 = 2;
pub const AUX_IN_AUXILIARY: u32 = 13;

pub const ADMA_EXTERNAL_STARTCAPTURE: u32 = 0x0000_0001;
pub const ADMA_ENABLE_RECORD_HEADERS: u32 = 0x0000_0008;
pub const ADMA_ALLOC_BUFFERS: u32 = 0x0000_0020;
pub const ADMA_TRADITIONAL_MODE: u32 = 0x0000_0000;
pub const ADMA_CONTINUOUS_MODE: u32 = 0x0000_0100;
pub const ADMA_NPT: u32 = 0x0000_0200;
pub const ADMA_TRIGGERED_STREAMING: u32 = 0x0000_0400;
pub const ADMA_INTERLEAVE_SAMPLES: u32 = 0x0000_1000;

/// Length of one trigger timeout tick.
pub const TRIGGER_TIMEOUT_TICK_SECS: f64 = 10e-6;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub enum RetCode {
    Success = 512,
    Failed = 513,
    AccessDenied = 514,
    DmaChannelUnavailable = 515,
    DmaChannelInvalid = 516,
    DmaChannelTypeError = 517,
    DmaInProgress = 518,
    DmaDone = 519,
    DmaPaused = 520,
    DmaNotPaused = 521,
    DmaCommandInvalid = 522,
    WaitTimeout = 579,
    BufferOverflow = 582,
    Unknown = 0,
}

impl From<u32> for RetCode {
    fn from(value: u32) -> Self {
        match value {
            512 => Self::Success,
            513 => Self::Failed,
            514 => Self::AccessDenied,
            515 => Self::DmaChannelUnavailable,
            516 => Self::DmaChannelInvalid,
            517 => Self::DmaChannelTypeError,
            518 => Self::DmaInProgress,
            519 => Self::DmaDone,
            520 => Self::DmaPaused,
            521 => Self::DmaNotPaused,
            522 => Self::DmaCommandInvalid,
            579 => Self::WaitTimeout,
            582 => Self::BufferOverflow,
            _ => Self::Unknown,
        }
    }
}

/// Look up the enumerated internal-clock id for a rate in samples per second.
pub fn internal_rate_id(hz: u32) -> Option<u32> {
    INTERNAL_SAMPLE_RATES
        .iter()
        .find(|&&(_, rate)| rate == hz)
        .map(|&(id, _)| id)
}

#[cfg(feature = "atsapi")]
pub mod ffi {
    use libc::{c_long, c_void};

    pub type HANDLE = *mut c_void;
    pub type RETURN_CODE = u32;

    #[link(name = "ATSApi")]
    extern "C" {
        pub fn AlazarGetBoardBySystemID(system_id: u32, board_id: u32) -> HANDLE;
        pub fn AlazarSetCaptureClock(
            handle: HANDLE,
            source: u32,
            rate: u32,
            edge: u32,
            decimation: u32,
        ) -> RETURN_CODE;
        pub fn AlazarInputControlEx(
            handle: HANDLE,
            channel: u32,
            coupling: u32,
            input_range: u32,
            impedance: u32,
        ) -> RETURN_CODE;
        pub fn AlazarSetBWLimit(handle: HANDLE, channel: u32, enable: u32) -> RETURN_CODE;
        pub fn AlazarSetTriggerOperation(
            handle: HANDLE,
            operation: u32,
            engine1: u32,
            source1: u32,
            slope1: u32,
            level1: u32,
            engine2: u32,
            source2: u32,
            slope2: u32,
            level2: u32,
        ) -> RETURN_CODE;
        pub fn AlazarSetExternalTrigger(handle: HANDLE, coupling: u32, range: u32) -> RETURN_CODE;
        pub fn AlazarSetTriggerDelay(handle: HANDLE, delay: u32) -> RETURN_CODE;
        pub fn AlazarSetTriggerTimeOut(handle: HANDLE, timeout_ticks: u32) -> RETURN_CODE;
        pub fn AlazarConfigureAuxIO(handle: HANDLE, mode: u32, parameter: u32) -> RETURN_CODE;
        pub fn AlazarGetChannelInfo(
            handle: HANDLE,
            memory_size: *mut u32,
            bits_per_sample: *mut u8,
        ) -> RETURN_CODE;
        pub fn AlazarSetRecordSize(handle: HANDLE, pre: u32, post: u32) -> RETURN_CODE;
        pub fn AlazarBeforeAsyncRead(
            handle: HANDLE,
            channel_select: u32,
            transfer_offset: c_long,
            samples_per_record: u32,
            records_per_buffer: u32,
            records_per_acquisition: u32,
            flags: u32,
        ) -> RETURN_CODE;
        pub fn AlazarPostAsyncBuffer(handle: HANDLE, buffer: *mut c_void, length: u32)
            -> RETURN_CODE;
        pub fn AlazarStartCapture(handle: HANDLE) -> RETURN_CODE;
        pub fn AlazarWaitAsyncBufferComplete(
            handle: HANDLE,
            buffer: *mut c_void,
            timeout_ms: u32,
        ) -> RETURN_CODE;
        pub fn AlazarAbortAsyncRead(handle: HANDLE) -> RETURN_CODE;
    }
}
