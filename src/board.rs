use crate::{atsapi::RetCode, CaptureConfig, ChannelSelection, DmaBuffer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("board rejected {call}: {reason}")]
    Rejected { call: &'static str, reason: String },
    #[error("no board with system id {system_id} and board id {board_id}")]
    NotFound { system_id: u32, board_id: u32 },
    #[error("could not allocate a {bytes} byte DMA buffer")]
    Allocation { bytes: usize },
    #[error("buffer not filled within {0:?}")]
    Timeout(Duration),
    #[error("{call} returned {code:?} ({raw})")]
    Api {
        call: &'static str,
        code: RetCode,
        raw: u32,
    },
    #[error("{0}")]
    Contract(String),
}

/// Sample depth and on-board memory of the digitizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub bits_per_sample: u8,
    /// On-board memory per channel, in samples.
    pub memory_samples: u32,
}

impl ChannelInfo {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }
}

/// Record geometry handed to the board when it is armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmParams {
    pub channels: ChannelSelection,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub samples_per_record: u32,
    pub records_per_buffer: u32,
    pub records_per_acquisition: u32,
    /// AutoDMA mode flags, passed through to the board untouched.
    pub mode_flags: u32,
}

/// Operations the acquisition engine needs from a digitizer.
///
/// Implementations own the device handle. Every call may block on the device
/// except `post_buffer`.
pub trait BoardSession {
    /// Program clock, channels, trigger, external trigger, delay, timeout and
    /// auxiliary IO.
    fn apply(&mut self, config: &CaptureConfig) -> Result<(), BoardError>;

    fn channel_info(&mut self) -> Result<ChannelInfo, BoardError>;

    fn allocate_buffer(&mut self, slot: usize, bytes: usize) -> Result<DmaBuffer, BoardError> {
        DmaBuffer::new(slot, bytes)
    }

    fn arm(&mut self, params: &ArmParams) -> Result<(), BoardError>;

    /// Hand an empty buffer to the board. Must not block.
    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<(), BoardError>;

    /// Start sampling. At least one buffer must be posted.
    fn start_capture(&mut self) -> Result<(), BoardError>;

    /// Block until `buffer` has been filled, or fail with `BoardError::Timeout`.
    fn wait_buffer_ready(
        &mut self,
        buffer: &mut DmaBuffer,
        timeout: Duration,
    ) -> Result<(), BoardError>;

    /// Stop the acquisition and leave the armed state. Safe to call any
    /// number of times.
    fn abort(&mut self) -> Result<(), BoardError>;
}

impl<B: BoardSession + ?Sized> BoardSession for Box<B> {
    fn apply(&mut self, config: &CaptureConfig) -> Result<(), BoardError> {
        (**self).apply(config)
    }

    fn channel_info(&mut self) -> Result<ChannelInfo, BoardError> {
        (**self).channel_info()
    }

    fn allocate_buffer(&mut self, slot: usize, bytes: usize) -> Result<DmaBuffer, BoardError> {
        (**self).allocate_buffer(slot, bytes)
    }

    fn arm(&mut self, params: &ArmParams) -> Result<(), BoardError> {
        (**self).arm(params)
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<(), BoardError> {
        (**self).post_buffer(buffer)
    }

    fn start_capture(&mut self) -> Result<(), BoardError> {
        (**self).start_capture()
    }

    fn wait_buffer_ready(
        &mut self,
        buffer: &mut DmaBuffer,
        timeout: Duration,
    ) -> Result<(), BoardError> {
        (**self).wait_buffer_ready(buffer, timeout)
    }

    fn abort(&mut self) -> Result<(), BoardError> {
        (**self).abort()
    }
}
