use crate::{
    ArmParams, BoardError, BoardSession, CancelToken, CaptureConfig, ChannelInfo, DmaBuffer,
};
use log::{debug, trace};
use rand::Rng;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// One call made on a `SimBoard`, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoardCall {
    Apply,
    ChannelInfo,
    Allocate { slot: usize, bytes: usize },
    Arm(ArmParams),
    Post(usize),
    StartCapture,
    Wait(usize),
    Abort,
}

/// Shared record of the calls a `SimBoard` received. Clones see the same log.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<BoardCall>>>,
}

impl Journal {
    fn push(&self, call: BoardCall) {
        trace!("sim board: {:?}", call);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn abort_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == BoardCall::Abort)
            .count()
    }

    /// Pool slots in the order they were waited on.
    pub fn wait_slots(&self) -> Vec<usize> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                BoardCall::Wait(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    /// Pool slots in the order they were posted.
    pub fn post_slots(&self) -> Vec<usize> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                BoardCall::Post(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }
}

/// What the simulated hardware writes into a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimPattern {
    /// Deterministic samples, see [`SimBoard::ramp_sample`].
    Ramp,
    /// Uniform random bytes.
    Noise,
}

/// An in-process digitizer.
///
/// Posted buffers are filled strictly in post order, as the DMA engine does.
/// Waiting on a buffer that is not the oldest posted one, posting a buffer
/// twice, or starting without a posted buffer is reported as a contract error.
#[derive(Debug)]
pub struct SimBoard {
    info: ChannelInfo,
    pattern: SimPattern,
    fill_time: Duration,
    armed: bool,
    capturing: bool,
    posted: VecDeque<usize>,
    fills: u64,
    waits: usize,
    timeout_on_wait: Option<usize>,
    fail_allocation_at: Option<usize>,
    fail_post: Option<usize>,
    fail_start: bool,
    posts: usize,
    reject_apply: Option<String>,
    cancel_after: Option<(u64, CancelToken)>,
    journal: Journal,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    /// A 16 bit, two channel board with 64 MS of memory per channel.
    pub fn new() -> Self {
        Self {
            info: ChannelInfo {
                bits_per_sample: 16,
                memory_samples: 64 * 1024 * 1024,
            },
            pattern: SimPattern::Ramp,
            fill_time: Duration::ZERO,
            armed: false,
            capturing: false,
            posted: VecDeque::new(),
            fills: 0,
            waits: 0,
            timeout_on_wait: None,
            fail_allocation_at: None,
            fail_post: None,
            fail_start: false,
            posts: 0,
            reject_apply: None,
            cancel_after: None,
            journal: Journal::default(),
        }
    }

    pub fn with_channel_info(mut self, info: ChannelInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_pattern(mut self, pattern: SimPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Time the simulated hardware needs to fill one buffer.
    pub fn with_fill_time(mut self, fill_time: Duration) -> Self {
        self.fill_time = fill_time;
        self
    }

    /// Make the `n`th wait call (1-based) time out.
    pub fn timeout_on_wait(mut self, n: usize) -> Self {
        self.timeout_on_wait = Some(n);
        self
    }

    /// Make allocation of pool slot `slot` fail.
    pub fn fail_allocation_at(mut self, slot: usize) -> Self {
        self.fail_allocation_at = Some(slot);
        self
    }

    /// Make the `n`th post call (1-based) fail.
    pub fn fail_post(mut self, n: usize) -> Self {
        self.fail_post = Some(n);
        self
    }

    /// Make `start_capture` fail after its checks pass.
    pub fn fail_start_capture(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make `apply` reject the configuration.
    pub fn reject_apply(mut self, reason: &str) -> Self {
        self.reject_apply = Some(reason.to_string());
        self
    }

    /// Cancel `token` once `n` buffers have been filled.
    pub fn cancel_after(mut self, n: u64, token: CancelToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Sample `index` of the `fill`th buffer (0-based) in ramp mode.
    pub fn ramp_sample(fill: u64, index: usize) -> u16 {
        (fill as u16).wrapping_mul(1009).wrapping_add(index as u16)
    }

    fn fill(&mut self, buffer: &mut DmaBuffer) {
        let fill = self.fills;
        let bytes = buffer.as_mut_slice();
        match self.pattern {
            SimPattern::Ramp => {
                let mut chunks = bytes.chunks_exact_mut(2);
                for (i, chunk) in (&mut chunks).enumerate() {
                    chunk.copy_from_slice(&Self::ramp_sample(fill, i).to_le_bytes());
                }
                for b in chunks.into_remainder() {
                    *b = fill as u8;
                }
            }
            SimPattern::Noise => rand::rng().fill(bytes),
        }
        self.fills += 1;
    }
}

impl BoardSession for SimBoard {
    fn apply(&mut self, config: &CaptureConfig) -> Result<(), BoardError> {
        self.journal.push(BoardCall::Apply);
        if let Some(reason) = &self.reject_apply {
            return Err(BoardError::Rejected {
                call: "apply",
                reason: reason.clone(),
            });
        }
        debug!(
            "sim board: clock {} at {} S/s",
            config.clock.source, config.clock.sample_rate
        );
        Ok(())
    }

    fn channel_info(&mut self) -> Result<ChannelInfo, BoardError> {
        self.journal.push(BoardCall::ChannelInfo);
        Ok(self.info)
    }

    fn allocate_buffer(&mut self, slot: usize, bytes: usize) -> Result<DmaBuffer, BoardError> {
        self.journal.push(BoardCall::Allocate { slot, bytes });
        if self.fail_allocation_at == Some(slot) {
            return Err(BoardError::Allocation { bytes });
        }
        DmaBuffer::new(slot, bytes)
    }

    fn arm(&mut self, params: &ArmParams) -> Result<(), BoardError> {
        self.journal.push(BoardCall::Arm(*params));
        if params.samples_per_record == 0 || params.records_per_buffer == 0 {
            return Err(BoardError::Rejected {
                call: "arm",
                reason: "empty record geometry".to_string(),
            });
        }
        self.armed = true;
        self.posted.clear();
        Ok(())
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<(), BoardError> {
        let slot = buffer.slot();
        self.journal.push(BoardCall::Post(slot));
        self.posts += 1;
        if self.fail_post == Some(self.posts) {
            return Err(BoardError::Rejected {
                call: "post_buffer",
                reason: format!("injected failure on post {}", self.posts),
            });
        }
        if !self.armed {
            return Err(BoardError::Contract(format!(
                "buffer {} posted to a board that is not armed",
                slot
            )));
        }
        if self.posted.contains(&slot) {
            return Err(BoardError::Contract(format!(
                "buffer {} posted twice",
                slot
            )));
        }
        self.posted.push_back(slot);
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), BoardError> {
        self.journal.push(BoardCall::StartCapture);
        if !self.armed || self.posted.is_empty() {
            return Err(BoardError::Contract(
                "capture started without a posted buffer".to_string(),
            ));
        }
        if self.fail_start {
            return Err(BoardError::Rejected {
                call: "start_capture",
                reason: "injected failure".to_string(),
            });
        }
        self.capturing = true;
        Ok(())
    }

    fn wait_buffer_ready(
        &mut self,
        buffer: &mut DmaBuffer,
        timeout: Duration,
    ) -> Result<(), BoardError> {
        let slot = buffer.slot();
        self.journal.push(BoardCall::Wait(slot));
        self.waits += 1;
        if !self.capturing {
            return Err(BoardError::Contract(format!(
                "wait on buffer {} while not capturing",
                slot
            )));
        }
        if self.timeout_on_wait == Some(self.waits) {
            return Err(BoardError::Timeout(timeout));
        }
        match self.posted.front() {
            Some(&next) if next == slot => {}
            Some(&next) => {
                return Err(BoardError::Contract(format!(
                    "wait on buffer {} but buffer {} fills first",
                    slot, next
                )))
            }
            None => {
                return Err(BoardError::Contract(format!(
                    "wait on buffer {} with nothing posted",
                    slot
                )))
            }
        }
        if self.fill_time > timeout {
            thread::sleep(timeout);
            return Err(BoardError::Timeout(timeout));
        }
        if !self.fill_time.is_zero() {
            thread::sleep(self.fill_time);
        }
        self.posted.pop_front();
        self.fill(buffer);

        if let Some((n, token)) = &self.cancel_after {
            if self.fills == *n {
                token.cancel();
            }
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), BoardError> {
        self.journal.push(BoardCall::Abort);
        self.armed = false;
        self.capturing = false;
        self.posted.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelSelection;

    fn arm_params() -> ArmParams {
        ArmParams {
            channels: ChannelSelection::A,
            pre_trigger_samples: 0,
            post_trigger_samples: 4,
            samples_per_record: 4,
            records_per_buffer: 1,
            records_per_acquisition: 2,
            mode_flags: 0,
        }
    }

    #[test]
    fn fills_in_post_order() {
        let mut board = SimBoard::new();
        let mut a = board.allocate_buffer(0, 8).unwrap();
        let mut b = board.allocate_buffer(1, 8).unwrap();
        board.arm(&arm_params()).unwrap();
        board.post_buffer(&mut a).unwrap();
        board.post_buffer(&mut b).unwrap();
        board.start_capture().unwrap();

        let timeout = Duration::from_millis(10);
        assert!(matches!(
            board.wait_buffer_ready(&mut b, timeout),
            Err(BoardError::Contract(_))
        ));
        board.wait_buffer_ready(&mut a, timeout).unwrap();
        assert_eq!(&a.as_slice()[..2], &SimBoard::ramp_sample(0, 0).to_le_bytes());
        board.wait_buffer_ready(&mut b, timeout).unwrap();
        assert_eq!(&b.as_slice()[2..4], &SimBoard::ramp_sample(1, 1).to_le_bytes());
    }

    #[test]
    fn double_post_is_a_contract_error() {
        let mut board = SimBoard::new();
        let mut a = board.allocate_buffer(0, 8).unwrap();
        board.arm(&arm_params()).unwrap();
        board.post_buffer(&mut a).unwrap();
        assert!(matches!(
            board.post_buffer(&mut a),
            Err(BoardError::Contract(_))
        ));
    }

    #[test]
    fn start_needs_posted_buffer() {
        let mut board = SimBoard::new();
        board.arm(&arm_params()).unwrap();
        assert!(board.start_capture().is_err());
    }

    #[test]
    fn injected_post_failure_hits_the_nth_post() {
        let mut board = SimBoard::new().fail_post(2);
        let mut a = board.allocate_buffer(0, 8).unwrap();
        let mut b = board.allocate_buffer(1, 8).unwrap();
        board.arm(&arm_params()).unwrap();
        board.post_buffer(&mut a).unwrap();
        assert!(matches!(
            board.post_buffer(&mut b),
            Err(BoardError::Rejected { call: "post_buffer", .. })
        ));
    }

    #[test]
    fn abort_is_idempotent() {
        let mut board = SimBoard::new();
        let journal = board.journal();
        board.abort().unwrap();
        board.abort().unwrap();
        assert_eq!(journal.abort_count(), 2);
    }
}
