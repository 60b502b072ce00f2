use crate::{
    atsapi, post_trigger_samples, ArmParams, BoardError, BoardSession, ByteSink, CaptureConfig,
    ChannelInfo, ChannelSelection, ConfigError, DmaBuffer, FileSink, MemorySink, RunStats,
    SinkWarning,
};
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::{
    fmt, io,
    ops::{Deref, DerefMut},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, TryLockError,
    },
    time::{Duration, Instant},
};
use thiserror::Error;

/// How long a single buffer wait may block before the run fails.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// No-pre-trigger AutoDMA with the capture started by the external trigger.
pub const DEFAULT_MODE_FLAGS: u32 = atsapi::ADMA_EXTERNAL_STARTCAPTURE | atsapi::ADMA_NPT;

/// Cooperative stop signal, checked between buffer waits.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a failed sink write does to the run. Reposting the buffer happens
/// first in both cases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Record a `SinkWarning` and keep capturing.
    #[default]
    Warn,
    /// Fail the run.
    Fatal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    pub pre_trigger_samples: u32,
    /// Post-trigger part of a record, in seconds.
    pub record_length_secs: f64,
    pub records_per_buffer: u32,
    pub buffers_per_acquisition: u32,
    /// Number of DMA buffers in the pool.
    pub buffer_count: u32,
    pub channels: ChannelSelection,
    pub save_data: bool,
    pub filename: Option<PathBuf>,
    pub return_data: bool,
    pub wait_timeout: Duration,
    pub sink_policy: SinkPolicy,
    pub mode_flags: u32,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            pre_trigger_samples: 0,
            record_length_secs: 1e-6,
            records_per_buffer: 1,
            buffers_per_acquisition: 1,
            buffer_count: 1,
            channels: ChannelSelection::A,
            save_data: true,
            filename: None,
            return_data: false,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            sink_policy: SinkPolicy::Warn,
            mode_flags: DEFAULT_MODE_FLAGS,
        }
    }
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidRequest(msg.to_string()));
        if self.record_length_secs <= 0.0 || !self.record_length_secs.is_finite() {
            return invalid("record length must be positive");
        }
        if self.records_per_buffer == 0 {
            return invalid("records per buffer must be at least 1");
        }
        if self.buffers_per_acquisition == 0 {
            return invalid("buffers per acquisition must be at least 1");
        }
        if self.buffer_count == 0 {
            return invalid("buffer pool must hold at least 1 buffer");
        }
        if self
            .records_per_buffer
            .checked_mul(self.buffers_per_acquisition)
            .is_none()
        {
            return invalid("records per acquisition overflows");
        }
        if self.wait_timeout.is_zero() {
            return invalid("wait timeout must be non-zero");
        }
        Ok(())
    }
}

/// Sizes derived from a run request and the board's sample depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferGeometry {
    pub bytes_per_sample: usize,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub samples_per_record: u32,
    pub records_per_buffer: u32,
    pub channel_count: usize,
    pub bytes_per_buffer: usize,
}

impl BufferGeometry {
    pub fn new(
        request: &RunRequest,
        sample_rate_hz: f64,
        info: ChannelInfo,
    ) -> Result<Self, ConfigError> {
        let too_large = || ConfigError::InvalidRequest("record does not fit the board".to_string());
        let post = post_trigger_samples(request.record_length_secs, sample_rate_hz);
        let post = u32::try_from(post).map_err(|_| too_large())?;
        let samples_per_record = request
            .pre_trigger_samples
            .checked_add(post)
            .ok_or_else(too_large)?;
        if samples_per_record == 0 {
            return Err(ConfigError::InvalidRequest(
                "a record needs at least one sample".to_string(),
            ));
        }
        let bytes_per_sample = info.bytes_per_sample();
        let channel_count = request.channels.count();
        let bytes_per_buffer = bytes_per_sample
            .checked_mul(samples_per_record as usize)
            .and_then(|b| b.checked_mul(request.records_per_buffer as usize))
            .and_then(|b| b.checked_mul(channel_count))
            .filter(|&b| b <= u32::MAX as usize)
            .ok_or_else(too_large)?;

        Ok(Self {
            bytes_per_sample,
            pre_trigger_samples: request.pre_trigger_samples,
            post_trigger_samples: post,
            samples_per_record,
            records_per_buffer: request.records_per_buffer,
            channel_count,
            bytes_per_buffer,
        })
    }

    pub fn bytes_per_record(&self) -> usize {
        self.bytes_per_sample * self.samples_per_record as usize
    }

    fn arm_params(&self, request: &RunRequest) -> ArmParams {
        ArmParams {
            channels: request.channels,
            pre_trigger_samples: self.pre_trigger_samples,
            post_trigger_samples: self.post_trigger_samples,
            samples_per_record: self.samples_per_record,
            records_per_buffer: self.records_per_buffer,
            records_per_acquisition: request.records_per_buffer * request.buffers_per_acquisition,
            mode_flags: request.mode_flags,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Configured,
    Armed,
    Capturing,
    Completed,
    Aborted,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a run that did not fail ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Aborted,
}

/// Per-buffer progress, sent while capturing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub buffers_completed: usize,
    pub buffers_per_acquisition: usize,
    pub bytes_transferred: u64,
    pub slot: usize,
    pub wait: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub end: RunEnd,
    pub stats: RunStats,
    pub geometry: BufferGeometry,
    /// Copies of every completed buffer in completion order, when requested.
    pub data: Option<Vec<Vec<u8>>>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("board rejected the capture configuration: {0}")]
    HardwareConfig(#[source] BoardError),
    #[error("DMA buffer allocation failed: {0}")]
    Allocation(#[source] BoardError),
    #[error(
        "timed out waiting on buffer slot {slot} after {completed} completed buffers",
        completed = .stats.buffers_completed
    )]
    Timeout {
        slot: usize,
        stats: RunStats,
        #[source]
        source: BoardError,
    },
    #[error(
        "{stage} failed after {completed} completed buffers: {source}",
        completed = .stats.buffers_completed
    )]
    Board {
        stage: &'static str,
        slot: Option<usize>,
        stats: RunStats,
        #[source]
        source: BoardError,
    },
    #[error("an acquisition is already running on this board")]
    ConcurrentRun,
    #[error("could not open data file {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing buffer {buffer} failed: {source}")]
    Sink {
        buffer: usize,
        stats: RunStats,
        #[source]
        source: io::Error,
    },
}

impl AcquisitionError {
    /// Statistics up to the failure, for errors raised after capture started.
    pub fn partial_stats(&self) -> Option<&RunStats> {
        match self {
            AcquisitionError::Timeout { stats, .. }
            | AcquisitionError::Board { stats, .. }
            | AcquisitionError::Sink { stats, .. } => Some(stats),
            _ => None,
        }
    }

    pub fn buffers_completed(&self) -> usize {
        self.partial_stats().map_or(0, |s| s.buffers_completed)
    }
}

/// Failures inside the capture loop, before they are given run statistics.
enum LoopError {
    Wait { slot: usize, source: BoardError },
    Post { slot: usize, source: BoardError },
    Sink { buffer: usize, source: io::Error },
}

/// Holds the board between arming and the end of a run. `abort` is called
/// exactly once: by `release`, or on drop if the run unwinds early.
struct ArmedSession<'a, B: BoardSession + ?Sized> {
    board: &'a mut B,
    released: bool,
}

impl<'a, B: BoardSession + ?Sized> ArmedSession<'a, B> {
    fn new(board: &'a mut B) -> Self {
        Self {
            board,
            released: false,
        }
    }

    fn release(&mut self) -> Result<Duration, BoardError> {
        if self.released {
            return Ok(Duration::ZERO);
        }
        self.released = true;
        let start = Instant::now();
        self.board.abort()?;
        Ok(start.elapsed())
    }
}

impl<B: BoardSession + ?Sized> Deref for ArmedSession<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.board
    }
}

impl<B: BoardSession + ?Sized> DerefMut for ArmedSession<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.board
    }
}

impl<B: BoardSession + ?Sized> Drop for ArmedSession<'_, B> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.board.abort() {
                error!("abort during cleanup failed: {}", e);
            }
        }
    }
}

/// Streaming acquisition engine for one board.
///
/// A run programs the board, allocates a circular pool of DMA buffers, and
/// then alternates between waiting on the oldest posted buffer, draining it
/// to the sinks and reposting it. Buffer `n` always lives in slot
/// `n % pool_size`, so a slot is reposted `pool_size - 1` buffer fills before
/// the board needs it again.
pub struct Digitizer<B: BoardSession> {
    board: Mutex<B>,
    config: CaptureConfig,
    state: Mutex<EngineState>,
    progress: Option<Sender<Progress>>,
}

impl<B: BoardSession> Digitizer<B> {
    pub fn new(board: B, config: CaptureConfig) -> Self {
        Self {
            board: Mutex::new(board),
            config,
            state: Mutex::new(EngineState::Idle),
            progress: None,
        }
    }

    /// Send a `Progress` message for every completed buffer.
    pub fn with_progress(mut self, tx: Sender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn into_board(self) -> B {
        self.board.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Abort any acquisition on the board. Has no effect on an idle board.
    pub fn abort(&self) -> Result<(), AcquisitionError> {
        let mut board = self.lock_board()?;
        board.abort().map_err(|source| AcquisitionError::Board {
            stage: "abort",
            slot: None,
            stats: RunStats::default(),
            source,
        })
    }

    /// Capture `request.buffers_per_acquisition` buffers, writing them to
    /// `request.filename` when `save_data` is set.
    pub fn run(
        &self,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<RunReport, AcquisitionError> {
        let mut board = self.lock_board()?;
        request.validate()?;

        let mut file = match (request.save_data, &request.filename) {
            (true, Some(path)) => {
                Some(
                    FileSink::create(path).map_err(|source| AcquisitionError::SinkOpen {
                        path: path.clone(),
                        source,
                    })?,
                )
            }
            (true, None) => {
                return Err(ConfigError::InvalidRequest(
                    "save_data needs a file name".to_string(),
                )
                .into())
            }
            (false, _) => None,
        };

        let sink = file.as_mut().map(|f| f as &mut dyn ByteSink);
        let result = self.execute(&mut *board, request, cancel, sink);

        let path = file.and_then(|f| match f.finish() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("closing data file failed: {}", e);
                None
            }
        });
        result.map(|mut report| {
            report.file = path;
            report
        })
    }

    /// Like [`Digitizer::run`], with the caller supplying the byte sink.
    /// `request.save_data` and `request.filename` are ignored.
    pub fn run_with_sink(
        &self,
        request: &RunRequest,
        cancel: &CancelToken,
        sink: Option<&mut dyn ByteSink>,
    ) -> Result<RunReport, AcquisitionError> {
        let mut board = self.lock_board()?;
        request.validate()?;
        self.execute(&mut *board, request, cancel, sink)
    }

    fn lock_board(&self) -> Result<MutexGuard<'_, B>, AcquisitionError> {
        match self.board.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(AcquisitionError::ConcurrentRun),
            Err(TryLockError::Poisoned(e)) => Ok(e.into_inner()),
        }
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!("acquisition state {} -> {}", *state, next);
        *state = next;
    }

    fn execute(
        &self,
        board: &mut B,
        request: &RunRequest,
        cancel: &CancelToken,
        sink: Option<&mut dyn ByteSink>,
    ) -> Result<RunReport, AcquisitionError> {
        self.set_state(EngineState::Idle);
        let result = self.execute_armed(board, request, cancel, sink);
        match &result {
            Ok(report) => self.set_state(match report.end {
                RunEnd::Completed => EngineState::Completed,
                RunEnd::Aborted => EngineState::Aborted,
            }),
            Err(e) => {
                error!("acquisition failed: {}", e);
                self.set_state(EngineState::Failed);
            }
        }
        self.set_state(EngineState::Idle);
        result
    }

    fn execute_armed(
        &self,
        board: &mut B,
        request: &RunRequest,
        cancel: &CancelToken,
        mut sink: Option<&mut dyn ByteSink>,
    ) -> Result<RunReport, AcquisitionError> {
        let stage_error = |stage: &'static str, source: BoardError| AcquisitionError::Board {
            stage,
            slot: None,
            stats: RunStats::default(),
            source,
        };

        // Must outlive `session`: the board is aborted before any posted
        // buffer is freed.
        let mut pool: Vec<DmaBuffer> = Vec::with_capacity(request.buffer_count as usize);

        // From here on every exit path aborts the board exactly once.
        let mut session = ArmedSession::new(board);

        session
            .apply(&self.config)
            .map_err(AcquisitionError::HardwareConfig)?;
        self.set_state(EngineState::Configured);

        let info = session
            .channel_info()
            .map_err(|e| stage_error("channel_info", e))?;
        let geometry = BufferGeometry::new(request, self.config.sample_rate_hz(), info)?;
        debug!("buffer geometry: {:?}", geometry);

        let pool_bytes = geometry.bytes_per_buffer as u64 * request.buffer_count as u64;
        let memory_bytes = info.memory_samples as u64
            * geometry.bytes_per_sample as u64
            * geometry.channel_count as u64;
        if pool_bytes > memory_bytes {
            warn!(
                "buffer pool of {} bytes exceeds {} bytes of on-board memory",
                pool_bytes, memory_bytes
            );
        }

        for slot in 0..request.buffer_count as usize {
            let buffer = session
                .allocate_buffer(slot, geometry.bytes_per_buffer)
                .map_err(AcquisitionError::Allocation)?;
            pool.push(buffer);
        }

        session
            .arm(&geometry.arm_params(request))
            .map_err(|e| stage_error("arm", e))?;
        for buffer in pool.iter_mut() {
            let slot = buffer.slot();
            session
                .post_buffer(buffer)
                .map_err(|source| AcquisitionError::Board {
                    stage: "post_buffer",
                    slot: Some(slot),
                    stats: RunStats::default(),
                    source,
                })?;
        }
        self.set_state(EngineState::Armed);

        let mut stats = RunStats {
            records_per_buffer: request.records_per_buffer as usize,
            ..Default::default()
        };
        let mut memory = request.return_data.then(MemorySink::new);

        let start = Instant::now();
        session
            .start_capture()
            .map_err(|e| stage_error("start_capture", e))?;
        self.set_state(EngineState::Capturing);
        info!(
            "Capturing {} buffers of {} bytes with {} in the pool",
            request.buffers_per_acquisition, geometry.bytes_per_buffer, request.buffer_count
        );

        let outcome = self.capture(
            &mut session,
            &mut pool,
            request,
            cancel,
            &mut stats,
            &mut sink,
            &mut memory,
        );

        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.flush_sink() {
                warn!("flushing data sink failed: {}", e);
                stats.sink_warnings.push(SinkWarning {
                    buffer: None,
                    message: e.to_string(),
                });
            }
        }

        let released = session.release();
        stats.elapsed = start.elapsed();
        drop(pool);

        match released {
            Ok(abort_time) => stats.abort_time = abort_time,
            Err(source) => {
                if outcome.is_ok() {
                    return Err(AcquisitionError::Board {
                        stage: "abort",
                        slot: None,
                        stats,
                        source,
                    });
                }
                error!("abort after failure also failed: {}", source);
            }
        }

        let end = match outcome {
            Ok(end) => end,
            Err(LoopError::Wait { slot, source }) => {
                return Err(match source {
                    BoardError::Timeout(_) => AcquisitionError::Timeout {
                        slot,
                        stats,
                        source,
                    },
                    source => AcquisitionError::Board {
                        stage: "wait_buffer_ready",
                        slot: Some(slot),
                        stats,
                        source,
                    },
                })
            }
            Err(LoopError::Post { slot, source }) => {
                return Err(AcquisitionError::Board {
                    stage: "post_buffer",
                    slot: Some(slot),
                    stats,
                    source,
                })
            }
            Err(LoopError::Sink { buffer, source }) => {
                return Err(AcquisitionError::Sink {
                    buffer,
                    stats,
                    source,
                })
            }
        };

        match end {
            RunEnd::Completed => info!("Acquisition complete\n{}", stats),
            RunEnd::Aborted => info!(
                "Acquisition aborted after {} buffers\n{}",
                stats.buffers_completed, stats
            ),
        }

        Ok(RunReport {
            end,
            stats,
            geometry,
            data: memory.map(MemorySink::into_buffers),
            file: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn capture(
        &self,
        session: &mut ArmedSession<'_, B>,
        pool: &mut [DmaBuffer],
        request: &RunRequest,
        cancel: &CancelToken,
        stats: &mut RunStats,
        sink: &mut Option<&mut dyn ByteSink>,
        memory: &mut Option<MemorySink>,
    ) -> Result<RunEnd, LoopError> {
        let target = request.buffers_per_acquisition as usize;

        while stats.buffers_completed < target {
            if cancel.is_cancelled() {
                info!("Stop requested");
                return Ok(RunEnd::Aborted);
            }

            let slot = stats.buffers_completed % pool.len();
            let buffer = &mut pool[slot];

            let t_wait = Instant::now();
            let waited = session.wait_buffer_ready(buffer, request.wait_timeout);
            let wait = t_wait.elapsed();
            stats.wait_time += wait;
            waited.map_err(|source| LoopError::Wait { slot, source })?;

            let index = stats.buffers_completed;
            stats.buffers_completed += 1;
            stats.bytes_transferred += buffer.len() as u64;

            // The board is filling the other posted buffers meanwhile; this
            // one has to be back in the queue before they run out.
            let t_drain = Instant::now();
            let mut sink_error = None;
            if let Some(sink) = sink.as_mut() {
                if let Err(e) = sink.append_bytes(buffer.as_slice()) {
                    warn!("writing buffer {} (slot {}) failed: {}", index, slot, e);
                    match request.sink_policy {
                        SinkPolicy::Warn => stats.sink_warnings.push(SinkWarning {
                            buffer: Some(index),
                            message: e.to_string(),
                        }),
                        SinkPolicy::Fatal => sink_error = Some(e),
                    }
                }
            }
            if let Some(memory) = memory.as_mut() {
                memory.append_copy(buffer.as_slice());
            }
            stats.drain_time += t_drain.elapsed();

            session
                .post_buffer(buffer)
                .map_err(|source| LoopError::Post { slot, source })?;

            if let Some(source) = sink_error {
                return Err(LoopError::Sink {
                    buffer: index,
                    source,
                });
            }

            if let Some(tx) = &self.progress {
                let _ = tx.send(Progress {
                    buffers_completed: stats.buffers_completed,
                    buffers_per_acquisition: target,
                    bytes_transferred: stats.bytes_transferred,
                    slot,
                    wait,
                });
            }
        }

        Ok(RunEnd::Completed)
    }
}
