use assert_matches::assert_matches;
use ats_daq::*;
use std::{
    fs, io,
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const SAMPLES_PER_RECORD: usize = 180;
const BYTES_PER_BUFFER: usize = SAMPLES_PER_RECORD * 2;

fn digitizer(board: SimBoard) -> Digitizer<SimBoard> {
    let config = CaptureConfig::from_params(&CaptureParams::default()).unwrap();
    Digitizer::new(board, config)
}

fn request(buffers: u32, pool: u32) -> RunRequest {
    RunRequest {
        buffers_per_acquisition: buffers,
        buffer_count: pool,
        save_data: false,
        wait_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    static N: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "ats_daq_acquisition_{}_{}_{}",
        name,
        process::id(),
        N.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn ramp_buffer(fill: u64, samples: usize) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| SimBoard::ramp_sample(fill, i).to_le_bytes())
        .collect()
}

/// Calls made after `StartCapture`.
fn capture_calls(journal: &Journal) -> Vec<BoardCall> {
    journal
        .calls()
        .into_iter()
        .skip_while(|c| *c != BoardCall::StartCapture)
        .skip(1)
        .collect()
}

/// Fails the `fail_on`th append (0-based).
struct FailingSink {
    fail_on: usize,
    appended: usize,
    bytes: Vec<u8>,
}

impl ByteSink for FailingSink {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let n = self.appended;
        self.appended += 1;
        if n == self.fail_on {
            return Err(io::Error::other("disk full"));
        }
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }
}

#[test]
fn four_buffers_through_a_pool_of_two() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    let report = dig.run(&request(4, 2), &CancelToken::new()).unwrap();

    assert_eq!(report.end, RunEnd::Completed);
    assert_eq!(report.geometry.samples_per_record, SAMPLES_PER_RECORD as u32);
    assert_eq!(report.geometry.bytes_per_buffer, BYTES_PER_BUFFER);
    assert_eq!(report.stats.buffers_completed, 4);
    assert_eq!(report.stats.records_completed(), 4);
    assert_eq!(report.stats.bytes_transferred, 4 * BYTES_PER_BUFFER as u64);
    assert_eq!(journal.wait_slots(), vec![0, 1, 0, 1]);
    assert_eq!(journal.abort_count(), 1);
    assert_eq!(dig.state(), EngineState::Idle);
}

#[test]
fn each_buffer_is_reposted_before_its_slot_is_waited_on_again() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    dig.run(&request(4, 2), &CancelToken::new()).unwrap();

    assert_eq!(
        capture_calls(&journal),
        vec![
            BoardCall::Wait(0),
            BoardCall::Post(0),
            BoardCall::Wait(1),
            BoardCall::Post(1),
            BoardCall::Wait(0),
            BoardCall::Post(0),
            BoardCall::Wait(1),
            BoardCall::Post(1),
            BoardCall::Abort,
        ]
    );
}

#[test]
fn setup_runs_in_order() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    dig.run(&request(1, 2), &CancelToken::new()).unwrap();

    let calls = journal.calls();
    assert_eq!(calls[0], BoardCall::Apply);
    assert_eq!(calls[1], BoardCall::ChannelInfo);
    assert_eq!(
        calls[2],
        BoardCall::Allocate {
            slot: 0,
            bytes: BYTES_PER_BUFFER
        }
    );
    assert_eq!(
        calls[3],
        BoardCall::Allocate {
            slot: 1,
            bytes: BYTES_PER_BUFFER
        }
    );
    assert_matches!(calls[4], BoardCall::Arm(_));
    assert_eq!(calls[5], BoardCall::Post(0));
    assert_eq!(calls[6], BoardCall::Post(1));
    assert_eq!(calls[7], BoardCall::StartCapture);
}

#[test]
fn timeout_on_third_wait_keeps_partial_stats() {
    let board = SimBoard::new().timeout_on_wait(3);
    let journal = board.journal();
    let dig = digitizer(board);

    let err = dig.run(&request(4, 2), &CancelToken::new()).unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Timeout { slot: 0, ref stats, .. } if stats.buffers_completed == 2
    );
    assert_eq!(err.buffers_completed(), 2);
    assert_eq!(journal.abort_count(), 1);
    assert_eq!(dig.state(), EngineState::Idle);
}

#[test]
fn slow_fill_times_out() {
    let board = SimBoard::new().with_fill_time(Duration::from_millis(50));
    let journal = board.journal();
    let dig = digitizer(board);
    let req = RunRequest {
        wait_timeout: Duration::from_millis(10),
        ..request(2, 2)
    };

    let err = dig.run(&req, &CancelToken::new()).unwrap_err();

    assert_matches!(err, AcquisitionError::Timeout { slot: 0, .. });
    assert_eq!(err.buffers_completed(), 0);
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn stop_request_ends_run_as_aborted() {
    let cancel = CancelToken::new();
    let board = SimBoard::new().cancel_after(3, cancel.clone());
    let journal = board.journal();
    let dig = digitizer(board);

    let report = dig.run(&request(10, 2), &cancel).unwrap();

    assert_eq!(report.end, RunEnd::Aborted);
    assert_eq!(report.stats.buffers_completed, 3);
    assert_eq!(journal.wait_slots(), vec![0, 1, 0]);
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn stop_before_start_captures_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    let report = dig.run(&request(5, 2), &cancel).unwrap();

    assert_eq!(report.end, RunEnd::Aborted);
    assert_eq!(report.stats.buffers_completed, 0);
    assert!(journal.wait_slots().is_empty());
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn file_holds_buffers_in_completion_order() {
    let dir = scratch_dir("file");
    let path = dir.join("run0.bin");
    let dig = digitizer(SimBoard::new());
    let req = RunRequest {
        save_data: true,
        filename: Some(path.clone()),
        ..request(3, 2)
    };

    let report = dig.run(&req, &CancelToken::new()).unwrap();

    assert_eq!(report.file.as_ref(), Some(&path));
    let expected: Vec<u8> = (0..3)
        .flat_map(|fill| ramp_buffer(fill, SAMPLES_PER_RECORD))
        .collect();
    assert_eq!(fs::read(&path).unwrap(), expected);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn unopenable_file_fails_before_touching_the_board() {
    let dir = scratch_dir("unopenable");
    fs::create_dir_all(&dir).unwrap();
    let blocker = dir.join("not_a_dir");
    fs::write(&blocker, b"x").unwrap();

    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);
    let req = RunRequest {
        save_data: true,
        filename: Some(blocker.join("run0.bin")),
        ..request(1, 1)
    };

    let err = dig.run(&req, &CancelToken::new()).unwrap_err();

    assert_matches!(err, AcquisitionError::SinkOpen { .. });
    assert!(journal.calls().is_empty());
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn failed_write_is_a_warning_by_default() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);
    let mut sink = FailingSink {
        fail_on: 1,
        appended: 0,
        bytes: Vec::new(),
    };

    let report = dig
        .run_with_sink(&request(4, 2), &CancelToken::new(), Some(&mut sink))
        .unwrap();

    assert_eq!(report.end, RunEnd::Completed);
    assert_eq!(report.stats.buffers_completed, 4);
    assert_eq!(report.stats.sink_warnings.len(), 1);
    assert_eq!(report.stats.sink_warnings[0].buffer, Some(1));
    assert_eq!(sink.bytes.len(), 3 * BYTES_PER_BUFFER);
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn failed_write_stops_the_run_under_fatal_policy() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);
    let mut sink = FailingSink {
        fail_on: 1,
        appended: 0,
        bytes: Vec::new(),
    };
    let req = RunRequest {
        sink_policy: SinkPolicy::Fatal,
        ..request(4, 2)
    };

    let err = dig
        .run_with_sink(&req, &CancelToken::new(), Some(&mut sink))
        .unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Sink { buffer: 1, ref stats, .. } if stats.buffers_completed == 2
    );
    // The failed buffer still went back to the board before the abort.
    assert_eq!(
        capture_calls(&journal),
        vec![
            BoardCall::Wait(0),
            BoardCall::Post(0),
            BoardCall::Wait(1),
            BoardCall::Post(1),
            BoardCall::Abort,
        ]
    );
}

#[test]
fn failed_setup_post_aborts_once() {
    let board = SimBoard::new().fail_post(2);
    let journal = board.journal();
    let dig = digitizer(board);

    let err = dig.run(&request(4, 3), &CancelToken::new()).unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Board {
            stage: "post_buffer",
            slot: Some(1),
            ..
        }
    );
    assert!(journal.wait_slots().is_empty());
    assert!(!journal.calls().contains(&BoardCall::StartCapture));
    assert_eq!(journal.abort_count(), 1);
    assert_eq!(dig.state(), EngineState::Idle);
}

#[test]
fn failed_start_aborts_once() {
    let board = SimBoard::new().fail_start_capture();
    let journal = board.journal();
    let dig = digitizer(board);

    let err = dig.run(&request(4, 2), &CancelToken::new()).unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Board {
            stage: "start_capture",
            slot: None,
            ..
        }
    );
    assert_eq!(err.buffers_completed(), 0);
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn failed_repost_keeps_partial_stats() {
    // Two setup posts, then the repost of the first completed buffer fails.
    let board = SimBoard::new().fail_post(3);
    let journal = board.journal();
    let dig = digitizer(board);

    let err = dig.run(&request(4, 2), &CancelToken::new()).unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Board {
            stage: "post_buffer",
            slot: Some(0),
            ref stats,
            ..
        } if stats.buffers_completed == 1
    );
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn vec_sink_collects_every_buffer() {
    let dig = digitizer(SimBoard::new());
    let mut bytes: Vec<u8> = Vec::new();

    dig.run_with_sink(&request(2, 1), &CancelToken::new(), Some(&mut bytes))
        .unwrap();

    let mut expected = ramp_buffer(0, SAMPLES_PER_RECORD);
    expected.extend(ramp_buffer(1, SAMPLES_PER_RECORD));
    assert_eq!(bytes, expected);
}

#[test]
fn pool_larger_than_acquisition() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    let report = dig.run(&request(2, 5), &CancelToken::new()).unwrap();

    assert_eq!(report.end, RunEnd::Completed);
    assert_eq!(journal.wait_slots(), vec![0, 1]);
    assert_eq!(journal.post_slots(), vec![0, 1, 2, 3, 4, 0, 1]);
    assert_eq!(journal.abort_count(), 1);
}

#[test]
fn single_buffer_pool_reuses_slot_zero() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    dig.run(&request(3, 1), &CancelToken::new()).unwrap();

    assert_eq!(journal.wait_slots(), vec![0, 0, 0]);
}

#[test]
fn both_channels_interleave_into_one_buffer() {
    let dig = digitizer(SimBoard::new());
    let req = RunRequest {
        channels: ChannelSelection::AB,
        records_per_buffer: 2,
        return_data: true,
        ..request(1, 1)
    };

    let report = dig.run(&req, &CancelToken::new()).unwrap();

    assert_eq!(report.geometry.channel_count, 2);
    assert_eq!(report.geometry.bytes_per_buffer, BYTES_PER_BUFFER * 2 * 2);
    let data = report.data.unwrap();
    let rows = deinterleave(&data[0], report.geometry.bytes_per_sample, 2).unwrap();
    assert_eq!(rows.shape(), &[2, SAMPLES_PER_RECORD * 2]);
    assert_eq!(rows[[0, 1]], SimBoard::ramp_sample(0, 2));
    assert_eq!(rows[[1, 1]], SimBoard::ramp_sample(0, 3));
}

#[test]
fn second_run_while_capturing_is_refused() {
    let board = SimBoard::new().with_fill_time(Duration::from_millis(20));
    let dig = Arc::new(digitizer(board));
    let req = RunRequest {
        wait_timeout: Duration::from_secs(1),
        ..request(10, 2)
    };

    let running = {
        let dig = Arc::clone(&dig);
        let req = req.clone();
        thread::spawn(move || dig.run(&req, &CancelToken::new()))
    };

    let deadline = Instant::now() + Duration::from_secs(2);
    while dig.state() != EngineState::Capturing && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(dig.state(), EngineState::Capturing);

    assert_matches!(
        dig.run(&req, &CancelToken::new()),
        Err(AcquisitionError::ConcurrentRun)
    );
    assert_matches!(dig.abort(), Err(AcquisitionError::ConcurrentRun));

    let report = running.join().unwrap().unwrap();
    assert_eq!(report.end, RunEnd::Completed);
    assert_eq!(report.stats.buffers_completed, 10);
}

#[test]
fn abort_after_a_run_is_harmless() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    dig.run(&request(2, 2), &CancelToken::new()).unwrap();
    dig.abort().unwrap();
    dig.abort().unwrap();

    assert_eq!(journal.abort_count(), 3);
    assert_eq!(dig.state(), EngineState::Idle);
}

#[test]
fn runs_can_be_repeated() {
    let board = SimBoard::new();
    let journal = board.journal();
    let dig = digitizer(board);

    let first = dig.run(&request(2, 2), &CancelToken::new()).unwrap();
    let second = dig.run(&request(3, 2), &CancelToken::new()).unwrap();

    assert_eq!(first.stats.buffers_completed, 2);
    assert_eq!(second.stats.buffers_completed, 3);
    assert_eq!(journal.abort_count(), 2);
    assert_eq!(
        journal
            .calls()
            .iter()
            .filter(|c| **c == BoardCall::Apply)
            .count(),
        2
    );
}
