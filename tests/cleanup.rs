//! Buffers posted to a board must stay allocated until the board is aborted,
//! whichever way a run ends. A counting allocator records how many pool
//! buffers of a watched size were freed by the time `abort` ran.

use assert_matches::assert_matches;
use ats_daq::*;
use std::{
    alloc::{GlobalAlloc, Layout, System},
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

const BYTES_PER_RECORD: usize = 180 * 2;

// Each test uses its own buffer size so that tests running in parallel do
// not count each other's buffers.
const WATCHED_RECORDS: [u32; 3] = [7, 11, 13];

static FREED: [AtomicUsize; 3] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        System.alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() >= 4096 {
            for (i, records) in WATCHED_RECORDS.iter().enumerate() {
                if layout.size() == *records as usize * BYTES_PER_RECORD {
                    FREED[i].fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc;

/// `SimBoard` that notes how many watched buffers were already freed each
/// time it is aborted.
struct AbortWitness {
    inner: SimBoard,
    watch: usize,
    freed_at_abort: Arc<Mutex<Vec<usize>>>,
}

impl AbortWitness {
    fn new(inner: SimBoard, watch: usize) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let freed_at_abort = Arc::new(Mutex::new(Vec::new()));
        let board = Self {
            inner,
            watch,
            freed_at_abort: Arc::clone(&freed_at_abort),
        };
        (board, freed_at_abort)
    }
}

impl BoardSession for AbortWitness {
    fn apply(&mut self, config: &CaptureConfig) -> Result<(), BoardError> {
        self.inner.apply(config)
    }

    fn channel_info(&mut self) -> Result<ChannelInfo, BoardError> {
        self.inner.channel_info()
    }

    fn allocate_buffer(&mut self, slot: usize, bytes: usize) -> Result<DmaBuffer, BoardError> {
        self.inner.allocate_buffer(slot, bytes)
    }

    fn arm(&mut self, params: &ArmParams) -> Result<(), BoardError> {
        self.inner.arm(params)
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<(), BoardError> {
        self.inner.post_buffer(buffer)
    }

    fn start_capture(&mut self) -> Result<(), BoardError> {
        self.inner.start_capture()
    }

    fn wait_buffer_ready(
        &mut self,
        buffer: &mut DmaBuffer,
        timeout: Duration,
    ) -> Result<(), BoardError> {
        self.inner.wait_buffer_ready(buffer, timeout)
    }

    fn abort(&mut self) -> Result<(), BoardError> {
        let freed = FREED[self.watch].load(Ordering::SeqCst);
        self.freed_at_abort
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(freed);
        self.inner.abort()
    }
}

fn digitizer(board: AbortWitness) -> Digitizer<AbortWitness> {
    let config = CaptureConfig::from_params(&CaptureParams::default()).unwrap();
    Digitizer::new(board, config)
}

fn request(watch: usize, buffers: u32, pool: u32) -> RunRequest {
    RunRequest {
        records_per_buffer: WATCHED_RECORDS[watch],
        buffers_per_acquisition: buffers,
        buffer_count: pool,
        save_data: false,
        wait_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

struct PanickingSink;

impl ByteSink for PanickingSink {
    fn append_bytes(&mut self, _bytes: &[u8]) -> io::Result<()> {
        panic!("sink exploded");
    }
}

#[test]
fn failed_start_aborts_before_freeing_the_pool() {
    let watch = 0;
    let (board, freed_at_abort) = AbortWitness::new(SimBoard::new().fail_start_capture(), watch);
    let dig = digitizer(board);

    let err = dig
        .run(&request(watch, 4, 2), &CancelToken::new())
        .unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Board {
            stage: "start_capture",
            ..
        }
    );
    assert_eq!(*freed_at_abort.lock().unwrap(), vec![0]);
    assert_eq!(FREED[watch].load(Ordering::SeqCst), 2);
}

#[test]
fn failed_repost_aborts_before_freeing_the_pool() {
    let watch = 1;
    let (board, freed_at_abort) = AbortWitness::new(SimBoard::new().fail_post(3), watch);
    let dig = digitizer(board);

    let err = dig
        .run(&request(watch, 4, 2), &CancelToken::new())
        .unwrap_err();

    assert_matches!(
        err,
        AcquisitionError::Board {
            stage: "post_buffer",
            ..
        }
    );
    assert_eq!(*freed_at_abort.lock().unwrap(), vec![0]);
    assert_eq!(FREED[watch].load(Ordering::SeqCst), 2);
}

#[test]
fn unwinding_out_of_capture_aborts_before_freeing_the_pool() {
    let watch = 2;
    let (board, freed_at_abort) = AbortWitness::new(SimBoard::new(), watch);
    let dig = digitizer(board);
    let req = request(watch, 4, 2);
    let cancel = CancelToken::new();
    let mut sink = PanickingSink;

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        dig.run_with_sink(&req, &cancel, Some(&mut sink))
    }));

    assert!(result.is_err());
    assert_eq!(*freed_at_abort.lock().unwrap(), vec![0]);
    assert_eq!(FREED[watch].load(Ordering::SeqCst), 2);
}
