use crate::SinkWarning;
use ndarray::{Array2, ShapeError};
use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};

/// Number of post-trigger samples covering `record_length_secs`.
///
/// Rounds up, except that products within float noise of an integer are
/// taken as that integer (1e-5 s at 180 MS/s is 1800 samples, not 1801).
pub fn post_trigger_samples(record_length_secs: f64, sample_rate_hz: f64) -> u64 {
    let exact = record_length_secs * sample_rate_hz;
    let nearest = exact.round();
    if (exact - nearest).abs() <= 1e-9 * nearest.abs().max(1.0) {
        nearest as u64
    } else {
        exact.ceil() as u64
    }
}

/// Split an interleaved buffer (S0A, S0B, S1A, ...) into one row per channel.
///
/// Samples wider than one byte are little-endian.
pub fn deinterleave(
    buffer: &[u8],
    bytes_per_sample: usize,
    channels: usize,
) -> Result<Array2<u16>, ShapeError> {
    let samples: Vec<u16> = match bytes_per_sample {
        0 | 1 => buffer.iter().map(|&b| b as u16).collect(),
        _ => buffer
            .chunks_exact(bytes_per_sample)
            .map(|s| u16::from_le_bytes([s[0], s[1]]))
            .collect(),
    };
    let per_channel = samples.len() / channels.max(1);
    let frames = Array2::from_shape_vec((per_channel, channels), samples)?;
    Ok(frames.t().to_owned())
}

/// Summary of one acquisition run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    pub buffers_completed: usize,
    pub bytes_transferred: u64,
    pub records_per_buffer: usize,
    /// From start of capture to the end of the final abort.
    pub elapsed: Duration,
    /// Time spent blocked waiting on the board.
    pub wait_time: Duration,
    /// Time spent writing buffers to sinks.
    pub drain_time: Duration,
    /// Time spent in the final abort.
    pub abort_time: Duration,
    pub sink_warnings: Vec<SinkWarning>,
}

impl RunStats {
    pub fn records_completed(&self) -> usize {
        self.records_per_buffer * self.buffers_completed
    }

    fn per_sec(&self, count: f64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count / secs
        } else {
            0.0
        }
    }

    pub fn buffers_per_sec(&self) -> f64 {
        self.per_sec(self.buffers_completed as f64)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.per_sec(self.bytes_transferred as f64)
    }

    pub fn records_per_sec(&self) -> f64 {
        self.per_sec(self.records_completed() as f64)
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Capture completed in {:.6} s",
            self.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "Captured {} buffers ({:.3} buffers per sec)",
            self.buffers_completed,
            self.buffers_per_sec()
        )?;
        writeln!(
            f,
            "Captured {} records ({:.3} records per sec)",
            self.records_completed(),
            self.records_per_sec()
        )?;
        writeln!(
            f,
            "Transferred {} bytes ({:.3} bytes per sec)",
            self.bytes_transferred,
            self.bytes_per_sec()
        )?;
        write!(
            f,
            "Wait {:.6} s, drain {:.6} s, abort {:.6} s",
            self.wait_time.as_secs_f64(),
            self.drain_time.as_secs_f64(),
            self.abort_time.as_secs_f64()
        )
    }
}

/// Live transfer statistics, with *all-time* counters and a *sliding 1 s
/// window* rate.
#[derive(Debug)]
pub struct Counter {
    pub total_bytes: u64,
    pub n_buffers: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    buffers: VecDeque<(Instant, u64)>,
    bytes_in_window: u64,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            total_bytes: 0,
            n_buffers: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            buffers: VecDeque::new(),
            bytes_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Long-term average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_bytes as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Rate over the last window, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record a drained buffer of `size` bytes.
    pub fn increment(&mut self, size: u64) {
        self.increment_at(Instant::now(), size);
    }

    fn increment_at(&mut self, now: Instant, size: u64) {
        self.total_bytes += size;
        self.n_buffers += 1;

        self.buffers.push_back((now, size));
        self.bytes_in_window += size;

        while let Some(&(ts, sz)) = self.buffers.front() {
            if now.duration_since(ts) > self.window {
                self.buffers.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total_bytes = 0;
        self.n_buffers = 0;
        self.t_begin = Instant::now();

        self.buffers.clear();
        self.bytes_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_trigger_samples_rounds_up() {
        assert_eq!(post_trigger_samples(1e-6, 1.8e8), 180);
        assert_eq!(post_trigger_samples(1e-5, 1.8e8), 1800);
        assert_eq!(post_trigger_samples(1.01e-8, 1e8), 2);
    }

    #[test]
    fn deinterleave_two_channels() {
        let samples: [u16; 6] = [10, 20, 11, 21, 12, 22];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let rows = deinterleave(&bytes, 2, 2).unwrap();
        assert_eq!(rows.dim(), (2, 3));
        assert_eq!(rows.row(0).to_vec(), vec![10, 11, 12]);
        assert_eq!(rows.row(1).to_vec(), vec![20, 21, 22]);
    }

    #[test]
    fn rates_are_zero_without_elapsed_time() {
        let stats = RunStats {
            buffers_completed: 3,
            bytes_transferred: 300,
            records_per_buffer: 2,
            ..Default::default()
        };
        assert_eq!(stats.records_completed(), 6);
        assert_eq!(stats.bytes_per_sec(), 0.0);
    }

    #[test]
    fn rates_use_elapsed_time() {
        let stats = RunStats {
            buffers_completed: 4,
            bytes_transferred: 1000,
            records_per_buffer: 1,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.buffers_per_sec(), 2.0);
        assert_eq!(stats.bytes_per_sec(), 500.0);
        assert_eq!(stats.records_per_sec(), 2.0);
    }

    #[test]
    fn counter_window_evicts_old_buffers() {
        let mut counter = Counter::new();
        let t0 = Instant::now();
        counter.increment_at(t0, 100);
        counter.increment_at(t0 + Duration::from_millis(500), 100);
        assert_eq!(counter.bytes_in_window, 200);
        counter.increment_at(t0 + Duration::from_millis(1200), 50);
        assert_eq!(counter.bytes_in_window, 150);
        assert_eq!(counter.total_bytes, 250);
        assert_eq!(counter.n_buffers, 3);
    }
}
