use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Window used for the instantaneous throughput figure.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Maximum retained speed samples.
const MAX_SAMPLES: usize = 256;

/// Point-in-time view of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Bytes handed to sockets so far, across all tunnels.
    pub bytes_sent: u64,
    /// Size of the file being sent.
    pub total_bytes: u64,
    /// Time since the transfer started.
    pub elapsed: Duration,
    /// Average speed since start, bytes/second.
    pub average_bps: f64,
    /// Speed over the last few seconds, bytes/second.
    pub current_bps: f64,
}

impl Progress {
    /// Completion percentage (100 for an empty file).
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.bytes_sent as f64 * 100.0 / self.total_bytes as f64
    }
}

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Aggregate byte counters shared by every tunnel of one transfer.
pub struct TransferStats {
    total_bytes: u64,
    bytes_sent: AtomicU64,
    started: Instant,
    samples: Mutex<Vec<SpeedSample>>,
}

impl TransferStats {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            bytes_sent: AtomicU64::new(0),
            started: Instant::now(),
            samples: Mutex::new(Vec::new()),
        }
    }

    /// Adds `bytes` to the running total and returns the updated snapshot.
    pub fn record(&self, bytes: u64) -> Progress {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);

        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });
        if let Some(cutoff) = now.checked_sub(SPEED_WINDOW) {
            samples.retain(|s| s.timestamp >= cutoff);
        }
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(..excess);
        }
        drop(samples);

        self.snapshot()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> Progress {
        let bytes_sent = self.bytes_sent();
        let elapsed = self.elapsed();
        let average_bps = if elapsed.is_zero() {
            0.0
        } else {
            bytes_sent as f64 / elapsed.as_secs_f64()
        };

        Progress {
            bytes_sent,
            total_bytes: self.total_bytes,
            elapsed,
            average_bps,
            current_bps: self.current_bps(),
        }
    }

    /// Speed across the retained window; 0.0 with fewer than 2 samples.
    fn current_bps(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() < 2 {
            return 0.0;
        }
        let first = &samples[0];
        let last = &samples[samples.len() - 1];
        let span = last.timestamp.duration_since(first.timestamp);
        if span.is_zero() {
            return 0.0;
        }
        let bytes: u64 = samples.iter().map(|s| s.bytes).sum();
        bytes as f64 / span.as_secs_f64()
    }
}
