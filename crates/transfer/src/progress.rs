use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default time window for throughput estimates.
const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Sliding-window throughput estimate for uploaded parts.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: VecDeque<Sample>,
    window: Duration,
    total: u64,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ThroughputMeter {
    /// Creates a meter averaging over `window` (default 10 s).
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: VecDeque::new(),
                window: window.unwrap_or(DEFAULT_WINDOW),
                total: 0,
            }),
        }
    }

    /// Records `bytes` completed now.
    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut m = self.lock();
        m.total += bytes;
        m.samples.push_back(Sample { bytes, at: now });
        let window = m.window;
        while let Some(front) = m.samples.front() {
            if now.duration_since(front.at) > window {
                m.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes recorded since creation.
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    /// Average bytes per second across the window.
    ///
    /// The oldest sample only marks the window start, so fewer than two
    /// samples yield 0.
    pub fn bytes_per_second(&self) -> f64 {
        let m = self.lock();
        let (Some(first), Some(last)) = (m.samples.front(), m.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = m.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to send `remaining` more bytes, if a rate is known.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MeterInner> {
        // A poisoned meter only ever holds counters; keep using them.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
