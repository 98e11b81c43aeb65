//! Echo detection
//!
//! After the bridge writes record `r` because source `s` changed, the other
//! side will notify us about `r`. [`EchoDetector::mark_write`] remembers the
//! write for a fixed TTL and [`EchoDetector::should_ignore`] answers whether
//! a notification is that mirror image.

use dashmap::DashMap;
use listbridge_core::Source;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_ECHO_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Time source for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

pub struct EchoDetector {
    /// (record id, source that drove the write) → time of the write.
    marks: DashMap<(String, Source), Instant>,
    ttl: Duration,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl Default for EchoDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_TTL)
    }
}

impl EchoDetector {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            marks: DashMap::new(),
            ttl,
            max_entries: None,
            clock,
        }
    }

    /// Bound the number of live marks. When full, the oldest mark goes first.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `record_id` was just written because `source` changed.
    pub fn mark_write(&self, record_id: &str, source: Source) {
        let now = self.clock.now();
        self.marks.insert((record_id.to_string(), source), now);
        trace!(record_id, %source, "echo mark");
        self.sweep();
        self.enforce_cap();
    }

    /// True iff a notification about `record_id` from `observed` mirrors a
    /// write this process made because the *other* source changed. Marks
    /// from `observed` itself never suppress.
    pub fn should_ignore(&self, record_id: &str, observed: Source) -> bool {
        let key = (record_id.to_string(), observed.opposite());
        let Some(marked_at) = self.marks.get(&key).map(|e| *e.value()) else {
            return false;
        };
        self.clock.now().saturating_duration_since(marked_at) < self.ttl
    }

    /// Drop every mark older than the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.marks.len();
        self.marks
            .retain(|_, marked_at| now.saturating_duration_since(*marked_at) < self.ttl);
        before.saturating_sub(self.marks.len())
    }

    fn enforce_cap(&self) {
        let Some(max) = self.max_entries else {
            return;
        };
        while self.marks.len() > max {
            let oldest = self
                .marks
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.marks.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Sweep on a fixed interval until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, live = self.len(), "echo sweep");
                        }
                    }
                }
            }
            debug!("echo sweeper stopped");
        })
    }
}
