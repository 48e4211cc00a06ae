use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters for the market data feed and the books it drives.
#[derive(Debug)]
pub struct FeedMetrics {
    // Feed
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    websocket_errors: AtomicU64,
    connection_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_successes: AtomicU64,

    // Books
    snapshots_applied: AtomicU64,
    updates_applied: AtomicU64,
    rejected_messages: AtomicU64,
    skipped_changes: AtomicU64,
    untracked_messages: AtomicU64,

    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_book_update: Option<Instant>,
    last_error_time: Option<Instant>,
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            websocket_errors: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_successes: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            rejected_messages: AtomicU64::new(0),
            skipped_changes: AtomicU64::new(0),
            untracked_messages: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_book_update: None,
                last_error_time: None,
            }),
        }
    }

    // --- Feed ---

    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_connection_failures(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnect_successes(&self) {
        self.reconnect_successes.fetch_add(1, Ordering::Relaxed);
    }

    // --- Books ---

    pub fn inc_snapshots_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_book_update = Some(Instant::now());
    }

    pub fn inc_updates_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_book_update = Some(Instant::now());
    }

    /// A book message was dropped because it failed validation.
    pub fn inc_rejected_messages(&self) {
        self.rejected_messages.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    /// Individual level changes skipped inside an otherwise applied batch.
    pub fn add_skipped_changes(&self, count: u64) {
        if count > 0 {
            self.skipped_changes.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn inc_untracked_messages(&self) {
        self.untracked_messages.fetch_add(1, Ordering::Relaxed);
    }

    // --- Getters ---

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn websocket_errors(&self) -> u64 {
        self.websocket_errors.load(Ordering::Relaxed)
    }

    pub fn connection_failures(&self) -> u64 {
        self.connection_failures.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn reconnect_successes(&self) -> u64 {
        self.reconnect_successes.load(Ordering::Relaxed)
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied.load(Ordering::Relaxed)
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied.load(Ordering::Relaxed)
    }

    pub fn rejected_messages(&self) -> u64 {
        self.rejected_messages.load(Ordering::Relaxed)
    }

    pub fn skipped_changes(&self) -> u64 {
        self.skipped_changes.load(Ordering::Relaxed)
    }

    pub fn untracked_messages(&self) -> u64 {
        self.untracked_messages.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_book_update(&self) -> Option<f64> {
        self.inner
            .read()
            .last_book_update
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_error(&self) -> Option<f64> {
        self.inner
            .read()
            .last_error_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Book updates (snapshots and diff batches) per second since start.
    pub fn updates_per_second(&self) -> f64 {
        let uptime = self.uptime_secs();
        if uptime > 0.0 {
            (self.snapshots_applied() + self.updates_applied()) as f64 / uptime
        } else {
            0.0
        }
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received(),
            parse_errors: self.parse_errors(),
            websocket_errors: self.websocket_errors(),
            connection_failures: self.connection_failures(),
            reconnect_attempts: self.reconnect_attempts(),
            reconnect_successes: self.reconnect_successes(),
            snapshots_applied: self.snapshots_applied(),
            updates_applied: self.updates_applied(),
            rejected_messages: self.rejected_messages(),
            skipped_changes: self.skipped_changes(),
            untracked_messages: self.untracked_messages(),
            uptime_secs: self.uptime_secs(),
            updates_per_second: self.updates_per_second(),
            secs_since_last_book_update: self.secs_since_last_book_update(),
            secs_since_last_error: self.secs_since_last_error(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub parse_errors: u64,
    pub websocket_errors: u64,
    pub connection_failures: u64,
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
    pub snapshots_applied: u64,
    pub updates_applied: u64,
    pub rejected_messages: u64,
    pub skipped_changes: u64,
    pub untracked_messages: u64,
    pub uptime_secs: f64,
    pub updates_per_second: f64,
    pub secs_since_last_book_update: Option<f64>,
    pub secs_since_last_error: Option<f64>,
}

/// Health status of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Books are being updated.
    Healthy,
    /// Book updates are stale.
    Degraded,
    /// No book updates for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Seconds without a book update before the feed counts as degraded.
    const STALE_THRESHOLD_SECS: f64 = 15.0;
    /// Seconds without a book update before the feed counts as unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 60.0;

    /// Determine the health status from the age of the last book update.
    pub fn health_status(&self) -> HealthStatus {
        // Before the first update, judge by uptime so startup is not reported as a failure.
        let idle_secs = self
            .secs_since_last_book_update
            .unwrap_or(self.uptime_secs);

        if idle_secs > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else if idle_secs > Self::STALE_THRESHOLD_SECS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Feed Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Messages received:   {}", self.messages_received)?;
        writeln!(f, "Snapshots applied:   {}", self.snapshots_applied)?;
        writeln!(f, "Updates applied:     {}", self.updates_applied)?;
        writeln!(f, "Updates/sec:         {:.2}", self.updates_per_second)?;
        writeln!(f, "Rejected messages:   {}", self.rejected_messages)?;
        writeln!(f, "Skipped changes:     {}", self.skipped_changes)?;
        writeln!(f, "Untracked messages:  {}", self.untracked_messages)?;
        writeln!(f, "Parse errors:        {}", self.parse_errors)?;
        writeln!(f, "WebSocket errors:    {}", self.websocket_errors)?;
        writeln!(f, "Connection failures: {}", self.connection_failures)?;
        writeln!(f, "Reconnect attempts:  {}", self.reconnect_attempts)?;
        writeln!(f, "Reconnect successes: {}", self.reconnect_successes)?;
        if let Some(secs) = self.secs_since_last_book_update {
            writeln!(f, "Since last update:   {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_since_last_error {
            writeln!(f, "Since last error:    {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<FeedMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(FeedMetrics::new())
}
