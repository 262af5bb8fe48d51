//! Throttled upload progress

use super::traits::ProgressSink;
use crate::db::ProgressUpdate;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// [`ProgressSink`] that emits at most one update per interval
///
/// The rate is computed from the bytes sent since the previous emitted update. When
/// that delta is not positive (a stalled or restarted transport) the overall average
/// since the upload started is used instead. The ETA is remaining bytes over rate.
pub struct ThrottledProgress {
    interval: Duration,
    started: Instant,
    last: Option<(Instant, u64)>,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ThrottledProgress {
    /// Create a sink that forwards updates to `tx`
    pub fn new(interval: Duration, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self::starting_at(interval, tx, Instant::now())
    }

    fn starting_at(
        interval: Duration,
        tx: mpsc::UnboundedSender<ProgressUpdate>,
        started: Instant,
    ) -> Self {
        Self {
            interval,
            started,
            last: None,
            tx,
        }
    }

    /// Compute the update for a report at `now`, or `None` while throttled
    fn sample(&mut self, current: u64, total: u64, now: Instant) -> Option<ProgressUpdate> {
        if let Some((at, _)) = self.last
            && now.saturating_duration_since(at) < self.interval
        {
            return None;
        }

        let (prev_at, prev_bytes) = self.last.unwrap_or((self.started, 0));
        let dt = now.saturating_duration_since(prev_at).as_secs_f64();
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();

        let rate = if dt > 0.0 && current > prev_bytes {
            (current - prev_bytes) as f64 / dt
        } else if elapsed > 0.0 && current > 0 {
            current as f64 / elapsed
        } else {
            0.0
        };
        let rate = rate as u64;

        let percent = if total > 0 {
            (current.saturating_mul(100) / total).min(100) as u8
        } else {
            0
        };
        let eta_seconds = (rate > 0).then(|| total.saturating_sub(current) / rate);

        self.last = Some((now, current));
        Some(ProgressUpdate {
            percent,
            rate_in: None,
            rate_out: Some(rate),
            eta_seconds,
        })
    }
}

impl ProgressSink for ThrottledProgress {
    fn report(&mut self, current: u64, total: u64) {
        if let Some(update) = self.sample(current, total, Instant::now()) {
            // The receiver only goes away once the upload is finished
            let _ = self.tx.send(update);
        }
    }
}
