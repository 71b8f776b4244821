// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification throughput measurement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use uaperf_core::types::{AttributeId, DataValue, Event, NodeId};

use crate::notification::MonitoredItemHandle;

use super::subscription::SubscriptionCallback;

/// Default number of notifications between two reports.
pub const DEFAULT_REPORT_EVERY: u64 = 1000;

// =============================================================================
// ThroughputReport
// =============================================================================

/// Snapshot emitted every `report_every` notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Notifications counted since the meter started.
    pub count: u64,
    /// Time since the meter started.
    pub elapsed: Duration,
    /// `count / elapsed` in notifications per second.
    pub rate: f64,
}

impl ThroughputReport {
    fn new(count: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { count as f64 / secs } else { f64::INFINITY };
        Self { count, elapsed, rate }
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received {} updates in {:.3} seconds, rate = {:.1}/sec",
            self.count,
            self.elapsed.as_secs_f64(),
            self.rate
        )
    }
}

// =============================================================================
// ThroughputMeter
// =============================================================================

/// Counts notifications and reports the running rate.
///
/// The count is monotonic and the rate is always measured from the meter's
/// start, so later reports average over the whole run.
#[derive(Debug)]
pub struct ThroughputMeter {
    started: Instant,
    count: AtomicU64,
    report_every: u64,
    // 0 when the run is unbounded.
    target: u64,
}

impl ThroughputMeter {
    /// Creates a meter reporting every [`DEFAULT_REPORT_EVERY`] notifications.
    pub fn new() -> Self {
        Self::with_report_every(DEFAULT_REPORT_EVERY)
    }

    /// Creates a meter reporting every `report_every` notifications
    /// (at least one).
    pub fn with_report_every(report_every: u64) -> Self {
        Self {
            started: Instant::now(),
            count: AtomicU64::new(0),
            report_every: report_every.max(1),
            target: 0,
        }
    }

    /// Also reports when the count reaches `target`, so a bounded run can
    /// stop exactly there. 0 disables the extra report.
    pub fn with_target(mut self, target: u64) -> Self {
        self.target = target;
        self
    }

    /// Counts one notification; returns a report when the count reaches a
    /// multiple of `report_every` or the target.
    pub fn record(&self) -> Option<ThroughputReport> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let due = count % self.report_every == 0 || count == self.target;
        due.then(|| ThroughputReport::new(count, self.started.elapsed()))
    }

    /// Notifications counted so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Report interval.
    pub fn report_every(&self) -> u64 {
        self.report_every
    }

    /// Count that triggers a final report, 0 if none.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Current rate without counting anything.
    pub fn snapshot(&self) -> ThroughputReport {
        ThroughputReport::new(self.count(), self.started.elapsed())
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ThroughputCallback
// =============================================================================

/// Feeds every dispatched notification into a [`ThroughputMeter`].
///
/// Reports are logged at INFO and, if a channel is attached, forwarded.
#[derive(Debug)]
pub struct ThroughputCallback {
    meter: ThroughputMeter,
    reports: Option<mpsc::UnboundedSender<ThroughputReport>>,
}

impl ThroughputCallback {
    /// Wraps a meter.
    pub fn new(meter: ThroughputMeter) -> Self {
        Self { meter, reports: None }
    }

    /// Wraps a meter and returns a receiver for its reports.
    pub fn with_reports(meter: ThroughputMeter) -> (Self, mpsc::UnboundedReceiver<ThroughputReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                meter,
                reports: Some(tx),
            },
            rx,
        )
    }

    /// The underlying meter.
    pub fn meter(&self) -> &ThroughputMeter {
        &self.meter
    }

    fn record(&self) {
        if let Some(report) = self.meter.record() {
            info!(count = report.count, rate = report.rate, "{}", report);
            if let Some(reports) = &self.reports {
                let _ = reports.send(report);
            }
        }
    }
}

#[async_trait]
impl SubscriptionCallback for ThroughputCallback {
    async fn on_data_change(
        &self,
        _handle: MonitoredItemHandle,
        _node_id: &NodeId,
        _value: &DataValue,
        _attribute: AttributeId,
    ) {
        self.record();
    }

    async fn on_event(&self, _handle: MonitoredItemHandle, _event: &Event) {
        self.record();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_on_multiples() {
        let meter = ThroughputMeter::with_report_every(3);
        let reports: Vec<_> = (0..7).filter_map(|_| meter.record()).collect();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].count, 3);
        assert_eq!(reports[1].count, 6);
        assert!(reports[1].elapsed >= reports[0].elapsed);
        assert_eq!(meter.count(), 7);
    }

    #[test]
    fn test_single_report_after_default_interval() {
        let meter = ThroughputMeter::new();
        let reports: Vec<_> = (0..1000).filter_map(|_| meter.record()).collect();

        assert_eq!(reports.len(), 1);
        let report = reports[0];
        assert_eq!(report.count, 1000);
        let expected = 1000.0 / report.elapsed.as_secs_f64();
        assert!(report.rate.is_infinite() || (report.rate - expected).abs() < 1e-6 * expected);
    }

    #[test]
    fn test_target_between_intervals() {
        let meter = ThroughputMeter::new().with_target(1500);
        let counts: Vec<u64> = (0..2500).filter_map(|_| meter.record()).map(|r| r.count).collect();
        assert_eq!(counts, vec![1000, 1500, 2000]);
        assert_eq!(meter.target(), 1500);
    }

    #[test]
    fn test_target_on_interval_reports_once() {
        let meter = ThroughputMeter::with_report_every(10).with_target(20);
        let counts: Vec<u64> = (0..20).filter_map(|_| meter.record()).map(|r| r.count).collect();
        assert_eq!(counts, vec![10, 20]);
    }

    #[test]
    fn test_zero_elapsed_rate() {
        let report = ThroughputReport::new(5, Duration::ZERO);
        assert!(report.rate.is_infinite());
    }

    #[test]
    fn test_report_display() {
        let report = ThroughputReport::new(1000, Duration::from_secs(2));
        assert_eq!(
            report.to_string(),
            "Received 1000 updates in 2.000 seconds, rate = 500.0/sec"
        );
    }

    #[test]
    fn test_report_every_at_least_one() {
        let meter = ThroughputMeter::with_report_every(0);
        assert_eq!(meter.report_every(), 1);
        assert!(meter.record().is_some());
    }

    #[tokio::test]
    async fn test_callback_forwards_reports() {
        let (callback, mut reports) = ThroughputCallback::with_reports(ThroughputMeter::with_report_every(2));
        let event = Event::new(NodeId::SERVER, "src", 2, "aa").unwrap();
        for _ in 0..4 {
            callback.on_event(MonitoredItemHandle(1), &event).await;
        }

        assert_eq!(reports.recv().await.map(|r| r.count), Some(2));
        assert_eq!(reports.recv().await.map(|r| r.count), Some(4));
        assert_eq!(callback.meter().count(), 4);
    }
}
