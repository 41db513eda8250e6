//! Liveness watchdogs.
//!
//! Two independent monitors, both polled by the pipeline's watchdog loop
//! rather than driving their own timers: [`HeartbeatMonitor`] detects a
//! silent source, [`DestinationTimeoutMonitor`] detects a stalled
//! destination. Both must be readable while the stage they watch is parked
//! on a blocking I/O call, so they share nothing with the stages beyond
//! cheap interior-mutability cells.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source-side silence detector. Only RECORD and STATE traffic counts as
/// a beat; LOG and TRACE chatter does not prove data is flowing.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_beat: Mutex<Instant>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMonitor {
    /// The construction instant counts as the first beat.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_beat: Mutex::new(Instant::now()),
        }
    }

    pub fn beat(&self) {
        *self.last_beat.lock() = Instant::now();
    }

    #[must_use]
    pub fn time_since_last_beat(&self) -> Duration {
        self.last_beat.lock().elapsed()
    }

    /// False once more than `timeout` has passed since the last beat.
    #[must_use]
    pub fn is_beating(&self, timeout: Duration) -> bool {
        self.time_since_last_beat() <= timeout
    }
}

/// Which destination call exceeded its allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Accept,
    NotifyEndOfInput,
}

/// Destination-side stall detector. Each watched call starts its timer on
/// entry and clears it on return, so an idle destination (no call in
/// flight) can never time out.
#[derive(Debug, Default)]
pub struct DestinationTimeoutMonitor {
    accept_started: Mutex<Option<Instant>>,
    end_of_input_started: Mutex<Option<Instant>>,
}

impl DestinationTimeoutMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_accept(&self) {
        *self.accept_started.lock() = Some(Instant::now());
    }

    pub fn reset_accept(&self) {
        *self.accept_started.lock() = None;
    }

    pub fn start_end_of_input(&self) {
        *self.end_of_input_started.lock() = Some(Instant::now());
    }

    pub fn reset_end_of_input(&self) {
        *self.end_of_input_started.lock() = None;
    }

    #[must_use]
    pub fn time_since_accept(&self) -> Option<Duration> {
        self.accept_started.lock().map(|t| t.elapsed())
    }

    #[must_use]
    pub fn time_since_end_of_input(&self) -> Option<Duration> {
        self.end_of_input_started.lock().map(|t| t.elapsed())
    }

    /// Which in-flight call, if any, has exceeded `threshold`.
    #[must_use]
    pub fn exceeded(&self, threshold: Duration) -> Option<TimeoutKind> {
        if self.time_since_accept().is_some_and(|d| d > threshold) {
            return Some(TimeoutKind::Accept);
        }
        if self.time_since_end_of_input().is_some_and(|d| d > threshold) {
            return Some(TimeoutKind::NotifyEndOfInput);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_starts_beating() {
        let monitor = HeartbeatMonitor::new();
        assert!(monitor.is_beating(Duration::from_secs(10)));
    }

    #[test]
    fn test_heartbeat_times_out_without_beats() {
        let monitor = HeartbeatMonitor::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!monitor.is_beating(Duration::from_millis(5)));
        monitor.beat();
        assert!(monitor.is_beating(Duration::from_millis(5)));
    }

    #[test]
    fn test_idle_destination_never_times_out() {
        let monitor = DestinationTimeoutMonitor::new();
        assert_eq!(monitor.exceeded(Duration::ZERO), None);
    }

    #[test]
    fn test_accept_timer_trips_and_clears() {
        let monitor = DestinationTimeoutMonitor::new();
        monitor.start_accept();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(
            monitor.exceeded(Duration::from_millis(1)),
            Some(TimeoutKind::Accept)
        );
        monitor.reset_accept();
        assert_eq!(monitor.exceeded(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_end_of_input_timer_reported_distinctly() {
        let monitor = DestinationTimeoutMonitor::new();
        monitor.start_end_of_input();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(
            monitor.exceeded(Duration::from_millis(1)),
            Some(TimeoutKind::NotifyEndOfInput)
        );
    }
}
