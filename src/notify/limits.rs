//! Send-Rate Windows
//!
//! Three independent windows gate every outbound send: a per-minute
//! ceiling, a per-hour ceiling, and a short burst limiter that smooths
//! spikes the per-minute ceiling would still allow. Each window keeps its
//! own counter and start time; a counter resets when its window has
//! elapsed, not on a clock boundary.
//!
//! Counters advance only on successful sends: a denied or failed attempt
//! consumes no send budget.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Which window denied a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Minute,
    Hour,
    Burst,
}

/// Outcome of a window check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowDecision {
    /// All three windows have room
    Allowed,
    /// A window is full; retry after its remaining time
    Blocked {
        window: WindowKind,
        remaining: Duration,
    },
}

#[derive(Debug)]
struct Window {
    limit: u32,
    period: Duration,
    count: u32,
    started: Instant,
}

impl Window {
    fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            count: 0,
            started: Instant::now(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started) >= self.period {
            self.count = 0;
            self.started = now;
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        (self.started + self.period).saturating_duration_since(now)
    }
}

/// Raw counters of one window, for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub used: u32,
    pub limit: u32,
    pub resets_in_secs: u64,
}

/// Counters of all three windows
#[derive(Debug, Clone, Serialize)]
pub struct WindowsSnapshot {
    pub minute: WindowSnapshot,
    pub hour: WindowSnapshot,
    pub burst: WindowSnapshot,
}

/// The three nested send windows
#[derive(Debug)]
pub struct SendWindows {
    inner: Mutex<[Window; 3]>,
}

impl SendWindows {
    /// Standard periods: 60 s minute window, 3600 s hour window, and the
    /// configured burst cooldown
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::with_periods(
            settings,
            Duration::from_secs(60),
            Duration::from_secs(3_600),
        )
    }

    /// Custom minute/hour periods (shrunken windows for tests)
    pub fn with_periods(
        settings: &RateLimitSettings,
        minute_period: Duration,
        hour_period: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new([
                Window::new(settings.sends_per_minute, minute_period),
                Window::new(settings.sends_per_hour, hour_period),
                Window::new(settings.burst_size, settings.burst_cooldown()),
            ]),
        }
    }

    /// Check all windows without consuming budget
    ///
    /// The first full window (checked minute, hour, burst) reports its
    /// remaining time.
    pub fn check(&self) -> WindowDecision {
        let now = Instant::now();
        let mut windows = self.inner.lock().unwrap();

        for (window, kind) in windows
            .iter_mut()
            .zip([WindowKind::Minute, WindowKind::Hour, WindowKind::Burst])
        {
            window.roll(now);
            if window.count >= window.limit {
                return WindowDecision::Blocked {
                    window: kind,
                    remaining: window.remaining(now),
                };
            }
        }
        WindowDecision::Allowed
    }

    /// Record one successful send against all three windows
    pub fn record_send(&self) {
        let now = Instant::now();
        let mut windows = self.inner.lock().unwrap();
        for window in windows.iter_mut() {
            window.roll(now);
            window.count += 1;
        }
    }

    /// Raw counters for observability
    pub fn snapshot(&self) -> WindowsSnapshot {
        let now = Instant::now();
        let mut windows = self.inner.lock().unwrap();
        let snap = |w: &mut Window| {
            w.roll(now);
            WindowSnapshot {
                used: w.count,
                limit: w.limit,
                resets_in_secs: w.remaining(now).as_secs(),
            }
        };
        let [minute, hour, burst] = &mut *windows;
        WindowsSnapshot {
            minute: snap(minute),
            hour: snap(hour),
            burst: snap(burst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(per_minute: u32, per_hour: u32, burst: u32, cooldown_secs: u64) -> RateLimitSettings {
        RateLimitSettings {
            sends_per_minute: per_minute,
            sends_per_hour: per_hour,
            burst_size: burst,
            burst_cooldown_secs: cooldown_secs,
        }
    }

    #[test]
    fn test_allows_until_minute_ceiling() {
        let windows = SendWindows::new(&settings(2, 100, 10, 60));

        assert_eq!(windows.check(), WindowDecision::Allowed);
        windows.record_send();
        assert_eq!(windows.check(), WindowDecision::Allowed);
        windows.record_send();

        match windows.check() {
            WindowDecision::Blocked { window, remaining } => {
                assert_eq!(window, WindowKind::Minute);
                assert!(remaining <= Duration::from_secs(60));
            }
            WindowDecision::Allowed => panic!("expected minute window to block"),
        }
    }

    #[test]
    fn test_hour_ceiling_blocks_independently() {
        // Minute window is generous; hour window fills first.
        let windows = SendWindows::new(&settings(100, 3, 50, 1));
        for _ in 0..3 {
            windows.record_send();
        }
        match windows.check() {
            WindowDecision::Blocked { window, .. } => assert_eq!(window, WindowKind::Hour),
            WindowDecision::Allowed => panic!("expected hour window to block"),
        }
    }

    #[test]
    fn test_burst_limiter_blocks_within_cooldown() {
        // Burst of 3 within a long cooldown; minute and hour have room.
        let windows = SendWindows::new(&settings(10, 100, 3, 60));
        for _ in 0..3 {
            windows.record_send();
        }
        match windows.check() {
            WindowDecision::Blocked { window, .. } => assert_eq!(window, WindowKind::Burst),
            WindowDecision::Allowed => panic!("expected burst window to block"),
        }
    }

    #[test]
    fn test_window_resets_after_period() {
        let windows =
            SendWindows::with_periods(&settings(1, 100, 50, 3_600), Duration::from_millis(20), Duration::from_secs(3_600));
        windows.record_send();
        assert!(matches!(windows.check(), WindowDecision::Blocked { .. }));

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(windows.check(), WindowDecision::Allowed);
    }

    #[test]
    fn test_denied_check_consumes_no_budget() {
        let windows = SendWindows::new(&settings(1, 100, 50, 60));
        windows.record_send();

        // Repeated denials must not advance any counter.
        for _ in 0..5 {
            assert!(matches!(windows.check(), WindowDecision::Blocked { .. }));
        }
        let snapshot = windows.snapshot();
        assert_eq!(snapshot.minute.used, 1);
        assert_eq!(snapshot.hour.used, 1);
        assert_eq!(snapshot.burst.used, 1);
    }

    #[test]
    fn test_snapshot_reports_all_windows() {
        let windows = SendWindows::new(&settings(10, 200, 3, 60));
        windows.record_send();
        windows.record_send();

        let snapshot = windows.snapshot();
        assert_eq!(snapshot.minute.used, 2);
        assert_eq!(snapshot.minute.limit, 10);
        assert_eq!(snapshot.hour.limit, 200);
        assert_eq!(snapshot.burst.limit, 3);
        assert!(snapshot.hour.resets_in_secs <= 3_600);
    }
}
