//! Per-session sliding-window limiter guarding the agent hint/explain/patch
//! endpoints. One window per session id, evicted lazily on access.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

struct SlidingWindow {
    window_secs: i64,
    max_count: u32,
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    fn new(window_secs: i64, max_count: u32) -> Self {
        Self {
            window_secs,
            max_count,
            events: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(self.window_secs);
        while let Some(front) = self.events.front() {
            if *front <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_record(&mut self, now: DateTime<Utc>) -> Result<(), u64> {
        self.evict(now);
        if self.events.len() as u32 >= self.max_count {
            let oldest = *self.events.front().expect("non-empty when at capacity");
            let reset_at = oldest + ChronoDuration::seconds(self.window_secs);
            let wait = (reset_at - now).num_seconds().max(0) as u64;
            return Err(wait);
        }
        self.events.push_back(now);
        Ok(())
    }
}

pub struct RateLimitTracker {
    windows: Mutex<HashMap<String, SlidingWindow>>,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimitTracker {
    /// Records one request for `session_id` against a per-minute cap,
    /// returning `Err(retry_after_secs)` when the window is full.
    pub fn check(&self, session_id: &str, max_per_min: u32, now: DateTime<Utc>) -> Result<(), u64> {
        let mut windows = self.windows.lock().expect("rate limit mutex poisoned");
        let window = windows
            .entry(session_id.to_string())
            .or_insert_with(|| SlidingWindow::new(60, max_per_min));
        window.max_count = max_per_min;
        window.try_record(now)
    }

    pub fn forget(&self, session_id: &str) {
        self.windows
            .lock()
            .expect("rate limit mutex poisoned")
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_limit() {
        let tracker = RateLimitTracker::default();
        let now = Utc::now();
        for _ in 0..5 {
            assert!(tracker.check("s1", 5, now).is_ok());
        }
        assert!(tracker.check("s1", 5, now).is_err());
    }

    #[test]
    fn test_window_slides() {
        let tracker = RateLimitTracker::default();
        let t0 = Utc::now();
        for _ in 0..5 {
            tracker.check("s1", 5, t0).unwrap();
        }
        let t1 = t0 + ChronoDuration::seconds(61);
        assert!(tracker.check("s1", 5, t1).is_ok());
    }

    #[test]
    fn test_independent_per_session() {
        let tracker = RateLimitTracker::default();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.check("s1", 5, now).unwrap();
        }
        assert!(tracker.check("s2", 5, now).is_ok());
    }
}
