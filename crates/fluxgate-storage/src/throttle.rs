// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rate limiter for repeated identical error logs.
//!
//! A worker loop that hits the same failure every tick would otherwise
//! flood the log. Each call site owns one throttle per failure kind.

use std::time::{Duration, Instant};

/// Minimum-interval gate for log statements.
#[derive(Debug)]
pub struct LogThrottle {
    min_interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    /// Create a throttle that lets one log through per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed)` when the caller should log now, where
    /// `suppressed` is the number of occurrences swallowed since the last
    /// emitted log. Returns `None` when the log should be skipped.
    pub fn ready(&mut self) -> Option<u64> {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                let suppressed = self.suppressed;
                self.suppressed = 0;
                Some(suppressed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_is_ready() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.ready(), Some(0));
    }

    #[test]
    fn test_suppresses_within_interval() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready().is_some());
        assert_eq!(throttle.ready(), None);
        assert_eq!(throttle.ready(), None);
    }

    #[test]
    fn test_reports_suppressed_count_after_interval() {
        let mut throttle = LogThrottle::new(Duration::from_millis(20));
        assert_eq!(throttle.ready(), Some(0));
        assert_eq!(throttle.ready(), None);
        assert_eq!(throttle.ready(), None);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(throttle.ready(), Some(2));
    }
}
