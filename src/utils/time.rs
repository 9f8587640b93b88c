//! Time utility functions

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Get current timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds elapsed since `start`
pub fn elapsed_ms(start: Instant) -> u64 {
    duration_to_ms(start.elapsed())
}

/// Convert duration to milliseconds
pub fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Convert a millisecond setting to a timeout, where 0 means "no timeout"
pub fn ms_to_timeout(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_disables_timeout() {
        assert_eq!(ms_to_timeout(0), None);
        assert_eq!(ms_to_timeout(250), Some(Duration::from_millis(250)));
    }
}
