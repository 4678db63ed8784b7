//! Wall-clock helpers.
//!
//! Timestamps that leave the process (snapshots, records, job listings) are
//! milliseconds since the Unix epoch. Ordering inside the process never relies
//! on them; queues and schedulers use monotonic sequence numbers instead.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Returns the current wall-clock time in milliseconds.
///
/// A clock set before 1970 reads as zero rather than failing.
#[inline]
#[must_use]
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
