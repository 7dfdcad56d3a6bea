//! Wall-clock-aligned cycle scheduling
//!
//! Cycles start on exact multiples of the interval in epoch milliseconds,
//! not at `process_start + n * interval`. This keeps independent exporters
//! loosely phase-aligned to clock boundaries and prevents cumulative drift
//! when a cycle overruns its interval. The next boundary is computed only
//! after the previous cycle fully completes, so cycles of one exporter
//! never overlap.

use log::debug;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Granularity of interruptible sleeps, for responsive shutdown
const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Epoch milliseconds of the next wall-aligned boundary at or after `now_ms`
pub fn next_boundary_ms(now_ms: i64, interval: Duration) -> i64 {
    let t = interval.as_millis().max(1) as i64;
    let rem = now_ms.rem_euclid(t);
    if rem == 0 {
        now_ms
    } else {
        now_ms - rem + t
    }
}

/// Delay from `now_ms` until the next wall-aligned boundary
///
/// Zero when `now_ms` sits exactly on a boundary (the cycle fires
/// immediately, matching `ceil(now / T) * T`).
pub fn delay_until_boundary(now_ms: i64, interval: Duration) -> Duration {
    let next = next_boundary_ms(now_ms, interval);
    Duration::from_millis(next.saturating_sub(now_ms).max(0) as u64)
}

/// Sleep for `duration` in short slices, waking early on shutdown
///
/// Returns `false` if the running flag cleared while sleeping, `true` if
/// the full duration elapsed with the flag still set.
pub fn sleep_while_running(running: &Arc<Mutex<bool>>, duration: Duration) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !*running.lock().unwrap() {
            return false;
        }
        let slice = std::cmp::min(remaining, SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    *running.lock().unwrap()
}

/// Wait until the next wall-aligned boundary for `interval`
///
/// Returns `false` if shutdown was requested before the boundary arrived.
pub fn wait_for_boundary(running: &Arc<Mutex<bool>>, interval: Duration) -> bool {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let delay = delay_until_boundary(now_ms, interval);
    debug!("next cycle boundary in {:?}", delay);
    sleep_while_running(running, delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_rounds_up() {
        let interval = Duration::from_secs(30);
        // 10s past a boundary -> 20s to the next one
        assert_eq!(next_boundary_ms(10_000, interval), 30_000);
        assert_eq!(
            delay_until_boundary(10_000, interval),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn test_boundary_exact_multiple_fires_immediately() {
        let interval = Duration::from_secs(30);
        assert_eq!(next_boundary_ms(60_000, interval), 60_000);
        assert_eq!(delay_until_boundary(60_000, interval), Duration::ZERO);
    }

    #[test]
    fn test_boundary_one_ms_past() {
        let interval = Duration::from_secs(30);
        assert_eq!(next_boundary_ms(60_001, interval), 90_000);
        assert_eq!(
            delay_until_boundary(60_001, interval),
            Duration::from_millis(29_999)
        );
    }

    #[test]
    fn test_boundary_independent_of_start_time() {
        // The boundary depends only on the clock, not on when the exporter
        // started: two different "start" instants in the same interval slot
        // land on the same boundary.
        let interval = Duration::from_secs(30);
        assert_eq!(
            next_boundary_ms(1_700_000_012_000, interval),
            next_boundary_ms(1_700_000_017_500, interval)
        );
    }

    #[test]
    fn test_overrunning_cycle_lands_on_next_boundary() {
        // A cycle that starts at a boundary and takes 3s still schedules
        // the next run exactly one interval after the boundary, not 30s
        // after the cycle finished.
        let interval = Duration::from_secs(30);
        let boundary = 1_700_000_010_000;
        let cycle_done = boundary + 3_000;
        assert_eq!(next_boundary_ms(cycle_done, interval), boundary + 30_000);
    }

    #[test]
    fn test_sleep_while_running_interrupted() {
        let running = Arc::new(Mutex::new(false));
        let start = std::time::Instant::now();
        let completed = sleep_while_running(&running, Duration::from_secs(30));
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_while_running_completes() {
        let running = Arc::new(Mutex::new(true));
        let completed = sleep_while_running(&running, Duration::from_millis(20));
        assert!(completed);
    }
}
