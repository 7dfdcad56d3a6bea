//! Rolling sample windows for smoothed aggregate metrics
//!
//! Aggregation collectors (the MySQL query-digest sampler) push one keyed
//! sample per poll into a bounded window. Entries older than the window
//! are pruned on every write, and the export cycle reads the per-key mean
//! rather than the instantaneous sample, smoothing spiky per-poll values.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// Bounded in-memory history of keyed numeric samples
#[derive(Debug)]
pub struct RollingWindow {
    window: Duration,
    samples: VecDeque<(DateTime<Utc>, BTreeMap<String, f64>)>,
}

impl RollingWindow {
    /// Window retaining samples for the given number of minutes
    pub fn new(window_minutes: i64) -> Self {
        Self {
            window: Duration::minutes(window_minutes),
            samples: VecDeque::new(),
        }
    }

    /// Insert a sample at an explicit instant, pruning expired entries
    pub fn insert(&mut self, at: DateTime<Utc>, sample: BTreeMap<String, f64>) {
        self.samples.push_back((at, sample));

        let cutoff = at - self.window;
        while let Some((timestamp, _)) = self.samples.front() {
            if *timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Insert a sample stamped with the current wall clock
    pub fn record(&mut self, sample: BTreeMap<String, f64>) {
        self.insert(Utc::now(), sample);
    }

    /// Per-key mean over the samples still inside the window at `now`
    ///
    /// Keys absent from some samples average only over the samples that
    /// carry them.
    pub fn averages_at(&self, now: DateTime<Utc>) -> BTreeMap<String, f64> {
        let cutoff = now - self.window;

        let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for (timestamp, sample) in &self.samples {
            if *timestamp < cutoff {
                continue;
            }
            for (key, value) in sample {
                let entry = sums.entry(key.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        sums.into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect()
    }

    /// Per-key mean over the window ending now
    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.averages_at(Utc::now())
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(minutes * 60, 0).unwrap()
    }

    fn sample(value: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("avg_query_time_ms".to_string(), value)])
    }

    #[test]
    fn test_mean_over_window() {
        let mut window = RollingWindow::new(60);
        window.insert(at(0), sample(10.0));
        window.insert(at(5), sample(20.0));
        window.insert(at(10), sample(30.0));

        let averages = window.averages_at(at(10));
        assert!((averages["avg_query_time_ms"] - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_samples_pruned_on_write() {
        let mut window = RollingWindow::new(60);
        window.insert(at(0), sample(100.0));
        window.insert(at(30), sample(100.0));
        assert_eq!(window.len(), 2);

        // 70 minutes in, the first sample has aged out.
        window.insert(at(70), sample(40.0));
        assert_eq!(window.len(), 2);

        let averages = window.averages_at(at(70));
        assert!((averages["avg_query_time_ms"] - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_window_has_no_averages() {
        let window = RollingWindow::new(60);
        assert!(window.is_empty());
        assert!(window.averages().is_empty());
    }

    #[test]
    fn test_sparse_keys_average_independently() {
        let mut window = RollingWindow::new(60);
        window.insert(
            at(0),
            BTreeMap::from([
                ("select_avg_query_time_ms".to_string(), 4.0),
                ("update_avg_query_time_ms".to_string(), 8.0),
            ]),
        );
        window.insert(
            at(5),
            BTreeMap::from([("select_avg_query_time_ms".to_string(), 6.0)]),
        );

        let averages = window.averages_at(at(5));
        assert!((averages["select_avg_query_time_ms"] - 5.0).abs() < f64::EPSILON);
        assert!((averages["update_avg_query_time_ms"] - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stale_samples_excluded_from_read_even_without_write() {
        let mut window = RollingWindow::new(60);
        window.insert(at(0), sample(50.0));

        // No write has pruned it, but a read far in the future must not
        // count it either.
        assert!(window.averages_at(at(120)).is_empty());
    }
}
