//! Rolling-window latency summary.
//!
//! Quantiles are computed exactly over the observations of the last
//! `max_age`, keeping at most `max_samples` of the newest ones; `sum` and
//! `count` are cumulative since start, matching the Prometheus summary
//! convention.

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Metric, MetricFamily, MetricType, Quantile, Summary};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Quantiles reported by default: median, p90 and p99.
pub const DEFAULT_OBJECTIVES: &[f64] = &[0.5, 0.9, 0.99];

/// Window over which quantiles are computed.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

/// Most observations held in the window; older ones are dropped first.
pub const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// Point-in-time view of a [`LatencySummary`], values in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(quantile, value)` pairs in objective order. Values are `NaN` when
    /// the window is empty.
    pub quantiles: Vec<(f64, f64)>,
}

impl SummarySnapshot {
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|(objective, _)| *objective == q)
            .map(|&(_, v)| v)
    }
}

#[derive(Default)]
struct Window {
    samples: VecDeque<(Instant, f64)>,
    count: u64,
    sum: f64,
}

impl Window {
    fn expire(&mut self, now: Instant, max_age: Duration) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) <= max_age {
                break;
            }
            self.samples.pop_front();
        }
    }
}

/// A Prometheus summary with fixed quantile objectives over a rolling window.
///
/// Cloning is cheap and every clone observes into the same window.
#[derive(Clone)]
pub struct LatencySummary {
    desc: Desc,
    objectives: Arc<[f64]>,
    max_age: Duration,
    max_samples: usize,
    window: Arc<Mutex<Window>>,
}

impl LatencySummary {
    pub fn new(
        name: &str,
        help: &str,
        objectives: &[f64],
        max_age: Duration,
    ) -> prometheus::Result<Self> {
        let desc = Desc::new(name.to_string(), help.to_string(), Vec::new(), HashMap::new())?;
        Ok(Self {
            desc,
            objectives: objectives.into(),
            max_age,
            max_samples: DEFAULT_MAX_SAMPLES,
            window: Arc::new(Mutex::new(Window::default())),
        })
    }

    /// Caps the samples kept for quantiles. Zero is treated as one.
    #[must_use]
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(1);
        self
    }

    pub fn observe(&self, elapsed: Duration) {
        self.observe_at(Instant::now(), elapsed.as_secs_f64());
    }

    fn observe_at(&self, now: Instant, seconds: f64) {
        let mut window = self.window.lock();
        window.expire(now, self.max_age);
        window.samples.push_back((now, seconds));
        while window.samples.len() > self.max_samples {
            window.samples.pop_front();
        }
        window.count += 1;
        window.sum += seconds;
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        self.window.lock().samples.len()
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> SummarySnapshot {
        let (mut values, count, sum) = {
            let mut window = self.window.lock();
            window.expire(now, self.max_age);
            let values: Vec<f64> = window.samples.iter().map(|&(_, v)| v).collect();
            (values, window.count, window.sum)
        };
        values.sort_by(f64::total_cmp);

        let quantiles = self
            .objectives
            .iter()
            .map(|&q| (q, rank(&values, q)))
            .collect();
        SummarySnapshot {
            count,
            sum,
            quantiles,
        }
    }
}

/// Nearest-rank quantile of sorted `values`.
fn rank(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let idx = (q * values.len() as f64).ceil() as usize;
    values[idx.clamp(1, values.len()) - 1]
}

impl Collector for LatencySummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snap = self.snapshot();

        let quantiles: Vec<Quantile> = snap
            .quantiles
            .iter()
            .map(|&(q, v)| {
                let mut quantile = Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(v);
                quantile
            })
            .collect();

        let mut summary = Summary::default();
        summary.set_sample_count(snap.count);
        summary.set_sample_sum(snap.sum);
        summary.set_quantile(quantiles.into());

        let mut metric = Metric::default();
        metric.set_summary(summary);

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.set_metric(vec![metric].into());
        vec![family]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(max_age: Duration) -> LatencySummary {
        LatencySummary::new("test_latency", "test", DEFAULT_OBJECTIVES, max_age).unwrap()
    }

    #[test]
    fn empty_window_reports_nan() {
        let snap = summary(DEFAULT_MAX_AGE).snapshot();
        assert_eq!(snap.count, 0);
        assert!(snap.quantile(0.5).unwrap().is_nan());
    }

    #[test]
    fn nearest_rank_quantiles() {
        let s = summary(DEFAULT_MAX_AGE);
        let now = Instant::now();
        for i in 1..=100 {
            s.observe_at(now, i as f64);
        }

        let snap = s.snapshot_at(now);
        assert_eq!(snap.count, 100);
        assert_eq!(snap.sum, 5050.0);
        assert_eq!(snap.quantile(0.5), Some(50.0));
        assert_eq!(snap.quantile(0.9), Some(90.0));
        assert_eq!(snap.quantile(0.99), Some(99.0));
    }

    #[test]
    fn single_sample_fills_every_quantile() {
        let s = summary(DEFAULT_MAX_AGE);
        s.observe(Duration::from_millis(3));
        let snap = s.snapshot();
        for (_, v) in snap.quantiles {
            assert!((v - 0.003).abs() < 1e-9);
        }
    }

    #[test]
    fn old_samples_leave_the_window_but_stay_counted() {
        let s = summary(Duration::from_secs(30));
        let start = Instant::now();
        s.observe_at(start, 100.0);
        s.observe_at(start + Duration::from_secs(20), 1.0);

        let later = start + Duration::from_secs(40);
        let snap = s.snapshot_at(later);
        assert_eq!(snap.quantile(0.99), Some(1.0));
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sum, 101.0);
    }

    #[test]
    fn clones_share_the_window() {
        let s = summary(DEFAULT_MAX_AGE);
        let clone = s.clone();
        clone.observe(Duration::from_millis(1));
        assert_eq!(s.snapshot().count, 1);
    }

    #[test]
    fn window_keeps_only_the_newest_samples() {
        let s = summary(DEFAULT_MAX_AGE);
        let now = Instant::now();
        for _ in 0..DEFAULT_MAX_SAMPLES * 3 {
            s.observe_at(now, 0.5);
        }
        assert_eq!(s.retained(), DEFAULT_MAX_SAMPLES);
        assert_eq!(s.snapshot_at(now).count, (DEFAULT_MAX_SAMPLES * 3) as u64);
    }

    #[test]
    fn capped_window_drops_oldest_first() {
        let s = summary(DEFAULT_MAX_AGE).with_max_samples(4);
        let now = Instant::now();
        for _ in 0..4 {
            s.observe_at(now, 100.0);
        }
        for _ in 0..4 {
            s.observe_at(now, 1.0);
        }

        let snap = s.snapshot_at(now);
        assert_eq!(s.retained(), 4);
        assert_eq!(snap.quantile(0.99), Some(1.0));
        assert_eq!(snap.count, 8);
        assert_eq!(snap.sum, 404.0);
    }
}
