//! Aggregation / history engine
//!
//! Maintains bounded rolling windows of metric samples per entity or
//! department. The finest window receives one sample per monitoring tick;
//! whenever it has accumulated a full roll-up batch, the batch is
//! aggregated (mean for scores and rates, max for the cumulative task
//! counter) into one
//! sample of the next coarser window, hourly → daily → weekly. Every
//! window enforces its retention by dropping the oldest sample.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated measurement for an entity or department at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub throughput: f64,
    pub tasks_completed: u64,
}

/// Window granularities, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
}

/// Trend classification over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Retention and roll-up settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Capacity of the finest (hourly) window
    #[serde(default = "default_hourly_capacity")]
    pub hourly_capacity: usize,

    /// Capacity of the daily window
    #[serde(default = "default_daily_capacity")]
    pub daily_capacity: usize,

    /// Capacity of the weekly window
    #[serde(default = "default_weekly_capacity")]
    pub weekly_capacity: usize,

    /// Fine samples aggregated into one daily sample
    #[serde(default = "default_rollup_every")]
    pub rollup_every: usize,
}

fn default_hourly_capacity() -> usize {
    24
}

fn default_daily_capacity() -> usize {
    30
}

fn default_weekly_capacity() -> usize {
    12
}

fn default_rollup_every() -> usize {
    24
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            hourly_capacity: default_hourly_capacity(),
            daily_capacity: default_daily_capacity(),
            weekly_capacity: default_weekly_capacity(),
            rollup_every: default_rollup_every(),
        }
    }
}

/// A bounded, ordered sequence of samples at one granularity.
#[derive(Debug)]
struct Window {
    samples: VecDeque<MetricSample>,
    capacity: usize,
    since_rollup: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            since_rollup: 0,
        }
    }

    fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.since_rollup += 1;
    }

    /// Aggregate the last `batch` samples into one coarser sample once a
    /// full batch has accumulated.
    fn take_rollup(&mut self, batch: usize) -> Option<MetricSample> {
        if batch == 0 || self.since_rollup < batch {
            return None;
        }
        self.since_rollup = 0;

        let available = self.samples.len().min(batch);
        let start = self.samples.len() - available;
        Some(aggregate(self.samples.range(start..)))
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Mean for scores and rates, max for the cumulative task counter
/// (summing would multiply the running total by the batch size),
/// stamped with the newest sample's timestamp.
fn aggregate<'a>(samples: impl Iterator<Item = &'a MetricSample>) -> MetricSample {
    let mut count = 0usize;
    let mut health_score = 0.0;
    let mut response_time_ms = 0.0;
    let mut error_rate = 0.0;
    let mut throughput = 0.0;
    let mut tasks_completed = 0u64;
    let mut timestamp = DateTime::<Utc>::MIN_UTC;

    for sample in samples {
        count += 1;
        health_score += sample.health_score;
        response_time_ms += sample.response_time_ms;
        error_rate += sample.error_rate;
        throughput += sample.throughput;
        tasks_completed = tasks_completed.max(sample.tasks_completed);
        timestamp = timestamp.max(sample.timestamp);
    }

    let n = count.max(1) as f64;
    MetricSample {
        timestamp,
        health_score: health_score / n,
        response_time_ms: response_time_ms / n,
        error_rate: error_rate / n,
        throughput: throughput / n,
        tasks_completed,
    }
}

/// Rolling windows for one entity or department.
#[derive(Debug)]
struct Series {
    hourly: Window,
    daily: Window,
    weekly: Window,
}

/// History engine holding one series per key.
#[derive(Debug)]
pub struct HistoryEngine {
    config: HistoryConfig,
    series: HashMap<String, Series>,
}

impl HistoryEngine {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            series: HashMap::new(),
        }
    }

    /// Append one sample to the finest window of `key`, cascading
    /// roll-ups into the coarser windows when batches fill up.
    pub fn record(&mut self, key: &str, sample: MetricSample) {
        let config = self.config;
        let series = self.series.entry(key.to_string()).or_insert_with(|| Series {
            hourly: Window::new(config.hourly_capacity),
            daily: Window::new(config.daily_capacity),
            weekly: Window::new(config.weekly_capacity),
        });

        series.hourly.push(sample);

        if let Some(daily_sample) = series.hourly.take_rollup(config.rollup_every) {
            series.daily.push(daily_sample);

            if let Some(weekly_sample) = series.daily.take_rollup(config.daily_capacity) {
                series.weekly.push(weekly_sample);
            }
        }
    }

    /// Latest fine-grained sample for `key`.
    pub fn latest(&self, key: &str) -> Option<MetricSample> {
        self.series
            .get(key)
            .and_then(|s| s.hourly.samples.back())
            .copied()
    }

    /// All samples within the last `within` at the given granularity,
    /// oldest first.
    pub fn range(
        &self,
        key: &str,
        granularity: Granularity,
        within: Duration,
        now: DateTime<Utc>,
    ) -> Vec<MetricSample> {
        let cutoff = now - within;
        self.window(key, granularity)
            .map(|w| {
                w.samples
                    .iter()
                    .filter(|s| s.timestamp >= cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Classify the health-score trend of `key` at a granularity.
    pub fn trend(&self, key: &str, granularity: Granularity) -> Trend {
        self.trend_of(key, granularity, |s| s.health_score)
    }

    /// Classify the trend of an arbitrary sample field.
    ///
    /// Compares the mean of the most recent half of the window against the
    /// mean of the prior half, with a 5% hysteresis band so noise does not
    /// flap the classification.
    pub fn trend_of(
        &self,
        key: &str,
        granularity: Granularity,
        value: impl Fn(&MetricSample) -> f64,
    ) -> Trend {
        let Some(window) = self.window(key, granularity) else {
            return Trend::Stable;
        };

        let n = window.len();
        if n < 2 {
            return Trend::Stable;
        }

        let half = n / 2;
        let split = n - half;
        let prior: Vec<f64> = window.samples.range(..split).map(&value).collect();
        let recent: Vec<f64> = window.samples.range(split..).map(&value).collect();

        let prior_mean = prior.iter().sum::<f64>() / prior.len() as f64;
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;

        if recent_mean > prior_mean * 1.05 {
            Trend::Improving
        } else if recent_mean < prior_mean * 0.95 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Number of samples currently retained for `key`.
    pub fn len(&self, key: &str, granularity: Granularity) -> usize {
        self.window(key, granularity).map(Window::len).unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    fn window(&self, key: &str, granularity: Granularity) -> Option<&Window> {
        let series = self.series.get(key)?;
        Some(match granularity {
            Granularity::Hourly => &series.hourly,
            Granularity::Daily => &series.daily,
            Granularity::Weekly => &series.weekly,
        })
    }
}
