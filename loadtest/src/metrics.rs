//! Concurrent accumulation of named metric series.
//!
//! The [`Collector`] is shared by every virtual user of a run. Series are created lazily on
//! first use. Each series lives behind its own lock, so virtual users recording into different
//! series never contend with each other. The registry lock is only taken for writing when a
//! series is created for the first time.
//!
//! Three kinds of series exist, mirroring what the load test records:
//!
//!  - [`Trend`]: a distribution of samples, such as durations in milliseconds or byte counts.
//!  - [`Rate`]: the fraction of boolean observations that were `true`, such as failed requests.
//!  - Counters: monotonically increasing totals, such as the number of iterations.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use sketches_ddsketch::DDSketch;

/// A distribution of numeric samples.
///
/// Samples are accumulated into a [`DDSketch`], which keeps exact counts, sums and extrema and
/// answers percentile queries with bounded relative error.
#[derive(Clone, Default)]
pub struct Trend {
    sketch: DDSketch,
}

impl std::fmt::Debug for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trend")
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish_non_exhaustive()
    }
}

impl Trend {
    /// Appends a sample.
    pub fn add(&mut self, value: f64) {
        self.sketch.add(value);
    }

    /// The number of samples.
    pub fn count(&self) -> u64 {
        self.sketch.count() as u64
    }

    /// The arithmetic mean, or `None` if there are no samples.
    pub fn mean(&self) -> Option<f64> {
        let count = self.sketch.count();
        if count == 0 {
            return None;
        }
        self.sketch.sum().map(|sum| sum / count as f64)
    }

    /// The smallest sample.
    pub fn min(&self) -> Option<f64> {
        self.sketch.min()
    }

    /// The largest sample.
    pub fn max(&self) -> Option<f64> {
        self.sketch.max()
    }

    /// The value at the given percentile, where `p` is within `0..=100`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if !(0.0..=100.0).contains(&p) {
            return None;
        }
        let value = self.sketch.quantile(p / 100.0).ok().flatten()?;
        // Sketch buckets can overshoot the observed range slightly.
        Some(value.clamp(self.min()?, self.max()?))
    }

    /// The median, equivalent to the 50th percentile.
    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }
}

/// The fraction of observations that were `true`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rate {
    /// Number of `true` observations.
    pub hits: u64,
    /// Number of all observations.
    pub total: u64,
}

impl Rate {
    /// Records one observation.
    pub fn add(&mut self, value: bool) {
        self.total += 1;
        if value {
            self.hits += 1;
        }
    }

    /// The fraction of `true` observations, or `None` if nothing was observed.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }
}

/// A named set of series of the same kind, each behind its own lock.
#[derive(Debug)]
struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::default(),
        }
    }
}

impl<T: Clone + Default> Registry<T> {
    fn entry(&self, name: &str) -> Arc<Mutex<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(name) {
            return Arc::clone(entry);
        }
        drop(entries);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(name.to_owned()).or_default())
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut T)) {
        let entry = self.entry(name);
        f(&mut lock(&entry));
    }

    fn snapshot(&self) -> BTreeMap<String, T> {
        // Clone the handles first so that no lock is held while copying series contents.
        let entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();

        entries
            .into_iter()
            .map(|(name, entry)| {
                let value = lock(&entry).clone();
                (name, value)
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe accumulator for all metrics of a run.
#[derive(Debug, Default)]
pub struct Collector {
    trends: Registry<Trend>,
    rates: Registry<Rate>,
    counters: Registry<u64>,
}

impl Collector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample to the named trend.
    pub fn observe(&self, series: &str, value: f64) {
        self.trends.update(series, |trend| trend.add(value));
    }

    /// Records a boolean observation into the named rate.
    pub fn add_rate(&self, series: &str, value: bool) {
        self.rates.update(series, |rate| rate.add(value));
    }

    /// Increments the named counter by `n`.
    pub fn add_counter(&self, series: &str, n: u64) {
        self.counters.update(series, |counter| *counter += n);
    }

    /// Returns a copy of all series recorded so far.
    ///
    /// Observations that complete while the snapshot is taken may or may not be included.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            trends: self.trends.snapshot(),
            rates: self.rates.snapshot(),
            counters: self.counters.snapshot(),
        }
    }
}

/// A copy of all series in a [`Collector`], sorted by name.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// All distributions.
    pub trends: BTreeMap<String, Trend>,
    /// All rates.
    pub rates: BTreeMap<String, Rate>,
    /// All counters.
    pub counters: BTreeMap<String, u64>,
}
