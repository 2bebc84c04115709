//! The summary of a finished run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use bytesize::ByteSize;
use serde::Serialize;
use yansi::Paint;

use crate::metrics::{Rate, Snapshot, Trend};
use crate::threshold::{self, Threshold, Verdict};

/// Percentiles reported for every trend, in addition to the requested ones.
const STANDARD_PERCENTILES: [f64; 4] = [50.0, 90.0, 95.0, 99.0];

/// Aggregate results of a run, produced once after all virtual users have finished.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Wall-clock time from start until the last virtual user finished.
    pub elapsed: Duration,
    /// Number of virtual users the run was configured with.
    pub vus: usize,
    /// All recorded series.
    pub metrics: Snapshot,
    /// Percentiles included for every trend in the summary, sorted.
    pub percentiles: Vec<f64>,
    /// The threshold verdict.
    pub verdict: Verdict,
}

impl RunReport {
    /// Creates a report without thresholds, which always passes.
    ///
    /// The summary shows p50, p90, p95 and p99 of every trend, plus `percentiles`.
    pub fn new(metrics: Snapshot, elapsed: Duration, vus: usize, percentiles: &[f64]) -> Self {
        let mut all_percentiles: Vec<f64> = STANDARD_PERCENTILES
            .iter()
            .chain(percentiles)
            .copied()
            .filter(|p| (0.0..=100.0).contains(p))
            .collect();
        all_percentiles.sort_by(f64::total_cmp);
        all_percentiles.dedup();

        Self {
            elapsed,
            vus,
            metrics,
            percentiles: all_percentiles,
            verdict: Verdict {
                pass: true,
                ..Default::default()
            },
        }
    }

    /// Evaluates `thresholds` against this report and stores the verdict.
    pub fn with_thresholds(mut self, thresholds: &[Threshold]) -> Self {
        self.verdict = threshold::evaluate(&self, thresholds);
        self
    }

    /// The fraction of failed requests, or `None` if no request was made.
    pub fn failure_rate(&self) -> Option<f64> {
        self.metrics
            .rates
            .get("http_req_failed")
            .and_then(Rate::rate)
    }

    /// Serializable form of the report, used for the JSON summary export.
    pub fn summary(&self) -> Summary {
        let mut metrics = BTreeMap::new();

        for (name, trend) in &self.metrics.trends {
            let mut percentiles = BTreeMap::new();
            for &p in &self.percentiles {
                if let Some(value) = trend.percentile(p) {
                    percentiles.insert(format!("p({p})"), value);
                }
            }
            metrics.insert(
                name.clone(),
                MetricSummary::Trend {
                    count: trend.count(),
                    avg: trend.mean(),
                    min: trend.min(),
                    med: trend.median(),
                    max: trend.max(),
                    percentiles,
                },
            );
        }

        for (name, rate) in &self.metrics.rates {
            metrics.insert(
                name.clone(),
                MetricSummary::Rate {
                    rate: rate.rate(),
                    passes: rate.hits,
                    fails: rate.total - rate.hits,
                },
            );
        }

        let secs = self.elapsed.as_secs_f64();
        for (name, &count) in &self.metrics.counters {
            metrics.insert(
                name.clone(),
                MetricSummary::Counter {
                    count,
                    rate: if secs > 0.0 { count as f64 / secs } else { 0.0 },
                },
            );
        }

        Summary {
            elapsed_ms: self.elapsed.as_secs_f64() * 1000.0,
            vus: self.vus,
            metrics,
            verdict: self.verdict.clone(),
        }
    }

    /// Renders the human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);

        let _ = writeln!(
            out,
            "{} ({} vus, {:.2?})",
            "## SUMMARY".bold(),
            self.vus.bold(),
            self.elapsed
        );

        let requests = self.metrics.counters.get("http_reqs").copied().unwrap_or(0);
        let iterations = self.metrics.counters.get("iterations").copied().unwrap_or(0);
        let received = self.metrics.counters.get("data_received").copied().unwrap_or(0);
        let _ = writeln!(
            out,
            "  requests: {} ({:.2}/s); iterations: {} ({:.2}/s); received: {} ({}/s)",
            requests.bold(),
            requests as f64 / secs,
            iterations.bold(),
            iterations as f64 / secs,
            ByteSize::b(received).bold(),
            ByteSize::b((received as f64 / secs) as u64),
        );

        for (name, rate) in &self.metrics.rates {
            let Some(value) = rate.rate() else { continue };
            let _ = writeln!(
                out,
                "  {name}: {:.2}% ({} of {})",
                (value * 100.0).bold(),
                rate.hits,
                rate.total
            );
        }

        let _ = writeln!(out);
        for (name, trend) in &self.metrics.trends {
            let _ = writeln!(out, "{} ({} samples)", name.bold().blue(), trend.count());
            self.render_trend(&mut out, name, trend);
        }

        let _ = writeln!(out);
        if self.verdict.pass {
            let _ = writeln!(
                out,
                "{} ({} thresholds)",
                "PASSED".bold().green(),
                self.verdict.evaluated
            );
        } else {
            let _ = writeln!(
                out,
                "{} ({} of {} thresholds violated)",
                "FAILED".bold().red(),
                self.verdict.violations.len(),
                self.verdict.evaluated
            );
            for violation in &self.verdict.violations {
                let _ = writeln!(out, "  {} {violation}", "✗".red());
            }
        }

        out
    }

    fn render_trend(&self, out: &mut String, name: &str, trend: &Trend) {
        let format = |value: Option<f64>| match value {
            Some(value) if name.ends_with("_bytes") => ByteSize::b(value as u64).to_string(),
            Some(value) => format!("{value:.2}ms"),
            None => "-".to_owned(),
        };

        let _ = write!(
            out,
            "  avg: {}; min: {}; max: {}",
            format(trend.mean()).bold(),
            format(trend.min()),
            format(trend.max())
        );
        for &p in &self.percentiles {
            let _ = write!(out, "; p{p}: {}", format(trend.percentile(p)));
        }
        let _ = writeln!(out);
    }
}

/// Machine-readable summary of a run.
#[derive(Debug, Serialize)]
pub struct Summary {
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: f64,
    /// Number of virtual users.
    pub vus: usize,
    /// Aggregates of every recorded series.
    pub metrics: BTreeMap<String, MetricSummary>,
    /// The threshold verdict.
    pub verdict: Verdict,
}

/// Aggregates of a single series.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    /// A distribution.
    Trend {
        /// Number of samples.
        count: u64,
        /// Mean.
        avg: Option<f64>,
        /// Minimum.
        min: Option<f64>,
        /// Median.
        med: Option<f64>,
        /// Maximum.
        max: Option<f64>,
        /// Configured percentiles, keyed as `p(N)`.
        #[serde(flatten)]
        percentiles: BTreeMap<String, f64>,
    },
    /// A boolean rate.
    Rate {
        /// Fraction of `true` observations.
        rate: Option<f64>,
        /// Number of `true` observations.
        passes: u64,
        /// Number of `false` observations.
        fails: u64,
    },
    /// A monotonic total.
    Counter {
        /// The total.
        count: u64,
        /// The total per second of run time.
        rate: f64,
    },
}

#[cfg(test)]
mod tests {
    use crate::metrics::Collector;

    use super::*;

    fn sample_report() -> RunReport {
        let collector = Collector::new();
        for value in [10.0, 20.0, 30.0, 40.0] {
            collector.observe("api_gzip_duration", value);
        }
        collector.add_rate("http_req_failed", false);
        collector.add_rate("http_req_failed", true);
        collector.add_counter("http_reqs", 4);
        collector.add_counter("data_received", 4096);

        RunReport::new(collector.snapshot(), Duration::from_secs(2), 5, &[99.9, 95.0])
    }

    #[test]
    fn summary_contains_all_series() {
        let report = sample_report();
        assert_eq!(report.failure_rate(), Some(0.5));

        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["vus"], 5);
        assert_eq!(json["elapsed_ms"], 2000.0);

        let trend = &json["metrics"]["api_gzip_duration"];
        assert_eq!(trend["type"], "trend");
        assert_eq!(trend["count"], 4);
        assert_eq!(trend["avg"], 25.0);
        assert_eq!(trend["min"], 10.0);
        assert_eq!(trend["max"], 40.0);
        assert!(trend["p(95)"].is_number());
        assert!(trend["p(50)"].is_number());
        assert!(trend["p(99.9)"].is_number());
        assert_eq!(report.percentiles, [50.0, 90.0, 95.0, 99.0, 99.9]);

        let rate = &json["metrics"]["http_req_failed"];
        assert_eq!(rate["type"], "rate");
        assert_eq!(rate["rate"], 0.5);
        assert_eq!(rate["passes"], 1);
        assert_eq!(rate["fails"], 1);

        let counter = &json["metrics"]["http_reqs"];
        assert_eq!(counter["type"], "counter");
        assert_eq!(counter["count"], 4);
        assert_eq!(counter["rate"], 2.0);

        assert_eq!(json["verdict"]["pass"], true);
    }

    #[test]
    fn renders_violations() {
        let threshold = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        let report = sample_report().with_thresholds(&[threshold]);
        assert!(!report.verdict.pass);

        yansi::disable();
        let rendered = report.render();
        assert!(rendered.contains("api_gzip_duration (4 samples)"));
        assert!(rendered.contains("FAILED (1 of 1 thresholds violated)"));
        assert!(rendered.contains("http_req_failed: rate<0.01 (actual: 0.5000)"));
    }
}
