//! Pass/fail criteria over the aggregate metrics of a run.
//!
//! Thresholds use the expression syntax of k6, attached to a metric name:
//!
//! ```yaml
//! thresholds:
//!   http_req_duration: ["p(95)<2000", "avg<500"]
//!   http_req_failed: ["rate<0.01"]
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::ConfigError;
use crate::report::RunReport;

/// The aggregate statistic a threshold compares.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Statistic {
    /// Mean of a trend.
    Avg,
    /// Minimum of a trend.
    Min,
    /// Maximum of a trend.
    Max,
    /// Median of a trend.
    Med,
    /// Percentile of a trend, within `0..=100`.
    Percentile(f64),
    /// Number of samples of a trend, or the value of a counter.
    Count,
    /// Fraction of `true` observations of a rate, or per-second throughput of a counter.
    Rate,
}

impl Statistic {
    fn parse(input: &str) -> Option<Self> {
        let statistic = match input {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "med" => Self::Med,
            "count" => Self::Count,
            "rate" => Self::Rate,
            _ => {
                let p = input.strip_prefix("p(")?.strip_suffix(')')?;
                let p: f64 = p.trim().parse().ok()?;
                if !(0.0..=100.0).contains(&p) {
                    return None;
                }
                Self::Percentile(p)
            }
        };
        Some(statistic)
    }
}

/// The comparison between statistic and bound. The threshold passes if it holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparison {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
}

impl Comparison {
    // Two-character operators first, so that `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::LessOrEqual),
        (">=", Comparison::GreaterOrEqual),
        ("==", Comparison::Equal),
        ("!=", Comparison::NotEqual),
        ("<", Comparison::Less),
        (">", Comparison::Greater),
    ];

    fn holds(self, actual: f64, bound: f64) -> bool {
        match self {
            Self::Less => actual < bound,
            Self::LessOrEqual => actual <= bound,
            Self::Greater => actual > bound,
            Self::GreaterOrEqual => actual >= bound,
            Self::Equal => actual == bound,
            Self::NotEqual => actual != bound,
        }
    }
}

/// A single pass/fail rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    /// The metric the rule applies to.
    pub metric: String,
    /// The expression as configured.
    pub expression: String,
    /// The compared statistic.
    pub statistic: Statistic,
    /// The comparison operator.
    pub comparison: Comparison,
    /// The bound the statistic is compared to.
    pub bound: f64,
}

impl Threshold {
    /// Parses an expression such as `p(95)<2000` for the given metric.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::Threshold {
            metric: metric.to_owned(),
            expression: expression.to_owned(),
            reason,
        };

        let compact: String = expression.split_whitespace().collect();
        let (position, operator, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|&(op, comparison)| compact.find(op).map(|pos| (pos, op, comparison)))
            .min_by_key(|&(pos, op, _)| (pos, std::cmp::Reverse(op.len())))
            .ok_or_else(|| invalid("missing comparison operator"))?;

        let statistic = Statistic::parse(&compact[..position])
            .ok_or_else(|| invalid("unknown statistic"))?;
        let bound: f64 = compact[position + operator.len()..]
            .parse()
            .map_err(|_| invalid("bound is not a number"))?;
        if !bound.is_finite() {
            return Err(invalid("bound is not a number"));
        }

        Ok(Self {
            metric: metric.to_owned(),
            expression: expression.to_owned(),
            statistic,
            comparison,
            bound,
        })
    }

    /// Computes the referenced statistic from the report.
    ///
    /// Returns `None` if the metric has no data, or if the statistic does not apply to the kind
    /// of metric.
    pub fn actual(&self, report: &RunReport) -> Option<f64> {
        let metrics = &report.metrics;

        if let Some(trend) = metrics.trends.get(&self.metric) {
            return match self.statistic {
                Statistic::Avg => trend.mean(),
                Statistic::Min => trend.min(),
                Statistic::Max => trend.max(),
                Statistic::Med => trend.median(),
                Statistic::Percentile(p) => trend.percentile(p),
                Statistic::Count => Some(trend.count() as f64),
                Statistic::Rate => None,
            };
        }

        if let Some(rate) = metrics.rates.get(&self.metric) {
            return match self.statistic {
                Statistic::Rate => rate.rate(),
                Statistic::Count => Some(rate.hits as f64),
                _ => None,
            };
        }

        if let Some(&count) = metrics.counters.get(&self.metric) {
            return match self.statistic {
                Statistic::Count => Some(count as f64),
                Statistic::Rate => {
                    let secs = report.elapsed.as_secs_f64();
                    (secs > 0.0).then(|| count as f64 / secs)
                }
                _ => None,
            };
        }

        None
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

/// A threshold that did not hold.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Violation {
    /// The metric the threshold applies to.
    pub metric: String,
    /// The threshold expression.
    pub expression: String,
    /// The observed statistic, or `None` if it could not be computed.
    pub actual: Option<f64>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "{}: {} (actual: {actual:.4})", self.metric, self.expression),
            None => write!(f, "{}: {} (no data)", self.metric, self.expression),
        }
    }
}

/// The overall outcome of evaluating all thresholds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Verdict {
    /// `true` if no threshold was violated.
    pub pass: bool,
    /// Number of evaluated thresholds.
    pub evaluated: usize,
    /// Every violated threshold, in configuration order.
    pub violations: Vec<Violation>,
}

/// Evaluates every threshold against the report.
///
/// All thresholds are evaluated, so the verdict lists every violation rather than the first.
pub fn evaluate(report: &RunReport, thresholds: &[Threshold]) -> Verdict {
    let violations: Vec<_> = thresholds
        .iter()
        .filter_map(|threshold| {
            let actual = threshold.actual(report);
            let holds = actual.is_some_and(|value| threshold.comparison.holds(value, threshold.bound));

            if holds {
                tracing::debug!(%threshold, ?actual, "threshold passed");
                return None;
            }

            tracing::debug!(%threshold, ?actual, "threshold violated");
            Some(Violation {
                metric: threshold.metric.clone(),
                expression: threshold.expression.clone(),
                actual,
            })
        })
        .collect();

    Verdict {
        pass: violations.is_empty(),
        evaluated: thresholds.len(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::metrics::Collector;

    use super::*;

    fn report(collector: &Collector) -> RunReport {
        RunReport::new(collector.snapshot(), Duration::from_secs(10), 1, &[95.0])
    }

    fn parse(metric: &str, expression: &str) -> Threshold {
        Threshold::parse(metric, expression).unwrap()
    }

    #[test]
    fn parses_expressions() {
        let threshold = parse("http_req_duration", "p(95)<2000");
        assert_eq!(threshold.statistic, Statistic::Percentile(95.0));
        assert_eq!(threshold.comparison, Comparison::Less);
        assert_eq!(threshold.bound, 2000.0);

        let threshold = parse("http_req_failed", " rate <= 0.01 ");
        assert_eq!(threshold.statistic, Statistic::Rate);
        assert_eq!(threshold.comparison, Comparison::LessOrEqual);
        assert_eq!(threshold.bound, 0.01);

        let threshold = parse("iterations", "count>=100");
        assert_eq!(threshold.statistic, Statistic::Count);
        assert_eq!(threshold.comparison, Comparison::GreaterOrEqual);

        let threshold = parse("api_gzip_duration", "p(99.9)!=0");
        assert_eq!(threshold.statistic, Statistic::Percentile(99.9));
        assert_eq!(threshold.comparison, Comparison::NotEqual);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expression in ["p95<2000", "avg", "avg<", "avg<abc", "p(101)<5", "median<5", "avg<inf"] {
            assert!(
                Threshold::parse("http_req_duration", expression).is_err(),
                "{expression} should not parse"
            );
        }
    }

    #[test]
    fn passes_when_all_hold() {
        let collector = Collector::new();
        for value in [100.0, 200.0, 300.0] {
            collector.observe("http_req_duration", value);
        }
        collector.add_rate("http_req_failed", false);
        collector.add_counter("http_reqs", 3);

        let thresholds = [
            parse("http_req_duration", "p(95)<2000"),
            parse("http_req_duration", "avg==200"),
            parse("http_req_duration", "max<=300"),
            parse("http_req_failed", "rate<0.01"),
            parse("http_reqs", "count>0"),
            parse("http_reqs", "rate<1"),
        ];

        let verdict = evaluate(&report(&collector), &thresholds);
        assert!(verdict.pass, "{verdict:?}");
        assert_eq!(verdict.evaluated, 6);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let collector = Collector::new();
        collector.observe("http_req_duration", 3000.0);
        collector.add_rate("http_req_failed", true);
        collector.add_rate("http_req_failed", false);

        let thresholds = [
            parse("http_req_duration", "p(95)<2000"),
            parse("http_req_duration", "min>0"),
            parse("http_req_failed", "rate<0.01"),
            parse("checks", "rate>0.99"),
        ];

        let verdict = evaluate(&report(&collector), &thresholds);
        assert!(!verdict.pass);
        assert_eq!(verdict.evaluated, 4);

        let violated: Vec<_> = verdict
            .violations
            .iter()
            .map(|v| (v.metric.as_str(), v.expression.as_str()))
            .collect();
        assert_eq!(
            violated,
            [
                ("http_req_duration", "p(95)<2000"),
                ("http_req_failed", "rate<0.01"),
                ("checks", "rate>0.99"),
            ]
        );
        assert_eq!(verdict.violations[1].actual, Some(0.5));
        assert_eq!(verdict.violations[2].actual, None);
    }

    #[test]
    fn statistic_must_match_metric_kind() {
        let collector = Collector::new();
        collector.add_rate("http_req_failed", false);
        collector.observe("http_req_duration", 1.0);

        let verdict = evaluate(
            &report(&collector),
            &[
                parse("http_req_failed", "avg<1"),
                parse("http_req_duration", "rate<1"),
            ],
        );
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.violations.iter().all(|v| v.actual.is_none()));
    }
}
