//! A load test harness comparing compressed and uncompressed responses of an HTTP service.
//!
//! A fixed pool of virtual users runs the [`CompressionScript`] back-to-back for a configured
//! duration. Every iteration requests a JSON listing and an HTML page, each once with gzip
//! requested and once without, and occasionally downloads a large file. Latencies,
//! time-to-first-byte and transferred bytes are recorded per variant into a shared
//! [`Collector`], and the resulting [`RunReport`] is checked against configurable thresholds.
//!
//! The run can be configured via YAML and environment variables, see [`config`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::sync::Arc;

use anyhow::Context;

pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observability;
pub mod probe;
pub mod random;
pub mod report;
pub mod script;
pub mod threshold;

pub use crate::config::{Config, ScenarioConfig};
pub use crate::executor::{Executor, ExecutorState, VirtualUser, Workload};
pub use crate::metrics::Collector;
pub use crate::probe::{HttpProbe, Probe};
pub use crate::random::RandomSource;
pub use crate::report::RunReport;
pub use crate::script::CompressionScript;

/// Runs the scenario against the configured target over HTTP.
///
/// Shows a progress spinner on stderr if `progress` is set.
pub async fn run(scenario: ScenarioConfig, progress: bool) -> anyhow::Result<RunReport> {
    let probe =
        HttpProbe::new(scenario.request_timeout).context("failed to create HTTP client")?;
    Ok(run_with_probe(scenario, Arc::new(probe), progress).await)
}

/// Runs the scenario, issuing all requests through `probe`.
pub async fn run_with_probe(
    scenario: ScenarioConfig,
    probe: Arc<dyn Probe>,
    progress: bool,
) -> RunReport {
    let ScenarioConfig {
        vus,
        duration,
        seed,
        script,
        thresholds,
        summary_percentiles,
        ..
    } = scenario;

    tracing::info!(
        vus,
        ?duration,
        target = %script.api_url.origin().ascii_serialization(),
        "starting load test"
    );

    let collector = Arc::new(Collector::new());
    let workload = Arc::new(CompressionScript::new(script, probe));

    let elapsed = Executor::new(vus, duration)
        .with_progress(progress)
        .run(workload, Arc::clone(&collector), |id| -> Box<dyn RandomSource> {
            Box::new(random::for_vu(seed, id))
        })
        .await;

    let report = RunReport::new(collector.snapshot(), elapsed, vus, &summary_percentiles)
        .with_thresholds(&thresholds);

    tracing::info!(
        pass = report.verdict.pass,
        violations = report.verdict.violations.len(),
        "load test finished"
    );

    report
}
