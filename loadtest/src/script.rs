//! The per-iteration workload comparing compressed and uncompressed responses.
//!
//! Every iteration issues the same four requests in order: the JSON listing and the HTML page,
//! each once with compression requested and once without. With a configurable probability, a
//! fifth request downloads a large file. Every request is checked and timed, and its timings are
//! recorded under the metric prefix of its group, such as `api_gzip_duration`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::HeaderMap;
use tracing::Instrument;

use crate::executor::{VirtualUser, Workload};
use crate::metrics::Collector;
use crate::probe::{Probe, ProbeRequest, ProbeResult};
use crate::random::{RandomSource, bernoulli};

/// Targets and header sets of the workload.
#[derive(Clone, Debug)]
pub struct ScriptConfig {
    /// URL of the JSON listing.
    pub api_url: Url,
    /// URL of the HTML page.
    pub html_url: Url,
    /// URL of the large file.
    pub file_url: Url,
    /// Headers requesting compression.
    pub compressed_headers: HeaderMap,
    /// Headers requesting no compression.
    pub plain_headers: HeaderMap,
    /// Probability of including the file download in an iteration.
    pub file_download_probability: f64,
}

#[derive(Clone, Copy, Debug)]
enum Target {
    Api,
    Html,
    File,
}

#[derive(Clone, Copy, Debug)]
enum Variant {
    Compressed,
    Plain,
}

/// What a response must declare in its `Content-Encoding`.
#[derive(Clone, Copy, Debug)]
enum Expect {
    Gzip,
    NoGzip,
    Anything,
}

/// One named request of the iteration.
#[derive(Clone, Copy, Debug)]
struct Step {
    group: &'static str,
    prefix: &'static str,
    target: Target,
    variant: Variant,
    expect: Expect,
}

const FIXED_STEPS: [Step; 4] = [
    Step {
        group: "API JSON (gzip)",
        prefix: "api_gzip",
        target: Target::Api,
        variant: Variant::Compressed,
        expect: Expect::Gzip,
    },
    Step {
        group: "API JSON (plain)",
        prefix: "api_plain",
        target: Target::Api,
        variant: Variant::Plain,
        expect: Expect::NoGzip,
    },
    Step {
        group: "UI HTML (gzip)",
        prefix: "html_gzip",
        target: Target::Html,
        variant: Variant::Compressed,
        expect: Expect::Gzip,
    },
    Step {
        group: "UI HTML (plain)",
        prefix: "html_plain",
        target: Target::Html,
        variant: Variant::Plain,
        expect: Expect::NoGzip,
    },
];

const FILE_DOWNLOAD: Step = Step {
    group: "File Download",
    prefix: "file_download",
    target: Target::File,
    variant: Variant::Plain,
    expect: Expect::Anything,
};

/// The compression comparison workload.
#[derive(Clone)]
pub struct CompressionScript {
    config: ScriptConfig,
    probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for CompressionScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionScript")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompressionScript {
    /// Creates the workload issuing its requests through `probe`.
    pub fn new(config: ScriptConfig, probe: Arc<dyn Probe>) -> Self {
        Self { config, probe }
    }

    /// Runs one iteration.
    ///
    /// All four fixed steps are attempted in order regardless of the outcome of earlier steps.
    /// The file download is included if a draw from `random` falls below the configured
    /// probability. Returns the number of requests attempted.
    pub async fn run(&self, collector: &Collector, random: &mut dyn RandomSource) -> usize {
        for step in &FIXED_STEPS {
            self.run_step(step, collector).await;
        }

        if bernoulli(random, self.config.file_download_probability) {
            self.run_step(&FILE_DOWNLOAD, collector).await;
            FIXED_STEPS.len() + 1
        } else {
            FIXED_STEPS.len()
        }
    }

    fn request(&self, step: &Step) -> ProbeRequest {
        let url = match step.target {
            Target::Api => &self.config.api_url,
            Target::Html => &self.config.html_url,
            Target::File => &self.config.file_url,
        };
        let headers = match step.variant {
            Variant::Compressed => &self.config.compressed_headers,
            Variant::Plain => &self.config.plain_headers,
        };
        ProbeRequest::get(url.clone(), headers.clone())
    }

    async fn run_step(&self, step: &Step, collector: &Collector) {
        let request = self.request(step);
        let span = tracing::debug_span!("group", group = step.group);
        let outcome = self.probe.probe(&request).instrument(span).await;

        collector.add_counter("http_reqs", 1);
        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    group = step.group,
                    "request failed"
                );
                collector.add_rate("http_req_failed", true);
                // Without a response, the status check fails like for a zero status.
                check(step, "status 200", false, collector);
                return;
            }
        };

        record_timings(step, &result, collector);

        check(step, "status 200", result.status == StatusCode::OK, collector);
        match step.expect {
            Expect::Gzip => check(step, "gzip enabled", result.is_encoded_with("gzip"), collector),
            Expect::NoGzip => check(step, "no gzip", !result.is_encoded_with("gzip"), collector),
            Expect::Anything => {}
        }
    }
}

fn record_timings(step: &Step, result: &ProbeResult, collector: &Collector) {
    let timings = result.timings;
    let duration = millis(timings.duration);
    let waiting = millis(timings.waiting);
    let receiving = millis(timings.receiving);

    let prefix = step.prefix;
    collector.observe(&format!("{prefix}_duration"), duration);
    collector.observe(&format!("{prefix}_ttfb"), waiting);
    collector.observe(&format!("{prefix}_receiving"), receiving);
    collector.observe(&format!("{prefix}_bytes"), result.body_bytes as f64);

    // Only statuses outside 200..=399 count as failed requests.
    let failed = !(200..400).contains(&result.status.as_u16());
    collector.add_rate("http_req_failed", failed);
    collector.observe("http_req_duration", duration);
    collector.observe("http_req_waiting", waiting);
    collector.observe("http_req_receiving", receiving);
    collector.add_counter("data_received", result.body_bytes);
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

fn check(step: &Step, name: &str, passed: bool, collector: &Collector) {
    if !passed {
        tracing::debug!(group = step.group, check = name, "check failed");
    }
    collector.add_rate("checks", passed);
    collector.add_rate(&format!("{}_checks", step.prefix), passed);
}

#[async_trait]
impl Workload for CompressionScript {
    async fn iterate(&self, vu: &mut VirtualUser) -> anyhow::Result<()> {
        self.run(&vu.collector, vu.random.as_mut()).await;
        Ok(())
    }
}
