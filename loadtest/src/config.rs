//! Configuration for a load test run.
//!
//! Configuration is loaded from the following sources, in order of increasing precedence:
//!
//! 1. Defaults, matching the compression benchmark this tool was written for
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `LT__`)
//!
//! Environment variables use double underscores (`__`) to denote nested configuration
//! structures. For example:
//!
//! - `LT__VUS=10` sets the number of virtual users
//! - `LT__DURATION=1m` sets the run duration
//! - `LT__ENDPOINTS__API=/api/folders/7/contents` overrides the JSON listing endpoint
//!
//! The same configuration in YAML:
//!
//! ```yaml
//! vus: 10
//! duration: 1m
//! endpoints:
//!   api: /api/folders/7/contents
//! thresholds:
//!   http_req_duration: ["p(95)<2000"]
//!   http_req_failed: ["rate<0.01"]
//! ```
//!
//! A loaded [`Config`] is validated into a [`ScenarioConfig`] before the run starts. Any invalid
//! value is reported as a [`ConfigError`] and the run never begins.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;
use crate::script::ScriptConfig;
use crate::threshold::Threshold;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LT__";

/// Paths of the three resources exercised by the workload, relative to [`Config::base_url`].
///
/// Used in: [`Config::endpoints`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    /// JSON listing resource that supports gzip negotiation.
    ///
    /// # Default
    ///
    /// `/api/folders/2/contents`
    ///
    /// # Environment Variable
    ///
    /// `LT__ENDPOINTS__API`
    pub api: String,

    /// HTML page resource that supports gzip negotiation.
    ///
    /// # Default
    ///
    /// `/ui`
    ///
    /// # Environment Variable
    ///
    /// `LT__ENDPOINTS__HTML`
    pub html: String,

    /// Large binary file, served uncompressed.
    ///
    /// # Default
    ///
    /// `/api/files/5`
    ///
    /// # Environment Variable
    ///
    /// `LT__ENDPOINTS__FILE`
    pub file: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: "/api/folders/2/contents".into(),
            html: "/ui".into(),
            file: "/api/files/5".into(),
        }
    }
}

/// Header sets sent with every request, by variant.
///
/// Used in: [`Config::headers`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Headers {
    /// Headers requesting a compressed response.
    ///
    /// Header names are case-insensitive. Entries from a config file are merged with the
    /// defaults key by key.
    ///
    /// # Default
    ///
    /// `X-User-Id: 1` and `Accept-Encoding: gzip, deflate`
    pub compressed: BTreeMap<String, String>,

    /// Headers requesting an uncompressed response.
    ///
    /// # Default
    ///
    /// `X-User-Id: 1` and `Accept-Encoding: identity`
    pub plain: BTreeMap<String, String>,
}

impl Default for Headers {
    fn default() -> Self {
        let user = ("X-User-Id".to_owned(), "1".to_owned());
        Self {
            compressed: [
                user.clone(),
                ("Accept-Encoding".to_owned(), "gzip, deflate".to_owned()),
            ]
            .into(),
            plain: [user, ("Accept-Encoding".to_owned(), "identity".to_owned())].into(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty output for terminals, otherwise simplified.
    Auto,
    /// Pretty printing with colors.
    Pretty,
    /// Simplified plain text output.
    Simplified,
    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are written to stderr so they never mix with the summary.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Valid levels in increasing severity: TRACE, DEBUG, INFO, WARN, ERROR, OFF. The `RUST_LOG`
    /// environment variable takes precedence if set.
    ///
    /// # Default
    ///
    /// `WARN`, so that only the summary is printed unless something goes wrong.
    ///
    /// # Environment Variable
    ///
    /// `LT__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `LT__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
            format: LogFormat::Auto,
        }
    }
}

/// Raw load test configuration, as merged from all sources.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the target service. Must use the `http` or `https` scheme.
    ///
    /// # Default
    ///
    /// `http://localhost:8888`
    ///
    /// # Environment Variable
    ///
    /// `LT__BASE_URL`
    pub base_url: String,

    /// Number of concurrent virtual users. Must be at least `1`.
    ///
    /// # Default
    ///
    /// `50`
    ///
    /// # Environment Variable
    ///
    /// `LT__VUS`
    pub vus: usize,

    /// Wall-clock duration after which no new iterations start. Must not be zero.
    ///
    /// Iterations in flight at the deadline still run to completion.
    ///
    /// # Default
    ///
    /// `30s`
    ///
    /// # Environment Variable
    ///
    /// `LT__DURATION`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Upper bound for every single request, including reading the body. Must not be zero.
    ///
    /// # Default
    ///
    /// `60s`
    ///
    /// # Environment Variable
    ///
    /// `LT__REQUEST_TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Probability with which an iteration includes the file download. Must be within `[0, 1]`.
    ///
    /// # Default
    ///
    /// `0.1`
    ///
    /// # Environment Variable
    ///
    /// `LT__FILE_DOWNLOAD_PROBABILITY`
    pub file_download_probability: f64,

    /// Seed for the random sources of the virtual users.
    ///
    /// Virtual user `i` is seeded with `seed + i`. When unset, every virtual user is seeded from
    /// the thread-local generator and runs are not reproducible.
    ///
    /// # Default
    ///
    /// `None`
    ///
    /// # Environment Variable
    ///
    /// `LT__SEED`
    pub seed: Option<u64>,

    /// Resource paths of the target.
    pub endpoints: Endpoints,

    /// Request header sets.
    pub headers: Headers,

    /// Pass/fail criteria, keyed by metric name.
    ///
    /// Each entry is a list of expressions such as `p(95)<2000` or `rate<0.01`. A threshold on
    /// a metric without data is violated.
    ///
    /// # Default
    ///
    /// `http_req_duration: ["p(95)<2000"]` and `http_req_failed: ["rate<0.01"]`
    ///
    /// # Example
    ///
    /// ```yaml
    /// thresholds:
    ///   http_req_duration: ["p(95)<2000", "avg<500"]
    ///   checks: ["rate>0.99"]
    /// ```
    pub thresholds: BTreeMap<String, Vec<String>>,

    /// Additional percentiles shown for every trend in the summary. Each must be within
    /// `0..=100`.
    ///
    /// p50, p90, p95 and p99 are always shown.
    ///
    /// # Default
    ///
    /// `[50, 90, 95, 99]`
    pub summary_percentiles: Vec<f64>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8888".into(),
            vus: 50,
            duration: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            file_download_probability: 0.1,
            seed: None,
            endpoints: Endpoints::default(),
            headers: Headers::default(),
            thresholds: [
                ("http_req_duration".to_owned(), vec!["p(95)<2000".to_owned()]),
                ("http_req_failed".to_owned(), vec!["rate<0.01".to_owned()]),
            ]
            .into(),
            summary_percentiles: vec![50.0, 90.0, 95.0, 99.0],
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain values of the wrong type. Semantic validation happens in [`Config::scenario`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Validates the configuration into the immutable settings of a run.
    pub fn scenario(&self) -> Result<ScenarioConfig, ConfigError> {
        if self.vus == 0 {
            return Err(ConfigError::NoVirtualUsers);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let p = self.file_download_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Probability(p));
        }

        let base_url = parse_url(&self.base_url)?;
        let script = ScriptConfig {
            api_url: join_url(&base_url, &self.endpoints.api)?,
            html_url: join_url(&base_url, &self.endpoints.html)?,
            file_url: join_url(&base_url, &self.endpoints.file)?,
            compressed_headers: header_map(&self.headers.compressed)?,
            plain_headers: header_map(&self.headers.plain)?,
            file_download_probability: p,
        };

        let mut thresholds = Vec::new();
        for (metric, expressions) in &self.thresholds {
            for expression in expressions {
                thresholds.push(Threshold::parse(metric, expression)?);
            }
        }

        let mut summary_percentiles = self.summary_percentiles.clone();
        if let Some(&p) = summary_percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(ConfigError::Percentile(p));
        }
        summary_percentiles.sort_by(f64::total_cmp);
        summary_percentiles.dedup();

        Ok(ScenarioConfig {
            vus: self.vus,
            duration: self.duration,
            request_timeout: self.request_timeout,
            seed: self.seed,
            script,
            thresholds,
            summary_percentiles,
        })
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url).map_err(|err| ConfigError::Url {
        url: url.to_owned(),
        reason: err.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Url {
            url: url.to_owned(),
            reason: "scheme must be http or https".into(),
        });
    }

    Ok(parsed)
}

fn join_url(base: &Url, path: &str) -> Result<Url, ConfigError> {
    base.join(path).map_err(|err| ConfigError::Url {
        url: format!("{base}{path}"),
        reason: err.to_string(),
    })
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || ConfigError::Header { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Validated, immutable settings of a single run.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// Number of concurrent virtual users, at least `1`.
    pub vus: usize,
    /// Wall-clock cutoff for starting new iterations.
    pub duration: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Base seed for the virtual users' random sources.
    pub seed: Option<u64>,
    /// Targets and header sets of the workload script.
    pub script: ScriptConfig,
    /// Parsed pass/fail criteria.
    pub thresholds: Vec<Threshold>,
    /// Sorted percentiles shown in the summary.
    pub summary_percentiles: Vec<f64>,
}
