//! Error types for probes and run configuration.

use thiserror::Error;

/// A request did not produce a complete response.
///
/// Probe errors never abort a run. The script abandons the affected step and records it as a
/// failed request.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The request timed out before the response was complete.
    #[error("request to {url} timed out")]
    Timeout {
        /// The requested URL.
        url: String,
    },

    /// Connecting to the target failed, or the connection broke mid-response.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The requested URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

impl ProbeError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.to_owned() }
        } else {
            Self::Network {
                url: url.to_owned(),
                source,
            }
        }
    }
}

/// The run configuration is invalid. The run never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be merged or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// At least one virtual user is required.
    #[error("`vus` must be at least 1")]
    NoVirtualUsers,

    /// A zero-length run would never start an iteration.
    #[error("`duration` must be greater than zero")]
    ZeroDuration,

    /// Every request would time out immediately.
    #[error("`request_timeout` must be greater than zero")]
    ZeroTimeout,

    /// A summary percentile lies outside `0..=100`.
    #[error("`summary_percentiles` must be within [0, 100], got {0}")]
    Percentile(f64),

    /// The download probability must lie in `[0, 1]`.
    #[error("`file_download_probability` must be within [0, 1], got {0}")]
    Probability(f64),

    /// The base URL or an endpoint path does not form a valid URL.
    #[error("invalid target url `{url}`: {reason}")]
    Url {
        /// The offending URL.
        url: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A configured request header has an invalid name or value.
    #[error("invalid header `{name}`")]
    Header {
        /// The offending header name.
        name: String,
    },

    /// A threshold expression could not be parsed.
    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    Threshold {
        /// The metric the threshold is attached to.
        metric: String,
        /// The raw expression.
        expression: String,
        /// Why parsing failed.
        reason: &'static str,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Load(Box::new(error))
    }
}
