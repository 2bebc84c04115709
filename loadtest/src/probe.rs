//! Single timed HTTP requests against the target.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_ENCODING, HeaderMap};
use reqwest::{Method, StatusCode, Url};

use crate::error::ProbeError;

/// A request to be issued by a [`Probe`].
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL.
    pub url: Url,
    /// Headers sent verbatim with the request.
    pub headers: HeaderMap,
}

impl ProbeRequest {
    /// Creates a `GET` request.
    pub fn get(url: Url, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
        }
    }
}

/// Phase timings of a single request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timings {
    /// Total time, the sum of all measured phases.
    pub duration: Duration,
    /// Time from dispatching the request until the response head arrived.
    ///
    /// This includes connection setup, if the request could not reuse a pooled connection.
    pub waiting: Duration,
    /// Time from the response head until the last body byte arrived.
    pub receiving: Duration,
}

impl Timings {
    /// Creates timings from the two measured phases.
    pub fn new(waiting: Duration, receiving: Duration) -> Self {
        Self {
            duration: waiting + receiving,
            waiting,
            receiving,
        }
    }
}

/// The outcome of a completed request.
#[derive(Clone, Debug)]
pub struct ProbeResult {
    /// The response status.
    pub status: StatusCode,
    /// The response headers. Lookups are case-insensitive.
    pub headers: HeaderMap,
    /// Phase timings.
    pub timings: Timings,
    /// Number of body bytes received on the wire, before any content decoding.
    pub body_bytes: u64,
}

impl ProbeResult {
    /// Returns `true` if the `Content-Encoding` response header mentions `encoding`.
    pub fn is_encoded_with(&self, encoding: &str) -> bool {
        self.headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.to_ascii_lowercase().contains(encoding))
    }
}

/// Issues a request and measures it.
///
/// Implementations attempt every request exactly once.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Sends the request and reads the full response body.
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResult, ProbeError>;
}

/// A [`Probe`] that talks HTTP using a pooled [`reqwest::Client`].
///
/// The client never decodes response bodies, so the `Content-Encoding` chosen by the server is
/// observed as sent and byte counts reflect the transferred size.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Creates a probe where every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("loadtest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResult, ProbeError> {
        let url = request.url.as_str();
        let start = Instant::now();

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|err| ProbeError::from_reqwest(url, err))?;

        let waiting = start.elapsed();
        let status = response.status();
        let headers = response.headers().clone();

        let mut body_bytes = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ProbeError::from_reqwest(url, err))?;
            body_bytes += chunk.len() as u64;
        }
        let receiving = start.elapsed() - waiting;

        tracing::trace!(%url, %status, body_bytes, ?waiting, ?receiving, "request completed");

        Ok(ProbeResult {
            status,
            headers,
            timings: Timings::new(waiting, receiving),
            body_bytes,
        })
    }
}
