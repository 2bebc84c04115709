//! Exposes an in-process mock target for use in integration tests.
//!
//! The mock serves the three resources the load test exercises:
//!
//!  - `GET /api/folders/{id}/contents`: a JSON folder listing
//!  - `GET /ui`: an HTML page
//!  - `GET /api/files/{id}`: a binary file of [`FILE_SIZE`] bytes, never compressed
//!
//! Two more routes misbehave on purpose:
//!
//!  - [`TRUNCATED_PATH`]: declares a longer `Content-Length` than it sends, then closes
//!  - [`SLOW_PATH`]: answers only after [`SLOW_RESPONSE_DELAY`]
//!
//! ```
//! use loadtest_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/ui");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream;
use serde_json::{Value, json};
use tower_http::compression::CompressionLayer;

/// Size of the file served by `GET /api/files/{id}`.
pub const FILE_SIZE: usize = 256 * 1024;

/// Path of a response whose body ends before its declared `Content-Length`.
pub const TRUNCATED_PATH: &str = "/broken/truncated";

/// Path of a response that is delayed by [`SLOW_RESPONSE_DELAY`].
pub const SLOW_PATH: &str = "/broken/slow";

/// Delay before [`SLOW_PATH`] responds.
pub const SLOW_RESPONSE_DELAY: Duration = Duration::from_secs(10);

/// How the mock answers `Accept-Encoding`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Negotiation {
    /// Compresses the listing and the page with gzip when requested.
    #[default]
    Honor,
    /// Never compresses, regardless of what the client accepts.
    Ignore,
}

/// An in-process mock target for use in integration tests.
///
/// It listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestServer {
    /// Starts a mock target that negotiates compression.
    pub async fn new() -> Self {
        Self::with_negotiation(Negotiation::Honor).await
    }

    /// Starts a mock target with the given negotiation behavior.
    pub async fn with_negotiation(negotiation: Negotiation) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let app = router(negotiation);
        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the base URL of the server, without a trailing slash.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url(), path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(negotiation: Negotiation) -> Router {
    let negotiated = Router::new()
        .route("/api/folders/{folder_id}/contents", get(folder_contents))
        .route("/ui", get(index));

    let negotiated = match negotiation {
        Negotiation::Honor => negotiated.layer(CompressionLayer::new()),
        Negotiation::Ignore => negotiated,
    };

    // Routes added after the layer are not compressed.
    negotiated
        .route("/api/files/{file_id}", get(download))
        .route(TRUNCATED_PATH, get(truncated))
        .route(SLOW_PATH, get(slow))
}

async fn folder_contents(Path(folder_id): Path<u64>) -> Json<Value> {
    let folders: Vec<_> = (0..10)
        .map(|i| {
            json!({
                "id": folder_id * 100 + i,
                "name": format!("folder-{i}"),
                "parentId": folder_id,
                "createdAt": "2025-01-01T00:00:00",
            })
        })
        .collect();
    let files: Vec<_> = (0..40)
        .map(|i| {
            json!({
                "id": folder_id * 1000 + i,
                "originalName": format!("report-{i}.pdf"),
                "fileSize": 11 * 1024 * 1024,
                "contentType": "application/pdf",
                "folderId": folder_id,
                "uploadStatus": "COMPLETED",
                "createdAt": "2025-01-01T00:00:00",
            })
        })
        .collect();

    Json(json!({
        "folderId": folder_id,
        "folderName": format!("folder-{folder_id}"),
        "folders": folders,
        "files": files,
    }))
}

async fn index() -> Html<String> {
    let rows: String = (0..50)
        .map(|i| format!("<tr><td>report-{i}.pdf</td><td>11 MB</td></tr>\n"))
        .collect();
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>Storage</title></head>\
         <body><table>\n{rows}</table></body></html>\n"
    ))
}

async fn download(Path(_file_id): Path<u64>) -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/pdf")], vec![0x25_u8; FILE_SIZE])
}

async fn truncated() -> impl IntoResponse {
    // A streamed body has no known size, so the declared length is sent as is.
    let body = stream::iter([Ok::<_, std::io::Error>("only part of the body")]);
    ([(CONTENT_LENGTH, "1024")], Body::from_stream(body))
}

async fn slow() -> &'static str {
    tokio::time::sleep(SLOW_RESPONSE_DELAY).await;
    "too late"
}
