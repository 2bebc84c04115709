use std::net::TcpListener;
use std::time::Duration;

use loadtest::{Config, RunReport};
use loadtest_test::server::{FILE_SIZE, Negotiation, TestServer};

fn config(base_url: String, vus: usize, duration: Duration) -> Config {
    Config {
        base_url,
        vus,
        duration,
        seed: Some(1234),
        thresholds: [("http_req_failed".to_owned(), vec!["rate<0.01".to_owned()])].into(),
        ..Default::default()
    }
}

async fn run(config: Config) -> RunReport {
    let scenario = config.scenario().unwrap();
    loadtest::run(scenario, false).await.unwrap()
}

fn mean(report: &RunReport, series: &str) -> f64 {
    report.metrics.trends[series].mean().unwrap()
}

#[tokio::test]
async fn passes_against_negotiating_target() {
    loadtest_test::tracing::init();
    let server = TestServer::new().await;

    let report = run(config(server.base_url(), 5, Duration::from_secs(2))).await;

    assert_eq!(report.failure_rate(), Some(0.0));
    assert!(report.verdict.pass, "{:?}", report.verdict);
    assert_eq!(report.verdict.evaluated, 1);
    assert!(report.elapsed >= Duration::from_secs(2));

    for prefix in ["api_gzip", "api_plain", "html_gzip", "html_plain"] {
        let series = format!("{prefix}_duration");
        assert!(report.metrics.trends[&series].count() > 0, "{series}");
    }
    assert_eq!(report.metrics.rates["checks"].rate(), Some(1.0));

    // Every timed request populates all phases, and the phases add up to the duration.
    let mut series: Vec<_> = ["api_gzip", "api_plain", "html_gzip", "html_plain"]
        .iter()
        .map(|prefix| {
            [
                format!("{prefix}_duration"),
                format!("{prefix}_ttfb"),
                format!("{prefix}_receiving"),
            ]
        })
        .collect();
    series.push(["http_req_duration", "http_req_waiting", "http_req_receiving"].map(String::from));

    for [duration, ttfb, receiving] in &series {
        let count = report.metrics.trends[duration].count();
        assert_eq!(report.metrics.trends[ttfb].count(), count, "{ttfb}");
        assert_eq!(report.metrics.trends[receiving].count(), count, "{receiving}");

        let phases = mean(&report, ttfb) + mean(&report, receiving);
        let total = mean(&report, duration);
        assert!((total - phases).abs() <= total * 1e-9, "{duration}: {total} != {phases}");
    }

    // Compressed responses are smaller on the wire.
    assert!(mean(&report, "api_gzip_bytes") < mean(&report, "api_plain_bytes"));
    assert!(mean(&report, "html_gzip_bytes") < mean(&report, "html_plain_bytes"));

    // Every iteration issues the four fixed requests, plus the occasional download.
    let iterations = report.metrics.counters["iterations"];
    let downloads = report
        .metrics
        .trends
        .get("file_download_duration")
        .map_or(0, |trend| trend.count());
    assert!(iterations > 0);
    assert_eq!(report.metrics.counters["http_reqs"], 4 * iterations + downloads);
}

#[tokio::test]
async fn downloads_file_when_always_included() {
    let server = TestServer::new().await;

    let mut config = config(server.base_url(), 2, Duration::from_millis(500));
    config.file_download_probability = 1.0;
    let report = run(config).await;

    let downloads = &report.metrics.trends["file_download_bytes"];
    assert_eq!(downloads.count(), report.metrics.counters["iterations"]);
    assert_eq!(downloads.min(), Some(FILE_SIZE as f64));
    assert_eq!(downloads.max(), Some(FILE_SIZE as f64));
    assert_eq!(report.metrics.rates["file_download_checks"].rate(), Some(1.0));
}

#[tokio::test]
async fn reports_failed_checks_when_target_ignores_negotiation() {
    let server = TestServer::with_negotiation(Negotiation::Ignore).await;

    let mut config = config(server.base_url(), 2, Duration::from_millis(500));
    config
        .thresholds
        .insert("checks".to_owned(), vec!["rate>0.99".to_owned()]);
    let report = run(config).await;

    // Requests succeed, but the gzip checks of both compressed variants fail.
    assert_eq!(report.failure_rate(), Some(0.0));
    assert_eq!(report.metrics.rates["api_gzip_checks"].rate(), Some(0.5));
    assert_eq!(report.metrics.rates["html_gzip_checks"].rate(), Some(0.5));
    assert_eq!(report.metrics.rates["api_plain_checks"].rate(), Some(1.0));

    assert!(!report.verdict.pass);
    assert_eq!(report.verdict.violations.len(), 1);
    assert_eq!(report.verdict.violations[0].metric, "checks");
}

#[tokio::test]
async fn survives_unreachable_target() {
    // Reserve a port and release it again, so that nothing listens on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = config(format!("http://127.0.0.1:{port}"), 2, Duration::from_millis(300));
    config.request_timeout = Duration::from_millis(200);
    config
        .thresholds
        .insert("http_req_duration".to_owned(), vec!["p(95)<2000".to_owned()]);
    let report = run(config).await;

    assert_eq!(report.failure_rate(), Some(1.0));
    assert_eq!(report.metrics.rates["checks"].rate(), Some(0.0));
    assert!(report.metrics.counters["iterations"] > 0);
    assert!(!report.metrics.trends.contains_key("api_gzip_duration"));

    // Both thresholds are reported: one violated, one without any data.
    assert!(!report.verdict.pass);
    assert_eq!(report.verdict.violations.len(), 2);
}

#[tokio::test]
async fn rejects_invalid_configuration_before_starting() {
    let config = Config {
        vus: 0,
        ..Default::default()
    };
    assert!(config.scenario().is_err());

    let config = Config {
        file_download_probability: -0.5,
        ..Default::default()
    };
    assert!(config.scenario().is_err());
}
