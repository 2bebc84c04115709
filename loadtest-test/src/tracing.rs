use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["loadtest", "loadtest_test"];

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner, and only captures logs from the
/// load test crates.
///
/// # Example
///
/// ```
/// loadtest_test::tracing::init();
/// ```
pub fn init() {
    let mut env_filter = EnvFilter::new("ERROR");

    // Internal crates log at debug level, dependencies only on errors.
    for name in CRATE_NAMES {
        env_filter = env_filter.add_directive(format!("{name}=DEBUG").parse().unwrap());
    }

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
