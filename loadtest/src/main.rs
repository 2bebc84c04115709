//! Command line entry point for the compression load test.
//!
//! Runs the configured scenario, prints a summary to stdout and exits with status `99` if any
//! threshold was violated.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use argh::FromArgs;

use loadtest::Config;
use loadtest::observability::init_tracing;

/// Exit status when the run completed but violated thresholds.
const THRESHOLDS_FAILED: u8 = 99;

/// Load tester comparing compressed and uncompressed responses
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// write the JSON summary to this path
    #[argh(option)]
    summary_export: Option<PathBuf>,

    /// do not show a progress spinner
    #[argh(switch, short = 'q')]
    quiet: bool,
}

fn main() -> ExitCode {
    match execute() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(THRESHOLDS_FAILED),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the load test and returns whether all thresholds passed.
fn execute() -> anyhow::Result<bool> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref())?;
    let scenario = config.scenario()?;

    init_tracing(&config.logging);
    tracing::debug!(?config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadtest")
        .enable_all()
        .build()?;

    let report = runtime.block_on(loadtest::run(scenario, !args.quiet))?;

    println!("{}", report.render());

    if let Some(path) = args.summary_export {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report.summary())
            .context("failed to write summary")?;
    }

    Ok(report.verdict.pass)
}
