//! Initialization of structured logging.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global tracing subscriber, writing to stderr.
///
/// If `RUST_LOG` is set, it is used verbatim as filter. Otherwise, the configured level applies.
pub fn init_tracing(logging: &Logging) {
    let env_filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => EnvFilter::default().add_directive(logging.level.into()),
    };

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => format.pretty().boxed(),
        LogFormat::Auto | LogFormat::Simplified => format.compact().with_ansi(false).boxed(),
        LogFormat::Pretty => format.pretty().boxed(),
        LogFormat::Json => format.json().flatten_event(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(format)
        .with(env_filter)
        .init();
}
