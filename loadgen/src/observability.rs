//! Logging and metrics setup for the binary.

use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::config::{Config, LogFormat};

/// Forwards metrics to Datadog if an API key is configured.
///
/// The returned flusher must be flushed before the process exits.
pub fn init_metrics(config: &Config) -> std::io::Result<Option<merni::DatadogFlusher>> {
    config
        .metrics
        .datadog_key
        .as_ref()
        .map(|api_key| {
            let mut builder =
                merni::datadog(api_key.expose_secret().as_str()).prefix("s3_loadgen.");
            for (k, v) in &config.metrics.tags {
                builder = builder.global_tag(k, v);
            }
            builder.try_init()
        })
        .transpose()
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config.logging.level);

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let format: Box<dyn Layer<Registry> + Send + Sync> =
        match resolve_format(config.logging.format, std::io::stderr().is_terminal()) {
            LogFormat::Json => format.json().flatten_event(true).boxed(),
            LogFormat::Simplified => format.compact().with_ansi(false).boxed(),
            LogFormat::Pretty | LogFormat::Auto => format.with_ansi(true).boxed(),
        };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Picks pretty output for terminals and plain output otherwise.
fn resolve_format(format: LogFormat, is_terminal: bool) -> LogFormat {
    match format {
        LogFormat::Auto if is_terminal => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    }
}

/// Combines the configured level with `RUST_LOG`.
///
/// A plain level in `RUST_LOG` overrides the configured level. Anything else is used as a
/// literal filter directive.
fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // The maximum verbosity, filtered down to `level` by the format layer.
    let env_filter = EnvFilter::new(
        "INFO,\
        loadgen=TRACE,\
        loadgen_store=TRACE,\
        s3_loadgen=TRACE,\
        ",
    );

    (level, env_filter)
}
