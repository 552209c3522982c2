//! Tracing setup for the binary.
//!
//! The library only emits `tracing` events. Whoever embeds it decides where
//! they go, either by installing a global subscriber with [`init_logging`] or
//! by handing a [`log_dispatch`] to `Orchestrator::with_dispatch`.

use std::env;
use tracing::Dispatch;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the filter directives, e.g. `dirsort=debug`.
pub const LOG_ENV: &str = "DIRSORT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn filter(default_level: &str) -> EnvFilter {
    let directives = env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build a stderr dispatcher without installing it anywhere.
pub fn log_dispatch(format: LogFormat, default_level: &str) -> Dispatch {
    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).json()),
        ),
    };

    let subscriber = tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(filter(default_level));
    Dispatch::new(subscriber)
}

/// Install [`log_dispatch`] as the global default.
pub fn init_logging(format: LogFormat, default_level: &str) -> Result<(), TryInitError> {
    log_dispatch(format, default_level).try_init()
}
