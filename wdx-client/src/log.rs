// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logging setup driven by the daemon command line.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::{LogChannel, LogLevel};

/// Directive string for the subscriber filter. `fatal` and `notice` have no
/// direct tracing counterpart and map to the nearest level.
fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Off => "off",
        LogLevel::Fatal | LogLevel::Error => "error",
        LogLevel::Warning => "warn",
        LogLevel::Notice | LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    }
}

/// Initializes the process-wide subscriber. Harmless when called twice; the
/// first initialization wins.
pub fn init_logging(channel: LogChannel, level: LogLevel) {
    let filter = EnvFilter::new(level_directive(level));
    let initialized = match channel {
        LogChannel::Stdout => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stdout)
            .try_init(),
        // There is no syslog/journal writer in the stack; those channels log
        // to stderr like a service unit would capture anyway.
        LogChannel::Stderr | LogChannel::Syslog | LogChannel::Journal => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
        }
    };
    if initialized.is_ok() && matches!(channel, LogChannel::Syslog | LogChannel::Journal) {
        info!("requested log channel is not natively supported, logging to stderr");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_subscriber_directives() {
        assert_eq!(level_directive(LogLevel::Off), "off");
        assert_eq!(level_directive(LogLevel::Fatal), "error");
        assert_eq!(level_directive(LogLevel::Error), "error");
        assert_eq!(level_directive(LogLevel::Warning), "warn");
        assert_eq!(level_directive(LogLevel::Notice), "info");
        assert_eq!(level_directive(LogLevel::Info), "info");
        assert_eq!(level_directive(LogLevel::Debug), "debug");
    }

    #[test]
    fn repeated_initialization_is_harmless() {
        init_logging(LogChannel::Stderr, LogLevel::Info);
        init_logging(LogChannel::Stdout, LogLevel::Debug);
    }
}
