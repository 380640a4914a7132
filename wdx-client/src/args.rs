// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Standard command line of parameter service client daemons.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::optparse::{ConfigError, OptionId, OptionTable, ParseError};

const SERVICE_NAME: &str = "WAGO Parameter Service";
const LOG_CHANNEL_OPTIONS: &str = "<stdout|stderr|syslog|journal>";
const LOG_LEVEL_OPTIONS: &str = "<off|fatal|error|warning|notice|info|debug>";
const TRACER_OPTIONS: &str = "<none|stdout|stderr|ktrace|ktrace-passive>";
const TRACE_ROUTE_OPTIONS: &str = "<all|lifetime-mgmt|provider-calls>";

pub const MAX_WORKER_COUNT: u8 = 8;

pub const TRACE_ROUTE_LIFETIME_MGMT: u32 = 1 << 0;
pub const TRACE_ROUTE_PROVIDER_CALLS: u32 = 1 << 1;
pub const TRACE_ROUTE_ALL: u32 = TRACE_ROUTE_LIFETIME_MGMT | TRACE_ROUTE_PROVIDER_CALLS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogChannel {
    Stdout,
    #[default]
    Stderr,
    Syslog,
    Journal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Default)]
pub enum LogLevel {
    Off,
    Fatal,
    Error,
    Warning,
    Notice,
    #[default]
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracerKind {
    #[default]
    None,
    Stdout,
    Stderr,
    Ktrace,
    KtracePassive,
}

/// Additional option a concrete client daemon contributes to the standard
/// set. The short option must be an uppercase letter; lowercase letters are
/// reserved for the standard options.
#[derive(Debug, Clone)]
pub struct ClientOption {
    pub short: char,
    pub long: String,
    pub help: String,
}

pub struct Arguments {
    parse_error: Option<String>,
    help_requested: bool,
    help_text: String,
    log_channel: LogChannel,
    log_level: LogLevel,
    tracer: TracerKind,
    trace_routes: u32,
    user: String,
    group: String,
    backend_socket: String,
    worker_count: u8,
    additional: HashMap<char, String>,
}

impl Arguments {
    /// Builds the option table and parses `argv` (including the program
    /// name). Configuration problems with `additional_options` surface as
    /// `ConfigError`; value problems are recorded as a parse error for the
    /// caller to report.
    pub fn from_args(
        name: &str,
        argv: &[String],
        additional_options: &[ClientOption],
    ) -> Result<Self, ConfigError> {
        let log_channel = Arc::new(Mutex::new(LogChannel::default()));
        let log_level = Arc::new(Mutex::new(LogLevel::default()));
        let tracer = Arc::new(Mutex::new(TracerKind::default()));
        let trace_routes = Arc::new(Mutex::new(0u32));

        let mut table = OptionTable::new("client");
        {
            let cell = log_channel.clone();
            table.add_custom(
                'c' as OptionId,
                "log-channel",
                "Log channel to use for log output.",
                LOG_CHANNEL_OPTIONS,
                Arc::new(move |_, value| {
                    *lock(&cell) = parse_log_channel(value)?;
                    Ok(())
                }),
            )?;
        }
        {
            let cell = log_level.clone();
            table.add_custom(
                'l' as OptionId,
                "log-level",
                "Log level (verbosity) to use for log output.",
                LOG_LEVEL_OPTIONS,
                Arc::new(move |_, value| {
                    *lock(&cell) = parse_log_level(value)?;
                    Ok(())
                }),
            )?;
        }
        {
            let cell = tracer.clone();
            table.add_custom(
                't' as OptionId,
                "tracer",
                "Tracer to use for trace marks (if some route is enabled, \"none\" disables tracing).",
                TRACER_OPTIONS,
                Arc::new(move |_, value| {
                    *lock(&cell) = parse_tracer(value)?;
                    Ok(())
                }),
            )?;
        }
        {
            let cell = trace_routes.clone();
            table.add_custom(
                'a' as OptionId,
                "trace-route",
                "Trace route to activate for trace marks (option may be used multiple times).",
                TRACE_ROUTE_OPTIONS,
                Arc::new(move |_, value| {
                    *lock(&cell) |= parse_trace_route(value)?;
                    Ok(())
                }),
            )?;
        }
        table.add_text(
            'u' as OptionId,
            "user",
            "Run application with access rights for given user.",
            "<user>",
        )?;
        table.add_text(
            'g' as OptionId,
            "group",
            "Run application with access rights for given group.",
            "<group>",
        )?;
        table.add_text(
            'b' as OptionId,
            "backend-socket",
            &format!("Use given socket path to connect to {SERVICE_NAME} backend."),
            "<path>",
        )?;
        table.add_unsigned(
            'w' as OptionId,
            "worker-count",
            &format!("Use given count of additional worker threads to serve {SERVICE_NAME} requests."),
            "<count>",
        )?;

        for option in additional_options {
            if !option.short.is_ascii_uppercase() {
                // Lowercase short options belong to the standard set.
                return Err(ConfigError::ReservedId(option.short as OptionId));
            }
            table.add_text(option.short as OptionId, &option.long, &option.help, "<value>")?;
        }

        table.set_help_title(format!(
            "===== {name} - A client daemon for {SERVICE_NAME} ====="
        ));
        table.set_help_additional_info(format!("This program is a client for {SERVICE_NAME}."));
        table.add_help_example("client -l warning", "Set program log level to \"warning\".");
        table.add_help_example(
            "client --user admin --group testgroup",
            "Program will drop root privileges and use access rights for user \"admin\" and group \"testgroup\".",
        );
        table.add_help_example(
            "client --worker-count 2",
            &format!("Program will use two additional worker threads to serve requests from {SERVICE_NAME}."),
        );

        let help_text = table.help();
        let mut arguments = Arguments {
            parse_error: None,
            help_requested: false,
            help_text,
            log_channel: LogChannel::default(),
            log_level: LogLevel::default(),
            tracer: TracerKind::default(),
            trace_routes: 0,
            user: String::new(),
            group: String::new(),
            backend_socket: String::new(),
            worker_count: 0,
            additional: HashMap::new(),
        };

        match table.parse(argv) {
            Ok(values) => {
                arguments.help_requested = values.help_requested();
                arguments.user = values.text('u' as OptionId).unwrap_or("").to_string();
                arguments.group = values.text('g' as OptionId).unwrap_or("").to_string();
                arguments.backend_socket =
                    values.text('b' as OptionId).unwrap_or("").to_string();
                for option in additional_options {
                    if let Some(value) = values.text(option.short as OptionId) {
                        arguments.additional.insert(option.short, value.to_string());
                    }
                }
                let workers = values.unsigned('w' as OptionId).unwrap_or(0);
                if workers > u64::from(MAX_WORKER_COUNT) {
                    arguments.parse_error = Some(format!(
                        "Maximum worker count is {MAX_WORKER_COUNT}, but requested worker count is {workers}"
                    ));
                } else {
                    arguments.worker_count = workers as u8;
                }
            }
            Err(ParseError::Invalid(message)) => {
                arguments.parse_error = Some(message);
            }
            Err(ParseError::Conversion { option, message }) => {
                arguments.parse_error =
                    Some(format!("Error in argument for option \"{option}\": {message}"));
            }
        }

        arguments.log_channel = *lock(&log_channel);
        arguments.log_level = *lock(&log_level);
        arguments.tracer = *lock(&tracer);
        arguments.trace_routes = *lock(&trace_routes);
        Ok(arguments)
    }

    pub fn has_parse_error(&self) -> bool {
        self.parse_error.is_some()
    }

    pub fn parse_error(&self) -> &str {
        self.parse_error.as_deref().unwrap_or("")
    }

    pub fn help_requested(&self) -> bool {
        self.help_requested
    }

    pub fn help(&self) -> &str {
        &self.help_text
    }

    pub fn log_channel(&self) -> LogChannel {
        self.log_channel
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn tracer(&self) -> TracerKind {
        self.tracer
    }

    pub fn trace_routes(&self) -> u32 {
        self.trace_routes
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn backend_socket(&self) -> &str {
        &self.backend_socket
    }

    pub fn worker_count(&self) -> u8 {
        self.worker_count
    }

    /// Value of an additional client option, by its short name.
    pub fn additional(&self, short: char) -> Option<&str> {
        self.additional.get(&short).map(String::as_str)
    }
}

#[allow(clippy::unwrap_used)]
fn lock<T>(cell: &Arc<Mutex<T>>) -> std::sync::MutexGuard<'_, T> {
    cell.lock().unwrap()
}

fn invalid_value(value: &str, allowed: &str) -> String {
    format!("Invalid value \"{value}\", allowed values are: {allowed}")
}

fn parse_log_channel(value: &str) -> Result<LogChannel, String> {
    match value {
        "stdout" => Ok(LogChannel::Stdout),
        "stderr" => Ok(LogChannel::Stderr),
        "syslog" => Ok(LogChannel::Syslog),
        "journal" => Ok(LogChannel::Journal),
        other => Err(invalid_value(other, LOG_CHANNEL_OPTIONS)),
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    match value {
        "off" => Ok(LogLevel::Off),
        "fatal" => Ok(LogLevel::Fatal),
        "error" => Ok(LogLevel::Error),
        "warning" => Ok(LogLevel::Warning),
        "notice" => Ok(LogLevel::Notice),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        other => Err(invalid_value(other, LOG_LEVEL_OPTIONS)),
    }
}

fn parse_tracer(value: &str) -> Result<TracerKind, String> {
    match value {
        "none" => Ok(TracerKind::None),
        "stdout" => Ok(TracerKind::Stdout),
        "stderr" => Ok(TracerKind::Stderr),
        "ktrace" => Ok(TracerKind::Ktrace),
        "ktrace-passive" => Ok(TracerKind::KtracePassive),
        other => Err(invalid_value(other, TRACER_OPTIONS)),
    }
}

fn parse_trace_route(value: &str) -> Result<u32, String> {
    match value {
        "lifetime-mgmt" => Ok(TRACE_ROUTE_LIFETIME_MGMT),
        "provider-calls" => Ok(TRACE_ROUTE_PROVIDER_CALLS),
        "all" => Ok(TRACE_ROUTE_ALL),
        other => Err(invalid_value(other, TRACE_ROUTE_OPTIONS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("client")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn parse(args: &[&str]) -> Arguments {
        Arguments::from_args("testclient", &argv(args), &[]).unwrap()
    }

    #[test]
    fn defaults_without_any_options() {
        let args = parse(&[]);
        assert!(!args.has_parse_error());
        assert!(!args.help_requested());
        assert_eq!(args.log_channel(), LogChannel::Stderr);
        assert_eq!(args.log_level(), LogLevel::Info);
        assert_eq!(args.tracer(), TracerKind::None);
        assert_eq!(args.trace_routes(), 0);
        assert_eq!(args.backend_socket(), "");
        assert_eq!(args.worker_count(), 0);
    }

    #[test]
    fn standard_options_are_parsed() {
        let args = parse(&[
            "-c",
            "stdout",
            "--log-level",
            "debug",
            "-t",
            "stderr",
            "-a",
            "lifetime-mgmt",
            "-a",
            "provider-calls",
            "--user",
            "admin",
            "--group",
            "operators",
            "--backend-socket",
            "/run/wdx/paramd.sock",
            "-w",
            "4",
        ]);
        assert!(!args.has_parse_error());
        assert_eq!(args.log_channel(), LogChannel::Stdout);
        assert_eq!(args.log_level(), LogLevel::Debug);
        assert_eq!(args.tracer(), TracerKind::Stderr);
        assert_eq!(args.trace_routes(), TRACE_ROUTE_ALL);
        assert_eq!(args.user(), "admin");
        assert_eq!(args.group(), "operators");
        assert_eq!(args.backend_socket(), "/run/wdx/paramd.sock");
        assert_eq!(args.worker_count(), 4);
    }

    #[test]
    fn invalid_enum_values_record_a_parse_error() {
        let args = parse(&["--log-level", "chatty"]);
        assert!(args.has_parse_error());
        assert!(args.parse_error().contains("log-level"));
        assert!(args.parse_error().contains("chatty"));
    }

    #[test]
    fn excessive_worker_count_is_a_parse_error() {
        let args = parse(&["--worker-count", "9"]);
        assert!(args.has_parse_error());
        assert!(args.parse_error().contains("Maximum worker count is 8"));

        let args = parse(&["--worker-count", "8"]);
        assert!(!args.has_parse_error());
        assert_eq!(args.worker_count(), 8);
    }

    #[test]
    fn help_request_is_reported() {
        let args = parse(&["--help"]);
        assert!(args.help_requested());
        assert!(args.help().contains("testclient"));
        assert!(args.help().contains("--backend-socket"));
        assert!(args.help().contains("Examples:"));
    }

    #[test]
    fn additional_options_must_be_uppercase() {
        let option = ClientOption {
            short: 'x',
            long: "extra".to_string(),
            help: "Extra.".to_string(),
        };
        assert!(Arguments::from_args("testclient", &argv(&[]), &[option]).is_err());
    }

    #[test]
    fn additional_options_are_available_by_short_name() {
        let option = ClientOption {
            short: 'P',
            long: "profile".to_string(),
            help: "Profile to load.".to_string(),
        };
        let args = Arguments::from_args(
            "testclient",
            &argv(&["--profile", "factory"]),
            &[option],
        )
        .unwrap();
        assert!(!args.has_parse_error());
        assert_eq!(args.additional('P'), Some("factory"));
        assert_eq!(args.additional('Q'), None);
    }

    #[test]
    fn unknown_options_record_a_parse_error() {
        let args = parse(&["--does-not-exist"]);
        assert!(args.has_parse_error());
    }
}
