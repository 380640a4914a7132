// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configurable option table for daemon command lines.
//!
//! Option identity is an integer id; ids in `[A-Za-z]` double as the short
//! option. The table validates the configuration up front (uniqueness,
//! reserved short options, dead options without any way to spell them) and
//! then delegates tokenizing and value typing to a generated `clap` command.
//! Custom converters run after parsing; a conversion failure names the
//! offending long option.

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

/// Option identifier, usable as short option when in `[A-Za-z]`.
pub type OptionId = i32;

/// Converter for custom option values; invoked once per occurrence.
pub type CustomConverter = Arc<dyn Fn(OptionId, &str) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("option id {0} is reserved")]
    ReservedId(OptionId),
    #[error("option id {0} configured twice")]
    DuplicateId(OptionId),
    #[error("long option \"{0}\" configured twice")]
    DuplicateLong(String),
    #[error("option name \"{0}\" contains whitespace")]
    Whitespace(String),
    #[error("option id {0} is dead: no long option and not usable as short option")]
    DeadOption(OptionId),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Invalid(String),
    #[error("error in argument for option \"{option}\": {message}")]
    Conversion { option: String, message: String },
}

enum OptionKind {
    Flag,
    CountedFlag,
    Unsigned,
    Signed,
    Text,
    Custom(CustomConverter),
}

struct OptionSpec {
    id: OptionId,
    long: String,
    help: String,
    placeholder: Option<String>,
    kind: OptionKind,
}

impl OptionSpec {
    fn key(&self) -> String {
        if self.long.is_empty() {
            // Validation guarantees a short spelling exists.
            short_option(self.id).map(String::from).unwrap_or_default()
        } else {
            self.long.clone()
        }
    }
}

fn short_option(id: OptionId) -> Option<char> {
    u8::try_from(id)
        .ok()
        .map(char::from)
        .filter(char::is_ascii_alphabetic)
}

pub struct OptionTable {
    name: String,
    specs: Vec<OptionSpec>,
    auto_help: bool,
    help_title: String,
    help_info: String,
    examples: Vec<(String, String)>,
}

impl OptionTable {
    pub fn new(name: impl Into<String>) -> Self {
        OptionTable {
            name: name.into(),
            specs: Vec::new(),
            auto_help: true,
            help_title: String::new(),
            help_info: String::new(),
            examples: Vec::new(),
        }
    }

    /// Suppresses the implicit `-h/--help` option.
    pub fn disable_auto_help(&mut self) {
        self.auto_help = false;
    }

    pub fn set_help_title(&mut self, title: impl Into<String>) {
        self.help_title = title.into();
    }

    pub fn set_help_additional_info(&mut self, info: impl Into<String>) {
        self.help_info = info.into();
    }

    pub fn add_help_example(&mut self, call: impl Into<String>, description: impl Into<String>) {
        self.examples.push((call.into(), description.into()));
    }

    pub fn add_flag(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, None, OptionKind::Flag)
    }

    /// A flag that may be given multiple times; the parse result is the
    /// occurrence count.
    pub fn add_counted_flag(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, None, OptionKind::CountedFlag)
    }

    pub fn add_unsigned(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
        placeholder: &str,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, Some(placeholder), OptionKind::Unsigned)
    }

    pub fn add_signed(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
        placeholder: &str,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, Some(placeholder), OptionKind::Signed)
    }

    pub fn add_text(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
        placeholder: &str,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, Some(placeholder), OptionKind::Text)
    }

    /// An option whose (repeatable) values run through `converter`.
    pub fn add_custom(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
        placeholder: &str,
        converter: CustomConverter,
    ) -> Result<(), ConfigError> {
        self.add_spec(id, long, help, Some(placeholder), OptionKind::Custom(converter))
    }

    fn add_spec(
        &mut self,
        id: OptionId,
        long: &str,
        help: &str,
        placeholder: Option<&str>,
        kind: OptionKind,
    ) -> Result<(), ConfigError> {
        if id == 0 || id == '?' as OptionId {
            return Err(ConfigError::ReservedId(id));
        }
        if long.chars().any(char::is_whitespace) {
            return Err(ConfigError::Whitespace(long.to_string()));
        }
        let short = short_option(id);
        if long.is_empty() && short.is_none() {
            return Err(ConfigError::DeadOption(id));
        }
        if self.auto_help && (short == Some('h') || long == "help") {
            return Err(if short == Some('h') {
                ConfigError::DuplicateId(id)
            } else {
                ConfigError::DuplicateLong(long.to_string())
            });
        }
        for spec in &self.specs {
            if spec.id == id {
                return Err(ConfigError::DuplicateId(id));
            }
            if !long.is_empty() && spec.long == long {
                return Err(ConfigError::DuplicateLong(long.to_string()));
            }
        }
        self.specs.push(OptionSpec {
            id,
            long: long.to_string(),
            help: help.to_string(),
            placeholder: placeholder.map(str::to_string),
            kind,
        });
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.name.clone())
            .disable_help_flag(true)
            .disable_version_flag(true);
        if self.auto_help {
            command = command.arg(
                Arg::new("help")
                    .short('h')
                    .long("help")
                    .action(ArgAction::SetTrue)
                    .help("Print this help text."),
            );
        }
        for spec in &self.specs {
            let mut arg = Arg::new(spec.key()).help(spec.help.clone());
            if let Some(short) = short_option(spec.id) {
                arg = arg.short(short);
            }
            if !spec.long.is_empty() {
                arg = arg.long(spec.long.clone());
            }
            if let Some(placeholder) = &spec.placeholder {
                // clap adds its own angle brackets around value names.
                arg = arg.value_name(placeholder.trim_matches(['<', '>', '[', ']']).to_string());
            }
            arg = match &spec.kind {
                OptionKind::Flag => arg.action(ArgAction::SetTrue),
                OptionKind::CountedFlag => arg.action(ArgAction::Count),
                OptionKind::Unsigned => arg
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u64)),
                OptionKind::Signed => arg
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(i64))
                    .allow_negative_numbers(true),
                OptionKind::Text => arg.action(ArgAction::Set),
                OptionKind::Custom(_) => arg.action(ArgAction::Append),
            };
            command = command.arg(arg);
        }
        command
    }

    /// Parses a full argument vector (including the program name). Custom
    /// converters run in configuration order for every occurrence of their
    /// option.
    pub fn parse(&self, args: &[String]) -> Result<ParsedValues, ParseError> {
        let matches = self
            .command()
            .try_get_matches_from(args)
            .map_err(|e| ParseError::Invalid(e.to_string()))?;

        for spec in &self.specs {
            if let OptionKind::Custom(converter) = &spec.kind {
                if let Some(values) = matches.get_many::<String>(&spec.key()) {
                    for value in values {
                        converter(spec.id, value).map_err(|message| {
                            ParseError::Conversion {
                                option: spec.key(),
                                message,
                            }
                        })?;
                    }
                }
            }
        }

        let mut keys = HashMap::new();
        for spec in &self.specs {
            keys.insert(spec.id, spec.key());
        }
        let help_requested = self.auto_help && matches.get_flag("help");
        Ok(ParsedValues {
            matches,
            keys,
            help_requested,
        })
    }

    /// Renders the help text: title, the option table, additional info and
    /// the usage examples.
    pub fn help(&self) -> String {
        let mut text = String::new();
        if !self.help_title.is_empty() {
            text.push_str(&self.help_title);
            text.push_str("\n\n");
        }
        text.push_str(&self.command().render_help().to_string());
        if !self.help_info.is_empty() {
            text.push('\n');
            text.push_str(&self.help_info);
            text.push('\n');
        }
        if !self.examples.is_empty() {
            text.push_str("\nExamples:\n");
            for (call, description) in &self.examples {
                text.push_str(&format!("  {call}\n      {description}\n"));
            }
        }
        text
    }
}

/// Typed access to the parsed option values.
#[derive(Debug)]
pub struct ParsedValues {
    matches: ArgMatches,
    keys: HashMap<OptionId, String>,
    help_requested: bool,
}

impl ParsedValues {
    pub fn help_requested(&self) -> bool {
        self.help_requested
    }

    pub fn flag(&self, id: OptionId) -> bool {
        self.keys
            .get(&id)
            .map(|key| self.matches.get_flag(key))
            .unwrap_or(false)
    }

    pub fn count(&self, id: OptionId) -> u64 {
        self.keys
            .get(&id)
            .map(|key| u64::from(self.matches.get_count(key)))
            .unwrap_or(0)
    }

    pub fn unsigned(&self, id: OptionId) -> Option<u64> {
        self.keys
            .get(&id)
            .and_then(|key| self.matches.get_one::<u64>(key))
            .copied()
    }

    pub fn signed(&self, id: OptionId) -> Option<i64> {
        self.keys
            .get(&id)
            .and_then(|key| self.matches.get_one::<i64>(key))
            .copied()
    }

    pub fn text(&self, id: OptionId) -> Option<&str> {
        self.keys
            .get(&id)
            .and_then(|key| self.matches.get_one::<String>(key))
            .map(String::as_str)
    }
}
