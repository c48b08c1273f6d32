//! Command-line interface handling for the relay.
//!
//! Every option here overrides the matching configuration file setting.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the listener port only
    pub port: Option<u16>,
    /// Optional override for the upgrade path
    pub path: Option<String>,
    /// Do not echo frames back to their sender
    pub exclude_sender: bool,
    /// Prefix relayed text frames with the sender id
    pub label_sender: bool,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional file to append logs to
    pub log_file: Option<String>,
}

impl CliArgs {
    /// Parses the process arguments.
    ///
    /// Exits with a usage message on invalid input, like any clap program.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("relay.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            port: matches.get_one::<u16>("port").copied(),
            path: matches.get_one::<String>("path").cloned(),
            exclude_sender: matches.get_flag("exclude-sender"),
            label_sender: matches.get_flag("label-sender"),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            log_file: matches.get_one::<String>("log-file").cloned(),
        }
    }
}

fn command() -> Command {
    Command::new("relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time WebSocket message relay")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("relay.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:8080)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("Listener port, keeping the configured host")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .value_name("PATH")
                .help("Request path upgraded to a WebSocket (e.g., /echo)"),
        )
        .arg(
            Arg::new("exclude-sender")
                .long("exclude-sender")
                .help("Do not echo frames back to the client that sent them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("label-sender")
                .long("label-sender")
                .help("Prefix relayed text with \"User <id>: \"")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Append logs to this file instead of stdout"),
        )
}
