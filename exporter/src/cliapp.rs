//! This module implements the definition of the command line app.
use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Receives StatsD metrics and exports them as Prometheus metrics.";

pub fn make_app() -> Command {
    Command::new("statsd-exporter")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("STATSD_EXPORTER_CONFIG")
                .help("The path to the config file."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the exporter")
                .after_help(
                    "This runs the exporter in the foreground until it's shut down. It will \
                     bind to the ports and network interfaces configured in the config file.",
                )
                .arg(
                    Arg::new("udp")
                        .value_name("ADDR")
                        .long("udp")
                        .env("STATSD_EXPORTER_UDP")
                        .help("The UDP address to listen on, or 'off' to disable UDP."),
                )
                .arg(
                    Arg::new("tcp")
                        .value_name("ADDR")
                        .long("tcp")
                        .env("STATSD_EXPORTER_TCP")
                        .help("The TCP address to listen on, or 'off' to disable TCP."),
                )
                .arg(
                    Arg::new("log_level")
                        .value_name("LEVEL")
                        .long("log-level")
                        .env("STATSD_EXPORTER_LOG_LEVEL")
                        .value_parser(["error", "warn", "info", "debug", "trace"])
                        .help("The log level of the exporter."),
                )
                .arg(
                    Arg::new("mapping")
                        .value_name("PATH")
                        .long("mapping")
                        .short('m')
                        .env("STATSD_EXPORTER_MAPPING")
                        .help("The path to the metric mapping file."),
                ),
        )
        .subcommand(
            Command::new("parse")
                .about("Decode StatsD lines and print the resulting events")
                .after_help(
                    "This reads StatsD lines from a file or from stdin and prints one event \
                     per line. Malformed lines produce no output. Use this to check how the \
                     exporter interprets the output of a client.",
                )
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .value_parser(ValueParser::path_buf())
                        .help("The file to read lines from. Reads stdin if omitted."),
                )
                .arg(
                    Arg::new("escape")
                        .long("escape")
                        .action(ArgAction::SetTrue)
                        .help("Print metric names as they would be exported when unmapped."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the exporter config")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values which \
                             are not in the config file but filled in from defaults. The \
                             default output format is YAML but a debug format can also be \
                             specified which is useful to understand how the exporter \
                             interprets the individual values.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(["debug", "yaml"])
                                .default_value("yaml")
                                .help("The output format"),
                        ),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let matches = make_app()
            .try_get_matches_from(["statsd-exporter", "run", "--udp", "off", "-m", "map.yml"])
            .unwrap();
        let run = matches.subcommand_matches("run").unwrap();

        assert_eq!(run.get_one::<String>("udp").map(String::as_str), Some("off"));
        assert_eq!(run.get_one::<String>("mapping").map(String::as_str), Some("map.yml"));
        assert_eq!(run.get_one::<String>("tcp"), None);
    }

    #[test]
    fn test_invalid_log_level() {
        let result =
            make_app().try_get_matches_from(["statsd-exporter", "run", "--log-level", "loud"]);
        assert!(result.is_err());
    }
}
