use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;
use exporter_config::{Config, OverridableConfig};
use exporter_metrics::{Event, SwappableMapper, escape_metric_name, parse_line};
use exporter_server::ServerState;
use prometheus::Registry;

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let mut config = load_config(&matches)?;

    if let Some(matches) = matches.subcommand_matches("run") {
        config.apply_override(extract_config_args(matches))?;
        run(config)
    } else if let Some(matches) = matches.subcommand_matches("parse") {
        parse(matches)
    } else if let Some(matches) = matches.subcommand_matches("config") {
        manage_config(&config, matches)
    } else {
        unreachable!();
    }
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    match matches.get_one::<String>("config") {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config from {path}")),
        None => Ok(Config::default()),
    }
}

/// Extract config arguments from a parsed command-line arguments object.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        udp: matches.get_one("udp").cloned(),
        tcp: matches.get_one("tcp").cloned(),
        log_level: matches.get_one("log_level").cloned(),
        mapping: matches.get_one("mapping").cloned(),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(matches) = matches.subcommand_matches("show") {
        show_config(config, matches)
    } else {
        unreachable!();
    }
}

#[allow(clippy::print_stdout)]
pub fn show_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("debug") => println!("{config:#?}"),
        Some("yaml") | None => print!("{}", config.to_yaml_string()?),
        Some(other) => anyhow::bail!("unsupported output format {other:?}"),
    }

    Ok(())
}

/// Decodes StatsD lines and prints one event per line.
#[allow(clippy::print_stdout)]
pub fn parse(matches: &ArgMatches) -> Result<()> {
    let input = match matches.get_one::<PathBuf>("file") {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut input = Vec::new();
            io::stdin()
                .read_to_end(&mut input)
                .context("failed to read stdin")?;
            input
        }
    };

    let escape = matches.get_flag("escape");

    for line in input.split(|&b| b == b'\n') {
        for event in parse_line(line) {
            if escape {
                println!("{}", escaped(event));
            } else {
                println!("{event}");
            }
        }
    }

    Ok(())
}

fn escaped(event: Event) -> Event {
    match event {
        Event::Counter {
            name,
            value,
            labels,
        } => Event::Counter {
            name: escape_metric_name(&name),
            value,
            labels,
        },
        Event::Gauge {
            name,
            value,
            relative,
            labels,
        } => Event::Gauge {
            name: escape_metric_name(&name),
            value,
            relative,
            labels,
        },
        Event::Timer {
            name,
            value,
            labels,
        } => Event::Timer {
            name: escape_metric_name(&name),
            value,
            labels,
        },
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);

    let registry = Registry::new();
    setup::init_telemetry(&registry);

    let table = config.load_mapping().context("failed to load mapping table")?;
    exporter_log::info!("  mappings: {}", table.len());
    let mapper = Arc::new(SwappableMapper::new(table));

    let server = ServerState::start(&config, &registry, mapper)?;
    server.join()?;

    exporter_log::info!("exporter shutdown complete");
    Ok(())
}
