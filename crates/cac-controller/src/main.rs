//! `cac` command line: run a simulated adaptation scenario or inspect configuration

use anyhow::Context;
use cac_controller::{fast_config, run_simulation, SimulationConfig};
use cac_core::AdaptationConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file (defaults apply when omitted)");

    Command::new("cac")
        .version(cac_controller::VERSION)
        .about("Cross-cutting adaptation coordinator")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a synthetic adaptation scenario and print a JSON report")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("components")
                        .long("components")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of simulated components"),
                )
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Hook rounds per component"),
                )
                .arg(
                    Arg::new("no-approve")
                        .long("no-approve")
                        .action(ArgAction::SetTrue)
                        .help("Leave generated requests queued"),
                )
                .arg(
                    Arg::new("fast")
                        .long("fast")
                        .action(ArgAction::SetTrue)
                        .help("Short reaction delay and auto-modify enabled"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg)
                .arg(
                    Arg::new("check")
                        .long("check")
                        .action(ArgAction::SetTrue)
                        .help("Only validate; print nothing on success"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(error) = result {
        eprintln!("tracing init failed: {error}");
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<AdaptationConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => AdaptationConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(AdaptationConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let mut config = load_config(args)?;
            if args.get_flag("fast") {
                config = fast_config(config);
            }
            let simulation = SimulationConfig {
                components: args.get_one::<usize>("components").copied().unwrap_or(4),
                rounds: args.get_one::<usize>("rounds").copied().unwrap_or(3),
                approve_pending: !args.get_flag("no-approve"),
            };
            let report = run_simulation(config, &simulation)
                .await
                .context("simulation failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            config.validate().context("invalid configuration")?;
            if !args.get_flag("check") {
                print!("{}", config.to_toml_string()?);
            }
        }
        _ => {}
    }
    Ok(())
}
