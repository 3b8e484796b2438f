#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, Command};

mod builtin_tools;
mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Path to a TOML configuration file")
}

#[tokio::main]
async fn main() {
    let matches = Command::new("assistant-core")
        .version(VERSION)
        .about("Local-first assistant server: guarded tool execution, reasoning orchestration, and an append-only event log")
        .subcommand(
            Command::new("serve")
                .about("Start the HTTP server")
                .arg(config_arg())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Overrides the configured port"),
                )
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDRESS")
                        .help("Overrides the configured bind address"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Configuration inspection")
                .subcommand(
                    Command::new("print")
                        .about("Print the resolved configuration as TOML")
                        .arg(config_arg()),
                ),
        )
        .subcommand(
            Command::new("events")
                .about("Event log inspection")
                .subcommand(
                    Command::new("tail")
                        .about("Print the most recent events")
                        .arg(config_arg())
                        .arg(
                            Arg::new("n")
                                .short('n')
                                .long("n")
                                .value_name("COUNT")
                                .help("Number of events to print")
                                .default_value("50"),
                        )
                        .arg(
                            Arg::new("conv-id")
                                .long("conv-id")
                                .value_name("UUID")
                                .help("Restrict to one conversation"),
                        )
                        .arg(
                            Arg::new("acts")
                                .long("acts")
                                .value_name("ACT,ACT,...")
                                .help("Comma-separated list of act names to include"),
                        ),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("serve", sub_matches)) => {
            commands::serve::run(sub_matches).await;
        }
        Some(("config", sub_matches)) => match sub_matches.subcommand() {
            Some(("print", sub_matches)) => {
                commands::config::print(sub_matches).await;
            }
            _ => {
                eprintln!("expected a config subcommand — try `assistant-core config print`");
                std::process::exit(1);
            }
        },
        Some(("events", sub_matches)) => match sub_matches.subcommand() {
            Some(("tail", sub_matches)) => {
                commands::events::tail(sub_matches).await;
            }
            _ => {
                eprintln!("expected an events subcommand — try `assistant-core events tail`");
                std::process::exit(1);
            }
        },
        _ => {
            println!("assistant-core v{VERSION}");
            println!("Use --help for available commands");
        }
    }
}
