//! conic signaling relay server
//!
//! Exit codes: 0 on graceful shutdown, 2 on invalid configuration,
//! 1 on a fatal listener error.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};

use conic::config::Config;
use conic::error::Result;
use conic::hub::Hub;
use conic::server::SignalServer;
use conic::{logging, VERSION};

fn main() -> ExitCode {
    let matches = Command::new("conic-server")
        .version(VERSION)
        .about("WebRTC signaling relay server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (TOML or JSON)"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16).range(1..))
                .help("Server port"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (debug, info, warn, error)"),
        )
        .get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(2);
        }
    };

    logging::init(&config.logging);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "server error");
            ExitCode::FAILURE
        }
    }
}

/// Merge configuration sources: flags > environment > file > defaults
fn load_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches.get_one::<String>("config").map(Path::new);
    let mut config = Config::load(path)?;

    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn run(config: Config) -> Result<()> {
    tracing::info!(version = VERSION, addr = %config.bind_addr(), "starting conic server");

    let hub = Arc::new(Hub::new());
    hub.start()?;

    let server = SignalServer::new(&config, Arc::clone(&hub));

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    hub.stop().await?;

    tracing::info!("server stopped gracefully");
    result
}
