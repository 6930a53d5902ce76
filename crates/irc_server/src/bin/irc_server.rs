use clap::Parser;
use flexi_logger::{Duplicate, Logger};
use irc_server::config::Config;
use irc_server::dispatcher::ServerState;
use irc_server::reactor::Reactor;
use log::{error, info};
use std::net::SocketAddr;
use std::process::ExitCode;

/// A minimal multi-user relay server speaking a subset of IRC.
#[derive(Parser, Debug)]
#[command(name = "irc_server", version)]
struct Cli {
    /// Port to listen on (1-65535).
    #[arg(value_parser = parse_port)]
    port: u16,

    /// Password clients must supply via PASS before registering (non-empty).
    #[arg(value_parser = parse_password)]
    password: String,

    /// Optional path to a TOML config file for ambient server settings.
    #[arg(long)]
    config: Option<String>,
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("invalid port: {s}"))?;
    if port == 0 {
        return Err("port must be between 1 and 65535".to_owned());
    }
    Ok(port)
}

fn parse_password(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("password must not be empty".to_owned());
    }
    Ok(s.to_owned())
}

fn run() -> Result<(), irc_server::errors::ServerError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let state = ServerState::new(config, cli.password);
    let mut reactor = Reactor::bind(addr, state)?;
    info!("listening on {addr}");
    reactor.run()
}

fn main() -> ExitCode {
    Logger::try_with_str("info")
        .and_then(|logger| {
            logger
                .log_to_stderr()
                .duplicate_to_stderr(Duplicate::All)
                .start()
        })
        .ok();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
