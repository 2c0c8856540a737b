// ABOUTME: Entry point for the sshlink CLI application.
// ABOUTME: Parses arguments, loads config, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use sshlink::config::{Config, CredentialsConfig, Secret, TargetConfig};
use sshlink::error::{Error, Result};
use sshlink::output::Output;
use sshlink::ssh::TunnelSpec;
use sshlink::types::Endpoint;
use std::env;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.output_mode());
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let output = Output::new(cli.output_mode());
    let config = load_config(&cli)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Exec { pty, command } => {
            commands::exec_command(&config, &command, pty, &cancel, output).await
        }
        Commands::Upload { local, remote } => {
            commands::upload(&config, &local, &remote, &cancel, output).await?;
            Ok(0)
        }
        Commands::Download { remote, local } => {
            commands::download(&config, &remote, &local, &cancel, output).await?;
            Ok(0)
        }
        Commands::Tunnel {
            local,
            relay,
            remote,
        } => {
            let spec = match (local, relay, remote) {
                (Some(local), Some(relay), Some(remote)) => Some(TunnelSpec {
                    local,
                    relay,
                    remote,
                }),
                _ => None,
            };
            commands::tunnel(&config, spec, &cancel, output).await?;
            Ok(0)
        }
        Commands::Check => {
            commands::check(&config, output)?;
            Ok(0)
        }
    }
}

/// Load the config file (explicit, discovered, or none when the command
/// line names a target) and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let cwd = env::current_dir()?;
            match (Config::discover(&cwd), command_line_target(cli)?) {
                (Ok(config), _) => config,
                (Err(Error::ConfigNotFound(_)), Some(target)) => Config::new(target),
                (Err(e), _) => return Err(e),
            }
        }
    };

    if let Some(target) = &cli.target {
        config.target = parse_target(target)?;
    }
    if let Some(user) = &cli.user {
        config.target.user = Some(user.clone());
    }
    if let Some(jump) = &cli.jump {
        config.jump = Some(
            Endpoint::parse_with_default(jump, 22)
                .map_err(|e| Error::InvalidConfig(format!("jump host: {}", e)))?,
        );
    }
    if let Some(proxy) = &cli.proxy {
        config.proxy = Some(proxy.clone());
    }
    if let Some(identity) = &cli.identity {
        config.auth = Some(CredentialsConfig::key_file(identity));
    }
    if let Some(var) = &cli.password_env {
        config.auth = Some(CredentialsConfig::password(Secret::from_env(var)));
    }

    Ok(config)
}

/// Target named on the command line: `--target`, or the relay of a fully
/// specified tunnel.
fn command_line_target(cli: &Cli) -> Result<Option<TargetConfig>> {
    if let Some(target) = &cli.target {
        return parse_target(target).map(Some);
    }
    match &cli.command {
        Commands::Tunnel {
            relay: Some(relay), ..
        } => Ok(Some(TargetConfig {
            host: relay.host.clone(),
            port: relay.port,
            user: None,
        })),
        _ => Ok(None),
    }
}

fn parse_target(target: &str) -> Result<TargetConfig> {
    TargetConfig::parse(target).map_err(|e| Error::InvalidConfig(format!("target: {}", e)))
}
