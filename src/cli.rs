// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Global connection overrides plus exec, upload, download, tunnel and check.

use clap::{Parser, Subcommand};
use sshlink::output::OutputMode;
use sshlink::types::Endpoint;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sshlink")]
#[command(about = "Run commands, copy files and forward ports over SSH")]
#[command(version)]
pub struct Cli {
    /// Config file (default: sshlink.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Target as user@host[:port], overriding the config file
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Login user, overriding the one in the target
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Jump host as host[:port]
    #[arg(short = 'J', long, global = true)]
    pub jump: Option<String>,

    /// Proxy URL (socks5://, socks5h://, socks://, http://, https://)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Private key file
    #[arg(short, long, global = true, conflicts_with = "password_env")]
    pub identity: Option<PathBuf>,

    /// Read the password from this environment variable
    #[arg(long, global = true, value_name = "VAR")]
    pub password_env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on the target and exit with its exit code
    Exec {
        /// Allocate a pseudo-terminal
        #[arg(long)]
        pty: bool,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a local file to the target
    Upload { local: PathBuf, remote: String },

    /// Copy a file from the target
    Download { remote: String, local: PathBuf },

    /// Forward a local port through an SSH relay until interrupted
    ///
    /// With --local, --relay and --remote no config file is needed: the
    /// relay stands in for the target and --user names the login.
    Tunnel {
        /// Local listen address (port 0 picks a free port)
        #[arg(long, requires_all = ["relay", "remote"])]
        local: Option<Endpoint>,

        /// SSH relay host as host:port
        #[arg(long, requires_all = ["local", "remote"])]
        relay: Option<Endpoint>,

        /// Address the relay connects to
        #[arg(long, requires_all = ["local", "relay"])]
        remote: Option<Endpoint>,
    },

    /// Validate the configuration and print the resolved target
    Check,
}
