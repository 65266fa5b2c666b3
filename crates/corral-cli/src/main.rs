//! corral: run throwaway multi-shard server clusters on this machine.
//!
//! `corral start` launches the shards, meshes them into a cluster and
//! records what it started under the state directory; the other
//! subcommands pick that record up again.

mod commands;
mod config;
mod error;
mod format;
mod state;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, DEFAULT_STATE_DIR};
use crate::error::CliError;

/// Local ephemeral server clusters.
#[derive(Parser)]
#[command(name = "corral", version, about)]
struct Args {
    /// Workspace holding logs, data, modules and the running topology.
    #[arg(short, long, global = true, env = "CORRAL_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Config file. Defaults to `<state-dir>/corral.toml` if present.
    #[arg(short, long, global = true, env = "CORRAL_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging, including each server's launch command.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the workspace directories.
    Init,

    /// Start a cluster and wait for it to converge.
    Start(StartArgs),

    /// Stop the running cluster.
    Stop,

    /// Show pids, ports and files of every server.
    Info,

    /// Show the cluster state reported by each shard.
    Status,

    /// Run one command against a shard's primary.
    Cli {
        /// Server id of the primary.
        server_id: u32,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Fetch the extension modules listed in `<state-dir>/modules.toml`.
    Modules {
        /// npm executable to install packages with.
        #[arg(long, env = "CORRAL_NPM")]
        npm: Option<PathBuf>,
    },

    /// Print the default config as TOML.
    ConfigTemplate,
}

#[derive(clap::Args)]
struct StartArgs {
    /// Server binary.
    #[arg(short, long, env = "CORRAL_SERVER_BINARY")]
    binary: Option<PathBuf>,

    /// Number of shards.
    #[arg(short = 'n', long)]
    shards: Option<usize>,

    /// Give every shard a replica.
    #[arg(long)]
    replicas: bool,

    /// First port; shard i listens on port + 2i.
    #[arg(short, long)]
    port: Option<u16>,

    /// Pick free ports at random instead.
    #[arg(long, conflicts_with = "port")]
    random_ports: bool,

    /// Password every server requires.
    #[arg(short = 'a', long, env = "CORRAL_PASSWORD")]
    password: Option<String>,

    /// Use append-only persistence (with an RDB preamble).
    #[arg(long)]
    aof: bool,

    /// Directory prepended to the servers' LD_LIBRARY_PATH.
    #[arg(long)]
    lib_path: Option<PathBuf>,

    /// Seconds to wait for the cluster to converge.
    #[arg(long)]
    convergence_timeout: Option<u64>,
}

impl StartArgs {
    fn overrides(self, verbose: bool) -> Overrides {
        Overrides {
            binary: self.binary,
            shards: self.shards,
            replicas: self.replicas,
            port: self.port,
            random_ports: self.random_ports,
            password: self.password,
            append_only: self.aof,
            lib_path: self.lib_path,
            convergence_timeout_secs: self.convergence_timeout,
            verbose,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "corral=debug" } else { "corral=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", format!("error: {e}").red());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool, CliError> {
    let state_dir = args.state_dir.as_path();
    match args.command {
        Command::Init => commands::init(state_dir),
        Command::Start(start) => {
            let path = config::config_path(args.config.as_deref(), state_dir);
            let mut cfg = config::load(path.as_deref())?;
            config::apply(&mut cfg, state_dir, &start.overrides(args.verbose));
            block_on(commands::start(state_dir, cfg))
        }
        Command::Stop => block_on(commands::stop(state_dir)),
        Command::Info => commands::info(state_dir),
        Command::Status => block_on(commands::status(state_dir)),
        Command::Cli { server_id, command } => {
            block_on(commands::cli(state_dir, server_id, &command))
        }
        Command::Modules { npm } => commands::modules(state_dir, npm.as_deref()),
        Command::ConfigTemplate => commands::config_template(),
    }
}

fn block_on<F>(future: F) -> Result<bool, CliError>
where
    F: Future<Output = Result<bool, CliError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(future)
}
