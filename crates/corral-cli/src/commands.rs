//! Subcommand implementations.
//!
//! Each returns `Ok(false)` when it ran but the outcome should still
//! turn into a failing exit status (an error reply, an unhealthy shard).

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use corral_cluster::{ClusterTopology, TopologyConfig};
use corral_modules::{find_libraries, ModuleLoader, MODULE_DIR};
use corral_server::client::cluster_info;
use corral_server::process::is_pid_alive;
use corral_server::{
    ClientError, Connector, Debugger, Endpoint, PortAllocator, PortRegistry, RespConnector,
    ServerConnection, ServerInstance,
};
use tracing::warn;

use crate::config::{self, MODULES_FILE_NAME};
use crate::error::CliError;
use crate::format::{format_crash_report, format_error_reply, format_response};
use crate::state;

/// Connection timeout for `corral status`, short so a hung shard does
/// not stall the whole listing.
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init(state_dir: &Path) -> Result<bool, CliError> {
    for dir in state::init_workspace(state_dir)? {
        println!("{}", dir.display());
    }
    Ok(true)
}

pub async fn start(state_dir: &Path, mut cfg: TopologyConfig) -> Result<bool, CliError> {
    if state::topology_path(state_dir).is_file() {
        let previous = state::load_topology(state_dir)?;
        if !live_pids(&previous).is_empty() {
            return Err(CliError::AlreadyRunning(state_dir.to_path_buf()));
        }
        warn!(state_dir = %state_dir.display(), "discarding state of a topology that is no longer running");
        state::clear_topology(state_dir)?;
    }

    state::init_workspace(state_dir)?;
    config::add_installed_modules(&mut cfg.server, find_libraries(&state_dir.join(MODULE_DIR)));

    let allocator = PortAllocator::new(PortRegistry::default());
    let mut topology = ClusterTopology::new(&cfg, &allocator)?;
    let started = topology.start(&RespConnector::default(), true, true).await;

    // a convergence timeout leaves processes behind for inspection;
    // record them so `corral stop` can still reach them
    if !live_pids(&topology).is_empty() {
        state::save_topology(state_dir, &topology)?;
    }
    started?;

    print_info(&topology);
    Ok(true)
}

pub async fn stop(state_dir: &Path) -> Result<bool, CliError> {
    let mut topology = state::load_topology(state_dir)?;
    topology.stop(true, true).await;

    for instance in topology.shards().iter().flat_map(|s| s.instances()) {
        if let Some(report) = instance.crash_report().filter(|r| !r.is_empty()) {
            eprintln!(
                "{}",
                format_crash_report(instance.server_id(), instance.role().name(), report)
            );
        }
    }

    state::clear_topology(state_dir)?;
    println!("{}", "stopped".green());
    Ok(true)
}

pub fn info(state_dir: &Path) -> Result<bool, CliError> {
    print_info(&state::load_topology(state_dir)?);
    Ok(true)
}

/// Prints cluster state per shard. Fails unless every shard is `ok`.
pub async fn status(state_dir: &Path) -> Result<bool, CliError> {
    let topology = state::load_topology(state_dir)?;
    let connector = RespConnector::with_timeout(STATUS_TIMEOUT);
    let mut all_ok = true;

    for (i, shard) in topology.shards().iter().enumerate() {
        let primary = shard.primary();
        let state = if is_alive(primary) {
            match cluster_state(primary, &connector).await {
                Ok(state) => state,
                Err(e) => format!("unreachable ({e})"),
            }
        } else {
            "down".to_string()
        };
        all_ok &= state == "ok";

        let label = if state == "ok" { state.green() } else { state.red() };
        println!(
            "shard {} primary {} ({}): {label}",
            i + 1,
            primary.server_id(),
            primary.endpoint()
        );
        if let Some(replica) = shard.replica() {
            let alive = is_alive(replica);
            all_ok &= alive;
            let label = if alive { "running".green() } else { "down".red() };
            println!(
                "shard {} replica {} ({}): {label}",
                i + 1,
                replica.server_id(),
                replica.endpoint()
            );
        }
    }
    Ok(all_ok)
}

/// Sends one command to the primary with the given server id.
pub async fn cli(state_dir: &Path, server_id: u32, command: &[String]) -> Result<bool, CliError> {
    let topology = state::load_topology(state_dir)?;
    let primary = topology.primary(server_id)?;
    let mut conn = primary.connect(&RespConnector::default()).await?;

    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    match conn.execute(&args).await {
        Ok(reply) => {
            println!("{}", format_response(&reply));
            Ok(true)
        }
        Err(ClientError::Reply(message)) => {
            println!("{}", format_error_reply(&message));
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetches the modules listed in `<state>/modules.toml` into `<state>/mod`.
pub fn modules(state_dir: &Path, npm: Option<&Path>) -> Result<bool, CliError> {
    let mut loader = ModuleLoader::new(state_dir.join(MODULES_FILE_NAME), state_dir);
    if let Some(npm) = npm {
        loader = loader.with_npm(npm);
    }

    let modules = loader.load_config()?;
    if modules.is_empty() {
        println!(
            "{}",
            format!("no modules listed in {}", state_dir.join(MODULES_FILE_NAME).display()).dimmed()
        );
        return Ok(true);
    }

    state::init_workspace(state_dir)?;
    loader.fetch_packages(&modules)?;
    for path in loader.extract(&modules)? {
        println!("{}", path.display());
    }
    Ok(true)
}

pub fn config_template() -> Result<bool, CliError> {
    print!("{}", config::template()?);
    Ok(true)
}

fn is_alive(instance: &ServerInstance) -> bool {
    instance.pid().is_some_and(is_pid_alive)
}

fn live_pids(topology: &ClusterTopology) -> Vec<u32> {
    topology
        .shards()
        .iter()
        .flat_map(|s| s.instances())
        .filter_map(ServerInstance::pid)
        .filter(|pid| is_pid_alive(*pid))
        .collect()
}

async fn cluster_state<C: Connector>(
    instance: &ServerInstance,
    connector: &C,
) -> Result<String, ClientError> {
    let mut conn = instance.connect(connector).await?;
    let info = cluster_info(&mut conn).await?;
    Ok(info
        .get("cluster_state")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string()))
}

fn print_info(topology: &ClusterTopology) {
    for (i, shard) in topology.shards().iter().enumerate() {
        let slots = topology
            .slots()
            .get(i)
            .map(ToString::to_string)
            .unwrap_or_default();
        println!("{}", format!("shard {} (slots {slots})", i + 1).bold());
        for instance in shard.instances() {
            print_instance(instance);
        }
    }
}

fn print_instance(instance: &ServerInstance) {
    let config = instance.config();
    println!(
        "  {} {}",
        instance.role().name().cyan(),
        instance.server_id()
    );
    field(
        "pid",
        instance.pid().map_or_else(|| "-".to_string(), |p| p.to_string()),
    );
    match instance.endpoint() {
        Endpoint::Tcp { port, .. } => field("port", port),
        Endpoint::Unix(path) => field("unix socket", path.display()),
    }
    field("binary", config.resolved_binary().display());
    if let Some(debugger) = &config.debugger {
        field("debugger", debugger_name(debugger));
    }
    for (i, module) in config.module_paths.iter().enumerate() {
        let args = config
            .module_args
            .get(i)
            .map(|a| a.join(" "))
            .unwrap_or_default();
        field("module", format!("{} {args}", module.display()).trim_end());
    }
    match instance.log_file() {
        Some(path) => field("log file", path.display()),
        None => field("log file", "-"),
    }
    field("db file", instance.db_file_name());
    field("data dir", config.data_dir().display());
    if let Some(lib_path) = config.resolved_lib_path() {
        field("library path", lib_path.display());
    }
}

fn field(name: &str, value: impl std::fmt::Display) {
    println!("    {}{value}", format!("{:<14}", format!("{name}:")).dimmed());
}

fn debugger_name(debugger: &Debugger) -> &'static str {
    match debugger {
        Debugger::Valgrind { .. } => "valgrind",
        Debugger::Gdb => "gdb",
        Debugger::Lldb => "lldb",
    }
}
