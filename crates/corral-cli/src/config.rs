//! Layered configuration: defaults, then `corral.toml`, then flags.
//!
//! The config file is a serialized [`TopologyConfig`]; every field is
//! optional. The state directory always comes from the command line so
//! that every subcommand agrees on where the running topology lives.

use std::path::{Path, PathBuf};

use corral_cluster::TopologyConfig;
use corral_server::{Persistence, PortMode, ServerConfig};

use crate::error::CliError;

pub const DEFAULT_STATE_DIR: &str = "corral-state";
pub const CONFIG_FILE_NAME: &str = "corral.toml";
pub const MODULES_FILE_NAME: &str = "modules.toml";

/// Flag values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub binary: Option<PathBuf>,
    pub shards: Option<usize>,
    pub replicas: bool,
    pub port: Option<u16>,
    pub random_ports: bool,
    pub password: Option<String>,
    pub append_only: bool,
    pub lib_path: Option<PathBuf>,
    pub convergence_timeout_secs: Option<u64>,
    pub verbose: bool,
}

/// The config file to read: the explicit one if given, otherwise
/// `<state>/corral.toml` when it exists.
pub fn config_path(explicit: Option<&Path>, state_dir: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = state_dir.join(CONFIG_FILE_NAME);
            default.is_file().then_some(default)
        }
    }
}

/// Reads the config file, or returns the defaults when there is none.
pub fn load(path: Option<&Path>) -> Result<TopologyConfig, CliError> {
    let Some(path) = path else {
        return Ok(TopologyConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(CliError::io(path))?;
    toml::from_str(&raw).map_err(|source| CliError::Config {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies the state dir and command-line overrides.
pub fn apply(cfg: &mut TopologyConfig, state_dir: &Path, overrides: &Overrides) {
    cfg.server.state_dir = state_dir.to_path_buf();
    if let Some(binary) = &overrides.binary {
        cfg.server.binary = binary.clone();
    }
    if let Some(shards) = overrides.shards {
        cfg.shard_count = shards;
    }
    if overrides.replicas {
        cfg.replicas = true;
    }
    if overrides.random_ports {
        cfg.ports = PortMode::Random;
    } else if let Some(port) = overrides.port {
        cfg.ports = PortMode::Fixed(port);
    }
    if let Some(password) = &overrides.password {
        cfg.server.password = Some(password.clone());
    }
    if overrides.append_only && cfg.server.persistence == Persistence::Snapshot {
        cfg.server.persistence = Persistence::AppendOnly { rdb_preamble: true };
    }
    if let Some(lib_path) = &overrides.lib_path {
        cfg.server.lib_path = Some(lib_path.clone());
    }
    if let Some(secs) = overrides.convergence_timeout_secs {
        cfg.convergence_timeout_secs = secs;
    }
    if overrides.verbose {
        cfg.server.verbose = true;
    }
}

/// Adds modules unpacked by `corral modules` to the load list.
///
/// When the config gives per-module arguments, installed modules get an
/// empty argument set so the counts keep matching.
pub fn add_installed_modules(server: &mut ServerConfig, libraries: Vec<PathBuf>) {
    for library in libraries {
        if server.module_paths.contains(&library) {
            continue;
        }
        if !server.module_args.is_empty() {
            server.module_args.push(Vec::new());
        }
        server.module_paths.push(library);
    }
}

/// The default config rendered as TOML, for `corral config-template`.
pub fn template() -> Result<String, CliError> {
    Ok(toml::to_string(&TopologyConfig::default())?)
}
