//! Typed configuration for a server instance.
//!
//! Every knob the launcher understands lives in [`ServerConfig`]. The
//! struct deserializes with defaults for every field, so a config file
//! only has to name what it changes. Contradictory combinations are
//! rejected by [`ServerConfig::validate`] before any process is spawned.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default `--cluster-node-timeout` in milliseconds.
pub const DEFAULT_CLUSTER_NODE_TIMEOUT_MS: u64 = 5000;

/// Health-check attempts before a start is declared failed.
pub const DEFAULT_STARTUP_RETRIES: u32 = 200;

/// Health-check attempts when an interactive debugger is attached, to
/// leave room for someone sitting at a breakpoint.
pub const DEBUGGER_STARTUP_RETRIES: u32 = 1000;

/// How the server persists its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Persistence {
    /// RDB snapshots only.
    #[default]
    Snapshot,
    /// Append-only file, optionally starting with an RDB preamble.
    AppendOnly { rdb_preamble: bool },
}

/// A debugger the server binary is launched under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Debugger {
    Valgrind {
        #[serde(default)]
        suppressions: Option<PathBuf>,
    },
    Gdb,
    Lldb,
}

impl Debugger {
    /// Interactive debuggers need the terminal and a human at the wheel.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Debugger::Gdb | Debugger::Lldb)
    }

    /// Returns the argument prefix that wraps the server binary.
    ///
    /// `log_file` is where valgrind writes its report; interactive
    /// debuggers ignore it.
    pub fn command_prefix(&self, log_file: Option<&Path>) -> Vec<String> {
        match self {
            Debugger::Valgrind { suppressions } => {
                let mut args = vec![
                    "valgrind".to_string(),
                    "--error-exitcode=255".to_string(),
                    "--leak-check=full".to_string(),
                    "--errors-for-leak-kinds=definite".to_string(),
                ];
                if let Some(path) = suppressions {
                    args.push(format!("--suppressions={}", path.display()));
                }
                if let Some(path) = log_file {
                    args.push(format!("--log-file={}", path.display()));
                }
                args
            }
            Debugger::Gdb => vec!["gdb".into(), "-ex".into(), "run".into(), "--args".into()],
            Debugger::Lldb => vec!["lldb".into(), "-o".into(), "run".into(), "--".into()],
        }
    }
}

/// A sanitizer the server binary was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sanitizer {
    #[serde(alias = "addr")]
    Address,
}

/// How an instance gets its TCP port(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// The primary gets this port, its replica the next one.
    Fixed(u16),
    /// Every instance draws its own free port from the allocator.
    Random,
    /// No TCP at all; the instance listens on a unix socket.
    None,
}

/// Configuration shared by every instance the launcher creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server binary. A leading `~/` is expanded.
    pub binary: PathBuf,
    /// Root of the workspace; logs, data and cluster configs go below it.
    pub state_dir: PathBuf,
    /// Overrides `<state_dir>/rdb`.
    pub data_dir: Option<PathBuf>,
    /// Overrides `<state_dir>/log`.
    pub log_dir: Option<PathBuf>,
    /// Prepended to `LD_LIBRARY_PATH`. A leading `~/` is expanded.
    pub lib_path: Option<PathBuf>,
    /// Extension modules loaded with `--loadmodule`.
    pub module_paths: Vec<PathBuf>,
    /// Argument sets, one per module. Empty means no module takes arguments.
    pub module_args: Vec<Vec<String>>,
    pub persistence: Persistence,
    pub password: Option<String>,
    pub cluster_node_timeout_ms: Option<u64>,
    /// Passes `--enable-debug-command yes` to servers new enough to know it.
    pub enable_debug_command: bool,
    /// Pipe the server's stdio instead of sharing ours.
    pub capture_output: bool,
    /// When false the server logs to `/dev/null`.
    pub log_enabled: bool,
    /// Listen on a unix socket instead of TCP.
    pub unix_socket: bool,
    pub debugger: Option<Debugger>,
    pub sanitizer: Option<Sanitizer>,
    pub startup_retries: u32,
    /// Log the full launch command of every instance.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("redis-server"),
            state_dir: PathBuf::from("corral-state"),
            data_dir: None,
            log_dir: None,
            lib_path: None,
            module_paths: Vec::new(),
            module_args: Vec::new(),
            persistence: Persistence::Snapshot,
            password: None,
            cluster_node_timeout_ms: None,
            enable_debug_command: false,
            capture_output: true,
            log_enabled: true,
            unix_socket: false,
            debugger: None,
            sanitizer: None,
            startup_retries: DEFAULT_STARTUP_RETRIES,
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("rdb"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("log"))
    }

    /// Directory holding the per-node cluster config files.
    pub fn cluster_config_dir(&self) -> PathBuf {
        self.state_dir.join("cfg")
    }

    /// Creates the data, log and cluster config directories.
    pub fn create_dirs(&self) -> Result<(), ServerError> {
        for dir in [self.data_dir(), self.log_dir(), self.cluster_config_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| ServerError::Directory { path: dir.clone(), source })?;
        }
        Ok(())
    }

    pub fn has_interactive_debugger(&self) -> bool {
        self.debugger.as_ref().is_some_and(Debugger::is_interactive)
    }

    pub fn cluster_node_timeout_ms(&self) -> u64 {
        self.cluster_node_timeout_ms
            .unwrap_or(DEFAULT_CLUSTER_NODE_TIMEOUT_MS)
    }

    /// Number of health-check attempts a start may use.
    pub fn startup_retry_budget(&self) -> u32 {
        if self.has_interactive_debugger() {
            self.startup_retries.max(DEBUGGER_STARTUP_RETRIES)
        } else {
            self.startup_retries
        }
    }

    /// Binary path with `~/` expanded.
    pub fn resolved_binary(&self) -> PathBuf {
        expand_home(&self.binary)
    }

    /// Library path with `~/` expanded.
    pub fn resolved_lib_path(&self) -> Option<PathBuf> {
        self.lib_path.as_deref().map(expand_home)
    }

    /// Module paths made absolute, so the server resolves them the same
    /// way regardless of its working directory.
    pub fn resolved_module_paths(&self) -> Vec<PathBuf> {
        self.module_paths.iter().map(|p| absolutize(p)).collect()
    }

    /// Checks the config against the shape of the instance being built.
    ///
    /// `unix` is whether the instance ends up on a unix socket, either by
    /// request or because no port mode was given.
    pub fn validate(
        &self,
        server_id: u32,
        unix: bool,
        with_replica: bool,
        cluster_enabled: bool,
    ) -> Result<(), ServerError> {
        if unix && cluster_enabled {
            return Err(ServerError::Configuration(
                "unix sockets cannot be used with cluster mode".into(),
            ));
        }
        if unix && with_replica {
            return Err(ServerError::Configuration(
                "replicas need a TCP port to reach their primary".into(),
            ));
        }
        if self.has_interactive_debugger() && server_id > 1 {
            if self.capture_output {
                return Err(ServerError::Configuration(format!(
                    "server {server_id}: an interactive debugger requires output capture to be disabled"
                )));
            }
            if with_replica || cluster_enabled {
                return Err(ServerError::Configuration(
                    "an interactive debugger can only drive a single instance (no replicas, no cluster)"
                        .into(),
                ));
            }
        }
        if !self.module_args.is_empty() && self.module_args.len() != self.module_paths.len() {
            return Err(ServerError::Configuration(format!(
                "{} module argument sets given for {} modules",
                self.module_args.len(),
                self.module_paths.len()
            )));
        }
        Ok(())
    }
}

/// Expands a leading `~/` to the current user's home directory.
///
/// Paths without the shorthand, and paths on systems without `HOME`,
/// come back unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_server() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.binary, PathBuf::from("redis-server"));
        assert_eq!(cfg.persistence, Persistence::Snapshot);
        assert!(cfg.capture_output);
        assert!(cfg.log_enabled);
        assert_eq!(cfg.cluster_node_timeout_ms(), 5000);
        assert_eq!(cfg.data_dir(), PathBuf::from("corral-state/rdb"));
        assert_eq!(cfg.log_dir(), PathBuf::from("corral-state/log"));
    }

    #[test]
    fn unix_socket_with_cluster_is_rejected() {
        let cfg = ServerConfig {
            unix_socket: true,
            ..Default::default()
        };
        let err = cfg.validate(1, true, false, true).unwrap_err();
        assert!(matches!(err, ServerError::Configuration(_)), "{err}");
    }

    #[test]
    fn interactive_debugger_beyond_first_server() {
        let mut cfg = ServerConfig {
            debugger: Some(Debugger::Gdb),
            ..Default::default()
        };
        // first server may keep output capture
        assert!(cfg.validate(1, false, false, false).is_ok());
        // later ones must not
        assert!(cfg.validate(2, false, false, false).is_err());

        cfg.capture_output = false;
        assert!(cfg.validate(2, false, false, false).is_ok());
        assert!(cfg.validate(2, false, true, false).is_err());
        assert!(cfg.validate(2, false, false, true).is_err());
    }

    #[test]
    fn valgrind_is_not_interactive() {
        let cfg = ServerConfig {
            debugger: Some(Debugger::Valgrind { suppressions: None }),
            ..Default::default()
        };
        assert!(!cfg.has_interactive_debugger());
        assert!(cfg.validate(3, false, true, true).is_ok());
        assert_eq!(cfg.startup_retry_budget(), DEFAULT_STARTUP_RETRIES);
    }

    #[test]
    fn interactive_debugger_raises_retry_budget() {
        let cfg = ServerConfig {
            debugger: Some(Debugger::Lldb),
            startup_retries: 5,
            ..Default::default()
        };
        assert_eq!(cfg.startup_retry_budget(), DEBUGGER_STARTUP_RETRIES);
    }

    #[test]
    fn module_arg_sets_must_match_modules() {
        let mut cfg = ServerConfig {
            module_paths: vec!["a.so".into(), "b.so".into()],
            ..Default::default()
        };
        assert!(cfg.validate(1, false, false, false).is_ok());

        cfg.module_args = vec![vec!["X 1".into()]];
        assert!(cfg.validate(1, false, false, false).is_err());

        cfg.module_args.push(vec![]);
        assert!(cfg.validate(1, false, false, false).is_ok());
    }

    #[test]
    fn valgrind_prefix_includes_log_file() {
        let dbg = Debugger::Valgrind { suppressions: None };
        let prefix = dbg.command_prefix(Some(Path::new("/tmp/x.valgrind.log")));
        assert_eq!(prefix[0], "valgrind");
        assert_eq!(prefix.last().unwrap(), "--log-file=/tmp/x.valgrind.log");
        assert!(!dbg.command_prefix(None).iter().any(|a| a.starts_with("--log-file")));
    }

    #[test]
    fn expand_home_only_touches_the_shorthand() {
        assert_eq!(
            expand_home(Path::new("/usr/bin/redis-server")),
            PathBuf::from("/usr/bin/redis-server")
        );
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/bin/redis-server")),
                PathBuf::from(home).join("bin/redis-server")
            );
        }
    }

    #[test]
    fn deserializes_from_partial_toml_like_json() {
        let cfg: ServerConfig = serde_json::from_str(
            r#"{"password":"s3cret","persistence":{"append-only":{"rdb_preamble":false}},"debugger":{"kind":"gdb"},"sanitizer":"addr"}"#,
        )
        .unwrap();
        assert_eq!(cfg.password.as_deref(), Some("s3cret"));
        assert_eq!(
            cfg.persistence,
            Persistence::AppendOnly {
                rdb_preamble: false
            }
        );
        assert_eq!(cfg.debugger, Some(Debugger::Gdb));
        assert_eq!(cfg.sanitizer, Some(Sanitizer::Address));
        assert!(cfg.capture_output);
    }
}
