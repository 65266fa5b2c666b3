//! Launch command construction.
//!
//! [`CommandBuilder`] turns an instance's identity and [`ServerConfig`]
//! into a [`LaunchSpec`]: the program, its argument vector and the
//! environment variables layered over ours. The output is a pure
//! function of the inputs, so the same instance always launches the
//! same way and the result can be persisted and inspected.
//!
//! Every file an instance writes is named `<token>.<role>-<id><suffix>`
//! so that several topologies can share one state directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{absolutize, Persistence, Sanitizer, ServerConfig};
use crate::endpoint::Endpoint;
use crate::role::Role;
use crate::version::{ServerVersion, DEBUG_COMMAND_MIN_VERSION};

/// The sink a server logs to when logging is disabled.
pub const NULL_LOG: &str = "/dev/null";

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// The command line as a single shell-ish string, for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Path of the unix socket an instance listens on.
pub fn unix_socket_path(config: &ServerConfig, token: &str, role: &str) -> PathBuf {
    absolutize(&config.data_dir().join(format!("{token}-{role}.sock")))
}

/// Builds the [`LaunchSpec`] for one instance.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    config: &'a ServerConfig,
    server_id: u32,
    role: &'a Role,
    token: &'a str,
    endpoint: &'a Endpoint,
    cluster_enabled: bool,
    version: Option<ServerVersion>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        config: &'a ServerConfig,
        server_id: u32,
        role: &'a Role,
        token: &'a str,
        endpoint: &'a Endpoint,
    ) -> Self {
        Self {
            config,
            server_id,
            role,
            token,
            endpoint,
            cluster_enabled: false,
            version: None,
        }
    }

    pub fn cluster_enabled(mut self, enabled: bool) -> Self {
        self.cluster_enabled = enabled;
        self
    }

    /// The probed server version, gating optional flags.
    pub fn version(mut self, version: Option<ServerVersion>) -> Self {
        self.version = version;
        self
    }

    /// `<token>.<role>-<id><suffix>`
    pub fn file_name(&self, suffix: &str) -> String {
        format!(
            "{}.{}-{}{}",
            self.token,
            self.role.name(),
            self.server_id,
            suffix
        )
    }

    /// The log file the server writes to, when it writes one.
    pub fn log_file(&self) -> Option<PathBuf> {
        if !self.config.log_enabled || !self.config.capture_output {
            return None;
        }
        Some(absolutize(&self.config.log_dir()).join(self.file_name(".log")))
    }

    pub fn db_file_name(&self) -> String {
        self.file_name(".rdb")
    }

    fn valgrind_log(&self) -> Option<PathBuf> {
        self.config
            .capture_output
            .then(|| absolutize(&self.config.data_dir()).join(self.file_name(".valgrind.log")))
    }

    pub fn build(&self) -> LaunchSpec {
        let config = self.config;
        let mut argv: Vec<String> = Vec::new();

        if let Some(debugger) = &config.debugger {
            argv.extend(debugger.command_prefix(self.valgrind_log().as_deref()));
        }
        argv.push(path_arg(&config.resolved_binary()));

        match self.endpoint {
            Endpoint::Tcp { port, .. } => push(&mut argv, ["--port", &port.to_string()]),
            Endpoint::Unix(path) => {
                push(&mut argv, ["--port", "0", "--unixsocket", &path_arg(path)])
            }
        }

        let module_paths = config.resolved_module_paths();
        for (pos, module) in module_paths.iter().enumerate() {
            push(&mut argv, ["--loadmodule", &path_arg(module)]);
            if let Some(set) = config.module_args.get(pos) {
                argv.extend(split_module_args(set));
            }
        }

        push(
            &mut argv,
            ["--dir", &path_arg(&absolutize(&config.data_dir()))],
        );
        if !config.log_enabled {
            push(&mut argv, ["--logfile", NULL_LOG]);
        } else if let Some(log) = self.log_file() {
            push(&mut argv, ["--logfile", &path_arg(&log)]);
        }
        push(&mut argv, ["--dbfilename", &self.db_file_name()]);

        argv.extend(self.role.extra_args(config.password.as_deref()));
        if let Some(password) = &config.password {
            push(&mut argv, ["--requirepass", password]);
        }

        if self.cluster_enabled && self.role.takes_cluster_flags() {
            let conf = absolutize(&config.cluster_config_dir()).join(self.file_name(".cluster.conf"));
            push(
                &mut argv,
                [
                    "--cluster-enabled",
                    "yes",
                    "--cluster-config-file",
                    &path_arg(&conf),
                    "--cluster-node-timeout",
                    &config.cluster_node_timeout_ms().to_string(),
                ],
            );
        }

        if let Persistence::AppendOnly { rdb_preamble } = config.persistence {
            push(
                &mut argv,
                ["--appendonly", "yes", "--appendfilename", &self.file_name(".aof")],
            );
            if !rdb_preamble {
                push(&mut argv, ["--aof-use-rdb-preamble", "no"]);
            }
        }

        if config.enable_debug_command
            && self
                .version
                .is_some_and(|v| v >= DEBUG_COMMAND_MIN_VERSION)
        {
            push(&mut argv, ["--enable-debug-command", "yes"]);
        }

        let program = argv.remove(0);
        LaunchSpec {
            program,
            args: argv,
            env: self.env(),
        }
    }

    fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        if let Some(lib) = self.config.resolved_lib_path() {
            let lib = path_arg(&lib);
            let value = match std::env::var("LD_LIBRARY_PATH") {
                Ok(existing) if !existing.is_empty() => format!("{lib}:{existing}"),
                _ => lib,
            };
            env.insert("LD_LIBRARY_PATH".to_string(), value);
        }

        if let Some(Sanitizer::Address) = self.config.sanitizer {
            let log = absolutize(&self.config.log_dir()).join(self.file_name(".asan.log"));
            let log_path = format!("log_path={}", log.display());
            let value = match std::env::var("ASAN_OPTIONS") {
                Ok(existing) if !existing.is_empty() => format!("{existing}:{log_path}"),
                _ => log_path,
            };
            env.insert("ASAN_OPTIONS".to_string(), value);
        }

        env
    }
}

fn push<const N: usize>(argv: &mut Vec<String>, args: [&str; N]) {
    argv.extend(args.iter().map(|a| a.to_string()));
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Splits each module argument string on whitespace, dropping blanks.
fn split_module_args(set: &[String]) -> Vec<String> {
    set.iter()
        .map(|arg| arg.trim())
        .filter(|arg| !arg.is_empty())
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}
