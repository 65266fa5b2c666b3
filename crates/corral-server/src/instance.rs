//! One supervised server process.
//!
//! A [`ServerInstance`] is built once with its launch command fixed, then
//! started and stopped any number of times. Starting spawns the process
//! (unless it is already there) and runs the health check; stopping
//! terminates the process tree and, if the server had already died on
//! its own, pulls the crash report out of its log.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{ClientError, Connector};
use crate::command::{CommandBuilder, LaunchSpec};
use crate::config::ServerConfig;
use crate::diagnostics::{self, CrashReport};
use crate::endpoint::Endpoint;
use crate::error::ServerError;
use crate::health::{HealthCheck, RETRY_INTERVAL};
use crate::process::{self, ServerProcess, StdioPolicy};
use crate::role::Role;
use crate::version::ServerVersion;

/// How long a process gets to exit after SIGTERM.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Identity and placement of an instance, fixed at construction.
#[derive(Debug, Clone)]
pub struct InstanceSpec<'a> {
    pub server_id: u32,
    pub role: Role,
    pub token: &'a str,
    pub endpoint: Endpoint,
    pub cluster_enabled: bool,
    pub version: Option<ServerVersion>,
}

#[derive(Debug)]
pub struct ServerInstance {
    server_id: u32,
    role: Role,
    token: String,
    endpoint: Endpoint,
    launch: LaunchSpec,
    log_file: Option<PathBuf>,
    db_file_name: String,
    config: ServerConfig,
    process: Option<ServerProcess>,
    exit_code: Option<i32>,
    healthy: bool,
    crash_report: Option<CrashReport>,
}

/// Serializable form of a [`ServerInstance`], used to stop or inspect
/// an instance from a later process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub server_id: u32,
    pub role: Role,
    pub token: String,
    pub endpoint: Endpoint,
    pub launch: LaunchSpec,
    pub log_file: Option<PathBuf>,
    pub db_file_name: String,
    pub config: ServerConfig,
    pub pid: Option<u32>,
}

impl ServerInstance {
    /// Builds the instance and its launch command. Nothing is spawned.
    ///
    /// The config is expected to have passed [`ServerConfig::validate`]
    /// for this instance's shape.
    pub fn new(config: &ServerConfig, spec: InstanceSpec<'_>) -> Self {
        let builder = CommandBuilder::new(
            config,
            spec.server_id,
            &spec.role,
            spec.token,
            &spec.endpoint,
        )
        .cluster_enabled(spec.cluster_enabled)
        .version(spec.version);
        let launch = builder.build();
        let log_file = builder.log_file();
        let db_file_name = builder.db_file_name();

        Self {
            server_id: spec.server_id,
            role: spec.role,
            token: spec.token.to_string(),
            endpoint: spec.endpoint,
            launch,
            log_file,
            db_file_name,
            config: config.clone(),
            process: None,
            exit_code: None,
            healthy: false,
            crash_report: None,
        }
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn db_file_name(&self) -> &str {
        &self.db_file_name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::pid)
    }

    /// Whether a process handle is held, alive or not.
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// The crash report found by the last [`stop`](Self::stop), if the
    /// server had died on its own.
    pub fn crash_report(&self) -> Option<&CrashReport> {
        self.crash_report.as_ref()
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ServerProcess::is_alive)
    }

    /// Spawns the process if needed and waits until it is ready.
    ///
    /// Calling this on a running, healthy instance does nothing.
    pub async fn start<C: Connector>(&mut self, connector: &C) -> Result<(), ServerError> {
        if self.healthy && self.is_running() {
            debug!(server_id = self.server_id, role = self.role.name(), "already running");
            return Ok(());
        }
        self.healthy = false;

        if !self.is_running() {
            if self.config.verbose {
                info!(
                    server_id = self.server_id,
                    role = self.role.name(),
                    "launching: {}",
                    self.launch.display()
                );
            }
            self.config.create_dirs()?;
            let stdio = StdioPolicy {
                capture: self.config.capture_output,
                interactive: self.config.has_interactive_debugger(),
            };
            self.process = Some(ServerProcess::spawn(&self.launch, stdio)?);
            self.exit_code = None;
            self.crash_report = None;
        }

        let check = HealthCheck {
            server_id: self.server_id,
            role: self.role.name(),
            endpoint: &self.endpoint,
            password: self.config.password.as_deref(),
            attempts: self.config.startup_retry_budget(),
            interval: RETRY_INTERVAL,
        };
        let process = &mut self.process;
        check
            .run(connector, || {
                process
                    .as_mut()
                    .and_then(ServerProcess::exit_code)
                    .map(|code| format!("exit code {code}"))
            })
            .await?;

        self.healthy = true;
        info!(
            server_id = self.server_id,
            role = self.role.name(),
            endpoint = %self.endpoint,
            pid = self.pid(),
            "server started"
        );
        Ok(())
    }

    /// Stops the process tree. Never fails: anything that goes wrong is
    /// logged and the instance ends up without a process either way.
    pub async fn stop(&mut self) {
        let Some(mut proc) = self.process.take() else {
            return;
        };
        self.healthy = false;
        let server_id = self.server_id;
        let role = self.role.name();

        if let Some(code) = proc.exit_code() {
            self.exit_code = Some(code);
            warn!(server_id, role, code, "server exited before it was stopped");
            // a debugger session owns the captured output
            if !(self.config.has_interactive_debugger() && self.config.capture_output) {
                self.collect_crash_report();
            }
            return;
        }

        for pid in proc.descendants() {
            if let Err(e) = process::terminate_pid(pid, TERMINATE_TIMEOUT).await {
                warn!(server_id, role, pid, "failed to stop child process: {e}");
            }
        }

        let code = match proc.terminate(TERMINATE_TIMEOUT).await {
            Ok(code) => code,
            Err(e) => {
                warn!(server_id, role, pid = proc.pid(), "{e}, killing it");
                proc.kill().unwrap_or_else(|e| {
                    warn!(server_id, role, pid = proc.pid(), "{e}");
                    -1
                })
            }
        };
        self.exit_code = Some(code);
        debug!(server_id, role, code, "server stopped");
    }

    fn collect_crash_report(&mut self) {
        let Some(path) = self.log_file.as_deref() else {
            warn!(
                server_id = self.server_id,
                role = self.role.name(),
                "crash diagnostics unavailable, output was not captured to a log file"
            );
            return;
        };
        match diagnostics::extract_crash_report(path) {
            Ok(report) if report.is_empty() => {
                info!(server_id = self.server_id, log = %path.display(), "no crash report in server log");
            }
            Ok(report) => {
                warn!(
                    server_id = self.server_id,
                    role = self.role.name(),
                    log = %path.display(),
                    "server crashed:\n\t{}",
                    report.lines.join("\n\t")
                );
                self.crash_report = Some(report);
            }
            Err(e) => warn!(server_id = self.server_id, "{e}"),
        }
    }

    /// Opens a fresh connection, authenticated if a password is set.
    pub async fn connect<C: Connector>(&self, connector: &C) -> Result<C::Connection, ClientError> {
        connector
            .connect(&self.endpoint, self.config.password.as_deref())
            .await
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            server_id: self.server_id,
            role: self.role.clone(),
            token: self.token.clone(),
            endpoint: self.endpoint.clone(),
            launch: self.launch.clone(),
            log_file: self.log_file.clone(),
            db_file_name: self.db_file_name.clone(),
            config: self.config.clone(),
            pid: self.pid(),
        }
    }

    /// Rebuilds an instance from a snapshot. A recorded pid is adopted;
    /// the instance counts as healthy if that process is still alive.
    pub fn restore(snapshot: InstanceSnapshot) -> Self {
        let process = snapshot.pid.map(ServerProcess::adopt);
        let healthy = snapshot.pid.is_some_and(process::is_pid_alive);
        Self {
            server_id: snapshot.server_id,
            role: snapshot.role,
            token: snapshot.token,
            endpoint: snapshot.endpoint,
            launch: snapshot.launch,
            log_file: snapshot.log_file,
            db_file_name: snapshot.db_file_name,
            config: snapshot.config,
            process,
            exit_code: None,
            healthy,
            crash_report: None,
        }
    }
}
