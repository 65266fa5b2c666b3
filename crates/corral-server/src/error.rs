//! Error types for launching and supervising server instances.

use std::path::PathBuf;

use crate::client::ClientError;

/// Errors raised while building, starting or talking to an instance.
///
/// Stopping never produces one of these: termination and diagnostics
/// problems are logged where they happen (see [`crate::process::ProcessError`]
/// and [`crate::diagnostics::DiagnosticsError`]).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid or contradictory configuration, caught before any spawn.
    #[error("invalid server configuration: {0}")]
    Configuration(String),

    /// The binary could not be asked for its version.
    #[error("could not determine the version of {}: {reason}", binary.display())]
    VersionProbe { binary: PathBuf, reason: String },

    /// The health check ran out of attempts.
    #[error("server {server_id} ({role}) not ready after {attempts} attempts: {last_error}")]
    StartupTimeout {
        server_id: u32,
        role: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// The process died while the health check was still polling it.
    #[error("server {server_id} ({role}) exited during startup ({status})")]
    ExitedDuringStartup {
        server_id: u32,
        role: &'static str,
        status: String,
    },

    /// A directory the server writes into could not be created.
    #[error("failed to create {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process could not be spawned at all.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No free port turned up within the attempt budget.
    #[error("could not find a free port after {0} attempts")]
    PortAllocationExhausted(u32),

    /// Binding a candidate port failed for a reason other than it being taken.
    #[error("failed to probe port {port}: {source}")]
    PortProbe {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The shared port registry file could not be read or written.
    #[error("port registry {}: {source}", path.display())]
    PortRegistry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A protocol-level failure the health check does not retry.
    #[error(transparent)]
    Client(#[from] ClientError),
}
