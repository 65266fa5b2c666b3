//! corral-server: launching and supervising single server instances.
//!
//! This crate owns everything about one server process and the shard it
//! belongs to:
//!
//! - **Ports**: free TCP ports claimed through a file-locked registry
//!   shared by every orchestrator on the host
//! - **Launch commands**: argument vector and environment built from a
//!   typed [`ServerConfig`]
//! - **Process control**: spawn, liveness, SIGTERM with escalation,
//!   descendant cleanup
//! - **Health checks**: PING polling with loading/denied handling and an
//!   AOF rewrite wait
//! - **Diagnostics**: crash report extraction from server logs
//!
//! Talking to a server goes through the [`Connector`] trait, so the
//! launcher logic can be driven by something other than a live socket.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use corral_server::{PortAllocator, PortMode, RespConnector, ServerConfig, Shard};
//!
//! let config = ServerConfig::default();
//! let mut shard = Shard::new(1, &config, PortMode::Random, true, false, &PortAllocator::default())?;
//! shard.start(&RespConnector::default(), true, true).await?;
//! // ...
//! shard.stop(true, true).await;
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod diagnostics;
mod endpoint;
mod error;
mod health;
mod instance;
pub mod ports;
pub mod process;
mod role;
mod shard;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod version;

pub use client::{ClientError, Connector, RespConnection, RespConnector, ServerConnection};
pub use command::{CommandBuilder, LaunchSpec};
pub use config::{Debugger, Persistence, PortMode, Sanitizer, ServerConfig};
pub use diagnostics::{CrashReport, DiagnosticsError};
pub use endpoint::{Endpoint, LOCALHOST};
pub use error::ServerError;
pub use health::{HealthCheck, RETRY_INTERVAL};
pub use instance::{InstanceSnapshot, InstanceSpec, ServerInstance, TERMINATE_TIMEOUT};
pub use ports::{PortAllocator, PortRegistry};
pub use process::ProcessError;
pub use role::Role;
pub use shard::{Shard, ShardSnapshot};
pub use version::ServerVersion;
